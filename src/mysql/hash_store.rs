// ABOUTME: MySqlHashStore - master_hashes / slave_hashes tables on the sync database
// ABOUTME: Drops and recreates both tables per run; batched writes, per-unit loads

use async_trait::async_trait;
use mysql_async::prelude::*;
use mysql_async::{Pool, Value};
use std::sync::Arc;

use super::{read_error, write_error};
use crate::error::{Result, SyncError};
use crate::syncer::hash_store::{create_hash_table_sql, drop_hash_table_sql, HashStore};
use crate::syncer::mutation_log::MutationLog;
use crate::syncer::statement::Statement;
use crate::syncer::types::{HashRecord, Side};

const ROLE: &str = "sync";

pub struct MySqlHashStore {
    pool: Pool,
    log: Arc<MutationLog>,
}

impl MySqlHashStore {
    pub fn new(pool: Pool, log: Arc<MutationLog>) -> Self {
        Self { pool, log }
    }

    async fn conn(&self) -> Result<mysql_async::Conn> {
        self.pool
            .get_conn()
            .await
            .map_err(|e| read_error(ROLE, "<connect>", e))
    }
}

/// Batched write of hash records. A key seen again in the same run (a row
/// that moved partition mid-run) replaces the earlier record.
pub fn store_statement(side: Side, records: &[HashRecord]) -> Statement {
    let columns: Vec<String> = ["table_name", "partition_value", "primary_key_value", "hash"]
        .iter()
        .map(|c| c.to_string())
        .collect();
    Statement::Upsert {
        table: side.hash_table().to_string(),
        columns,
        rows: records
            .iter()
            .map(|r| {
                vec![
                    Value::from(r.table_name.as_str()),
                    r.partition_value
                        .as_deref()
                        .map(Value::from)
                        .unwrap_or(Value::NULL),
                    Value::from(r.primary_key_value.as_str()),
                    Value::from(r.hash.as_str()),
                ]
            })
            .collect(),
    }
}

/// Drop and create statements for both hash tables, in execution order.
pub fn reset_statements() -> Vec<Statement> {
    [Side::Slave, Side::Master]
        .into_iter()
        .flat_map(|side| {
            [
                Statement::Ddl(drop_hash_table_sql(side)),
                Statement::Ddl(create_hash_table_sql(side)),
            ]
        })
        .collect()
}

fn load_sql(side: Side) -> String {
    format!(
        "SELECT `table_name`, `partition_value`, `primary_key_value`, `hash` FROM `{}` \
         WHERE `table_name` = ? AND `partition_value` <=> ?",
        side.hash_table()
    )
}

#[async_trait]
impl HashStore for MySqlHashStore {
    async fn reset(&self) -> Result<()> {
        let mut conn = self.conn().await?;
        for statement in reset_statements() {
            let sql = statement.to_sql();
            conn.query_drop(sql.as_str())
                .await
                .map_err(|e| read_error(ROLE, &sql, e))?;
            self.log.append(&sql).await;
        }
        tracing::debug!("Recreated hash tables");
        Ok(())
    }

    async fn store(&self, side: Side, records: &[HashRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        let sql = store_statement(side, records).to_sql();
        let mut conn = self.conn().await?;
        conn.query_drop(sql.as_str()).await.map_err(|e| {
            // A rejected hash write is not owned by any unit
            match write_error(ROLE, &sql, e) {
                SyncError::Apply {
                    statement, message, ..
                } => SyncError::Infrastructure {
                    role: ROLE.to_string(),
                    statement: Some(statement),
                    message,
                },
                other => other,
            }
        })?;
        Ok(())
    }

    async fn load(
        &self,
        side: Side,
        table: &str,
        partition_value: Option<&str>,
    ) -> Result<Vec<HashRecord>> {
        let sql = load_sql(side);
        let mut conn = self.conn().await?;
        let rows: Vec<(String, Option<String>, String, Option<String>)> = conn
            .exec(sql.as_str(), (table, partition_value))
            .await
            .map_err(|e| read_error(ROLE, &sql, e))?;

        Ok(rows
            .into_iter()
            .map(
                |(table_name, partition_value, primary_key_value, hash)| HashRecord {
                    table_name,
                    partition_value,
                    primary_key_value,
                    hash: hash.unwrap_or_default(),
                },
            )
            .collect())
    }
}
