// ABOUTME: MySqlDatabase - the Database seam over a mysql_async pool
// ABOUTME: Catalog lookups via INFORMATION_SCHEMA, row reads over the text protocol

use async_trait::async_trait;
use mysql_async::prelude::*;
use mysql_async::{Pool, Row, Value};

use super::{read_error, write_error};
use crate::error::Result;
use crate::syncer::database::{Database, PageCursor};
use crate::syncer::statement::{key_in_list, literal, null_safe_eq, Statement};
use crate::syncer::types::{ColumnDefinition, RowFilter, Side, TableDefinition};
use crate::utils::{quote_mysql_ident, quote_mysql_ident_list};

const LIST_TABLES: &str = "SELECT TABLE_NAME FROM INFORMATION_SCHEMA.TABLES \
     WHERE TABLE_SCHEMA = DATABASE() AND TABLE_TYPE = 'BASE TABLE' \
     ORDER BY TABLE_NAME";

const DESCRIBE_COLUMNS: &str = "SELECT COLUMN_NAME, DATA_TYPE, COLLATION_NAME FROM INFORMATION_SCHEMA.COLUMNS \
     WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = ? \
     ORDER BY ORDINAL_POSITION";

const PRIMARY_KEY_COLUMNS: &str = "SELECT COLUMN_NAME FROM INFORMATION_SCHEMA.KEY_COLUMN_USAGE \
     WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = ? AND CONSTRAINT_NAME = 'PRIMARY' \
     ORDER BY ORDINAL_POSITION";

/// One role's database.
///
/// Rows are read with the text protocol and literals are inlined, so every
/// value arrives as its MySQL text form and hashes identically on both sides.
pub struct MySqlDatabase {
    role: String,
    pool: Pool,
}

impl MySqlDatabase {
    pub fn new(role: &str, pool: Pool) -> Self {
        Self {
            role: role.to_string(),
            pool,
        }
    }

    async fn conn(&self) -> Result<mysql_async::Conn> {
        self.pool
            .get_conn()
            .await
            .map_err(|e| read_error(&self.role, "<connect>", e))
    }

    async fn query_rows(&self, sql: &str) -> Result<Vec<Vec<Value>>> {
        let mut conn = self.conn().await?;
        let rows: Vec<Row> = conn
            .query(sql)
            .await
            .map_err(|e| read_error(&self.role, sql, e))?;
        Ok(rows.iter().map(row_values).collect())
    }
}

fn row_values(row: &Row) -> Vec<Value> {
    (0..row.len())
        .map(|i| row.as_ref(i).cloned().unwrap_or(Value::NULL))
        .collect()
}

fn filter_clause(table: &TableDefinition, filter: &RowFilter) -> Option<String> {
    match filter {
        RowFilter::All => None,
        RowFilter::Partition { column, value } => {
            let value = match (table.column(column), value) {
                (Some(definition), Some(value)) => Some(definition.typed_value(value.clone())),
                (_, value) => value.clone(),
            };
            Some(null_safe_eq(column, value.as_ref()))
        }
    }
}

/// Keyset predicate: rows whose key sorts after `after`.
fn after_clause(table: &TableDefinition, after: &[Value]) -> String {
    let primary_key = &table.primary_key;
    let values: Vec<String> = table.typed_key(after.to_vec()).iter().map(literal).collect();
    if primary_key.len() == 1 {
        format!(
            "{} > {}",
            quote_mysql_ident(&primary_key[0]),
            values.first().cloned().unwrap_or_else(|| "NULL".to_string())
        )
    } else {
        format!(
            "({}) > ({})",
            quote_mysql_ident_list(primary_key),
            values.join(", ")
        )
    }
}

/// SELECT for one page of `table`.
pub fn page_query(
    table: &TableDefinition,
    filter: &RowFilter,
    cursor: &PageCursor,
    limit: usize,
) -> String {
    let mut conditions: Vec<String> = filter_clause(table, filter).into_iter().collect();
    if let PageCursor::After(after) = cursor {
        if table.has_primary_key() {
            conditions.push(after_clause(table, after));
        }
    }

    let mut sql = format!(
        "SELECT {} FROM {}",
        quote_mysql_ident_list(&table.column_names()),
        quote_mysql_ident(&table.name)
    );
    if !conditions.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&conditions.join(" AND "));
    }

    // Without a key the only stable order is over every column
    let all_columns = table.column_names();
    let order_by = if table.has_primary_key() {
        &table.primary_key
    } else {
        &all_columns
    };
    sql.push_str(&format!(" ORDER BY {}", quote_mysql_ident_list(order_by)));
    sql.push_str(&format!(" LIMIT {}", limit));
    if let PageCursor::Offset(offset) = cursor {
        sql.push_str(&format!(" OFFSET {}", offset));
    }
    sql
}

#[async_trait]
impl Database for MySqlDatabase {
    fn role(&self) -> &str {
        &self.role
    }

    async fn list_tables(&self) -> Result<Vec<String>> {
        let mut conn = self.conn().await?;
        let tables: Vec<String> = conn
            .query(LIST_TABLES)
            .await
            .map_err(|e| read_error(&self.role, LIST_TABLES, e))?;
        // Hash tables only exist here when the sync schema is shared
        Ok(tables
            .into_iter()
            .filter(|t| t != Side::Master.hash_table() && t != Side::Slave.hash_table())
            .collect())
    }

    async fn describe_table(&self, table: &str) -> Result<Option<TableDefinition>> {
        let mut conn = self.conn().await?;
        let columns: Vec<(String, String, Option<String>)> = conn
            .exec(DESCRIBE_COLUMNS, (table,))
            .await
            .map_err(|e| read_error(&self.role, DESCRIBE_COLUMNS, e))?;
        if columns.is_empty() {
            return Ok(None);
        }

        let primary_key: Vec<String> = conn
            .exec(PRIMARY_KEY_COLUMNS, (table,))
            .await
            .map_err(|e| read_error(&self.role, PRIMARY_KEY_COLUMNS, e))?;

        Ok(Some(TableDefinition::new(
            table,
            columns
                .iter()
                .map(|(name, data_type, collation)| match collation {
                    Some(collation) => ColumnDefinition::new(name, data_type).with_collation(collation),
                    None => ColumnDefinition::new(name, data_type),
                })
                .collect(),
            primary_key,
        )))
    }

    async fn distinct_values(&self, table: &str, column: &str) -> Result<Vec<Option<Value>>> {
        let sql = format!(
            "SELECT DISTINCT {col} FROM {table} ORDER BY {col}",
            col = quote_mysql_ident(column),
            table = quote_mysql_ident(table)
        );
        let rows = self.query_rows(&sql).await?;
        Ok(rows
            .into_iter()
            .map(|row| match row.into_iter().next() {
                Some(Value::NULL) | None => None,
                Some(value) => Some(value),
            })
            .collect())
    }

    async fn fetch_page(
        &self,
        table: &TableDefinition,
        filter: &RowFilter,
        cursor: &PageCursor,
        limit: usize,
    ) -> Result<Vec<Vec<Value>>> {
        self.query_rows(&page_query(table, filter, cursor, limit))
            .await
    }

    async fn fetch_by_keys(
        &self,
        table: &TableDefinition,
        keys: &[Vec<Value>],
    ) -> Result<Vec<Vec<Value>>> {
        if keys.is_empty() || !table.has_primary_key() {
            return Ok(Vec::new());
        }
        let keys: Vec<Vec<Value>> = keys.iter().map(|k| table.typed_key(k.clone())).collect();
        let sql = format!(
            "SELECT {} FROM {} WHERE {} ORDER BY {}",
            quote_mysql_ident_list(&table.column_names()),
            quote_mysql_ident(&table.name),
            key_in_list(&table.primary_key, &keys),
            quote_mysql_ident_list(&table.primary_key)
        );
        self.query_rows(&sql).await
    }

    async fn execute(&self, statement: &Statement) -> Result<u64> {
        let sql = statement.to_sql();
        let mut conn = self.conn().await?;
        conn.query_drop(sql.as_str())
            .await
            .map_err(|e| write_error(&self.role, &sql, e))?;
        Ok(conn.affected_rows())
    }
}
