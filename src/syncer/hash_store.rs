// ABOUTME: Hash store seam - per-side tables of (table, partition, key) -> row digest
// ABOUTME: Rebuilt from scratch on every run; also builds a unit's hashes from a database

use async_trait::async_trait;

use super::database::{Database, PageCursor};
use super::hasher::{encode_key, hash_row, PRIMARY_KEY_VALUE_WIDTH};
use super::types::{HashRecord, Side, SyncUnit};
use crate::error::{Result, SyncError};

/// DDL for one side's hash table. Both sides share the same layout.
///
/// Keys are stored ASCII-only (see `hasher::encode_key`), so a binary ASCII
/// collation keeps key comparison exact and the primary key index small.
pub fn create_hash_table_sql(side: Side) -> String {
    format!(
        "CREATE TABLE `{}` (
    `table_name` varchar(255) NOT NULL DEFAULT '',
    `partition_value` char(32) DEFAULT NULL,
    `primary_key_value` varchar(767) NOT NULL DEFAULT '',
    `hash` char(32) DEFAULT NULL,
    PRIMARY KEY (`table_name`,`primary_key_value`),
    KEY `hash` (`hash`),
    KEY `partition_value` (`partition_value`)
) ENGINE=InnoDB DEFAULT CHARSET=ascii COLLATE=ascii_bin",
        side.hash_table()
    )
}

pub fn drop_hash_table_sql(side: Side) -> String {
    format!("DROP TABLE IF EXISTS `{}`", side.hash_table())
}

/// Persistent storage for row digests.
///
/// Records for different `(table_name, partition_value)` pairs never overlap,
/// so concurrent workers can write their own units without coordination.
#[async_trait]
pub trait HashStore: Send + Sync {
    /// Drop and recreate both hash tables.
    async fn reset(&self) -> Result<()>;

    /// Persist a batch of records for one side.
    async fn store(&self, side: Side, records: &[HashRecord]) -> Result<()>;

    /// All records for one table and partition on one side.
    async fn load(
        &self,
        side: Side,
        table: &str,
        partition_value: Option<&str>,
    ) -> Result<Vec<HashRecord>>;
}

/// Hash every row of `unit` on `db` and persist the digests as `side`.
///
/// Rows are read in primary-key order, `chunk_size` at a time, so memory
/// stays bounded regardless of table size. Returns the number of rows hashed.
///
/// A key whose encoding does not fit `primary_key_value` is a schema fault
/// for the unit; nothing of that page is written.
pub async fn build_unit_hashes(
    db: &dyn Database,
    store: &dyn HashStore,
    side: Side,
    unit: &SyncUnit,
    chunk_size: usize,
) -> Result<u64> {
    let table = unit.table.as_ref();
    let filter = unit.filter();
    let partition_value = unit.partition_key();
    let mut cursor = PageCursor::Start;
    let mut hashed = 0u64;

    loop {
        let rows = db.fetch_page(table, &filter, &cursor, chunk_size).await?;
        if rows.is_empty() {
            break;
        }

        let records = rows
            .iter()
            .map(|row| {
                let primary_key_value = encode_key(&table.key_of(row));
                if primary_key_value.len() > PRIMARY_KEY_VALUE_WIDTH {
                    return Err(SyncError::schema(
                        &table.name,
                        format!(
                            "primary key encodes to {} characters, wider than the {}-character hash store column",
                            primary_key_value.len(),
                            PRIMARY_KEY_VALUE_WIDTH
                        ),
                    ));
                }
                Ok(HashRecord {
                    table_name: table.name.clone(),
                    partition_value: partition_value.clone(),
                    primary_key_value,
                    hash: hash_row(table, row),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        store.store(side, &records).await?;
        hashed += records.len() as u64;

        let page_len = rows.len();
        match rows.last() {
            Some(last) if page_len == chunk_size => {
                cursor = PageCursor::After(table.key_of(last));
            }
            _ => break,
        }
    }

    tracing::debug!("Hashed {} {} rows for {}", hashed, side, unit.label());
    Ok(hashed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::syncer::memory::{MemoryDatabase, MemoryHashStore};
    use crate::syncer::types::{ColumnDefinition, TableDefinition, UnitMode};
    use mysql_async::Value;
    use std::sync::Arc;

    fn text(s: &str) -> Value {
        Value::Bytes(s.as_bytes().to_vec())
    }

    fn composite_keyed() -> TableDefinition {
        TableDefinition::new(
            "documents",
            vec![
                ColumnDefinition::new("path", "varchar"),
                ColumnDefinition::new("revision", "varchar"),
                ColumnDefinition::new("body", "text"),
            ],
            vec!["path".to_string(), "revision".to_string()],
        )
    }

    #[test]
    fn test_hash_table_ddl_layout() {
        let ddl = create_hash_table_sql(Side::Master);
        assert!(ddl.starts_with("CREATE TABLE `master_hashes`"));
        assert!(ddl.contains("`table_name` varchar(255) NOT NULL DEFAULT ''"));
        assert!(ddl.contains("`partition_value` char(32) DEFAULT NULL"));
        assert!(ddl.contains("`primary_key_value` varchar(767) NOT NULL DEFAULT ''"));
        assert!(ddl.contains("`hash` char(32) DEFAULT NULL"));
        assert!(ddl.contains("PRIMARY KEY (`table_name`,`primary_key_value`)"));
        assert!(ddl.contains("KEY `hash` (`hash`)"));
        assert!(ddl.contains("KEY `partition_value` (`partition_value`)"));
        assert!(ddl.ends_with("COLLATE=ascii_bin"));

        assert_eq!(
            drop_hash_table_sql(Side::Slave),
            "DROP TABLE IF EXISTS `slave_hashes`"
        );
    }

    #[tokio::test]
    async fn test_build_unit_hashes_stores_every_row() {
        let db = MemoryDatabase::new("master");
        let table = composite_keyed();
        db.create_table(table.clone());
        db.insert_rows(
            "documents",
            (0..5)
                .map(|i| vec![text("a"), text(&i.to_string()), text("x")])
                .collect(),
        );
        let store = MemoryHashStore::new();
        let unit = SyncUnit::whole_table(Arc::new(table), UnitMode::HashDiff);

        let hashed = build_unit_hashes(&db, &store, Side::Master, &unit, 2).await.unwrap();
        assert_eq!(hashed, 5);
        assert_eq!(store.load(Side::Master, "documents", None).await.unwrap().len(), 5);
    }

    #[tokio::test]
    async fn test_overlong_key_is_a_schema_fault() {
        // InnoDB accepts composite keys far wider than the hash store column
        let db = MemoryDatabase::new("master");
        let table = composite_keyed();
        db.create_table(table.clone());
        db.insert_rows(
            "documents",
            vec![vec![text(&"p".repeat(700)), text(&"r".repeat(100)), text("x")]],
        );
        let store = MemoryHashStore::new();
        let unit = SyncUnit::whole_table(Arc::new(table), UnitMode::HashDiff);

        let error = build_unit_hashes(&db, &store, Side::Master, &unit, 10)
            .await
            .unwrap_err();
        assert!(matches!(error, SyncError::Schema { ref table, .. } if table == "documents"));
        assert!(!error.is_fatal());
        assert!(store.load(Side::Master, "documents", None).await.unwrap().is_empty());
    }
}
