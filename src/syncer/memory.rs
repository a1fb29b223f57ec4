// ABOUTME: In-memory Database and HashStore implementations
// ABOUTME: Injected in place of MySQL connections by unit and integration tests

use async_trait::async_trait;
use mysql_async::Value;
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use super::database::{Database, PageCursor};
use super::hash_store::HashStore;
use super::hasher::canonical_bytes;
use super::statement::Statement;
use super::types::{HashRecord, RowFilter, Side, TableDefinition};
use crate::error::{Result, SyncError};

struct MemoryTable {
    definition: TableDefinition,
    rows: Vec<Vec<Value>>,
}

#[derive(Default)]
struct MemoryState {
    tables: Vec<MemoryTable>,
    executed: Vec<Statement>,
    failing_tables: HashSet<String>,
    offline: bool,
}

impl MemoryState {
    fn table(&self, name: &str) -> Option<&MemoryTable> {
        self.tables.iter().find(|t| t.definition.name == name)
    }

    fn table_mut(&mut self, name: &str) -> Option<&mut MemoryTable> {
        self.tables.iter_mut().find(|t| t.definition.name == name)
    }
}

/// A database held entirely in memory.
///
/// Tables keep their creation order, which is the order `list_tables`
/// reports. Statements are applied structurally, not parsed. Primary keys
/// match under their columns' collations, so `'ABC'` and `'abc'` are one
/// key in a `_ci` column just as on a server.
pub struct MemoryDatabase {
    role: String,
    state: Mutex<MemoryState>,
}

impl MemoryDatabase {
    pub fn new(role: &str) -> Self {
        Self {
            role: role.to_string(),
            state: Mutex::new(MemoryState::default()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn create_table(&self, definition: TableDefinition) {
        let mut state = self.lock();
        state.tables.retain(|t| t.definition.name != definition.name);
        state.tables.push(MemoryTable {
            definition,
            rows: Vec::new(),
        });
    }

    /// Current rows: key order for tables with a primary key, insertion
    /// order otherwise.
    pub fn rows(&self, table: &str) -> Vec<Vec<Value>> {
        let state = self.lock();
        let Some(t) = state.table(table) else {
            return Vec::new();
        };
        sorted_rows(&t.definition, &t.rows)
    }

    pub fn executed_statements(&self) -> Vec<Statement> {
        self.lock().executed.clone()
    }

    pub fn clear_executed(&self) {
        self.lock().executed.clear();
    }

    /// Make every statement against `table` fail as a server error.
    pub fn fail_statements_on(&self, table: &str) {
        self.lock().failing_tables.insert(table.to_string());
    }

    /// Make every call fail as a lost connection.
    pub fn set_offline(&self, offline: bool) {
        self.lock().offline = offline;
    }

    fn check_online(&self) -> Result<()> {
        if self.lock().offline {
            return Err(SyncError::infrastructure(
                self.role.clone(),
                "Lost connection to MySQL server during query",
            ));
        }
        Ok(())
    }
}

fn sorted_rows(definition: &TableDefinition, rows: &[Vec<Value>]) -> Vec<Vec<Value>> {
    let mut rows = rows.to_vec();
    if definition.has_primary_key() {
        rows.sort_by(|a, b| definition.compare_keys(&definition.key_of(a), &definition.key_of(b)));
    }
    rows
}

/// Key equality as the server sees it, under each key column's collation.
fn same_key(definition: &TableDefinition, row: &[Value], key: &[Value]) -> bool {
    definition.compare_keys(&definition.key_of(row), key) == Ordering::Equal
}

/// Place `row` (given in `columns` order) into the table's column order.
fn reorder(definition: &TableDefinition, columns: &[String], row: &[Value]) -> Vec<Value> {
    definition
        .columns
        .iter()
        .map(|c| {
            columns
                .iter()
                .position(|name| name == &c.name)
                .and_then(|i| row.get(i).cloned())
                .unwrap_or(Value::NULL)
        })
        .collect()
}

fn apply_statement(table: &mut MemoryTable, statement: &Statement) -> Result<u64> {
    let definition = table.definition.clone();
    match statement {
        Statement::Insert { columns, rows, .. } => {
            if definition.has_primary_key() {
                for row in rows {
                    let key = definition.key_of(&reorder(&definition, columns, row));
                    if table.rows.iter().any(|r| same_key(&definition, r, &key)) {
                        return Err(SyncError::Apply {
                            unit: String::new(),
                            statement: statement.to_sql(),
                            message: "Duplicate entry for key 'PRIMARY'".to_string(),
                        });
                    }
                }
            }
            for row in rows {
                table.rows.push(reorder(&definition, columns, row));
            }
            Ok(rows.len() as u64)
        }
        Statement::Upsert { columns, rows, .. } => {
            let mut affected = 0;
            for row in rows {
                let row = reorder(&definition, columns, row);
                let key = definition.key_of(&row);
                match table
                    .rows
                    .iter_mut()
                    .find(|r| same_key(&definition, r, &key))
                {
                    Some(existing) => {
                        if *existing != row {
                            *existing = row;
                            affected += 2;
                        }
                    }
                    None => {
                        table.rows.push(row);
                        affected += 1;
                    }
                }
            }
            Ok(affected)
        }
        Statement::Delete {
            keys, partition, ..
        } => {
            let partition_filter = partition.as_ref().map(|(column, value)| RowFilter::Partition {
                column: column.clone(),
                value: value.clone(),
            });
            let before = table.rows.len();
            table.rows.retain(|row| {
                let selected = keys.iter().any(|k| same_key(&definition, row, k))
                    && partition_filter
                        .as_ref()
                        .map_or(true, |f| f.matches(&definition, row));
                !selected
            });
            Ok((before - table.rows.len()) as u64)
        }
        Statement::DeleteAll { .. } => {
            let removed = table.rows.len() as u64;
            table.rows.clear();
            Ok(removed)
        }
        Statement::Ddl(_) => Ok(0),
    }
}

#[async_trait]
impl Database for MemoryDatabase {
    fn role(&self) -> &str {
        &self.role
    }

    async fn list_tables(&self) -> Result<Vec<String>> {
        self.check_online()?;
        Ok(self
            .lock()
            .tables
            .iter()
            .map(|t| t.definition.name.clone())
            .collect())
    }

    async fn describe_table(&self, table: &str) -> Result<Option<TableDefinition>> {
        self.check_online()?;
        Ok(self.lock().table(table).map(|t| {
            let mut definition = t.definition.clone();
            definition.partition_column = None;
            definition
        }))
    }

    async fn distinct_values(&self, table: &str, column: &str) -> Result<Vec<Option<Value>>> {
        self.check_online()?;
        let state = self.lock();
        let Some(t) = state.table(table) else {
            return Ok(Vec::new());
        };
        let Some(index) = t.definition.column_index(column) else {
            return Err(SyncError::infrastructure(
                self.role.clone(),
                format!("Unknown column '{}' in 'field list'", column),
            ));
        };

        let mut seen = HashSet::new();
        let mut values: Vec<(Option<Vec<u8>>, Option<Value>)> = Vec::new();
        for row in &t.rows {
            let value = row.get(index).cloned().unwrap_or(Value::NULL);
            let bytes = canonical_bytes(&value);
            if seen.insert(bytes.clone()) {
                let value = bytes.as_ref().map(|_| value);
                values.push((bytes, value));
            }
        }
        values.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(values.into_iter().map(|(_, v)| v).collect())
    }

    async fn fetch_page(
        &self,
        table: &TableDefinition,
        filter: &RowFilter,
        cursor: &PageCursor,
        limit: usize,
    ) -> Result<Vec<Vec<Value>>> {
        self.check_online()?;
        let state = self.lock();
        let Some(t) = state.table(&table.name) else {
            return Ok(Vec::new());
        };

        let rows = sorted_rows(&t.definition, &t.rows)
            .into_iter()
            .filter(|row| filter.matches(&t.definition, row));

        let page: Vec<Vec<Value>> = match cursor {
            PageCursor::Start => rows.take(limit).collect(),
            PageCursor::After(after) => rows
                .filter(|row| {
                    t.definition.compare_keys(&t.definition.key_of(row), after)
                        == Ordering::Greater
                })
                .take(limit)
                .collect(),
            PageCursor::Offset(offset) => rows.skip(*offset as usize).take(limit).collect(),
        };
        Ok(page)
    }

    async fn fetch_by_keys(
        &self,
        table: &TableDefinition,
        keys: &[Vec<Value>],
    ) -> Result<Vec<Vec<Value>>> {
        self.check_online()?;
        let state = self.lock();
        let Some(t) = state.table(&table.name) else {
            return Ok(Vec::new());
        };
        Ok(sorted_rows(&t.definition, &t.rows)
            .into_iter()
            .filter(|row| keys.iter().any(|k| same_key(&t.definition, row, k)))
            .collect())
    }

    async fn execute(&self, statement: &Statement) -> Result<u64> {
        self.check_online()?;
        let mut state = self.lock();
        state.executed.push(statement.clone());

        let Some(table) = statement.table() else {
            return Ok(0);
        };
        if state.failing_tables.contains(table) {
            return Err(SyncError::Apply {
                unit: String::new(),
                statement: statement.to_sql(),
                message: format!("Table '{}' is read only", table),
            });
        }
        let table = table.to_string();
        match state.table_mut(&table) {
            Some(t) => apply_statement(t, statement),
            None => Err(SyncError::Apply {
                unit: String::new(),
                statement: statement.to_sql(),
                message: format!("Table '{}' doesn't exist", table),
            }),
        }
    }
}

/// Hash tables held in memory, keyed by side.
#[derive(Default)]
pub struct MemoryHashStore {
    tables: Mutex<HashMap<Side, Vec<HashRecord>>>,
    resets: Mutex<u32>,
}

impl MemoryHashStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self, side: Side) -> Vec<HashRecord> {
        self.lock()
            .get(&side)
            .cloned()
            .unwrap_or_default()
    }

    pub fn reset_count(&self) -> u32 {
        *self.resets.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<Side, Vec<HashRecord>>> {
        self.tables.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl HashStore for MemoryHashStore {
    async fn reset(&self) -> Result<()> {
        let mut tables = self.lock();
        tables.clear();
        tables.insert(Side::Master, Vec::new());
        tables.insert(Side::Slave, Vec::new());
        *self.resets.lock().unwrap_or_else(|p| p.into_inner()) += 1;
        Ok(())
    }

    async fn store(&self, side: Side, records: &[HashRecord]) -> Result<()> {
        let mut tables = self.lock();
        let stored = tables.entry(side).or_default();
        for record in records {
            // Same primary key as the MySQL hash tables; a repeat replaces
            match stored.iter_mut().find(|r| {
                r.table_name == record.table_name
                    && r.primary_key_value == record.primary_key_value
            }) {
                Some(existing) => *existing = record.clone(),
                None => stored.push(record.clone()),
            }
        }
        Ok(())
    }

    async fn load(
        &self,
        side: Side,
        table: &str,
        partition_value: Option<&str>,
    ) -> Result<Vec<HashRecord>> {
        Ok(self
            .lock()
            .get(&side)
            .map(|records| {
                records
                    .iter()
                    .filter(|r| {
                        r.table_name == table && r.partition_value.as_deref() == partition_value
                    })
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}
