// ABOUTME: Core data model for hash-based table synchronization
// ABOUTME: Table definitions, sync units, hash records, row keys and diffs

use mysql_async::Value;
use serde::Serialize;
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use super::hasher::{canonical_bytes, partition_digest};

/// A single column as reported by the database catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDefinition {
    pub name: String,
    /// Lower-cased MySQL `DATA_TYPE` (e.g. `int`, `varchar`, `decimal`)
    pub data_type: String,
    /// Lower-cased `COLLATION_NAME`; `None` for numeric and binary columns
    pub collation: Option<String>,
}

impl ColumnDefinition {
    pub fn new(name: &str, data_type: &str) -> Self {
        Self {
            name: name.to_string(),
            data_type: data_type.to_lowercase(),
            collation: None,
        }
    }

    pub fn with_collation(mut self, collation: &str) -> Self {
        self.collation = Some(collation.to_lowercase());
        self
    }

    fn ordering_class(&self) -> OrderingClass {
        match self.data_type.as_str() {
            "tinyint" | "smallint" | "mediumint" | "int" | "integer" | "bigint" | "year"
            | "bit" => OrderingClass::Integer,
            "decimal" | "numeric" | "float" | "double" | "real" => OrderingClass::Decimal,
            _ => match &self.collation {
                Some(name) => OrderingClass::Text(Collation::from_name(name)),
                None => OrderingClass::Bytes,
            },
        }
    }

    /// The value as it should be rendered into SQL.
    ///
    /// The text protocol hands integers back as `Bytes`, and MySQL compares
    /// an integer column with a quoted literal as doubles, which loses
    /// precision past 2^53. Integer columns therefore get typed integers.
    pub fn typed_value(&self, value: Value) -> Value {
        if self.ordering_class() != OrderingClass::Integer {
            return value;
        }
        let parsed = match &value {
            Value::Bytes(bytes) => std::str::from_utf8(bytes)
                .ok()
                .map(str::trim)
                .and_then(|text| {
                    text.parse::<i64>()
                        .map(Value::Int)
                        .or_else(|_| text.parse::<u64>().map(Value::UInt))
                        .ok()
                }),
            _ => None,
        };
        parsed.unwrap_or(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OrderingClass {
    Integer,
    Decimal,
    Text(Collation),
    Bytes,
}

/// Equality and ordering rules of a MySQL character collation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Collation {
    pad_space: bool,
    case_insensitive: bool,
    accent_insensitive: bool,
}

impl Collation {
    fn from_name(name: &str) -> Self {
        let case_insensitive = name.ends_with("_ci");
        Self {
            // UCA 9.0.0 collations are NO PAD, every older one pads
            pad_space: !name.contains("_0900_") && name != "binary",
            case_insensitive,
            accent_insensitive: case_insensitive && !name.contains("_as_"),
        }
    }

    /// Bytes that compare the way the collation compares the original.
    fn sort_key(&self, bytes: &[u8]) -> Vec<u8> {
        let mut bytes = bytes;
        if self.pad_space {
            while let [rest @ .., b' '] = bytes {
                bytes = rest;
            }
        }
        if !self.case_insensitive {
            return bytes.to_vec();
        }
        match std::str::from_utf8(bytes) {
            Ok(text) => text
                .chars()
                .map(|c| if self.accent_insensitive { strip_accent(c) } else { c })
                .flat_map(char::to_lowercase)
                .collect::<String>()
                .into_bytes(),
            Err(_) => bytes.to_ascii_lowercase(),
        }
    }
}

/// Base letter of an accented Latin-1 letter.
fn strip_accent(c: char) -> char {
    const LATIN1: &str = "AAAAAAACEEEEIIIIDNOOOOO×OUUUUYÞsaaaaaaaceeeeiiiidnooooo÷ouuuuyþy";
    match c {
        '\u{c0}'..='\u{ff}' => LATIN1.chars().nth(c as usize - 0xc0).unwrap_or(c),
        _ => c,
    }
}

/// Structure of one table, enough to hash, diff and rewrite it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDefinition {
    pub name: String,
    /// All columns in ordinal order
    pub columns: Vec<ColumnDefinition>,
    /// Primary key columns in key order; empty means no primary key
    pub primary_key: Vec<String>,
    pub partition_column: Option<String>,
}

impl TableDefinition {
    pub fn new(name: &str, columns: Vec<ColumnDefinition>, primary_key: Vec<String>) -> Self {
        Self {
            name: name.to_string(),
            columns,
            primary_key,
            partition_column: None,
        }
    }

    pub fn has_primary_key(&self) -> bool {
        !self.primary_key.is_empty()
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    /// Positions of the primary key columns within a full row.
    pub fn key_indexes(&self) -> Vec<usize> {
        self.primary_key
            .iter()
            .filter_map(|k| self.column_index(k))
            .collect()
    }

    /// Positions of the columns whose values feed the row hash.
    ///
    /// Every non-key column is compared; the key itself is the record identity.
    pub fn compared_indexes(&self) -> Vec<usize> {
        self.columns
            .iter()
            .enumerate()
            .filter(|(_, c)| !self.primary_key.contains(&c.name))
            .map(|(i, _)| i)
            .collect()
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDefinition> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Extract the primary key tuple from a full row.
    pub fn key_of(&self, row: &[Value]) -> Vec<Value> {
        self.typed_key(
            self.key_indexes()
                .into_iter()
                .map(|i| row.get(i).cloned().unwrap_or(Value::NULL))
                .collect(),
        )
    }

    /// Type each key component for its column (see [`ColumnDefinition::typed_value`]).
    pub fn typed_key(&self, key: Vec<Value>) -> Vec<Value> {
        key.into_iter()
            .zip(&self.primary_key)
            .map(|(value, name)| match self.column(name) {
                Some(column) => column.typed_value(value),
                None => value,
            })
            .collect()
    }

    /// Compare two primary key tuples using each column's native ordering,
    /// lexicographically over the declared key order.
    ///
    /// `Equal` means MySQL would treat the two keys as the same key, which
    /// for case- or pad-insensitive collations does not imply equal bytes.
    pub fn compare_keys(&self, a: &[Value], b: &[Value]) -> Ordering {
        for (position, key_column) in self.primary_key.iter().enumerate() {
            let class = self
                .column(key_column)
                .map(|c| c.ordering_class())
                .unwrap_or(OrderingClass::Bytes);
            let ordering = compare_values(
                class,
                a.get(position).unwrap_or(&Value::NULL),
                b.get(position).unwrap_or(&Value::NULL),
            );
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        a.len().cmp(&b.len())
    }
}

fn compare_values(class: OrderingClass, a: &Value, b: &Value) -> Ordering {
    let (a, b) = match (canonical_bytes(a), canonical_bytes(b)) {
        (None, None) => return Ordering::Equal,
        (None, Some(_)) => return Ordering::Less,
        (Some(_), None) => return Ordering::Greater,
        (Some(a), Some(b)) => (a, b),
    };

    let parsed = |bytes: &[u8]| std::str::from_utf8(bytes).ok().map(str::trim).map(str::to_owned);

    match class {
        OrderingClass::Integer => {
            let ints = parsed(a.as_slice())
                .and_then(|s| s.parse::<i128>().ok())
                .zip(parsed(b.as_slice()).and_then(|s| s.parse::<i128>().ok()));
            if let Some((x, y)) = ints {
                return x.cmp(&y);
            }
        }
        OrderingClass::Decimal => {
            let floats = parsed(a.as_slice())
                .and_then(|s| s.parse::<f64>().ok())
                .zip(parsed(b.as_slice()).and_then(|s| s.parse::<f64>().ok()));
            if let Some((x, y)) = floats {
                if let Some(ordering) = x.partial_cmp(&y) {
                    return ordering;
                }
            }
        }
        OrderingClass::Text(collation) => {
            return collation.sort_key(&a).cmp(&collation.sort_key(&b));
        }
        OrderingClass::Bytes => {}
    }
    a.cmp(&b)
}

/// How a unit is reconciled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum UnitMode {
    /// Per-row hash comparison
    HashDiff,
    /// Wipe the slave table and copy every master row
    FullReplace,
}

/// Which rows of a table a unit covers.
#[derive(Debug, Clone, PartialEq)]
pub enum UnitScope {
    WholeTable,
    /// One value of the table's partition column (`None` is the NULL partition)
    Partition(Option<Value>),
}

/// The atomic scope of one diff-and-apply pass.
#[derive(Debug, Clone)]
pub struct SyncUnit {
    pub table: Arc<TableDefinition>,
    pub scope: UnitScope,
    pub mode: UnitMode,
}

impl SyncUnit {
    pub fn whole_table(table: Arc<TableDefinition>, mode: UnitMode) -> Self {
        Self {
            table,
            scope: UnitScope::WholeTable,
            mode,
        }
    }

    pub fn partition(table: Arc<TableDefinition>, value: Option<Value>) -> Self {
        Self {
            table,
            scope: UnitScope::Partition(value),
            mode: UnitMode::HashDiff,
        }
    }

    /// Row filter selecting this unit's rows on either side.
    pub fn filter(&self) -> RowFilter {
        match (&self.scope, &self.table.partition_column) {
            (UnitScope::Partition(value), Some(column)) => RowFilter::Partition {
                column: column.clone(),
                value: value.clone(),
            },
            _ => RowFilter::All,
        }
    }

    /// Value stored in the hash tables' `partition_value` column.
    pub fn partition_key(&self) -> Option<String> {
        match &self.scope {
            UnitScope::WholeTable => None,
            UnitScope::Partition(value) => value.as_ref().and_then(partition_digest),
        }
    }

    /// Human readable label, e.g. `orders[site_id=4]`.
    pub fn label(&self) -> String {
        match (&self.scope, &self.table.partition_column) {
            (UnitScope::Partition(value), Some(column)) => {
                let shown = value
                    .as_ref()
                    .and_then(canonical_bytes)
                    .map(|b| String::from_utf8_lossy(&b).into_owned())
                    .unwrap_or_else(|| "NULL".to_string());
                format!("{}[{}={}]", self.table.name, column, shown)
            }
            _ => self.table.name.clone(),
        }
    }
}

impl fmt::Display for SyncUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

/// Restriction applied when reading rows for a unit.
#[derive(Debug, Clone, PartialEq)]
pub enum RowFilter {
    All,
    /// Null-safe equality on the partition column
    Partition { column: String, value: Option<Value> },
}

impl RowFilter {
    /// Whether `row` (full column order of `table`) passes the filter.
    pub fn matches(&self, table: &TableDefinition, row: &[Value]) -> bool {
        match self {
            RowFilter::All => true,
            RowFilter::Partition { column, value } => {
                let Some(index) = table.column_index(column) else {
                    return false;
                };
                let actual = row.get(index).and_then(canonical_bytes);
                let expected = value.as_ref().and_then(canonical_bytes);
                actual == expected
            }
        }
    }
}

/// Which side of the reconciliation a hash record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    Master,
    Slave,
}

impl Side {
    pub fn hash_table(&self) -> &'static str {
        match self {
            Side::Master => "master_hashes",
            Side::Slave => "slave_hashes",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Master => f.write_str("master"),
            Side::Slave => f.write_str("slave"),
        }
    }
}

/// One row's content digest as stored in a hash table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashRecord {
    pub table_name: String,
    pub partition_value: Option<String>,
    /// Encoded primary key (see `hasher::encode_key`)
    pub primary_key_value: String,
    pub hash: String,
}

/// A primary key in both stored and typed form.
#[derive(Debug, Clone, PartialEq)]
pub struct RowKey {
    pub encoded: String,
    pub values: Vec<Value>,
}

/// The three disjoint operation sets for one unit, each ordered by key.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Diff {
    pub to_insert: Vec<RowKey>,
    pub to_update: Vec<RowKey>,
    pub to_delete: Vec<RowKey>,
}

impl Diff {
    pub fn is_empty(&self) -> bool {
        self.to_insert.is_empty() && self.to_update.is_empty() && self.to_delete.is_empty()
    }

    pub fn len(&self) -> usize {
        self.to_insert.len() + self.to_update.len() + self.to_delete.len()
    }
}
