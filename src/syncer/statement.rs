// ABOUTME: Structured statements executed against the slave and sync databases
// ABOUTME: Renders batched INSERT / upsert / DELETE text with inlined MySQL literals

use mysql_async::Value;

use crate::utils::{quote_mysql_ident, quote_mysql_ident_list};

/// One round trip against a database.
///
/// Statements are built by the apply executor and hash store, rendered once
/// with [`Statement::to_sql`], and that exact text is both executed and
/// written to the mutation log.
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    /// Plain multi-row insert (full replace path)
    Insert {
        table: String,
        columns: Vec<String>,
        rows: Vec<Vec<Value>>,
    },
    /// Multi-row insert that overwrites rows whose key already exists
    Upsert {
        table: String,
        columns: Vec<String>,
        rows: Vec<Vec<Value>>,
    },
    /// Delete by primary key, optionally restricted to one partition value
    Delete {
        table: String,
        key_columns: Vec<String>,
        keys: Vec<Vec<Value>>,
        partition: Option<(String, Option<Value>)>,
    },
    /// Remove every row of a table
    DeleteAll { table: String },
    /// Schema statement passed through verbatim
    Ddl(String),
}

impl Statement {
    pub fn table(&self) -> Option<&str> {
        match self {
            Statement::Insert { table, .. }
            | Statement::Upsert { table, .. }
            | Statement::Delete { table, .. }
            | Statement::DeleteAll { table } => Some(table),
            Statement::Ddl(_) => None,
        }
    }

    /// Number of rows carried by the statement.
    pub fn row_count(&self) -> usize {
        match self {
            Statement::Insert { rows, .. } | Statement::Upsert { rows, .. } => rows.len(),
            Statement::Delete { keys, .. } => keys.len(),
            Statement::DeleteAll { .. } | Statement::Ddl(_) => 0,
        }
    }

    /// Render the statement as MySQL text.
    pub fn to_sql(&self) -> String {
        match self {
            Statement::Insert {
                table,
                columns,
                rows,
            } => format!(
                "INSERT INTO {} ({}) VALUES {}",
                quote_mysql_ident(table),
                quote_mysql_ident_list(columns),
                values_list(rows)
            ),
            Statement::Upsert {
                table,
                columns,
                rows,
            } => build_upsert_query(table, columns, rows),
            Statement::Delete {
                table,
                key_columns,
                keys,
                partition,
            } => build_delete_query(table, key_columns, keys, partition.as_ref()),
            Statement::DeleteAll { table } => {
                format!("DELETE FROM {}", quote_mysql_ident(table))
            }
            Statement::Ddl(sql) => sql.clone(),
        }
    }
}

/// Inline a value as a MySQL literal.
pub fn literal(value: &Value) -> String {
    value.as_sql(false)
}

fn tuple(values: &[Value]) -> String {
    format!(
        "({})",
        values.iter().map(literal).collect::<Vec<_>>().join(", ")
    )
}

fn values_list(rows: &[Vec<Value>]) -> String {
    rows.iter()
        .map(|row| tuple(row))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Build a batched upsert.
///
/// Generates a query like:
/// ```sql
/// INSERT INTO `table` (`id`, `name`) VALUES (1, 'a'), (2, 'b')
/// ON DUPLICATE KEY UPDATE `id` = VALUES(`id`), `name` = VALUES(`name`)
/// ```
///
/// Key columns are rewritten too: a row found through a case- or
/// pad-insensitive key collation takes the incoming key's exact spelling.
fn build_upsert_query(table: &str, columns: &[String], rows: &[Vec<Value>]) -> String {
    let update_columns: Vec<String> = columns
        .iter()
        .map(|c| {
            let quoted = quote_mysql_ident(c);
            format!("{} = VALUES({})", quoted, quoted)
        })
        .collect();

    format!(
        "INSERT INTO {} ({}) VALUES {} ON DUPLICATE KEY UPDATE {}",
        quote_mysql_ident(table),
        quote_mysql_ident_list(columns),
        values_list(rows),
        update_columns.join(", ")
    )
}

/// `key IN (...)` predicate over a primary key, single or composite.
pub fn key_in_list(key_columns: &[String], keys: &[Vec<Value>]) -> String {
    if key_columns.len() == 1 {
        let values: Vec<String> = keys
            .iter()
            .map(|k| k.first().map(literal).unwrap_or_else(|| "NULL".to_string()))
            .collect();
        format!(
            "{} IN ({})",
            quote_mysql_ident(&key_columns[0]),
            values.join(", ")
        )
    } else {
        format!(
            "({}) IN ({})",
            quote_mysql_ident_list(key_columns),
            values_list(keys)
        )
    }
}

/// Null-safe equality against a possibly NULL value.
pub fn null_safe_eq(column: &str, value: Option<&Value>) -> String {
    format!(
        "{} <=> {}",
        quote_mysql_ident(column),
        value.map(literal).unwrap_or_else(|| "NULL".to_string())
    )
}

/// Build a batched delete by primary key.
///
/// For single-column PK:
/// ```sql
/// DELETE FROM `table` WHERE `id` IN (1, 2, 3)
/// ```
///
/// For composite PK:
/// ```sql
/// DELETE FROM `table` WHERE (`a`, `b`) IN ((1, 'x'), (2, 'y'))
/// ```
///
/// A partition restriction appends `` AND `col` <=> value ``.
fn build_delete_query(
    table: &str,
    key_columns: &[String],
    keys: &[Vec<Value>],
    partition: Option<&(String, Option<Value>)>,
) -> String {
    let mut query = format!(
        "DELETE FROM {} WHERE {}",
        quote_mysql_ident(table),
        key_in_list(key_columns, keys)
    );

    if let Some((column, value)) = partition {
        query.push_str(" AND ");
        query.push_str(&null_safe_eq(column, value.as_ref()));
    }
    query
}
