// ABOUTME: Table policy resolver - decides how each master table is synchronized
// ABOUTME: Applies ignore patterns, the no-primary-key policy and partition definitions

use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;

use super::database::Database;
use super::types::TableDefinition;
use crate::config::RunConfig;
use crate::error::{Result, SyncError};
use crate::filters::TableFilter;

/// The resolved treatment of one master table.
#[derive(Debug, Clone)]
pub enum TablePolicy {
    /// Matched an ignore pattern; never touched
    Ignored { table: String, pattern: String },
    /// Cannot be synchronized; reported and left alone
    Skipped { table: String, reason: String },
    /// No primary key; slave copy is wiped and rewritten
    FullReplace(Arc<TableDefinition>),
    /// Per-row hash comparison, optionally partitioned
    HashDiff(Arc<TableDefinition>),
}

impl TablePolicy {
    pub fn table_name(&self) -> &str {
        match self {
            TablePolicy::Ignored { table, .. } | TablePolicy::Skipped { table, .. } => table,
            TablePolicy::FullReplace(def) | TablePolicy::HashDiff(def) => &def.name,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            TablePolicy::Ignored { pattern, .. } => format!("ignored (matches '{}')", pattern),
            TablePolicy::Skipped { reason, .. } => format!("skipped ({})", reason),
            TablePolicy::FullReplace(_) => "full replace (no primary key)".to_string(),
            TablePolicy::HashDiff(def) => match &def.partition_column {
                Some(column) => format!("hash diff, partitioned by `{}`", column),
                None => "hash diff".to_string(),
            },
        }
    }
}

/// A table the run will not synchronize, with the reason.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SkippedTable {
    pub table: String,
    pub reason: String,
}

/// Output of policy resolution.
#[derive(Debug, Clone, Default)]
pub struct ResolvedTables {
    /// One entry per master table, in master declaration order
    pub policies: Vec<TablePolicy>,
    /// Configuration faults that were reported and skipped
    pub warnings: Vec<String>,
}

impl ResolvedTables {
    pub fn skipped(&self) -> Vec<SkippedTable> {
        self.policies
            .iter()
            .filter_map(|p| match p {
                TablePolicy::Ignored { table, pattern } => Some(SkippedTable {
                    table: table.clone(),
                    reason: format!("matches ignore pattern '{}'", pattern),
                }),
                TablePolicy::Skipped { table, reason } => Some(SkippedTable {
                    table: table.clone(),
                    reason: reason.clone(),
                }),
                _ => None,
            })
            .collect()
    }
}

/// Classify every master table.
///
/// Configuration and schema faults are reported (logged and collected) and
/// the affected table is skipped; only database errors propagate.
pub async fn resolve_tables(
    master: &dyn Database,
    slave: &dyn Database,
    config: &RunConfig,
) -> Result<ResolvedTables> {
    let filter = TableFilter::new(&config.ignore_tables)?;
    let master_tables = master.list_tables().await?;
    let slave_tables: HashSet<String> = slave.list_tables().await?.into_iter().collect();

    let mut resolved = ResolvedTables::default();

    let known: HashSet<&str> = master_tables.iter().map(String::as_str).collect();
    for table in config.partitioned_tables.keys() {
        if !known.contains(table.as_str()) {
            let fault = SyncError::configuration(format!(
                "Partitioned table '{}' does not exist in the master database",
                table
            ));
            tracing::warn!("{}", fault);
            resolved.warnings.push(fault.to_string());
        }
    }

    for table in master_tables {
        let policy = resolve_table(master, &slave_tables, config, &filter, &table).await?;
        match &policy {
            TablePolicy::Skipped { reason, .. } => {
                tracing::warn!("Skipping table {}: {}", table, reason);
            }
            other => tracing::debug!("Table {}: {}", table, other.describe()),
        }
        resolved.policies.push(policy);
    }

    Ok(resolved)
}

async fn resolve_table(
    master: &dyn Database,
    slave_tables: &HashSet<String>,
    config: &RunConfig,
    filter: &TableFilter,
    table: &str,
) -> Result<TablePolicy> {
    if let Some(pattern) = filter.matching_pattern(table) {
        return Ok(TablePolicy::Ignored {
            table: table.to_string(),
            pattern: pattern.to_string(),
        });
    }

    let skipped = |reason: String| TablePolicy::Skipped {
        table: table.to_string(),
        reason,
    };

    let Some(mut definition) = master.describe_table(table).await? else {
        return Ok(skipped("table disappeared from master during planning".to_string()));
    };

    if !slave_tables.contains(table) {
        return Ok(skipped(
            SyncError::schema(table, "table does not exist on the slave").to_string(),
        ));
    }

    let partition_column = config.partitioned_tables.get(table);

    if !definition.has_primary_key() {
        if partition_column.is_some() {
            tracing::warn!(
                "{}",
                SyncError::configuration(format!(
                    "Table '{}' is partitioned but has no primary key; partition definition ignored",
                    table
                ))
            );
        }
        if config.copy_tables_with_no_primary_key {
            return Ok(TablePolicy::FullReplace(Arc::new(definition)));
        }
        return Ok(skipped(
            SyncError::schema(
                table,
                "no primary key and copy_tables_with_no_primary_key is disabled",
            )
            .to_string(),
        ));
    }

    if let Some(column) = partition_column {
        if !definition.has_column(column) {
            return Ok(skipped(
                SyncError::configuration(format!(
                    "partition column '{}' does not exist in table '{}'",
                    column, table
                ))
                .to_string(),
            ));
        }
        definition.partition_column = Some(column.clone());
    }

    Ok(TablePolicy::HashDiff(Arc::new(definition)))
}
