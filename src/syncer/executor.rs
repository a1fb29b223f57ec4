// ABOUTME: Chunked apply executor - turns a unit's diff into batched slave statements
// ABOUTME: Inserts, then updates, then deletes; full-replace tables are wiped and recopied

use mysql_async::Value;
use serde::Serialize;

use super::database::{Database, PageCursor};
use super::mutation_log::MutationLog;
use super::statement::Statement;
use super::types::{Diff, RowFilter, RowKey, SyncUnit};
use crate::error::Result;

/// Row and statement counts for one applied unit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ApplyReport {
    pub inserted: u64,
    pub updated: u64,
    pub deleted: u64,
    /// Rows copied by a full replace
    pub replaced: u64,
    /// Batched statements issued (or that would have been, in a dry run)
    pub batches: u64,
}

impl ApplyReport {
    pub fn merge(&mut self, other: &ApplyReport) {
        self.inserted += other.inserted;
        self.updated += other.updated;
        self.deleted += other.deleted;
        self.replaced += other.replaced;
        self.batches += other.batches;
    }

    pub fn rows_changed(&self) -> u64 {
        self.inserted + self.updated + self.deleted + self.replaced
    }
}

#[derive(Clone, Copy)]
enum WriteKind {
    Insert,
    Update,
}

/// Applies diffs for units against the slave.
///
/// Row contents for inserts and updates are read from the master by primary
/// key, one chunk at a time, so a batch never holds more than `chunk_size`
/// rows. Each batch is one round trip; nothing is wrapped in a transaction.
pub struct ChangeApplier<'a> {
    master: &'a dyn Database,
    slave: &'a dyn Database,
    log: &'a MutationLog,
    chunk_size: usize,
    dry_run: bool,
}

impl<'a> ChangeApplier<'a> {
    pub fn new(
        master: &'a dyn Database,
        slave: &'a dyn Database,
        log: &'a MutationLog,
        chunk_size: usize,
        dry_run: bool,
    ) -> Self {
        Self {
            master,
            slave,
            log,
            chunk_size: chunk_size.max(1),
            dry_run,
        }
    }

    /// Apply one unit's diff: insert batches, then update batches, then
    /// delete batches.
    pub async fn apply_diff(&self, unit: &SyncUnit, diff: &Diff) -> Result<ApplyReport> {
        let mut report = ApplyReport::default();
        if diff.is_empty() {
            return Ok(report);
        }

        self.write_rows(unit, &diff.to_insert, WriteKind::Insert, &mut report)
            .await?;
        self.write_rows(unit, &diff.to_update, WriteKind::Update, &mut report)
            .await?;
        self.delete_rows(unit, &diff.to_delete, &mut report).await?;

        tracing::debug!(
            "Applied {}: {} inserted, {} updated, {} deleted in {} batches",
            unit.label(),
            report.inserted,
            report.updated,
            report.deleted,
            report.batches
        );
        Ok(report)
    }

    async fn write_rows(
        &self,
        unit: &SyncUnit,
        keys: &[RowKey],
        kind: WriteKind,
        report: &mut ApplyReport,
    ) -> Result<()> {
        let table = unit.table.as_ref();

        for chunk in keys.chunks(self.chunk_size) {
            let written = if self.dry_run {
                report.batches += 1;
                chunk.len() as u64
            } else {
                let key_values: Vec<Vec<Value>> = chunk.iter().map(|k| k.values.clone()).collect();
                let rows = self.master.fetch_by_keys(table, &key_values).await?;
                if rows.is_empty() {
                    // Every row in the chunk vanished from the master since hashing
                    continue;
                }
                let count = rows.len() as u64;
                let statement = Statement::Upsert {
                    table: table.name.clone(),
                    columns: table.column_names(),
                    rows,
                };
                self.run(unit, &statement).await?;
                report.batches += 1;
                count
            };

            match kind {
                WriteKind::Insert => report.inserted += written,
                WriteKind::Update => report.updated += written,
            }
        }
        Ok(())
    }

    async fn delete_rows(
        &self,
        unit: &SyncUnit,
        keys: &[RowKey],
        report: &mut ApplyReport,
    ) -> Result<()> {
        let table = unit.table.as_ref();
        let partition = match unit.filter() {
            RowFilter::Partition { column, value } => Some((column, value)),
            RowFilter::All => None,
        };

        for chunk in keys.chunks(self.chunk_size) {
            let statement = Statement::Delete {
                table: table.name.clone(),
                key_columns: table.primary_key.clone(),
                keys: chunk.iter().map(|k| k.values.clone()).collect(),
                partition: partition.clone(),
            };
            self.run(unit, &statement).await?;
            report.batches += 1;
            report.deleted += chunk.len() as u64;
        }
        Ok(())
    }

    /// Replace the slave copy of a table without a primary key: delete every
    /// row, then copy the master's rows in chunks.
    pub async fn full_replace(&self, unit: &SyncUnit) -> Result<ApplyReport> {
        let table = unit.table.as_ref();
        let mut report = ApplyReport::default();

        self.run(
            unit,
            &Statement::DeleteAll {
                table: table.name.clone(),
            },
        )
        .await?;
        report.batches += 1;

        let columns = table.column_names();
        let mut offset = 0u64;
        loop {
            let rows = self
                .master
                .fetch_page(
                    table,
                    &RowFilter::All,
                    &PageCursor::Offset(offset),
                    self.chunk_size,
                )
                .await?;
            if rows.is_empty() {
                break;
            }

            let page_len = rows.len();
            let statement = Statement::Insert {
                table: table.name.clone(),
                columns: columns.clone(),
                rows,
            };
            self.run(unit, &statement).await?;
            report.batches += 1;
            report.replaced += page_len as u64;
            offset += page_len as u64;

            if page_len < self.chunk_size {
                break;
            }
        }

        tracing::debug!(
            "Replaced {} with {} master rows",
            table.name,
            report.replaced
        );
        Ok(report)
    }

    /// Execute one statement against the slave and record it.
    async fn run(&self, unit: &SyncUnit, statement: &Statement) -> Result<()> {
        if self.dry_run {
            tracing::debug!("[dry run] {}", statement.to_sql());
            return Ok(());
        }

        self.slave
            .execute(statement)
            .await
            .map_err(|e| e.in_unit(&unit.label()))?;
        self.log.append(&statement.to_sql()).await;
        Ok(())
    }
}
