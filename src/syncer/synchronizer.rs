// ABOUTME: Synchronizer entry point - one call reconciles the slave with the master
// ABOUTME: Resets hash tables, plans units, schedules them and builds the run summary

use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;

use super::database::Database;
use super::executor::ApplyReport;
use super::hash_store::HashStore;
use super::mutation_log::MutationLog;
use super::planner::plan_units;
use super::policy::{resolve_tables, SkippedTable, TablePolicy};
use super::scheduler::{ScheduleMode, ScheduleOutcome, Scheduler};
use super::types::{SyncUnit, UnitMode};
use super::worker::UnitWorker;
use crate::config::RunConfig;
use crate::error::{Result, SyncError};

/// Per-table totals for a run.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct TableSummary {
    pub table: String,
    pub mode: UnitMode,
    pub units: usize,
    pub failed_units: usize,
    #[serde(flatten)]
    pub rows: ApplyReport,
}

/// A unit that failed without stopping the run.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct UnitFailure {
    pub unit: String,
    pub error: String,
}

/// Structured result of [`Synchronizer::sync_database`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncSummary {
    pub tables: Vec<TableSummary>,
    pub units_processed: usize,
    pub units_not_started: usize,
    pub failed_units: Vec<UnitFailure>,
    pub skipped_tables: Vec<SkippedTable>,
    pub warnings: Vec<String>,
    pub statements_logged: u64,
    pub log_write_failures: u64,
    pub dry_run: bool,
    pub cancelled: bool,
    pub duration_ms: u64,
}

impl SyncSummary {
    /// Row totals across every table.
    pub fn totals(&self) -> ApplyReport {
        let mut totals = ApplyReport::default();
        for table in &self.tables {
            totals.merge(&table.rows);
        }
        totals
    }

    pub fn table(&self, name: &str) -> Option<&TableSummary> {
        self.tables.iter().find(|t| t.table == name)
    }

    /// Every planned unit ran and none failed.
    pub fn is_complete(&self) -> bool {
        self.failed_units.is_empty() && !self.cancelled && self.units_not_started == 0
    }
}

/// Table policies and the unit list for a run, computed without writing.
#[derive(Debug, Clone)]
pub struct SyncPlan {
    pub policies: Vec<TablePolicy>,
    pub units: Vec<SyncUnit>,
    pub warnings: Vec<String>,
    pub skipped: Vec<SkippedTable>,
}

/// Reconciles a slave database with a master.
///
/// All three connections are injected: `master` and `slave` behind the
/// [`Database`] seam, the sync-bookkeeping database behind [`HashStore`].
pub struct Synchronizer {
    master: Arc<dyn Database>,
    slave: Arc<dyn Database>,
    hashes: Arc<dyn HashStore>,
    config: Arc<RunConfig>,
    log: Arc<MutationLog>,
}

impl Synchronizer {
    pub fn new(
        master: Arc<dyn Database>,
        slave: Arc<dyn Database>,
        hashes: Arc<dyn HashStore>,
        config: Arc<RunConfig>,
        log: Arc<MutationLog>,
    ) -> Self {
        Self {
            master,
            slave,
            hashes,
            config,
            log,
        }
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Resolve table policies and enumerate units. Reads only.
    pub async fn plan(&self) -> Result<SyncPlan> {
        let resolved =
            resolve_tables(self.master.as_ref(), self.slave.as_ref(), &self.config).await?;
        let units = plan_units(self.master.as_ref(), self.slave.as_ref(), &resolved.policies).await?;
        let skipped = resolved.skipped();
        Ok(SyncPlan {
            policies: resolved.policies,
            units,
            warnings: resolved.warnings,
            skipped,
        })
    }

    /// Bring the slave into the master's state.
    pub async fn sync_database(&self) -> Result<SyncSummary> {
        let (_keep_open, shutdown) = watch::channel(false);
        self.sync_database_with_shutdown(shutdown).await
    }

    /// Like [`sync_database`](Self::sync_database), but stops handing out
    /// units once `shutdown` becomes `true`. Units already running finish.
    pub async fn sync_database_with_shutdown(
        &self,
        shutdown: watch::Receiver<bool>,
    ) -> Result<SyncSummary> {
        let started = Instant::now();
        let mode = self.schedule_mode();
        tracing::info!(
            "Starting sync run ({}, chunk size {}{})",
            match mode {
                ScheduleMode::Sequential => "sequential".to_string(),
                ScheduleMode::Concurrent { workers, .. } => format!("{} workers", workers),
            },
            self.config.chunk_size,
            if self.config.dry_run { ", dry run" } else { "" }
        );

        self.hashes.reset().await?;
        let plan = self.plan().await?;
        tracing::info!(
            "Planned {} units across {} tables ({} skipped)",
            plan.units.len(),
            plan.policies.len() - plan.skipped.len(),
            plan.skipped.len()
        );

        let worker = UnitWorker::new(
            self.master.clone(),
            self.slave.clone(),
            self.hashes.clone(),
            self.log.clone(),
            self.config.clone(),
        );
        let mut outcome = Scheduler::new(worker, mode)
            .run(plan.units.clone(), shutdown)
            .await;

        if outcome.aborted() {
            tracing::error!(
                "Sync run aborted after {} of {} units",
                outcome.results.len(),
                plan.units.len()
            );
            return Err(outcome.take_abort_error().unwrap_or_else(|| {
                SyncError::infrastructure("sync", "run aborted without a recorded fault")
            }));
        }

        let summary = self.summarize(&plan, &outcome, started);
        let totals = summary.totals();
        tracing::info!(
            "Sync run finished in {}ms: {} units, {} inserted, {} updated, {} deleted, {} replaced",
            summary.duration_ms,
            summary.units_processed,
            totals.inserted,
            totals.updated,
            totals.deleted,
            totals.replaced
        );
        if !summary.failed_units.is_empty() {
            tracing::warn!("{} units failed", summary.failed_units.len());
        }
        if summary.cancelled {
            tracing::warn!(
                "Run cancelled; {} units were not started",
                summary.units_not_started
            );
        }
        Ok(summary)
    }

    fn schedule_mode(&self) -> ScheduleMode {
        if self.config.use_multi_processing {
            ScheduleMode::Concurrent {
                workers: self.config.worker_count(),
                failure_policy: self.config.failure_policy,
            }
        } else {
            ScheduleMode::Sequential
        }
    }

    fn summarize(&self, plan: &SyncPlan, outcome: &ScheduleOutcome, started: Instant) -> SyncSummary {
        let mut tables: Vec<TableSummary> = plan
            .policies
            .iter()
            .filter_map(|policy| {
                let mode = match policy {
                    TablePolicy::HashDiff(_) => UnitMode::HashDiff,
                    TablePolicy::FullReplace(_) => UnitMode::FullReplace,
                    _ => return None,
                };
                Some(TableSummary {
                    table: policy.table_name().to_string(),
                    mode,
                    units: plan
                        .units
                        .iter()
                        .filter(|u| u.table.name == policy.table_name())
                        .count(),
                    failed_units: 0,
                    rows: ApplyReport::default(),
                })
            })
            .collect();

        let mut failed_units = Vec::new();
        for result in &outcome.results {
            let Some(table) = tables.iter_mut().find(|t| t.table == result.unit.table.name) else {
                continue;
            };
            match &result.outcome {
                Ok(report) => table.rows.merge(report),
                Err(e) => {
                    table.failed_units += 1;
                    failed_units.push(UnitFailure {
                        unit: result.unit.label(),
                        error: e.to_string(),
                    });
                }
            }
        }

        SyncSummary {
            tables,
            units_processed: outcome.results.len(),
            units_not_started: outcome.not_started,
            failed_units,
            skipped_tables: plan.skipped.clone(),
            warnings: plan.warnings.clone(),
            statements_logged: self.log.written(),
            log_write_failures: self.log.failed(),
            dry_run: self.config.dry_run,
            cancelled: outcome.cancelled,
            duration_ms: started.elapsed().as_millis() as u64,
        }
    }
}
