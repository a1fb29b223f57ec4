// ABOUTME: Unit worker - owns one sync unit end to end
// ABOUTME: Hashes both sides, computes the diff and applies it to the slave

use std::sync::Arc;
use std::time::Instant;

use super::database::Database;
use super::diff::compute_diff;
use super::executor::{ApplyReport, ChangeApplier};
use super::hash_store::{build_unit_hashes, HashStore};
use super::mutation_log::MutationLog;
use super::types::{Side, SyncUnit, UnitMode};
use crate::config::RunConfig;
use crate::error::Result;

/// Everything a worker needs to process a unit. Cheap to clone; every
/// worker task holds its own handle.
#[derive(Clone)]
pub struct UnitWorker {
    master: Arc<dyn Database>,
    slave: Arc<dyn Database>,
    hashes: Arc<dyn HashStore>,
    log: Arc<MutationLog>,
    config: Arc<RunConfig>,
}

impl UnitWorker {
    pub fn new(
        master: Arc<dyn Database>,
        slave: Arc<dyn Database>,
        hashes: Arc<dyn HashStore>,
        log: Arc<MutationLog>,
        config: Arc<RunConfig>,
    ) -> Self {
        Self {
            master,
            slave,
            hashes,
            log,
            config,
        }
    }

    pub async fn process(&self, unit: &SyncUnit) -> Result<ApplyReport> {
        let started = Instant::now();
        let applier = ChangeApplier::new(
            self.master.as_ref(),
            self.slave.as_ref(),
            &self.log,
            self.config.chunk_size,
            self.config.dry_run,
        );

        let report = match unit.mode {
            UnitMode::FullReplace => applier.full_replace(unit).await?,
            UnitMode::HashDiff => {
                let chunk_size = self.config.chunk_size;
                let (master_rows, slave_rows) = futures::try_join!(
                    build_unit_hashes(
                        self.master.as_ref(),
                        self.hashes.as_ref(),
                        Side::Master,
                        unit,
                        chunk_size
                    ),
                    build_unit_hashes(
                        self.slave.as_ref(),
                        self.hashes.as_ref(),
                        Side::Slave,
                        unit,
                        chunk_size
                    ),
                )?;

                let partition = unit.partition_key();
                let master = self
                    .hashes
                    .load(Side::Master, &unit.table.name, partition.as_deref())
                    .await?;
                let slave = self
                    .hashes
                    .load(Side::Slave, &unit.table.name, partition.as_deref())
                    .await?;

                let diff = compute_diff(&unit.table, &master, &slave)?;
                tracing::debug!(
                    "{}: {} master rows, {} slave rows, {} to insert, {} to update, {} to delete",
                    unit.label(),
                    master_rows,
                    slave_rows,
                    diff.to_insert.len(),
                    diff.to_update.len(),
                    diff.to_delete.len()
                );

                applier.apply_diff(unit, &diff).await?
            }
        };

        if report.rows_changed() > 0 {
            tracing::info!(
                "✓ {} ({} inserted, {} updated, {} deleted, {} replaced) in {:.2}s",
                unit.label(),
                report.inserted,
                report.updated,
                report.deleted,
                report.replaced,
                started.elapsed().as_secs_f64()
            );
        } else {
            tracing::info!("✓ {} already in sync", unit.label());
        }
        Ok(report)
    }
}
