// ABOUTME: Sync command - one reconciliation run of the slave against the master
// ABOUTME: Wires Ctrl+C to cancellation and prints the run summary

use anyhow::{bail, Context, Result};
use std::sync::Arc;
use tokio::sync::watch;

use super::{open_mutation_log, ConfigArgs, Connections};
use crate::syncer::SyncSummary;

/// Run a sync with the configuration described by `args`.
///
/// Returns an error when the run aborted or any unit failed, so the exit
/// status reflects whether the slave converged.
pub async fn sync(args: &ConfigArgs, json: bool) -> Result<()> {
    let config = Arc::new(args.load()?);
    tracing::info!(
        "Syncing {} -> {}",
        config.master.display_name(),
        config.slave.display_name()
    );

    let log = open_mutation_log(&config).await?;
    let connections = Connections::open(&config, log.clone()).await?;
    let synchronizer = connections.synchronizer(config.clone(), log.clone());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Received shutdown signal, finishing in-flight units");
            let _ = shutdown_tx.send(true);
        }
    });

    let result = synchronizer.sync_database_with_shutdown(shutdown_rx).await;
    connections.disconnect().await;
    let summary = result.context("Sync run aborted")?;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&summary).context("Failed to serialize summary")?
        );
    } else {
        print_summary(&summary);
    }

    if let Some(path) = log.path() {
        tracing::info!(
            "Logged {} statements to {}",
            log.written(),
            path.display()
        );
    }

    if !summary.failed_units.is_empty() {
        bail!("{} units failed", summary.failed_units.len());
    }
    if summary.cancelled {
        bail!(
            "Run cancelled with {} units not started",
            summary.units_not_started
        );
    }
    Ok(())
}

pub fn print_summary(summary: &SyncSummary) {
    println!();
    println!("========================================");
    if summary.dry_run {
        println!("Sync summary (dry run, nothing applied)");
    } else {
        println!("Sync summary");
    }
    println!("========================================");
    println!(
        "{:<32} {:>12} {:>10} {:>10} {:>10} {:>10} {:>8}",
        "TABLE", "MODE", "INSERTED", "UPDATED", "DELETED", "REPLACED", "BATCHES"
    );
    for table in &summary.tables {
        let mode = match table.mode {
            crate::syncer::UnitMode::HashDiff => "hash-diff",
            crate::syncer::UnitMode::FullReplace => "replace",
        };
        println!(
            "{:<32} {:>12} {:>10} {:>10} {:>10} {:>10} {:>8}",
            table.table,
            mode,
            table.rows.inserted,
            table.rows.updated,
            table.rows.deleted,
            table.rows.replaced,
            table.rows.batches
        );
    }

    let totals = summary.totals();
    println!();
    println!("  Units processed: {}", summary.units_processed);
    println!(
        "  Rows changed:    {} ({} inserted, {} updated, {} deleted, {} replaced)",
        totals.rows_changed(),
        totals.inserted,
        totals.updated,
        totals.deleted,
        totals.replaced
    );
    println!("  Duration:        {}ms", summary.duration_ms);

    if !summary.skipped_tables.is_empty() {
        println!();
        println!("Skipped tables:");
        for skipped in &summary.skipped_tables {
            println!("  - {}: {}", skipped.table, skipped.reason);
        }
    }
    if !summary.warnings.is_empty() {
        println!();
        println!("Warnings:");
        for warning in &summary.warnings {
            println!("  - {}", warning);
        }
    }
    if !summary.failed_units.is_empty() {
        println!();
        println!("Failed units:");
        for failure in &summary.failed_units {
            println!("  ✗ {}: {}", failure.unit, failure.error);
        }
    }
    if summary.log_write_failures > 0 {
        println!();
        println!(
            "  ⚠ {} statements could not be written to the query log",
            summary.log_write_failures
        );
    }
    println!();
}
