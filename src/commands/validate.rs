// ABOUTME: Validate command - checks config and connectivity without writing
// ABOUTME: Prints each table's policy and the unit plan the next sync would run

use anyhow::{Context, Result};
use std::sync::Arc;

use super::{ConfigArgs, Connections};
use crate::syncer::policy::TablePolicy;
use crate::syncer::MutationLog;

pub async fn validate(args: &ConfigArgs) -> Result<()> {
    let config = Arc::new(args.load()?);
    tracing::info!("✓ Configuration {} is valid", args.config.display());

    let log = Arc::new(MutationLog::disabled());
    let connections = Connections::open(&config, log.clone()).await?;
    let plan = connections
        .synchronizer(config.clone(), log)
        .plan()
        .await;
    connections.disconnect().await;
    let plan = plan.context("Failed to plan sync")?;

    println!();
    println!("========================================");
    println!("Sync plan");
    println!("========================================");
    for policy in &plan.policies {
        let units = plan
            .units
            .iter()
            .filter(|u| u.table.name == policy.table_name())
            .count();
        match policy {
            TablePolicy::HashDiff(_) | TablePolicy::FullReplace(_) => println!(
                "  ✓ {:<32} {} ({} units)",
                policy.table_name(),
                policy.describe(),
                units
            ),
            _ => println!("  - {:<32} {}", policy.table_name(), policy.describe()),
        }
    }
    println!();
    println!(
        "  {} units, chunk size {}, {}",
        plan.units.len(),
        config.chunk_size,
        if config.use_multi_processing {
            format!("{} workers ({:?})", config.worker_count(), config.failure_policy)
        } else {
            "sequential".to_string()
        }
    );
    for warning in &plan.warnings {
        println!("  ⚠ {}", warning);
    }
    println!();

    tracing::info!("✓ Validation complete");
    Ok(())
}
