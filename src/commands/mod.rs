// ABOUTME: Command implementations for the mysql-syncer CLI
// ABOUTME: Shared config loading, CLI overrides and connection setup

pub mod bench;
pub mod sync;
pub mod validate;

pub use bench::bench;
pub use sync::sync;
pub use validate::validate;

use anyhow::{Context, Result};
use clap::Args;
use mysql_async::Pool;
use std::path::PathBuf;
use std::sync::Arc;

use crate::config::{FailurePolicy, RunConfig, DEFAULT_CONFIG_PATH};
use crate::mysql::{close_pool, connect_with_retry, MySqlDatabase, MySqlHashStore};
use crate::syncer::{MutationLog, Synchronizer};

/// Config file location plus per-run overrides.
#[derive(Args, Clone, Debug, Default)]
pub struct ConfigArgs {
    /// Path to the TOML run configuration
    #[arg(long, env = "SYNCER_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,
    /// Rows per batched statement
    #[arg(long)]
    pub chunk_size: Option<usize>,
    /// Process units on a worker pool
    #[arg(long)]
    pub multi_processing: bool,
    /// Worker pool size (implies --multi-processing)
    #[arg(long)]
    pub workers: Option<usize>,
    /// What a failed unit does to the rest of a concurrent run
    #[arg(long, value_enum)]
    pub failure_policy: Option<FailurePolicy>,
    /// Compute diffs but do not modify the slave
    #[arg(long)]
    pub dry_run: bool,
    /// Log every executed statement to this file
    #[arg(long)]
    pub log_queries: Option<PathBuf>,
}

impl ConfigArgs {
    /// Load the config file, apply overrides, and validate the result.
    pub fn load(&self) -> Result<RunConfig> {
        let mut config = RunConfig::load(&self.config)?;
        self.apply(&mut config);
        config
            .validate()
            .with_context(|| format!("Invalid configuration in {}", self.config.display()))?;
        Ok(config)
    }

    pub fn apply(&self, config: &mut RunConfig) {
        if let Some(chunk_size) = self.chunk_size {
            config.chunk_size = chunk_size;
        }
        if self.multi_processing {
            config.use_multi_processing = true;
        }
        if let Some(workers) = self.workers {
            config.workers = Some(workers);
            config.use_multi_processing = true;
        }
        if let Some(policy) = self.failure_policy {
            config.failure_policy = policy;
        }
        if self.dry_run {
            config.dry_run = true;
        }
        if let Some(path) = &self.log_queries {
            config.log_queries = true;
            config.log_query_file = path.clone();
        }
    }
}

/// Open (and reset) the mutation log the config asks for.
pub async fn open_mutation_log(config: &RunConfig) -> Result<Arc<MutationLog>> {
    let log = match config.query_log_path() {
        Some(path) => MutationLog::create(path)
            .await
            .with_context(|| format!("Failed to create query log {}", path.display()))?,
        None => MutationLog::disabled(),
    };
    Ok(Arc::new(log))
}

/// Live connections for one run.
pub struct Connections {
    pub master: Arc<MySqlDatabase>,
    pub slave: Arc<MySqlDatabase>,
    pub hashes: Arc<MySqlHashStore>,
    pools: Vec<Pool>,
}

impl Connections {
    /// Connect to the master, slave and sync databases, retrying transient failures.
    pub async fn open(config: &RunConfig, log: Arc<MutationLog>) -> Result<Self> {
        let pool_size = if config.use_multi_processing {
            config.worker_count() + 1
        } else {
            2
        };

        let master_pool = connect_with_retry("master", &config.master, pool_size)
            .await
            .context("Failed to connect to master database")?;
        let slave_pool = connect_with_retry("slave", &config.slave, pool_size)
            .await
            .context("Failed to connect to slave database")?;
        let sync_pool = connect_with_retry("sync", &config.sync, pool_size)
            .await
            .context("Failed to connect to sync database")?;

        Ok(Self {
            master: Arc::new(MySqlDatabase::new("master", master_pool.clone())),
            slave: Arc::new(MySqlDatabase::new("slave", slave_pool.clone())),
            hashes: Arc::new(MySqlHashStore::new(sync_pool.clone(), log)),
            pools: vec![master_pool, slave_pool, sync_pool],
        })
    }

    pub fn synchronizer(&self, config: Arc<RunConfig>, log: Arc<MutationLog>) -> Synchronizer {
        Synchronizer::new(
            self.master.clone(),
            self.slave.clone(),
            self.hashes.clone(),
            config,
            log,
        )
    }

    /// Close every pool. Errors are logged, not returned.
    pub async fn disconnect(self) {
        for pool in self.pools {
            close_pool(pool).await;
        }
    }
}
