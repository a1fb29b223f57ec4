// ABOUTME: Run configuration for a synchronization pass
// ABOUTME: Loads syncer.toml, applies defaults, and validates before any connection is made

use crate::error::{Result, SyncError};
use crate::filters::TableFilter;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_PATH: &str = "syncer.toml";
pub const DEFAULT_CHUNK_SIZE: usize = 100;
pub const DEFAULT_QUERY_LOG: &str = "queries.sql";

/// Connection parameters for one database role.
///
/// Either `url` or the individual fields are used; `url` wins when both are set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ConnectionConfig {
    pub url: Option<String>,
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            url: None,
            host: "localhost".to_string(),
            port: 3306,
            user: "root".to_string(),
            password: String::new(),
            database: String::new(),
        }
    }
}

impl ConnectionConfig {
    pub fn new(host: &str, port: u16, user: &str, password: &str, database: &str) -> Self {
        Self {
            url: None,
            host: host.to_string(),
            port,
            user: user.to_string(),
            password: password.to_string(),
            database: database.to_string(),
        }
    }

    /// Same server, different schema.
    pub fn with_database(&self, database: &str) -> Self {
        Self {
            url: None,
            database: database.to_string(),
            ..self.clone()
        }
    }

    /// `user@host:port/database`, safe to log.
    pub fn display_name(&self) -> String {
        match &self.url {
            Some(url) => crate::utils::strip_password_from_url(url),
            None => format!(
                "{}@{}:{}/{}",
                self.user, self.host, self.port, self.database
            ),
        }
    }

    fn identity(&self) -> String {
        match &self.url {
            Some(url) => crate::utils::strip_password_from_url(url).to_lowercase(),
            None => format!(
                "{}@{}:{}/{}",
                self.user,
                self.host.to_lowercase(),
                self.port,
                self.database
            ),
        }
    }
}

/// What happens to the rest of a concurrent run when one unit fails.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum FailurePolicy {
    /// Record the failure, keep processing other units.
    #[default]
    IsolateUnit,
    /// Stop handing out units, let in-flight units finish, return the fault.
    AbortRun,
}

/// Immutable configuration for one synchronization run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub master: ConnectionConfig,
    pub slave: ConnectionConfig,
    pub sync: ConnectionConfig,
    /// Rows per batched statement
    pub chunk_size: usize,
    /// Regular expressions; matching tables are never read or written
    pub ignore_tables: Vec<String>,
    /// Fully replace tables without a primary key instead of skipping them
    pub copy_tables_with_no_primary_key: bool,
    /// Table name -> partition column
    pub partitioned_tables: BTreeMap<String, String>,
    pub use_multi_processing: bool,
    /// Worker pool size in concurrent mode (defaults to available parallelism)
    pub workers: Option<usize>,
    pub failure_policy: FailurePolicy,
    pub log_queries: bool,
    pub log_query_file: PathBuf,
    /// Compute diffs without executing anything against the slave
    pub dry_run: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            master: ConnectionConfig::default(),
            slave: ConnectionConfig::default(),
            sync: ConnectionConfig::default(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            ignore_tables: Vec::new(),
            copy_tables_with_no_primary_key: true,
            partitioned_tables: BTreeMap::new(),
            use_multi_processing: false,
            workers: None,
            failure_policy: FailurePolicy::default(),
            log_queries: false,
            log_query_file: PathBuf::from(DEFAULT_QUERY_LOG),
            dry_run: false,
        }
    }
}

impl RunConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            SyncError::configuration(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_toml(&contents)
    }

    /// Parse configuration from TOML text.
    pub fn from_toml(contents: &str) -> Result<Self> {
        toml::from_str(contents)
            .map_err(|e| SyncError::configuration(format!("Failed to parse config: {}", e)))
    }

    /// Check every field that would otherwise fail halfway through a run.
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(SyncError::configuration("chunk_size must be greater than 0"));
        }
        if self.workers == Some(0) {
            return Err(SyncError::configuration("workers must be greater than 0"));
        }

        for (role, conn) in [
            ("master", &self.master),
            ("slave", &self.slave),
            ("sync", &self.sync),
        ] {
            if conn.url.is_none() && conn.database.trim().is_empty() {
                return Err(SyncError::configuration(format!(
                    "{} database name must not be empty",
                    role
                )));
            }
        }

        if self.master.identity() == self.slave.identity() {
            return Err(SyncError::configuration(format!(
                "Master and slave point to the same database ({}). \
                 Syncing a database onto itself would do nothing at best and destroy data at worst.",
                self.master.display_name()
            )));
        }

        for (table, column) in &self.partitioned_tables {
            if column.trim().is_empty() {
                return Err(SyncError::configuration(format!(
                    "Partition column for table '{}' must not be empty",
                    table
                )));
            }
        }

        TableFilter::new(&self.ignore_tables)?;
        Ok(())
    }

    /// Number of workers to use in concurrent mode.
    pub fn worker_count(&self) -> usize {
        self.workers.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4)
        })
    }

    /// Path of the mutation log, if query logging is enabled.
    pub fn query_log_path(&self) -> Option<&Path> {
        self.log_queries.then_some(self.log_query_file.as_path())
    }
}
