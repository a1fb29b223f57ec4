// ABOUTME: Connection pools for the master, slave and sync databases
// ABOUTME: Builds mysql_async options from ConnectionConfig and verifies them with SELECT 1

use mysql_async::prelude::*;
use mysql_async::{Opts, OptsBuilder, Pool, PoolConstraints, PoolOpts};
use std::time::Duration;

use crate::config::ConnectionConfig;
use crate::error::{Result, SyncError};
use crate::utils::retry_with_backoff;

const CONNECT_RETRIES: u32 = 3;
const CONNECT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Build pool options for one role.
pub fn build_opts(config: &ConnectionConfig, max_conns: usize) -> Result<Opts> {
    let builder = match &config.url {
        Some(url) => {
            let opts = Opts::from_url(url).map_err(|e| {
                SyncError::configuration(format!(
                    "Invalid MySQL URL {}: {}",
                    crate::utils::strip_password_from_url(url),
                    e
                ))
            })?;
            OptsBuilder::from_opts(opts)
        }
        None => OptsBuilder::default()
            .ip_or_hostname(config.host.clone())
            .tcp_port(config.port)
            .user(Some(config.user.clone()))
            .pass((!config.password.is_empty()).then(|| config.password.clone()))
            .db_name(Some(config.database.clone())),
    };

    let constraints = PoolConstraints::new(1, max_conns.max(1)).ok_or_else(|| {
        SyncError::configuration(format!("Invalid pool size {}", max_conns))
    })?;

    Ok(builder
        // utf8mb4 so row text round-trips unchanged
        .init(vec!["SET NAMES utf8mb4"])
        .pool_opts(PoolOpts::new().with_constraints(constraints))
        .into())
}

/// Open a pool and test it once.
pub async fn connect(role: &str, config: &ConnectionConfig, max_conns: usize) -> Result<Pool> {
    let pool = Pool::new(build_opts(config, max_conns)?);

    let mut conn = pool
        .get_conn()
        .await
        .map_err(|e| connection_error(role, config, e))?;
    conn.query_drop("SELECT 1")
        .await
        .map_err(|e| connection_error(role, config, e))?;
    drop(conn);

    tracing::info!("✓ Connected to {} database {}", role, config.display_name());
    Ok(pool)
}

/// [`connect`], retried with exponential backoff for transient failures.
pub async fn connect_with_retry(
    role: &str,
    config: &ConnectionConfig,
    max_conns: usize,
) -> Result<Pool> {
    retry_with_backoff(
        || connect(role, config, max_conns),
        CONNECT_RETRIES,
        CONNECT_RETRY_DELAY,
    )
    .await
}

/// Close a pool. Errors are logged, not returned.
pub async fn close_pool(pool: Pool) {
    if let Err(e) = pool.disconnect().await {
        tracing::warn!("Failed to close connection pool: {}", e);
    }
}

fn connection_error(role: &str, config: &ConnectionConfig, error: mysql_async::Error) -> SyncError {
    SyncError::infrastructure(
        role,
        format!(
            "Failed to connect to {}: {}",
            config.display_name(),
            error
        ),
    )
}
