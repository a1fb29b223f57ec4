// ABOUTME: Append-only log of every statement executed against the slave and sync databases
// ABOUTME: Serializes appends across workers and retries a failed write before giving up

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::utils::retry_with_backoff;

const WRITE_RETRIES: u32 = 2;
const RETRY_DELAY: Duration = Duration::from_millis(50);

/// Sink for executed statements.
///
/// A disabled log accepts appends and drops them. An enabled log writes each
/// statement terminated by `;\n`. Write failures are logged as warnings and
/// never abort the sync.
pub struct MutationLog {
    path: Option<PathBuf>,
    lock: Mutex<()>,
    written: AtomicU64,
    failed: AtomicU64,
}

impl MutationLog {
    pub fn disabled() -> Self {
        Self {
            path: None,
            lock: Mutex::new(()),
            written: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        }
    }

    /// Start a fresh log at `path`, discarding any previous run's contents.
    pub async fn create(path: &Path) -> std::io::Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)
            .await?;
        let header = format!(
            "-- mysql-syncer run started {}\n",
            chrono::Utc::now().to_rfc3339()
        );
        file.write_all(header.as_bytes()).await?;
        file.flush().await?;

        Ok(Self {
            path: Some(path.to_path_buf()),
            lock: Mutex::new(()),
            written: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.path.is_some()
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Statements successfully appended so far.
    pub fn written(&self) -> u64 {
        self.written.load(Ordering::Relaxed)
    }

    /// Statements that could not be appended after retrying.
    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    /// Append one statement verbatim.
    pub async fn append(&self, sql: &str) {
        let Some(path) = &self.path else {
            return;
        };

        let entry = format!("{};\n", sql.trim_end().trim_end_matches(';'));
        let _guard = self.lock.lock().await;

        let result = retry_with_backoff(
            || append_entry(path, &entry),
            WRITE_RETRIES,
            RETRY_DELAY,
        )
        .await;

        match result {
            Ok(()) => {
                self.written.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    "Failed to write statement to query log {}: {}",
                    path.display(),
                    e
                );
            }
        }
    }
}

async fn append_entry(path: &Path, entry: &str) -> std::io::Result<()> {
    let mut file = OpenOptions::new().append(true).open(path).await?;
    file.write_all(entry.as_bytes()).await?;
    file.flush().await
}

/// Read back the statements of a log written by [`MutationLog`].
pub async fn read_entries(path: &Path) -> std::io::Result<Vec<String>> {
    let contents = tokio::fs::read_to_string(path).await?;
    let body = contents
        .lines()
        .filter(|line| !line.starts_with("--"))
        .collect::<Vec<_>>()
        .join("\n");
    // Statements may span lines (DDL); entries end with ";\n"
    Ok(body
        .split(";\n")
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| entry.trim_end_matches(';').to_string())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_disabled_log_drops_entries() {
        let log = MutationLog::disabled();
        log.append("DELETE FROM `t`").await;
        assert!(!log.is_enabled());
        assert_eq!(log.written(), 0);
    }

    #[tokio::test]
    async fn test_create_truncates_previous_run() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("queries.sql");
        std::fs::write(&path, "stale;\n").unwrap();

        let log = MutationLog::create(&path).await.unwrap();
        log.append("DELETE FROM `t`").await;
        log.append("INSERT INTO `t` (`id`) VALUES (1);").await;

        let entries = read_entries(&path).await.unwrap();
        assert_eq!(
            entries,
            vec![
                "DELETE FROM `t`".to_string(),
                "INSERT INTO `t` (`id`) VALUES (1)".to_string()
            ]
        );
        assert_eq!(log.written(), 2);
    }

    #[tokio::test]
    async fn test_write_failure_is_counted_not_fatal() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("queries.sql");
        let log = MutationLog::create(&path).await.unwrap();
        std::fs::remove_file(&path).unwrap();

        log.append("DELETE FROM `t`").await;
        assert_eq!(log.failed(), 1);
        assert_eq!(log.written(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_appends_are_not_interleaved() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("queries.sql");
        let log = std::sync::Arc::new(MutationLog::create(&path).await.unwrap());

        let mut tasks = tokio::task::JoinSet::new();
        for i in 0..20 {
            let log = log.clone();
            tasks.spawn(async move {
                log.append(&format!("DELETE FROM `t{}` WHERE `id` IN ({})", i, i))
                    .await;
            });
        }
        while tasks.join_next().await.is_some() {}

        let entries = read_entries(&path).await.unwrap();
        assert_eq!(entries.len(), 20);
        assert!(entries.iter().all(|e| e.starts_with("DELETE FROM `t")));
    }
}
