// ABOUTME: Library root for mysql-syncer
// ABOUTME: Hash-based MySQL table synchronizer with injectable database seams

pub mod commands;
pub mod config;
pub mod error;
pub mod filters;
pub mod mysql;
pub mod syncer;
pub mod utils;

pub use config::{ConnectionConfig, FailurePolicy, RunConfig};
pub use error::{Result, SyncError};
pub use syncer::{SyncSummary, Synchronizer};
