// ABOUTME: Hash-based reconciliation core
// ABOUTME: Hashing, diffing, chunked apply and unit scheduling behind injectable seams

pub mod database;
pub mod diff;
pub mod executor;
pub mod hash_store;
pub mod hasher;
pub mod memory;
pub mod mutation_log;
pub mod planner;
pub mod policy;
pub mod scheduler;
pub mod statement;
pub mod synchronizer;
pub mod types;
pub mod worker;

pub use database::{Database, PageCursor};
pub use executor::ApplyReport;
pub use hash_store::HashStore;
pub use mutation_log::MutationLog;
pub use statement::Statement;
pub use synchronizer::{SyncPlan, SyncSummary, Synchronizer, TableSummary, UnitFailure};
pub use types::{ColumnDefinition, Diff, HashRecord, Side, SyncUnit, TableDefinition, UnitMode};
