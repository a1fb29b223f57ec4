// ABOUTME: MySQL implementations of the synchronizer's database and hash-store seams
// ABOUTME: Maps mysql_async errors onto the fault taxonomy

pub mod connection;
pub mod database;
pub mod hash_store;

pub use connection::{close_pool, connect, connect_with_retry};
pub use database::MySqlDatabase;
pub use hash_store::MySqlHashStore;

use crate::error::SyncError;

/// A failed read, or any non-server failure: the run cannot continue.
pub(crate) fn read_error(role: &str, statement: &str, error: mysql_async::Error) -> SyncError {
    SyncError::Infrastructure {
        role: role.to_string(),
        statement: Some(statement.to_string()),
        message: error.to_string(),
    }
}

/// A failed write. Server-side rejections are apply faults owned by the
/// current unit; connection and driver failures are infrastructure faults.
pub(crate) fn write_error(role: &str, statement: &str, error: mysql_async::Error) -> SyncError {
    match error {
        mysql_async::Error::Server(server) => SyncError::Apply {
            unit: String::new(),
            statement: statement.to_string(),
            message: server.to_string(),
        },
        other => read_error(role, statement, other),
    }
}
