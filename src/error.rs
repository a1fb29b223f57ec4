// ABOUTME: Fault taxonomy for a synchronization run
// ABOUTME: Classifies configuration, schema, apply, and infrastructure failures

use thiserror::Error;

/// Result alias used by the synchronizer core.
pub type Result<T> = std::result::Result<T, SyncError>;

/// Every failure the synchronizer can report.
///
/// The variant decides how far a failure propagates: configuration and
/// schema faults skip a table, apply faults abort a unit (and the run in
/// sequential mode), infrastructure faults always abort the run.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Malformed or inconsistent run configuration.
    #[error("configuration fault: {0}")]
    Configuration(String),

    /// A table cannot be synchronized under the current policy.
    #[error("schema fault on table `{table}`: {reason}")]
    Schema { table: String, reason: String },

    /// A batched statement failed against the slave.
    #[error("apply fault in unit {unit}: {message}\nstatement: {statement}")]
    Apply {
        unit: String,
        statement: String,
        message: String,
    },

    /// Connection-level or read failure on one of the three databases.
    #[error("infrastructure fault on {role} database: {message}{}", statement_suffix(.statement))]
    Infrastructure {
        role: String,
        statement: Option<String>,
        message: String,
    },
}

fn statement_suffix(statement: &Option<String>) -> String {
    match statement {
        Some(sql) => format!("\nstatement: {}", sql),
        None => String::new(),
    }
}

impl SyncError {
    pub fn configuration(message: impl Into<String>) -> Self {
        SyncError::Configuration(message.into())
    }

    pub fn schema(table: impl Into<String>, reason: impl Into<String>) -> Self {
        SyncError::Schema {
            table: table.into(),
            reason: reason.into(),
        }
    }

    pub fn infrastructure(role: impl Into<String>, message: impl Into<String>) -> Self {
        SyncError::Infrastructure {
            role: role.into(),
            statement: None,
            message: message.into(),
        }
    }

    /// Infrastructure faults end the whole run no matter the failure policy.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SyncError::Infrastructure { .. })
    }

    /// Attach the owning unit label to an apply fault raised below the executor.
    pub fn in_unit(self, label: &str) -> Self {
        match self {
            SyncError::Apply {
                statement, message, ..
            } => SyncError::Apply {
                unit: label.to_string(),
                statement,
                message,
            },
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_fault_surfaces_statement_and_server_message() {
        let err = SyncError::Apply {
            unit: String::new(),
            statement: "DELETE FROM `t` WHERE `id` IN (3)".to_string(),
            message: "Lock wait timeout exceeded".to_string(),
        }
        .in_unit("t");

        let text = err.to_string();
        assert!(text.contains("unit t"));
        assert!(text.contains("DELETE FROM `t` WHERE `id` IN (3)"));
        assert!(text.contains("Lock wait timeout exceeded"));
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_infrastructure_fault_is_fatal() {
        let err = SyncError::infrastructure("master", "connection refused");
        assert!(err.is_fatal());
        assert_eq!(
            err.to_string(),
            "infrastructure fault on master database: connection refused"
        );
    }

    #[test]
    fn test_in_unit_leaves_other_faults_untouched() {
        let err = SyncError::schema("logs", "no primary key").in_unit("logs");
        assert!(matches!(err, SyncError::Schema { .. }));
    }
}
