// ABOUTME: Central filtering logic for selective synchronization
// ABOUTME: Matches table names against the configured ignore patterns

use crate::error::{Result, SyncError};
use regex::Regex;

/// Tables matching any of these patterns are neither hashed nor written.
#[derive(Debug, Clone, Default)]
pub struct TableFilter {
    ignore: Vec<Regex>,
}

impl TableFilter {
    /// Compile ignore patterns. Each entry is a regular expression matched
    /// anywhere in the table name; anchor with `^`/`$` for exact matches.
    pub fn new(patterns: &[String]) -> Result<Self> {
        let ignore = patterns
            .iter()
            .map(|pattern| {
                Regex::new(pattern).map_err(|e| {
                    SyncError::configuration(format!(
                        "Invalid ignore_tables pattern '{}': {}",
                        pattern, e
                    ))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { ignore })
    }

    /// Returns the first pattern that matches `table`, if any.
    pub fn matching_pattern(&self, table: &str) -> Option<&str> {
        self.ignore
            .iter()
            .find(|re| re.is_match(table))
            .map(|re| re.as_str())
    }

    pub fn is_ignored(&self, table: &str) -> bool {
        self.matching_pattern(table).is_some()
    }
}
