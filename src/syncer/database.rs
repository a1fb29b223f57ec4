// ABOUTME: Database seam used by the synchronizer for master and slave roles
// ABOUTME: One explicit connection object per role, swappable for test doubles

use async_trait::async_trait;
use mysql_async::Value;

use super::statement::Statement;
use super::types::{RowFilter, TableDefinition};
use crate::error::Result;

/// Where a page read starts.
#[derive(Debug, Clone, PartialEq)]
pub enum PageCursor {
    /// First page, ordered by primary key
    Start,
    /// Rows whose primary key sorts after this key
    After(Vec<Value>),
    /// Tables without a primary key: skip this many rows
    Offset(u64),
}

/// Everything the synchronizer needs from one database.
///
/// Rows are always full rows in the table's column order.
#[async_trait]
pub trait Database: Send + Sync {
    /// Role name used in logs and faults (`master`, `slave`).
    fn role(&self) -> &str;

    /// Base tables, in the order they should be processed.
    async fn list_tables(&self) -> Result<Vec<String>>;

    /// Columns and primary key of a table; `None` if it does not exist.
    async fn describe_table(&self, table: &str) -> Result<Option<TableDefinition>>;

    /// Distinct values of `column`, NULL included as `None`.
    async fn distinct_values(&self, table: &str, column: &str) -> Result<Vec<Option<Value>>>;

    /// Up to `limit` rows matching `filter`, starting at `cursor`.
    ///
    /// Tables with a primary key are returned in key order.
    async fn fetch_page(
        &self,
        table: &TableDefinition,
        filter: &RowFilter,
        cursor: &PageCursor,
        limit: usize,
    ) -> Result<Vec<Vec<Value>>>;

    /// Rows whose primary key is one of `keys`. Missing keys are skipped.
    async fn fetch_by_keys(
        &self,
        table: &TableDefinition,
        keys: &[Vec<Value>],
    ) -> Result<Vec<Vec<Value>>>;

    /// Execute one statement, returning affected rows.
    async fn execute(&self, statement: &Statement) -> Result<u64>;
}
