//! # Execution Boundary
//!
//! Sends one rendered statement to the search daemon and hands back its rows.

use serde_json::{Map, Value};
use std::sync::Arc;

/// Rows in the daemon's column order, plus the match count it reported.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionResult {
    pub rows: Vec<Map<String, Value>>,
    pub total: u64,
}

#[async_trait::async_trait]
pub trait SqlExecutor: Send + Sync {
    /// Run one statement. The error is the daemon's message, verbatim.
    async fn execute(&self, sql: &str) -> std::result::Result<ExecutionResult, String>;
}

#[async_trait::async_trait]
impl<T: SqlExecutor + ?Sized> SqlExecutor for Arc<T> {
    async fn execute(&self, sql: &str) -> std::result::Result<ExecutionResult, String> {
        (**self).execute(sql).await
    }
}
