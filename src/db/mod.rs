pub mod db_pool;
pub mod duckdb_gateway;
pub mod executor;
pub mod postgrest;
pub mod schema_catalog;

use crate::config::DatabaseConfig;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt;
use std::sync::Arc;

/// One result row: column name to untyped scalar.
pub type RowObject = serde_json::Map<String, serde_json::Value>;

/// One introspection row as returned by the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableColumns {
    #[serde(alias = "table_name")]
    pub table: String,
    pub columns: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextSnippet {
    pub content: String,
}

/// Error reported by the database itself. Data, not a failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseError {
    pub code: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionResult {
    pub rows: Vec<RowObject>,
    pub error: Option<DatabaseError>,
}

impl ExecutionResult {
    pub fn ok(rows: Vec<RowObject>) -> Self {
        Self { rows, error: None }
    }

    pub fn failed(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            rows: Vec::new(),
            error: Some(DatabaseError {
                code: code.into(),
                message: message.into(),
            }),
        }
    }
}

#[derive(Debug)]
pub enum GatewayError {
    /// Connection refused, timeout, pool exhaustion, task failure
    Transport(String),
    /// The gateway answered but not in the shape we expect
    Backend(String),
}

impl fmt::Display for GatewayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GatewayError::Transport(msg) => write!(f, "gateway transport error: {}", msg),
            GatewayError::Backend(msg) => write!(f, "gateway error: {}", msg),
        }
    }
}

impl Error for GatewayError {}

/// The three database operations the pipeline needs, plus the write used by
/// documentation ingestion.
#[async_trait]
pub trait DatabaseGateway: Send + Sync {
    fn backend(&self) -> &'static str;

    fn default_schema(&self) -> &'static str;

    /// Introspection: `(table, columns)` for every table in `schema`, columns
    /// in ordinal order.
    async fn fetch_columns(&self, schema: &str) -> Result<Vec<TableColumns>, GatewayError>;

    /// Similarity search, most similar first.
    async fn match_snippets(
        &self,
        embedding: &[f32],
        match_count: usize,
    ) -> Result<Vec<ContextSnippet>, GatewayError>;

    /// Read-only execution channel. Database errors come back inside the
    /// result; only transport problems are `Err`.
    async fn exec_sql(&self, sql: &str) -> Result<ExecutionResult, GatewayError>;

    async fn store_snippet(&self, content: &str, embedding: &[f32]) -> Result<(), GatewayError>;
}

pub fn connect(config: &DatabaseConfig) -> Result<Arc<dyn DatabaseGateway>, GatewayError> {
    let gateway: Arc<dyn DatabaseGateway> = match config.backend.as_str() {
        "duckdb" => Arc::new(duckdb_gateway::DuckDbGateway::open(config)?),
        "postgrest" => Arc::new(postgrest::PostgrestGateway::new(config)?),
        other => {
            return Err(GatewayError::Backend(format!(
                "Unsupported database backend: {}",
                other
            )))
        }
    };

    Ok(gateway)
}
