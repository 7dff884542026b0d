use crate::config::DatabaseConfig;
use crate::db::db_pool::DuckDBConnectionManager;
use crate::db::{
    ContextSnippet, DatabaseGateway, ExecutionResult, GatewayError, RowObject, TableColumns,
};
use arrow::json::writer::JsonArray;
use arrow::json::WriterBuilder;
use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use duckdb::{params, Connection};
use r2d2::Pool;
use tracing::{debug, info};

/// SQLSTATE Postgres uses for writes attempted in a read-only transaction.
pub const READ_ONLY_VIOLATION: &str = "25006";

/// Leading keywords accepted by the read-only execution channel.
const READ_ONLY_KEYWORDS: &[&str] = &[
    "SELECT", "WITH", "VALUES", "SHOW", "DESCRIBE", "EXPLAIN", "TABLE", "FROM",
];

/// Statements `EXPLAIN [ANALYZE]` may wrap.
const EXPLAINABLE_KEYWORDS: &[&str] = &["SELECT", "WITH", "VALUES", "TABLE", "FROM"];

/// Refused anywhere in a statement, outside literals and comments: writes,
/// session changes and filesystem access.
const MUTATING_KEYWORDS: &[&str] = &[
    "INSERT", "UPDATE", "DELETE", "MERGE", "CREATE", "ALTER", "DROP", "TRUNCATE", "ATTACH",
    "DETACH", "COPY", "EXPORT", "IMPORT", "INSTALL", "LOAD", "PRAGMA", "SET", "RESET", "CALL",
    "VACUUM", "CHECKPOINT", "BEGIN", "COMMIT", "ROLLBACK", "GRANT", "REVOKE",
];

/// Embedded gateway: the catalog, the documentation vectors and the data all
/// live in one DuckDB database.
pub struct DuckDbGateway {
    pool: Pool<DuckDBConnectionManager>,
    docs_table: String,
}

impl DuckDbGateway {
    pub fn open(config: &DatabaseConfig) -> Result<Self, GatewayError> {
        if !is_identifier(&config.docs_table) {
            return Err(GatewayError::Backend(format!(
                "Invalid documentation table name: {}",
                config.docs_table
            )));
        }

        info!("Opening DuckDB database: {}", config.connection_string);
        let manager = DuckDBConnectionManager::new(&config.connection_string)
            .map_err(|e| GatewayError::Transport(e.to_string()))?;
        let pool = Pool::builder()
            .max_size(config.pool_size.max(1) as u32)
            .build(manager)
            .map_err(|e| GatewayError::Transport(format!("connection pool: {}", e)))?;

        let gateway = Self {
            pool,
            docs_table: config.docs_table.clone(),
        };
        gateway.ensure_docs_table()?;

        Ok(gateway)
    }

    fn ensure_docs_table(&self) -> Result<(), GatewayError> {
        let conn = self
            .pool
            .get()
            .map_err(|e| GatewayError::Transport(format!("connection pool: {}", e)))?;
        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS \"{}\" (content VARCHAR NOT NULL, embedding FLOAT[] NOT NULL)",
            self.docs_table
        ))
        .map_err(|e| GatewayError::Backend(format!("creating documentation table: {}", e)))
    }

    /// Runs `f` on a pooled connection off the async runtime.
    async fn with_connection<T, F>(&self, f: F) -> Result<T, GatewayError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, GatewayError> + Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let conn = pool
                .get()
                .map_err(|e| GatewayError::Transport(format!("connection pool: {}", e)))?;
            f(&conn)
        })
        .await
        .map_err(|e| GatewayError::Transport(format!("database task failed: {}", e)))?
    }

    #[cfg(test)]
    pub fn execute_batch(&self, sql: &str) -> Result<(), GatewayError> {
        let conn = self
            .pool
            .get()
            .map_err(|e| GatewayError::Transport(e.to_string()))?;
        conn.execute_batch(sql)
            .map_err(|e| GatewayError::Backend(e.to_string()))
    }
}

#[async_trait]
impl DatabaseGateway for DuckDbGateway {
    fn backend(&self) -> &'static str {
        "duckdb"
    }

    fn default_schema(&self) -> &'static str {
        "main"
    }

    async fn fetch_columns(&self, schema: &str) -> Result<Vec<TableColumns>, GatewayError> {
        let schema = schema.to_string();
        let docs_table = self.docs_table.clone();

        self.with_connection(move |conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT table_name, column_name FROM information_schema.columns \
                     WHERE table_schema = ? AND table_name <> ? \
                     ORDER BY table_name, ordinal_position",
                )
                .map_err(|e| GatewayError::Backend(e.to_string()))?;

            let pairs = stmt
                .query_map(params![schema, docs_table], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
                })
                .map_err(|e| GatewayError::Backend(e.to_string()))?
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| GatewayError::Backend(e.to_string()))?;

            let mut tables: Vec<TableColumns> = Vec::new();
            for (table, column) in pairs {
                match tables.last_mut() {
                    Some(last) if last.table == table => last.columns.push(column),
                    _ => tables.push(TableColumns {
                        table,
                        columns: vec![column],
                    }),
                }
            }

            debug!("Introspected {} tables", tables.len());
            Ok(tables)
        })
        .await
    }

    async fn match_snippets(
        &self,
        embedding: &[f32],
        match_count: usize,
    ) -> Result<Vec<ContextSnippet>, GatewayError> {
        if match_count == 0 {
            return Ok(Vec::new());
        }

        let vector = vector_literal(embedding);
        let sql = format!(
            "SELECT content FROM \"{}\" \
             ORDER BY list_cosine_similarity(embedding, CAST(? AS FLOAT[])) DESC \
             LIMIT ?",
            self.docs_table
        );

        self.with_connection(move |conn| {
            let mut stmt = conn
                .prepare(&sql)
                .map_err(|e| GatewayError::Backend(e.to_string()))?;

            stmt.query_map(params![vector, match_count as i64], |row| {
                Ok(ContextSnippet {
                    content: row.get::<_, String>(0)?,
                })
            })
            .map_err(|e| GatewayError::Backend(e.to_string()))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| GatewayError::Backend(e.to_string()))
        })
        .await
    }

    async fn exec_sql(&self, sql: &str) -> Result<ExecutionResult, GatewayError> {
        if let Some(reason) = read_only_violation(sql) {
            return Ok(ExecutionResult::failed(READ_ONLY_VIOLATION, reason));
        }

        let sql = sql.to_string();
        self.with_connection(move |conn| run_query(conn, &sql)).await
    }

    async fn store_snippet(&self, content: &str, embedding: &[f32]) -> Result<(), GatewayError> {
        let content = content.to_string();
        let vector = vector_literal(embedding);
        let sql = format!(
            "INSERT INTO \"{}\" (content, embedding) VALUES (?, CAST(? AS FLOAT[]))",
            self.docs_table
        );

        self.with_connection(move |conn| {
            conn.execute(&sql, params![content, vector])
                .map(|_| ())
                .map_err(|e| GatewayError::Backend(e.to_string()))
        })
        .await
    }
}

fn run_query(conn: &Connection, sql: &str) -> Result<ExecutionResult, GatewayError> {
    let mut stmt = match conn.prepare(sql) {
        Ok(stmt) => stmt,
        Err(e) => return Ok(database_error(e)),
    };

    let batches: Vec<RecordBatch> = match stmt.query_arrow([]) {
        Ok(arrow) => arrow.collect(),
        Err(e) => return Ok(database_error(e)),
    };

    let rows = batches_to_rows(&batches)
        .map_err(|e| GatewayError::Backend(format!("converting result rows: {}", e)))?;
    debug!("Query returned {} rows", rows.len());

    Ok(ExecutionResult::ok(rows))
}

fn database_error(error: duckdb::Error) -> ExecutionResult {
    let message = error.to_string();
    ExecutionResult::failed(classify_error(&message), message)
}

fn batches_to_rows(batches: &[RecordBatch]) -> Result<Vec<RowObject>, String> {
    let mut writer = WriterBuilder::new()
        .with_explicit_nulls(true)
        .build::<_, JsonArray>(Vec::new());

    let refs: Vec<&RecordBatch> = batches.iter().collect();
    writer.write_batches(&refs).map_err(|e| e.to_string())?;
    writer.finish().map_err(|e| e.to_string())?;

    let buffer = writer.into_inner();
    if buffer.is_empty() {
        return Ok(Vec::new());
    }

    serde_json::from_slice(&buffer).map_err(|e| e.to_string())
}

/// Maps DuckDB's error text onto the SQLSTATE codes Postgres would report.
pub fn classify_error(message: &str) -> &'static str {
    let lower = message.to_lowercase();

    if lower.contains("function")
        && (lower.contains("does not exist") || lower.contains("no function matches"))
    {
        "42883"
    } else if lower.contains("table with name")
        || (lower.contains("referenced table") && lower.contains("not found"))
        || (lower.contains("table") && lower.contains("does not exist"))
    {
        "42P01"
    } else if lower.contains("column")
        && (lower.contains("not found")
            || lower.contains("does not have a column")
            || lower.contains("does not exist"))
    {
        "42703"
    } else if lower.contains("parser error") || lower.contains("syntax error") {
        "42601"
    } else {
        "XX000"
    }
}

/// Why `sql` may not run on the read-only channel, if it may not. An empty
/// statement passes and is left for DuckDB to reject.
fn read_only_violation(sql: &str) -> Option<String> {
    let code = code_only(sql);
    let body = code.trim_end_matches(|c: char| c == ';' || c.is_whitespace());
    if body.trim().is_empty() {
        return None;
    }
    if body.contains(';') {
        return Some("multiple statements are not allowed on the read-only channel".to_string());
    }

    let words: Vec<&str> = body
        .split(|c: char| !c.is_ascii_alphanumeric() && c != '_')
        .filter(|w| !w.is_empty())
        .collect();

    if let Some(keyword) = words.iter().find(|w| MUTATING_KEYWORDS.contains(*w)) {
        return Some(format!("cannot execute {} in a read-only transaction", keyword));
    }

    let leading = words.first().copied().unwrap_or_default();
    if !READ_ONLY_KEYWORDS.contains(&leading) {
        return Some(format!("cannot execute {} in a read-only transaction", leading));
    }

    if leading == "EXPLAIN" {
        let target = words
            .iter()
            .skip(1)
            .find(|w| **w != "ANALYZE")
            .copied()
            .unwrap_or_default();
        if !EXPLAINABLE_KEYWORDS.contains(&target) {
            return Some(format!("cannot explain {} in a read-only transaction", target));
        }
    }

    None
}

/// Upper-cased statement text with string literals, quoted identifiers and
/// comments blanked out.
fn code_only(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut chars = sql.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            // A doubled quote closes and reopens, which skips the same text
            '\'' | '"' => {
                for next in chars.by_ref() {
                    if next == c {
                        break;
                    }
                }
                out.push(' ');
            }
            '-' if chars.peek() == Some(&'-') => {
                for next in chars.by_ref() {
                    if next == '\n' {
                        break;
                    }
                }
                out.push('\n');
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut prev = ' ';
                for next in chars.by_ref() {
                    if prev == '*' && next == '/' {
                        break;
                    }
                    prev = next;
                }
                out.push(' ');
            }
            _ => out.push(c.to_ascii_uppercase()),
        }
    }

    out
}

fn vector_literal(embedding: &[f32]) -> String {
    let values: Vec<String> = embedding.iter().map(|v| v.to_string()).collect();
    format!("[{}]", values.join(", "))
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
