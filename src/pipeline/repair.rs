use crate::db::executor::QueryExecutor;
use crate::db::schema_catalog::SchemaWhitelist;
use crate::db::{ContextSnippet, DatabaseError, ExecutionResult, RowObject};
use crate::llm::CompletionClient;
use crate::pipeline::{require_statement, PipelineError, PipelineOutcome};
use crate::sql::prompt::PromptBuilder;
use crate::sql::sanitizer::SqlSanitizer;
use tracing::{debug, info, warn};

/// SQLSTATE codes for mistakes a model can plausibly fix from the error text:
/// undefined column, undefined table, syntax error, undefined function.
pub const REPAIRABLE_CODES: &[&str] = &["42703", "42P01", "42601", "42883"];

pub fn is_repairable(code: &str) -> bool {
    REPAIRABLE_CODES.contains(&code)
}

/// Everything the first generation saw, reused verbatim for the repair prompt.
pub struct GenerationContext<'a> {
    pub question: &'a str,
    pub whitelist: &'a SchemaWhitelist,
    pub snippets: &'a [ContextSnippet],
}

#[derive(Debug)]
enum RepairState {
    Initial { sql: String },
    Executed { sql: String, result: ExecutionResult },
    Repairing { sql: String, error: DatabaseError },
    Done { sql: String, result: ExecutionResult },
    Repaired { sql: String, rows: Vec<RowObject> },
    Failed { sql: String, error: DatabaseError },
}

/// Executes a statement and, on a repairable database error, asks the model
/// for exactly one corrected statement. The guardrail is not applied to the
/// correction.
pub struct RepairLoop<'a> {
    pub executor: &'a QueryExecutor,
    pub completion: &'a dyn CompletionClient,
    pub prompts: &'a PromptBuilder,
    pub sanitizer: &'a SqlSanitizer,
}

impl RepairLoop<'_> {
    pub async fn run(
        &self,
        context: &GenerationContext<'_>,
        sql: String,
    ) -> Result<PipelineOutcome, PipelineError> {
        let mut state = RepairState::Initial { sql };

        loop {
            debug!("Repair loop state: {:?}", state);
            state = match state {
                RepairState::Initial { sql } => {
                    let result = self.execute(&sql).await?;
                    RepairState::Executed { sql, result }
                }
                RepairState::Executed { sql, result } => match result.error {
                    Some(error) if is_repairable(&error.code) => {
                        RepairState::Repairing { sql, error }
                    }
                    error => RepairState::Done {
                        sql,
                        result: ExecutionResult {
                            rows: result.rows,
                            error,
                        },
                    },
                },
                RepairState::Repairing { sql, error } => {
                    warn!(
                        "Attempting repair after {}: {}",
                        error.code, error.message
                    );
                    let prompt = self.prompts.build_repair(
                        context.question,
                        context.snippets,
                        context.whitelist,
                        &sql,
                        &error,
                    );
                    let raw = self
                        .completion
                        .complete(&prompt)
                        .await
                        .map_err(|source| PipelineError::Generation {
                            sql: Some(sql.clone()),
                            source,
                        })?;
                    let repaired_sql = require_statement(self.sanitizer.clean(&raw), Some(&sql))?;

                    let result = self.execute(&repaired_sql).await?;
                    match result.error {
                        None => RepairState::Repaired {
                            sql: repaired_sql,
                            rows: result.rows,
                        },
                        Some(error) => RepairState::Failed {
                            sql: repaired_sql,
                            error,
                        },
                    }
                }
                RepairState::Done { sql, result } => {
                    return Ok(match result.error {
                        None => PipelineOutcome::succeeded(sql, result.rows, false),
                        Some(error) => PipelineOutcome::database_failure(sql, error),
                    });
                }
                RepairState::Repaired { sql, rows } => {
                    info!("Repair succeeded with {} rows", rows.len());
                    return Ok(PipelineOutcome::succeeded(sql, rows, true));
                }
                RepairState::Failed { sql, error } => {
                    warn!("Repair failed with {}: {}", error.code, error.message);
                    return Ok(PipelineOutcome::database_failure(sql, error));
                }
            };
        }
    }

    async fn execute(&self, sql: &str) -> Result<ExecutionResult, PipelineError> {
        self.executor
            .execute(sql)
            .await
            .map_err(|source| PipelineError::Execution {
                sql: sql.to_string(),
                source,
            })
    }
}
