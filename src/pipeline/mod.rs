pub mod repair;

use crate::config::AppConfig;
use crate::db::executor::QueryExecutor;
use crate::db::schema_catalog::SchemaCatalog;
use crate::db::{DatabaseError, DatabaseGateway, GatewayError, RowObject};
use crate::llm::{CompletionClient, LlmError};
use crate::pipeline::repair::{GenerationContext, RepairLoop};
use crate::rag::embedding::{Embedder, EmbeddingError, EmbeddingKind};
use crate::rag::retriever::{ContextRetriever, DEFAULT_TOP_K};
use crate::sql::guardrail::{PatternGuardrail, SqlGuard};
use crate::sql::prompt::{PromptBuilder, RuleSet};
use crate::sql::sanitizer::SqlSanitizer;
use serde::Serialize;
use std::error::Error;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

/// What `answer` hands back. Always produced, even when a stage failed.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineOutcome {
    pub final_sql: String,
    pub repaired: bool,
    pub rows: Vec<RowObject>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
}

impl PipelineOutcome {
    pub fn succeeded(final_sql: String, rows: Vec<RowObject>, repaired: bool) -> Self {
        Self {
            final_sql,
            repaired,
            rows,
            error_message: None,
            error_code: None,
        }
    }

    pub fn database_failure(final_sql: String, error: DatabaseError) -> Self {
        Self {
            final_sql,
            repaired: false,
            rows: Vec::new(),
            error_message: Some(error.message),
            error_code: Some(error.code),
        }
    }

    pub fn aborted(error: &PipelineError) -> Self {
        Self {
            final_sql: error.last_sql().unwrap_or_default().to_string(),
            repaired: false,
            rows: Vec::new(),
            error_message: Some(error.to_string()),
            error_code: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.error_message.is_none()
    }
}

#[derive(Debug)]
pub enum PipelineError {
    EmptyQuestion,
    Catalog(GatewayError),
    Embedding(EmbeddingError),
    Retrieval(GatewayError),
    Generation {
        sql: Option<String>,
        source: LlmError,
    },
    Execution {
        sql: String,
        source: GatewayError,
    },
}

impl PipelineError {
    /// The statement in flight when the stage failed, if any.
    pub fn last_sql(&self) -> Option<&str> {
        match self {
            PipelineError::Generation { sql, .. } => sql.as_deref(),
            PipelineError::Execution { sql, .. } => Some(sql),
            _ => None,
        }
    }
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineError::EmptyQuestion => write!(f, "Question is empty"),
            PipelineError::Catalog(err) => write!(f, "Failed to load schema catalog: {}", err),
            PipelineError::Embedding(err) => write!(f, "Failed to embed question: {}", err),
            PipelineError::Retrieval(err) => {
                write!(f, "Failed to retrieve documentation: {}", err)
            }
            PipelineError::Generation { source, .. } => {
                write!(f, "Failed to generate SQL: {}", source)
            }
            PipelineError::Execution { source, .. } => {
                write!(f, "Failed to execute SQL: {}", source)
            }
        }
    }
}

impl Error for PipelineError {}

/// A completion that sanitizes to nothing is a generation failure, not a
/// statement to send to the database. `previous` is the statement being
/// repaired, if any.
pub(crate) fn require_statement(
    sql: String,
    previous: Option<&str>,
) -> Result<String, PipelineError> {
    if sql.is_empty() {
        return Err(PipelineError::Generation {
            sql: previous.map(str::to_string),
            source: LlmError::ResponseError(
                "Completion contained no SQL statement".to_string(),
            ),
        });
    }
    Ok(sql)
}

/// Question in, rows out: catalog, retrieval, generation, sanitizing,
/// guardrail, execution with one repair. Holds no per-request state.
pub struct Pipeline {
    catalog: SchemaCatalog,
    embedder: Arc<dyn Embedder>,
    retriever: ContextRetriever,
    prompts: PromptBuilder,
    completion: Arc<dyn CompletionClient>,
    sanitizer: SqlSanitizer,
    guard: Box<dyn SqlGuard>,
    executor: QueryExecutor,
    top_k: usize,
}

impl Pipeline {
    pub fn new(
        gateway: Arc<dyn DatabaseGateway>,
        embedder: Arc<dyn Embedder>,
        completion: Arc<dyn CompletionClient>,
    ) -> Self {
        Self {
            catalog: SchemaCatalog::new(gateway.clone(), None),
            embedder,
            retriever: ContextRetriever::new(gateway.clone()),
            prompts: PromptBuilder::new(RuleSet::clinic()),
            completion,
            sanitizer: SqlSanitizer::new(),
            guard: Box::new(PatternGuardrail::clinic()),
            executor: QueryExecutor::new(gateway),
            top_k: DEFAULT_TOP_K,
        }
    }

    pub fn from_config(
        config: &AppConfig,
        gateway: Arc<dyn DatabaseGateway>,
        embedder: Arc<dyn Embedder>,
        completion: Arc<dyn CompletionClient>,
    ) -> Self {
        let mut pipeline = Self::new(gateway.clone(), embedder, completion)
            .with_rules(RuleSet::from_config(&config.prompt))
            .with_top_k(config.retrieval.top_k);
        pipeline.catalog = SchemaCatalog::new(gateway, config.database.schema.clone());
        pipeline
    }

    pub fn with_rules(mut self, rules: RuleSet) -> Self {
        self.prompts = PromptBuilder::new(rules);
        self
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    pub fn rules_version(&self) -> &str {
        self.prompts.rules().version()
    }

    /// Never fails: stage errors become an outcome with `error_message` set.
    pub async fn answer(&self, question: &str) -> PipelineOutcome {
        let start_time = Instant::now();
        info!("Answering question: {}", question);

        match self.run(question.trim()).await {
            Ok(outcome) => {
                if outcome.is_success() {
                    info!(
                        "Answered in {}ms (repaired: {}, rows: {})",
                        start_time.elapsed().as_millis(),
                        outcome.repaired,
                        outcome.rows.len()
                    );
                } else {
                    warn!(
                        "Database rejected the final statement after {}ms: {}",
                        start_time.elapsed().as_millis(),
                        outcome.error_code.as_deref().unwrap_or_default()
                    );
                }
                outcome
            }
            Err(e) => {
                error!("Pipeline aborted: {}", e);
                PipelineOutcome::aborted(&e)
            }
        }
    }

    async fn run(&self, question: &str) -> Result<PipelineOutcome, PipelineError> {
        if question.is_empty() {
            return Err(PipelineError::EmptyQuestion);
        }

        let whitelist = self.catalog.fetch().await.map_err(PipelineError::Catalog)?;
        if whitelist.is_empty() {
            warn!("Schema {} has no tables; generation will be blind", whitelist.schema());
        }

        let vector = self
            .embedder
            .embed(question, EmbeddingKind::Query)
            .await
            .map_err(PipelineError::Embedding)?;

        let snippets = self
            .retriever
            .retrieve(&vector, self.top_k)
            .await
            .map_err(PipelineError::Retrieval)?;

        info!(
            "Generating SQL against {} tables with {} snippets",
            whitelist.tables().len(),
            snippets.len()
        );
        let prompt = self.prompts.build(question, &snippets, &whitelist);
        let raw = self
            .completion
            .complete(&prompt)
            .await
            .map_err(|source| PipelineError::Generation { sql: None, source })?;

        let cleaned = require_statement(self.sanitizer.clean(&raw), None)?;
        let sql = self.guard.validate(&cleaned, question);

        let repair = RepairLoop {
            executor: &self.executor,
            completion: self.completion.as_ref(),
            prompts: &self.prompts,
            sanitizer: &self.sanitizer,
        };
        let context = GenerationContext {
            question,
            whitelist: &whitelist,
            snippets: &snippets,
        };
        repair.run(&context, sql).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{clinic_gateway, FakeGateway, ScriptedCompletion, StaticEmbedder};
    use serde_json::json;

    const NEXT_APPOINTMENTS: &str = "List 5 patients with their next appointment after today";

    fn clinic_pipeline(
        completion: Arc<ScriptedCompletion>,
        embedder: Arc<StaticEmbedder>,
    ) -> Pipeline {
        Pipeline::new(Arc::new(clinic_gateway()), embedder, completion)
    }

    #[tokio::test]
    async fn guardrail_substitutes_canonical_statement() {
        let completion = Arc::new(ScriptedCompletion::new(&[
            "```sql\nSELECT p.name, p.next_appointment FROM patients p LIMIT 5;\n```",
        ]));
        let pipeline = clinic_pipeline(completion.clone(), Arc::new(StaticEmbedder::new(vec![1.0, 0.0])));

        let outcome = pipeline.answer(NEXT_APPOINTMENTS).await;

        assert!(outcome.is_success(), "{:?}", outcome.error_message);
        assert!(!outcome.repaired);
        assert!(outcome.final_sql.contains("p.full_name"));
        assert!(!outcome.final_sql.contains("p.name"));
        assert_eq!(outcome.rows.len(), 5);

        let names: Vec<&str> = outcome
            .rows
            .iter()
            .map(|row| row["full_name"].as_str().unwrap())
            .collect();
        assert_eq!(
            names,
            vec![
                "Edsger Dijkstra",
                "Alan Turing",
                "Grace Hopper",
                "Ada Lovelace",
                "Barbara Liskov"
            ]
        );
        // Cancelled and past appointments do not count.
        let ada_next = outcome.rows[3]["next_starts_at"].as_str().unwrap();
        assert!(ada_next.starts_with("2099-03-01"), "{}", ada_next);
        assert_eq!(completion.calls(), 1);
    }

    #[tokio::test]
    async fn missing_column_is_repaired() {
        let first = "SELECT p.full_name, p.nickname FROM patients p ORDER BY p.id LIMIT 3";
        let completion = Arc::new(ScriptedCompletion::new(&[
            first,
            "SELECT p.full_name FROM patients p ORDER BY p.id LIMIT 3;",
        ]));
        let pipeline = clinic_pipeline(completion.clone(), Arc::new(StaticEmbedder::new(vec![1.0, 0.0])));

        let outcome = pipeline.answer("Show the first three patients").await;

        assert!(outcome.repaired);
        assert_ne!(outcome.final_sql, first);
        assert_eq!(
            outcome.final_sql,
            "SELECT p.full_name FROM patients p ORDER BY p.id LIMIT 3"
        );
        assert_eq!(outcome.rows.len(), 3);
        assert_eq!(completion.calls(), 2);

        let repair_prompt = &completion.prompts()[1];
        assert!(repair_prompt.contains("### Previous attempt"));
        assert!(repair_prompt.contains("42703"));
    }

    #[tokio::test]
    async fn catalog_failure_aborts_before_generation() {
        let completion = Arc::new(ScriptedCompletion::new(&["SELECT 1"]));
        let embedder = Arc::new(StaticEmbedder::new(vec![1.0, 0.0]));
        let pipeline = Pipeline::new(
            Arc::new(FakeGateway::unreachable()),
            embedder.clone(),
            completion.clone(),
        );

        let outcome = pipeline.answer(NEXT_APPOINTMENTS).await;

        assert!(!outcome.error_message.as_deref().unwrap_or_default().is_empty());
        assert!(outcome.rows.is_empty());
        assert!(!outcome.repaired);
        assert_eq!(outcome.final_sql, "");
        assert_eq!(embedder.calls(), 0);
        assert_eq!(completion.calls(), 0);
    }

    #[tokio::test]
    async fn generation_failure_becomes_an_outcome() {
        let completion = Arc::new(ScriptedCompletion::new(&[]));
        let pipeline = clinic_pipeline(completion, Arc::new(StaticEmbedder::new(vec![1.0, 0.0])));

        let outcome = pipeline.answer("How many patients are there?").await;

        assert!(outcome.error_message.unwrap().starts_with("Failed to generate SQL"));
        assert!(outcome.rows.is_empty());
    }

    #[tokio::test]
    async fn empty_fence_is_a_generation_failure() {
        let completion = Arc::new(ScriptedCompletion::new(&["```sql\n```"]));
        let pipeline = clinic_pipeline(completion, Arc::new(StaticEmbedder::new(vec![1.0, 0.0])));

        let outcome = pipeline.answer("How many patients are there?").await;

        let message = outcome.error_message.unwrap();
        assert!(message.starts_with("Failed to generate SQL"), "{}", message);
        assert!(message.contains("no SQL statement"));
        assert_eq!(outcome.error_code, None);
        assert_eq!(outcome.final_sql, "");
    }

    #[tokio::test]
    async fn repaired_statement_skips_the_guardrail() {
        let completion = Arc::new(ScriptedCompletion::new(&[
            "SELECT nickname FROM patients ORDER BY id LIMIT 2",
            "SELECT full_name AS name FROM patients ORDER BY id LIMIT 2",
        ]));
        let pipeline = clinic_pipeline(completion.clone(), Arc::new(StaticEmbedder::new(vec![1.0, 0.0])));

        let outcome = pipeline.answer("Show two patient names").await;

        assert!(outcome.repaired);
        assert_eq!(
            outcome.final_sql,
            "SELECT full_name AS name FROM patients ORDER BY id LIMIT 2"
        );
        assert_ne!(outcome.final_sql, PatternGuardrail::clinic().fallback_sql());
        assert_eq!(outcome.rows[0]["name"], "Ada Lovelace");
        assert_eq!(completion.calls(), 2);
    }

    #[tokio::test]
    async fn blank_question_is_rejected() {
        let completion = Arc::new(ScriptedCompletion::new(&["SELECT 1"]));
        let pipeline = clinic_pipeline(completion.clone(), Arc::new(StaticEmbedder::new(vec![1.0])));

        let outcome = pipeline.answer("   ").await;

        assert_eq!(outcome.error_message.as_deref(), Some("Question is empty"));
        assert_eq!(completion.calls(), 0);
    }

    #[tokio::test]
    async fn prompt_carries_whitelist_and_rules() {
        let completion = Arc::new(ScriptedCompletion::new(&["SELECT count(*) AS n FROM patients"]));
        let pipeline = clinic_pipeline(completion.clone(), Arc::new(StaticEmbedder::new(vec![1.0, 0.0])));

        let outcome = pipeline.answer("How many patients are there?").await;
        assert_eq!(outcome.rows[0]["n"], json!(7));

        let prompt = &completion.prompts()[0];
        assert!(prompt.contains("patients: id, full_name"));
        assert!(prompt.contains("### Rules (clinic-v1)"));
        assert!(prompt.contains("How many patients are there?"));
        assert!(!prompt.contains("schema_docs"));
    }

    #[test]
    fn outcome_serializes_in_camel_case() {
        let outcome = PipelineOutcome::database_failure(
            "SELECT x FROM t".to_string(),
            DatabaseError {
                code: "42P01".to_string(),
                message: "relation \"t\" does not exist".to_string(),
            },
        );

        assert_eq!(
            serde_json::to_value(&outcome).unwrap(),
            json!({
                "finalSql": "SELECT x FROM t",
                "repaired": false,
                "rows": [],
                "errorMessage": "relation \"t\" does not exist",
                "errorCode": "42P01"
            })
        );

        let ok = PipelineOutcome::succeeded("SELECT 1".to_string(), Vec::new(), false);
        assert_eq!(
            serde_json::to_value(&ok).unwrap(),
            json!({ "finalSql": "SELECT 1", "repaired": false, "rows": [] })
        );
    }
}
