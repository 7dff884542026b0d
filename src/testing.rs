//! Fixtures shared by the unit tests.

use crate::config::AppConfig;
use crate::db::duckdb_gateway::DuckDbGateway;
use crate::db::schema_catalog::SchemaWhitelist;
use crate::db::{ContextSnippet, DatabaseGateway, ExecutionResult, GatewayError, TableColumns};
use crate::llm::{CompletionClient, LlmError};
use crate::rag::embedding::{Embedder, EmbeddingError, EmbeddingKind};
use crate::sql::prompt::GenerationPrompt;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

const CLINIC_SEED: &str = "
CREATE TABLE patients (id INTEGER PRIMARY KEY, full_name VARCHAR NOT NULL);
CREATE TABLE appointments (
    id INTEGER PRIMARY KEY,
    patient_id INTEGER NOT NULL,
    starts_at TIMESTAMP NOT NULL,
    status VARCHAR NOT NULL
);
INSERT INTO patients VALUES
    (1, 'Ada Lovelace'),
    (2, 'Alan Turing'),
    (3, 'Grace Hopper'),
    (4, 'Edsger Dijkstra'),
    (5, 'Barbara Liskov'),
    (6, 'Donald Knuth'),
    (7, 'Margaret Hamilton');
INSERT INTO appointments VALUES
    (1, 1, TIMESTAMP '2000-01-10 09:00:00', 'scheduled'),
    (2, 1, TIMESTAMP '2099-03-01 09:00:00', 'scheduled'),
    (3, 1, TIMESTAMP '2099-01-15 09:00:00', 'cancelled'),
    (4, 2, TIMESTAMP '2099-01-20 10:00:00', 'scheduled'),
    (5, 2, TIMESTAMP '2099-06-01 10:00:00', 'scheduled'),
    (6, 3, TIMESTAMP '2099-02-10 11:00:00', 'scheduled'),
    (7, 4, TIMESTAMP '2099-01-05 08:30:00', 'scheduled'),
    (8, 5, TIMESTAMP '2099-04-12 14:00:00', 'scheduled'),
    (9, 6, TIMESTAMP '2099-05-30 15:00:00', 'scheduled'),
    (10, 7, TIMESTAMP '2001-07-07 16:00:00', 'scheduled');
";

/// In-memory DuckDB with the clinic tables and an empty documentation table.
pub fn clinic_gateway() -> DuckDbGateway {
    let mut config = AppConfig::default().database;
    config.connection_string = ":memory:".to_string();
    config.pool_size = 2;

    let gateway = DuckDbGateway::open(&config).unwrap();
    gateway.execute_batch(CLINIC_SEED).unwrap();
    gateway
}

pub fn clinic_whitelist() -> SchemaWhitelist {
    SchemaWhitelist::new(
        "main",
        vec![
            TableColumns {
                table: "appointments".to_string(),
                columns: vec!["id", "patient_id", "starts_at", "status"]
                    .into_iter()
                    .map(String::from)
                    .collect(),
            },
            TableColumns {
                table: "patients".to_string(),
                columns: vec!["id".to_string(), "full_name".to_string()],
            },
        ],
    )
}

/// Gateway returning canned data, or failing every call when unreachable.
#[derive(Default)]
pub struct FakeGateway {
    catalog: Vec<TableColumns>,
    snippets: Vec<ContextSnippet>,
    exec: ExecutionResult,
    unreachable: bool,
}

impl FakeGateway {
    pub fn with_catalog(catalog: Vec<TableColumns>) -> Self {
        Self {
            catalog,
            ..Self::default()
        }
    }

    pub fn with_snippets(snippets: Vec<ContextSnippet>) -> Self {
        Self {
            snippets,
            ..Self::default()
        }
    }

    pub fn with_exec_error(code: &str, message: &str) -> Self {
        Self {
            catalog: clinic_whitelist().tables().to_vec(),
            exec: ExecutionResult::failed(code, message),
            ..Self::default()
        }
    }

    pub fn unreachable() -> Self {
        Self {
            unreachable: true,
            ..Self::default()
        }
    }

    fn check(&self) -> Result<(), GatewayError> {
        if self.unreachable {
            Err(GatewayError::Transport("connection refused".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl DatabaseGateway for FakeGateway {
    fn backend(&self) -> &'static str {
        "fake"
    }

    fn default_schema(&self) -> &'static str {
        "public"
    }

    async fn fetch_columns(&self, _schema: &str) -> Result<Vec<TableColumns>, GatewayError> {
        self.check()?;
        Ok(self.catalog.clone())
    }

    async fn match_snippets(
        &self,
        _embedding: &[f32],
        _match_count: usize,
    ) -> Result<Vec<ContextSnippet>, GatewayError> {
        self.check()?;
        Ok(self.snippets.clone())
    }

    async fn exec_sql(&self, _sql: &str) -> Result<ExecutionResult, GatewayError> {
        self.check()?;
        Ok(self.exec.clone())
    }

    async fn store_snippet(&self, _content: &str, _embedding: &[f32]) -> Result<(), GatewayError> {
        self.check()
    }
}

/// Returns the same vector for every text and counts calls.
pub struct StaticEmbedder {
    vector: Vec<f32>,
    calls: AtomicUsize,
}

impl StaticEmbedder {
    pub fn new(vector: Vec<f32>) -> Self {
        Self {
            vector,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Embedder for StaticEmbedder {
    async fn embed(&self, _text: &str, _kind: EmbeddingKind) -> Result<Vec<f32>, EmbeddingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.vector.clone())
    }
}

/// Replays canned model outputs in order and records every prompt it saw.
pub struct ScriptedCompletion {
    responses: Mutex<VecDeque<String>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedCompletion {
    pub fn new(responses: &[&str]) -> Self {
        Self {
            responses: Mutex::new(responses.iter().map(|r| r.to_string()).collect()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl CompletionClient for ScriptedCompletion {
    async fn complete(&self, prompt: &GenerationPrompt) -> Result<String, LlmError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| LlmError::ResponseError("script exhausted".to_string()))
    }
}
