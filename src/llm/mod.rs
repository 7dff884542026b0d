pub mod providers;

use crate::config::LlmConfig;
use crate::sql::prompt::GenerationPrompt;
use async_trait::async_trait;
use std::error::Error;
use std::fmt;

/// System instruction sent with every generation request.
pub const SQL_ONLY_INSTRUCTION: &str = "You translate questions into PostgreSQL. \
Reply with exactly one SQL statement and nothing else: no prose, no markdown, no comments.";

#[derive(Debug)]
pub enum LlmError {
    ConnectionError(String),
    ResponseError(String),
    ConfigError(String),
}

impl fmt::Display for LlmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LlmError::ConnectionError(msg) => write!(f, "LLM connection error: {}", msg),
            LlmError::ResponseError(msg) => write!(f, "LLM response error: {}", msg),
            LlmError::ConfigError(msg) => write!(f, "LLM configuration error: {}", msg),
        }
    }
}

impl Error for LlmError {}

/// One deterministic completion per call. No retries at this layer.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn complete(&self, prompt: &GenerationPrompt) -> Result<String, LlmError>;
}

pub struct LlmManager {
    client: Box<dyn CompletionClient + Send + Sync>,
}

impl LlmManager {
    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        let client: Box<dyn CompletionClient + Send + Sync> = match config.backend.as_str() {
            "remote" => Box::new(providers::remote::RemoteLlmProvider::new(config)?),
            "ollama" => Box::new(providers::ollama::OllamaProvider::new(config)?),
            _ => {
                return Err(LlmError::ConfigError(format!(
                    "Unsupported LLM backend: {}",
                    config.backend
                )))
            }
        };

        Ok(Self { client })
    }
}

#[async_trait]
impl CompletionClient for LlmManager {
    async fn complete(&self, prompt: &GenerationPrompt) -> Result<String, LlmError> {
        self.client.complete(prompt).await
    }
}

/// Rejects blank completions so callers never sanitize nothing.
pub(crate) fn usable_text(content: Option<String>) -> Result<String, LlmError> {
    match content {
        Some(text) if !text.trim().is_empty() => Ok(text),
        _ => Err(LlmError::ResponseError(
            "Completion contained no usable text".to_string(),
        )),
    }
}
