use crate::config::EmbeddingConfig;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Substrings (matched case-insensitively) that mark a throttling failure.
pub const THROTTLE_SIGNALS: &[&str] = &["429", "rate", "reduced rate", "payment method"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbeddingKind {
    Query,
    Document,
}

impl EmbeddingKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EmbeddingKind::Query => "query",
            EmbeddingKind::Document => "document",
        }
    }
}

#[derive(Debug)]
pub struct EmbeddingError(pub String);

impl fmt::Display for EmbeddingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Embedding error: {}", self.0)
    }
}

impl Error for EmbeddingError {}

#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str, kind: EmbeddingKind) -> Result<Vec<f32>, EmbeddingError>;
}

pub fn is_throttle_signal(message: &str) -> bool {
    let lower = message.to_lowercase();
    THROTTLE_SIGNALS.iter().any(|signal| lower.contains(signal))
}

#[derive(Serialize, Debug)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: Vec<&'a str>,
    input_type: &'static str,
    output_dimension: usize,
}

#[derive(Deserialize, Debug)]
struct EmbeddingResponse {
    #[serde(default)]
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize, Debug)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

/// HTTP embedding client. A throttled call is retried once after a fixed
/// backoff; nothing else is retried.
pub struct EmbeddingClient {
    client: reqwest::Client,
    api_url: String,
    api_key: Option<String>,
    model: String,
    dimension: usize,
    backoff: Duration,
}

impl EmbeddingClient {
    pub fn new(config: &EmbeddingConfig) -> Result<Self, EmbeddingError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| EmbeddingError(e.to_string()))?;

        Ok(Self {
            client,
            api_url: config.api_url.clone(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            dimension: config.dimension,
            backoff: Duration::from_secs(config.backoff_secs),
        })
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    async fn request(&self, text: &str, kind: EmbeddingKind) -> Result<Vec<f32>, String> {
        let body = EmbeddingRequest {
            model: &self.model,
            input: vec![text],
            input_type: kind.as_str(),
            output_dimension: self.dimension,
        };

        let mut request = self.client.post(&self.api_url).json(&body);
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request.send().await.map_err(|e| e.to_string())?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| format!("Failed to read response body: {}", e))?;

        if !status.is_success() {
            return Err(format!(
                "Embedding service responded with status code: {} - {}",
                status, text
            ));
        }

        let parsed: EmbeddingResponse = serde_json::from_str(&text)
            .map_err(|e| format!("Unexpected embedding response: {} - {}", e, text))?;

        let vector = parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| format!("Embedding response contained no vectors: {}", text))?;

        if vector.len() != self.dimension {
            return Err(format!(
                "Expected a {}-dimensional embedding, got {}",
                self.dimension,
                vector.len()
            ));
        }

        Ok(vector)
    }

    #[cfg(test)]
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }
}

#[async_trait]
impl Embedder for EmbeddingClient {
    async fn embed(&self, text: &str, kind: EmbeddingKind) -> Result<Vec<f32>, EmbeddingError> {
        debug!("Embedding {} text ({} chars)", kind.as_str(), text.len());

        match self.request(text, kind).await {
            Ok(vector) => Ok(vector),
            Err(message) if is_throttle_signal(&message) => {
                warn!(
                    "Embedding service throttled, retrying once in {}s: {}",
                    self.backoff.as_secs(),
                    message
                );
                tokio::time::sleep(self.backoff).await;

                let vector = self.request(text, kind).await.map_err(EmbeddingError)?;
                info!("Embedding retry succeeded");
                Ok(vector)
            }
            Err(message) => Err(EmbeddingError(message)),
        }
    }
}
