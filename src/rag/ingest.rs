use crate::db::DatabaseGateway;
use crate::rag::embedding::{Embedder, EmbeddingKind};
use std::error::Error;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug)]
pub enum IngestError {
    IoError(std::io::Error),
    EmbeddingError(String),
    DatabaseError(String),
}

impl fmt::Display for IngestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IngestError::IoError(err) => write!(f, "IO error: {}", err),
            IngestError::EmbeddingError(msg) => write!(f, "Embedding error: {}", msg),
            IngestError::DatabaseError(msg) => write!(f, "Database error: {}", msg),
        }
    }
}

impl Error for IngestError {}

impl From<std::io::Error> for IngestError {
    fn from(err: std::io::Error) -> Self {
        IngestError::IoError(err)
    }
}

/// Loads schema documentation into the similarity-search table.
pub struct DocumentIndexer {
    embedder: Arc<dyn Embedder>,
    gateway: Arc<dyn DatabaseGateway>,
}

impl DocumentIndexer {
    pub fn new(embedder: Arc<dyn Embedder>, gateway: Arc<dyn DatabaseGateway>) -> Self {
        Self { embedder, gateway }
    }

    pub async fn index_file(&self, path: &Path) -> Result<usize, IngestError> {
        info!("Indexing documentation from {}", path.display());
        let text = tokio::fs::read_to_string(path).await?;
        self.index(&text).await
    }

    /// Embeds and stores every snippet; stops at the first failure.
    pub async fn index(&self, text: &str) -> Result<usize, IngestError> {
        let snippets = split_snippets(text);

        for (i, snippet) in snippets.iter().enumerate() {
            let vector = self
                .embedder
                .embed(snippet, EmbeddingKind::Document)
                .await
                .map_err(|e| IngestError::EmbeddingError(format!("snippet {}: {}", i + 1, e)))?;

            self.gateway
                .store_snippet(snippet, &vector)
                .await
                .map_err(|e| IngestError::DatabaseError(format!("snippet {}: {}", i + 1, e)))?;
            debug!("Stored snippet {} of {}", i + 1, snippets.len());
        }

        info!("Indexed {} documentation snippets", snippets.len());
        Ok(snippets.len())
    }
}

/// Blank-line separated paragraphs, trimmed, empties dropped.
pub fn split_snippets(text: &str) -> Vec<String> {
    let mut snippets = Vec::new();
    let mut current: Vec<&str> = Vec::new();

    for line in text.lines() {
        if line.trim().is_empty() {
            if !current.is_empty() {
                snippets.push(current.join("\n").trim().to_string());
                current.clear();
            }
        } else {
            current.push(line);
        }
    }
    if !current.is_empty() {
        snippets.push(current.join("\n").trim().to_string());
    }

    snippets
}
