use crate::db::{ContextSnippet, DatabaseGateway, GatewayError};
use std::sync::Arc;
use tracing::info;

pub const DEFAULT_TOP_K: usize = 6;

/// Top-K documentation snippets for a query vector. Ranking is the
/// database's; results are neither re-ranked nor deduplicated.
pub struct ContextRetriever {
    gateway: Arc<dyn DatabaseGateway>,
}

impl ContextRetriever {
    pub fn new(gateway: Arc<dyn DatabaseGateway>) -> Self {
        Self { gateway }
    }

    pub async fn retrieve(
        &self,
        vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<ContextSnippet>, GatewayError> {
        let mut snippets = self.gateway.match_snippets(vector, top_k).await?;
        snippets.truncate(top_k);

        info!("Retrieved {} context snippets (top_k={})", snippets.len(), top_k);
        Ok(snippets)
    }
}
