use crate::config::DatabaseConfig;
use crate::db::{
    ContextSnippet, DatabaseError, DatabaseGateway, ExecutionResult, GatewayError, RowObject,
    TableColumns,
};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, error};

/// Gateway for a PostgREST-style HTTP front (Supabase and friends), where the
/// catalog, similarity search and read-only execution are exposed as RPC
/// functions.
pub struct PostgrestGateway {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    catalog_fn: String,
    match_fn: String,
    exec_fn: String,
    docs_table: String,
}

impl PostgrestGateway {
    pub fn new(config: &DatabaseConfig) -> Result<Self, GatewayError> {
        let api_url = config.api_url.clone().ok_or_else(|| {
            GatewayError::Backend("API URL is required for the postgrest backend".to_string())
        })?;

        let api_key = config.api_key.clone().ok_or_else(|| {
            GatewayError::Backend("API key is required for the postgrest backend".to_string())
        })?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            base_url: api_url.trim_end_matches('/').to_string(),
            api_key,
            catalog_fn: config.catalog_fn.clone(),
            match_fn: config.match_fn.clone(),
            exec_fn: config.exec_fn.clone(),
            docs_table: config.docs_table.clone(),
        })
    }

    async fn post(&self, path: &str, body: &Value) -> Result<reqwest::Response, GatewayError> {
        let url = format!("{}/rest/v1/{}", self.base_url, path);
        debug!("POST {}", url);

        self.client
            .post(&url)
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))
    }

    async fn rpc<T: DeserializeOwned>(&self, function: &str, body: Value) -> Result<T, GatewayError> {
        let response = self.post(&format!("rpc/{}", function), &body).await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            error!("RPC {} failed with {}: {}", function, status, text);
            return Err(GatewayError::Backend(format!(
                "RPC {} responded with status code: {} - {}",
                function, status, text
            )));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| GatewayError::Backend(format!("RPC {} returned unexpected body: {}", function, e)))
    }
}

#[async_trait]
impl DatabaseGateway for PostgrestGateway {
    fn backend(&self) -> &'static str {
        "postgrest"
    }

    fn default_schema(&self) -> &'static str {
        "public"
    }

    async fn fetch_columns(&self, schema: &str) -> Result<Vec<TableColumns>, GatewayError> {
        self.rpc(&self.catalog_fn, json!({ "target_schema": schema }))
            .await
    }

    async fn match_snippets(
        &self,
        embedding: &[f32],
        match_count: usize,
    ) -> Result<Vec<ContextSnippet>, GatewayError> {
        self.rpc(
            &self.match_fn,
            json!({ "query_embedding": embedding, "match_count": match_count }),
        )
        .await
    }

    async fn exec_sql(&self, sql: &str) -> Result<ExecutionResult, GatewayError> {
        let response = self
            .post(&format!("rpc/{}", self.exec_fn), &json!({ "query": sql }))
            .await?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| GatewayError::Transport(format!("Failed to read response body: {}", e)))?;

        if status.is_success() {
            // json_agg over zero rows yields null
            let rows: Option<Vec<RowObject>> = serde_json::from_str(&text).map_err(|e| {
                GatewayError::Backend(format!("exec_sql returned unexpected body: {} - {}", e, text))
            })?;
            return Ok(ExecutionResult::ok(rows.unwrap_or_default()));
        }

        // PostgREST relays the Postgres SQLSTATE and message for statement errors
        match serde_json::from_str::<DatabaseError>(&text) {
            Ok(db_error) => Ok(ExecutionResult {
                rows: Vec::new(),
                error: Some(db_error),
            }),
            Err(_) => Err(GatewayError::Transport(format!(
                "exec_sql responded with status code: {} - {}",
                status, text
            ))),
        }
    }

    async fn store_snippet(&self, content: &str, embedding: &[f32]) -> Result<(), GatewayError> {
        let response = self
            .post(
                &self.docs_table,
                &json!({ "content": content, "embedding": embedding }),
            )
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(GatewayError::Backend(format!(
                "Storing snippet responded with status code: {} - {}",
                status, text
            )));
        }

        Ok(())
    }
}
