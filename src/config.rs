use clap::Parser;
use config::{Config, ConfigError, Environment, File, FileFormat};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::sql::prompt::PromptRule;

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub backend: String, // "duckdb" or "postgrest"
    pub connection_string: String,
    pub pool_size: usize,
    pub schema: Option<String>,
    pub api_url: Option<String>,
    pub api_key: Option<String>,
    pub catalog_fn: String,
    pub match_fn: String,
    pub exec_fn: String,
    pub docs_table: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    pub api_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub dimension: usize,
    /// Wait before the single retry after a throttling response
    pub backoff_secs: u64,
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    pub backend: String, // "remote" or "ollama"
    pub model: String,
    pub api_key: Option<String>,
    pub api_url: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    pub top_k: usize,
}

/// Optional replacement for the built-in domain rules.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct PromptConfig {
    pub version: Option<String>,
    pub rules: Option<Vec<PromptRule>>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct WebConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub embedding: EmbeddingConfig,
    pub llm: LlmConfig,
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub prompt: PromptConfig,
    pub web: WebConfig,
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct CliArgs {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Host to bind to
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Answer a single question, print the outcome as JSON and exit
    #[arg(short, long, value_name = "QUESTION", conflicts_with = "ingest")]
    pub question: Option<String>,

    /// Index a schema documentation file (snippets separated by blank lines) and exit
    #[arg(long, value_name = "FILE")]
    pub ingest: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long)]
    pub log_json: bool,
}

impl AppConfig {
    pub fn new(args: &CliArgs) -> Result<Self, ConfigError> {
        let mut config_builder = Self::defaults()?;

        // Add configuration from file if specified
        if let Some(config_path) = &args.config {
            config_builder = config_builder.add_source(File::from(config_path.as_path()));
        } else {
            // Check for config in default locations
            let default_locations = vec![
                "config.toml",
                "config/config.toml",
                "/etc/nl-sql-rag/config.toml",
            ];

            for location in default_locations {
                if Path::new(location).exists() {
                    config_builder = config_builder.add_source(File::new(location, FileFormat::Toml));
                    break;
                }
            }
        }

        // Credentials come from the environment, e.g. NLSQL__LLM__API_KEY
        config_builder = config_builder.add_source(
            Environment::with_prefix("NLSQL")
                .prefix_separator("__")
                .separator("__"),
        );

        let mut config: AppConfig = config_builder.build()?.try_deserialize()?;

        // Override with command line args if provided
        if let Some(host) = &args.host {
            config.web.host = host.clone();
        }
        if let Some(port) = args.port {
            config.web.port = port;
        }

        Ok(config)
    }

    /// Builder pre-seeded with every default so a config file only needs to
    /// name what it changes.
    fn defaults() -> Result<config::ConfigBuilder<config::builder::DefaultState>, ConfigError> {
        Config::builder()
            .set_default("database.backend", "duckdb")?
            .set_default("database.connection_string", "nl-sql-rag.duckdb")?
            .set_default("database.pool_size", 5)?
            .set_default("database.catalog_fn", "list_schema_columns")?
            .set_default("database.match_fn", "match_schema_docs")?
            .set_default("database.exec_fn", "exec_sql")?
            .set_default("database.docs_table", "schema_docs")?
            .set_default("database.timeout_secs", 30)?
            .set_default("embedding.api_url", "https://api.voyageai.com/v1/embeddings")?
            .set_default("embedding.model", "voyage-3.5")?
            .set_default("embedding.dimension", 1024)?
            .set_default("embedding.backoff_secs", 25)?
            .set_default("embedding.timeout_secs", 30)?
            .set_default("llm.backend", "remote")?
            .set_default("llm.model", "gpt-4o-mini")?
            .set_default("retrieval.top_k", 6)?
            .set_default("web.host", "127.0.0.1")?
            .set_default("web.port", 3000)
    }

    #[cfg(test)]
    pub fn from_toml(toml: &str) -> Result<Self, ConfigError> {
        Self::defaults()?
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()?
            .try_deserialize()
    }
}

// Default implementation
impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                backend: "duckdb".to_string(),
                connection_string: "nl-sql-rag.duckdb".to_string(),
                pool_size: 5,
                schema: None,
                api_url: None,
                api_key: None,
                catalog_fn: "list_schema_columns".to_string(),
                match_fn: "match_schema_docs".to_string(),
                exec_fn: "exec_sql".to_string(),
                docs_table: "schema_docs".to_string(),
                timeout_secs: 30,
            },
            embedding: EmbeddingConfig {
                api_url: "https://api.voyageai.com/v1/embeddings".to_string(),
                api_key: None,
                model: "voyage-3.5".to_string(),
                dimension: 1024,
                backoff_secs: 25,
                timeout_secs: 30,
            },
            llm: LlmConfig {
                backend: "remote".to_string(),
                model: "gpt-4o-mini".to_string(),
                api_key: None,
                api_url: None,
            },
            retrieval: RetrievalConfig { top_k: 6 },
            prompt: PromptConfig::default(),
            web: WebConfig {
                host: "127.0.0.1".to_string(),
                port: 3000,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_yields_defaults() {
        let config = AppConfig::from_toml("").unwrap();
        let default = AppConfig::default();

        assert_eq!(config.database.backend, default.database.backend);
        assert_eq!(config.embedding.backoff_secs, 25);
        assert_eq!(config.embedding.dimension, 1024);
        assert_eq!(config.retrieval.top_k, 6);
        assert_eq!(config.web.port, 3000);
        assert!(config.prompt.rules.is_none());
    }

    #[test]
    fn file_overrides_sections_and_rules() {
        let config = AppConfig::from_toml(
            r#"
            [database]
            backend = "postgrest"
            api_url = "https://db.example.com"

            [retrieval]
            top_k = 3

            [prompt]
            version = "billing-v2"

            [[prompt.rules]]
            name = "invoice-total"
            text = "Invoice totals live in invoices.amount_cents."
            "#,
        )
        .unwrap();

        assert_eq!(config.database.backend, "postgrest");
        assert_eq!(config.database.api_url.as_deref(), Some("https://db.example.com"));
        assert_eq!(config.database.exec_fn, "exec_sql");
        assert_eq!(config.retrieval.top_k, 3);
        assert_eq!(config.prompt.version.as_deref(), Some("billing-v2"));
        let rules = config.prompt.rules.unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].name, "invoice-total");
    }
}
