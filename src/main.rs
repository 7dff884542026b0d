use clap::Parser;
use std::sync::Arc;
use tracing::{error, info};

mod config;
mod db;
mod llm;
mod pipeline;
mod rag;
mod sql;
mod util;
mod web;

#[cfg(test)]
mod testing;

use crate::config::{AppConfig, CliArgs};
use crate::llm::LlmManager;
use crate::pipeline::Pipeline;
use crate::rag::embedding::EmbeddingClient;
use crate::rag::ingest::DocumentIndexer;
use crate::util::logging::init_tracing;
use crate::web::state::AppState;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Parse command line arguments
    let args = CliArgs::parse();

    // Initialize logging
    init_tracing(args.log_json);

    // Load configuration
    let config = match AppConfig::new(&args) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    info!("Connecting to {} database gateway", config.database.backend);
    let gateway = db::connect(&config.database)?;

    let embedder = Arc::new(EmbeddingClient::new(&config.embedding)?);
    info!(
        "Initialized embedding client with model: {} ({} dimensions)",
        config.embedding.model,
        embedder.dimension()
    );

    if let Some(path) = &args.ingest {
        let indexer = DocumentIndexer::new(embedder, gateway);
        let count = indexer.index_file(path).await?;
        info!("Ingestion finished: {} snippets stored", count);
        return Ok(());
    }

    // Initialize LLM manager
    info!("Initializing LLM manager with backend: {}", config.llm.backend);
    let llm_manager = Arc::new(LlmManager::new(&config.llm)?);

    let backend = gateway.backend();
    let pipeline = Pipeline::from_config(&config, gateway, embedder, llm_manager);
    info!("Prompt rules version: {}", pipeline.rules_version());

    if let Some(question) = &args.question {
        let outcome = pipeline.answer(question).await;
        println!("{}", serde_json::to_string_pretty(&outcome)?);
        return Ok(());
    }

    let app_state = Arc::new(AppState::new(pipeline, backend));

    // Start the web server
    info!("Starting server on {}:{}", config.web.host, config.web.port);
    match web::run_server(config.web, app_state).await {
        Ok(_) => info!("Server stopped gracefully"),
        Err(e) => {
            error!("Server error: {}", e);
            return Err(e.into());
        }
    }

    Ok(())
}
