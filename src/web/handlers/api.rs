use axum::{extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use crate::pipeline::PipelineOutcome;
use crate::web::state::AppState;

#[derive(Debug, Deserialize)]
pub struct AnswerRequest {
    pub question: String,
}

#[derive(Debug, Serialize)]
pub struct SystemStatus {
    pub version: String,
    pub uptime_seconds: i64,
    pub backend: String,
    pub rules_version: String,
}

/// Runs the pipeline. Stage failures are reported inside the outcome, so
/// anything past request validation answers 200.
pub async fn answer(
    State(app_state): State<Arc<AppState>>,
    Json(payload): Json<AnswerRequest>,
) -> Result<Json<PipelineOutcome>, (StatusCode, String)> {
    debug!("Answer request: {}", payload.question);

    if payload.question.trim().is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            "Question must not be empty".to_string(),
        ));
    }

    Ok(Json(app_state.pipeline.answer(&payload.question).await))
}

pub async fn system_status(state: State<Arc<AppState>>) -> Json<SystemStatus> {
    let now = chrono::Utc::now();
    let uptime = now.signed_duration_since(state.startup_time).num_seconds();

    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: uptime,
        backend: state.backend.to_string(),
        rules_version: state.pipeline.rules_version().to_string(),
    })
}
