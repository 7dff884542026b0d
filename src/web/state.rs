use crate::pipeline::Pipeline;

/// Shared application state for the web server
pub struct AppState {
    pub pipeline: Pipeline,
    pub backend: &'static str,
    pub startup_time: chrono::DateTime<chrono::Utc>,
}

impl AppState {
    pub fn new(pipeline: Pipeline, backend: &'static str) -> Self {
        Self {
            pipeline,
            backend,
            startup_time: chrono::Utc::now(),
        }
    }
}
