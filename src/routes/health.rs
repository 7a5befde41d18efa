use axum::{extract::State, response::Json as ResponseJson, routing::get, Json, Router};

use crate::models::{AppState, HealthResponse};

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health_check))
        .with_state(state)
}

async fn health_check(State(state): State<AppState>) -> ResponseJson<HealthResponse> {
    let readiness = state.pipeline.readiness();

    let response = HealthResponse {
        status: if readiness.is_ready() { "ok" } else { "degraded" }.to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
        ready: readiness.is_ready(),
        generation: readiness.generation,
        search: readiness.search,
        llm_provider: state.config.llm.provider.clone(),
        missing: readiness.missing().into_iter().map(String::from).collect(),
    };

    Json(response)
}
