//! API Routes
//!
//! - `POST /api/research/stream` - start a research session, events over SSE
//! - `GET /api/research/{session_id}` - session record and final result
//! - `GET /api/health` - capability readiness

pub mod health;
pub mod research;

use axum::Router;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::middleware::cors::cors_layer;
use crate::models::AppState;

/// Create the main application router
pub fn create_router(state: AppState) -> Router {
    info!("Creating application router");

    let cors = cors_layer(&state.config.server.cors_allowed_origins);

    Router::new()
        .merge(research::router(state.clone()))
        .merge(health::router(state))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::middleware::rate_limiter::ResearchRateLimiter;
    use crate::research::pipeline::ResearchPipeline;
    use crate::research::settings::ResearchSettings;
    use crate::research::testing::{generated_questions, ScriptedProvider};
    use crate::session_store::SessionStore;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use serde_json::Value;
    use std::sync::Arc;
    use tower::ServiceExt;

    fn app(provider: ScriptedProvider, per_minute: u32) -> Router {
        let config = Config::from_lookup(|_| None).unwrap();
        let pipeline = ResearchPipeline::new(
            Arc::new(provider),
            ResearchSettings::default(),
            SessionStore::default(),
        );
        create_router(AppState {
            config,
            pipeline,
            rate_limiter: Arc::new(ResearchRateLimiter::new(per_minute)),
        })
    }

    fn research_request(body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/api/research/stream")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_text(response: axum::response::Response) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_health_reports_readiness() {
        let response = app(ScriptedProvider::new().with_readiness(true, false), 0)
            .oneshot(Request::get("/api/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let json: Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(json["status"], "degraded");
        assert_eq!(json["ready"], false);
        assert_eq!(json["missing"][0], "search");
    }

    #[tokio::test]
    async fn test_stream_emits_events_then_done() {
        let provider = ScriptedProvider::new().with_generation(generated_questions(2));
        let response = app(provider, 0)
            .oneshot(research_request(
                r#"{"query": "What is the CAP theorem?",
                    "options": {"forceComplexity": "simple"}}"#,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_text(response).await;
        let classified = body.find("event: classified").unwrap();
        let planned = body.find("event: plan_created").unwrap();
        let done = body.find("event: done").unwrap();
        assert!(classified < planned && planned < done);
        assert!(body.trim_end().ends_with("data: [DONE]"));
    }

    #[tokio::test]
    async fn test_invalid_request_is_400() {
        let response = app(ScriptedProvider::new(), 0)
            .oneshot(research_request(r#"{"query": "   "}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let json: Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(json["error"], "invalid_request");
    }

    #[tokio::test]
    async fn test_not_configured_is_503() {
        let response = app(ScriptedProvider::new().with_readiness(false, true), 0)
            .oneshot(research_request(r#"{"query": "What is the CAP theorem?"}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_rate_limit_is_429() {
        let router = app(ScriptedProvider::new().with_readiness(false, true), 1);

        let first = router
            .clone()
            .oneshot(research_request(r#"{"query": "What is the CAP theorem?"}"#))
            .await
            .unwrap();
        assert_eq!(first.status(), StatusCode::SERVICE_UNAVAILABLE);

        let second = router
            .oneshot(research_request(r#"{"query": "What is the CAP theorem?"}"#))
            .await
            .unwrap();
        assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn test_unknown_session_is_404() {
        let response = app(ScriptedProvider::new(), 0)
            .oneshot(Request::get("/api/research/nope").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
