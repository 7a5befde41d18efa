// Research Orchestrator - planned, budgeted, streaming research sessions

pub mod agents;
pub mod config;
pub mod llm;
pub mod middleware;
pub mod models;
pub mod research;
pub mod routes;
pub mod search; // SerpAPI for Google Scholar and Light
pub mod session_store;
pub mod types;
pub mod utils;

// Re-exports for convenience
pub use config::Config;
pub use models::AppState;

pub fn create_router(state: AppState) -> axum::Router {
    routes::create_router(state)
}
