use serde::{Deserialize, Serialize};
use std::sync::Arc;
use validator::Validate;

use crate::config::Config;
use crate::middleware::rate_limiter::ResearchRateLimiter;
use crate::research::pipeline::ResearchPipeline;
use crate::research::plan::QueryComplexity;
use crate::types::{AppError, AppResult};

pub const MAX_QUERY_CHARS: usize = 2000;

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub pipeline: ResearchPipeline,
    pub rate_limiter: Arc<ResearchRateLimiter>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ResearchRequest {
    #[validate(length(
        min = 1,
        max = 2000,
        message = "query must be between 1 and 2000 characters"
    ))]
    pub query: String,
    #[serde(default)]
    #[validate(nested)]
    pub options: ResearchOptions,
}

/// Request options. camelCase on the wire; snake_case spellings are accepted too.
#[derive(Debug, Clone, Default, Deserialize, Serialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ResearchOptions {
    #[serde(default, alias = "force_complexity")]
    pub force_complexity: Option<QueryComplexity>,
    #[serde(default, alias = "skip_round2", alias = "skip_round_2")]
    pub skip_round2: bool,
    #[serde(default, alias = "max_cost")]
    #[validate(range(exclusive_min = 0.0, message = "maxCost must be positive"))]
    pub max_cost: Option<f64>,
}

impl ResearchRequest {
    pub fn new(query: impl Into<String>, options: ResearchOptions) -> Self {
        Self {
            query: query.into(),
            options,
        }
    }

    /// Field validation plus the checks the derive cannot express.
    pub fn check(&self) -> AppResult<()> {
        self.validate()
            .map_err(|e| AppError::InvalidRequest(e.to_string()))?;
        if self.query.trim().is_empty() {
            return Err(AppError::InvalidRequest("query must not be blank".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: String,
    pub ready: bool,
    pub generation: bool,
    pub search: bool,
    pub llm_provider: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub missing: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options_accept_both_spellings() {
        let camel: ResearchRequest = serde_json::from_str(
            r#"{"query": "q?",
                "options": {"forceComplexity": "complex", "skipRound2": true, "maxCost": 0.2}}"#,
        )
        .unwrap();
        assert_eq!(camel.options.force_complexity, Some(QueryComplexity::Complex));
        assert!(camel.options.skip_round2);
        assert_eq!(camel.options.max_cost, Some(0.2));

        let snake: ResearchRequest = serde_json::from_str(
            r#"{"query": "q?", "options": {"skip_round2": true, "max_cost": 0.5}}"#,
        )
        .unwrap();
        assert!(snake.options.skip_round2);
        assert_eq!(snake.options.max_cost, Some(0.5));
    }

    #[test]
    fn test_options_default_when_absent() {
        let request: ResearchRequest =
            serde_json::from_str(r#"{"query": "What is Rust?"}"#).unwrap();
        assert!(request.check().is_ok());
        assert!(!request.options.skip_round2);
        assert!(request.options.force_complexity.is_none());
    }

    #[test]
    fn test_check_rejects_bad_queries() {
        let blank = ResearchRequest::new("   ", ResearchOptions::default());
        assert!(matches!(blank.check(), Err(AppError::InvalidRequest(_))));

        let empty = ResearchRequest::new("", ResearchOptions::default());
        assert!(matches!(empty.check(), Err(AppError::InvalidRequest(_))));

        let long =
            ResearchRequest::new("a".repeat(MAX_QUERY_CHARS + 1), ResearchOptions::default());
        assert!(matches!(long.check(), Err(AppError::InvalidRequest(_))));

        let exact = ResearchRequest::new("é".repeat(MAX_QUERY_CHARS), ResearchOptions::default());
        assert!(exact.check().is_ok());
    }

    #[test]
    fn test_check_rejects_non_positive_max_cost() {
        let request = ResearchRequest::new(
            "What is Rust?",
            ResearchOptions {
                max_cost: Some(0.0),
                ..Default::default()
            },
        );
        assert!(matches!(request.check(), Err(AppError::InvalidRequest(_))));
    }
}
