//! Complexity Classifier
//!
//! Maps a raw query to a [`QueryComplexity`] tier. An optional provider call
//! is tried first; any failure or timeout degrades to the keyword heuristic,
//! so classification itself never fails.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::research::capabilities::ResearchProvider;
use crate::research::plan::QueryComplexity;

const COMPARISON_INDICATORS: &[&str] = &[
    "compare",
    "comparison",
    " versus ",
    " vs ",
    " vs. ",
    "difference between",
    "differences between",
    "pros and cons",
    "trade-off",
    "tradeoff",
    "better than",
];

const ANALYSIS_INDICATORS: &[&str] = &[
    "analyze",
    "analyse",
    "evaluate",
    "comprehensive",
    "implications",
    "impact of",
    "strategy",
    "in depth",
    "in-depth",
    "why does",
    "how does",
    "relationship between",
];

pub struct ComplexityClassifier {
    provider: Option<Arc<dyn ResearchProvider>>,
    timeout: Duration,
}

impl ComplexityClassifier {
    /// Classifier that only uses the keyword heuristic.
    pub fn heuristic() -> Self {
        Self {
            provider: None,
            timeout: Duration::from_secs(0),
        }
    }

    pub fn with_provider(provider: Arc<dyn ResearchProvider>, timeout: Duration) -> Self {
        Self {
            provider: Some(provider),
            timeout,
        }
    }

    pub async fn classify(&self, query: &str) -> QueryComplexity {
        let Some(provider) = &self.provider else {
            return heuristic_complexity(query);
        };

        match tokio::time::timeout(self.timeout, provider.classify_complexity(query)).await {
            Ok(Ok(complexity)) => {
                info!(%complexity, "Query classified by provider");
                complexity
            }
            Ok(Err(e)) => {
                let fallback = heuristic_complexity(query);
                warn!(error = %e, %fallback, "Provider classification failed, using heuristic");
                fallback
            }
            Err(_) => {
                let fallback = heuristic_complexity(query);
                warn!(
                    timeout_secs = self.timeout.as_secs(),
                    %fallback,
                    "Provider classification timed out, using heuristic"
                );
                fallback
            }
        }
    }
}

/// Deterministic length/keyword score.
pub fn heuristic_complexity(query: &str) -> QueryComplexity {
    let lower = format!(" {} ", query.to_lowercase());
    let words = query.split_whitespace().count();
    let mut score = 0u32;

    if words > 25 {
        score += 2;
    } else if words > 12 {
        score += 1;
    }

    if COMPARISON_INDICATORS.iter().any(|i| lower.contains(i)) {
        score += 3;
    }

    let analysis_hits = ANALYSIS_INDICATORS.iter().filter(|i| lower.contains(*i)).count() as u32;
    score += analysis_hits.min(2);

    if query.matches('?').count() > 1 {
        score += 1;
    }
    if lower.matches(" and ").count() >= 2 {
        score += 1;
    }

    let complexity = match score {
        0 => QueryComplexity::Simple,
        1 | 2 => QueryComplexity::Moderate,
        _ => QueryComplexity::Complex,
    };
    debug!(words, score, %complexity, "Heuristic classification");
    complexity
}
