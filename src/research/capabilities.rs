//! The narrow surface the orchestration core consumes from its collaborators.

use async_trait::async_trait;
use serde::Serialize;

use crate::research::plan::{QueryComplexity, SubAnswer, SubQuestion, SubQuestionStatus};
use crate::types::AppResult;

/// Which external capabilities are configured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Readiness {
    /// Plan and answer generation (LLM).
    pub generation: bool,
    /// Search-capable provider.
    pub search: bool,
}

impl Readiness {
    pub fn is_ready(&self) -> bool {
        self.generation && self.search
    }

    pub fn missing(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if !self.generation {
            missing.push("generation");
        }
        if !self.search {
            missing.push("search");
        }
        missing
    }
}

/// One resolved sub-question handed to synthesis.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Finding {
    pub id: String,
    pub question: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Finding {
    pub fn from_sub_question(sq: &SubQuestion) -> Self {
        Self {
            id: sq.id.clone(),
            question: sq.question.clone(),
            answer: match sq.status {
                SubQuestionStatus::Completed => sq.answer.as_ref().map(|a| a.text.clone()),
                _ => None,
            },
            error: sq.error.clone(),
        }
    }

    pub fn is_answered(&self) -> bool {
        self.answer.is_some()
    }
}

/// Async, fallible collaborators. Implementations may be slow or rate
/// limited; the core drops their futures to cancel them.
#[async_trait]
pub trait ResearchProvider: Send + Sync {
    fn readiness(&self) -> Readiness;

    async fn classify_complexity(&self, query: &str) -> AppResult<QueryComplexity>;

    /// Raw generator output; the planner owns parsing and validation.
    async fn generate_sub_questions(
        &self,
        query: &str,
        complexity: QueryComplexity,
    ) -> AppResult<String>;

    async fn answer_sub_question(&self, sub_question: &SubQuestion) -> AppResult<SubAnswer>;

    async fn synthesize(&self, original_query: &str, findings: &[Finding]) -> AppResult<String>;
}
