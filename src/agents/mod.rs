//! Agent System
//!
//! The model-backed agents behind a research session:
//!
//! - **Classification Agent**: labels a query simple, moderate or complex
//! - **Planning Agent**: decomposes the query into sub-questions
//! - **Literature Agent**: searches and answers one sub-question
//! - **Reply Agent**: synthesizes the findings into the final report
//!
//! [`LlmResearchProvider`] bundles them behind the `ResearchProvider` seam
//! the orchestration pipeline drives.
//!
//! ```text
//! Query ─► Classification ─► Planning ─► Literature (xN, parallel) ─► Reply
//! ```

pub mod classification;
pub mod literature;
pub mod planning;
pub mod reply;

pub use classification::ClassificationAgent;
pub use literature::LiteratureAgent;
pub use planning::PlanningAgent;
pub use reply::ReplyAgent;

use async_trait::async_trait;
use std::sync::Arc;

use crate::llm::provider::LLMAdapter;
use crate::research::capabilities::{Finding, Readiness, ResearchProvider};
use crate::research::plan::{QueryComplexity, SubAnswer, SubQuestion};
use crate::research::settings::CostModel;
use crate::search::SearchBackend;
use crate::types::{AppError, AppResult};

/// Research capabilities backed by a chat model and a search backend.
/// Either half may be missing; `readiness` reports which.
pub struct LlmResearchProvider {
    llm: Option<Arc<dyn LLMAdapter>>,
    search: Option<Arc<dyn SearchBackend>>,
    model: String,
    cost: CostModel,
}

impl LlmResearchProvider {
    pub fn new(
        llm: Option<Arc<dyn LLMAdapter>>,
        search: Option<Arc<dyn SearchBackend>>,
        model: impl Into<String>,
        cost: CostModel,
    ) -> Self {
        Self {
            llm,
            search,
            model: model.into(),
            cost,
        }
    }

    fn llm(&self) -> AppResult<&dyn LLMAdapter> {
        self.llm
            .as_deref()
            .ok_or_else(|| AppError::NotConfigured("no LLM provider configured".to_string()))
    }

    fn search(&self) -> AppResult<&dyn SearchBackend> {
        self.search
            .as_deref()
            .ok_or_else(|| AppError::NotConfigured("no search backend configured".to_string()))
    }
}

#[async_trait]
impl ResearchProvider for LlmResearchProvider {
    fn readiness(&self) -> Readiness {
        Readiness {
            generation: self.llm.is_some(),
            search: self.search.is_some(),
        }
    }

    async fn classify_complexity(&self, query: &str) -> AppResult<QueryComplexity> {
        ClassificationAgent::classify(self.llm()?, &self.model, query).await
    }

    async fn generate_sub_questions(
        &self,
        query: &str,
        complexity: QueryComplexity,
    ) -> AppResult<String> {
        PlanningAgent::generate(self.llm()?, &self.model, query, complexity).await
    }

    async fn answer_sub_question(&self, sub_question: &SubQuestion) -> AppResult<SubAnswer> {
        let (llm, search) = (self.llm()?, self.search()?);
        LiteratureAgent::answer(llm, search, &self.model, &self.cost, sub_question).await
    }

    async fn synthesize(&self, original_query: &str, findings: &[Finding]) -> AppResult<String> {
        ReplyAgent::synthesize(self.llm()?, &self.model, original_query, findings).await
    }
}


#[cfg(test)]
mod tests {
    use super::mocks::{hit, MockLLM, MockSearch};
    use super::*;
    use crate::research::plan::Priority;

    fn provider(llm: Option<MockLLM>, search: Option<MockSearch>) -> LlmResearchProvider {
        LlmResearchProvider::new(
            llm.map(|l| Arc::new(l) as Arc<dyn LLMAdapter>),
            search.map(|s| Arc::new(s) as Arc<dyn SearchBackend>),
            "test-model",
            CostModel::default(),
        )
    }

    #[test]
    fn test_readiness_reflects_configuration() {
        let ready = provider(Some(MockLLM::new(vec![])), Some(MockSearch::with_hits(vec![])));
        assert!(ready.readiness().is_ready());

        let no_search = provider(Some(MockLLM::new(vec![])), None);
        assert!(!no_search.readiness().is_ready());
        assert!(no_search.readiness().generation);

        let nothing = provider(None, None);
        assert_eq!(nothing.readiness().missing().len(), 2);
    }

    #[tokio::test]
    async fn test_missing_llm_is_not_configured() {
        let p = provider(None, Some(MockSearch::with_hits(vec![])));
        assert!(matches!(
            p.classify_complexity("q").await,
            Err(AppError::NotConfigured(_))
        ));
    }

    #[tokio::test]
    async fn test_answer_delegates_to_literature_agent() {
        let p = provider(
            Some(MockLLM::new(vec![Ok("Answer with citation [1].")])),
            Some(MockSearch::with_hits(vec![hit("Paper")])),
        );
        let sq = SubQuestion::new(1, "What does the paper say?", "r", Priority::Medium);
        let answer = p.answer_sub_question(&sq).await.unwrap();
        assert_eq!(answer.sources.len(), 1);
        assert!(answer.cost > 0.0);
    }
}
