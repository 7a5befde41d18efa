//! Classification Agent
//!
//! Asks the model for a one-word complexity tier for the incoming query.

use crate::llm::provider::LLMAdapter;
use crate::research::plan::QueryComplexity;
use crate::types::{AppError, AppResult, LLMMessage, LLMRequest};
use tracing::debug;

pub struct ClassificationAgent;

impl ClassificationAgent {
    pub async fn classify(
        llm: &dyn LLMAdapter,
        model: &str,
        query: &str,
    ) -> AppResult<QueryComplexity> {
        let request = LLMRequest {
            model: model.to_string(),
            messages: vec![LLMMessage::user(Self::create_prompt(query))],
            max_tokens: Some(10),
            temperature: Some(0.0),
            system_instruction: Some(
                "You classify research questions. Reply with a single word.".to_string(),
            ),
        };

        let response = llm.create_chat_completion(&request).await?;
        debug!(raw = %response.content, "Complexity label received");

        Self::parse_label(&response.content).ok_or_else(|| {
            AppError::LLMApi(format!("unrecognized complexity label: {}", response.content.trim()))
        })
    }

    fn create_prompt(query: &str) -> String {
        format!(
            r#"Classify the complexity of this research question.

QUESTION:
{query}

- simple: a single fact or definition, answerable with one lookup
- moderate: needs a comparison or a short chain of reasoning over a few sources
- complex: multi-part, open-ended, or needs synthesis across several areas

Respond with exactly one word: simple, moderate, or complex."#
        )
    }

    /// First word in the reply that names a tier.
    pub fn parse_label(content: &str) -> Option<QueryComplexity> {
        content.split_whitespace().find_map(QueryComplexity::from_label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::mocks::MockLLM;

    #[test]
    fn test_parse_label() {
        assert_eq!(ClassificationAgent::parse_label("Complex."), Some(QueryComplexity::Complex));
        assert_eq!(
            ClassificationAgent::parse_label("The answer is: moderate"),
            Some(QueryComplexity::Moderate)
        );
        assert_eq!(ClassificationAgent::parse_label("unsure"), None);
    }

    #[tokio::test]
    async fn test_classify_uses_model_reply() {
        let llm = MockLLM::new(vec![Ok("simple")]);
        let tier = ClassificationAgent::classify(&llm, "m", "What is HTTP?").await.unwrap();
        assert_eq!(tier, QueryComplexity::Simple);

        let requests = llm.requests();
        assert_eq!(requests[0].model, "m");
        assert!(requests[0].messages[0].content.contains("What is HTTP?"));
    }

    #[tokio::test]
    async fn test_classify_rejects_garbage() {
        let llm = MockLLM::new(vec![Ok("¯\\_(ツ)_/¯")]);
        assert!(matches!(
            ClassificationAgent::classify(&llm, "m", "q").await,
            Err(AppError::LLMApi(_))
        ));
    }
}
