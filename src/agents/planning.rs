//! Planning Agent
//!
//! Produces the raw sub-question list for a query. The reply is returned
//! unparsed; `research::planner` owns parsing, validation and the fallback.

use crate::llm::provider::LLMAdapter;
use crate::research::plan::QueryComplexity;
use crate::types::{AppResult, LLMMessage, LLMRequest};
use tracing::info;

pub struct PlanningAgent;

impl PlanningAgent {
    pub async fn generate(
        llm: &dyn LLMAdapter,
        model: &str,
        query: &str,
        complexity: QueryComplexity,
    ) -> AppResult<String> {
        let request = LLMRequest {
            model: model.to_string(),
            messages: vec![LLMMessage::user(Self::create_prompt(query, complexity))],
            max_tokens: Some(1024),
            temperature: Some(0.3),
            system_instruction: Some(
                "You are a research planner. You decompose questions into focused, \
                 searchable sub-questions and respond with JSON only."
                    .to_string(),
            ),
        };

        let response = llm.create_chat_completion(&request).await?;
        info!(
            complexity = %complexity,
            response_len = response.content.len(),
            "Sub-question plan generated"
        );
        Ok(response.content)
    }

    fn create_prompt(query: &str, complexity: QueryComplexity) -> String {
        let (min, max) = complexity.sub_question_bounds();
        format!(
            r#"Break the following research question into between {min} and {max} sub-questions.

RESEARCH QUESTION:
{query}

COMPLEXITY: {complexity}

Each sub-question must be answerable on its own with a web or literature search.
Use "dependsOn" only when a sub-question genuinely needs the answer of an earlier one;
refer to earlier sub-questions by their 1-based position.

OUTPUT FORMAT (respond with ONLY a JSON array):
[
  {{
    "question": "A specific, searchable question",
    "reasoning": "Why answering it helps answer the research question",
    "priority": "high" | "medium" | "low",
    "dependsOn": []
  }}
]"#
        )
    }
}
