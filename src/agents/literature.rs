//! Literature Agent
//!
//! Answers a single sub-question: search first, then ask the model to answer
//! from the retrieved context, citing it by number.

use crate::llm::provider::LLMAdapter;
use crate::research::plan::{SourceRef, SubAnswer, SubQuestion};
use crate::research::settings::CostModel;
use crate::search::{SearchBackend, SearchError, SearchHit};
use crate::types::{AppError, AppResult, LLMMessage, LLMRequest};
use tracing::{info, warn};

/// Hits passed to the model as context.
const MAX_CONTEXT_HITS: usize = 8;

pub struct LiteratureAgent;

impl LiteratureAgent {
    pub async fn answer(
        llm: &dyn LLMAdapter,
        search: &dyn SearchBackend,
        model: &str,
        cost: &CostModel,
        sub_question: &SubQuestion,
    ) -> AppResult<SubAnswer> {
        let hits = match search.search(&sub_question.question).await {
            Ok(hits) => hits,
            // Nothing found is not worth a retry; answer from the model alone.
            Err(SearchError::NoResults) | Err(SearchError::EngineDisabled(_)) => {
                warn!(id = %sub_question.id, "No search results, answering without context");
                Vec::new()
            }
            Err(e) => return Err(AppError::Search(e.to_string())),
        };
        let hits: Vec<SearchHit> = hits.into_iter().take(MAX_CONTEXT_HITS).collect();

        let request = LLMRequest {
            model: model.to_string(),
            messages: vec![LLMMessage::user(Self::create_answer_prompt(sub_question, &hits))],
            max_tokens: Some(800),
            temperature: Some(0.2),
            system_instruction: Some(
                "You are a careful research assistant. Answer only from the provided sources \
                 when they are relevant and say so when they are not."
                    .to_string(),
            ),
        };

        let response = llm.create_chat_completion(&request).await?;
        let text = response.content.trim();
        if text.is_empty() {
            return Err(AppError::LLMApi("model returned an empty answer".to_string()));
        }

        let usage = &response.usage;
        let spent = cost.estimate(usage.prompt_tokens, usage.completion_tokens, 1);
        info!(
            id = %sub_question.id,
            sources = hits.len(),
            tokens = usage.total_tokens,
            cost = spent,
            "Sub-question answered"
        );

        Ok(SubAnswer {
            text: text.to_string(),
            sources: Self::sources(&hits),
            cost: spent,
        })
    }

    fn create_answer_prompt(sub_question: &SubQuestion, hits: &[SearchHit]) -> String {
        format!(
            r#"Answer the research sub-question below in 1-3 concise paragraphs.

SUB-QUESTION:
{question}

PURPOSE:
{reasoning}

SOURCES:
{context}

Cite sources inline as [1], [2], ... matching the numbers above.
If the sources do not cover the question, say what is missing instead of guessing."#,
            question = sub_question.question,
            reasoning = sub_question.reasoning,
            context = Self::format_context(hits),
        )
    }

    /// Numbered context block for the prompt.
    pub fn format_context(hits: &[SearchHit]) -> String {
        if hits.is_empty() {
            return "No search results available.".to_string();
        }

        let mut output = String::new();
        for (i, hit) in hits.iter().enumerate() {
            output.push_str(&format!("[{}] {}", i + 1, hit.title));
            if let Some(year) = hit.year {
                output.push_str(&format!(" ({year})"));
            }
            output.push('\n');
            if !hit.snippet.is_empty() {
                output.push_str(&format!("    {}\n", hit.snippet));
            }
            if let Some(link) = &hit.link {
                output.push_str(&format!("    {link}\n"));
            }
        }
        output
    }

    fn sources(hits: &[SearchHit]) -> Vec<SourceRef> {
        hits.iter()
            .map(|hit| SourceRef {
                title: hit.title.clone(),
                url: hit.link.clone(),
            })
            .collect()
    }
}
