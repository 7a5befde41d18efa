//! Reply Agent
//!
//! Synthesizes sub-question findings into the final user-facing report.
//! This is the last step of a research session.

use crate::llm::provider::LLMAdapter;
use crate::research::capabilities::Finding;
use crate::research::synthesis::format_findings;
use crate::types::{AppResult, LLMMessage, LLMRequest};
use tracing::info;

pub struct ReplyAgent;

impl ReplyAgent {
    pub async fn synthesize(
        llm: &dyn LLMAdapter,
        model: &str,
        original_query: &str,
        findings: &[Finding],
    ) -> AppResult<String> {
        info!(
            query_len = original_query.len(),
            findings = findings.len(),
            answered = findings.iter().filter(|f| f.is_answered()).count(),
            "Synthesizing research report"
        );

        let request = LLMRequest {
            model: model.to_string(),
            messages: vec![LLMMessage::user(Self::create_report_prompt(original_query, findings))],
            max_tokens: Some(2048),
            temperature: Some(0.5),
            system_instruction: Some(
                "You are a research analyst writing clear, well-structured markdown reports."
                    .to_string(),
            ),
        };

        let response = llm.create_chat_completion(&request).await?;
        Ok(response.content.trim().to_string())
    }

    fn create_report_prompt(original_query: &str, findings: &[Finding]) -> String {
        format!(
            r#"Write a research report answering the question below, using the findings gathered
for its sub-questions.

QUESTION:
{original_query}

FINDINGS:
{findings}

Structure the report in markdown:
1. A direct answer in the opening paragraph
2. Supporting detail organized by theme, keeping the findings' citations
3. A "Gaps" section listing sub-questions that could not be answered, if any

Do not invent findings that are not listed above."#,
            findings = format_findings(findings),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::mocks::MockLLM;

    #[tokio::test]
    async fn test_report_prompt_lists_findings_and_gaps() {
        let findings = vec![
            Finding {
                id: "sq-1".to_string(),
                question: "What is backpressure?".to_string(),
                answer: Some("Flow control from consumer to producer.".to_string()),
                error: None,
            },
            Finding {
                id: "sq-2".to_string(),
                question: "How does Kafka apply it?".to_string(),
                answer: None,
                error: Some("timed out".to_string()),
            },
        ];
        let llm = MockLLM::new(vec![Ok("  # Report\n\nBackpressure is...  ")]);

        let report = ReplyAgent::synthesize(&llm, "m", "Explain backpressure", &findings)
            .await
            .unwrap();
        assert_eq!(report, "# Report\n\nBackpressure is...");

        let prompt = &llm.requests()[0].messages[0].content;
        assert!(prompt.contains("Flow control from consumer to producer."));
        assert!(prompt.contains("(not answered: timed out)"));
    }
}
