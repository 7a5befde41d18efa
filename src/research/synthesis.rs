//! Synthesis hand-off.
//!
//! Calls the provider's synthesize capability with retry. When it cannot
//! produce an answer the session still completes with a locally compiled
//! summary of whatever was answered.

use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::research::capabilities::{Finding, ResearchProvider};
use crate::types::AppError;
use crate::utils::retry::{retry_with_backoff, RetryError, RetryPolicy};

#[derive(Debug, Clone, PartialEq)]
pub struct SynthesisOutcome {
    pub answer: String,
    /// True when the answer was compiled locally instead of by the provider.
    pub fallback: bool,
}

pub struct Synthesizer {
    provider: Arc<dyn ResearchProvider>,
    retry: RetryPolicy,
    timeout: Duration,
}

impl Synthesizer {
    pub fn new(provider: Arc<dyn ResearchProvider>, retry: RetryPolicy, timeout: Duration) -> Self {
        Self {
            provider,
            retry,
            timeout,
        }
    }

    /// Returns `None` only when cancelled.
    pub async fn run(
        &self,
        query: &str,
        findings: &[Finding],
        cancel: &CancellationToken,
    ) -> Option<SynthesisOutcome> {
        if !findings.iter().any(Finding::is_answered) {
            warn!("No sub-question was answered, skipping synthesis call");
            return Some(SynthesisOutcome {
                answer: fallback_answer(query, findings),
                fallback: true,
            });
        }

        let provider = &self.provider;
        let timeout = self.timeout;
        let result = retry_with_backoff(&self.retry, cancel, "synthesis", |_| async move {
            match tokio::time::timeout(timeout, provider.synthesize(query, findings)).await {
                Ok(result) => result,
                Err(_) => Err(AppError::Timeout(timeout.as_secs())),
            }
        })
        .await;

        match result {
            Ok(answer) if !answer.trim().is_empty() => {
                info!(answer_len = answer.len(), "Synthesis complete");
                Some(SynthesisOutcome { answer, fallback: false })
            }
            Ok(_) => {
                warn!("Synthesis returned an empty answer, using local summary");
                Some(SynthesisOutcome {
                    answer: fallback_answer(query, findings),
                    fallback: true,
                })
            }
            Err(RetryError::Aborted { .. }) => None,
            Err(e) => {
                warn!(error = %e, attempts = e.attempts(), "Synthesis failed, using local summary");
                Some(SynthesisOutcome {
                    answer: fallback_answer(query, findings),
                    fallback: true,
                })
            }
        }
    }
}

/// Findings rendered as prompt context: answered ones in full, failed ones
/// listed as gaps.
pub fn format_findings(findings: &[Finding]) -> String {
    let mut context = String::new();
    for (i, finding) in findings.iter().enumerate() {
        context.push_str(&format!("### {}. {}\n", i + 1, finding.question));
        match (&finding.answer, &finding.error) {
            (Some(answer), _) => context.push_str(&format!("{}\n\n", answer.trim())),
            (None, Some(error)) => context.push_str(&format!("(not answered: {error})\n\n")),
            (None, None) => context.push_str("(not answered)\n\n"),
        }
    }
    context
}

/// Local summary used when the provider cannot synthesize.
pub fn fallback_answer(query: &str, findings: &[Finding]) -> String {
    let answered: Vec<&Finding> = findings.iter().filter(|f| f.is_answered()).collect();

    if answered.is_empty() {
        return format!(
            "## Research Results\n\n\
            None of the sub-questions for \"{query}\" could be answered.\n\n\
            Please try again later or rephrase the question."
        );
    }

    let mut response = format!("## Research Results\n\nBased on your question: \"{query}\"\n\n");
    for finding in &answered {
        response.push_str(&format!("### {}\n\n", finding.question));
        if let Some(answer) = &finding.answer {
            response.push_str(&format!("{}\n\n", answer.trim()));
        }
    }

    let gaps: Vec<&Finding> = findings.iter().filter(|f| !f.is_answered()).collect();
    if !gaps.is_empty() {
        response.push_str("**Open gaps:**\n");
        for gap in gaps {
            response.push_str(&format!("- {}\n", gap.question));
        }
        response.push('\n');
    }

    response.push_str("---\n\n*These findings were compiled without a final synthesis step.*");
    response
}
