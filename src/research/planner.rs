//! Research Planner
//!
//! Turns a query and complexity tier into a [`ResearchPlan`]:
//!
//! 1. Ask the provider for candidate sub-questions.
//! 2. Extract the first well-formed JSON block from the response.
//! 3. Validate and normalize candidates (ids, defaults, dependency refs).
//! 4. Fall back to a deterministic plan when anything above fails.
//!
//! The planner never returns an error to its caller.

use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

use crate::research::capabilities::ResearchProvider;
use crate::research::plan::{
    sub_question_id, PlanOrigin, Priority, QueryComplexity, ResearchPlan, SubQuestion,
    MIN_QUESTION_CHARS,
};

const DEFAULT_REASONING: &str = "Helps answer the original query from a focused angle.";

#[derive(Debug, Error, PartialEq)]
pub enum PlanParseError {
    #[error("no JSON block found in generator output")]
    NoStructuredBlock,

    #[error("JSON block has no sub-question list")]
    MissingList,

    #[error("no usable sub-questions after validation")]
    NoValidCandidates,
}

/// Candidate as emitted by the generator, before validation.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawSubQuestion {
    #[serde(alias = "subQuestion", alias = "sub_question", alias = "text")]
    pub question: Option<String>,
    #[serde(alias = "rationale")]
    pub reasoning: Option<String>,
    pub priority: Option<String>,
    #[serde(alias = "dependsOn", alias = "depends_on", alias = "dependencies")]
    pub depends_on: Option<Vec<Value>>,
}

pub struct ResearchPlanner {
    provider: Arc<dyn ResearchProvider>,
    timeout: Duration,
}

impl ResearchPlanner {
    pub fn new(provider: Arc<dyn ResearchProvider>, timeout: Duration) -> Self {
        Self { provider, timeout }
    }

    pub async fn create_plan(
        &self,
        query: &str,
        session_id: &str,
        complexity: QueryComplexity,
    ) -> ResearchPlan {
        let generated = tokio::time::timeout(
            self.timeout,
            self.provider.generate_sub_questions(query, complexity),
        )
        .await;

        let text = match generated {
            Ok(Ok(text)) => text,
            Ok(Err(e)) => {
                warn!(error = %e, "Sub-question generation failed, using fallback plan");
                return fallback_plan(query, session_id, complexity);
            }
            Err(_) => {
                warn!(
                    timeout_secs = self.timeout.as_secs(),
                    "Sub-question generation timed out, using fallback plan"
                );
                return fallback_plan(query, session_id, complexity);
            }
        };

        match build_plan(&text, query, session_id, complexity) {
            Ok(plan) => {
                info!(
                    plan_id = %plan.id,
                    sub_questions = plan.len(),
                    estimated_secs = plan.total_estimated_time,
                    shortfall = ?plan.shortfall,
                    "Research plan created"
                );
                plan
            }
            Err(e) => {
                warn!(error = %e, "Generator output unusable, using fallback plan");
                fallback_plan(query, session_id, complexity)
            }
        }
    }
}

/// Parse, validate and assemble a generated plan.
///
/// Dependency references name positions in the generator's own list, so they
/// are resolved through that list before candidates are renumbered. References
/// to discarded, unknown or self positions are dropped.
pub fn build_plan(
    text: &str,
    query: &str,
    session_id: &str,
    complexity: QueryComplexity,
) -> Result<ResearchPlan, PlanParseError> {
    let candidates = parse_candidates(text)?;
    let (min, max) = complexity.sub_question_bounds();

    // Raw 1-based position -> assigned id, `None` for discarded candidates.
    let mut position_ids: Vec<Option<String>> = Vec::with_capacity(candidates.len());
    let mut kept: Vec<(String, RawSubQuestion)> = Vec::new();
    let mut truncated = 0usize;
    for raw in candidates {
        let question = raw
            .question
            .as_deref()
            .map(str::trim)
            .filter(|q| q.chars().count() > MIN_QUESTION_CHARS)
            .map(String::from);

        match question {
            Some(question) if kept.len() < max => {
                position_ids.push(Some(sub_question_id(kept.len() + 1)));
                kept.push((question, raw));
            }
            Some(_) => {
                truncated += 1;
                position_ids.push(None);
            }
            None => position_ids.push(None),
        }
    }
    if truncated > 0 {
        warn!(max, truncated, "Generator produced too many sub-questions, truncating");
    }

    if kept.is_empty() {
        return Err(PlanParseError::NoValidCandidates);
    }

    let sub_questions: Vec<SubQuestion> = kept
        .into_iter()
        .enumerate()
        .map(|(i, (question, raw))| {
            let index = i + 1;
            let own_id = sub_question_id(index);
            let reasoning = raw
                .reasoning
                .as_deref()
                .map(str::trim)
                .filter(|r| !r.is_empty())
                .unwrap_or(DEFAULT_REASONING);
            let priority = raw
                .priority
                .as_deref()
                .and_then(Priority::from_label)
                .unwrap_or_default();
            let depends_on =
                resolve_dependencies(&own_id, raw.depends_on.as_deref(), &position_ids);

            SubQuestion::new(index, question, reasoning, priority).with_dependencies(depends_on)
        })
        .collect();

    let count = sub_questions.len();
    let mut plan =
        ResearchPlan::new(session_id, query, complexity, sub_questions, PlanOrigin::Generated);
    if count < min {
        warn!(count, min, %complexity, "Plan has fewer sub-questions than the tier minimum");
        plan.shortfall = Some(min - count);
    }
    Ok(plan)
}

/// Map raw references onto assigned ids, in order, without duplicates.
fn resolve_dependencies(
    own_id: &str,
    references: Option<&[Value]>,
    position_ids: &[Option<String>],
) -> Vec<String> {
    let mut depends_on: Vec<String> = Vec::new();
    for reference in references.unwrap_or_default() {
        let Some(position) = normalize_dependency(reference).and_then(|id| dependency_position(&id))
        else {
            warn!(sub_question = %own_id, %reference, "Dropping unrecognized dependency reference");
            continue;
        };

        match position_ids.get(position - 1) {
            Some(Some(id)) if id == own_id => {
                warn!(sub_question = %own_id, %reference, "Dropping self dependency");
            }
            Some(Some(id)) => {
                if !depends_on.contains(id) {
                    depends_on.push(id.clone());
                }
            }
            Some(None) => {
                warn!(
                    sub_question = %own_id,
                    %reference,
                    "Dropping dependency on a discarded candidate"
                );
            }
            None => {
                warn!(
                    sub_question = %own_id,
                    %reference,
                    "Dropping dependency on an unknown sub-question"
                );
            }
        }
    }
    depends_on
}

fn dependency_position(id: &str) -> Option<usize> {
    id.strip_prefix("sq-")?.parse().ok().filter(|n| *n > 0)
}

/// Deterministic plan used whenever generation fails.
pub fn fallback_plan(query: &str, session_id: &str, complexity: QueryComplexity) -> ResearchPlan {
    let query = query.trim();
    let mut sub_questions = vec![SubQuestion::new(
        1,
        query,
        "Answer the original query directly.",
        Priority::High,
    )];
    if complexity != QueryComplexity::Simple {
        sub_questions.push(SubQuestion::new(
            2,
            format!("What are the key considerations and implications of: {query}"),
            "Surface the context and consequences around the query.",
            Priority::Medium,
        ));
    }
    info!(%complexity, sub_questions = sub_questions.len(), "Fallback research plan created");
    ResearchPlan::new(session_id, query, complexity, sub_questions, PlanOrigin::Fallback)
}

/// Map a 1-based numeric reference (`2`, `"2"`) or a symbolic id (`"sq-3"`)
/// to the canonical `sq-<n>` form.
pub fn normalize_dependency(reference: &Value) -> Option<String> {
    match reference {
        Value::Number(n) => n.as_u64().filter(|n| *n > 0).map(|n| sub_question_id(n as usize)),
        Value::String(s) => {
            let s = s.trim();
            if let Ok(n) = s.parse::<usize>() {
                return (n > 0).then(|| sub_question_id(n));
            }
            let lower = s.to_lowercase();
            let digits = lower.strip_prefix("sq")?.trim_start_matches(['-', '_']);
            digits
                .parse::<usize>()
                .ok()
                .filter(|n| *n > 0)
                .map(sub_question_id)
        }
        _ => None,
    }
}

/// Extract the candidate list from free-form generator output.
pub fn parse_candidates(text: &str) -> Result<Vec<RawSubQuestion>, PlanParseError> {
    let block = first_json_block(text).ok_or(PlanParseError::NoStructuredBlock)?;

    let list = match block {
        Value::Array(items) => items,
        Value::Object(mut map) => ["subQuestions", "sub_questions", "questions", "plan"]
            .iter()
            .find_map(|key| match map.remove(*key) {
                Some(Value::Array(items)) => Some(items),
                _ => None,
            })
            .ok_or(PlanParseError::MissingList)?,
        _ => return Err(PlanParseError::MissingList),
    };

    Ok(list
        .into_iter()
        .filter_map(|item| match item {
            Value::String(question) => Some(RawSubQuestion {
                question: Some(question),
                ..Default::default()
            }),
            Value::Object(_) => serde_json::from_value(item).ok(),
            _ => None,
        })
        .collect())
}

/// First array or object that parses, preferring fenced code blocks.
fn first_json_block(text: &str) -> Option<Value> {
    if let Some(fenced) = fenced_block(text) {
        if let Some(value) = scan_json(fenced) {
            return Some(value);
        }
    }
    scan_json(text)
}

fn fenced_block(text: &str) -> Option<&str> {
    let start = text.find("```")?;
    let after = &text[start + 3..];
    let body_start = after.find('\n').map(|i| i + 1).unwrap_or(0);
    let body = &after[body_start..];
    let end = body.find("```")?;
    Some(&body[..end])
}

fn scan_json(text: &str) -> Option<Value> {
    text.char_indices()
        .filter(|(_, c)| *c == '[' || *c == '{')
        .find_map(|(i, _)| {
            let mut stream = serde_json::Deserializer::from_str(&text[i..]).into_iter::<Value>();
            match stream.next() {
                Some(Ok(value @ (Value::Array(_) | Value::Object(_)))) => Some(value),
                _ => None,
            }
        })
}
