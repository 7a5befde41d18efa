//! Research plan data model.
//!
//! A [`ResearchPlan`] is never mutated in place. Status changes go through
//! [`ResearchPlan::with_update`], which returns a fresh snapshot, so readers
//! holding an `Arc<ResearchPlan>` always see a consistent view.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Question text must be strictly longer than this many characters.
pub const MIN_QUESTION_CHARS: usize = 10;
/// Seconds of search work for one medium-priority sub-question.
pub const BASE_SEARCH_SECONDS: f64 = 5.0;
pub const SYNTHESIS_BASE_SECONDS: f64 = 5.0;
pub const SYNTHESIS_PER_QUESTION_SECONDS: f64 = 2.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryComplexity {
    Simple,
    Moderate,
    Complex,
}

impl QueryComplexity {
    /// Inclusive (min, max) number of sub-questions a plan should carry.
    pub fn sub_question_bounds(self) -> (usize, usize) {
        match self {
            QueryComplexity::Simple => (1, 2),
            QueryComplexity::Moderate => (2, 3),
            QueryComplexity::Complex => (3, 5),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            QueryComplexity::Simple => "simple",
            QueryComplexity::Moderate => "moderate",
            QueryComplexity::Complex => "complex",
        }
    }

    /// Lenient label parsing: accepts surrounding whitespace, punctuation and case.
    pub fn from_label(label: &str) -> Option<Self> {
        let cleaned: String = label
            .trim()
            .trim_matches(|c: char| !c.is_alphanumeric())
            .to_lowercase();
        match cleaned.as_str() {
            "simple" | "low" | "easy" => Some(QueryComplexity::Simple),
            "moderate" | "medium" => Some(QueryComplexity::Moderate),
            "complex" | "high" | "hard" => Some(QueryComplexity::Complex),
            _ => None,
        }
    }
}

impl fmt::Display for QueryComplexity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueryComplexity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_label(s)
            .ok_or_else(|| {
                format!("unknown complexity '{s}' (expected simple, moderate or complex)")
            })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    #[default]
    Medium,
    Low,
}

impl Priority {
    /// Multiplier applied to the base search time when estimating a plan.
    pub fn weight(self) -> f64 {
        match self {
            Priority::High => 1.5,
            Priority::Medium => 1.0,
            Priority::Low => 0.8,
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_lowercase().as_str() {
            "high" => Some(Priority::High),
            "medium" | "normal" => Some(Priority::Medium),
            "low" => Some(Priority::Low),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubQuestionStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl SubQuestionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, SubQuestionStatus::Completed | SubQuestionStatus::Failed)
    }

    /// `pending → running → {completed | failed}`, plus `pending → failed`
    /// for sub-questions that are never dispatched.
    pub fn can_transition_to(self, next: SubQuestionStatus) -> bool {
        use SubQuestionStatus::*;
        matches!(
            (self, next),
            (Pending, Running) | (Pending, Failed) | (Running, Completed) | (Running, Failed)
        )
    }
}

impl fmt::Display for SubQuestionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SubQuestionStatus::Pending => "pending",
            SubQuestionStatus::Running => "running",
            SubQuestionStatus::Completed => "completed",
            SubQuestionStatus::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// Reference to a source consulted while answering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRef {
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// Answer produced for one sub-question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubAnswer {
    pub text: String,
    #[serde(default)]
    pub sources: Vec<SourceRef>,
    /// Estimated monetary cost of producing this answer.
    #[serde(default)]
    pub cost: f64,
}

impl SubAnswer {
    pub fn new(text: impl Into<String>, cost: f64) -> Self {
        Self {
            text: text.into(),
            sources: Vec::new(),
            cost,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubQuestion {
    pub id: String,
    pub question: String,
    pub reasoning: String,
    pub priority: Priority,
    pub depends_on: Vec<String>,
    pub status: SubQuestionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer: Option<SubAnswer>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SubQuestion {
    pub fn new(
        index: usize,
        question: impl Into<String>,
        reasoning: impl Into<String>,
        priority: Priority,
    ) -> Self {
        Self {
            id: sub_question_id(index),
            question: question.into(),
            reasoning: reasoning.into(),
            priority,
            depends_on: Vec::new(),
            status: SubQuestionStatus::Pending,
            answer: None,
            error: None,
        }
    }

    pub fn with_dependencies(mut self, depends_on: Vec<String>) -> Self {
        self.depends_on = depends_on;
        self
    }

    /// True when every dependency is contained in `resolved`.
    pub fn is_ready(&self, resolved: &HashSet<String>) -> bool {
        self.status == SubQuestionStatus::Pending
            && self.depends_on.iter().all(|dep| resolved.contains(dep))
    }
}

/// Canonical id for the 1-based position `index`.
pub fn sub_question_id(index: usize) -> String {
    format!("sq-{index}")
}

/// A status change applied to one sub-question.
#[derive(Debug, Clone)]
pub enum StatusUpdate {
    Running,
    Completed(SubAnswer),
    Failed(String),
}

impl StatusUpdate {
    fn target(&self) -> SubQuestionStatus {
        match self {
            StatusUpdate::Running => SubQuestionStatus::Running,
            StatusUpdate::Completed(_) => SubQuestionStatus::Completed,
            StatusUpdate::Failed(_) => SubQuestionStatus::Failed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("unknown sub-question '{0}'")]
    UnknownSubQuestion(String),

    #[error("illegal transition for {id}: {from} -> {to}")]
    Illegal {
        id: String,
        from: SubQuestionStatus,
        to: SubQuestionStatus,
    },
}

/// Whether the plan came from the generator or the deterministic fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanOrigin {
    Generated,
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResearchPlan {
    pub id: String,
    pub session_id: String,
    pub original_query: String,
    pub complexity: QueryComplexity,
    pub sub_questions: Vec<SubQuestion>,
    pub created_at: DateTime<Utc>,
    /// Estimated seconds to run every sub-question and synthesize.
    pub total_estimated_time: u64,
    pub origin: PlanOrigin,
    /// How many sub-questions short of the tier minimum the generator came up.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shortfall: Option<usize>,
}

impl ResearchPlan {
    pub fn new(
        session_id: &str,
        original_query: &str,
        complexity: QueryComplexity,
        sub_questions: Vec<SubQuestion>,
        origin: PlanOrigin,
    ) -> Self {
        let total_estimated_time = estimate_total_time(&sub_questions);
        Self {
            id: format!("plan-{session_id}"),
            session_id: session_id.to_string(),
            original_query: original_query.to_string(),
            complexity,
            sub_questions,
            created_at: Utc::now(),
            total_estimated_time,
            origin,
            shortfall: None,
        }
    }

    pub fn get(&self, id: &str) -> Option<&SubQuestion> {
        self.sub_questions.iter().find(|sq| sq.id == id)
    }

    pub fn len(&self) -> usize {
        self.sub_questions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sub_questions.is_empty()
    }

    pub fn count(&self, status: SubQuestionStatus) -> usize {
        self.sub_questions.iter().filter(|sq| sq.status == status).count()
    }

    pub fn pending(&self) -> impl Iterator<Item = &SubQuestion> {
        self.sub_questions
            .iter()
            .filter(|sq| sq.status == SubQuestionStatus::Pending)
    }

    /// Ids of sub-questions in a terminal state. Failures count as resolved
    /// so that dependents are not starved by one upstream failure.
    pub fn resolved_ids(&self) -> HashSet<String> {
        self.sub_questions
            .iter()
            .filter(|sq| sq.status.is_terminal())
            .map(|sq| sq.id.clone())
            .collect()
    }

    pub fn is_resolved(&self) -> bool {
        self.sub_questions.iter().all(|sq| sq.status.is_terminal())
    }

    /// Copy-on-write status transition.
    pub fn with_update(
        &self,
        id: &str,
        update: StatusUpdate,
    ) -> Result<ResearchPlan, TransitionError> {
        let index = self
            .sub_questions
            .iter()
            .position(|sq| sq.id == id)
            .ok_or_else(|| TransitionError::UnknownSubQuestion(id.to_string()))?;

        let current = &self.sub_questions[index];
        let target = update.target();
        if !current.status.can_transition_to(target) {
            return Err(TransitionError::Illegal {
                id: id.to_string(),
                from: current.status,
                to: target,
            });
        }

        let mut next = self.clone();
        let sq = &mut next.sub_questions[index];
        sq.status = target;
        match update {
            StatusUpdate::Running => {}
            StatusUpdate::Completed(answer) => sq.answer = Some(answer),
            StatusUpdate::Failed(reason) => sq.error = Some(reason),
        }
        Ok(next)
    }
}

/// Weighted search time plus a synthesis overhead that grows with the number
/// of sub-questions, rounded up to whole seconds.
pub fn estimate_total_time(sub_questions: &[SubQuestion]) -> u64 {
    let search: f64 = sub_questions
        .iter()
        .map(|sq| BASE_SEARCH_SECONDS * sq.priority.weight())
        .sum();
    let synthesis =
        SYNTHESIS_BASE_SECONDS + SYNTHESIS_PER_QUESTION_SECONDS * sub_questions.len() as f64;
    (search + synthesis).ceil() as u64
}
