//! Lifecycle events streamed to the caller.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::research::plan::{QueryComplexity, ResearchPlan, SubAnswer};
use crate::research::scheduler::StopReason;

/// Final outcome carried by the `done` event.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResearchResult {
    pub answer: String,
    pub plan: ResearchPlan,
    pub completed: usize,
    pub failed: usize,
    pub total_cost: f64,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<StopReason>,
    pub synthesis_fallback: bool,
    pub plan_fallback: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ResearchStreamEvent {
    Classified {
        complexity: QueryComplexity,
        forced: bool,
    },
    PlanCreated {
        plan: ResearchPlan,
    },
    SubQuestionStarted {
        sub_question_id: String,
        question: String,
    },
    SubQuestionCompleted {
        sub_question_id: String,
        answer: SubAnswer,
    },
    SubQuestionFailed {
        sub_question_id: String,
        error: String,
        attempts: u32,
    },
    BudgetExceeded {
        reason: StopReason,
        skipped: Vec<String>,
    },
    SynthesisStarted {
        completed: usize,
        failed: usize,
    },
    Done {
        result: ResearchResult,
    },
    Error {
        kind: String,
        message: String,
    },
    Aborted {
        reason: String,
    },
}

impl ResearchStreamEvent {
    /// Wire name, also used as the SSE event name.
    pub fn event_type(&self) -> &'static str {
        match self {
            ResearchStreamEvent::Classified { .. } => "classified",
            ResearchStreamEvent::PlanCreated { .. } => "plan_created",
            ResearchStreamEvent::SubQuestionStarted { .. } => "sub_question_started",
            ResearchStreamEvent::SubQuestionCompleted { .. } => "sub_question_completed",
            ResearchStreamEvent::SubQuestionFailed { .. } => "sub_question_failed",
            ResearchStreamEvent::BudgetExceeded { .. } => "budget_exceeded",
            ResearchStreamEvent::SynthesisStarted { .. } => "synthesis_started",
            ResearchStreamEvent::Done { .. } => "done",
            ResearchStreamEvent::Error { .. } => "error",
            ResearchStreamEvent::Aborted { .. } => "aborted",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ResearchStreamEvent::Done { .. }
                | ResearchStreamEvent::Error { .. }
                | ResearchStreamEvent::Aborted { .. }
        )
    }

    pub fn error(kind: impl Into<String>, message: impl Into<String>) -> Self {
        ResearchStreamEvent::Error {
            kind: kind.into(),
            message: message.into(),
        }
    }
}

/// One emitted event with its per-session sequence number.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventEnvelope {
    pub seq: u64,
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub event: ResearchStreamEvent,
}
