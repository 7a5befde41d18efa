//! Dependency Scheduler
//!
//! Sole owner of the session's plan snapshot. Computes ready batches over the
//! dependency graph, applies status transitions by swapping in a new
//! `Arc<ResearchPlan>`, and decides when the session has to stop dispatching.

use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::research::plan::{
    ResearchPlan, StatusUpdate, SubQuestion, SubQuestionStatus, TransitionError,
};

/// Per-session dispatch limits.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResearchBudget {
    /// Number of batches that may be dispatched.
    pub max_rounds: u32,
    /// Dispatch stops once cumulative cost is strictly greater than this.
    pub max_cost: f64,
    #[serde(serialize_with = "serialize_secs")]
    pub max_duration: Duration,
}

fn serialize_secs<S: serde::Serializer>(
    duration: &Duration,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(duration.as_secs())
}

/// Why the scheduler stopped handing out work before the plan resolved.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum StopReason {
    RoundLimit { max_rounds: u32 },
    CostCeiling { spent: f64, max_cost: f64 },
    TimeBudget { elapsed_secs: u64 },
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::RoundLimit { max_rounds } => {
                write!(f, "round limit of {max_rounds} reached")
            }
            StopReason::CostCeiling { spent, max_cost } => {
                write!(f, "cost {spent:.4} exceeded ceiling {max_cost:.4}")
            }
            StopReason::TimeBudget { elapsed_secs } => {
                write!(f, "time budget exhausted after {elapsed_secs}s")
            }
        }
    }
}

/// Pending sub-questions whose every dependency is in `completed`, in plan order.
pub fn ready_batch(plan: &ResearchPlan, completed: &HashSet<String>) -> Vec<SubQuestion> {
    plan.sub_questions
        .iter()
        .filter(|sq| sq.is_ready(completed))
        .cloned()
        .collect()
}

/// Execution order over the whole plan. Cycles and dangling references do
/// not block: whatever cannot be ordered is appended in plan order.
pub fn topological_order(plan: &ResearchPlan) -> Vec<SubQuestion> {
    let mut ordered: Vec<SubQuestion> = Vec::with_capacity(plan.len());
    let mut done: HashSet<String> = HashSet::new();

    while ordered.len() < plan.len() {
        let batch: Vec<&SubQuestion> = plan
            .sub_questions
            .iter()
            .filter(|sq| !done.contains(&sq.id))
            .filter(|sq| sq.depends_on.iter().all(|dep| done.contains(dep)))
            .collect();

        if batch.is_empty() {
            let remaining: Vec<&SubQuestion> = plan
                .sub_questions
                .iter()
                .filter(|sq| !done.contains(&sq.id))
                .collect();
            warn!(
                plan_id = %plan.id,
                remaining = remaining.len(),
                "Unsatisfiable dependencies, appending remaining sub-questions in plan order"
            );
            ordered.extend(remaining.into_iter().cloned());
            break;
        }

        for sq in batch {
            done.insert(sq.id.clone());
            ordered.push(sq.clone());
        }
    }

    ordered
}

pub struct DependencyScheduler {
    plan: Arc<ResearchPlan>,
    budget: ResearchBudget,
    rounds: u32,
    cost: f64,
    started_at: Instant,
}

impl DependencyScheduler {
    pub fn new(plan: ResearchPlan, budget: ResearchBudget) -> Self {
        Self {
            plan: Arc::new(plan),
            budget,
            rounds: 0,
            cost: 0.0,
            started_at: Instant::now(),
        }
    }

    /// Measure the time budget from `started` instead of from construction,
    /// so classification and planning count against it.
    pub fn started_at(mut self, started: Instant) -> Self {
        self.started_at = started;
        self
    }

    /// Current snapshot; cheap to clone and never mutated afterwards.
    pub fn plan(&self) -> Arc<ResearchPlan> {
        Arc::clone(&self.plan)
    }

    pub fn budget(&self) -> &ResearchBudget {
        &self.budget
    }

    pub fn rounds(&self) -> u32 {
        self.rounds
    }

    pub fn total_cost(&self) -> f64 {
        self.cost
    }

    pub fn has_pending(&self) -> bool {
        self.plan.pending().next().is_some()
    }

    pub fn ready_batch(&self, completed: &HashSet<String>) -> Vec<SubQuestion> {
        ready_batch(&self.plan, completed)
    }

    pub fn topological_order(&self) -> Vec<SubQuestion> {
        topological_order(&self.plan)
    }

    /// Next batch to dispatch, counted as one round. When pending work exists
    /// but none of it is ready, every pending sub-question is released at once.
    pub fn next_batch(&mut self) -> Vec<SubQuestion> {
        let resolved = self.plan.resolved_ids();
        let mut batch = self.ready_batch(&resolved);

        if batch.is_empty() {
            batch = self.plan.pending().cloned().collect();
            if !batch.is_empty() {
                warn!(
                    plan_id = %self.plan.id,
                    remaining = batch.len(),
                    "No sub-question is ready, releasing blocked sub-questions"
                );
            }
        }

        if !batch.is_empty() {
            self.rounds += 1;
            debug!(
                round = self.rounds,
                size = batch.len(),
                ids = ?batch.iter().map(|sq| sq.id.as_str()).collect::<Vec<_>>(),
                "Batch ready"
            );
        }
        batch
    }

    /// Checked before each batch: cost, time, then rounds.
    pub fn stop_reason(&self) -> Option<StopReason> {
        if let Some(reason) = self.dispatch_blocker() {
            return Some(reason);
        }
        if self.rounds >= self.budget.max_rounds {
            return Some(StopReason::RoundLimit {
                max_rounds: self.budget.max_rounds,
            });
        }
        None
    }

    /// Checked before each individual dispatch inside a batch.
    pub fn dispatch_blocker(&self) -> Option<StopReason> {
        if self.cost > self.budget.max_cost {
            return Some(StopReason::CostCeiling {
                spent: self.cost,
                max_cost: self.budget.max_cost,
            });
        }
        let elapsed = self.started_at.elapsed();
        if elapsed >= self.budget.max_duration {
            return Some(StopReason::TimeBudget {
                elapsed_secs: elapsed.as_secs(),
            });
        }
        None
    }

    pub fn apply(&mut self, id: &str, update: StatusUpdate) -> Result<(), TransitionError> {
        let next = self.plan.with_update(id, update)?;
        self.plan = Arc::new(next);
        Ok(())
    }

    pub fn record_cost(&mut self, cost: f64) {
        if cost.is_finite() && cost > 0.0 {
            self.cost += cost;
        }
    }

    /// Fail every pending sub-question with a budget reason. Returns their ids.
    pub fn fail_remaining(&mut self, reason: &StopReason) -> Vec<String> {
        let ids: Vec<String> = self.plan.pending().map(|sq| sq.id.clone()).collect();
        for id in &ids {
            let update = StatusUpdate::Failed(format!("budget exceeded: {reason}"));
            if let Err(e) = self.apply(id, update) {
                warn!(sub_question = %id, error = %e, "Could not fail skipped sub-question");
            }
        }
        if !ids.is_empty() {
            info!(%reason, skipped = ids.len(), "Budget stop, remaining sub-questions failed");
        }
        ids
    }

    /// Fail anything still `running` once its batch has settled.
    pub fn sweep_running(&mut self) -> Vec<String> {
        let ids: Vec<String> = self
            .plan
            .sub_questions
            .iter()
            .filter(|sq| sq.status == SubQuestionStatus::Running)
            .map(|sq| sq.id.clone())
            .collect();
        for id in &ids {
            warn!(sub_question = %id, "Sub-question still running after its batch settled");
            let _ = self.apply(id, StatusUpdate::Failed("execution task lost".to_string()));
        }
        ids
    }
}
