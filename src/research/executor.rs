//! Execution Engine
//!
//! Runs one ready batch with bounded concurrency. Each sub-question gets its
//! own retrying provider call; outcomes are reported back through an
//! [`ExecutionObserver`] one at a time, so the coordinator stays the only
//! writer of plan state.

use futures::FutureExt;
use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::research::capabilities::ResearchProvider;
use crate::research::plan::{SubAnswer, SubQuestion};
use crate::types::AppError;
use crate::utils::retry::{retry_with_backoff, ErrorClass, RetryError, RetryPolicy};

/// Terminal error for one sub-question, after retries.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct ExecutionError {
    pub message: String,
    pub attempts: u32,
    pub class: Option<ErrorClass>,
    pub aborted: bool,
}

impl ExecutionError {
    fn panicked() -> Self {
        Self {
            message: "execution task panicked".to_string(),
            attempts: 1,
            class: None,
            aborted: false,
        }
    }
}

impl From<RetryError<AppError>> for ExecutionError {
    fn from(err: RetryError<AppError>) -> Self {
        match err {
            RetryError::Aborted { attempts } => Self {
                message: "cancelled".to_string(),
                attempts,
                class: None,
                aborted: true,
            },
            RetryError::Failed { error, attempts, class } => Self {
                message: error.to_string(),
                attempts,
                class: Some(class),
                aborted: false,
            },
        }
    }
}

/// Hooks the coordinator uses to gate dispatch and record transitions.
pub trait ExecutionObserver: Send {
    /// Asked before every individual dispatch; `false` holds back the rest of the batch.
    fn may_dispatch(&mut self) -> bool;

    fn on_started(&mut self, sub_question: &SubQuestion);

    fn on_finished(
        &mut self,
        sub_question: &SubQuestion,
        outcome: Result<SubAnswer, ExecutionError>,
    );
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchSummary {
    pub dispatched: usize,
    pub completed: usize,
    pub failed: usize,
    /// Never dispatched because the observer or cancellation stopped the batch.
    pub held_back: usize,
}

#[derive(Clone)]
pub struct ExecutionEngine {
    provider: Arc<dyn ResearchProvider>,
    retry: RetryPolicy,
    concurrency: usize,
    attempt_timeout: Duration,
}

impl ExecutionEngine {
    pub fn new(
        provider: Arc<dyn ResearchProvider>,
        retry: RetryPolicy,
        concurrency: usize,
        attempt_timeout: Duration,
    ) -> Self {
        Self {
            provider,
            retry,
            concurrency: concurrency.max(1),
            attempt_timeout,
        }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Answer one sub-question with retry and a per-attempt timeout.
    pub async fn execute(
        &self,
        sub_question: &SubQuestion,
        cancel: &CancellationToken,
    ) -> Result<SubAnswer, ExecutionError> {
        let label = format!("answer {}", sub_question.id);
        let provider = &self.provider;
        let timeout = self.attempt_timeout;

        retry_with_backoff(&self.retry, cancel, &label, |attempt| async move {
            debug!(sub_question = %sub_question.id, attempt, "Answering sub-question");
            match tokio::time::timeout(timeout, provider.answer_sub_question(sub_question)).await {
                Ok(result) => result,
                Err(_) => Err(AppError::Timeout(timeout.as_secs())),
            }
        })
        .await
        .map_err(ExecutionError::from)
    }

    /// Run `batch` with at most `concurrency` calls in flight. Returns once
    /// every dispatched call has settled.
    pub async fn run_batch<O: ExecutionObserver>(
        &self,
        batch: Vec<SubQuestion>,
        observer: &mut O,
        cancel: &CancellationToken,
    ) -> BatchSummary {
        let mut queue: VecDeque<SubQuestion> = batch.into();
        let mut in_flight: JoinSet<(SubQuestion, Result<SubAnswer, ExecutionError>)> =
            JoinSet::new();
        let mut summary = BatchSummary::default();

        loop {
            while in_flight.len() < self.concurrency {
                let Some(sub_question) = queue.pop_front() else {
                    break;
                };
                if cancel.is_cancelled() || !observer.may_dispatch() {
                    summary.held_back = queue.len() + 1;
                    queue.clear();
                    break;
                }

                observer.on_started(&sub_question);
                summary.dispatched += 1;

                let engine = self.clone();
                let token = cancel.clone();
                in_flight.spawn(async move {
                    let outcome = AssertUnwindSafe(engine.execute(&sub_question, &token))
                        .catch_unwind()
                        .await
                        .unwrap_or_else(|_| Err(ExecutionError::panicked()));
                    (sub_question, outcome)
                });
            }

            match in_flight.join_next().await {
                Some(Ok((sub_question, outcome))) => {
                    match &outcome {
                        Ok(_) => summary.completed += 1,
                        Err(_) => summary.failed += 1,
                    }
                    observer.on_finished(&sub_question, outcome);
                }
                Some(Err(e)) => warn!(error = %e, "Execution task could not be joined"),
                None => break,
            }
        }

        info!(
            dispatched = summary.dispatched,
            completed = summary.completed,
            failed = summary.failed,
            held_back = summary.held_back,
            "Batch settled"
        );
        summary
    }
}
