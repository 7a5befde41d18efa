//! Research session coordinator.
//!
//! One spawned task per session drives classification, planning, batch
//! execution and synthesis. It is the only writer of the plan snapshot and
//! the only producer on the session's event stream.

use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::models::{ResearchOptions, ResearchRequest};
use crate::research::capabilities::{Finding, Readiness, ResearchProvider};
use crate::research::classifier::ComplexityClassifier;
use crate::research::events::{ResearchResult, ResearchStreamEvent};
use crate::research::executor::{ExecutionEngine, ExecutionError, ExecutionObserver};
use crate::research::plan::{PlanOrigin, StatusUpdate, SubAnswer, SubQuestion, SubQuestionStatus};
use crate::research::planner::ResearchPlanner;
use crate::research::scheduler::{DependencyScheduler, StopReason};
use crate::research::settings::ResearchSettings;
use crate::research::stream::{self, StreamEmitter, StreamMessage};
use crate::research::synthesis::Synthesizer;
use crate::session_store::{SessionRecord, SessionStatus, SessionStore};
use crate::types::{AppError, AppResult};

/// Handle to a running session.
#[derive(Debug)]
pub struct ResearchSession {
    pub session_id: String,
    pub events: mpsc::UnboundedReceiver<StreamMessage>,
    pub cancel: CancellationToken,
    pub handle: JoinHandle<()>,
}

#[derive(Clone)]
pub struct ResearchPipeline {
    provider: Arc<dyn ResearchProvider>,
    settings: Arc<ResearchSettings>,
    store: SessionStore,
}

impl ResearchPipeline {
    pub fn new(
        provider: Arc<dyn ResearchProvider>,
        settings: ResearchSettings,
        store: SessionStore,
    ) -> Self {
        Self {
            provider,
            settings: Arc::new(settings),
            store,
        }
    }

    pub fn readiness(&self) -> Readiness {
        self.provider.readiness()
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    pub fn settings(&self) -> &ResearchSettings {
        &self.settings
    }

    /// Validate, check readiness, and spawn the session. Errors here happen
    /// before any event is produced.
    pub async fn start(&self, request: ResearchRequest) -> AppResult<ResearchSession> {
        request.check()?;

        let readiness = self.readiness();
        if !readiness.is_ready() {
            warn!(
                missing = ?readiness.missing(),
                "Research requested but capabilities are missing"
            );
            return Err(AppError::NotConfigured(format!(
                "missing capabilities: {}",
                readiness.missing().join(", ")
            )));
        }

        let session_id = Uuid::new_v4().to_string();
        let query = request.query.trim().to_string();
        let cancel = CancellationToken::new();
        let (emitter, events) = stream::channel(&session_id, cancel.clone());

        self.store.insert(SessionRecord::new(&session_id, &query)).await;
        info!(session_id = %session_id, query_len = query.len(), "Research session started");

        let span = info_span!("research_session", session_id = %session_id);
        let handle = tokio::spawn(
            self.clone()
                .run_session(query, request.options, emitter, cancel.clone())
                .instrument(span),
        );

        Ok(ResearchSession {
            session_id,
            events,
            cancel,
            handle,
        })
    }

    async fn run_session(
        self,
        query: String,
        options: ResearchOptions,
        mut emitter: StreamEmitter,
        cancel: CancellationToken,
    ) {
        let session_id = emitter.session_id().to_string();
        let outcome = AssertUnwindSafe(self.drive(&query, &options, &mut emitter, &cancel))
            .catch_unwind()
            .await;

        match outcome {
            Ok(Ok(result)) => {
                info!(
                    completed = result.completed,
                    failed = result.failed,
                    total_cost = result.total_cost,
                    duration_ms = result.duration_ms,
                    "Research session finished"
                );
                self.store.complete(&session_id, result.clone()).await;
                emitter.emit(ResearchStreamEvent::Done { result });
            }
            Ok(Err(AppError::Cancelled(reason))) => {
                info!(%reason, "Research session aborted");
                self.store.fail(&session_id, SessionStatus::Aborted, reason.clone()).await;
                emitter.emit(ResearchStreamEvent::Aborted { reason });
            }
            Ok(Err(e)) => {
                error!(error = %e, "Research session failed");
                self.store.fail(&session_id, SessionStatus::Failed, e.to_string()).await;
                emitter.emit(ResearchStreamEvent::error(e.code(), e.to_string()));
            }
            Err(_) => {
                error!("Research session panicked");
                self.store
                    .fail(&session_id, SessionStatus::Failed, "internal error")
                    .await;
                emitter.emit(ResearchStreamEvent::error(
                    "internal",
                    "research session failed unexpectedly",
                ));
            }
        }
        emitter.close();
    }

    async fn drive(
        &self,
        query: &str,
        options: &ResearchOptions,
        emitter: &mut StreamEmitter,
        cancel: &CancellationToken,
    ) -> AppResult<ResearchResult> {
        let started = Instant::now();
        let session_id = emitter.session_id().to_string();
        let settings = &self.settings;

        // Classification
        let (complexity, forced) = match options.force_complexity {
            Some(complexity) => (complexity, true),
            None => {
                let classifier = if settings.llm_classification {
                    ComplexityClassifier::with_provider(
                        self.provider.clone(),
                        settings.classification_timeout(),
                    )
                } else {
                    ComplexityClassifier::heuristic()
                };
                let complexity = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(cancelled()),
                    complexity = classifier.classify(query) => complexity,
                };
                (complexity, false)
            }
        };
        info!(%complexity, forced, "Query classified");
        self.store.set_complexity(&session_id, complexity).await;
        emitter.emit(ResearchStreamEvent::Classified { complexity, forced });

        // Planning
        let planner = ResearchPlanner::new(self.provider.clone(), settings.planning_timeout());
        let plan = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(cancelled()),
            plan = planner.create_plan(query, &session_id, complexity) => plan,
        };
        let plan_fallback = plan.origin == PlanOrigin::Fallback;
        self.store.update_plan(&session_id, &plan).await;
        emitter.emit(ResearchStreamEvent::PlanCreated { plan: plan.clone() });

        // Execution
        let budget = settings.budget_for(complexity, options.skip_round2, options.max_cost);
        info!(
            max_rounds = budget.max_rounds,
            max_cost = budget.max_cost,
            max_duration_secs = budget.max_duration.as_secs(),
            "Budget set"
        );
        let mut scheduler = DependencyScheduler::new(plan, budget).started_at(started);
        let engine = ExecutionEngine::new(
            self.provider.clone(),
            settings.retry.clone(),
            settings.concurrency,
            settings.attempt_timeout(),
        );

        let mut stop_reason: Option<StopReason> = None;
        while scheduler.has_pending() {
            if cancel.is_cancelled() {
                return Err(cancelled());
            }
            if let Some(reason) = scheduler.stop_reason() {
                let skipped = scheduler.fail_remaining(&reason);
                emitter.emit(ResearchStreamEvent::BudgetExceeded {
                    reason: reason.clone(),
                    skipped,
                });
                stop_reason = Some(reason);
                break;
            }

            let batch = scheduler.next_batch();
            if batch.is_empty() {
                break;
            }
            info!(round = scheduler.rounds(), size = batch.len(), "Dispatching batch");

            let mut observer = SessionObserver {
                scheduler: &mut scheduler,
                emitter: &mut *emitter,
            };
            engine.run_batch(batch, &mut observer, cancel).await;

            for id in scheduler.sweep_running() {
                emitter.emit(ResearchStreamEvent::SubQuestionFailed {
                    sub_question_id: id,
                    error: "execution task lost".to_string(),
                    attempts: 0,
                });
            }
            self.store.update_plan(&session_id, &scheduler.plan()).await;
        }
        if cancel.is_cancelled() {
            return Err(cancelled());
        }

        // Synthesis
        let plan = scheduler.plan();
        let completed = plan.count(SubQuestionStatus::Completed);
        let failed = plan.count(SubQuestionStatus::Failed);
        info!(completed, failed, "Starting synthesis");
        emitter.emit(ResearchStreamEvent::SynthesisStarted { completed, failed });

        let findings: Vec<Finding> =
            plan.sub_questions.iter().map(Finding::from_sub_question).collect();
        let synthesizer = Synthesizer::new(
            self.provider.clone(),
            settings.retry.clone(),
            settings.synthesis_timeout(),
        );
        let synthesis = synthesizer
            .run(query, &findings, cancel)
            .await
            .ok_or_else(cancelled)?;

        Ok(ResearchResult {
            answer: synthesis.answer,
            plan: (*plan).clone(),
            completed,
            failed,
            total_cost: scheduler.total_cost(),
            duration_ms: started.elapsed().as_millis() as u64,
            stop_reason,
            synthesis_fallback: synthesis.fallback,
            plan_fallback,
        })
    }
}

fn cancelled() -> AppError {
    AppError::Cancelled("research session cancelled".to_string())
}

/// Applies execution outcomes to the plan and mirrors them on the stream.
struct SessionObserver<'a> {
    scheduler: &'a mut DependencyScheduler,
    emitter: &'a mut StreamEmitter,
}

impl ExecutionObserver for SessionObserver<'_> {
    fn may_dispatch(&mut self) -> bool {
        match self.scheduler.dispatch_blocker() {
            Some(reason) => {
                info!(%reason, "Holding back remaining dispatches");
                false
            }
            None => true,
        }
    }

    fn on_started(&mut self, sub_question: &SubQuestion) {
        if let Err(e) = self.scheduler.apply(&sub_question.id, StatusUpdate::Running) {
            warn!(error = %e, "Could not mark sub-question running");
        }
        info!(
            sub_question = %sub_question.id,
            priority = ?sub_question.priority,
            "Sub-question started"
        );
        self.emitter.emit(ResearchStreamEvent::SubQuestionStarted {
            sub_question_id: sub_question.id.clone(),
            question: sub_question.question.clone(),
        });
    }

    fn on_finished(
        &mut self,
        sub_question: &SubQuestion,
        outcome: Result<SubAnswer, ExecutionError>,
    ) {
        let id = sub_question.id.clone();
        match outcome {
            Ok(answer) => {
                self.scheduler.record_cost(answer.cost);
                info!(
                    sub_question = %id,
                    cost = answer.cost,
                    total_cost = self.scheduler.total_cost(),
                    "Sub-question completed"
                );
                if let Err(e) = self.scheduler.apply(&id, StatusUpdate::Completed(answer.clone())) {
                    warn!(error = %e, "Could not mark sub-question completed");
                }
                self.emitter.emit(ResearchStreamEvent::SubQuestionCompleted {
                    sub_question_id: id,
                    answer,
                });
            }
            Err(e) => {
                warn!(
                    sub_question = %id,
                    attempts = e.attempts,
                    class = ?e.class,
                    aborted = e.aborted,
                    error = %e.message,
                    "Sub-question failed"
                );
                let update = StatusUpdate::Failed(e.message.clone());
                if let Err(err) = self.scheduler.apply(&id, update) {
                    warn!(error = %err, "Could not mark sub-question failed");
                }
                // Cancelled work is reported once, by the terminal aborted event.
                if e.aborted {
                    return;
                }
                self.emitter.emit(ResearchStreamEvent::SubQuestionFailed {
                    sub_question_id: id,
                    error: e.message,
                    attempts: e.attempts,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::research::events::EventEnvelope;
    use crate::research::plan::QueryComplexity;
    use crate::research::testing::{generated_questions, ScriptedProvider};
    use crate::utils::retry::RetryPolicy;
    use serde_json::json;
    use std::time::Duration;

    fn settings() -> ResearchSettings {
        ResearchSettings {
            retry: RetryPolicy {
                max_retries: 2,
                base_delay_ms: 10,
                max_delay_ms: 100,
                jitter: 0.0,
            },
            ..ResearchSettings::default()
        }
    }

    fn pipeline_with(
        provider: ScriptedProvider,
        settings: ResearchSettings,
    ) -> (ResearchPipeline, Arc<ScriptedProvider>) {
        let provider = Arc::new(provider);
        let pipeline = ResearchPipeline::new(provider.clone(), settings, SessionStore::default());
        (pipeline, provider)
    }

    fn options(complexity: QueryComplexity) -> ResearchOptions {
        ResearchOptions {
            force_complexity: Some(complexity),
            ..Default::default()
        }
    }

    async fn collect(mut session: ResearchSession) -> Vec<EventEnvelope> {
        let mut events = Vec::new();
        while let Some(message) = session.events.recv().await {
            match message {
                StreamMessage::Event(envelope) => events.push(envelope),
                StreamMessage::End => break,
            }
        }
        session.handle.await.unwrap();
        events
    }

    fn types(events: &[EventEnvelope]) -> Vec<&'static str> {
        events.iter().map(|e| e.event.event_type()).collect()
    }

    fn done_result(events: &[EventEnvelope]) -> ResearchResult {
        match &events.last().unwrap().event {
            ResearchStreamEvent::Done { result } => result.clone(),
            other => panic!("expected done, got {other:?}"),
        }
    }

    fn position(events: &[EventEnvelope], event_type: &str, id: &str) -> Option<usize> {
        events.iter().position(|e| {
            let json = serde_json::to_value(&e.event).unwrap();
            json["type"] == event_type && json["subQuestionId"] == id
        })
    }

    #[tokio::test]
    async fn test_full_session_event_order() {
        let provider = ScriptedProvider::new().with_generation(generated_questions(4));
        let (pipeline, _) = pipeline_with(provider, settings());

        let session = pipeline
            .start(ResearchRequest::new(
                "Compare two cloud databases for OLTP workloads",
                options(QueryComplexity::Complex),
            ))
            .await
            .unwrap();
        let session_id = session.session_id.clone();
        let events = collect(session).await;

        let kinds = types(&events);
        assert_eq!(kinds[0], "classified");
        assert_eq!(kinds[1], "plan_created");
        assert_eq!(kinds[kinds.len() - 2], "synthesis_started");
        assert_eq!(kinds[kinds.len() - 1], "done");
        assert_eq!(kinds.iter().filter(|k| **k == "sub_question_started").count(), 4);
        assert_eq!(kinds.iter().filter(|k| **k == "sub_question_completed").count(), 4);

        for i in 1..=4 {
            let id = format!("sq-{i}");
            let started = position(&events, "sub_question_started", &id).unwrap();
            let completed = position(&events, "sub_question_completed", &id).unwrap();
            assert!(started < completed);
        }

        let seqs: Vec<u64> = events.iter().map(|e| e.seq).collect();
        assert!(seqs.windows(2).all(|w| w[1] == w[0] + 1));

        let result = done_result(&events);
        assert_eq!(result.completed, 4);
        assert_eq!(result.answer, "final synthesized answer");
        assert!(!result.synthesis_fallback);
        assert!(result.stop_reason.is_none());

        let record = pipeline.store().get(&session_id).await.unwrap();
        assert_eq!(record.status, SessionStatus::Completed);
        assert!(record.result.is_some());
    }

    #[tokio::test]
    async fn test_max_cost_stops_after_two_of_four() {
        let provider = ScriptedProvider::new()
            .with_generation(generated_questions(4))
            .with_answer_cost(0.01);
        let (pipeline, provider) = pipeline_with(
            provider,
            ResearchSettings {
                concurrency: 1,
                ..settings()
            },
        );

        let session = pipeline
            .start(ResearchRequest::new(
                "Compare two cloud databases for OLTP workloads",
                ResearchOptions {
                    force_complexity: Some(QueryComplexity::Complex),
                    max_cost: Some(0.015),
                    ..Default::default()
                },
            ))
            .await
            .unwrap();
        let events = collect(session).await;
        let kinds = types(&events);

        assert_eq!(kinds.iter().filter(|k| **k == "sub_question_completed").count(), 2);
        assert_eq!(kinds.iter().filter(|k| **k == "sub_question_started").count(), 2);
        assert!(kinds.contains(&"budget_exceeded"));
        assert!(kinds.contains(&"synthesis_started"));
        assert_eq!(provider.answered().len(), 2);

        let budget_event = events
            .iter()
            .find(|e| e.event.event_type() == "budget_exceeded")
            .unwrap();
        let json = serde_json::to_value(&budget_event.event).unwrap();
        assert_eq!(json["skipped"], json!(["sq-3", "sq-4"]));
        assert_eq!(json["reason"]["kind"], "cost_ceiling");

        let result = done_result(&events);
        assert_eq!(result.completed, 2);
        assert_eq!(result.failed, 2);
        for id in ["sq-3", "sq-4"] {
            let sq = result.plan.get(id).unwrap();
            assert_eq!(sq.status, SubQuestionStatus::Failed);
            assert!(sq.error.as_deref().unwrap().starts_with("budget exceeded"));
        }

        let synthesized = provider.synthesized.lock().unwrap();
        assert_eq!(synthesized[0].iter().filter(|f| f.is_answered()).count(), 2);
    }

    #[tokio::test]
    async fn test_generator_failure_uses_fallback_plan() {
        let provider =
            ScriptedProvider::new().with_generation_error("HTTP 500 Internal Server Error");
        let (pipeline, provider) = pipeline_with(provider, settings());

        let session = pipeline
            .start(ResearchRequest::new(
                "Is serverless cheaper?",
                options(QueryComplexity::Moderate),
            ))
            .await
            .unwrap();
        let events = collect(session).await;

        let result = done_result(&events);
        assert!(result.plan_fallback);
        assert_eq!(result.plan.len(), 2);
        assert_eq!(provider.answered().len(), 2);
    }

    #[tokio::test]
    async fn test_skip_round2_limits_to_one_round() {
        let generation = json!([
            {"question": "What are the main OLTP database options?"},
            {"question": "How do those options compare on latency?", "dependsOn": [1]}
        ])
        .to_string();
        let provider = ScriptedProvider::new().with_generation(generation);
        let (pipeline, _) = pipeline_with(provider, settings());

        let session = pipeline
            .start(ResearchRequest::new(
                "Compare two cloud databases",
                ResearchOptions {
                    force_complexity: Some(QueryComplexity::Moderate),
                    skip_round2: true,
                    ..Default::default()
                },
            ))
            .await
            .unwrap();
        let events = collect(session).await;

        let result = done_result(&events);
        assert_eq!(result.completed, 1);
        assert_eq!(result.failed, 1);
        assert!(matches!(result.stop_reason, Some(StopReason::RoundLimit { max_rounds: 1 })));
        assert!(position(&events, "sub_question_started", "sq-2").is_none());
    }

    #[tokio::test]
    async fn test_dependent_runs_after_dependency() {
        let generation = json!([
            {"question": "How do those options compare on latency?", "dependsOn": ["sq-2"]},
            {"question": "What are the main OLTP database options?"}
        ])
        .to_string();
        let provider = ScriptedProvider::new().with_generation(generation);
        let (pipeline, provider) = pipeline_with(provider, settings());

        let session = pipeline
            .start(ResearchRequest::new("Compare databases", options(QueryComplexity::Moderate)))
            .await
            .unwrap();
        let events = collect(session).await;

        let dep_done = position(&events, "sub_question_completed", "sq-2").unwrap();
        let dependent_started = position(&events, "sub_question_started", "sq-1").unwrap();
        assert!(dep_done < dependent_started);
        assert_eq!(
            provider.answered(),
            vec![
                "What are the main OLTP database options?".to_string(),
                "How do those options compare on latency?".to_string()
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_partial_failure_and_synthesis_fallback() {
        let provider = ScriptedProvider::new()
            .with_generation(generated_questions(2))
            .with_synthesis(Err("503 Service Unavailable".into()))
            .script("What is aspect number 2 of the topic?", vec![Err("HTTP 401 Unauthorized")]);
        let (pipeline, _) = pipeline_with(provider, settings());

        let session = pipeline
            .start(ResearchRequest::new("Explain the topic", options(QueryComplexity::Simple)))
            .await
            .unwrap();
        let events = collect(session).await;
        let kinds = types(&events);

        assert!(kinds.contains(&"sub_question_failed"));
        let result = done_result(&events);
        assert_eq!(result.completed, 1);
        assert_eq!(result.failed, 1);
        assert!(result.synthesis_fallback);
        assert!(result.answer.contains("What is aspect number 1 of the topic?"));
    }

    #[tokio::test]
    async fn test_nothing_answered_skips_synthesis_call() {
        let provider = ScriptedProvider::new()
            .with_generation(generated_questions(1))
            .script("What is aspect number 1 of the topic?", vec![Err("400 bad request")]);
        let (pipeline, provider) = pipeline_with(provider, settings());

        let session = pipeline
            .start(ResearchRequest::new("Explain the topic", options(QueryComplexity::Simple)))
            .await
            .unwrap();
        let events = collect(session).await;

        let result = done_result(&events);
        assert!(result.synthesis_fallback);
        assert_eq!(result.completed, 0);
        assert!(provider.synthesized.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_not_configured_refuses_to_start() {
        let provider = ScriptedProvider::new().with_readiness(true, false);
        let (pipeline, _) = pipeline_with(provider, settings());

        let err = pipeline
            .start(ResearchRequest::new("What is Rust?", ResearchOptions::default()))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotConfigured(ref m) if m.contains("search")));
        assert_eq!(pipeline.store().len().await, 0);
    }

    #[tokio::test]
    async fn test_invalid_request_rejected() {
        let (pipeline, _) = pipeline_with(ScriptedProvider::new(), settings());
        let err = pipeline
            .start(ResearchRequest::new("  ", ResearchOptions::default()))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidRequest(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_ends_with_aborted() {
        let provider = ScriptedProvider::new()
            .with_generation(generated_questions(3))
            .with_answer_delay(Duration::from_secs(30));
        let (pipeline, _) = pipeline_with(provider, settings());

        let session = pipeline
            .start(ResearchRequest::new("Compare things", options(QueryComplexity::Complex)))
            .await
            .unwrap();
        let session_id = session.session_id.clone();
        let cancel = session.cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            cancel.cancel();
        });

        let events = collect(session).await;
        let types = types(&events);
        assert_eq!(types.last(), Some(&"aborted"));
        assert!(!types.contains(&"done"));
        // In-flight work was started, then cut short without per-item failures.
        assert!(types.contains(&"sub_question_started"));
        assert!(!types.contains(&"sub_question_failed"));

        let record = pipeline.store().get(&session_id).await.unwrap();
        assert_eq!(record.status, SessionStatus::Aborted);
    }

    #[tokio::test]
    async fn test_classifier_used_when_not_forced() {
        let provider = ScriptedProvider::new()
            .with_complexity(Ok(QueryComplexity::Simple))
            .with_generation(generated_questions(5));
        let (pipeline, _) = pipeline_with(provider, settings());

        let session = pipeline
            .start(ResearchRequest::new("What is Rust?", ResearchOptions::default()))
            .await
            .unwrap();
        let events = collect(session).await;

        let classified = serde_json::to_value(&events[0].event).unwrap();
        assert_eq!(classified["complexity"], "simple");
        assert_eq!(classified["forced"], false);
        assert_eq!(done_result(&events).plan.len(), 2);
    }
}
