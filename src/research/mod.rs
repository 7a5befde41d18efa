//! Research orchestration
//!
//! Query → complexity tier → plan of dependent sub-questions → bounded
//! concurrent execution with retry and budget control → synthesis, with every
//! state change streamed to the caller.

pub mod capabilities;
pub mod classifier;
pub mod events;
pub mod executor;
pub mod pipeline;
pub mod plan;
pub mod planner;
pub mod scheduler;
pub mod settings;
pub mod stream;
pub mod synthesis;

#[cfg(test)]
pub(crate) mod testing;

pub use capabilities::{Finding, Readiness, ResearchProvider};
pub use events::{EventEnvelope, ResearchResult, ResearchStreamEvent};
pub use pipeline::{ResearchPipeline, ResearchSession};
pub use plan::{QueryComplexity, ResearchPlan, SubQuestion, SubQuestionStatus};
pub use settings::ResearchSettings;
pub use stream::StreamMessage;
