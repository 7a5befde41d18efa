//! Scripted provider shared by the orchestration tests.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use crate::research::capabilities::{Finding, Readiness, ResearchProvider};
use crate::research::plan::{QueryComplexity, SubAnswer, SubQuestion};
use crate::types::{AppError, AppResult};

pub(crate) struct ScriptedProvider {
    pub readiness: Readiness,
    pub complexity: Result<QueryComplexity, String>,
    pub generation: Result<String, String>,
    pub synthesis: Result<String, String>,
    pub answer_cost: f64,
    pub answer_delay: Duration,
    scripted: Mutex<HashMap<String, VecDeque<Result<SubAnswer, String>>>>,
    pub answered: Mutex<Vec<String>>,
    pub synthesized: Mutex<Vec<Vec<Finding>>>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self {
            readiness: Readiness { generation: true, search: true },
            complexity: Ok(QueryComplexity::Moderate),
            generation: Err("generator not scripted".to_string()),
            synthesis: Ok("final synthesized answer".to_string()),
            answer_cost: 0.01,
            answer_delay: Duration::from_millis(0),
            scripted: Mutex::new(HashMap::new()),
            answered: Mutex::new(Vec::new()),
            synthesized: Mutex::new(Vec::new()),
        }
    }

    pub fn with_generation(mut self, text: impl Into<String>) -> Self {
        self.generation = Ok(text.into());
        self
    }

    pub fn with_generation_error(mut self, error: impl Into<String>) -> Self {
        self.generation = Err(error.into());
        self
    }

    pub fn with_complexity(mut self, complexity: Result<QueryComplexity, String>) -> Self {
        self.complexity = complexity;
        self
    }

    pub fn with_synthesis(mut self, synthesis: Result<String, String>) -> Self {
        self.synthesis = synthesis;
        self
    }

    pub fn with_answer_cost(mut self, cost: f64) -> Self {
        self.answer_cost = cost;
        self
    }

    pub fn with_answer_delay(mut self, delay: Duration) -> Self {
        self.answer_delay = delay;
        self
    }

    pub fn with_readiness(mut self, generation: bool, search: bool) -> Self {
        self.readiness = Readiness { generation, search };
        self
    }

    /// Queue outcomes for a question; unscripted attempts succeed.
    pub fn script(self, question: &str, outcomes: Vec<Result<&str, &str>>) -> Self {
        let cost = self.answer_cost;
        let queue = outcomes
            .into_iter()
            .map(|o| match o {
                Ok(text) => Ok(SubAnswer::new(text, cost)),
                Err(e) => Err(e.to_string()),
            })
            .collect();
        self.scripted
            .lock()
            .unwrap()
            .insert(question.to_string(), queue);
        self
    }

    pub fn answered(&self) -> Vec<String> {
        self.answered.lock().unwrap().clone()
    }
}

/// `n` generator entries without dependencies.
pub(crate) fn generated_questions(n: usize) -> String {
    let items: Vec<serde_json::Value> = (1..=n)
        .map(|i| {
            serde_json::json!({
                "question": format!("What is aspect number {i} of the topic?"),
                "reasoning": format!("covers aspect {i}"),
                "priority": "medium",
                "dependsOn": []
            })
        })
        .collect();
    serde_json::to_string(&items).unwrap()
}

#[async_trait]
impl ResearchProvider for ScriptedProvider {
    fn readiness(&self) -> Readiness {
        self.readiness
    }

    async fn classify_complexity(&self, _query: &str) -> AppResult<QueryComplexity> {
        self.complexity.clone().map_err(AppError::LLMApi)
    }

    async fn generate_sub_questions(
        &self,
        _query: &str,
        _complexity: QueryComplexity,
    ) -> AppResult<String> {
        self.generation.clone().map_err(AppError::LLMApi)
    }

    async fn answer_sub_question(&self, sub_question: &SubQuestion) -> AppResult<SubAnswer> {
        if !self.answer_delay.is_zero() {
            tokio::time::sleep(self.answer_delay).await;
        }
        self.answered.lock().unwrap().push(sub_question.question.clone());

        let scripted = self
            .scripted
            .lock()
            .unwrap()
            .get_mut(&sub_question.question)
            .and_then(|queue| queue.pop_front());

        match scripted {
            Some(Ok(answer)) => Ok(answer),
            Some(Err(message)) => Err(AppError::LLMApi(message)),
            None => Ok(SubAnswer::new(
                format!("answer to {}", sub_question.question),
                self.answer_cost,
            )),
        }
    }

    async fn synthesize(&self, _original_query: &str, findings: &[Finding]) -> AppResult<String> {
        self.synthesized.lock().unwrap().push(findings.to_vec());
        self.synthesis.clone().map_err(AppError::LLMApi)
    }
}
