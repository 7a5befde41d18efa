//! Research tuning: concurrency, retry, timeouts, per-tier budgets and the
//! cost model.
//!
//! Layered with the `config` crate: built-in defaults, then an optional TOML
//! file (`RESEARCH_CONFIG`, default `research.toml`), then `RESEARCH__*`
//! environment variables, e.g. `RESEARCH__BUDGETS__COMPLEX__MAX_COST=1.0`.

use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

use crate::research::plan::QueryComplexity;
use crate::research::scheduler::ResearchBudget;
use crate::utils::retry::RetryPolicy;

const DEFAULT_SETTINGS_FILE: &str = "research.toml";

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to load research settings: {0}")]
    Load(#[from] config::ConfigError),

    #[error("invalid research settings: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TierBudget {
    pub max_rounds: u32,
    pub max_cost: f64,
    pub max_duration_secs: u64,
}

impl TierBudget {
    const fn new(max_rounds: u32, max_cost: f64, max_duration_secs: u64) -> Self {
        Self {
            max_rounds,
            max_cost,
            max_duration_secs,
        }
    }
}

impl Default for TierBudget {
    fn default() -> Self {
        Self::new(3, 0.25, 120)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TierBudgets {
    pub simple: TierBudget,
    pub moderate: TierBudget,
    pub complex: TierBudget,
}

impl Default for TierBudgets {
    fn default() -> Self {
        Self {
            simple: TierBudget::new(2, 0.10, 60),
            moderate: TierBudget::new(3, 0.25, 120),
            complex: TierBudget::new(4, 0.50, 180),
        }
    }
}

impl TierBudgets {
    pub fn for_tier(&self, complexity: QueryComplexity) -> &TierBudget {
        match complexity {
            QueryComplexity::Simple => &self.simple,
            QueryComplexity::Moderate => &self.moderate,
            QueryComplexity::Complex => &self.complex,
        }
    }
}

/// Prices used to estimate the cost of a sub-question answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CostModel {
    pub input_per_1k_tokens: f64,
    pub output_per_1k_tokens: f64,
    pub per_search: f64,
}

impl Default for CostModel {
    fn default() -> Self {
        Self {
            input_per_1k_tokens: 0.000_15,
            output_per_1k_tokens: 0.000_6,
            per_search: 0.005,
        }
    }
}

impl CostModel {
    pub fn estimate(&self, prompt_tokens: u32, completion_tokens: u32, searches: u32) -> f64 {
        (prompt_tokens as f64 / 1000.0) * self.input_per_1k_tokens
            + (completion_tokens as f64 / 1000.0) * self.output_per_1k_tokens
            + searches as f64 * self.per_search
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResearchSettings {
    /// Simultaneous sub-question calls per batch.
    pub concurrency: usize,
    /// Ask the provider to classify before falling back to the heuristic.
    pub llm_classification: bool,
    pub classification_timeout_secs: u64,
    pub planning_timeout_secs: u64,
    /// Applies to each individual answer attempt.
    pub attempt_timeout_secs: u64,
    pub synthesis_timeout_secs: u64,
    pub retry: RetryPolicy,
    pub budgets: TierBudgets,
    pub cost: CostModel,
}

impl Default for ResearchSettings {
    fn default() -> Self {
        Self {
            concurrency: 3,
            llm_classification: true,
            classification_timeout_secs: 15,
            planning_timeout_secs: 45,
            attempt_timeout_secs: 60,
            synthesis_timeout_secs: 120,
            retry: RetryPolicy::default(),
            budgets: TierBudgets::default(),
            cost: CostModel::default(),
        }
    }
}

impl ResearchSettings {
    pub fn load() -> Result<Self, SettingsError> {
        let path =
            env::var("RESEARCH_CONFIG").unwrap_or_else(|_| DEFAULT_SETTINGS_FILE.to_string());
        Self::load_from(&path)
    }

    pub fn load_from(path: &str) -> Result<Self, SettingsError> {
        let settings: ResearchSettings = config::Config::builder()
            .add_source(config::Config::try_from(&ResearchSettings::default())?)
            .add_source(config::File::with_name(path).required(false))
            .add_source(
                config::Environment::with_prefix("RESEARCH")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        settings.validate()?;
        info!(
            concurrency = settings.concurrency,
            max_retries = settings.retry.max_retries,
            llm_classification = settings.llm_classification,
            "Research settings loaded"
        );
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        let mut problems = Vec::new();

        if self.concurrency == 0 {
            problems.push("concurrency must be at least 1".to_string());
        }
        if !(0.0..1.0).contains(&self.retry.jitter) {
            problems.push(format!("retry.jitter must be in [0, 1), got {}", self.retry.jitter));
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            problems.push("retry.base_delay_ms must not exceed retry.max_delay_ms".to_string());
        }
        for (name, timeout) in [
            ("classification_timeout_secs", self.classification_timeout_secs),
            ("planning_timeout_secs", self.planning_timeout_secs),
            ("attempt_timeout_secs", self.attempt_timeout_secs),
            ("synthesis_timeout_secs", self.synthesis_timeout_secs),
        ] {
            if timeout == 0 {
                problems.push(format!("{name} must be positive"));
            }
        }
        for (tier, budget) in [
            ("simple", &self.budgets.simple),
            ("moderate", &self.budgets.moderate),
            ("complex", &self.budgets.complex),
        ] {
            if budget.max_rounds == 0 {
                problems.push(format!("budgets.{tier}.max_rounds must be at least 1"));
            }
            if !(budget.max_cost.is_finite() && budget.max_cost > 0.0) {
                problems.push(format!("budgets.{tier}.max_cost must be positive"));
            }
            if budget.max_duration_secs == 0 {
                problems.push(format!("budgets.{tier}.max_duration_secs must be positive"));
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(SettingsError::Invalid(problems.join("; ")))
        }
    }

    /// Session budget for a tier after request overrides.
    pub fn budget_for(
        &self,
        complexity: QueryComplexity,
        skip_round2: bool,
        max_cost: Option<f64>,
    ) -> ResearchBudget {
        let tier = self.budgets.for_tier(complexity);
        ResearchBudget {
            max_rounds: if skip_round2 { 1 } else { tier.max_rounds },
            max_cost: max_cost.unwrap_or(tier.max_cost),
            max_duration: Duration::from_secs(tier.max_duration_secs),
        }
    }

    pub fn classification_timeout(&self) -> Duration {
        Duration::from_secs(self.classification_timeout_secs)
    }

    pub fn planning_timeout(&self) -> Duration {
        Duration::from_secs(self.planning_timeout_secs)
    }

    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_secs(self.attempt_timeout_secs)
    }

    pub fn synthesis_timeout(&self) -> Duration {
        Duration::from_secs(self.synthesis_timeout_secs)
    }
}
