use anyhow::{Context, Result};
use serde::Deserialize;
use std::env;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub llm: LLMConfig,
    pub search: SearchConfig,
    pub rate_limit: RateLimitConfig,
    pub log_dir: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
    pub cors_allowed_origins: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LLMConfig {
    pub provider: String,
    pub model: String,
    pub base_url: Option<String>,
    pub openai_api_key: String,
    pub openrouter_api_key: String,
    pub groq_api_key: String,
    pub glm_api_key: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchConfig {
    pub serpapi_key: String,
    pub scholar_enabled: bool,
    pub light_enabled: bool,
    pub max_results: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    /// Research requests admitted per minute; 0 disables the limiter.
    pub per_minute: u32,
}

impl LLMConfig {
    /// Key for the selected provider, if one is set.
    pub fn active_api_key(&self) -> Option<&str> {
        let key = match self.provider.as_str() {
            "openai" => &self.openai_api_key,
            "openrouter" => &self.openrouter_api_key,
            "groq" => &self.groq_api_key,
            "glm" | "glm-general" => &self.glm_api_key,
            // Custom endpoints reuse the OpenAI key slot.
            _ => &self.openai_api_key,
        };
        Some(key.as_str()).filter(|k| !k.trim().is_empty())
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from any key lookup. `from_env` is this over the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());
        let opt = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        Ok(Self {
            server: ServerConfig {
                port: var("PORT", "3000").parse().context("PORT must be a port number")?,
                host: var("HOST", "0.0.0.0"),
                cors_allowed_origins: var(
                    "ALLOWED_ORIGINS",
                    "http://localhost:3000,http://localhost:5173",
                )
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            },
            llm: LLMConfig {
                provider: var("LLM_PROVIDER", "openai").to_lowercase(),
                model: var("LLM_MODEL", "gpt-4o-mini"),
                base_url: opt("LLM_BASE_URL"),
                openai_api_key: var("OPENAI_API_KEY", ""),
                openrouter_api_key: var("OPENROUTER_API_KEY", ""),
                groq_api_key: var("GROQ_API_KEY", ""),
                glm_api_key: var("GLM_API_KEY", ""),
            },
            search: SearchConfig {
                serpapi_key: var("SERPAPI_API_KEY", ""),
                scholar_enabled: var("SEARCH_SCHOLAR_ENABLED", "true")
                    .parse()
                    .context("SEARCH_SCHOLAR_ENABLED must be true or false")?,
                light_enabled: var("SEARCH_LIGHT_ENABLED", "true")
                    .parse()
                    .context("SEARCH_LIGHT_ENABLED must be true or false")?,
                max_results: var("SEARCH_MAX_RESULTS", "10")
                    .parse()
                    .context("SEARCH_MAX_RESULTS must be a number")?,
            },
            rate_limit: RateLimitConfig {
                per_minute: var("RATE_LIMIT_PER_MINUTE", "30")
                    .parse()
                    .context("RATE_LIMIT_PER_MINUTE must be a number")?,
            },
            log_dir: opt("LOG_DIR"),
        })
    }
}
