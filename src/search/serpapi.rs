//! SerpAPI Client
//!
//! Search strategy used to ground sub-question answers:
//!
//! 1. **Google Scholar (primary)**: papers, citations, publication years.
//! 2. **Google Light (fallback)**: general web results, queried when Scholar
//!    is disabled, fails, or returns fewer than [`MIN_PRIMARY_RESULTS`] hits.
//!
//! Both engines are normalized into [`SearchHit`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use serpapi_search_rust::serp_api_search::SerpApiSearch;
use std::collections::HashMap;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::SearchConfig;

/// Below this many Scholar hits the Light engine is queried as well.
pub const MIN_PRIMARY_RESULTS: usize = 3;

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("SerpAPI key not configured")]
    NoApiKey,

    #[error("Search request failed: {0}")]
    RequestFailed(String),

    #[error("Failed to parse search results: {0}")]
    ParseError(String),

    #[error("No results found for query")]
    NoResults,

    #[error("Search engine not enabled: {0}")]
    EngineDisabled(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchSource {
    Scholar,
    Light,
}

/// One search result, whichever engine produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub title: String,
    pub snippet: String,
    pub link: Option<String>,
    pub source: SearchSource,
    pub year: Option<i32>,
}

/// Anything that can turn a query into search hits.
#[async_trait]
pub trait SearchBackend: Send + Sync {
    async fn search(&self, query: &str) -> Result<Vec<SearchHit>, SearchError>;
}

pub struct SerpApiClient {
    api_key: String,
    scholar_enabled: bool,
    light_enabled: bool,
    max_results: usize,
}

impl SerpApiClient {
    pub fn new(api_key: String) -> Self {
        Self {
            api_key,
            scholar_enabled: true,
            light_enabled: true,
            max_results: 10,
        }
    }

    /// `None` when no API key is configured.
    pub fn from_config(config: &SearchConfig) -> Option<Self> {
        if config.serpapi_key.is_empty() {
            return None;
        }

        Some(Self {
            api_key: config.serpapi_key.clone(),
            scholar_enabled: config.scholar_enabled,
            light_enabled: config.light_enabled,
            max_results: config.max_results,
        })
    }

    pub fn with_max_results(mut self, max: usize) -> Self {
        self.max_results = max;
        self
    }

    pub fn with_scholar(mut self, enabled: bool) -> Self {
        self.scholar_enabled = enabled;
        self
    }

    pub fn with_light(mut self, enabled: bool) -> Self {
        self.light_enabled = enabled;
        self
    }

    async fn fetch(&self, engine: &str, query: &str) -> Result<Value, SearchError> {
        if self.api_key.is_empty() {
            return Err(SearchError::NoApiKey);
        }

        let mut params = HashMap::<String, String>::new();
        params.insert("engine".to_string(), engine.to_string());
        params.insert("q".to_string(), query.to_string());
        params.insert("hl".to_string(), "en".to_string());
        params.insert("num".to_string(), self.max_results.to_string());

        let search = SerpApiSearch::google(params, self.api_key.clone());
        let results = search
            .json()
            .await
            .map_err(|e| SearchError::RequestFailed(e.to_string()))?;
        debug!(engine, "Raw SerpAPI response received");
        Ok(results)
    }

    pub async fn search_scholar(&self, query: &str) -> Result<Vec<SearchHit>, SearchError> {
        if !self.scholar_enabled {
            return Err(SearchError::EngineDisabled("Google Scholar".to_string()));
        }
        info!(query = %query, "Searching Google Scholar via SerpAPI");

        let results = self.fetch("google_scholar", query).await?;
        let hits = parse_scholar_results(&results, self.max_results)?;
        info!(count = hits.len(), "Google Scholar search completed");
        Ok(hits)
    }

    pub async fn search_light(&self, query: &str) -> Result<Vec<SearchHit>, SearchError> {
        if !self.light_enabled {
            return Err(SearchError::EngineDisabled("Google Light".to_string()));
        }
        info!(query = %query, "Searching Google Light via SerpAPI");

        let results = self.fetch("google_light", query).await?;
        let hits = parse_light_results(&results, self.max_results)?;
        info!(count = hits.len(), "Google Light search completed");
        Ok(hits)
    }
}

#[async_trait]
impl SearchBackend for SerpApiClient {
    async fn search(&self, query: &str) -> Result<Vec<SearchHit>, SearchError> {
        let mut hits = Vec::new();
        let mut errors = Vec::new();

        if self.scholar_enabled {
            match self.search_scholar(query).await {
                Ok(results) => hits = results,
                Err(e) => {
                    warn!(error = %e, "Scholar search failed");
                    errors.push(format!("Scholar: {e}"));
                }
            }
        }

        if self.light_enabled && needs_fallback(self.scholar_enabled, hits.len()) {
            match self.search_light(query).await {
                Ok(results) => hits.extend(results),
                Err(e) => {
                    warn!(error = %e, "Light search failed");
                    errors.push(format!("Light: {e}"));
                }
            }
        }

        if hits.is_empty() {
            return match errors.len() {
                0 => Err(SearchError::NoResults),
                _ => Err(SearchError::RequestFailed(errors.join("; "))),
            };
        }
        Ok(hits)
    }
}

fn needs_fallback(scholar_enabled: bool, scholar_hits: usize) -> bool {
    !scholar_enabled || scholar_hits < MIN_PRIMARY_RESULTS
}

fn organic_results(results: &Value) -> Result<&Vec<Value>, SearchError> {
    let organic = results.get("organic_results").ok_or(SearchError::NoResults)?;
    let array = organic
        .as_array()
        .ok_or_else(|| SearchError::ParseError("Expected array of results".to_string()))?;
    if array.is_empty() {
        return Err(SearchError::NoResults);
    }
    Ok(array)
}

fn str_field(result: &Value, key: &str) -> Option<String> {
    result.get(key).and_then(|v| v.as_str()).map(String::from)
}

pub fn parse_scholar_results(
    results: &Value,
    max_results: usize,
) -> Result<Vec<SearchHit>, SearchError> {
    let hits = organic_results(results)?
        .iter()
        .take(max_results)
        .map(|result| {
            let year = result
                .get("publication_info")
                .and_then(|p| p.get("summary"))
                .and_then(|v| v.as_str())
                .and_then(extract_year);

            SearchHit {
                title: str_field(result, "title").unwrap_or_else(|| "Untitled".to_string()),
                snippet: str_field(result, "snippet").unwrap_or_default(),
                link: str_field(result, "link"),
                source: SearchSource::Scholar,
                year,
            }
        })
        .collect();
    Ok(hits)
}

pub fn parse_light_results(
    results: &Value,
    max_results: usize,
) -> Result<Vec<SearchHit>, SearchError> {
    let hits = organic_results(results)?
        .iter()
        .take(max_results)
        .map(|result| SearchHit {
            title: str_field(result, "title").unwrap_or_else(|| "Untitled".to_string()),
            snippet: str_field(result, "snippet").unwrap_or_default(),
            link: str_field(result, "link").filter(|l| !l.is_empty()),
            source: SearchSource::Light,
            year: None,
        })
        .collect();
    Ok(hits)
}

/// First plausible four-digit year in a Scholar publication summary
/// ("A Author, B Author - Journal, 2021 - publisher.com").
fn extract_year(summary: &str) -> Option<i32> {
    summary
        .split(|c: char| !c.is_ascii_digit())
        .filter(|part| part.len() == 4)
        .filter_map(|part| part.parse::<i32>().ok())
        .find(|year| (1900..=2100).contains(year))
}
