use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::LLMConfig;
use crate::llm::openai_compat::OpenAICompatAdapter;
use crate::types::{AppResult, LLMRequest, LLMResponse};

#[async_trait]
pub trait LLMAdapter: Send + Sync {
    async fn create_chat_completion(&self, request: &LLMRequest) -> AppResult<LLMResponse>;
}

/// Build the adapter for the configured provider.
///
/// `Ok(None)` means no key is set: the service still starts, but reports
/// generation as unavailable.
pub fn build_adapter(config: &LLMConfig) -> AppResult<Option<Arc<dyn LLMAdapter>>> {
    let Some(api_key) = config.active_api_key() else {
        warn!(provider = %config.provider, "No API key configured for LLM provider");
        return Ok(None);
    };

    let adapter =
        OpenAICompatAdapter::for_provider(&config.provider, api_key, config.base_url.as_deref())?;
    info!(
        provider = %config.provider,
        model = %config.model,
        base_url = adapter.base_url(),
        "LLM adapter ready"
    );
    Ok(Some(Arc::new(adapter)))
}
