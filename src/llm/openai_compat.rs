// OpenAI-compatible chat completion adapter
//
// OpenAI, OpenRouter, Groq and the GLM general API all speak the same
// `/chat/completions` dialect, so one reqwest client covers every provider.
// Only the base URL and the key differ.

use crate::llm::provider::LLMAdapter;
use crate::types::{AppError, AppResult, LLMRequest, LLMResponse, TokenUsage};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

pub const OPENAI_API_BASE: &str = "https://api.openai.com/v1";
pub const OPENROUTER_API_BASE: &str = "https://openrouter.ai/api/v1";
pub const GROQ_API_BASE: &str = "https://api.groq.com/openai/v1";
pub const GLM_API_BASE: &str = "https://api.z.ai/api/paas/v4";

pub struct OpenAICompatAdapter {
    client: Client,
    api_key: String,
    base_url: String,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    stream: bool,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
    #[serde(default)]
    total_tokens: u32,
}

#[derive(Deserialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: String,
}

impl OpenAICompatAdapter {
    pub fn new(api_key: &str, base_url: &str) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Adapter for a named provider. `base_override` wins over the provider's
    /// default endpoint; unknown providers require it.
    pub fn for_provider(name: &str, api_key: &str, base_override: Option<&str>) -> AppResult<Self> {
        let base = match (base_override, default_base_url(name)) {
            (Some(url), _) => url,
            (None, Some(url)) => url,
            (None, None) => {
                return Err(AppError::NotConfigured(format!(
                    "unsupported LLM provider '{name}' (set LLM_BASE_URL for custom endpoints)"
                )))
            }
        };
        Ok(Self::new(api_key, base))
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn build_messages(request: &LLMRequest) -> Vec<ChatMessage<'_>> {
        let system = request
            .system_instruction
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .map(|content| ChatMessage { role: "system", content });

        system
            .into_iter()
            .chain(request.messages.iter().map(|m| ChatMessage {
                role: m.role.as_str(),
                content: m.content.as_str(),
            }))
            .collect()
    }
}

pub fn default_base_url(provider: &str) -> Option<&'static str> {
    match provider {
        "openai" => Some(OPENAI_API_BASE),
        "openrouter" => Some(OPENROUTER_API_BASE),
        "groq" => Some(GROQ_API_BASE),
        "glm" | "glm-general" => Some(GLM_API_BASE),
        _ => None,
    }
}

#[async_trait]
impl LLMAdapter for OpenAICompatAdapter {
    async fn create_chat_completion(&self, request: &LLMRequest) -> AppResult<LLMResponse> {
        let url = format!("{}/chat/completions", self.base_url);

        let body = ChatRequest {
            model: &request.model,
            messages: Self::build_messages(request),
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            stream: false,
        };

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| AppError::LLMApi(format!("request failed: {}", e)))?;

        let status = response.status();

        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorResponse>(&error_text)
                .map(|e| e.error.message)
                .unwrap_or(error_text);

            // Status stays in the message so retry classification can read it.
            return Err(AppError::LLMApi(format!("LLM API error ({}): {}", status, message)));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| AppError::LLMApi(format!("Failed to parse LLM response: {}", e)))?;

        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| AppError::LLMApi("LLM returned no choices".to_string()))?;

        let usage = parsed
            .usage
            .map(|u| TokenUsage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
                total_tokens: u.total_tokens,
            })
            .unwrap_or_default();

        Ok(LLMResponse {
            content: choice.message.content.unwrap_or_default(),
            finish_reason: choice.finish_reason.unwrap_or_else(|| "stop".to_string()),
            usage,
        })
    }
}
