//! Client for OpenAI-compatible chat-completion endpoints.

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::types::ChatMessage;

pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletionRequest {
    /// Filled in by the service when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl CompletionRequest {
    pub fn new(messages: Vec<ChatMessage>, temperature: f32, max_tokens: u32) -> Self {
        Self {
            model: None,
            messages,
            temperature,
            max_tokens,
        }
    }
}

/// A successful completion. `content` is absent when the service sent no text.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub content: Option<String>,
    pub raw: Value,
}

impl Completion {
    pub fn from_raw(raw: Value) -> Self {
        let content = raw["choices"][0]["message"]["content"]
            .as_str()
            .map(str::to_string);
        Self { content, raw }
    }
}

#[async_trait]
pub trait CompletionService: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> Result<Completion>;
}

pub struct OpenAiCompatible {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
}

impl OpenAiCompatible {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>, model: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            model: model.into(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }
}

#[async_trait]
impl CompletionService for OpenAiCompatible {
    async fn complete(&self, mut request: CompletionRequest) -> Result<Completion> {
        if request.model.is_none() {
            request.model = Some(self.model.clone());
        }
        let mut builder = self.client.post(self.endpoint()).json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        tracing::debug!(
            model = request.model.as_deref(),
            messages = request.messages.len(),
            "requesting completion"
        );
        let response = builder.send().await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            let message = serde_json::from_str::<Value>(&body)
                .ok()
                .and_then(|v| v["error"]["message"].as_str().map(str::to_string))
                .unwrap_or(body);
            tracing::warn!(%status, %message, "completion service error");
            return Err(Error::Upstream {
                status: status.as_u16(),
                message,
            });
        }

        let raw: Value = serde_json::from_str(&body)
            .map_err(|e| Error::MalformedResponse(format!("{e}: {body}")))?;
        Ok(Completion::from_raw(raw))
    }
}
