//! How a conversation reaches the assistant: in-process or through the proxy.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::assistant::{Assistant, ChatReply};
use crate::dispatcher::decode_actions;
use crate::error::{Error, Result};
use crate::types::{ChatMessage, Context};

#[async_trait]
pub trait AssistantBackend: Send + Sync {
    async fn chat(&self, messages: Vec<ChatMessage>, context: &Context) -> Result<ChatReply>;
}

#[async_trait]
impl AssistantBackend for Assistant {
    async fn chat(&self, messages: Vec<ChatMessage>, context: &Context) -> Result<ChatReply> {
        Assistant::chat(self, messages, Some(context)).await
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    messages: Vec<ChatMessage>,
    context: &'a Context,
}

#[derive(Deserialize)]
struct WireReply {
    assistant: String,
    #[serde(default)]
    actions: Vec<Value>,
    #[serde(default)]
    raw: Value,
}

/// Calls a running `heyweb` proxy over HTTP.
pub struct HttpBackend {
    client: Client,
    base_url: String,
}

impl HttpBackend {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl AssistantBackend for HttpBackend {
    async fn chat(&self, messages: Vec<ChatMessage>, context: &Context) -> Result<ChatReply> {
        let response = self
            .client
            .post(format!("{}/api/chat", self.base_url))
            .json(&ChatRequest { messages, context })
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let message = response
                .json::<Value>()
                .await
                .ok()
                .and_then(|v| v["error"].as_str().map(str::to_string))
                .unwrap_or_else(|| status.to_string());
            return Err(Error::Upstream {
                status: status.as_u16(),
                message,
            });
        }
        let reply: WireReply = response
            .json()
            .await
            .map_err(|e| Error::MalformedResponse(e.to_string()))?;
        Ok(ChatReply {
            assistant: reply.assistant,
            actions: decode_actions(&reply.actions),
            raw: reply.raw,
        })
    }
}
