//! HTTP proxy in front of the completion service.

use std::net::SocketAddr;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::assistant::{Assistant, ChatReply, Summary, SummaryOptions, Translation};
use crate::error::Error;
use crate::types::{ChatMessage, Context};

/// Errors returned by the `/api` handlers.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(&'static str),
    /// The completion round-trip failed. The public message hides the cause.
    Upstream {
        public: &'static str,
        source: Error,
    },
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            Self::Upstream { public, source } => {
                tracing::error!(error = %source, "{public}");
                (StatusCode::INTERNAL_SERVER_ERROR, public)
            }
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

fn upstream(public: &'static str) -> impl FnOnce(Error) -> ApiError {
    move |source| ApiError::Upstream { public, source }
}

#[derive(Deserialize)]
struct ChatBody {
    messages: Option<Vec<ChatMessage>>,
    context: Option<Context>,
}

fn default_max_length() -> u32 {
    SummaryOptions::default().max_length
}

fn default_true() -> bool {
    true
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SummarizeBody {
    text: Option<String>,
    #[serde(default = "default_max_length")]
    max_length: u32,
    #[serde(default = "default_true")]
    include_key_points: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TranslateBody {
    text: Option<String>,
    source_language: Option<String>,
    target_language: Option<String>,
}

fn present(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.is_empty())
}

async fn health() -> Json<Value> {
    Json(json!({ "ok": true }))
}

async fn chat(
    State(assistant): State<Assistant>,
    Json(body): Json<ChatBody>,
) -> Result<Json<ChatReply>, ApiError> {
    let messages = body.messages.ok_or(ApiError::BadRequest("messages required"))?;
    tracing::info!(messages = messages.len(), "chat request");
    let reply = assistant
        .chat(messages, body.context.as_ref())
        .await
        .map_err(upstream("server error"))?;
    Ok(Json(reply))
}

async fn summarize(
    State(assistant): State<Assistant>,
    Json(body): Json<SummarizeBody>,
) -> Result<Json<Summary>, ApiError> {
    let text = present(body.text).ok_or(ApiError::BadRequest("text required"))?;
    let options = SummaryOptions {
        max_length: body.max_length,
        include_key_points: body.include_key_points,
    };
    let summary = assistant
        .summarize(&text, options)
        .await
        .map_err(upstream("summarization error"))?;
    Ok(Json(summary))
}

async fn translate(
    State(assistant): State<Assistant>,
    Json(body): Json<TranslateBody>,
) -> Result<Json<Translation>, ApiError> {
    let (Some(text), Some(target)) = (present(body.text), present(body.target_language)) else {
        return Err(ApiError::BadRequest("text and targetLanguage required"));
    };
    let source = present(body.source_language);
    let translation = assistant
        .translate(&text, source.as_deref(), &target)
        .await
        .map_err(upstream("translation error"))?;
    Ok(Json(translation))
}

/// Acknowledges automation commands; execution happens next to the page.
async fn web_automation(Json(body): Json<Value>) -> Json<Value> {
    let action = body.get("action").cloned().unwrap_or(Value::Null);
    let name = action.as_str().unwrap_or("unknown").to_string();
    tracing::debug!(action = %name, "web automation acknowledged");
    Json(json!({
        "success": true,
        "action": action,
        "message": format!("Web automation command executed: {name}"),
    }))
}

async fn transcribe() -> (StatusCode, Json<Value>) {
    (
        StatusCode::NOT_IMPLEMENTED,
        Json(json!({ "error": "Server-side transcription is not implemented" })),
    )
}

pub fn router(assistant: Assistant) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/chat", post(chat))
        .route("/api/summarize", post(summarize))
        .route("/api/translate", post(translate))
        .route("/api/web-automation", post(web_automation))
        .route("/api/transcribe", post(transcribe))
        .with_state(assistant)
}

/// Serve the proxy on `addr` until the process exits.
pub async fn serve(assistant: Assistant, addr: SocketAddr) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(addr = %listener.local_addr()?, "heyweb proxy listening");
    axum::serve(listener, router(assistant)).await
}
