//! `/api` endpoint tests against a scripted completion service

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use serde_json::{Value, json};
use tower::ServiceExt;

use heyweb::completion::{Completion, CompletionRequest, CompletionService};
use heyweb::{Assistant, Error, Result};

/// Answers every request the same way and records what it was sent.
struct Scripted {
    answer: std::result::Result<Value, u16>,
    seen: Mutex<Vec<CompletionRequest>>,
}

#[async_trait]
impl CompletionService for Scripted {
    async fn complete(&self, request: CompletionRequest) -> Result<Completion> {
        self.seen.lock().unwrap().push(request);
        match &self.answer {
            Ok(raw) => Ok(Completion::from_raw(raw.clone())),
            Err(status) => Err(Error::Upstream {
                status: *status,
                message: "upstream unavailable".into(),
            }),
        }
    }
}

fn replying(text: &str) -> Arc<Scripted> {
    Arc::new(Scripted {
        answer: Ok(json!({"choices": [{"message": {"role": "assistant", "content": text}}]})),
        seen: Mutex::new(Vec::new()),
    })
}

fn failing() -> Arc<Scripted> {
    Arc::new(Scripted {
        answer: Err(503),
        seen: Mutex::new(Vec::new()),
    })
}

fn app(service: Arc<Scripted>) -> axum::Router {
    heyweb::server::router(Assistant::new(service))
}

async fn post(app: axum::Router, uri: &str, body: Value) -> (StatusCode, Value) {
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body).unwrap()
    };
    (status, json)
}

#[tokio::test]
async fn test_health_endpoint() {
    let response = app(replying("hi"))
        .oneshot(Request::builder().uri("/api/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json, json!({"ok": true}));
}

#[tokio::test]
async fn test_chat_requires_messages() {
    let service = replying("hi");
    let (status, json) = post(app(service.clone()), "/api/chat", json!({"context": {}})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json, json!({"error": "messages required"}));
    assert!(service.seen.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_chat_returns_reply_and_parsed_actions() {
    let service = replying("I'll click the login button for you.");
    let (status, json) = post(
        app(service.clone()),
        "/api/chat",
        json!({
            "messages": [{"role": "user", "content": "Click the login button", "timestamp": "2024-05-01T10:00:00Z"}],
            "context": {
                "activeTab": {"id": 7, "url": "https://app.test/"},
                "webAutomationEnabled": true
            }
        }),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["assistant"], "I'll click the login button for you.");
    assert_eq!(
        json["actions"],
        json!([{"type": "web_automation", "command": "click", "target": "login"}])
    );
    assert!(json["raw"]["choices"].is_array());

    let seen = service.seen.lock().unwrap();
    let request = &seen[0];
    assert_eq!(request.temperature, 0.7);
    assert_eq!(request.max_tokens, 1000);
    assert!(request.messages[0].content.contains("https://app.test/"));
    assert_eq!(request.messages[1].content, "Click the login button");
}

#[tokio::test]
async fn test_chat_empty_completion_uses_fixed_text() {
    let service = Arc::new(Scripted {
        answer: Ok(json!({"choices": []})),
        seen: Mutex::new(Vec::new()),
    });
    let (status, json) = post(
        app(service),
        "/api/chat",
        json!({"messages": [{"role": "user", "content": "hello"}]}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["assistant"], "Sorry, I could not process your request.");
    assert_eq!(json["actions"], json!([]));
}

#[tokio::test]
async fn test_chat_upstream_failure_is_500() {
    let (status, json) = post(
        app(failing()),
        "/api/chat",
        json!({"messages": [{"role": "user", "content": "hello"}]}),
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json, json!({"error": "server error"}));
}

#[tokio::test]
async fn test_summarize_parses_json_answer() {
    let service = replying(r#"{"summary": "Rust is fast.", "keyPoints": ["speed", "safety"]}"#);
    let (status, json) = post(
        app(service.clone()),
        "/api/summarize",
        json!({"text": "A long article about Rust.", "maxLength": 50}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        json,
        json!({"summary": "Rust is fast.", "keyPoints": ["speed", "safety"]})
    );
    let seen = service.seen.lock().unwrap();
    assert!(seen[0].messages[0].content.contains("50 words"));
    assert_eq!(seen[0].max_tokens, 800);
}

#[tokio::test]
async fn test_summarize_plain_text_fallback_and_validation() {
    let (status, json) = post(
        app(replying("Rust is fast and safe.")),
        "/api/summarize",
        json!({"text": "A long article about Rust."}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json, json!({"summary": "Rust is fast and safe.", "keyPoints": []}));

    let (status, json) = post(app(replying("x")), "/api/summarize", json!({})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "text required");

    let (status, json) = post(app(failing()), "/api/summarize", json!({"text": "t"})).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json["error"], "summarization error");
}

#[tokio::test]
async fn test_translate() {
    let (status, json) = post(
        app(replying(" Hola mundo ")),
        "/api/translate",
        json!({"text": "Hello world", "targetLanguage": "Spanish"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        json,
        json!({
            "translatedText": "Hola mundo",
            "sourceLanguage": "auto-detected",
            "targetLanguage": "Spanish"
        })
    );

    let (status, json) = post(
        app(replying("x")),
        "/api/translate",
        json!({"text": "Hello world"}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "text and targetLanguage required");

    let (status, json) = post(
        app(failing()),
        "/api/translate",
        json!({"text": "Hello", "sourceLanguage": "English", "targetLanguage": "German"}),
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json["error"], "translation error");
}

#[tokio::test]
async fn test_web_automation_acknowledges() {
    let (status, json) = post(
        app(replying("x")),
        "/api/web-automation",
        json!({"action": "click", "target": "login"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["success"], true);
    assert_eq!(json["action"], "click");
    assert_eq!(json["message"], "Web automation command executed: click");
}

#[tokio::test]
async fn test_transcribe_is_not_implemented() {
    let (status, json) = post(app(replying("x")), "/api/transcribe", json!({})).await;
    assert_eq!(status, StatusCode::NOT_IMPLEMENTED);
    assert!(json["error"].is_string());
}
