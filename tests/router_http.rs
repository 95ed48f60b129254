//! Router against a local HTTP server through the real reqwest transport.

mod common;

use common::init_tracing;
use docmark::{
    CompletionRequest, ProviderError, ProviderKind, ProviderProfile, RetryPolicy, Router,
};
use serde_json::json;
use std::time::Duration;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn router() -> Router {
    init_tracing();
    Router::with_reqwest(
        Duration::from_secs(5),
        RetryPolicy {
            max_attempts: 3,
            base_delay_ms: 1,
            max_delay_ms: 10,
            jitter_ratio: 0.0,
        },
    )
    .unwrap()
}

fn request() -> CompletionRequest {
    CompletionRequest {
        system: "Format as Markdown".into(),
        user: "hello".into(),
        temperature: 0.1,
        max_tokens: 128,
        api_version: None,
    }
}

fn relay(server: &MockServer) -> ProviderProfile {
    ProviderProfile::new("relay", ProviderKind::OpenAiCompatible, "sk-relay-key-42")
        .with_base_url(server.uri())
        .with_model("relay-model")
}

fn chat(text: &str) -> serde_json::Value {
    json!({ "choices": [{ "message": { "content": text } }] })
}

#[tokio::test]
async fn openai_compatible_round_trip() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("authorization", "Bearer sk-relay-key-42"))
        .and(header("x-request-id", "trace-abc"))
        .respond_with(ResponseTemplate::new(200).set_body_json(chat("# Hi")))
        .expect(1)
        .mount(&server)
        .await;

    let out = router()
        .send(&relay(&server), &request(), "trace-abc")
        .await
        .unwrap();
    assert_eq!(out.text, "# Hi");
    assert_eq!(out.trace_id, "trace-abc");

    let received = server.received_requests().await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&received[0].body).unwrap();
    assert_eq!(body["model"], "relay-model");
    assert_eq!(body["messages"][0]["role"], "system");
}

#[tokio::test]
async fn retry_after_header_is_honoured() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "2"))
        .mount(&server)
        .await;

    let err = router()
        .send(&relay(&server), &request(), "t")
        .await
        .unwrap_err();
    assert_eq!(
        err,
        ProviderError::RateLimited {
            retry_after_ms: Some(2_000)
        }
    );
    assert!(err.is_retryable());
}

#[tokio::test]
async fn server_error_then_success_is_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(chat("ok")))
        .mount(&server)
        .await;

    let out = router()
        .send_with_retry(&relay(&server), &request(), "t")
        .await
        .unwrap();
    assert_eq!(out.text, "ok");
    assert_eq!(out.attempts, 2);
}

#[tokio::test]
async fn error_bodies_are_redacted() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(400).set_body_string("unknown key sk-relay-key-42 for model"),
        )
        .mount(&server)
        .await;

    let failure = router()
        .send_with_retry(&relay(&server), &request(), "trace-x")
        .await
        .unwrap_err();
    assert_eq!(failure.attempts, 1);
    let shown = format!("{failure} {failure:?}");
    assert!(!shown.contains("sk-relay-key-42"), "{shown}");
    assert!(shown.contains("trace-x"));
}

#[tokio::test]
async fn anthropic_headers_and_parsing() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/messages"))
        .and(header("x-api-key", "sk-ant-9"))
        .and(header("anthropic-version", "2023-06-01"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "content": [
                { "type": "thinking", "thinking": "..." },
                { "type": "text", "text": "# Title" },
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let profile = ProviderProfile::new("claude", ProviderKind::Anthropic, "sk-ant-9")
        .with_base_url(server.uri());
    let mut req = request();
    req.api_version = Some("2023-06-01".into());
    let out = router().send(&profile, &req, "t").await.unwrap();
    assert_eq!(out.text, "# Title");
}

#[tokio::test]
async fn gemini_invalid_key_is_auth_failure() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/models/gemini-2.0-flash:generateContent"))
        .and(header("x-goog-api-key", "g-key-1"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": { "status": "INVALID_ARGUMENT", "details": [{ "reason": "API_KEY_INVALID" }] }
        })))
        .mount(&server)
        .await;

    let profile =
        ProviderProfile::new("g", ProviderKind::Gemini, "g-key-1").with_base_url(server.uri());
    let err = router().send(&profile, &request(), "t").await.unwrap_err();
    assert_eq!(err, ProviderError::AuthFailure { status: 400 });
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn garbage_body_is_unparseable() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
        .mount(&server)
        .await;

    let err = router()
        .send(&relay(&server), &request(), "t")
        .await
        .unwrap_err();
    assert!(matches!(err, ProviderError::UnparseableResponse { .. }));
}
