//! Integration tests for the streaming generate endpoint.
//!
//! These tests run the router on a real TCP port and talk to it with an
//! HTTP client, covering incremental delivery, error statuses and
//! cancellation on client disconnect.

use std::sync::Arc;
use std::time::Duration;

use focal_tutor::testing::ScriptedModel;
use focal_tutor::{
    create_router, AppState, Config, ErrorResponse, GenerationGateway, HealthResponse,
    LlmErrorKind, LlmProvider, CATEGORY_HEADER,
};
use futures::StreamExt;
use tokio::time::timeout;

/// Spawns the API on an ephemeral port and returns its base URL.
async fn spawn_server(state: AppState) -> (String, tokio::task::JoinHandle<()>) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind");
    let addr = listener.local_addr().expect("Failed to get local addr");
    let router = create_router(state);

    let handle = tokio::spawn(async move {
        axum::serve(listener, router).await.expect("Server failed");
    });

    (format!("http://{addr}"), handle)
}

fn scripted_state(model: &ScriptedModel) -> AppState {
    AppState::new(
        Config::default(),
        GenerationGateway::single(Arc::new(model.clone())),
    )
}

async fn post_generate(base: &str, body: serde_json::Value) -> reqwest::Response {
    reqwest::Client::new()
        .post(format!("{base}/api/generate"))
        .json(&body)
        .send()
        .await
        .expect("Request failed")
}

// ============================================================================
// Streaming
// ============================================================================

#[tokio::test]
async fn test_answer_arrives_incrementally() {
    let model = ScriptedModel::new()
        .classify_as("math")
        .with_chunks(["### summary\n", "Linear equation.\n", "### answer\n", "x = 2"])
        .with_delay(Duration::from_millis(30));
    let (base, _server) = spawn_server(scripted_state(&model)).await;

    let response = post_generate(
        &base,
        serde_json::json!({
            "prompt": "2x+3=7を解いて",
            "options": {"summary": true, "answer": true},
            "sliders": {"understanding": 0.2, "politeness": 0.9}
        }),
    )
    .await;

    assert_eq!(response.status(), 200);
    assert_eq!(response.headers()[CATEGORY_HEADER], "math");

    let mut body = response.bytes_stream();
    let mut pieces = 0;
    let mut text = String::new();
    while let Some(chunk) = timeout(Duration::from_secs(5), body.next())
        .await
        .expect("Timeout waiting for chunk")
    {
        let chunk = chunk.expect("Body error");
        text.push_str(std::str::from_utf8(&chunk).expect("Invalid UTF-8"));
        pieces += 1;
    }

    assert!(pieces > 1, "answer was delivered in one piece");
    assert_eq!(text, "### summary\nLinear equation.\n### answer\nx = 2");
}

#[tokio::test]
async fn test_echo_provider_answers_offline() {
    let config = Config {
        llm_provider: LlmProvider::Echo,
        ..Config::default()
    };
    let gateway = config.gateway().expect("Echo needs no credentials");
    let (base, _server) = spawn_server(AppState::new(config, gateway)).await;

    let response = post_generate(
        &base,
        serde_json::json!({
            "prompt": "Why is the sky blue?",
            "options": {"guidance": true, "answer": true}
        }),
    )
    .await;

    assert_eq!(response.status(), 200);
    assert_eq!(response.headers()[CATEGORY_HEADER], "other");
    let text = response.text().await.expect("Body error");
    assert!(text.starts_with("### guidance\n"));
    assert!(text.contains("### answer\n"));
    assert!(text.contains("Why is the sky blue?"));
    assert!(!text.contains("### summary"));
}

// ============================================================================
// Errors
// ============================================================================

#[tokio::test]
async fn test_empty_submission_is_rejected() {
    let model = ScriptedModel::new().with_chunks(["x"]);
    let (base, _server) = spawn_server(scripted_state(&model)).await;

    let response = post_generate(&base, serde_json::json!({"prompt": "", "images": []})).await;

    assert_eq!(response.status(), 400);
    let error: ErrorResponse = response.json().await.expect("Invalid error body");
    assert!(error.error.contains("Enter a question"));
    assert!(model.requests().is_empty());
}

#[tokio::test]
async fn test_model_failure_before_first_chunk_is_bad_gateway() {
    let model = ScriptedModel::new()
        .classify_as("physics")
        .with_chunks(["never"])
        .fail_after(0, LlmErrorKind::Authentication, "401");
    let (base, _server) = spawn_server(scripted_state(&model)).await;

    let response = post_generate(&base, serde_json::json!({"prompt": "What is torque?"})).await;

    assert_eq!(response.status(), 502);
    let error: ErrorResponse = response.json().await.expect("Invalid error body");
    assert_eq!(error.category.map(|c| c.as_str()), Some("physics"));
    assert!(error.error.contains("authentication"));
    assert!(!error.error.contains("401"));
}

#[tokio::test]
async fn test_oversized_body_is_rejected() {
    let model = ScriptedModel::new().with_chunks(["x"]);
    let config = Config {
        max_request_bytes: 1024,
        ..Config::default()
    };
    let state = AppState::new(config, GenerationGateway::single(Arc::new(model.clone())));
    let (base, _server) = spawn_server(state).await;

    let response = post_generate(
        &base,
        serde_json::json!({"prompt": "x".repeat(4096)}),
    )
    .await;

    assert_eq!(response.status(), 413);
    assert!(model.requests().is_empty());
}

// ============================================================================
// Cancellation
// ============================================================================

#[tokio::test]
async fn test_client_disconnect_cancels_model_stream() {
    let model = ScriptedModel::new()
        .with_chunks((0..200).map(|i| format!("word{i} ")))
        .with_delay(Duration::from_millis(20));
    let (base, _server) = spawn_server(scripted_state(&model)).await;

    let response = post_generate(&base, serde_json::json!({"prompt": "Tell me a story"})).await;
    assert_eq!(response.status(), 200);

    let mut body = response.bytes_stream();
    let first = body.next().await.expect("No chunk").expect("Body error");
    assert!(!first.is_empty());
    drop(body);

    let mut dropped = false;
    for _ in 0..100 {
        if model.streams_dropped() == 1 {
            dropped = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(dropped, "model stream outlived the client connection");
}

// ============================================================================
// Health
// ============================================================================

#[tokio::test]
async fn test_health_endpoint() {
    let model = ScriptedModel::new();
    let (base, _server) = spawn_server(scripted_state(&model)).await;

    let health: HealthResponse = reqwest::get(format!("{base}/api/health"))
        .await
        .expect("Request failed")
        .json()
        .await
        .expect("Invalid health body");

    assert_eq!(health.status, "ok");
    assert_eq!(health.provider, "scripted");
    assert_eq!(health.model, Config::default().model);
}
