// ABOUTME: Integration tests for the HTTP routes of the chat service
// ABOUTME: Tests caller identity, SSE framing, ownership checks, summaries and health
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Colloquy Contributors

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![allow(missing_docs)]

mod common;

use std::sync::Arc;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use colloquy::{
    config::{Environment, LlmProviderType, ServerConfig},
    models::StaticModelCatalog,
    server::{router, ServerResources},
};
use common::{
    create_test_database, init_test_logging, test_chat_config, ScriptedProvider, StreamScript,
    TEST_MODEL,
};
use serde_json::{json, Value};
use tower::ServiceExt;

// ============================================================================
// Test Helpers
// ============================================================================

async fn setup_router() -> Router {
    init_test_logging();
    let config = ServerConfig {
        http_port: 0,
        database_url: "sqlite::memory:".to_owned(),
        environment: Environment::Testing,
        llm_provider: LlmProviderType::OpenRouter,
        models: vec![TEST_MODEL.to_owned()],
        default_model: Some(TEST_MODEL.to_owned()),
        chat: test_chat_config(),
    };
    let resources = ServerResources::new(
        config,
        create_test_database().await,
        Arc::new(ScriptedProvider::new(StreamScript::reply(&["Hi", "!\nBye"]))),
        Arc::new(StaticModelCatalog::new(
            vec![TEST_MODEL.to_owned()],
            Some(TEST_MODEL.to_owned()),
        )),
    );
    router(Arc::new(resources))
}

async fn body_string(body: Body) -> String {
    let bytes = axum::body::to_bytes(body, usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

fn post_json(uri: &str, user: Option<&str>, body: &Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json");
    if let Some(user) = user {
        builder = builder.header("x-user-id", user);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

fn get(uri: &str, user: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header("x-user-id", user)
        .body(Body::empty())
        .unwrap()
}

/// SSE `data:` payloads of a streamed response
fn sse_data_lines(body: &str) -> Vec<String> {
    body.lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(|data| data.strip_prefix(' ').unwrap_or(data).to_owned())
        .collect()
}

/// Run one streamed turn and return its data lines
async fn stream_turn(app: &Router, user: &str, body: Value) -> Vec<String> {
    let response = app
        .clone()
        .oneshot(post_json("/api/chat/stream", Some(user), &body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    sse_data_lines(&body_string(response.into_body()).await)
}

fn conversation_id(lines: &[String]) -> String {
    lines[0]
        .strip_prefix("[CONVERSATION_ID]")
        .unwrap()
        .to_owned()
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn test_missing_identity_is_unauthorized() {
    let app = setup_router().await;
    let response = app
        .oneshot(post_json("/api/chat/stream", None, &json!({"text": "Hello"})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_stream_emits_framed_lines() {
    let app = setup_router().await;
    let lines = stream_turn(&app, "alice", json!({"text": "Hello"})).await;

    assert!(lines[0].starts_with("[CONVERSATION_ID]"));
    assert_eq!(lines[1], "Hi");
    assert_eq!(lines[2], "!\\nBye");
    assert_eq!(lines[3], format!("[MODEL]{TEST_MODEL}"));
    assert_eq!(lines[4], "[TEMPERATURE]0.7");
    assert!(lines[5].starts_with("[USAGE]{"));
    assert_eq!(lines[6], "[DONE]");
}

#[tokio::test]
async fn test_invalid_requests_are_rejected() {
    let app = setup_router().await;

    let response = app
        .clone()
        .oneshot(post_json(
            "/api/chat/stream",
            Some("alice"),
            &json!({"text": "Hello", "temperature": 3.0}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .oneshot(post_json(
            "/api/chat/stream",
            Some("alice"),
            &json!({"text": "Hello", "format": "yaml"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_foreign_conversation_is_forbidden() {
    let app = setup_router().await;
    let lines = stream_turn(&app, "alice", json!({"text": "Hello"})).await;
    let id = conversation_id(&lines);

    let response = app
        .clone()
        .oneshot(get(&format!("/api/chat/conversations/{id}"), "mallory"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = app
        .clone()
        .oneshot(post_json(
            "/api/chat/stream",
            Some("mallory"),
            &json!({"text": "Hi", "conversation_id": id}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = app
        .oneshot(get("/api/chat/conversations/missing", "alice"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_summarize_and_list_summaries() {
    let app = setup_router().await;
    let lines = stream_turn(&app, "alice", json!({"text": "Hello"})).await;
    let id = conversation_id(&lines);

    // The reply is persisted by the background task; wait for it to land
    let mut messages = Value::Null;
    for _ in 0..50 {
        let response = app
            .clone()
            .oneshot(get(&format!("/api/chat/conversations/{id}/messages"), "alice"))
            .await
            .unwrap();
        messages = serde_json::from_str(&body_string(response.into_body()).await).unwrap();
        if messages["messages"].as_array().unwrap().len() == 2 {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    assert_eq!(messages["messages"][1]["content"], "Hi!\nBye");

    let response = app
        .clone()
        .oneshot(post_json(
            &format!("/api/chat/conversations/{id}/summarize"),
            Some("alice"),
            &json!({}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let outcome: Value = serde_json::from_str(&body_string(response.into_body()).await).unwrap();
    assert_eq!(outcome["is_new"], true);

    let response = app
        .clone()
        .oneshot(post_json(
            &format!("/api/chat/conversations/{id}/summarize"),
            Some("alice"),
            &json!({}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .oneshot(get(&format!("/api/chat/conversations/{id}/summaries"), "alice"))
        .await
        .unwrap();
    let listing: Value = serde_json::from_str(&body_string(response.into_body()).await).unwrap();
    assert_eq!(listing["summaries"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_health_reports_provider_and_catalog() {
    let app = setup_router().await;
    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let health: Value = serde_json::from_str(&body_string(response.into_body()).await).unwrap();
    assert_eq!(health["status"], "healthy");
    assert_eq!(health["provider"], "Scripted");
    assert_eq!(health["models"], 1);
}
