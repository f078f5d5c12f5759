// ABOUTME: Integration tests running the OpenRouter provider against a local mock upstream
// ABOUTME: Exercises SSE streaming, terminal metadata, generation cost lookups and upstream errors
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Colloquy Contributors

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![allow(missing_docs)]

mod common;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use colloquy::{
    chat::{ChatOrchestrator, OutputFrame, TurnLocks, TurnRequest},
    errors::ErrorCode,
    llm::{
        ChatMessage, ChatRequest, CostLookupError, CostReconciler, LlmProvider,
        OpenRouterConfig, OpenRouterProvider, RetryConfig, StreamEnvelope,
    },
    models::StaticModelCatalog,
};
use common::{collect_frames, create_test_database, init_test_logging, test_chat_config};
use futures_util::StreamExt;
use serde::Deserialize;
use tokio::net::TcpListener;

const MODEL: &str = "openai/gpt-4o-mini";

const STREAM_BODY: &str = concat!(
    ": OPENROUTER PROCESSING\n\n",
    "data: {\"id\":\"gen-42\",\"model\":\"openai/gpt-4o-mini\",\"choices\":[{\"delta\":{\"role\":\"assistant\",\"content\":\"Hel\"}}]}\n\n",
    "data: {not json}\n\n",
    "data: {\"id\":\"gen-42\",\"model\":\"openai/gpt-4o-mini\",\"choices\":[{\"delta\":{\"content\":\"lo\"}}]}\n\n",
    "data: {\"id\":\"gen-42\",\"model\":\"openai/gpt-4o-mini\",\"choices\":[{\"delta\":{},\"finish_reason\":\"stop\"}],",
    "\"usage\":{\"prompt_tokens\":10,\"completion_tokens\":2,\"total_tokens\":12,\"cost\":0.0003}}\n\n",
    "data: [DONE]\n\n",
);

// ============================================================================
// Mock Upstream
// ============================================================================

#[derive(Clone)]
struct MockUpstream {
    not_ready_responses: u32,
    generation_calls: Arc<AtomicU32>,
    reject_completions: bool,
}

#[derive(Deserialize)]
struct GenerationQuery {
    id: String,
}

async fn completions(State(mock): State<MockUpstream>) -> Response {
    if mock.reject_completions {
        return (
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({"error": {"message": "No auth credentials found", "code": 401}})),
        )
            .into_response();
    }
    (
        [(header::CONTENT_TYPE, "text/event-stream")],
        STREAM_BODY,
    )
        .into_response()
}

async fn generation(
    State(mock): State<MockUpstream>,
    Query(query): Query<GenerationQuery>,
) -> Response {
    let call = mock.generation_calls.fetch_add(1, Ordering::SeqCst);
    if call < mock.not_ready_responses {
        return (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({"error": {"message": "Generation not found"}})),
        )
            .into_response();
    }
    Json(serde_json::json!({
        "data": {
            "id": query.id,
            "total_cost": 0.000_35,
            "tokens_prompt": 11,
            "tokens_completion": 2,
            "latency": 420.0,
            "generation_time": 900.4
        }
    }))
    .into_response()
}

/// Serve the mock on an ephemeral port and return its API base URL
async fn start_mock(mock: MockUpstream) -> String {
    let app = Router::new()
        .route("/api/v1/chat/completions", post(completions))
        .route("/api/v1/generation", get(generation))
        .with_state(mock);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}/api/v1")
}

fn mock(not_ready_responses: u32) -> MockUpstream {
    MockUpstream {
        not_ready_responses,
        generation_calls: Arc::new(AtomicU32::new(0)),
        reject_completions: false,
    }
}

fn provider(base_url: String) -> OpenRouterProvider {
    OpenRouterProvider::new(OpenRouterConfig {
        base_url,
        api_key: "test-key".to_owned(),
        default_model: MODEL.to_owned(),
    })
    .unwrap()
}

fn fast_retry() -> RetryConfig {
    RetryConfig {
        max_attempts: 3,
        initial_delay_ms: 5,
        deadline_ms: 2_000,
    }
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn test_stream_yields_content_then_single_metadata() {
    init_test_logging();
    let base_url = start_mock(mock(0)).await;
    let provider = provider(base_url);

    let request = ChatRequest::new(vec![ChatMessage::user("Hi")]).with_streaming();
    let items: Vec<StreamEnvelope> = provider
        .complete_stream(&request)
        .await
        .unwrap()
        .map(Result::unwrap)
        .collect()
        .await;

    assert_eq!(items.len(), 3);
    assert_eq!(items[0], StreamEnvelope::content("Hel"));
    assert_eq!(items[1], StreamEnvelope::content("lo"));
    let StreamEnvelope::Metadata(metadata) = &items[2] else {
        panic!("expected terminal metadata, got {:?}", items[2]);
    };
    assert_eq!(metadata.generation_id.as_deref(), Some("gen-42"));
    assert_eq!(metadata.usage.unwrap().total_tokens, 12);
    assert_eq!(metadata.total_cost, Some(0.0003));
}

#[tokio::test]
async fn test_cost_lookup_retries_until_available() {
    init_test_logging();
    let upstream = mock(2);
    let calls = Arc::clone(&upstream.generation_calls);
    let base_url = start_mock(upstream).await;
    let reconciler = CostReconciler::new(Arc::new(provider(base_url)), fast_retry());

    let cost = reconciler.reconcile("gen-42").await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(cost.total_cost, Some(0.000_35));
    assert_eq!(cost.prompt_tokens, Some(11));
    assert_eq!(cost.latency_ms, Some(420));
    assert_eq!(cost.generation_time_ms, Some(900));
}

#[tokio::test]
async fn test_cost_lookup_gives_up_after_three_attempts() {
    init_test_logging();
    let upstream = mock(3);
    let calls = Arc::clone(&upstream.generation_calls);
    let base_url = start_mock(upstream).await;
    let provider = provider(base_url);

    assert!(matches!(
        provider.fetch_cost("gen-42").await,
        Err(CostLookupError::NotYetAvailable)
    ));
    calls.store(0, Ordering::SeqCst);

    let reconciler = CostReconciler::new(Arc::new(provider), fast_retry());
    assert!(reconciler.reconcile("gen-42").await.is_none());
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_unauthorized_upstream_maps_to_upstream_error() {
    init_test_logging();
    let base_url = start_mock(MockUpstream {
        reject_completions: true,
        ..mock(0)
    })
    .await;

    let request = ChatRequest::new(vec![ChatMessage::user("Hi")]).with_streaming();
    let err = provider(base_url)
        .complete_stream(&request)
        .await
        .err()
        .unwrap();
    assert_eq!(err.code, ErrorCode::ExternalServiceError);
    assert_eq!(err.http_status(), 502);
    assert!(err.message.starts_with("OpenRouter: "));
}

#[tokio::test]
async fn test_turn_persists_reconciled_cost() {
    init_test_logging();
    let base_url = start_mock(mock(1)).await;
    let database = create_test_database().await;
    let config = Arc::new(test_chat_config());
    let orchestrator = ChatOrchestrator::new(
        config,
        database.clone(),
        Arc::new(provider(base_url)),
        Arc::new(StaticModelCatalog::new(Vec::new(), Some(MODEL.to_owned()))),
        TurnLocks::new(true),
    );

    let turn = orchestrator
        .handle(TurnRequest::new("alice", "Hello"))
        .await
        .unwrap();
    let frames = collect_frames(turn.frames).await;
    let lines: Vec<String> = frames.iter().map(OutputFrame::to_line).collect();
    assert_eq!(lines[1], "Hel");
    assert_eq!(lines[2], "lo");
    assert_eq!(lines[3], format!("[MODEL]{MODEL}"));
    assert!(lines[5].starts_with("[USAGE]"));
    assert!(lines[5].contains("\"generation_id\":\"gen-42\""));
    assert_eq!(lines.last().unwrap(), "[DONE]");

    let assistant = turn.completion.await.unwrap().unwrap().unwrap();
    assert_eq!(assistant.content, "Hello");
    assert_eq!(assistant.metadata.provider.as_deref(), Some("openrouter"));
    assert_eq!(assistant.metadata.total_cost, Some(0.000_35));
    assert_eq!(assistant.metadata.total_tokens, Some(13));
}
