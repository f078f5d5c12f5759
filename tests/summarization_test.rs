// ABOUTME: Integration tests for the summarization engine and summary-aware context assembly
// ABOUTME: Covers reuse thresholds, cutoff advancement, summary history and failure handling
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Colloquy Contributors

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![allow(missing_docs)]

mod common;

use common::{collect_frames, create_test_engine, ScriptedProvider, StreamScript, TestEngine};
use colloquy::{
    chat::{SummarizeRequest, TurnRequest},
    database::ChatRepository,
    errors::ErrorCode,
    llm::MessageRole as LlmRole,
    models::{NewConversation, ResponseFormat},
};

async fn run_turn(engine: &TestEngine, conversation_id: Option<&str>, text: &str) -> String {
    let mut request = TurnRequest::new("alice", text);
    request.conversation_id = conversation_id.map(str::to_owned);
    let turn = engine.orchestrator.handle(request).await.unwrap();
    let conversation_id = turn.conversation_id.clone();
    collect_frames(turn.frames).await;
    turn.completion.await.unwrap().unwrap();
    conversation_id
}

fn summarize_request(conversation_id: &str) -> SummarizeRequest {
    SummarizeRequest {
        conversation_id: conversation_id.to_owned(),
        owner_id: "alice".to_owned(),
        model: None,
        temperature: None,
    }
}

async fn engine() -> TestEngine {
    create_test_engine(ScriptedProvider::new(StreamScript::reply(&["Reply"]))).await
}

#[tokio::test]
async fn test_first_summary_covers_all_messages() {
    let engine = engine().await;
    let conversation_id = run_turn(&engine, None, "Hello").await;
    let last_id = engine
        .database
        .get_last_message_id(&conversation_id)
        .await
        .unwrap()
        .unwrap();

    let outcome = engine
        .summarizer
        .summarize(summarize_request(&conversation_id))
        .await
        .unwrap();

    assert!(outcome.is_new);
    assert_eq!(outcome.text, "Summary: greetings were exchanged.");
    assert_eq!(outcome.cutoff_message_id.as_deref(), Some(last_id.as_str()));

    let request = engine.provider.last_complete_request();
    assert_eq!(request.messages.len(), 2);
    assert_eq!(request.messages[0].role, LlmRole::System);
    assert_eq!(request.messages[0].content, engine.config.summarization_prompt);
    assert_eq!(request.messages[1].content, "User: Hello\nAssistant: Reply\n");
}

#[tokio::test]
async fn test_summary_reuse_and_resummarization() {
    let engine = engine().await;
    let conversation_id = run_turn(&engine, None, "Hello").await;

    let first = engine
        .summarizer
        .summarize(summarize_request(&conversation_id))
        .await
        .unwrap();
    assert!(first.is_new);

    // usage 0: reused
    let reused = engine
        .summarizer
        .summarize(summarize_request(&conversation_id))
        .await
        .unwrap();
    assert!(!reused.is_new);
    assert_eq!(reused, colloquy::chat::SummaryOutcome { is_new: false, ..first.clone() });

    // One turn consults the summary (usage 1) and replays only newer messages
    run_turn(&engine, Some(&conversation_id), "Second").await;
    let request = engine.provider.last_stream_request();
    assert!(request.messages[0]
        .content
        .starts_with("Previous conversation summary:\nSummary: greetings were exchanged.\n\n"));
    let replayed: Vec<&str> = request.messages[1..]
        .iter()
        .map(|m| m.content.as_str())
        .collect();
    assert_eq!(replayed, vec!["Second"]);

    let still_reused = engine
        .summarizer
        .summarize(summarize_request(&conversation_id))
        .await
        .unwrap();
    assert!(!still_reused.is_new);
    assert_eq!(engine.provider.complete_requests.lock().unwrap().len(), 1);

    // Second consultation (usage 2) makes the summary stale
    run_turn(&engine, Some(&conversation_id), "Third").await;
    engine.provider.set_summary_reply("Summary two");
    let last_id = engine
        .database
        .get_last_message_id(&conversation_id)
        .await
        .unwrap()
        .unwrap();

    let second = engine
        .summarizer
        .summarize(summarize_request(&conversation_id))
        .await
        .unwrap();
    assert!(second.is_new);
    assert_eq!(second.text, "Summary two");
    assert_eq!(second.cutoff_message_id.as_deref(), Some(last_id.as_str()));

    let input = &engine.provider.last_complete_request().messages[1].content;
    assert!(input.starts_with("Previous summary:\nSummary: greetings were exchanged.\n"));
    assert!(input.contains("User: Second\n"));
    assert!(input.contains("User: Third\n"));
    assert!(!input.contains("Hello"));

    let summaries = engine.database.list_summaries(&conversation_id).await.unwrap();
    assert_eq!(summaries.len(), 2);
    assert_eq!(summaries[0].text, first.text);
    assert_eq!(summaries[1].text, "Summary two");
    assert!(summaries[1].created_at > summaries[0].created_at);
    assert_eq!(
        engine
            .database
            .get_latest_summary(&conversation_id)
            .await
            .unwrap()
            .unwrap()
            .id,
        summaries[1].id
    );
}

#[tokio::test]
async fn test_summarize_empty_conversation_is_rejected() {
    let engine = engine().await;
    let conversation = engine
        .database
        .create_conversation(NewConversation {
            owner_id: "alice",
            title: "empty",
            format: ResponseFormat::Text,
            schema: None,
        })
        .await
        .unwrap();

    let err = engine
        .summarizer
        .summarize(summarize_request(&conversation.id))
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::InvalidInput);
    assert!(engine.provider.complete_requests.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_summarize_requires_ownership() {
    let engine = engine().await;
    let conversation_id = run_turn(&engine, None, "Hello").await;

    let mut request = summarize_request(&conversation_id);
    request.owner_id = "mallory".to_owned();
    let err = engine.summarizer.summarize(request).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::PermissionDenied);
    assert!(engine
        .database
        .list_summaries(&conversation_id)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_empty_summary_reply_is_not_persisted() {
    let engine = engine().await;
    let conversation_id = run_turn(&engine, None, "Hello").await;
    engine.provider.set_summary_reply("   ");

    let err = engine
        .summarizer
        .summarize(summarize_request(&conversation_id))
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::ExternalServiceError);
    assert!(engine
        .database
        .list_summaries(&conversation_id)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_summary_validates_model_and_temperature() {
    let engine = engine().await;
    let conversation_id = run_turn(&engine, None, "Hello").await;

    let mut request = summarize_request(&conversation_id);
    request.temperature = Some(-0.1);
    let err = engine.summarizer.summarize(request).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::ValueOutOfRange);
}

#[tokio::test]
async fn test_llm_failure_persists_no_summary() {
    let engine = engine().await;
    let conversation_id = run_turn(&engine, None, "Hello").await;
    engine
        .provider
        .set_complete_error(ErrorCode::ExternalServiceUnavailable, "Scripted: upstream down");

    let err = engine
        .summarizer
        .summarize(summarize_request(&conversation_id))
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::ExternalServiceUnavailable);
    assert_eq!(err.message, "Scripted: upstream down");
    assert!(engine
        .database
        .list_summaries(&conversation_id)
        .await
        .unwrap()
        .is_empty());
}
