// ABOUTME: Shared test utilities and setup functions for integration tests
// ABOUTME: In-memory storage, a scripted LLM provider and pre-wired chat engine helpers
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Colloquy Contributors
#![allow(
    dead_code,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::must_use_candidate,
    clippy::unwrap_used,
    clippy::expect_used
)]
//! Shared test utilities for `colloquy`

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, Once};

use async_trait::async_trait;
use colloquy::{
    chat::{ChatOrchestrator, OutputFrame, SummarizationEngine, TurnLocks},
    config::ChatConfig,
    database::ChatManager,
    errors::{AppError, ErrorCode},
    llm::{
        ChatRequest, ChatResponse, ChatStream, CostLookupError, GenerationCost,
        GenerationMetadata, LlmCapabilities, LlmProvider, RetryConfig, StreamEnvelope, TokenUsage,
    },
    models::StaticModelCatalog,
};
use futures_util::stream::{self, StreamExt};

static INIT_LOGGER: Once = Once::new();

/// Initialize quiet logging for tests (call once per test process)
pub fn init_test_logging() {
    INIT_LOGGER.call_once(|| {
        let log_level = match std::env::var("TEST_LOG").as_deref() {
            Ok("TRACE") => tracing::Level::TRACE,
            Ok("DEBUG") => tracing::Level::DEBUG,
            Ok("INFO") => tracing::Level::INFO,
            _ => tracing::Level::WARN,
        };

        tracing_subscriber::fmt()
            .with_max_level(log_level)
            .with_test_writer()
            .init();
    });
}

/// Fresh in-memory database with the schema applied
pub async fn create_test_database() -> Arc<ChatManager> {
    Arc::new(ChatManager::connect("sqlite::memory:").await.unwrap())
}

pub const TEST_MODEL: &str = "test/model-a";
pub const OTHER_MODEL: &str = "test/model-b";
pub const PROVIDER_DEFAULT_MODEL: &str = "scripted-default";

/// How the scripted provider's stream behaves
#[derive(Debug, Clone)]
pub enum StreamScript {
    /// Emit the deltas, then the metadata (if any), then end
    Reply {
        deltas: Vec<String>,
        metadata: Option<GenerationMetadata>,
    },
    /// Fail before any content
    FailOpen(String),
    /// Emit the deltas, then fail
    FailMidway { deltas: Vec<String>, message: String },
    /// Emit the deltas, then never finish
    Hang { deltas: Vec<String> },
}

impl StreamScript {
    pub fn reply(deltas: &[&str]) -> Self {
        Self::Reply {
            deltas: deltas.iter().map(|d| (*d).to_owned()).collect(),
            metadata: Some(GenerationMetadata {
                generation_id: Some("gen-test".to_owned()),
                model: Some(TEST_MODEL.to_owned()),
                usage: Some(TokenUsage {
                    prompt_tokens: 12,
                    completion_tokens: 3,
                    total_tokens: 15,
                }),
                total_cost: Some(0.000_42),
                ..GenerationMetadata::default()
            }),
        }
    }
}

/// LLM provider that replays scripted responses and records every request
pub struct ScriptedProvider {
    capabilities: LlmCapabilities,
    stream_script: Mutex<StreamScript>,
    summary_reply: Mutex<String>,
    complete_error: Mutex<Option<(ErrorCode, String)>>,
    costs: Mutex<VecDeque<Result<GenerationCost, CostLookupError>>>,
    pub stream_requests: Mutex<Vec<ChatRequest>>,
    pub complete_requests: Mutex<Vec<ChatRequest>>,
    pub cost_lookups: Mutex<u32>,
}

impl ScriptedProvider {
    pub fn new(script: StreamScript) -> Self {
        Self {
            capabilities: LlmCapabilities::STREAMING
                | LlmCapabilities::SYSTEM_MESSAGES
                | LlmCapabilities::USAGE_REPORTING,
            stream_script: Mutex::new(script),
            summary_reply: Mutex::new("Summary: greetings were exchanged.".to_owned()),
            complete_error: Mutex::new(None),
            costs: Mutex::new(VecDeque::new()),
            stream_requests: Mutex::new(Vec::new()),
            complete_requests: Mutex::new(Vec::new()),
            cost_lookups: Mutex::new(0),
        }
    }

    /// Enable cost tracking and queue lookup results
    pub fn with_costs(
        mut self,
        costs: Vec<Result<GenerationCost, CostLookupError>>,
    ) -> Self {
        self.capabilities |= LlmCapabilities::COST_TRACKING;
        self.costs = Mutex::new(costs.into());
        self
    }

    pub fn set_script(&self, script: StreamScript) {
        *self.stream_script.lock().unwrap() = script;
    }

    pub fn set_summary_reply(&self, reply: &str) {
        *self.summary_reply.lock().unwrap() = reply.to_owned();
    }

    /// Make every later `complete` call fail with `error`
    pub fn set_complete_error(&self, code: ErrorCode, message: &str) {
        *self.complete_error.lock().unwrap() = Some((code, message.to_owned()));
    }

    pub fn last_stream_request(&self) -> ChatRequest {
        self.stream_requests.lock().unwrap().last().cloned().unwrap()
    }

    pub fn last_complete_request(&self) -> ChatRequest {
        self.complete_requests.lock().unwrap().last().cloned().unwrap()
    }
}

fn content_items(deltas: Vec<String>) -> Vec<Result<StreamEnvelope, AppError>> {
    deltas.into_iter().map(|d| Ok(StreamEnvelope::content(d))).collect()
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn display_name(&self) -> &'static str {
        "Scripted"
    }

    fn capabilities(&self) -> LlmCapabilities {
        self.capabilities
    }

    fn default_model(&self) -> &str {
        PROVIDER_DEFAULT_MODEL
    }

    async fn complete(&self, request: &ChatRequest) -> Result<ChatResponse, AppError> {
        self.complete_requests.lock().unwrap().push(request.clone());
        if let Some((code, message)) = self.complete_error.lock().unwrap().clone() {
            return Err(AppError::new(code, message));
        }
        Ok(ChatResponse {
            content: self.summary_reply.lock().unwrap().clone(),
            model: request
                .model
                .clone()
                .unwrap_or_else(|| PROVIDER_DEFAULT_MODEL.to_owned()),
            usage: None,
            generation_id: None,
            finish_reason: Some("stop".to_owned()),
        })
    }

    async fn complete_stream(&self, request: &ChatRequest) -> Result<ChatStream, AppError> {
        self.stream_requests.lock().unwrap().push(request.clone());
        let script = self.stream_script.lock().unwrap().clone();
        match script {
            StreamScript::Reply { deltas, metadata } => {
                let mut items = content_items(deltas);
                if let Some(metadata) = metadata {
                    items.push(Ok(StreamEnvelope::Metadata(metadata)));
                }
                Ok(Box::pin(stream::iter(items)))
            }
            StreamScript::FailOpen(message) => Err(AppError::new(
                ErrorCode::ExternalServiceUnavailable,
                message,
            )),
            StreamScript::FailMidway { deltas, message } => {
                let mut items = content_items(deltas);
                items.push(Err(AppError::external_service("Scripted", message)));
                Ok(Box::pin(stream::iter(items)))
            }
            StreamScript::Hang { deltas } => Ok(Box::pin(
                stream::iter(content_items(deltas)).chain(stream::pending()),
            )),
        }
    }

    async fn fetch_cost(&self, _generation_id: &str) -> Result<GenerationCost, CostLookupError> {
        *self.cost_lookups.lock().unwrap() += 1;
        self.costs
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Err(CostLookupError::NotYetAvailable))
    }

    async fn health_check(&self) -> Result<bool, AppError> {
        Ok(true)
    }
}

/// Engine pieces wired to in-memory storage and a scripted provider
pub struct TestEngine {
    pub database: Arc<ChatManager>,
    pub provider: Arc<ScriptedProvider>,
    pub orchestrator: ChatOrchestrator,
    pub summarizer: SummarizationEngine,
    pub config: Arc<ChatConfig>,
}

/// Chat configuration with fast cost lookups
pub fn test_chat_config() -> ChatConfig {
    ChatConfig {
        cost_lookup: RetryConfig {
            max_attempts: 3,
            initial_delay_ms: 5,
            deadline_ms: 2_000,
        },
        ..ChatConfig::default()
    }
}

pub async fn create_test_engine(provider: ScriptedProvider) -> TestEngine {
    create_test_engine_with_config(provider, test_chat_config()).await
}

pub async fn create_test_engine_with_config(
    provider: ScriptedProvider,
    config: ChatConfig,
) -> TestEngine {
    init_test_logging();
    let database = create_test_database().await;
    let provider = Arc::new(provider);
    let config = Arc::new(config);
    let catalog = Arc::new(StaticModelCatalog::new(
        vec![OTHER_MODEL.to_owned()],
        Some(TEST_MODEL.to_owned()),
    ));
    let locks = TurnLocks::new(config.serialize_turns);

    let orchestrator = ChatOrchestrator::new(
        Arc::clone(&config),
        database.clone(),
        provider.clone(),
        catalog.clone(),
        locks.clone(),
    );
    let summarizer = SummarizationEngine::new(
        Arc::clone(&config),
        database.clone(),
        provider.clone(),
        catalog,
        locks,
    );

    TestEngine {
        database,
        provider,
        orchestrator,
        summarizer,
        config,
    }
}

/// Drain every frame of a turn
pub async fn collect_frames(frames: colloquy::chat::FrameStream) -> Vec<OutputFrame> {
    frames.collect().await
}
