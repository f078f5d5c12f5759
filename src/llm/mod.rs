// ABOUTME: LLM provider abstraction layer for pluggable chat backends
// ABOUTME: Defines the provider capability contract, request types and the streaming envelope
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Colloquy Contributors

//! # LLM Provider Interface
//!
//! This module defines the contract every chat backend implements. Backends are
//! independent variants selected by configuration ([`ChatProvider`]); the engine
//! only talks to them through [`LlmProvider`].
//!
//! ## Key Concepts
//!
//! - **`LlmCapabilities`**: bitflags describing what a backend supports
//! - **`LlmProvider`**: stream a chat, complete a prompt (summaries), look up cost
//! - **`StreamEnvelope`**: the normalized unit of a streamed response, either a
//!   content fragment or the single terminal metadata record
//!
//! ## Example
//!
//! ```rust,no_run
//! use colloquy::llm::{ChatMessage, ChatRequest, LlmProvider};
//!
//! async fn example(provider: &dyn LlmProvider) {
//!     let request = ChatRequest::new(vec![
//!         ChatMessage::system("You are a concise assistant."),
//!         ChatMessage::user("Name three prime numbers."),
//!     ]);
//!     let response = provider.complete(&request).await;
//! }
//! ```

pub mod cost;
mod openai_compatible;
mod openrouter;
pub mod prompts;
mod provider;
pub mod sse_parser;
pub mod wire;

pub use cost::{CostLookupError, CostReconciler, GenerationCost, RetryConfig};
pub use openai_compatible::{OpenAiCompatibleConfig, OpenAiCompatibleProvider};
pub use openrouter::{OpenRouterConfig, OpenRouterProvider};
pub use provider::ChatProvider;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use tokio_stream::Stream;

use crate::errors::AppError;

// ============================================================================
// Capability Flags
// ============================================================================

bitflags::bitflags! {
    /// LLM provider capability flags
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
    pub struct LlmCapabilities: u8 {
        /// Provider supports streaming responses
        const STREAMING = 0b0000_0001;
        /// Provider supports system messages
        const SYSTEM_MESSAGES = 0b0000_0010;
        /// Provider honours JSON-only output instructions
        const JSON_MODE = 0b0000_0100;
        /// Provider surfaces a generation id usable for cost lookup
        const COST_TRACKING = 0b0000_1000;
        /// Provider reports token usage in the stream
        const USAGE_REPORTING = 0b0001_0000;
    }
}

impl LlmCapabilities {
    /// Capabilities of a plain streaming backend
    #[must_use]
    pub const fn text_only() -> Self {
        Self::STREAMING.union(Self::SYSTEM_MESSAGES)
    }

    /// Check if streaming is supported
    #[must_use]
    pub const fn supports_streaming(&self) -> bool {
        self.contains(Self::STREAMING)
    }

    /// Check if cost lookups are supported
    #[must_use]
    pub const fn supports_cost_tracking(&self) -> bool {
        self.contains(Self::COST_TRACKING)
    }

    /// Check if usage is reported inline
    #[must_use]
    pub const fn supports_usage_reporting(&self) -> bool {
        self.contains(Self::USAGE_REPORTING)
    }
}

// ============================================================================
// Message Types
// ============================================================================

/// Role of a message sent to the provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// System instruction message
    System,
    /// User input message
    User,
    /// Assistant response message
    Assistant,
}

impl MessageRole {
    /// Convert to string representation for API calls
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

impl From<crate::models::MessageRole> for MessageRole {
    fn from(role: crate::models::MessageRole) -> Self {
        match role {
            crate::models::MessageRole::User => Self::User,
            crate::models::MessageRole::Assistant => Self::Assistant,
        }
    }
}

/// A single `{role, content}` message in a provider request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Role of the message sender
    pub role: MessageRole,
    /// Content of the message
    pub content: String,
}

impl ChatMessage {
    /// Create a new chat message
    #[must_use]
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    /// Create a system message
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(MessageRole::System, content)
    }

    /// Create a user message
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, content)
    }

    /// Create an assistant message
    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, content)
    }
}

// ============================================================================
// Request/Response Types
// ============================================================================

/// Nucleus / top-k sampling parameters, selected by response format
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SamplingParams {
    /// Nucleus sampling probability mass
    pub top_p: f64,
    /// Number of candidate tokens considered
    pub top_k: u32,
}

/// Configuration for a chat completion request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    /// Conversation messages
    pub messages: Vec<ChatMessage>,
    /// Model identifier (provider-specific)
    pub model: Option<String>,
    /// Temperature for response randomness (0.0 - 2.0)
    pub temperature: Option<f64>,
    /// Sampling parameters
    pub sampling: Option<SamplingParams>,
    /// Maximum tokens to generate
    pub max_tokens: Option<u32>,
    /// Whether to stream the response
    pub stream: bool,
}

impl ChatRequest {
    /// Create a new chat request with messages
    #[must_use]
    pub const fn new(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            model: None,
            temperature: None,
            sampling: None,
            max_tokens: None,
            stream: false,
        }
    }

    /// Set the model to use
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Set the temperature
    #[must_use]
    pub const fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Set the sampling parameters
    #[must_use]
    pub const fn with_sampling(mut self, sampling: SamplingParams) -> Self {
        self.sampling = Some(sampling);
        self
    }

    /// Set the maximum tokens
    #[must_use]
    pub const fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Enable streaming
    #[must_use]
    pub const fn with_streaming(mut self) -> Self {
        self.stream = true;
        self
    }
}

/// Token usage statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Number of tokens in the prompt
    pub prompt_tokens: u32,
    /// Number of tokens in the completion
    pub completion_tokens: u32,
    /// Total tokens used
    pub total_tokens: u32,
}

/// Response from a non-streaming chat completion
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    /// Generated message content
    pub content: String,
    /// Model used for generation
    pub model: String,
    /// Token usage statistics
    pub usage: Option<TokenUsage>,
    /// Generation identifier, when the provider exposes a cost-trackable one
    pub generation_id: Option<String>,
    /// Finish reason (stop, length, etc.)
    pub finish_reason: Option<String>,
}

/// Terminal metadata record of a streamed response
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationMetadata {
    /// Generation identifier for cost lookup
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation_id: Option<String>,
    /// Model reported by the provider
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Inline token usage
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
    /// Inline cost, when the provider reports one in the stream
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_cost: Option<f64>,
    /// Latency in milliseconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<i64>,
    /// Generation time in milliseconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation_time_ms: Option<i64>,
}

/// Normalized unit of a streamed provider response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEnvelope {
    /// A content fragment, in upstream arrival order
    Content {
        /// Text delta
        delta: String,
    },
    /// The terminal metadata record; never followed by another item
    Metadata(GenerationMetadata),
}

impl StreamEnvelope {
    /// Build a content fragment
    #[must_use]
    pub fn content(delta: impl Into<String>) -> Self {
        Self::Content {
            delta: delta.into(),
        }
    }

    /// Whether this is the terminal metadata item
    #[must_use]
    pub const fn is_final(&self) -> bool {
        matches!(self, Self::Metadata(_))
    }
}

/// Stream type for chat completion responses
pub type ChatStream = Pin<Box<dyn Stream<Item = Result<StreamEnvelope, AppError>> + Send>>;

// ============================================================================
// Provider Trait
// ============================================================================

/// LLM provider capability interface
///
/// Implement this trait to add a new chat backend. Variants share no base
/// type; the SSE framing helpers in [`sse_parser`] and the wire types in
/// [`wire`] are plain functions they may reuse.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Unique provider identifier, persisted as the provider tag
    fn name(&self) -> &'static str;

    /// Human-readable display name for the provider
    fn display_name(&self) -> &'static str;

    /// Provider capabilities
    fn capabilities(&self) -> LlmCapabilities;

    /// Default model to use if not specified in request
    fn default_model(&self) -> &str;

    /// Perform a chat completion (non-streaming), used for summaries
    async fn complete(&self, request: &ChatRequest) -> Result<ChatResponse, AppError>;

    /// Perform a streaming chat completion
    ///
    /// The returned stream yields content fragments in arrival order and at
    /// most one [`StreamEnvelope::Metadata`] item, always last.
    async fn complete_stream(&self, request: &ChatRequest) -> Result<ChatStream, AppError>;

    /// Look up billing data for a finished generation
    ///
    /// Providers without cost tracking return [`CostLookupError::Unsupported`].
    async fn fetch_cost(&self, generation_id: &str) -> Result<GenerationCost, CostLookupError>;

    /// Check if the provider is reachable and credentials are valid
    async fn health_check(&self) -> Result<bool, AppError>;
}
