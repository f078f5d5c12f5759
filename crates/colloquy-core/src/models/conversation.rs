// ABOUTME: Chat conversation, message and summary record types for database persistence
// ABOUTME: DTOs for owner-scoped conversations with per-message model and cost tracking
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Colloquy Contributors

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::AppError;

/// Output format requested for a conversation, fixed at creation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseFormat {
    /// Free-form conversational text
    #[default]
    Text,
    /// Raw JSON matching the stored schema
    Json,
    /// Raw XML matching the stored schema
    Xml,
}

impl ResponseFormat {
    /// Lowercase wire/storage representation
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Json => "json",
            Self::Xml => "xml",
        }
    }

    /// `json` and `xml` formats replace the conversational directive entirely
    #[must_use]
    pub const fn is_structured(&self) -> bool {
        matches!(self, Self::Json | Self::Xml)
    }
}

impl fmt::Display for ResponseFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResponseFormat {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            "xml" => Ok(Self::Xml),
            other => Err(AppError::invalid_input(format!(
                "Unsupported response format '{other}' (expected text, json or xml)"
            ))),
        }
    }
}

/// Role of a persisted message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// Message typed by the conversation owner
    User,
    /// Message produced by the provider
    Assistant,
}

impl MessageRole {
    /// Convert to string representation for storage and API calls
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

impl FromStr for MessageRole {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            other => Err(AppError::database(format!("Unknown message role '{other}'"))),
        }
    }
}

/// Database representation of a chat conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationRecord {
    /// Unique conversation ID
    pub id: String,
    /// Identity that owns the conversation
    pub owner_id: String,
    /// Title derived from the first message
    pub title: String,
    /// Response format, immutable after creation
    pub format: ResponseFormat,
    /// Schema text for structured formats, immutable after creation
    pub schema: Option<String>,
    /// When the conversation was created
    pub created_at: DateTime<Utc>,
    /// When the conversation last received a message
    pub updated_at: DateTime<Utc>,
}

/// Values required to create a conversation
#[derive(Debug, Clone)]
pub struct NewConversation<'a> {
    /// Owner identity
    pub owner_id: &'a str,
    /// Title (already truncated)
    pub title: &'a str,
    /// Response format
    pub format: ResponseFormat,
    /// Optional schema text
    pub schema: Option<&'a str>,
}

/// Model, sampling and usage data recorded on an assistant message
///
/// Every numeric field is optional: providers report different subsets and
/// cost data may never arrive.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssistantMetadata {
    /// Model that produced the response
    pub model: Option<String>,
    /// Sampling temperature used
    pub temperature: Option<f64>,
    /// Provider tag (e.g. `openrouter`, `ollama`)
    pub provider: Option<String>,
    /// Prompt token count
    pub prompt_tokens: Option<i64>,
    /// Completion token count
    pub completion_tokens: Option<i64>,
    /// Total token count
    pub total_tokens: Option<i64>,
    /// Total cost in provider currency units
    pub total_cost: Option<f64>,
    /// Time to first token in milliseconds
    pub latency_ms: Option<i64>,
    /// Generation time in milliseconds
    pub generation_time_ms: Option<i64>,
}

/// Database representation of a chat message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageRecord {
    /// Unique message ID
    pub id: String,
    /// Conversation ID this message belongs to
    pub conversation_id: String,
    /// Role of the message sender
    pub role: MessageRole,
    /// Message content
    pub content: String,
    /// Assistant-only metadata (all `None` for user messages)
    #[serde(flatten)]
    pub metadata: AssistantMetadata,
    /// When the message was created
    pub created_at: DateTime<Utc>,
}

/// Database representation of a conversation summary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryRecord {
    /// Unique summary ID
    pub id: String,
    /// Conversation ID this summary belongs to
    pub conversation_id: String,
    /// Summary text
    pub text: String,
    /// Last message folded into this summary
    pub cutoff_message_id: Option<String>,
    /// How many turns consulted this summary
    pub usage_count: i64,
    /// When the summary was created
    pub created_at: DateTime<Utc>,
}
