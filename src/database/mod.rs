// ABOUTME: Persistence gateway for conversations, messages and summaries
// ABOUTME: Declares the ChatRepository trait and its SQLite implementation
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Colloquy Contributors

//! # Database Management
//!
//! The chat engine only talks to storage through [`ChatRepository`]. Ownership
//! checks are the caller's job: the repository returns records as stored and
//! never filters by owner.
//!
//! History order is insertion order. Summaries are never updated except for
//! their usage counter; the newest row is the active summary.

mod chat;

pub use chat::ChatManager;

use async_trait::async_trait;

use crate::errors::AppResult;
use crate::models::{
    AssistantMetadata, ConversationRecord, MessageRecord, NewConversation, SummaryRecord,
};

/// Storage operations the chat engine depends on
#[async_trait]
pub trait ChatRepository: Send + Sync {
    /// Fetch a conversation by id
    async fn get_conversation(&self, conversation_id: &str)
        -> AppResult<Option<ConversationRecord>>;

    /// Create a conversation; format and schema are fixed from here on
    async fn create_conversation(
        &self,
        conversation: NewConversation<'_>,
    ) -> AppResult<ConversationRecord>;

    /// Append a user message
    async fn add_user_message(
        &self,
        conversation_id: &str,
        content: &str,
    ) -> AppResult<MessageRecord>;

    /// Append an assistant message with its model and usage metadata
    async fn add_assistant_message(
        &self,
        conversation_id: &str,
        content: &str,
        metadata: &AssistantMetadata,
    ) -> AppResult<MessageRecord>;

    /// Full chronological history
    async fn get_messages(&self, conversation_id: &str) -> AppResult<Vec<MessageRecord>>;

    /// Messages strictly after `cutoff_message_id`, in order
    async fn get_messages_after(
        &self,
        conversation_id: &str,
        cutoff_message_id: &str,
    ) -> AppResult<Vec<MessageRecord>>;

    /// Id of the newest message, if any
    async fn get_last_message_id(&self, conversation_id: &str) -> AppResult<Option<String>>;

    /// The active (most recently created) summary
    async fn get_latest_summary(&self, conversation_id: &str) -> AppResult<Option<SummaryRecord>>;

    /// Insert a new summary row with a zero usage counter
    async fn create_summary(
        &self,
        conversation_id: &str,
        text: &str,
        cutoff_message_id: Option<&str>,
    ) -> AppResult<SummaryRecord>;

    /// Every summary of the conversation, oldest first
    async fn list_summaries(&self, conversation_id: &str) -> AppResult<Vec<SummaryRecord>>;

    /// Bump the usage counter of a summary, returning the new count
    async fn increment_summary_usage(&self, summary_id: &str) -> AppResult<i64>;
}
