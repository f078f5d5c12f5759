// ABOUTME: Persisted chat domain records and their enums
// ABOUTME: Re-exports conversation, message and summary types shared by engine and storage
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Colloquy Contributors

//! # Data Models
//!
//! - `ConversationRecord`: owner, title, and the response format fixed at creation
//! - `MessageRecord`: one user or assistant message; assistant rows carry usage metadata
//! - `SummaryRecord`: a compressed view of history up to a cutoff message

mod conversation;

pub use conversation::{
    AssistantMetadata, ConversationRecord, MessageRecord, MessageRole, NewConversation,
    ResponseFormat, SummaryRecord,
};
