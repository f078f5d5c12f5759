// ABOUTME: Domain models used by the chat engine and the model catalog
// ABOUTME: Re-exports persisted records from colloquy-core alongside catalog lookups
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Colloquy Contributors

//! # Data Models
//!
//! Persisted records (conversations, messages, summaries) live in the
//! `colloquy-core` crate and are re-exported here. The model catalog decides
//! which model ids a caller may request.

mod catalog;

pub use catalog::{ModelCatalog, StaticModelCatalog};
pub use colloquy_core::models::{
    AssistantMetadata, ConversationRecord, MessageRecord, MessageRole, NewConversation,
    ResponseFormat, SummaryRecord,
};
