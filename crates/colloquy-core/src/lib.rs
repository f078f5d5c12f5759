// ABOUTME: Core types for the Colloquy multi-turn chat service
// ABOUTME: Foundation crate with error handling and persisted chat domain models
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Colloquy Contributors

#![deny(unsafe_code)]

//! # Colloquy Core
//!
//! Foundation crate providing the shared error taxonomy and the persisted chat
//! records (conversations, messages, summaries). It changes infrequently so the
//! engine crate can iterate without recompiling it.
//!
//! ## Modules
//!
//! - **errors**: Unified error handling with `AppError`, `ErrorCode` and `AppResult`
//! - **models**: Conversation, message and summary records plus their enums

/// Unified error handling system with standard error codes and HTTP responses
pub mod errors;

/// Persisted chat records (conversation, message, summary)
pub mod models;
