// ABOUTME: Main library entry point for the Colloquy chat service
// ABOUTME: Multi-turn LLM chat with server-held history, streamed turns and summary compression
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Colloquy Contributors

#![deny(unsafe_code)]

//! # Colloquy
//!
//! A chat service that keeps conversation history on the server, streams
//! provider responses back to the caller and compresses long histories into
//! summaries.
//!
//! ## Architecture
//!
//! - **chat**: turn orchestration, context assembly, summarization, output framing
//! - **llm**: provider trait with OpenRouter and OpenAI-compatible backends,
//!   SSE parsing and post-stream cost reconciliation
//! - **database**: SQLite persistence of conversations, messages and summaries
//! - **routes** / **server**: the HTTP surface
//! - **config** / **logging**: environment-driven settings and tracing setup
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use colloquy::config::ServerConfig;
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = ServerConfig::from_env()?;
//!     println!("Colloquy configured with port: HTTP={}", config.http_port);
//!     Ok(())
//! }
//! ```

/// Chat-turn orchestration and summarization engine
pub mod chat;

/// Configuration management
pub mod config;

/// Conversation, message and summary persistence
pub mod database;

/// Unified error handling
pub mod errors;

/// LLM provider abstraction
pub mod llm;

/// Structured logging setup
pub mod logging;

/// Domain models and model catalog
pub mod models;

/// HTTP route handlers
pub mod routes;

/// Server resources and router assembly
pub mod server;
