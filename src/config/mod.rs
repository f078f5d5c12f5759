// ABOUTME: Configuration management module for centralized server and engine settings
// ABOUTME: Environment-sourced values are parsed once at startup into immutable structs
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Colloquy Contributors

//! Configuration module for Colloquy
//!
//! - **Chat**: prompts, sampling, cost lookup backoff, reference corpus
//! - **Environment**: HTTP port, database URL, model catalog, provider selection
//! - **Types**: shared enums parsed from environment strings

/// Chat engine configuration
pub mod chat;
/// Environment and server configuration
pub mod environment;
/// Shared configuration enums
pub mod types;

pub use chat::ChatConfig;
pub use environment::ServerConfig;
pub use types::{Environment, LlmProviderType};
