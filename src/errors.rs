// ABOUTME: Error handling surface of the chat service
// ABOUTME: Re-exports the shared error taxonomy from colloquy-core
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Colloquy Contributors

//! Unified error handling
//!
//! `AppError` carries an [`ErrorCode`] that maps to an HTTP status, so route
//! handlers can return `AppResult<T>` directly.

pub use colloquy_core::errors::{AppError, AppResult, ErrorCode, ErrorResponse};
