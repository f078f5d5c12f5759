// ABOUTME: Built-in prompts for conversational turns and summarization, loaded at compile time
// ABOUTME: Also holds the directive fragments the context assembler stitches together
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Colloquy Contributors

//! # Prompts
//!
//! Prompts are loaded at compile time from markdown files for easy maintenance.
//! The conversational prompt can be replaced at startup
//! (see [`crate::config::ChatConfig`]); the summarization prompt cannot.

/// Default conversational system prompt
pub const DEFAULT_SYSTEM_PROMPT: &str = include_str!("default_system.md");

/// Dedicated summarization directive
///
/// Used alone: the conversational prompt and any user addendum are never
/// combined with it.
pub const SUMMARIZATION_PROMPT: &str = include_str!("summarization.md");

/// Separator between the default prompt and a caller-supplied addendum
pub const ADDENDUM_SEPARATOR: &str = "\n\n---\n\nAdditional instructions:\n";

/// Header placed before the prior summary in the system directive
pub const SUMMARY_PREFIX: &str = "Previous conversation summary:\n";

/// Header placed before the injected reference corpus slice
pub const REFERENCE_HEADER: &str = "\n\n---\n\nReference material:\n";

/// Build the strict directive used for `json` and `xml` conversations
///
/// The conversational prompt is replaced entirely; a missing schema still
/// yields a directive demanding raw output in the requested format.
#[must_use]
pub fn structured_directive(format_name: &str, schema: Option<&str>) -> String {
    let format_upper = format_name.to_ascii_uppercase();
    let mut directive = format!(
        "You are a data generation engine. Respond ONLY with raw {format_upper}.\n\
         Do not include any prose, explanations, greetings or markdown code fences.\n\
         The first character of your reply must begin the {format_upper} document and the last character must end it.\n"
    );
    match schema.map(str::trim).filter(|s| !s.is_empty()) {
        Some(schema) => {
            directive.push_str(&format!(
                "Every reply MUST strictly comply with the following {format_upper} schema:\n{schema}\n"
            ));
        }
        None => {
            directive.push_str(&format!(
                "Every reply MUST be a single well-formed {format_upper} document.\n"
            ));
        }
    }
    directive
}
