// ABOUTME: Outbound line protocol produced by a streamed turn
// ABOUTME: Content lines with escaped newlines plus prefixed side-channel metadata lines
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Colloquy Contributors

//! Each turn yields an ordered sequence of lines:
//!
//! ```text
//! [CONVERSATION_ID]<id>
//! <content>...            escaped, one per provider fragment
//! [MODEL]<model id>
//! [TEMPERATURE]<t>
//! [USAGE]<json>           only when the provider reported usage
//! [DONE]
//! ```
//!
//! An upstream failure replaces the trailer with a single `[ERROR]<message>`.

use serde::{Deserialize, Serialize};

use crate::llm::GenerationMetadata;

/// Prefix of the conversation id line
pub const CONVERSATION_ID_PREFIX: &str = "[CONVERSATION_ID]";
/// Prefix of the model line
pub const MODEL_PREFIX: &str = "[MODEL]";
/// Prefix of the temperature line
pub const TEMPERATURE_PREFIX: &str = "[TEMPERATURE]";
/// Prefix of the usage line
pub const USAGE_PREFIX: &str = "[USAGE]";
/// Prefix of the error line
pub const ERROR_PREFIX: &str = "[ERROR]";
/// Completion marker
pub const DONE_MARKER: &str = "[DONE]";

/// Usage and cost as reported inline by the provider
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageReport {
    /// Prompt tokens
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt_tokens: Option<u32>,
    /// Completion tokens
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completion_tokens: Option<u32>,
    /// Total tokens
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_tokens: Option<u32>,
    /// Inline cost
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_cost: Option<f64>,
    /// Generation id usable for cost lookup
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation_id: Option<String>,
}

impl From<&GenerationMetadata> for UsageReport {
    fn from(metadata: &GenerationMetadata) -> Self {
        Self {
            prompt_tokens: metadata.usage.map(|u| u.prompt_tokens),
            completion_tokens: metadata.usage.map(|u| u.completion_tokens),
            total_tokens: metadata.usage.map(|u| u.total_tokens),
            total_cost: metadata.total_cost,
            generation_id: metadata.generation_id.clone(),
        }
    }
}

/// One outbound line of a streamed turn
#[derive(Debug, Clone, PartialEq)]
pub enum OutputFrame {
    /// Always first
    ConversationId(String),
    /// A content fragment
    Content(String),
    /// Resolved model id
    Model(String),
    /// Effective temperature
    Temperature(f64),
    /// Inline usage report
    Usage(UsageReport),
    /// Terminal upstream failure
    Error(String),
    /// Completion marker
    Done,
}

impl OutputFrame {
    /// Render the frame as one line of the outbound protocol
    #[must_use]
    pub fn to_line(&self) -> String {
        match self {
            Self::ConversationId(id) => format!("{CONVERSATION_ID_PREFIX}{id}"),
            Self::Content(text) => escape_content(text),
            Self::Model(model) => format!("{MODEL_PREFIX}{model}"),
            Self::Temperature(t) => format!("{TEMPERATURE_PREFIX}{t}"),
            Self::Usage(usage) => format!(
                "{USAGE_PREFIX}{}",
                serde_json::to_string(usage).unwrap_or_else(|_| "{}".to_owned())
            ),
            Self::Error(message) => format!("{ERROR_PREFIX}{}", escape_content(message)),
            Self::Done => DONE_MARKER.to_owned(),
        }
    }

    /// Whether nothing follows this frame
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Error(_))
    }
}

/// Escape embedded line breaks so one fragment stays on one line
///
/// Backslashes are doubled first so a literal `\n` in the text stays
/// distinguishable from an escaped line break.
#[must_use]
pub fn escape_content(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '\\' => escaped.push_str("\\\\"),
            '\n' => escaped.push_str("\\n"),
            '\r' => escaped.push_str("\\r"),
            other => escaped.push(other),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::TokenUsage;

    #[test]
    fn test_content_escaping() {
        assert_eq!(
            OutputFrame::Content("a\nb\r\nc".to_owned()).to_line(),
            "a\\nb\\r\\nc"
        );
    }

    #[test]
    fn test_literal_backslash_sequences_stay_distinct() {
        // C source containing a literal backslash-n, then a real newline
        let line = OutputFrame::Content("printf(\"hi\\n\");\n".to_owned()).to_line();
        assert_eq!(line, "printf(\"hi\\\\n\");\\n");
        assert_ne!(
            OutputFrame::Content("\\n".to_owned()).to_line(),
            OutputFrame::Content("\n".to_owned()).to_line()
        );
    }

    #[test]
    fn test_prefixed_lines() {
        assert_eq!(
            OutputFrame::ConversationId("c1".to_owned()).to_line(),
            "[CONVERSATION_ID]c1"
        );
        assert_eq!(OutputFrame::Model("m".to_owned()).to_line(), "[MODEL]m");
        assert_eq!(OutputFrame::Temperature(0.7).to_line(), "[TEMPERATURE]0.7");
        assert_eq!(OutputFrame::Done.to_line(), "[DONE]");
        assert_eq!(
            OutputFrame::Error("bad\nthing".to_owned()).to_line(),
            "[ERROR]bad\\nthing"
        );
    }

    #[test]
    fn test_usage_line_is_json() {
        let metadata = GenerationMetadata {
            usage: Some(TokenUsage {
                prompt_tokens: 3,
                completion_tokens: 2,
                total_tokens: 5,
            }),
            ..GenerationMetadata::default()
        };
        let line = OutputFrame::Usage(UsageReport::from(&metadata)).to_line();
        let json: serde_json::Value =
            serde_json::from_str(line.strip_prefix(USAGE_PREFIX).unwrap()).unwrap();
        assert_eq!(json["total_tokens"], 5);
        assert!(json.get("total_cost").is_none());
    }
}
