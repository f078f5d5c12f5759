// ABOUTME: Chat-turn orchestration and summarization engine
// ABOUTME: Context assembly, streamed turns, summaries, output framing and per-conversation locks
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Colloquy Contributors

//! # Chat Engine
//!
//! Control flow for one turn:
//!
//! ```text
//! ChatOrchestrator::handle
//!   -> validate, resolve conversation, persist user message
//!   -> ContextAssembler::assemble        (directive + history)
//!   -> background task: provider stream -> channel -> OutputFrame stream
//!   -> CostReconciler (after the stream) -> persist assistant message
//! ```
//!
//! [`SummarizationEngine::summarize`] runs independently on request; the
//! summary rows it writes are read back by the context assembler on later
//! turns.

mod context;
mod corpus;
mod frames;
mod locks;
mod orchestrator;
mod summarization;

pub use context::{build_system_directive, AssembledContext, ContextAssembler};
pub use corpus::{normalize_reference_percent, ReferenceCorpus};
pub use frames::{escape_content, OutputFrame, UsageReport};
pub use locks::{TurnGuard, TurnLocks};
pub use orchestrator::{merge_metadata, ChatOrchestrator, ChatTurn, FrameStream, TurnRequest};
pub use summarization::{build_summary_input, SummarizationEngine, SummarizeRequest, SummaryOutcome};

use crate::config::chat::TEMPERATURE_RANGE;
use crate::database::ChatRepository;
use crate::errors::{AppError, AppResult};
use crate::models::{ConversationRecord, ModelCatalog};

/// Maximum title length in Unicode code points
pub const TITLE_MAX_CHARS: usize = 100;

/// Title for a new conversation: the first 100 code points of the first message
#[must_use]
pub fn conversation_title(text: &str) -> String {
    text.chars().take(TITLE_MAX_CHARS).collect()
}

/// Reject an out-of-range temperature or a model missing from the catalog
///
/// # Errors
///
/// Returns a validation error naming the offending field.
pub fn validate_model_and_temperature(
    catalog: &dyn ModelCatalog,
    model: Option<&str>,
    temperature: Option<f64>,
) -> AppResult<()> {
    if let Some(temperature) = temperature {
        let (min, max) = TEMPERATURE_RANGE;
        if !temperature.is_finite() || !(min..=max).contains(&temperature) {
            return Err(AppError::out_of_range(format!(
                "temperature must be between {min} and {max}, got {temperature}"
            )));
        }
    }
    if let Some(model) = model {
        if !catalog.contains(model) {
            return Err(AppError::invalid_input(format!("Unknown model '{model}'")));
        }
    }
    Ok(())
}

/// Load a conversation and verify the requester owns it
///
/// # Errors
///
/// Returns not-found for a missing conversation, forbidden for a foreign one,
/// or a database error.
pub async fn load_owned_conversation(
    repository: &dyn ChatRepository,
    conversation_id: &str,
    owner_id: &str,
) -> AppResult<ConversationRecord> {
    let conversation = repository
        .get_conversation(conversation_id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("Conversation {conversation_id}")))?;

    if conversation.owner_id != owner_id {
        return Err(AppError::forbidden(
            "Conversation belongs to a different user",
        ));
    }
    Ok(conversation)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorCode;
    use crate::models::StaticModelCatalog;

    #[test]
    fn test_title_counts_code_points() {
        let text: String = "é".repeat(250);
        let title = conversation_title(&text);
        assert_eq!(title.chars().count(), 100);
        assert_eq!(title.len(), 200);
        assert_eq!(conversation_title("short"), "short");
    }

    #[test]
    fn test_validation() {
        let catalog = StaticModelCatalog::new(vec!["m".into()], None);
        assert!(validate_model_and_temperature(&catalog, Some("m"), Some(2.0)).is_ok());
        assert!(validate_model_and_temperature(&catalog, None, Some(0.0)).is_ok());
        assert_eq!(
            validate_model_and_temperature(&catalog, None, Some(2.1))
                .unwrap_err()
                .code,
            ErrorCode::ValueOutOfRange
        );
        assert_eq!(
            validate_model_and_temperature(&catalog, None, Some(f64::NAN))
                .unwrap_err()
                .code,
            ErrorCode::ValueOutOfRange
        );
        assert_eq!(
            validate_model_and_temperature(&catalog, Some("x"), None)
                .unwrap_err()
                .code,
            ErrorCode::InvalidInput
        );
    }
}
