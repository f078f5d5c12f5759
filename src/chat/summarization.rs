// ABOUTME: Summarization engine compressing conversation history into summary rows
// ABOUTME: Reuses a fresh summary, otherwise folds the previous summary and newer messages into a new one
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Colloquy Contributors

use std::fmt::Write as _;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use super::locks::TurnLocks;
use super::{load_owned_conversation, validate_model_and_temperature};
use crate::config::ChatConfig;
use crate::database::ChatRepository;
use crate::errors::{AppError, AppResult};
use crate::llm::{ChatMessage, ChatRequest, LlmProvider};
use crate::models::{MessageRecord, MessageRole, ModelCatalog};

/// A summary is reused until it has been consulted this many times
pub const RESUMMARIZE_AFTER_USES: i64 = 2;

/// Inputs of a summarize call
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SummarizeRequest {
    /// Conversation to summarize
    pub conversation_id: String,
    /// Authenticated caller
    pub owner_id: String,
    /// Model id, which must be in the catalog
    pub model: Option<String>,
    /// Sampling temperature in `[0, 2]`
    pub temperature: Option<f64>,
}

/// Result of a summarize call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryOutcome {
    /// Summary text
    pub text: String,
    /// Last message folded into the summary
    pub cutoff_message_id: Option<String>,
    /// Whether a new summary row was written
    pub is_new: bool,
}

/// Render the text sent to the summarizer
///
/// A previous summary, when present, leads as one synthetic line; each message
/// follows as `User: ...` or `Assistant: ...`.
#[must_use]
pub fn build_summary_input(previous: Option<&str>, messages: &[MessageRecord]) -> String {
    let mut input = String::new();
    if let Some(previous) = previous {
        let _ = writeln!(input, "Previous summary:\n{previous}");
    }
    for message in messages {
        let speaker = match message.role {
            MessageRole::User => "User",
            MessageRole::Assistant => "Assistant",
        };
        let _ = writeln!(input, "{speaker}: {}", message.content);
    }
    input
}

/// Decides when to compress history and writes summary rows
#[derive(Clone)]
pub struct SummarizationEngine {
    config: Arc<ChatConfig>,
    repository: Arc<dyn ChatRepository>,
    provider: Arc<dyn LlmProvider>,
    catalog: Arc<dyn ModelCatalog>,
    locks: TurnLocks,
}

impl SummarizationEngine {
    /// Wire the engine to its collaborators
    #[must_use]
    pub fn new(
        config: Arc<ChatConfig>,
        repository: Arc<dyn ChatRepository>,
        provider: Arc<dyn LlmProvider>,
        catalog: Arc<dyn ModelCatalog>,
        locks: TurnLocks,
    ) -> Self {
        Self {
            config,
            repository,
            provider,
            catalog,
            locks,
        }
    }

    /// Summarize a conversation, or return its still-fresh active summary
    ///
    /// # Errors
    ///
    /// Returns a validation error for a bad model or temperature, or when the
    /// conversation has no messages; not-found or forbidden for a bad
    /// conversation; an external-service error if the provider fails or
    /// returns nothing; or a database error.
    #[instrument(skip_all, fields(conversation_id = %request.conversation_id))]
    pub async fn summarize(&self, request: SummarizeRequest) -> AppResult<SummaryOutcome> {
        validate_model_and_temperature(
            self.catalog.as_ref(),
            request.model.as_deref(),
            request.temperature,
        )?;
        let conversation = load_owned_conversation(
            self.repository.as_ref(),
            &request.conversation_id,
            &request.owner_id,
        )
        .await?;
        let _guard = self.locks.acquire(&conversation.id).await;

        let previous = self.repository.get_latest_summary(&conversation.id).await?;
        if let Some(summary) = previous
            .as_ref()
            .filter(|s| s.usage_count < RESUMMARIZE_AFTER_USES)
        {
            info!(
                summary_id = %summary.id,
                usage_count = summary.usage_count,
                "Reusing active summary"
            );
            return Ok(SummaryOutcome {
                text: summary.text.clone(),
                cutoff_message_id: summary.cutoff_message_id.clone(),
                is_new: false,
            });
        }

        let Some(cutoff) = self
            .repository
            .get_last_message_id(&conversation.id)
            .await?
        else {
            return Err(AppError::invalid_input(
                "Conversation has no messages to summarize",
            ));
        };

        let messages = match previous
            .as_ref()
            .and_then(|s| s.cutoff_message_id.as_deref())
        {
            Some(previous_cutoff) => {
                self.repository
                    .get_messages_after(&conversation.id, previous_cutoff)
                    .await?
            }
            None => self.repository.get_messages(&conversation.id).await?,
        };
        let input = build_summary_input(previous.as_ref().map(|s| s.text.as_str()), &messages);

        let model = request
            .model
            .as_deref()
            .or_else(|| self.catalog.default_model())
            .unwrap_or_else(|| self.provider.default_model())
            .to_owned();
        let llm_request = ChatRequest::new(vec![
            ChatMessage::system(self.config.summarization_prompt.clone()),
            ChatMessage::user(input),
        ])
        .with_model(model)
        .with_temperature(
            request
                .temperature
                .unwrap_or(self.config.default_temperature),
        )
        .with_sampling(self.config.text_sampling);

        let response = self.provider.complete(&llm_request).await.map_err(|e| {
            warn!("Summarization request failed: {e}");
            e
        })?;
        let text = response.content.trim();
        if text.is_empty() {
            return Err(AppError::external_service(
                self.provider.display_name(),
                "Summarization returned no content",
            ));
        }

        let summary = self
            .repository
            .create_summary(&conversation.id, text, Some(&cutoff))
            .await?;

        info!(
            summary_id = %summary.id,
            folded_messages = messages.len(),
            replaced = previous.is_some(),
            "Summary created"
        );

        Ok(SummaryOutcome {
            text: summary.text,
            cutoff_message_id: summary.cutoff_message_id,
            is_new: true,
        })
    }
}
