// ABOUTME: Context assembler building the system directive and history for each turn
// ABOUTME: Handles format-specific directives, summary prefixing, corpus injection and history cutoff
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Colloquy Contributors

use std::sync::Arc;

use tracing::debug;

use super::corpus::ReferenceCorpus;
use crate::config::ChatConfig;
use crate::database::ChatRepository;
use crate::errors::AppResult;
use crate::llm::prompts::{structured_directive, ADDENDUM_SEPARATOR, REFERENCE_HEADER, SUMMARY_PREFIX};
use crate::llm::ChatMessage;
use crate::models::{ConversationRecord, MessageRecord, ResponseFormat};

/// Directive and history selected for one turn
#[derive(Debug, Clone)]
pub struct AssembledContext {
    /// Effective system directive
    pub system_directive: String,
    /// History to replay, oldest first
    pub history: Vec<MessageRecord>,
    /// Summary consulted for this turn, if any
    pub summary_id: Option<String>,
}

impl AssembledContext {
    /// Provider messages: the directive followed by the replayed history
    #[must_use]
    pub fn to_messages(&self) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(self.history.len() + 1);
        messages.push(ChatMessage::system(self.system_directive.clone()));
        messages.extend(
            self.history
                .iter()
                .map(|m| ChatMessage::new(m.role.into(), m.content.clone())),
        );
        messages
    }
}

/// Build the effective system directive
///
/// - `text`: default prompt, then the addendum after a separator
/// - `json`/`xml`: a strict schema directive replaces everything; the addendum
///   is ignored
/// - a summary, when present, is prepended
/// - a corpus slice, when given, is appended
#[must_use]
pub fn build_system_directive(
    default_prompt: &str,
    format: ResponseFormat,
    schema: Option<&str>,
    addendum: Option<&str>,
    summary_text: Option<&str>,
    corpus_slice: Option<&str>,
) -> String {
    let body = if format.is_structured() {
        structured_directive(format.as_str(), schema)
    } else {
        match addendum.map(str::trim).filter(|a| !a.is_empty()) {
            Some(addendum) => format!("{default_prompt}{ADDENDUM_SEPARATOR}{addendum}"),
            None => default_prompt.to_owned(),
        }
    };

    let mut directive = match summary_text {
        Some(summary) => format!("{SUMMARY_PREFIX}{summary}\n\n{body}"),
        None => body,
    };

    if let Some(slice) = corpus_slice.filter(|s| !s.is_empty()) {
        directive.push_str(REFERENCE_HEADER);
        directive.push_str(slice);
    }
    directive
}

/// Builds per-turn context from configuration, stored summaries and history
#[derive(Clone)]
pub struct ContextAssembler {
    config: Arc<ChatConfig>,
    repository: Arc<dyn ChatRepository>,
    corpus: ReferenceCorpus,
}

impl ContextAssembler {
    /// Create an assembler; the corpus is taken from the configuration
    #[must_use]
    pub fn new(config: Arc<ChatConfig>, repository: Arc<dyn ChatRepository>) -> Self {
        let corpus = ReferenceCorpus::new(Arc::clone(&config.reference_corpus));
        Self {
            config,
            repository,
            corpus,
        }
    }

    /// The shared reference corpus
    #[must_use]
    pub const fn corpus(&self) -> &ReferenceCorpus {
        &self.corpus
    }

    /// Assemble the directive and history for a turn on `conversation`
    ///
    /// Consulting an existing summary increments its usage counter.
    ///
    /// # Errors
    ///
    /// Returns a database error if summaries or messages cannot be read.
    pub async fn assemble(
        &self,
        conversation: &ConversationRecord,
        addendum: Option<&str>,
        reference_percent: Option<i64>,
    ) -> AppResult<AssembledContext> {
        let summary = self.repository.get_latest_summary(&conversation.id).await?;

        let history = match &summary {
            Some(summary) => {
                self.repository.increment_summary_usage(&summary.id).await?;
                match summary.cutoff_message_id.as_deref() {
                    Some(cutoff) => {
                        self.repository
                            .get_messages_after(&conversation.id, cutoff)
                            .await?
                    }
                    None => Vec::new(),
                }
            }
            None => self.repository.get_messages(&conversation.id).await?,
        };

        let corpus_slice = reference_percent.map(|p| self.corpus.slice(p));

        let system_directive = build_system_directive(
            &self.config.default_system_prompt,
            conversation.format,
            conversation.schema.as_deref(),
            addendum,
            summary.as_ref().map(|s| s.text.as_str()),
            corpus_slice,
        );

        debug!(
            conversation_id = %conversation.id,
            history = history.len(),
            summary = summary.is_some(),
            directive_chars = system_directive.len(),
            "Context assembled"
        );

        Ok(AssembledContext {
            system_directive,
            history,
            summary_id: summary.map(|s| s.id),
        })
    }
}
