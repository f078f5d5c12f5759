// ABOUTME: Request orchestrator coordinating one streamed chat turn end to end
// ABOUTME: Validates, resolves the conversation, streams via a background reader and persists the reply
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Colloquy Contributors

//! # Request Orchestrator
//!
//! Ordering within a turn is strict: the user message is persisted before the
//! provider is called, and the assistant message is persisted after the
//! provider stream ends (and after cost reconciliation, when available).
//!
//! Each turn runs one background task that pumps provider envelopes into a
//! bounded channel while the caller drains [`ChatTurn::frames`]. Dropping the
//! frame stream cancels the background reader, which drops the upstream body.
//! Text already received is still persisted, since the cost was incurred.

use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::{Stream, StreamExt};
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, info, info_span, instrument, warn, Instrument};

use super::context::ContextAssembler;
use super::frames::{OutputFrame, UsageReport};
use super::locks::{TurnGuard, TurnLocks};
use super::{conversation_title, load_owned_conversation, validate_model_and_temperature};
use crate::config::ChatConfig;
use crate::database::ChatRepository;
use crate::errors::{AppError, AppResult};
use crate::llm::{
    ChatRequest, CostReconciler, GenerationCost, GenerationMetadata, LlmProvider, StreamEnvelope,
};
use crate::models::{
    AssistantMetadata, MessageRecord, ModelCatalog, NewConversation, ResponseFormat,
};

/// Ordered outbound frames of one turn
pub type FrameStream = Pin<Box<dyn Stream<Item = OutputFrame> + Send>>;

type EnvelopeSender = mpsc::Sender<Result<StreamEnvelope, AppError>>;
type EnvelopeReceiver = mpsc::Receiver<Result<StreamEnvelope, AppError>>;

/// Inputs of one chat turn
#[derive(Debug, Clone, Default)]
pub struct TurnRequest {
    /// Authenticated caller
    pub owner_id: String,
    /// User message text
    pub text: String,
    /// Existing conversation, or `None` to start one
    pub conversation_id: Option<String>,
    /// Addendum to the default prompt (text conversations only)
    pub system_prompt: Option<String>,
    /// Format for a new conversation; ignored for existing ones
    pub format: Option<ResponseFormat>,
    /// Schema for a new structured conversation; ignored for existing ones
    pub schema: Option<String>,
    /// Model id, which must be in the catalog
    pub model: Option<String>,
    /// Sampling temperature in `[0, 2]`
    pub temperature: Option<f64>,
    /// Share of the reference corpus to inject
    pub reference_percent: Option<i64>,
}

impl TurnRequest {
    /// Start a request for `owner_id` saying `text`
    #[must_use]
    pub fn new(owner_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            owner_id: owner_id.into(),
            text: text.into(),
            ..Self::default()
        }
    }

    /// Continue an existing conversation
    #[must_use]
    pub fn in_conversation(mut self, conversation_id: impl Into<String>) -> Self {
        self.conversation_id = Some(conversation_id.into());
        self
    }

    /// Request a structured format (applies only when creating)
    #[must_use]
    pub fn with_format(mut self, format: ResponseFormat, schema: Option<String>) -> Self {
        self.format = Some(format);
        self.schema = schema;
        self
    }

    /// Set the model
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Set the temperature
    #[must_use]
    pub const fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }
}

/// A running turn
pub struct ChatTurn {
    /// Conversation the turn belongs to (new or existing)
    pub conversation_id: String,
    /// The persisted user message
    pub user_message: MessageRecord,
    /// Outbound frames, starting with the conversation id
    pub frames: FrameStream,
    /// Resolves once the assistant message is persisted (`None` on upstream failure)
    pub completion: JoinHandle<AppResult<Option<MessageRecord>>>,
}

/// Top-level coordinator for streamed turns
#[derive(Clone)]
pub struct ChatOrchestrator {
    config: Arc<ChatConfig>,
    repository: Arc<dyn ChatRepository>,
    provider: Arc<dyn LlmProvider>,
    catalog: Arc<dyn ModelCatalog>,
    context: ContextAssembler,
    reconciler: CostReconciler,
    locks: TurnLocks,
}

impl ChatOrchestrator {
    /// Wire the orchestrator to its collaborators
    #[must_use]
    pub fn new(
        config: Arc<ChatConfig>,
        repository: Arc<dyn ChatRepository>,
        provider: Arc<dyn LlmProvider>,
        catalog: Arc<dyn ModelCatalog>,
        locks: TurnLocks,
    ) -> Self {
        let context = ContextAssembler::new(Arc::clone(&config), Arc::clone(&repository));
        let reconciler = CostReconciler::new(Arc::clone(&provider), config.cost_lookup);
        Self {
            config,
            repository,
            provider,
            catalog,
            context,
            reconciler,
            locks,
        }
    }

    /// The provider serving turns
    #[must_use]
    pub fn provider(&self) -> &Arc<dyn LlmProvider> {
        &self.provider
    }

    /// The model catalog
    #[must_use]
    pub fn catalog(&self) -> &Arc<dyn ModelCatalog> {
        &self.catalog
    }

    /// Requested model, else the catalog default, else the provider default
    #[must_use]
    pub fn resolve_model(&self, requested: Option<&str>) -> String {
        requested
            .or_else(|| self.catalog.default_model())
            .unwrap_or_else(|| self.provider.default_model())
            .to_owned()
    }

    /// Start a turn
    ///
    /// Validation and authorization failures are returned before any side
    /// effect. Upstream failures surface later as one
    /// [`OutputFrame::Error`] on the returned stream.
    ///
    /// # Errors
    ///
    /// Returns a validation error for empty text, an out-of-range temperature
    /// or an unknown model; not-found or forbidden for a bad conversation id;
    /// or a database error if the conversation or user message cannot be
    /// stored.
    #[instrument(skip_all, fields(owner_id = %request.owner_id, conversation_id))]
    pub async fn handle(&self, request: TurnRequest) -> AppResult<ChatTurn> {
        if request.text.trim().is_empty() {
            return Err(AppError::invalid_input("text must not be empty"));
        }
        validate_model_and_temperature(
            self.catalog.as_ref(),
            request.model.as_deref(),
            request.temperature,
        )?;

        let (conversation, guard) = if let Some(id) = request.conversation_id.as_deref() {
            let conversation =
                load_owned_conversation(self.repository.as_ref(), id, &request.owner_id).await?;
            let guard = self.locks.acquire(&conversation.id).await;
            (conversation, guard)
        } else {
            let title = conversation_title(&request.text);
            let conversation = self
                .repository
                .create_conversation(NewConversation {
                    owner_id: &request.owner_id,
                    title: &title,
                    format: request.format.unwrap_or_default(),
                    schema: request.schema.as_deref(),
                })
                .await?;
            let guard = self.locks.acquire(&conversation.id).await;
            (conversation, guard)
        };
        tracing::Span::current().record("conversation_id", conversation.id.as_str());

        let user_message = self
            .repository
            .add_user_message(&conversation.id, &request.text)
            .await?;

        let context = self
            .context
            .assemble(
                &conversation,
                request.system_prompt.as_deref(),
                request.reference_percent,
            )
            .await?;

        let model = self.resolve_model(request.model.as_deref());
        let temperature = request
            .temperature
            .unwrap_or(self.config.default_temperature);
        let provider_request = ChatRequest::new(context.to_messages())
            .with_model(model.clone())
            .with_temperature(temperature)
            .with_sampling(self.config.sampling_for(conversation.format))
            .with_streaming();

        info!(
            model = %model,
            temperature,
            history = context.history.len(),
            "Starting chat turn"
        );

        let (tx, rx) = mpsc::channel(self.config.stream_buffer);
        let cancel = CancellationToken::new();
        let task = TurnTask {
            repository: Arc::clone(&self.repository),
            provider: Arc::clone(&self.provider),
            reconciler: self.reconciler.clone(),
            conversation_id: conversation.id.clone(),
            model: model.clone(),
            temperature,
        };
        let span = info_span!("chat_turn", conversation_id = %conversation.id);
        let completion = tokio::spawn(
            task.run(provider_request, tx, cancel.clone(), guard)
                .instrument(span),
        );

        let frames = output_frames(
            conversation.id.clone(),
            model,
            temperature,
            rx,
            cancel.drop_guard(),
        );

        Ok(ChatTurn {
            conversation_id: conversation.id,
            user_message,
            frames,
            completion,
        })
    }
}

/// Foreground side: drain the channel into ordered output frames
fn output_frames(
    conversation_id: String,
    model: String,
    temperature: f64,
    mut rx: EnvelopeReceiver,
    cancel_on_drop: DropGuard,
) -> FrameStream {
    Box::pin(async_stream::stream! {
        yield OutputFrame::ConversationId(conversation_id);

        let mut metadata: Option<GenerationMetadata> = None;
        while let Some(item) = rx.recv().await {
            match item {
                Ok(StreamEnvelope::Content { delta }) => yield OutputFrame::Content(delta),
                Ok(StreamEnvelope::Metadata(m)) => metadata = Some(m),
                Err(e) => {
                    yield OutputFrame::Error(e.message);
                    return;
                }
            }
        }
        // The reader has finished; reconciliation must not be cancelled
        let _ = cancel_on_drop.disarm();

        yield OutputFrame::Model(model);
        yield OutputFrame::Temperature(temperature);
        if let Some(metadata) = metadata.as_ref() {
            yield OutputFrame::Usage(UsageReport::from(metadata));
        }
        yield OutputFrame::Done;
    })
}

enum PumpOutcome {
    /// Upstream failed; nothing is persisted
    Failed,
    /// Upstream ended or the client went away
    Finished {
        text: String,
        metadata: Option<GenerationMetadata>,
        cancelled: bool,
    },
}

/// Background side of a turn
struct TurnTask {
    repository: Arc<dyn ChatRepository>,
    provider: Arc<dyn LlmProvider>,
    reconciler: CostReconciler,
    conversation_id: String,
    model: String,
    temperature: f64,
}

impl TurnTask {
    async fn run(
        self,
        request: ChatRequest,
        tx: EnvelopeSender,
        cancel: CancellationToken,
        guard: TurnGuard,
    ) -> AppResult<Option<MessageRecord>> {
        // Held until the assistant message is stored
        let _guard = guard;

        let outcome = self.pump(&request, &tx, &cancel).await;
        drop(tx);

        let PumpOutcome::Finished {
            text,
            metadata,
            cancelled,
        } = outcome
        else {
            return Ok(None);
        };

        if cancelled && text.is_empty() {
            info!("Client disconnected before any content arrived");
            return Ok(None);
        }

        let reconciled = match metadata.as_ref().and_then(|m| m.generation_id.as_deref()) {
            Some(generation_id)
                if !cancelled && self.provider.capabilities().supports_cost_tracking() =>
            {
                self.reconciler.reconcile(generation_id).await
            }
            _ => None,
        };

        let assistant_metadata = merge_metadata(
            &self.model,
            self.temperature,
            self.provider.name(),
            metadata.as_ref(),
            reconciled.as_ref(),
        );

        let record = self
            .repository
            .add_assistant_message(&self.conversation_id, &text, &assistant_metadata)
            .await
            .map_err(|e| {
                warn!("Assistant response could not be stored: {e}");
                e
            })?;

        info!(
            message_id = %record.id,
            partial = cancelled,
            total_tokens = ?record.metadata.total_tokens,
            total_cost = ?record.metadata.total_cost,
            "Chat turn persisted"
        );
        Ok(Some(record))
    }

    async fn pump(
        &self,
        request: &ChatRequest,
        tx: &EnvelopeSender,
        cancel: &CancellationToken,
    ) -> PumpOutcome {
        let opened = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                return PumpOutcome::Finished { text: String::new(), metadata: None, cancelled: true };
            }
            opened = self.provider.complete_stream(request) => opened,
        };

        let mut stream = match opened {
            Ok(stream) => stream,
            Err(e) => {
                warn!("Provider stream could not be opened: {e}");
                // The receiver may already be gone; nothing else to do then
                let _ = tx.send(Err(e)).await;
                return PumpOutcome::Failed;
            }
        };

        let mut text = String::new();
        let mut metadata = None;
        loop {
            let next = tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    debug!(received_chars = text.len(), "Turn cancelled by client");
                    return PumpOutcome::Finished { text, metadata, cancelled: true };
                }
                next = stream.next() => next,
            };

            match next {
                None => break,
                Some(Ok(envelope)) => {
                    match &envelope {
                        StreamEnvelope::Content { delta } => text.push_str(delta),
                        StreamEnvelope::Metadata(m) => metadata = Some(m.clone()),
                    }
                    if tx.send(Ok(envelope)).await.is_err() {
                        debug!("Output stream dropped, stopping reader");
                        return PumpOutcome::Finished {
                            text,
                            metadata,
                            cancelled: true,
                        };
                    }
                }
                Some(Err(e)) => {
                    warn!("Provider stream failed mid-turn: {e}");
                    let _ = tx.send(Err(e)).await;
                    return PumpOutcome::Failed;
                }
            }
        }

        PumpOutcome::Finished {
            text,
            metadata,
            cancelled: false,
        }
    }
}

/// Combine the resolved model, sampling and whatever usage data is available
///
/// Reconciled billing data wins. Without it only the inline token counts are
/// kept: inline cost and timing are not persisted.
#[must_use]
pub fn merge_metadata(
    model: &str,
    temperature: f64,
    provider: &str,
    inline: Option<&GenerationMetadata>,
    reconciled: Option<&GenerationCost>,
) -> AssistantMetadata {
    let inline_usage = inline.and_then(|m| m.usage);
    let mut metadata = AssistantMetadata {
        model: Some(model.to_owned()),
        temperature: Some(temperature),
        provider: Some(provider.to_owned()),
        prompt_tokens: inline_usage.map(|u| i64::from(u.prompt_tokens)),
        completion_tokens: inline_usage.map(|u| i64::from(u.completion_tokens)),
        total_tokens: inline_usage.map(|u| i64::from(u.total_tokens)),
        ..AssistantMetadata::default()
    };

    if let Some(cost) = reconciled {
        if let Some(prompt) = cost.prompt_tokens {
            metadata.prompt_tokens = Some(i64::from(prompt));
        }
        if let Some(completion) = cost.completion_tokens {
            metadata.completion_tokens = Some(i64::from(completion));
        }
        if let (Some(prompt), Some(completion)) = (cost.prompt_tokens, cost.completion_tokens) {
            metadata.total_tokens = Some(i64::from(prompt) + i64::from(completion));
        }
        metadata.total_cost = cost.total_cost;
        metadata.latency_ms = cost.latency_ms;
        metadata.generation_time_ms = cost.generation_time_ms;
    }
    metadata
}
