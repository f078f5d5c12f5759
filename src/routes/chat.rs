// ABOUTME: Chat route handlers for streamed turns, summaries and conversation reads
// ABOUTME: Translates JSON bodies into engine requests and relays outbound frames as SSE events
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Colloquy Contributors

//! Chat routes
//!
//! All handlers require the caller identity forwarded in the `x-user-id`
//! header. The streaming endpoint emits one SSE event per outbound frame; the
//! event data is the frame's line (`[CONVERSATION_ID]...`, content, `[DONE]`).

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use futures_util::stream::Stream;
use serde::Deserialize;
use tokio_stream::StreamExt;
use tracing::info;

use super::AuthenticatedUser;
use crate::chat::{load_owned_conversation, SummarizeRequest, TurnRequest};
use crate::errors::AppError;
use crate::models::ResponseFormat;
use crate::server::ServerResources;

// ============================================================================
// Request Types
// ============================================================================

/// Body of `POST /api/chat/stream`
#[derive(Debug, Deserialize)]
pub struct StreamChatRequest {
    /// User message text
    pub text: String,
    /// Existing conversation to continue
    #[serde(default)]
    pub conversation_id: Option<String>,
    /// Addendum to the default system prompt
    #[serde(default)]
    pub system_prompt: Option<String>,
    /// `text`, `json` or `xml`; only honoured for new conversations
    #[serde(default)]
    pub format: Option<String>,
    /// Schema for structured formats
    #[serde(default)]
    pub schema: Option<String>,
    /// Model id from the catalog
    #[serde(default)]
    pub model: Option<String>,
    /// Sampling temperature
    #[serde(default)]
    pub temperature: Option<f64>,
    /// Share of the reference corpus to inject (1-100)
    #[serde(default)]
    pub reference_percent: Option<i64>,
}

impl StreamChatRequest {
    fn into_turn(self, owner_id: String) -> Result<TurnRequest, AppError> {
        let format = self
            .format
            .as_deref()
            .map(str::parse::<ResponseFormat>)
            .transpose()?;
        Ok(TurnRequest {
            owner_id,
            text: self.text,
            conversation_id: self.conversation_id,
            system_prompt: self.system_prompt,
            format,
            schema: self.schema,
            model: self.model,
            temperature: self.temperature,
            reference_percent: self.reference_percent,
        })
    }
}

/// Body of `POST /api/chat/conversations/:id/summarize`
#[derive(Debug, Default, Deserialize)]
pub struct SummarizeBody {
    /// Model id from the catalog
    #[serde(default)]
    pub model: Option<String>,
    /// Sampling temperature
    #[serde(default)]
    pub temperature: Option<f64>,
}

// ============================================================================
// Chat Routes
// ============================================================================

/// Chat routes handler
pub struct ChatRoutes;

impl ChatRoutes {
    /// Create all chat routes
    pub fn routes(resources: Arc<ServerResources>) -> Router {
        Router::new()
            .route("/api/chat/stream", post(Self::stream_chat))
            .route(
                "/api/chat/conversations/:conversation_id",
                get(Self::get_conversation),
            )
            .route(
                "/api/chat/conversations/:conversation_id/messages",
                get(Self::get_messages),
            )
            .route(
                "/api/chat/conversations/:conversation_id/summaries",
                get(Self::list_summaries),
            )
            .route(
                "/api/chat/conversations/:conversation_id/summarize",
                post(Self::summarize),
            )
            .with_state(resources)
    }

    /// Run one streamed turn
    async fn stream_chat(
        State(resources): State<Arc<ServerResources>>,
        user: AuthenticatedUser,
        Json(request): Json<StreamChatRequest>,
    ) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
        let turn = resources
            .orchestrator
            .handle(request.into_turn(user.user_id)?)
            .await?;

        info!(conversation_id = %turn.conversation_id, "Streaming chat turn");

        // The background task persists the reply on its own; the handle is not awaited here
        drop(turn.completion);
        let events = turn
            .frames
            .map(|frame| Ok(Event::default().data(frame.to_line())));

        Ok(Sse::new(events).keep_alive(KeepAlive::default()))
    }

    /// Summarize or return the active summary
    async fn summarize(
        State(resources): State<Arc<ServerResources>>,
        user: AuthenticatedUser,
        Path(conversation_id): Path<String>,
        body: Option<Json<SummarizeBody>>,
    ) -> Result<Response, AppError> {
        let body = body.map(|Json(b)| b).unwrap_or_default();
        let outcome = resources
            .summarizer
            .summarize(SummarizeRequest {
                conversation_id,
                owner_id: user.user_id,
                model: body.model,
                temperature: body.temperature,
            })
            .await?;

        let status = if outcome.is_new {
            StatusCode::CREATED
        } else {
            StatusCode::OK
        };
        Ok((status, Json(outcome)).into_response())
    }

    async fn get_conversation(
        State(resources): State<Arc<ServerResources>>,
        user: AuthenticatedUser,
        Path(conversation_id): Path<String>,
    ) -> Result<Response, AppError> {
        let conversation = load_owned_conversation(
            resources.repository.as_ref(),
            &conversation_id,
            &user.user_id,
        )
        .await?;
        Ok((StatusCode::OK, Json(conversation)).into_response())
    }

    async fn get_messages(
        State(resources): State<Arc<ServerResources>>,
        user: AuthenticatedUser,
        Path(conversation_id): Path<String>,
    ) -> Result<Response, AppError> {
        let conversation = load_owned_conversation(
            resources.repository.as_ref(),
            &conversation_id,
            &user.user_id,
        )
        .await?;
        let messages = resources.repository.get_messages(&conversation.id).await?;
        Ok((
            StatusCode::OK,
            Json(serde_json::json!({ "messages": messages })),
        )
            .into_response())
    }

    /// Every summary, oldest first
    async fn list_summaries(
        State(resources): State<Arc<ServerResources>>,
        user: AuthenticatedUser,
        Path(conversation_id): Path<String>,
    ) -> Result<Response, AppError> {
        let conversation = load_owned_conversation(
            resources.repository.as_ref(),
            &conversation_id,
            &user.user_id,
        )
        .await?;
        let summaries = resources
            .repository
            .list_summaries(&conversation.id)
            .await?;
        Ok((
            StatusCode::OK,
            Json(serde_json::json!({ "summaries": summaries })),
        )
            .into_response())
    }
}
