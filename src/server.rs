// ABOUTME: Shared server resources and HTTP router assembly
// ABOUTME: Builds the chat engine once at startup and serves it over axum with graceful shutdown
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Colloquy Contributors

//! # Server Resources
//!
//! Centralized container for the collaborators every handler needs. Built once
//! at startup and shared behind an `Arc`.

use std::future::Future;
use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::chat::{ChatOrchestrator, SummarizationEngine, TurnLocks};
use crate::config::ServerConfig;
use crate::database::ChatRepository;
use crate::errors::{AppError, AppResult};
use crate::llm::LlmProvider;
use crate::models::ModelCatalog;
use crate::routes::{ChatRoutes, HealthRoutes};

/// Shared resources handed to every route group
#[derive(Clone)]
pub struct ServerResources {
    pub config: Arc<ServerConfig>,
    pub repository: Arc<dyn ChatRepository>,
    pub provider: Arc<dyn LlmProvider>,
    pub catalog: Arc<dyn ModelCatalog>,
    pub orchestrator: Arc<ChatOrchestrator>,
    pub summarizer: Arc<SummarizationEngine>,
}

impl ServerResources {
    /// Wire the chat engine from configuration and its collaborators
    pub fn new(
        config: ServerConfig,
        repository: Arc<dyn ChatRepository>,
        provider: Arc<dyn LlmProvider>,
        catalog: Arc<dyn ModelCatalog>,
    ) -> Self {
        let chat = Arc::new(config.chat.clone());
        let locks = TurnLocks::new(chat.serialize_turns);

        let orchestrator = ChatOrchestrator::new(
            Arc::clone(&chat),
            Arc::clone(&repository),
            Arc::clone(&provider),
            Arc::clone(&catalog),
            locks.clone(),
        );
        let summarizer = SummarizationEngine::new(
            chat,
            Arc::clone(&repository),
            Arc::clone(&provider),
            Arc::clone(&catalog),
            locks,
        );

        Self {
            config: Arc::new(config),
            repository,
            provider,
            catalog,
            orchestrator: Arc::new(orchestrator),
            summarizer: Arc::new(summarizer),
        }
    }
}

/// Assemble every route group behind request tracing
pub fn router(resources: Arc<ServerResources>) -> Router {
    Router::new()
        .merge(ChatRoutes::routes(Arc::clone(&resources)))
        .merge(HealthRoutes::routes(resources))
        .layer(TraceLayer::new_for_http())
}

/// Bind the configured port and serve until `shutdown` resolves
///
/// # Errors
///
/// Returns an internal error if the port cannot be bound or the server fails.
pub async fn serve(
    resources: Arc<ServerResources>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> AppResult<()> {
    let port = resources.config.http_port;
    let listener = TcpListener::bind(("0.0.0.0", port))
        .await
        .map_err(|e| AppError::internal(format!("Failed to bind port {port}: {e}")))?;

    info!(
        port,
        provider = resources.provider.display_name(),
        models = resources.catalog.models().len(),
        "Colloquy listening"
    );

    axum::serve(listener, router(resources))
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| AppError::internal(format!("HTTP server error: {e}")))
}
