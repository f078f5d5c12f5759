// ABOUTME: Health check route reporting provider reachability and catalog size
// ABOUTME: Used by load balancers and operators to probe the chat service
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Colloquy Contributors

use std::sync::Arc;

use axum::{extract::State, routing::get, Json, Router};
use tracing::warn;

use crate::server::ServerResources;

/// Health routes implementation
pub struct HealthRoutes;

impl HealthRoutes {
    /// Create the health check route
    pub fn routes(resources: Arc<ServerResources>) -> Router {
        Router::new()
            .route("/health", get(Self::health))
            .with_state(resources)
    }

    async fn health(State(resources): State<Arc<ServerResources>>) -> Json<serde_json::Value> {
        let provider_ok = resources
            .provider
            .health_check()
            .await
            .unwrap_or_else(|e| {
                warn!("Provider health check failed: {e}");
                false
            });

        Json(serde_json::json!({
            "status": if provider_ok { "healthy" } else { "degraded" },
            "provider": resources.provider.display_name(),
            "models": resources.catalog.models().len(),
            "timestamp": chrono::Utc::now().to_rfc3339()
        }))
    }
}
