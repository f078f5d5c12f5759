// ABOUTME: Route module organization for the Colloquy HTTP endpoints
// ABOUTME: Caller identity extraction plus chat and health route groups
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Colloquy Contributors

//! HTTP routes
//!
//! Handlers are thin: they extract the caller, translate JSON bodies into
//! engine requests and delegate to [`crate::chat`].

/// Chat conversation, streaming and summary routes
pub mod chat;
/// Health check route
pub mod health;

pub use chat::ChatRoutes;
pub use health::HealthRoutes;

use async_trait::async_trait;
use axum::extract::FromRequestParts;
use http::request::Parts;

use crate::errors::AppError;

/// Header carrying the identity authenticated by the boundary layer
pub const USER_ID_HEADER: &str = "x-user-id";

/// Caller identity forwarded by the authenticating proxy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedUser {
    /// Opaque user id
    pub user_id: String,
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthenticatedUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_id = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .ok_or_else(AppError::auth_required)?;

        Ok(Self {
            user_id: user_id.to_owned(),
        })
    }
}
