// ABOUTME: Unified LLM provider selector for runtime provider switching
// ABOUTME: Dispatches to OpenRouter or an OpenAI-compatible backend based on configuration
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Colloquy Contributors

//! # LLM Provider Selector
//!
//! Set `COLLOQUY_LLM_PROVIDER`:
//! - `openrouter` (default): `OpenRouter`, with cost reconciliation
//! - `groq`: Groq hosted inference
//! - `local`/`ollama`/`vllm`/`localai`: any `OpenAI`-compatible server

use std::fmt;

use async_trait::async_trait;
use tracing::{debug, info};

use super::{
    ChatRequest, ChatResponse, ChatStream, CostLookupError, GenerationCost, LlmCapabilities,
    LlmProvider, OpenAiCompatibleProvider, OpenRouterProvider,
};
use crate::config::LlmProviderType;
use crate::errors::AppError;

/// Unified chat provider wrapping every supported backend
pub enum ChatProvider {
    /// `OpenRouter` with generation cost lookup
    OpenRouter(OpenRouterProvider),
    /// Groq via its `OpenAI`-compatible endpoint
    Groq(OpenAiCompatibleProvider),
    /// Local `OpenAI`-compatible server (Ollama, vLLM, `LocalAI`)
    Local(OpenAiCompatibleProvider),
}

impl ChatProvider {
    /// Create a provider from environment configuration
    ///
    /// # Errors
    ///
    /// Returns an error if the selected backend's API key is missing or its
    /// HTTP client cannot be built.
    pub fn from_env() -> Result<Self, AppError> {
        let provider_type = LlmProviderType::from_env();
        info!(
            "Initializing LLM provider: {} (set {} to change)",
            provider_type,
            LlmProviderType::ENV_VAR
        );

        let provider = match provider_type {
            LlmProviderType::OpenRouter => Self::OpenRouter(OpenRouterProvider::from_env()?),
            LlmProviderType::Groq => Self::Groq(OpenAiCompatibleProvider::groq_from_env()?),
            LlmProviderType::Local => Self::Local(OpenAiCompatibleProvider::from_env()?),
        };

        debug!(
            "Provider {} initialized with model: {}",
            provider.display_name(),
            provider.default_model()
        );
        Ok(provider)
    }

    fn inner(&self) -> &dyn LlmProvider {
        match self {
            Self::OpenRouter(p) => p,
            Self::Groq(p) | Self::Local(p) => p,
        }
    }
}

impl fmt::Debug for ChatProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChatProvider")
            .field("provider", &self.name())
            .field("default_model", &self.default_model())
            .finish()
    }
}

#[async_trait]
impl LlmProvider for ChatProvider {
    fn name(&self) -> &'static str {
        self.inner().name()
    }

    fn display_name(&self) -> &'static str {
        self.inner().display_name()
    }

    fn capabilities(&self) -> LlmCapabilities {
        self.inner().capabilities()
    }

    fn default_model(&self) -> &str {
        self.inner().default_model()
    }

    async fn complete(&self, request: &ChatRequest) -> Result<ChatResponse, AppError> {
        self.inner().complete(request).await
    }

    async fn complete_stream(&self, request: &ChatRequest) -> Result<ChatStream, AppError> {
        self.inner().complete_stream(request).await
    }

    async fn fetch_cost(&self, generation_id: &str) -> Result<GenerationCost, CostLookupError> {
        self.inner().fetch_cost(generation_id).await
    }

    async fn health_check(&self) -> Result<bool, AppError> {
        self.inner().health_check().await
    }
}
