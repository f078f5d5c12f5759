// ABOUTME: Generic OpenAI-compatible LLM provider for local and cloud endpoints
// ABOUTME: Supports Ollama, vLLM, LocalAI and Groq; usage-only metadata, no cost lookup
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Colloquy Contributors

//! # `OpenAI`-Compatible Provider
//!
//! Generic implementation for any `OpenAI`-compatible chat completion endpoint.
//! These backends never expose a cost-trackable generation id, so the terminal
//! metadata of a streamed turn carries token usage only, usually reported in a
//! final content-less frame.
//!
//! ## Configuration
//!
//! - `LOCAL_LLM_BASE_URL`: Base URL (default: <http://localhost:11434/v1> for Ollama)
//! - `LOCAL_LLM_MODEL`: Model to use (default: `qwen2.5:14b-instruct`)
//! - `LOCAL_LLM_API_KEY`: API key (optional, empty for local servers)
//! - `GROQ_API_KEY`: API key for the Groq preset
//!
//! ## Supported Backends
//!
//! - **Ollama**: <http://localhost:11434/v1>
//! - **vLLM**: <http://localhost:8000/v1>
//! - **`LocalAI`**: <http://localhost:8080/v1>
//! - **Groq**: <https://api.groq.com/openai/v1>

use async_trait::async_trait;
use reqwest::Client;
use std::env;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

use super::sse_parser::create_sse_stream;
use super::wire::{self, CompletionRequest, CompletionResponse, StreamOptions};
use super::{
    ChatRequest, ChatResponse, ChatStream, CostLookupError, GenerationCost, LlmCapabilities,
    LlmProvider,
};
use crate::errors::AppError;

// ============================================================================
// Configuration Constants
// ============================================================================

/// Environment variable for local LLM base URL
const LOCAL_LLM_BASE_URL_ENV: &str = "LOCAL_LLM_BASE_URL";

/// Environment variable for local LLM model
const LOCAL_LLM_MODEL_ENV: &str = "LOCAL_LLM_MODEL";

/// Environment variable for local LLM API key (optional)
const LOCAL_LLM_API_KEY_ENV: &str = "LOCAL_LLM_API_KEY";

/// Environment variable for the Groq API key
const GROQ_API_KEY_ENV: &str = "GROQ_API_KEY";

/// Default base URL (Ollama)
const DEFAULT_BASE_URL: &str = "http://localhost:11434/v1";

/// Default model for local inference
const DEFAULT_MODEL: &str = "qwen2.5:14b-instruct";

/// Groq endpoint
const GROQ_BASE_URL: &str = "https://api.groq.com/openai/v1";

/// Default Groq model
const GROQ_DEFAULT_MODEL: &str = "llama-3.3-70b-versatile";

/// Connection timeout for local servers (more lenient than cloud)
const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Request timeout (local inference can be slower)
const REQUEST_TIMEOUT_SECS: u64 = 300;

// ============================================================================
// Provider Configuration
// ============================================================================

/// Configuration for the `OpenAI`-compatible provider
#[derive(Debug, Clone)]
pub struct OpenAiCompatibleConfig {
    /// Base URL for the API (e.g., <http://localhost:11434/v1>)
    pub base_url: String,
    /// API key (optional for local servers)
    pub api_key: Option<String>,
    /// Default model to use
    pub default_model: String,
    /// Provider tag persisted on assistant messages
    pub provider_name: &'static str,
    /// Provider display name
    pub display_name: &'static str,
    /// Capabilities of this provider
    pub capabilities: LlmCapabilities,
    /// Whether the backend accepts the non-standard `top_k` field
    pub supports_top_k: bool,
}

impl OpenAiCompatibleConfig {
    /// Create configuration for a local Ollama instance
    #[must_use]
    pub fn ollama(model: &str) -> Self {
        Self {
            base_url: "http://localhost:11434/v1".to_owned(),
            api_key: None,
            default_model: model.to_owned(),
            provider_name: "ollama",
            display_name: "Ollama (Local)",
            capabilities: LlmCapabilities::text_only() | LlmCapabilities::USAGE_REPORTING,
            supports_top_k: true,
        }
    }

    /// Create configuration for a local vLLM instance
    #[must_use]
    pub fn vllm(model: &str) -> Self {
        Self {
            base_url: "http://localhost:8000/v1".to_owned(),
            api_key: None,
            default_model: model.to_owned(),
            provider_name: "vllm",
            display_name: "vLLM (Local)",
            capabilities: LlmCapabilities::text_only()
                | LlmCapabilities::JSON_MODE
                | LlmCapabilities::USAGE_REPORTING,
            supports_top_k: true,
        }
    }

    /// Create configuration for `LocalAI`
    #[must_use]
    pub fn local_ai(model: &str) -> Self {
        Self {
            base_url: "http://localhost:8080/v1".to_owned(),
            api_key: None,
            default_model: model.to_owned(),
            provider_name: "localai",
            display_name: "LocalAI",
            capabilities: LlmCapabilities::text_only(),
            supports_top_k: true,
        }
    }

    /// Create configuration for Groq's hosted endpoint
    #[must_use]
    pub fn groq(api_key: String, model: &str) -> Self {
        Self {
            base_url: GROQ_BASE_URL.to_owned(),
            api_key: Some(api_key),
            default_model: model.to_owned(),
            provider_name: "groq",
            display_name: "Groq",
            capabilities: LlmCapabilities::text_only()
                | LlmCapabilities::JSON_MODE
                | LlmCapabilities::USAGE_REPORTING,
            supports_top_k: false,
        }
    }
}

impl Default for OpenAiCompatibleConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_owned(),
            api_key: None,
            default_model: DEFAULT_MODEL.to_owned(),
            provider_name: "local",
            display_name: "Local LLM",
            capabilities: LlmCapabilities::text_only() | LlmCapabilities::USAGE_REPORTING,
            supports_top_k: true,
        }
    }
}

// ============================================================================
// Provider Implementation
// ============================================================================

/// Generic `OpenAI`-compatible LLM provider
pub struct OpenAiCompatibleProvider {
    client: Client,
    config: OpenAiCompatibleConfig,
}

impl OpenAiCompatibleProvider {
    /// Create a new provider with the given configuration
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(config: OpenAiCompatibleConfig) -> Result<Self, AppError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| AppError::internal(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self { client, config })
    }

    /// Create a local provider from environment variables
    ///
    /// The provider tag is inferred from the port of `LOCAL_LLM_BASE_URL`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn from_env() -> Result<Self, AppError> {
        let base_url =
            env::var(LOCAL_LLM_BASE_URL_ENV).unwrap_or_else(|_| DEFAULT_BASE_URL.to_owned());
        let default_model =
            env::var(LOCAL_LLM_MODEL_ENV).unwrap_or_else(|_| DEFAULT_MODEL.to_owned());
        let api_key = env::var(LOCAL_LLM_API_KEY_ENV)
            .ok()
            .filter(|k| !k.is_empty());

        let preset = if base_url.contains(":8000") {
            OpenAiCompatibleConfig::vllm(&default_model)
        } else if base_url.contains(":8080") {
            OpenAiCompatibleConfig::local_ai(&default_model)
        } else if base_url.contains(":11434") {
            OpenAiCompatibleConfig::ollama(&default_model)
        } else {
            OpenAiCompatibleConfig {
                default_model,
                ..OpenAiCompatibleConfig::default()
            }
        };

        let config = OpenAiCompatibleConfig {
            base_url,
            api_key,
            ..preset
        };

        info!(
            "Initializing {} provider: base_url={}, model={}",
            config.display_name, config.base_url, config.default_model
        );

        Self::new(config)
    }

    /// Create a Groq provider from `GROQ_API_KEY`
    ///
    /// # Errors
    ///
    /// Returns an error if the key is missing or the HTTP client cannot be created.
    pub fn groq_from_env() -> Result<Self, AppError> {
        let api_key = env::var(GROQ_API_KEY_ENV)
            .ok()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| AppError::config(format!("{GROQ_API_KEY_ENV} is not set")))?;
        let model = env::var(LOCAL_LLM_MODEL_ENV).unwrap_or_else(|_| GROQ_DEFAULT_MODEL.to_owned());

        info!("Initializing Groq provider: model={model}");
        Self::new(OpenAiCompatibleConfig::groq(api_key, &model))
    }

    /// Build the API URL for a given endpoint
    fn api_url(&self, endpoint: &str) -> String {
        format!(
            "{}/{}",
            self.config.base_url.trim_end_matches('/'),
            endpoint
        )
    }

    /// Add authorization header if API key is configured
    fn add_auth_header(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if let Some(ref api_key) = self.config.api_key {
            request.header("Authorization", format!("Bearer {api_key}"))
        } else {
            request
        }
    }

    fn build_body(&self, request: &ChatRequest, stream: bool) -> CompletionRequest {
        let model = request
            .model
            .as_deref()
            .unwrap_or(&self.config.default_model);
        let mut body =
            CompletionRequest::from_chat_request(request, model, stream, self.config.supports_top_k);
        if stream && self.config.capabilities.supports_usage_reporting() {
            body.stream_options = Some(StreamOptions {
                include_usage: true,
            });
        }
        body
    }

    async fn send(&self, body: &CompletionRequest) -> Result<reqwest::Response, AppError> {
        let http_request = self
            .client
            .post(self.api_url("chat/completions"))
            .header("Content-Type", "application/json")
            .json(body);

        self.add_auth_header(http_request)
            .send()
            .await
            .map_err(|e| {
                error!(
                    "Failed to send request to {}: {}",
                    self.config.provider_name, e
                );
                if e.is_connect() {
                    AppError::external_service(
                        self.config.display_name,
                        format!("Cannot connect. Is the server running at {}?", self.config.base_url),
                    )
                } else {
                    AppError::external_service(
                        self.config.display_name,
                        format!("Failed to connect: {e}"),
                    )
                }
            })
    }
}

#[async_trait]
impl LlmProvider for OpenAiCompatibleProvider {
    fn name(&self) -> &'static str {
        self.config.provider_name
    }

    fn display_name(&self) -> &'static str {
        self.config.display_name
    }

    fn capabilities(&self) -> LlmCapabilities {
        self.config.capabilities
    }

    fn default_model(&self) -> &str {
        &self.config.default_model
    }

    #[instrument(skip(self, request), fields(provider = self.config.provider_name, model = %request.model.as_deref().unwrap_or(&self.config.default_model)))]
    async fn complete(&self, request: &ChatRequest) -> Result<ChatResponse, AppError> {
        let body = self.build_body(request, false);
        debug!("Sending chat completion with {} messages", body.messages.len());

        let response = self.send(&body).await?;
        let status = response.status();
        let text = response.text().await.map_err(|e| {
            AppError::external_service(
                self.config.display_name,
                format!("Failed to read response: {e}"),
            )
        })?;

        if !status.is_success() {
            return Err(wire::error_from_response(
                self.config.display_name,
                status.as_u16(),
                &text,
            ));
        }

        let parsed: CompletionResponse = serde_json::from_str(&text).map_err(|e| {
            error!(
                "Failed to parse API response: {} - body: {}",
                e,
                text.chars().take(500).collect::<String>()
            );
            AppError::external_service(
                self.config.display_name,
                format!("Failed to parse response: {e}"),
            )
        })?;

        // These backends' ids are not billing ids
        let mut response = wire::into_chat_response(parsed, &body.model, self.config.display_name)?;
        response.generation_id = None;
        Ok(response)
    }

    #[instrument(skip(self, request), fields(provider = self.config.provider_name, model = %request.model.as_deref().unwrap_or(&self.config.default_model)))]
    async fn complete_stream(&self, request: &ChatRequest) -> Result<ChatStream, AppError> {
        let body = self.build_body(request, true);
        debug!("Sending streaming chat completion with {} messages", body.messages.len());

        let response = self.send(&body).await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(wire::error_from_response(
                self.config.display_name,
                status.as_u16(),
                &text,
            ));
        }

        let provider_name = self.config.provider_name;
        Ok(create_sse_stream(
            response.bytes_stream(),
            move |json_str| {
                wire::parse_stream_frame(json_str, provider_name).map(|mut frame| {
                    frame.generation_id = None;
                    frame
                })
            },
            provider_name,
        ))
    }

    async fn fetch_cost(&self, _generation_id: &str) -> Result<GenerationCost, CostLookupError> {
        Err(CostLookupError::Unsupported)
    }

    #[instrument(skip(self))]
    async fn health_check(&self) -> Result<bool, AppError> {
        debug!(
            "Performing {} health check at {}",
            self.config.provider_name, self.config.base_url
        );

        let http_request = self.client.get(self.api_url("models"));
        let response = self
            .add_auth_header(http_request)
            .send()
            .await
            .map_err(|e| {
                error!("{} health check failed: {}", self.config.provider_name, e);
                AppError::external_service(
                    self.config.display_name,
                    format!("Health check failed: {e}"),
                )
            })?;

        let healthy = response.status().is_success();
        if !healthy {
            warn!(
                "{} health check failed with status: {}",
                self.config.provider_name,
                response.status()
            );
        }
        Ok(healthy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_groq_preset_drops_top_k() {
        let config = OpenAiCompatibleConfig::groq("key".to_owned(), GROQ_DEFAULT_MODEL);
        assert!(!config.supports_top_k);
        assert!(!config.capabilities.supports_cost_tracking());
        assert_eq!(config.provider_name, "groq");
    }

    #[test]
    fn test_presets_never_track_cost() {
        for config in [
            OpenAiCompatibleConfig::ollama("m"),
            OpenAiCompatibleConfig::vllm("m"),
            OpenAiCompatibleConfig::local_ai("m"),
            OpenAiCompatibleConfig::default(),
        ] {
            assert!(!config.capabilities.supports_cost_tracking());
            assert!(config.capabilities.supports_streaming());
        }
    }
}
