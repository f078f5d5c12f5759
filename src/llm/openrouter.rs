// ABOUTME: OpenRouter chat provider with strict parameter routing and generation cost lookup
// ABOUTME: Streams OpenAI-format SSE and resolves billing data from the generation endpoint
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Colloquy Contributors

//! # `OpenRouter` Provider
//!
//! `OpenRouter` fronts many model vendors behind one `OpenAI`-format endpoint.
//! Every request carries `provider.require_parameters = true` so the router
//! only picks backends that honour the format-selected `top_p`/`top_k`.
//!
//! Each streamed frame carries the generation id. After the stream ends the
//! id can be exchanged for billing data at `GET {base}/generation?id=<id>`,
//! which answers 404 until the record is written.
//!
//! ## Configuration
//!
//! - `OPENROUTER_API_KEY`: API key (required)
//! - `OPENROUTER_BASE_URL`: Base URL (default: <https://openrouter.ai/api/v1>)

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::env;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

use super::sse_parser::create_sse_stream;
use super::wire::{self, CompletionRequest, CompletionResponse, RoutingPreferences, UsageAccounting};
use super::{
    ChatRequest, ChatResponse, ChatStream, CostLookupError, GenerationCost, LlmCapabilities,
    LlmProvider,
};
use crate::errors::AppError;

/// Environment variable for the `OpenRouter` API key
const OPENROUTER_API_KEY_ENV: &str = "OPENROUTER_API_KEY";

/// Environment variable overriding the `OpenRouter` base URL
const OPENROUTER_BASE_URL_ENV: &str = "OPENROUTER_BASE_URL";

/// Default API base
const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";

/// Default model when neither the request nor the catalog names one
const DEFAULT_MODEL: &str = "openai/gpt-4o-mini";

const PROVIDER_NAME: &str = "openrouter";
const DISPLAY_NAME: &str = "OpenRouter";

const CONNECT_TIMEOUT_SECS: u64 = 10;
const REQUEST_TIMEOUT_SECS: u64 = 120;
const COST_LOOKUP_TIMEOUT_SECS: u64 = 10;

/// Configuration for the `OpenRouter` provider
#[derive(Debug, Clone)]
pub struct OpenRouterConfig {
    /// API base URL
    pub base_url: String,
    /// Bearer API key
    pub api_key: String,
    /// Default model
    pub default_model: String,
}

impl OpenRouterConfig {
    /// Build configuration from environment variables
    ///
    /// # Errors
    ///
    /// Returns a config error when `OPENROUTER_API_KEY` is missing.
    pub fn from_env() -> Result<Self, AppError> {
        let api_key = env::var(OPENROUTER_API_KEY_ENV)
            .ok()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| AppError::config(format!("{OPENROUTER_API_KEY_ENV} is not set")))?;
        let base_url =
            env::var(OPENROUTER_BASE_URL_ENV).unwrap_or_else(|_| DEFAULT_BASE_URL.to_owned());

        Ok(Self {
            base_url,
            api_key,
            default_model: DEFAULT_MODEL.to_owned(),
        })
    }
}

/// Billing record returned by the generation endpoint
#[derive(Debug, Deserialize)]
struct GenerationEnvelope {
    data: GenerationData,
}

#[derive(Debug, Deserialize)]
struct GenerationData {
    #[serde(default)]
    total_cost: Option<f64>,
    #[serde(default)]
    tokens_prompt: Option<u32>,
    #[serde(default)]
    tokens_completion: Option<u32>,
    #[serde(default)]
    latency: Option<f64>,
    #[serde(default)]
    generation_time: Option<f64>,
}

impl From<GenerationData> for GenerationCost {
    #[allow(clippy::cast_possible_truncation)]
    fn from(data: GenerationData) -> Self {
        Self {
            total_cost: data.total_cost,
            prompt_tokens: data.tokens_prompt,
            completion_tokens: data.tokens_completion,
            latency_ms: data.latency.map(|ms| ms.round() as i64),
            generation_time_ms: data.generation_time.map(|ms| ms.round() as i64),
        }
    }
}

/// `OpenRouter` chat provider
pub struct OpenRouterProvider {
    client: Client,
    config: OpenRouterConfig,
}

impl OpenRouterProvider {
    /// Create a provider with the given configuration
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(config: OpenRouterConfig) -> Result<Self, AppError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| AppError::internal(format!("Failed to create HTTP client: {e}")))?;

        info!(
            "Initializing {DISPLAY_NAME} provider: base_url={}, model={}",
            config.base_url, config.default_model
        );
        Ok(Self { client, config })
    }

    /// Create a provider from environment variables
    ///
    /// # Errors
    ///
    /// Returns an error if the API key is missing or the client cannot be built.
    pub fn from_env() -> Result<Self, AppError> {
        Self::new(OpenRouterConfig::from_env()?)
    }

    /// Override the default model
    #[must_use]
    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        self.config.default_model = model.into();
        self
    }

    fn api_url(&self, endpoint: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), endpoint)
    }

    fn build_body(&self, request: &ChatRequest, stream: bool) -> CompletionRequest {
        let model = request
            .model
            .as_deref()
            .unwrap_or(&self.config.default_model);
        let mut body = CompletionRequest::from_chat_request(request, model, stream, true);
        body.provider = Some(RoutingPreferences {
            require_parameters: true,
        });
        body.usage = Some(UsageAccounting { include: true });
        body
    }

    async fn send(&self, body: &CompletionRequest) -> Result<reqwest::Response, AppError> {
        self.client
            .post(self.api_url("chat/completions"))
            .bearer_auth(&self.config.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                error!("Failed to send request to {DISPLAY_NAME}: {e}");
                AppError::external_service(DISPLAY_NAME, format!("Failed to connect: {e}"))
            })
    }
}

#[async_trait]
impl LlmProvider for OpenRouterProvider {
    fn name(&self) -> &'static str {
        PROVIDER_NAME
    }

    fn display_name(&self) -> &'static str {
        DISPLAY_NAME
    }

    fn capabilities(&self) -> LlmCapabilities {
        LlmCapabilities::text_only()
            | LlmCapabilities::JSON_MODE
            | LlmCapabilities::COST_TRACKING
            | LlmCapabilities::USAGE_REPORTING
    }

    fn default_model(&self) -> &str {
        &self.config.default_model
    }

    #[instrument(skip(self, request), fields(model = %request.model.as_deref().unwrap_or(&self.config.default_model)))]
    async fn complete(&self, request: &ChatRequest) -> Result<ChatResponse, AppError> {
        let body = self.build_body(request, false);
        debug!("Sending chat completion with {} messages", body.messages.len());

        let response = self.send(&body).await?;
        let status = response.status();
        let text = response.text().await.map_err(|e| {
            AppError::external_service(DISPLAY_NAME, format!("Failed to read response: {e}"))
        })?;
        if !status.is_success() {
            return Err(wire::error_from_response(DISPLAY_NAME, status.as_u16(), &text));
        }

        let parsed: CompletionResponse = serde_json::from_str(&text).map_err(|e| {
            AppError::external_service(DISPLAY_NAME, format!("Failed to parse response: {e}"))
        })?;
        wire::into_chat_response(parsed, &body.model, DISPLAY_NAME)
    }

    #[instrument(skip(self, request), fields(model = %request.model.as_deref().unwrap_or(&self.config.default_model)))]
    async fn complete_stream(&self, request: &ChatRequest) -> Result<ChatStream, AppError> {
        let body = self.build_body(request, true);
        debug!(
            "Sending streaming chat completion with {} messages",
            body.messages.len()
        );

        let response = self.send(&body).await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(wire::error_from_response(DISPLAY_NAME, status.as_u16(), &text));
        }

        Ok(create_sse_stream(
            response.bytes_stream(),
            |json_str| wire::parse_stream_frame(json_str, PROVIDER_NAME),
            DISPLAY_NAME,
        ))
    }

    #[instrument(skip(self))]
    async fn fetch_cost(&self, generation_id: &str) -> Result<GenerationCost, CostLookupError> {
        let response = self
            .client
            .get(self.api_url("generation"))
            .query(&[("id", generation_id)])
            .bearer_auth(&self.config.api_key)
            .timeout(Duration::from_secs(COST_LOOKUP_TIMEOUT_SECS))
            .send()
            .await
            .map_err(|e| CostLookupError::Transport(e.to_string()))?;

        match response.status() {
            StatusCode::NOT_FOUND => Err(CostLookupError::NotYetAvailable),
            status if !status.is_success() => Err(CostLookupError::Status(status.as_u16())),
            _ => {
                let envelope: GenerationEnvelope = response
                    .json()
                    .await
                    .map_err(|e| CostLookupError::Decode(e.to_string()))?;
                Ok(envelope.data.into())
            }
        }
    }

    #[instrument(skip(self))]
    async fn health_check(&self) -> Result<bool, AppError> {
        let response = self
            .client
            .get(self.api_url("models"))
            .bearer_auth(&self.config.api_key)
            .send()
            .await
            .map_err(|e| {
                AppError::external_service(DISPLAY_NAME, format!("Health check failed: {e}"))
            })?;

        let healthy = response.status().is_success();
        if !healthy {
            warn!(
                "{DISPLAY_NAME} health check failed with status: {}",
                response.status()
            );
        }
        Ok(healthy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{ChatMessage, SamplingParams};

    fn provider() -> OpenRouterProvider {
        OpenRouterProvider::new(OpenRouterConfig {
            base_url: "http://localhost:9/api/v1/".to_owned(),
            api_key: "test".to_owned(),
            default_model: DEFAULT_MODEL.to_owned(),
        })
        .unwrap()
    }

    #[test]
    fn test_body_carries_routing_hint_and_sampling() {
        let request = ChatRequest::new(vec![ChatMessage::user("hi")])
            .with_temperature(0.7)
            .with_sampling(SamplingParams {
                top_p: 0.1,
                top_k: 1,
            });
        let body = provider().build_body(&request, true);
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["provider"]["require_parameters"], true);
        assert_eq!(json["top_k"], 1);
        assert_eq!(json["stream"], true);
        assert_eq!(json["model"], DEFAULT_MODEL);
    }

    #[test]
    fn test_api_url_trims_slash() {
        assert_eq!(
            provider().api_url("generation"),
            "http://localhost:9/api/v1/generation"
        );
    }

    #[test]
    fn test_generation_data_conversion() {
        let data: GenerationEnvelope = serde_json::from_str(
            r#"{"data":{"total_cost":0.0012,"tokens_prompt":10,"tokens_completion":5,"latency":312.4,"generation_time":900}}"#,
        )
        .unwrap();
        let cost = GenerationCost::from(data.data);
        assert_eq!(cost.total_cost, Some(0.0012));
        assert_eq!(cost.latency_ms, Some(312));
        assert_eq!(cost.generation_time_ms, Some(900));
    }
}
