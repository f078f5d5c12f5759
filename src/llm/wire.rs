// ABOUTME: OpenAI-format chat completion wire types shared by HTTP chat backends
// ABOUTME: Request bodies, streaming frames, non-streaming responses and error bodies
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Colloquy Contributors

//! Wire types for the `chat/completions` dialect spoken by `OpenRouter`,
//! Ollama, vLLM, `LocalAI` and Groq.
//!
//! Streaming frames arrive as `data: {json}` lines. Each frame may carry any
//! combination of `choices[0].delta.content`, a top-level `usage` object (or
//! Groq's `x_groq.usage`) and an `id`.

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::{ChatMessage, ChatRequest, ChatResponse, TokenUsage};
use crate::errors::{AppError, ErrorCode};

// ============================================================================
// Request
// ============================================================================

/// Chat completion request body
#[derive(Debug, Serialize)]
pub struct CompletionRequest {
    /// Model identifier
    pub model: String,
    /// Ordered `{role, content}` messages
    pub messages: Vec<WireMessage>,
    /// Streaming flag
    pub stream: bool,
    /// Sampling temperature
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    /// Nucleus sampling
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    /// Top-k sampling
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
    /// Maximum tokens to generate
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// Routing hint asking the router to only use backends honouring every parameter
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<RoutingPreferences>,
    /// Request inline usage accounting in the final frame (`OpenRouter`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<UsageAccounting>,
    /// Request a final usage frame (`OpenAI` convention)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream_options: Option<StreamOptions>,
}

impl CompletionRequest {
    /// Build a request body from an engine request
    ///
    /// `send_top_k` is false for backends that reject the `top_k` field.
    #[must_use]
    pub fn from_chat_request(
        request: &ChatRequest,
        model: &str,
        stream: bool,
        send_top_k: bool,
    ) -> Self {
        Self {
            model: model.to_owned(),
            messages: request.messages.iter().map(WireMessage::from).collect(),
            stream,
            temperature: request.temperature,
            top_p: request.sampling.map(|s| s.top_p),
            top_k: request.sampling.filter(|_| send_top_k).map(|s| s.top_k),
            max_tokens: request.max_tokens,
            provider: None,
            usage: None,
            stream_options: None,
        }
    }
}

/// Routing preferences understood by model routers
#[derive(Debug, Clone, Serialize)]
pub struct RoutingPreferences {
    /// Only route to backends that support every request parameter
    pub require_parameters: bool,
}

/// Usage accounting toggle
#[derive(Debug, Clone, Serialize)]
pub struct UsageAccounting {
    /// Include usage in the response
    pub include: bool,
}

/// Streaming options
#[derive(Debug, Clone, Serialize)]
pub struct StreamOptions {
    /// Emit a trailing frame carrying `usage`
    pub include_usage: bool,
}

/// Message structure on the wire
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireMessage {
    /// `system`, `user` or `assistant`
    pub role: String,
    /// Message text
    pub content: String,
}

impl From<&ChatMessage> for WireMessage {
    fn from(msg: &ChatMessage) -> Self {
        Self {
            role: msg.role.as_str().to_owned(),
            content: msg.content.clone(),
        }
    }
}

// ============================================================================
// Non-streaming response
// ============================================================================

/// Non-streaming completion response
#[derive(Debug, Deserialize)]
pub struct CompletionResponse {
    /// Generation id
    #[serde(default)]
    pub id: Option<String>,
    /// Choices (only the first is used)
    pub choices: Vec<CompletionChoice>,
    /// Usage statistics
    #[serde(default)]
    pub usage: Option<WireUsage>,
    /// Model that served the request
    #[serde(default)]
    pub model: Option<String>,
}

/// Choice in a non-streaming response
#[derive(Debug, Deserialize)]
pub struct CompletionChoice {
    /// Assistant message
    pub message: CompletionMessage,
    /// Finish reason
    #[serde(default)]
    pub finish_reason: Option<String>,
}

/// Message in a non-streaming response
#[derive(Debug, Deserialize)]
pub struct CompletionMessage {
    /// Text content
    #[serde(default)]
    pub content: Option<String>,
}

/// Usage statistics on the wire
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct WireUsage {
    /// Prompt tokens
    #[serde(default)]
    pub prompt_tokens: u32,
    /// Completion tokens
    #[serde(default)]
    pub completion_tokens: u32,
    /// Total tokens (derived when absent)
    #[serde(default)]
    pub total_tokens: Option<u32>,
    /// Inline cost (`OpenRouter` usage accounting)
    #[serde(default)]
    pub cost: Option<f64>,
}

impl From<WireUsage> for TokenUsage {
    fn from(usage: WireUsage) -> Self {
        Self {
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
            total_tokens: usage
                .total_tokens
                .unwrap_or_else(|| usage.prompt_tokens.saturating_add(usage.completion_tokens)),
        }
    }
}

// ============================================================================
// Streaming frame
// ============================================================================

#[derive(Debug, Deserialize)]
struct WireStreamChunk {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    choices: Vec<WireStreamChoice>,
    #[serde(default)]
    usage: Option<WireUsage>,
    #[serde(default)]
    x_groq: Option<GroqExtension>,
}

#[derive(Debug, Deserialize)]
struct WireStreamChoice {
    #[serde(default)]
    delta: Option<WireDelta>,
}

#[derive(Debug, Deserialize)]
struct WireDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GroqExtension {
    #[serde(default)]
    usage: Option<WireUsage>,
}

/// Provider-neutral view of one decoded `data:` frame
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamFrame {
    /// Content delta, if any
    pub content: Option<String>,
    /// Generation id, if the frame carried one
    pub generation_id: Option<String>,
    /// Model reported by the frame
    pub model: Option<String>,
    /// Usage, if the frame carried it
    pub usage: Option<TokenUsage>,
    /// Inline cost, if the frame carried it
    pub total_cost: Option<f64>,
}

/// Decode one `data:` payload
///
/// Returns `None` (after logging) for payloads that are not valid frames so the
/// caller can skip them and keep reading.
#[must_use]
pub fn parse_stream_frame(json_str: &str, provider_name: &str) -> Option<StreamFrame> {
    let chunk: WireStreamChunk = match serde_json::from_str(json_str) {
        Ok(chunk) => chunk,
        Err(e) => {
            warn!(
                provider = provider_name,
                "Skipping malformed stream frame: {e} ({} bytes)",
                json_str.len()
            );
            return None;
        }
    };

    let content = chunk
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.delta)
        .and_then(|delta| delta.content)
        .filter(|c| !c.is_empty());

    let wire_usage = chunk.usage.or_else(|| chunk.x_groq.and_then(|x| x.usage));

    Some(StreamFrame {
        content,
        generation_id: chunk.id.filter(|id| !id.is_empty()),
        model: chunk.model,
        usage: wire_usage.map(TokenUsage::from),
        total_cost: wire_usage.and_then(|u| u.cost),
    })
}

// ============================================================================
// Error body
// ============================================================================

/// Error response structure
#[derive(Debug, Deserialize)]
pub struct ErrorBody {
    /// Error detail
    pub error: ErrorDetail,
}

/// Error detail structure
#[derive(Debug, Deserialize)]
pub struct ErrorDetail {
    /// Message
    pub message: String,
    /// Error type, when the backend reports one
    #[serde(rename = "type", default)]
    pub error_type: Option<String>,
}

/// Map a non-success upstream response to an [`AppError`]
///
/// `service` names the backend in the error message (e.g. `OpenRouter`).
/// Upstream 4xx statuses stay in the upstream error family so they are never
/// reported to the caller as their own authentication or lookup failures.
#[must_use]
pub fn error_from_response(service: &str, status: u16, body: &str) -> AppError {
    let Ok(parsed) = serde_json::from_str::<ErrorBody>(body) else {
        // Non-JSON bodies are common with local servers and proxies
        return match status {
            401 | 403 => AppError::external_service(service, "rejected the API key"),
            429 => AppError::new(
                ErrorCode::ExternalRateLimited,
                format!("{service} rate limit reached. Please wait a moment and try again."),
            ),
            502..=504 => AppError::new(
                ErrorCode::ExternalServiceUnavailable,
                format!("{service} is not responding (HTTP {status})"),
            ),
            _ => AppError::external_service(
                service,
                format!(
                    "API error ({status}): {}",
                    body.chars().take(200).collect::<String>()
                ),
            ),
        };
    };

    let message = parsed.error.message;
    match status {
        401 | 403 => {
            AppError::external_service(service, format!("authentication failed: {message}"))
        }
        429 => AppError::new(
            ErrorCode::ExternalRateLimited,
            format!("{service} rate limit reached: {message}"),
        ),
        400 => AppError::external_service(service, format!("rejected the request: {message}")),
        404 => AppError::external_service(
            service,
            format!("model or endpoint not found ({message})"),
        ),
        _ => {
            let error_type = parsed.error.error_type.unwrap_or_else(|| "unknown".to_owned());
            AppError::external_service(service, format!("{error_type} - {message}"))
        }
    }
}

/// Convert a decoded non-streaming body into an engine response
///
/// # Errors
///
/// Returns an error if the backend returned no choices.
pub fn into_chat_response(
    response: CompletionResponse,
    requested_model: &str,
    service: &str,
) -> Result<ChatResponse, AppError> {
    let choice = response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| AppError::external_service(service, "API returned no choices"))?;

    Ok(ChatResponse {
        content: choice.message.content.unwrap_or_default(),
        model: response.model.unwrap_or_else(|| requested_model.to_owned()),
        usage: response.usage.map(TokenUsage::from),
        generation_id: response.id,
        finish_reason: choice.finish_reason,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::SamplingParams;

    #[test]
    fn test_parse_content_frame() {
        let frame = parse_stream_frame(
            r#"{"id":"gen-1","model":"m","choices":[{"delta":{"content":"Hi"}}]}"#,
            "test",
        )
        .unwrap();
        assert_eq!(frame.content.as_deref(), Some("Hi"));
        assert_eq!(frame.generation_id.as_deref(), Some("gen-1"));
        assert!(frame.usage.is_none());
    }

    #[test]
    fn test_parse_usage_only_frame() {
        let frame = parse_stream_frame(
            r#"{"id":"gen-1","choices":[],"usage":{"prompt_tokens":7,"completion_tokens":3}}"#,
            "test",
        )
        .unwrap();
        assert!(frame.content.is_none());
        let usage = frame.usage.unwrap();
        assert_eq!(usage.prompt_tokens, 7);
        assert_eq!(usage.total_tokens, 10);
    }

    #[test]
    fn test_parse_groq_usage_extension() {
        let frame = parse_stream_frame(
            r#"{"choices":[{"delta":{}}],"x_groq":{"usage":{"prompt_tokens":2,"completion_tokens":2,"total_tokens":4}}}"#,
            "test",
        )
        .unwrap();
        assert_eq!(frame.usage.unwrap().total_tokens, 4);
    }

    #[test]
    fn test_parse_malformed_frame_is_skipped() {
        assert!(parse_stream_frame("{not json", "test").is_none());
    }

    #[test]
    fn test_error_mapping() {
        let body = r#"{"error":{"message":"bad key","type":"auth"}}"#;
        for status in [400, 401, 403, 404] {
            let error = error_from_response("OpenRouter", status, body);
            assert_eq!(error.code, ErrorCode::ExternalServiceError);
            assert!(error.message.starts_with("OpenRouter: "));
        }
        assert_eq!(
            error_from_response("Ollama", 401, "Unauthorized").code,
            ErrorCode::ExternalServiceError
        );
        assert_eq!(
            error_from_response("OpenRouter", 429, body).code,
            ErrorCode::ExternalRateLimited
        );
        assert_eq!(
            error_from_response("OpenRouter", 500, body).code,
            ErrorCode::ExternalServiceError
        );
        assert_eq!(
            error_from_response("Ollama", 503, "upstream down").code,
            ErrorCode::ExternalServiceUnavailable
        );
    }

    #[test]
    fn test_request_omits_top_k_when_unsupported() {
        let request = ChatRequest::new(vec![ChatMessage::user("hi")]).with_sampling(SamplingParams {
            top_p: 0.9,
            top_k: 40,
        });
        let body = CompletionRequest::from_chat_request(&request, "m", true, false);
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["top_p"], 0.9);
        assert!(json.get("top_k").is_none());
        assert!(json.get("provider").is_none());
        assert_eq!(json["messages"][0]["role"], "user");
    }
}
