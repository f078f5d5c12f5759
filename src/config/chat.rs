// ABOUTME: Immutable chat engine configuration built once at startup
// ABOUTME: Prompts, default temperature, per-format sampling, cost lookup backoff and reference corpus
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Colloquy Contributors

//! # Chat Engine Configuration
//!
//! [`ChatConfig`] is constructed once (usually via [`ChatConfig::from_env`]) and
//! shared as `Arc<ChatConfig>` by every engine component. Nothing reads the
//! environment after startup.
//!
//! | Variable | Default |
//! |---|---|
//! | `COLLOQUY_SYSTEM_PROMPT_FILE` | built-in prompt |
//! | `COLLOQUY_DEFAULT_TEMPERATURE` | `0.7` |
//! | `COLLOQUY_TEXT_TOP_P` / `COLLOQUY_TEXT_TOP_K` | `0.9` / `40` |
//! | `COLLOQUY_STRUCTURED_TOP_P` / `COLLOQUY_STRUCTURED_TOP_K` | `0.1` / `1` |
//! | `COLLOQUY_COST_LOOKUP_ATTEMPTS` | `3` |
//! | `COLLOQUY_COST_LOOKUP_DELAY_MS` | `500` |
//! | `COLLOQUY_COST_LOOKUP_DEADLINE_MS` | `5000` |
//! | `COLLOQUY_REFERENCE_CORPUS` | none |
//! | `COLLOQUY_STREAM_BUFFER` | `64` |
//! | `COLLOQUY_SERIALIZE_TURNS` | `true` |

use std::env;
use std::fs;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use tracing::{info, warn};

use crate::errors::{AppError, AppResult};
use crate::llm::prompts::{DEFAULT_SYSTEM_PROMPT, SUMMARIZATION_PROMPT};
use crate::llm::{RetryConfig, SamplingParams};
use crate::models::ResponseFormat;

const SYSTEM_PROMPT_FILE_ENV: &str = "COLLOQUY_SYSTEM_PROMPT_FILE";
const DEFAULT_TEMPERATURE_ENV: &str = "COLLOQUY_DEFAULT_TEMPERATURE";
const TEXT_TOP_P_ENV: &str = "COLLOQUY_TEXT_TOP_P";
const TEXT_TOP_K_ENV: &str = "COLLOQUY_TEXT_TOP_K";
const STRUCTURED_TOP_P_ENV: &str = "COLLOQUY_STRUCTURED_TOP_P";
const STRUCTURED_TOP_K_ENV: &str = "COLLOQUY_STRUCTURED_TOP_K";
const COST_LOOKUP_ATTEMPTS_ENV: &str = "COLLOQUY_COST_LOOKUP_ATTEMPTS";
const COST_LOOKUP_DELAY_ENV: &str = "COLLOQUY_COST_LOOKUP_DELAY_MS";
const COST_LOOKUP_DEADLINE_ENV: &str = "COLLOQUY_COST_LOOKUP_DEADLINE_MS";
const REFERENCE_CORPUS_ENV: &str = "COLLOQUY_REFERENCE_CORPUS";
const STREAM_BUFFER_ENV: &str = "COLLOQUY_STREAM_BUFFER";
const SERIALIZE_TURNS_ENV: &str = "COLLOQUY_SERIALIZE_TURNS";

/// Default sampling temperature when a turn does not specify one
pub const DEFAULT_TEMPERATURE: f64 = 0.7;

/// Allowed temperature range, inclusive
pub const TEMPERATURE_RANGE: (f64, f64) = (0.0, 2.0);

/// Sampling for free-form text
pub const TEXT_SAMPLING: SamplingParams = SamplingParams {
    top_p: 0.9,
    top_k: 40,
};

/// Near-greedy sampling for `json`/`xml` output
pub const STRUCTURED_SAMPLING: SamplingParams = SamplingParams {
    top_p: 0.1,
    top_k: 1,
};

/// Channel capacity between the provider reader task and the output stream
pub const DEFAULT_STREAM_BUFFER: usize = 64;

/// Immutable chat engine configuration
#[derive(Debug, Clone)]
pub struct ChatConfig {
    /// Conversational system prompt
    pub default_system_prompt: String,
    /// Summarization-only directive
    pub summarization_prompt: String,
    /// Temperature applied when a turn omits one
    pub default_temperature: f64,
    /// Sampling for `text` conversations
    pub text_sampling: SamplingParams,
    /// Sampling for `json`/`xml` conversations
    pub structured_sampling: SamplingParams,
    /// Backoff for post-stream cost lookups
    pub cost_lookup: RetryConfig,
    /// Reference corpus, loaded once and shared read-only
    pub reference_corpus: Arc<str>,
    /// Capacity of the per-turn frame channel
    pub stream_buffer: usize,
    /// Serialize turns and summaries per conversation
    pub serialize_turns: bool,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            default_system_prompt: DEFAULT_SYSTEM_PROMPT.to_owned(),
            summarization_prompt: SUMMARIZATION_PROMPT.to_owned(),
            default_temperature: DEFAULT_TEMPERATURE,
            text_sampling: TEXT_SAMPLING,
            structured_sampling: STRUCTURED_SAMPLING,
            cost_lookup: RetryConfig::default_config(),
            reference_corpus: Arc::from(""),
            stream_buffer: DEFAULT_STREAM_BUFFER,
            serialize_turns: true,
        }
    }
}

impl ChatConfig {
    /// Build configuration from environment variables
    ///
    /// # Errors
    ///
    /// Returns a config error if a numeric variable does not parse, the default
    /// temperature is out of range, or a referenced file cannot be read.
    pub fn from_env() -> AppResult<Self> {
        let defaults = Self::default();

        let default_system_prompt = match env::var(SYSTEM_PROMPT_FILE_ENV) {
            Ok(path) if !path.is_empty() => read_file(SYSTEM_PROMPT_FILE_ENV, &path)?,
            _ => defaults.default_system_prompt,
        };

        let default_temperature = parse_env(DEFAULT_TEMPERATURE_ENV, DEFAULT_TEMPERATURE)?;
        if !(TEMPERATURE_RANGE.0..=TEMPERATURE_RANGE.1).contains(&default_temperature) {
            return Err(AppError::config(format!(
                "{DEFAULT_TEMPERATURE_ENV} must be between {} and {}",
                TEMPERATURE_RANGE.0, TEMPERATURE_RANGE.1
            )));
        }

        let text_sampling = SamplingParams {
            top_p: parse_env(TEXT_TOP_P_ENV, TEXT_SAMPLING.top_p)?,
            top_k: parse_env(TEXT_TOP_K_ENV, TEXT_SAMPLING.top_k)?,
        };
        let structured_sampling = SamplingParams {
            top_p: parse_env(STRUCTURED_TOP_P_ENV, STRUCTURED_SAMPLING.top_p)?,
            top_k: parse_env(STRUCTURED_TOP_K_ENV, STRUCTURED_SAMPLING.top_k)?,
        };

        let cost_lookup = RetryConfig {
            max_attempts: parse_env(COST_LOOKUP_ATTEMPTS_ENV, defaults.cost_lookup.max_attempts)?,
            initial_delay_ms: parse_env(
                COST_LOOKUP_DELAY_ENV,
                defaults.cost_lookup.initial_delay_ms,
            )?,
            deadline_ms: parse_env(COST_LOOKUP_DEADLINE_ENV, defaults.cost_lookup.deadline_ms)?,
        };

        let reference_corpus = match env::var(REFERENCE_CORPUS_ENV) {
            Ok(path) if !path.is_empty() => {
                let corpus = read_file(REFERENCE_CORPUS_ENV, &path)?;
                info!(
                    path = %path,
                    chars = corpus.chars().count(),
                    "Loaded reference corpus"
                );
                Arc::from(corpus)
            }
            _ => defaults.reference_corpus,
        };

        Ok(Self {
            default_system_prompt,
            summarization_prompt: defaults.summarization_prompt,
            default_temperature,
            text_sampling,
            structured_sampling,
            cost_lookup,
            reference_corpus,
            stream_buffer: parse_env(STREAM_BUFFER_ENV, DEFAULT_STREAM_BUFFER)?.max(1),
            serialize_turns: parse_env(SERIALIZE_TURNS_ENV, true)?,
        })
    }

    /// Sampling parameters selected by response format
    #[must_use]
    pub const fn sampling_for(&self, format: ResponseFormat) -> SamplingParams {
        if format.is_structured() {
            self.structured_sampling
        } else {
            self.text_sampling
        }
    }

    /// Replace the reference corpus
    #[must_use]
    pub fn with_reference_corpus(mut self, corpus: impl Into<Arc<str>>) -> Self {
        self.reference_corpus = corpus.into();
        self
    }
}

fn parse_env<T: FromStr>(name: &str, default: T) -> AppResult<T> {
    match env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => raw.trim().parse().map_err(|_| {
            AppError::config(format!("{name} has an invalid value: {raw}"))
        }),
        _ => Ok(default),
    }
}

fn read_file(var: &str, path: &str) -> AppResult<String> {
    let path = PathBuf::from(path);
    fs::read_to_string(&path).map_err(|e| {
        warn!("Failed to read {} from {}: {e}", var, path.display());
        AppError::config(format!("{var}: cannot read {}: {e}", path.display())).with_source(e)
    })
}
