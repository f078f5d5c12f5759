// ABOUTME: Post-stream cost reconciliation with bounded exponential backoff
// ABOUTME: Fetches eventually-consistent billing data for a generation id without failing the turn
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Colloquy Contributors

//! # Cost Reconciliation
//!
//! Billing data for a streamed generation is eventually consistent: the lookup
//! endpoint may answer 404 for a short while after the stream ends. The
//! [`CostReconciler`] retries those 404s with exponential backoff and gives up
//! quietly; callers then fall back to the inline usage seen in the stream.
//! A [`CostLookupError`] is never surfaced to the end user.
//!
//! The whole lookup, retries included, is bounded by
//! [`RetryConfig::deadline_ms`] because the next turn on the same
//! conversation waits for it.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::LlmProvider;

/// Why a cost lookup did not produce data
#[derive(Debug, Error)]
pub enum CostLookupError {
    /// The generation is not yet known to the billing endpoint (HTTP 404)
    #[error("generation cost not yet available")]
    NotYetAvailable,
    /// Any other non-success status
    #[error("cost lookup returned HTTP {0}")]
    Status(u16),
    /// Network failure talking to the billing endpoint
    #[error("cost lookup transport error: {0}")]
    Transport(String),
    /// Billing endpoint answered with an unexpected body
    #[error("cost lookup response could not be decoded: {0}")]
    Decode(String),
    /// The provider does not expose cost data
    #[error("provider does not support cost lookup")]
    Unsupported,
}

impl CostLookupError {
    /// Only a not-yet-available generation is worth asking about again
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::NotYetAvailable)
    }
}

/// Billing and timing data for one finished generation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationCost {
    /// Total cost in provider currency units
    pub total_cost: Option<f64>,
    /// Prompt tokens billed
    pub prompt_tokens: Option<u32>,
    /// Completion tokens billed
    pub completion_tokens: Option<u32>,
    /// Time to first token in milliseconds
    pub latency_ms: Option<i64>,
    /// Total generation time in milliseconds
    pub generation_time_ms: Option<i64>,
}

/// Backoff settings for cost lookups
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryConfig {
    /// Total attempts including the first one
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles each retry
    pub initial_delay_ms: u64,
    /// Upper bound for the whole lookup including backoff
    pub deadline_ms: u64,
}

impl RetryConfig {
    /// Default lookup config: 3 attempts, 500ms initial delay, 5s overall
    #[must_use]
    pub const fn default_config() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 500,
            deadline_ms: 5_000,
        }
    }

    /// Decide what follows a failed attempt number `attempt` (zero-based)
    fn after_failure(&self, error: &CostLookupError, attempt: u32) -> RetryStep {
        if !error.is_retryable() {
            return RetryStep::Stop;
        }
        if attempt + 1 >= self.max_attempts.max(1) {
            return RetryStep::Exhausted;
        }
        RetryStep::Retry(self.delay_for_attempt(attempt))
    }

    /// Delay to wait after failed attempt number `attempt` (zero-based)
    ///
    /// `delay = initial_ms * 2^attempt`
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 1_u64.checked_shl(attempt).unwrap_or(u64::MAX);
        Duration::from_millis(self.initial_delay_ms.saturating_mul(factor))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RetryStep {
    Retry(Duration),
    Exhausted,
    Stop,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::default_config()
    }
}

/// Runs bounded cost lookups against a provider
#[derive(Clone)]
pub struct CostReconciler {
    provider: Arc<dyn LlmProvider>,
    retry: RetryConfig,
}

impl CostReconciler {
    /// Create a reconciler for the given provider
    #[must_use]
    pub fn new(provider: Arc<dyn LlmProvider>, retry: RetryConfig) -> Self {
        Self { provider, retry }
    }

    /// Look up the cost of `generation_id`, retrying while it is not yet available
    ///
    /// Returns `None` when every attempt failed, a terminal error occurred or
    /// the overall deadline passed.
    pub async fn reconcile(&self, generation_id: &str) -> Option<GenerationCost> {
        let deadline = Duration::from_millis(self.retry.deadline_ms);
        tokio::time::timeout(deadline, self.lookup(generation_id))
            .await
            .unwrap_or_else(|_| {
                warn!(
                    generation_id,
                    deadline_ms = self.retry.deadline_ms,
                    "Cost lookup deadline passed"
                );
                None
            })
    }

    async fn lookup(&self, generation_id: &str) -> Option<GenerationCost> {
        let mut attempt = 0;
        loop {
            let error = match self.provider.fetch_cost(generation_id).await {
                Ok(cost) => {
                    debug!(generation_id, attempt, "Cost lookup succeeded");
                    return Some(cost);
                }
                Err(e) => e,
            };

            match self.retry.after_failure(&error, attempt) {
                RetryStep::Retry(delay) => {
                    debug!(
                        generation_id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Cost not yet available, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                RetryStep::Exhausted => {
                    info!(generation_id, attempts = attempt + 1, "Cost lookup exhausted retries");
                    return None;
                }
                RetryStep::Stop => {
                    if !matches!(error, CostLookupError::Unsupported) {
                        warn!(generation_id, attempt, "Cost lookup gave up: {error}");
                    }
                    return None;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles() {
        let config = RetryConfig::default_config();
        assert_eq!(config.delay_for_attempt(0), Duration::from_millis(500));
        assert_eq!(config.delay_for_attempt(1), Duration::from_millis(1000));
        assert_eq!(config.delay_for_attempt(2), Duration::from_millis(2000));
    }

    #[test]
    fn test_last_not_yet_available_attempt_is_exhaustion() {
        let config = RetryConfig::default_config();
        let pending = CostLookupError::NotYetAvailable;
        assert_eq!(
            config.after_failure(&pending, 0),
            RetryStep::Retry(Duration::from_millis(500))
        );
        assert_eq!(
            config.after_failure(&pending, 1),
            RetryStep::Retry(Duration::from_millis(1000))
        );
        assert_eq!(config.after_failure(&pending, 2), RetryStep::Exhausted);
        assert_eq!(
            config.after_failure(&CostLookupError::Status(500), 0),
            RetryStep::Stop
        );
    }

    #[test]
    fn test_zero_attempts_still_makes_one_lookup() {
        let config = RetryConfig {
            max_attempts: 0,
            ..RetryConfig::default_config()
        };
        assert_eq!(
            config.after_failure(&CostLookupError::NotYetAvailable, 0),
            RetryStep::Exhausted
        );
    }

    #[test]
    fn test_only_not_yet_available_is_retryable() {
        assert!(CostLookupError::NotYetAvailable.is_retryable());
        assert!(!CostLookupError::Status(500).is_retryable());
        assert!(!CostLookupError::Unsupported.is_retryable());
    }
}
