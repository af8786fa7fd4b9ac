//! Retry policy for transient LLM failures.
//!
//! Delays follow a configurable backoff (exponential by default) capped at
//! `max_delay_ms`, with jitter to keep concurrent runs from retrying in
//! lockstep against a rate-limited provider.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Backoff strategy for retry delays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// delay = base * 2^retry
    #[default]
    Exponential,
    /// delay = base * (retry + 1)
    Linear,
    /// delay = base (constant)
    Constant,
}

/// Jitter strategy applied on top of the backoff delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JitterStrategy {
    /// No jitter
    None,
    /// Random from 0 to delay
    #[default]
    Full,
    /// Half fixed, half random
    Equal,
}

/// Configuration for retry behavior.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum attempts per LLM call, including the first one.
    pub max_attempts: usize,
    /// Base delay between retries in milliseconds.
    pub base_delay_ms: u64,
    /// Maximum delay cap in milliseconds.
    pub max_delay_ms: u64,
    /// Backoff strategy.
    pub backoff_strategy: BackoffStrategy,
    /// Jitter strategy.
    pub jitter_strategy: JitterStrategy,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 500,
            max_delay_ms: 8000,
            backoff_strategy: BackoffStrategy::Exponential,
            jitter_strategy: JitterStrategy::Full,
        }
    }
}

impl RetryConfig {
    /// Creates a new retry config.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A config that never waits between attempts. Useful in tests.
    #[must_use]
    pub fn immediate(max_attempts: usize) -> Self {
        Self {
            max_attempts,
            base_delay_ms: 0,
            max_delay_ms: 0,
            backoff_strategy: BackoffStrategy::Constant,
            jitter_strategy: JitterStrategy::None,
        }
    }

    /// Sets the maximum attempts.
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: usize) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Sets the base delay.
    #[must_use]
    pub fn with_base_delay_ms(mut self, delay: u64) -> Self {
        self.base_delay_ms = delay;
        self
    }

    /// Sets the maximum delay.
    #[must_use]
    pub fn with_max_delay_ms(mut self, delay: u64) -> Self {
        self.max_delay_ms = delay;
        self
    }

    /// Sets the backoff strategy.
    #[must_use]
    pub fn with_backoff(mut self, strategy: BackoffStrategy) -> Self {
        self.backoff_strategy = strategy;
        self
    }

    /// Sets the jitter strategy.
    #[must_use]
    pub fn with_jitter(mut self, strategy: JitterStrategy) -> Self {
        self.jitter_strategy = strategy;
        self
    }

    /// Computes the un-jittered delay before retry number `retry` (0-indexed).
    #[must_use]
    pub fn backoff_delay_ms(&self, retry: usize) -> u64 {
        let base = self.base_delay_ms;
        let delay = match self.backoff_strategy {
            BackoffStrategy::Exponential => {
                let exp = u32::try_from(retry).unwrap_or(u32::MAX);
                base.saturating_mul(2u64.saturating_pow(exp))
            }
            BackoffStrategy::Linear => base.saturating_mul(retry as u64 + 1),
            BackoffStrategy::Constant => base,
        };
        delay.min(self.max_delay_ms)
    }

    /// Computes the jittered delay before retry number `retry` (0-indexed).
    #[must_use]
    pub fn delay_for(&self, retry: usize) -> Duration {
        let delay = self.backoff_delay_ms(retry);
        let jittered = match self.jitter_strategy {
            JitterStrategy::None => delay,
            JitterStrategy::Full => {
                if delay == 0 {
                    0
                } else {
                    rand::thread_rng().gen_range(0..=delay)
                }
            }
            JitterStrategy::Equal => {
                let half = delay / 2;
                if half == 0 {
                    delay
                } else {
                    half + rand::thread_rng().gen_range(0..=half)
                }
            }
        };
        Duration::from_millis(jittered)
    }
}

/// Attempt bookkeeping for a single retried operation.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RetryState {
    /// Attempts made so far.
    pub attempts: usize,
}

impl RetryState {
    /// Creates a new retry state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an attempt.
    pub fn record_attempt(&mut self) {
        self.attempts += 1;
    }

    /// Number of retries performed (attempts after the first).
    #[must_use]
    pub const fn retries(&self) -> usize {
        self.attempts.saturating_sub(1)
    }

    /// Returns true if retries are exhausted.
    #[must_use]
    pub fn is_exhausted(&self, config: &RetryConfig) -> bool {
        self.attempts >= config.max_attempts
    }
}

/// Outcome of a retry decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry after the specified delay.
    Retry(Duration),
    /// No more attempts allowed.
    GiveUp,
    /// The error is not retryable.
    NotRetryable,
}

/// Decides whether a failed attempt should be retried.
#[must_use]
pub fn should_retry(state: &RetryState, config: &RetryConfig, transient: bool) -> RetryDecision {
    if !transient {
        return RetryDecision::NotRetryable;
    }
    if state.is_exhausted(config) {
        return RetryDecision::GiveUp;
    }
    RetryDecision::Retry(config.delay_for(state.retries()))
}
