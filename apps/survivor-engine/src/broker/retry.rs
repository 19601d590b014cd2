//! Bounded, jittered backoff for transient broker failures.
//!
//! Transient failures (network, timeout, rate limiting) are retried with
//! jittered exponential backoff; terminal rejections are never retried here.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Retry policy for broker calls.
///
/// One policy is shared by every retry site (order placement, status
/// queries); each site runs its own [`BackoffCalculator`] over it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Maximum number of retry attempts.
    pub max_attempts: u32,
    /// Initial backoff in milliseconds.
    pub initial_backoff_ms: u64,
    /// Maximum backoff in milliseconds.
    pub max_backoff_ms: u64,
    /// Backoff multiplier for exponential growth.
    pub backoff_multiplier: f64,
    /// Jitter factor for randomization (0.2 = ±20%).
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff_ms: 100,
            max_backoff_ms: 30_000,
            backoff_multiplier: 2.0,
            jitter_factor: 0.2,
        }
    }
}

/// Attempt counter plus delay schedule for one retried operation.
#[derive(Debug)]
pub struct BackoffCalculator {
    policy: RetryPolicy,
    attempt: u32,
}

impl BackoffCalculator {
    /// Start a fresh schedule under the given policy.
    #[must_use]
    pub fn new(policy: &RetryPolicy) -> Self {
        Self {
            policy: policy.clone(),
            attempt: 0,
        }
    }

    /// Delay before the next attempt, or `None` once the attempt budget is
    /// spent.
    pub fn next_backoff(&mut self) -> Option<Duration> {
        if self.attempt >= self.policy.max_attempts {
            return None;
        }

        let exp = self.policy.backoff_multiplier.powi(self.attempt as i32);
        let cap = self.policy.max_backoff_ms as f64;
        let base = (self.policy.initial_backoff_ms as f64 * exp).min(cap);

        let spread = base * self.policy.jitter_factor;
        let jittered = if spread > 0.0 {
            rand::rng().random_range((base - spread).max(0.0)..=base + spread)
        } else {
            base
        };

        self.attempt += 1;
        Some(Duration::from_millis((jittered.min(cap)) as u64))
    }

    /// Attempts consumed so far.
    #[must_use]
    pub const fn current_attempt(&self) -> u32 {
        self.attempt
    }
}
