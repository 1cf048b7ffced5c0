//! Store configuration.
//!
//! [`StoreConfig`] bounds what a single request may ask of the store and controls the
//! optimistic retry budget used for atomic field operations on backends without a native
//! increment primitive. All fields have defaults, so partial JSON configs deserialize.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Limits and policies applied to every tenant request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Page size used when a page descriptor omits it.
    pub default_page_size: usize,
    /// Largest page size a client may request; larger values are clamped.
    pub max_page_size: usize,
    /// Largest `limit` a client may request; larger values are clamped.
    pub max_limit: usize,
    /// Maximum nesting depth of a client filter.
    pub max_filter_depth: usize,
    /// Maximum number of values in an `in`/`not_in` set.
    pub max_in_set: usize,
    /// Retry budget for compare-and-swap increments.
    pub retry: RetryPolicy,
}

impl StoreConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_default_page_size(mut self, size: usize) -> Self {
        self.default_page_size = size;
        self
    }

    pub fn with_max_page_size(mut self, size: usize) -> Self {
        self.max_page_size = size;
        self
    }

    pub fn with_max_limit(mut self, limit: usize) -> Self {
        self.max_limit = limit;
        self
    }

    pub fn with_max_filter_depth(mut self, depth: usize) -> Self {
        self.max_filter_depth = depth;
        self
    }

    pub fn with_max_in_set(mut self, size: usize) -> Self {
        self.max_in_set = size;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            default_page_size: 10,
            max_page_size: 1_000,
            max_limit: 10_000,
            max_filter_depth: 16,
            max_in_set: 1_000,
            retry: RetryPolicy::default(),
        }
    }
}

/// Bounded exponential backoff for optimistic increments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Compare-and-swap rounds before giving up with a conflict.
    pub max_attempts: u32,
    /// Delay after the first failed round.
    pub initial_backoff_ms: u64,
    /// Upper bound for the delay between rounds.
    pub max_backoff_ms: u64,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self { max_attempts, ..Self::default() }
    }

    pub fn with_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_backoff_ms = initial.as_millis() as u64;
        self.max_backoff_ms = max.as_millis() as u64;
        self
    }

    /// Delay to wait after the given zero-based failed attempt.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt.min(32)).unwrap_or(u64::MAX);
        Duration::from_millis(
            self.initial_backoff_ms
                .saturating_mul(factor)
                .min(self.max_backoff_ms),
        )
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 8,
            initial_backoff_ms: 2,
            max_backoff_ms: 100,
        }
    }
}
