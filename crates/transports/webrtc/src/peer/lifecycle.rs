//! Connection timeout adaptation and retry budget
//!
//! Slow networks get longer timeouts and more retries: the retry budget is a
//! function of the connection timeout, and the timeout itself grows with every
//! retry and is re-measured on every successful connect.

use crate::config::ConnectionConfig;
use std::time::Duration;
use tracing::debug;

/// Timeout-dependent retry policy for one channel
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    min_timeout: Duration,
    max_timeout: Duration,
    growth: f64,
    headroom: f64,
    backoff: Duration,
    conservative_backoff: Duration,
    optimistic_threshold: Duration,
}

impl RetryPolicy {
    /// Build the policy from connection settings
    pub fn new(config: &ConnectionConfig) -> Self {
        Self {
            min_timeout: config.min_timeout(),
            max_timeout: config.max_timeout(),
            growth: config.timeout_growth,
            headroom: config.timeout_headroom,
            backoff: Duration::from_millis(config.retry_backoff_ms),
            conservative_backoff: Duration::from_millis(config.conservative_backoff_ms),
            optimistic_threshold: Duration::from_millis(config.optimistic_threshold_ms),
        }
    }

    /// Retry budget for a connection timeout
    ///
    /// Over 7s gets 5 retries, over 4s gets 3, anything else 2.
    pub fn max_retries_for(timeout: Duration) -> u32 {
        if timeout > Duration::from_secs(7) {
            5
        } else if timeout > Duration::from_secs(4) {
            3
        } else {
            2
        }
    }

    /// Timeout for the attempt after a retry
    pub fn grow(&self, timeout: Duration) -> Duration {
        timeout.mul_f64(self.growth).min(self.max_timeout)
    }

    /// Timeout learned from a measured connect time
    pub fn adapt(&self, elapsed: Duration) -> Duration {
        elapsed
            .mul_f64(self.headroom)
            .clamp(self.min_timeout, self.max_timeout)
    }

    /// Whether a connect time counts as fast
    pub fn is_optimistic(&self, elapsed: Duration) -> bool {
        elapsed <= self.optimistic_threshold
    }

    /// Delay before re-running setup after a failure
    pub fn backoff(&self, optimistic: bool) -> Duration {
        if optimistic {
            self.backoff
        } else {
            self.conservative_backoff
        }
    }
}

/// What to do about a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Re-run setup after `backoff`
    Retry {
        /// 1-based retry number within this failure episode
        attempt: u32,
        /// Budget for this episode
        max_retries: u32,
        /// Delay before the next attempt
        backoff: Duration,
    },
    /// Budget spent; the session has failed
    Exhausted {
        /// Retries that were made
        retries: u32,
    },
}

/// Per-channel retry counter, adaptive timeout and optimism flag
#[derive(Debug, Clone)]
pub struct RetryState {
    policy: RetryPolicy,
    timeout: Duration,
    retry_count: u32,
    episode_budget: Option<u32>,
    optimistic: bool,
}

impl RetryState {
    /// Start with the configured initial timeout
    pub fn new(config: &ConnectionConfig) -> Self {
        Self {
            policy: RetryPolicy::new(config),
            timeout: config.initial_timeout().min(config.max_timeout()),
            retry_count: 0,
            episode_budget: None,
            optimistic: true,
        }
    }

    /// Timeout for the current attempt
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Retries spent in the current failure episode
    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    /// Whether the last measured connect was fast
    pub fn optimistic(&self) -> bool {
        self.optimistic
    }

    /// A new session starts with a fresh failure episode
    pub fn reset(&mut self) {
        self.retry_count = 0;
        self.episode_budget = None;
    }

    /// Record a failed attempt and decide whether to retry
    pub fn on_failure(&mut self) -> RetryDecision {
        let budget = *self
            .episode_budget
            .get_or_insert_with(|| RetryPolicy::max_retries_for(self.timeout));

        if self.retry_count >= budget {
            return RetryDecision::Exhausted {
                retries: self.retry_count,
            };
        }

        self.retry_count += 1;
        self.timeout = self.policy.grow(self.timeout);
        RetryDecision::Retry {
            attempt: self.retry_count,
            max_retries: budget,
            backoff: self.policy.backoff(self.optimistic),
        }
    }

    /// Record a successful connect that took `elapsed`
    pub fn on_established(&mut self, elapsed: Duration) {
        self.timeout = self.policy.adapt(elapsed);
        self.optimistic = self.policy.is_optimistic(elapsed);
        self.reset();
        debug!(
            "Connected in {:?}: timeout now {:?}, optimistic={}",
            elapsed, self.timeout, self.optimistic
        );
    }
}
