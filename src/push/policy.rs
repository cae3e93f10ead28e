//! Reconnect policy for the push channel.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::{
    BACKOFF_CEILING_SECS, BACKOFF_JITTER_MS, DEFAULT_BACKOFF_INITIAL_SECS, DEFAULT_BACKOFF_MAX_SECS,
};

/// What the push channel does after an unexpected closure.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ReconnectPolicy {
    /// Stay closed until the host calls `attempt_open` or updates the
    /// credential.
    #[default]
    HostDriven,
    /// Retry automatically with capped exponential backoff and jitter.
    ExponentialBackoff {
        /// First delay, in seconds.
        #[serde(default = "default_initial_secs")]
        initial_secs: u64,
        /// Largest delay, in seconds.
        #[serde(default = "default_max_secs")]
        max_secs: u64,
    },
}

fn default_initial_secs() -> u64 {
    DEFAULT_BACKOFF_INITIAL_SECS
}

fn default_max_secs() -> u64 {
    DEFAULT_BACKOFF_MAX_SECS
}

impl ReconnectPolicy {
    /// Backoff with the default bounds.
    pub fn exponential() -> Self {
        Self::ExponentialBackoff {
            initial_secs: DEFAULT_BACKOFF_INITIAL_SECS,
            max_secs: DEFAULT_BACKOFF_MAX_SECS,
        }
    }
}

/// Retry delay state for one push channel.
#[derive(Debug, Clone)]
pub(crate) struct Backoff {
    policy: ReconnectPolicy,
    failures: u32,
}

impl Backoff {
    pub(crate) fn new(policy: ReconnectPolicy) -> Self {
        Self { policy, failures: 0 }
    }

    /// Delay before the next attempt, or `None` when retries are host-driven.
    pub(crate) fn next_delay(&mut self) -> Option<Duration> {
        let ReconnectPolicy::ExponentialBackoff { initial_secs, max_secs } = self.policy else {
            return None;
        };
        let base = Self::base_delay_secs(initial_secs, max_secs, self.failures);
        self.failures = self.failures.saturating_add(1);
        let jitter = rand::random::<u64>() % BACKOFF_JITTER_MS;
        Some(Duration::from_secs(base) + Duration::from_millis(jitter))
    }

    /// Forget previous failures after a successful open.
    pub(crate) fn reset(&mut self) {
        self.failures = 0;
    }

    fn base_delay_secs(initial_secs: u64, max_secs: u64, failures: u32) -> u64 {
        let factor = 1u64.checked_shl(failures.min(32)).unwrap_or(u64::MAX);
        let cap = max_secs.clamp(1, BACKOFF_CEILING_SECS);
        initial_secs.max(1).saturating_mul(factor).min(cap)
    }
}
