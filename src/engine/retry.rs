// SPDX-License-Identifier: MIT

//! Per-step retry policy
//!
//! The policy owns the attempt ceiling, the backoff schedule and the
//! degrade-or-fail decision, so the executor's step loop stays a plain
//! "ask the policy what to do next" loop that can be tested without I/O.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

use crate::engine::error::ProviderError;

/// Serializable retry schedule, as it appears in configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts including the first one
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub multiplier: u32,
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 500,
            multiplier: 2,
            max_backoff_ms: 8_000,
        }
    }
}

/// What the step loop should do after a failed attempt
#[derive(Debug, Clone, PartialEq)]
pub enum RetryDecision {
    /// Sleep, then try again
    Retry { after: Duration },
    /// Give up and substitute the degraded-mode default
    Degrade(Value),
    /// Give up; the step fails
    Fail,
}

/// Retry policy for a single step
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub multiplier: u32,
    pub max_backoff: Duration,
    /// Degraded-mode default payload, if the capability has one
    pub fallback: Option<Value>,
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            multiplier: config.multiplier.max(1),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
            fallback: None,
        }
    }

    /// A policy that never sleeps; handy for tests and single-shot calls
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_backoff: Duration::ZERO,
            multiplier: 1,
            max_backoff: Duration::ZERO,
            fallback: None,
        }
    }

    pub fn with_fallback(mut self, fallback: Option<Value>) -> Self {
        self.fallback = fallback;
        self
    }

    /// Delay after the given 1-based attempt failed
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let factor = self.multiplier.saturating_pow(exponent);
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }

    /// Decide what happens after `attempt` (1-based) failed with `error`.
    ///
    /// Transient errors are retried until the ceiling; permanent errors go
    /// straight to the degrade-or-fail branch.
    pub fn decide(&self, attempt: u32, error: &ProviderError) -> RetryDecision {
        if error.is_transient() && attempt < self.max_attempts {
            return RetryDecision::Retry {
                after: self.backoff(attempt),
            };
        }
        match &self.fallback {
            Some(default) => RetryDecision::Degrade(default.clone()),
            None => RetryDecision::Fail,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_backoff_schedule_is_exponential_and_capped() {
        let policy = RetryPolicy::from_config(&RetryConfig {
            max_attempts: 6,
            initial_backoff_ms: 100,
            multiplier: 2,
            max_backoff_ms: 500,
        });
        assert_eq!(policy.backoff(1), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(200));
        assert_eq!(policy.backoff(3), Duration::from_millis(400));
        assert_eq!(policy.backoff(4), Duration::from_millis(500));
        assert_eq!(policy.backoff(40), Duration::from_millis(500));
    }

    #[test]
    fn test_transient_retries_until_ceiling() {
        let policy = RetryPolicy::default();
        let err = ProviderError::transient("503", "unavailable");

        assert!(matches!(policy.decide(1, &err), RetryDecision::Retry { .. }));
        assert!(matches!(policy.decide(2, &err), RetryDecision::Retry { .. }));
        assert_eq!(policy.decide(3, &err), RetryDecision::Fail);
    }

    #[test]
    fn test_permanent_never_retries() {
        let policy = RetryPolicy::default();
        let err = ProviderError::permanent("400", "bad request");
        assert_eq!(policy.decide(1, &err), RetryDecision::Fail);
    }

    #[test]
    fn test_exhaustion_degrades_when_default_exists() {
        let policy = RetryPolicy::immediate(2).with_fallback(Some(json!({"forecast": []})));
        let err = ProviderError::transient("timeout", "slow");

        assert_eq!(
            policy.decide(1, &err),
            RetryDecision::Retry {
                after: Duration::ZERO
            }
        );
        assert_eq!(
            policy.decide(2, &err),
            RetryDecision::Degrade(json!({"forecast": []}))
        );
    }

    #[test]
    fn test_permanent_degrades_immediately() {
        let policy = RetryPolicy::default().with_fallback(Some(json!({"hotels": []})));
        let err = ProviderError::permanent("404", "unknown city");
        assert_eq!(
            policy.decide(1, &err),
            RetryDecision::Degrade(json!({"hotels": []}))
        );
    }

    #[test]
    fn test_zero_attempts_config_still_tries_once() {
        let policy = RetryPolicy::from_config(&RetryConfig {
            max_attempts: 0,
            ..RetryConfig::default()
        });
        assert_eq!(policy.max_attempts, 1);
    }
}
