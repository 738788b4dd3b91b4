// SPDX-License-Identifier: MIT

//! Two-phase planning graph
//!
//! A fixed fan-out set (point of interest, weather, lodging) runs
//! concurrently, then a single synthesis step joins their results.

pub mod executor;
pub mod step;

pub use executor::{Commit, GraphExecutor};
pub use step::{execute_step, FanOutStep, Resolution, StepOutcome};

use std::collections::HashMap;
use std::time::Duration;

use super::capability::Capability;
use crate::engine::retry::RetryPolicy;

/// How many times a conflicting checkpoint write is reloaded and retried
pub const MAX_CONFLICT_RETRIES: u32 = 3;

/// Execution knobs shared by every run of an executor
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    policies: HashMap<Capability, RetryPolicy>,
    ttls: HashMap<Capability, Duration>,
    pub default_ttl: Duration,
    /// Deadline of a single provider call
    pub step_timeout: Duration,
    /// Deadline of one drive of a run, if any
    pub run_timeout: Option<Duration>,
    pub max_travel_days: u32,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        let mut policies = HashMap::new();
        policies.insert(
            Capability::Weather,
            RetryPolicy::default().with_fallback(Some(Capability::Weather.default_payload())),
        );
        Self {
            policies,
            ttls: HashMap::new(),
            default_ttl: Duration::from_secs(3600),
            step_timeout: Duration::from_secs(60),
            run_timeout: None,
            max_travel_days: 30,
        }
    }
}

impl ExecutorConfig {
    pub fn with_policy(mut self, capability: Capability, policy: RetryPolicy) -> Self {
        self.policies.insert(capability, policy);
        self
    }

    pub fn with_ttl(mut self, capability: Capability, ttl: Duration) -> Self {
        self.ttls.insert(capability, ttl);
        self
    }

    pub fn with_step_timeout(mut self, timeout: Duration) -> Self {
        self.step_timeout = timeout;
        self
    }

    pub fn with_run_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.run_timeout = timeout;
        self
    }

    pub fn with_max_travel_days(mut self, days: u32) -> Self {
        self.max_travel_days = days;
        self
    }

    /// Retry policy of `capability`; capabilities without one use the
    /// default schedule and no fallback
    pub fn policy(&self, capability: Capability) -> RetryPolicy {
        self.policies.get(&capability).cloned().unwrap_or_default()
    }

    pub fn ttl(&self, capability: Capability) -> Duration {
        self.ttls
            .get(&capability)
            .copied()
            .unwrap_or(self.default_ttl)
    }
}
