// SPDX-License-Identifier: MIT

//! Execution of a single fan-out step: cache lookup, retries, degrade-or-fail

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use super::ExecutorConfig;
use crate::engine::cache::{Fingerprint, ToolCache};
use crate::engine::error::ProviderError;
use crate::engine::retry::{RetryDecision, RetryPolicy};
use crate::trip::capability::Capability;
use crate::trip::registry::CapabilityRegistry;
use crate::trip::state::{StepStatus, WorkflowState};
use crate::trip::types::TripRequest;

/// Everything a spawned step task needs, owned
#[derive(Debug, Clone)]
pub struct FanOutStep {
    pub capability: Capability,
    pub params: Value,
    pub fingerprint: Fingerprint,
    pub ttl: Duration,
    pub timeout: Duration,
    pub policy: RetryPolicy,
    /// Attempts recorded by earlier drives of the run
    pub prior_attempts: u32,
}

impl FanOutStep {
    pub fn plan(
        capability: Capability,
        request: &TripRequest,
        config: &ExecutorConfig,
        prior_attempts: u32,
    ) -> Self {
        let params = capability.params(request);
        Self {
            capability,
            fingerprint: Fingerprint::derive(capability.name(), &params),
            params,
            ttl: config.ttl(capability),
            timeout: config.step_timeout,
            policy: config.policy(capability),
            prior_attempts,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Succeeded(Value),
    /// Gave up and substituted the default payload
    Degraded { payload: Value, error: ProviderError },
    Failed(ProviderError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct StepOutcome {
    pub capability: Capability,
    /// Total attempts, including earlier drives
    pub attempts: u32,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub resolution: Resolution,
}

impl StepOutcome {
    /// Record this outcome on the step's entry in `state`
    pub fn apply(&self, state: &mut WorkflowState) {
        let step = state.step_mut(self.capability.name());
        step.attempts = self.attempts;
        step.started_at.get_or_insert(self.started_at);
        step.finished_at = Some(self.finished_at);

        match &self.resolution {
            Resolution::Succeeded(payload) => {
                step.status = StepStatus::Succeeded;
                step.payload = Some(payload.clone());
                step.error = None;
                step.degraded = false;
            }
            Resolution::Degraded { payload, error } => {
                step.status = StepStatus::Skipped;
                step.payload = Some(payload.clone());
                step.error = Some(error.to_string());
                step.degraded = true;
            }
            Resolution::Failed(error) => {
                step.status = StepStatus::Failed;
                step.payload = None;
                step.error = Some(error.to_string());
                step.degraded = false;
            }
        }
    }
}

/// Run one fan-out step to a terminal resolution.
///
/// Every attempt goes through the cache, so concurrent runs asking for the
/// same data share one provider call.
pub async fn execute_step(
    step: FanOutStep,
    registry: CapabilityRegistry,
    cache: Arc<ToolCache>,
) -> StepOutcome {
    let started_at = Utc::now();
    let capability = step.capability;
    let mut attempt = 0u32;

    let resolution = loop {
        attempt += 1;
        log::debug!(
            "Step {} attempt {} (fingerprint {})",
            capability,
            attempt,
            step.fingerprint
        );

        let registry = registry.clone();
        let params = step.params.clone();
        let timeout = step.timeout;
        let result = cache
            .get_or_compute(&step.fingerprint, step.ttl, move || async move {
                registry.invoke(capability, params, timeout).await
            })
            .await;

        let error = match result {
            Ok(payload) => break Resolution::Succeeded(payload),
            Err(error) => error,
        };

        match step.policy.decide(attempt, &error) {
            RetryDecision::Retry { after } => {
                log::warn!(
                    "Step {} attempt {} failed ({}); retrying in {:?}",
                    capability,
                    attempt,
                    error,
                    after
                );
                tokio::time::sleep(after).await;
            }
            RetryDecision::Degrade(payload) => {
                log::warn!(
                    "Step {} degraded to default payload after {} attempt(s): {}",
                    capability,
                    attempt,
                    error
                );
                break Resolution::Degraded { payload, error };
            }
            RetryDecision::Fail => {
                log::error!(
                    "Step {} failed after {} attempt(s): {}",
                    capability,
                    attempt,
                    error
                );
                break Resolution::Failed(error);
            }
        }
    };

    StepOutcome {
        capability,
        attempts: step.prior_attempts + attempt,
        started_at,
        finished_at: Utc::now(),
        resolution,
    }
}
