// SPDX-License-Identifier: MIT

//! Runtime state of a planning run
//!
//! [`WorkflowState`] is the unit of execution and persistence. Every
//! committed mutation bumps `revision` and is saved as a new checkpoint.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

use super::capability::{Capability, FAN_OUT, SYNTHESIS_STEP};
use super::itinerary::Itinerary;
use super::types::TripRequest;
use crate::engine::checkpoint::CheckpointStore;
use crate::engine::error::StoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    PartiallyFailed,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Completed | RunStatus::PartiallyFailed | RunStatus::Failed
        )
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::PartiallyFailed => "partially_failed",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    NotStarted,
    Running,
    Succeeded,
    Failed,
    /// Gave up and substituted the degraded-mode default
    Skipped,
}

impl StepStatus {
    /// Settled steps are never scheduled again
    pub fn is_settled(&self) -> bool {
        matches!(self, StepStatus::Succeeded | StepStatus::Skipped)
    }
}

/// Outcome of one graph node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub status: StepStatus,
    pub payload: Option<Value>,
    pub error: Option<String>,
    /// The payload is a degraded-mode default
    #[serde(default)]
    pub degraded: bool,
    pub attempts: u32,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl StepResult {
    pub fn not_started() -> Self {
        Self {
            status: StepStatus::NotStarted,
            payload: None,
            error: None,
            degraded: false,
            attempts: 0,
            started_at: None,
            finished_at: None,
        }
    }
}

impl Default for StepResult {
    fn default() -> Self {
        Self::not_started()
    }
}

/// State of one planning run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowState {
    pub run_id: String,
    pub request: TripRequest,
    pub status: RunStatus,
    /// Keyed by step name: the fan-out capability names plus `synthesis`
    pub steps: BTreeMap<String, StepResult>,
    pub revision: u64,
    pub itinerary: Option<Itinerary>,
    /// Human-readable cause of a Failed run
    pub failure: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowState {
    /// Fresh Pending state; revision 0 means nothing has been saved yet
    pub fn new(run_id: impl Into<String>, request: TripRequest) -> Self {
        let now = Utc::now();
        let mut steps = BTreeMap::new();
        for cap in FAN_OUT {
            steps.insert(cap.name().to_string(), StepResult::not_started());
        }
        steps.insert(SYNTHESIS_STEP.to_string(), StepResult::not_started());

        Self {
            run_id: run_id.into(),
            request,
            status: RunStatus::Pending,
            steps,
            revision: 0,
            itinerary: None,
            failure: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn step(&self, name: &str) -> Option<&StepResult> {
        self.steps.get(name)
    }

    /// Step entry for `name`, created NotStarted if missing
    pub fn step_mut(&mut self, name: &str) -> &mut StepResult {
        self.steps.entry(name.to_string()).or_default()
    }

    /// Fan-out steps that still have to run
    pub fn pending_fan_out(&self) -> Vec<Capability> {
        FAN_OUT
            .into_iter()
            .filter(|cap| {
                !self
                    .step(cap.name())
                    .map(|s| s.status.is_settled())
                    .unwrap_or(false)
            })
            .collect()
    }

    /// Fan-out steps that ended Failed
    pub fn failed_fan_out(&self) -> Vec<Capability> {
        FAN_OUT
            .into_iter()
            .filter(|cap| {
                self.step(cap.name())
                    .map(|s| s.status == StepStatus::Failed)
                    .unwrap_or(false)
            })
            .collect()
    }

    /// Capabilities whose data came from a degraded default
    pub fn degraded_capabilities(&self) -> Vec<Capability> {
        let mut caps: Vec<Capability> = FAN_OUT
            .into_iter()
            .filter(|cap| self.step(cap.name()).map(|s| s.degraded).unwrap_or(false))
            .collect();
        if let Some(itinerary) = &self.itinerary {
            caps.extend(itinerary.degraded.iter().copied());
        }
        caps.sort();
        caps.dedup();
        caps
    }

    /// One line per failed step, naming the step
    pub fn failure_causes(&self) -> Vec<String> {
        self.steps
            .iter()
            .filter(|(_, step)| step.status == StepStatus::Failed)
            .map(|(name, step)| match &step.error {
                Some(error) => format!("{}: {}", name, error),
                None => name.clone(),
            })
            .collect()
    }

    pub fn summary(&self) -> RunSummary {
        RunSummary {
            run_id: self.run_id.clone(),
            status: self.status,
            revision: self.revision,
            steps: self
                .steps
                .iter()
                .map(|(name, step)| {
                    (
                        name.clone(),
                        StepSummary {
                            status: step.status,
                            attempts: step.attempts,
                            error: step.error.clone(),
                            degraded: step.degraded,
                        },
                    )
                })
                .collect(),
            degraded: self.degraded_capabilities(),
            failure: self.failure.clone(),
            failure_causes: self.failure_causes(),
            has_itinerary: self.itinerary.is_some(),
            updated_at: self.updated_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepSummary {
    pub status: StepStatus,
    pub attempts: u32,
    pub error: Option<String>,
    pub degraded: bool,
}

/// Status view of a run returned to callers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: String,
    pub status: RunStatus,
    pub revision: u64,
    pub steps: BTreeMap<String, StepSummary>,
    pub degraded: Vec<Capability>,
    pub failure: Option<String>,
    pub failure_causes: Vec<String>,
    pub has_itinerary: bool,
    pub updated_at: DateTime<Utc>,
}

/// Save `state` at its current revision
pub async fn save_state(
    store: &dyn CheckpointStore,
    state: &WorkflowState,
) -> Result<(), StoreError> {
    let snapshot = serde_json::to_value(state)?;
    store.save(&state.run_id, state.revision, snapshot).await
}

/// Load the highest-revision state of `run_id`
pub async fn load_state(
    store: &dyn CheckpointStore,
    run_id: &str,
) -> Result<WorkflowState, StoreError> {
    let checkpoint = store.load_latest(run_id).await?;
    let mut state: WorkflowState = serde_json::from_value(checkpoint.snapshot)?;
    state.revision = checkpoint.revision;
    Ok(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::checkpoint::MemoryCheckpointStore;
    use chrono::NaiveDate;
    use serde_json::json;

    fn state() -> WorkflowState {
        let request = TripRequest::new("北京", NaiveDate::from_ymd_opt(2025, 6, 1).unwrap(), 3);
        WorkflowState::new("run-1", request)
    }

    #[test]
    fn test_new_state_has_every_step() {
        let state = state();
        assert_eq!(state.status, RunStatus::Pending);
        assert_eq!(state.steps.len(), 4);
        assert!(state.steps.values().all(|s| s.status == StepStatus::NotStarted));
        assert_eq!(state.pending_fan_out(), FAN_OUT.to_vec());
    }

    #[test]
    fn test_settled_steps_are_not_pending() {
        let mut state = state();
        state.step_mut("weather").status = StepStatus::Succeeded;
        state.step_mut("lodging").status = StepStatus::Skipped;
        state.step_mut("point_of_interest").status = StepStatus::Failed;

        assert_eq!(state.pending_fan_out(), vec![Capability::PointOfInterest]);
        assert_eq!(state.failed_fan_out(), vec![Capability::PointOfInterest]);
    }

    #[test]
    fn test_failure_causes_name_the_step() {
        let mut state = state();
        let lodging = state.step_mut("lodging");
        lodging.status = StepStatus::Failed;
        lodging.error = Some("permanent provider error [400]: bad city".into());

        let causes = state.failure_causes();
        assert_eq!(causes.len(), 1);
        assert!(causes[0].starts_with("lodging: "));
    }

    #[test]
    fn test_summary_lists_degraded() {
        let mut state = state();
        let weather = state.step_mut("weather");
        weather.status = StepStatus::Skipped;
        weather.degraded = true;
        weather.payload = Some(json!({"forecast": [], "default": true}));

        let summary = state.summary();
        assert_eq!(summary.degraded, vec![Capability::Weather]);
        assert!(summary.steps["weather"].degraded);
        assert!(!summary.has_itinerary);
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(!RunStatus::Pending.is_terminal());
        assert!(!RunStatus::Running.is_terminal());
        assert!(RunStatus::PartiallyFailed.is_terminal());
        assert!(RunStatus::Completed.is_terminal());
        assert!(RunStatus::Failed.is_terminal());
    }

    #[tokio::test]
    async fn test_save_and_load_state() {
        let store = MemoryCheckpointStore::new();
        let mut state = state();
        state.revision = 1;
        save_state(&store, &state).await.unwrap();

        state.revision = 2;
        state.status = RunStatus::Running;
        save_state(&store, &state).await.unwrap();

        let loaded = load_state(&store, "run-1").await.unwrap();
        assert_eq!(loaded, state);

        // Re-saving an already used revision is a conflict
        assert!(matches!(
            save_state(&store, &state).await,
            Err(StoreError::Conflict { .. })
        ));
    }
}
