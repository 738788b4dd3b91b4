// SPDX-License-Identifier: MIT

//! Graph executor
//!
//! Owns the per-run state machine. All mutations of a run's
//! [`WorkflowState`] go through [`GraphExecutor::commit`], which bumps the
//! revision and checkpoints before the in-memory state moves on.

use chrono::Utc;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio::time::Instant;
use uuid::Uuid;

use super::step::{execute_step, FanOutStep, StepOutcome};
use super::{ExecutorConfig, MAX_CONFLICT_RETRIES};
use crate::engine::cache::{Fingerprint, ToolCache};
use crate::engine::checkpoint::CheckpointStore;
use crate::engine::error::{PlannerError, StoreError, SynthesisError};
use crate::trip::capability::{Capability, SYNTHESIS_STEP};
use crate::trip::itinerary::Itinerary;
use crate::trip::registry::CapabilityRegistry;
use crate::trip::state::{load_state, save_state, RunStatus, StepStatus, WorkflowState};
use crate::trip::synthesis::{self, SynthesisInput};
use crate::trip::types::TripRequest;

/// Result of a checkpointed mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Commit {
    Applied,
    /// Another writer already drove the run to a terminal status
    Superseded,
}

/// Runs the fan-out/join graph for trip requests
#[derive(Clone)]
pub struct GraphExecutor {
    registry: CapabilityRegistry,
    cache: Arc<ToolCache>,
    store: Arc<dyn CheckpointStore>,
    config: ExecutorConfig,
}

impl GraphExecutor {
    pub fn new(
        registry: CapabilityRegistry,
        cache: Arc<ToolCache>,
        store: Arc<dyn CheckpointStore>,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            registry,
            cache,
            store,
            config,
        }
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn CheckpointStore> {
        &self.store
    }

    pub fn cache(&self) -> &Arc<ToolCache> {
        &self.cache
    }

    /// Validate `request` and persist a Pending run at revision 1
    pub async fn initialize(&self, request: TripRequest) -> Result<WorkflowState, PlannerError> {
        let request = request.normalize(self.config.max_travel_days)?;
        let mut state = WorkflowState::new(Uuid::new_v4().to_string(), request);
        state.revision = 1;
        save_state(self.store.as_ref(), &state).await?;

        log::info!(
            "Run {} created for {} ({} days)",
            state.run_id,
            state.request.destination,
            state.request.days
        );
        Ok(state)
    }

    /// Initialize and drive a run to a terminal status
    pub async fn run(&self, request: TripRequest) -> Result<WorkflowState, PlannerError> {
        let state = self.initialize(request).await?;
        self.drive(state).await
    }

    /// Continue a run from its latest checkpoint
    pub async fn resume(&self, run_id: &str) -> Result<WorkflowState, PlannerError> {
        let state = load_state(self.store.as_ref(), run_id).await?;
        log::info!(
            "Resuming run {} at revision {} ({})",
            run_id,
            state.revision,
            state.status
        );
        self.drive(state).await
    }

    /// Advance `state` until it is terminal.
    ///
    /// Fan-out steps already Succeeded or Skipped are not run again.
    pub async fn drive(&self, mut state: WorkflowState) -> Result<WorkflowState, PlannerError> {
        if state.is_terminal() {
            log::debug!("Run {} already {}", state.run_id, state.status);
            return Ok(state);
        }

        let deadline = self.config.run_timeout.map(|t| Instant::now() + t);

        if state.status == RunStatus::Pending {
            let commit = self
                .commit(&mut state, |s| s.status = RunStatus::Running)
                .await?;
            if commit == Commit::Superseded {
                return Ok(state);
            }
        }

        if self.run_fan_out(&mut state, deadline).await? == Commit::Superseded {
            return Ok(state);
        }
        if state.is_terminal() {
            return Ok(state);
        }

        let failed = state.failed_fan_out();
        if !failed.is_empty() {
            let cause = format!("Required step failed: {}", state.failure_causes().join("; "));
            log::error!("Run {} failed: {}", state.run_id, cause);
            self.commit(&mut state, |s| {
                s.status = RunStatus::Failed;
                s.failure = Some(cause.clone());
            })
            .await?;
            return Ok(state);
        }

        self.run_synthesis(&mut state, deadline).await?;
        Ok(state)
    }

    async fn run_fan_out(
        &self,
        state: &mut WorkflowState,
        deadline: Option<Instant>,
    ) -> Result<Commit, PlannerError> {
        let pending = state.pending_fan_out();
        if pending.is_empty() {
            return Ok(Commit::Applied);
        }

        log::info!(
            "Run {} scheduling {} fan-out step(s): {:?}",
            state.run_id,
            pending.len(),
            pending.iter().map(|c| c.name()).collect::<Vec<_>>()
        );

        let started = Utc::now();
        let commit = self
            .commit(state, |s| {
                for cap in &pending {
                    let step = s.step_mut(cap.name());
                    step.status = StepStatus::Running;
                    step.error = None;
                    step.started_at = Some(started);
                    step.finished_at = None;
                }
            })
            .await?;
        if commit == Commit::Superseded {
            return Ok(commit);
        }

        let mut tasks = JoinSet::new();
        for cap in &pending {
            let prior = state.step(cap.name()).map(|s| s.attempts).unwrap_or(0);
            let step = FanOutStep::plan(*cap, &state.request, &self.config, prior);
            tasks.spawn(execute_step(
                step,
                self.registry.clone(),
                Arc::clone(&self.cache),
            ));
        }

        loop {
            let joined = match deadline {
                Some(deadline) => match tokio::time::timeout_at(deadline, tasks.join_next()).await {
                    Ok(joined) => joined,
                    Err(_) => {
                        tasks.abort_all();
                        return self.fail_on_deadline(state).await;
                    }
                },
                None => tasks.join_next().await,
            };

            let Some(joined) = joined else {
                break;
            };

            match joined {
                Ok(outcome) => {
                    if self.record_outcome(state, &outcome).await? == Commit::Superseded {
                        tasks.abort_all();
                        return Ok(Commit::Superseded);
                    }
                }
                Err(e) => log::error!("Run {} step task aborted: {}", state.run_id, e),
            }
        }

        // A step whose task died never reported an outcome
        let orphaned: Vec<Capability> = pending
            .into_iter()
            .filter(|cap| {
                state
                    .step(cap.name())
                    .map(|s| s.status == StepStatus::Running)
                    .unwrap_or(false)
            })
            .collect();
        if !orphaned.is_empty() {
            let now = Utc::now();
            return self
                .commit(state, |s| {
                    for cap in &orphaned {
                        let step = s.step_mut(cap.name());
                        step.status = StepStatus::Failed;
                        step.error = Some("step task terminated unexpectedly".to_string());
                        step.finished_at = Some(now);
                    }
                })
                .await;
        }

        log::info!("Run {} fan-out settled", state.run_id);
        Ok(Commit::Applied)
    }

    async fn record_outcome(
        &self,
        state: &mut WorkflowState,
        outcome: &StepOutcome,
    ) -> Result<Commit, PlannerError> {
        log::info!(
            "Run {} step {} finished after {} attempt(s)",
            state.run_id,
            outcome.capability,
            outcome.attempts
        );
        self.commit(state, |s| outcome.apply(s)).await
    }

    async fn run_synthesis(
        &self,
        state: &mut WorkflowState,
        deadline: Option<Instant>,
    ) -> Result<Commit, PlannerError> {
        let started = Utc::now();
        let commit = self
            .commit(state, |s| {
                s.status = RunStatus::Running;
                let step = s.step_mut(SYNTHESIS_STEP);
                step.status = StepStatus::Running;
                step.attempts += 1;
                step.error = None;
                step.started_at = Some(started);
            })
            .await?;
        if commit == Commit::Superseded {
            return Ok(commit);
        }

        let result = match deadline {
            Some(deadline) => {
                match tokio::time::timeout_at(deadline, self.synthesize(state)).await {
                    Ok(result) => result,
                    Err(_) => return self.fail_on_deadline(state).await,
                }
            }
            None => self.synthesize(state).await,
        };

        let finished = Utc::now();
        match result {
            Ok(itinerary) => {
                let commit = self
                    .commit(state, |s| {
                        let step = s.step_mut(SYNTHESIS_STEP);
                        step.status = StepStatus::Succeeded;
                        step.finished_at = Some(finished);
                        s.itinerary = Some(itinerary.clone());
                        s.failure = None;
                        s.status = if s.degraded_capabilities().is_empty() {
                            RunStatus::Completed
                        } else {
                            RunStatus::PartiallyFailed
                        };
                    })
                    .await?;
                log::info!(
                    "Run {} finished {} at revision {}",
                    state.run_id,
                    state.status,
                    state.revision
                );
                Ok(commit)
            }
            Err(e) => {
                log::error!("Run {} synthesis failed: {}", state.run_id, e);
                let message = e.to_string();
                self.commit(state, |s| {
                    let step = s.step_mut(SYNTHESIS_STEP);
                    step.status = StepStatus::Failed;
                    step.error = Some(message.clone());
                    step.finished_at = Some(finished);
                    s.status = RunStatus::Failed;
                    s.failure = Some(format!("{}: {}", SYNTHESIS_STEP, message));
                })
                .await
            }
        }
    }

    /// Merge the fan-out payloads, then let the drafting capability, if
    /// registered, rewrite the prose.
    async fn synthesize(&self, state: &WorkflowState) -> Result<Itinerary, SynthesisError> {
        let input = SynthesisInput::from_state(state)?;
        let mut itinerary = synthesis::synthesize(&state.request, &input)?;

        let draft = Capability::ItineraryDraft;
        if !self.registry.contains(draft).await {
            return Ok(itinerary);
        }

        let params = synthesis::draft_params(&state.request, &itinerary);
        let fingerprint = Fingerprint::derive(draft.name(), &params);
        let registry = self.registry.clone();
        let timeout = self.config.step_timeout;
        let drafted = self
            .cache
            .get_or_compute(&fingerprint, self.config.ttl(draft), move || async move {
                registry.invoke(draft, params, timeout).await
            })
            .await;

        let applied = match drafted {
            Ok(payload) => synthesis::apply_draft(&mut itinerary, &payload).map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };
        if let Err(e) = applied {
            log::warn!(
                "Run {} keeping deterministic itinerary text, draft unavailable: {}",
                state.run_id,
                e
            );
            synthesis::mark_degraded(&mut itinerary, draft);
        }

        Ok(itinerary)
    }

    async fn fail_on_deadline(&self, state: &mut WorkflowState) -> Result<Commit, PlannerError> {
        let timeout = self.config.run_timeout.unwrap_or_default();
        log::error!("Run {} exceeded its deadline of {:?}", state.run_id, timeout);

        let now = Utc::now();
        self.commit(state, |s| {
            for step in s.steps.values_mut() {
                if step.status == StepStatus::Running {
                    step.status = StepStatus::Failed;
                    step.error = Some(format!("run deadline of {:?} exceeded", timeout));
                    step.finished_at = Some(now);
                }
            }
            s.status = RunStatus::Failed;
            s.failure = Some(format!("Run timed out after {:?}", timeout));
        })
        .await
    }

    /// Apply `mutate` to a copy of `state` at the next revision and
    /// checkpoint it.
    ///
    /// On a revision conflict the latest checkpoint is reloaded. If it is
    /// terminal the run was finished elsewhere and this drive stops;
    /// otherwise the mutation is re-applied on top of it.
    pub async fn commit<F>(
        &self,
        state: &mut WorkflowState,
        mutate: F,
    ) -> Result<Commit, PlannerError>
    where
        F: Fn(&mut WorkflowState) + Send + Sync,
    {
        let mut conflicts = 0;
        loop {
            let mut next = state.clone();
            mutate(&mut next);
            next.revision = state.revision + 1;
            next.updated_at = Utc::now();

            match save_state(self.store.as_ref(), &next).await {
                Ok(()) => {
                    *state = next;
                    return Ok(Commit::Applied);
                }
                Err(StoreError::Conflict { latest, .. }) => {
                    conflicts += 1;
                    log::warn!(
                        "Run {} checkpoint conflict at revision {} (latest {}), reloading",
                        state.run_id,
                        next.revision,
                        latest
                    );

                    let reloaded = load_state(self.store.as_ref(), &state.run_id).await?;
                    if reloaded.is_terminal() {
                        log::info!(
                            "Run {} was already finished elsewhere ({})",
                            state.run_id,
                            reloaded.status
                        );
                        *state = reloaded;
                        return Ok(Commit::Superseded);
                    }
                    if conflicts >= MAX_CONFLICT_RETRIES {
                        return Err(PlannerError::ConflictUnresolved {
                            run_id: state.run_id.clone(),
                            attempts: conflicts,
                        });
                    }
                    *state = reloaded;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::cache::MemoryCacheStore;
    use crate::engine::checkpoint::MemoryCheckpointStore;
    use chrono::NaiveDate;
    use serde_json::json;

    fn executor(store: Arc<dyn CheckpointStore>) -> GraphExecutor {
        GraphExecutor::new(
            CapabilityRegistry::new(),
            Arc::new(ToolCache::new(Arc::new(MemoryCacheStore::new()))),
            store,
            ExecutorConfig::default(),
        )
    }

    fn request() -> TripRequest {
        TripRequest::new("北京", NaiveDate::from_ymd_opt(2025, 6, 1).unwrap(), 2)
    }

    #[tokio::test]
    async fn test_initialize_rejects_invalid_request() {
        let executor = executor(Arc::new(MemoryCheckpointStore::new()));
        let err = executor
            .initialize(TripRequest::new(" ", NaiveDate::from_ymd_opt(2025, 6, 1).unwrap(), 2))
            .await
            .unwrap_err();
        assert!(matches!(err, PlannerError::Validation(_)));
    }

    #[tokio::test]
    async fn test_initialize_saves_first_revision() {
        let store = Arc::new(MemoryCheckpointStore::new());
        let executor = executor(store.clone());

        let state = executor.initialize(request()).await.unwrap();
        assert_eq!(state.revision, 1);
        assert_eq!(state.status, RunStatus::Pending);
        assert_eq!(store.revisions(&state.run_id).await.unwrap(), vec![1]);
    }

    #[tokio::test]
    async fn test_commit_bumps_revision() {
        let store = Arc::new(MemoryCheckpointStore::new());
        let executor = executor(store.clone());
        let mut state = executor.initialize(request()).await.unwrap();

        let commit = executor
            .commit(&mut state, |s| s.status = RunStatus::Running)
            .await
            .unwrap();
        assert_eq!(commit, Commit::Applied);
        assert_eq!(state.revision, 2);

        let loaded = load_state(store.as_ref(), &state.run_id).await.unwrap();
        assert_eq!(loaded.status, RunStatus::Running);
    }

    #[tokio::test]
    async fn test_commit_reapplies_on_conflict() {
        let store = Arc::new(MemoryCheckpointStore::new());
        let executor = executor(store.clone());
        let mut state = executor.initialize(request()).await.unwrap();

        // A second writer moves the run forward behind our back
        let mut other = state.clone();
        other.revision = 2;
        other.status = RunStatus::Running;
        other.step_mut("weather").payload = Some(json!({"forecast": []}));
        save_state(store.as_ref(), &other).await.unwrap();

        let commit = executor
            .commit(&mut state, |s| s.step_mut("lodging").attempts = 9)
            .await
            .unwrap();
        assert_eq!(commit, Commit::Applied);
        assert_eq!(state.revision, 3);
        // Both writers' changes survive
        assert_eq!(state.step("lodging").unwrap().attempts, 9);
        assert!(state.step("weather").unwrap().payload.is_some());
    }

    #[tokio::test]
    async fn test_commit_superseded_by_terminal_run() {
        let store = Arc::new(MemoryCheckpointStore::new());
        let executor = executor(store.clone());
        let mut state = executor.initialize(request()).await.unwrap();

        let mut other = state.clone();
        other.revision = 5;
        other.status = RunStatus::Completed;
        save_state(store.as_ref(), &other).await.unwrap();

        let commit = executor
            .commit(&mut state, |s| s.status = RunStatus::Running)
            .await
            .unwrap();
        assert_eq!(commit, Commit::Superseded);
        assert_eq!(state.status, RunStatus::Completed);
        assert_eq!(state.revision, 5);
    }

    #[tokio::test]
    async fn test_drive_terminal_run_is_noop() {
        let store = Arc::new(MemoryCheckpointStore::new());
        let executor = executor(store.clone());
        let mut state = executor.initialize(request()).await.unwrap();
        executor
            .commit(&mut state, |s| s.status = RunStatus::Failed)
            .await
            .unwrap();

        let driven = executor.drive(state.clone()).await.unwrap();
        assert_eq!(driven, state);
        assert_eq!(store.revisions(&state.run_id).await.unwrap(), vec![1, 2]);
    }

    #[tokio::test]
    async fn test_unregistered_required_capability_fails_run() {
        let executor = executor(Arc::new(MemoryCheckpointStore::new()));
        let state = executor.run(request()).await.unwrap();

        // Weather degrades to its default; the other two have no provider
        assert_eq!(state.status, RunStatus::Failed);
        assert!(state.itinerary.is_none());
        assert_eq!(state.step("weather").unwrap().status, StepStatus::Skipped);
        assert_eq!(state.step("lodging").unwrap().status, StepStatus::Failed);
        assert_eq!(
            state.step(SYNTHESIS_STEP).unwrap().status,
            StepStatus::NotStarted
        );
        let failure = state.failure.unwrap();
        assert!(failure.contains("lodging"));
        assert!(failure.contains("point_of_interest"));
    }
}
