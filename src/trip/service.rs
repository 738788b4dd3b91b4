// SPDX-License-Identifier: MIT

//! Run submission surface shared by the CLI and the HTTP server

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use super::config::Settings;
use super::graph::GraphExecutor;
use super::registry::CapabilityRegistry;
use super::state::{load_state, RunSummary, WorkflowState};
use super::tools;
use super::types::TripRequest;
use crate::engine::cache::{SqliteCacheStore, ToolCache};
use crate::engine::checkpoint::SqliteCheckpointStore;
use crate::engine::error::PlannerError;

/// Marks a run as being driven in this process until dropped
struct ActiveRun {
    active: Arc<Mutex<HashSet<String>>>,
    run_id: String,
}

impl Drop for ActiveRun {
    fn drop(&mut self) {
        if let Ok(mut active) = self.active.lock() {
            active.remove(&self.run_id);
        }
    }
}

#[derive(Clone)]
pub struct PlanningService {
    executor: Arc<GraphExecutor>,
    active: Arc<Mutex<HashSet<String>>>,
}

impl PlanningService {
    pub fn new(executor: GraphExecutor) -> Self {
        Self {
            executor: Arc::new(executor),
            active: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Build a service with SQLite-backed checkpoints and cache under
    /// `settings.data_dir` and the configured providers.
    pub async fn from_settings(settings: &Settings) -> Result<Self, PlannerError> {
        let checkpoints = SqliteCheckpointStore::open(&settings.checkpoint_db())?;
        let cache_store = SqliteCacheStore::open(&settings.cache_db())?;
        let cache = ToolCache::new(Arc::new(cache_store)).with_enabled(settings.cache_enabled);

        match cache.purge_expired() {
            Ok(_) => {}
            Err(e) => log::warn!("Failed to purge expired cache entries: {}", e),
        }

        let registry = CapabilityRegistry::new();
        tools::register_providers(&registry, settings).await?;

        let executor = GraphExecutor::new(
            registry,
            Arc::new(cache),
            Arc::new(checkpoints),
            settings.executor_config(),
        );
        Ok(Self::new(executor))
    }

    pub fn executor(&self) -> &GraphExecutor {
        &self.executor
    }

    fn claim(&self, run_id: &str) -> Option<ActiveRun> {
        let mut active = match self.active.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if !active.insert(run_id.to_string()) {
            return None;
        }
        Some(ActiveRun {
            active: Arc::clone(&self.active),
            run_id: run_id.to_string(),
        })
    }

    fn spawn_drive(&self, state: WorkflowState, claim: ActiveRun) {
        let executor = Arc::clone(&self.executor);
        tokio::spawn(async move {
            let _claim = claim;
            let run_id = state.run_id.clone();
            match executor.drive(state).await {
                Ok(state) => log::info!("Run {} ended {}", run_id, state.status),
                Err(e) => log::error!("Run {} stopped with error: {}", run_id, e),
            }
        });
    }

    /// Validate and persist a new run, then drive it in the background.
    /// Returns the run id as soon as the first checkpoint is written.
    pub async fn create_run(&self, request: TripRequest) -> Result<String, PlannerError> {
        let state = self.executor.initialize(request).await?;
        let run_id = state.run_id.clone();
        if let Some(claim) = self.claim(&run_id) {
            self.spawn_drive(state, claim);
        }
        Ok(run_id)
    }

    /// Create a run and drive it to a terminal status before returning
    pub async fn plan(&self, request: TripRequest) -> Result<WorkflowState, PlannerError> {
        let state = self.executor.initialize(request).await?;
        let _claim = self.claim(&state.run_id);
        self.executor.drive(state).await
    }

    pub async fn get_run(&self, run_id: &str) -> Result<WorkflowState, PlannerError> {
        Ok(load_state(self.executor.store().as_ref(), run_id).await?)
    }

    pub async fn get_run_status(&self, run_id: &str) -> Result<RunSummary, PlannerError> {
        Ok(self.get_run(run_id).await?.summary())
    }

    /// Resume an interrupted run in the background.
    ///
    /// A no-op when the run is terminal or already being driven here.
    pub async fn resume_run(&self, run_id: &str) -> Result<RunSummary, PlannerError> {
        let state = self.get_run(run_id).await?;
        if state.is_terminal() {
            log::info!("Run {} already {}, nothing to resume", run_id, state.status);
            return Ok(state.summary());
        }

        let summary = state.summary();
        match self.claim(run_id) {
            Some(claim) => {
                log::info!("Resuming run {} from revision {}", run_id, state.revision);
                self.spawn_drive(state, claim);
            }
            None => log::info!("Run {} is already running", run_id),
        }
        Ok(summary)
    }

    /// Resume and wait for the run to become terminal.
    ///
    /// Returns the stored state untouched when the run is already being driven here.
    pub async fn resume_to_completion(&self, run_id: &str) -> Result<WorkflowState, PlannerError> {
        let Some(_claim) = self.claim(run_id) else {
            log::info!("Run {} is already running", run_id);
            return self.get_run(run_id).await;
        };
        self.executor.resume(run_id).await
    }

    pub async fn list_runs(&self) -> Result<Vec<String>, PlannerError> {
        Ok(self.executor.store().list_runs().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::cache::MemoryCacheStore;
    use crate::engine::checkpoint::MemoryCheckpointStore;
    use crate::engine::error::StoreError;
    use crate::trip::graph::ExecutorConfig;
    use crate::trip::state::RunStatus;
    use crate::trip::tools::offline::OfflineTool;
    use crate::trip::capability::Capability;
    use chrono::NaiveDate;
    use std::time::Duration;

    async fn offline_service() -> PlanningService {
        let registry = CapabilityRegistry::new();
        for cap in [
            Capability::PointOfInterest,
            Capability::Weather,
            Capability::Lodging,
        ] {
            registry.register(cap, Arc::new(OfflineTool::new(cap))).await;
        }
        PlanningService::new(GraphExecutor::new(
            registry,
            Arc::new(ToolCache::new(Arc::new(MemoryCacheStore::new()))),
            Arc::new(MemoryCheckpointStore::new()),
            ExecutorConfig::default(),
        ))
    }

    fn request() -> TripRequest {
        TripRequest::new("杭州", NaiveDate::from_ymd_opt(2025, 10, 1).unwrap(), 2)
    }

    async fn wait_terminal(service: &PlanningService, run_id: &str) -> RunSummary {
        for _ in 0..200 {
            let summary = service.get_run_status(run_id).await.unwrap();
            if summary.status.is_terminal() {
                return summary;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("run {run_id} did not finish");
    }

    #[tokio::test]
    async fn test_plan_runs_to_completion() {
        let service = offline_service().await;
        let state = service.plan(request()).await.unwrap();
        assert_eq!(state.status, RunStatus::Completed);
        assert_eq!(state.itinerary.unwrap().days.len(), 2);
    }

    #[tokio::test]
    async fn test_create_run_drives_in_background() {
        let service = offline_service().await;
        let run_id = service.create_run(request()).await.unwrap();

        let summary = wait_terminal(&service, &run_id).await;
        assert_eq!(summary.status, RunStatus::Completed);
        assert!(summary.has_itinerary);
        assert_eq!(service.list_runs().await.unwrap(), vec![run_id]);
    }

    #[tokio::test]
    async fn test_resume_terminal_run_is_noop() {
        let service = offline_service().await;
        let state = service.plan(request()).await.unwrap();

        let summary = service.resume_run(&state.run_id).await.unwrap();
        assert_eq!(summary.revision, state.revision);
        assert_eq!(summary.status, RunStatus::Completed);
    }

    #[tokio::test]
    async fn test_resume_to_completion_skips_claimed_run() {
        let service = offline_service().await;
        let state = service.executor().initialize(request()).await.unwrap();
        let _held = service.claim(&state.run_id).unwrap();

        let current = service.resume_to_completion(&state.run_id).await.unwrap();
        assert_eq!(current.status, RunStatus::Pending);
        assert_eq!(current.revision, state.revision);
        assert!(current.itinerary.is_none());
    }

    #[tokio::test]
    async fn test_resume_to_completion_finishes_pending_run() {
        let service = offline_service().await;
        let state = service.executor().initialize(request()).await.unwrap();

        let done = service.resume_to_completion(&state.run_id).await.unwrap();
        assert_eq!(done.status, RunStatus::Completed);
        assert!(service.claim(&state.run_id).is_some());
    }

    #[tokio::test]
    async fn test_unknown_run() {
        let service = offline_service().await;
        let err = service.get_run_status("missing").await.unwrap_err();
        assert!(matches!(err, PlannerError::Store(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_invalid_request_creates_no_run() {
        let service = offline_service().await;
        let mut bad = request();
        bad.days = 5;
        assert!(matches!(
            service.create_run(bad).await,
            Err(PlannerError::Validation(_))
        ));
        assert!(service.list_runs().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_from_settings_uses_data_dir() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings {
            data_dir: dir.path().to_path_buf(),
            ..Settings::default()
        };
        let service = PlanningService::from_settings(&settings).await.unwrap();
        let state = service.plan(request()).await.unwrap();

        assert!(state.status.is_terminal());
        assert!(settings.checkpoint_db().exists());
        assert!(settings.cache_db().exists());
    }
}
