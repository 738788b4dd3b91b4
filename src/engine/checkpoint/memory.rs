// SPDX-License-Identifier: MIT

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::{Checkpoint, CheckpointStore};
use crate::engine::error::StoreError;

/// Append-only in-process checkpoint store
#[derive(Default)]
pub struct MemoryCheckpointStore {
    runs: RwLock<HashMap<String, Vec<Checkpoint>>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn save(&self, run_id: &str, revision: u64, snapshot: Value) -> Result<(), StoreError> {
        let mut runs = self.runs.write().await;
        let history = runs.entry(run_id.to_string()).or_default();

        if let Some(latest) = history.last() {
            if latest.revision >= revision {
                return Err(StoreError::Conflict {
                    run_id: run_id.to_string(),
                    attempted: revision,
                    latest: latest.revision,
                });
            }
        }

        history.push(Checkpoint {
            run_id: run_id.to_string(),
            revision,
            snapshot,
            created_at: Utc::now(),
        });
        Ok(())
    }

    async fn load_latest(&self, run_id: &str) -> Result<Checkpoint, StoreError> {
        let runs = self.runs.read().await;
        runs.get(run_id)
            .and_then(|history| history.last())
            .cloned()
            .ok_or_else(|| StoreError::NotFound(run_id.to_string()))
    }

    async fn list_runs(&self) -> Result<Vec<String>, StoreError> {
        let runs = self.runs.read().await;
        let mut ids: Vec<String> = runs
            .iter()
            .filter(|(_, history)| !history.is_empty())
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        Ok(ids)
    }

    async fn revisions(&self, run_id: &str) -> Result<Vec<u64>, StoreError> {
        let runs = self.runs.read().await;
        Ok(runs
            .get(run_id)
            .map(|history| history.iter().map(|cp| cp.revision).collect())
            .unwrap_or_default())
    }
}
