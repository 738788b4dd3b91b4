// SPDX-License-Identifier: MIT

//! Versioned snapshots of workflow state
//!
//! Every committed transition of a run is saved as a new revision. Saving a
//! revision that is not strictly greater than the latest one is rejected with
//! [`StoreError::Conflict`]; this is the optimistic-concurrency check that
//! keeps two writers from silently overwriting each other.

mod memory;
mod sqlite;

pub use memory::MemoryCheckpointStore;
pub use sqlite::SqliteCheckpointStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::engine::error::StoreError;

/// One saved revision of a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub run_id: String,
    pub revision: u64,
    pub snapshot: Value,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Persist `snapshot` as `revision` of `run_id`.
    ///
    /// Fails with [`StoreError::Conflict`] when a checkpoint with the same or
    /// a higher revision already exists. Existing checkpoints are never
    /// mutated.
    async fn save(&self, run_id: &str, revision: u64, snapshot: Value) -> Result<(), StoreError>;

    /// Latest revision of `run_id`, or [`StoreError::NotFound`]
    async fn load_latest(&self, run_id: &str) -> Result<Checkpoint, StoreError>;

    /// Every run with at least one checkpoint
    async fn list_runs(&self) -> Result<Vec<String>, StoreError>;

    /// Saved revision numbers of `run_id`, ascending
    async fn revisions(&self, run_id: &str) -> Result<Vec<u64>, StoreError>;
}
