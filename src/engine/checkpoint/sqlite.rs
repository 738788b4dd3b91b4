// SPDX-License-Identifier: MIT

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use serde_json::Value;
use std::path::Path;
use std::sync::Mutex;

use super::{Checkpoint, CheckpointStore};
use crate::engine::error::StoreError;

/// Durable checkpoint store backed by SQLite.
///
/// `(run_id, revision)` is the primary key. The revision check and the
/// insert happen inside one IMMEDIATE transaction so two processes sharing
/// the file cannot both win the same revision.
pub struct SqliteCheckpointStore {
    conn: Mutex<Connection>,
}

impl SqliteCheckpointStore {
    /// Open or create the checkpoint database.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::Backend(format!("Failed to create checkpoint directory: {}", e))
            })?;
        }

        let conn = Connection::open(path)?;
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA synchronous=NORMAL;
             PRAGMA busy_timeout=5000;

             CREATE TABLE IF NOT EXISTS checkpoints (
                 run_id TEXT NOT NULL,
                 revision INTEGER NOT NULL,
                 snapshot TEXT NOT NULL,
                 created_at TEXT NOT NULL,
                 PRIMARY KEY (run_id, revision)
             );",
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|e| StoreError::Backend(e.to_string()))
    }
}

#[async_trait]
impl CheckpointStore for SqliteCheckpointStore {
    async fn save(&self, run_id: &str, revision: u64, snapshot: Value) -> Result<(), StoreError> {
        let snapshot = serde_json::to_string(&snapshot)?;
        let mut guard = self.lock()?;
        let tx = guard.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let latest: Option<i64> = tx.query_row(
            "SELECT MAX(revision) FROM checkpoints WHERE run_id = ?1",
            params![run_id],
            |row| row.get(0),
        )?;

        if let Some(latest) = latest {
            let latest = latest as u64;
            if latest >= revision {
                return Err(StoreError::Conflict {
                    run_id: run_id.to_string(),
                    attempted: revision,
                    latest,
                });
            }
        }

        tx.execute(
            "INSERT INTO checkpoints (run_id, revision, snapshot, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                run_id,
                revision as i64,
                snapshot,
                Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
            ],
        )?;
        tx.commit()?;
        Ok(())
    }

    async fn load_latest(&self, run_id: &str) -> Result<Checkpoint, StoreError> {
        let guard = self.lock()?;
        let row = guard
            .query_row(
                "SELECT revision, snapshot, created_at FROM checkpoints
                 WHERE run_id = ?1
                 ORDER BY revision DESC
                 LIMIT 1",
                params![run_id],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                },
            )
            .optional()?;

        let (revision, snapshot, created_at) =
            row.ok_or_else(|| StoreError::NotFound(run_id.to_string()))?;

        let created_at = DateTime::parse_from_rfc3339(&created_at)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| StoreError::Backend(format!("Corrupt checkpoint timestamp: {}", e)))?;

        Ok(Checkpoint {
            run_id: run_id.to_string(),
            revision: revision as u64,
            snapshot: serde_json::from_str(&snapshot)?,
            created_at,
        })
    }

    async fn list_runs(&self) -> Result<Vec<String>, StoreError> {
        let guard = self.lock()?;
        let mut stmt = guard.prepare("SELECT DISTINCT run_id FROM checkpoints ORDER BY run_id")?;
        let ids = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ids)
    }

    async fn revisions(&self, run_id: &str) -> Result<Vec<u64>, StoreError> {
        let guard = self.lock()?;
        let mut stmt = guard
            .prepare("SELECT revision FROM checkpoints WHERE run_id = ?1 ORDER BY revision")?;
        let revisions = stmt
            .query_map(params![run_id], |row| row.get::<_, i64>(0))?
            .map(|r| r.map(|rev| rev as u64))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(revisions)
    }
}
