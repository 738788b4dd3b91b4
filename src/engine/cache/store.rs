// SPDX-License-Identifier: MIT

//! Key-value persistence for cached tool payloads

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, RwLock};

use super::fingerprint::Fingerprint;
use crate::engine::error::StoreError;

/// A cached payload and the instant it stops being valid
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub fingerprint: Fingerprint,
    pub payload: Value,
    pub expires_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Storage backend for cache entries. Pure key-value semantics.
pub trait CacheStore: Send + Sync {
    fn get(&self, fingerprint: &Fingerprint) -> Result<Option<CacheEntry>, StoreError>;

    /// Insert or replace the entry for its fingerprint
    fn put(&self, entry: CacheEntry) -> Result<(), StoreError>;

    /// Returns whether an entry was removed
    fn remove(&self, fingerprint: &Fingerprint) -> Result<bool, StoreError>;

    /// Drop every entry expired at `now`; returns how many were dropped
    fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize, StoreError>;
}

/// Process-local cache store
#[derive(Default)]
pub struct MemoryCacheStore {
    entries: RwLock<HashMap<Fingerprint, CacheEntry>>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Fixed-width UTC timestamps compare correctly as text
fn stamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn poisoned<T>(err: std::sync::PoisonError<T>) -> StoreError {
    StoreError::Backend(err.to_string())
}

impl CacheStore for MemoryCacheStore {
    fn get(&self, fingerprint: &Fingerprint) -> Result<Option<CacheEntry>, StoreError> {
        let entries = self.entries.read().map_err(poisoned)?;
        Ok(entries.get(fingerprint).cloned())
    }

    fn put(&self, entry: CacheEntry) -> Result<(), StoreError> {
        let mut entries = self.entries.write().map_err(poisoned)?;
        entries.insert(entry.fingerprint.clone(), entry);
        Ok(())
    }

    fn remove(&self, fingerprint: &Fingerprint) -> Result<bool, StoreError> {
        let mut entries = self.entries.write().map_err(poisoned)?;
        Ok(entries.remove(fingerprint).is_some())
    }

    fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let mut entries = self.entries.write().map_err(poisoned)?;
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now));
        Ok(before - entries.len())
    }
}

/// Cache store backed by SQLite, shared by every run of the process
pub struct SqliteCacheStore {
    conn: Mutex<Connection>,
}

impl SqliteCacheStore {
    /// Open or create the cache database.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::Backend(format!("Failed to create cache directory: {}", e)))?;
        }

        let conn = Connection::open(path)?;
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA synchronous=NORMAL;

             CREATE TABLE IF NOT EXISTS cache_entries (
                 fingerprint TEXT PRIMARY KEY,
                 payload TEXT NOT NULL,
                 expires_at TEXT NOT NULL
             );",
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl CacheStore for SqliteCacheStore {
    fn get(&self, fingerprint: &Fingerprint) -> Result<Option<CacheEntry>, StoreError> {
        let conn = self.conn.lock().map_err(poisoned)?;
        let row = conn
            .query_row(
                "SELECT payload, expires_at FROM cache_entries WHERE fingerprint = ?1",
                params![fingerprint.as_str()],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
            )
            .optional()?;

        let Some((payload, expires_at)) = row else {
            return Ok(None);
        };

        let expires_at = DateTime::parse_from_rfc3339(&expires_at)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| StoreError::Backend(format!("Corrupt expiry timestamp: {}", e)))?;

        Ok(Some(CacheEntry {
            fingerprint: fingerprint.clone(),
            payload: serde_json::from_str(&payload)?,
            expires_at,
        }))
    }

    fn put(&self, entry: CacheEntry) -> Result<(), StoreError> {
        let payload = serde_json::to_string(&entry.payload)?;
        let conn = self.conn.lock().map_err(poisoned)?;
        conn.execute(
            "INSERT OR REPLACE INTO cache_entries (fingerprint, payload, expires_at)
             VALUES (?1, ?2, ?3)",
            params![
                entry.fingerprint.as_str(),
                payload,
                stamp(entry.expires_at)
            ],
        )?;
        Ok(())
    }

    fn remove(&self, fingerprint: &Fingerprint) -> Result<bool, StoreError> {
        let conn = self.conn.lock().map_err(poisoned)?;
        let deleted = conn.execute(
            "DELETE FROM cache_entries WHERE fingerprint = ?1",
            params![fingerprint.as_str()],
        )?;
        Ok(deleted > 0)
    }

    fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let conn = self.conn.lock().map_err(poisoned)?;
        let deleted = conn.execute(
            "DELETE FROM cache_entries WHERE expires_at <= ?1",
            params![stamp(now)],
        )?;
        Ok(deleted)
    }
}
