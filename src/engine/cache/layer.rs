// SPDX-License-Identifier: MIT

//! Memoizing layer in front of the tool interface
//!
//! `ToolCache` keeps a map from fingerprint to the single in-flight
//! computation for it. Later callers clone the shared future instead of
//! starting their own external call. Only successful payloads are written
//! to the backing store.

use chrono::Utc;
use futures::future::{BoxFuture, FutureExt, Shared};
use serde::Serialize;
use serde_json::Value;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use super::fingerprint::Fingerprint;
use super::store::{CacheEntry, CacheStore};
use crate::engine::error::{ProviderError, StoreError};

type SharedComputation = Shared<BoxFuture<'static, Result<Value, ProviderError>>>;
type InFlightMap = Arc<Mutex<HashMap<Fingerprint, InFlight>>>;

struct InFlight {
    id: u64,
    computation: SharedComputation,
    waiters: usize,
}

fn lock(map: &InFlightMap) -> MutexGuard<'_, HashMap<Fingerprint, InFlight>> {
    match map.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// One caller waiting on an in-flight computation. When the last waiter
/// goes away before the computation finishes, the entry is dropped and
/// the computation with it.
struct Waiter {
    in_flight: InFlightMap,
    fingerprint: Fingerprint,
    id: u64,
}

impl Drop for Waiter {
    fn drop(&mut self) {
        let mut in_flight = lock(&self.in_flight);
        let abandoned = match in_flight.get_mut(&self.fingerprint) {
            Some(entry) if entry.id == self.id => {
                entry.waiters = entry.waiters.saturating_sub(1);
                entry.waiters == 0
            }
            _ => false,
        };
        if abandoned {
            log::debug!("Dropping abandoned computation for {}", self.fingerprint);
            in_flight.remove(&self.fingerprint);
        }
    }
}

/// Cache counters, snapshotted by [`ToolCache::stats`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Served from the store without computing
    pub hits: u64,
    /// Started a new computation
    pub misses: u64,
    /// Joined a computation already in flight
    pub coalesced: u64,
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    coalesced: AtomicU64,
}

/// Shared, injectable cache for tool invocations
pub struct ToolCache {
    store: Arc<dyn CacheStore>,
    in_flight: InFlightMap,
    next_id: AtomicU64,
    counters: Counters,
    enabled: bool,
}

impl ToolCache {
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self {
            store,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(0),
            counters: Counters::default(),
            enabled: true,
        }
    }

    /// A disabled cache never reads or writes the store but still
    /// collapses concurrent identical calls into one.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Return the cached payload for `fingerprint`, or run `compute` once.
    ///
    /// Concurrent callers with the same fingerprint share a single
    /// computation and all observe its result. A failed computation is
    /// handed to every waiter and is not cached.
    pub async fn get_or_compute<F, Fut>(
        &self,
        fingerprint: &Fingerprint,
        ttl: Duration,
        compute: F,
    ) -> Result<Value, ProviderError>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<Value, ProviderError>> + Send + 'static,
    {
        let (computation, _waiter) = {
            let mut in_flight = lock(&self.in_flight);

            // Checked under the in-flight lock: a finishing computation
            // stores its entry and leaves the map under the same lock.
            if self.enabled {
                match self.store.get(fingerprint) {
                    Ok(Some(entry)) if !entry.is_expired(Utc::now()) => {
                        self.counters.hits.fetch_add(1, Ordering::Relaxed);
                        log::debug!("Cache hit for {}", fingerprint);
                        return Ok(entry.payload);
                    }
                    Ok(_) => {}
                    Err(e) => log::warn!("Cache read failed for {}: {}", fingerprint, e),
                }
            }

            let entry = match in_flight.entry(fingerprint.clone()) {
                Entry::Occupied(occupied) => {
                    self.counters.coalesced.fetch_add(1, Ordering::Relaxed);
                    log::debug!("Joining in-flight computation for {}", fingerprint);
                    occupied.into_mut()
                }
                Entry::Vacant(vacant) => {
                    self.counters.misses.fetch_add(1, Ordering::Relaxed);
                    log::debug!("Cache miss for {}", fingerprint);
                    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                    vacant.insert(InFlight {
                        id,
                        computation: self.spawn_computation(fingerprint.clone(), id, ttl, compute()),
                        waiters: 0,
                    })
                }
            };
            entry.waiters += 1;

            let waiter = Waiter {
                in_flight: Arc::clone(&self.in_flight),
                fingerprint: fingerprint.clone(),
                id: entry.id,
            };
            (entry.computation.clone(), waiter)
        };

        computation.await
    }

    fn spawn_computation<Fut>(
        &self,
        fingerprint: Fingerprint,
        id: u64,
        ttl: Duration,
        compute: Fut,
    ) -> SharedComputation
    where
        Fut: Future<Output = Result<Value, ProviderError>> + Send + 'static,
    {
        let store = Arc::clone(&self.store);
        let in_flight = Arc::clone(&self.in_flight);
        let enabled = self.enabled;

        async move {
            let result = compute.await;

            let mut in_flight = lock(&in_flight);
            if enabled {
                if let Ok(payload) = &result {
                    let ttl = chrono::Duration::from_std(ttl)
                        .unwrap_or_else(|_| chrono::Duration::days(365));
                    let entry = CacheEntry {
                        fingerprint: fingerprint.clone(),
                        payload: payload.clone(),
                        expires_at: Utc::now() + ttl,
                    };
                    if let Err(e) = store.put(entry) {
                        log::warn!("Cache write failed for {}: {}", fingerprint, e);
                    }
                }
            }
            if in_flight.get(&fingerprint).map(|e| e.id) == Some(id) {
                in_flight.remove(&fingerprint);
            }

            result
        }
        .boxed()
        .shared()
    }

    /// Drop a cached entry so the next call recomputes
    pub fn invalidate(&self, fingerprint: &Fingerprint) -> Result<bool, StoreError> {
        self.store.remove(fingerprint)
    }

    /// Remove expired entries from the backing store
    pub fn purge_expired(&self) -> Result<usize, StoreError> {
        let purged = self.store.purge_expired(Utc::now())?;
        if purged > 0 {
            log::info!("Purged {} expired cache entries", purged);
        }
        Ok(purged)
    }

    /// Number of computations currently running
    pub fn in_flight(&self) -> usize {
        lock(&self.in_flight).len()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            coalesced: self.counters.coalesced.load(Ordering::Relaxed),
        }
    }
}
