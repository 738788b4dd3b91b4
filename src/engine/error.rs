// SPDX-License-Identifier: MIT

//! Typed error handling for tripweave-rs
//!
//! Each concern gets its own error enum; [`PlannerError`] aggregates them
//! for callers that sit above the executor (service, server, CLI).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Top-level error type for tripweave-rs
#[derive(Debug, Error)]
pub enum PlannerError {
    /// Malformed trip request, rejected before a run exists
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// External provider failure that escaped the retry/degrade path
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    /// Checkpoint or cache persistence failure
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// No feasible itinerary could be produced
    #[error("Synthesis error: {0}")]
    Synthesis(#[from] SynthesisError),

    /// Configuration errors (bad file, invalid values)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Checkpoint races that could not be resolved by reloading
    #[error("Run {run_id} kept conflicting after {attempts} reload attempts")]
    ConflictUnresolved { run_id: String, attempts: u32 },

    /// I/O errors
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
}

impl PlannerError {
    /// Create a config error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }
}

/// A field of the trip request failed validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Whether a provider failure is worth retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderErrorKind {
    /// Network trouble, rate limits, deadline expiry
    Transient,
    /// Bad request, unsupported operation
    Permanent,
}

impl fmt::Display for ProviderErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderErrorKind::Transient => write!(f, "transient"),
            ProviderErrorKind::Permanent => write!(f, "permanent"),
        }
    }
}

/// Failure reported by a provider adapter through the tool interface.
///
/// Cloneable so a single failed computation can be handed to every caller
/// waiting on the same cache fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{kind} provider error [{code}]: {message}")]
pub struct ProviderError {
    pub kind: ProviderErrorKind,
    pub code: String,
    pub message: String,
}

impl ProviderError {
    pub fn transient(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: ProviderErrorKind::Transient,
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn permanent(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: ProviderErrorKind::Permanent,
            code: code.into(),
            message: message.into(),
        }
    }

    /// Deadline expiry is treated exactly like a transient failure
    pub fn timeout(after: Duration) -> Self {
        Self::transient("timeout", format!("deadline of {:?} expired", after))
    }

    pub fn is_transient(&self) -> bool {
        self.kind == ProviderErrorKind::Transient
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return Self::transient("timeout", err.to_string());
        }
        if err.is_connect() || err.is_request() {
            return Self::transient("network", err.to_string());
        }
        if err.is_decode() {
            return Self::permanent("invalid_payload", err.to_string());
        }
        match err.status() {
            Some(status) if status.as_u16() == 429 || status.is_server_error() => {
                Self::transient(status.as_u16().to_string(), err.to_string())
            }
            Some(status) => Self::permanent(status.as_u16().to_string(), err.to_string()),
            None => Self::transient("http", err.to_string()),
        }
    }
}

impl From<serde_json::Error> for ProviderError {
    fn from(err: serde_json::Error) -> Self {
        Self::permanent("invalid_payload", err.to_string())
    }
}

/// Persistence errors for checkpoints and cache entries
#[derive(Debug, Error)]
pub enum StoreError {
    /// A checkpoint at or beyond the attempted revision already exists
    #[error("Checkpoint conflict for run {run_id}: attempted revision {attempted}, latest is {latest}")]
    Conflict {
        run_id: String,
        attempted: u64,
        latest: u64,
    },

    /// No checkpoint recorded for the run
    #[error("Run not found: {0}")]
    NotFound(String),

    /// Backend failure (database, poisoned lock)
    #[error("Store backend error: {0}")]
    Backend(String),

    /// Snapshot could not be (de)serialized
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Backend(err.to_string())
    }
}

/// Planner synthesis failures. These are surfaced, never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SynthesisError {
    /// Nothing to visit, so no day can be filled
    #[error("No attractions available for {city}; relax preferences or pick another destination")]
    NoAttractions { city: String },

    /// A fan-out payload did not match the expected contract
    #[error("Malformed {capability} payload: {message}")]
    MalformedPayload { capability: String, message: String },

    /// Synthesis was reached without a payload it depends on
    #[error("Missing input from step '{0}'")]
    MissingInput(String),
}
