// SPDX-License-Identifier: MIT

//! Settings loading
//!
//! Layers, later wins: built-in defaults, an optional YAML file, then
//! `TRIPWEAVE_*` environment variables.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::capability::Capability;
use super::graph::ExecutorConfig;
use crate::engine::error::PlannerError;
use crate::engine::retry::{RetryConfig, RetryPolicy};

/// File picked up when no explicit path is given
pub const DEFAULT_CONFIG_FILE: &str = "tripweave.yaml";

const ENV_PREFIX: &str = "TRIPWEAVE_";

/// HTTP endpoint serving one capability
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub endpoint: String,
    /// Name of the environment variable holding the bearer token
    #[serde(default)]
    pub api_key_env: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub host: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub log_level: String,
    pub cache_enabled: bool,
    pub cache_ttl_default_secs: u64,
    pub cache_ttl_poi_secs: u64,
    pub cache_ttl_weather_secs: u64,
    pub cache_ttl_lodging_secs: u64,
    pub retry: RetryConfig,
    pub step_timeout_secs: u64,
    pub run_timeout_secs: Option<u64>,
    pub max_travel_days: u32,
    pub providers: BTreeMap<Capability, ProviderConfig>,
    /// Capabilities allowed to fall back to their default payload
    pub degraded_defaults: Vec<Capability>,
    /// Serve capabilities without a configured endpoint from canned data
    pub offline_providers: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
            data_dir: PathBuf::from("./data"),
            log_level: "info".to_string(),
            cache_enabled: true,
            cache_ttl_default_secs: 3600,
            cache_ttl_poi_secs: 7200,
            cache_ttl_weather_secs: 1800,
            cache_ttl_lodging_secs: 7200,
            retry: RetryConfig::default(),
            step_timeout_secs: 60,
            run_timeout_secs: None,
            max_travel_days: 30,
            providers: BTreeMap::new(),
            degraded_defaults: vec![Capability::Weather],
            offline_providers: true,
        }
    }
}

impl Settings {
    /// Load settings from `path`, or from `tripweave.yaml` when it exists,
    /// then apply environment overrides and validate.
    pub fn load(path: Option<&Path>) -> Result<Self, PlannerError> {
        let mut settings = match path {
            Some(path) => Self::from_file(path)?,
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                Self::from_file(Path::new(DEFAULT_CONFIG_FILE))?
            }
            None => Self::default(),
        };

        settings.apply_overrides(|key| std::env::var(key).ok())?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_file(path: &Path) -> Result<Self, PlannerError> {
        let content = fs::read_to_string(path).map_err(|e| {
            PlannerError::config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::parse_yaml(&content)
    }

    pub fn parse_yaml(content: &str) -> Result<Self, PlannerError> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Apply `TRIPWEAVE_*` overrides read through `lookup`
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), PlannerError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(&format!("{}{}", ENV_PREFIX, name));

        if let Some(v) = get("DATA_DIR") {
            self.data_dir = PathBuf::from(v);
        }
        if let Some(v) = get("PORT") {
            self.port = parse_env("PORT", &v)?;
        }
        if let Some(v) = get("MAX_ATTEMPTS") {
            self.retry.max_attempts = parse_env("MAX_ATTEMPTS", &v)?;
        }
        if let Some(v) = get("STEP_TIMEOUT_SECS") {
            self.step_timeout_secs = parse_env("STEP_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = get("RUN_TIMEOUT_SECS") {
            self.run_timeout_secs = if v.trim().is_empty() {
                None
            } else {
                Some(parse_env("RUN_TIMEOUT_SECS", &v)?)
            };
        }
        if let Some(v) = get("CACHE_ENABLED") {
            self.cache_enabled = parse_env("CACHE_ENABLED", &v)?;
        }
        if let Some(v) = get("LOG_LEVEL") {
            self.log_level = v;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), PlannerError> {
        if self.retry.max_attempts == 0 {
            return Err(PlannerError::config("retry.max_attempts must be at least 1"));
        }
        if self.step_timeout_secs == 0 {
            return Err(PlannerError::config("step_timeout_secs must be positive"));
        }
        if self.run_timeout_secs == Some(0) {
            return Err(PlannerError::config("run_timeout_secs must be positive when set"));
        }
        if self.max_travel_days == 0 {
            return Err(PlannerError::config("max_travel_days must be at least 1"));
        }
        Ok(())
    }

    pub fn cache_ttl(&self, capability: Capability) -> Duration {
        let secs = match capability {
            Capability::PointOfInterest => self.cache_ttl_poi_secs,
            Capability::Weather => self.cache_ttl_weather_secs,
            Capability::Lodging => self.cache_ttl_lodging_secs,
            Capability::ItineraryDraft => self.cache_ttl_default_secs,
        };
        Duration::from_secs(secs)
    }

    pub fn checkpoint_db(&self) -> PathBuf {
        self.data_dir.join("checkpoints.db")
    }

    pub fn cache_db(&self) -> PathBuf {
        self.data_dir.join("cache.db")
    }

    /// Executor settings derived from these settings
    pub fn executor_config(&self) -> ExecutorConfig {
        let mut config = ExecutorConfig::default()
            .with_step_timeout(Duration::from_secs(self.step_timeout_secs))
            .with_run_timeout(self.run_timeout_secs.map(Duration::from_secs))
            .with_max_travel_days(self.max_travel_days);

        for capability in Capability::ALL {
            let fallback = self
                .degraded_defaults
                .contains(&capability)
                .then(|| capability.default_payload());
            config = config
                .with_policy(
                    capability,
                    RetryPolicy::from_config(&self.retry).with_fallback(fallback),
                )
                .with_ttl(capability, self.cache_ttl(capability));
        }
        config
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> Result<T, PlannerError> {
    value.trim().parse().map_err(|_| {
        PlannerError::config(format!("{}{} has an invalid value: {}", ENV_PREFIX, name, value))
    })
}
