// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Engine configuration and its storage port.
use std::time::Duration;

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;

/// Store key under which [`EngineConfig`] is persisted.
pub const ENGINE_CONFIG_KEY: &str = "engine";

/// Tunables for the work loop.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Time budget of one `perform_work` call before it yields.
    pub frame_budget_ms: u64,
    /// Interruptions after which a lane is promoted to `Immediate`.
    pub max_interruptions: u32,
    /// Time since first scheduling after which a lane is promoted.
    pub starvation_timeout_ms: u64,
    /// Optional cap on units per `perform_work` call.
    pub max_units_per_slice: Option<usize>,
    /// Detect changes in hook slot kinds between evaluations.
    pub check_hook_order: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            frame_budget_ms: 5,
            max_interruptions: 8,
            starvation_timeout_ms: 500,
            max_units_per_slice: None,
            check_hook_order: true,
        }
    }
}

impl EngineConfig {
    /// Parses and validates a JSON document. Missing fields take defaults.
    pub fn from_json(bytes: &[u8]) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_slice(bytes)?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects values the work loop cannot make progress with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.frame_budget_ms == 0 {
            return Err(ConfigError::Invalid("frame_budget_ms must be positive".into()));
        }
        if self.max_interruptions == 0 {
            return Err(ConfigError::Invalid("max_interruptions must be positive".into()));
        }
        if self.max_units_per_slice == Some(0) {
            return Err(ConfigError::Invalid("max_units_per_slice must be positive".into()));
        }
        Ok(())
    }

    /// `frame_budget_ms` as a duration.
    pub fn frame_budget(&self) -> Duration {
        Duration::from_millis(self.frame_budget_ms)
    }

    /// `starvation_timeout_ms` as a duration.
    pub fn starvation_timeout(&self) -> Duration {
        Duration::from_millis(self.starvation_timeout_ms)
    }
}

/// Storage port for raw config blobs (keyed by logical name).
pub trait ConfigStore {
    /// Load a raw config blob. Returns `NotFound` when missing.
    fn load_raw(&self, key: &str) -> Result<Vec<u8>, ConfigError>;
    /// Persist a raw config blob.
    fn save_raw(&self, key: &str, data: &[u8]) -> Result<(), ConfigError>;
}

/// Error type for config operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Key not present in store.
    #[error("not found")]
    NotFound,
    /// I/O error while reading/writing.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Serialization/deserialization failure.
    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),
    /// Value parsed but out of range.
    #[error("invalid config: {0}")]
    Invalid(String),
    /// Catch-all error variant.
    #[error("other: {0}")]
    Other(String),
}

/// Serializes config values as JSON and delegates storage to a [`ConfigStore`].
pub struct ConfigService<S> {
    store: S,
}

impl<S> ConfigService<S> {
    /// Create a new service using the given store.
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Consume the service and return the inner store.
    pub fn into_inner(self) -> S {
        self.store
    }
}

impl<S> ConfigService<S>
where
    S: ConfigStore,
{
    /// Load and deserialize a config value for `key`. Returns `Ok(None)` if missing.
    pub fn load<T>(&self, key: &str) -> Result<Option<T>, ConfigError>
    where
        T: DeserializeOwned,
    {
        match self.store.load_raw(key) {
            Ok(bytes) if bytes.is_empty() => Ok(None),
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(ConfigError::NotFound) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Serialize and persist a config value for `key`.
    pub fn save<T>(&self, key: &str, value: &T) -> Result<(), ConfigError>
    where
        T: Serialize,
    {
        let data = serde_json::to_vec_pretty(value)?;
        self.store.save_raw(key, &data)
    }

    /// Stored engine config, or the defaults when none is stored.
    pub fn load_engine(&self) -> Result<EngineConfig, ConfigError> {
        let config = self
            .load::<EngineConfig>(ENGINE_CONFIG_KEY)?
            .unwrap_or_default();
        config.validate()?;
        Ok(config)
    }
}
