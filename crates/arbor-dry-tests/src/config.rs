// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! In-memory config store fake for testing without filesystem I/O.

use arbor_core::{ConfigError, ConfigStore};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// In-memory implementation of [`ConfigStore`] for testing.
///
/// Clones share storage, so a test can hand one clone to a
/// [`arbor_core::ConfigService`] and inspect the other.
///
/// # Example
///
/// ```
/// use arbor_dry_tests::InMemoryConfigStore;
/// use arbor_core::{ConfigService, EngineConfig, ENGINE_CONFIG_KEY};
///
/// let store = InMemoryConfigStore::new();
/// let service = ConfigService::new(store.clone());
///
/// service.save(ENGINE_CONFIG_KEY, &EngineConfig::default()).unwrap();
/// assert_eq!(store.save_count(), 1);
/// assert!(store.contains_key(ENGINE_CONFIG_KEY));
/// ```
#[derive(Clone, Default)]
pub struct InMemoryConfigStore {
    inner: Arc<Mutex<InMemoryConfigStoreInner>>,
}

#[derive(Default)]
struct InMemoryConfigStoreInner {
    data: HashMap<String, Vec<u8>>,
    load_count: usize,
    save_count: usize,
    fail_on_load: bool,
    fail_on_save: bool,
}

impl InMemoryConfigStore {
    /// Create a new empty in-memory config store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store holding one raw blob.
    pub fn with_raw(key: &str, data: &[u8]) -> Self {
        let store = Self::new();
        store.lock().data.insert(key.to_owned(), data.to_vec());
        store
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, InMemoryConfigStoreInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Configure the store to fail on load operations.
    pub fn set_fail_on_load(&self, fail: bool) {
        self.lock().fail_on_load = fail;
    }

    /// Configure the store to fail on save operations.
    pub fn set_fail_on_save(&self, fail: bool) {
        self.lock().fail_on_save = fail;
    }

    /// Number of `load_raw` attempts, failed ones included.
    pub fn load_count(&self) -> usize {
        self.lock().load_count
    }

    /// Number of `save_raw` attempts, failed ones included.
    pub fn save_count(&self) -> usize {
        self.lock().save_count
    }

    /// Check if a key exists in the store.
    pub fn contains_key(&self, key: &str) -> bool {
        self.lock().data.contains_key(key)
    }

    /// Raw bytes stored under `key`.
    pub fn raw(&self, key: &str) -> Option<Vec<u8>> {
        self.lock().data.get(key).cloned()
    }
}

impl ConfigStore for InMemoryConfigStore {
    fn load_raw(&self, key: &str) -> Result<Vec<u8>, ConfigError> {
        let mut inner = self.lock();
        inner.load_count += 1;

        if inner.fail_on_load {
            return Err(ConfigError::Other("simulated load failure".into()));
        }

        inner.data.get(key).cloned().ok_or(ConfigError::NotFound)
    }

    fn save_raw(&self, key: &str, data: &[u8]) -> Result<(), ConfigError> {
        let mut inner = self.lock();
        inner.save_count += 1;

        if inner.fail_on_save {
            return Err(ConfigError::Other("simulated save failure".into()));
        }

        inner.data.insert(key.to_string(), data.to_vec());
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use arbor_core::{ConfigService, EngineConfig, ENGINE_CONFIG_KEY};

    #[test]
    fn missing_engine_config_loads_defaults() {
        let service = ConfigService::new(InMemoryConfigStore::new());
        assert_eq!(service.load_engine().unwrap(), EngineConfig::default());
    }

    #[test]
    fn saved_engine_config_round_trips_through_the_service() {
        let store = InMemoryConfigStore::new();
        let service = ConfigService::new(store.clone());
        let config = EngineConfig {
            frame_budget_ms: 16,
            max_units_per_slice: Some(64),
            ..EngineConfig::default()
        };
        service.save(ENGINE_CONFIG_KEY, &config).unwrap();
        assert_eq!(service.load_engine().unwrap(), config);
        assert_eq!(store.load_count(), 1);
    }

    #[test]
    fn stored_invalid_config_is_rejected() {
        let store = InMemoryConfigStore::with_raw(ENGINE_CONFIG_KEY, br#"{"max_interruptions": 0}"#);
        let service = ConfigService::new(store);
        assert!(matches!(service.load_engine(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn failures_are_simulated() {
        let store = InMemoryConfigStore::new();
        store.set_fail_on_save(true);
        assert!(matches!(store.save_raw("k", b"v"), Err(ConfigError::Other(_))));
        store.set_fail_on_load(true);
        let service = ConfigService::new(store.clone());
        assert!(matches!(service.load_engine(), Err(ConfigError::Other(_))));
        assert_eq!(store.save_count(), 1);
    }

    #[derive(serde::Serialize, serde::Deserialize, PartialEq, Debug)]
    struct Prefs {
        theme: String,
    }

    #[test]
    fn arbitrary_values_round_trip() {
        let service = ConfigService::new(InMemoryConfigStore::new());
        let prefs = Prefs {
            theme: "dark".into(),
        };
        service.save("prefs", &prefs).unwrap();
        assert_eq!(service.load::<Prefs>("prefs").unwrap(), Some(prefs));
    }
}
