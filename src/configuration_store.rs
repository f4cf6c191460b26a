//! A thread-safe in-memory storage for currently active configuration. [`ConfigurationStore`]
//! provides concurrent access for readers (e.g., flag evaluation) and writers (e.g., periodic
//! configuration fetcher).
use std::{
    sync::{Arc, Mutex, PoisonError, RwLock},
    time::Duration,
};

use chrono::Utc;

use crate::{
    decoder::Materialization, persistence::ConfigurationPersistence, ufc::Timestamp,
    Configuration,
};

/// Callback invoked after a configuration has been accepted by the store.
pub type ChangeListener = Box<dyn Fn(&Arc<Configuration>) + Send + Sync>;

/// `ConfigurationStore` provides a thread-safe (`Sync`) storage for Eppo configuration that allows
/// concurrent access for readers and writers.
///
/// `Configuration` itself is always immutable and can only be replaced completely.
#[derive(Default)]
pub struct ConfigurationStore {
    configuration: RwLock<Option<Arc<Configuration>>>,
    /// Held while a snapshot is swapped in, queued for persistence and announced, so the cache
    /// file and the listener observe snapshots in the order they were stored.
    publish: Mutex<()>,
    persistence: Option<ConfigurationPersistence>,
    change_listener: Option<ChangeListener>,
    materialization: Materialization,
}

impl ConfigurationStore {
    /// Create a new empty configuration store.
    pub fn new() -> Self {
        ConfigurationStore::default()
    }

    /// Persist every accepted configuration through `persistence` and hydrate from it in
    /// [`ConfigurationStore::load_initial_configuration`].
    pub fn with_persistence(mut self, persistence: ConfigurationPersistence) -> Self {
        self.persistence = Some(persistence);
        self
    }

    /// Invoke `listener` synchronously after every accepted configuration.
    ///
    /// The listener may read the store but must not set a configuration.
    pub fn with_change_listener(
        mut self,
        listener: impl Fn(&Arc<Configuration>) + Send + Sync + 'static,
    ) -> Self {
        self.change_listener = Some(Box::new(listener));
        self
    }

    /// Materialization used for configurations restored from disk.
    pub fn with_materialization(mut self, materialization: Materialization) -> Self {
        self.materialization = materialization;
        self
    }

    /// Get currently-active configuration. Returns None if configuration hasn't been fetched/stored
    /// yet.
    pub fn get_configuration(&self) -> Option<Arc<Configuration>> {
        // A poisoned lock still holds a complete snapshot: writers only ever swap the Arc.
        let configuration = self
            .configuration
            .read()
            .unwrap_or_else(PoisonError::into_inner);

        configuration.clone()
    }

    /// Set new configuration.
    ///
    /// The configuration is queued for persistence (if enabled) and the change listener is
    /// notified. Neither can fail the call.
    pub fn set_configuration(&self, config: Arc<Configuration>) {
        let _publish = self.publish.lock().unwrap_or_else(PoisonError::into_inner);
        {
            let mut configuration_slot = self
                .configuration
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            *configuration_slot = Some(config.clone());
        }

        if let Some(persistence) = &self.persistence {
            persistence.save(config.clone());
        }
        self.notify(&config);
    }

    /// Whether a configuration has been stored.
    pub fn is_initialized(&self) -> bool {
        self.get_configuration().is_some()
    }

    /// Whether the configuration is missing or older than `ttl`.
    pub fn is_expired(&self, ttl: Duration) -> bool {
        self.is_expired_at(ttl, Utc::now())
    }

    /// Same as [`ConfigurationStore::is_expired`] with an explicit current time.
    pub fn is_expired_at(&self, ttl: Duration, now: Timestamp) -> bool {
        let Some(configuration) = self.get_configuration() else {
            return true;
        };
        // A ttl too large to represent never expires.
        let Ok(ttl) = chrono::Duration::from_std(ttl) else {
            return false;
        };
        now.signed_duration_since(configuration.fetched_at) > ttl
    }

    /// Hydrate the store from the persisted configuration.
    ///
    /// Returns `true` if a configuration was restored. A missing or corrupt file leaves the store
    /// untouched, and so does a configuration that has been set in the meantime.
    pub fn load_initial_configuration(&self) -> bool {
        let Some(persistence) = &self.persistence else {
            return false;
        };
        let Some(configuration) = persistence.load(self.materialization) else {
            return false;
        };
        let configuration = Arc::new(configuration);

        let _publish = self.publish.lock().unwrap_or_else(PoisonError::into_inner);
        {
            let mut configuration_slot = self
                .configuration
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            if configuration_slot.is_some() {
                log::debug!(target: "eppo",
                            "configuration already set, ignoring cached configuration");
                return false;
            }
            *configuration_slot = Some(configuration.clone());
        }

        log::debug!(target: "eppo", "restored configuration from disk");
        self.notify(&configuration);
        true
    }

    /// Wait for pending writes to the on-disk cache.
    pub fn flush(&self) {
        if let Some(persistence) = &self.persistence {
            persistence.flush();
        }
    }

    fn notify(&self, configuration: &Arc<Configuration>) {
        if let Some(listener) = &self.change_listener {
            listener(configuration);
        }
    }
}
