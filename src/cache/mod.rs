//! Per-system cache of constructed container handlers.
//!
//! Each system id maps to the fingerprint of the configuration its handlers were
//! built from, plus the handlers themselves keyed by container type. An entry only
//! grows (one handler per type) until the system's configuration fingerprint
//! changes, at which point the caller takes the whole entry out, releases its
//! handlers and starts over. Nothing is evicted on a timer or by size: systems are
//! added about once per installation, so the cache lives as long as the process.
//!
//! # Concurrency
//!
//! The map is a [`DashMap`], so individual operations are safe from any task. There
//! is no mutual exclusion across a whole `get_handler` call though: two overlapping
//! requests for the same system can both see a stale fingerprint and both rebuild.
//! Callers that may issue such requests must serialize them per system id.
//!
//! No method holds a map guard when it returns, so none is ever held across `.await`.

use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::handlers::ContainerHandler;

/// Shared handle to a cached handler.
pub type SharedHandler = Arc<dyn ContainerHandler>;

/// Handlers built for one system from one configuration.
#[derive(Clone, Default)]
pub struct SystemHandlers {
    /// Fingerprint of the configuration the handlers were built from
    pub fingerprint: String,
    /// Handlers keyed by container type, in type order
    pub handlers: BTreeMap<String, SharedHandler>,
}

impl SystemHandlers {
    pub fn new(fingerprint: impl Into<String>) -> Self {
        Self {
            fingerprint: fingerprint.into(),
            handlers: BTreeMap::new(),
        }
    }
}

impl std::fmt::Debug for SystemHandlers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SystemHandlers")
            .field("fingerprint", &self.fingerprint)
            .field("types", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Process-wide handler store, keyed by system id.
#[derive(Default)]
pub struct HandlerCache {
    systems: DashMap<String, SystemHandlers>,
}

impl HandlerCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fingerprint stored for `system_id`, if the system has an entry.
    #[must_use]
    pub fn fingerprint(&self, system_id: &str) -> Option<String> {
        self.systems.get(system_id).map(|entry| entry.fingerprint.clone())
    }

    /// Removes and returns the entry for `system_id` if it was built from a
    /// different configuration than `fingerprint`.
    pub fn take_if_stale(&self, system_id: &str, fingerprint: &str) -> Option<SystemHandlers> {
        self.systems
            .remove_if(system_id, |_, entry| entry.fingerprint != fingerprint)
            .map(|(_, entry)| entry)
    }

    /// Creates the entry for `system_id` if missing and records `fingerprint` on it.
    pub fn ensure(&self, system_id: &str, fingerprint: &str) {
        let mut entry = self
            .systems
            .entry(system_id.to_string())
            .or_insert_with(|| SystemHandlers::new(fingerprint));
        if entry.fingerprint != fingerprint {
            entry.fingerprint = fingerprint.to_string();
        }
    }

    /// Cached handler of `container_type` for `system_id`.
    #[must_use]
    pub fn handler(&self, system_id: &str, container_type: &str) -> Option<SharedHandler> {
        self.systems
            .get(system_id)
            .and_then(|entry| entry.handlers.get(container_type).cloned())
    }

    /// Stores `handler` unless one of the same type is already cached, and returns
    /// whichever ends up cached.
    pub fn insert_handler(
        &self,
        system_id: &str,
        fingerprint: &str,
        container_type: &str,
        handler: SharedHandler,
    ) -> SharedHandler {
        let mut entry = self
            .systems
            .entry(system_id.to_string())
            .or_insert_with(|| SystemHandlers::new(fingerprint));
        Arc::clone(entry.handlers.entry(container_type.to_string()).or_insert(handler))
    }

    /// Explicit eviction: removes and returns everything cached for `system_id`.
    ///
    /// The handlers are not released; that is up to the caller.
    pub fn evict(&self, system_id: &str) -> Option<SystemHandlers> {
        self.systems.remove(system_id).map(|(_, entry)| entry)
    }

    /// Ids of the systems with an entry, sorted.
    #[must_use]
    pub fn system_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.systems.iter().map(|entry| entry.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Container types cached for `system_id`, sorted.
    #[must_use]
    pub fn cached_types(&self, system_id: &str) -> Vec<String> {
        self.systems
            .get(system_id)
            .map(|entry| entry.handlers.keys().cloned().collect())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.systems.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.systems.is_empty()
    }
}
