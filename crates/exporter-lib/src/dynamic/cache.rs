//! Resource cache keyed by `namespace/name`
//!
//! Holds the last observed shape of every watched object. Writers take the
//! exclusive lock for a single map mutation; a scrape takes the shared lock
//! for its whole duration and so sees one point-in-time snapshot.

use super::extract::resource_key;
use parking_lot::{RwLock, RwLockReadGuard};
use serde_json::Value;
use std::collections::HashMap;
use tracing::debug;

/// Latest known object per resource key
#[derive(Debug, Default)]
pub struct ResourceCache {
    resources: RwLock<HashMap<String, Value>>,
}

impl ResourceCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or wholesale replace an object. Returns `true` if the key was
    /// already present.
    ///
    /// Replacement is a single insert under the write lock, so readers never
    /// observe the key missing in between.
    pub fn upsert(&self, obj: &Value) -> bool {
        let key = resource_key(obj);
        let replaced = self.resources.write().insert(key.clone(), obj.clone()).is_some();
        debug!(key = %key, replaced, "Resource cached");
        replaced
    }

    /// Remove the object with the same identity as `obj`.
    pub fn remove(&self, obj: &Value) -> Option<Value> {
        let key = resource_key(obj);
        let removed = self.resources.write().remove(&key);
        debug!(key = %key, found = removed.is_some(), "Resource removed");
        removed
    }

    /// Clone of the cached object under `key`
    pub fn get(&self, key: &str) -> Option<Value> {
        self.resources.read().get(key).cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.resources.read().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.resources.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.read().is_empty()
    }

    /// Hold the shared lock and expose a consistent view until dropped.
    pub fn snapshot(&self) -> CacheSnapshot<'_> {
        CacheSnapshot {
            guard: self.resources.read(),
        }
    }
}

/// Read view of the cache; writers are blocked while it is alive
pub struct CacheSnapshot<'a> {
    guard: RwLockReadGuard<'a, HashMap<String, Value>>,
}

impl CacheSnapshot<'_> {
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.guard.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn objects(&self) -> impl Iterator<Item = &Value> {
        self.guard.values()
    }

    pub fn len(&self) -> usize {
        self.guard.len()
    }

    pub fn is_empty(&self) -> bool {
        self.guard.is_empty()
    }
}
