//! Per-cycle caches held by the runner.

use crate::instance::{Instance, LocalInstance, RecordKey, RemoteInstance, Side};
use crate::mapping::Mapping;
use crmsync_store::{Condition, Timestamp};
use std::collections::HashMap;
use std::mem;
use std::sync::Arc;

/// Timestamps of the engine's own writes, over two generations.
///
/// The current generation collects this cycle's writes; the retired one
/// holds the previous cycle's and is still consulted, because a write made
/// late in one cycle is first seen by the next cycle's queries.
#[derive(Debug, Clone, Default)]
pub struct TimestampCache {
    current: HashMap<RecordKey, Timestamp>,
    retired: HashMap<RecordKey, Timestamp>,
}

impl TimestampCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Rotates generations: current becomes retired, the old retired is dropped.
    pub fn reset(&mut self) {
        self.retired = mem::take(&mut self.current);
    }

    /// Records the instance's last update as an engine write.
    pub fn cache_timestamp(&mut self, instance: &dyn Instance) {
        self.current.insert(instance.key(), instance.last_update());
    }

    /// Returns the cached timestamp, preferring the current generation.
    pub fn timestamp(&self, key: &RecordKey) -> Option<Timestamp> {
        self.current
            .get(key)
            .or_else(|| self.retired.get(key))
            .copied()
    }

    /// Returns true unless the instance's last update is the engine's own.
    pub fn changed(&self, instance: &dyn Instance) -> bool {
        if !instance.updated_internally() {
            return true;
        }
        !self
            .timestamp(&instance.key())
            .is_some_and(|cached| cached >= instance.last_update())
    }

    /// Number of timestamps across both generations.
    pub fn len(&self) -> usize {
        self.current.len() + self.retired.len()
    }

    /// Returns true if both generations are empty.
    pub fn is_empty(&self) -> bool {
        self.current.is_empty() && self.retired.is_empty()
    }
}

/// Identifies one memoized collection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CollectionKey {
    /// Local table of the mapping.
    pub local_type: String,
    /// Remote object type of the mapping.
    pub remote_type: String,
    /// Store queried.
    pub side: Side,
    /// Rendered query conditions.
    pub conditions: String,
}

impl CollectionKey {
    /// Builds the key for `mapping` on `side`, using the mapping's conditions.
    pub fn new(mapping: &Mapping, side: Side) -> Self {
        let conditions = match side {
            Side::Local => String::new(),
            Side::Remote => Condition::render(mapping.conditions()),
        };
        Self {
            local_type: mapping.local_type().to_owned(),
            remote_type: mapping.remote_type().to_owned(),
            side,
            conditions,
        }
    }
}

/// Instances read during the current cycle.
///
/// Collections are shared, so every stage of a cycle sees the same snapshot.
#[derive(Debug, Default)]
pub struct RunnerCache {
    local: HashMap<CollectionKey, Arc<Vec<LocalInstance>>>,
    remote: HashMap<CollectionKey, Arc<Vec<RemoteInstance>>>,
}

impl RunnerCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops every collection.
    pub fn reset(&mut self) {
        self.local.clear();
        self.remote.clear();
    }

    /// Returns the cached local collection or loads and caches it.
    pub fn local_or_insert<E>(
        &mut self,
        key: CollectionKey,
        load: impl FnOnce() -> Result<Vec<LocalInstance>, E>,
    ) -> Result<Arc<Vec<LocalInstance>>, E> {
        if let Some(cached) = self.local.get(&key) {
            return Ok(Arc::clone(cached));
        }
        let loaded = Arc::new(load()?);
        self.local.insert(key, Arc::clone(&loaded));
        Ok(loaded)
    }

    /// Returns the cached remote collection or loads and caches it.
    pub fn remote_or_insert<E>(
        &mut self,
        key: CollectionKey,
        load: impl FnOnce() -> Result<Vec<RemoteInstance>, E>,
    ) -> Result<Arc<Vec<RemoteInstance>>, E> {
        if let Some(cached) = self.remote.get(&key) {
            return Ok(Arc::clone(cached));
        }
        let loaded = Arc::new(load()?);
        self.remote.insert(key, Arc::clone(&loaded));
        Ok(loaded)
    }

    /// Number of cached collections.
    pub fn len(&self) -> usize {
        self.local.len() + self.remote.len()
    }

    /// Returns true if nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.local.is_empty() && self.remote.is_empty()
    }
}
