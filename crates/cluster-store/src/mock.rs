//! Mock ObjectStore for unit testing
//!
//! This module provides an in-memory implementation of `ObjectStore` that can
//! be used in unit tests without a running API server. One `MockStore` holds
//! objects of every kind, like a real cluster, and mimics the API server
//! behaviour the operator relies on:
//! - `resourceVersion` bumps on every write and is checked on update
//! - `metadata.generation` bumps only when non-metadata, non-status content changes
//! - `update` never touches status, `update_status` never touches spec
//! - deleting an object cascades to objects listing it as owner

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::Value;

use crate::error::StoreError;
use crate::key::ObjectKey;
use crate::store_trait::{ObjectStore, StoreObject};

/// Store operation, used to target injected failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// `get`
    Get,
    /// `create`
    Create,
    /// `update`
    Update,
    /// `update_status`
    UpdateStatus,
}

/// Failure returned by the next matching operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    /// Optimistic concurrency failure
    Conflict,
    /// Generic store failure
    Unavailable,
}

/// Writes issued through the `ObjectStore` interface for one kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteCounts {
    /// Successful `create` calls
    pub creates: usize,
    /// Successful `update` calls
    pub updates: usize,
    /// Successful `update_status` calls
    pub status_updates: usize,
}

impl WriteCounts {
    /// All successful writes.
    #[must_use]
    pub fn total(&self) -> usize {
        self.creates + self.updates + self.status_updates
    }
}

#[derive(Debug, Default)]
struct State {
    objects: HashMap<(String, ObjectKey), Value>,
    writes: HashMap<String, WriteCounts>,
    failures: HashMap<(String, Operation), VecDeque<Failure>>,
    resource_version: u64,
}

impl State {
    fn next_resource_version(&mut self) -> String {
        self.resource_version += 1;
        self.resource_version.to_string()
    }

    fn take_failure(
        &mut self,
        kind: &str,
        op: Operation,
        key: &ObjectKey,
    ) -> Result<(), StoreError> {
        let injected = self
            .failures
            .get_mut(&(kind.to_string(), op))
            .and_then(VecDeque::pop_front);
        match injected {
            Some(Failure::Conflict) => Err(StoreError::Conflict(format!(
                "{kind} {key}: the object has been modified"
            ))),
            Some(Failure::Unavailable) => Err(StoreError::Unavailable(format!(
                "{kind} {key}: injected failure"
            ))),
            None => Ok(()),
        }
    }

    fn counts(&mut self, kind: &str) -> &mut WriteCounts {
        self.writes.entry(kind.to_string()).or_default()
    }
}

/// In-memory cluster store for tests
#[derive(Debug, Clone, Default)]
pub struct MockStore {
    state: Arc<Mutex<State>>,
}

fn kind_of<K: StoreObject>() -> String {
    K::kind(&()).into_owned()
}

/// Everything the generation counter tracks: the object minus identity,
/// metadata and status.
fn generation_content(value: &Value) -> Value {
    let mut content = value.clone();
    if let Some(map) = content.as_object_mut() {
        for field in ["apiVersion", "kind", "metadata", "status"] {
            map.remove(field);
        }
    }
    content
}

fn resource_version_of(value: &Value) -> Option<&str> {
    value
        .pointer("/metadata/resourceVersion")
        .and_then(Value::as_str)
}

fn owner_uids(value: &Value) -> Vec<String> {
    value
        .pointer("/metadata/ownerReferences")
        .and_then(Value::as_array)
        .map(|refs| {
            refs.iter()
                .filter_map(|r| r.get("uid").and_then(Value::as_str))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn uid_of(value: &Value) -> Option<String> {
    value
        .pointer("/metadata/uid")
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn set_status(target: &mut Value, status: Option<Value>) {
    if let Some(map) = target.as_object_mut() {
        match status {
            Some(status) if !status.is_null() => {
                map.insert("status".to_string(), status);
            }
            _ => {
                map.remove("status");
            }
        }
    }
}

impl MockStore {
    /// Create an empty mock store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Seed an object as if it already existed (for test setup)
    ///
    /// Assigns uid, resourceVersion and generation 1 when missing. Status is
    /// kept as given. Not counted as a write.
    pub fn insert<K: StoreObject>(&self, obj: &K) -> Result<K, StoreError> {
        let key = ObjectKey::for_object(obj)?;
        let mut state = self.lock();
        let mut obj = obj.clone();
        let meta = obj.meta_mut();
        if meta.uid.is_none() {
            meta.uid = Some(uuid::Uuid::new_v4().to_string());
        }
        if meta.generation.is_none() {
            meta.generation = Some(1);
        }
        meta.resource_version = Some(state.next_resource_version());
        state
            .objects
            .insert((kind_of::<K>(), key), serde_json::to_value(&obj)?);
        Ok(obj)
    }

    /// Current stored object without counting a read (for assertions)
    #[must_use]
    pub fn object<K: StoreObject>(&self, key: &ObjectKey) -> Option<K> {
        let state = self.lock();
        state
            .objects
            .get(&(kind_of::<K>(), key.clone()))
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Apply a change as an external actor would (scaling, status from the
    /// workload runtime, a user editing the spec). Not counted as a write.
    pub fn mutate<K, F>(&self, key: &ObjectKey, f: F) -> Result<K, StoreError>
    where
        K: StoreObject,
        F: FnOnce(&mut K),
    {
        let kind = kind_of::<K>();
        let mut state = self.lock();
        let slot = (kind.clone(), key.clone());
        let current = state
            .objects
            .get(&slot)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("{kind} {key}")))?;

        let mut obj: K = serde_json::from_value(current.clone())?;
        f(&mut obj);
        let mut next = serde_json::to_value(&obj)?;
        let generation = current
            .pointer("/metadata/generation")
            .and_then(Value::as_i64)
            .unwrap_or(1);
        let generation = if generation_content(&current) == generation_content(&next) {
            generation
        } else {
            generation + 1
        };
        next["metadata"]["generation"] = Value::from(generation);
        next["metadata"]["resourceVersion"] = Value::String(state.next_resource_version());

        let stored = serde_json::from_value(next.clone())?;
        state.objects.insert(slot, next);
        Ok(stored)
    }

    /// Delete an object and, transitively, every object that lists it as owner.
    /// Returns the number of removed objects.
    pub fn delete<K: StoreObject>(&self, key: &ObjectKey) -> usize {
        let mut state = self.lock();
        let Some(removed) = state.objects.remove(&(kind_of::<K>(), key.clone())) else {
            return 0;
        };

        let mut count = 1;
        let mut orphaned_owners: VecDeque<String> = uid_of(&removed).into_iter().collect();
        while let Some(owner) = orphaned_owners.pop_front() {
            let dependents: Vec<(String, ObjectKey)> = state
                .objects
                .iter()
                .filter(|(_, v)| owner_uids(v).contains(&owner))
                .map(|(slot, _)| slot.clone())
                .collect();
            for slot in dependents {
                if let Some(value) = state.objects.remove(&slot) {
                    count += 1;
                    orphaned_owners.extend(uid_of(&value));
                }
            }
        }
        count
    }

    /// Make the next `op` on kind `K` fail (for test setup)
    pub fn fail_next<K: StoreObject>(&self, op: Operation, failure: Failure) {
        self.lock()
            .failures
            .entry((kind_of::<K>(), op))
            .or_default()
            .push_back(failure);
    }

    /// Successful writes issued for kind `K`
    #[must_use]
    pub fn writes<K: StoreObject>(&self) -> WriteCounts {
        self.lock()
            .writes
            .get(&kind_of::<K>())
            .copied()
            .unwrap_or_default()
    }

    /// Number of stored objects of kind `K`
    #[must_use]
    pub fn count<K: StoreObject>(&self) -> usize {
        let kind = kind_of::<K>();
        self.lock().objects.keys().filter(|(k, _)| *k == kind).count()
    }
}

#[async_trait::async_trait]
impl<K: StoreObject> ObjectStore<K> for MockStore {
    async fn get(&self, key: &ObjectKey) -> Result<K, StoreError> {
        let kind = kind_of::<K>();
        let mut state = self.lock();
        state.take_failure(&kind, Operation::Get, key)?;
        let value = state
            .objects
            .get(&(kind.clone(), key.clone()))
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("{kind} {key}")))?;
        Ok(serde_json::from_value(value)?)
    }

    async fn create(&self, obj: &K) -> Result<K, StoreError> {
        let kind = kind_of::<K>();
        let key = ObjectKey::for_object(obj)?;
        let mut state = self.lock();
        state.take_failure(&kind, Operation::Create, &key)?;
        let slot = (kind.clone(), key.clone());
        if state.objects.contains_key(&slot) {
            return Err(StoreError::Conflict(format!("{kind} {key} already exists")));
        }

        let mut obj = obj.clone();
        let meta = obj.meta_mut();
        meta.uid = Some(uuid::Uuid::new_v4().to_string());
        meta.generation = Some(1);
        meta.resource_version = Some(state.next_resource_version());
        let mut value = serde_json::to_value(&obj)?;
        set_status(&mut value, None);

        let stored = serde_json::from_value(value.clone())?;
        state.objects.insert(slot, value);
        state.counts(&kind).creates += 1;
        Ok(stored)
    }

    async fn update(&self, obj: &K) -> Result<K, StoreError> {
        let kind = kind_of::<K>();
        let key = ObjectKey::for_object(obj)?;
        let mut state = self.lock();
        state.take_failure(&kind, Operation::Update, &key)?;
        let slot = (kind.clone(), key.clone());
        let current = state
            .objects
            .get(&slot)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("{kind} {key}")))?;

        let requested = obj.meta().resource_version.as_deref();
        if requested.is_some() && requested != resource_version_of(&current) {
            return Err(StoreError::Conflict(format!(
                "{kind} {key}: the object has been modified"
            )));
        }

        let mut next = serde_json::to_value(obj)?;
        set_status(&mut next, current.get("status").cloned());
        let generation = current
            .pointer("/metadata/generation")
            .and_then(Value::as_i64)
            .unwrap_or(1);
        let generation = if generation_content(&current) == generation_content(&next) {
            generation
        } else {
            generation + 1
        };
        next["metadata"]["uid"] = current["metadata"]["uid"].clone();
        next["metadata"]["generation"] = Value::from(generation);
        next["metadata"]["resourceVersion"] = Value::String(state.next_resource_version());

        let stored = serde_json::from_value(next.clone())?;
        state.objects.insert(slot, next);
        state.counts(&kind).updates += 1;
        Ok(stored)
    }

    async fn update_status(&self, obj: &K) -> Result<K, StoreError> {
        let kind = kind_of::<K>();
        let key = ObjectKey::for_object(obj)?;
        let mut state = self.lock();
        state.take_failure(&kind, Operation::UpdateStatus, &key)?;
        let slot = (kind.clone(), key.clone());
        let mut next = state
            .objects
            .get(&slot)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("{kind} {key}")))?;

        let requested = obj.meta().resource_version.as_deref();
        if requested.is_some() && requested != resource_version_of(&next) {
            return Err(StoreError::Conflict(format!(
                "{kind} {key}: the object has been modified"
            )));
        }

        let status = serde_json::to_value(obj)?.get("status").cloned();
        set_status(&mut next, status);
        next["metadata"]["resourceVersion"] = Value::String(state.next_resource_version());

        let stored = serde_json::from_value(next.clone())?;
        state.objects.insert(slot, next);
        state.counts(&kind).status_updates += 1;
        Ok(stored)
    }
}
