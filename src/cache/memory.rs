//! In-process local read cache
//!
//! Populated by whoever owns it (an embedding application, a test). Stored
//! objects are immutable `Arc` snapshots: an update publishes a new `Arc`,
//! readers keep whatever snapshot they already hold.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use super::key::{key_for, meta_namespace_key};
use super::Lister;
use crate::error::Result;
use crate::resource::ManagedResource;

pub struct MemoryStore<R> {
    objects: RwLock<HashMap<String, Arc<R>>>,
    synced: AtomicBool,
}

impl<R: ManagedResource> MemoryStore<R> {
    pub fn new() -> Self {
        Self {
            objects: RwLock::new(HashMap::new()),
            synced: AtomicBool::new(false),
        }
    }

    /// Insert or replace an object. Returns the previous snapshot.
    pub fn upsert(&self, obj: R) -> Result<Option<Arc<R>>> {
        let key = key_for(&obj)?;
        let mut objects = self.objects.write().unwrap_or_else(PoisonError::into_inner);
        Ok(objects.insert(key, Arc::new(obj)))
    }

    pub fn remove(&self, namespace: Option<&str>, name: &str) -> Option<Arc<R>> {
        let key = meta_namespace_key(namespace, name);
        self.objects
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&key)
    }

    /// Mark the initial population complete.
    pub fn mark_synced(&self) {
        self.synced.store(true, Ordering::Release);
    }

    pub fn len(&self) -> usize {
        self.objects
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<R: ManagedResource> Default for MemoryStore<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: ManagedResource> Lister<R> for MemoryStore<R> {
    fn get(&self, namespace: Option<&str>, name: &str) -> Result<Option<Arc<R>>> {
        let key = meta_namespace_key(namespace, name);
        Ok(self
            .objects
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
            .cloned())
    }

    fn has_synced(&self) -> bool {
        self.synced.load(Ordering::Acquire)
    }
}
