//! Stores that don't touch the disk.
use std::collections::HashMap;
use std::sync::Mutex;

use crate::*;

/// An in-process [ArchiveStore].  Lives exactly as long as the value; useful for hosts without persistent storage
/// that still want a single place to keep archive bytes, and for tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    archives: Mutex<HashMap<IconCategory, Vec<u8>, ahash::RandomState>>,
}

impl MemoryStore {
    pub fn new() -> MemoryStore {
        Default::default()
    }

    pub fn len(&self) -> usize {
        self.archives.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait::async_trait]
impl ArchiveStore for MemoryStore {
    async fn get(&self, category: &IconCategory) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.archives.lock().unwrap().get(category).cloned())
    }

    async fn put(&self, category: &IconCategory, bytes: &[u8]) -> Result<(), StoreError> {
        self.archives
            .lock()
            .unwrap()
            .insert(category.clone(), bytes.to_vec());
        Ok(())
    }

    async fn remove(&self, category: &IconCategory) -> Result<(), StoreError> {
        self.archives.lock().unwrap().remove(category);
        Ok(())
    }
}

/// The store to use when the environment has no persistent storage.  Every operation fails immediately, and the loader
/// carries on with network-only fetches.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailableStore;

#[async_trait::async_trait]
impl ArchiveStore for UnavailableStore {
    async fn get(&self, _category: &IconCategory) -> Result<Option<Vec<u8>>, StoreError> {
        Err(StoreError::Unavailable)
    }

    async fn put(&self, _category: &IconCategory, _bytes: &[u8]) -> Result<(), StoreError> {
        Err(StoreError::Unavailable)
    }

    async fn remove(&self, _category: &IconCategory) -> Result<(), StoreError> {
        Err(StoreError::Unavailable)
    }
}
