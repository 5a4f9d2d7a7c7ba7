//! In-memory storage backend for testing.
//!
//! Blobs live in a `BTreeMap` behind a `RwLock` and are lost when the process
//! exits. Use this in unit and router tests that need a real [`BlobStore`]
//! without touching disk.

use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::{BlobStore, StorageError, validate_name};

/// An in-memory blob store.
///
/// Cloning shares the underlying map, so a test can keep a handle and
/// inspect what the code under test wrote.
///
/// # Examples
///
/// ```
/// # use meshconsole_storage::{BlobStore, MemoryBackend};
/// # #[tokio::main]
/// # async fn main() {
/// let backend = MemoryBackend::new();
/// backend.put("key.txt", b"data").await.unwrap();
/// assert_eq!(backend.get("key.txt").await.unwrap(), Some(b"data".to_vec()));
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct MemoryBackend {
    data: Arc<RwLock<BTreeMap<String, Vec<u8>>>>,
}

impl MemoryBackend {
    /// Create a new empty in-memory backend.
    #[must_use]
    pub fn new() -> Self {
        Self {
            data: Arc::new(RwLock::new(BTreeMap::new())),
        }
    }

    /// Number of stored blobs.
    pub async fn len(&self) -> usize {
        self.data.read().await.len()
    }

    /// Whether no blobs are stored.
    pub async fn is_empty(&self) -> bool {
        self.data.read().await.is_empty()
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl BlobStore for MemoryBackend {
    async fn get(&self, name: &str) -> Result<Option<Vec<u8>>, StorageError> {
        validate_name(name)?;
        let data = self.data.read().await;
        Ok(data.get(name).cloned())
    }

    async fn put(&self, name: &str, value: &[u8]) -> Result<(), StorageError> {
        validate_name(name)?;
        let mut data = self.data.write().await;
        data.insert(name.to_owned(), value.to_vec());
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<(), StorageError> {
        validate_name(name)?;
        let mut data = self.data.write().await;
        data.remove(name);
        Ok(())
    }

    async fn exists(&self, name: &str) -> Result<bool, StorageError> {
        validate_name(name)?;
        let data = self.data.read().await;
        Ok(data.contains_key(name))
    }
}
