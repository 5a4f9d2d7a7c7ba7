//! Blob storage abstraction for `MeshConsole`.
//!
//! This crate defines the [`BlobStore`] trait, a named-blob interface that
//! knows nothing about API keys or encryption. The credential store in
//! `meshconsole-core` encrypts every value before it reaches this layer.
//!
//! Two implementations are provided:
//!
//! - [`FileBackend`]: production default, one file per blob inside a data
//!   directory, replaced atomically on every write
//! - [`MemoryBackend`]: in-memory, for testing only

mod error;
mod file;
mod memory;

pub use error::StorageError;
pub use file::FileBackend;
pub use memory::MemoryBackend;

/// A pluggable named-blob storage backend.
///
/// Names are flat file names (e.g. `key.txt`); path separators are rejected.
/// Values are opaque byte arrays, always encrypted before reaching storage.
///
/// Implementations must be safe to share across async tasks (`Send + Sync`)
/// and must never expose a partially written value to a concurrent reader.
#[async_trait::async_trait]
pub trait BlobStore: Send + Sync + 'static {
    /// Retrieve a blob by name.
    ///
    /// Returns `Ok(None)` if the blob does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Read`] if the underlying backend fails.
    async fn get(&self, name: &str) -> Result<Option<Vec<u8>>, StorageError>;

    /// Store a blob, replacing any existing value in a single step.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Write`] if the underlying backend fails. On
    /// failure the previous value (if any) is left intact.
    async fn put(&self, name: &str, value: &[u8]) -> Result<(), StorageError>;

    /// Delete a blob. Deleting a non-existent blob is not an error.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Delete`] if the underlying backend fails.
    async fn delete(&self, name: &str) -> Result<(), StorageError>;

    /// Check whether a blob exists.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Read`] if the underlying backend fails.
    async fn exists(&self, name: &str) -> Result<bool, StorageError> {
        Ok(self.get(name).await?.is_some())
    }
}

/// Reject names that would escape the storage root.
pub(crate) fn validate_name(name: &str) -> Result<(), StorageError> {
    if name.is_empty()
        || name == "."
        || name == ".."
        || name.contains('/')
        || name.contains('\\')
        || name.contains('\0')
    {
        return Err(StorageError::InvalidName {
            name: name.to_owned(),
        });
    }
    Ok(())
}
