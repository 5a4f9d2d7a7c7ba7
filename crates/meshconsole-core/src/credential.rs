//! Encrypted API key storage.
//!
//! The upstream API key is the only secret the console persists. It is
//! encrypted with a key derived from the operator secret and written to a
//! single blob, [`KEY_BLOB`]. The decrypted value is cached in memory; the
//! cache is replaced while holding the same write lock as the blob write,
//! so a reader never sees a cached key that differs from the file.

use std::sync::Arc;

use meshconsole_storage::BlobStore;
use tokio::sync::RwLock;
use zeroize::Zeroizing;

use crate::crypto::{self, EncryptionKey};
use crate::error::CredentialError;

/// Blob name of the encrypted API key inside the data directory.
pub const KEY_BLOB: &str = "key.txt";

/// Owns the encrypted API key on durable storage.
pub struct CredentialStore {
    storage: Arc<dyn BlobStore>,
    key: EncryptionKey,
    cache: RwLock<Option<Zeroizing<String>>>,
}

impl std::fmt::Debug for CredentialStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialStore")
            .field("blob", &KEY_BLOB)
            .finish_non_exhaustive()
    }
}

impl CredentialStore {
    /// Create a store over `storage` using `key` for encryption.
    #[must_use]
    pub fn new(storage: Arc<dyn BlobStore>, key: EncryptionKey) -> Self {
        Self {
            storage,
            key,
            cache: RwLock::new(None),
        }
    }

    /// Return the decrypted API key.
    ///
    /// # Errors
    ///
    /// - [`CredentialError::NotConfigured`] if no key was ever saved
    /// - [`CredentialError::Decryption`] if the blob does not decrypt with
    ///   the configured secret
    /// - [`CredentialError::Storage`] if the blob cannot be read
    pub async fn get_key(&self) -> Result<String, CredentialError> {
        if let Some(cached) = self.cache.read().await.as_ref() {
            return Ok(cached.as_str().to_owned());
        }

        let mut cache = self.cache.write().await;
        if let Some(cached) = cache.as_ref() {
            return Ok(cached.as_str().to_owned());
        }

        let blob = match self.storage.get(KEY_BLOB).await? {
            Some(blob) if !blob.is_empty() => blob,
            _ => return Err(CredentialError::NotConfigured),
        };
        let plaintext = Zeroizing::new(crypto::open(&self.key, KEY_BLOB, &blob)?);
        let api_key = std::str::from_utf8(&plaintext)
            .map_err(|_| CredentialError::Encoding)?
            .to_owned();

        *cache = Some(Zeroizing::new(api_key.clone()));
        Ok(api_key)
    }

    /// Encrypt and persist `api_key`, replacing any previous key.
    ///
    /// On failure the previous blob and the cache are left untouched.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError::Storage`] if the write fails, or
    /// [`CredentialError::Decryption`] if encryption fails.
    pub async fn set_key(&self, api_key: &str) -> Result<(), CredentialError> {
        let blob = crypto::seal(&self.key, KEY_BLOB, api_key.as_bytes())?;

        let mut cache = self.cache.write().await;
        self.storage.put(KEY_BLOB, &blob).await?;
        *cache = Some(Zeroizing::new(api_key.to_owned()));

        tracing::info!(
            prefix = meshconsole_client::key_prefix(api_key),
            "API key saved"
        );
        Ok(())
    }

    /// Whether a key blob exists.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError::Storage`] if the backend cannot be read.
    pub async fn is_configured(&self) -> Result<bool, CredentialError> {
        if self.cache.read().await.is_some() {
            return Ok(true);
        }
        Ok(matches!(
            self.storage.get(KEY_BLOB).await?,
            Some(blob) if !blob.is_empty()
        ))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use meshconsole_storage::{FileBackend, MemoryBackend, StorageError};

    fn store_over(backend: &MemoryBackend, secret: &str) -> CredentialStore {
        CredentialStore::new(
            Arc::new(backend.clone()),
            EncryptionKey::from_secret(secret).unwrap(),
        )
    }

    #[tokio::test]
    async fn missing_key_is_not_configured() {
        let store = store_over(&MemoryBackend::new(), "secret");
        assert!(matches!(
            store.get_key().await,
            Err(CredentialError::NotConfigured)
        ));
        assert!(!store.is_configured().await.unwrap());
    }

    #[tokio::test]
    async fn empty_blob_is_not_configured() {
        let backend = MemoryBackend::new();
        backend.put(KEY_BLOB, b"").await.unwrap();
        let store = store_over(&backend, "secret");
        assert!(matches!(
            store.get_key().await,
            Err(CredentialError::NotConfigured)
        ));
    }

    #[tokio::test]
    async fn set_then_get_from_fresh_store() {
        let backend = MemoryBackend::new();
        store_over(&backend, "secret")
            .set_key("abcdefghij.rest")
            .await
            .unwrap();

        let reopened = store_over(&backend, "secret");
        assert_eq!(reopened.get_key().await.unwrap(), "abcdefghij.rest");
        assert!(reopened.is_configured().await.unwrap());
    }

    #[tokio::test]
    async fn blob_is_not_plaintext() {
        let backend = MemoryBackend::new();
        store_over(&backend, "secret")
            .set_key("abcdefghij.rest")
            .await
            .unwrap();
        let blob = backend.get(KEY_BLOB).await.unwrap().unwrap();
        assert!(!blob.windows(10).any(|w| w == b"abcdefghij"));
    }

    #[tokio::test]
    async fn wrong_secret_fails_decryption() {
        let backend = MemoryBackend::new();
        store_over(&backend, "secret").set_key("k").await.unwrap();
        let other = store_over(&backend, "different");
        assert!(matches!(
            other.get_key().await,
            Err(CredentialError::Decryption(_))
        ));
    }

    #[tokio::test]
    async fn set_replaces_cached_value() {
        let store = store_over(&MemoryBackend::new(), "secret");
        store.set_key("first-key-0").await.unwrap();
        assert_eq!(store.get_key().await.unwrap(), "first-key-0");
        store.set_key("second-key").await.unwrap();
        assert_eq!(store.get_key().await.unwrap(), "second-key");
    }

    #[tokio::test]
    async fn file_backend_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::open(dir.path()).unwrap();
        let store = CredentialStore::new(
            Arc::new(backend),
            EncryptionKey::from_secret("secret").unwrap(),
        );
        store.set_key("abcdefghij.file").await.unwrap();
        assert!(dir.path().join(KEY_BLOB).exists());

        let reopened = CredentialStore::new(
            Arc::new(FileBackend::open(dir.path()).unwrap()),
            EncryptionKey::from_secret("secret").unwrap(),
        );
        assert_eq!(reopened.get_key().await.unwrap(), "abcdefghij.file");
    }

    struct ReadOnlyBackend;

    #[async_trait::async_trait]
    impl BlobStore for ReadOnlyBackend {
        async fn get(&self, _name: &str) -> Result<Option<Vec<u8>>, StorageError> {
            Ok(None)
        }

        async fn put(&self, name: &str, _value: &[u8]) -> Result<(), StorageError> {
            Err(StorageError::Write {
                name: name.to_owned(),
                reason: "permission denied".to_owned(),
                kind: std::io::ErrorKind::PermissionDenied,
            })
        }

        async fn delete(&self, _name: &str) -> Result<(), StorageError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn failed_write_leaves_cache_empty() {
        let store = CredentialStore::new(
            Arc::new(ReadOnlyBackend),
            EncryptionKey::from_secret("secret").unwrap(),
        );
        let err = store.set_key("abcdefghij").await.unwrap_err();
        assert!(err.is_permission_denied());
        assert!(matches!(
            store.get_key().await,
            Err(CredentialError::NotConfigured)
        ));
    }
}
