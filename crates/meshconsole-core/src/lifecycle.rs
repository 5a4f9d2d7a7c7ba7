//! API key validation and renewal.
//!
//! The stored key moves through these states:
//!
//! ```text
//! Unconfigured ──save──▶ Valid ──(< 5 days left)──▶ NearExpiry
//!                          ▲                            │
//!                          └──────── Renewing ◀─────────┘
//! Valid ──(rejected upstream)──▶ Invalid
//! ```
//!
//! Renewal mints a replacement, proves it works, persists it, and only then
//! expires the old key. A failure at any step before persisting leaves the
//! stored key untouched. All renewals in the process are serialized through
//! one async mutex.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use meshconsole_client::{ApiKey, Headscale, key_prefix};
use tokio::sync::Mutex;

use crate::credential::CredentialStore;
use crate::error::LifecycleError;

/// Remaining lifetime below which a key is renewed.
pub const RENEWAL_THRESHOLD_DAYS: i64 = 5;

/// Lifetime of a freshly minted key.
pub const NEW_KEY_LIFETIME_DAYS: i64 = 90;

/// Current state of the stored key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyState {
    /// No key saved.
    Unconfigured,
    /// Key accepted upstream with plenty of lifetime left.
    Valid(ApiKey),
    /// Key accepted upstream but due for renewal.
    NearExpiry(ApiKey),
    /// A renewal is in progress.
    Renewing,
    /// Key unreadable, unknown or rejected upstream.
    Invalid,
}

/// Result of [`KeyLifecycle::renew_if_needed`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenewalOutcome {
    /// The key has enough lifetime left; nothing was changed.
    NotNeeded(ApiKey),
    /// A new key was minted, verified, and persisted.
    Renewed(ApiKey),
    /// The minted key failed verification; the stored key is unchanged.
    Failed,
}

/// Validates the stored key and renews it before it expires.
pub struct KeyLifecycle {
    api: Arc<dyn Headscale>,
    credentials: Arc<CredentialStore>,
    renew_lock: Mutex<()>,
}

impl std::fmt::Debug for KeyLifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyLifecycle")
            .field("credentials", &self.credentials)
            .finish_non_exhaustive()
    }
}

impl KeyLifecycle {
    #[must_use]
    pub fn new(api: Arc<dyn Headscale>, credentials: Arc<CredentialStore>) -> Self {
        Self {
            api,
            credentials,
            renew_lock: Mutex::new(()),
        }
    }

    /// The credential store this manager reads and writes.
    #[must_use]
    pub fn credentials(&self) -> &Arc<CredentialStore> {
        &self.credentials
    }

    /// Check whether a key is accepted upstream.
    ///
    /// With `None` (or an empty candidate) the stored key is tested. Any
    /// failure, including an unreachable server or a missing stored key,
    /// yields `false`.
    pub async fn test_key(&self, candidate: Option<&str>) -> bool {
        let key = match candidate.filter(|k| !k.is_empty()) {
            Some(k) => k.to_owned(),
            None => match self.credentials.get_key().await {
                Ok(k) => k,
                Err(e) => {
                    tracing::debug!(error = %e, "no usable stored API key to test");
                    return false;
                }
            },
        };

        match self.api.list_api_keys(&key).await {
            Ok(_) => true,
            Err(e) => {
                tracing::debug!(prefix = key_prefix(&key), error = %e, "API key test failed");
                false
            }
        }
    }

    /// Upstream metadata for the stored key.
    ///
    /// The key is identified by its 10-character prefix; if several keys
    /// share it, the first listed wins.
    ///
    /// # Errors
    ///
    /// - [`LifecycleError::Unconfigured`] if no key is stored
    /// - [`LifecycleError::Unauthorized`] if upstream rejects the key
    /// - [`LifecycleError::KeyNotFound`] if no listed key has the prefix
    pub async fn key_info(&self) -> Result<ApiKey, LifecycleError> {
        let key = self.credentials.get_key().await?;
        self.info_for(&key).await
    }

    /// Renew the stored key if it expires within [`RENEWAL_THRESHOLD_DAYS`].
    ///
    /// # Errors
    ///
    /// Returns the same errors as [`Self::key_info`], any upstream failure
    /// while minting, and [`LifecycleError::Persist`] if the new key could
    /// not be saved. In the last case the old key is not expired.
    pub async fn renew_if_needed(&self) -> Result<RenewalOutcome, LifecycleError> {
        let _guard = self.renew_lock.lock().await;

        let old_key = self.credentials.get_key().await?;
        let info = self.info_for(&old_key).await?;
        let now = Utc::now();

        if !needs_renewal(&info, now) {
            tracing::debug!(prefix = %info.prefix, "API key renewal not needed");
            return Ok(RenewalOutcome::NotNeeded(info));
        }

        tracing::info!(
            prefix = %info.prefix,
            expiration = ?info.expiration,
            "API key expires soon, renewing"
        );

        let expiration = now + Duration::days(NEW_KEY_LIFETIME_DAYS);
        let new_key = self.api.create_api_key(&old_key, expiration).await?;

        if !self.test_key(Some(&new_key)).await {
            tracing::warn!(
                prefix = key_prefix(&new_key),
                "minted API key failed verification, keeping current key"
            );
            return Ok(RenewalOutcome::Failed);
        }

        self.credentials
            .set_key(&new_key)
            .await
            .map_err(LifecycleError::Persist)?;

        if let Err(e) = self.api.expire_api_key(&new_key, &info.prefix).await {
            tracing::warn!(prefix = %info.prefix, error = %e, "failed to expire previous API key");
        }

        let new_info = match self.info_for(&new_key).await {
            Ok(found) => found,
            Err(e) => {
                tracing::debug!(error = %e, "renewed key not listed yet");
                ApiKey {
                    id: 0,
                    prefix: key_prefix(&new_key).to_owned(),
                    expiration: Some(expiration),
                    created_at: Some(now),
                    last_seen: None,
                }
            }
        };

        tracing::info!(
            old_prefix = %info.prefix,
            new_prefix = %new_info.prefix,
            "API key renewed"
        );
        Ok(RenewalOutcome::Renewed(new_info))
    }

    /// Classify the stored key.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::Upstream`] if the server cannot be asked.
    pub async fn state(&self) -> Result<KeyState, LifecycleError> {
        if self.renew_lock.try_lock().is_err() {
            return Ok(KeyState::Renewing);
        }

        match self.key_info().await {
            Ok(info) if needs_renewal(&info, Utc::now()) => Ok(KeyState::NearExpiry(info)),
            Ok(info) => Ok(KeyState::Valid(info)),
            Err(LifecycleError::Unconfigured) => Ok(KeyState::Unconfigured),
            Err(
                LifecycleError::Unauthorized { .. }
                | LifecycleError::KeyNotFound { .. }
                | LifecycleError::Credential(_),
            ) => Ok(KeyState::Invalid),
            Err(e) => Err(e),
        }
    }

    // --- Private ---

    async fn info_for(&self, key: &str) -> Result<ApiKey, LifecycleError> {
        let prefix = key_prefix(key);
        self.api
            .list_api_keys(key)
            .await?
            .into_iter()
            .find(|k| k.prefix == prefix)
            .ok_or_else(|| LifecycleError::KeyNotFound {
                prefix: prefix.to_owned(),
            })
    }
}

/// Keys without an expiration never need renewal.
fn needs_renewal(info: &ApiKey, now: DateTime<Utc>) -> bool {
    info.expiration
        .is_some_and(|exp| exp - now < Duration::days(RENEWAL_THRESHOLD_DAYS))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use meshconsole_client::MemoryHeadscale;
    use meshconsole_storage::{BlobStore, MemoryBackend, StorageError};

    use super::*;
    use crate::credential::KEY_BLOB;
    use crate::crypto::EncryptionKey;

    const OLD_KEY: &str = "oldkey0123.remainder-of-the-secret";

    struct Fixture {
        hs: MemoryHeadscale,
        backend: MemoryBackend,
        lifecycle: KeyLifecycle,
    }

    async fn fixture(remaining: Duration) -> Fixture {
        let hs = MemoryHeadscale::new();
        hs.seed_api_key(OLD_KEY, Utc::now() + remaining).await;
        let backend = MemoryBackend::new();
        let credentials = Arc::new(CredentialStore::new(
            Arc::new(backend.clone()),
            EncryptionKey::from_secret("secret").unwrap(),
        ));
        credentials.set_key(OLD_KEY).await.unwrap();
        let lifecycle = KeyLifecycle::new(Arc::new(hs.clone()), credentials);
        Fixture {
            hs,
            backend,
            lifecycle,
        }
    }

    // ── test_key ─────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_key_accepts_stored_and_rejects_unknown() {
        let f = fixture(Duration::days(30)).await;
        assert!(f.lifecycle.test_key(None).await);
        assert!(f.lifecycle.test_key(Some("")).await);
        assert!(f.lifecycle.test_key(Some(OLD_KEY)).await);
        assert!(!f.lifecycle.test_key(Some("unknown-key")).await);
    }

    #[tokio::test]
    async fn test_key_is_false_when_unreachable_or_unconfigured() {
        let hs = MemoryHeadscale::new();
        let credentials = Arc::new(CredentialStore::new(
            Arc::new(MemoryBackend::new()),
            EncryptionKey::from_secret("secret").unwrap(),
        ));
        let lifecycle = KeyLifecycle::new(Arc::new(hs), credentials);
        assert!(!lifecycle.test_key(None).await);
    }

    // ── key_info ─────────────────────────────────────────────────────

    #[tokio::test]
    async fn key_info_matches_by_prefix() {
        let f = fixture(Duration::days(30)).await;
        let info = f.lifecycle.key_info().await.unwrap();
        assert_eq!(info.prefix, "oldkey0123");
    }

    #[tokio::test]
    async fn expired_stored_key_is_invalid() {
        let hs = MemoryHeadscale::new();
        hs.seed_api_key(OLD_KEY, Utc::now() + Duration::days(30))
            .await;
        let credentials = Arc::new(CredentialStore::new(
            Arc::new(MemoryBackend::new()),
            EncryptionKey::from_secret("secret").unwrap(),
        ));
        credentials.set_key(OLD_KEY).await.unwrap();
        hs.expire_api_key(OLD_KEY, "oldkey0123").await.unwrap();
        let lifecycle = KeyLifecycle::new(Arc::new(hs), credentials);

        assert!(matches!(
            lifecycle.key_info().await,
            Err(LifecycleError::Unauthorized { .. })
        ));
        assert_eq!(lifecycle.state().await.unwrap(), KeyState::Invalid);
    }

    // ── renew_if_needed ──────────────────────────────────────────────

    #[tokio::test]
    async fn renews_when_four_days_remain() {
        let f = fixture(Duration::days(4)).await;

        let outcome = f.lifecycle.renew_if_needed().await.unwrap();

        let RenewalOutcome::Renewed(info) = outcome else {
            unreachable!("expected renewal, got {outcome:?}");
        };
        let stored = f.lifecycle.credentials().get_key().await.unwrap();
        assert_ne!(stored, OLD_KEY);
        assert_eq!(info.prefix, key_prefix(&stored));
        assert!(info.expiration.unwrap() > Utc::now() + Duration::days(89));
        assert_eq!(f.hs.mint_count(), 1);

        // Old key was expired upstream.
        assert!(!f.lifecycle.test_key(Some(OLD_KEY)).await);
    }

    #[tokio::test]
    async fn skips_when_six_days_remain() {
        let f = fixture(Duration::days(6)).await;
        let outcome = f.lifecycle.renew_if_needed().await.unwrap();
        assert!(matches!(outcome, RenewalOutcome::NotNeeded(_)));
        assert_eq!(f.hs.mutation_count(), 0);
        assert_eq!(
            f.lifecycle.credentials().get_key().await.unwrap(),
            OLD_KEY
        );
    }

    #[tokio::test]
    async fn failed_verification_keeps_stored_key_unchanged() {
        let f = fixture(Duration::days(1)).await;
        f.hs.reject_minted_keys(true).await;
        let before = f.backend.get(KEY_BLOB).await.unwrap();

        let outcome = f.lifecycle.renew_if_needed().await.unwrap();

        assert_eq!(outcome, RenewalOutcome::Failed);
        assert_eq!(f.backend.get(KEY_BLOB).await.unwrap(), before);
        assert!(f.lifecycle.test_key(None).await);
    }

    #[tokio::test]
    async fn concurrent_renewals_mint_once() {
        let f = fixture(Duration::days(2)).await;

        let (a, b) = tokio::join!(f.lifecycle.renew_if_needed(), f.lifecycle.renew_if_needed());
        let outcomes = [a.unwrap(), b.unwrap()];

        assert_eq!(f.hs.mint_count(), 1);
        assert_eq!(
            outcomes
                .iter()
                .filter(|o| matches!(o, RenewalOutcome::Renewed(_)))
                .count(),
            1
        );
        assert_eq!(
            outcomes
                .iter()
                .filter(|o| matches!(o, RenewalOutcome::NotNeeded(_)))
                .count(),
            1
        );
    }

    #[tokio::test]
    async fn unconfigured_store_reports_unconfigured() {
        let credentials = Arc::new(CredentialStore::new(
            Arc::new(MemoryBackend::new()),
            EncryptionKey::from_secret("secret").unwrap(),
        ));
        let lifecycle = KeyLifecycle::new(Arc::new(MemoryHeadscale::new()), credentials);
        assert!(matches!(
            lifecycle.renew_if_needed().await,
            Err(LifecycleError::Unconfigured)
        ));
        assert_eq!(lifecycle.state().await.unwrap(), KeyState::Unconfigured);
    }

    #[tokio::test]
    async fn state_distinguishes_valid_and_near_expiry() {
        let f = fixture(Duration::days(30)).await;
        assert!(matches!(f.lifecycle.state().await.unwrap(), KeyState::Valid(_)));

        let f = fixture(Duration::days(3)).await;
        assert!(matches!(
            f.lifecycle.state().await.unwrap(),
            KeyState::NearExpiry(_)
        ));
    }

    /// Memory backend whose writes can be switched off.
    #[derive(Clone)]
    struct FlakyBackend {
        inner: MemoryBackend,
        fail_writes: Arc<AtomicBool>,
    }

    #[async_trait::async_trait]
    impl BlobStore for FlakyBackend {
        async fn get(&self, name: &str) -> Result<Option<Vec<u8>>, StorageError> {
            self.inner.get(name).await
        }

        async fn put(&self, name: &str, value: &[u8]) -> Result<(), StorageError> {
            if self.fail_writes.load(Ordering::SeqCst) {
                return Err(StorageError::Write {
                    name: name.to_owned(),
                    reason: "permission denied".to_owned(),
                    kind: std::io::ErrorKind::PermissionDenied,
                });
            }
            self.inner.put(name, value).await
        }

        async fn delete(&self, name: &str) -> Result<(), StorageError> {
            self.inner.delete(name).await
        }
    }

    #[tokio::test]
    async fn persist_failure_does_not_expire_old_key() {
        let hs = MemoryHeadscale::new();
        hs.seed_api_key(OLD_KEY, Utc::now() + Duration::days(1)).await;
        let backend = FlakyBackend {
            inner: MemoryBackend::new(),
            fail_writes: Arc::new(AtomicBool::new(false)),
        };
        let credentials = Arc::new(CredentialStore::new(
            Arc::new(backend.clone()),
            EncryptionKey::from_secret("secret").unwrap(),
        ));
        credentials.set_key(OLD_KEY).await.unwrap();
        backend.fail_writes.store(true, Ordering::SeqCst);
        let lifecycle = KeyLifecycle::new(Arc::new(hs.clone()), credentials);

        let err = lifecycle.renew_if_needed().await.unwrap_err();

        assert!(matches!(err, LifecycleError::Persist(ref e) if e.is_permission_denied()));
        assert_eq!(hs.mint_count(), 1);
        assert!(lifecycle.test_key(Some(OLD_KEY)).await);
        assert_eq!(lifecycle.credentials().get_key().await.unwrap(), OLD_KEY);
    }
}
