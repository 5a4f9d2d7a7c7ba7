//! Shared application state for the `MeshConsole` server.
//!
//! A single [`AppState`] is constructed at startup and shared across all
//! Axum handlers via `Arc`. It holds the upstream client, the credential
//! store, the key lifecycle manager, and the login session store.

use std::sync::Arc;

use meshconsole_client::Headscale;
use meshconsole_core::credential::CredentialStore;
use meshconsole_core::crypto::EncryptionKey;
use meshconsole_core::error::CryptoError;
use meshconsole_core::lifecycle::KeyLifecycle;
use meshconsole_storage::BlobStore;
use tokio::sync::OnceCell;

use crate::auth::SessionStore;
use crate::config::ServerConfig;
use crate::error::AppError;
use crate::routes::oidc::ProviderMetadata;

/// Errors building the application state.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("failed to derive the API key encryption key: {0}")]
    Crypto(#[from] CryptoError),

    #[error("failed to build the HTTP client: {0}")]
    Http(#[from] reqwest::Error),
}

/// Shared application state passed to all HTTP handlers.
pub struct AppState {
    /// Loaded configuration.
    pub config: ServerConfig,
    /// The coordination server.
    pub api: Arc<dyn Headscale>,
    /// Encrypted API key storage.
    pub credentials: Arc<CredentialStore>,
    /// Key validation and renewal.
    pub lifecycle: Arc<KeyLifecycle>,
    /// OIDC login sessions (unused with basic auth).
    pub sessions: SessionStore,
    /// OIDC provider metadata, discovered on first login.
    pub oidc_metadata: OnceCell<ProviderMetadata>,
    /// Client for calls to the OIDC provider.
    pub http: reqwest::Client,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState").finish_non_exhaustive()
    }
}

impl AppState {
    /// Wire the state together over `api` and `storage`.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`] if the encryption key cannot be derived from
    /// the configured secret or the HTTP client cannot be built.
    pub fn new(
        config: ServerConfig,
        api: Arc<dyn Headscale>,
        storage: Arc<dyn BlobStore>,
    ) -> Result<Self, StateError> {
        let key = EncryptionKey::from_secret(&config.secret)?;
        let credentials = Arc::new(CredentialStore::new(storage, key));
        let lifecycle = Arc::new(KeyLifecycle::new(Arc::clone(&api), Arc::clone(&credentials)));
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;

        Ok(Self {
            config,
            api,
            credentials,
            lifecycle,
            sessions: SessionStore::new(),
            oidc_metadata: OnceCell::new(),
            http,
        })
    }

    /// The stored API key for an upstream call.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Unconfigured`] if no key is saved, and
    /// [`AppError::InvalidKey`] if it cannot be decrypted.
    pub async fn api_key(&self) -> Result<String, AppError> {
        Ok(self.credentials.get_key().await?)
    }
}
