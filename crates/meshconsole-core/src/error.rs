//! Error types for `meshconsole-core`.
//!
//! Variants carry enough context to diagnose a failure from the log line
//! alone. No variant ever holds an API key or key material, only prefixes.

use meshconsole_client::ClientError;
use meshconsole_storage::StorageError;

/// Errors from cryptographic operations.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    /// AES-256-GCM encryption failed.
    #[error("encryption failed: {reason}")]
    Encryption { reason: String },

    /// AES-256-GCM decryption failed (wrong secret, corrupted or tampered data).
    #[error("decryption failed: {reason}")]
    Decryption { reason: String },

    /// HKDF key derivation failed.
    #[error("key derivation failed for context '{context}': {reason}")]
    KeyDerivation { context: String, reason: String },

    /// The blob starts with a format version this build does not know.
    #[error("unsupported sealed blob format version {version}")]
    UnsupportedFormat { version: u8 },

    /// Ciphertext is too short to contain a nonce and tag.
    #[error("ciphertext too short: expected at least {expected} bytes, got {actual}")]
    CiphertextTooShort { expected: usize, actual: usize },
}

/// Errors from the credential store.
#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    /// No API key has been saved yet.
    #[error("no API key is configured")]
    NotConfigured,

    /// The stored blob could not be decrypted with the configured secret.
    #[error("stored API key could not be decrypted: {0}")]
    Decryption(#[from] CryptoError),

    /// The stored plaintext is not valid UTF-8.
    #[error("stored API key is not valid UTF-8")]
    Encoding,

    /// The storage backend failed.
    #[error("credential storage error: {0}")]
    Storage(#[from] StorageError),
}

impl CredentialError {
    /// Whether the failure is a filesystem permission problem.
    #[must_use]
    pub fn is_permission_denied(&self) -> bool {
        matches!(self, Self::Storage(e) if e.is_permission_denied())
    }
}

/// Errors from API key lifecycle operations.
#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    /// No API key has been saved yet.
    #[error("no API key is configured")]
    Unconfigured,

    /// The stored key exists but could not be read back.
    #[error("stored API key is unreadable: {0}")]
    Credential(#[source] CredentialError),

    /// Upstream lists no API key matching the stored key's prefix.
    #[error("no API key with prefix '{prefix}' found upstream")]
    KeyNotFound { prefix: String },

    /// Upstream rejected the stored key.
    #[error("upstream rejected the API key: {message}")]
    Unauthorized { message: String },

    /// Any other upstream failure.
    #[error("upstream error: {0}")]
    Upstream(#[source] ClientError),

    /// Persisting a renewed key failed; the old key is still active.
    #[error("failed to persist renewed API key: {0}")]
    Persist(#[source] CredentialError),
}

impl From<CredentialError> for LifecycleError {
    fn from(err: CredentialError) -> Self {
        match err {
            CredentialError::NotConfigured => Self::Unconfigured,
            other => Self::Credential(other),
        }
    }
}

impl From<ClientError> for LifecycleError {
    fn from(err: ClientError) -> Self {
        match err {
            ClientError::Unauthorized { message } => Self::Unauthorized { message },
            other => Self::Upstream(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_configured_maps_to_unconfigured() {
        let err: LifecycleError = CredentialError::NotConfigured.into();
        assert!(matches!(err, LifecycleError::Unconfigured));
    }

    #[test]
    fn unauthorized_client_error_is_kept_distinct() {
        let err: LifecycleError = ClientError::Unauthorized {
            message: "expired".to_owned(),
        }
        .into();
        assert!(matches!(err, LifecycleError::Unauthorized { message } if message == "expired"));

        let err: LifecycleError = ClientError::Timeout.into();
        assert!(matches!(err, LifecycleError::Upstream(ClientError::Timeout)));
    }

    #[test]
    fn messages_carry_prefix_only() {
        let err = LifecycleError::KeyNotFound {
            prefix: "abcdefghij".to_owned(),
        };
        assert_eq!(
            err.to_string(),
            "no API key with prefix 'abcdefghij' found upstream"
        );
    }
}
