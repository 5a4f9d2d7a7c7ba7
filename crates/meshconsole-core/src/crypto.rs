//! Sealing of the stored API key.
//!
//! The operator secret (`KEY`) is stretched with HKDF-SHA256 into an
//! AES-256-GCM key. A sealed blob looks like:
//!
//! ```text
//! version (1) | nonce (12) | ciphertext | tag (16)
//! ```
//!
//! The blob name is bound in as associated data, so a blob copied under a
//! different name will not open.

use std::fmt;

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng, Payload};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::CryptoError;

/// Current sealed blob layout.
const FORMAT_V1: u8 = 1;

const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;
const HEADER_LEN: usize = 1 + NONCE_LEN;

/// HKDF `info` for the API key sealing key.
const HKDF_INFO: &[u8] = b"meshconsole-api-key-v1";

/// AES-256-GCM key derived from the operator secret. Zeroized on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct EncryptionKey([u8; 32]);

impl fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EncryptionKey([REDACTED])")
    }
}

impl EncryptionKey {
    /// Derive the sealing key from `secret`.
    ///
    /// Deterministic: a restarted process with the same `KEY` opens what an
    /// earlier one sealed.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::KeyDerivation`] if HKDF expansion fails.
    pub fn from_secret(secret: &str) -> Result<Self, CryptoError> {
        let mut okm = [0u8; 32];
        Hkdf::<Sha256>::new(None, secret.as_bytes())
            .expand(HKDF_INFO, &mut okm)
            .map_err(|e| CryptoError::KeyDerivation {
                context: String::from_utf8_lossy(HKDF_INFO).into_owned(),
                reason: e.to_string(),
            })?;
        Ok(Self(okm))
    }

    fn cipher(&self) -> Aes256Gcm {
        Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.0))
    }
}

/// Seal `plaintext` stored under blob `name`.
///
/// # Errors
///
/// Returns [`CryptoError::Encryption`] if the AEAD operation fails.
pub fn seal(key: &EncryptionKey, name: &str, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let sealed = key
        .cipher()
        .encrypt(
            &nonce,
            Payload {
                msg: plaintext,
                aad: name.as_bytes(),
            },
        )
        .map_err(|e| CryptoError::Encryption {
            reason: e.to_string(),
        })?;

    let mut blob = Vec::with_capacity(HEADER_LEN + sealed.len());
    blob.push(FORMAT_V1);
    blob.extend_from_slice(nonce.as_slice());
    blob.extend_from_slice(&sealed);
    Ok(blob)
}

/// Open a blob produced by [`seal`] under the same `name`.
///
/// # Errors
///
/// - [`CryptoError::CiphertextTooShort`] if `blob` cannot hold a header and tag
/// - [`CryptoError::UnsupportedFormat`] for an unknown version byte
/// - [`CryptoError::Decryption`] if authentication fails
pub fn open(key: &EncryptionKey, name: &str, blob: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let min = HEADER_LEN + TAG_LEN;
    if blob.len() < min {
        return Err(CryptoError::CiphertextTooShort {
            expected: min,
            actual: blob.len(),
        });
    }

    let (header, sealed) = blob.split_at(HEADER_LEN);
    let (version, nonce) = header.split_at(1);
    if version[0] != FORMAT_V1 {
        return Err(CryptoError::UnsupportedFormat {
            version: version[0],
        });
    }

    key.cipher()
        .decrypt(
            Nonce::from_slice(nonce),
            Payload {
                msg: sealed,
                aad: name.as_bytes(),
            },
        )
        .map_err(|e| CryptoError::Decryption {
            reason: e.to_string(),
        })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn key(secret: &str) -> EncryptionKey {
        EncryptionKey::from_secret(secret).unwrap()
    }

    #[test]
    fn sealed_key_opens_with_same_secret_and_name() {
        let blob = seal(&key("operator"), "key.txt", b"abcdefghij.0123456789").unwrap();
        assert_eq!(blob[0], FORMAT_V1);
        assert_eq!(blob.len(), HEADER_LEN + 21 + TAG_LEN);
        let opened = open(&key("operator"), "key.txt", &blob).unwrap();
        assert_eq!(opened, b"abcdefghij.0123456789");
    }

    #[test]
    fn other_secret_cannot_open() {
        let blob = seal(&key("operator"), "key.txt", b"secret").unwrap();
        assert!(matches!(
            open(&key("someone else"), "key.txt", &blob),
            Err(CryptoError::Decryption { .. })
        ));
    }

    #[test]
    fn blob_is_bound_to_its_name() {
        let blob = seal(&key("operator"), "key.txt", b"secret").unwrap();
        assert!(open(&key("operator"), "other.txt", &blob).is_err());
    }

    #[test]
    fn flipped_bit_is_detected() {
        let mut blob = seal(&key("operator"), "key.txt", b"secret").unwrap();
        let last = blob.len() - 1;
        blob[last] ^= 0x01;
        assert!(matches!(
            open(&key("operator"), "key.txt", &blob),
            Err(CryptoError::Decryption { .. })
        ));
    }

    #[test]
    fn short_and_unknown_blobs_are_rejected() {
        assert!(matches!(
            open(&key("operator"), "key.txt", &[FORMAT_V1; 20]),
            Err(CryptoError::CiphertextTooShort {
                expected: 29,
                actual: 20
            })
        ));

        let mut blob = seal(&key("operator"), "key.txt", b"secret").unwrap();
        blob[0] = 9;
        assert!(matches!(
            open(&key("operator"), "key.txt", &blob),
            Err(CryptoError::UnsupportedFormat { version: 9 })
        ));
    }

    #[test]
    fn nonce_is_fresh_per_seal() {
        let k = key("operator");
        assert_ne!(
            seal(&k, "key.txt", b"same").unwrap(),
            seal(&k, "key.txt", b"same").unwrap()
        );
    }

    #[test]
    fn debug_hides_key_bytes() {
        assert_eq!(format!("{:?}", key("operator")), "EncryptionKey([REDACTED])");
    }
}
