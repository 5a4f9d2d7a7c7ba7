//! Storage error types.
//!
//! Every error variant carries enough context to diagnose the problem
//! without a debugger.

use std::io;

/// Errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The storage root could not be opened or is not a directory.
    #[error("failed to open storage at '{path}': {reason}")]
    Open { path: String, reason: String },

    /// Failed to read a blob.
    #[error("failed to read '{name}': {reason}")]
    Read {
        name: String,
        reason: String,
        kind: io::ErrorKind,
    },

    /// Failed to write a blob.
    #[error("failed to write '{name}': {reason}")]
    Write {
        name: String,
        reason: String,
        kind: io::ErrorKind,
    },

    /// Failed to delete a blob.
    #[error("failed to delete '{name}': {reason}")]
    Delete { name: String, reason: String },

    /// The blob name is empty or contains a path separator.
    #[error("invalid blob name '{name}'")]
    InvalidName { name: String },
}

impl StorageError {
    /// Whether the failure was caused by missing filesystem permissions.
    #[must_use]
    pub fn is_permission_denied(&self) -> bool {
        matches!(
            self,
            Self::Read { kind, .. } | Self::Write { kind, .. }
                if *kind == io::ErrorKind::PermissionDenied
        )
    }
}
