//! Directory-backed storage, the production default.
//!
//! Each blob is a single file directly inside the data directory. Writes go
//! to a uniquely named temporary file in the same directory, are flushed to
//! disk, and are then renamed over the target. Rename within a directory is
//! atomic on POSIX filesystems, so readers see either the old or the new
//! value and never a torn one.

use std::io;
use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::{BlobStore, StorageError, validate_name};

/// A storage backend that keeps one file per blob in a directory.
///
/// # Examples
///
/// ```no_run
/// # use meshconsole_storage::FileBackend;
/// let backend = FileBackend::open("/data").unwrap();
/// ```
#[derive(Debug, Clone)]
pub struct FileBackend {
    root: PathBuf,
}

impl FileBackend {
    /// Open a backend rooted at an existing directory.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Open`] if the path does not exist or is not a
    /// directory.
    pub fn open(root: impl AsRef<Path>) -> Result<Self, StorageError> {
        let root = root.as_ref();
        let meta = std::fs::metadata(root).map_err(|e| StorageError::Open {
            path: root.display().to_string(),
            reason: e.to_string(),
        })?;
        if !meta.is_dir() {
            return Err(StorageError::Open {
                path: root.display().to_string(),
                reason: "not a directory".to_owned(),
            });
        }
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    /// Return the data directory of this backend.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Full path of the file holding `name`.
    #[must_use]
    pub fn path_of(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    async fn write_temp(&self, tmp: &Path, value: &[u8]) -> io::Result<()> {
        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(tmp)
            .await?;
        file.write_all(value).await?;
        file.sync_all().await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl BlobStore for FileBackend {
    async fn get(&self, name: &str) -> Result<Option<Vec<u8>>, StorageError> {
        validate_name(name)?;
        match tokio::fs::read(self.path_of(name)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::Read {
                name: name.to_owned(),
                reason: e.to_string(),
                kind: e.kind(),
            }),
        }
    }

    async fn put(&self, name: &str, value: &[u8]) -> Result<(), StorageError> {
        validate_name(name)?;
        let target = self.path_of(name);
        let tmp = self
            .root
            .join(format!(".{name}.{}.tmp", uuid::Uuid::new_v4().simple()));

        let write_err = |e: io::Error| StorageError::Write {
            name: name.to_owned(),
            reason: e.to_string(),
            kind: e.kind(),
        };

        if let Err(e) = self.write_temp(&tmp, value).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(write_err(e));
        }

        if let Err(e) = tokio::fs::rename(&tmp, &target).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(write_err(e));
        }

        // Persist the rename itself. Not every platform allows opening a
        // directory for sync, so a failure here is only logged.
        match tokio::fs::File::open(&self.root).await {
            Ok(dir) => {
                if let Err(e) = dir.sync_all().await {
                    debug!(error = %e, "directory sync not supported");
                }
            }
            Err(e) => warn!(path = %self.root.display(), error = %e, "failed to open data directory for sync"),
        }

        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<(), StorageError> {
        validate_name(name)?;
        match tokio::fs::remove_file(self.path_of(name)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::Delete {
                name: name.to_owned(),
                reason: e.to_string(),
            }),
        }
    }

    async fn exists(&self, name: &str) -> Result<bool, StorageError> {
        validate_name(name)?;
        tokio::fs::try_exists(self.path_of(name))
            .await
            .map_err(|e| StorageError::Read {
                name: name.to_owned(),
                reason: e.to_string(),
                kind: e.kind(),
            })
    }
}
