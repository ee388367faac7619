//! Storage backends for persisted entity documents
//!
//! - [`MemoryBackend`]: `DashMap`-backed, lost on restart. Tests and hosts
//!   that own persistence themselves.
//! - [`FileBackend`]: one JSON file per entity under a directory, written
//!   with the tmp → validate → backup → rename sequence.

use std::future::Future;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use dashmap::DashMap;
use tracing::{debug, warn};

use crate::{Error, Result};

/// Structural check run against a written artifact before it goes live.
pub type Validator = fn(&[u8]) -> Result<()>;

/// Byte-level storage keyed by entity id.
pub trait StorageBackend: Send + Sync {
    /// Whether the backing store can currently be used.
    fn is_available(&self) -> impl Future<Output = bool> + Send;

    /// Read the primary artifact. `None` if nothing was ever written.
    fn read(&self, key: &str) -> impl Future<Output = Result<Option<Vec<u8>>>> + Send;

    /// Read the artifact that was primary before the last successful write.
    fn read_backup(&self, key: &str) -> impl Future<Output = Result<Option<Vec<u8>>>> + Send {
        let _ = key;
        async { Ok(None) }
    }

    /// Replace the primary artifact.
    ///
    /// `validate` runs against the staged bytes; the previous primary is
    /// backed up and replaced only if it passes. On any failure the previous
    /// primary is left untouched.
    fn write_atomic(
        &self,
        key: &str,
        bytes: Vec<u8>,
        validate: Validator,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Remove the primary and backup artifacts. No-op if absent.
    fn delete(&self, key: &str) -> impl Future<Output = Result<()>> + Send;
}

// ============================================================================
// Memory
// ============================================================================

/// In-memory backend using a concurrent hashmap.
///
/// ```rust
/// use offset_engine::persistence::{MemoryBackend, StorageBackend};
///
/// # async fn example() -> offset_engine::Result<()> {
/// let backend = MemoryBackend::new();
/// backend.write_atomic("climate.den", b"{}".to_vec(), |_| Ok(())).await?;
/// assert_eq!(backend.read("climate.den").await?, Some(b"{}".to_vec()));
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct MemoryBackend {
    primary: DashMap<String, Vec<u8>>,
    backups: DashMap<String, Vec<u8>>,
    available: AtomicBool,
}

impl MemoryBackend {
    /// Empty, available backend.
    #[must_use]
    pub fn new() -> Self {
        Self {
            primary: DashMap::new(),
            backups: DashMap::new(),
            available: AtomicBool::new(true),
        }
    }

    /// Number of stored entities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.primary.len()
    }

    /// True when nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.primary.is_empty()
    }

    /// Simulate the store going away or coming back.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Overwrite the primary artifact without validation or backup.
    pub fn insert_raw(&self, key: &str, bytes: Vec<u8>) {
        self.primary.insert(key.to_string(), bytes);
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl StorageBackend for MemoryBackend {
    async fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    async fn read(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.primary.get(key).map(|v| v.value().clone()))
    }

    async fn read_backup(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.backups.get(key).map(|v| v.value().clone()))
    }

    async fn write_atomic(&self, key: &str, bytes: Vec<u8>, validate: Validator) -> Result<()> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(Error::StorageUnavailable("memory backend disabled".to_string()));
        }
        validate(&bytes)?;
        if let Some(previous) = self.primary.insert(key.to_string(), bytes) {
            self.backups.insert(key.to_string(), previous);
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.primary.remove(key);
        self.backups.remove(key);
        Ok(())
    }
}

// ============================================================================
// File
// ============================================================================

const FILE_PREFIX: &str = "offset_engine";

/// One JSON document per entity in a directory.
#[derive(Debug, Clone)]
pub struct FileBackend {
    dir: PathBuf,
}

impl FileBackend {
    /// Backend rooted at `dir`. The directory is created on first write.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Storage directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the primary artifact for `key`.
    #[must_use]
    pub fn primary_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{FILE_PREFIX}.{}.json", sanitize_key(key)))
    }

    /// Path of the backup artifact for `key`.
    #[must_use]
    pub fn backup_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{FILE_PREFIX}.{}.json.bak", sanitize_key(key)))
    }

    fn temp_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{FILE_PREFIX}.{}.json.tmp", sanitize_key(key)))
    }

    async fn stage_and_swap(
        primary: &Path,
        temp: &Path,
        backup: &Path,
        bytes: &[u8],
        validate: Validator,
    ) -> Result<()> {
        tokio::fs::write(temp, bytes)
            .await
            .map_err(|e| Error::StorageError(format!("writing {}: {e}", temp.display())))?;

        let staged = tokio::fs::read(temp)
            .await
            .map_err(|e| Error::StorageError(format!("reading back {}: {e}", temp.display())))?;
        validate(&staged)?;

        if tokio::fs::metadata(primary).await.is_ok() {
            tokio::fs::copy(primary, backup)
                .await
                .map_err(|e| Error::StorageError(format!("backing up {}: {e}", primary.display())))?;
        }

        tokio::fs::rename(temp, primary)
            .await
            .map_err(|e| Error::StorageError(format!("replacing {}: {e}", primary.display())))?;
        Ok(())
    }
}

/// Entity ids become file-name safe: anything outside `[A-Za-z0-9._-]` is `_`.
fn sanitize_key(key: &str) -> String {
    key.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

async fn read_optional(path: &Path) -> Result<Option<Vec<u8>>> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(Error::Io(e)),
    }
}

impl StorageBackend for FileBackend {
    async fn is_available(&self) -> bool {
        match tokio::fs::create_dir_all(&self.dir).await {
            Ok(()) => true,
            Err(e) => {
                debug!(dir = %self.dir.display(), error = %e, "Storage directory unavailable");
                false
            }
        }
    }

    async fn read(&self, key: &str) -> Result<Option<Vec<u8>>> {
        read_optional(&self.primary_path(key)).await
    }

    async fn read_backup(&self, key: &str) -> Result<Option<Vec<u8>>> {
        read_optional(&self.backup_path(key)).await
    }

    async fn write_atomic(&self, key: &str, bytes: Vec<u8>, validate: Validator) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await.map_err(|e| {
            Error::StorageUnavailable(format!("{}: {e}", self.dir.display()))
        })?;

        let primary = self.primary_path(key);
        let temp = self.temp_path(key);
        let backup = self.backup_path(key);

        let result = Self::stage_and_swap(&primary, &temp, &backup, &bytes, validate).await;
        if result.is_err() {
            if let Err(e) = tokio::fs::remove_file(&temp).await {
                if e.kind() != ErrorKind::NotFound {
                    warn!(path = %temp.display(), error = %e, "Failed to remove temporary file");
                }
            }
        }
        result
    }

    async fn delete(&self, key: &str) -> Result<()> {
        for path in [self.primary_path(key), self.backup_path(key)] {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(Error::Io(e)),
            }
        }
        Ok(())
    }
}
