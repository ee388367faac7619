//! Per-entity serialised save and load
//!
//! ```text
//! save(doc) ──lock(entity)──> encode ──> backend.write_atomic(validate)
//! load(id)  ──lock(entity)──> backend.read ──> migrate ──> validate ──> check id
//!                                   └── structurally broken? try the backup
//! ```

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::backend::StorageBackend;
use super::codec::{self, PersistedDocument};
use crate::{Error, Result};

/// Result of a save request that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    /// Document is now the primary artifact
    Written,
    /// Backend unavailable; nothing was written
    Skipped,
}

/// Serialises persistence per entity so concurrent requests cannot interleave.
#[derive(Debug)]
pub struct PersistenceManager<B> {
    backend: Arc<B>,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl<B: StorageBackend + 'static> PersistenceManager<B> {
    /// Manager over `backend`.
    #[must_use]
    pub fn new(backend: B) -> Self {
        Self {
            backend: Arc::new(backend),
            locks: DashMap::new(),
        }
    }

    /// Underlying backend.
    #[must_use]
    pub fn backend(&self) -> &B {
        &self.backend
    }

    fn lock_for(&self, entity_id: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(entity_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Write `document` as the entity's primary artifact.
    ///
    /// An unavailable backend is logged and reported as [`SaveOutcome::Skipped`].
    ///
    /// # Errors
    ///
    /// Encoding, validation or storage failures. The previous artifact is
    /// left in place.
    pub async fn save(&self, document: &PersistedDocument) -> Result<SaveOutcome> {
        let lock = self.lock_for(&document.entity_id);
        let _guard = lock.lock().await;

        if !self.backend.is_available().await {
            warn!(entity_id = %document.entity_id, "Storage unavailable, skipping save");
            return Ok(SaveOutcome::Skipped);
        }

        let bytes = codec::encode_document(document)?;
        match self
            .backend
            .write_atomic(&document.entity_id, bytes, codec::validate_document_bytes)
            .await
        {
            Ok(()) => {
                debug!(entity_id = %document.entity_id, "Saved entity document");
                Ok(SaveOutcome::Written)
            }
            Err(Error::StorageUnavailable(reason)) => {
                warn!(entity_id = %document.entity_id, %reason, "Storage unavailable, skipping save");
                Ok(SaveOutcome::Skipped)
            }
            Err(e) => {
                error!(entity_id = %document.entity_id, error = %e, "Failed to save entity document");
                Err(e)
            }
        }
    }

    /// Save in the background; failures are logged.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn_save(self: &Arc<Self>, document: PersistedDocument) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = manager.save(&document).await {
                error!(entity_id = %document.entity_id, error = %e, "Background save failed");
            }
        })
    }

    /// Load and migrate the entity's document, reporting why it was rejected.
    ///
    /// Falls back to the backup artifact when the primary is structurally
    /// broken. `Ok(None)` when nothing is stored or the backend is unavailable.
    ///
    /// # Errors
    ///
    /// `UnsupportedVersion`, `InvalidDocument`, `Serialization`,
    /// `EntityMismatch` or backend errors.
    pub async fn try_load(&self, entity_id: &str) -> Result<Option<PersistedDocument>> {
        let lock = self.lock_for(entity_id);
        let _guard = lock.lock().await;

        if !self.backend.is_available().await {
            warn!(entity_id, "Storage unavailable, nothing loaded");
            return Ok(None);
        }

        let Some(bytes) = self.backend.read(entity_id).await? else {
            debug!(entity_id, "No persisted document");
            return Ok(None);
        };

        match decode_bytes(&bytes, entity_id) {
            Ok(document) => Ok(Some(document)),
            Err(e @ (Error::Serialization(_) | Error::InvalidDocument(_))) => {
                warn!(entity_id, error = %e, "Primary document unreadable, trying backup");
                match self.backend.read_backup(entity_id).await? {
                    Some(backup) => {
                        let document = decode_bytes(&backup, entity_id)?;
                        info!(entity_id, "Recovered entity document from backup");
                        Ok(Some(document))
                    }
                    None => Err(e),
                }
            }
            Err(e) => Err(e),
        }
    }

    /// Load the entity's document; any mismatch or failure yields `None`.
    pub async fn load(&self, entity_id: &str) -> Option<PersistedDocument> {
        match self.try_load(entity_id).await {
            Ok(document) => document,
            Err(e) => {
                warn!(entity_id, error = %e, "Discarding persisted document");
                None
            }
        }
    }
}

fn decode_bytes(bytes: &[u8], entity_id: &str) -> Result<PersistedDocument> {
    let value: serde_json::Value = serde_json::from_slice(bytes)?;
    codec::decode_document(value, entity_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::MemoryBackend;

    #[tokio::test]
    async fn test_save_then_load() {
        let manager = PersistenceManager::new(MemoryBackend::new());
        let document = PersistedDocument::new("climate.a");
        assert_eq!(manager.save(&document).await.unwrap(), SaveOutcome::Written);
        let loaded = manager.load("climate.a").await.unwrap();
        assert_eq!(loaded, document);
    }

    #[tokio::test]
    async fn test_unavailable_backend_skips() {
        let manager = PersistenceManager::new(MemoryBackend::new());
        manager.backend().set_available(false);
        let outcome = manager.save(&PersistedDocument::new("climate.a")).await.unwrap();
        assert_eq!(outcome, SaveOutcome::Skipped);
        assert!(manager.load("climate.a").await.is_none());
    }

    #[tokio::test]
    async fn test_corrupt_primary_falls_back_to_backup() {
        let manager = PersistenceManager::new(MemoryBackend::new());
        let document = PersistedDocument::new("climate.a");
        manager.save(&document).await.unwrap();
        manager.save(&document).await.unwrap();
        manager.backend().insert_raw("climate.a", b"{ not json".to_vec());

        let loaded = manager.load("climate.a").await.unwrap();
        assert_eq!(loaded.entity_id, "climate.a");
    }

    #[tokio::test]
    async fn test_spawn_save_completes() {
        let manager = Arc::new(PersistenceManager::new(MemoryBackend::new()));
        manager
            .spawn_save(PersistedDocument::new("climate.b"))
            .await
            .unwrap();
        assert!(manager.load("climate.b").await.is_some());
    }
}
