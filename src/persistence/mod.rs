//! Versioned persistence of learner and thermal state
//!
//! ```text
//! PersistedDocument (2.1)
//! ├── version, entity_id, last_updated
//! ├── learning_data
//! │   ├── engine_state { enable_learning }
//! │   └── learner_data  (learner schema 1.0 / 1.1 / 1.2)
//! ├── thermal_data      (thermal snapshot 1.0)
//! └── ...unknown fields carried through unchanged
//! ```
//!
//! Older documents are migrated on load by additive steps only. Writes go
//! through a [`StorageBackend`] which stages, validates and backs up before
//! replacing the primary artifact.
//!
//! ## Usage
//!
//! ```rust
//! use offset_engine::persistence::{MemoryBackend, PersistedDocument, PersistenceManager};
//!
//! # async fn example() -> offset_engine::Result<()> {
//! let manager = PersistenceManager::new(MemoryBackend::new());
//! manager.save(&PersistedDocument::new("climate.office")).await?;
//!
//! let loaded = manager.load("climate.office").await;
//! assert!(loaded.is_some());
//! assert!(manager.load("climate.kitchen").await.is_none());
//! # Ok(())
//! # }
//! ```

mod backend;
pub mod codec;
mod manager;
pub mod schema;

pub use backend::{FileBackend, MemoryBackend, StorageBackend, Validator};
pub use codec::{
    apply_document, build_document, decode_document, encode_document, validate_document_bytes,
    validate_document_structure, DocumentRestoreReport, EngineState, LearnerLoadReport,
    LearnerSnapshot, LearningData, PersistedDocument, ThermalDataHooks, ThermalSnapshot,
};
pub use manager::{PersistenceManager, SaveOutcome};
pub use schema::{DocumentSchemaVersion, LearnerSchemaVersion};
