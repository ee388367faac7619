//! Error types for the offset engine
//!
//! Range errors (`InvalidHour`, `InvalidLearningRate`) are raised at the
//! point of use and are never silently clamped.

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Offset engine error types
#[derive(Error, Debug)]
pub enum Error {
    /// Hour-of-day outside `0..=23`
    #[error("Invalid hour: {0} (expected 0..=23)")]
    InvalidHour(u32),

    /// Learning rate outside `(0, 1]`
    #[error("Invalid learning rate: {0} (expected 0 < rate <= 1)")]
    InvalidLearningRate(f64),

    /// Any other configuration value out of range
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Persisted schema version that no migration path knows about
    #[error("Unsupported schema version: {0}")]
    UnsupportedVersion(String),

    /// Persisted document is structurally broken (missing keys, wrong nesting)
    #[error("Invalid persisted document: {0}")]
    InvalidDocument(String),

    /// Persisted document belongs to a different entity
    #[error("Entity mismatch: expected {expected}, found {found}")]
    EntityMismatch {
        /// Entity the caller asked for
        expected: String,
        /// Entity recorded in the document
        found: String,
    },

    /// Backend write/read failed
    #[error("Storage error: {0}")]
    StorageError(String),

    /// Backend cannot be reached at all
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// True for the two range errors raised by argument validation.
    #[must_use]
    pub const fn is_range_error(&self) -> bool {
        matches!(self, Self::InvalidHour(_) | Self::InvalidLearningRate(_))
    }
}
