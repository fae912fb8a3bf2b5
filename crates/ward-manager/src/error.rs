//! Storage and manager error types.

use thiserror::Error;
use ward_index::IndexError;

/// Storage error type, shared by every [`RegionDatabase`](crate::RegionDatabase).
#[derive(Debug, Error)]
pub enum StorageError {
    /// The database can only save complete snapshots.
    #[error("partial saves are not supported by this database")]
    PartialSaveUnsupported,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failure inside the storage backend.
    #[error("storage backend error: {0}")]
    Backend(String),

    /// A stored record could not be decoded.
    #[error("corrupt record {id}: {reason}")]
    Corrupt {
        /// Record key.
        id: String,
        /// What was wrong with it.
        reason: String,
    },

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Manager error type.
#[derive(Debug, Error)]
pub enum ManagerError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Index(#[from] IndexError),

    /// The world has no loaded region data.
    #[error("regions for world {0} are not loaded")]
    NotLoaded(String),
}

/// Result type for manager operations.
pub type ManagerResult<T> = Result<T, ManagerError>;
