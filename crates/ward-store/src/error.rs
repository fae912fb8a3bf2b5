//! Store error types.

use thiserror::Error;
use ward_manager::StorageError;

/// Failures inside the LMDB store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("lmdb: {0}")]
    Heed(#[from] heed::Error),

    #[error("bincode: {0}")]
    Bincode(#[from] bincode::Error),

    #[error("I/O: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

impl From<StoreError> for StorageError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Heed(e) => Self::Backend(e.to_string()),
            StoreError::Bincode(e) => Self::Serialization(e.to_string()),
            StoreError::Io(e) => Self::Io(e),
        }
    }
}
