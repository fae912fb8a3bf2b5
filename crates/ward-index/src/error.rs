//! Index error types.

use thiserror::Error;
use ward_region::RegionError;

/// Index error type.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IndexError {
    /// A region names a parent the index does not hold.
    #[error("parent {parent} of region {child} is not in the index")]
    UnknownParent {
        /// Region whose parent is missing.
        child: String,
        /// Missing parent id.
        parent: String,
    },

    /// No region with this id.
    #[error("region not found: {0}")]
    NotFound(String),

    /// Region-level failure such as circular inheritance.
    #[error(transparent)]
    Region(#[from] RegionError),
}

/// Result type for index operations.
pub type IndexResult<T> = Result<T, IndexError>;
