//! Region error types.

use thiserror::Error;

/// Region error type.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegionError {
    /// Region id contains characters outside the accepted set.
    #[error("invalid region id: {0:?}")]
    InvalidId(String),

    /// Assigning the parent would make the region its own ancestor.
    #[error("circular inheritance: {child} cannot inherit from {parent}")]
    CircularInheritance {
        /// Region whose parent was being set.
        child: String,
        /// Proposed parent.
        parent: String,
    },

    /// The shape pair has no exact intersection test.
    #[error("unsupported intersection between {0} and {1}")]
    UnsupportedIntersection(&'static str, &'static str),

    /// A polygon needs at least one point to have bounds.
    #[error("polygon has no points")]
    DegeneratePolygon,

    /// A persisted flag value could not be parsed for its flag type.
    #[error("invalid value {value:?} for flag {flag}")]
    InvalidFlagValue {
        /// Flag name.
        flag: String,
        /// Raw value that failed to parse.
        value: String,
    },

    /// No flag is registered under this name.
    #[error("unknown flag: {0}")]
    UnknownFlag(String),

    /// A flag with this name is already registered.
    #[error("flag already registered: {0}")]
    FlagConflict(String),
}

/// Result type for region operations.
pub type RegionResult<T> = Result<T, RegionError>;
