//! Error taxonomy and the crate-wide [`Result`] alias.

use std::io;

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, TreeError>;

/// Error taxonomy for the tree, its page codec and its page stores.
#[derive(Debug, Error)]
pub enum TreeError {
    /// Coordinate outside the geographic domain (or non-finite).
    #[error("coordinate out of range: latitude={latitude}, longitude={longitude}")]
    InvalidCoordinate {
        /// Latitude the caller supplied, in decimal degrees.
        latitude: f64,
        /// Longitude the caller supplied, in decimal degrees.
        longitude: f64,
    },
    /// A fetched page does not decode to a valid node layout.
    #[error("corrupt page: {0}")]
    CorruptPage(&'static str),
    /// The backing page store failed to complete a read or write.
    #[error("page store I/O error: {0}")]
    PageStore(#[from] io::Error),
    /// An internal consistency check failed. Indicates a bug, not user error.
    #[error("tree invariant violated: {0}")]
    InvariantViolation(&'static str),
    /// Caller supplied an argument the operation cannot accept.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
}
