#![forbid(unsafe_code)]
//! Shared error type and identifier aliases.

use std::path::PathBuf;

/// Prefix carried by every capacity error message. Operational tooling matches on it.
pub const CAPACITY_EXCEEDED_PREFIX: &str = "Id capacity exceeded";

/// Errors raised by the id allocator and the record stores built on it.
#[derive(thiserror::Error, Debug)]
pub enum SombraError {
    /// Underlying I/O failure.
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),
    /// A parameter was rejected before any state changed.
    #[error("invalid argument: {0}")]
    Invalid(&'static str),
    /// An id outside `[0, high_id)` was handed back to the allocator.
    #[error("invalid argument: illegal id {id}, high id is {high_id}")]
    IllegalId {
        /// The rejected id.
        id: u64,
        /// The allocator's watermark at the time of the call.
        high_id: u64,
    },
    /// The operation is not valid in the current lifecycle state.
    #[error("invalid state: {0}")]
    InvalidState(&'static str),
    /// A mutating call was issued against a read-only generator.
    #[error("read-only: {0}")]
    ReadOnly(&'static str),
    /// The id file carries the sticky marker: it is open elsewhere or was not closed cleanly.
    #[error("sticky id file {}: not closed cleanly or already open; delete it to rebuild", path.display())]
    StickyFile {
        /// Path of the offending id file.
        path: PathBuf,
    },
    /// An allocation or rebuild needs an id beyond what the record format can address.
    #[error("Id capacity exceeded: id {id} is beyond max id {max_id}")]
    CapacityExceeded {
        /// First id that does not fit.
        id: u64,
        /// Largest id the format can address.
        max_id: u64,
    },
    /// On-disk data failed a structural check.
    #[error("corruption: {0}")]
    Corruption(&'static str),
    /// A file or store that was expected to exist does not.
    #[error("not found: {0}")]
    NotFound(&'static str),
}

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, SombraError>;

/// Coarse classification callers use to decide between aborting and rebuilding.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ErrorKind {
    /// Bad parameter; nothing was mutated.
    InvalidArgument,
    /// Wrong lifecycle state (closed generator, read-only handle, missing store).
    InvalidState,
    /// Storage failure: sticky file, capacity, corruption or I/O.
    Storage,
}

impl SombraError {
    /// Returns the coarse category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            SombraError::Invalid(_) | SombraError::IllegalId { .. } => ErrorKind::InvalidArgument,
            SombraError::InvalidState(_)
            | SombraError::ReadOnly(_)
            | SombraError::NotFound(_) => ErrorKind::InvalidState,
            SombraError::Io(_)
            | SombraError::StickyFile { .. }
            | SombraError::CapacityExceeded { .. }
            | SombraError::Corruption(_) => ErrorKind::Storage,
        }
    }

    /// True for failures the store layer must surface as storage failures.
    pub fn is_storage_failure(&self) -> bool {
        self.kind() == ErrorKind::Storage
    }

    /// True when the error is the capacity-exceeded failure.
    pub fn is_capacity_exceeded(&self) -> bool {
        matches!(self, SombraError::CapacityExceeded { .. })
    }

    /// True when the error is the sticky-file failure.
    pub fn is_sticky(&self) -> bool {
        matches!(self, SombraError::StickyFile { .. })
    }
}
