//! Error types for chunk store operations
//!
//! Every variant belongs to one of two classes (see [`ErrorClass`]):
//! - `NoSpace`: a tier's free-id allocator or the per-file chunk cap is
//!   exhausted. Callers may retry with another policy or surface ENOSPC.
//! - `Io`: a location the engine cannot serve, a device transfer failure or an
//!   invalid free. Non-recoverable for the operation that hit it.

use crate::chunk::ChunkLocation;
use thiserror::Error;

/// Coarse classification of a [`StoreError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Out of chunks (tier exhausted or per-file limit reached)
    NoSpace,
    /// Unserviceable location, device failure or invalid request
    Io,
}

/// Storage tier named in capacity errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Memory,
    Spillover,
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Tier::Memory => write!(f, "memory pool"),
            Tier::Spillover => write!(f, "spillover device"),
        }
    }
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Out of space: {tier} has no free chunks")]
    NoSpace { tier: Tier },

    #[error("File chunk limit reached ({limit} chunks)")]
    FileChunkLimit { limit: u64 },

    /// An extension stopped because the allocator could not serve a chunk
    #[error("Out of space: no chunk available for logical chunk {chunk}: {source}")]
    ExtendFailed {
        chunk: u64,
        #[source]
        source: Box<StoreError>,
    },

    #[error("No usable backing tier is enabled")]
    UnsupportedTier,

    #[error("Container-backed chunks are not implemented")]
    ContainerUnsupported,

    #[error("Chunk {chunk} is already free")]
    AlreadyFree { chunk: u64 },

    #[error("Chunk id {physical_id} does not belong to location {location:?}")]
    LocationMismatch {
        location: ChunkLocation,
        physical_id: u64,
    },

    #[error("Logical chunk {chunk} out of range (file has {chunk_count} chunks)")]
    ChunkOutOfRange { chunk: u64, chunk_count: u64 },

    #[error("Chunks must be appended at the tail: requested {requested}, chunk count {chunk_count}")]
    NonTailAllocation { requested: u64, chunk_count: u64 },

    #[error("Segment [{offset}, {offset}+{len}) exceeds chunk size {chunk_size}")]
    SegmentOutOfBounds {
        offset: u64,
        len: usize,
        chunk_size: u64,
    },

    #[error("{0} is not attached to this store")]
    TierNotAttached(Tier),

    #[error("Short device transfer: expected {expected} bytes, got {actual}")]
    ShortTransfer { expected: usize, actual: usize },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Configuration parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),
}

impl StoreError {
    /// Map this error onto the two-way NoSpace / Io taxonomy
    pub fn class(&self) -> ErrorClass {
        match self {
            StoreError::NoSpace { .. }
            | StoreError::FileChunkLimit { .. }
            | StoreError::ExtendFailed { .. } => ErrorClass::NoSpace,
            _ => ErrorClass::Io,
        }
    }

    pub fn is_no_space(&self) -> bool {
        self.class() == ErrorClass::NoSpace
    }
}

impl From<validator::ValidationErrors> for StoreError {
    fn from(err: validator::ValidationErrors) -> Self {
        StoreError::InvalidConfig(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classes() {
        assert_eq!(
            StoreError::NoSpace { tier: Tier::Spillover }.class(),
            ErrorClass::NoSpace
        );
        assert!(StoreError::FileChunkLimit { limit: 4 }.is_no_space());
        assert_eq!(StoreError::UnsupportedTier.class(), ErrorClass::Io);
        assert_eq!(StoreError::AlreadyFree { chunk: 3 }.class(), ErrorClass::Io);
        assert_eq!(
            StoreError::ShortTransfer {
                expected: 8,
                actual: 2
            }
            .class(),
            ErrorClass::Io
        );
    }

    #[test]
    fn test_extend_failure_is_no_space() {
        let err = StoreError::ExtendFailed {
            chunk: 0,
            source: Box::new(StoreError::UnsupportedTier),
        };
        assert!(err.is_no_space());

        let source = std::error::Error::source(&err).unwrap();
        assert_eq!(source.to_string(), StoreError::UnsupportedTier.to_string());
    }

    #[test]
    fn test_io_conversion() {
        let err: StoreError = std::io::Error::new(std::io::ErrorKind::Other, "boom").into();
        assert!(matches!(err, StoreError::Io(_)));
        assert!(!err.is_no_space());
    }
}
