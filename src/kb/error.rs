//! Knowledge-base error types.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Knowledge-base errors. Format and resource errors are fatal: the KB handle
/// is not returned.
#[derive(Error, Debug)]
pub enum KbError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Version byte of an on-disk KB does not match this binary
    #[error("KB format version mismatch: found {found}, expected {expected}")]
    Version { found: u32, expected: u32 },

    /// A KB file is missing
    #[error("KB file not found: {0}")]
    MissingFile(PathBuf),

    /// A record is truncated or otherwise malformed
    #[error("corrupt KB record: {0}")]
    Corrupt(String),

    /// Operation requires the other KB mode
    #[error("KB is in {actual} mode, operation requires {required} mode")]
    Mode {
        actual: &'static str,
        required: &'static str,
    },

    /// Meta header (de)serialization error
    #[error("KB meta error: {0}")]
    Meta(#[from] serde_json::Error),

    /// Group-index (de)serialization error
    #[error("group index error: {0}")]
    Groups(#[from] bincode::Error),

    /// Unknown distance-function key
    #[error("unknown distance function: {0}")]
    UnknownDistance(String),

    /// A rule references a predicate the library does not know
    #[error("unknown predicate id: {0}")]
    UnknownPredicate(u32),
}

/// Result type for knowledge-base operations.
pub type KbResult<T> = Result<T, KbError>;
