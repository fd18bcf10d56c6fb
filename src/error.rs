//! # Store Error Kinds
//!
//! The store reports failures as [`eyre::Report`]s, but every failure that is
//! part of the public contract bottoms out in a [`StoreError`] so callers can
//! tell the kinds apart by downcasting:
//!
//! ```ignore
//! match manager.get("missing").unwrap_err().downcast_ref::<StoreError>() {
//!     Some(StoreError::KeyNotFound { .. }) => { /* expected */ }
//!     other => panic!("unexpected failure: {:?}", other),
//! }
//! ```
//!
//! The two key-miss shapes deserve a note: a `get` that finds an empty index
//! slot and a `get` that walks a chain without a match both raise
//! [`StoreError::KeyNotFound`] (distinguishable by message), but `delete` is
//! asymmetric - an empty slot is a silent success (idempotent cleanup) while
//! a populated chain that lacks the key raises
//! [`StoreError::DeleteChainMiss`], since the index claims the key should
//! have been there.

use thiserror::Error;

/// Failure kinds raised by store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Filesystem open/create/map/lock failure.
    #[error("i/o failure: {0}")]
    Io(#[from] std::io::Error),

    /// An existing file's size differs from the configured total size.
    #[error("store file is {actual} bytes, expected {expected}")]
    SizeMismatch { expected: u64, actual: u64 },

    /// A record declares out-of-range sizes, or a chain pointer falls
    /// outside the data region.
    #[error("corrupt record: {0}")]
    CorruptRecord(String),

    /// An append does not fit between the write watermark and the end of
    /// the data block.
    #[error("data block full: record needs {needed} bytes, {available} available")]
    OutOfSpace { needed: u32, available: u32 },

    /// Lookup miss. `context` says whether the index slot was empty or the
    /// bucket chain was walked without a match.
    #[error("key [{key}] was not found: {context}")]
    KeyNotFound { key: String, context: &'static str },

    /// Delete walked a populated bucket chain and the key was not on it.
    #[error("delete failed: key [{key}] is missing from its bucket chain")]
    DeleteChainMiss { key: String },

    /// Empty key or empty value handed to a write operation.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl StoreError {
    /// Lookup miss on an empty index slot.
    pub(crate) fn not_in_index(key: &str) -> Self {
        StoreError::KeyNotFound {
            key: key.to_string(),
            context: "no index entry",
        }
    }

    /// Lookup miss after walking the full bucket chain.
    pub(crate) fn not_in_chain(key: &str) -> Self {
        StoreError::KeyNotFound {
            key: key.to_string(),
            context: "not present in its bucket chain",
        }
    }
}
