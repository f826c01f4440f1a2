//! Error types for blocktable
//!
//! Provides a unified error type for all operations.

use std::fmt;

use thiserror::Error;

/// Result type alias using BlockTableError
pub type Result<T> = std::result::Result<T, BlockTableError>;

/// The three record kinds persisted in the metadata store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    Block,
    Page,
    File,
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordKind::Block => f.write_str("block"),
            RecordKind::Page => f.write_str("page"),
            RecordKind::File => f.write_str("file"),
        }
    }
}

/// Unified error type for blocktable operations
#[derive(Debug, Error)]
pub enum BlockTableError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to provision backing extent for block {id}: {source}")]
    ExtentProvision {
        id: u64,
        #[source]
        source: std::io::Error,
    },

    // -------------------------------------------------------------------------
    // Metadata Store Errors
    // -------------------------------------------------------------------------
    #[error("Metadata store unavailable: {0}")]
    StoreUnavailable(#[from] redb::Error),

    #[error("Mutating operation requires a writable transaction")]
    NotWritable,

    // -------------------------------------------------------------------------
    // Lookup Errors
    // -------------------------------------------------------------------------
    #[error("Block {0} not found")]
    BlockNotFound(u64),

    #[error("Page {0} not found")]
    PageNotFound(u64),

    #[error("File {0:?} already exists")]
    FileExists(String),

    #[error("Page {0} is not allocated")]
    PageNotLive(u64),

    // -------------------------------------------------------------------------
    // Record Errors
    // -------------------------------------------------------------------------
    #[error("Corrupt {kind} record: {reason}")]
    CorruptRecord { kind: RecordKind, reason: String },

    #[error("Refcount underflow on {kind} {id}")]
    RefcountUnderflow { kind: RecordKind, id: u64 },

    #[error("{kind} name of {len} bytes does not fit a record")]
    NameTooLong { kind: RecordKind, len: usize },

    // -------------------------------------------------------------------------
    // Slot Errors
    // -------------------------------------------------------------------------
    #[error("Slot {slot} out of range for block {block_id} (capacity {capacity})")]
    SlotOutOfRange {
        block_id: u64,
        slot: u64,
        capacity: u64,
    },

    #[error("Slot {slot} of block {block_id} is already occupied")]
    SlotConflict { block_id: u64, slot: u64 },

    // -------------------------------------------------------------------------
    // Allocation Errors
    // -------------------------------------------------------------------------
    #[error("Failed to allocate {requested} pages: {source}")]
    AllocationFailed {
        requested: u64,
        #[source]
        source: Box<BlockTableError>,
    },

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),
}

impl BlockTableError {
    /// Build a `CorruptRecord` error
    pub fn corrupt(kind: RecordKind, reason: impl Into<String>) -> Self {
        BlockTableError::CorruptRecord {
            kind,
            reason: reason.into(),
        }
    }
}

// redb splits its errors by call site; all of them mean the store is unusable
// for the current operation.
macro_rules! store_error_from {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for BlockTableError {
                fn from(e: $ty) -> Self {
                    BlockTableError::StoreUnavailable(redb::Error::from(e))
                }
            }
        )*
    };
}

store_error_from!(
    redb::DatabaseError,
    redb::TransactionError,
    redb::TableError,
    redb::StorageError,
    redb::CommitError,
);
