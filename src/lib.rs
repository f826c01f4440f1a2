//! # blocktable
//!
//! A low-level storage allocator that carves fixed-size blocks into pages:
//! - Blocks are raw backing extents with a slot bitmap and a refcount
//! - Pages occupy one slot each and are recycled before storage grows
//! - All bookkeeping lives in a transactional metadata store (redb)
//! - Single-writer transactions make every allocation batch atomic
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  File layer (caller)                         │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │ acquire / release / open_file / list
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │                        Table                                 │
//! │          (metadata store + block directory)                  │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │ writable transaction
//!          ┌────────────┴────────────┐
//!          ▼                         ▼
//!   ┌─────────────┐          ┌─────────────┐
//!   │    Page     │─────────►│    Block    │
//!   │  Allocator  │          │   Manager   │
//!   └──────┬──────┘          └──────┬──────┘
//!          │                        │
//!          ▼                        ▼
//!   ┌─────────────┐          ┌─────────────┐
//!   │    Codec    │          │   Extents   │
//!   │ (records)   │          │ (block dir) │
//!   └─────────────┘          └─────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod codec;
pub mod store;
pub mod extent;
pub mod block;
pub mod page;
pub mod verify;
pub mod table;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{BlockTableError, RecordKind, Result};
pub use config::{Config, Layout, DEFAULT_BLOCK_SIZE, DEFAULT_PAGE_SIZE};
pub use codec::{BlockRecord, FileRecord, PageRecord};
pub use page::{Page, ReleaseReport};
pub use store::Txn;
pub use table::{Table, TableStats};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of blocktable
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
