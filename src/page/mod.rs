//! Page Module
//!
//! Page allocation with recycling.
//!
//! ## Allocation Order
//! 1. Recycle free page records (refcount 0), in id order
//! 2. Place new pages in the first block with a free slot
//! 3. Create a block when every existing block is full
//!
//! ## Growth State Machine (per new page)
//! ```text
//!   Found ──┐                       ┌──► Committed
//!           ├──► SlotMarked ────────┤
//!   Created ┘                       └──► (failure) unwind
//! ```
//! Unwinding clears the slot bit and drops the block reference taken for
//! the page, so a failed call leaves no slot marked without a page record.

mod allocator;

pub use allocator::PageAllocator;

use crate::codec::PageRecord;
use crate::error::BlockTableError;

/// An allocated page and where its bytes live
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    pub record: PageRecord,

    /// Backing extent of the page's block
    pub extent: String,

    /// Byte offset of the page's slot inside the extent
    pub extent_offset: u64,
}

impl Page {
    pub fn id(&self) -> u64 {
        self.record.id
    }
}

/// Outcome of a batch release
///
/// Every id is attempted; failures are collected rather than aborting the batch.
#[derive(Debug, Default)]
pub struct ReleaseReport {
    /// Number of ids whose refcount was dropped
    pub released: usize,

    /// Ids that could not be released, with the reason
    pub failures: Vec<(u64, BlockTableError)>,
}

impl ReleaseReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}
