//! Integrity checks
//!
//! Cross-checks block and page records against each other:
//! - set slot bits ⇔ live pages occupying those slots
//! - free pages have no owner and no slot bit
//! - a block holds at least one reference per occupied slot
//! - every page is sized to its block's slots

use std::collections::HashMap;
use std::fmt;

use crate::codec::{BlockRecord, PageRecord};

/// One broken invariant
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Violation {
    /// Bitmap popcount differs from the number of live pages in the block
    OccupancyMismatch {
        block_id: u64,
        occupied: u64,
        live_pages: u64,
    },
    RefcountBelowOccupancy {
        block_id: u64,
        refcount: u64,
        occupied: u64,
    },
    FreePageOwned { page_id: u64, file_id: u64 },
    FreePageHoldsSlot { page_id: u64, block_id: u64, slot: u64 },
    LivePageUnmarked { page_id: u64, block_id: u64, slot: u64 },
    SlotShared {
        block_id: u64,
        slot: u64,
        first: u64,
        second: u64,
    },
    DanglingPage { page_id: u64, block_id: u64 },
    SlotOutOfRange { page_id: u64, block_id: u64, slot: u64 },
    /// Page size differs from the slot size of the block it sits in
    PageSizeMismatch {
        page_id: u64,
        block_id: u64,
        size: u64,
        slot_size: u64,
    },
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Violation::OccupancyMismatch {
                block_id,
                occupied,
                live_pages,
            } => write!(
                f,
                "block {}: {} slots marked but {} live pages",
                block_id, occupied, live_pages
            ),
            Violation::RefcountBelowOccupancy {
                block_id,
                refcount,
                occupied,
            } => write!(
                f,
                "block {}: refcount {} below {} occupied slots",
                block_id, refcount, occupied
            ),
            Violation::FreePageOwned { page_id, file_id } => {
                write!(f, "page {}: free but owned by file {}", page_id, file_id)
            }
            Violation::FreePageHoldsSlot {
                page_id,
                block_id,
                slot,
            } => write!(
                f,
                "page {}: free but slot {} of block {} is marked",
                page_id, slot, block_id
            ),
            Violation::LivePageUnmarked {
                page_id,
                block_id,
                slot,
            } => write!(
                f,
                "page {}: live but slot {} of block {} is clear",
                page_id, slot, block_id
            ),
            Violation::SlotShared {
                block_id,
                slot,
                first,
                second,
            } => write!(
                f,
                "block {} slot {}: held by pages {} and {}",
                block_id, slot, first, second
            ),
            Violation::DanglingPage { page_id, block_id } => {
                write!(f, "page {}: block {} does not exist", page_id, block_id)
            }
            Violation::SlotOutOfRange {
                page_id,
                block_id,
                slot,
            } => write!(
                f,
                "page {}: slot {} is outside block {}",
                page_id, slot, block_id
            ),
            Violation::PageSizeMismatch {
                page_id,
                block_id,
                size,
                slot_size,
            } => write!(
                f,
                "page {}: size {} but block {} has {}-byte slots",
                page_id, size, block_id, slot_size
            ),
        }
    }
}

/// Result of a full integrity scan
#[derive(Debug, Default)]
pub struct IntegrityReport {
    pub blocks: u64,
    pub pages: u64,
    pub live_pages: u64,
    pub violations: Vec<Violation>,
}

impl IntegrityReport {
    pub fn is_clean(&self) -> bool {
        self.violations.is_empty()
    }
}

/// Check a consistent snapshot of all blocks and pages
pub fn check(blocks: &[BlockRecord], pages: &[PageRecord]) -> IntegrityReport {
    let mut report = IntegrityReport {
        blocks: blocks.len() as u64,
        pages: pages.len() as u64,
        ..Default::default()
    };

    let by_id: HashMap<u64, &BlockRecord> = blocks.iter().map(|b| (b.id, b)).collect();
    let mut live_per_block: HashMap<u64, u64> = HashMap::new();
    let mut holders: HashMap<(u64, u64), u64> = HashMap::new();

    for page in pages {
        let Some(block) = by_id.get(&page.block_id) else {
            report.violations.push(Violation::DanglingPage {
                page_id: page.id,
                block_id: page.block_id,
            });
            continue;
        };
        if page.block_slot >= block.capacity() {
            report.violations.push(Violation::SlotOutOfRange {
                page_id: page.id,
                block_id: block.id,
                slot: page.block_slot,
            });
            continue;
        }
        if page.size != block.slot_size() {
            report.violations.push(Violation::PageSizeMismatch {
                page_id: page.id,
                block_id: block.id,
                size: page.size,
                slot_size: block.slot_size(),
            });
        }
        let marked = block.is_slot_used(page.block_slot);

        if page.is_free() {
            if page.file_id != 0 {
                report.violations.push(Violation::FreePageOwned {
                    page_id: page.id,
                    file_id: page.file_id,
                });
            }
            if marked {
                report.violations.push(Violation::FreePageHoldsSlot {
                    page_id: page.id,
                    block_id: block.id,
                    slot: page.block_slot,
                });
            }
            continue;
        }

        report.live_pages += 1;
        *live_per_block.entry(block.id).or_default() += 1;

        if !marked {
            report.violations.push(Violation::LivePageUnmarked {
                page_id: page.id,
                block_id: block.id,
                slot: page.block_slot,
            });
        }
        if let Some(first) = holders.insert((block.id, page.block_slot), page.id) {
            report.violations.push(Violation::SlotShared {
                block_id: block.id,
                slot: page.block_slot,
                first,
                second: page.id,
            });
        }
    }

    for block in blocks {
        let occupied = block.occupied();
        let live_pages = live_per_block.get(&block.id).copied().unwrap_or(0);
        if occupied != live_pages {
            report.violations.push(Violation::OccupancyMismatch {
                block_id: block.id,
                occupied,
                live_pages,
            });
        }
        if block.refcount < occupied {
            report.violations.push(Violation::RefcountBelowOccupancy {
                block_id: block.id,
                refcount: block.refcount,
                occupied,
            });
        }
    }

    report
}
