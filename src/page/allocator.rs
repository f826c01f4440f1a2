//! Page Allocator
//!
//! Satisfies page requests by recycling freed page records first and growing
//! into blocks with free slots second. All work happens inside the caller's
//! writable transaction; the caller commits or aborts the whole batch.

use std::ops::ControlFlow;

use tracing::{debug, warn};

use crate::block::{self, BlockManager};
use crate::codec::{self, BlockRecord, BufferPool, PageRecord};
use crate::error::{BlockTableError, RecordKind, Result};
use crate::store::{self, Collection, Txn};

use super::{Page, ReleaseReport};

/// Progress of placing one new page
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GrowthStage {
    /// Existing block with a free slot; nothing held yet
    Found,
    /// New block created; its creation reference is held for this page
    Created,
    /// Slot bit set and a block reference held for this page
    SlotMarked,
    /// Page record written
    Committed,
}

/// Allocates and releases pages
pub struct PageAllocator<'a> {
    blocks: BlockManager<'a>,
    buffers: &'a BufferPool,
}

impl<'a> PageAllocator<'a> {
    pub fn new(blocks: BlockManager<'a>, buffers: &'a BufferPool) -> Self {
        Self { blocks, buffers }
    }

    /// The block manager this allocator places pages with
    pub fn blocks(&self) -> &BlockManager<'a> {
        &self.blocks
    }

    /// Read a page record
    pub fn get_page(&self, tx: &Txn, id: u64) -> Result<PageRecord> {
        let value = store::get(tx, Collection::Pages, &codec::id_to_key(id))?
            .ok_or(BlockTableError::PageNotFound(id))?;
        codec::decode(&value)
    }

    /// All page records in id order
    pub fn list_pages(&self, tx: &Txn) -> Result<Vec<PageRecord>> {
        let mut pages = Vec::new();
        store::scan(tx, Collection::Pages, &[], |_, value| {
            pages.push(codec::decode(value)?);
            Ok(ControlFlow::Continue(()))
        })?;
        Ok(pages)
    }

    /// Acquire exactly `n` pages, each with refcount 1 and no owner
    ///
    /// Free page records are recycled before any new page is created. A
    /// recycled page whose block record is missing fails the call with
    /// `BlockNotFound`; any failure while growing is reported as
    /// `AllocationFailed` after the failed page's partial state is unwound.
    pub fn acquire_pages(&self, tx: &Txn, n: u64) -> Result<Vec<Page>> {
        tx.writer()?;
        if n == 0 {
            return Ok(Vec::new());
        }

        let mut pages = self.recycle(tx, n)?;
        let recycled = pages.len() as u64;

        for _ in recycled..n {
            let page = self
                .grow_one(tx)
                .map_err(|source| BlockTableError::AllocationFailed {
                    requested: n,
                    source: Box::new(source),
                })?;
            pages.push(page);
        }

        debug!(requested = n, recycled, grown = n - recycled, "acquired pages");
        Ok(pages)
    }

    /// Drop one reference to each page in `ids`
    ///
    /// A page reaching refcount 0 loses its owner, its slot bit, and the block
    /// reference it held. Each id is handled independently: a missing page or
    /// a double release is recorded in the report and the batch continues.
    pub fn release_pages(&self, tx: &Txn, ids: &[u64]) -> Result<ReleaseReport> {
        tx.writer()?;

        let mut report = ReleaseReport::default();
        for &id in ids {
            match self.release_one(tx, id) {
                Ok(()) => report.released += 1,
                Err(e) => {
                    warn!(page_id = id, error = %e, "page release skipped");
                    report.failures.push((id, e));
                }
            }
        }

        debug!(
            released = report.released,
            failed = report.failures.len(),
            "released pages"
        );
        Ok(report)
    }

    /// Take one more reference to a live page
    pub fn share_page(&self, tx: &Txn, id: u64) -> Result<PageRecord> {
        tx.writer()?;
        let mut page = self.live_page(tx, id)?;
        page.refcount += 1;
        self.put_page(tx, &page)?;
        Ok(page)
    }

    /// Record which file owns a live page and where it sits in that file
    pub fn assign_page(&self, tx: &Txn, id: u64, file_id: u64, offset: u64) -> Result<PageRecord> {
        tx.writer()?;
        let mut page = self.live_page(tx, id)?;
        page.file_id = file_id;
        page.offset = offset;
        self.put_page(tx, &page)?;
        Ok(page)
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    /// Reclaim up to `n` free page records
    fn recycle(&self, tx: &Txn, n: u64) -> Result<Vec<Page>> {
        let mut free = Vec::new();
        store::scan(tx, Collection::Pages, &[], |_, value| {
            let page: PageRecord = codec::decode(value)?;
            if page.is_free() {
                free.push(page);
            }
            if free.len() as u64 >= n {
                Ok(ControlFlow::Break(()))
            } else {
                Ok(ControlFlow::Continue(()))
            }
        })?;

        let mut pages = Vec::with_capacity(free.len());
        for mut record in free {
            let block = self
                .blocks
                .occupy_slot(tx, record.block_id, record.block_slot, true)?;

            record.refcount = 1;
            record.file_id = 0;
            record.offset = 0;
            self.put_page(tx, &record)?;

            debug!(page_id = record.id, block_id = block.id, slot = record.block_slot, "recycled page");
            pages.push(self.locate(record, &block));
        }
        Ok(pages)
    }

    /// Place one new page, unwinding its partial state on failure
    fn grow_one(&self, tx: &Txn) -> Result<Page> {
        let (block, slot, mut stage) = match self.blocks.find_available_block(tx)? {
            Some((block, slot)) => (block, slot, GrowthStage::Found),
            None => {
                let block = self.blocks.allocate_block(tx)?;
                let slot = block.first_free_slot().unwrap_or(0);
                (block, slot, GrowthStage::Created)
            }
        };

        self.place(tx, &block, slot, &mut stage)
            .map_err(|cause| self.unwind(tx, block.id, slot, stage, cause))
    }

    fn place(
        &self,
        tx: &Txn,
        block: &BlockRecord,
        slot: u64,
        stage: &mut GrowthStage,
    ) -> Result<Page> {
        let id = store::next_sequence(tx, Collection::Pages)?;

        // A created block already holds the reference this page takes over.
        let take_ref = *stage == GrowthStage::Found;
        let block = self.blocks.occupy_slot(tx, block.id, slot, take_ref)?;
        *stage = GrowthStage::SlotMarked;

        // A fresh id must not already name a record; the sequence and the
        // page collection disagree if it does.
        if store::get(tx, Collection::Pages, &codec::id_to_key(id))?.is_some() {
            return Err(BlockTableError::corrupt(
                RecordKind::Page,
                format!("sequence issued id {} which already has a record", id),
            ));
        }

        let record = PageRecord {
            id,
            file_id: 0,
            block_id: block.id,
            block_slot: slot,
            offset: 0,
            size: block.slot_size(),
            refcount: 1,
        };
        self.put_page(tx, &record)?;
        *stage = GrowthStage::Committed;

        debug!(page_id = id, block_id = block.id, slot, "placed new page");
        Ok(self.locate(record, &block))
    }

    /// Best-effort compensation for a failed placement, handing back `cause`
    ///
    /// A failure of the compensation itself is logged and never replaces `cause`.
    fn unwind(
        &self,
        tx: &Txn,
        block_id: u64,
        slot: u64,
        stage: GrowthStage,
        cause: BlockTableError,
    ) -> BlockTableError {
        let outcome = match stage {
            GrowthStage::Found | GrowthStage::Committed => return cause,
            GrowthStage::Created => self.blocks.release_block(tx, block_id),
            GrowthStage::SlotMarked => self.blocks.vacate_slot(tx, block_id, slot),
        };

        match outcome {
            Ok(_) => debug!(block_id, slot, ?stage, error = %cause, "unwound failed page placement"),
            Err(e) => warn!(block_id, slot, ?stage, error = %e, cause = %cause, "compensation failed"),
        }
        cause
    }

    fn release_one(&self, tx: &Txn, id: u64) -> Result<()> {
        let mut page = self.get_page(tx, id)?;
        page.refcount = page
            .refcount
            .checked_sub(1)
            .ok_or(BlockTableError::RefcountUnderflow {
                kind: RecordKind::Page,
                id,
            })?;

        if page.refcount > 0 {
            return self.put_page(tx, &page);
        }

        // Validate the block side before writing either record.
        let mut block = self.blocks.get_block(tx, page.block_id)?;
        block::vacate(&mut block, page.block_slot)?;
        page.file_id = 0;

        self.blocks.put_block(tx, &block)?;
        self.put_page(tx, &page)
    }

    fn live_page(&self, tx: &Txn, id: u64) -> Result<PageRecord> {
        let page = self.get_page(tx, id)?;
        if page.is_free() {
            return Err(BlockTableError::PageNotLive(id));
        }
        Ok(page)
    }

    fn put_page(&self, tx: &Txn, page: &PageRecord) -> Result<()> {
        let value = self.buffers.encode(page);
        store::put(tx, Collection::Pages, &codec::id_to_key(page.id), &value)
    }

    fn locate(&self, record: PageRecord, block: &BlockRecord) -> Page {
        Page {
            extent_offset: record.block_slot * block.slot_size(),
            extent: block.backing_name.clone(),
            record,
        }
    }
}
