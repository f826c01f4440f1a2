//! Block Manager
//!
//! Every operation reads the authoritative record inside the caller's
//! transaction and writes it back before returning. Nothing is cached.

use std::ops::ControlFlow;

use tracing::{debug, info, warn};

use crate::codec::{self, BlockRecord, BufferPool};
use crate::config::Layout;
use crate::error::{BlockTableError, RecordKind, Result};
use crate::extent::ExtentProvisioner;
use crate::store::{self, Collection, Txn};

/// Creates, refcounts, and sub-allocates blocks
///
/// Borrowed from a `Table` for the duration of a transaction.
pub struct BlockManager<'a> {
    layout: Layout,
    extents: &'a dyn ExtentProvisioner,
    buffers: &'a BufferPool,
}

impl<'a> BlockManager<'a> {
    pub fn new(layout: Layout, extents: &'a dyn ExtentProvisioner, buffers: &'a BufferPool) -> Self {
        Self {
            layout,
            extents,
            buffers,
        }
    }

    /// Read a block record
    pub fn get_block(&self, tx: &Txn, id: u64) -> Result<BlockRecord> {
        let value = store::get(tx, Collection::Blocks, &codec::id_to_key(id))?
            .ok_or(BlockTableError::BlockNotFound(id))?;
        codec::decode(&value)
    }

    /// All block records in id order
    pub fn list_blocks(&self, tx: &Txn) -> Result<Vec<BlockRecord>> {
        let mut blocks = Vec::new();
        store::scan(tx, Collection::Blocks, &[], |_, value| {
            blocks.push(codec::decode(value)?);
            Ok(ControlFlow::Continue(()))
        })?;
        Ok(blocks)
    }

    /// Create a new block with one reference and no occupied slots
    ///
    /// The backing extent is provisioned before the record is written, so a
    /// provisioning failure leaves no metadata behind.
    pub fn allocate_block(&self, tx: &Txn) -> Result<BlockRecord> {
        tx.writer()?;

        let id = store::next_sequence(tx, Collection::Blocks)?;
        let backing_name = self.extents.provision(id, self.layout.block_size)?;
        codec::check_name_len(RecordKind::Block, backing_name.len())?;

        let block = BlockRecord::new(
            id,
            self.layout.block_size,
            backing_name,
            self.layout.slots_per_block(),
        );
        self.put_block(tx, &block)?;

        info!(
            block_id = id,
            capacity = block.capacity(),
            backing = %block.backing_name,
            "allocated block"
        );
        Ok(block)
    }

    /// Drop one reference to a block
    ///
    /// Releasing a block already at zero is a `RefcountUnderflow`; the record
    /// is left untouched. A block at zero is kept for reuse, not deleted.
    pub fn release_block(&self, tx: &Txn, id: u64) -> Result<BlockRecord> {
        self.update(tx, id, |block| {
            block.refcount = block
                .refcount
                .checked_sub(1)
                .ok_or(BlockTableError::RefcountUnderflow {
                    kind: RecordKind::Block,
                    id,
                })?;
            Ok(())
        })
    }

    /// Take one more reference to a block
    pub fn increment_refcount(&self, tx: &Txn, id: u64) -> Result<BlockRecord> {
        self.update(tx, id, |block| {
            block.refcount += 1;
            Ok(())
        })
    }

    /// First block (in id order) with a free slot, and its lowest free slot
    pub fn find_available_block(&self, tx: &Txn) -> Result<Option<(BlockRecord, u64)>> {
        tx.writer()?;

        let mut found = None;
        store::scan(tx, Collection::Blocks, &[], |_, value| {
            let block: BlockRecord = codec::decode(value)?;
            match block.first_free_slot() {
                Some(slot) => {
                    found = Some((block, slot));
                    Ok(ControlFlow::Break(()))
                }
                None => Ok(ControlFlow::Continue(())),
            }
        })?;

        if let Some((block, slot)) = &found {
            debug!(block_id = block.id, slot, "found free slot");
        }
        Ok(found)
    }

    /// Set a slot bit
    ///
    /// Fails with `SlotConflict` if the slot is already occupied.
    pub fn mark_slot_used(&self, tx: &Txn, block_id: u64, slot: u64) -> Result<BlockRecord> {
        self.occupy_slot(tx, block_id, slot, false)
    }

    /// Clear a slot bit
    pub fn mark_slot_free(&self, tx: &Txn, block_id: u64, slot: u64) -> Result<BlockRecord> {
        self.update(tx, block_id, |block| {
            if !block.set_slot(slot, false)? {
                warn!(block_id, slot, "freeing a slot that was not marked used");
            }
            Ok(())
        })
    }

    // =========================================================================
    // Crate Helpers
    // =========================================================================

    /// Mark `slot` used, optionally taking a block reference for it, in one write
    pub(crate) fn occupy_slot(
        &self,
        tx: &Txn,
        block_id: u64,
        slot: u64,
        take_ref: bool,
    ) -> Result<BlockRecord> {
        self.update(tx, block_id, |block| {
            if block.set_slot(slot, true)? {
                return Err(BlockTableError::SlotConflict { block_id, slot });
            }
            if take_ref {
                block.refcount += 1;
            }
            Ok(())
        })
    }

    /// Clear `slot` and drop the reference it held, in one write
    pub(crate) fn vacate_slot(&self, tx: &Txn, block_id: u64, slot: u64) -> Result<BlockRecord> {
        self.update(tx, block_id, |block| vacate(block, slot))
    }

    pub(crate) fn put_block(&self, tx: &Txn, block: &BlockRecord) -> Result<()> {
        let value = self.buffers.encode(block);
        store::put(tx, Collection::Blocks, &codec::id_to_key(block.id), &value)
    }

    /// Read-modify-write of one block record
    ///
    /// `apply` works on a copy; nothing is written if it fails.
    fn update<F>(&self, tx: &Txn, id: u64, apply: F) -> Result<BlockRecord>
    where
        F: FnOnce(&mut BlockRecord) -> Result<()>,
    {
        tx.writer()?;
        let mut block = self.get_block(tx, id)?;
        apply(&mut block)?;
        self.put_block(tx, &block)?;
        Ok(block)
    }
}

/// Clear `slot` on `block` and release the reference it held
pub(crate) fn vacate(block: &mut BlockRecord, slot: u64) -> Result<()> {
    let refcount = block
        .refcount
        .checked_sub(1)
        .ok_or(BlockTableError::RefcountUnderflow {
            kind: RecordKind::Block,
            id: block.id,
        })?;
    if !block.set_slot(slot, false)? {
        warn!(block_id = block.id, slot, "vacating a slot that was not marked used");
    }
    block.refcount = refcount;
    Ok(())
}
