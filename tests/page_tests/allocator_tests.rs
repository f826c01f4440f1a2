//! Tests for PageAllocator
//!
//! These tests verify:
//! - Growth on an empty table (one block, lowest slots first)
//! - Recycling of released page records before any growth
//! - Block count when a request spans several blocks
//! - Release semantics (slot bit, owner, refcount, double release)
//! - Batch release tolerance of missing ids
//! - Compensation when a page cannot be placed
//! - Occupancy invariants after every committed operation

use std::collections::HashSet;
use std::io;

use blocktable::block::BlockManager;
use blocktable::codec::{self, BufferPool};
use blocktable::extent::{DirExtents, ExtentProvisioner};
use blocktable::page::PageAllocator;
use blocktable::store::{self, Collection};
use blocktable::verify;
use blocktable::{BlockTableError, Config, Layout, PageRecord, RecordKind, Table, DEFAULT_PAGE_SIZE};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

/// 4 slots per block
const SMALL: Layout = Layout::new(16 * 1024, 4096);

fn setup_temp_table(layout: Layout) -> (TempDir, Table) {
    let temp_dir = TempDir::new().unwrap();
    let config = Config::builder()
        .metadata_path(temp_dir.path().join("meta.redb"))
        .layout(layout)
        .build();
    let table = Table::open(config).unwrap();
    (temp_dir, table)
}

fn assert_consistent(table: &Table) {
    let report = table.verify().unwrap();
    assert!(report.is_clean(), "violations: {:?}", report.violations);
}

/// Provisioner whose disk is always full
struct NoSpace;

impl ExtentProvisioner for NoSpace {
    fn provision(&self, id: u64, _size: u64) -> blocktable::Result<String> {
        Err(BlockTableError::ExtentProvision {
            id,
            source: io::Error::new(io::ErrorKind::Other, "no space left on device"),
        })
    }
}

/// Write a live page record under `id` without going through the allocator
fn plant_live_page(table: &Table, id: u64, block_id: u64, slot: u64) {
    let record = PageRecord {
        id,
        file_id: 0,
        block_id,
        block_slot: slot,
        offset: 0,
        size: 4096,
        refcount: 1,
    };
    let tx = table.begin_write().unwrap();
    let value = table.buffer_pool().encode(&record);
    store::put(&tx, Collection::Pages, &codec::id_to_key(id), &value).unwrap();
    drop(value);
    tx.commit().unwrap();
}

fn ids(pages: &[blocktable::Page]) -> Vec<u64> {
    pages.iter().map(|p| p.id()).collect()
}

// =============================================================================
// Growth Tests
// =============================================================================

#[test]
fn test_acquire_zero_pages_mutates_nothing() {
    let (_temp, table) = setup_temp_table(SMALL);

    let pages = table.acquire_pages(0).unwrap();

    assert!(pages.is_empty());
    let stats = table.stats().unwrap();
    assert_eq!(stats.blocks, 0);
    assert_eq!(stats.pages, 0);

    let tx = table.begin_read().unwrap();
    assert_eq!(store::current_sequence(&tx, Collection::Pages).unwrap(), 0);
    assert_eq!(store::current_sequence(&tx, Collection::Blocks).unwrap(), 0);
}

#[test]
fn test_acquire_requires_writable() {
    let (_temp, table) = setup_temp_table(SMALL);
    let tx = table.begin_read().unwrap();

    assert!(matches!(
        table.pages().acquire_pages(&tx, 1),
        Err(BlockTableError::NotWritable)
    ));
    assert!(matches!(
        table.pages().release_pages(&tx, &[1]),
        Err(BlockTableError::NotWritable)
    ));
}

#[test]
fn test_acquire_three_on_empty_table() {
    let (_temp, table) = setup_temp_table(Layout::default());

    let pages = table.acquire_pages(3).unwrap();

    assert_eq!(pages.len(), 3);
    assert_eq!(ids(&pages), vec![1, 2, 3]);
    let slots: Vec<u64> = pages.iter().map(|p| p.record.block_slot).collect();
    assert_eq!(slots, vec![0, 1, 2]);

    for page in &pages {
        assert_eq!(page.record.block_id, 1);
        assert_eq!(page.record.refcount, 1);
        assert_eq!(page.record.file_id, 0);
        assert_eq!(page.record.offset, 0);
        assert_eq!(page.record.size, DEFAULT_PAGE_SIZE);
        assert_eq!(page.extent_offset, page.record.block_slot * DEFAULT_PAGE_SIZE);
    }

    let tx = table.begin_read().unwrap();
    let blocks = table.blocks().list_blocks(&tx).unwrap();
    assert_eq!(blocks.len(), 1);
    assert_eq!(blocks[0].refcount, 3);
    assert_eq!(blocks[0].occupied(), 3);
    assert!((0..3).all(|slot| blocks[0].is_slot_used(slot)));
    assert!(!blocks[0].is_slot_used(3));
    drop(tx);

    assert_consistent(&table);
}

#[test]
fn test_acquire_spanning_blocks() {
    let (_temp, table) = setup_temp_table(SMALL);

    // 10 pages at 4 per block: ceil(10 * 4096 / 16384) = 3 blocks
    let pages = table.acquire_pages(10).unwrap();
    assert_eq!(pages.len(), 10);

    let tx = table.begin_read().unwrap();
    let blocks = table.blocks().list_blocks(&tx).unwrap();
    assert_eq!(blocks.len(), 3);
    let occupancy: Vec<u64> = blocks.iter().map(|b| b.occupied()).collect();
    assert_eq!(occupancy, vec![4, 4, 2]);
    let refcounts: Vec<u64> = blocks.iter().map(|b| b.refcount).collect();
    assert_eq!(refcounts, vec![4, 4, 2]);
    drop(tx);

    assert_consistent(&table);
}

#[test]
fn test_acquire_fills_partial_block_before_creating() {
    let (_temp, table) = setup_temp_table(SMALL);

    table.acquire_pages(3).unwrap();
    let pages = table.acquire_pages(2).unwrap();

    assert_eq!(pages[0].record.block_id, 1);
    assert_eq!(pages[0].record.block_slot, 3);
    assert_eq!(pages[1].record.block_id, 2);
    assert_eq!(pages[1].record.block_slot, 0);
    assert_eq!(table.stats().unwrap().blocks, 2);
}

#[test]
fn test_page_ids_strictly_increase() {
    let (_temp, table) = setup_temp_table(SMALL);

    let mut all = Vec::new();
    for _ in 0..4 {
        all.extend(ids(&table.acquire_pages(3).unwrap()));
    }

    assert!(all.windows(2).all(|w| w[0] < w[1]), "{:?}", all);
    assert_eq!(all.len(), 12);
}

#[test]
fn test_pages_point_at_block_extent() {
    let (_temp, table) = setup_temp_table(SMALL);

    let pages = table.acquire_pages(5).unwrap();

    assert!(pages[0].extent.ends_with("000001.blk"));
    assert!(pages[4].extent.ends_with("000002.blk"));
    assert_eq!(pages[3].extent_offset, 3 * 4096);
    assert_eq!(pages[4].extent_offset, 0);
}

// =============================================================================
// Recycling Tests
// =============================================================================

#[test]
fn test_release_then_acquire_recycles() {
    let (_temp, table) = setup_temp_table(Layout::default());

    let first = ids(&table.acquire_pages(3).unwrap());
    let report = table.release_pages(&first).unwrap();
    assert_eq!(report.released, 3);
    assert!(report.is_clean());

    let second = table.acquire_pages(2).unwrap();

    let reused: HashSet<u64> = ids(&second).into_iter().collect();
    let original: HashSet<u64> = first.into_iter().collect();
    assert!(reused.is_subset(&original));
    assert_eq!(reused.len(), 2);

    let stats = table.stats().unwrap();
    assert_eq!(stats.blocks, 1);
    assert_eq!(stats.pages, 3);
    assert_eq!(stats.live_pages, 2);

    let tx = table.begin_read().unwrap();
    assert_eq!(store::current_sequence(&tx, Collection::Pages).unwrap(), 3);
    drop(tx);

    assert_consistent(&table);
}

#[test]
fn test_recycle_then_grow_in_one_call() {
    let (_temp, table) = setup_temp_table(SMALL);

    let first = ids(&table.acquire_pages(4).unwrap());
    table.release_pages(&first[..2]).unwrap();

    let pages = table.acquire_pages(3).unwrap();

    let got: HashSet<u64> = ids(&pages).into_iter().collect();
    assert!(got.contains(&first[0]));
    assert!(got.contains(&first[1]));
    assert!(got.contains(&5));
    assert_eq!(table.stats().unwrap().blocks, 2);
    assert_consistent(&table);
}

#[test]
fn test_acquire_release_restores_occupancy() {
    let (_temp, table) = setup_temp_table(SMALL);

    let pages = ids(&table.acquire_pages(6).unwrap());
    table.release_pages(&pages).unwrap();

    let tx = table.begin_read().unwrap();
    for block in table.blocks().list_blocks(&tx).unwrap() {
        assert_eq!(block.occupied(), 0, "block {}", block.id);
        assert_eq!(block.refcount, 0, "block {}", block.id);
    }
    for page in table.pages().list_pages(&tx).unwrap() {
        assert!(page.is_free());
    }
    drop(tx);

    assert_consistent(&table);
}

#[test]
fn test_recycled_page_needs_its_block() {
    let (_temp, table) = setup_temp_table(SMALL);

    // A free page pointing at a block that was never written
    let orphan = PageRecord {
        id: 1,
        file_id: 0,
        block_id: 42,
        block_slot: 0,
        offset: 0,
        size: 4096,
        refcount: 0,
    };
    let tx = table.begin_write().unwrap();
    let value = table.buffer_pool().encode(&orphan);
    store::put(&tx, Collection::Pages, &codec::id_to_key(1), &value).unwrap();
    drop(value);
    tx.commit().unwrap();

    let result = table.acquire_pages(1);
    assert!(matches!(result, Err(BlockTableError::BlockNotFound(42))));

    // Whole call was rolled back
    let tx = table.begin_read().unwrap();
    assert_eq!(table.pages().get_page(&tx, 1).unwrap().refcount, 0);
}

// =============================================================================
// Release Tests
// =============================================================================

#[test]
fn test_release_clears_owner_and_slot() {
    let (_temp, table) = setup_temp_table(SMALL);
    let page = table.acquire_pages(1).unwrap().remove(0);

    table
        .update(|tx| table.pages().assign_page(tx, page.id(), 7, 4096))
        .unwrap();
    table.release_pages(&[page.id()]).unwrap();

    let tx = table.begin_read().unwrap();
    let record = table.pages().get_page(&tx, page.id()).unwrap();
    assert_eq!(record.refcount, 0);
    assert_eq!(record.file_id, 0);
    let block = table.blocks().get_block(&tx, record.block_id).unwrap();
    assert!(!block.is_slot_used(record.block_slot));
}

#[test]
fn test_release_twice_reports_underflow() {
    let (_temp, table) = setup_temp_table(SMALL);
    let pages = ids(&table.acquire_pages(2).unwrap());

    table.release_pages(&[pages[0]]).unwrap();
    let before = table.stats().unwrap();

    let report = table.release_pages(&[pages[0]]).unwrap();

    assert_eq!(report.released, 0);
    assert_eq!(report.failures.len(), 1);
    assert!(matches!(
        report.failures[0],
        (
            1,
            BlockTableError::RefcountUnderflow {
                kind: RecordKind::Page,
                id: 1
            }
        )
    ));

    assert_eq!(table.stats().unwrap(), before);
    let tx = table.begin_read().unwrap();
    assert_eq!(table.blocks().get_block(&tx, 1).unwrap().refcount, 1);
    drop(tx);
    assert_consistent(&table);
}

#[test]
fn test_release_batch_skips_missing_pages() {
    let (_temp, table) = setup_temp_table(SMALL);
    let pages = ids(&table.acquire_pages(2).unwrap());

    let report = table.release_pages(&[pages[0], 999, pages[1]]).unwrap();

    assert_eq!(report.released, 2);
    assert_eq!(report.failures.len(), 1);
    assert!(matches!(report.failures[0], (999, BlockTableError::PageNotFound(999))));
    assert_eq!(table.stats().unwrap().live_pages, 0);
    assert_consistent(&table);
}

#[test]
fn test_release_same_id_twice_in_batch() {
    let (_temp, table) = setup_temp_table(SMALL);
    let page = table.acquire_pages(1).unwrap()[0].id();

    let report = table.release_pages(&[page, page]).unwrap();

    assert_eq!(report.released, 1);
    assert!(matches!(
        report.failures[0].1,
        BlockTableError::RefcountUnderflow { .. }
    ));
    assert_consistent(&table);
}

// =============================================================================
// Sharing and Ownership Tests
// =============================================================================

#[test]
fn test_shared_page_keeps_slot_until_last_release() {
    let (_temp, table) = setup_temp_table(SMALL);
    let page = table.acquire_pages(1).unwrap()[0].id();

    let shared = table
        .update(|tx| table.pages().share_page(tx, page))
        .unwrap();
    assert_eq!(shared.refcount, 2);

    table.release_pages(&[page]).unwrap();
    let tx = table.begin_read().unwrap();
    let record = table.pages().get_page(&tx, page).unwrap();
    assert_eq!(record.refcount, 1);
    assert!(table.blocks().get_block(&tx, 1).unwrap().is_slot_used(0));
    drop(tx);

    table.release_pages(&[page]).unwrap();
    let tx = table.begin_read().unwrap();
    assert!(!table.blocks().get_block(&tx, 1).unwrap().is_slot_used(0));
    drop(tx);
    assert_consistent(&table);
}

#[test]
fn test_assign_free_page_fails() {
    let (_temp, table) = setup_temp_table(SMALL);
    let page = table.acquire_pages(1).unwrap()[0].id();
    table.release_pages(&[page]).unwrap();

    let result = table.update(|tx| table.pages().assign_page(tx, page, 3, 0));

    assert!(matches!(result, Err(BlockTableError::PageNotLive(p)) if p == page));
}

#[test]
fn test_assign_records_owner_and_offset() {
    let (_temp, table) = setup_temp_table(SMALL);
    let file = table.create_file("data.bin").unwrap();
    let pages = ids(&table.acquire_pages(2).unwrap());

    table
        .update(|tx| {
            for (i, id) in pages.iter().enumerate() {
                table.pages().assign_page(tx, *id, file.id, i as u64 * 4096)?;
            }
            Ok(())
        })
        .unwrap();

    let tx = table.begin_read().unwrap();
    let second = table.pages().get_page(&tx, pages[1]).unwrap();
    assert_eq!(second.file_id, file.id);
    assert_eq!(second.offset, 4096);
}

// =============================================================================
// Compensation Tests
// =============================================================================

#[test]
fn test_failed_placement_in_existing_block_clears_slot() {
    let (_temp, table) = setup_temp_table(SMALL);
    table.acquire_pages(1).unwrap();
    // Page id 2 is taken behind the sequence's back
    plant_live_page(&table, 2, 1, 3);

    let tx = table.begin_write().unwrap();
    let result = table.pages().acquire_pages(&tx, 1);

    match result {
        Err(BlockTableError::AllocationFailed { requested, source }) => {
            assert_eq!(requested, 1);
            assert!(matches!(
                *source,
                BlockTableError::CorruptRecord {
                    kind: RecordKind::Page,
                    ..
                }
            ));
        }
        other => panic!("expected AllocationFailed, got {:?}", other),
    }

    // Slot 1 was marked and then cleared; the reference taken for it is gone
    let block = table.blocks().get_block(&tx, 1).unwrap();
    assert!(!block.is_slot_used(1));
    assert_eq!(block.occupied(), 1);
    assert_eq!(block.refcount, 1);
    assert_eq!(table.pages().get_page(&tx, 2).unwrap().block_slot, 3);
}

#[test]
fn test_failed_placement_in_new_block_clears_slot() {
    let (_temp, table) = setup_temp_table(SMALL);
    plant_live_page(&table, 1, 7, 0);

    let tx = table.begin_write().unwrap();
    let result = table.pages().acquire_pages(&tx, 1);
    assert!(matches!(result, Err(BlockTableError::AllocationFailed { .. })));

    let blocks = table.blocks().list_blocks(&tx).unwrap();
    assert_eq!(blocks.len(), 1);
    assert_eq!(blocks[0].occupied(), 0);
    assert_eq!(blocks[0].refcount, 0);
}

#[test]
fn test_growth_provision_failure() {
    let (_temp, table) = setup_temp_table(SMALL);
    let buffers = BufferPool::new(4);
    let pages = PageAllocator::new(BlockManager::new(SMALL, &NoSpace, &buffers), &buffers);

    let tx = table.begin_write().unwrap();
    let result = pages.acquire_pages(&tx, 2);

    match result {
        Err(BlockTableError::AllocationFailed { requested, source }) => {
            assert_eq!(requested, 2);
            assert!(matches!(*source, BlockTableError::ExtentProvision { id: 1, .. }));
        }
        other => panic!("expected AllocationFailed, got {:?}", other),
    }
    assert!(pages.blocks().list_blocks(&tx).unwrap().is_empty());
    assert!(pages.list_pages(&tx).unwrap().is_empty());
}

#[test]
fn test_growth_provision_failure_after_recycling() {
    let (_temp, table) = setup_temp_table(SMALL);
    let first = ids(&table.acquire_pages(4).unwrap());
    table.release_pages(&first[..1]).unwrap();

    let buffers = BufferPool::new(4);
    let result = table.update(|tx| {
        let pages = PageAllocator::new(BlockManager::new(SMALL, &NoSpace, &buffers), &buffers);
        pages.acquire_pages(tx, 2)
    });

    assert!(matches!(result, Err(BlockTableError::AllocationFailed { requested: 2, .. })));
    // The recycled page was rolled back with the rest of the call
    let stats = table.stats().unwrap();
    assert_eq!(stats.live_pages, 3);
    assert_eq!(stats.free_pages, 1);
    assert_consistent(&table);
}

#[test]
fn test_failed_placement_unwinds_new_block() {
    let (temp, table) = setup_temp_table(SMALL);
    let extents = DirExtents::open(&temp.path().join("tiny")).unwrap();
    let buffers = BufferPool::new(4);
    // Blocks too small for a single page: placement always fails
    let blocks = BlockManager::new(Layout::new(1024, 4096), &extents, &buffers);
    let pages = PageAllocator::new(blocks, &buffers);

    let tx = table.begin_write().unwrap();
    let result = pages.acquire_pages(&tx, 1);

    match result {
        Err(BlockTableError::AllocationFailed { requested, source }) => {
            assert_eq!(requested, 1);
            assert!(matches!(*source, BlockTableError::SlotOutOfRange { .. }));
        }
        other => panic!("expected AllocationFailed, got {:?}", other),
    }

    // The created block gave back its reference; no page record exists
    let all_blocks = pages.blocks().list_blocks(&tx).unwrap();
    assert_eq!(all_blocks.len(), 1);
    assert_eq!(all_blocks[0].refcount, 0);
    assert_eq!(all_blocks[0].occupied(), 0);
    let all_pages = pages.list_pages(&tx).unwrap();
    assert!(all_pages.is_empty());
    assert!(verify::check(&all_blocks, &all_pages).is_clean());
}

#[test]
fn test_failed_acquire_commits_nothing() {
    let (temp, table) = setup_temp_table(SMALL);
    table.acquire_pages(2).unwrap();
    let before = table.stats().unwrap();

    let extents = DirExtents::open(&temp.path().join("tiny")).unwrap();
    let buffers = BufferPool::new(4);

    let result = table.update(|tx| {
        let blocks = BlockManager::new(Layout::new(1024, 4096), &extents, &buffers);
        PageAllocator::new(blocks, &buffers).acquire_pages(tx, 1)
    });
    // The small table still has free slots, so this request is satisfied
    assert_eq!(result.unwrap().len(), 1);

    let result = table.update(|tx| {
        let blocks = BlockManager::new(Layout::new(1024, 4096), &extents, &buffers);
        // Fill the rest of block 1, then force a new zero-capacity block
        PageAllocator::new(blocks, &buffers).acquire_pages(tx, 3)
    });
    assert!(matches!(result, Err(BlockTableError::AllocationFailed { requested: 3, .. })));

    let after = table.stats().unwrap();
    assert_eq!(after.blocks, before.blocks);
    assert_eq!(after.live_pages, before.live_pages + 1);
    assert_consistent(&table);
}

// =============================================================================
// Long-Running Consistency Tests
// =============================================================================

#[test]
fn test_churn_stays_consistent() {
    let (_temp, table) = setup_temp_table(SMALL);
    let mut live: Vec<u64> = Vec::new();

    for round in 0..12u64 {
        live.extend(ids(&table.acquire_pages(round % 5 + 1).unwrap()));
        // Release every other live page
        let (drop_ids, keep): (Vec<(usize, u64)>, Vec<(usize, u64)>) =
            live.iter().copied().enumerate().partition(|(i, _)| i % 2 == 0);
        let drop_ids: Vec<u64> = drop_ids.into_iter().map(|(_, id)| id).collect();
        live = keep.into_iter().map(|(_, id)| id).collect();

        let report = table.release_pages(&drop_ids).unwrap();
        assert!(report.is_clean());
        assert_consistent(&table);
    }

    let stats = table.stats().unwrap();
    assert_eq!(stats.live_pages, live.len() as u64);
    assert_eq!(stats.occupied_slots, live.len() as u64);
}
