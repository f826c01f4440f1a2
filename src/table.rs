//! Table Module
//!
//! Top-level handle: owns the metadata store and the block directory, and
//! lends block/page managers to the file layer.
//!
//! ## Layout on disk
//! ```text
//! {metadata_path}      redb file: blocks, pages, files, sequences
//! {block_dir}/
//!   ├── 000001.blk     backing extent of block 1
//!   └── 000002.blk
//! ```

use std::fs;
use std::ops::ControlFlow;
use std::path::Path;

use redb::Database;
use tracing::{info, warn};

use crate::block::BlockManager;
use crate::codec::{self, BufferPool, FileRecord};
use crate::config::Config;
use crate::error::{BlockTableError, RecordKind, Result};
use crate::extent::{DirExtents, ExtentProvisioner};
use crate::page::{Page, PageAllocator, ReleaseReport};
use crate::store::{self, Collection, Txn};
use crate::verify::{self, IntegrityReport};

/// Occupancy summary
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TableStats {
    pub blocks: u64,
    pub pages: u64,
    pub live_pages: u64,
    pub free_pages: u64,
    pub files: u64,
    pub occupied_slots: u64,
    pub total_slots: u64,
}

/// Block/page allocator over a metadata store
///
/// ## Concurrency:
/// - Read operations open their own read-only transaction and may run
///   concurrently with each other and with one writer.
/// - Mutations run inside the store's single writable transaction; a second
///   writer blocks in `begin_write` until the first commits or aborts.
pub struct Table {
    config: Config,
    db: Database,
    extents: Box<dyn ExtentProvisioner>,
    buffers: BufferPool,
}

impl Table {
    /// Open or create a table, with block extents as files in `block_dir`
    pub fn open(config: Config) -> Result<Self> {
        config.validate()?;
        let extents = DirExtents::open(&config.block_dir)?;
        Self::with_extents(config, Box::new(extents))
    }

    /// Open with explicit paths (convenience method)
    ///
    /// Uses the default layout.
    pub fn open_paths(metadata_path: &Path, block_dir: &Path) -> Result<Self> {
        let config = Config::builder()
            .metadata_path(metadata_path)
            .block_dir(block_dir)
            .build();
        Self::open(config)
    }

    /// Open or create a table using a custom extent provisioner
    pub fn with_extents(config: Config, extents: Box<dyn ExtentProvisioner>) -> Result<Self> {
        config.validate()?;

        if let Some(parent) = config.metadata_path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| BlockTableError::StoreUnavailable(redb::Error::Io(e)))?;
        }
        let db = store::open(&config.metadata_path)?;
        let buffers = BufferPool::new(config.buffer_pool_capacity);

        info!(
            metadata = %config.metadata_path.display(),
            blocks = %config.block_dir.display(),
            block_size = config.layout.block_size,
            page_size = config.layout.page_size,
            "opened table"
        );

        Ok(Self {
            config,
            db,
            extents,
            buffers,
        })
    }

    // =========================================================================
    // Transactions
    // =========================================================================

    pub fn begin_read(&self) -> Result<Txn> {
        Txn::begin_read(&self.db)
    }

    pub fn begin_write(&self) -> Result<Txn> {
        Txn::begin_write(&self.db)
    }

    /// Run `f` in a read-only transaction
    pub fn view<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Txn) -> Result<T>,
    {
        let tx = self.begin_read()?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }

    /// Run `f` in the writable transaction: commit on `Ok`, abort on `Err`
    pub fn update<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Txn) -> Result<T>,
    {
        let tx = self.begin_write()?;
        match f(&tx) {
            Ok(value) => {
                tx.commit()?;
                Ok(value)
            }
            Err(e) => {
                if let Err(abort_err) = tx.abort() {
                    warn!(error = %abort_err, "abort after failed update also failed");
                }
                Err(e)
            }
        }
    }

    // =========================================================================
    // Allocation
    // =========================================================================

    /// Block manager bound to this table
    pub fn blocks(&self) -> BlockManager<'_> {
        BlockManager::new(self.config.layout, &*self.extents, &self.buffers)
    }

    /// Page allocator bound to this table
    pub fn pages(&self) -> PageAllocator<'_> {
        PageAllocator::new(self.blocks(), &self.buffers)
    }

    /// Acquire `n` pages in one committed transaction
    pub fn acquire_pages(&self, n: u64) -> Result<Vec<Page>> {
        self.update(|tx| self.pages().acquire_pages(tx, n))
    }

    /// Release pages in one committed transaction
    ///
    /// Per-id failures wrote nothing, so the batch commits regardless.
    pub fn release_pages(&self, ids: &[u64]) -> Result<ReleaseReport> {
        self.update(|tx| self.pages().release_pages(tx, ids))
    }

    // =========================================================================
    // Files
    // =========================================================================

    /// Create an empty file record named `name`
    pub fn create_file(&self, name: &str) -> Result<FileRecord> {
        codec::check_name_len(RecordKind::File, name.len())?;
        self.update(|tx| {
            if store::get(tx, Collection::Files, name.as_bytes())?.is_some() {
                return Err(BlockTableError::FileExists(name.to_string()));
            }
            let file = FileRecord {
                id: store::next_sequence(tx, Collection::Files)?,
                size: 0,
                name: name.to_string(),
            };
            let value = self.buffers.encode(&file);
            store::put(tx, Collection::Files, name.as_bytes(), &value)?;
            Ok(file)
        })
    }

    /// Look up a file record by name
    pub fn open_file(&self, name: &str) -> Result<Option<FileRecord>> {
        self.view(|tx| {
            store::get(tx, Collection::Files, name.as_bytes())?
                .map(|value| codec::decode(&value))
                .transpose()
        })
    }

    /// All file records whose name starts with `prefix`, in name order
    pub fn list_files(&self, prefix: &str) -> Result<Vec<FileRecord>> {
        self.view(|tx| {
            let mut files = Vec::new();
            store::scan(tx, Collection::Files, prefix.as_bytes(), |_, value| {
                files.push(codec::decode(value)?);
                Ok(ControlFlow::Continue(()))
            })?;
            Ok(files)
        })
    }

    // =========================================================================
    // Inspection
    // =========================================================================

    /// Count blocks, pages, files, and slots
    pub fn stats(&self) -> Result<TableStats> {
        self.view(|tx| {
            let blocks = self.blocks().list_blocks(tx)?;
            let pages = self.pages().list_pages(tx)?;

            let mut files = 0u64;
            store::scan(tx, Collection::Files, &[], |_, _| {
                files += 1;
                Ok(ControlFlow::Continue(()))
            })?;

            let live_pages = pages.iter().filter(|p| !p.is_free()).count() as u64;
            Ok(TableStats {
                blocks: blocks.len() as u64,
                pages: pages.len() as u64,
                live_pages,
                free_pages: pages.len() as u64 - live_pages,
                files,
                occupied_slots: blocks.iter().map(|b| b.occupied()).sum(),
                total_slots: blocks.iter().map(|b| b.capacity()).sum(),
            })
        })
    }

    /// Check block/page invariants against a consistent snapshot
    pub fn verify(&self) -> Result<IntegrityReport> {
        self.view(|tx| {
            let blocks = self.blocks().list_blocks(tx)?;
            let pages = self.pages().list_pages(tx)?;
            Ok(verify::check(&blocks, &pages))
        })
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn buffer_pool(&self) -> &BufferPool {
        &self.buffers
    }
}
