//! Metadata Store Module
//!
//! Thin binding of the transactional ordered key-value contract onto redb.
//!
//! ## Collections
//! ```text
//! blocks     id (8, BE)  → BlockRecord
//! pages      id (8, BE)  → PageRecord
//! files      name        → FileRecord
//! sequences  collection  → last issued id
//! ```
//!
//! ## Transactions
//! Many read-only transactions may be open at once; redb admits a single
//! writer. Helpers here are kind-agnostic and only move bytes; mutating
//! helpers fail with `NotWritable` on a read transaction.

mod txn;

pub use txn::Txn;

use std::ops::ControlFlow;
use std::path::Path;

use redb::{Database, ReadableTable, TableDefinition};

use crate::error::Result;

pub(crate) type BytesTable = TableDefinition<'static, &'static [u8], &'static [u8]>;

const BLOCKS: BytesTable = TableDefinition::new("blocks");
const PAGES: BytesTable = TableDefinition::new("pages");
const FILES: BytesTable = TableDefinition::new("files");
const SEQUENCES: TableDefinition<&str, u64> = TableDefinition::new("sequences");

/// A named collection in the metadata store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Collection {
    Blocks,
    Pages,
    Files,
}

impl Collection {
    pub const ALL: [Collection; 3] = [Collection::Blocks, Collection::Pages, Collection::Files];

    pub fn name(self) -> &'static str {
        match self {
            Collection::Blocks => "blocks",
            Collection::Pages => "pages",
            Collection::Files => "files",
        }
    }

    fn definition(self) -> BytesTable {
        match self {
            Collection::Blocks => BLOCKS,
            Collection::Pages => PAGES,
            Collection::Files => FILES,
        }
    }
}

/// Open or create the metadata store and make sure every collection exists
pub fn open(path: &Path) -> Result<Database> {
    let db = Database::create(path)?;

    let tx = db.begin_write()?;
    for collection in Collection::ALL {
        tx.open_table(collection.definition())?;
    }
    tx.open_table(SEQUENCES)?;
    tx.commit()?;

    Ok(db)
}

/// Point lookup
pub fn get(tx: &Txn, collection: Collection, key: &[u8]) -> Result<Option<Vec<u8>>> {
    match tx {
        Txn::Read(rtx) => {
            let table = rtx.open_table(collection.definition())?;
            get_in(&table, key)
        }
        Txn::Write(wtx) => {
            let table = wtx.open_table(collection.definition())?;
            get_in(&table, key)
        }
    }
}

/// Insert or overwrite a value
pub fn put(tx: &Txn, collection: Collection, key: &[u8], value: &[u8]) -> Result<()> {
    let wtx = tx.writer()?;
    let mut table = wtx.open_table(collection.definition())?;
    table.insert(key, value)?;
    Ok(())
}

/// Issue the next id of a collection's sequence
///
/// Ids start at 1 and only grow. The counter lives in the same transaction
/// as the records it names, so an aborted transaction gives its ids back.
pub fn next_sequence(tx: &Txn, collection: Collection) -> Result<u64> {
    let wtx = tx.writer()?;
    let mut table = wtx.open_table(SEQUENCES)?;
    let last = table
        .get(collection.name())?
        .map(|guard| guard.value())
        .unwrap_or(0);
    let next = last + 1;
    table.insert(collection.name(), next)?;
    Ok(next)
}

/// Last id issued for a collection (0 if none)
pub fn current_sequence(tx: &Txn, collection: Collection) -> Result<u64> {
    let last = match tx {
        Txn::Read(rtx) => {
            let table = rtx.open_table(SEQUENCES)?;
            let value = table.get(collection.name())?.map(|guard| guard.value());
            value
        }
        Txn::Write(wtx) => {
            let table = wtx.open_table(SEQUENCES)?;
            let value = table.get(collection.name())?.map(|guard| guard.value());
            value
        }
    };
    Ok(last.unwrap_or(0))
}

/// Visit every entry whose key starts with `prefix`, in key order
///
/// The visitor may stop early with `ControlFlow::Break`. It must not touch
/// the collection being scanned.
pub fn scan<F>(tx: &Txn, collection: Collection, prefix: &[u8], visit: F) -> Result<()>
where
    F: FnMut(&[u8], &[u8]) -> Result<ControlFlow<()>>,
{
    match tx {
        Txn::Read(rtx) => {
            let table = rtx.open_table(collection.definition())?;
            scan_in(&table, prefix, visit)
        }
        Txn::Write(wtx) => {
            let table = wtx.open_table(collection.definition())?;
            scan_in(&table, prefix, visit)
        }
    }
}

// =============================================================================
// Private Helpers
// =============================================================================

fn get_in<T>(table: &T, key: &[u8]) -> Result<Option<Vec<u8>>>
where
    T: ReadableTable<&'static [u8], &'static [u8]>,
{
    Ok(table.get(key)?.map(|guard| guard.value().to_vec()))
}

fn scan_in<T, F>(table: &T, prefix: &[u8], mut visit: F) -> Result<()>
where
    T: ReadableTable<&'static [u8], &'static [u8]>,
    F: FnMut(&[u8], &[u8]) -> Result<ControlFlow<()>>,
{
    for entry in table.range(prefix..)? {
        let (key, value) = entry?;
        if !key.value().starts_with(prefix) {
            break;
        }
        if visit(key.value(), value.value())?.is_break() {
            break;
        }
    }
    Ok(())
}
