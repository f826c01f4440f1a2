//! Transactions
//!
//! A `Txn` is either read-only or the store's single writer. Writability is
//! checked at runtime so every mutating operation can report `NotWritable`
//! instead of silently doing nothing.

use redb::{Database, ReadTransaction, WriteTransaction};

use crate::error::{BlockTableError, Result};

/// A metadata store transaction
pub enum Txn {
    Read(ReadTransaction),
    Write(WriteTransaction),
}

impl Txn {
    /// Begin a read-only transaction
    pub fn begin_read(db: &Database) -> Result<Self> {
        Ok(Txn::Read(db.begin_read()?))
    }

    /// Begin the writable transaction (blocks while another writer is active)
    pub fn begin_write(db: &Database) -> Result<Self> {
        Ok(Txn::Write(db.begin_write()?))
    }

    pub fn is_writable(&self) -> bool {
        matches!(self, Txn::Write(_))
    }

    /// The write handle, or `NotWritable`
    pub(crate) fn writer(&self) -> Result<&WriteTransaction> {
        match self {
            Txn::Write(wtx) => Ok(wtx),
            Txn::Read(_) => Err(BlockTableError::NotWritable),
        }
    }

    /// Commit all writes atomically; ends a read transaction
    pub fn commit(self) -> Result<()> {
        match self {
            Txn::Write(wtx) => wtx.commit()?,
            Txn::Read(rtx) => drop(rtx),
        }
        Ok(())
    }

    /// Discard all writes made in this transaction
    pub fn abort(self) -> Result<()> {
        match self {
            Txn::Write(wtx) => wtx.abort()?,
            Txn::Read(rtx) => drop(rtx),
        }
        Ok(())
    }
}
