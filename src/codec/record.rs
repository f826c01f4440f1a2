//! Record layouts
//!
//! One encode/decode pair per record kind behind the `Record` trait, so the
//! metadata store only ever sees opaque bytes.
//!
//! ## Layouts (all big-endian, followed by CRC32)
//! ```text
//! Block: id(8) size(8) name_len(4) name refcount(8) slot_count(8) slot_bytes
//! Page:  id(8) file_id(8) block_id(8) block_slot(8) offset(8) size(8) refcount(8)
//! File:  id(8) size(8) name_len(4) name
//! ```

use bitvec::prelude::*;
use bytes::{Buf, BufMut};

use crate::error::{BlockTableError, RecordKind, Result};

/// Per-block slot occupancy, one bit per slot
pub type SlotBitmap = BitVec<u8, Lsb0>;

const CRC_SIZE: usize = 4;

/// A record kind with a fixed binary layout
pub trait Record: Sized {
    const KIND: RecordKind;

    /// Append the record's fields to `buf`
    fn encode_body(&self, buf: &mut Vec<u8>);

    /// Read the record's fields back
    fn decode_body(fields: &mut FieldReader<'_>) -> Result<Self>;
}

/// Encode `record` into `buf` (cleared first), appending the checksum
pub fn encode_into<R: Record>(record: &R, buf: &mut Vec<u8>) {
    buf.clear();
    record.encode_body(buf);
    let crc = crc32fast::hash(buf);
    buf.put_u32(crc);
}

/// Decode a record, verifying its checksum and exact length
pub fn decode<R: Record>(bytes: &[u8]) -> Result<R> {
    if bytes.len() < CRC_SIZE {
        return Err(BlockTableError::corrupt(
            R::KIND,
            format!("{} bytes is shorter than the checksum", bytes.len()),
        ));
    }

    let (body, mut tail) = bytes.split_at(bytes.len() - CRC_SIZE);
    let stored = tail.get_u32();
    let computed = crc32fast::hash(body);
    if stored != computed {
        return Err(BlockTableError::corrupt(
            R::KIND,
            format!("checksum mismatch: stored {:08x}, computed {:08x}", stored, computed),
        ));
    }

    let mut fields = FieldReader::new(R::KIND, body);
    let record = R::decode_body(&mut fields)?;
    fields.finish()?;
    Ok(record)
}

// =============================================================================
// Field Reader
// =============================================================================

/// Bounds-checked reader over a record body
pub struct FieldReader<'a> {
    kind: RecordKind,
    buf: &'a [u8],
}

impl<'a> FieldReader<'a> {
    fn new(kind: RecordKind, buf: &'a [u8]) -> Self {
        Self { kind, buf }
    }

    fn need(&self, n: usize, field: &str) -> Result<()> {
        if self.buf.remaining() < n {
            return Err(BlockTableError::corrupt(
                self.kind,
                format!(
                    "truncated at {}: need {} bytes, have {}",
                    field,
                    n,
                    self.buf.remaining()
                ),
            ));
        }
        Ok(())
    }

    pub fn u64(&mut self, field: &str) -> Result<u64> {
        self.need(8, field)?;
        Ok(self.buf.get_u64())
    }

    pub fn bytes(&mut self, len: usize, field: &str) -> Result<&'a [u8]> {
        self.need(len, field)?;
        let (head, rest) = self.buf.split_at(len);
        self.buf = rest;
        Ok(head)
    }

    pub fn string(&mut self, field: &str) -> Result<String> {
        self.need(4, field)?;
        let len = self.buf.get_u32() as usize;
        let raw = self.bytes(len, field)?;
        String::from_utf8(raw.to_vec()).map_err(|_| {
            BlockTableError::corrupt(self.kind, format!("{} is not valid UTF-8", field))
        })
    }

    fn finish(self) -> Result<()> {
        if self.buf.has_remaining() {
            return Err(BlockTableError::corrupt(
                self.kind,
                format!("{} trailing bytes", self.buf.remaining()),
            ));
        }
        Ok(())
    }
}

/// Longest name a record can carry behind its `u32` length prefix
pub const MAX_NAME_LEN: usize = u32::MAX as usize;

/// Reject names whose length does not fit the record's length prefix
pub fn check_name_len(kind: RecordKind, len: usize) -> Result<()> {
    if len > MAX_NAME_LEN {
        return Err(BlockTableError::NameTooLong { kind, len });
    }
    Ok(())
}

fn put_string(buf: &mut Vec<u8>, s: &str) {
    // Callers check names with `check_name_len` before building a record.
    debug_assert!(s.len() <= MAX_NAME_LEN);
    buf.put_u32(s.len() as u32);
    buf.put_slice(s.as_bytes());
}

// =============================================================================
// Block Record
// =============================================================================

/// Metadata for one raw storage extent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockRecord {
    pub id: u64,
    /// Capacity of the backing extent in bytes
    pub size: u64,
    /// Name/path of the backing extent
    pub backing_name: String,
    pub refcount: u64,
    pub slots: SlotBitmap,
}

impl BlockRecord {
    /// A new block holding one reference and no occupied slots
    pub fn new(id: u64, size: u64, backing_name: String, capacity: u64) -> Self {
        Self {
            id,
            size,
            backing_name,
            refcount: 1,
            slots: BitVec::repeat(false, capacity as usize),
        }
    }

    /// Number of slots in this block
    pub fn capacity(&self) -> u64 {
        self.slots.len() as u64
    }

    /// Number of occupied slots
    pub fn occupied(&self) -> u64 {
        self.slots.count_ones() as u64
    }

    /// Bytes per slot, from the geometry this block was created with
    ///
    /// A block keeps its own geometry even if the table is later opened with a
    /// different layout. Zero for a block with no slots.
    pub fn slot_size(&self) -> u64 {
        self.size.checked_div(self.capacity()).unwrap_or(0)
    }

    /// Lowest free slot, if any
    pub fn first_free_slot(&self) -> Option<u64> {
        self.slots.first_zero().map(|i| i as u64)
    }

    pub fn is_slot_used(&self, slot: u64) -> bool {
        self.slots
            .get(slot as usize)
            .map(|bit| *bit)
            .unwrap_or(false)
    }

    /// Set or clear a slot bit, returning its previous value
    pub(crate) fn set_slot(&mut self, slot: u64, used: bool) -> Result<bool> {
        if slot >= self.capacity() {
            return Err(BlockTableError::SlotOutOfRange {
                block_id: self.id,
                slot,
                capacity: self.capacity(),
            });
        }
        Ok(self.slots.replace(slot as usize, used))
    }
}

impl Record for BlockRecord {
    const KIND: RecordKind = RecordKind::Block;

    fn encode_body(&self, buf: &mut Vec<u8>) {
        buf.put_u64(self.id);
        buf.put_u64(self.size);
        put_string(buf, &self.backing_name);
        buf.put_u64(self.refcount);
        buf.put_u64(self.slots.len() as u64);
        buf.put_slice(self.slots.as_raw_slice());
    }

    fn decode_body(fields: &mut FieldReader<'_>) -> Result<Self> {
        let id = fields.u64("id")?;
        let size = fields.u64("size")?;
        let backing_name = fields.string("backing_name")?;
        let refcount = fields.u64("refcount")?;
        let slot_count = fields.u64("slot_count")?;

        let slot_count = usize::try_from(slot_count).map_err(|_| {
            BlockTableError::corrupt(RecordKind::Block, format!("slot count {} too large", slot_count))
        })?;
        let raw = fields.bytes(slot_count.div_ceil(8), "slots")?;
        let mut slots = SlotBitmap::from_slice(raw);
        slots.truncate(slot_count);

        Ok(Self {
            id,
            size,
            backing_name,
            refcount,
            slots,
        })
    }
}

// =============================================================================
// Page Record
// =============================================================================

/// Metadata for one fixed-size allocation unit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRecord {
    pub id: u64,
    /// Owning file, `0` when unowned
    pub file_id: u64,
    pub block_id: u64,
    pub block_slot: u64,
    /// Placement within the owning file's byte stream
    pub offset: u64,
    pub size: u64,
    pub refcount: u64,
}

impl PageRecord {
    /// `true` once the page can be recycled
    pub fn is_free(&self) -> bool {
        self.refcount == 0
    }
}

impl Record for PageRecord {
    const KIND: RecordKind = RecordKind::Page;

    fn encode_body(&self, buf: &mut Vec<u8>) {
        buf.put_u64(self.id);
        buf.put_u64(self.file_id);
        buf.put_u64(self.block_id);
        buf.put_u64(self.block_slot);
        buf.put_u64(self.offset);
        buf.put_u64(self.size);
        buf.put_u64(self.refcount);
    }

    fn decode_body(fields: &mut FieldReader<'_>) -> Result<Self> {
        Ok(Self {
            id: fields.u64("id")?,
            file_id: fields.u64("file_id")?,
            block_id: fields.u64("block_id")?,
            block_slot: fields.u64("block_slot")?,
            offset: fields.u64("offset")?,
            size: fields.u64("size")?,
            refcount: fields.u64("refcount")?,
        })
    }
}

// =============================================================================
// File Record
// =============================================================================

/// Shape of a logical file as persisted by the file layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    pub id: u64,
    pub size: u64,
    pub name: String,
}

impl Record for FileRecord {
    const KIND: RecordKind = RecordKind::File;

    fn encode_body(&self, buf: &mut Vec<u8>) {
        buf.put_u64(self.id);
        buf.put_u64(self.size);
        put_string(buf, &self.name);
    }

    fn decode_body(fields: &mut FieldReader<'_>) -> Result<Self> {
        Ok(Self {
            id: fields.u64("id")?,
            size: fields.u64("size")?,
            name: fields.string("name")?,
        })
    }
}
