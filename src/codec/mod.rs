//! Codec Module
//!
//! Fixed-width big-endian encodings for identifiers and records.
//!
//! ## Key Format
//! Block and page records are keyed by the 8-byte big-endian form of their id,
//! so the store's byte ordering matches numeric ordering. File records are
//! keyed by name.
//!
//! ## Record Format
//! ```text
//! ┌──────────────────────────────────────┬───────────┐
//! │ Fields (big-endian, declared order)  │ CRC32 (4) │
//! └──────────────────────────────────────┴───────────┘
//! ```
//! Variable-length fields (names, slot bitmaps) carry a length prefix.

mod pool;
mod record;

pub use pool::{BufferPool, PooledBuffer};
pub use record::{
    check_name_len, decode, encode_into, BlockRecord, FieldReader, FileRecord, PageRecord, Record,
    SlotBitmap, MAX_NAME_LEN,
};

use crate::error::{BlockTableError, RecordKind, Result};

/// Size of an encoded identifier key
pub const ID_KEY_SIZE: usize = 8;

/// Encode an id as its store key
pub fn id_to_key(id: u64) -> [u8; ID_KEY_SIZE] {
    id.to_be_bytes()
}

/// Decode a store key back to an id
pub fn key_to_id(kind: RecordKind, key: &[u8]) -> Result<u64> {
    let bytes: [u8; ID_KEY_SIZE] = key.try_into().map_err(|_| {
        BlockTableError::corrupt(
            kind,
            format!("key is {} bytes, expected {}", key.len(), ID_KEY_SIZE),
        )
    })?;
    Ok(u64::from_be_bytes(bytes))
}
