//! Block Module
//!
//! Raw block lifecycle and per-block slot bookkeeping.
//!
//! ## Responsibilities
//! - Create blocks (backing extent first, then metadata)
//! - Reference-count blocks; a block at refcount 0 stays allocatable
//! - Track slot occupancy in each block's bitmap
//! - Find the first block with a free slot (lowest slot wins)
//!
//! ## Refcount Model
//! A block's refcount is the number of occupied slots plus any external pins.
//! A new block starts at 1; that reference is handed to the first page placed
//! in it.

mod manager;

pub use manager::BlockManager;
pub(crate) use manager::vacate;
