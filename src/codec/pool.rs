//! Encode buffer pool
//!
//! Bounded free-list of scratch buffers for record encoding. The pool is owned
//! by a `Table` and lent to the allocation paths; nothing here is global.

use std::ops::{Deref, DerefMut};

use crossbeam::queue::ArrayQueue;

use super::record::{encode_into, Record};

/// Buffers larger than this are dropped instead of being returned to the pool
const MAX_RETAINED_CAPACITY: usize = 64 * 1024;

/// Pool of reusable encode buffers
pub struct BufferPool {
    idle: ArrayQueue<Vec<u8>>,
}

impl BufferPool {
    /// Create a pool retaining at most `capacity` idle buffers
    pub fn new(capacity: usize) -> Self {
        Self {
            idle: ArrayQueue::new(capacity.max(1)),
        }
    }

    /// Take a cleared buffer, allocating if none is idle
    pub fn get(&self) -> PooledBuffer<'_> {
        let buf = self.idle.pop().unwrap_or_default();
        PooledBuffer { buf, pool: self }
    }

    /// Encode a record into a pooled buffer
    pub fn encode<R: Record>(&self, record: &R) -> PooledBuffer<'_> {
        let mut buf = self.get();
        encode_into(record, &mut buf);
        buf
    }

    /// Number of idle buffers currently retained
    pub fn idle(&self) -> usize {
        self.idle.len()
    }

    fn give_back(&self, mut buf: Vec<u8>) {
        if buf.capacity() > MAX_RETAINED_CAPACITY {
            return;
        }
        buf.clear();
        // Full pool: let the buffer drop.
        let _ = self.idle.push(buf);
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_BUFFER_POOL_CAPACITY)
    }
}

/// A buffer on loan from a `BufferPool`, returned on drop
pub struct PooledBuffer<'a> {
    buf: Vec<u8>,
    pool: &'a BufferPool,
}

impl Deref for PooledBuffer<'_> {
    type Target = Vec<u8>;

    fn deref(&self) -> &Self::Target {
        &self.buf
    }
}

impl DerefMut for PooledBuffer<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.buf
    }
}

impl Drop for PooledBuffer<'_> {
    fn drop(&mut self) {
        self.pool.give_back(std::mem::take(&mut self.buf));
    }
}
