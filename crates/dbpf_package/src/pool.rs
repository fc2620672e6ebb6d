//! Reusable scratch buffers for reading stored resource bytes.

use std::ops::{Deref, DerefMut};

use parking_lot::Mutex;

/// Buffers above this capacity are dropped instead of being returned to the pool
const MAX_RETAINED_CAPACITY: usize = 16 * 1024 * 1024;

/// A small pool of byte buffers
///
/// Buffers are handed out as [`PooledBuffer`] guards which give the buffer back when they are
/// dropped, so every exit path, including early returns on errors, returns it.
#[derive(Debug)]
pub struct BufferPool {
    buffers: Mutex<Vec<Vec<u8>>>,
    max_buffers: usize,
}

impl BufferPool {
    /// Create a pool keeping at most `max_buffers` idle buffers
    pub fn new(max_buffers: usize) -> Self {
        Self {
            buffers: Mutex::new(Vec::with_capacity(max_buffers)),
            max_buffers,
        }
    }

    /// Take an empty buffer with at least `capacity` bytes reserved
    pub fn acquire(&self, capacity: usize) -> PooledBuffer<'_> {
        let mut buffer = self.buffers.lock().pop().unwrap_or_default();
        buffer.clear();
        buffer.reserve(capacity);
        PooledBuffer { pool: self, buffer }
    }

    /// Number of idle buffers
    pub fn idle(&self) -> usize {
        self.buffers.lock().len()
    }

    fn release(&self, mut buffer: Vec<u8>) {
        if buffer.capacity() > MAX_RETAINED_CAPACITY {
            return;
        }
        buffer.clear();

        let mut buffers = self.buffers.lock();
        if buffers.len() < self.max_buffers {
            buffers.push(buffer);
        }
    }
}

/// A buffer borrowed from a [`BufferPool`]
#[derive(Debug)]
pub struct PooledBuffer<'a> {
    pool: &'a BufferPool,
    buffer: Vec<u8>,
}

impl Deref for PooledBuffer<'_> {
    type Target = Vec<u8>;

    fn deref(&self) -> &Self::Target {
        &self.buffer
    }
}

impl DerefMut for PooledBuffer<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.buffer
    }
}

impl Drop for PooledBuffer<'_> {
    fn drop(&mut self) {
        self.pool.release(std::mem::take(&mut self.buffer));
    }
}
