//! Encode buffer pool
//!
//! Writer threads encode outbound messages into [`WriteBuffer`]s. The backing
//! `BytesMut` stores are recycled here so steady-state encoding does not
//! allocate.

use std::collections::VecDeque;
use std::sync::Arc;

use bytes::BytesMut;
use parking_lot::Mutex;

use crate::buffer::WriteBuffer;

/// Thread-safe pool of `BytesMut` backing stores.
///
/// # Examples
///
/// ```rust
/// use tenet_net::buffer_pool::BufferPool;
///
/// let pool = BufferPool::new(4, 4096);
/// let mut buf = pool.acquire();
/// buf.write_bytes(b"hello");
/// let frozen = buf.split();
/// pool.release(buf);
/// assert_eq!(&frozen[..], b"hello");
/// ```
#[derive(Clone, Debug)]
pub struct BufferPool {
    stores: Arc<Mutex<VecDeque<BytesMut>>>,
    /// Capacity of newly allocated stores.
    segment_size: usize,
    /// Stores beyond this count are dropped on release.
    max_stores: usize,
}

impl BufferPool {
    /// Pre-allocates `initial_count` stores of `segment_size` bytes; the pool
    /// keeps at most twice that many.
    pub fn new(initial_count: usize, segment_size: usize) -> Self {
        let stores = (0..initial_count)
            .map(|_| BytesMut::with_capacity(segment_size))
            .collect();
        Self {
            stores: Arc::new(Mutex::new(stores)),
            segment_size,
            max_stores: (initial_count * 2).max(1),
        }
    }

    /// Never blocks on allocation: an empty pool hands out a fresh store.
    pub fn acquire(&self) -> WriteBuffer {
        let store = self.stores.lock().pop_front();
        match store {
            Some(store) => WriteBuffer::from_bytes_mut(store),
            None => WriteBuffer::with_capacity(self.segment_size),
        }
    }

    /// Returns the buffer's store. Stores that lost their capacity (because
    /// their content was frozen and is still referenced) are not kept.
    pub fn release(&self, buf: WriteBuffer) {
        let mut store = buf.into_inner();
        store.clear();
        if store.capacity() < self.segment_size {
            return;
        }
        let mut stores = self.stores.lock();
        if stores.len() < self.max_stores {
            stores.push_back(store);
        }
    }

    pub fn available_count(&self) -> usize {
        self.stores.lock().len()
    }

    pub fn segment_size(&self) -> usize {
        self.segment_size
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new(16, 4096)
    }
}
