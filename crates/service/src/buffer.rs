//! A fixed population of fixed-size scratch buffers shared across
//! connections.

use bytes::BytesMut;
use parking_lot::Mutex;

/// `Acquire` never blocks and never grows the pool past its starting
/// population; `Release` zeroes a buffer before it goes back on the free
/// list so bytes from one connection never surface in another.
pub struct BufferPool {
    free: Mutex<Vec<BytesMut>>,
    buffer_size: usize,
}

impl BufferPool {
    pub fn new(count: usize, buffer_size: usize) -> Self {
        let free = (0..count).map(|_| BytesMut::zeroed(buffer_size)).collect();

        Self {
            free: Mutex::new(free),
            buffer_size,
        }
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Returns a buffer from the free list, or `None` if the pool is
    /// currently empty. The caller surfaces `None` as a resource
    /// exhaustion error for the affected connection; the pool never
    /// queues or blocks waiting for one to free up.
    pub fn acquire(&self) -> Option<BytesMut> {
        self.free.lock().pop()
    }

    /// Zeroes `buffer` and returns it to the free list.
    pub fn release(&self, mut buffer: BytesMut) {
        let capacity = buffer.capacity();
        buffer.resize(capacity, 0);
        buffer.iter_mut().for_each(|byte| *byte = 0);
        self.free.lock().push(buffer);
    }
}
