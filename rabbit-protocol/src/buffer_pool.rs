//! Shared pool of fixed-size I/O buffers
//!
//! Every buffer handed out by a [`BufferPool`] has the same length, fixed when
//! the pool is created. Buffers are not zeroed between uses: a holder must only
//! read back the bytes it wrote itself.
//!
//! # Usage
//!
//! ```rust
//! use rabbit_protocol::BufferPool;
//!
//! let pool = BufferPool::new(8 * 1024);
//!
//! // Scoped acquisition: the buffer goes back to the pool when dropped
//! let mut buf = pool.get();
//! buf[..5].copy_from_slice(b"hello");
//! drop(buf);
//!
//! // May reuse the buffer released above
//! let buf2 = pool.get();
//! assert_eq!(buf2.len(), 8 * 1024);
//! ```

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex};

/// Default buffer length (8KB)
pub const DEFAULT_BUFFER_SIZE: usize = 8 * 1024;

/// Payload share of a default buffer; the rest is headroom for lower-layer headers
pub const DATA_LIMIT: usize = 7 * 1024;

/// Default number of idle buffers kept for reuse
pub const DEFAULT_MAX_POOLED: usize = 64;

struct PoolInner {
    buffers: Mutex<Vec<Vec<u8>>>,
    buffer_size: usize,
    max_pooled: usize,
}

impl PoolInner {
    fn take(&self) -> Vec<u8> {
        let reused = self
            .buffers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .pop();
        reused.unwrap_or_else(|| vec![0u8; self.buffer_size])
    }

    fn put(&self, mut buf: Vec<u8>) {
        // Detached or resized buffers keep the pool's length invariant
        if buf.capacity() < self.buffer_size {
            return;
        }
        buf.resize(self.buffer_size, 0);

        let mut buffers = self
            .buffers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if buffers.len() < self.max_pooled {
            buffers.push(buf);
        }
    }
}

/// A pool of equally sized byte buffers
///
/// Cloning a `BufferPool` is cheap; all clones share the same free list.
/// The pool never blocks and never runs dry: when no idle buffer is
/// available a fresh one is allocated.
#[derive(Clone)]
pub struct BufferPool {
    inner: Arc<PoolInner>,
}

impl BufferPool {
    /// Create a pool handing out buffers of `buffer_size` bytes
    pub fn new(buffer_size: usize) -> Self {
        Self::with_max_pooled(buffer_size, DEFAULT_MAX_POOLED)
    }

    /// Create a pool that keeps at most `max_pooled` idle buffers
    pub fn with_max_pooled(buffer_size: usize, max_pooled: usize) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                buffers: Mutex::new(Vec::with_capacity(max_pooled)),
                buffer_size,
                max_pooled,
            }),
        }
    }

    /// Acquire a buffer from the pool
    ///
    /// The buffer's length is [`buffer_size`](Self::buffer_size). Its contents
    /// are whatever the previous holder left behind.
    #[inline]
    pub fn get(&self) -> PooledBuffer {
        PooledBuffer {
            buf: Some(self.inner.take()),
            pool: Arc::clone(&self.inner),
        }
    }

    /// Return a buffer to the pool
    ///
    /// Equivalent to dropping it.
    #[inline]
    pub fn release(&self, buf: PooledBuffer) {
        drop(buf);
    }

    /// Pre-allocate idle buffers, up to the pool's retention limit
    pub fn prewarm(&self, count: usize) {
        let mut buffers = self
            .inner
            .buffers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let to_add = count.min(self.inner.max_pooled.saturating_sub(buffers.len()));
        for _ in 0..to_add {
            buffers.push(vec![0u8; self.inner.buffer_size]);
        }
    }

    /// Drop every idle buffer
    pub fn clear(&self) {
        self.inner
            .buffers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clear();
    }

    /// Length of every buffer handed out by this pool
    pub fn buffer_size(&self) -> usize {
        self.inner.buffer_size
    }

    /// Number of idle buffers currently held
    pub fn len(&self) -> usize {
        self.inner
            .buffers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    /// Check if the pool holds no idle buffers
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_SIZE)
    }
}

impl fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferPool")
            .field("buffer_size", &self.inner.buffer_size)
            .field("max_pooled", &self.inner.max_pooled)
            .field("idle", &self.len())
            .finish()
    }
}

/// A buffer checked out of a [`BufferPool`]
///
/// Dereferences to `[u8]`. Returns itself to the pool when dropped.
pub struct PooledBuffer {
    buf: Option<Vec<u8>>,
    pool: Arc<PoolInner>,
}

impl PooledBuffer {
    /// Detach the buffer from its pool
    ///
    /// The returned Vec is NOT returned to the pool when dropped.
    #[inline]
    pub fn into_vec(mut self) -> Vec<u8> {
        self.buf.take().unwrap_or_default()
    }
}

impl Deref for PooledBuffer {
    type Target = [u8];

    #[inline]
    fn deref(&self) -> &[u8] {
        self.buf.as_deref().unwrap_or(&[])
    }
}

impl DerefMut for PooledBuffer {
    #[inline]
    fn deref_mut(&mut self) -> &mut [u8] {
        self.buf.as_deref_mut().unwrap_or(&mut [])
    }
}

impl AsRef<[u8]> for PooledBuffer {
    #[inline]
    fn as_ref(&self) -> &[u8] {
        self
    }
}

impl AsMut<[u8]> for PooledBuffer {
    #[inline]
    fn as_mut(&mut self) -> &mut [u8] {
        self
    }
}

impl fmt::Debug for PooledBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledBuffer")
            .field("len", &self.len())
            .finish()
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        if let Some(buf) = self.buf.take() {
            self.pool.put(buf);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_pool_basic() {
        let pool = BufferPool::new(1024);

        let mut buf = pool.get();
        assert_eq!(buf.len(), 1024);
        buf[..11].copy_from_slice(b"hello world");
        assert_eq!(&buf[..11], b"hello world");

        drop(buf);
        assert_eq!(pool.len(), 1);

        // Reused buffer keeps its length but is not zeroed
        let buf2 = pool.get();
        assert_eq!(pool.len(), 0);
        assert_eq!(buf2.len(), 1024);
        assert_eq!(&buf2[..11], b"hello world");
    }

    #[test]
    fn test_empty_pool_allocates() {
        let pool = BufferPool::new(64);
        assert!(pool.is_empty());

        let a = pool.get();
        let b = pool.get();
        assert_eq!(a.len(), 64);
        assert_eq!(b.len(), 64);
        assert!(pool.is_empty());

        pool.release(a);
        pool.release(b);
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn test_into_vec_detaches() {
        let pool = BufferPool::new(32);

        let mut buf = pool.get();
        buf[..4].copy_from_slice(b"data");
        let vec = buf.into_vec();
        assert_eq!(&vec[..4], b"data");
        assert_eq!(pool.len(), 0);
    }

    #[test]
    fn test_buffer_pool_prewarm() {
        let pool = BufferPool::with_max_pooled(128, 8);

        pool.prewarm(4);
        assert_eq!(pool.len(), 4);

        let _b1 = pool.get();
        let _b2 = pool.get();
        assert_eq!(pool.len(), 2);

        // Never exceeds the retention limit
        pool.prewarm(100);
        assert_eq!(pool.len(), 8);

        pool.clear();
        assert!(pool.is_empty());
    }

    #[test]
    fn test_pool_max_pooled() {
        let pool = BufferPool::with_max_pooled(16, 4);

        let buffers: Vec<_> = (0..10).map(|_| pool.get()).collect();
        drop(buffers);

        assert_eq!(pool.len(), 4);
    }

    #[test]
    fn test_clones_share_free_list() {
        let pool = BufferPool::new(16);
        let other = pool.clone();

        drop(pool.get());
        assert_eq!(other.len(), 1);
        assert_eq!(other.buffer_size(), 16);
    }

    // ========================================================================
    // Multi-threaded tests
    // ========================================================================

    #[test]
    fn test_concurrent_buffer_usage() {
        use std::sync::Barrier;
        use std::thread;

        let num_threads = 4;
        let iterations = 100;
        let pool = BufferPool::with_max_pooled(256, 16);
        let barrier = Arc::new(Barrier::new(num_threads));
        let mut handles = vec![];

        for thread_id in 0..num_threads {
            let pool = pool.clone();
            let barrier = Arc::clone(&barrier);
            handles.push(thread::spawn(move || {
                barrier.wait();

                for i in 0..iterations {
                    let mut buf = pool.get();
                    buf[..64].fill(thread_id as u8);
                    buf[64..128].fill(i as u8);

                    // No other holder writes into a checked-out buffer
                    assert!(buf[..64].iter().all(|&b| b == thread_id as u8));
                    assert!(buf[64..128].iter().all(|&b| b == i as u8));
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }

        assert!(pool.len() <= 16);
        assert!(!pool.is_empty());
    }
}
