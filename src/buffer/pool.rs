//! Power-of-two aligned byte buffer pool.
//!
//! Port buffers are allocated in bulk when a session starts and freed in bulk
//! on teardown or reconfiguration, so the same handful of sizes is requested
//! over and over. Sizes are rounded up to the next power of two (minimum
//! 1 024 bytes) and kept in per-size buckets.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Maximum total bytes held in the pool.
pub const MAX_POOL_BYTES: usize = 64 * 1024 * 1024;
/// Maximum buffers kept per size bucket.
pub const MAX_BUCKET_ENTRIES: usize = 32;
/// Largest buffer the pool will keep.
pub const MAX_POOLED_SIZE: usize = 16 * 1024 * 1024;
/// The pool is emptied after this long without activity.
pub const POOL_IDLE_CLEAR_SECS: u64 = 120;

const MIN_ALIGNED: usize = 1024;

// ── Inner state ──────────────────────────────────────────────────────────────

struct PoolInner {
    buckets: HashMap<usize, Vec<Vec<u8>>>,
    total_bytes: usize,
    last_activity: Instant,
    last_cleanup: Instant,
}

impl PoolInner {
    fn new() -> Self {
        let now = Instant::now();
        Self {
            buckets: HashMap::new(),
            total_bytes: 0,
            last_activity: now,
            last_cleanup: now,
        }
    }

    fn aligned_size(size: usize) -> usize {
        size.max(MIN_ALIGNED).next_power_of_two()
    }

    fn acquire(&mut self, size: usize) -> Vec<u8> {
        self.last_activity = Instant::now();
        let aligned = Self::aligned_size(size);

        if let Some(mut buf) = self.buckets.get_mut(&aligned).and_then(|b| b.pop()) {
            self.total_bytes -= aligned;
            buf.clear();
            return buf;
        }
        Vec::with_capacity(aligned)
    }

    fn release(&mut self, mut buf: Vec<u8>) {
        self.last_activity = Instant::now();
        let size = buf.capacity();

        // Only exact bucket sizes come back in; anything else was grown or
        // allocated elsewhere.
        if size < MIN_ALIGNED || size > MAX_POOLED_SIZE || !size.is_power_of_two() {
            return;
        }
        if self.total_bytes + size > MAX_POOL_BYTES {
            return;
        }

        let bucket = self.buckets.entry(size).or_default();
        if bucket.len() >= MAX_BUCKET_ENTRIES {
            return;
        }

        buf.clear();
        self.total_bytes += size;
        bucket.push(buf);
    }

    fn cleanup(&mut self) {
        if self.total_bytes == 0 {
            return;
        }
        if self.last_cleanup.elapsed() < Duration::from_secs(30) {
            return;
        }
        self.last_cleanup = Instant::now();

        if self.last_activity.elapsed() >= Duration::from_secs(POOL_IDLE_CLEAR_SECS) {
            self.buckets.clear();
            self.total_bytes = 0;
        }
    }
}

// ── Public API ───────────────────────────────────────────────────────────────

/// Shared, thread-safe byte buffer pool.
pub struct BufferPool {
    inner: Mutex<PoolInner>,
}

impl BufferPool {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(PoolInner::new()),
        }
    }

    /// Acquire an empty buffer with capacity for at least `size` bytes.
    pub fn acquire(&self, size: usize) -> Vec<u8> {
        let mut g = self.inner.lock();
        g.cleanup();
        g.acquire(size)
    }

    /// Acquire a zero-filled buffer of exactly `size` bytes.
    pub fn acquire_zeroed(&self, size: usize) -> Vec<u8> {
        let mut buf = self.acquire(size);
        buf.resize(size, 0);
        buf
    }

    /// Return a buffer to the pool for reuse.
    pub fn release(&self, buf: Vec<u8>) {
        self.inner.lock().release(buf);
    }

    pub fn stats(&self) -> PoolStats {
        let g = self.inner.lock();
        PoolStats {
            total_bytes: g.total_bytes,
            buckets: g.buckets.len(),
            entries: g.buckets.values().map(|b| b.len()).sum(),
        }
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of pool health.
#[derive(Debug, Clone)]
pub struct PoolStats {
    pub total_bytes: usize,
    pub buckets: usize,
    pub entries: usize,
}

// ── Global singleton ─────────────────────────────────────────────────────────

static GLOBAL_BYTE_POOL: OnceLock<Arc<BufferPool>> = OnceLock::new();

/// Get (or lazily create) the global byte buffer pool.
pub fn get_byte_pool() -> Arc<BufferPool> {
    GLOBAL_BYTE_POOL
        .get_or_init(|| Arc::new(BufferPool::new()))
        .clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sizes_round_up_to_buckets() {
        let pool = BufferPool::new();
        let buf = pool.acquire(1500);
        assert!(buf.capacity() >= 2048);
        assert!(buf.is_empty());
    }

    #[test]
    fn released_buffers_are_reused() {
        let pool = BufferPool::new();
        let buf = pool.acquire_zeroed(4096);
        assert_eq!(buf.len(), 4096);
        pool.release(buf);

        let stats = pool.stats();
        assert_eq!(stats.entries, 1);
        assert_eq!(stats.total_bytes, 4096);

        let again = pool.acquire(3000);
        assert!(again.is_empty());
        assert_eq!(pool.stats().entries, 0);
    }

    #[test]
    fn odd_capacities_are_not_pooled() {
        let pool = BufferPool::new();
        pool.release(Vec::with_capacity(3000));
        assert_eq!(pool.stats().entries, 0);
    }
}
