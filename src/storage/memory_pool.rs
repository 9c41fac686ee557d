//! Recycling pool of scratch word buffers.
//!
//! Operators borrow zeroed blocks of `u64` words from the pool for masks,
//! bitmaps, group ids and per-group accumulators. A block is returned when
//! its [`ScratchBuffer`] guard drops, so early returns on error still give it
//! back. Blocks are kept for reuse and never released to the allocator while
//! the pool lives.
//!
//! # Example
//!
//! ```
//! use colflow::storage::MemoryPool;
//!
//! let pool = MemoryPool::new();
//! {
//!     let mut bits = pool.acquire(2);
//!     bits.set_bit(70);
//!     assert!(bits.bit(70));
//! }
//! let again = pool.acquire(1);
//! assert!(!again.bit(6));
//! assert_eq!(pool.stats().reuses, 1);
//! ```

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tracing::debug;

/// Number of bits held by one pool word.
pub const WORD_BITS: usize = 64;

/// Returns how many words are needed to hold `bits` bits.
#[must_use]
pub fn words_for_bits(bits: usize) -> usize {
    bits.div_ceil(WORD_BITS)
}

/// Thread-safe pool of reusable scratch buffers.
#[derive(Debug, Default)]
pub struct MemoryPool {
    /// Recycled blocks awaiting reuse.
    free: Mutex<Vec<Vec<u64>>>,
    /// Total `acquire` calls.
    acquisitions: AtomicU64,
    /// Acquisitions served from a recycled block without growing it.
    reuses: AtomicU64,
    /// Acquisitions that needed fresh memory.
    allocations: AtomicU64,
    /// Buffers handed out and not yet returned.
    outstanding: AtomicU64,
}

impl MemoryPool {
    /// Creates an empty pool.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Borrows a zeroed buffer of exactly `len` words.
    ///
    /// The smallest recycled block whose capacity fits is reused; otherwise
    /// the largest recycled block is grown, or a new one is allocated.
    pub fn acquire(&self, len: usize) -> ScratchBuffer<'_> {
        self.acquisitions.fetch_add(1, Ordering::Relaxed);
        self.outstanding.fetch_add(1, Ordering::Relaxed);

        let recycled = {
            let mut free = self.free.lock();
            let best_fit = free
                .iter()
                .enumerate()
                .filter(|(_, b)| b.capacity() >= len)
                .min_by_key(|(_, b)| b.capacity())
                .map(|(i, _)| i);
            match best_fit {
                Some(i) => Some(free.swap_remove(i)),
                None => {
                    let largest = free
                        .iter()
                        .enumerate()
                        .max_by_key(|(_, b)| b.capacity())
                        .map(|(i, _)| i);
                    largest.map(|i| free.swap_remove(i))
                }
            }
        };

        let mut words = match recycled {
            Some(block) if block.capacity() >= len => {
                self.reuses.fetch_add(1, Ordering::Relaxed);
                block
            }
            other => {
                self.allocations.fetch_add(1, Ordering::Relaxed);
                debug!(words = len, "memory pool allocating fresh block");
                other.unwrap_or_default()
            }
        };
        words.clear();
        words.resize(len, 0);

        ScratchBuffer { pool: self, words }
    }

    /// Returns a buffer to the pool. Equivalent to dropping it.
    pub fn release(&self, buffer: ScratchBuffer<'_>) {
        debug_assert!(std::ptr::eq(buffer.pool, self));
        drop(buffer);
    }

    fn recycle(&self, words: Vec<u64>) {
        self.outstanding.fetch_sub(1, Ordering::Relaxed);
        if words.capacity() > 0 {
            self.free.lock().push(words);
        }
    }

    /// Returns a snapshot of pool statistics.
    #[must_use]
    pub fn stats(&self) -> MemoryPoolStats {
        let (pooled_buffers, pooled_words) = {
            let free = self.free.lock();
            (free.len(), free.iter().map(Vec::capacity).sum::<usize>())
        };
        MemoryPoolStats {
            acquisitions: self.acquisitions.load(Ordering::Relaxed),
            reuses: self.reuses.load(Ordering::Relaxed),
            allocations: self.allocations.load(Ordering::Relaxed),
            outstanding: self.outstanding.load(Ordering::Relaxed),
            pooled_buffers,
            pooled_bytes: pooled_words * std::mem::size_of::<u64>(),
        }
    }
}

/// Snapshot of [`MemoryPool`] counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryPoolStats {
    /// Total buffers acquired.
    pub acquisitions: u64,
    /// Acquisitions served by a recycled block.
    pub reuses: u64,
    /// Acquisitions that allocated or grew a block.
    pub allocations: u64,
    /// Buffers currently checked out.
    pub outstanding: u64,
    /// Blocks sitting in the free list.
    pub pooled_buffers: usize,
    /// Capacity held by the free list, in bytes.
    pub pooled_bytes: usize,
}

impl MemoryPoolStats {
    /// Fraction of acquisitions served without fresh memory (0.0 - 1.0).
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn reuse_rate(&self) -> f64 {
        if self.acquisitions == 0 {
            0.0
        } else {
            self.reuses as f64 / self.acquisitions as f64
        }
    }
}

/// RAII guard over a pooled block of words.
///
/// Derefs to `[u64]`. The block goes back to its pool on drop.
#[derive(Debug)]
pub struct ScratchBuffer<'a> {
    pool: &'a MemoryPool,
    words: Vec<u64>,
}

impl ScratchBuffer<'_> {
    /// Sets bit `i`.
    #[inline]
    pub fn set_bit(&mut self, i: usize) {
        self.words[i / WORD_BITS] |= 1 << (i % WORD_BITS);
    }

    /// Returns bit `i`.
    #[inline]
    #[must_use]
    pub fn bit(&self, i: usize) -> bool {
        self.words[i / WORD_BITS] & (1 << (i % WORD_BITS)) != 0
    }

    /// Counts set bits across the buffer.
    #[must_use]
    pub fn count_ones(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }
}

impl Deref for ScratchBuffer<'_> {
    type Target = [u64];

    fn deref(&self) -> &[u64] {
        &self.words
    }
}

impl DerefMut for ScratchBuffer<'_> {
    fn deref_mut(&mut self) -> &mut [u64] {
        &mut self.words
    }
}

impl Drop for ScratchBuffer<'_> {
    fn drop(&mut self) {
        self.pool.recycle(std::mem::take(&mut self.words));
    }
}
