//! Ring cursor arithmetic and the shared fill counter used by circular sample
//! buffers.
//!
//! A ring has exactly one producer and one consumer. Each cursor is owned by a
//! single role, so cursors are plain relaxed atomics; the fill count is the only
//! value written by both roles and carries the acquire/release ordering that
//! publishes sample data between them.

use std::sync::atomic::{AtomicUsize, Ordering};

/// Index arithmetic for a ring of fixed length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingIndex {
    len: usize,
}

impl RingIndex {
    pub fn new(len: usize) -> Self {
        Self { len: len.max(1) }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `idx + n` wrapped into `0..len`.
    #[inline]
    pub fn add(&self, idx: usize, n: usize) -> usize {
        (idx + n % self.len) % self.len
    }

    /// Number of contiguous slots from `idx` to the end of the ring.
    #[inline]
    pub fn contiguous(&self, idx: usize) -> usize {
        self.len - idx % self.len
    }
}

/// A cursor mutated by exactly one thread role.
#[derive(Debug, Default)]
pub struct Cursor(AtomicUsize);

impl Cursor {
    pub fn new(pos: usize) -> Self {
        Self(AtomicUsize::new(pos))
    }

    #[inline]
    pub fn get(&self) -> usize {
        self.0.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn set(&self, pos: usize) {
        self.0.store(pos, Ordering::Relaxed);
    }

    /// Moves the cursor forward by `n` slots on `ring` and returns the new position.
    #[inline]
    pub fn advance(&self, ring: RingIndex, n: usize) -> usize {
        let next = ring.add(self.get(), n);
        self.set(next);
        next
    }
}

/// Count of valid samples in a ring, bounded by `capacity`.
///
/// Both the producer and the consumer adjust the count. Every adjustment is a
/// compare-and-swap loop that refuses to leave `0..=capacity`, so a rejected
/// adjustment leaves the count untouched and the caller records a fault.
#[derive(Debug)]
pub struct FillCount {
    count: AtomicUsize,
    capacity: usize,
}

impl FillCount {
    pub fn new(capacity: usize) -> Self {
        Self {
            count: AtomicUsize::new(0),
            capacity,
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Current count. Acquire pairs with the release in [`try_add`](Self::try_add)
    /// and [`try_sub`](Self::try_sub) so sample data written before an adjustment
    /// is visible to the thread that observes it.
    #[inline]
    pub fn get(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    /// Free slots.
    #[inline]
    pub fn headroom(&self) -> usize {
        self.capacity - self.get().min(self.capacity)
    }

    /// Adds `n` samples. Returns `false` and leaves the count unchanged if the
    /// result would exceed the capacity.
    #[inline]
    pub fn try_add(&self, n: usize) -> bool {
        let mut current = self.count.load(Ordering::Relaxed);
        loop {
            let next = match current.checked_add(n) {
                Some(next) if next <= self.capacity => next,
                _ => return false,
            };
            match self.count.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return true,
                Err(previous) => current = previous,
            }
        }
    }

    /// Removes `n` samples. Returns `false` and leaves the count unchanged if
    /// fewer than `n` are held.
    #[inline]
    pub fn try_sub(&self, n: usize) -> bool {
        let mut current = self.count.load(Ordering::Relaxed);
        loop {
            let next = match current.checked_sub(n) {
                Some(next) => next,
                None => return false,
            };
            match self.count.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return true,
                Err(previous) => current = previous,
            }
        }
    }

    pub fn reset(&self) {
        self.count.store(0, Ordering::Release);
    }
}
