//! Fixed-capacity sequence-numbered ring buffer.
//!
//! Every appended item receives a monotonically increasing `u64` sequence
//! number. Once the buffer is full the oldest items are overwritten, but
//! sequence numbers keep advancing: `[head, tail)` is always the window of
//! readable sequences. The event journal builds on this to provide gap-free,
//! strictly increasing event sequences.

use serde::{Deserialize, Serialize};

/// Error raised when a ring buffer is constructed with capacity zero.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("ring buffer capacity must be at least 1, got {0}")]
pub struct CapacityBelowOne(pub usize);

/// Sequence window of a ring buffer: `used` slots out of `total` capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RingCapacity {
    /// Number of items currently retained.
    pub used: u64,
    /// Maximum number of retained items.
    pub total: u64,
}

/// A fixed-capacity log with monotone sequence numbers.
#[derive(Debug, Clone)]
pub struct RingBuffer<T> {
    slots: Vec<Option<T>>,
    capacity: u64,
    head: u64,
    tail: u64,
}

impl<T> RingBuffer<T> {
    /// Creates a ring buffer holding at most `capacity` items.
    ///
    /// # Errors
    ///
    /// Fails with [`CapacityBelowOne`] when `capacity < 1`.
    pub fn new(capacity: usize) -> Result<Self, CapacityBelowOne> {
        if capacity < 1 {
            return Err(CapacityBelowOne(capacity));
        }
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        Ok(Self {
            slots,
            capacity: capacity as u64,
            head: 0,
            tail: 0,
        })
    }

    /// Appends an item, returning its sequence number.
    ///
    /// When the buffer is full, the oldest item is evicted by advancing the
    /// head. O(1).
    pub fn add(&mut self, item: T) -> u64 {
        let seq = self.tail;
        let slot = (seq % self.capacity) as usize;
        self.slots[slot] = Some(item);
        self.tail += 1;
        if self.tail - self.head > self.capacity {
            self.head = self.tail - self.capacity;
        }
        seq
    }

    /// Reads the item at a sequence number, or `None` if it was evicted or
    /// never written. O(1).
    #[must_use]
    pub fn read(&self, seq: u64) -> Option<&T> {
        if seq < self.head || seq >= self.tail {
            return None;
        }
        self.slots[(seq % self.capacity) as usize].as_ref()
    }

    /// Reads the inclusive range `[start, end]`, clamped to the retained
    /// window. Returns an empty vector when the range misses the window
    /// entirely.
    #[must_use]
    pub fn read_range(&self, start: u64, end: u64) -> Vec<&T> {
        if self.tail == 0 || start > end {
            return Vec::new();
        }
        let lo = start.max(self.head);
        let hi = end.min(self.tail - 1);
        if lo > hi {
            return Vec::new();
        }
        (lo..=hi).filter_map(|seq| self.read(seq)).collect()
    }

    /// Reads up to `limit` items starting at `seq` (clamped to the window).
    #[must_use]
    pub fn read_from(&self, seq: u64, limit: usize) -> Vec<&T> {
        if limit == 0 || self.tail == 0 {
            return Vec::new();
        }
        let lo = seq.max(self.head);
        (lo..self.tail)
            .take(limit)
            .filter_map(|s| self.read(s))
            .collect()
    }

    /// Number of retained items.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.tail - self.head
    }

    /// Sequence of the oldest retained item. Equal to `tail` when empty.
    #[must_use]
    pub fn head(&self) -> u64 {
        self.head
    }

    /// Sequence that the next appended item will receive.
    #[must_use]
    pub fn tail(&self) -> u64 {
        self.tail
    }

    /// Maximum number of retained items.
    #[must_use]
    pub fn capacity(&self) -> RingCapacity {
        RingCapacity {
            used: self.size(),
            total: self.capacity,
        }
    }

    /// Drops retained items from the head while `predicate` holds.
    ///
    /// Returns the number of evicted items. Sequence numbers are unaffected;
    /// only the readable window shrinks.
    pub fn evict_while<F>(&mut self, mut predicate: F) -> u64
    where
        F: FnMut(&T) -> bool,
    {
        let mut evicted = 0;
        while self.head < self.tail {
            let slot = (self.head % self.capacity) as usize;
            match &self.slots[slot] {
                Some(item) if predicate(item) => {
                    self.slots[slot] = None;
                    self.head += 1;
                    evicted += 1;
                }
                _ => break,
            }
        }
        evicted
    }

    /// Removes every item and resets both sequences to zero.
    ///
    /// This is the only operation that moves sequences backwards.
    pub fn clear(&mut self) {
        for slot in &mut self.slots {
            *slot = None;
        }
        self.head = 0;
        self.tail = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capacity_below_one_is_rejected() {
        assert_eq!(RingBuffer::<u8>::new(0).unwrap_err(), CapacityBelowOne(0));
        assert!(RingBuffer::<u8>::new(1).is_ok());
    }

    #[test]
    fn sequences_start_at_zero_and_increase() {
        let mut ring = RingBuffer::new(4).unwrap();
        assert_eq!(ring.add("a"), 0);
        assert_eq!(ring.add("b"), 1);
        assert_eq!(ring.add("c"), 2);
        assert_eq!(ring.size(), 3);
    }

    #[test]
    fn eviction_window() {
        // Capacity 3, add a..e: head=2, tail=5, reads 0..1 evicted, 2..4 live.
        let mut ring = RingBuffer::new(3).unwrap();
        for item in ["a", "b", "c", "d", "e"] {
            ring.add(item);
        }
        assert_eq!(ring.head(), 2);
        assert_eq!(ring.tail(), 5);
        assert_eq!(ring.read(0), None);
        assert_eq!(ring.read(1), None);
        assert_eq!(ring.read(2), Some(&"c"));
        assert_eq!(ring.read(3), Some(&"d"));
        assert_eq!(ring.read(4), Some(&"e"));
        assert_eq!(ring.read(5), None);
    }

    #[test]
    fn read_range_clamps_to_window() {
        let mut ring = RingBuffer::new(3).unwrap();
        for item in ["a", "b", "c", "d", "e"] {
            ring.add(item);
        }
        assert_eq!(ring.read_range(0, 10), vec![&"c", &"d", &"e"]);
        assert_eq!(ring.read_range(3, 3), vec![&"d"]);
        assert!(ring.read_range(5, 9).is_empty());
    }

    #[test]
    fn read_range_inverted_is_empty() {
        let mut ring = RingBuffer::new(3).unwrap();
        ring.add("a");
        assert!(ring.read_range(2, 1).is_empty());
    }

    #[test]
    fn read_from_respects_limit() {
        let mut ring = RingBuffer::new(10).unwrap();
        for i in 0..6 {
            ring.add(i);
        }
        assert_eq!(ring.read_from(1, 3), vec![&1, &2, &3]);
        assert_eq!(ring.read_from(0, 100).len(), 6);
        assert!(ring.read_from(6, 5).is_empty());
        assert!(ring.read_from(0, 0).is_empty());
    }

    #[test]
    fn empty_buffer_reads_nothing() {
        let ring: RingBuffer<u8> = RingBuffer::new(2).unwrap();
        assert_eq!(ring.size(), 0);
        assert_eq!(ring.read(0), None);
        assert!(ring.read_range(0, 5).is_empty());
        assert!(ring.read_from(0, 5).is_empty());
    }

    #[test]
    fn capacity_report() {
        let mut ring = RingBuffer::new(3).unwrap();
        ring.add(1);
        ring.add(2);
        assert_eq!(ring.capacity(), RingCapacity { used: 2, total: 3 });
        ring.add(3);
        ring.add(4);
        assert_eq!(ring.capacity(), RingCapacity { used: 3, total: 3 });
    }

    #[test]
    fn evict_while_advances_head_only() {
        let mut ring = RingBuffer::new(5).unwrap();
        for i in 0..5 {
            ring.add(i);
        }
        let evicted = ring.evict_while(|item| *item < 3);
        assert_eq!(evicted, 3);
        assert_eq!(ring.head(), 3);
        assert_eq!(ring.tail(), 5);
        assert_eq!(ring.read(2), None);
        assert_eq!(ring.read(3), Some(&3));
    }

    #[test]
    fn clear_resets_sequences() {
        let mut ring = RingBuffer::new(2).unwrap();
        ring.add("a");
        ring.add("b");
        ring.add("c");
        ring.clear();
        assert_eq!(ring.size(), 0);
        assert_eq!(ring.add("d"), 0);
    }
}
