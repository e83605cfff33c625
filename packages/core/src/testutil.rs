//! Shared test helpers.

use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;

use crate::hlc::ClockSource;

/// A deterministic clock source for testing. Time is controlled explicitly
/// through the returned handle.
pub struct FixedClock {
    time: Arc<AtomicU64>,
}

impl FixedClock {
    /// Creates a fixed clock at `initial` millis plus a handle to advance it.
    pub fn new(initial: u64) -> (Self, Arc<AtomicU64>) {
        let time = Arc::new(AtomicU64::new(initial));
        (Self { time: time.clone() }, time)
    }
}

impl ClockSource for FixedClock {
    fn now(&self) -> u64 {
        self.time.load(AtomicOrdering::Relaxed)
    }
}
