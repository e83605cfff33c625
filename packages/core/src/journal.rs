//! Append-only event journal over the ring buffer.
//!
//! Every successful mutation of a map appends a [`JournalEvent`] carrying
//! the next gap-free sequence number. Listeners subscribe for future events
//! and may synchronously replay the retained history first; readers page
//! through the window with [`EventJournal::read_from`] /
//! [`EventJournal::read_range`].
//!
//! # Compaction
//!
//! Events older than the configured TTL are evicted from the head. The
//! library owns no timers: a sweep runs opportunistically on `append` once
//! `min(ttl, 60s)` has elapsed since the previous sweep, and hosts may call
//! [`EventJournal::compact`] directly.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::hlc::{ClockSource, SystemClock, Timestamp};
use crate::ring::{CapacityBelowOne, RingBuffer, RingCapacity};
use crate::value::Value;

/// Sequence assigned to events that fail the map filter and are not stored.
pub const FILTERED_SEQUENCE: i64 = -1;

/// Default page size for [`EventJournal::read_from`].
pub const DEFAULT_READ_LIMIT: usize = 100;

/// Upper bound between opportunistic compaction sweeps.
const MAX_COMPACT_INTERVAL_MS: u64 = 60_000;

/// Kind of mutation an event records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JournalEventType {
    /// A key received its first live value.
    Put,
    /// An existing live value was replaced.
    Update,
    /// A key was tombstoned.
    Delete,
}

/// One journaled mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JournalEvent {
    /// Gap-free sequence number, or [`FILTERED_SEQUENCE`] for filtered events.
    pub sequence: i64,
    /// Mutation kind.
    #[serde(rename = "type")]
    pub event_type: JournalEventType,
    /// Map the mutation targeted.
    pub map_name: String,
    /// Key the mutation targeted.
    pub key: String,
    /// New value, absent for deletes.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub value: Option<Value>,
    /// Previous live value, when one existed.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub previous_value: Option<Value>,
    /// Causal timestamp of the mutation.
    pub timestamp: Timestamp,
    /// Node that performed the mutation.
    pub node_id: String,
    /// Free-form metadata.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub metadata: Option<BTreeMap<String, Value>>,
}

/// An event as submitted to [`EventJournal::append`], before a sequence is
/// assigned.
#[derive(Debug, Clone, PartialEq)]
pub struct JournalEventDraft {
    /// Mutation kind.
    pub event_type: JournalEventType,
    /// Map the mutation targeted.
    pub map_name: String,
    /// Key the mutation targeted.
    pub key: String,
    /// New value, absent for deletes.
    pub value: Option<Value>,
    /// Previous live value, when one existed.
    pub previous_value: Option<Value>,
    /// Causal timestamp of the mutation.
    pub timestamp: Timestamp,
    /// Node that performed the mutation.
    pub node_id: String,
    /// Free-form metadata.
    pub metadata: Option<BTreeMap<String, Value>>,
}

impl JournalEventDraft {
    fn into_event(self, sequence: i64) -> JournalEvent {
        JournalEvent {
            sequence,
            event_type: self.event_type,
            map_name: self.map_name,
            key: self.key,
            value: self.value,
            previous_value: self.previous_value,
            timestamp: self.timestamp,
            node_id: self.node_id,
            metadata: self.metadata,
        }
    }
}

/// Journal configuration.
#[derive(Clone)]
pub struct JournalConfig {
    /// Maximum number of retained events.
    pub capacity: usize,
    /// Event TTL in milliseconds; `None` disables compaction.
    pub ttl_ms: Option<u64>,
    /// Reserved for a persistence adapter; the in-memory journal records the
    /// flag but never writes to disk.
    pub persistent: bool,
    /// When non-empty, only these maps are journaled.
    pub include_maps: Vec<String>,
    /// Maps excluded from journaling.
    pub exclude_maps: Vec<String>,
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self {
            capacity: 10_000,
            ttl_ms: None,
            persistent: false,
            include_maps: Vec::new(),
            exclude_maps: Vec::new(),
        }
    }
}

/// Errors surfaced at the journal boundary.
#[derive(Debug, thiserror::Error)]
pub enum JournalError {
    /// The journal was disposed; no further appends or subscriptions.
    #[error("journal closed")]
    JournalClosed,
    /// Invalid construction capacity.
    #[error(transparent)]
    Capacity(#[from] CapacityBelowOne),
}

/// A journal listener.
pub type JournalListener = Box<dyn Fn(&JournalEvent)>;

/// Append-only log of map mutations with subscribe/replay.
pub struct EventJournal {
    ring: RingBuffer<JournalEvent>,
    config: JournalConfig,
    listeners: Vec<(u64, JournalListener)>,
    next_listener_id: u64,
    clock: Box<dyn ClockSource>,
    last_sweep_ms: u64,
    closed: bool,
}

impl EventJournal {
    /// Creates a journal with the given configuration and the system clock.
    ///
    /// # Errors
    ///
    /// Fails with [`CapacityBelowOne`] when `config.capacity < 1`.
    pub fn new(config: JournalConfig) -> Result<Self, JournalError> {
        Self::with_clock(config, Box::new(SystemClock))
    }

    /// Creates a journal with an injected clock source (for TTL compaction).
    ///
    /// # Errors
    ///
    /// Fails with [`CapacityBelowOne`] when `config.capacity < 1`.
    pub fn with_clock(
        config: JournalConfig,
        clock: Box<dyn ClockSource>,
    ) -> Result<Self, JournalError> {
        let ring = RingBuffer::new(config.capacity)?;
        let last_sweep_ms = clock.now();
        Ok(Self {
            ring,
            config,
            listeners: Vec::new(),
            next_listener_id: 0,
            clock,
            last_sweep_ms,
            closed: false,
        })
    }

    /// Whether a map passes the include/exclude filter.
    #[must_use]
    pub fn accepts_map(&self, map_name: &str) -> bool {
        if self
            .config
            .exclude_maps
            .iter()
            .any(|excluded| excluded == map_name)
        {
            return false;
        }
        if self.config.include_maps.is_empty() {
            return true;
        }
        self.config
            .include_maps
            .iter()
            .any(|included| included == map_name)
    }

    /// Appends a mutation, assigns the next sequence, and notifies listeners.
    ///
    /// Events whose map fails the filter are neither stored nor delivered;
    /// they come back with `sequence == -1` so callers can tell.
    ///
    /// # Errors
    ///
    /// [`JournalError::JournalClosed`] after [`dispose`](Self::dispose).
    pub fn append(&mut self, draft: JournalEventDraft) -> Result<JournalEvent, JournalError> {
        if self.closed {
            return Err(JournalError::JournalClosed);
        }
        if !self.accepts_map(&draft.map_name) {
            return Ok(draft.into_event(FILTERED_SEQUENCE));
        }
        self.maybe_sweep();

        // The ring's next sequence is its tail; stamp the event before storing.
        let event = draft.into_event(self.ring.tail() as i64);
        let seq = self.ring.add(event.clone());
        debug_assert_eq!(seq as i64, event.sequence);

        for (_, listener) in &self.listeners {
            listener(&event);
        }
        Ok(event)
    }

    /// Reads up to `limit` events starting at `seq` (default page size
    /// [`DEFAULT_READ_LIMIT`]).
    #[must_use]
    pub fn read_from(&self, seq: u64, limit: Option<usize>) -> Vec<JournalEvent> {
        self.ring
            .read_from(seq, limit.unwrap_or(DEFAULT_READ_LIMIT))
            .into_iter()
            .cloned()
            .collect()
    }

    /// Reads the inclusive range `[start, end]`, clamped to the retained
    /// window.
    #[must_use]
    pub fn read_range(&self, start: u64, end: u64) -> Vec<JournalEvent> {
        self.ring
            .read_range(start, end)
            .into_iter()
            .cloned()
            .collect()
    }

    /// Sequence of the most recent event, or 0 when empty.
    #[must_use]
    pub fn latest_sequence(&self) -> u64 {
        self.ring.tail().saturating_sub(1)
    }

    /// Sequence of the oldest retained event.
    #[must_use]
    pub fn oldest_sequence(&self) -> u64 {
        self.ring.head()
    }

    /// Retained/total capacity.
    #[must_use]
    pub fn capacity(&self) -> RingCapacity {
        self.ring.capacity()
    }

    /// Registers a listener for future events, optionally replaying the
    /// retained history from `from_sequence` synchronously first. Returns an
    /// id for [`unsubscribe`](Self::unsubscribe).
    ///
    /// # Errors
    ///
    /// [`JournalError::JournalClosed`] after [`dispose`](Self::dispose).
    pub fn subscribe(
        &mut self,
        listener: JournalListener,
        from_sequence: Option<u64>,
    ) -> Result<u64, JournalError> {
        if self.closed {
            return Err(JournalError::JournalClosed);
        }
        if let Some(from) = from_sequence {
            for event in self.ring.read_from(from, usize::MAX) {
                listener(event);
            }
        }
        let id = self.next_listener_id;
        self.next_listener_id += 1;
        self.listeners.push((id, listener));
        Ok(id)
    }

    /// Removes a listener. Idempotent; returns whether it existed.
    pub fn unsubscribe(&mut self, id: u64) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(lid, _)| *lid != id);
        self.listeners.len() != before
    }

    /// Evicts events older than the configured TTL. Returns the number of
    /// evicted events; a no-op without a TTL.
    pub fn compact(&mut self) -> u64 {
        let Some(ttl) = self.config.ttl_ms else {
            return 0;
        };
        let now = self.clock.now();
        self.last_sweep_ms = now;
        let cutoff = now.saturating_sub(ttl);
        self.ring
            .evict_while(|event| event.timestamp.millis < cutoff)
    }

    /// Drops all listeners and closes the journal. Further appends and
    /// subscriptions fail with [`JournalError::JournalClosed`]; reads keep
    /// working.
    pub fn dispose(&mut self) {
        self.listeners.clear();
        self.closed = true;
    }

    /// Whether [`dispose`](Self::dispose) has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn maybe_sweep(&mut self) {
        let Some(ttl) = self.config.ttl_ms else {
            return;
        };
        let interval = ttl.min(MAX_COMPACT_INTERVAL_MS);
        if self.clock.now().saturating_sub(self.last_sweep_ms) >= interval {
            let evicted = self.compact();
            if evicted > 0 {
                tracing::debug!(evicted, "journal compaction evicted events");
            }
        }
    }
}
