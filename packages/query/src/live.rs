//! Live queries: standing indexes, subscriptions, delta dispatch.
//!
//! The [`LiveQueryManager`] keeps one [`StandingQueryIndex`] per distinct
//! canonical query hash. Subscribing delivers an `Initial` event
//! synchronously before `subscribe` returns; every subsequent mutation is
//! classified against each standing index and fanned out as `Delta` events
//! in subscription registration order. A panicking subscriber is logged and
//! isolated; it never affects other subscribers or the mutation itself.

use std::panic::{catch_unwind, AssertUnwindSafe};

use serde::{Deserialize, Serialize};
use synq_core::journal::JournalEventType;
use synq_core::value::Value;

use crate::attribute::AttributeResolver;
use crate::index::standing::{StandingChange, StandingQueryIndex};
use crate::planner::StandingLookup;
use crate::query::QueryNode;
use crate::resultset::ResultSet;

/// Whether a record entered, changed within, or left a result set.
///
/// Variant names match the wire spelling exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[allow(non_camel_case_types, clippy::upper_case_acronyms)]
pub enum ChangeEventType {
    /// The record entered the result set.
    ENTER,
    /// The record changed while staying in the result set.
    UPDATE,
    /// The record left the result set.
    LEAVE,
}

impl ChangeEventType {
    fn from_standing(change: StandingChange) -> Option<Self> {
        match change {
            StandingChange::Added => Some(ChangeEventType::ENTER),
            StandingChange::Updated => Some(ChangeEventType::UPDATE),
            StandingChange::Removed => Some(ChangeEventType::LEAVE),
            StandingChange::Unchanged => None,
        }
    }
}

/// Events delivered to a live-query subscriber.
#[derive(Debug, Clone, PartialEq)]
pub enum LiveQueryEvent {
    /// The current result set, delivered synchronously during subscribe.
    Initial {
        /// Matching keys at subscription time.
        keys: Vec<String>,
    },
    /// One result-set change.
    Delta {
        /// Affected key.
        key: String,
        /// The record's current value (`None` after deletion).
        record: Option<Value>,
        /// How the result set changed.
        change: ChangeEventType,
        /// The mutation that caused it.
        operation: JournalEventType,
        /// Result-set size after the change.
        new_result_count: usize,
    },
}

/// A live-query callback.
pub type LiveCallback = Box<dyn Fn(&LiveQueryEvent)>;

/// Handle identifying one subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LiveSubscription {
    /// Canonical hash of the subscribed query.
    pub query_hash: u32,
    /// Callback id within that query's subscriber set.
    pub callback_id: u64,
}

struct LiveEntry {
    index: StandingQueryIndex,
    callbacks: Vec<(u64, LiveCallback)>,
}

/// Registry of standing indexes and their subscribers.
#[derive(Default)]
pub struct LiveQueryManager {
    entries: Vec<LiveEntry>,
    next_callback_id: u64,
}

impl LiveQueryManager {
    /// An empty manager.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct standing queries.
    #[must_use]
    pub fn standing_count(&self) -> usize {
        self.entries.len()
    }

    /// Subscribes a callback to `query`.
    ///
    /// Builds the standing index from `entries` if this is the first
    /// subscription for the query, then delivers `Initial` synchronously to
    /// the new callback before returning.
    pub fn subscribe<'a, I>(
        &mut self,
        query: QueryNode,
        resolver: AttributeResolver,
        entries: I,
        callback: LiveCallback,
    ) -> LiveSubscription
    where
        I: IntoIterator<Item = (&'a String, &'a Value)>,
    {
        let hash = query.canonical_hash();
        let position = match self.entries.iter().position(|e| e.index.canonical_hash() == hash) {
            Some(position) => position,
            None => {
                let mut index = StandingQueryIndex::new(query, resolver);
                index.build(entries);
                self.entries.push(LiveEntry {
                    index,
                    callbacks: Vec::new(),
                });
                self.entries.len() - 1
            }
        };

        let callback_id = self.next_callback_id;
        self.next_callback_id += 1;

        let entry = &mut self.entries[position];
        let initial = LiveQueryEvent::Initial {
            keys: entry.index.retrieve().materialize().to_vec(),
        };
        deliver(&callback, &initial);
        entry.callbacks.push((callback_id, callback));

        LiveSubscription {
            query_hash: hash,
            callback_id,
        }
    }

    /// Removes a subscription. Idempotent; drops the standing index once
    /// its last subscriber is gone. Returns whether anything was removed.
    pub fn unsubscribe(&mut self, subscription: LiveSubscription) -> bool {
        let Some(position) = self
            .entries
            .iter()
            .position(|e| e.index.canonical_hash() == subscription.query_hash)
        else {
            return false;
        };
        let entry = &mut self.entries[position];
        let before = entry.callbacks.len();
        entry.callbacks.retain(|(id, _)| *id != subscription.callback_id);
        let removed = entry.callbacks.len() != before;
        if entry.callbacks.is_empty() {
            self.entries.remove(position);
        }
        removed
    }

    /// The standing result set for a canonical hash, if one exists.
    #[must_use]
    pub fn standing_result(&self, hash: u32) -> Option<Box<dyn ResultSet>> {
        self.entries
            .iter()
            .find(|e| e.index.canonical_hash() == hash)
            .map(|e| e.index.retrieve())
    }

    /// A record appeared.
    pub fn on_record_added(&mut self, key: &str, record: &Value) {
        for entry in &mut self.entries {
            let change = entry.index.on_added(key, record);
            Self::dispatch(entry, key, Some(record), change, JournalEventType::Put);
        }
    }

    /// A record changed.
    pub fn on_record_updated(&mut self, key: &str, old: &Value, new: &Value) {
        for entry in &mut self.entries {
            let change = entry.index.on_updated(key, old, new);
            Self::dispatch(entry, key, Some(new), change, JournalEventType::Update);
        }
    }

    /// A record disappeared.
    pub fn on_record_removed(&mut self, key: &str) {
        for entry in &mut self.entries {
            let change = entry.index.on_removed(key);
            Self::dispatch(entry, key, None, change, JournalEventType::Delete);
        }
    }

    /// Drops every standing index and subscriber.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Empties every standing result set while keeping subscribers, for a
    /// map-level clear.
    pub fn clear_results(&mut self) {
        for entry in &mut self.entries {
            entry.index.clear();
        }
    }

    fn dispatch(
        entry: &LiveEntry,
        key: &str,
        record: Option<&Value>,
        change: StandingChange,
        operation: JournalEventType,
    ) {
        let Some(change) = ChangeEventType::from_standing(change) else {
            return;
        };
        let event = LiveQueryEvent::Delta {
            key: key.to_string(),
            record: record.cloned(),
            change,
            operation,
            new_result_count: entry.index.len(),
        };
        for (_, callback) in &entry.callbacks {
            deliver(callback, &event);
        }
    }
}

impl StandingLookup for LiveQueryManager {
    fn has_standing(&self, hash: u32) -> bool {
        self.entries.iter().any(|e| e.index.canonical_hash() == hash)
    }
}

/// Invokes a callback, logging and swallowing panics so one subscriber
/// cannot break the mutation or its peers.
fn deliver(callback: &LiveCallback, event: &LiveQueryEvent) {
    if catch_unwind(AssertUnwindSafe(|| callback(event))).is_err() {
        tracing::warn!("live query subscriber panicked; continuing");
    }
}
