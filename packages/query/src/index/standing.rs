//! Standing-query index: a pre-computed result set for one query.

use std::collections::HashSet;

use ahash::RandomState;
use synq_core::value::Value;

use crate::attribute::AttributeResolver;
use crate::query::QueryNode;
use crate::resultset::{ResultSet, SetResultSet};

use super::COST_STANDING;

type KeySet = HashSet<String, RandomState>;

/// How one mutation affected a standing result set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StandingChange {
    /// The key entered the result set.
    Added,
    /// The key left the result set.
    Removed,
    /// The key stayed in the set but its record changed.
    Updated,
    /// The key is unaffected.
    Unchanged,
}

/// Materialized key set for one query, kept current record by record.
///
/// Identified by the query's canonical hash; the live-query manager owns
/// one per distinct subscribed query and reads deltas off
/// [`StandingQueryIndex::on_added`] / [`on_updated`](Self::on_updated) /
/// [`on_removed`](Self::on_removed).
pub struct StandingQueryIndex {
    query: QueryNode,
    hash: u32,
    resolver: AttributeResolver,
    keys: KeySet,
}

impl StandingQueryIndex {
    /// Creates an empty standing index for `query`.
    #[must_use]
    pub fn new(query: QueryNode, resolver: AttributeResolver) -> Self {
        let hash = query.canonical_hash();
        Self {
            query,
            hash,
            resolver,
            keys: KeySet::default(),
        }
    }

    /// Builds the index from a snapshot of current entries.
    pub fn build<'a, I>(&mut self, entries: I)
    where
        I: IntoIterator<Item = (&'a String, &'a Value)>,
    {
        for (key, record) in entries {
            if self.query.matches(record, &self.resolver) {
                self.keys.insert(key.clone());
            }
        }
    }

    /// The query this index answers.
    #[must_use]
    pub fn query(&self) -> &QueryNode {
        &self.query
    }

    /// Canonical hash identifying the query.
    #[must_use]
    pub fn canonical_hash(&self) -> u32 {
        self.hash
    }

    /// Current number of matching keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Whether no key matches.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Whether a key is in the result set.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.keys.contains(key)
    }

    /// The current result set, at standing-lookup cost.
    #[must_use]
    pub fn retrieve(&self) -> Box<dyn ResultSet> {
        Box::new(SetResultSet::new(self.keys.clone(), COST_STANDING))
    }

    /// Classifies a transition without mutating the set.
    #[must_use]
    pub fn determine_change(
        &self,
        key: &str,
        old: Option<&Value>,
        new: Option<&Value>,
    ) -> StandingChange {
        let was_in = self.keys.contains(key);
        let matches_new = new.is_some_and(|record| self.query.matches(record, &self.resolver));
        match (was_in, matches_new) {
            (false, true) => StandingChange::Added,
            (true, false) => StandingChange::Removed,
            (true, true) => {
                if old == new {
                    StandingChange::Unchanged
                } else {
                    StandingChange::Updated
                }
            }
            (false, false) => StandingChange::Unchanged,
        }
    }

    /// A record appeared; returns the resulting change.
    pub fn on_added(&mut self, key: &str, record: &Value) -> StandingChange {
        if self.query.matches(record, &self.resolver) {
            self.keys.insert(key.to_string());
            StandingChange::Added
        } else {
            StandingChange::Unchanged
        }
    }

    /// A record changed; returns the resulting change.
    pub fn on_updated(&mut self, key: &str, old: &Value, new: &Value) -> StandingChange {
        let change = self.determine_change(key, Some(old), Some(new));
        match change {
            StandingChange::Added => {
                self.keys.insert(key.to_string());
            }
            StandingChange::Removed => {
                self.keys.remove(key);
            }
            StandingChange::Updated | StandingChange::Unchanged => {}
        }
        change
    }

    /// A record disappeared; returns the resulting change.
    pub fn on_removed(&mut self, key: &str) -> StandingChange {
        if self.keys.remove(key) {
            StandingChange::Removed
        } else {
            StandingChange::Unchanged
        }
    }

    /// Drops all matching keys.
    pub fn clear(&mut self) {
        self.keys.clear();
    }
}
