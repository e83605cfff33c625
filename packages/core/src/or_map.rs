//! Observed-Remove Map (OR-Map) CRDT.
//!
//! `ORMap<V>` is a multimap: each key holds a set of values, each value
//! instance tracked by a unique tag (the stringified timestamp of its
//! addition). Removals retire the tags the remover observed into a
//! process-wide tombstone set, giving **add-wins** semantics: a concurrent
//! add with a fresh tag survives a concurrent remove.
//!
//! # Storage model
//!
//! `HashMap<String, HashMap<String, ORMapRecord<V>>>` (key -> tag -> record)
//! plus `HashSet<String>` of tombstoned tags. The converged state is the
//! union of records minus the union of tombstones; a tombstoned tag is never
//! resurrected.
//!
//! # Merkle integration
//!
//! Every mutation recomputes a deterministic entry hash over the key's live
//! records (sorted by tag, values in canonical JSON) and updates the
//! internal [`MerkleTree`], so replicas diff OR-Maps exactly like LWW maps.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::hash::fnv1a_hash;
use crate::hlc::{Timestamp, HLC};
use crate::merkle::MerkleTree;
use crate::records::ORMapRecord;
use crate::value::canonical_json;

/// Outcome of merging one key's records, reporting additions and updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MergeKeyResult {
    /// Number of new tags inserted during the merge.
    pub added: usize,
    /// Number of existing tags whose record was replaced.
    pub updated: usize,
}

/// A point-in-time copy of the OR-Map state, for indexers and full-text
/// consumers that need the raw tag structure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound(
    serialize = "V: Serialize",
    deserialize = "V: serde::de::DeserializeOwned"
))]
pub struct ORMapSnapshot<V> {
    /// Key -> tag -> record, with deterministic ordering.
    pub items: BTreeMap<String, BTreeMap<String, ORMapRecord<V>>>,
    /// All tombstoned tags.
    pub tombstones: BTreeSet<String>,
}

/// An Observed-Remove map with add-wins convergence.
pub struct ORMap<V> {
    /// Key -> tag -> record. Only non-tombstoned records are stored.
    items: HashMap<String, HashMap<String, ORMapRecord<V>>>,
    /// Retired tags.
    tombstones: HashSet<String>,
    hlc: HLC,
    merkle_tree: MerkleTree,
}

impl<V> ORMap<V>
where
    V: Clone + Serialize + DeserializeOwned + PartialEq,
{
    /// Creates a new empty map driven by the given HLC.
    #[must_use]
    pub fn new(hlc: HLC) -> Self {
        Self {
            items: HashMap::new(),
            tombstones: HashSet::new(),
            hlc,
            merkle_tree: MerkleTree::default_depth(),
        }
    }

    /// Node id of the owning HLC.
    #[must_use]
    pub fn node_id(&self) -> &str {
        self.hlc.node_id()
    }

    /// Adds a value to the key's set under a fresh tag and returns the
    /// stored record. A `ttl_ms` of `Some(0)` is normalized to no TTL.
    pub fn add(&mut self, key: impl Into<String>, value: V, ttl_ms: Option<u64>) -> ORMapRecord<V> {
        let key = key.into();
        let timestamp = self.hlc.now();
        let record = ORMapRecord {
            value,
            tag: timestamp.to_string(),
            timestamp,
            ttl_ms: ttl_ms.filter(|ttl| *ttl > 0),
        };
        self.items
            .entry(key.clone())
            .or_default()
            .insert(record.tag.clone(), record.clone());
        self.refresh_merkle(&key);
        record
    }

    /// Removes every live instance of `value` under `key` by tombstoning
    /// the observed tags. Returns the removed tags.
    pub fn remove(&mut self, key: &str, value: &V) -> Vec<String> {
        let Some(records) = self.items.get_mut(key) else {
            return Vec::new();
        };
        let removed: Vec<String> = records
            .iter()
            .filter(|(_, record)| record.value == *value)
            .map(|(tag, _)| tag.clone())
            .collect();
        for tag in &removed {
            records.remove(tag);
            self.tombstones.insert(tag.clone());
        }
        if !removed.is_empty() {
            self.refresh_merkle(key);
        }
        removed
    }

    /// Applies a record received from another replica.
    ///
    /// Updates the HLC for causality, then inserts the record unless its tag
    /// is already tombstoned (tombstones win forever) or already present
    /// with an identical record. Returns whether a new tag was inserted.
    pub fn apply(&mut self, key: impl Into<String>, record: ORMapRecord<V>) -> bool {
        // Causality first; drift in non-strict clocks only logs.
        let _ = self.hlc.update(&record.timestamp);

        if self.tombstones.contains(&record.tag) {
            return false;
        }
        let key = key.into();
        let records = self.items.entry(key.clone()).or_default();
        let inserted = !records.contains_key(&record.tag);
        records.insert(record.tag.clone(), record);
        self.refresh_merkle(&key);
        inserted
    }

    /// Idempotently retires a tag, removing any live record carrying it.
    pub fn apply_tombstone(&mut self, tag: &str) {
        if !self.tombstones.insert(tag.to_string()) {
            return;
        }
        let affected: Vec<String> = self
            .items
            .iter()
            .filter(|(_, records)| records.contains_key(tag))
            .map(|(key, _)| key.clone())
            .collect();
        for key in affected {
            if let Some(records) = self.items.get_mut(&key) {
                records.remove(tag);
            }
            self.refresh_merkle(&key);
        }
    }

    /// Live values for a key (expired records filtered).
    #[must_use]
    pub fn get(&self, key: &str) -> Vec<&V> {
        self.get_records(key)
            .into_iter()
            .map(|record| &record.value)
            .collect()
    }

    /// Live records for a key (expired records filtered), sorted by tag for
    /// deterministic output.
    #[must_use]
    pub fn get_records(&self, key: &str) -> Vec<&ORMapRecord<V>> {
        let Some(records) = self.items.get(key) else {
            return Vec::new();
        };
        let mut live: Vec<&ORMapRecord<V>> = records
            .values()
            .filter(|record| !self.is_expired(record))
            .collect();
        live.sort_by(|a, b| a.tag.cmp(&b.tag));
        live
    }

    /// Copies the full tag structure plus tombstone set.
    #[must_use]
    pub fn get_snapshot(&self) -> ORMapSnapshot<V> {
        ORMapSnapshot {
            items: self
                .items
                .iter()
                .map(|(key, records)| {
                    (
                        key.clone(),
                        records
                            .iter()
                            .map(|(tag, record)| (tag.clone(), record.clone()))
                            .collect(),
                    )
                })
                .collect(),
            tombstones: self.tombstones.iter().cloned().collect(),
        }
    }

    /// Merges another replica's full state into this one.
    pub fn merge(&mut self, other: &ORMap<V>) {
        for tag in &other.tombstones {
            self.apply_tombstone(tag);
        }
        for (key, records) in &other.items {
            for record in records.values() {
                self.apply(key.clone(), record.clone());
            }
        }
    }

    /// Merges one key's records from a remote replica, reporting how many
    /// tags were added or replaced. Tombstoned tags are skipped.
    pub fn merge_key(
        &mut self,
        key: impl Into<String>,
        incoming: &[ORMapRecord<V>],
    ) -> MergeKeyResult {
        let key = key.into();
        let mut result = MergeKeyResult::default();
        for record in incoming {
            let _ = self.hlc.update(&record.timestamp);
            if self.tombstones.contains(&record.tag) {
                continue;
            }
            let records = self.items.entry(key.clone()).or_default();
            match records.get(&record.tag) {
                None => {
                    records.insert(record.tag.clone(), record.clone());
                    result.added += 1;
                }
                Some(existing) if existing != record => {
                    records.insert(record.tag.clone(), record.clone());
                    result.updated += 1;
                }
                Some(_) => {}
            }
        }
        if result.added > 0 || result.updated > 0 {
            self.refresh_merkle(&key);
        }
        result
    }

    /// Drops tombstoned tags whose embedded timestamp parses and is strictly
    /// before `older_than`. Returns the pruned tags.
    pub fn prune(&mut self, older_than: &Timestamp) -> Vec<String> {
        let pruned: Vec<String> = self
            .tombstones
            .iter()
            .filter(|tag| {
                tag.parse::<Timestamp>()
                    .map(|ts| ts < *older_than)
                    .unwrap_or(false)
            })
            .cloned()
            .collect();
        for tag in &pruned {
            self.tombstones.remove(tag);
        }
        pruned
    }

    /// Removes all records and tombstones and resets the Merkle tree.
    /// The HLC is left untouched.
    pub fn clear(&mut self) {
        self.items.clear();
        self.tombstones.clear();
        self.merkle_tree = MerkleTree::default_depth();
    }

    /// All keys that currently hold at least one live tag.
    #[must_use]
    pub fn all_keys(&self) -> Vec<&String> {
        self.items
            .iter()
            .filter(|(_, records)| !records.is_empty())
            .map(|(key, _)| key)
            .collect()
    }

    /// Whether a tag has been retired.
    #[must_use]
    pub fn is_tombstoned(&self, tag: &str) -> bool {
        self.tombstones.contains(tag)
    }

    /// All tombstoned tags.
    #[must_use]
    pub fn get_tombstones(&self) -> Vec<&String> {
        self.tombstones.iter().collect()
    }

    /// Read-only access to the Merkle summary tree.
    #[must_use]
    pub fn merkle_tree(&self) -> &MerkleTree {
        &self.merkle_tree
    }

    fn is_expired(&self, record: &ORMapRecord<V>) -> bool {
        match record.expires_at() {
            Some(expires_at) => expires_at < self.hlc.clock_source().now(),
            None => false,
        }
    }

    /// Recomputes the key's Merkle entry from its live records.
    ///
    /// The entry hash folds `tag:value` pairs in tag order, so replicas that
    /// converged on the same records agree on the hash regardless of
    /// insertion order. Keys with no live records are removed from the tree.
    fn refresh_merkle(&mut self, key: &str) {
        let Some(records) = self.items.get(key) else {
            self.merkle_tree.remove(key);
            return;
        };
        if records.is_empty() {
            self.merkle_tree.remove(key);
            return;
        }
        let mut tags: Vec<&String> = records.keys().collect();
        tags.sort();
        let mut entry_hash = 0_u32;
        for tag in tags {
            let record = &records[tag];
            let piece = fnv1a_hash(&format!("{tag}:{}", canonical_json(&record.value)));
            entry_hash = entry_hash.wrapping_add(piece);
        }
        self.merkle_tree.update(key, entry_hash);
    }
}
