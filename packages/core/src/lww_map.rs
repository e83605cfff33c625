//! Last-Write-Wins Map (LWW-Map) CRDT.
//!
//! `LWWMap<V>` resolves concurrent writes by keeping the record with the
//! highest [`Timestamp`] (millis, then counter, then node id). It maintains
//! an internal [`MerkleTree`] fingerprint so replicas can find divergent
//! keys without exchanging full state.
//!
//! # Tombstones
//!
//! Deletions store a tombstone (`value: None`) with a fresh timestamp.
//! Tombstones participate in merge like any other record, which is what
//! prevents a stale write from resurrecting a deleted key. [`LWWMap::prune`]
//! garbage-collects old tombstones at the caller's discretion.
//!
//! # TTL
//!
//! Records may carry a TTL in milliseconds (a `ttl` of 0 means none).
//! Expired records read as absent but remain in storage -- and keep
//! participating in merge -- until overwritten or pruned.
//!
//! # Conflict resolvers
//!
//! [`LWWMap::merge_resolved`] consults a [`ResolverRegistry`] before
//! applying the default timestamp rule; see [`crate::resolver`].

use std::collections::HashMap;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::hash::fnv1a_hash;
use crate::hlc::{HlcError, Timestamp, HLC};
use crate::merkle::MerkleTree;
use crate::records::LWWRecord;
use crate::resolver::{
    MergeContext, MergeRejection, MergeVerdict, Principal, ResolverError, ResolverRegistry,
};
use crate::value::Value;

/// Errors surfaced by map mutations.
#[derive(Debug, thiserror::Error)]
pub enum MapError {
    /// The incoming record failed validation; state is unchanged.
    #[error("invalid record: {0}")]
    InvalidRecord(String),
    /// The clock rejected the incoming timestamp (strict mode only).
    #[error(transparent)]
    Clock(#[from] HlcError),
    /// A resolver was cancelled; the merge aborted and the record is
    /// unchanged.
    #[error("resolver cancelled")]
    ResolverCancelled,
}

/// Result of a resolver-mediated merge.
#[derive(Debug, Clone, PartialEq)]
pub enum MergeOutcome {
    /// The merge ran to completion; `changed` reports whether the stored
    /// record differs from before.
    Applied {
        /// Whether local state changed.
        changed: bool,
    },
    /// A resolver rejected the incoming record; the map is unchanged.
    Rejected(MergeRejection),
}

/// A Last-Write-Wins map providing conflict-free convergence.
///
/// Keys are [`String`]s; values are generic over `V` with bounds
/// `Clone + Serialize + DeserializeOwned + PartialEq`.
pub struct LWWMap<V> {
    data: HashMap<String, LWWRecord<V>>,
    hlc: HLC,
    merkle_tree: MerkleTree,
}

impl<V> LWWMap<V>
where
    V: Clone + Serialize + DeserializeOwned + PartialEq,
{
    /// Creates a new empty map driven by the given HLC.
    ///
    /// The HLC stamps `set()` and `remove()`, tracks causality on `merge()`,
    /// and its clock source drives TTL expiry checks.
    #[must_use]
    pub fn new(hlc: HLC) -> Self {
        Self {
            data: HashMap::new(),
            hlc,
            merkle_tree: MerkleTree::default_depth(),
        }
    }

    /// Node id of the owning HLC.
    #[must_use]
    pub fn node_id(&self) -> &str {
        self.hlc.node_id()
    }

    /// Stores a value under a fresh HLC timestamp and returns the stored
    /// record. A `ttl_ms` of `Some(0)` is normalized to no TTL.
    pub fn set(&mut self, key: impl Into<String>, value: V, ttl_ms: Option<u64>) -> LWWRecord<V> {
        let key = key.into();
        let record = LWWRecord {
            value: Some(value),
            timestamp: self.hlc.now(),
            ttl_ms: ttl_ms.filter(|ttl| *ttl > 0),
        };
        self.store(&key, record.clone());
        record
    }

    /// Returns the live value for a key.
    ///
    /// `None` for missing keys, tombstones, and expired records.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&V> {
        let record = self.data.get(key)?;
        let value = record.value.as_ref()?;
        if self.is_expired(record) {
            return None;
        }
        Some(value)
    }

    /// Returns the raw record for a key, tombstones and expired included.
    ///
    /// Synchronization needs the full record; use [`get`](Self::get) for
    /// reads.
    #[must_use]
    pub fn get_record(&self, key: &str) -> Option<&LWWRecord<V>> {
        self.data.get(key)
    }

    /// Stores a tombstone for a key under a fresh timestamp and returns it.
    ///
    /// A tombstone is created even if the key never existed, so the deletion
    /// wins against concurrent writes that have not arrived yet.
    pub fn remove(&mut self, key: &str) -> LWWRecord<V> {
        let tombstone = LWWRecord {
            value: None,
            timestamp: self.hlc.now(),
            ttl_ms: None,
        };
        self.store(key, tombstone.clone());
        tombstone
    }

    /// Merges a remote record under the default timestamp rule.
    ///
    /// Updates the HLC from the remote timestamp, then accepts the record iff
    /// there is no local record or the remote timestamp is strictly greater.
    /// Returns whether local state changed.
    ///
    /// # Errors
    ///
    /// [`MapError::InvalidRecord`] for an empty key or empty writer node id;
    /// [`MapError::Clock`] if the clock is strict and the remote timestamp
    /// drifts too far. State is unchanged on error.
    pub fn merge(
        &mut self,
        key: impl Into<String>,
        remote_record: LWWRecord<V>,
    ) -> Result<bool, MapError> {
        let key = key.into();
        Self::validate_incoming(&key, &remote_record)?;
        self.hlc.update(&remote_record.timestamp)?;
        Ok(self.apply_lww(&key, remote_record))
    }

    /// Removes tombstones with timestamps strictly before `older_than`.
    ///
    /// Live records are never pruned. Returns the pruned keys.
    pub fn prune(&mut self, older_than: &Timestamp) -> Vec<String> {
        let pruned: Vec<String> = self
            .data
            .iter()
            .filter(|(_, record)| record.value.is_none() && record.timestamp < *older_than)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &pruned {
            self.data.remove(key);
            self.merkle_tree.remove(key);
        }
        pruned
    }

    /// Removes all records and resets the Merkle tree.
    ///
    /// The HLC is deliberately left untouched: writes after a clear must
    /// still causally dominate everything written before it.
    pub fn clear(&mut self) {
        self.data.clear();
        self.merkle_tree = MerkleTree::default_depth();
    }

    /// Iterates over live `(key, value)` entries, skipping tombstones and
    /// expired records.
    pub fn entries(&self) -> impl Iterator<Item = (&String, &V)> {
        self.data.iter().filter_map(move |(key, record)| {
            let value = record.value.as_ref()?;
            if self.is_expired(record) {
                return None;
            }
            Some((key, value))
        })
    }

    /// Iterates over live keys, skipping tombstones and expired records.
    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.entries().map(|(key, _)| key)
    }

    /// Iterates over every stored key, tombstones included.
    pub fn all_keys(&self) -> impl Iterator<Item = &String> {
        self.data.keys()
    }

    /// Number of stored records, tombstones included.
    #[must_use]
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Read-only access to the Merkle summary tree.
    #[must_use]
    pub fn merkle_tree(&self) -> &MerkleTree {
        &self.merkle_tree
    }

    /// Generates a fresh timestamp from the owning HLC.
    ///
    /// Exposed for façades that need stamps for journal events.
    pub fn next_timestamp(&mut self) -> Timestamp {
        self.hlc.now()
    }

    /// Current millis from the HLC's clock source.
    #[must_use]
    pub fn clock_now(&self) -> u64 {
        self.hlc.clock_source().now()
    }

    fn validate_incoming(key: &str, record: &LWWRecord<V>) -> Result<(), MapError> {
        if key.is_empty() {
            return Err(MapError::InvalidRecord("empty key".to_string()));
        }
        if record.timestamp.node_id.is_empty() {
            return Err(MapError::InvalidRecord(
                "timestamp missing node id".to_string(),
            ));
        }
        Ok(())
    }

    /// Default LWW acceptance: no local record, or remote strictly newer.
    fn apply_lww(&mut self, key: &str, remote_record: LWWRecord<V>) -> bool {
        let should_accept = match self.data.get(key) {
            None => true,
            Some(local) => remote_record.timestamp > local.timestamp,
        };
        if should_accept {
            self.store(key, remote_record);
        }
        should_accept
    }

    fn store(&mut self, key: &str, record: LWWRecord<V>) {
        let fingerprint = fnv1a_hash(&format!("{key}:{}", record.timestamp));
        self.merkle_tree.update(key, fingerprint);
        self.data.insert(key.to_string(), record);
    }

    fn is_expired(&self, record: &LWWRecord<V>) -> bool {
        match record.expires_at() {
            Some(expires_at) => expires_at < self.hlc.clock_source().now(),
            None => false,
        }
    }
}

impl LWWMap<Value> {
    /// Merges a remote record through the conflict-resolver pipeline.
    ///
    /// The HLC is updated first (so causality holds regardless of verdict),
    /// then the registry is consulted with a [`MergeContext`]. The verdict
    /// overrides the default rule:
    ///
    /// - `Accept` stores the remote record as-is;
    /// - `Reject` leaves the map unchanged and emits a [`MergeRejection`]
    ///   through the registry's listeners;
    /// - `Merge(value)` stores the custom value under the remote timestamp;
    /// - `Local` falls through to the default timestamp rule.
    ///
    /// A resolver failure is coerced to a rejection; a cancelled resolver
    /// aborts with [`MapError::ResolverCancelled`] and the record unchanged.
    ///
    /// # Errors
    ///
    /// As [`merge`](Self::merge), plus [`MapError::ResolverCancelled`].
    pub fn merge_resolved(
        &mut self,
        map_name: &str,
        key: impl Into<String>,
        incoming: LWWRecord<Value>,
        registry: &ResolverRegistry,
        auth: Option<&Principal>,
    ) -> Result<MergeOutcome, MapError> {
        let key = key.into();
        Self::validate_incoming(&key, &incoming)?;
        self.hlc.update(&incoming.timestamp)?;

        let verdict = {
            let local = self.data.get(&key);
            let read = |k: &str| self.get(k).cloned();
            let ctx = MergeContext {
                map_name,
                key: &key,
                local_value: local.and_then(|r| r.value.as_ref()),
                remote_value: incoming.value.as_ref(),
                local_timestamp: local.map(|r| &r.timestamp),
                remote_timestamp: &incoming.timestamp,
                remote_node_id: &incoming.timestamp.node_id,
                auth,
                read_entry: &read,
            };
            registry.resolve(&ctx)
        };

        let verdict = match verdict {
            Ok(verdict) => verdict,
            Err(ResolverError::Cancelled) => return Err(MapError::ResolverCancelled),
            Err(ResolverError::Failure(message)) => {
                tracing::warn!(key = key.as_str(), error = message.as_str(), "resolver failed");
                MergeVerdict::Reject {
                    reason: "resolver_failure".to_string(),
                }
            }
        };

        match verdict {
            MergeVerdict::Accept => {
                let changed = self.data.get(&key) != Some(&incoming);
                self.store(&key, incoming);
                Ok(MergeOutcome::Applied { changed })
            }
            MergeVerdict::Merge(value) => {
                let merged = LWWRecord {
                    value: Some(value),
                    timestamp: incoming.timestamp,
                    ttl_ms: incoming.ttl_ms,
                };
                let changed = self.data.get(&key) != Some(&merged);
                self.store(&key, merged);
                Ok(MergeOutcome::Applied { changed })
            }
            MergeVerdict::Local => Ok(MergeOutcome::Applied {
                changed: self.apply_lww(&key, incoming),
            }),
            MergeVerdict::Reject { reason } => {
                let rejection = MergeRejection {
                    map_name: map_name.to_string(),
                    key,
                    attempted_value: incoming.value,
                    reason,
                    node_id: incoming.timestamp.node_id.clone(),
                    timestamp: incoming.timestamp,
                };
                registry.notify_rejection(&rejection);
                Ok(MergeOutcome::Rejected(rejection))
            }
        }
    }
}


/// Property-based tests for CRDT laws.
#[cfg(test)]
mod proptests {
    use std::collections::BTreeMap;

    use proptest::prelude::*;

    use super::*;
    use crate::testutil::FixedClock;
    use crate::value::Value;

    /// A map whose clock is far in the future so arbitrary record
    /// timestamps never trip drift handling.
    fn make_proptest_map() -> LWWMap<Value> {
        let (clock, _) = FixedClock::new(u64::MAX / 2);
        let hlc = HLC::new("proptest-node", Box::new(clock));
        LWWMap::new(hlc)
    }

    fn arb_timestamp() -> impl Strategy<Value = Timestamp> {
        (1_u64..1_000_000_000_u64, 0_u32..1000_u32, "[a-z]{1,8}")
            .prop_map(|(millis, counter, node_id)| Timestamp {
                millis,
                counter,
                node_id,
            })
    }

    fn arb_value() -> impl Strategy<Value = Value> {
        prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(Value::Int),
            "[a-zA-Z0-9 ]{0,20}".prop_map(Value::String),
            proptest::collection::vec(any::<u8>(), 0..16).prop_map(Value::Bytes),
        ]
    }

    fn arb_record() -> impl Strategy<Value = LWWRecord<Value>> {
        (prop::option::of(arb_value()), arb_timestamp()).prop_map(|(value, timestamp)| LWWRecord {
            value,
            timestamp,
            ttl_ms: None,
        })
    }

    proptest! {
        /// Commutativity: merge order does not matter for one key.
        #[test]
        fn merge_is_commutative(r1 in arb_record(), r2 in arb_record()) {
            let mut map1 = make_proptest_map();
            map1.merge("k", r1.clone()).unwrap();
            map1.merge("k", r2.clone()).unwrap();

            let mut map2 = make_proptest_map();
            map2.merge("k", r2).unwrap();
            map2.merge("k", r1).unwrap();

            prop_assert_eq!(map1.get_record("k"), map2.get_record("k"));
            prop_assert_eq!(
                map1.merkle_tree().get_root_hash(),
                map2.merkle_tree().get_root_hash()
            );
        }

        /// Idempotence: a repeated merge changes nothing.
        #[test]
        fn merge_is_idempotent(r in arb_record()) {
            let mut map = make_proptest_map();
            map.merge("k", r.clone()).unwrap();
            let record_after_first = map.get_record("k").cloned();
            let root_after_first = map.merkle_tree().get_root_hash();

            let changed = map.merge("k", r).unwrap();

            prop_assert!(!changed);
            prop_assert_eq!(map.get_record("k").cloned(), record_after_first);
            prop_assert_eq!(map.merkle_tree().get_root_hash(), root_after_first);
        }

        /// Convergence: all permutations of three merges agree.
        #[test]
        fn merge_converges_across_permutations(
            r1 in arb_record(),
            r2 in arb_record(),
            r3 in arb_record(),
        ) {
            let records = [r1, r2, r3];
            let orders: [[usize; 3]; 6] = [
                [0, 1, 2], [0, 2, 1], [1, 0, 2], [1, 2, 0], [2, 0, 1], [2, 1, 0],
            ];
            let mut results = Vec::new();
            for order in orders {
                let mut map = make_proptest_map();
                for index in order {
                    map.merge("k", records[index].clone()).unwrap();
                }
                results.push(map.get_record("k").cloned());
            }
            for result in &results[1..] {
                prop_assert_eq!(&results[0], result);
            }
        }

        /// The survivor is always the record with the greatest timestamp.
        #[test]
        fn merge_winner_has_greatest_timestamp(r1 in arb_record(), r2 in arb_record()) {
            let mut map = make_proptest_map();
            map.merge("k", r1.clone()).unwrap();
            map.merge("k", r2.clone()).unwrap();

            let winner = map.get_record("k").expect("record stored");
            let expected = if r1.timestamp >= r2.timestamp { &r1 } else { &r2 };
            prop_assert_eq!(winner, expected);
        }

        /// Multi-key convergence: forward and reverse delivery agree.
        #[test]
        fn multi_key_convergence(
            records in proptest::collection::vec(("[a-z]{1,4}", arb_record()), 1..6),
        ) {
            let mut expected: BTreeMap<String, &LWWRecord<Value>> = BTreeMap::new();
            for (key, record) in &records {
                match expected.get(key.as_str()) {
                    None => { expected.insert(key.clone(), record); }
                    Some(existing) => {
                        if record.timestamp > existing.timestamp {
                            expected.insert(key.clone(), record);
                        }
                    }
                }
            }

            let mut forward = make_proptest_map();
            for (key, record) in &records {
                forward.merge(key.clone(), record.clone()).unwrap();
            }
            let mut reverse = make_proptest_map();
            for (key, record) in records.iter().rev() {
                reverse.merge(key.clone(), record.clone()).unwrap();
            }

            for (key, expected_record) in &expected {
                prop_assert_eq!(forward.get_record(key), Some(*expected_record));
                prop_assert_eq!(reverse.get_record(key), Some(*expected_record));
            }
            prop_assert_eq!(
                forward.merkle_tree().get_root_hash(),
                reverse.merkle_tree().get_root_hash()
            );
        }
    }
}
