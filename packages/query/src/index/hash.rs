//! Exact-match hash index: `value -> set(key)` plus a `has` set.

use std::collections::{HashMap, HashSet};

use ahash::RandomState;
use synq_core::value::Value;

use crate::attribute::Attribute;
use crate::query::QueryNode;
use crate::resultset::{ResultSet, SetResultSet, UnionResultSet};

use super::{Index, IndexKind, IndexStats, QueryKind, COST_HASH};

type KeySet = HashSet<String, RandomState>;

/// Hash index over one attribute.
///
/// Answers `eq`, `in`, and `has` at cost 30. Multi-valued attributes index
/// the key under every extracted value.
pub struct HashIndex {
    attribute: Attribute,
    buckets: HashMap<crate::attribute::ScalarValue, KeySet, RandomState>,
    /// Keys with at least one extracted value.
    present: KeySet,
}

impl HashIndex {
    /// Creates an empty hash index over `attribute`.
    #[must_use]
    pub fn new(attribute: Attribute) -> Self {
        Self {
            attribute,
            buckets: HashMap::default(),
            present: KeySet::default(),
        }
    }

    fn bucket(&self, value: &crate::attribute::ScalarValue) -> KeySet {
        self.buckets.get(value).cloned().unwrap_or_default()
    }
}

impl Index for HashIndex {
    fn attribute(&self) -> &str {
        self.attribute.name()
    }

    fn kind(&self) -> IndexKind {
        IndexKind::Hash
    }

    fn retrieval_cost(&self) -> u32 {
        COST_HASH
    }

    fn supports(&self, kind: QueryKind) -> bool {
        matches!(kind, QueryKind::Eq | QueryKind::In | QueryKind::Has)
    }

    fn retrieve(&self, query: &QueryNode) -> Option<Box<dyn ResultSet>> {
        match query {
            QueryNode::Eq { attr, value } if attr == self.attribute.name() => {
                Some(Box::new(SetResultSet::new(self.bucket(value), COST_HASH)))
            }
            QueryNode::In { attr, values } if attr == self.attribute.name() => {
                let children: Vec<Box<dyn ResultSet>> = values
                    .iter()
                    .map(|value| {
                        Box::new(SetResultSet::new(self.bucket(value), COST_HASH))
                            as Box<dyn ResultSet>
                    })
                    .collect();
                Some(Box::new(UnionResultSet::new(children)))
            }
            QueryNode::Has { attr } if attr == self.attribute.name() => Some(Box::new(
                SetResultSet::new(self.present.clone(), COST_HASH),
            )),
            _ => None,
        }
    }

    fn add(&mut self, key: &str, record: &Value) {
        let values = self.attribute.values_of(record);
        if values.is_empty() {
            return;
        }
        self.present.insert(key.to_string());
        for value in values {
            self.buckets.entry(value).or_default().insert(key.to_string());
        }
    }

    fn remove(&mut self, key: &str, record: &Value) {
        for value in self.attribute.values_of(record) {
            if let Some(bucket) = self.buckets.get_mut(&value) {
                bucket.remove(key);
                if bucket.is_empty() {
                    self.buckets.remove(&value);
                }
            }
        }
        self.present.remove(key);
    }

    fn update(&mut self, key: &str, old: &Value, new: &Value) {
        // No work when the projection did not change.
        if self.attribute.values_of(old) == self.attribute.values_of(new) {
            return;
        }
        self.remove(key, old);
        self.add(key, new);
    }

    fn clear(&mut self) {
        self.buckets.clear();
        self.present.clear();
    }

    fn stats(&self) -> IndexStats {
        IndexStats {
            attribute: self.attribute.name().to_string(),
            kind: IndexKind::Hash,
            distinct_values: self.buckets.len(),
            indexed_keys: self.present.len(),
            pending: 0,
        }
    }
}
