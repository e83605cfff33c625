//! Sorted (navigable) index: a `BTreeMap<value, set(key)>` answering ranges.

use std::collections::{BTreeMap, HashSet};
use std::ops::Bound;

use ahash::RandomState;
use synq_core::value::Value;

use crate::attribute::{Attribute, ScalarValue};
use crate::query::QueryNode;
use crate::resultset::{ResultSet, SetResultSet};

use super::{Index, IndexKind, IndexStats, QueryKind, COST_NAVIGABLE};

type KeySet = HashSet<String, RandomState>;

/// Navigable index over one attribute, in [`ScalarValue`] total order.
///
/// Answers everything the hash index answers plus `gt`/`gte`/`lt`/`lte`/
/// `between`, at cost 40. Exposes [`NavigableIndex::min_value`] /
/// [`NavigableIndex::max_value`] and an ordered key stream for the sort
/// fast path.
pub struct NavigableIndex {
    attribute: Attribute,
    sorted: BTreeMap<ScalarValue, KeySet>,
    indexed_keys: usize,
}

impl NavigableIndex {
    /// Creates an empty navigable index over `attribute`.
    #[must_use]
    pub fn new(attribute: Attribute) -> Self {
        Self {
            attribute,
            sorted: BTreeMap::new(),
            indexed_keys: 0,
        }
    }

    /// Smallest indexed value.
    #[must_use]
    pub fn min_value(&self) -> Option<&ScalarValue> {
        self.sorted.keys().next()
    }

    /// Largest indexed value.
    #[must_use]
    pub fn max_value(&self) -> Option<&ScalarValue> {
        self.sorted.keys().next_back()
    }

    fn collect_range(&self, low: Bound<&ScalarValue>, high: Bound<&ScalarValue>) -> KeySet {
        let mut keys = KeySet::default();
        for bucket in self.sorted.range((low, high)).map(|(_, keys)| keys) {
            keys.extend(bucket.iter().cloned());
        }
        keys
    }

    fn range_for(&self, query: &QueryNode) -> Option<KeySet> {
        Some(match query {
            QueryNode::Eq { value, .. } => self.sorted.get(value).cloned().unwrap_or_default(),
            QueryNode::In { values, .. } => {
                let mut keys = KeySet::default();
                for value in values {
                    if let Some(bucket) = self.sorted.get(value) {
                        keys.extend(bucket.iter().cloned());
                    }
                }
                keys
            }
            QueryNode::Has { .. } => {
                let mut keys = KeySet::default();
                for bucket in self.sorted.values() {
                    keys.extend(bucket.iter().cloned());
                }
                keys
            }
            QueryNode::Gt { value, .. } => {
                self.collect_range(Bound::Excluded(value), Bound::Unbounded)
            }
            QueryNode::Gte { value, .. } => {
                self.collect_range(Bound::Included(value), Bound::Unbounded)
            }
            QueryNode::Lt { value, .. } => {
                self.collect_range(Bound::Unbounded, Bound::Excluded(value))
            }
            QueryNode::Lte { value, .. } => {
                self.collect_range(Bound::Unbounded, Bound::Included(value))
            }
            QueryNode::Between { low, high, .. } => {
                if low > high {
                    KeySet::default()
                } else {
                    self.collect_range(Bound::Included(low), Bound::Included(high))
                }
            }
            _ => return None,
        })
    }
}

impl Index for NavigableIndex {
    fn attribute(&self) -> &str {
        self.attribute.name()
    }

    fn kind(&self) -> IndexKind {
        IndexKind::Navigable
    }

    fn retrieval_cost(&self) -> u32 {
        COST_NAVIGABLE
    }

    fn supports(&self, kind: QueryKind) -> bool {
        matches!(
            kind,
            QueryKind::Eq
                | QueryKind::In
                | QueryKind::Has
                | QueryKind::Gt
                | QueryKind::Gte
                | QueryKind::Lt
                | QueryKind::Lte
                | QueryKind::Between
        )
    }

    fn retrieve(&self, query: &QueryNode) -> Option<Box<dyn ResultSet>> {
        if query.attribute() != Some(self.attribute.name()) {
            return None;
        }
        let keys = self.range_for(query)?;
        Some(Box::new(SetResultSet::new(keys, COST_NAVIGABLE)))
    }

    fn add(&mut self, key: &str, record: &Value) {
        for value in self.attribute.values_of(record) {
            if self
                .sorted
                .entry(value)
                .or_default()
                .insert(key.to_string())
            {
                self.indexed_keys += 1;
            }
        }
    }

    fn remove(&mut self, key: &str, record: &Value) {
        for value in self.attribute.values_of(record) {
            if let Some(bucket) = self.sorted.get_mut(&value) {
                if bucket.remove(key) {
                    self.indexed_keys -= 1;
                }
                if bucket.is_empty() {
                    self.sorted.remove(&value);
                }
            }
        }
    }

    fn update(&mut self, key: &str, old: &Value, new: &Value) {
        if self.attribute.values_of(old) == self.attribute.values_of(new) {
            return;
        }
        self.remove(key, old);
        self.add(key, new);
    }

    fn clear(&mut self) {
        self.sorted.clear();
        self.indexed_keys = 0;
    }

    fn stats(&self) -> IndexStats {
        IndexStats {
            attribute: self.attribute.name().to_string(),
            kind: self.kind(),
            distinct_values: self.sorted.len(),
            indexed_keys: self.indexed_keys,
            pending: 0,
        }
    }

    fn sorted_keys(&self, attr: &str, descending: bool) -> Option<Vec<String>> {
        if attr != self.attribute.name() {
            return None;
        }
        let mut keys = Vec::with_capacity(self.indexed_keys);
        let push_bucket = |keys: &mut Vec<String>, bucket: &KeySet| {
            // Within one value bucket, key order breaks ties
            // deterministically.
            let mut bucket_keys: Vec<String> = bucket.iter().cloned().collect();
            bucket_keys.sort();
            keys.extend(bucket_keys);
        };
        if descending {
            for bucket in self.sorted.values().rev() {
                push_bucket(&mut keys, bucket);
            }
        } else {
            for bucket in self.sorted.values() {
                push_bucket(&mut keys, bucket);
            }
        }
        Some(keys)
    }
}

#[cfg(test)]
mod tests {
    use synq_core::value::object;

    use super::*;
    use crate::query::{between, contains, eq, gt, gte, lt, lte};

    fn aged(age: i64) -> Value {
        object([("age", Value::Int(age))])
    }

    fn build() -> NavigableIndex {
        let mut index = NavigableIndex::new(Attribute::field("age"));
        index.add("u25", &aged(25));
        index.add("u30", &aged(30));
        index.add("u35", &aged(35));
        index.add("u40", &aged(40));
        index
    }

    fn keys(rs: &dyn ResultSet) -> Vec<String> {
        rs.materialize().to_vec()
    }

    #[test]
    fn range_queries() {
        let index = build();
        assert_eq!(
            keys(index.retrieve(&gt("age", 30_i64)).unwrap().as_ref()),
            ["u35", "u40"]
        );
        assert_eq!(
            keys(index.retrieve(&gte("age", 30_i64)).unwrap().as_ref()),
            ["u30", "u35", "u40"]
        );
        assert_eq!(
            keys(index.retrieve(&lt("age", 30_i64)).unwrap().as_ref()),
            ["u25"]
        );
        assert_eq!(
            keys(index.retrieve(&lte("age", 30_i64)).unwrap().as_ref()),
            ["u25", "u30"]
        );
        assert_eq!(
            keys(index.retrieve(&between("age", 30_i64, 35_i64)).unwrap().as_ref()),
            ["u30", "u35"]
        );
    }

    #[test]
    fn eq_uses_exact_bucket() {
        let index = build();
        assert_eq!(
            keys(index.retrieve(&eq("age", 30_i64)).unwrap().as_ref()),
            ["u30"]
        );
        assert!(keys(index.retrieve(&eq("age", 31_i64)).unwrap().as_ref()).is_empty());
    }

    #[test]
    fn int_and_float_share_buckets() {
        let index = build();
        assert_eq!(
            keys(index.retrieve(&eq("age", 30.0)).unwrap().as_ref()),
            ["u30"]
        );
    }

    #[test]
    fn min_max_values() {
        let index = build();
        assert_eq!(index.min_value(), Some(&ScalarValue::from(25_i64)));
        assert_eq!(index.max_value(), Some(&ScalarValue::from(40_i64)));
    }

    #[test]
    fn sorted_keys_both_directions() {
        let index = build();
        assert_eq!(
            index.sorted_keys("age", false).unwrap(),
            ["u25", "u30", "u35", "u40"]
        );
        assert_eq!(
            index.sorted_keys("age", true).unwrap(),
            ["u40", "u35", "u30", "u25"]
        );
        assert!(index.sorted_keys("other", false).is_none());
    }

    #[test]
    fn remove_and_update_maintain_order() {
        let mut index = build();
        index.remove("u30", &aged(30));
        assert_eq!(index.sorted_keys("age", false).unwrap(), ["u25", "u35", "u40"]);

        index.update("u25", &aged(25), &aged(45));
        assert_eq!(index.sorted_keys("age", false).unwrap(), ["u35", "u40", "u25"]);
        assert_eq!(index.stats().indexed_keys, 3);
    }

    #[test]
    fn unsupported_kinds() {
        let index = build();
        assert!(!index.supports(QueryKind::Contains));
        assert!(index.retrieve(&contains("age", "x")).is_none());
    }
}
