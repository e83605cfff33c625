//! Compound index: one sorted map over an encoded composite key.

use std::collections::{BTreeMap, HashSet};

use ahash::RandomState;
use synq_core::value::Value;

use crate::attribute::{Attribute, ScalarValue};
use crate::query::QueryNode;
use crate::resultset::{ResultSet, SetResultSet};

use super::{Index, IndexKind, IndexStats, QueryKind, COST_COMPOUND};

type KeySet = HashSet<String, RandomState>;

/// Separator between encoded components.
pub const SEPARATOR: char = '|';

/// Compound index over an ordered list of two or more attributes.
///
/// Records index under `enc(v1)|enc(v2)|...`; a record missing any
/// component is not indexed at all. Lookups cover the full key or any
/// ordered prefix (via a range scan), at cost 20.
pub struct CompoundIndex {
    attributes: Vec<Attribute>,
    attr_names: Vec<String>,
    display_name: String,
    entries: BTreeMap<String, KeySet>,
    indexed_keys: usize,
}

/// Encodes one component with a type tag, escaping the separator so
/// composite keys parse unambiguously.
fn encode_component(value: &ScalarValue) -> String {
    let raw = match value {
        ScalarValue::Null => return "0:".to_string(),
        ScalarValue::Bool(b) => return format!("b:{b}"),
        ScalarValue::Num(_) => format!("n:{value}"),
        ScalarValue::Str(s) => format!("s:{s}"),
    };
    raw.replace('\\', "\\\\").replace(SEPARATOR, "\\|")
}

impl CompoundIndex {
    /// Creates a compound index over `attributes` (two or more).
    ///
    /// # Panics
    ///
    /// Panics when fewer than two attributes are given; the façade
    /// validates arity before construction.
    #[must_use]
    pub fn new(attributes: Vec<Attribute>) -> Self {
        assert!(
            attributes.len() >= 2,
            "compound index requires at least two attributes"
        );
        let attr_names: Vec<String> =
            attributes.iter().map(|a| a.name().to_string()).collect();
        let display_name = attr_names.join("+");
        Self {
            attributes,
            attr_names,
            display_name,
            entries: BTreeMap::new(),
            indexed_keys: 0,
        }
    }

    /// The ordered attribute names of this index.
    #[must_use]
    pub fn attribute_names(&self) -> &[String] {
        &self.attr_names
    }

    /// Whether this index answers an equality query over exactly these
    /// attributes in order: a non-empty ordered prefix of the index's list.
    #[must_use]
    pub fn can_answer(&self, attrs: &[&str]) -> bool {
        !attrs.is_empty()
            && attrs.len() <= self.attr_names.len()
            && attrs
                .iter()
                .zip(self.attr_names.iter())
                .all(|(query_attr, index_attr)| *query_attr == index_attr)
    }

    fn composite_key(&self, record: &Value) -> Option<String> {
        let mut parts = Vec::with_capacity(self.attributes.len());
        for attribute in &self.attributes {
            // Any undefined component leaves the record unindexed.
            let value = attribute.value_of(record)?;
            parts.push(encode_component(&value));
        }
        Some(parts.join(&SEPARATOR.to_string()))
    }

    fn encode_values(values: &[ScalarValue]) -> String {
        values
            .iter()
            .map(encode_component)
            .collect::<Vec<_>>()
            .join(&SEPARATOR.to_string())
    }
}

impl Index for CompoundIndex {
    fn attribute(&self) -> &str {
        &self.display_name
    }

    fn kind(&self) -> IndexKind {
        IndexKind::Compound
    }

    fn retrieval_cost(&self) -> u32 {
        COST_COMPOUND
    }

    fn supports(&self, kind: QueryKind) -> bool {
        kind == QueryKind::Compound
    }

    fn retrieve(&self, _query: &QueryNode) -> Option<Box<dyn ResultSet>> {
        // Compound lookups go through retrieve_compound; no simple node
        // addresses the joined attribute.
        None
    }

    fn add(&mut self, key: &str, record: &Value) {
        if let Some(composite) = self.composite_key(record) {
            if self
                .entries
                .entry(composite)
                .or_default()
                .insert(key.to_string())
            {
                self.indexed_keys += 1;
            }
        }
    }

    fn remove(&mut self, key: &str, record: &Value) {
        if let Some(composite) = self.composite_key(record) {
            if let Some(bucket) = self.entries.get_mut(&composite) {
                if bucket.remove(key) {
                    self.indexed_keys -= 1;
                }
                if bucket.is_empty() {
                    self.entries.remove(&composite);
                }
            }
        }
    }

    fn clear(&mut self) {
        self.entries.clear();
        self.indexed_keys = 0;
    }

    fn stats(&self) -> IndexStats {
        IndexStats {
            attribute: self.display_name.clone(),
            kind: IndexKind::Compound,
            distinct_values: self.entries.len(),
            indexed_keys: self.indexed_keys,
            pending: 0,
        }
    }

    fn compound_attrs(&self) -> Option<&[String]> {
        Some(&self.attr_names)
    }

    fn retrieve_compound(&self, values: &[ScalarValue]) -> Option<Box<dyn ResultSet>> {
        if values.is_empty() || values.len() > self.attributes.len() {
            return None;
        }
        let encoded = Self::encode_values(values);
        let mut keys = KeySet::default();
        if values.len() == self.attributes.len() {
            if let Some(bucket) = self.entries.get(&encoded) {
                keys.extend(bucket.iter().cloned());
            }
        } else {
            // Prefix lookup: the trailing separator keeps "a" from matching
            // "ab"-prefixed composites.
            let prefix = format!("{encoded}{SEPARATOR}");
            for (_, bucket) in self
                .entries
                .range(prefix.clone()..)
                .take_while(|(composite, _)| composite.starts_with(&prefix))
            {
                keys.extend(bucket.iter().cloned());
            }
        }
        Some(Box::new(SetResultSet::new(keys, COST_COMPOUND)))
    }
}

#[cfg(test)]
mod tests {
    use synq_core::value::object;

    use super::*;

    fn user(status: &str, role: &str, age: i64) -> Value {
        object([
            ("status", Value::from(status)),
            ("role", Value::from(role)),
            ("age", Value::Int(age)),
        ])
    }

    fn build() -> CompoundIndex {
        let mut index = CompoundIndex::new(vec![
            Attribute::field("status"),
            Attribute::field("role"),
        ]);
        index.add("u1", &user("active", "admin", 30));
        index.add("u2", &user("active", "viewer", 25));
        index.add("u3", &user("archived", "admin", 40));
        index
    }

    fn keys(rs: &dyn ResultSet) -> Vec<String> {
        rs.materialize().to_vec()
    }

    #[test]
    fn full_key_lookup() {
        let index = build();
        let rs = index
            .retrieve_compound(&[ScalarValue::from("active"), ScalarValue::from("admin")])
            .unwrap();
        assert_eq!(keys(rs.as_ref()), ["u1"]);
        assert_eq!(rs.retrieval_cost(), COST_COMPOUND);
    }

    #[test]
    fn prefix_lookup_scans_range() {
        let index = build();
        let rs = index
            .retrieve_compound(&[ScalarValue::from("active")])
            .unwrap();
        let mut found = keys(rs.as_ref());
        found.sort();
        assert_eq!(found, ["u1", "u2"]);
    }

    #[test]
    fn missing_component_skips_record() {
        let mut index = build();
        index.add("partial", &object([("status", Value::from("active"))]));
        let rs = index
            .retrieve_compound(&[ScalarValue::from("active")])
            .unwrap();
        assert!(!keys(rs.as_ref()).contains(&"partial".to_string()));
        assert_eq!(index.stats().indexed_keys, 3);
    }

    #[test]
    fn can_answer_requires_ordered_prefix() {
        let index = build();
        assert!(index.can_answer(&["status"]));
        assert!(index.can_answer(&["status", "role"]));
        assert!(!index.can_answer(&["role"]));
        assert!(!index.can_answer(&["role", "status"]));
        assert!(!index.can_answer(&["status", "role", "age"]));
        assert!(!index.can_answer(&[]));
    }

    #[test]
    fn separator_in_values_is_escaped() {
        let mut index = CompoundIndex::new(vec![
            Attribute::field("a"),
            Attribute::field("b"),
        ]);
        // Without escaping, ("x|y", "z") and ("x", "y|z") would collide.
        index.add("k1", &object([("a", Value::from("x|y")), ("b", Value::from("z"))]));
        index.add("k2", &object([("a", Value::from("x")), ("b", Value::from("y|z"))]));

        let rs = index
            .retrieve_compound(&[ScalarValue::from("x|y"), ScalarValue::from("z")])
            .unwrap();
        assert_eq!(keys(rs.as_ref()), ["k1"]);
        let rs = index
            .retrieve_compound(&[ScalarValue::from("x"), ScalarValue::from("y|z")])
            .unwrap();
        assert_eq!(keys(rs.as_ref()), ["k2"]);
    }

    #[test]
    fn update_and_remove_maintain_buckets() {
        let mut index = build();
        let old = user("active", "admin", 30);
        let new = user("archived", "admin", 30);
        index.update("u1", &old, &new);

        let rs = index
            .retrieve_compound(&[ScalarValue::from("archived"), ScalarValue::from("admin")])
            .unwrap();
        let mut found = keys(rs.as_ref());
        found.sort();
        assert_eq!(found, ["u1", "u3"]);

        index.remove("u3", &user("archived", "admin", 40));
        assert_eq!(index.stats().indexed_keys, 2);
    }

    #[test]
    fn typed_components_do_not_collide() {
        let mut index = CompoundIndex::new(vec![
            Attribute::field("a"),
            Attribute::field("b"),
        ]);
        index.add("s", &object([("a", Value::from("1")), ("b", Value::from("x"))]));
        index.add("n", &object([("a", Value::Int(1)), ("b", Value::from("x"))]));

        let rs = index
            .retrieve_compound(&[ScalarValue::from("1"), ScalarValue::from("x")])
            .unwrap();
        assert_eq!(keys(rs.as_ref()), ["s"]);
        let rs = index
            .retrieve_compound(&[ScalarValue::from(1_i64), ScalarValue::from("x")])
            .unwrap();
        assert_eq!(keys(rs.as_ref()), ["n"]);
    }
}
