//! Inverted index: `token -> set(key)` with a configurable tokenizer.

use std::collections::{HashMap, HashSet};

use ahash::RandomState;
use synq_core::value::Value;

use crate::attribute::{Attribute, ScalarValue};
use crate::query::QueryNode;
use crate::resultset::{ResultSet, SetResultSet};
use crate::text::TokenPipeline;

use super::{Index, IndexKind, IndexStats, QueryKind, COST_INVERTED};

type KeySet = HashSet<String, RandomState>;
type TokenSet = HashSet<String, RandomState>;

/// Inverted index over one string attribute.
///
/// Maintains `token -> posting set` and the reverse `key -> token set` so
/// removals never re-tokenize stale records. Answers `contains`,
/// `containsAll`, `containsAny`, and `has` at cost 50.
pub struct InvertedIndex {
    attribute: Attribute,
    pipeline: TokenPipeline,
    postings: HashMap<String, KeySet, RandomState>,
    tokens_by_key: HashMap<String, TokenSet, RandomState>,
}

impl InvertedIndex {
    /// Creates an inverted index with the default unique-token pipeline.
    #[must_use]
    pub fn new(attribute: Attribute) -> Self {
        Self::with_pipeline(attribute, TokenPipeline::unique())
    }

    /// Creates an inverted index with a custom pipeline.
    #[must_use]
    pub fn with_pipeline(attribute: Attribute, pipeline: TokenPipeline) -> Self {
        Self {
            attribute,
            pipeline,
            postings: HashMap::default(),
            tokens_by_key: HashMap::default(),
        }
    }

    /// The pipeline queries must agree with.
    #[must_use]
    pub fn pipeline(&self) -> &TokenPipeline {
        &self.pipeline
    }

    fn tokens_of(&self, record: &Value) -> TokenSet {
        self.attribute
            .values_of(record)
            .iter()
            .filter_map(ScalarValue::as_str)
            .flat_map(|s| self.pipeline.tokenize(s))
            .collect()
    }

    fn posting(&self, token: &str) -> Option<&KeySet> {
        self.postings.get(token)
    }

    /// Intersects the postings of all query tokens, smallest list first
    /// with early exit on empty.
    fn intersect_tokens(&self, tokens: &[String]) -> KeySet {
        let mut lists: Vec<&KeySet> = Vec::with_capacity(tokens.len());
        for token in tokens {
            match self.posting(token) {
                Some(list) => lists.push(list),
                // A token nobody has: the intersection is empty.
                None => return KeySet::default(),
            }
        }
        lists.sort_by_key(|list| list.len());
        let Some((smallest, rest)) = lists.split_first() else {
            return KeySet::default();
        };
        let mut result: KeySet = (*smallest).clone();
        for list in rest {
            result.retain(|key| list.contains(key));
            if result.is_empty() {
                break;
            }
        }
        result
    }

    /// Union of the postings of every token of one value.
    fn union_value_tokens(&self, value: &str) -> KeySet {
        let mut keys = KeySet::default();
        for token in self.pipeline.tokenize(value) {
            if let Some(list) = self.posting(&token) {
                keys.extend(list.iter().cloned());
            }
        }
        keys
    }
}

impl Index for InvertedIndex {
    fn attribute(&self) -> &str {
        self.attribute.name()
    }

    fn kind(&self) -> IndexKind {
        IndexKind::Inverted
    }

    fn retrieval_cost(&self) -> u32 {
        COST_INVERTED
    }

    fn supports(&self, kind: QueryKind) -> bool {
        matches!(
            kind,
            QueryKind::Contains | QueryKind::ContainsAll | QueryKind::ContainsAny | QueryKind::Has
        )
    }

    fn retrieve(&self, query: &QueryNode) -> Option<Box<dyn ResultSet>> {
        if query.attribute() != Some(self.attribute.name()) {
            return None;
        }
        let keys = match query {
            QueryNode::Contains { text, .. } => {
                let tokens = self.pipeline.tokenize(text);
                if tokens.is_empty() {
                    KeySet::default()
                } else {
                    self.intersect_tokens(&tokens)
                }
            }
            QueryNode::ContainsAll { values, .. } => {
                // Per value: union its tokens' postings; across values:
                // intersection.
                let mut result: Option<KeySet> = None;
                for value in values {
                    let keys = self.union_value_tokens(value);
                    result = Some(match result {
                        None => keys,
                        Some(mut acc) => {
                            acc.retain(|key| keys.contains(key));
                            acc
                        }
                    });
                    if result.as_ref().is_some_and(KeySet::is_empty) {
                        break;
                    }
                }
                result.unwrap_or_default()
            }
            QueryNode::ContainsAny { values, .. } => {
                let mut keys = KeySet::default();
                for value in values {
                    keys.extend(self.union_value_tokens(value));
                }
                keys
            }
            QueryNode::Has { .. } => self.tokens_by_key.keys().cloned().collect(),
            _ => return None,
        };
        Some(Box::new(SetResultSet::new(keys, COST_INVERTED)))
    }

    fn add(&mut self, key: &str, record: &Value) {
        let tokens = self.tokens_of(record);
        if tokens.is_empty() {
            return;
        }
        for token in &tokens {
            self.postings
                .entry(token.clone())
                .or_default()
                .insert(key.to_string());
        }
        self.tokens_by_key.insert(key.to_string(), tokens);
    }

    fn remove(&mut self, key: &str, _record: &Value) {
        // The reverse map knows which postings to touch; the record passed
        // in may be stale.
        let Some(tokens) = self.tokens_by_key.remove(key) else {
            return;
        };
        for token in tokens {
            if let Some(list) = self.postings.get_mut(&token) {
                list.remove(key);
                if list.is_empty() {
                    self.postings.remove(&token);
                }
            }
        }
    }

    fn update(&mut self, key: &str, _old: &Value, new: &Value) {
        let new_tokens = self.tokens_of(new);
        if self.tokens_by_key.get(key) == Some(&new_tokens) {
            return;
        }
        self.remove(key, new);
        if !new_tokens.is_empty() {
            for token in &new_tokens {
                self.postings
                    .entry(token.clone())
                    .or_default()
                    .insert(key.to_string());
            }
            self.tokens_by_key.insert(key.to_string(), new_tokens);
        }
    }

    fn clear(&mut self) {
        self.postings.clear();
        self.tokens_by_key.clear();
    }

    fn stats(&self) -> IndexStats {
        IndexStats {
            attribute: self.attribute.name().to_string(),
            kind: IndexKind::Inverted,
            distinct_values: self.postings.len(),
            indexed_keys: self.tokens_by_key.len(),
            pending: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use synq_core::value::object;

    use super::*;
    use crate::query::{contains, contains_all, contains_any, eq, has};

    fn doc(bio: &str) -> Value {
        object([("bio", Value::from(bio))])
    }

    fn build() -> InvertedIndex {
        let mut index = InvertedIndex::new(Attribute::field("bio"));
        index.add("d1", &doc("Rust systems programming in Oslo"));
        index.add("d2", &doc("Web programming with TypeScript"));
        index.add("d3", &doc("Rust web services"));
        index
    }

    fn keys(rs: &dyn ResultSet) -> Vec<String> {
        rs.materialize().to_vec()
    }

    #[test]
    fn contains_intersects_all_tokens() {
        let index = build();
        assert_eq!(
            keys(index.retrieve(&contains("bio", "rust web")).unwrap().as_ref()),
            ["d3"]
        );
        assert_eq!(
            keys(index.retrieve(&contains("bio", "RUST")).unwrap().as_ref()),
            ["d1", "d3"]
        );
    }

    #[test]
    fn contains_unknown_token_is_empty() {
        let index = build();
        assert!(keys(index.retrieve(&contains("bio", "rust haskell")).unwrap().as_ref()).is_empty());
        assert!(keys(index.retrieve(&contains("bio", "")).unwrap().as_ref()).is_empty());
    }

    #[test]
    fn contains_all_and_any() {
        let index = build();
        assert_eq!(
            keys(
                index
                    .retrieve(&contains_all("bio", ["programming", "rust"]))
                    .unwrap()
                    .as_ref()
            ),
            ["d1"]
        );
        let mut any = keys(
            index
                .retrieve(&contains_any("bio", ["oslo", "typescript"]))
                .unwrap()
                .as_ref(),
        );
        any.sort();
        assert_eq!(any, ["d1", "d2"]);
    }

    #[test]
    fn has_returns_all_indexed_keys() {
        let index = build();
        let mut all = keys(index.retrieve(&has("bio")).unwrap().as_ref());
        all.sort();
        assert_eq!(all, ["d1", "d2", "d3"]);
    }

    #[test]
    fn multi_value_attributes_index_each_string() {
        let mut index = InvertedIndex::new(Attribute::field_multi("tags"));
        index.add(
            "t1",
            &object([(
                "tags",
                Value::Array(vec![Value::from("distributed-systems"), Value::from("crdt")]),
            )]),
        );
        assert_eq!(
            keys(index.retrieve(&contains("tags", "crdt")).unwrap().as_ref()),
            ["t1"]
        );
        // The word-boundary tokenizer splits hyphenated values.
        assert_eq!(
            keys(index.retrieve(&contains("tags", "distributed")).unwrap().as_ref()),
            ["t1"]
        );
    }

    #[test]
    fn remove_uses_reverse_map() {
        let mut index = build();
        // Pass a stale record on purpose: removal must still be complete.
        index.remove("d1", &doc("totally unrelated text"));
        assert!(keys(index.retrieve(&contains("bio", "oslo")).unwrap().as_ref()).is_empty());
        assert_eq!(index.stats().indexed_keys, 2);
    }

    #[test]
    fn update_replaces_tokens() {
        let mut index = build();
        index.update("d2", &doc("ignored"), &doc("Gardening at home"));
        assert!(keys(index.retrieve(&contains("bio", "typescript")).unwrap().as_ref()).is_empty());
        assert_eq!(
            keys(index.retrieve(&contains("bio", "gardening")).unwrap().as_ref()),
            ["d2"]
        );
    }

    #[test]
    fn unsupported_queries_return_none() {
        let index = build();
        assert!(index.retrieve(&eq("bio", "x")).is_none());
        assert!(!index.supports(QueryKind::Eq));
    }
}
