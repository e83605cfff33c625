//! The index family.
//!
//! Every index implements [`Index`]: a named attribute projection, a
//! retrieval cost, a set of supported query kinds, key-level retrieval into
//! a [`ResultSet`], and mutation callbacks driven by the owning map. The
//! [`IndexRegistry`] owns the indexes and fans mutations out in
//! registration order.
//!
//! The full-scan fallback is not an index instance: the planner emits a
//! dedicated full-scan step when no index qualifies, and refuses to do so
//! for queries without a predicate.

pub mod compound;
pub mod hash;
pub mod inverted;
pub mod lazy;
pub mod navigable;
pub mod quantized;
pub mod standing;

use synq_core::value::Value;

use crate::attribute::ScalarValue;
use crate::query::QueryNode;
use crate::resultset::ResultSet;

/// Retrieval cost of a standing-query lookup.
pub const COST_STANDING: u32 = 10;
/// Retrieval cost of a compound-index lookup.
pub const COST_COMPOUND: u32 = 20;
/// Retrieval cost of a hash-index lookup.
pub const COST_HASH: u32 = 30;
/// Retrieval cost of a navigable (sorted) index scan.
pub const COST_NAVIGABLE: u32 = 40;
/// Retrieval cost of an inverted-index lookup.
pub const COST_INVERTED: u32 = 50;
/// Retrieval cost of the full-scan fallback.
pub const COST_FALLBACK: u32 = u32::MAX;

/// Index families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexKind {
    /// Exact-match hash index.
    Hash,
    /// Sorted index answering ranges.
    Navigable,
    /// Sorted index over quantized buckets.
    QuantizedNavigable,
    /// Token index answering text containment.
    Inverted,
    /// Multi-attribute composite-key index.
    Compound,
    /// Pre-computed result set for one query.
    Standing,
}

/// The query shapes an index may support.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryKind {
    /// Equality.
    Eq,
    /// Inequality.
    Neq,
    /// Strict greater-than.
    Gt,
    /// Greater-or-equal.
    Gte,
    /// Strict less-than.
    Lt,
    /// Less-or-equal.
    Lte,
    /// Inclusive range.
    Between,
    /// Membership in a literal list.
    In,
    /// Attribute presence.
    Has,
    /// SQL LIKE.
    Like,
    /// Regular expression.
    Regex,
    /// Tokenized text containment.
    Contains,
    /// All listed values present.
    ContainsAll,
    /// Any listed value present.
    ContainsAny,
    /// Ordered-prefix compound equality.
    Compound,
}

impl QueryKind {
    /// The kind of a simple query node; `None` for logical nodes.
    #[must_use]
    pub fn of(node: &QueryNode) -> Option<QueryKind> {
        Some(match node {
            QueryNode::Eq { .. } => QueryKind::Eq,
            QueryNode::Neq { .. } => QueryKind::Neq,
            QueryNode::Gt { .. } => QueryKind::Gt,
            QueryNode::Gte { .. } => QueryKind::Gte,
            QueryNode::Lt { .. } => QueryKind::Lt,
            QueryNode::Lte { .. } => QueryKind::Lte,
            QueryNode::Between { .. } => QueryKind::Between,
            QueryNode::In { .. } => QueryKind::In,
            QueryNode::Has { .. } => QueryKind::Has,
            QueryNode::Like { .. } => QueryKind::Like,
            QueryNode::Regex { .. } => QueryKind::Regex,
            QueryNode::Contains { .. } => QueryKind::Contains,
            QueryNode::ContainsAll { .. } => QueryKind::ContainsAll,
            QueryNode::ContainsAny { .. } => QueryKind::ContainsAny,
            QueryNode::And { .. } | QueryNode::Or { .. } | QueryNode::Not { .. } => return None,
        })
    }
}

/// Point-in-time statistics for one index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexStats {
    /// Attribute (or joined attribute list for compound indexes).
    pub attribute: String,
    /// Index family.
    pub kind: IndexKind,
    /// Number of distinct indexed values / tokens / composite keys.
    pub distinct_values: usize,
    /// Number of indexed record keys.
    pub indexed_keys: usize,
    /// Buffered mutations awaiting lazy materialization.
    pub pending: usize,
}

/// Common contract of every index.
pub trait Index {
    /// Attribute this index covers (compound indexes join their attribute
    /// names with `+`).
    fn attribute(&self) -> &str;

    /// Index family.
    fn kind(&self) -> IndexKind;

    /// Cost of a retrieval through this index.
    fn retrieval_cost(&self) -> u32;

    /// Whether this index can answer the given query kind.
    fn supports(&self, kind: QueryKind) -> bool;

    /// Answers a simple query node, or `None` when unsupported or
    /// addressed to a different attribute.
    fn retrieve(&self, query: &QueryNode) -> Option<Box<dyn ResultSet>>;

    /// A record gained this key.
    fn add(&mut self, key: &str, record: &Value);

    /// A record lost this key.
    fn remove(&mut self, key: &str, record: &Value);

    /// A record changed in place.
    fn update(&mut self, key: &str, old: &Value, new: &Value) {
        self.remove(key, old);
        self.add(key, new);
    }

    /// Drops all indexed data.
    fn clear(&mut self);

    /// Current statistics.
    fn stats(&self) -> IndexStats;

    /// Keys in index order for the given attribute, for the sort fast path.
    /// `None` when this index cannot provide an ordering.
    fn sorted_keys(&self, attr: &str, descending: bool) -> Option<Vec<String>> {
        let _ = (attr, descending);
        None
    }

    /// Ordered attribute list, for compound indexes only.
    fn compound_attrs(&self) -> Option<&[String]> {
        None
    }

    /// Ordered-prefix compound lookup, for compound indexes only.
    fn retrieve_compound(&self, values: &[ScalarValue]) -> Option<Box<dyn ResultSet>> {
        let _ = values;
        None
    }

    /// Buffered mutations awaiting materialization (lazy wrapper only).
    fn pending_count(&self) -> usize {
        0
    }

    /// Whether this index defers building (lazy wrapper only).
    fn is_lazy(&self) -> bool {
        false
    }

    /// Whether the underlying index has been built.
    fn is_built(&self) -> bool {
        true
    }

    /// Forces a lazy index to build now. No-op for eager indexes.
    fn materialize_now(&mut self) {}
}

/// A registered index with its stable handle.
pub struct RegisteredIndex {
    /// Stable handle used by plans and for removal.
    pub id: u64,
    /// The index itself.
    pub index: Box<dyn Index>,
}

/// Owns the indexes of one map and fans out mutations in registration
/// order.
#[derive(Default)]
pub struct IndexRegistry {
    next_id: u64,
    entries: Vec<RegisteredIndex>,
}

impl IndexRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an index and returns its handle.
    pub fn add(&mut self, index: Box<dyn Index>) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.entries.push(RegisteredIndex { id, index });
        id
    }

    /// Removes an index by handle. Returns whether it existed.
    pub fn remove(&mut self, id: u64) -> bool {
        let before = self.entries.len();
        self.entries.retain(|entry| entry.id != id);
        self.entries.len() != before
    }

    /// Looks up an index by handle.
    #[must_use]
    pub fn get(&self, id: u64) -> Option<&RegisteredIndex> {
        self.entries.iter().find(|entry| entry.id == id)
    }

    /// Mutable lookup by handle.
    pub fn get_mut(&mut self, id: u64) -> Option<&mut RegisteredIndex> {
        self.entries.iter_mut().find(|entry| entry.id == id)
    }

    /// All registered indexes in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &RegisteredIndex> {
        self.entries.iter()
    }

    /// Mutable iteration in registration order.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut RegisteredIndex> {
        self.entries.iter_mut()
    }

    /// Number of registered indexes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no index is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Indexes on `attr` supporting `kind`, cheapest first.
    #[must_use]
    pub fn candidates(&self, attr: &str, kind: QueryKind) -> Vec<&RegisteredIndex> {
        let mut matching: Vec<&RegisteredIndex> = self
            .entries
            .iter()
            .filter(|entry| entry.index.attribute() == attr && entry.index.supports(kind))
            .collect();
        matching.sort_by_key(|entry| entry.index.retrieval_cost());
        matching
    }

    /// Fans an insertion out to every index, in registration order.
    pub fn on_record_added(&mut self, key: &str, record: &Value) {
        for entry in &mut self.entries {
            entry.index.add(key, record);
        }
    }

    /// Fans an update out to every index, in registration order.
    pub fn on_record_updated(&mut self, key: &str, old: &Value, new: &Value) {
        for entry in &mut self.entries {
            entry.index.update(key, old, new);
        }
    }

    /// Fans a removal out to every index, in registration order.
    pub fn on_record_removed(&mut self, key: &str, record: &Value) {
        for entry in &mut self.entries {
            entry.index.remove(key, record);
        }
    }

    /// Clears every index.
    pub fn clear_all(&mut self) {
        for entry in &mut self.entries {
            entry.index.clear();
        }
    }

    /// Statistics for every index, in registration order.
    #[must_use]
    pub fn stats(&self) -> Vec<IndexStats> {
        self.entries.iter().map(|entry| entry.index.stats()).collect()
    }
}
