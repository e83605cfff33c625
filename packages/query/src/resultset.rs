//! Lazy result-set algebra.
//!
//! A [`ResultSet`] is a lazy iterator of record keys annotated with a
//! retrieval cost (what producing it cost) and a merge cost (its estimated
//! size, which drives combinator ordering). Combinators -- intersection,
//! union, filter, sort, limit -- compose result sets without materializing
//! until a consumer iterates; every type caches its materialized array on
//! first full materialization.
//!
//! Result sets are not thread-safe: they live inside one query execution
//! under the map's single-mutator discipline.

use std::cell::OnceCell;
use std::collections::HashSet;

use ahash::RandomState;

use crate::attribute::ScalarValue;

/// A lazy, costed set of record keys.
pub trait ResultSet {
    /// Streams the keys. May be called multiple times; implementations
    /// serve cached data once materialized.
    fn keys(&self) -> Box<dyn Iterator<Item = String> + '_>;

    /// Membership test. May materialize lazy sources.
    fn contains(&self, key: &str) -> bool;

    /// Cost of having produced this result set.
    fn retrieval_cost(&self) -> u32;

    /// Estimated size, used to order merge work.
    fn merge_cost(&self) -> u64;

    /// Full key list, cached after the first call.
    fn materialize(&self) -> &[String];

    /// Exact size after materialization.
    fn len(&self) -> usize {
        self.materialize().len()
    }

    /// Whether the materialized set is empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

type KeySet = HashSet<String, RandomState>;

fn to_sorted_vec(set: &KeySet) -> Vec<String> {
    let mut keys: Vec<String> = set.iter().cloned().collect();
    keys.sort();
    keys
}

/// A result set backed by a concrete key set.
///
/// Keys iterate in sorted order so downstream consumers see deterministic
/// output for equal sets.
pub struct SetResultSet {
    keys: Vec<String>,
    set: KeySet,
    cost: u32,
}

impl SetResultSet {
    /// Wraps a key set with the producing index's retrieval cost.
    #[must_use]
    pub fn new(set: KeySet, cost: u32) -> Self {
        Self {
            keys: to_sorted_vec(&set),
            set,
            cost,
        }
    }

    /// Convenience constructor from any key iterator.
    pub fn from_keys<I, K>(keys: I, cost: u32) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        let set: KeySet = keys.into_iter().map(Into::into).collect();
        Self::new(set, cost)
    }

    /// The empty set at the given cost.
    #[must_use]
    pub fn empty(cost: u32) -> Self {
        Self::new(KeySet::default(), cost)
    }
}

impl ResultSet for SetResultSet {
    fn keys(&self) -> Box<dyn Iterator<Item = String> + '_> {
        Box::new(self.keys.iter().cloned())
    }

    fn contains(&self, key: &str) -> bool {
        self.set.contains(key)
    }

    fn retrieval_cost(&self) -> u32 {
        self.cost
    }

    fn merge_cost(&self) -> u64 {
        self.set.len() as u64
    }

    fn materialize(&self) -> &[String] {
        &self.keys
    }
}

type KeyGenerator = Box<dyn Fn() -> Box<dyn Iterator<Item = String>>>;

/// A result set produced by a generator function, with an estimated size.
///
/// The generator runs once per un-cached iteration; the first full
/// materialization caches both the array and a membership set.
pub struct LazyResultSet {
    generator: KeyGenerator,
    estimated_size: u64,
    cost: u32,
    cache: OnceCell<Vec<String>>,
    cache_set: OnceCell<KeySet>,
}

impl LazyResultSet {
    /// Wraps a generator with its estimated size and retrieval cost.
    #[must_use]
    pub fn new(generator: KeyGenerator, estimated_size: u64, cost: u32) -> Self {
        Self {
            generator,
            estimated_size,
            cost,
            cache: OnceCell::new(),
            cache_set: OnceCell::new(),
        }
    }

    fn cached_set(&self) -> &KeySet {
        self.cache_set
            .get_or_init(|| self.materialize().iter().cloned().collect())
    }
}

impl ResultSet for LazyResultSet {
    fn keys(&self) -> Box<dyn Iterator<Item = String> + '_> {
        match self.cache.get() {
            Some(cached) => Box::new(cached.iter().cloned()),
            None => (self.generator)(),
        }
    }

    fn contains(&self, key: &str) -> bool {
        self.cached_set().contains(key)
    }

    fn retrieval_cost(&self) -> u32 {
        self.cost
    }

    fn merge_cost(&self) -> u64 {
        match self.cache.get() {
            Some(cached) => cached.len() as u64,
            None => self.estimated_size,
        }
    }

    fn materialize(&self) -> &[String] {
        self.cache.get_or_init(|| (self.generator)().collect())
    }
}

/// Intersection of several result sets.
///
/// Iterates the child with the smallest merge cost and keeps keys present
/// in every other child, so the cheapest set drives the work.
pub struct IntersectionResultSet {
    children: Vec<Box<dyn ResultSet>>,
    cache: OnceCell<Vec<String>>,
}

impl IntersectionResultSet {
    /// Intersects the given children (at least one).
    #[must_use]
    pub fn new(children: Vec<Box<dyn ResultSet>>) -> Self {
        Self {
            children,
            cache: OnceCell::new(),
        }
    }

    fn driver_index(&self) -> usize {
        let mut best = 0;
        for (i, child) in self.children.iter().enumerate() {
            if child.merge_cost() < self.children[best].merge_cost() {
                best = i;
            }
        }
        best
    }
}

impl ResultSet for IntersectionResultSet {
    fn keys(&self) -> Box<dyn Iterator<Item = String> + '_> {
        if let Some(cached) = self.cache.get() {
            return Box::new(cached.iter().cloned());
        }
        if self.children.is_empty() {
            return Box::new(std::iter::empty());
        }
        let driver = self.driver_index();
        let others: Vec<&Box<dyn ResultSet>> = self
            .children
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != driver)
            .map(|(_, child)| child)
            .collect();
        Box::new(
            self.children[driver]
                .keys()
                .filter(move |key| others.iter().all(|other| other.contains(key))),
        )
    }

    fn contains(&self, key: &str) -> bool {
        !self.children.is_empty() && self.children.iter().all(|child| child.contains(key))
    }

    fn retrieval_cost(&self) -> u32 {
        self.children
            .iter()
            .map(|child| child.retrieval_cost())
            .min()
            .unwrap_or(0)
    }

    fn merge_cost(&self) -> u64 {
        self.children
            .iter()
            .map(|child| child.merge_cost())
            .min()
            .unwrap_or(0)
    }

    fn materialize(&self) -> &[String] {
        self.cache.get_or_init(|| self.keys().collect())
    }
}

/// Union of several result sets, deduplicated while streaming.
pub struct UnionResultSet {
    children: Vec<Box<dyn ResultSet>>,
    cache: OnceCell<Vec<String>>,
}

impl UnionResultSet {
    /// Unions the given children.
    #[must_use]
    pub fn new(children: Vec<Box<dyn ResultSet>>) -> Self {
        Self {
            children,
            cache: OnceCell::new(),
        }
    }
}

impl ResultSet for UnionResultSet {
    fn keys(&self) -> Box<dyn Iterator<Item = String> + '_> {
        if let Some(cached) = self.cache.get() {
            return Box::new(cached.iter().cloned());
        }
        let mut seen: KeySet = KeySet::default();
        Box::new(
            self.children
                .iter()
                .flat_map(|child| child.keys())
                .filter(move |key| seen.insert(key.clone())),
        )
    }

    fn contains(&self, key: &str) -> bool {
        self.children.iter().any(|child| child.contains(key))
    }

    fn retrieval_cost(&self) -> u32 {
        self.children
            .iter()
            .fold(0_u32, |acc, child| acc.saturating_add(child.retrieval_cost()))
    }

    fn merge_cost(&self) -> u64 {
        self.children
            .iter()
            .fold(0_u64, |acc, child| acc.saturating_add(child.merge_cost()))
    }

    fn materialize(&self) -> &[String] {
        self.cache.get_or_init(|| self.keys().collect())
    }
}

type KeyPredicate = Box<dyn Fn(&str) -> bool>;

/// A source filtered by a predicate over the materialized record.
///
/// Filtering costs a flat 10 on retrieval and is assumed to halve the set.
pub struct FilterResultSet {
    source: Box<dyn ResultSet>,
    predicate: KeyPredicate,
    cache: OnceCell<Vec<String>>,
}

impl FilterResultSet {
    /// Filters `source` by `predicate` (typically "fetch record, evaluate
    /// the residual query").
    #[must_use]
    pub fn new(source: Box<dyn ResultSet>, predicate: KeyPredicate) -> Self {
        Self {
            source,
            predicate,
            cache: OnceCell::new(),
        }
    }
}

impl ResultSet for FilterResultSet {
    fn keys(&self) -> Box<dyn Iterator<Item = String> + '_> {
        if let Some(cached) = self.cache.get() {
            return Box::new(cached.iter().cloned());
        }
        Box::new(self.source.keys().filter(|key| (self.predicate)(key)))
    }

    fn contains(&self, key: &str) -> bool {
        self.source.contains(key) && (self.predicate)(key)
    }

    fn retrieval_cost(&self) -> u32 {
        self.source.retrieval_cost().saturating_add(10)
    }

    fn merge_cost(&self) -> u64 {
        (self.source.merge_cost() / 2).max(1)
    }

    fn materialize(&self) -> &[String] {
        self.cache.get_or_init(|| self.keys().collect())
    }
}

type SortKeyFn = Box<dyn Fn(&str) -> Option<ScalarValue>>;

/// A source ordered by a sort field.
///
/// When the source is already in the requested order (a navigable index on
/// the sort field), the pre-sorted fast path streams it through for +1
/// retrieval cost; otherwise the set is materialized and sorted in memory
/// for +50. Keys whose sort field is undefined go last ascending and first
/// descending.
pub struct SortResultSet {
    source: Box<dyn ResultSet>,
    sort_key: SortKeyFn,
    descending: bool,
    pre_sorted: bool,
    cache: OnceCell<Vec<String>>,
}

impl SortResultSet {
    /// Sorts `source` by `sort_key`.
    #[must_use]
    pub fn new(
        source: Box<dyn ResultSet>,
        sort_key: SortKeyFn,
        descending: bool,
        pre_sorted: bool,
    ) -> Self {
        Self {
            source,
            sort_key,
            descending,
            pre_sorted,
            cache: OnceCell::new(),
        }
    }
}

impl ResultSet for SortResultSet {
    fn keys(&self) -> Box<dyn Iterator<Item = String> + '_> {
        if self.pre_sorted {
            return self.source.keys();
        }
        Box::new(self.materialize().iter().cloned())
    }

    fn contains(&self, key: &str) -> bool {
        self.source.contains(key)
    }

    fn retrieval_cost(&self) -> u32 {
        let surcharge = if self.pre_sorted { 1 } else { 50 };
        self.source.retrieval_cost().saturating_add(surcharge)
    }

    fn merge_cost(&self) -> u64 {
        self.source.merge_cost()
    }

    fn materialize(&self) -> &[String] {
        self.cache.get_or_init(|| {
            let mut keys: Vec<String> = self.source.keys().collect();
            if self.pre_sorted {
                return keys;
            }
            let descending = self.descending;
            keys.sort_by(|a, b| {
                let va = (self.sort_key)(a);
                let vb = (self.sort_key)(b);
                let ordering = match (va, vb) {
                    // Undefined sorts last ascending; flipping below puts it
                    // first descending.
                    (None, None) => std::cmp::Ordering::Equal,
                    (None, Some(_)) => std::cmp::Ordering::Greater,
                    (Some(_), None) => std::cmp::Ordering::Less,
                    (Some(va), Some(vb)) => va.cmp(&vb),
                };
                let ordering = if descending { ordering.reverse() } else { ordering };
                ordering.then_with(|| a.cmp(b))
            });
            keys
        })
    }
}

/// The window `[offset, offset + limit)` of a source, early-terminating.
pub struct LimitResultSet {
    source: Box<dyn ResultSet>,
    offset: usize,
    limit: usize,
    cache: OnceCell<Vec<String>>,
}

impl LimitResultSet {
    /// Takes `limit` keys after skipping `offset`.
    #[must_use]
    pub fn new(source: Box<dyn ResultSet>, offset: usize, limit: usize) -> Self {
        Self {
            source,
            offset,
            limit,
            cache: OnceCell::new(),
        }
    }
}

impl ResultSet for LimitResultSet {
    fn keys(&self) -> Box<dyn Iterator<Item = String> + '_> {
        if let Some(cached) = self.cache.get() {
            return Box::new(cached.iter().cloned());
        }
        Box::new(self.source.keys().skip(self.offset).take(self.limit))
    }

    fn contains(&self, key: &str) -> bool {
        self.materialize().iter().any(|k| k == key)
    }

    fn retrieval_cost(&self) -> u32 {
        self.source.retrieval_cost()
    }

    fn merge_cost(&self) -> u64 {
        self.source
            .merge_cost()
            .min((self.offset + self.limit) as u64)
    }

    fn materialize(&self) -> &[String] {
        self.cache.get_or_init(|| self.keys().collect())
    }
}
