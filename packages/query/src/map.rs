//! The indexed map façade.
//!
//! [`IndexedMap`] owns an [`LWWMap`] and composes every query-side
//! subsystem around it: the index registry, the planner, the live-query
//! manager, the BM25 index with live search, the adaptive tracker, the
//! optional event journal, and the debug recorders. External mutations
//! enter here and fan out in a fixed order: store (with Merkle update) →
//! journal → indexes in registration order → live-query deltas in
//! subscription order → live-search deltas.
//!
//! Composition, not inheritance: the façade forwards map operations and
//! attaches the side effects, so the CRDT core stays oblivious to
//! indexing.

use std::sync::Arc;

use parking_lot::RwLock;
use synq_core::hlc::HLC;
use synq_core::journal::{
    EventJournal, JournalConfig, JournalEventDraft, JournalEventType,
};
use synq_core::lww_map::{LWWMap, MapError, MergeOutcome};
use synq_core::records::LWWRecord;
use synq_core::resolver::{Principal, ResolverRegistry};
use synq_core::value::Value;
use synq_core::Timestamp;

use crate::adaptive::{
    advise, AdvisorConfig, AutoIndexConfig, AutoIndexManager, IndexSuggestion, PatternTracker,
    PatternTrackerConfig,
};
use crate::attribute::{Attribute, AttributeResolver, ScalarValue};
use crate::debug::{CrdtRecorder, ScoreBreakdown, SearchCapture, SearchRecorder};
use crate::fts::{Bm25Config, Bm25Index, FtsDelta, LiveFtsIndex, LiveFtsOptions, SearchHit, SearchOptions};
use crate::index::compound::CompoundIndex;
use crate::index::hash::HashIndex;
use crate::index::inverted::InvertedIndex;
use crate::index::lazy::LazyIndex;
use crate::index::navigable::NavigableIndex;
use crate::index::quantized::{QuantizedIndex, Quantizer};
use crate::index::{
    Index, IndexKind, IndexRegistry, IndexStats, QueryKind, COST_FALLBACK, COST_STANDING,
};
use crate::live::{LiveCallback, LiveQueryManager, LiveSubscription};
use crate::planner::{plan, PlanStep, QueryPlan};
use crate::query::{InvalidQuery, QueryNode};
use crate::resultset::{
    FilterResultSet, IntersectionResultSet, LazyResultSet, LimitResultSet, ResultSet,
    SetResultSet, SortResultSet, UnionResultSet,
};

/// Sort direction for query options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    /// Ascending; undefined sort values last.
    Asc,
    /// Descending; undefined sort values first.
    Desc,
}

/// Post-processing options for a query.
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    /// Order results by this attribute.
    pub sort: Option<(String, SortDirection)>,
    /// Skip this many results.
    pub offset: usize,
    /// Cap the result count.
    pub limit: Option<usize>,
}

/// How aggressively the map indexes by itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DefaultIndexing {
    /// No advisor, no auto-indexing.
    #[default]
    None,
    /// Advisor only, conservative thresholds.
    Minimal,
    /// Advisor plus auto-indexing with moderate thresholds.
    Balanced,
    /// Eager auto-indexing.
    Aggressive,
}

/// Construction options.
#[derive(Default)]
pub struct IndexedMapOptions {
    /// Build new indexes lazily (buffer until first retrieval).
    pub lazy_index_building: bool,
    /// Progress callback for lazy materialization.
    pub on_index_building: Option<Arc<dyn Fn(usize, usize) + Send + Sync>>,
    /// Adaptive-indexing posture.
    pub default_indexing: DefaultIndexing,
    /// Explicit adaptive configuration; overrides the posture presets.
    pub adaptive: Option<(AdvisorConfig, AutoIndexConfig)>,
    /// Attach an event journal.
    pub journal: Option<JournalConfig>,
}

impl DefaultIndexing {
    fn presets(self) -> (AdvisorConfig, AutoIndexConfig) {
        match self {
            DefaultIndexing::None => (
                AdvisorConfig { enabled: false, ..AdvisorConfig::default() },
                AutoIndexConfig { enabled: false, ..AutoIndexConfig::default() },
            ),
            DefaultIndexing::Minimal => (
                AdvisorConfig {
                    enabled: true,
                    min_query_count: 10,
                    min_average_cost: 100.0,
                },
                AutoIndexConfig { enabled: false, ..AutoIndexConfig::default() },
            ),
            DefaultIndexing::Balanced => (
                AdvisorConfig::default(),
                AutoIndexConfig {
                    enabled: true,
                    threshold: 10,
                    max_auto_indexes: 5,
                },
            ),
            DefaultIndexing::Aggressive => (
                AdvisorConfig {
                    enabled: true,
                    min_query_count: 2,
                    min_average_cost: 20.0,
                },
                AutoIndexConfig {
                    enabled: true,
                    threshold: 3,
                    max_auto_indexes: 20,
                },
            ),
        }
    }
}

/// One live-search delta delivered to a search subscriber.
pub type SearchCallback = Box<dyn Fn(&FtsDelta)>;

struct SearchSubscriptionEntry {
    id: u64,
    index: LiveFtsIndex,
    callback: SearchCallback,
}

/// A replicated, queryable map.
pub struct IndexedMap {
    name: String,
    store: Arc<RwLock<LWWMap<Value>>>,
    attributes: AttributeResolver,
    indexes: IndexRegistry,
    live: LiveQueryManager,
    resolvers: ResolverRegistry,
    fts: Option<Bm25Index>,
    search_subs: Vec<SearchSubscriptionEntry>,
    next_search_sub: u64,
    tracker: PatternTracker,
    advisor_config: AdvisorConfig,
    auto_config: AutoIndexConfig,
    auto_manager: AutoIndexManager,
    journal: Option<EventJournal>,
    crdt_recorder: CrdtRecorder,
    search_recorder: SearchRecorder,
    lazy_index_building: bool,
    on_index_building: Option<Arc<dyn Fn(usize, usize) + Send + Sync>>,
}

impl IndexedMap {
    /// Creates a map with default options (no journal, no auto-indexing).
    #[must_use]
    pub fn new(name: impl Into<String>, hlc: HLC) -> Self {
        Self::with_options(name, hlc, IndexedMapOptions::default())
            .expect("default options are valid")
    }

    /// Creates a map with explicit options.
    ///
    /// # Errors
    ///
    /// Fails when the requested journal capacity is below one.
    pub fn with_options(
        name: impl Into<String>,
        hlc: HLC,
        options: IndexedMapOptions,
    ) -> Result<Self, synq_core::journal::JournalError> {
        let (advisor_config, auto_config) = options
            .adaptive
            .clone()
            .unwrap_or_else(|| options.default_indexing.presets());
        let journal = match options.journal {
            Some(config) => Some(EventJournal::new(config)?),
            None => None,
        };
        Ok(Self {
            name: name.into(),
            store: Arc::new(RwLock::new(LWWMap::new(hlc))),
            attributes: AttributeResolver::new(),
            indexes: IndexRegistry::new(),
            live: LiveQueryManager::new(),
            resolvers: ResolverRegistry::new(),
            fts: None,
            search_subs: Vec::new(),
            next_search_sub: 0,
            tracker: PatternTracker::new(PatternTrackerConfig::default()),
            advisor_config,
            auto_config,
            auto_manager: AutoIndexManager::new(),
            journal,
            crdt_recorder: CrdtRecorder::from_env(),
            search_recorder: SearchRecorder::from_env(),
            lazy_index_building: options.lazy_index_building,
            on_index_building: options.on_index_building,
        })
    }

    /// The map's name (used by journal filters and rejections).
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    // ---- Map operations -------------------------------------------------

    /// Stores a value under a fresh timestamp.
    pub fn set(&mut self, key: &str, value: Value, ttl_ms: Option<u64>) -> LWWRecord<Value> {
        let (record, old_live) = {
            let mut store = self.store.write();
            let old_live = store.get(key).cloned();
            let record = store.set(key, value.clone(), ttl_ms);
            (record, old_live)
        };
        self.record_debug("set", key, &record.timestamp, Some(&value));
        let event_type = if old_live.is_some() {
            JournalEventType::Update
        } else {
            JournalEventType::Put
        };
        self.journal_append(
            event_type,
            key,
            Some(value.clone()),
            old_live.clone(),
            record.timestamp.clone(),
        );
        self.apply_side_effects(key, old_live.as_ref(), Some(&value));
        record
    }

    /// Tombstones a key under a fresh timestamp.
    pub fn remove(&mut self, key: &str) -> LWWRecord<Value> {
        let (tombstone, old_live) = {
            let mut store = self.store.write();
            let old_live = store.get(key).cloned();
            let tombstone = store.remove(key);
            (tombstone, old_live)
        };
        self.record_debug("delete", key, &tombstone.timestamp, None);
        self.journal_append(
            JournalEventType::Delete,
            key,
            None,
            old_live.clone(),
            tombstone.timestamp.clone(),
        );
        self.apply_side_effects(key, old_live.as_ref(), None);
        tombstone
    }

    /// Merges a remote record through the conflict-resolver pipeline.
    ///
    /// # Errors
    ///
    /// As [`LWWMap::merge_resolved`].
    pub fn merge(
        &mut self,
        key: &str,
        record: LWWRecord<Value>,
    ) -> Result<MergeOutcome, MapError> {
        self.merge_with_auth(key, record, None)
    }

    /// [`merge`](Self::merge) with an authenticated principal for the
    /// resolver context.
    ///
    /// # Errors
    ///
    /// As [`LWWMap::merge_resolved`].
    pub fn merge_with_auth(
        &mut self,
        key: &str,
        record: LWWRecord<Value>,
        auth: Option<&Principal>,
    ) -> Result<MergeOutcome, MapError> {
        let (old_live, local_timestamp) = {
            let store = self.store.read();
            (
                store.get(key).cloned(),
                store.get_record(key).map(|r| r.timestamp.clone()),
            )
        };
        let incoming_timestamp = record.timestamp.clone();
        let outcome = self
            .store
            .write()
            .merge_resolved(&self.name, key, record, &self.resolvers, auth)?;

        if let MergeOutcome::Applied { changed: true } = &outcome {
            let (new_live, stored_timestamp, winner_node) = {
                let store = self.store.read();
                let stored = store.get_record(key).expect("record just merged");
                (
                    store.get(key).cloned(),
                    stored.timestamp.clone(),
                    stored.timestamp.node_id.clone(),
                )
            };
            if let Some(local_timestamp) = local_timestamp {
                self.crdt_recorder.record_conflict(crate::debug::CrdtConflict {
                    map_id: self.name.clone(),
                    key: key.to_string(),
                    local_timestamp,
                    remote_timestamp: incoming_timestamp,
                    winner_node_id: winner_node,
                });
            }
            self.record_debug("merge", key, &stored_timestamp, new_live.as_ref());
            let event_type = match (&old_live, &new_live) {
                (None, Some(_)) => JournalEventType::Put,
                (Some(_), Some(_)) => JournalEventType::Update,
                (_, None) => JournalEventType::Delete,
            };
            self.journal_append(
                event_type,
                key,
                new_live.clone(),
                old_live.clone(),
                stored_timestamp,
            );
            self.apply_side_effects(key, old_live.as_ref(), new_live.as_ref());
        }
        Ok(outcome)
    }

    /// The live value for a key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Value> {
        self.store.read().get(key).cloned()
    }

    /// The raw record for a key, tombstones included.
    #[must_use]
    pub fn get_record(&self, key: &str) -> Option<LWWRecord<Value>> {
        self.store.read().get_record(key).cloned()
    }

    /// All live `(key, value)` entries.
    #[must_use]
    pub fn entries(&self) -> Vec<(String, Value)> {
        self.store
            .read()
            .entries()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// All live keys.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.store.read().keys().cloned().collect()
    }

    /// Number of stored records, tombstones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.store.read().size()
    }

    /// Whether nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current Merkle root hash, for anti-entropy.
    #[must_use]
    pub fn merkle_root(&self) -> u32 {
        self.store.read().merkle_tree().get_root_hash()
    }

    /// Wipes records, indexes, standing result sets, and the full-text
    /// corpus. The HLC and journal are left untouched.
    pub fn clear(&mut self) {
        self.store.write().clear();
        self.indexes.clear_all();
        self.live.clear_results();
        if let Some(fts) = &mut self.fts {
            fts.clear();
        }
    }

    // ---- Resolver & attribute wiring ------------------------------------

    /// The conflict-resolver registry (register resolvers, listeners).
    pub fn resolvers_mut(&mut self) -> &mut ResolverRegistry {
        &mut self.resolvers
    }

    /// Registers a custom attribute for queries and future indexes.
    pub fn register_attribute(&mut self, attribute: Attribute) {
        self.attributes.register(attribute);
    }

    // ---- Index management -----------------------------------------------

    /// Adds a hash index on an attribute. Returns the index handle.
    pub fn add_hash_index(&mut self, attr: &str) -> u64 {
        let attribute = self.attributes.resolve(attr);
        self.install_index(Box::new(HashIndex::new(attribute)))
    }

    /// Adds a navigable (sorted) index on an attribute.
    pub fn add_navigable_index(&mut self, attr: &str) -> u64 {
        let attribute = self.attributes.resolve(attr);
        self.install_index(Box::new(NavigableIndex::new(attribute)))
    }

    /// Adds a quantized navigable index on an attribute.
    pub fn add_quantized_index(&mut self, attr: &str, quantizer: Quantizer) -> u64 {
        let attribute = self.attributes.resolve(attr);
        self.install_index(Box::new(QuantizedIndex::new(attribute, quantizer)))
    }

    /// Adds an inverted (text) index on an attribute.
    pub fn add_inverted_index(&mut self, attr: &str) -> u64 {
        let attribute = self.attributes.resolve(attr);
        self.install_index(Box::new(InvertedIndex::new(attribute)))
    }

    /// Adds a compound index over two or more attributes.
    ///
    /// # Errors
    ///
    /// Fails with [`InvalidQuery::EmptyAttribute`] when fewer than two
    /// attributes are given.
    pub fn add_compound_index(&mut self, attrs: &[&str]) -> Result<u64, InvalidQuery> {
        if attrs.len() < 2 {
            return Err(InvalidQuery::EmptyAttribute);
        }
        let attributes: Vec<Attribute> =
            attrs.iter().map(|attr| self.attributes.resolve(attr)).collect();
        Ok(self.install_index(Box::new(CompoundIndex::new(attributes))))
    }

    /// Adds a caller-built index.
    pub fn add_index(&mut self, index: Box<dyn Index>) -> u64 {
        self.install_index(index)
    }

    /// Removes an index by handle. Returns whether it existed.
    pub fn remove_index(&mut self, id: u64) -> bool {
        self.indexes.remove(id)
    }

    /// Statistics for every registered index.
    #[must_use]
    pub fn index_stats(&self) -> Vec<IndexStats> {
        self.indexes.stats()
    }

    /// Forces every lazy index to build now.
    pub fn materialize_all_indexes(&mut self) {
        for entry in self.indexes.iter_mut() {
            entry.index.materialize_now();
        }
    }

    fn install_index(&mut self, mut index: Box<dyn Index>) -> u64 {
        if self.lazy_index_building {
            let progress = self.on_index_building.clone().map(|cb| {
                Box::new(move |done: usize, total: usize| cb(done, total))
                    as Box<dyn Fn(usize, usize)>
            });
            let mut lazy = LazyIndex::with_progress(
                index,
                progress,
                crate::index::lazy::DEFAULT_PROGRESS_EVERY,
            );
            for (key, record) in self.entries() {
                lazy.add(&key, &record);
            }
            self.indexes.add(Box::new(lazy))
        } else {
            for (key, record) in self.entries() {
                index.add(&key, &record);
            }
            self.indexes.add(index)
        }
    }

    // ---- Query execution ------------------------------------------------

    /// Plans a query without executing it.
    ///
    /// # Errors
    ///
    /// [`InvalidQuery`] from validation.
    pub fn explain_query(&self, query: &QueryNode) -> Result<QueryPlan, InvalidQuery> {
        plan(query, &self.indexes, &self.live)
    }

    /// Runs a query and returns matching keys.
    ///
    /// # Errors
    ///
    /// [`InvalidQuery`] from validation.
    pub fn query(&mut self, query: &QueryNode) -> Result<Vec<String>, InvalidQuery> {
        self.query_with(query, &QueryOptions::default())
    }

    /// Runs a query with sort / offset / limit options.
    ///
    /// # Errors
    ///
    /// [`InvalidQuery`] from validation.
    pub fn query_with(
        &mut self,
        query: &QueryNode,
        options: &QueryOptions,
    ) -> Result<Vec<String>, InvalidQuery> {
        let query_plan = plan(query, &self.indexes, &self.live)?;
        let mut result: Box<dyn ResultSet> = self.execute_step(&query_plan.root);

        if let Some((sort_attr, direction)) = &options.sort {
            result = self.sorted(result, sort_attr, *direction);
        }
        if options.offset > 0 || options.limit.is_some() {
            let limit = options.limit.unwrap_or(usize::MAX);
            result = Box::new(LimitResultSet::new(result, options.offset, limit));
        }

        let keys = result.materialize().to_vec();
        self.track_query(query, &query_plan);
        Ok(keys)
    }

    /// Runs a query and returns matching `(key, value)` entries.
    ///
    /// # Errors
    ///
    /// [`InvalidQuery`] from validation.
    pub fn query_entries(
        &mut self,
        query: &QueryNode,
    ) -> Result<Vec<(String, Value)>, InvalidQuery> {
        let keys = self.query(query)?;
        let store = self.store.read();
        Ok(keys
            .into_iter()
            .filter_map(|key| store.get(&key).cloned().map(|value| (key, value)))
            .collect())
    }

    /// Runs a query and returns matching values.
    ///
    /// # Errors
    ///
    /// [`InvalidQuery`] from validation.
    pub fn query_values(&mut self, query: &QueryNode) -> Result<Vec<Value>, InvalidQuery> {
        Ok(self
            .query_entries(query)?
            .into_iter()
            .map(|(_, value)| value)
            .collect())
    }

    /// Number of records matching a query.
    ///
    /// # Errors
    ///
    /// [`InvalidQuery`] from validation.
    pub fn count(&mut self, query: &QueryNode) -> Result<usize, InvalidQuery> {
        Ok(self.query(query)?.len())
    }

    fn execute_step(&self, step: &PlanStep) -> Box<dyn ResultSet> {
        match step {
            PlanStep::StandingLookup { hash } => self
                .live
                .standing_result(*hash)
                .unwrap_or_else(|| Box::new(SetResultSet::empty(COST_STANDING))),
            PlanStep::IndexScan { index_id, query, cost } => self
                .indexes
                .get(*index_id)
                .and_then(|entry| entry.index.retrieve(query))
                .unwrap_or_else(|| Box::new(SetResultSet::empty(*cost))),
            PlanStep::CompoundLookup { index_id, values, .. } => self
                .indexes
                .get(*index_id)
                .and_then(|entry| entry.index.retrieve_compound(values))
                .unwrap_or_else(|| {
                    Box::new(SetResultSet::empty(crate::index::COST_COMPOUND))
                }),
            PlanStep::Intersection { children } => Box::new(IntersectionResultSet::new(
                children.iter().map(|child| self.execute_step(child)).collect(),
            )),
            PlanStep::Union { children } => Box::new(UnionResultSet::new(
                children.iter().map(|child| self.execute_step(child)).collect(),
            )),
            PlanStep::Filter { source, predicate } => Box::new(FilterResultSet::new(
                self.execute_step(source),
                self.record_predicate(predicate),
            )),
            PlanStep::FullScan { predicate } => {
                let store = self.store.read();
                let matching: Vec<String> = store
                    .entries()
                    .filter(|(_, record)| predicate.matches(record, &self.attributes))
                    .map(|(key, _)| key.clone())
                    .collect();
                Box::new(SetResultSet::from_keys(matching, COST_FALLBACK))
            }
            PlanStep::Not { source } => {
                let excluded = self.execute_step(source);
                let store = self.store.read();
                let remaining: Vec<String> = store
                    .keys()
                    .filter(|key| !excluded.contains(key))
                    .cloned()
                    .collect();
                let cost = u32::try_from(step.cost().min(u64::from(u32::MAX)))
                    .unwrap_or(u32::MAX);
                Box::new(SetResultSet::from_keys(remaining, cost))
            }
        }
    }

    fn record_predicate(&self, predicate: &QueryNode) -> Box<dyn Fn(&str) -> bool> {
        let store = self.store.clone();
        let resolver = self.attributes.clone();
        let predicate = predicate.clone();
        Box::new(move |key| {
            let guard = store.read();
            guard
                .get(key)
                .is_some_and(|record| predicate.matches(record, &resolver))
        })
    }

    /// Wraps a result set in a sort, using a navigable index on the sort
    /// attribute as a pre-sorted source when one exists.
    fn sorted(
        &self,
        base: Box<dyn ResultSet>,
        sort_attr: &str,
        direction: SortDirection,
    ) -> Box<dyn ResultSet> {
        let descending = direction == SortDirection::Desc;
        let index_order = self
            .indexes
            .iter()
            .find_map(|entry| entry.index.sorted_keys(sort_attr, descending));

        if let Some(order) = index_order {
            // Index order covers keys with a defined sort value; the rest
            // go last ascending, first descending.
            let mut ordered: Vec<String> =
                order.into_iter().filter(|key| base.contains(key)).collect();
            let undefined: Vec<String> = base
                .keys()
                .filter(|key| !ordered.contains(key))
                .collect();
            if descending {
                let mut with_undefined = undefined;
                with_undefined.extend(ordered);
                ordered = with_undefined;
            } else {
                ordered.extend(undefined);
            }
            let cost = base.retrieval_cost();
            let estimate = ordered.len() as u64;
            let source = LazyResultSet::new(
                Box::new(move || Box::new(ordered.clone().into_iter())),
                estimate,
                cost,
            );
            let sort_key = self.sort_key_fn(sort_attr);
            Box::new(SortResultSet::new(Box::new(source), sort_key, descending, true))
        } else {
            let sort_key = self.sort_key_fn(sort_attr);
            Box::new(SortResultSet::new(base, sort_key, descending, false))
        }
    }

    fn sort_key_fn(&self, sort_attr: &str) -> Box<dyn Fn(&str) -> Option<ScalarValue>> {
        let store = self.store.clone();
        let resolver = self.attributes.clone();
        let attr = sort_attr.to_string();
        Box::new(move |key| {
            let guard = store.read();
            let record = guard.get(key)?;
            resolver.values_of(&attr, record).into_iter().next()
        })
    }

    // ---- Live queries ---------------------------------------------------

    /// Subscribes to a query's result set.
    ///
    /// The `Initial` event is delivered synchronously before this returns.
    pub fn subscribe_live_query(
        &mut self,
        query: QueryNode,
        callback: LiveCallback,
    ) -> LiveSubscription {
        let store = self.store.read();
        self.live
            .subscribe(query, self.attributes.clone(), store.entries(), callback)
    }

    /// Removes a live-query subscription. Idempotent.
    pub fn unsubscribe_live_query(&mut self, subscription: LiveSubscription) -> bool {
        self.live.unsubscribe(subscription)
    }

    // ---- Full-text search -----------------------------------------------

    /// Builds the BM25 index over current entries and enables `search`.
    pub fn enable_full_text_search(&mut self, config: Bm25Config) {
        let mut index = Bm25Index::new(config);
        {
            let store = self.store.read();
            index.build_from_entries(store.entries());
        }
        self.fts = Some(index);
    }

    /// Whether full-text search is enabled.
    #[must_use]
    pub fn full_text_enabled(&self) -> bool {
        self.fts.is_some()
    }

    /// Ranked full-text search.
    ///
    /// # Errors
    ///
    /// Fails when full-text search has not been enabled.
    pub fn search(
        &mut self,
        text: &str,
        options: &SearchOptions,
    ) -> anyhow::Result<Vec<SearchHit>> {
        let started = std::time::Instant::now();
        let fts = self
            .fts
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("full-text search is not enabled"))?;
        let hits = fts.search(text, options);
        if self.search_recorder.is_enabled() {
            let capture = SearchCapture {
                query: text.to_string(),
                timing_ms: started.elapsed().as_secs_f64() * 1_000.0,
                results: hits
                    .iter()
                    .map(|hit| ScoreBreakdown {
                        key: hit.key.clone(),
                        score: hit.score,
                        bm25: hit.score,
                        matched_terms: hit.matched_terms.clone(),
                    })
                    .collect(),
                total_docs: fts.total_docs() as u64,
            };
            self.search_recorder.record_search(capture);
        }
        Ok(hits)
    }

    /// Subscribes to live search results for a query string.
    ///
    /// The current Top-K is delivered synchronously as `Added` deltas
    /// before this returns.
    ///
    /// # Errors
    ///
    /// Fails when full-text search has not been enabled.
    pub fn subscribe_search(
        &mut self,
        query: &str,
        options: LiveFtsOptions,
        callback: SearchCallback,
    ) -> anyhow::Result<u64> {
        let fts = self
            .fts
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("full-text search is not enabled"))?;
        let index = LiveFtsIndex::new(fts, query, options);
        for (key, score) in index.results() {
            callback(&FtsDelta {
                key: key.clone(),
                change: crate::fts::FtsChange::Added,
                score,
                old_score: None,
                matched_terms: Vec::new(),
            });
        }
        let id = self.next_search_sub;
        self.next_search_sub += 1;
        self.search_subs.push(SearchSubscriptionEntry {
            id,
            index,
            callback,
        });
        Ok(id)
    }

    /// Removes a live-search subscription. Idempotent.
    pub fn unsubscribe_search(&mut self, id: u64) -> bool {
        let before = self.search_subs.len();
        self.search_subs.retain(|entry| entry.id != id);
        self.search_subs.len() != before
    }

    // ---- Adaptive indexing ----------------------------------------------

    /// Current index suggestions from the pattern tracker.
    #[must_use]
    pub fn get_index_suggestions(&self) -> Vec<IndexSuggestion> {
        advise(&self.tracker, &self.indexes, &self.advisor_config)
    }

    /// Forgets all tracked query patterns.
    pub fn reset_query_statistics(&mut self) {
        self.tracker.clear();
    }

    fn track_query(&mut self, query: &QueryNode, query_plan: &QueryPlan) {
        let cost = query_plan.estimated_cost;
        let mut simple_attrs: Vec<(String, QueryKind)> = Vec::new();
        collect_simple(query, &mut simple_attrs);
        for (attr, kind) in &simple_attrs {
            let has_index = !self.indexes.candidates(attr, *kind).is_empty();
            self.tracker.record_query(attr, *kind, cost, None, has_index);
        }
        if let QueryNode::And { children } = query {
            let attrs: Vec<String> = children
                .iter()
                .filter_map(|child| child.attribute().map(str::to_string))
                .collect();
            if attrs.len() >= 2 {
                self.tracker.record_compound_query(&attrs);
            }
        }
        self.maybe_auto_index();
    }

    fn maybe_auto_index(&mut self) {
        if !self.auto_config.enabled {
            return;
        }
        let suggestions = advise(&self.tracker, &self.indexes, &self.advisor_config);
        let Some(suggestion) = self.auto_manager.due(&self.auto_config, &suggestions) else {
            return;
        };
        let attr = suggestion.attributes[0].clone();
        let kind = suggestion.kind;
        tracing::info!(
            attribute = attr.as_str(),
            kind = ?kind,
            "creating index automatically"
        );
        match kind {
            IndexKind::Navigable => self.add_navigable_index(&attr),
            IndexKind::Inverted => self.add_inverted_index(&attr),
            _ => self.add_hash_index(&attr),
        };
        self.auto_manager.mark_created(&attr);
        self.tracker.reset_attribute(&attr);
    }

    // ---- Journal & recorders --------------------------------------------

    /// The attached event journal, if any.
    #[must_use]
    pub fn journal(&self) -> Option<&EventJournal> {
        self.journal.as_ref()
    }

    /// Mutable access to the journal (subscribe, compact, dispose).
    pub fn journal_mut(&mut self) -> Option<&mut EventJournal> {
        self.journal.as_mut()
    }

    /// The CRDT debug recorder.
    #[must_use]
    pub fn crdt_recorder(&self) -> &CrdtRecorder {
        &self.crdt_recorder
    }

    /// Mutable access to the CRDT debug recorder.
    pub fn crdt_recorder_mut(&mut self) -> &mut CrdtRecorder {
        &mut self.crdt_recorder
    }

    /// The search debug recorder.
    #[must_use]
    pub fn search_recorder(&self) -> &SearchRecorder {
        &self.search_recorder
    }

    /// Mutable access to the search debug recorder.
    pub fn search_recorder_mut(&mut self) -> &mut SearchRecorder {
        &mut self.search_recorder
    }

    fn journal_append(
        &mut self,
        event_type: JournalEventType,
        key: &str,
        value: Option<Value>,
        previous_value: Option<Value>,
        timestamp: Timestamp,
    ) {
        let Some(journal) = &mut self.journal else {
            return;
        };
        let node_id = timestamp.node_id.clone();
        let draft = JournalEventDraft {
            event_type,
            map_name: self.name.clone(),
            key: key.to_string(),
            value,
            previous_value,
            timestamp,
            node_id,
            metadata: None,
        };
        if let Err(error) = journal.append(draft) {
            tracing::warn!(%error, "journal append failed");
        }
    }

    fn record_debug(&mut self, operation: &str, key: &str, timestamp: &Timestamp, value: Option<&Value>) {
        if !self.crdt_recorder.is_enabled() {
            return;
        }
        let root = self.store.read().merkle_tree().get_root_hash();
        self.crdt_recorder.record_operation(
            operation,
            &self.name,
            key,
            timestamp.clone(),
            root,
            value.cloned(),
        );
    }

    /// Index and live-query fan-out for one visible transition.
    fn apply_side_effects(&mut self, key: &str, old: Option<&Value>, new: Option<&Value>) {
        match (old, new) {
            (None, Some(new)) => {
                self.indexes.on_record_added(key, new);
                self.live.on_record_added(key, new);
            }
            (Some(old), Some(new)) => {
                self.indexes.on_record_updated(key, old, new);
                self.live.on_record_updated(key, old, new);
            }
            (Some(old), None) => {
                self.indexes.on_record_removed(key, old);
                self.live.on_record_removed(key);
            }
            (None, None) => {}
        }
        self.apply_fts_side_effects(key, new);
    }

    fn apply_fts_side_effects(&mut self, key: &str, new: Option<&Value>) {
        let Some(fts) = &mut self.fts else {
            return;
        };
        match new {
            Some(record) => fts.on_set(key, record),
            None => fts.on_remove(key),
        }
        let fts = &*fts;
        for entry in &mut self.search_subs {
            let deltas: Vec<FtsDelta> = match new {
                Some(_) => entry.index.on_record_changed(fts, key),
                None => entry.index.on_record_removed(key).into_iter().collect(),
            };
            for delta in &deltas {
                (entry.callback)(delta);
            }
        }
    }
}

fn collect_simple(query: &QueryNode, out: &mut Vec<(String, QueryKind)>) {
    match query {
        QueryNode::And { children } | QueryNode::Or { children } => {
            for child in children {
                collect_simple(child, out);
            }
        }
        QueryNode::Not { child } => collect_simple(child, out),
        simple => {
            if let (Some(attr), Some(kind)) = (simple.attribute(), QueryKind::of(simple)) {
                out.push((attr.to_string(), kind));
            }
        }
    }
}
