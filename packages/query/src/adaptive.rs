//! Adaptive indexing: pattern tracking, suggestions, auto-creation.
//!
//! Three cooperating, individually optional pieces:
//!
//! - [`PatternTracker`] records which `(attribute, query kind)` pairs the
//!   planner sees and how expensive they were, in a bounded, sampled,
//!   TTL-pruned map; compound `and` shapes are tracked separately.
//! - [`advise`] turns the tracked stats into ranked [`IndexSuggestion`]s,
//!   mapping query kinds to the index family that would serve them.
//! - [`AutoIndexManager`] decides, after each tracked query, whether a
//!   suggestion has crossed the creation threshold.

use std::collections::HashMap;

use ahash::RandomState;
use synq_core::hlc::{ClockSource, SystemClock};

use crate::index::{IndexKind, IndexRegistry, QueryKind};

/// Conservative per-record memory estimate for a new index.
const BYTES_PER_RECORD: u64 = 64;

/// Tracker configuration.
#[derive(Debug, Clone)]
pub struct PatternTrackerConfig {
    /// Maximum tracked patterns; least-recently-queried evicts first.
    pub max_patterns: usize,
    /// Drop patterns not queried for this long.
    pub ttl_ms: Option<u64>,
    /// Track one query in N (1 = every query).
    pub sample_rate: u32,
}

impl Default for PatternTrackerConfig {
    fn default() -> Self {
        Self {
            max_patterns: 1_000,
            ttl_ms: Some(30 * 60 * 1_000),
            sample_rate: 1,
        }
    }
}

/// Stats for one `(attribute, query kind)` pattern.
#[derive(Debug, Clone, PartialEq)]
pub struct PatternStats {
    /// Attribute queried.
    pub attribute: String,
    /// Query kind observed.
    pub kind: QueryKind,
    /// Number of queries seen (after sampling).
    pub query_count: u64,
    /// Sum of observed costs.
    pub total_cost: u64,
    /// Mean observed cost.
    pub average_cost: f64,
    /// Last time this pattern was queried, millis.
    pub last_queried_ms: u64,
    /// Rough distinct-value estimate supplied by the caller.
    pub estimated_cardinality: u64,
    /// Whether an index currently serves this attribute.
    pub has_index: bool,
}

/// Stats for one compound `and` shape.
#[derive(Debug, Clone, PartialEq)]
pub struct CompoundPatternStats {
    /// The ordered attribute list.
    pub attributes: Vec<String>,
    /// Number of queries seen.
    pub query_count: u64,
    /// Last time queried, millis.
    pub last_queried_ms: u64,
}

/// Bounded tracker of query patterns.
pub struct PatternTracker {
    config: PatternTrackerConfig,
    simple: HashMap<(String, QueryKind), PatternStats, RandomState>,
    compound: HashMap<Vec<String>, CompoundPatternStats, RandomState>,
    sample_counter: u32,
    clock: Box<dyn ClockSource>,
}

impl PatternTracker {
    /// A tracker on the system clock.
    #[must_use]
    pub fn new(config: PatternTrackerConfig) -> Self {
        Self::with_clock(config, Box::new(SystemClock))
    }

    /// A tracker with an injected clock (TTL pruning in tests).
    #[must_use]
    pub fn with_clock(config: PatternTrackerConfig, clock: Box<dyn ClockSource>) -> Self {
        Self {
            config,
            simple: HashMap::default(),
            compound: HashMap::default(),
            sample_counter: 0,
            clock,
        }
    }

    /// Records one simple query observation.
    pub fn record_query(
        &mut self,
        attribute: &str,
        kind: QueryKind,
        cost: u64,
        cardinality: Option<u64>,
        has_index: bool,
    ) {
        if !self.should_sample() {
            return;
        }
        let now = self.clock.now();
        self.prune(now);
        let entry = self
            .simple
            .entry((attribute.to_string(), kind))
            .or_insert_with(|| PatternStats {
                attribute: attribute.to_string(),
                kind,
                query_count: 0,
                total_cost: 0,
                average_cost: 0.0,
                last_queried_ms: now,
                estimated_cardinality: 0,
                has_index,
            });
        entry.query_count += 1;
        entry.total_cost = entry.total_cost.saturating_add(cost);
        entry.average_cost = entry.total_cost as f64 / entry.query_count as f64;
        entry.last_queried_ms = now;
        entry.has_index = has_index;
        if let Some(cardinality) = cardinality {
            entry.estimated_cardinality = entry.estimated_cardinality.max(cardinality);
        }
        self.evict_if_over_capacity();
    }

    /// Records one compound `and` shape (two or more simple children).
    pub fn record_compound_query(&mut self, attributes: &[String]) {
        if attributes.len() < 2 || !self.should_sample() {
            return;
        }
        let now = self.clock.now();
        self.prune(now);
        let entry = self
            .compound
            .entry(attributes.to_vec())
            .or_insert_with(|| CompoundPatternStats {
                attributes: attributes.to_vec(),
                query_count: 0,
                last_queried_ms: now,
            });
        entry.query_count += 1;
        entry.last_queried_ms = now;
    }

    /// All simple pattern stats.
    #[must_use]
    pub fn patterns(&self) -> Vec<&PatternStats> {
        self.simple.values().collect()
    }

    /// All compound pattern stats.
    #[must_use]
    pub fn compound_patterns(&self) -> Vec<&CompoundPatternStats> {
        self.compound.values().collect()
    }

    /// Stats for one pattern, if tracked.
    #[must_use]
    pub fn get(&self, attribute: &str, kind: QueryKind) -> Option<&PatternStats> {
        self.simple.get(&(attribute.to_string(), kind))
    }

    /// Forgets everything about one attribute (after an index was built).
    pub fn reset_attribute(&mut self, attribute: &str) {
        self.simple.retain(|(attr, _), _| attr != attribute);
    }

    /// Forgets everything.
    pub fn clear(&mut self) {
        self.simple.clear();
        self.compound.clear();
        self.sample_counter = 0;
    }

    fn should_sample(&mut self) -> bool {
        let rate = self.config.sample_rate.max(1);
        self.sample_counter = self.sample_counter.wrapping_add(1);
        self.sample_counter % rate == 0
    }

    fn prune(&mut self, now: u64) {
        if let Some(ttl) = self.config.ttl_ms {
            self.simple
                .retain(|_, stats| now.saturating_sub(stats.last_queried_ms) <= ttl);
            self.compound
                .retain(|_, stats| now.saturating_sub(stats.last_queried_ms) <= ttl);
        }
    }

    fn evict_if_over_capacity(&mut self) {
        while self.simple.len() > self.config.max_patterns {
            let Some(oldest) = self
                .simple
                .iter()
                .min_by_key(|(_, stats)| stats.last_queried_ms)
                .map(|(key, _)| key.clone())
            else {
                break;
            };
            self.simple.remove(&oldest);
        }
    }
}

/// Advisor configuration.
#[derive(Debug, Clone)]
pub struct AdvisorConfig {
    /// Whether suggestions are produced at all.
    pub enabled: bool,
    /// Minimum observations before a pattern is considered.
    pub min_query_count: u64,
    /// Minimum average cost before a pattern is worth an index.
    pub min_average_cost: f64,
}

impl Default for AdvisorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_query_count: 5,
            min_average_cost: 50.0,
        }
    }
}

/// Suggestion priority buckets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SuggestionPriority {
    /// Marginal benefit.
    Low,
    /// Worthwhile.
    Medium,
    /// Create this index.
    High,
}

/// One index suggestion.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexSuggestion {
    /// Attribute(s) to index; more than one means a compound index.
    pub attributes: Vec<String>,
    /// Recommended index family.
    pub kind: IndexKind,
    /// Estimated speedup × frequency score.
    pub estimated_benefit: f64,
    /// Conservative memory estimate in bytes.
    pub estimated_memory_bytes: u64,
    /// Priority bucket.
    pub priority: SuggestionPriority,
    /// Observations backing this suggestion.
    pub query_count: u64,
    /// Mean observed cost.
    pub average_cost: f64,
}

/// Maps a query kind to the index family that serves it.
#[must_use]
pub fn recommended_kind(kind: QueryKind) -> Option<IndexKind> {
    match kind {
        QueryKind::Eq | QueryKind::Neq | QueryKind::In | QueryKind::Has => Some(IndexKind::Hash),
        QueryKind::Gt | QueryKind::Gte | QueryKind::Lt | QueryKind::Lte | QueryKind::Between => {
            Some(IndexKind::Navigable)
        }
        QueryKind::Contains | QueryKind::ContainsAll | QueryKind::ContainsAny => {
            Some(IndexKind::Inverted)
        }
        QueryKind::Like | QueryKind::Regex | QueryKind::Compound => None,
    }
}

fn speedup_factor(kind: IndexKind) -> f64 {
    match kind {
        IndexKind::Hash => 1_000.0,
        IndexKind::Navigable | IndexKind::QuantizedNavigable | IndexKind::Compound => 500.0,
        IndexKind::Inverted => 100.0,
        IndexKind::Standing => 1_000.0,
    }
}

/// Produces ranked suggestions from tracked patterns.
#[must_use]
pub fn advise(
    tracker: &PatternTracker,
    registry: &IndexRegistry,
    config: &AdvisorConfig,
) -> Vec<IndexSuggestion> {
    if !config.enabled {
        return Vec::new();
    }

    // Per attribute, the most-queried eligible pattern wins.
    let mut best_per_attr: HashMap<&str, &PatternStats, RandomState> = HashMap::default();
    for stats in tracker.patterns() {
        if stats.has_index
            || stats.query_count < config.min_query_count
            || stats.average_cost < config.min_average_cost
            || recommended_kind(stats.kind).is_none()
        {
            continue;
        }
        let slot = best_per_attr.entry(stats.attribute.as_str()).or_insert(stats);
        if stats.query_count > slot.query_count {
            *slot = stats;
        }
    }

    let mut suggestions: Vec<IndexSuggestion> = best_per_attr
        .into_values()
        .filter_map(|stats| {
            let kind = recommended_kind(stats.kind)?;
            Some(suggestion_from(
                vec![stats.attribute.clone()],
                kind,
                stats.query_count,
                stats.average_cost,
                stats.estimated_cardinality,
            ))
        })
        .collect();

    // Compound shapes become compound-index suggestions unless an index
    // with that attribute list already exists.
    for compound in tracker.compound_patterns() {
        if compound.query_count < config.min_query_count {
            continue;
        }
        let already = registry.iter().any(|entry| {
            entry.index.compound_attrs() == Some(compound.attributes.as_slice())
        });
        if already {
            continue;
        }
        suggestions.push(suggestion_from(
            compound.attributes.clone(),
            IndexKind::Compound,
            compound.query_count,
            config.min_average_cost,
            0,
        ));
    }

    suggestions.sort_by(|a, b| {
        b.estimated_benefit
            .partial_cmp(&a.estimated_benefit)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    suggestions
}

fn suggestion_from(
    attributes: Vec<String>,
    kind: IndexKind,
    query_count: u64,
    average_cost: f64,
    cardinality: u64,
) -> IndexSuggestion {
    // Recent frequent patterns get a mild bonus through frequency itself;
    // benefit scales with how much a scan costs today.
    let benefit = speedup_factor(kind) * query_count as f64 * (average_cost / 100.0).max(0.1);
    let memory = BYTES_PER_RECORD * cardinality.max(query_count);
    let priority = if benefit >= 10_000.0 {
        SuggestionPriority::High
    } else if benefit >= 1_000.0 {
        SuggestionPriority::Medium
    } else {
        SuggestionPriority::Low
    };
    IndexSuggestion {
        attributes,
        kind,
        estimated_benefit: benefit,
        estimated_memory_bytes: memory,
        priority,
        query_count,
        average_cost,
    }
}

/// Auto-index configuration.
#[derive(Debug, Clone)]
pub struct AutoIndexConfig {
    /// Whether indexes are created automatically.
    pub enabled: bool,
    /// Observations required before creation.
    pub threshold: u64,
    /// Cap on automatically created indexes.
    pub max_auto_indexes: usize,
}

impl Default for AutoIndexConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            threshold: 10,
            max_auto_indexes: 5,
        }
    }
}

/// Tracks which indexes were auto-created and enforces the cap.
#[derive(Default)]
pub struct AutoIndexManager {
    created: Vec<String>,
}

impl AutoIndexManager {
    /// An empty manager.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attributes of indexes created so far.
    #[must_use]
    pub fn created(&self) -> &[String] {
        &self.created
    }

    /// Picks the suggestion to act on after a tracked query, if any.
    ///
    /// Returns the first suggestion whose query count crossed the threshold
    /// while the cap has room.
    #[must_use]
    pub fn due<'a>(
        &self,
        config: &AutoIndexConfig,
        suggestions: &'a [IndexSuggestion],
    ) -> Option<&'a IndexSuggestion> {
        if !config.enabled || self.created.len() >= config.max_auto_indexes {
            return None;
        }
        suggestions
            .iter()
            .find(|s| s.query_count >= config.threshold && s.attributes.len() == 1)
    }

    /// Records a created index.
    pub fn mark_created(&mut self, attribute: &str) {
        self.created.push(attribute.to_string());
    }
}
