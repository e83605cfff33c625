//! Live full-text index: Top-K BM25 results maintained per mutation.
//!
//! Holds one query's tokenized terms and a bounded ranking. Record-level
//! callbacks re-score just the touched document via
//! [`Bm25Index::score_single_document`] and compare it against the current
//! Top-K floor, emitting the deltas a live-search subscriber needs.

use std::collections::BTreeMap;

use ahash::RandomState;
use ordered_float::OrderedFloat;

use super::bm25::Bm25Index;

type ScoreMap = std::collections::HashMap<String, f64, RandomState>;
type TermsMap = std::collections::HashMap<String, Vec<String>, RandomState>;

/// Options bounding a live FTS result set.
#[derive(Debug, Clone, PartialEq)]
pub struct LiveFtsOptions {
    /// Maximum number of tracked results.
    pub max_results: usize,
    /// Minimum admissible score.
    pub min_score: f64,
}

impl Default for LiveFtsOptions {
    fn default() -> Self {
        Self {
            max_results: 50,
            min_score: 0.0,
        }
    }
}

/// How a mutation changed the live result set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FtsChange {
    /// The document entered the result set.
    Added,
    /// The document's score or matched terms changed.
    Updated,
    /// The document left the result set.
    Removed,
}

/// One live-search delta.
#[derive(Debug, Clone, PartialEq)]
pub struct FtsDelta {
    /// Affected document key.
    pub key: String,
    /// What happened.
    pub change: FtsChange,
    /// Current score (the last score for removals).
    pub score: f64,
    /// Previous score, for updates and removals.
    pub old_score: Option<f64>,
    /// Query terms the document currently matches.
    pub matched_terms: Vec<String>,
}

/// Incrementally maintained Top-K for one query.
pub struct LiveFtsIndex {
    query: String,
    terms: Vec<String>,
    options: LiveFtsOptions,
    scores: ScoreMap,
    matched: TermsMap,
    /// `(negated score, key)` so iteration order is best-first with a
    /// deterministic tiebreak.
    ranking: BTreeMap<(OrderedFloat<f64>, String), ()>,
}

impl LiveFtsIndex {
    /// Creates the live index for `query`, seeding from a batch search.
    #[must_use]
    pub fn new(bm25: &Bm25Index, query: &str, options: LiveFtsOptions) -> Self {
        let mut live = Self {
            query: query.to_string(),
            terms: bm25.query_terms(query),
            options,
            scores: ScoreMap::default(),
            matched: TermsMap::default(),
            ranking: BTreeMap::new(),
        };
        let seed = bm25.search(
            query,
            &super::bm25::SearchOptions {
                limit: Some(live.options.max_results),
                min_score: Some(live.options.min_score),
                ..Default::default()
            },
        );
        for hit in seed {
            live.insert(hit.key, hit.score, hit.matched_terms);
        }
        live
    }

    /// The query this index tracks.
    #[must_use]
    pub fn query(&self) -> &str {
        &self.query
    }

    /// Current results, best first.
    #[must_use]
    pub fn results(&self) -> Vec<(String, f64)> {
        self.ranking
            .keys()
            .map(|(neg_score, key)| (key.clone(), -neg_score.0))
            .collect()
    }

    /// Current score of a document, if tracked.
    #[must_use]
    pub fn score_of(&self, key: &str) -> Option<f64> {
        self.scores.get(key).copied()
    }

    /// Number of tracked results.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ranking.len()
    }

    /// Whether the result set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ranking.is_empty()
    }

    /// A record was added or updated; returns the resulting deltas
    /// (possibly an eviction alongside an admission).
    pub fn on_record_changed(&mut self, bm25: &Bm25Index, key: &str) -> Vec<FtsDelta> {
        match bm25.score_single_document(key, &self.terms) {
            Some((score, matched)) if score >= self.options.min_score => {
                self.admit(key, score, matched)
            }
            _ => self.drop_key(key).into_iter().collect(),
        }
    }

    /// A record was removed; returns the removal delta if it was tracked.
    pub fn on_record_removed(&mut self, key: &str) -> Option<FtsDelta> {
        self.drop_key(key)
    }

    fn admit(&mut self, key: &str, score: f64, matched: Vec<String>) -> Vec<FtsDelta> {
        let mut deltas = Vec::new();
        if let Some(old_score) = self.scores.get(key).copied() {
            let old_matched = self.matched.get(key).cloned().unwrap_or_default();
            if (old_score - score).abs() < f64::EPSILON && old_matched == matched {
                return deltas;
            }
            self.ranking.remove(&(OrderedFloat(-old_score), key.to_string()));
            self.insert(key.to_string(), score, matched.clone());
            deltas.push(FtsDelta {
                key: key.to_string(),
                change: FtsChange::Updated,
                score,
                old_score: Some(old_score),
                matched_terms: matched,
            });
            return deltas;
        }

        if self.ranking.len() >= self.options.max_results {
            // Compare against the floor (the worst tracked score).
            let Some((floor_key, floor_score)) = self.floor() else {
                return deltas;
            };
            if score <= floor_score {
                return deltas;
            }
            if let Some(evicted) = self.drop_key(&floor_key) {
                deltas.push(evicted);
            }
        }
        self.insert(key.to_string(), score, matched.clone());
        deltas.push(FtsDelta {
            key: key.to_string(),
            change: FtsChange::Added,
            score,
            old_score: None,
            matched_terms: matched,
        });
        deltas
    }

    fn floor(&self) -> Option<(String, f64)> {
        self.ranking
            .keys()
            .next_back()
            .map(|(neg_score, key)| (key.clone(), -neg_score.0))
    }

    fn insert(&mut self, key: String, score: f64, matched: Vec<String>) {
        self.ranking.insert((OrderedFloat(-score), key.clone()), ());
        self.scores.insert(key.clone(), score);
        self.matched.insert(key, matched);
    }

    fn drop_key(&mut self, key: &str) -> Option<FtsDelta> {
        let score = self.scores.remove(key)?;
        let matched = self.matched.remove(key).unwrap_or_default();
        self.ranking.remove(&(OrderedFloat(-score), key.to_string()));
        Some(FtsDelta {
            key: key.to_string(),
            change: FtsChange::Removed,
            score,
            old_score: Some(score),
            matched_terms: matched,
        })
    }
}

#[cfg(test)]
mod tests {
    use synq_core::value::{object, Value};

    use super::super::bm25::{Bm25Config, SearchOptions};
    use super::*;

    fn doc(text: &str) -> Value {
        object([("text", Value::from(text))])
    }

    fn corpus() -> Bm25Index {
        let mut index = Bm25Index::new(Bm25Config::new(["text"]));
        let entries = vec![
            ("d1".to_string(), doc("rust crdt library")),
            ("d2".to_string(), doc("rust web framework")),
            ("d3".to_string(), doc("gardening tips")),
        ];
        index.build_from_entries(entries.iter().map(|(k, v)| (k, v)));
        index
    }

    #[test]
    fn seeds_from_batch_search() {
        let bm25 = corpus();
        let live = LiveFtsIndex::new(&bm25, "rust", LiveFtsOptions::default());
        let results = live.results();
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|(key, _)| key == "d1" || key == "d2"));
    }

    #[test]
    fn tracks_additions_and_removals() {
        let mut bm25 = corpus();
        let mut live = LiveFtsIndex::new(&bm25, "rust", LiveFtsOptions::default());

        bm25.on_set("d4", &doc("more rust content"));
        let deltas = live.on_record_changed(&bm25, "d4");
        assert_eq!(deltas.len(), 1);
        assert_eq!(deltas[0].change, FtsChange::Added);
        assert_eq!(deltas[0].key, "d4");
        assert!(deltas[0].score > 0.0);

        bm25.on_remove("d4");
        let delta = live.on_record_removed("d4").expect("was tracked");
        assert_eq!(delta.change, FtsChange::Removed);
        assert_eq!(live.len(), 2);
    }

    #[test]
    fn update_that_stops_matching_removes() {
        let mut bm25 = corpus();
        let mut live = LiveFtsIndex::new(&bm25, "rust", LiveFtsOptions::default());

        bm25.on_set("d1", &doc("cooking recipes"));
        let deltas = live.on_record_changed(&bm25, "d1");
        assert_eq!(deltas.len(), 1);
        assert_eq!(deltas[0].change, FtsChange::Removed);
        assert!(live.score_of("d1").is_none());
    }

    #[test]
    fn update_emits_new_and_old_score() {
        let mut bm25 = corpus();
        let mut live = LiveFtsIndex::new(&bm25, "rust", LiveFtsOptions::default());
        let before = live.score_of("d1").expect("tracked");

        bm25.on_set("d1", &doc("rust rust rust everywhere"));
        let deltas = live.on_record_changed(&bm25, "d1");
        assert_eq!(deltas.len(), 1);
        assert_eq!(deltas[0].change, FtsChange::Updated);
        assert_eq!(deltas[0].old_score, Some(before));
        assert_ne!(deltas[0].score, before);
    }

    #[test]
    fn max_results_enforced_with_eviction() {
        let mut bm25 = Bm25Index::new(Bm25Config::new(["text"]));
        let entries = vec![
            ("long".to_string(), doc("match plus quite a few other words here")),
            ("short".to_string(), doc("match word")),
        ];
        bm25.build_from_entries(entries.iter().map(|(k, v)| (k, v)));
        let mut live = LiveFtsIndex::new(
            &bm25,
            "match",
            LiveFtsOptions { max_results: 2, min_score: 0.0 },
        );
        assert_eq!(live.len(), 2);

        // A new, shorter (higher-scoring) doc evicts the floor.
        bm25.on_set("tiny", &doc("match"));
        let deltas = live.on_record_changed(&bm25, "tiny");
        assert_eq!(deltas.len(), 2);
        assert_eq!(deltas[0].change, FtsChange::Removed);
        assert_eq!(deltas[0].key, "long");
        assert_eq!(deltas[1].change, FtsChange::Added);
        assert_eq!(deltas[1].key, "tiny");
        assert_eq!(live.len(), 2);
    }

    #[test]
    fn low_scores_are_not_admitted_over_the_floor() {
        let mut bm25 = Bm25Index::new(Bm25Config::new(["text"]));
        let entries = vec![
            ("a".to_string(), doc("match")),
            ("b".to_string(), doc("match here")),
        ];
        bm25.build_from_entries(entries.iter().map(|(k, v)| (k, v)));
        let mut live = LiveFtsIndex::new(
            &bm25,
            "match",
            LiveFtsOptions { max_results: 2, min_score: 0.0 },
        );

        bm25.on_set("weak", &doc("match buried under very many unrelated words indeed"));
        let deltas = live.on_record_changed(&bm25, "weak");
        assert!(deltas.is_empty());
        assert_eq!(live.len(), 2);
    }

    #[test]
    fn live_scores_match_batch_search() {
        let mut bm25 = corpus();
        let mut live = LiveFtsIndex::new(&bm25, "rust library", LiveFtsOptions::default());

        // Mutate the corpus first, then deliver the change notifications,
        // so the rescored documents see final corpus statistics.
        bm25.on_set("d5", &doc("a rust library for queries"));
        bm25.on_set("d2", &doc("now also a library"));
        live.on_record_changed(&bm25, "d5");
        live.on_record_changed(&bm25, "d2");

        let batch = bm25.search("rust library", &SearchOptions::default());
        for key in ["d5", "d2"] {
            let hit = batch.iter().find(|h| h.key == key).expect("in batch");
            let tracked = live.score_of(key).expect("tracked key");
            assert!(
                (tracked - hit.score).abs() < 1e-4,
                "live {tracked} vs batch {} for {key}",
                hit.score
            );
        }
    }
}
