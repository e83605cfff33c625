//! BM25 ranked text index.
//!
//! Tokenizes configured record fields into per-term posting lists with term
//! frequencies and positions, and scores queries with the BM25 formula
//! (`k1` term saturation, `b` length normalization). IDF uses the standard
//! `ln((N - n + 0.5) / (n + 0.5) + 1)` shape, so terms present in every
//! document still score slightly above zero.
//!
//! [`Bm25Index::score_single_document`] recomputes one document's score
//! from the per-document term-frequency map without touching posting
//! lists -- the O(1)-per-change primitive the live index builds on.

use std::collections::{BTreeMap, HashMap};

use ahash::RandomState;
use serde::{Deserialize, Serialize};
use synq_core::hlc::{ClockSource, SystemClock};
use synq_core::value::Value;

use crate::text::TokenPipeline;

/// Default term-saturation parameter.
pub const DEFAULT_K1: f64 = 1.2;
/// Default length-normalization parameter.
pub const DEFAULT_B: f64 = 0.75;

/// BM25 index configuration.
#[derive(Clone)]
pub struct Bm25Config {
    /// Record fields (dot paths) to tokenize.
    pub fields: Vec<String>,
    /// Term-saturation parameter.
    pub k1: f64,
    /// Length-normalization parameter.
    pub b: f64,
    /// Tokenizer shared between documents and queries.
    pub pipeline: TokenPipeline,
    /// Whether to record token positions in postings.
    pub track_positions: bool,
}

impl Bm25Config {
    /// Standard parameters over the given fields.
    #[must_use]
    pub fn new(fields: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            fields: fields.into_iter().map(Into::into).collect(),
            k1: DEFAULT_K1,
            b: DEFAULT_B,
            pipeline: TokenPipeline::default(),
            track_positions: false,
        }
    }
}

/// Search-time options.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchOptions {
    /// Maximum number of results.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub limit: Option<usize>,
    /// Minimum score threshold.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub min_score: Option<f64>,
    /// Restrict scoring to these fields.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub fields: Option<Vec<String>>,
    /// Per-field boost weights.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub boost: Option<HashMap<String, f64>>,
}

/// One ranked search result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchHit {
    /// Matching record key.
    pub key: String,
    /// BM25 score.
    pub score: f64,
    /// Query terms present in the document.
    pub matched_terms: Vec<String>,
}

/// Per-document, per-field term occurrence.
#[derive(Debug, Clone, Default)]
struct DocTermEntry {
    /// Term frequency per configured field.
    by_field: HashMap<String, u32, RandomState>,
    /// Token positions across the whole document, when tracked.
    positions: Vec<u32>,
}

impl DocTermEntry {
    fn total(&self) -> u32 {
        self.by_field.values().sum()
    }
}

/// The BM25 index.
pub struct Bm25Index {
    config: Bm25Config,
    /// term -> doc -> occurrence.
    postings: HashMap<String, HashMap<String, DocTermEntry, RandomState>, RandomState>,
    /// doc -> term -> occurrence (for single-document scoring and removal).
    doc_terms: HashMap<String, HashMap<String, DocTermEntry, RandomState>, RandomState>,
    /// doc -> length in tokens.
    doc_lengths: HashMap<String, u32, RandomState>,
    total_tokens: u64,
    created_at: u64,
    last_modified: u64,
    clock: Box<dyn ClockSource>,
}

impl Bm25Index {
    /// Creates an empty index.
    #[must_use]
    pub fn new(config: Bm25Config) -> Self {
        Self::with_clock(config, Box::new(SystemClock))
    }

    /// Creates an empty index with an injected clock (metadata timestamps).
    #[must_use]
    pub fn with_clock(config: Bm25Config, clock: Box<dyn ClockSource>) -> Self {
        let now = clock.now();
        Self {
            config,
            postings: HashMap::default(),
            doc_terms: HashMap::default(),
            doc_lengths: HashMap::default(),
            total_tokens: 0,
            created_at: now,
            last_modified: now,
            clock,
        }
    }

    /// The index configuration.
    #[must_use]
    pub fn config(&self) -> &Bm25Config {
        &self.config
    }

    /// Number of indexed documents.
    #[must_use]
    pub fn total_docs(&self) -> usize {
        self.doc_lengths.len()
    }

    /// Average document length in tokens (0 when empty).
    #[must_use]
    pub fn avg_doc_length(&self) -> f64 {
        if self.doc_lengths.is_empty() {
            0.0
        } else {
            self.total_tokens as f64 / self.doc_lengths.len() as f64
        }
    }

    /// Inverse document frequency of a term. 0 for unknown terms.
    #[must_use]
    pub fn idf(&self, term: &str) -> f64 {
        let n = self.postings.get(term).map_or(0, HashMap::len);
        if n == 0 {
            return 0.0;
        }
        let total = self.total_docs() as f64;
        ((total - n as f64 + 0.5) / (n as f64 + 0.5) + 1.0).ln()
    }

    /// Builds the index from scratch over the given entries.
    pub fn build_from_entries<'a, I>(&mut self, entries: I)
    where
        I: IntoIterator<Item = (&'a String, &'a Value)>,
    {
        self.clear();
        for (key, record) in entries {
            self.index_document(key, record);
        }
        self.touch();
    }

    /// Indexes or re-indexes one document.
    pub fn on_set(&mut self, doc_id: &str, record: &Value) {
        self.remove_document(doc_id);
        self.index_document(doc_id, record);
        self.touch();
    }

    /// Removes one document.
    pub fn on_remove(&mut self, doc_id: &str) {
        self.remove_document(doc_id);
        self.touch();
    }

    /// Drops everything.
    pub fn clear(&mut self) {
        self.postings.clear();
        self.doc_terms.clear();
        self.doc_lengths.clear();
        self.total_tokens = 0;
    }

    /// Tokenizes a query with the index's pipeline.
    #[must_use]
    pub fn query_terms(&self, query: &str) -> Vec<String> {
        let mut terms = self.config.pipeline.tokenize(query);
        let mut seen = std::collections::HashSet::new();
        terms.retain(|t| seen.insert(t.clone()));
        terms
    }

    /// Ranked search.
    #[must_use]
    pub fn search(&self, query: &str, options: &SearchOptions) -> Vec<SearchHit> {
        let terms = self.query_terms(query);
        let mut scores: HashMap<String, (f64, Vec<String>), RandomState> = HashMap::default();

        for term in &terms {
            let idf = self.idf(term);
            if idf <= 0.0 {
                continue;
            }
            let Some(docs) = self.postings.get(term) else {
                continue;
            };
            for (doc_id, entry) in docs {
                let tf = self.effective_tf(entry, options);
                if tf <= 0.0 {
                    continue;
                }
                let doc_len = f64::from(*self.doc_lengths.get(doc_id).unwrap_or(&0));
                let contribution = idf * self.saturate(tf, doc_len);
                let slot = scores.entry(doc_id.clone()).or_insert_with(|| (0.0, Vec::new()));
                slot.0 += contribution;
                slot.1.push(term.clone());
            }
        }

        let mut hits: Vec<SearchHit> = scores
            .into_iter()
            .map(|(key, (score, matched_terms))| SearchHit {
                key,
                score,
                matched_terms,
            })
            .collect();
        if let Some(min_score) = options.min_score {
            hits.retain(|hit| hit.score >= min_score);
        }
        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.key.cmp(&b.key))
        });
        if let Some(limit) = options.limit {
            hits.truncate(limit);
        }
        hits
    }

    /// Scores one document against pre-tokenized query terms using the
    /// per-document frequency map -- no posting-list scan.
    ///
    /// Returns `None` when the document is unknown or matches no term.
    #[must_use]
    pub fn score_single_document(
        &self,
        doc_id: &str,
        query_terms: &[String],
    ) -> Option<(f64, Vec<String>)> {
        let terms = self.doc_terms.get(doc_id)?;
        let doc_len = f64::from(*self.doc_lengths.get(doc_id)?);
        let mut score = 0.0;
        let mut matched = Vec::new();
        for term in query_terms {
            let Some(entry) = terms.get(term) else {
                continue;
            };
            let idf = self.idf(term);
            if idf <= 0.0 {
                continue;
            }
            score += idf * self.saturate(f64::from(entry.total()), doc_len);
            matched.push(term.clone());
        }
        if matched.is_empty() {
            None
        } else {
            Some((score, matched))
        }
    }

    /// Serializes to the versioned wire shape.
    #[must_use]
    pub fn to_serialized(&self) -> SerializedBm25 {
        let mut terms: Vec<SerializedTerm> = self
            .postings
            .iter()
            .map(|(term, docs)| {
                let mut postings: Vec<SerializedPosting> = docs
                    .iter()
                    .map(|(doc_id, entry)| SerializedPosting {
                        doc_id: doc_id.clone(),
                        term_frequency: entry.total(),
                        positions: if self.config.track_positions {
                            Some(entry.positions.clone())
                        } else {
                            None
                        },
                    })
                    .collect();
                postings.sort_by(|a, b| a.doc_id.cmp(&b.doc_id));
                SerializedTerm {
                    term: term.clone(),
                    idf: self.idf(term),
                    postings,
                }
            })
            .collect();
        terms.sort_by(|a, b| a.term.cmp(&b.term));
        SerializedBm25 {
            version: 1,
            metadata: SerializedMetadata {
                total_docs: self.total_docs() as u64,
                avg_doc_length: self.avg_doc_length(),
                created_at: self.created_at,
                last_modified: self.last_modified,
            },
            terms,
            doc_lengths: self
                .doc_lengths
                .iter()
                .map(|(doc, len)| (doc.clone(), *len))
                .collect(),
        }
    }

    /// Restores an index from its wire shape.
    ///
    /// Field-level frequency breakdown is not part of the wire format, so
    /// restored postings count toward a single synthetic field.
    pub fn from_serialized(config: Bm25Config, serialized: &SerializedBm25) -> Self {
        let mut index = Self::new(config);
        index.created_at = serialized.metadata.created_at;
        index.last_modified = serialized.metadata.last_modified;
        for (doc, len) in &serialized.doc_lengths {
            index.doc_lengths.insert(doc.clone(), *len);
            index.total_tokens += u64::from(*len);
        }
        for term in &serialized.terms {
            for posting in &term.postings {
                let mut entry = DocTermEntry::default();
                entry
                    .by_field
                    .insert(String::new(), posting.term_frequency);
                if let Some(positions) = &posting.positions {
                    entry.positions = positions.clone();
                }
                index
                    .postings
                    .entry(term.term.clone())
                    .or_default()
                    .insert(posting.doc_id.clone(), entry.clone());
                index
                    .doc_terms
                    .entry(posting.doc_id.clone())
                    .or_default()
                    .insert(term.term.clone(), entry);
            }
        }
        index
    }

    fn saturate(&self, tf: f64, doc_len: f64) -> f64 {
        let avg = self.avg_doc_length().max(f64::EPSILON);
        let k1 = self.config.k1;
        let b = self.config.b;
        (tf * (k1 + 1.0)) / (tf + k1 * (1.0 - b + b * doc_len / avg))
    }

    fn effective_tf(&self, entry: &DocTermEntry, options: &SearchOptions) -> f64 {
        let mut tf = 0.0;
        for (field, freq) in &entry.by_field {
            if let Some(fields) = &options.fields {
                if !fields.contains(field) {
                    continue;
                }
            }
            let boost = options
                .boost
                .as_ref()
                .and_then(|boost| boost.get(field))
                .copied()
                .unwrap_or(1.0);
            tf += f64::from(*freq) * boost;
        }
        tf
    }

    fn index_document(&mut self, doc_id: &str, record: &Value) {
        let mut terms: HashMap<String, DocTermEntry, RandomState> = HashMap::default();
        let mut position: u32 = 0;
        for field in &self.config.fields {
            let Some(text) = record.get_path(field).and_then(Value::as_str) else {
                continue;
            };
            for token in self.config.pipeline.tokenize(text) {
                let entry = terms.entry(token).or_default();
                *entry.by_field.entry(field.clone()).or_insert(0) += 1;
                if self.config.track_positions {
                    entry.positions.push(position);
                }
                position += 1;
            }
        }
        if terms.is_empty() {
            return;
        }
        let length: u32 = terms.values().map(DocTermEntry::total).sum();
        self.doc_lengths.insert(doc_id.to_string(), length);
        self.total_tokens += u64::from(length);
        for (term, entry) in &terms {
            self.postings
                .entry(term.clone())
                .or_default()
                .insert(doc_id.to_string(), entry.clone());
        }
        self.doc_terms.insert(doc_id.to_string(), terms);
    }

    fn remove_document(&mut self, doc_id: &str) {
        let Some(terms) = self.doc_terms.remove(doc_id) else {
            return;
        };
        for term in terms.keys() {
            if let Some(docs) = self.postings.get_mut(term) {
                docs.remove(doc_id);
                if docs.is_empty() {
                    self.postings.remove(term);
                }
            }
        }
        if let Some(length) = self.doc_lengths.remove(doc_id) {
            self.total_tokens -= u64::from(length);
        }
    }

    fn touch(&mut self) {
        self.last_modified = self.clock.now();
    }
}

/// Versioned wire shape of a serialized BM25 index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SerializedBm25 {
    /// Always 1.
    pub version: u32,
    /// Corpus-level statistics.
    pub metadata: SerializedMetadata,
    /// Per-term postings.
    pub terms: Vec<SerializedTerm>,
    /// Document lengths in tokens.
    pub doc_lengths: BTreeMap<String, u32>,
}

/// Corpus statistics in the wire shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SerializedMetadata {
    /// Number of documents.
    pub total_docs: u64,
    /// Average document length.
    pub avg_doc_length: f64,
    /// Creation time, millis.
    pub created_at: u64,
    /// Last mutation time, millis.
    pub last_modified: u64,
}

/// One term with its postings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SerializedTerm {
    /// The term.
    pub term: String,
    /// Its IDF at serialization time.
    pub idf: f64,
    /// The documents containing it.
    pub postings: Vec<SerializedPosting>,
}

/// One posting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SerializedPosting {
    /// Document key.
    pub doc_id: String,
    /// Occurrences in the document.
    pub term_frequency: u32,
    /// Token positions, when tracked.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub positions: Option<Vec<u32>>,
}
