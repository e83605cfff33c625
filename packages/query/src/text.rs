//! Configurable tokenization pipeline for text indexing.
//!
//! A [`TokenPipeline`] is a tokenizer (whitespace, word-boundary, or n-gram)
//! followed by an ordered list of filters (lowercase, stop words, length
//! bounds, trim, unique). The inverted index and the BM25 index run record
//! fields and query strings through the same pipeline so postings and query
//! terms agree.

use std::collections::HashSet;

/// How raw text is split into candidate tokens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Tokenizer {
    /// Split on ASCII whitespace.
    Whitespace,
    /// Split on anything that is not alphanumeric, so `"user-id:42"` yields
    /// `["user", "id", "42"]`.
    WordBoundary,
    /// Sliding character n-grams of the given size over each
    /// whitespace-separated word.
    Ngram(usize),
}

/// Token post-processing steps, applied in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenFilter {
    /// ASCII-lowercases each token.
    Lowercase,
    /// Drops tokens found in the stop-word set.
    Stopwords(HashSet<String>),
    /// Drops tokens shorter than the bound.
    MinLength(usize),
    /// Drops tokens longer than the bound.
    MaxLength(usize),
    /// Trims surrounding whitespace, dropping tokens that become empty.
    Trim,
    /// Keeps only the first occurrence of each token.
    Unique,
}

/// Tokenizer plus filters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenPipeline {
    /// The splitting strategy.
    pub tokenizer: Tokenizer,
    /// Post-processing filters, applied in order.
    pub filters: Vec<TokenFilter>,
}

impl Default for TokenPipeline {
    /// Word-boundary splitting, lowercased, trimmed, deduplicated within a
    /// field is NOT applied by default (term frequency needs duplicates);
    /// callers that want set semantics add [`TokenFilter::Unique`].
    fn default() -> Self {
        Self {
            tokenizer: Tokenizer::WordBoundary,
            filters: vec![TokenFilter::Lowercase, TokenFilter::Trim],
        }
    }
}

impl TokenPipeline {
    /// The default pipeline plus [`TokenFilter::Unique`], for set-valued
    /// consumers like the inverted index.
    #[must_use]
    pub fn unique() -> Self {
        let mut pipeline = Self::default();
        pipeline.filters.push(TokenFilter::Unique);
        pipeline
    }

    /// Runs the pipeline over a text.
    #[must_use]
    pub fn tokenize(&self, text: &str) -> Vec<String> {
        let mut tokens = match &self.tokenizer {
            Tokenizer::Whitespace => text
                .split_whitespace()
                .map(str::to_string)
                .collect::<Vec<_>>(),
            Tokenizer::WordBoundary => text
                .split(|c: char| !c.is_alphanumeric())
                .filter(|t| !t.is_empty())
                .map(str::to_string)
                .collect(),
            Tokenizer::Ngram(n) => {
                let n = (*n).max(1);
                let mut grams = Vec::new();
                for word in text.split_whitespace() {
                    let chars: Vec<char> = word.chars().collect();
                    if chars.len() < n {
                        grams.push(word.to_string());
                        continue;
                    }
                    for window in chars.windows(n) {
                        grams.push(window.iter().collect());
                    }
                }
                grams
            }
        };

        for filter in &self.filters {
            tokens = match filter {
                TokenFilter::Lowercase => {
                    tokens.into_iter().map(|t| t.to_lowercase()).collect()
                }
                TokenFilter::Stopwords(stopwords) => tokens
                    .into_iter()
                    .filter(|t| !stopwords.contains(t))
                    .collect(),
                TokenFilter::MinLength(min) => {
                    tokens.into_iter().filter(|t| t.chars().count() >= *min).collect()
                }
                TokenFilter::MaxLength(max) => {
                    tokens.into_iter().filter(|t| t.chars().count() <= *max).collect()
                }
                TokenFilter::Trim => tokens
                    .into_iter()
                    .map(|t| t.trim().to_string())
                    .filter(|t| !t.is_empty())
                    .collect(),
                TokenFilter::Unique => {
                    let mut seen = HashSet::new();
                    tokens.into_iter().filter(|t| seen.insert(t.clone())).collect()
                }
            };
        }
        tokens
    }
}
