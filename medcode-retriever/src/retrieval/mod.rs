//! Retrieval engine: embedding index, literal matcher and the orchestrator
//! that runs both per query term.
//!
//! ```text
//! terms ─┬─ EmbeddingProvider → EmbeddingIndex::nearest ─┐
//!        └─ LiteralMatcher::search ──────────────────────┴─ KeyedResults
//! ```

pub mod embedding_index;
pub mod literal_matcher;
pub mod orchestrator;

#[cfg(test)]
pub(crate) mod test_support;

pub use embedding_index::EmbeddingIndex;
pub use literal_matcher::LiteralMatcher;
pub use orchestrator::{RetrievalOptions, Retriever};

use crate::catalog::CatalogEntry;
use itertools::Itertools;
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;

/// Catalog column a literal match was found in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MatchColumn {
    Code,
    Label,
    Description,
}

impl MatchColumn {
    pub const ALL: [MatchColumn; 3] = [Self::Code, Self::Label, Self::Description];

    pub(crate) fn ordinal(self) -> usize {
        match self {
            Self::Code => 0,
            Self::Label => 1,
            Self::Description => 2,
        }
    }

    pub fn text(self, entry: &CatalogEntry) -> &str {
        match self {
            Self::Code => &entry.code,
            Self::Label => &entry.label,
            Self::Description => &entry.description,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Code => "CODE",
            Self::Label => "LABEL",
            Self::Description => "DESCRIPTION",
        }
    }
}

impl fmt::Display for MatchColumn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SemanticMatch {
    #[serde(rename = "CODE")]
    pub code: String,
    #[serde(rename = "Medical term")]
    pub label: String,
    #[serde(rename = "Description")]
    pub description: String,
    #[serde(rename = "Similarity")]
    pub similarity: f32,
}

impl SemanticMatch {
    pub fn new(entry: &CatalogEntry, similarity: f32) -> Self {
        Self {
            code: entry.code.clone(),
            label: entry.label.clone(),
            description: entry.description.clone(),
            similarity,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExactMatch {
    #[serde(rename = "CODE")]
    pub code: String,
    #[serde(rename = "Medical term")]
    pub label: String,
    #[serde(rename = "Description")]
    pub description: String,
    #[serde(rename = "Matched Column")]
    pub matched_column: MatchColumn,
}

impl ExactMatch {
    pub fn new(entry: &CatalogEntry, matched_column: MatchColumn) -> Self {
        Self {
            code: entry.code.clone(),
            label: entry.label.clone(),
            description: entry.description.clone(),
            matched_column,
        }
    }

    /// Text of the column the term was found in
    pub fn matched_text(&self) -> &str {
        match self.matched_column {
            MatchColumn::Code => &self.code,
            MatchColumn::Label => &self.label,
            MatchColumn::Description => &self.description,
        }
    }
}

/// Both result lists for one term. Either may be empty.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TermResults {
    pub semantic: Vec<SemanticMatch>,
    pub exact: Vec<ExactMatch>,
}

/// Where in the per-term pipeline a failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalStage {
    /// The term itself was rejected before any search ran
    Validation,
    Embedding,
    Semantic,
    Literal,
}

/// Diagnostic recorded when one term could not be fully processed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TermFailure {
    pub term: String,
    pub stage: RetrievalStage,
    pub message: String,
}

impl TermFailure {
    pub fn new(term: &str, stage: RetrievalStage, error: impl fmt::Display) -> Self {
        Self {
            term: term.to_string(),
            stage,
            message: error.to_string(),
        }
    }
}

impl fmt::Display for TermFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "'{}' failed at {:?}: {}", self.term, self.stage, self.message)
    }
}

/// Ordered term → value mapping plus the diagnostics gathered while
/// producing it.
///
/// Keys are the unique input terms in order of first appearance. A term
/// with a failure still has an entry (with whatever could be computed), so
/// "nothing found" and "search failed" are told apart through
/// [`KeyedResults::failures`], never through missing keys.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyedResults<V> {
    entries: Vec<(String, V)>,
    failures: Vec<TermFailure>,
}

/// Result of [`Retriever::retrieve`].
pub type RetrievalBatch = KeyedResults<TermResults>;

impl<V> Default for KeyedResults<V> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            failures: Vec::new(),
        }
    }
}

impl<V> KeyedResults<V> {
    pub(crate) fn push(&mut self, term: String, value: V) {
        self.entries.push((term, value));
    }

    pub(crate) fn record_failure(&mut self, failure: TermFailure) {
        tracing::warn!("{}", failure);
        self.failures.push(failure);
    }

    pub fn get(&self, term: &str) -> Option<&V> {
        self.entries
            .iter()
            .find(|(key, _)| key == term)
            .map(|(_, value)| value)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(key, _)| key.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &V)> {
        self.entries.iter().map(|(key, value)| (key.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn failures(&self) -> &[TermFailure] {
        &self.failures
    }

    pub fn failures_for<'a>(&'a self, term: &'a str) -> impl Iterator<Item = &'a TermFailure> {
        self.failures.iter().filter(move |f| f.term == term)
    }

    /// Every term was processed without a recorded failure.
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn is_partial(&self) -> bool {
        !self.failures.is_empty()
    }

    pub fn into_entries(self) -> Vec<(String, V)> {
        self.entries
    }
}

impl<V: Serialize> Serialize for KeyedResults<V> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(2))?;
        map.serialize_entry("results", &OrderedEntries(&self.entries))?;
        map.serialize_entry("failures", &self.failures)?;
        map.end()
    }
}

struct OrderedEntries<'a, V>(&'a [(String, V)]);

impl<V: Serialize> Serialize for OrderedEntries<'_, V> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_map(self.0.iter().map(|(key, value)| (key, value)))
    }
}

/// One or many query terms.
///
/// Lets the search APIs take a single `&str` as well as any list of strings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Keywords(Vec<String>);

impl Keywords {
    pub fn into_vec(self) -> Vec<String> {
        self.0
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    /// Terms with duplicates removed, first appearance kept.
    pub fn unique(self) -> Vec<String> {
        self.0.into_iter().unique().collect()
    }
}

impl From<&str> for Keywords {
    fn from(term: &str) -> Self {
        Self(vec![term.to_string()])
    }
}

impl From<String> for Keywords {
    fn from(term: String) -> Self {
        Self(vec![term])
    }
}

impl From<Vec<String>> for Keywords {
    fn from(terms: Vec<String>) -> Self {
        Self(terms)
    }
}

impl From<&[String]> for Keywords {
    fn from(terms: &[String]) -> Self {
        Self(terms.to_vec())
    }
}

impl From<Vec<&str>> for Keywords {
    fn from(terms: Vec<&str>) -> Self {
        Self(terms.into_iter().map(str::to_string).collect())
    }
}

impl<const N: usize> From<[&str; N]> for Keywords {
    fn from(terms: [&str; N]) -> Self {
        Self(terms.into_iter().map(str::to_string).collect())
    }
}

impl<S: Into<String>> FromIterator<S> for Keywords {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}
