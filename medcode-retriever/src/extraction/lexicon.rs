//! Dictionary-backed [`TermExtractor`].
//!
//! A lexicon is a JSON array of concepts, each with a preferred term and
//! optional aliases:
//!
//! ```json
//! [
//!   {"term": "acute bronchitis", "concept_id": "C0149514",
//!    "semantic_types": ["T047"], "score": 0.98, "aliases": ["chest cold"]}
//! ]
//! ```
//!
//! Matching is case-insensitive on whole words. Where surface forms overlap,
//! the longest one starting at the earliest position wins, and matches never
//! overlap each other.

use super::{ConceptTypes, ExtractedTerm, TermExtractor};
use crate::error::{Result, RetrievalError};
use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info, warn};

fn default_score() -> f32 {
    1.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LexiconEntry {
    pub term: String,
    pub concept_id: String,
    #[serde(default)]
    pub semantic_types: Vec<String>,
    #[serde(default = "default_score")]
    pub score: f32,
    #[serde(default)]
    pub aliases: Vec<String>,
}

impl LexiconEntry {
    pub fn new(term: impl Into<String>, concept_id: impl Into<String>) -> Self {
        Self {
            term: term.into(),
            concept_id: concept_id.into(),
            semantic_types: Vec::new(),
            score: default_score(),
            aliases: Vec::new(),
        }
    }

    pub fn with_semantic_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.semantic_types = types.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_score(mut self, score: f32) -> Self {
        self.score = score;
        self
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.aliases.push(alias.into());
        self
    }
}

#[derive(Debug, Clone)]
pub struct LexiconExtractor {
    entries: Vec<LexiconEntry>,
    /// normalized surface form -> entry position
    surfaces: HashMap<String, usize>,
    /// concept id -> entry position
    concepts: HashMap<String, usize>,
    pattern: Option<Regex>,
}

impl LexiconExtractor {
    pub fn new(entries: Vec<LexiconEntry>) -> Result<Self> {
        let mut surfaces: HashMap<String, usize> = HashMap::new();
        let mut concepts = HashMap::new();

        for (position, entry) in entries.iter().enumerate() {
            if entry.concept_id.trim().is_empty() {
                return Err(RetrievalError::extraction(format!(
                    "lexicon entry '{}' has no concept id",
                    entry.term
                )));
            }
            concepts.entry(entry.concept_id.clone()).or_insert(position);

            for surface in std::iter::once(&entry.term).chain(&entry.aliases) {
                let key = normalize(surface);
                if key.is_empty() {
                    warn!("Skipping empty surface form for {}", entry.concept_id);
                    continue;
                }
                if let Some(&previous) = surfaces.get(&key) {
                    debug!(
                        "Surface '{}' already maps to {}, ignoring it for {}",
                        key, entries[previous].concept_id, entry.concept_id
                    );
                    continue;
                }
                surfaces.insert(key, position);
            }
        }

        let pattern = build_pattern(surfaces.keys())?;
        Ok(Self {
            entries,
            surfaces,
            concepts,
            pattern,
        })
    }

    /// Load a JSON lexicon file.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = tokio::fs::read_to_string(path).await?;
        let entries: Vec<LexiconEntry> = serde_json::from_str(&raw).map_err(|e| {
            RetrievalError::extraction(format!("invalid lexicon {}: {e}", path.display()))
        })?;
        let extractor = Self::new(entries)?;
        info!(
            "Loaded lexicon with {} concepts ({} surface forms) from {}",
            extractor.entries.len(),
            extractor.surfaces.len(),
            path.display()
        );
        Ok(extractor)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Synchronous core of [`TermExtractor::extract`].
    pub fn find_terms(&self, text: &str) -> Vec<ExtractedTerm> {
        let Some(pattern) = &self.pattern else {
            return Vec::new();
        };

        pattern
            .find_iter(text)
            .filter_map(|found| {
                let Some(&position) = self.surfaces.get(&normalize(found.as_str())) else {
                    debug!("Match '{}' has no lexicon entry", found.as_str());
                    return None;
                };
                let entry = &self.entries[position];
                Some(ExtractedTerm::new(
                    found.as_str(),
                    self.category_of(&entry.concept_id),
                    entry.concept_id.clone(),
                    entry.score,
                ))
            })
            .collect()
    }
}

impl ConceptTypes for LexiconExtractor {
    fn semantic_types(&self, concept_id: &str) -> Option<&[String]> {
        self.concepts
            .get(concept_id)
            .map(|&position| self.entries[position].semantic_types.as_slice())
    }
}

#[async_trait]
impl TermExtractor for LexiconExtractor {
    async fn extract(&self, text: &str) -> Result<Vec<ExtractedTerm>> {
        let terms = self.find_terms(text);
        debug!("Extracted {} terms", terms.len());
        Ok(terms)
    }
}

/// Lowercase with runs of whitespace collapsed to one space.
fn normalize(surface: &str) -> String {
    surface
        .split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Case-insensitive alternation over every surface form, longest first so
/// the leftmost-first engine prefers the longest phrase at a position.
fn build_pattern<'a>(surfaces: impl Iterator<Item = &'a String>) -> Result<Option<Regex>> {
    let mut surfaces: Vec<&String> = surfaces.collect();
    if surfaces.is_empty() {
        return Ok(None);
    }
    surfaces.sort_by(|a, b| {
        b.chars()
            .count()
            .cmp(&a.chars().count())
            .then_with(|| a.cmp(b))
    });

    let alternatives: Vec<String> = surfaces
        .iter()
        .map(|surface| {
            let body = surface
                .split(' ')
                .map(regex::escape)
                .collect::<Vec<_>>()
                .join(r"\s+");
            let leading = surface.chars().next().is_some_and(is_word_char);
            let trailing = surface.chars().last().is_some_and(is_word_char);
            format!(
                "{}{}{}",
                if leading { r"\b" } else { "" },
                body,
                if trailing { r"\b" } else { "" }
            )
        })
        .collect();

    let pattern = format!("(?i)(?:{})", alternatives.join("|"));
    Regex::new(&pattern)
        .map(Some)
        .map_err(|e| RetrievalError::extraction(format!("lexicon pattern: {e}")))
}
