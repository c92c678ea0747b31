//! Case-insensitive substring matching over the catalog's text columns.
//!
//! Each of CODE, LABEL and DESCRIPTION is searched on its own, and an entry
//! matching in several columns produces one [`ExactMatch`] per column.
//! Matches are ranked by the character length of the matched column's text,
//! shortest first; equal lengths fall back to catalog order, then column order.

use super::{ExactMatch, KeyedResults, Keywords, MatchColumn, RetrievalStage, TermFailure};
use crate::catalog::Catalog;
use crate::error::{Result, RetrievalError};
use tracing::debug;

/// Lowercased copies of the searchable columns, built once per catalog.
#[derive(Debug, Clone, Default)]
pub struct LiteralMatcher {
    folded: Vec<[String; 3]>,
}

impl LiteralMatcher {
    pub fn new(catalog: &Catalog) -> Self {
        let folded = catalog
            .iter()
            .map(|entry| {
                [
                    entry.code.to_lowercase(),
                    entry.label.to_lowercase(),
                    entry.description.to_lowercase(),
                ]
            })
            .collect();
        Self { folded }
    }

    pub fn len(&self) -> usize {
        self.folded.len()
    }

    pub fn is_empty(&self) -> bool {
        self.folded.is_empty()
    }

    /// Up to `k` column matches for `term` in `catalog`, ranked as described
    /// in the module docs. The matcher must have been built from the same catalog.
    pub fn search(&self, catalog: &Catalog, term: &str, k: usize) -> Result<Vec<ExactMatch>> {
        if term.trim().is_empty() {
            return Err(RetrievalError::invalid_query("search term is empty"));
        }
        if k == 0 {
            return Err(RetrievalError::invalid_query("k must be at least 1"));
        }
        if self.folded.len() != catalog.len() {
            return Err(RetrievalError::IndexOutOfRange {
                index: self.folded.len().max(catalog.len()) - 1,
                len: self.folded.len().min(catalog.len()),
            });
        }

        let needle = term.to_lowercase();

        // (matched length, entry position, column)
        let mut hits: Vec<(usize, usize, MatchColumn)> = Vec::new();
        for (position, columns) in self.folded.iter().enumerate() {
            for column in MatchColumn::ALL {
                let haystack = &columns[column.ordinal()];
                if !haystack.is_empty() && haystack.contains(&needle) {
                    let entry = catalog.get(position)?;
                    hits.push((column.text(entry).chars().count(), position, column));
                }
            }
        }
        debug!("Literal search '{}' hit {} columns", term, hits.len());

        hits.sort_by_key(|&(length, position, column)| (length, position, column.ordinal()));
        hits.truncate(k);

        hits.into_iter()
            .map(|(_, position, column)| {
                let entry = catalog.get(position)?;
                Ok(ExactMatch::new(entry, column))
            })
            .collect()
    }

    /// Matches for every unique term, keyed in first-appearance order.
    ///
    /// A term that cannot be searched (blank, say) gets an empty list and a
    /// [`TermFailure`]; the other terms are unaffected.
    pub fn search_terms(
        &self,
        catalog: &Catalog,
        keywords: impl Into<Keywords>,
        k: usize,
    ) -> KeyedResults<Vec<ExactMatch>> {
        let mut results = KeyedResults::default();
        for term in Into::<Keywords>::into(keywords).unique() {
            let matches = self.search_recorded(catalog, &term, k, &mut results);
            results.push(term, matches);
        }
        results
    }

    /// [`search`](Self::search) with the error recorded in `diagnostics`
    /// instead of returned.
    pub(crate) fn search_recorded<V>(
        &self,
        catalog: &Catalog,
        term: &str,
        k: usize,
        diagnostics: &mut KeyedResults<V>,
    ) -> Vec<ExactMatch> {
        match self.search(catalog, term, k) {
            Ok(matches) => matches,
            Err(e) => {
                let stage = match e {
                    RetrievalError::InvalidQuery { .. } => RetrievalStage::Validation,
                    _ => RetrievalStage::Literal,
                };
                diagnostics.record_failure(TermFailure::new(term, stage, e));
                Vec::new()
            }
        }
    }
}

/// One-shot search without a prebuilt matcher.
pub fn search(catalog: &Catalog, term: &str, k: usize) -> Result<Vec<ExactMatch>> {
    LiteralMatcher::new(catalog).search(catalog, term, k)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::CatalogEntry;

    fn sample() -> Catalog {
        Catalog::from_entries(vec![
            CatalogEntry::new("J20.9", "Acute bronchitis", "Acute bronchitis, unspecified"),
            CatalogEntry::new("R50.9", "Fever", "Fever, unspecified"),
            CatalogEntry::new("R50.81", "Fever presenting with conditions", "Fever presenting with conditions classified elsewhere"),
            CatalogEntry::new("A01.0", "Typhoid fever", ""),
        ])
    }

    fn columns(matches: &[ExactMatch]) -> Vec<(String, MatchColumn)> {
        matches
            .iter()
            .map(|m| (m.code.clone(), m.matched_column))
            .collect()
    }

    #[test]
    fn test_case_insensitive() {
        let catalog = sample();
        let lower = search(&catalog, "fever", 10).unwrap();
        let upper = search(&catalog, "FEVER", 10).unwrap();
        assert_eq!(lower, upper);
        assert!(!lower.is_empty());
    }

    #[test]
    fn test_one_record_per_matching_column() {
        let catalog = sample();
        let matches = search(&catalog, "bronchitis", 3).unwrap();
        assert_eq!(
            columns(&matches),
            vec![
                ("J20.9".to_string(), MatchColumn::Label),
                ("J20.9".to_string(), MatchColumn::Description),
            ]
        );
    }

    #[test]
    fn test_shorter_match_ranks_first() {
        let catalog = sample();
        let matches = search(&catalog, "fever", 10).unwrap();
        let lengths: Vec<usize> = matches
            .iter()
            .map(|m| m.matched_text().chars().count())
            .collect();
        assert!(lengths.windows(2).all(|w| w[0] <= w[1]), "{lengths:?}");
        // "Fever" (5) beats "Typhoid fever" (13)
        assert_eq!(matches[0].code, "R50.9");
        assert_eq!(matches[0].matched_column, MatchColumn::Label);
        assert_eq!(matches[1].code, "A01.0");
    }

    #[test]
    fn test_equal_lengths_keep_catalog_order() {
        let catalog = Catalog::from_entries(vec![
            CatalogEntry::new("B2", "cough", "x"),
            CatalogEntry::new("A1", "Cough", "y"),
        ]);
        let matches = search(&catalog, "cough", 5).unwrap();
        assert_eq!(matches[0].code, "B2");
        assert_eq!(matches[1].code, "A1");
    }

    #[test]
    fn test_truncates_to_k() {
        let catalog = sample();
        assert_eq!(search(&catalog, "fever", 2).unwrap().len(), 2);
        assert_eq!(search(&catalog, "unspecified", 1).unwrap().len(), 1);
    }

    #[test]
    fn test_code_column_matches() {
        let catalog = sample();
        let matches = search(&catalog, "r50", 5).unwrap();
        assert_eq!(
            columns(&matches),
            vec![
                ("R50.9".to_string(), MatchColumn::Code),
                ("R50.81".to_string(), MatchColumn::Code),
            ]
        );
    }

    #[test]
    fn test_empty_fields_never_match() {
        let catalog = sample();
        // A01.0 has an empty description; it only matches through its label
        let matches = search(&catalog, "typhoid", 5).unwrap();
        assert_eq!(columns(&matches), vec![("A01.0".to_string(), MatchColumn::Label)]);
    }

    #[test]
    fn test_no_match_is_empty_not_error() {
        assert!(search(&sample(), "fracture", 3).unwrap().is_empty());
    }

    #[test]
    fn test_empty_term_rejected() {
        let catalog = sample();
        assert!(matches!(
            search(&catalog, "", 3),
            Err(RetrievalError::InvalidQuery { .. })
        ));
        assert!(matches!(
            search(&catalog, "   ", 3),
            Err(RetrievalError::InvalidQuery { .. })
        ));
    }

    #[test]
    fn test_term_is_not_a_pattern() {
        let catalog = Catalog::from_entries(vec![CatalogEntry::new("J20.9", "Bronchitis", "")]);
        assert!(search(&catalog, "J20.", 3).unwrap().len() == 1);
        assert!(search(&catalog, "J2.*", 3).unwrap().is_empty());
    }

    #[test]
    fn test_blank_term_fails_alone() {
        let catalog = sample();
        let matcher = LiteralMatcher::new(&catalog);
        let results = matcher.search_terms(&catalog, ["fever", "  ", "typhoid", "fever"], 3);

        assert_eq!(results.keys().collect::<Vec<_>>(), vec!["fever", "  ", "typhoid"]);
        assert_eq!(results.get("fever").unwrap()[0].code, "R50.9");
        assert_eq!(results.get("typhoid").unwrap()[0].code, "A01.0");
        assert!(results.get("  ").unwrap().is_empty());

        let failures: Vec<_> = results.failures_for("  ").collect();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].stage, RetrievalStage::Validation);
        assert!(results.failures_for("fever").next().is_none());
    }

    #[test]
    fn test_matcher_from_other_catalog_rejected() {
        let matcher = LiteralMatcher::new(&sample());
        let other = Catalog::from_entries(vec![CatalogEntry::new("X", "fever", "")]);
        assert!(matches!(
            matcher.search(&other, "fever", 3),
            Err(RetrievalError::IndexOutOfRange { .. })
        ));
    }
}
