//! Clinical term extraction contract and its supporting types.
//!
//! Real entity linking lives outside this crate. What the retrieval side
//! needs is the shape of its output ([`ExtractedTerm`]), the trait it is
//! called through ([`TermExtractor`]) and the mapping from semantic type
//! codes to coarse categories ([`category`]).

pub mod category;
pub mod lexicon;

pub use category::Category;
pub use lexicon::{LexiconEntry, LexiconExtractor};

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// One recognised clinical term.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedTerm {
    #[serde(rename = "Term")]
    pub text: String,
    #[serde(rename = "Category")]
    pub category: Category,
    #[serde(rename = "UMLS Concept ID")]
    pub concept_id: String,
    /// Linker confidence in `[0, 1]`
    #[serde(rename = "Similarity Score")]
    pub score: f32,
}

impl ExtractedTerm {
    pub fn new(
        text: impl Into<String>,
        category: Category,
        concept_id: impl Into<String>,
        score: f32,
    ) -> Self {
        Self {
            text: text.into(),
            category,
            concept_id: concept_id.into(),
            score: score.clamp(0.0, 1.0),
        }
    }
}

/// Turns free clinical text into linked terms, in text order.
///
/// Returning an empty list means nothing was recognised; an `Err` means the
/// extractor itself failed. Callers treat the two differently.
#[async_trait]
pub trait TermExtractor: Send + Sync {
    async fn extract(&self, text: &str) -> Result<Vec<ExtractedTerm>>;
}

/// Knowledge-base lookup from a concept id to its semantic type codes.
pub trait ConceptTypes: Send + Sync {
    fn semantic_types(&self, concept_id: &str) -> Option<&[String]>;

    /// Category for a concept; unknown concepts are [`Category::Other`].
    fn category_of(&self, concept_id: &str) -> Category {
        self.semantic_types(concept_id)
            .map(category::resolve)
            .unwrap_or(Category::Other)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct Table(HashMap<String, Vec<String>>);

    impl ConceptTypes for Table {
        fn semantic_types(&self, concept_id: &str) -> Option<&[String]> {
            self.0.get(concept_id).map(Vec::as_slice)
        }
    }

    #[test]
    fn test_extracted_term_external_names() {
        let term = ExtractedTerm::new("bronchitis", Category::Disease, "C0006277", 0.97);
        let value = serde_json::to_value(&term).unwrap();
        assert_eq!(value["Term"], "bronchitis");
        assert_eq!(value["Category"], "DISEASE");
        assert_eq!(value["UMLS Concept ID"], "C0006277");
        assert!((value["Similarity Score"].as_f64().unwrap() - 0.97).abs() < 1e-6);
    }

    #[test]
    fn test_score_is_clamped() {
        assert_eq!(ExtractedTerm::new("x", Category::Other, "C1", 1.7).score, 1.0);
        assert_eq!(ExtractedTerm::new("x", Category::Other, "C1", -0.2).score, 0.0);
    }

    #[test]
    fn test_category_of_concept() {
        let table = Table(HashMap::from([(
            "C0015967".to_string(),
            vec!["T184".to_string(), "T047".to_string()],
        )]));
        assert_eq!(table.category_of("C0015967"), Category::Symptom);
        assert_eq!(table.category_of("C9999999"), Category::Other);
    }
}
