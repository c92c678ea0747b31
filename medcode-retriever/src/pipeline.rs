//! Free text in, candidate codes out.
//!
//! [`CodingAssistant`] chains a [`TermExtractor`] and a [`Retriever`]: the
//! extracted terms become the retrieval keywords.

use crate::error::{Result, RetrievalError};
use crate::extraction::{ExtractedTerm, TermExtractor};
use crate::retrieval::{RetrievalBatch, Retriever};
use itertools::Itertools;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

/// Outcome of one [`CodingAssistant::process`] call.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessingOutcome {
    /// Terms in text order, as the extractor returned them
    pub terms: Vec<ExtractedTerm>,
    /// `None` when nothing was extracted and retrieval was skipped
    pub results: Option<RetrievalBatch>,
}

impl ProcessingOutcome {
    pub fn has_terms(&self) -> bool {
        !self.terms.is_empty()
    }
}

#[derive(Clone)]
pub struct CodingAssistant {
    extractor: Arc<dyn TermExtractor>,
    retriever: Retriever,
}

impl CodingAssistant {
    pub fn new(extractor: Arc<dyn TermExtractor>, retriever: Retriever) -> Self {
        Self {
            extractor,
            retriever,
        }
    }

    pub fn retriever(&self) -> &Retriever {
        &self.retriever
    }

    /// Extract terms from `text` and retrieve candidates for each.
    ///
    /// # Errors
    /// - `InvalidQuery` for empty text
    /// - Whatever the extractor fails with; "no terms found" is not an error
    pub async fn process(&self, text: &str) -> Result<ProcessingOutcome> {
        if text.trim().is_empty() {
            return Err(RetrievalError::invalid_query("input text is empty"));
        }

        let terms = self.extractor.extract(text).await?;
        if terms.is_empty() {
            warn!("No medical terms found in input");
            return Ok(ProcessingOutcome {
                terms,
                results: None,
            });
        }
        info!(
            "Extracted {} terms: {}",
            terms.len(),
            terms.iter().map(|t| t.text.as_str()).join(", ")
        );

        let keywords: Vec<String> = terms.iter().map(|t| t.text.clone()).collect();
        let results = self.retriever.retrieve(keywords).await;
        Ok(ProcessingOutcome {
            terms,
            results: Some(results),
        })
    }
}
