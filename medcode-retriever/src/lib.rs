//! medcode-retriever: candidate billing codes for clinical terms
//!
//! Loads a reference table of coded entries (ICD-10 style `CODE`,
//! `Medical term`, `Description`) and answers, per query term, with the
//! top-k entries by embedding similarity and the top-k entries containing
//! the term literally.
//!
//! ## Key Modules
//!
//! - **[`catalog`]**: the reference table
//! - **[`retrieval`]**: embedding index, literal matcher and the [`Retriever`]
//! - **[`extraction`]**: extracted-term types, the [`TermExtractor`] contract,
//!   semantic type categories and a lexicon-based extractor
//! - **[`pipeline`]**: text → terms → candidates
//! - **[`config`]**: TOML configuration
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use medcode_retriever::{Catalog, RetrievalOptions, Retriever};
//! use medcode_embed::HashingProvider;
//! use std::sync::Arc;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let catalog = Arc::new(Catalog::load("Section111ValidICD10-Jan2024.csv")?);
//! let provider = Arc::new(HashingProvider::default());
//! let retriever =
//!     Retriever::build(catalog, provider, 64, None, RetrievalOptions::default()).await?;
//!
//! let batch = retriever.retrieve(vec!["bronchitis", "fever"]).await;
//! for (term, results) in batch.iter() {
//!     println!("{term}: {} semantic, {} exact", results.semantic.len(), results.exact.len());
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! text → TermExtractor → terms ─┬→ EmbeddingIndex (via EmbeddingProvider) ─┐
//!                               └→ LiteralMatcher ─────────────────────────┴→ RetrievalBatch
//! ```

pub mod catalog;
pub mod config;
pub mod error;
pub mod extraction;
pub mod pipeline;
pub mod retrieval;

pub use catalog::{Catalog, CatalogEntry};
pub use config::RetrieverConfig;
pub use error::{Result, RetrievalError};
pub use extraction::{Category, ConceptTypes, ExtractedTerm, TermExtractor};
pub use pipeline::{CodingAssistant, ProcessingOutcome};
pub use retrieval::{
    ExactMatch, KeyedResults, Keywords, MatchColumn, RetrievalBatch, RetrievalOptions,
    RetrievalStage, Retriever, SemanticMatch, TermFailure, TermResults,
};
