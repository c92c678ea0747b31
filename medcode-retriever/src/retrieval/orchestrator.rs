//! Per-term retrieval over a shared catalog snapshot.
//!
//! A [`Retriever`] owns `Arc` handles to an immutable catalog, its embedding
//! index and literal matcher. Queries only read them, so one retriever can
//! serve any number of concurrent callers; rebuilding means constructing a
//! new retriever and swapping it in.

use super::{
    EmbeddingIndex, ExactMatch, KeyedResults, Keywords, LiteralMatcher, RetrievalBatch,
    RetrievalStage, SemanticMatch, TermFailure, TermResults,
};
use crate::catalog::Catalog;
use crate::error::{Result, RetrievalError};
use futures::future::join_all;
use half::f16;
use medcode_embed::{EmbedError, EmbeddingProvider};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const DEFAULT_TOP_K: usize = 3;

/// Knobs applied to every query of a [`Retriever`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrievalOptions {
    /// Results kept per term and per strategy
    pub top_k: usize,
    /// Deadline for each embedding call; `None` waits indefinitely.
    ///
    /// A failed batch is retried term by term, each retry with a fresh
    /// deadline, so one query can wait up to twice this long.
    pub embed_timeout: Option<Duration>,
}

impl Default for RetrievalOptions {
    fn default() -> Self {
        Self {
            top_k: DEFAULT_TOP_K,
            embed_timeout: None,
        }
    }
}

impl RetrievalOptions {
    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    pub fn with_embed_timeout(mut self, timeout: Duration) -> Self {
        self.embed_timeout = Some(timeout);
        self
    }
}

/// Semantic plus literal retrieval for batches of query terms.
#[derive(Clone)]
pub struct Retriever {
    catalog: Arc<Catalog>,
    index: Arc<EmbeddingIndex>,
    matcher: Arc<LiteralMatcher>,
    provider: Arc<dyn EmbeddingProvider>,
    options: RetrievalOptions,
}

impl std::fmt::Debug for Retriever {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Retriever")
            .field("catalog", &self.catalog.source_name())
            .field("entries", &self.catalog.len())
            .field("model", &self.index.model_id())
            .field("options", &self.options)
            .finish()
    }
}

impl Retriever {
    /// Assemble a retriever from an already built index.
    ///
    /// # Errors
    /// - `IndexOutOfRange` if the index and catalog differ in length
    /// - `Embedding` if the provider's dimension differs from the index
    /// - `InvalidQuery` if `options.top_k` is zero
    pub fn new(
        catalog: Arc<Catalog>,
        index: Arc<EmbeddingIndex>,
        provider: Arc<dyn EmbeddingProvider>,
        options: RetrievalOptions,
    ) -> Result<Self> {
        if index.len() != catalog.len() {
            return Err(RetrievalError::IndexOutOfRange {
                index: index.len().max(catalog.len()).saturating_sub(1),
                len: index.len().min(catalog.len()),
            });
        }
        if !index.is_empty() && index.dimension() != provider.embedding_dimension() {
            return Err(EmbedError::DimensionMismatch {
                expected: index.dimension(),
                actual: provider.embedding_dimension(),
            }
            .into());
        }
        if options.top_k == 0 {
            return Err(RetrievalError::invalid_query("top_k must be at least 1"));
        }

        let matcher = Arc::new(LiteralMatcher::new(&catalog));
        Ok(Self {
            catalog,
            index,
            matcher,
            provider,
            options,
        })
    }

    /// Build the index for `catalog` (or load it from `cache_path`) and
    /// return a ready retriever.
    ///
    /// # Arguments
    /// * `catalog` - Loaded reference table
    /// * `provider` - Embedding collaborator used for both the index and queries
    /// * `batch_size` - Entries per provider call while building
    /// * `cache_path` - Optional on-disk index cache
    ///
    /// # Errors
    /// Any failure building the index. Nothing can be served without it.
    pub async fn build(
        catalog: Arc<Catalog>,
        provider: Arc<dyn EmbeddingProvider>,
        batch_size: usize,
        cache_path: Option<&Path>,
        options: RetrievalOptions,
    ) -> Result<Self> {
        let index =
            EmbeddingIndex::build_or_load(&catalog, provider.as_ref(), batch_size, cache_path)
                .await?;
        info!(
            "Retriever ready: {} entries from {}",
            catalog.len(),
            catalog.source_name()
        );
        Self::new(catalog, Arc::new(index), provider, options)
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    pub fn index(&self) -> &Arc<EmbeddingIndex> {
        &self.index
    }

    pub fn options(&self) -> &RetrievalOptions {
        &self.options
    }

    /// Semantic and literal results for every unique term.
    ///
    /// Keys follow the order in which terms first appear. A term that fails
    /// in one strategy keeps the other strategy's results and gets a
    /// [`TermFailure`] entry; it never aborts the batch.
    pub async fn retrieve(&self, keywords: impl Into<Keywords>) -> RetrievalBatch {
        let terms = Into::<Keywords>::into(keywords).unique();
        let mut batch = RetrievalBatch::default();
        if terms.is_empty() {
            return batch;
        }
        debug!("Retrieving {} unique terms", terms.len());

        let embeddings = self.embed_terms(&terms).await;
        for (term, embedding) in terms.into_iter().zip(embeddings) {
            let semantic = self.semantic_for(&term, embedding, &mut batch);
            let exact = self.exact_for(&term, &mut batch);
            batch.push(term, TermResults { semantic, exact });
        }
        batch
    }

    /// Semantic matches only, keyed by term.
    pub async fn semantic_search(
        &self,
        keywords: impl Into<Keywords>,
    ) -> KeyedResults<Vec<SemanticMatch>> {
        let terms = Into::<Keywords>::into(keywords).unique();
        let mut results = KeyedResults::default();
        let embeddings = self.embed_terms(&terms).await;
        for (term, embedding) in terms.into_iter().zip(embeddings) {
            let semantic = self.semantic_for(&term, embedding, &mut results);
            results.push(term, semantic);
        }
        results
    }

    /// Literal matches only, keyed by term. Never calls the embedding provider.
    pub fn exact_match(&self, keywords: impl Into<Keywords>) -> KeyedResults<Vec<ExactMatch>> {
        self.matcher
            .search_terms(&self.catalog, keywords, self.options.top_k)
    }

    fn semantic_for<V>(
        &self,
        term: &str,
        embedding: Result<Vec<f16>>,
        diagnostics: &mut KeyedResults<V>,
    ) -> Vec<SemanticMatch> {
        let query = match embedding {
            Ok(query) => query,
            Err(e) => {
                let stage = match e {
                    RetrievalError::InvalidQuery { .. } => RetrievalStage::Validation,
                    _ => RetrievalStage::Embedding,
                };
                diagnostics.record_failure(TermFailure::new(term, stage, e));
                return Vec::new();
            }
        };

        let hits = self
            .index
            .nearest(&query, self.options.top_k)
            .and_then(|hits| {
                hits.into_iter()
                    .map(|(position, score)| {
                        Ok(SemanticMatch::new(self.catalog.get(position)?, score))
                    })
                    .collect::<Result<Vec<_>>>()
            });
        match hits {
            Ok(matches) => matches,
            Err(e) => {
                diagnostics.record_failure(TermFailure::new(term, RetrievalStage::Semantic, e));
                Vec::new()
            }
        }
    }

    fn exact_for<V>(&self, term: &str, diagnostics: &mut KeyedResults<V>) -> Vec<ExactMatch> {
        self.matcher
            .search_recorded(&self.catalog, term, self.options.top_k, diagnostics)
    }

    /// One embedding result per term, in term order.
    ///
    /// Valid terms go to the provider in a single batch. If that call fails,
    /// times out or returns the wrong number of vectors, every term is
    /// embedded on its own (concurrently) so a bad term only fails itself.
    /// The retries run in parallel under one more deadline.
    async fn embed_terms(&self, terms: &[String]) -> Vec<Result<Vec<f16>>> {
        let valid: Vec<String> = terms
            .iter()
            .filter(|t| !t.trim().is_empty())
            .cloned()
            .collect();

        let embedded: Vec<Result<Vec<f16>>> = if valid.is_empty() {
            Vec::new()
        } else {
            match self.embed_batch(&valid).await {
                Ok(vectors) => vectors.into_iter().map(Ok).collect(),
                Err(e) => {
                    warn!(
                        "Batch embedding of {} terms failed ({}), retrying one by one",
                        valid.len(),
                        e
                    );
                    join_all(valid.iter().map(|term| self.embed_one(term))).await
                }
            }
        };
        let mut embedded = embedded.into_iter();

        terms
            .iter()
            .map(|term| {
                if term.trim().is_empty() {
                    Err(RetrievalError::invalid_query("search term is empty"))
                } else {
                    embedded.next().unwrap_or_else(|| {
                        Err(EmbedError::CountMismatch {
                            expected: valid.len(),
                            actual: valid.len().saturating_sub(1),
                        }
                        .into())
                    })
                }
            })
            .collect()
    }

    async fn embed_batch(&self, terms: &[String]) -> Result<Vec<Vec<f16>>> {
        let result = self
            .with_deadline(self.provider.embed_texts(terms))
            .await?;
        if result.len() != terms.len() {
            return Err(EmbedError::CountMismatch {
                expected: terms.len(),
                actual: result.len(),
            }
            .into());
        }
        Ok(result.embeddings)
    }

    async fn embed_one(&self, term: &str) -> Result<Vec<f16>> {
        self.with_deadline(self.provider.embed_text(term)).await
    }

    async fn with_deadline<T>(
        &self,
        call: impl Future<Output = medcode_embed::Result<T>>,
    ) -> Result<T> {
        match self.options.embed_timeout {
            Some(limit) => match tokio::time::timeout(limit, call).await {
                Ok(result) => Ok(result?),
                Err(_) => Err(RetrievalError::Timeout {
                    millis: limit.as_millis() as u64,
                }),
            },
            None => Ok(call.await?),
        }
    }
}
