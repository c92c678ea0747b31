//! Deterministic collaborators for unit tests

use crate::catalog::Catalog;
use async_trait::async_trait;
use half::f16;
use medcode_embed::{EmbedError, EmbeddingProvider, EmbeddingResult};
use std::collections::HashMap;
use std::time::Duration;

pub(crate) fn v(values: &[f32]) -> Vec<f16> {
    values.iter().map(|x| f16::from_f32(*x)).collect()
}

/// Provider answering from a fixed text → vector table.
///
/// Unknown texts fail, and a batch containing one fails as a whole, which is
/// what a real provider does when one input breaks the request.
#[derive(Debug, Clone)]
pub(crate) struct FixedProvider {
    dimension: usize,
    vectors: HashMap<String, Vec<f16>>,
    delays: HashMap<String, Duration>,
}

impl FixedProvider {
    pub(crate) fn new(dimension: usize) -> Self {
        Self {
            dimension,
            vectors: HashMap::new(),
            delays: HashMap::new(),
        }
    }

    /// One vector per catalog entry, keyed by composite text.
    pub(crate) fn from_entries(catalog: &Catalog, vectors: Vec<Vec<f32>>) -> Self {
        let dimension = vectors.first().map(Vec::len).unwrap_or(1);
        catalog
            .iter()
            .zip(vectors)
            .fold(Self::new(dimension), |provider, (entry, vector)| {
                provider.with(&entry.composite_text(), &vector)
            })
    }

    pub(crate) fn with(mut self, text: &str, vector: &[f32]) -> Self {
        self.vectors.insert(text.to_string(), v(vector));
        self
    }

    /// Make embedding `text` take `delay`.
    pub(crate) fn slow(mut self, text: &str, delay: Duration) -> Self {
        self.delays.insert(text.to_string(), delay);
        self
    }
}

#[async_trait]
impl EmbeddingProvider for FixedProvider {
    async fn embed_text(&self, text: &str) -> medcode_embed::Result<Vec<f16>> {
        if let Some(delay) = self.delays.get(text) {
            tokio::time::sleep(*delay).await;
        }
        self.vectors.get(text).cloned().ok_or_else(|| {
            EmbedError::External {
                source: anyhow::anyhow!("no fixture vector for '{text}'"),
            }
        })
    }

    async fn embed_texts(&self, texts: &[String]) -> medcode_embed::Result<EmbeddingResult> {
        let mut embeddings = Vec::with_capacity(texts.len());
        for text in texts {
            embeddings.push(self.embed_text(text).await?);
        }
        Ok(EmbeddingResult::new(embeddings))
    }

    fn embedding_dimension(&self) -> usize {
        self.dimension
    }

    fn provider_name(&self) -> &str {
        "fixed"
    }
}
