//! Deterministic feature-hashing provider.
//!
//! Produces dense vectors by hashing lowercase word tokens into a fixed
//! number of signed buckets and L2-normalizing the result. It needs no model
//! files, so it serves offline runs and tests. Texts sharing words land close
//! together; it carries no deeper semantics than that.

use crate::error::{EmbedError, Result};
use crate::provider::{EmbeddingProvider, EmbeddingResult, to_f16};
use async_trait::async_trait;
use fnv::FnvHasher;
use half::f16;
use std::hash::Hasher;

pub const DEFAULT_HASHING_DIMENSION: usize = 256;

#[derive(Debug, Clone)]
pub struct HashingProvider {
    dimension: usize,
}

impl HashingProvider {
    pub fn new(dimension: usize) -> Result<Self> {
        if dimension == 0 {
            return Err(EmbedError::invalid_config(
                "hashing provider dimension must be positive",
            ));
        }
        Ok(Self { dimension })
    }

    fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
        text.split(|c: char| !c.is_alphanumeric())
            .filter(|s| !s.is_empty())
            .map(|s| s.to_lowercase())
    }

    fn vector(&self, text: &str) -> Vec<f16> {
        let mut dense = vec![0.0f32; self.dimension];
        for token in Self::tokens(text) {
            let mut hasher = FnvHasher::default();
            hasher.write(token.as_bytes());
            let hash = hasher.finish();
            let bucket = (hash % self.dimension as u64) as usize;
            // top bit picks the sign so collisions partly cancel
            let sign = if hash >> 63 == 0 { 1.0 } else { -1.0 };
            dense[bucket] += sign;
        }
        to_f16(&dense, true)
    }
}

impl Default for HashingProvider {
    fn default() -> Self {
        Self {
            dimension: DEFAULT_HASHING_DIMENSION,
        }
    }
}

#[async_trait]
impl EmbeddingProvider for HashingProvider {
    async fn embed_text(&self, text: &str) -> Result<Vec<f16>> {
        Ok(self.vector(text))
    }

    async fn embed_texts(&self, texts: &[String]) -> Result<EmbeddingResult> {
        Ok(EmbeddingResult::new(
            texts.iter().map(|text| self.vector(text)).collect(),
        ))
    }

    fn embedding_dimension(&self) -> usize {
        self.dimension
    }

    fn provider_name(&self) -> &str {
        "hashing"
    }

    fn model_id(&self) -> String {
        format!("hashing:{}", self.dimension)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dot(a: &[f16], b: &[f16]) -> f32 {
        a.iter().zip(b).map(|(x, y)| x.to_f32() * y.to_f32()).sum()
    }

    #[tokio::test]
    async fn test_deterministic_and_normalized() -> Result<()> {
        let provider = HashingProvider::new(64)?;
        let a = provider.embed_text("Acute bronchitis").await?;
        let b = provider.embed_text("acute BRONCHITIS").await?;

        assert_eq!(a.len(), 64);
        assert_eq!(a, b);
        assert!((dot(&a, &a) - 1.0).abs() < 1e-2);
        Ok(())
    }

    #[tokio::test]
    async fn test_shared_words_score_higher() -> Result<()> {
        let provider = HashingProvider::default();
        let texts = vec![
            "bronchitis".to_string(),
            "J20.9 Acute bronchitis Acute bronchitis, unspecified".to_string(),
            "S72.0 Fracture of head of femur".to_string(),
        ];
        let result = provider.embed_texts(&texts).await?;
        assert_eq!(result.len(), 3);
        assert_eq!(result.dimension, DEFAULT_HASHING_DIMENSION);

        let related = dot(&result.embeddings[0], &result.embeddings[1]);
        let unrelated = dot(&result.embeddings[0], &result.embeddings[2]);
        assert!(related > unrelated);
        Ok(())
    }

    #[tokio::test]
    async fn test_empty_text_is_zero_vector() -> Result<()> {
        let provider = HashingProvider::new(8)?;
        let v = provider.embed_text("  ,, ").await?;
        assert!(v.iter().all(|x| x.to_f32() == 0.0));
        Ok(())
    }

    #[test]
    fn test_zero_dimension_rejected() {
        assert!(HashingProvider::new(0).is_err());
    }
}
