//! Provider selection from configuration

use crate::config::EmbedConfig;
use crate::error::Result;
use crate::hashing::{DEFAULT_HASHING_DIMENSION, HashingProvider};
use crate::provider::{EmbeddingProvider, FastEmbedProvider};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Which embedding provider to construct.
///
/// In TOML this is a table tagged by `kind`:
///
/// ```toml
/// [embedding]
/// kind = "fastembed"
/// model_name = "bge-small-en-v1.5"
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EmbeddingBackend {
    #[serde(rename = "fastembed")]
    FastEmbed(EmbedConfig),
    Hashing {
        #[serde(default = "default_hashing_dimension")]
        dimension: usize,
    },
}

fn default_hashing_dimension() -> usize {
    DEFAULT_HASHING_DIMENSION
}

impl Default for EmbeddingBackend {
    fn default() -> Self {
        Self::FastEmbed(EmbedConfig::default())
    }
}

impl EmbeddingBackend {
    /// Build and initialize the configured provider
    pub async fn create_provider(&self) -> Result<Arc<dyn EmbeddingProvider>> {
        match self {
            Self::FastEmbed(config) => {
                let provider = FastEmbedProvider::create(config.clone()).await?;
                Ok(Arc::new(provider))
            }
            Self::Hashing { dimension } => Ok(Arc::new(HashingProvider::new(*dimension)?)),
        }
    }
}
