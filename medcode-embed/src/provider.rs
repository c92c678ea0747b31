//! Embedding provider implementations

use crate::config::EmbedConfig;
use crate::downloader::download_model;
use crate::error::{EmbedError, Result};
use async_trait::async_trait;
use fastembed::{
    EmbeddingModel, InitOptions, TextEmbedding, TokenizerFiles, UserDefinedEmbeddingModel,
};
use fnv::FnvHasher;
use half::f16;
use std::collections::HashMap;
use std::hash::Hasher;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use tokio::fs;

/// Result of embedding generation
#[derive(Debug, Clone)]
pub struct EmbeddingResult {
    /// The generated embeddings, one per input text
    pub embeddings: Vec<Vec<f16>>,
    /// The dimension of each embedding vector
    pub dimension: usize,
}

impl EmbeddingResult {
    /// Create a result; the dimension is taken from the first vector (0 when empty).
    pub fn new(embeddings: Vec<Vec<f16>>) -> Self {
        let dimension = embeddings.first().map(|e| e.len()).unwrap_or(0);
        Self {
            embeddings,
            dimension,
        }
    }

    pub fn len(&self) -> usize {
        self.embeddings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.embeddings.is_empty()
    }
}

/// Capability contract for anything that turns text into fixed-length vectors.
///
/// Implementations must return exactly one vector per input text, in input
/// order, each of length [`EmbeddingProvider::embedding_dimension`].
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Generate embeddings for a single text
    async fn embed_text(&self, text: &str) -> Result<Vec<f16>>;

    /// Generate embeddings for multiple texts (batch processing)
    async fn embed_texts(&self, texts: &[String]) -> Result<EmbeddingResult>;

    /// Get the dimension of embeddings produced by this provider
    fn embedding_dimension(&self) -> usize;

    /// Get the name/identifier of this provider
    fn provider_name(&self) -> &str;

    /// Identity of the underlying model, used to tag cached indexes
    fn model_id(&self) -> String {
        self.provider_name().to_string()
    }
}

/// Type alias for cached model entries (model, dimension)
type ModelCacheEntry = (Arc<Mutex<TextEmbedding>>, usize);

/// Global cache for initialized embedding models to avoid reloading
static MODEL_CACHE: OnceLock<Mutex<HashMap<String, ModelCacheEntry>>> = OnceLock::new();

fn model_cache() -> MutexGuard<'static, HashMap<String, ModelCacheEntry>> {
    MODEL_CACHE
        .get_or_init(|| Mutex::new(HashMap::new()))
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Map a bundled model name onto fastembed's model enum
fn builtin_model(name: &str) -> Option<EmbeddingModel> {
    match name.to_ascii_lowercase().as_str() {
        "all-minilm-l6-v2" => Some(EmbeddingModel::AllMiniLML6V2),
        "all-minilm-l12-v2" => Some(EmbeddingModel::AllMiniLML12V2),
        "bge-small-en-v1.5" => Some(EmbeddingModel::BGESmallENV15),
        "bge-base-en-v1.5" => Some(EmbeddingModel::BGEBaseENV15),
        "snowflake-arctic-embed-xs" => Some(EmbeddingModel::SnowflakeArcticEmbedXS),
        _ => None,
    }
}

/// FastEmbed-based embedding provider using real ONNX models
#[derive(Clone)]
pub struct FastEmbedProvider {
    config: EmbedConfig,
    model: Option<Arc<Mutex<TextEmbedding>>>,
    dimension: usize,
}

impl std::fmt::Debug for FastEmbedProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FastEmbedProvider")
            .field("config", &self.config)
            .field("model", &self.model.is_some())
            .field("dimension", &self.dimension)
            .finish()
    }
}

impl FastEmbedProvider {
    /// Creates a new uninitialized provider. Call [`FastEmbedProvider::initialize`] before use.
    pub fn new(config: EmbedConfig) -> Self {
        Self {
            config,
            model: None,
            dimension: 0,
        }
    }

    /// Downloads (if needed) and loads the embedding model, reusing a cached
    /// instance when another provider already loaded the same config.
    pub async fn initialize(&mut self) -> Result<()> {
        tracing::info!(
            "Initializing FastEmbed provider for model: {}",
            self.config.model_name()
        );
        if self.config.batch_size == 0 {
            return Err(EmbedError::invalid_config("batch_size must be at least 1"));
        }

        let cache_key = self.create_cache_key()?;

        let cached_data = model_cache()
            .get(&cache_key)
            .map(|(model, dim)| (Arc::clone(model), *dim));

        if let Some((cached_model, cached_dimension)) = cached_data {
            tracing::info!("Using cached model for: {}", self.config.model_name());
            self.model = Some(cached_model);
            self.dimension = cached_dimension;
            return self.validate_model().await;
        }

        let (model, dimension) = if self.config.is_huggingface_model() {
            tracing::info!(
                "Downloading HuggingFace model: {}",
                self.config.model_name()
            );
            download_model(&self.config).await?;
            self.load_user_defined_model().await?
        } else {
            self.load_builtin_model().await?
        };

        let model_arc = Arc::new(Mutex::new(model));
        model_cache().insert(cache_key, (Arc::clone(&model_arc), dimension));

        self.model = Some(model_arc);
        self.dimension = dimension;

        self.validate_model().await
    }

    /// Creates and initializes a provider in one step.
    pub async fn create(config: EmbedConfig) -> Result<Self> {
        let mut provider = Self::new(config);
        provider.initialize().await?;
        Ok(provider)
    }

    pub fn config(&self) -> &EmbedConfig {
        &self.config
    }

    /// Cache key derived from the serialized configuration
    fn create_cache_key(&self) -> Result<String> {
        let config_json = serde_json::to_string(&self.config)
            .map_err(|e| EmbedError::External { source: e.into() })?;

        let mut hasher = FnvHasher::default();
        hasher.write(b"v1:");
        hasher.write(config_json.as_bytes());

        Ok(format!("v1:{:x}", hasher.finish()))
    }

    async fn load_builtin_model(&self) -> Result<(TextEmbedding, usize)> {
        let model_kind = builtin_model(self.config.model_name()).ok_or_else(|| {
            EmbedError::invalid_config(format!(
                "Unknown bundled model '{}' and no HuggingFace repository configured",
                self.config.model_name()
            ))
        })?;
        tracing::info!(
            "Using built-in fastembed model: {}",
            self.config.model_name()
        );

        let cache_dir = self.config.model_base_path.clone();
        let name = self.config.model_name().to_string();
        tokio::task::spawn_blocking(move || -> Result<(TextEmbedding, usize)> {
            tracing::info!("Loading embedding model: {}", name);

            let init_options = InitOptions::new(model_kind)
                .with_cache_dir(cache_dir)
                .with_show_download_progress(true);

            let mut model = TextEmbedding::try_new(init_options)
                .map_err(|e| EmbedError::External { source: e })?;
            let dimension = probe_dimension(&mut model)?;

            tracing::info!("Model loaded successfully. Dimension: {}", dimension);
            Ok((model, dimension))
        })
        .await?
    }

    /// Load a user-defined ONNX model from downloaded HuggingFace files
    async fn load_user_defined_model(&self) -> Result<(TextEmbedding, usize)> {
        tracing::info!("Loading user-defined model: {}", self.config.model_name());

        let onnx_file = fs::read(self.config.onnx_model_path()).await?;
        let tokenizer_config = self.config.tokenizer_config();
        let tokenizer_file = fs::read(&tokenizer_config.tokenizer_path).await?;
        let config_file = fs::read(&tokenizer_config.config_path).await?;
        let special_tokens_map_file = fs::read(&tokenizer_config.special_tokens_map_path).await?;

        let tokenizer_config_file = match &tokenizer_config.tokenizer_config_path {
            Some(path) if path.exists() => fs::read(path).await?,
            _ => {
                let minimal_config = serde_json::json!({
                    "clean_up_tokenization_spaces": true,
                    "do_lower_case": false,
                    "model_max_length": 512,
                    "tokenizer_class": "BertTokenizer"
                });
                serde_json::to_vec_pretty(&minimal_config)
                    .map_err(|e| EmbedError::External { source: e.into() })?
            }
        };

        let tokenizer_files = TokenizerFiles {
            tokenizer_file,
            config_file,
            special_tokens_map_file,
            tokenizer_config_file,
        };
        let user_model = UserDefinedEmbeddingModel::new(onnx_file, tokenizer_files);

        let config_name = self.config.model_name().to_string();
        tokio::task::spawn_blocking(move || -> Result<(TextEmbedding, usize)> {
            tracing::info!("Initializing user-defined model: {}", config_name);

            let mut model =
                TextEmbedding::try_new_from_user_defined(user_model, Default::default())
                    .map_err(|e| EmbedError::External { source: e })?;
            let dimension = probe_dimension(&mut model)?;

            tracing::info!(
                "User-defined model loaded successfully. Dimension: {}",
                dimension
            );
            Ok((model, dimension))
        })
        .await?
    }

    /// Validate that the model is working correctly
    async fn validate_model(&self) -> Result<()> {
        let model = self
            .model
            .as_ref()
            .ok_or_else(|| EmbedError::invalid_config("Model not initialized"))?;

        let model_clone = Arc::clone(model);
        let model_name = self.config.model_name().to_string();
        let validation_result = tokio::task::spawn_blocking(move || -> Result<Vec<Vec<f32>>> {
            let mut model_guard = model_clone
                .lock()
                .map_err(|_| EmbedError::LockPoisoned { model: model_name })?;
            model_guard
                .embed(vec!["validation test".to_string()], None)
                .map_err(|e| EmbedError::External { source: e })
        })
        .await??;

        let embedding = validation_result.first().ok_or_else(|| {
            EmbedError::invalid_config("Model validation failed: no embeddings generated")
        })?;

        if embedding.len() != self.dimension {
            return Err(EmbedError::DimensionMismatch {
                expected: self.dimension,
                actual: embedding.len(),
            });
        }

        if embedding.iter().any(|value| !value.is_finite()) {
            return Err(EmbedError::invalid_config(
                "Model validation failed: non-finite values in embedding",
            ));
        }

        tracing::debug!("Model validation passed for: {}", self.config.model_name());
        Ok(())
    }

    /// Clears the global model cache.
    pub fn clear_cache() {
        model_cache().clear();
        tracing::info!("Model cache cleared");
    }

    /// Returns the number of cached models.
    pub fn cache_size() -> usize {
        model_cache().len()
    }
}

fn probe_dimension(model: &mut TextEmbedding) -> Result<usize> {
    let probe = model
        .embed(vec!["test".to_string()], None)
        .map_err(|e| EmbedError::External { source: e })?;
    probe
        .first()
        .map(|emb| emb.len())
        .filter(|len| *len > 0)
        .ok_or_else(|| EmbedError::invalid_config("Model produced an empty probe embedding"))
}

/// Convert an f32 vector to f16, optionally L2-normalizing it first.
pub fn to_f16(embedding: &[f32], normalize: bool) -> Vec<f16> {
    let norm = if normalize {
        embedding.iter().map(|x| x * x).sum::<f32>().sqrt()
    } else {
        0.0
    };
    if norm > 0.0 {
        embedding.iter().map(|x| f16::from_f32(x / norm)).collect()
    } else {
        embedding.iter().map(|x| f16::from_f32(*x)).collect()
    }
}

#[async_trait]
impl EmbeddingProvider for FastEmbedProvider {
    async fn embed_text(&self, text: &str) -> Result<Vec<f16>> {
        let texts = vec![text.to_string()];
        let result = self.embed_texts(&texts).await?;
        result
            .embeddings
            .into_iter()
            .next()
            .ok_or_else(|| EmbedError::invalid_config("No embedding generated for text"))
    }

    async fn embed_texts(&self, texts: &[String]) -> Result<EmbeddingResult> {
        if texts.is_empty() {
            return Ok(EmbeddingResult::new(vec![]));
        }

        let model = self.model.as_ref().ok_or_else(|| {
            EmbedError::invalid_config("Model not initialized. Call initialize() first.")
        })?;

        tracing::debug!("Generating embeddings for {} texts", texts.len());

        let mut all_embeddings = Vec::with_capacity(texts.len());

        for chunk in texts.chunks(self.config.batch_size.max(1)) {
            let chunk = chunk.to_vec();
            let model_clone = Arc::clone(model);
            let model_name = self.config.model_name().to_string();

            let batch_embeddings = tokio::task::spawn_blocking(move || -> Result<Vec<Vec<f32>>> {
                tracing::debug!("Processing batch of {} texts", chunk.len());

                let mut model_guard = model_clone
                    .lock()
                    .map_err(|_| EmbedError::LockPoisoned { model: model_name })?;
                model_guard
                    .embed(chunk, None)
                    .map_err(|e| EmbedError::External { source: e })
            })
            .await??;

            for embedding in batch_embeddings {
                if embedding.len() != self.dimension {
                    return Err(EmbedError::DimensionMismatch {
                        expected: self.dimension,
                        actual: embedding.len(),
                    });
                }
                all_embeddings.push(to_f16(&embedding, self.config.normalize));
            }
        }

        tracing::debug!("Generated {} embeddings", all_embeddings.len());
        Ok(EmbeddingResult::new(all_embeddings))
    }

    fn embedding_dimension(&self) -> usize {
        self.dimension
    }

    fn provider_name(&self) -> &str {
        "fastembed"
    }

    fn model_id(&self) -> String {
        format!(
            "fastembed:{}@{}#{:016x}",
            self.config.hf_repo().unwrap_or(self.config.model_name()),
            self.config.hf_revision(),
            vector_settings_hash(&self.config)
        )
    }
}

/// FNV hash of the settings that change the vectors a model produces.
/// Batch size and storage location are left out.
fn vector_settings_hash(config: &EmbedConfig) -> u64 {
    let mut hasher = FnvHasher::default();
    hasher.write(config.model_name().as_bytes());
    hasher.write_u8(0);
    hasher.write(config.onnx_file.as_bytes());
    hasher.write_u8(0);
    hasher.write_u8(config.normalize as u8);
    if let Some(tokenizer) = &config.tokenizer_config {
        for path in [
            Some(&tokenizer.tokenizer_path),
            Some(&tokenizer.config_path),
            Some(&tokenizer.special_tokens_map_path),
            tokenizer.tokenizer_config_path.as_ref(),
        ]
        .into_iter()
        .flatten()
        {
            hasher.write(path.to_string_lossy().as_bytes());
            hasher.write_u8(0);
        }
    }
    hasher.finish()
}
