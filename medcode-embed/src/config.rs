//! Configuration for embedding models

use crate::error::{EmbedError, Result};
use derive_builder::Builder;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Model used when no configuration is given. Bundled with fastembed.
pub const DEFAULT_MODEL_NAME: &str = "all-MiniLM-L6-v2";

/// Sentence-similarity BioBERT tuned on MedNLI and STS-B.
pub const BIOMEDICAL_MODEL_NAME: &str = "BioBERT-mnli-snli-scinli-scitail-mednli-stsb";
pub const BIOMEDICAL_MODEL_REPO: &str = "pritamdeka/BioBERT-mnli-snli-scinli-scitail-mednli-stsb";

/// Configuration for tokenizer files
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Builder)]
#[builder(setter(into))]
pub struct TokenizerConfig {
    /// Path to the tokenizer.json file
    pub tokenizer_path: PathBuf,
    /// Path to the config.json file
    pub config_path: PathBuf,
    /// Path to the special_tokens_map.json file
    pub special_tokens_map_path: PathBuf,
    /// Path to the tokenizer_config.json file (optional, will generate minimal if missing)
    #[builder(default)]
    #[serde(default)]
    pub tokenizer_config_path: Option<PathBuf>,
}

impl TokenizerConfig {
    pub fn builder() -> TokenizerConfigBuilder {
        TokenizerConfigBuilder::default()
    }

    /// Standard HuggingFace file layout inside a model directory
    pub fn standard<P: AsRef<Path>>(model_dir: P) -> Self {
        let model_dir = model_dir.as_ref();
        Self {
            tokenizer_path: model_dir.join("tokenizer.json"),
            config_path: model_dir.join("config.json"),
            special_tokens_map_path: model_dir.join("special_tokens_map.json"),
            tokenizer_config_path: Some(model_dir.join("tokenizer_config.json")),
        }
    }

    /// Validate that all required tokenizer files exist
    pub fn validate(&self) -> Result<()> {
        let paths_to_check = [
            ("tokenizer", &self.tokenizer_path),
            ("config", &self.config_path),
            ("special tokens map", &self.special_tokens_map_path),
        ];

        for (name, path) in &paths_to_check {
            if !path.exists() {
                tracing::error!("Missing {}: {}", name, path.display());
                return Err(EmbedError::ModelFileNotFound {
                    path: path.to_path_buf(),
                });
            }
        }

        if let Some(path) = &self.tokenizer_config_path {
            if !path.exists() {
                tracing::warn!(
                    "tokenizer_config.json not found at {}, will generate minimal config",
                    path.display()
                );
            }
        }

        tracing::debug!("Tokenizer validation successful");
        Ok(())
    }
}

/// Configuration for embedding models.
///
/// A config either names one of the models bundled with fastembed (no
/// `hf_model_repo`) or points at a HuggingFace repository that ships an ONNX
/// export, which is downloaded under `model_base_path/model_name`.
///
/// The whole struct is serialized to derive the model cache key, so two
/// configs share a loaded model only when every field matches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Builder)]
#[builder(setter(into))]
#[serde(default)]
pub struct EmbedConfig {
    /// Path to the base directory containing model files
    #[builder(default = r#"PathBuf::from("models")"#)]
    pub model_base_path: PathBuf,
    /// Name of the embedding model to use
    pub model_name: String,
    /// HuggingFace model repository
    #[builder(default)]
    pub hf_model_repo: Option<String>,
    /// HuggingFace model revision/branch (e.g., "main")
    #[builder(default = r#"Some("main".to_string())"#)]
    pub hf_revision: Option<String>,
    /// ONNX file path relative to the model directory
    #[builder(default = r#""onnx/model.onnx".to_string()"#)]
    pub onnx_file: String,
    /// Maximum batch size for embedding generation
    #[builder(default = "32")]
    pub batch_size: usize,
    /// Whether to L2-normalize embeddings
    #[builder(default = "true")]
    pub normalize: bool,
    /// Tokenizer file locations; the standard layout is used when unset
    #[builder(default)]
    pub tokenizer_config: Option<TokenizerConfig>,
}

impl EmbedConfig {
    pub fn builder() -> EmbedConfigBuilder {
        EmbedConfigBuilder::default()
    }

    /// Configuration for a model bundled with fastembed
    pub fn new(model_name: impl Into<String>) -> Self {
        Self {
            model_name: model_name.into(),
            ..Self::default()
        }
    }

    /// Configuration for a HuggingFace model stored under `model_base_path`
    pub fn from_huggingface<P: AsRef<Path>>(
        model_base_path: P,
        model_name: impl Into<String>,
        hf_repo: impl Into<String>,
    ) -> Self {
        Self {
            model_base_path: model_base_path.as_ref().to_path_buf(),
            model_name: model_name.into(),
            hf_model_repo: Some(hf_repo.into()),
            batch_size: 16,
            ..Self::default()
        }
    }

    /// The biomedical sentence-similarity model the catalog was designed around
    pub fn biomedical<P: AsRef<Path>>(model_base_path: P) -> Self {
        Self::from_huggingface(model_base_path, BIOMEDICAL_MODEL_NAME, BIOMEDICAL_MODEL_REPO)
    }

    pub fn with_batch_size(self, batch_size: usize) -> Self {
        Self { batch_size, ..self }
    }

    pub fn with_normalize(self, normalize: bool) -> Self {
        Self { normalize, ..self }
    }

    pub fn with_revision<S: Into<String>>(self, revision: S) -> Self {
        Self {
            hf_revision: Some(revision.into()),
            ..self
        }
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    /// Get the full path to the model directory
    pub fn model_path(&self) -> PathBuf {
        self.model_base_path.join(&self.model_name)
    }

    pub fn onnx_model_path(&self) -> PathBuf {
        self.model_path().join(&self.onnx_file)
    }

    /// Tokenizer configuration, falling back to the standard layout
    pub fn tokenizer_config(&self) -> TokenizerConfig {
        self.tokenizer_config
            .clone()
            .unwrap_or_else(|| TokenizerConfig::standard(self.model_path()))
    }

    pub fn is_huggingface_model(&self) -> bool {
        self.hf_model_repo.is_some()
    }

    pub fn hf_repo(&self) -> Option<&str> {
        self.hf_model_repo.as_deref()
    }

    pub fn hf_revision(&self) -> &str {
        self.hf_revision.as_deref().unwrap_or("main")
    }

    /// Validate that all required model files exist
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(EmbedError::invalid_config("batch_size must be at least 1"));
        }

        if !self.is_huggingface_model() {
            return Ok(());
        }

        let onnx_path = self.onnx_model_path();
        if !onnx_path.exists() {
            tracing::error!("Missing ONNX model: {}", onnx_path.display());
            return Err(EmbedError::ModelFileNotFound { path: onnx_path });
        }

        self.tokenizer_config().validate()?;

        tracing::debug!("Model validation successful for: {}", self.model_name);
        Ok(())
    }
}

impl Default for EmbedConfig {
    fn default() -> Self {
        Self {
            model_base_path: PathBuf::from("models"),
            model_name: DEFAULT_MODEL_NAME.to_string(),
            hf_model_repo: None,
            hf_revision: Some("main".to_string()),
            onnx_file: "onnx/model.onnx".to_string(),
            batch_size: 32,
            normalize: true,
            tokenizer_config: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_config_creation() {
        let config = EmbedConfig::new("bge-small-en-v1.5");

        assert_eq!(config.model_name, "bge-small-en-v1.5");
        assert_eq!(config.batch_size, 32);
        assert!(config.normalize);
        assert!(!config.is_huggingface_model());
        assert_eq!(config.model_path(), PathBuf::from("models/bge-small-en-v1.5"));
    }

    #[test]
    fn test_biomedical_paths() {
        let temp_dir = tempdir().unwrap();
        let config = EmbedConfig::biomedical(temp_dir.path());

        let expected_base = temp_dir.path().join(BIOMEDICAL_MODEL_NAME);
        assert!(config.is_huggingface_model());
        assert_eq!(config.hf_repo(), Some(BIOMEDICAL_MODEL_REPO));
        assert_eq!(config.batch_size, 16);
        assert_eq!(
            config.onnx_model_path(),
            expected_base.join("onnx").join("model.onnx")
        );
        assert_eq!(
            config.tokenizer_config().tokenizer_path,
            expected_base.join("tokenizer.json")
        );
        assert_eq!(
            config.tokenizer_config().special_tokens_map_path,
            expected_base.join("special_tokens_map.json")
        );
    }

    #[test]
    fn test_config_builder_methods() {
        let config = EmbedConfig::default()
            .with_batch_size(64)
            .with_normalize(false)
            .with_revision("v2");

        assert_eq!(config.batch_size, 64);
        assert!(!config.normalize);
        assert_eq!(config.hf_revision(), "v2");
    }

    #[test]
    fn test_derive_builder_defaults() {
        let config = EmbedConfig::builder()
            .model_name("custom-model")
            .build()
            .unwrap();

        assert_eq!(config.model_base_path, PathBuf::from("models"));
        assert_eq!(config.batch_size, 32);
        assert!(config.normalize);
        assert_eq!(config.hf_revision, Some("main".to_string()));
        assert_eq!(config.onnx_file, "onnx/model.onnx");
    }

    #[test]
    fn test_validate_missing_onnx() {
        let temp_dir = tempdir().unwrap();
        let config = EmbedConfig::biomedical(temp_dir.path());

        let err = config.validate().unwrap_err();
        assert!(matches!(err, EmbedError::ModelFileNotFound { .. }));
    }

    #[test]
    fn test_validate_rejects_zero_batch() {
        let config = EmbedConfig::default().with_batch_size(0);
        assert!(matches!(
            config.validate(),
            Err(EmbedError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn test_json_round_trip_keeps_partial_fields() {
        let config: EmbedConfig =
            serde_json::from_str(r#"{"model_name": "bge-small-en-v1.5"}"#).unwrap();
        assert_eq!(config.model_name, "bge-small-en-v1.5");
        assert_eq!(config.batch_size, 32);
        assert!(config.tokenizer_config.is_none());
    }
}
