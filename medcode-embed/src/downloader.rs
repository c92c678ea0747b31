//! HuggingFace model downloading functionality

use crate::config::EmbedConfig;
use crate::error::{EmbedError, Result};
use hf_hub::api::tokio::{Api, ApiRepo};
use hf_hub::{Repo, RepoType};
use std::path::{Path, PathBuf};
use tokio::fs;

/// Downloads models from HuggingFace Hub
pub struct ModelDownloader {
    api: Api,
}

impl ModelDownloader {
    /// Create a downloader backed by the HuggingFace API client.
    ///
    /// Authentication is picked up from the environment or the cached token,
    /// as `hf-hub` does by default.
    pub fn new() -> Result<Self> {
        let api = Api::new().map_err(|e| EmbedError::External { source: e.into() })?;
        Ok(Self { api })
    }

    /// Download a model from HuggingFace Hub if not already present locally.
    ///
    /// Fetches the configured ONNX export plus the tokenizer files into
    /// `config.model_path()`. Configs for bundled fastembed models are a no-op.
    ///
    /// # Errors
    /// - Network or HuggingFace API errors (repository not found, authentication)
    /// - File system errors when creating directories or copying files
    ///
    /// # Example
    /// ```no_run
    /// use medcode_embed::{EmbedConfig, ModelDownloader};
    ///
    /// # async fn example() -> medcode_embed::Result<()> {
    /// let downloader = ModelDownloader::new()?;
    /// downloader.ensure_model(&EmbedConfig::biomedical("/tmp/models")).await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn ensure_model(&self, config: &EmbedConfig) -> Result<()> {
        if !config.is_huggingface_model() {
            tracing::debug!("Not a HuggingFace model, skipping download");
            return Ok(());
        }

        if is_model_complete(config) {
            tracing::info!("Model {} already exists and is complete", config.model_name);
            return Ok(());
        }

        let repo_id = config
            .hf_repo()
            .ok_or_else(|| EmbedError::invalid_config("HuggingFace repository not specified"))?;

        tracing::info!(
            "Downloading model {} from {}@{}",
            config.model_name,
            repo_id,
            config.hf_revision()
        );

        fs::create_dir_all(config.model_path()).await?;

        let repo = self.api.repo(Repo::with_revision(
            repo_id.to_string(),
            RepoType::Model,
            config.hf_revision().to_string(),
        ));

        self.download_model_files(&repo, config).await?;

        tracing::info!("Model {} downloaded successfully", config.model_name);
        Ok(())
    }

    /// Download all required model files
    async fn download_model_files(&self, repo: &ApiRepo, config: &EmbedConfig) -> Result<()> {
        let tokenizer_config = config.tokenizer_config();

        let mut downloads: Vec<(String, PathBuf)> = vec![
            (config.onnx_file.clone(), config.onnx_model_path()),
            ("tokenizer.json".to_string(), tokenizer_config.tokenizer_path),
            ("config.json".to_string(), tokenizer_config.config_path),
            (
                "special_tokens_map.json".to_string(),
                tokenizer_config.special_tokens_map_path,
            ),
        ];
        if let Some(path) = tokenizer_config.tokenizer_config_path {
            downloads.push(("tokenizer_config.json".to_string(), path));
        }

        for (remote_path, local_path) in &downloads {
            if local_path.exists() {
                tracing::debug!("File already exists: {}", local_path.display());
                continue;
            }
            if let Some(parent) = local_path.parent() {
                fs::create_dir_all(parent).await?;
            }

            tracing::info!("Downloading {} to {}", remote_path, local_path.display());

            match repo.get(remote_path).await {
                Ok(file_path) => {
                    fs::copy(&file_path, local_path).await?;
                    tracing::debug!("Successfully downloaded {}", remote_path);
                }
                Err(e) => {
                    tracing::warn!("Failed to download {}: {}", remote_path, e);
                    match remote_path.as_str() {
                        "special_tokens_map.json" => {
                            create_fallback_special_tokens_map(local_path).await?;
                        }
                        "tokenizer_config.json" => {
                            tracing::info!(
                                "tokenizer_config.json not found, will generate minimal config"
                            );
                        }
                        _ => return Err(EmbedError::External { source: e.into() }),
                    }
                }
            }
        }

        Ok(())
    }
}

/// Convenience wrapper used by the provider during initialization
pub async fn download_model(config: &EmbedConfig) -> Result<()> {
    ModelDownloader::new()?.ensure_model(config).await
}

/// Check whether every required file of the model is on disk
pub fn is_model_complete(config: &EmbedConfig) -> bool {
    let tokenizer_config = config.tokenizer_config();
    let required_files = [
        config.onnx_model_path(),
        tokenizer_config.tokenizer_path,
        tokenizer_config.config_path,
        tokenizer_config.special_tokens_map_path,
    ];

    for file_path in &required_files {
        if !file_path.exists() {
            tracing::debug!("Missing file: {}", file_path.display());
            return false;
        }
    }
    true
}

async fn create_fallback_special_tokens_map(path: &Path) -> Result<()> {
    let fallback_content = serde_json::json!({
        "cls_token": "[CLS]",
        "sep_token": "[SEP]",
        "unk_token": "[UNK]",
        "pad_token": "[PAD]",
        "mask_token": "[MASK]"
    });

    let content = serde_json::to_string_pretty(&fallback_content)
        .map_err(|e| EmbedError::External { source: e.into() })?;

    fs::write(path, content).await?;
    tracing::info!("Created fallback special_tokens_map.json");
    Ok(())
}
