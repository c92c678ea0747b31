//! Runtime configuration for building a [`Retriever`](crate::Retriever).
//!
//! Loaded from TOML; every field has a default, so an empty file is valid.
//!
//! ```toml
//! catalog_path = "Section111ValidICD10-Jan2024.csv"
//! top_k = 5
//! embed_timeout_ms = 2000
//! index_cache_path = ".medcode/index.bin"
//!
//! [embedding]
//! kind = "hashing"
//! dimension = 256
//! ```
//!
//! `MEDCODE_CATALOG`, `MEDCODE_TOP_K` and `MEDCODE_INDEX_CACHE` override the
//! file when set.

use crate::error::{Result, RetrievalError};
use crate::retrieval::RetrievalOptions;
use crate::retrieval::orchestrator::DEFAULT_TOP_K;
use medcode_embed::EmbeddingBackend;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

pub const DEFAULT_CATALOG_PATH: &str = "Section111ValidICD10-Jan2024.csv";
pub const DEFAULT_EMBED_BATCH_SIZE: usize = 64;
const ENV_PREFIX: &str = "MEDCODE_";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrieverConfig {
    /// Reference table with `CODE`, `Medical term` and `Description` columns
    pub catalog_path: PathBuf,
    /// Field delimiter; inferred from the file extension when unset
    pub delimiter: Option<char>,
    pub top_k: usize,
    /// Catalog entries per embedding call while building the index
    pub embed_batch_size: usize,
    /// Deadline for each query-time embedding call
    pub embed_timeout_ms: Option<u64>,
    pub index_cache_path: Option<PathBuf>,
    /// JSON lexicon used by `medcode process`
    pub lexicon_path: Option<PathBuf>,
    pub embedding: EmbeddingBackend,
}

impl Default for RetrieverConfig {
    fn default() -> Self {
        Self {
            catalog_path: PathBuf::from(DEFAULT_CATALOG_PATH),
            delimiter: None,
            top_k: DEFAULT_TOP_K,
            embed_batch_size: DEFAULT_EMBED_BATCH_SIZE,
            embed_timeout_ms: None,
            index_cache_path: None,
            lexicon_path: None,
            embedding: EmbeddingBackend::default(),
        }
    }
}

impl RetrieverConfig {
    pub fn new(catalog_path: impl Into<PathBuf>) -> Self {
        Self {
            catalog_path: catalog_path.into(),
            ..Self::default()
        }
    }

    /// Read a TOML file, apply environment overrides and validate.
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = tokio::fs::read_to_string(path).await?;
        let config = Self::from_toml(&raw)
            .map_err(|e| RetrievalError::config(format!("{}: {e}", path.display())))?;
        info!("Loaded configuration from {}", path.display());
        config.with_env_overrides()
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw).map_err(|e| RetrievalError::config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `MEDCODE_*` variables on top of the current values.
    pub fn with_env_overrides(self) -> Result<Self> {
        self.with_overrides(|name| std::env::var(format!("{ENV_PREFIX}{name}")).ok())
    }

    fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(catalog) = lookup("CATALOG") {
            debug!("Catalog path overridden from environment");
            self.catalog_path = PathBuf::from(catalog);
        }
        if let Some(top_k) = lookup("TOP_K") {
            self.top_k = top_k.trim().parse().map_err(|_| {
                RetrievalError::config(format!("{ENV_PREFIX}TOP_K is not a number: {top_k}"))
            })?;
        }
        if let Some(cache) = lookup("INDEX_CACHE") {
            self.index_cache_path = Some(PathBuf::from(cache));
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        if self.top_k == 0 {
            return Err(RetrievalError::config("top_k must be at least 1"));
        }
        if self.embed_batch_size == 0 {
            return Err(RetrievalError::config("embed_batch_size must be at least 1"));
        }
        if self.embed_timeout_ms == Some(0) {
            return Err(RetrievalError::config("embed_timeout_ms must be positive"));
        }
        if let Some(delimiter) = self.delimiter {
            if !delimiter.is_ascii() || delimiter == '"' || delimiter == '\n' {
                return Err(RetrievalError::config(format!(
                    "unusable delimiter {delimiter:?}"
                )));
            }
        }
        // model files are checked when the provider is created, after download
        match &self.embedding {
            EmbeddingBackend::FastEmbed(embed) if embed.batch_size == 0 => {
                Err(RetrievalError::config("embedding.batch_size must be at least 1"))
            }
            EmbeddingBackend::Hashing { dimension: 0 } => {
                Err(RetrievalError::config("embedding.dimension must be positive"))
            }
            _ => Ok(()),
        }
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    pub fn with_delimiter(mut self, delimiter: char) -> Self {
        self.delimiter = Some(delimiter);
        self
    }

    pub fn with_embed_timeout(mut self, timeout: Duration) -> Self {
        self.embed_timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    pub fn with_index_cache(mut self, path: impl Into<PathBuf>) -> Self {
        self.index_cache_path = Some(path.into());
        self
    }

    pub fn with_lexicon(mut self, path: impl Into<PathBuf>) -> Self {
        self.lexicon_path = Some(path.into());
        self
    }

    pub fn with_embedding(mut self, embedding: EmbeddingBackend) -> Self {
        self.embedding = embedding;
        self
    }

    /// Delimiter byte for the catalog reader.
    pub fn delimiter_byte(&self) -> u8 {
        match self.delimiter {
            Some(c) if c.is_ascii() => c as u8,
            _ => crate::catalog::delimiter_for_path(&self.catalog_path),
        }
    }

    pub fn retrieval_options(&self) -> RetrievalOptions {
        RetrievalOptions {
            top_k: self.top_k,
            embed_timeout: self.embed_timeout_ms.map(Duration::from_millis),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_empty_toml_is_default() {
        let config = RetrieverConfig::from_toml("").unwrap();
        assert_eq!(config, RetrieverConfig::default());
        assert_eq!(config.top_k, 3);
        assert_eq!(
            config.catalog_path,
            PathBuf::from("Section111ValidICD10-Jan2024.csv")
        );
    }

    #[test]
    fn test_parse_full_config() {
        let raw = r#"
            catalog_path = "codes.tsv"
            top_k = 5
            embed_timeout_ms = 1500
            index_cache_path = "cache/index.bin"

            [embedding]
            kind = "hashing"
            dimension = 64
        "#;
        let config = RetrieverConfig::from_toml(raw).unwrap();
        assert_eq!(config.top_k, 5);
        assert_eq!(config.delimiter_byte(), b'\t');
        assert_eq!(
            config.embedding,
            EmbeddingBackend::Hashing { dimension: 64 }
        );
        let options = config.retrieval_options();
        assert_eq!(options.top_k, 5);
        assert_eq!(options.embed_timeout, Some(Duration::from_millis(1500)));
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(matches!(
            RetrieverConfig::from_toml("top_k = 0"),
            Err(RetrievalError::Config { .. })
        ));
        assert!(RetrieverConfig::from_toml("embed_batch_size = 0").is_err());
        assert!(RetrieverConfig::from_toml("embed_timeout_ms = 0").is_err());
        assert!(RetrieverConfig::from_toml("delimiter = 'é'").is_err());
        assert!(RetrieverConfig::from_toml("top_k = \"three\"").is_err());
    }

    #[test]
    fn test_explicit_delimiter_wins() {
        let config = RetrieverConfig::new("codes.tsv").with_delimiter(';');
        assert_eq!(config.delimiter_byte(), b';');
        assert_eq!(RetrieverConfig::new("codes.csv").delimiter_byte(), b',');
    }

    #[test]
    fn test_overrides() {
        let vars = HashMap::from([
            ("CATALOG", "other.csv"),
            ("TOP_K", " 7 "),
        ]);
        let config = RetrieverConfig::default()
            .with_overrides(|name| vars.get(name).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.catalog_path, PathBuf::from("other.csv"));
        assert_eq!(config.top_k, 7);
        assert_eq!(config.index_cache_path, None);

        let bad = RetrieverConfig::default().with_overrides(|name| {
            (name == "TOP_K").then(|| "many".to_string())
        });
        assert!(bad.is_err());
    }

    #[tokio::test]
    async fn test_from_file() -> anyhow::Result<()> {
        let mut file = NamedTempFile::new()?;
        writeln!(file, "top_k = 4")?;
        writeln!(file, "[embedding]")?;
        writeln!(file, "kind = \"hashing\"")?;

        let config = RetrieverConfig::from_file(file.path()).await?;
        // An exported MEDCODE_TOP_K would override the file
        if std::env::var("MEDCODE_TOP_K").is_err() {
            assert_eq!(config.top_k, 4);
        }
        assert_eq!(
            config.embedding,
            EmbeddingBackend::Hashing { dimension: 256 }
        );
        Ok(())
    }
}
