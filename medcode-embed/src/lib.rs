//! # medcode-embed
//!
//! Text embedding providers for the medcode retrieval engine. Retrieval code
//! only sees the [`EmbeddingProvider`] trait; this crate supplies concrete
//! implementations behind it.
//!
//! ## Providers
//!
//! - [`FastEmbedProvider`]: local ONNX models through fastembed, either one of
//!   the bundled models or a HuggingFace repository with an ONNX export
//!   (downloaded on first use by [`ModelDownloader`]). Loaded models are cached
//!   process-wide.
//! - [`HashingProvider`]: deterministic feature hashing, no model files.
//!
//! [`EmbeddingBackend`] picks one of them from configuration.
//!
//! ## Quick Start
//!
//! ```no_run
//! use medcode_embed::{EmbedConfig, EmbeddingProvider, FastEmbedProvider};
//!
//! # async fn example() -> medcode_embed::Result<()> {
//! let provider = FastEmbedProvider::create(EmbedConfig::default()).await?;
//!
//! let texts = vec!["acute bronchitis".to_string(), "fever".to_string()];
//! let result = provider.embed_texts(&texts).await?;
//! println!("{} embeddings of dimension {}", result.len(), result.dimension);
//! # Ok(())
//! # }
//! ```
//!
//! Embeddings are stored as half-precision floats and L2-normalized by
//! default, so an inner product between two of them is their cosine similarity.

pub mod backend;
pub mod config;
pub mod downloader;
pub mod error;
pub mod hashing;
pub mod provider;

pub use backend::EmbeddingBackend;
pub use config::{EmbedConfig, TokenizerConfig};
pub use downloader::ModelDownloader;
pub use error::{EmbedError, Result};
pub use hashing::HashingProvider;
pub use provider::{EmbeddingProvider, EmbeddingResult, FastEmbedProvider};
