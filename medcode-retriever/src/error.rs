//! Error taxonomy for catalog loading and retrieval

use medcode_embed::EmbedError;

pub type Result<T> = std::result::Result<T, RetrievalError>;

/// Errors raised by the retrieval engine.
///
/// Catalog and index construction errors are fatal: nothing can be served
/// without both. Query-time errors are caught per term by the orchestrator
/// and reported as [`crate::retrieval::TermFailure`] entries instead.
#[derive(Debug, thiserror::Error)]
pub enum RetrievalError {
    /// The reference table is unreadable or lacks a required column
    #[error("Failed to load catalog from {source_name}: {message}")]
    CatalogLoad {
        source_name: String,
        message: String,
    },

    /// The embedding collaborator failed or returned malformed vectors
    #[error("Embedding failed: {source}")]
    Embedding {
        #[from]
        source: EmbedError,
    },

    /// Empty or otherwise degenerate query
    #[error("Invalid query: {message}")]
    InvalidQuery { message: String },

    #[error("Index {index} out of range for catalog of {len} entries")]
    IndexOutOfRange { index: usize, len: usize },

    /// An embedding call exceeded the caller's deadline
    #[error("Embedding timed out after {millis} ms")]
    Timeout { millis: u64 },

    /// A persisted index does not belong to the current catalog or model
    #[error("Index cache rejected: {message}")]
    IndexCache { message: String },

    /// Term extraction collaborator failure
    #[error("Term extraction failed: {message}")]
    Extraction { message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("IO error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },
}

impl RetrievalError {
    pub fn catalog_load(source_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::CatalogLoad {
            source_name: source_name.into(),
            message: message.into(),
        }
    }

    pub fn invalid_query(message: impl Into<String>) -> Self {
        Self::InvalidQuery {
            message: message.into(),
        }
    }

    pub fn index_cache(message: impl Into<String>) -> Self {
        Self::IndexCache {
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn extraction(message: impl Into<String>) -> Self {
        Self::Extraction {
            message: message.into(),
        }
    }
}
