//! Dense vector index over the catalog.
//!
//! One vector per [`CatalogEntry`](crate::catalog::CatalogEntry), in catalog
//! order, computed from each entry's composite text. Vectors are stored as a
//! single flat `f16` buffer; scoring accumulates in `f32`.
//!
//! Scores are raw inner products. With a normalizing provider they equal
//! cosine similarity; otherwise they are whatever the provider's geometry
//! makes them, higher still meaning closer.

use crate::catalog::Catalog;
use crate::error::{Result, RetrievalError};
use half::f16;
use medcode_embed::{EmbedError, EmbeddingProvider};
use std::cmp::Ordering;
use std::path::Path;
use tokio::fs;
use tracing::{debug, info, warn};

const CACHE_MAGIC: &[u8; 4] = b"MCIX";
const CACHE_VERSION: u32 = 1;

/// Immutable embedding index. See module docs.
#[derive(Debug, Clone)]
pub struct EmbeddingIndex {
    vectors: Vec<f16>,
    dimension: usize,
    len: usize,
    model_id: String,
}

impl EmbeddingIndex {
    /// Embed every catalog entry and assemble the index.
    ///
    /// Entries are sent to the provider in batches of `batch_size`. Any
    /// provider error, short batch, or vector of the wrong length aborts the
    /// whole build; no partially filled index is ever returned.
    pub async fn build(
        catalog: &Catalog,
        provider: &dyn EmbeddingProvider,
        batch_size: usize,
    ) -> Result<Self> {
        let dimension = provider.embedding_dimension();
        if dimension == 0 {
            return Err(EmbedError::invalid_config(format!(
                "provider {} reports a zero embedding dimension",
                provider.provider_name()
            ))
            .into());
        }
        let batch_size = batch_size.max(1);

        info!(
            "Building embedding index for {} entries with {} (dimension {})",
            catalog.len(),
            provider.model_id(),
            dimension
        );

        let texts: Vec<String> = catalog.iter().map(|e| e.composite_text()).collect();
        let mut vectors = Vec::with_capacity(texts.len() * dimension);

        for (batch_no, batch) in texts.chunks(batch_size).enumerate() {
            let result = provider.embed_texts(batch).await?;
            if result.len() != batch.len() {
                return Err(EmbedError::CountMismatch {
                    expected: batch.len(),
                    actual: result.len(),
                }
                .into());
            }
            for embedding in result.embeddings {
                if embedding.len() != dimension {
                    return Err(EmbedError::DimensionMismatch {
                        expected: dimension,
                        actual: embedding.len(),
                    }
                    .into());
                }
                vectors.extend_from_slice(&embedding);
            }
            debug!("Embedded batch {} ({} entries)", batch_no, batch.len());
        }

        info!("Embedding index built: {} vectors", texts.len());
        Ok(Self {
            vectors,
            dimension,
            len: texts.len(),
            model_id: provider.model_id(),
        })
    }

    /// Load the index from `cache_path` when it matches the catalog and
    /// provider, otherwise build it and write the cache back.
    ///
    /// A cache that fails to load or save is logged and ignored; only a
    /// failed build is an error.
    pub async fn build_or_load(
        catalog: &Catalog,
        provider: &dyn EmbeddingProvider,
        batch_size: usize,
        cache_path: Option<&Path>,
    ) -> Result<Self> {
        let Some(path) = cache_path else {
            return Self::build(catalog, provider, batch_size).await;
        };

        let fingerprint = catalog.fingerprint();
        let model_id = provider.model_id();
        match Self::load(path, &fingerprint, catalog.len(), &model_id).await {
            Ok(index) if !index.is_empty() && index.dimension != provider.embedding_dimension() => {
                warn!(
                    "Ignoring index cache {}: {} dimensions, provider produces {}",
                    path.display(),
                    index.dimension,
                    provider.embedding_dimension()
                );
            }
            Ok(index) => {
                info!("Loaded embedding index from {}", path.display());
                return Ok(index);
            }
            Err(RetrievalError::Io { source }) if source.kind() == std::io::ErrorKind::NotFound => {
                debug!("No index cache at {}", path.display());
            }
            Err(e) => warn!("Ignoring index cache {}: {}", path.display(), e),
        }

        let index = Self::build(catalog, provider, batch_size).await?;
        if let Err(e) = index.save(path, &fingerprint).await {
            warn!("Failed to write index cache {}: {}", path.display(), e);
        }
        Ok(index)
    }

    /// Top-`k` entries by inner product with `query`, best first.
    ///
    /// Equal scores keep catalog order. `k` larger than the index is clamped;
    /// `k == 0` is rejected. NaN scores rank below every real score.
    pub fn nearest(&self, query: &[f16], k: usize) -> Result<Vec<(usize, f32)>> {
        if k == 0 {
            return Err(RetrievalError::invalid_query("k must be at least 1"));
        }
        if query.len() != self.dimension {
            return Err(EmbedError::DimensionMismatch {
                expected: self.dimension,
                actual: query.len(),
            }
            .into());
        }

        let query: Vec<f32> = query.iter().map(|x| x.to_f32()).collect();
        let mut scored: Vec<(usize, f32)> = self
            .vectors
            .chunks_exact(self.dimension.max(1))
            .take(self.len)
            .enumerate()
            .map(|(idx, vector)| {
                let score: f32 = vector
                    .iter()
                    .zip(&query)
                    .map(|(v, q)| v.to_f32() * q)
                    .sum();
                (idx, if score.is_nan() { f32::NEG_INFINITY } else { score })
            })
            .collect();

        let k = k.min(scored.len());
        if k == 0 {
            return Ok(Vec::new());
        }
        if k < scored.len() {
            scored.select_nth_unstable_by(k - 1, rank_order);
            scored.truncate(k);
        }
        scored.sort_by(rank_order);
        Ok(scored)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    pub fn vector(&self, index: usize) -> Result<&[f16]> {
        if index >= self.len {
            return Err(RetrievalError::IndexOutOfRange {
                index,
                len: self.len,
            });
        }
        let start = index * self.dimension;
        Ok(&self.vectors[start..start + self.dimension])
    }

    /// Persist the vectors with a header binding them to a catalog
    /// fingerprint and the provider's model id. Vector data is written in
    /// native byte order.
    pub async fn save(&self, path: &Path, fingerprint: &[u8; 32]) -> Result<()> {
        let payload: &[u8] = bytemuck::cast_slice(&self.vectors);
        let mut buf = Vec::with_capacity(64 + self.model_id.len() + payload.len());
        buf.extend_from_slice(CACHE_MAGIC);
        buf.extend_from_slice(&CACHE_VERSION.to_le_bytes());
        buf.extend_from_slice(fingerprint);
        buf.extend_from_slice(&(self.model_id.len() as u32).to_le_bytes());
        buf.extend_from_slice(self.model_id.as_bytes());
        buf.extend_from_slice(&(self.len as u64).to_le_bytes());
        buf.extend_from_slice(&(self.dimension as u64).to_le_bytes());
        buf.extend_from_slice(payload);

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }
        fs::write(path, buf).await?;
        debug!("Wrote index cache to {}", path.display());
        Ok(())
    }

    /// Read an index written by [`EmbeddingIndex::save`], rejecting it
    /// unless fingerprint, model id and entry count all match.
    pub async fn load(
        path: &Path,
        fingerprint: &[u8; 32],
        expected_len: usize,
        model_id: &str,
    ) -> Result<Self> {
        let bytes = fs::read(path).await?;
        let mut cursor = CacheReader { bytes: &bytes };

        if cursor.take(4)? != CACHE_MAGIC {
            return Err(RetrievalError::index_cache("not an index cache file"));
        }
        let version = cursor.u32()?;
        if version != CACHE_VERSION {
            return Err(RetrievalError::index_cache(format!(
                "unsupported cache version {version}"
            )));
        }
        if cursor.take(32)? != fingerprint {
            return Err(RetrievalError::index_cache(
                "catalog fingerprint does not match",
            ));
        }
        let id_len = cursor.u32()? as usize;
        let stored_model = String::from_utf8_lossy(cursor.take(id_len)?).into_owned();
        if stored_model != model_id {
            return Err(RetrievalError::index_cache(format!(
                "built with {stored_model}, current provider is {model_id}"
            )));
        }
        let len = cursor.u64()? as usize;
        let dimension = cursor.u64()? as usize;
        if len != expected_len {
            return Err(RetrievalError::index_cache(format!(
                "holds {len} vectors, catalog has {expected_len} entries"
            )));
        }
        if len > 0 && dimension == 0 {
            return Err(RetrievalError::index_cache("vector dimension is zero"));
        }
        let expected_bytes = len
            .checked_mul(dimension)
            .and_then(|n| n.checked_mul(std::mem::size_of::<f16>()))
            .ok_or_else(|| RetrievalError::index_cache("vector size overflows"))?;
        let payload = cursor.bytes;
        if payload.len() != expected_bytes {
            return Err(RetrievalError::index_cache("truncated vector data"));
        }

        Ok(Self {
            vectors: bytemuck::pod_collect_to_vec(payload),
            dimension,
            len,
            model_id: stored_model,
        })
    }
}

/// Descending score, then ascending catalog position.
fn rank_order(a: &(usize, f32), b: &(usize, f32)) -> Ordering {
    b.1.total_cmp(&a.1).then(a.0.cmp(&b.0))
}

struct CacheReader<'a> {
    bytes: &'a [u8],
}

impl<'a> CacheReader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.bytes.len() < n {
            return Err(RetrievalError::index_cache("unexpected end of file"));
        }
        let (head, rest) = self.bytes.split_at(n);
        self.bytes = rest;
        Ok(head)
    }

    fn u32(&mut self) -> Result<u32> {
        let mut raw = [0u8; 4];
        raw.copy_from_slice(self.take(4)?);
        Ok(u32::from_le_bytes(raw))
    }

    fn u64(&mut self) -> Result<u64> {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(self.take(8)?);
        Ok(u64::from_le_bytes(raw))
    }
}
