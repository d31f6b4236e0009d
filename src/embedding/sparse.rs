//! Sparse (keyword) encoders.
//!
//! Sparse vectors let exact identifiers (function names, error codes, CLI
//! flags) score on keyword overlap even when the dense model blurs them.
//!
//! - [`FastembedSparseEncoder`] runs the SPLADE++ model locally (feature
//!   `local-embeddings-fastembed`). Its weights are learned, so the index
//!   applies no IDF modifier.
//! - [`TermWeightEncoder`] needs no model. Tokens are lowercase runs of
//!   alphanumerics and `_`, hashed with 32-bit FNV-1a into a 2^20 index
//!   space; a term's weight is `1 + ln(tf)` and the vector is L2-normalized.
//!   It carries term frequency only, so the index scales query terms by IDF.
//!
//! Both emit indices in ascending order.

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::SparseVector;

use super::SparseEncoder;

const INDEX_BITS: u32 = 20;
const FNV_OFFSET: u32 = 0x811c_9dc5;
const FNV_PRIME: u32 = 0x0100_0193;

#[derive(Debug, Clone, Default)]
pub struct TermWeightEncoder;

impl TermWeightEncoder {
    pub fn new() -> Self {
        Self
    }

    /// Encode a single text.
    pub fn encode_one(&self, text: &str) -> SparseVector {
        let mut tf: BTreeMap<u32, u32> = BTreeMap::new();
        for token in tokenize(text) {
            *tf.entry(term_index(&token)).or_insert(0) += 1;
        }

        let weights: Vec<f32> = tf.values().map(|&n| 1.0 + (n as f32).ln()).collect();
        let norm = weights.iter().map(|w| w * w).sum::<f32>().sqrt();
        if norm == 0.0 {
            return SparseVector::default();
        }

        SparseVector {
            indices: tf.keys().copied().collect(),
            values: weights.into_iter().map(|w| w / norm).collect(),
        }
    }
}

#[async_trait]
impl SparseEncoder for TermWeightEncoder {
    fn model_name(&self) -> &str {
        "fnv-term-weight"
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<SparseVector>> {
        Ok(texts.iter().map(|t| self.encode_one(t)).collect())
    }
}

// ============ Local (fastembed) ============

/// Local SPLADE++ encoder. The model is downloaded on first use and cached.
#[cfg(feature = "local-embeddings-fastembed")]
pub struct FastembedSparseEncoder {
    batch_size: usize,
    model: std::sync::Arc<std::sync::Mutex<Option<fastembed::SparseTextEmbedding>>>,
}

#[cfg(feature = "local-embeddings-fastembed")]
impl FastembedSparseEncoder {
    pub fn new(config: &crate::config::EmbeddingConfig) -> Self {
        Self {
            batch_size: config.batch_size.max(1),
            model: std::sync::Arc::new(std::sync::Mutex::new(None)),
        }
    }
}

#[cfg(feature = "local-embeddings-fastembed")]
#[async_trait]
impl SparseEncoder for FastembedSparseEncoder {
    fn model_name(&self) -> &str {
        "splade-pp-en-v1"
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<SparseVector>> {
        use crate::error::Error;

        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let slot = self.model.clone();
        let batch_size = self.batch_size;
        let texts = texts.to_vec();
        let expected = texts.len();

        let embeddings = tokio::task::spawn_blocking(move || -> Result<Vec<fastembed::SparseEmbedding>> {
            let mut guard = slot
                .lock()
                .map_err(|_| Error::internal("sparse model lock poisoned"))?;
            if guard.is_none() {
                let options = fastembed::SparseInitOptions::new(fastembed::SparseModel::SPLADEPPV1)
                    .with_show_download_progress(false);
                let model = fastembed::SparseTextEmbedding::try_new(options).map_err(|e| {
                    Error::backend("fastembed", format!("failed to initialize sparse model: {}", e))
                })?;
                *guard = Some(model);
            }
            let model = guard
                .as_mut()
                .ok_or_else(|| Error::internal("sparse model missing after init"))?;
            model
                .embed(texts, Some(batch_size))
                .map_err(|e| Error::backend("fastembed", e))
        })
        .await??;

        if embeddings.len() != expected {
            return Err(Error::backend(
                "fastembed",
                format!("{} texts but {} sparse vectors", expected, embeddings.len()),
            ));
        }
        embeddings
            .into_iter()
            .map(|e| to_sparse_vector(e.indices, e.values))
            .collect()
    }
}

/// Pair model output into a [`SparseVector`]: positive weights only,
/// indices ascending.
#[cfg_attr(not(feature = "local-embeddings-fastembed"), allow(dead_code))]
fn to_sparse_vector(indices: Vec<usize>, values: Vec<f32>) -> Result<SparseVector> {
    let mut pairs: Vec<(u32, f32)> = Vec::with_capacity(indices.len());
    for (index, value) in indices.into_iter().zip(values) {
        if value <= 0.0 {
            continue;
        }
        let index = u32::try_from(index).map_err(|_| {
            crate::error::Error::backend("sparse", format!("term index {} out of range", index))
        })?;
        pairs.push((index, value));
    }
    pairs.sort_by_key(|p| p.0);
    Ok(SparseVector {
        indices: pairs.iter().map(|p| p.0).collect(),
        values: pairs.iter().map(|p| p.1).collect(),
    })
}

fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
}

fn term_index(token: &str) -> u32 {
    let mut hash = FNV_OFFSET;
    for byte in token.as_bytes() {
        hash ^= *byte as u32;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash & ((1 << INDEX_BITS) - 1)
}
