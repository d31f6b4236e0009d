//! Dense and sparse text encoders.
//!
//! Every stored record carries two vectors computed from the same text:
//!
//! - a **dense** vector from a [`DenseEncoder`]:
//!   - [`FastembedEncoder`] runs all-MiniLM-L6-v2 locally (feature
//!     `local-embeddings-fastembed`)
//!   - [`OpenAiEncoder`] calls `/v1/embeddings` with retry and backoff
//!   - [`DisabledEncoder`] refuses every call
//! - a **sparse** vector from a [`SparseEncoder`], chosen by
//!   `embedding.sparse_provider`, see [`sparse`].
//!
//! Also provides the vector utilities used by the SQLite index:
//! [`cosine_similarity`], [`vec_to_blob`], [`blob_to_vec`].
//!
//! # Provider Selection
//!
//! ```rust
//! # use reelsearch::config::EmbeddingConfig;
//! # use reelsearch::embedding::create_dense_encoder;
//! let config = EmbeddingConfig { provider: "disabled".into(), ..Default::default() };
//! let encoder = create_dense_encoder(&config).unwrap();
//! assert_eq!(encoder.model_name(), "disabled");
//! ```

pub mod sparse;

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::config::EmbeddingConfig;
use crate::error::{Error, Result};
use crate::models::SparseVector;
use crate::openai::OpenAiClient;
use crate::store::SparseModifier;

#[cfg(feature = "local-embeddings-fastembed")]
pub use sparse::FastembedSparseEncoder;
pub use sparse::TermWeightEncoder;

/// Text → dense vector. One output per input, same order.
#[async_trait]
pub trait DenseEncoder: Send + Sync {
    fn model_name(&self) -> &str;
    fn dims(&self) -> usize;
    async fn encode(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Text → sparse weighted-term vector. One output per input, same order.
#[async_trait]
pub trait SparseEncoder: Send + Sync {
    fn model_name(&self) -> &str;
    async fn embed(&self, texts: &[String]) -> Result<Vec<SparseVector>>;
}

/// Embed a single query text.
pub async fn encode_query(encoder: &dyn DenseEncoder, text: &str) -> Result<Vec<f32>> {
    encoder
        .encode(&[text.to_string()])
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| Error::backend("embedding", "empty embedding response"))
}

// ============ Disabled ============

pub struct DisabledEncoder {
    dims: usize,
}

impl DisabledEncoder {
    pub fn new(dims: usize) -> Self {
        Self { dims }
    }
}

#[async_trait]
impl DenseEncoder for DisabledEncoder {
    fn model_name(&self) -> &str {
        "disabled"
    }
    fn dims(&self) -> usize {
        self.dims
    }
    async fn encode(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Err(Error::backend("embedding", "embedding provider is disabled"))
    }
}

// ============ OpenAI ============

/// Dense encoder using the OpenAI embeddings API.
pub struct OpenAiEncoder {
    client: OpenAiClient,
    model: String,
    dims: usize,
    batch_size: usize,
    max_retries: u32,
}

impl OpenAiEncoder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| Error::Config("embedding.model required for OpenAI provider".into()))?;
        Ok(Self {
            client: OpenAiClient::from_env("openai-embeddings", config.timeout_secs)?,
            model,
            dims: config.dims,
            batch_size: config.batch_size.max(1),
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl DenseEncoder for OpenAiEncoder {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }

    async fn encode(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            let mut body = serde_json::json!({
                "model": self.model,
                "input": batch,
            });
            // Only the v3 models accept a requested size.
            if self.model.starts_with("text-embedding-3") {
                body["dimensions"] = serde_json::json!(self.dims);
            }
            let json = self.client.post_json("embeddings", &body, self.max_retries).await?;
            out.extend(parse_openai_response(&json)?);
            debug!(batch = batch.len(), "embedded batch");
        }
        check_shape(&out, texts.len(), self.dims)?;
        Ok(out)
    }
}

/// Extract `data[].embedding`, ordered by each item's `index`.
fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| Error::backend("openai-embeddings", "invalid response: missing data array"))?;

    let mut indexed = Vec::with_capacity(data.len());
    for (position, item) in data.iter().enumerate() {
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| Error::backend("openai-embeddings", "invalid response: missing embedding"))?;
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(position);
        let vec: Vec<f32> = embedding
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect();
        indexed.push((index, vec));
    }
    indexed.sort_by_key(|(i, _)| *i);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

fn check_shape(vectors: &[Vec<f32>], expected: usize, dims: usize) -> Result<()> {
    if vectors.len() != expected {
        return Err(Error::backend(
            "embedding",
            format!("expected {} vectors, got {}", expected, vectors.len()),
        ));
    }
    if let Some(bad) = vectors.iter().find(|v| v.len() != dims) {
        return Err(Error::Config(format!(
            "embedding.dims is {} but the model returned {} dimensions",
            dims,
            bad.len()
        )));
    }
    Ok(())
}

// ============ Local (fastembed) ============

/// Local dense encoder. The model is downloaded on first use and cached;
/// after that no network calls are made.
#[cfg(feature = "local-embeddings-fastembed")]
pub struct FastembedEncoder {
    model_name: String,
    dims: usize,
    batch_size: usize,
    model: Arc<std::sync::Mutex<Option<fastembed::TextEmbedding>>>,
}

#[cfg(feature = "local-embeddings-fastembed")]
impl FastembedEncoder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model_name = config
            .model
            .clone()
            .unwrap_or_else(|| "all-minilm-l6-v2".to_string());
        // Validate the name up front so a typo fails at startup.
        config_to_fastembed_model(&model_name)?;
        Ok(Self {
            model_name,
            dims: config.dims,
            batch_size: config.batch_size.max(1),
            model: Arc::new(std::sync::Mutex::new(None)),
        })
    }
}

#[cfg(feature = "local-embeddings-fastembed")]
fn config_to_fastembed_model(name: &str) -> Result<fastembed::EmbeddingModel> {
    match name {
        "all-minilm-l6-v2" => Ok(fastembed::EmbeddingModel::AllMiniLML6V2),
        "bge-small-en-v1.5" => Ok(fastembed::EmbeddingModel::BGESmallENV15),
        "bge-base-en-v1.5" => Ok(fastembed::EmbeddingModel::BGEBaseENV15),
        "multilingual-e5-small" => Ok(fastembed::EmbeddingModel::MultilingualE5Small),
        other => Err(Error::Config(format!(
            "unknown local embedding model '{}'. Supported: all-minilm-l6-v2, \
             bge-small-en-v1.5, bge-base-en-v1.5, multilingual-e5-small",
            other
        ))),
    }
}

#[cfg(feature = "local-embeddings-fastembed")]
#[async_trait]
impl DenseEncoder for FastembedEncoder {
    fn model_name(&self) -> &str {
        &self.model_name
    }
    fn dims(&self) -> usize {
        self.dims
    }

    async fn encode(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let slot = self.model.clone();
        let model_name = self.model_name.clone();
        let batch_size = self.batch_size;
        let texts = texts.to_vec();
        let expected = texts.len();

        let vectors = tokio::task::spawn_blocking(move || -> Result<Vec<Vec<f32>>> {
            let mut guard = slot
                .lock()
                .map_err(|_| Error::internal("embedding model lock poisoned"))?;
            if guard.is_none() {
                let options = fastembed::InitOptions::new(config_to_fastembed_model(&model_name)?)
                    .with_show_download_progress(false);
                let model = fastembed::TextEmbedding::try_new(options).map_err(|e| {
                    Error::backend("fastembed", format!("failed to initialize model: {}", e))
                })?;
                *guard = Some(model);
            }
            let model = guard
                .as_mut()
                .ok_or_else(|| Error::internal("embedding model missing after init"))?;
            model
                .embed(texts, Some(batch_size))
                .map_err(|e| Error::backend("fastembed", e))
        })
        .await??;

        check_shape(&vectors, expected, self.dims)?;
        Ok(vectors)
    }
}

/// Create the configured [`DenseEncoder`].
///
/// | Config Value | Encoder |
/// |-------------|----------|
/// | `"disabled"` | [`DisabledEncoder`] |
/// | `"openai"` | [`OpenAiEncoder`] |
/// | `"local"` | `FastembedEncoder` (feature `local-embeddings-fastembed`) |
pub fn create_dense_encoder(config: &EmbeddingConfig) -> Result<Arc<dyn DenseEncoder>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledEncoder::new(config.dims))),
        "openai" => Ok(Arc::new(OpenAiEncoder::new(config)?)),
        #[cfg(feature = "local-embeddings-fastembed")]
        "local" => Ok(Arc::new(FastembedEncoder::new(config)?)),
        #[cfg(not(feature = "local-embeddings-fastembed"))]
        "local" => Err(Error::Config(
            "local embedding provider requires --features local-embeddings-fastembed".into(),
        )),
        other => Err(Error::Config(format!("unknown embedding provider: {}", other))),
    }
}

/// Create the configured [`SparseEncoder`].
///
/// | Config Value | Encoder |
/// |-------------|----------|
/// | `"local"` | `FastembedSparseEncoder`, or [`TermWeightEncoder`] without feature `local-embeddings-fastembed` |
/// | `"hash"` | [`TermWeightEncoder`] |
pub fn create_sparse_encoder(config: &EmbeddingConfig) -> Result<Arc<dyn SparseEncoder>> {
    match config.sparse_provider.as_str() {
        "hash" => Ok(Arc::new(TermWeightEncoder::new())),
        #[cfg(feature = "local-embeddings-fastembed")]
        "local" => Ok(Arc::new(FastembedSparseEncoder::new(config))),
        #[cfg(not(feature = "local-embeddings-fastembed"))]
        "local" => {
            tracing::warn!("local sparse model needs feature local-embeddings-fastembed; using term hashing");
            Ok(Arc::new(TermWeightEncoder::new()))
        }
        other => Err(Error::Config(format!("unknown sparse provider: {}", other))),
    }
}

/// Sparse-space modifier matching [`create_sparse_encoder`]: learned SPLADE
/// weights are used as stored, term-frequency vectors get IDF.
pub fn sparse_modifier(config: &EmbeddingConfig) -> SparseModifier {
    let learned = cfg!(feature = "local-embeddings-fastembed") && config.sparse_provider == "local";
    if learned {
        SparseModifier::None
    } else {
        SparseModifier::Idf
    }
}

/// Cosine similarity of two equal-length vectors. Zero vectors score 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom == 0.0 {
        0.0
    } else {
        dot / denom
    }
}

/// Encode a float vector as little-endian f32 bytes.
///
/// ```rust
/// use reelsearch::embedding::{vec_to_blob, blob_to_vec};
///
/// let v = vec![1.0f32, -2.5, 3.125];
/// let blob = vec_to_blob(&v);
/// assert_eq!(blob.len(), 12);
/// assert_eq!(blob_to_vec(&blob), v);
/// ```
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Reverse of [`vec_to_blob`].
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_identical() {
        let a = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&a, &a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_orthogonal_and_zero() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
    }

    #[test]
    fn test_parse_openai_response_orders_by_index() {
        let json = serde_json::json!({
            "data": [
                {"index": 1, "embedding": [0.0, 1.0]},
                {"index": 0, "embedding": [1.0, 0.0]}
            ]
        });
        let v = parse_openai_response(&json).unwrap();
        assert_eq!(v, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    }

    #[test]
    fn test_parse_openai_response_missing_data() {
        assert!(parse_openai_response(&serde_json::json!({"error": "x"})).is_err());
    }

    #[test]
    fn test_check_shape_dims_mismatch_is_config_error() {
        let err = check_shape(&[vec![0.0; 3]], 1, 384).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(check_shape(&[vec![0.0; 4]], 2, 4).is_err());
    }

    #[tokio::test]
    async fn test_disabled_encoder_refuses() {
        let config = EmbeddingConfig {
            provider: "disabled".into(),
            ..Default::default()
        };
        let enc = create_dense_encoder(&config).unwrap();
        assert!(enc.encode(&["x".to_string()]).await.is_err());
        assert_eq!(enc.dims(), 384);
    }

    #[tokio::test]
    async fn test_hash_sparse_provider() {
        let config = EmbeddingConfig {
            sparse_provider: "hash".into(),
            ..Default::default()
        };
        let enc = create_sparse_encoder(&config).unwrap();
        assert_eq!(enc.model_name(), "fnv-term-weight");
        let out = enc.embed(&["spawn_blocking".to_string()]).await.unwrap();
        assert_eq!(out.len(), 1);
        assert!(!out[0].is_empty());
        assert_eq!(sparse_modifier(&config), SparseModifier::Idf);
    }

    #[test]
    fn test_local_sparse_provider() {
        let config = EmbeddingConfig::default();
        let enc = create_sparse_encoder(&config).unwrap();
        if cfg!(feature = "local-embeddings-fastembed") {
            assert_eq!(enc.model_name(), "splade-pp-en-v1");
            assert_eq!(sparse_modifier(&config), SparseModifier::None);
        } else {
            assert_eq!(enc.model_name(), "fnv-term-weight");
            assert_eq!(sparse_modifier(&config), SparseModifier::Idf);
        }
    }

    #[test]
    fn test_unknown_sparse_provider() {
        let config = EmbeddingConfig {
            sparse_provider: "bm42".into(),
            ..Default::default()
        };
        assert!(create_sparse_encoder(&config).is_err());
    }

    #[test]
    fn test_unknown_provider() {
        let config = EmbeddingConfig {
            provider: "telepathy".into(),
            ..Default::default()
        };
        assert!(create_dense_encoder(&config).is_err());
    }
}
