//! Hybrid vector storage.
//!
//! The [`VectorIndex`] trait defines everything the pipeline needs from a
//! storage engine: idempotent collection setup, batch upsert, fused hybrid
//! query, and per-video bookkeeping. Two backends implement it:
//!
//! - [`SqliteIndex`] keeps everything in a local SQLite file and does the
//!   prefetch and fusion in process. This is the default.
//! - [`QdrantIndex`] talks to a Qdrant server over its REST API and lets the
//!   server run prefetch and RRF fusion.
//!
//! Implementations must be `Send + Sync` to be shared across tasks.

pub mod qdrant;
pub mod sqlite;

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::models::{ScoredPayload, SparseVector, StoredRecord};

pub use qdrant::QdrantIndex;
pub use sqlite::SqliteIndex;

/// Qdrant's BM25-style IDF: `ln((n - df + 0.5) / (df + 0.5) + 1)` for a term
/// found in `df` of `n` points.
pub fn idf(n: u64, df: u64) -> f32 {
    let (n, df) = (n as f64, df.min(n) as f64);
    ((n - df + 0.5) / (df + 0.5) + 1.0).ln() as f32
}

/// Name of the dense vector space on every record.
pub const DENSE_VECTOR: &str = "dense";
/// Name of the sparse vector space on every record.
pub const SPARSE_VECTOR: &str = "sparse";

/// Dense distance metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Distance {
    Cosine,
}

impl Distance {
    pub fn as_str(&self) -> &'static str {
        match self {
            Distance::Cosine => "Cosine",
        }
    }
}

/// Query-time weighting of the sparse space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SparseModifier {
    /// Stored weights are used as-is.
    None,
    /// Each query term is scaled by its inverse document frequency.
    Idf,
}

impl SparseModifier {
    pub fn as_str(&self) -> &'static str {
        match self {
            SparseModifier::None => "none",
            SparseModifier::Idf => "idf",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "idf" => SparseModifier::Idf,
            _ => SparseModifier::None,
        }
    }
}

/// Shape of a hybrid collection: one dense and one sparse space per record.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionSchema {
    pub name: String,
    pub dense_dims: usize,
    pub distance: Distance,
    pub sparse_modifier: SparseModifier,
}

impl CollectionSchema {
    pub fn new(name: impl Into<String>, dense_dims: usize) -> Self {
        Self {
            name: name.into(),
            dense_dims,
            distance: Distance::Cosine,
            sparse_modifier: SparseModifier::None,
        }
    }

    pub fn with_sparse_modifier(mut self, modifier: SparseModifier) -> Self {
        self.sparse_modifier = modifier;
        self
    }

    /// Schema from `[storage]` and `[embedding]`. The sparse modifier
    /// follows the configured sparse encoder.
    pub fn from_config(config: &Config) -> Self {
        Self::new(config.storage.collection.clone(), config.embedding.dims)
            .with_sparse_modifier(crate::embedding::sparse_modifier(&config.embedding))
    }

    pub(crate) fn check_dims(&self, existing: usize) -> Result<()> {
        if existing != self.dense_dims {
            return Err(Error::Config(format!(
                "collection '{}' stores {}-dimensional vectors but embedding.dims is {}",
                self.name, existing, self.dense_dims
            )));
        }
        Ok(())
    }
}

/// Result of [`VectorIndex::ensure_collection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnsureOutcome {
    Created,
    AlreadyExists,
}

/// A prefetch-then-fuse query.
#[derive(Debug, Clone)]
pub struct HybridQuery {
    pub dense: Vec<f32>,
    pub sparse: SparseVector,
    /// Candidates taken from each prefetch branch (K).
    pub prefetch_limit: usize,
    /// Results returned after fusion.
    pub limit: usize,
    /// Restrict both branches to one video.
    pub video_id: Option<String>,
    /// RRF smoothing constant. Only used by engines that fuse in process.
    pub rrf_k: f64,
}

/// Abstract hybrid vector store.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`ensure_collection`](VectorIndex::ensure_collection) | Create the collection if absent |
/// | [`upsert`](VectorIndex::upsert) | Store one batch of records |
/// | [`query`](VectorIndex::query) | Dense + sparse prefetch fused with RRF |
/// | [`count`](VectorIndex::count) | Number of stored records |
/// | [`delete_video`](VectorIndex::delete_video) | Remove every record of one video |
/// | [`replace_video`](VectorIndex::replace_video) | Swap one video's records for a new batch |
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Idempotent check-then-create.
    ///
    /// Losing a creation race is reported as [`EnsureOutcome::AlreadyExists`].
    /// An existing collection is reused unmodified; a dimensionality mismatch
    /// is a configuration error.
    async fn ensure_collection(&self, schema: &CollectionSchema) -> Result<EnsureOutcome>;

    /// Store a batch of records. Returns the number written.
    async fn upsert(&self, records: &[StoredRecord]) -> Result<usize>;

    /// Run a fused hybrid query.
    async fn query(&self, query: &HybridQuery) -> Result<Vec<ScoredPayload>>;

    /// Count records, optionally for one video.
    async fn count(&self, video_id: Option<&str>) -> Result<u64>;

    /// Delete every record of `video_id`. Returns the number removed.
    async fn delete_video(&self, video_id: &str) -> Result<u64>;

    /// Remove the existing records of `video_id` and store `records` in their
    /// place. Returns `(removed, written)`.
    ///
    /// The default deletes then upserts. Engines with transactions override
    /// it so a failed write leaves the old records in place.
    async fn replace_video(&self, video_id: &str, records: &[StoredRecord]) -> Result<(u64, usize)> {
        let removed = self.delete_video(video_id).await?;
        let written = self.upsert(records).await?;
        Ok((removed, written))
    }
}

/// Open the backend named by `storage.backend`.
pub async fn create_index(config: &Config) -> Result<Arc<dyn VectorIndex>> {
    match config.storage.backend.as_str() {
        "sqlite" => Ok(Arc::new(
            SqliteIndex::open(&config.storage.path, &config.storage.collection).await?,
        )),
        "qdrant" => {
            let url = config
                .storage
                .url
                .as_deref()
                .ok_or_else(|| Error::Config("storage.url must be set for qdrant".into()))?;
            Ok(Arc::new(QdrantIndex::new(url, &config.storage.collection)?))
        }
        other => Err(Error::Config(format!("unknown storage backend: {}", other))),
    }
}

/// Run `reel init`: create the configured collection if it is missing.
pub async fn run_init(config: &Config) -> anyhow::Result<()> {
    let index = create_index(config).await?;
    let schema = CollectionSchema::from_config(config);
    match index.ensure_collection(&schema).await? {
        EnsureOutcome::Created => println!(
            "created collection '{}' ({} dims, {}, sparse modifier {})",
            schema.name,
            schema.dense_dims,
            schema.distance.as_str(),
            schema.sparse_modifier.as_str()
        ),
        EnsureOutcome::AlreadyExists => {
            println!("collection '{}' already exists", schema.name)
        }
    }
    println!("ok");
    Ok(())
}
