use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub storage: StorageConfig,
    #[serde(default)]
    pub workdir: WorkdirConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub frames: FramesConfig,
    #[serde(default)]
    pub ocr: OcrConfig,
    #[serde(default)]
    pub workers: WorkersConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub transcription: TranscriptionConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub download: DownloadConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_backend")]
    pub backend: String,
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
    #[serde(default = "default_collection")]
    pub collection: String,
    /// Base URL of the Qdrant REST API (backend = "qdrant").
    #[serde(default)]
    pub url: Option<String>,
}

fn default_backend() -> String {
    "sqlite".to_string()
}
fn default_db_path() -> PathBuf {
    PathBuf::from("./data/reel.sqlite")
}
fn default_collection() -> String {
    "video_knowledge_hybrid".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct WorkdirConfig {
    #[serde(default = "default_workdir")]
    pub path: PathBuf,
}

impl Default for WorkdirConfig {
    fn default() -> Self {
        Self {
            path: default_workdir(),
        }
    }
}

fn default_workdir() -> PathBuf {
    PathBuf::from("./data/tmp")
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_min_chunk_chars")]
    pub min_chunk_chars: usize,
    #[serde(default = "default_overlap_segments")]
    pub overlap_segments: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            min_chunk_chars: default_min_chunk_chars(),
            overlap_segments: default_overlap_segments(),
        }
    }
}

fn default_min_chunk_chars() -> usize {
    500
}
fn default_overlap_segments() -> usize {
    2
}

#[derive(Debug, Deserialize, Clone)]
pub struct FramesConfig {
    #[serde(default = "default_interval_seconds")]
    pub interval_seconds: u32,
    #[serde(default = "default_max_height")]
    pub max_height: u32,
    #[serde(default = "default_dedup_threshold")]
    pub dedup_threshold: f64,
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,
    #[serde(default = "default_ffmpeg")]
    pub ffmpeg: String,
    #[serde(default = "default_ffprobe")]
    pub ffprobe: String,
}

impl Default for FramesConfig {
    fn default() -> Self {
        Self {
            interval_seconds: default_interval_seconds(),
            max_height: default_max_height(),
            dedup_threshold: default_dedup_threshold(),
            jpeg_quality: default_jpeg_quality(),
            ffmpeg: default_ffmpeg(),
            ffprobe: default_ffprobe(),
        }
    }
}

fn default_interval_seconds() -> u32 {
    30
}
fn default_max_height() -> u32 {
    720
}
fn default_dedup_threshold() -> f64 {
    5.0
}
fn default_jpeg_quality() -> u8 {
    80
}
fn default_ffmpeg() -> String {
    "ffmpeg".to_string()
}
fn default_ffprobe() -> String {
    "ffprobe".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct OcrConfig {
    #[serde(default = "default_ocr_command")]
    pub command: String,
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f32,
    #[serde(default = "default_languages")]
    pub languages: String,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            command: default_ocr_command(),
            min_confidence: default_min_confidence(),
            languages: default_languages(),
        }
    }
}

fn default_ocr_command() -> String {
    "tesseract".to_string()
}
fn default_min_confidence() -> f32 {
    0.6
}
fn default_languages() -> String {
    "eng".to_string()
}

/// Pool sizes. `0` means "pick automatically".
#[derive(Debug, Deserialize, Clone, Default)]
pub struct WorkersConfig {
    #[serde(default)]
    pub branch_threads: usize,
    #[serde(default)]
    pub fanout_threads: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_result_limit")]
    pub result_limit: usize,
    #[serde(default = "default_rrf_k")]
    pub rrf_k: f64,
    #[serde(default = "default_anchor_bucket_seconds")]
    pub anchor_bucket_seconds: f64,
    #[serde(default = "default_max_anchors")]
    pub max_anchors: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            result_limit: default_result_limit(),
            rrf_k: default_rrf_k(),
            anchor_bucket_seconds: default_anchor_bucket_seconds(),
            max_anchors: default_max_anchors(),
        }
    }
}

fn default_result_limit() -> usize {
    15
}
fn default_rrf_k() -> f64 {
    60.0
}
fn default_anchor_bucket_seconds() -> f64 {
    10.0
}
fn default_max_anchors() -> usize {
    7
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_dims")]
    pub dims: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Sparse (keyword) encoder: `"local"` (fastembed SPLADE) or `"hash"`.
    #[serde(default = "default_sparse_provider")]
    pub sparse_provider: String,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: default_dims(),
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
            sparse_provider: default_sparse_provider(),
        }
    }
}

fn default_provider() -> String {
    "local".to_string()
}
fn default_dims() -> usize {
    384
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_sparse_provider() -> String {
    "local".to_string()
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct TranscriptionConfig {
    #[serde(default = "default_transcription_model")]
    pub model: String,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default = "default_transcription_timeout")]
    pub timeout_secs: u64,
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self {
            model: default_transcription_model(),
            language: None,
            timeout_secs: default_transcription_timeout(),
        }
    }
}

fn default_transcription_model() -> String {
    "whisper-1".to_string()
}
fn default_transcription_timeout() -> u64 {
    600
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    #[serde(default = "default_generation_model")]
    pub model: String,
    #[serde(default)]
    pub temperature: f32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            model: default_generation_model(),
            temperature: 0.0,
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_generation_model() -> String {
    "gpt-4o-mini".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct DownloadConfig {
    #[serde(default = "default_ytdlp")]
    pub ytdlp: String,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            ytdlp: default_ytdlp(),
        }
    }
}

fn default_ytdlp() -> String {
    "yt-dlp".to_string()
}

impl Config {
    /// Parse and validate a TOML document.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config =
            toml::from_str(content).with_context(|| "Failed to parse config file")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        match self.storage.backend.as_str() {
            "sqlite" => {}
            "qdrant" => {
                if self.storage.url.is_none() {
                    anyhow::bail!("storage.url must be set when backend is 'qdrant'");
                }
            }
            other => anyhow::bail!(
                "Unknown storage backend: '{}'. Must be sqlite or qdrant.",
                other
            ),
        }
        if self.storage.collection.trim().is_empty() {
            anyhow::bail!("storage.collection must not be empty");
        }

        if self.chunking.min_chunk_chars == 0 {
            anyhow::bail!("chunking.min_chunk_chars must be > 0");
        }

        if self.frames.interval_seconds == 0 {
            anyhow::bail!("frames.interval_seconds must be > 0");
        }
        if self.frames.max_height == 0 {
            anyhow::bail!("frames.max_height must be > 0");
        }
        if !(1..=100).contains(&self.frames.jpeg_quality) {
            anyhow::bail!("frames.jpeg_quality must be in [1, 100]");
        }

        if !(0.0..1.0).contains(&self.ocr.min_confidence) {
            anyhow::bail!("ocr.min_confidence must be in [0.0, 1.0)");
        }

        if self.workers.branch_threads == 1 {
            anyhow::bail!("workers.branch_threads must be 0 (auto) or >= 2");
        }

        if self.retrieval.result_limit < 1 {
            anyhow::bail!("retrieval.result_limit must be >= 1");
        }
        if self.retrieval.rrf_k <= 0.0 {
            anyhow::bail!("retrieval.rrf_k must be > 0");
        }
        if self.retrieval.anchor_bucket_seconds <= 0.0 {
            anyhow::bail!("retrieval.anchor_bucket_seconds must be > 0");
        }

        if self.embedding.dims == 0 {
            anyhow::bail!("embedding.dims must be > 0");
        }
        match self.embedding.provider.as_str() {
            "disabled" | "openai" | "local" => {}
            other => anyhow::bail!(
                "Unknown embedding provider: '{}'. Must be disabled, openai, or local.",
                other
            ),
        }
        if self.embedding.provider == "openai" && self.embedding.model.is_none() {
            anyhow::bail!("embedding.model must be specified when provider is 'openai'");
        }
        match self.embedding.sparse_provider.as_str() {
            "local" | "hash" => {}
            other => anyhow::bail!(
                "Unknown embedding.sparse_provider: '{}'. Must be local or hash.",
                other
            ),
        }

        Ok(())
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    Config::from_toml(&content)
}
