//! Ingestion pipeline orchestration.
//!
//! Coordinates one video from URL to stored records:
//!
//! ```text
//! Pending → Downloading → Processing → Aggregating → Stored
//!                 (any stage) ↘ Failed
//! ```
//!
//! - **Downloading**: audio and video are fetched concurrently. With visuals
//!   disabled the video is never requested.
//! - **Processing**: the audio branch (transcribe, then chunk on the branch
//!   pool) and the visual branch (sample frames on the branch pool, then OCR
//!   each frame on the fan-out pool) run concurrently.
//! - **Aggregating**: audio chunks followed by visual chunks, each in time order.
//! - **Stored**: normalize, drop empty payloads, embed, upsert as one batch.
//!
//! A failing branch is recorded in the [`IngestReport`] and the other
//! branch's chunks are still stored. The job fails only when every requested
//! branch failed, when a job-level error occurs, or when embedding or upsert
//! fails; the [`IngestFailure`] then carries the report as it stood.
//!
//! With `replace`, the video's old records are swapped for the new batch in
//! the final write, so a failed job leaves them untouched.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use crate::chunk::ChunkingProcessor;
use crate::config::Config;
use crate::download::{video_id_from_url, MediaFetcher, YtDlpFetcher};
use crate::embedding::{create_dense_encoder, create_sparse_encoder, DenseEncoder, SparseEncoder};
use crate::error::{Error, Result};
use crate::frames::{FfmpegOpener, FrameSampler, VideoOpener};
use crate::models::{Chunk, FrameCandidate, StoredRecord};
use crate::normalize::normalize_batch;
use crate::ocr::{OcrEngine, OcrFanout, TesseractOcr};
use crate::pool::{PoolSizing, Pools};
use crate::store::{create_index, CollectionSchema, VectorIndex};
use crate::transcribe::{OpenAiTranscriber, Transcriber};

/// Lifecycle of one ingest job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Pending,
    Downloading,
    Processing,
    Aggregating,
    Stored,
    Failed,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Downloading => "downloading",
            JobState::Processing => "processing",
            JobState::Aggregating => "aggregating",
            JobState::Stored => "stored",
            JobState::Failed => "failed",
        }
    }
}

/// How one branch ended.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "lowercase")]
pub enum BranchOutcome {
    /// Not requested.
    Skipped,
    /// Ran to completion with nothing to contribute.
    Empty,
    /// Produced this many chunks.
    Produced(usize),
    /// Ended with an error; the message is kept for reporting.
    Failed(String),
}

impl BranchOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, BranchOutcome::Failed(_))
    }
}

#[derive(Debug, Clone)]
pub struct IngestRequest {
    pub url: String,
    /// Defaults to the id derived from `url`.
    pub video_id: Option<String>,
    pub include_visuals: bool,
    /// Swap this video's existing records for the new batch. Existing
    /// records are left alone if the job fails or extracts nothing.
    pub replace: bool,
}

impl IngestRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            video_id: None,
            include_visuals: true,
            replace: false,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub video_id: String,
    /// Every state the job passed through, in order.
    pub states: Vec<JobState>,
    pub audio: BranchOutcome,
    pub visual: BranchOutcome,
    pub stored: usize,
    pub replaced: u64,
}

impl IngestReport {
    fn new(video_id: String) -> Self {
        Self {
            video_id,
            states: Vec::new(),
            audio: BranchOutcome::Skipped,
            visual: BranchOutcome::Skipped,
            stored: 0,
            replaced: 0,
        }
    }

    fn transition(&mut self, state: JobState) {
        info!(video_id = %self.video_id, state = state.as_str(), "job state");
        self.states.push(state);
    }

    pub fn state(&self) -> JobState {
        self.states.last().copied().unwrap_or(JobState::Pending)
    }
}

/// A failed ingest job: the error and the report up to the failure.
#[derive(Debug, thiserror::Error)]
#[error("{error}")]
pub struct IngestFailure {
    pub report: IngestReport,
    pub error: Error,
}

/// External collaborators used by the pipeline.
#[derive(Clone)]
pub struct Collaborators {
    pub fetcher: Arc<dyn MediaFetcher>,
    pub transcriber: Arc<dyn Transcriber>,
    pub ocr: Arc<dyn OcrEngine>,
    pub video: Arc<dyn VideoOpener>,
    pub dense: Arc<dyn DenseEncoder>,
    pub sparse: Arc<dyn SparseEncoder>,
    pub index: Arc<dyn VectorIndex>,
}

/// Tunables resolved from [`Config`].
#[derive(Debug, Clone)]
pub struct IngestSettings {
    pub workdir: PathBuf,
    pub schema: CollectionSchema,
    pub chunker: ChunkingProcessor,
    pub sampler: FrameSampler,
    pub min_confidence: f32,
    pub jpeg_quality: u8,
}

impl IngestSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            workdir: config.workdir.path.clone(),
            schema: CollectionSchema::from_config(config),
            chunker: ChunkingProcessor::new(
                config.chunking.min_chunk_chars,
                config.chunking.overlap_segments,
            ),
            sampler: FrameSampler::from_config(&config.frames),
            min_confidence: config.ocr.min_confidence,
            jpeg_quality: config.frames.jpeg_quality,
        }
    }
}

pub struct IngestionOrchestrator {
    collab: Collaborators,
    settings: IngestSettings,
    pools: Pools,
    ocr: OcrFanout,
}

impl IngestionOrchestrator {
    pub fn new(collab: Collaborators, settings: IngestSettings, pools: Pools) -> Self {
        let ocr = OcrFanout::new(
            collab.ocr.clone(),
            pools.fanout.clone(),
            settings.min_confidence,
            settings.jpeg_quality,
        );
        Self {
            collab,
            settings,
            pools,
            ocr,
        }
    }

    /// Run one ingest job to completion.
    ///
    /// On failure the returned [`IngestFailure`] carries the report as it
    /// stood, ending in [`JobState::Failed`].
    pub async fn ingest(&self, request: IngestRequest) -> std::result::Result<IngestReport, IngestFailure> {
        let video_id = request
            .video_id
            .clone()
            .filter(|id| !id.trim().is_empty())
            .or_else(|| video_id_from_url(&request.url));

        let mut report = IngestReport::new(video_id.clone().unwrap_or_default());
        report.transition(JobState::Pending);

        let outcome = match video_id {
            Some(_) => self.run(&request, &mut report).await,
            None => Err(Error::source_unavailable(
                &request.url,
                "cannot derive a video id; pass one explicitly",
            )),
        };

        match outcome {
            Ok(()) => Ok(report),
            Err(error) => {
                report.transition(JobState::Failed);
                warn!(video_id = %report.video_id, error = %error, "ingest failed");
                Err(IngestFailure { report, error })
            }
        }
    }

    async fn run(&self, request: &IngestRequest, report: &mut IngestReport) -> Result<()> {
        let video_id = report.video_id.clone();
        let index = &self.collab.index;

        index.ensure_collection(&self.settings.schema).await?;

        std::fs::create_dir_all(&self.settings.workdir)?;
        let job_dir = tempfile::Builder::new()
            .prefix(&format!("{}-", video_id))
            .tempdir_in(&self.settings.workdir)?;
        let frame_dir = job_dir.path().join("frames");
        std::fs::create_dir_all(&frame_dir)?;

        report.transition(JobState::Downloading);
        let fetcher = &self.collab.fetcher;
        let (audio_path, video_path) = tokio::join!(
            fetcher.fetch_audio(&request.url, job_dir.path(), &video_id),
            async {
                if request.include_visuals {
                    Some(fetcher.fetch_video(&request.url, job_dir.path(), &video_id).await)
                } else {
                    None
                }
            }
        );

        report.transition(JobState::Processing);
        let (audio, visual) = tokio::join!(self.audio_branch(audio_path), async {
            match video_path {
                Some(path) => Some(self.visual_branch(path, &frame_dir).await),
                None => None,
            }
        });

        let (audio_outcome, audio_chunks, audio_err) = settle("audio", Some(audio));
        let (visual_outcome, visual_chunks, visual_err) = settle("visual", visual);
        report.audio = audio_outcome;
        report.visual = visual_outcome;

        let mut errors: Vec<Error> = audio_err.into_iter().chain(visual_err).collect();
        if let Some(pos) = errors.iter().position(|e| !e.is_branch_local()) {
            return Err(errors.swap_remove(pos));
        }
        let visual_ok = matches!(report.visual, BranchOutcome::Empty | BranchOutcome::Produced(_));
        if report.audio.is_failed() && !visual_ok && !errors.is_empty() {
            return Err(errors.swap_remove(0));
        }

        report.transition(JobState::Aggregating);
        let mut chunks = audio_chunks;
        chunks.extend(visual_chunks);

        let payloads = normalize_batch(&video_id, &chunks);
        if payloads.is_empty() {
            if request.replace {
                warn!(video_id = %video_id, "no content extracted; keeping existing records");
            } else {
                info!(video_id = %video_id, "no content extracted; nothing to store");
            }
            report.transition(JobState::Stored);
            return Ok(());
        }

        let texts: Vec<String> = payloads.iter().map(|p| p.text.clone()).collect();
        let dense = self.collab.dense.encode(&texts).await?;
        let sparse = self.collab.sparse.embed(&texts).await?;
        if dense.len() != payloads.len() || sparse.len() != payloads.len() {
            return Err(Error::backend(
                "embedding",
                format!(
                    "{} payloads but {} dense and {} sparse vectors",
                    payloads.len(),
                    dense.len(),
                    sparse.len()
                ),
            ));
        }

        let records: Vec<StoredRecord> = payloads
            .into_iter()
            .zip(dense)
            .zip(sparse)
            .map(|((payload, dense), sparse)| StoredRecord::new(payload, dense, sparse))
            .collect();
        // Old records go only once the new batch is ready to take their place.
        if request.replace {
            let (removed, stored) = index.replace_video(&video_id, &records).await?;
            report.replaced = removed;
            report.stored = stored;
        } else {
            report.stored = index.upsert(&records).await?;
        }
        report.transition(JobState::Stored);

        drop(job_dir);
        Ok(())
    }

    async fn audio_branch(&self, path: Result<PathBuf>) -> Result<Vec<Chunk>> {
        let path = path?;
        let segments = self.collab.transcriber.transcribe(&path).await?;
        let chunker = self.settings.chunker.clone();
        self.pools.branch.run(move || chunker.process(&segments)).await
    }

    async fn visual_branch(&self, path: Result<PathBuf>, frame_dir: &Path) -> Result<Vec<Chunk>> {
        let path = path?;
        let opener = self.collab.video.clone();
        let sampler = self.settings.sampler.clone();
        let candidates = self
            .pools
            .branch
            .run(move || -> Result<Vec<FrameCandidate>> {
                let mut video = opener.open(&path)?;
                sampler.sample(video.as_mut())
            })
            .await??;
        self.ocr.recognize(candidates, frame_dir).await
    }
}

/// Turn a branch result into its outcome, chunks, and error.
fn settle(
    branch: &'static str,
    result: Option<Result<Vec<Chunk>>>,
) -> (BranchOutcome, Vec<Chunk>, Option<Error>) {
    match result {
        None => (BranchOutcome::Skipped, Vec::new(), None),
        Some(Ok(chunks)) if chunks.is_empty() => {
            info!(branch, "branch produced no content");
            (BranchOutcome::Empty, chunks, None)
        }
        Some(Ok(chunks)) => {
            info!(branch, chunks = chunks.len(), "branch finished");
            (BranchOutcome::Produced(chunks.len()), chunks, None)
        }
        Some(Err(e)) => {
            warn!(branch, error = %e, "branch failed");
            (BranchOutcome::Failed(e.to_string()), Vec::new(), Some(e))
        }
    }
}

/// Run `reel ingest` and print a summary.
pub async fn run_ingest(
    config: &Config,
    url: &str,
    video_id: Option<String>,
    no_visuals: bool,
    replace: bool,
) -> anyhow::Result<()> {
    if !config.embedding.is_enabled() {
        anyhow::bail!("ingest requires embeddings. Set [embedding] provider in config.");
    }
    let collab = Collaborators {
        fetcher: Arc::new(YtDlpFetcher::from_config(&config.download)),
        transcriber: Arc::new(OpenAiTranscriber::new(&config.transcription)?),
        ocr: Arc::new(TesseractOcr::from_config(&config.ocr)),
        video: Arc::new(FfmpegOpener::new(config.frames.clone())),
        dense: create_dense_encoder(&config.embedding)?,
        sparse: create_sparse_encoder(&config.embedding)?,
        index: create_index(config).await?,
    };
    let pools = Pools::new(PoolSizing::from_config(&config.workers)?)?;
    let orchestrator = IngestionOrchestrator::new(collab, IngestSettings::from_config(config), pools);

    let outcome = orchestrator
        .ingest(IngestRequest {
            url: url.to_string(),
            video_id,
            include_visuals: !no_visuals,
            replace,
        })
        .await;
    let report = match outcome {
        Ok(report) => report,
        Err(failure) => {
            print_branches(&failure.report);
            return Err(failure.error.into());
        }
    };

    print_branches(&report);
    if replace {
        println!("  replaced: {} records", report.replaced);
    }
    println!("  stored: {} records", report.stored);
    println!("ok");
    Ok(())
}

fn print_branches(report: &IngestReport) {
    println!("ingest {}", report.video_id);
    println!("  audio:  {}", describe(&report.audio));
    println!("  visual: {}", describe(&report.visual));
}

fn describe(outcome: &BranchOutcome) -> String {
    match outcome {
        BranchOutcome::Skipped => "skipped".to_string(),
        BranchOutcome::Empty => "no content".to_string(),
        BranchOutcome::Produced(n) => format!("{} chunks", n),
        BranchOutcome::Failed(msg) => format!("failed ({})", msg),
    }
}
