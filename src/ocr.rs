//! Per-frame OCR fan-out.
//!
//! [`OcrFanout`] writes every sampled frame to disk, submits one OCR job per
//! frame to the fan-out [`WorkerPool`], and gathers results as they complete.
//! Lines below the confidence threshold or shorter than two characters are
//! discarded; frames left with no text produce no chunk.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;

use futures::stream::{FuturesUnordered, StreamExt};
use tracing::{debug, info, warn};

use crate::config::{FramesConfig, OcrConfig};
use crate::error::{Error, Result};
use crate::frames::write_jpeg;
use crate::models::{Chunk, FrameCandidate};
use crate::pool::WorkerPool;

/// One recognized line of text.
#[derive(Debug, Clone, PartialEq)]
pub struct OcrLine {
    pub text: String,
    /// Recognition confidence in `[0, 1]`.
    pub confidence: f32,
}

impl OcrLine {
    pub fn new(text: impl Into<String>, confidence: f32) -> Self {
        Self {
            text: text.into(),
            confidence,
        }
    }
}

/// Text recognition over an image file. Called from pool threads.
pub trait OcrEngine: Send + Sync {
    fn extract(&self, image: &Path) -> Result<Vec<OcrLine>>;
}

/// Keep confident, non-trivial lines and join them with newlines.
///
/// Line text is kept as recognized, indentation included; trimming only
/// decides whether a line is long enough to keep. Returns `None` when
/// nothing survives.
pub fn filter_lines(lines: &[OcrLine], min_confidence: f32) -> Option<String> {
    let kept: Vec<&str> = lines
        .iter()
        .filter(|l| l.confidence > min_confidence)
        .filter(|l| l.text.trim().chars().count() > 1)
        .map(|l| l.text.as_str())
        .collect();
    if kept.is_empty() {
        None
    } else {
        Some(kept.join("\n"))
    }
}

/// Scatter-gather OCR over a set of frame candidates.
#[derive(Clone)]
pub struct OcrFanout {
    engine: Arc<dyn OcrEngine>,
    pool: WorkerPool,
    min_confidence: f32,
    jpeg_quality: u8,
}

struct FrameText {
    timestamp: f64,
    frame_ref: String,
    lines: Vec<OcrLine>,
}

impl OcrFanout {
    pub fn new(engine: Arc<dyn OcrEngine>, pool: WorkerPool, min_confidence: f32, jpeg_quality: u8) -> Self {
        Self {
            engine,
            pool,
            min_confidence,
            jpeg_quality,
        }
    }

    pub fn from_config(engine: Arc<dyn OcrEngine>, pool: WorkerPool, ocr: &OcrConfig, frames: &FramesConfig) -> Self {
        Self::new(engine, pool, ocr.min_confidence, frames.jpeg_quality)
    }

    /// Recognize text on every candidate. Output is ordered by timestamp.
    ///
    /// A frame whose write or OCR call fails is logged and contributes no
    /// text; it never fails the batch.
    pub async fn recognize(&self, candidates: Vec<FrameCandidate>, frame_dir: &Path) -> Result<Vec<Chunk>> {
        let submitted = candidates.len();
        let mut pending = FuturesUnordered::new();

        for candidate in candidates {
            let engine = self.engine.clone();
            let dir: PathBuf = frame_dir.to_path_buf();
            let quality = self.jpeg_quality;
            let timestamp = candidate.timestamp;
            let rx = self.pool.submit(move || -> Result<FrameText> {
                let path = write_jpeg(&candidate, &dir, quality)?;
                let lines = engine.extract(&path)?;
                let frame_ref = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                Ok(FrameText {
                    timestamp: candidate.timestamp,
                    frame_ref,
                    lines,
                })
            });
            pending.push(async move { (timestamp, rx.await) });
        }

        let mut chunks = Vec::new();
        while let Some((timestamp, outcome)) = pending.next().await {
            let frame = match outcome {
                Ok(Ok(frame)) => frame,
                Ok(Err(e)) => {
                    warn!(timestamp, error = %e, "OCR failed for frame, treating as no text");
                    continue;
                }
                Err(_) => {
                    warn!(timestamp, "OCR job dropped, treating as no text");
                    continue;
                }
            };
            match filter_lines(&frame.lines, self.min_confidence) {
                Some(text) => chunks.push(Chunk::visual(text, frame.timestamp, Some(frame.frame_ref))),
                None => debug!(timestamp, "no confident text on frame"),
            }
        }

        chunks.sort_by(|a, b| a.start.total_cmp(&b.start));
        info!(frames = submitted, with_text = chunks.len(), "OCR fan-out finished");
        Ok(chunks)
    }
}

// ============ tesseract adapter ============

/// [`OcrEngine`] backed by the `tesseract` CLI in TSV mode.
#[derive(Debug, Clone)]
pub struct TesseractOcr {
    command: String,
    languages: String,
}

impl TesseractOcr {
    pub fn new(command: impl Into<String>, languages: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            languages: languages.into(),
        }
    }

    pub fn from_config(cfg: &OcrConfig) -> Self {
        Self::new(cfg.command.clone(), cfg.languages.clone())
    }
}

impl OcrEngine for TesseractOcr {
    fn extract(&self, image: &Path) -> Result<Vec<OcrLine>> {
        let output = Command::new(&self.command)
            .arg(image)
            .args(["stdout", "-l", &self.languages, "tsv"])
            .stdin(Stdio::null())
            .output()
            .map_err(|e| Error::backend(&self.command, e))?;

        if !output.status.success() {
            return Err(Error::backend(
                &self.command,
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }
        Ok(parse_tsv(&String::from_utf8_lossy(&output.stdout)))
    }
}

/// Group tesseract TSV word rows into lines.
///
/// Columns: level, page, block, par, line, word, left, top, width, height,
/// conf, text. Line confidence is the mean word confidence scaled to `[0, 1]`.
pub fn parse_tsv(tsv: &str) -> Vec<OcrLine> {
    fn flush(words: &mut Vec<String>, conf_sum: &mut f32, lines: &mut Vec<OcrLine>) {
        if !words.is_empty() {
            let confidence = (*conf_sum / words.len() as f32 / 100.0).clamp(0.0, 1.0);
            lines.push(OcrLine::new(words.join(" "), confidence));
        }
        words.clear();
        *conf_sum = 0.0;
    }

    let mut lines: Vec<OcrLine> = Vec::new();
    let mut current_key: Option<(u32, u32, u32, u32)> = None;
    let mut words: Vec<String> = Vec::new();
    let mut conf_sum = 0.0f32;

    for row in tsv.lines().skip(1) {
        let cols: Vec<&str> = row.split('\t').collect();
        if cols.len() < 12 || cols[0] != "5" {
            continue;
        }
        let parse = |s: &str| s.trim().parse::<u32>().unwrap_or(0);
        let key = (parse(cols[1]), parse(cols[2]), parse(cols[3]), parse(cols[4]));
        let conf: f32 = match cols[10].trim().parse() {
            Ok(c) if c >= 0.0 => c,
            _ => continue,
        };
        let text = cols[11].trim();
        if text.is_empty() {
            continue;
        }
        if current_key != Some(key) {
            flush(&mut words, &mut conf_sum, &mut lines);
            current_key = Some(key);
        }
        words.push(text.to_string());
        conf_sum += conf;
    }
    flush(&mut words, &mut conf_sum, &mut lines);
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, GrayImage, Luma};
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Engine that answers by frame file name.
    struct ScriptedOcr {
        by_file: HashMap<String, Result<Vec<OcrLine>>>,
        seen: Mutex<Vec<String>>,
    }

    impl ScriptedOcr {
        fn new(entries: Vec<(&str, Result<Vec<OcrLine>>)>) -> Self {
            Self {
                by_file: entries.into_iter().map(|(k, v)| (k.to_string(), v)).collect(),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    impl OcrEngine for ScriptedOcr {
        fn extract(&self, image: &Path) -> Result<Vec<OcrLine>> {
            let name = image.file_name().unwrap().to_string_lossy().to_string();
            assert!(image.exists(), "frame should be on disk before OCR");
            self.seen.lock().unwrap().push(name.clone());
            match self.by_file.get(&name) {
                Some(Ok(lines)) => Ok(lines.clone()),
                Some(Err(_)) => Err(Error::backend("ocr", "engine crashed")),
                None => Ok(Vec::new()),
            }
        }
    }

    /// Candidate from a 1 fps stream.
    fn candidate(ts: f64) -> FrameCandidate {
        FrameCandidate {
            timestamp: ts,
            frame_index: ts as u64,
            image: DynamicImage::ImageLuma8(GrayImage::from_pixel(16, 16, Luma([128]))),
        }
    }

    #[test]
    fn test_filter_lines_threshold_and_length() {
        let lines = vec![
            OcrLine::new("def main():", 0.95),
            OcrLine::new("noise", 0.3),
            OcrLine::new("x", 0.99),
            OcrLine::new("  return 0  ", 0.61),
            OcrLine::new("edge", 0.6),
        ];
        assert_eq!(
            filter_lines(&lines, 0.6).as_deref(),
            Some("def main():\n  return 0  ")
        );
        assert_eq!(filter_lines(&[OcrLine::new("a", 1.0)], 0.6), None);
        assert_eq!(filter_lines(&[OcrLine::new("   b   ", 1.0)], 0.6), None);
    }

    #[test]
    fn test_filter_lines_keeps_code_indentation() {
        let lines = vec![
            OcrLine::new("fn main() {", 0.9),
            OcrLine::new("    println!(\"hi\");", 0.9),
            OcrLine::new("}", 0.9),
            OcrLine::new("}}", 0.9),
        ];
        assert_eq!(
            filter_lines(&lines, 0.6).as_deref(),
            Some("fn main() {\n    println!(\"hi\");\n}}")
        );
    }

    #[tokio::test]
    async fn test_recognize_pairs_text_with_timestamps() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Arc::new(ScriptedOcr::new(vec![
            ("frame_00000_000000.jpg", Ok(vec![OcrLine::new("Title slide", 0.9)])),
            ("frame_00030_000030.jpg", Ok(vec![OcrLine::new("??", 0.1)])),
            ("frame_00060_000060.jpg", Ok(vec![OcrLine::new("cargo build", 0.8)])),
        ]));
        let fanout = OcrFanout::new(engine.clone(), WorkerPool::new("fanout", 2).unwrap(), 0.6, 80);

        let chunks = fanout
            .recognize(vec![candidate(60.0), candidate(0.0), candidate(30.0)], dir.path())
            .await
            .unwrap();

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].text, "Title slide");
        assert_eq!(chunks[0].start, 0.0);
        assert_eq!(chunks[1].text, "cargo build");
        assert_eq!((chunks[1].start, chunks[1].end), (60.0, 60.0));
        assert_eq!(
            chunks[1].kind,
            crate::models::ChunkKind::Visual {
                frame_ref: Some("frame_00060_000060.jpg".into())
            }
        );
        assert_eq!(engine.seen.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_failing_frame_is_treated_as_no_text() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Arc::new(ScriptedOcr::new(vec![
            ("frame_00000_000000.jpg", Err(Error::internal("boom"))),
            ("frame_00010_000010.jpg", Ok(vec![OcrLine::new("still here", 0.9)])),
        ]));
        let fanout = OcrFanout::new(engine, WorkerPool::new("fanout", 1).unwrap(), 0.6, 80);

        let chunks = fanout
            .recognize(vec![candidate(0.0), candidate(10.0)], dir.path())
            .await
            .unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "still here");
    }

    /// Engine that reads back the name of the file it was given.
    struct EchoFileName;

    impl OcrEngine for EchoFileName {
        fn extract(&self, image: &Path) -> Result<Vec<OcrLine>> {
            let name = image.file_name().unwrap().to_string_lossy().to_string();
            Ok(vec![OcrLine::new(name, 0.9)])
        }
    }

    #[tokio::test]
    async fn test_frames_within_one_second_keep_their_own_file() {
        let dir = tempfile::tempdir().unwrap();
        let fanout = OcrFanout::new(Arc::new(EchoFileName), WorkerPool::new("fanout", 2).unwrap(), 0.6, 80);
        let candidates: Vec<FrameCandidate> = (0..4u64)
            .map(|i| FrameCandidate {
                timestamp: i as f64 / 1.4,
                frame_index: i,
                image: DynamicImage::ImageLuma8(GrayImage::from_pixel(16, 16, Luma([(i * 60) as u8]))),
            })
            .collect();

        let chunks = fanout.recognize(candidates, dir.path()).await.unwrap();
        assert_eq!(chunks.len(), 4);

        let refs: std::collections::HashSet<String> = chunks
            .iter()
            .map(|c| match &c.kind {
                crate::models::ChunkKind::Visual { frame_ref } => frame_ref.clone().unwrap(),
                other => panic!("unexpected chunk kind {:?}", other),
            })
            .collect();
        assert_eq!(refs.len(), 4);
        for chunk in &chunks {
            if let crate::models::ChunkKind::Visual { frame_ref } = &chunk.kind {
                assert_eq!(frame_ref.as_deref(), Some(chunk.text.as_str()));
            }
        }
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 4);
    }

    #[tokio::test]
    async fn test_no_candidates() {
        let dir = tempfile::tempdir().unwrap();
        let fanout = OcrFanout::new(
            Arc::new(ScriptedOcr::new(vec![])),
            WorkerPool::new("fanout", 1).unwrap(),
            0.6,
            80,
        );
        assert!(fanout.recognize(Vec::new(), dir.path()).await.unwrap().is_empty());
    }

    #[test]
    fn test_parse_tsv_groups_lines() {
        let tsv = "level\tpage_num\tblock_num\tpar_num\tline_num\tword_num\tleft\ttop\twidth\theight\tconf\ttext\n\
1\t1\t0\t0\t0\t0\t0\t0\t640\t360\t-1\t\n\
4\t1\t1\t1\t1\t0\t10\t10\t200\t20\t-1\t\n\
5\t1\t1\t1\t1\t1\t10\t10\t50\t20\t96.0\tfn\n\
5\t1\t1\t1\t1\t2\t70\t10\t80\t20\t90.0\tmain()\n\
5\t1\t1\t1\t2\t1\t10\t40\t80\t20\t40.0\tlet\n\
5\t1\t1\t1\t2\t2\t10\t40\t80\t20\t-1\t \n";
        let lines = parse_tsv(tsv);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].text, "fn main()");
        assert!((lines[0].confidence - 0.93).abs() < 1e-4);
        assert_eq!(lines[1].text, "let");
        assert!((lines[1].confidence - 0.40).abs() < 1e-4);
    }

    #[test]
    fn test_parse_tsv_empty() {
        assert!(parse_tsv("").is_empty());
    }
}
