//! Seek-based frame sampling with near-duplicate suppression.
//!
//! [`FrameSampler`] visits a video at a fixed time interval by seeking
//! straight to each target frame, so skipped footage is never decoded. Each
//! retrieved frame is downscaled to bound OCR cost and compared against the
//! last frame that was kept; static slides and paused video collapse into a
//! single candidate.
//!
//! # Deduplication
//!
//! Every frame is reduced to an 8×8 grayscale thumbnail. The score against
//! the previous *kept* thumbnail is the mean absolute pixel difference on a
//! 0–255 scale. Frames scoring below the threshold (default `5.0`) are
//! dropped and do not replace the reference thumbnail.
//!
//! The [`VideoSource`] trait isolates decoding. [`FfmpegVideo`] implements it
//! by shelling out to `ffprobe`/`ffmpeg`; tests use synthetic sources.

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat};
use serde::Deserialize;
use tracing::{debug, info};

use crate::config::FramesConfig;
use crate::error::{Error, Result};
use crate::models::FrameCandidate;

/// Side length of the dedup thumbnail.
const THUMB_SIDE: u32 = 8;

/// Random-access video decoding.
pub trait VideoSource {
    /// Frames per second.
    fn fps(&self) -> f64;
    /// Total number of frames in the stream.
    fn frame_count(&self) -> u64;
    /// Seek to `index` and decode one frame. `None` means end of stream.
    fn read_frame(&mut self, index: u64) -> Result<Option<DynamicImage>>;
}

/// Opens a [`VideoSource`] for a local file.
pub trait VideoOpener: Send + Sync {
    fn open(&self, path: &Path) -> Result<Box<dyn VideoSource + Send>>;
}

/// Samples, downsizes, and deduplicates frames.
#[derive(Debug, Clone)]
pub struct FrameSampler {
    interval_seconds: u32,
    max_height: u32,
    dedup_threshold: f64,
}

impl FrameSampler {
    pub fn new(interval_seconds: u32, max_height: u32, dedup_threshold: f64) -> Self {
        Self {
            interval_seconds,
            max_height,
            dedup_threshold,
        }
    }

    pub fn from_config(cfg: &FramesConfig) -> Self {
        Self::new(cfg.interval_seconds, cfg.max_height, cfg.dedup_threshold)
    }

    /// Sample `video`, returning deduplicated candidates in timestamp order.
    ///
    /// An empty result means "nothing to process", not a failure.
    pub fn sample<V: VideoSource + ?Sized>(&self, video: &mut V) -> Result<Vec<FrameCandidate>> {
        let fps = video.fps();
        let step = (fps * self.interval_seconds as f64).round();
        if !step.is_finite() || step < 1.0 {
            return Err(Error::source_unavailable(
                "video",
                format!(
                    "frame step is zero (fps = {}, interval = {}s)",
                    fps, self.interval_seconds
                ),
            ));
        }
        let step = step as u64;
        let total = video.frame_count();

        let mut kept: Vec<FrameCandidate> = Vec::new();
        let mut reference: Option<Vec<u8>> = None;
        let mut visited = 0u64;
        let mut position = 0u64;

        while position < total {
            let frame = match video.read_frame(position)? {
                Some(frame) => frame,
                None => break,
            };
            visited += 1;

            let frame = downscale(frame, self.max_height);
            let thumb = thumbnail(&frame);

            let duplicate = reference
                .as_ref()
                .map(|prev| mean_abs_diff(prev, &thumb) < self.dedup_threshold)
                .unwrap_or(false);

            if duplicate {
                debug!(frame = position, "dropping near-duplicate frame");
            } else {
                reference = Some(thumb);
                kept.push(FrameCandidate {
                    timestamp: position as f64 / fps,
                    frame_index: position,
                    image: frame,
                });
            }

            position += step;
        }

        info!(
            visited,
            kept = kept.len(),
            step,
            "frame sampling finished"
        );
        Ok(kept)
    }
}

/// Shrink `frame` so its height is at most `max_height`, keeping aspect ratio.
pub fn downscale(frame: DynamicImage, max_height: u32) -> DynamicImage {
    let (w, h) = (frame.width(), frame.height());
    if h <= max_height || h == 0 {
        return frame;
    }
    let new_w = ((w as u64 * max_height as u64) / h as u64).max(1) as u32;
    frame.resize_exact(new_w, max_height, FilterType::Triangle)
}

/// 8×8 grayscale thumbnail as 64 raw luma bytes.
pub fn thumbnail(frame: &DynamicImage) -> Vec<u8> {
    image::imageops::resize(&frame.to_luma8(), THUMB_SIDE, THUMB_SIDE, FilterType::Triangle)
        .into_raw()
}

/// Mean absolute difference of two equally sized thumbnails (0–255).
pub fn mean_abs_diff(a: &[u8], b: &[u8]) -> f64 {
    if a.is_empty() || a.len() != b.len() {
        return f64::MAX;
    }
    let sum: u64 = a
        .iter()
        .zip(b.iter())
        .map(|(x, y)| (*x as i16 - *y as i16).unsigned_abs() as u64)
        .sum();
    sum as f64 / a.len() as f64
}

/// File name used for a persisted frame: whole seconds for readability,
/// then the stream position so sub-second samples never share a name.
pub fn frame_file_name(timestamp: f64, frame_index: u64) -> String {
    format!(
        "frame_{:05}_{:06}.jpg",
        timestamp.max(0.0).floor() as u64,
        frame_index
    )
}

/// Persist a candidate as a lossy JPEG under `dir` and return its path.
pub fn write_jpeg(candidate: &FrameCandidate, dir: &Path, quality: u8) -> Result<PathBuf> {
    let path = dir.join(frame_file_name(candidate.timestamp, candidate.frame_index));
    let writer = BufWriter::new(File::create(&path)?);
    let encoder = JpegEncoder::new_with_quality(writer, quality);
    candidate.image.to_rgb8().write_with_encoder(encoder)?;
    Ok(path)
}

// ============ ffmpeg-backed source ============

/// [`VideoSource`] that decodes single frames with the `ffmpeg` CLI.
pub struct FfmpegVideo {
    path: PathBuf,
    ffmpeg: String,
    fps: f64,
    frame_count: u64,
}

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    streams: Vec<FfprobeStream>,
    #[serde(default)]
    format: Option<FfprobeFormat>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    #[serde(default)]
    avg_frame_rate: Option<String>,
    #[serde(default)]
    r_frame_rate: Option<String>,
    #[serde(default)]
    nb_frames: Option<String>,
    #[serde(default)]
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    #[serde(default)]
    duration: Option<String>,
}

impl FfmpegVideo {
    /// Read stream metadata for `path` with ffprobe and prepare for seeking.
    /// Fails fast if the file is missing or has no decodable video stream.
    pub fn open(path: &Path, cfg: &FramesConfig) -> Result<Self> {
        if !path.exists() {
            return Err(Error::source_unavailable(
                path.display().to_string(),
                "video file not found",
            ));
        }

        let output = Command::new(&cfg.ffprobe)
            .args([
                "-v",
                "error",
                "-select_streams",
                "v:0",
                "-show_entries",
                "stream=avg_frame_rate,r_frame_rate,nb_frames,duration:format=duration",
                "-of",
                "json",
            ])
            .arg(path)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| Error::source_unavailable(&cfg.ffprobe, e))?;

        if !output.status.success() {
            return Err(Error::source_unavailable(
                path.display().to_string(),
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }

        let info: FfprobeOutput = serde_json::from_slice(&output.stdout)?;
        let (fps, frame_count) = stream_metadata(&info).ok_or_else(|| {
            Error::source_unavailable(path.display().to_string(), "no video stream found")
        })?;

        info!(
            path = %path.display(),
            fps,
            frame_count,
            "opened video"
        );
        Ok(Self {
            path: path.to_path_buf(),
            ffmpeg: cfg.ffmpeg.clone(),
            fps,
            frame_count,
        })
    }
}

fn stream_metadata(info: &FfprobeOutput) -> Option<(f64, u64)> {
    let stream = info.streams.first()?;
    let fps = stream
        .avg_frame_rate
        .as_deref()
        .and_then(parse_rate)
        .or_else(|| stream.r_frame_rate.as_deref().and_then(parse_rate))?;

    let frames = stream
        .nb_frames
        .as_deref()
        .and_then(|n| n.parse::<u64>().ok())
        .filter(|n| *n > 0);
    let frames = match frames {
        Some(n) => n,
        None => {
            let duration = stream
                .duration
                .as_deref()
                .or_else(|| info.format.as_ref().and_then(|f| f.duration.as_deref()))
                .and_then(|d| d.parse::<f64>().ok())?;
            (duration * fps).floor() as u64
        }
    };
    Some((fps, frames))
}

/// Parse an ffprobe rational such as `"30000/1001"` or `"25"`.
fn parse_rate(rate: &str) -> Option<f64> {
    let value = match rate.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.trim().parse().ok()?;
            let den: f64 = den.trim().parse().ok()?;
            if den == 0.0 {
                return None;
            }
            num / den
        }
        None => rate.trim().parse().ok()?,
    };
    (value.is_finite() && value > 0.0).then_some(value)
}

/// [`VideoOpener`] producing [`FfmpegVideo`] sources.
#[derive(Debug, Clone)]
pub struct FfmpegOpener {
    cfg: FramesConfig,
}

impl FfmpegOpener {
    pub fn new(cfg: FramesConfig) -> Self {
        Self { cfg }
    }
}

impl VideoOpener for FfmpegOpener {
    fn open(&self, path: &Path) -> Result<Box<dyn VideoSource + Send>> {
        Ok(Box::new(FfmpegVideo::open(path, &self.cfg)?))
    }
}

impl VideoSource for FfmpegVideo {
    fn fps(&self) -> f64 {
        self.fps
    }

    fn frame_count(&self) -> u64 {
        self.frame_count
    }

    fn read_frame(&mut self, index: u64) -> Result<Option<DynamicImage>> {
        let seconds = index as f64 / self.fps;
        let output = Command::new(&self.ffmpeg)
            .args(["-v", "error", "-ss", &format!("{:.3}", seconds), "-i"])
            .arg(&self.path)
            .args(["-frames:v", "1", "-f", "image2pipe", "-vcodec", "png", "-"])
            .stdin(Stdio::null())
            .output()
            .map_err(|e| Error::source_unavailable(&self.ffmpeg, e))?;

        if !output.status.success() || output.stdout.is_empty() {
            return Ok(None);
        }
        let frame = image::load_from_memory_with_format(&output.stdout, ImageFormat::Png)?;
        Ok(Some(frame))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma, RgbImage};

    /// Synthetic video whose frames are produced by a closure.
    struct FakeVideo<F: FnMut(u64) -> DynamicImage> {
        fps: f64,
        frames: u64,
        render: F,
        reads: Vec<u64>,
    }

    impl<F: FnMut(u64) -> DynamicImage> VideoSource for FakeVideo<F> {
        fn fps(&self) -> f64 {
            self.fps
        }
        fn frame_count(&self) -> u64 {
            self.frames
        }
        fn read_frame(&mut self, index: u64) -> Result<Option<DynamicImage>> {
            self.reads.push(index);
            if index >= self.frames {
                return Ok(None);
            }
            Ok(Some((self.render)(index)))
        }
    }

    fn solid(level: u8) -> DynamicImage {
        DynamicImage::ImageLuma8(GrayImage::from_pixel(64, 36, Luma([level])))
    }

    #[test]
    fn test_identical_frames_collapse_to_one() {
        // 5 samples at 15 s spacing, all visually identical.
        let mut video = FakeVideo {
            fps: 30.0,
            frames: 30 * 15 * 5,
            render: |_| solid(120),
            reads: Vec::new(),
        };
        let kept = FrameSampler::new(15, 720, 5.0).sample(&mut video).unwrap();
        assert_eq!(video.reads.len(), 5);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].timestamp, 0.0);
    }

    #[test]
    fn test_identical_frames_any_length() {
        for samples in [1u64, 2, 7, 40] {
            let mut video = FakeVideo {
                fps: 10.0,
                frames: 10 * samples,
                render: |_| solid(33),
                reads: Vec::new(),
            };
            let kept = FrameSampler::new(1, 720, 5.0).sample(&mut video).unwrap();
            assert_eq!(kept.len(), 1, "samples = {}", samples);
        }
    }

    #[test]
    fn test_distinct_frames_are_kept_with_timestamps() {
        let mut video = FakeVideo {
            fps: 25.0,
            frames: 25 * 90,
            render: |i| solid(((i / 750) * 80) as u8),
            reads: Vec::new(),
        };
        let kept = FrameSampler::new(30, 720, 5.0).sample(&mut video).unwrap();
        let stamps: Vec<f64> = kept.iter().map(|c| c.timestamp).collect();
        assert_eq!(stamps, vec![0.0, 30.0, 60.0]);
        assert_eq!(video.reads, vec![0, 750, 1500]);
    }

    #[test]
    fn test_duplicate_does_not_advance_reference() {
        // Levels drift by 3 per sample: each step is under the threshold,
        // but the drift from the last kept frame eventually exceeds it.
        let mut video = FakeVideo {
            fps: 1.0,
            frames: 4,
            render: |i| solid((100 + i * 3) as u8),
            reads: Vec::new(),
        };
        let kept = FrameSampler::new(1, 720, 5.0).sample(&mut video).unwrap();
        let stamps: Vec<f64> = kept.iter().map(|c| c.timestamp).collect();
        assert_eq!(stamps, vec![0.0, 2.0]);
    }

    #[test]
    fn test_stops_at_end_of_stream() {
        let mut video = FakeVideo {
            fps: 1.0,
            frames: 100,
            render: |i| solid((i * 40 % 250) as u8),
            reads: Vec::new(),
        };
        video.frames = 100;
        let sampler = FrameSampler::new(10, 720, 5.0);
        let kept = sampler.sample(&mut video).unwrap();
        assert!(video.reads.iter().all(|i| *i < 100));
        assert_eq!(video.reads.len(), 10);
        assert!(!kept.is_empty());
    }

    #[test]
    fn test_zero_fps_is_source_error() {
        let mut video = FakeVideo {
            fps: 0.0,
            frames: 100,
            render: |_| solid(0),
            reads: Vec::new(),
        };
        let err = FrameSampler::new(30, 720, 5.0).sample(&mut video).unwrap_err();
        assert!(matches!(err, Error::SourceUnavailable { .. }));
    }

    #[test]
    fn test_downscale_caps_height() {
        let big = DynamicImage::ImageRgb8(RgbImage::new(1920, 1080));
        let small = downscale(big, 720);
        assert_eq!(small.height(), 720);
        assert_eq!(small.width(), 1280);

        let tiny = DynamicImage::ImageRgb8(RgbImage::new(320, 240));
        let same = downscale(tiny, 720);
        assert_eq!((same.width(), same.height()), (320, 240));
    }

    #[test]
    fn test_mean_abs_diff() {
        assert_eq!(mean_abs_diff(&[10; 64], &[10; 64]), 0.0);
        assert_eq!(mean_abs_diff(&[0; 64], &[255; 64]), 255.0);
        assert_eq!(mean_abs_diff(&[1, 2], &[1]), f64::MAX);
    }

    #[test]
    fn test_write_jpeg_names_by_timestamp() {
        let dir = tempfile::tempdir().unwrap();
        let candidate = FrameCandidate {
            timestamp: 30.0,
            frame_index: 750,
            image: solid(200),
        };
        let path = write_jpeg(&candidate, dir.path(), 80).unwrap();
        assert_eq!(path.file_name().unwrap(), "frame_00030_000750.jpg");
        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
    }

    #[test]
    fn test_sub_second_samples_get_distinct_names() {
        // 1.4 fps with a 1 s interval samples every frame, so two samples
        // fall inside the first whole second.
        let mut video = FakeVideo {
            fps: 1.4,
            frames: 4,
            render: |i| solid((i * 80) as u8),
            reads: Vec::new(),
        };
        let kept = FrameSampler::new(1, 720, 5.0).sample(&mut video).unwrap();
        assert_eq!(kept.len(), 4);
        assert_eq!(
            kept.iter().map(|c| c.frame_index).collect::<Vec<_>>(),
            vec![0, 1, 2, 3]
        );

        let names: std::collections::HashSet<String> = kept
            .iter()
            .map(|c| frame_file_name(c.timestamp, c.frame_index))
            .collect();
        assert_eq!(names.len(), 4);
        assert!(names.contains("frame_00000_000001.jpg"));
    }

    #[test]
    fn test_parse_rate() {
        assert_eq!(parse_rate("25/1"), Some(25.0));
        assert!((parse_rate("30000/1001").unwrap() - 29.97).abs() < 0.01);
        assert_eq!(parse_rate("0/0"), None);
        assert_eq!(parse_rate("24"), Some(24.0));
    }

    #[test]
    fn test_metadata_falls_back_to_duration() {
        let info: FfprobeOutput = serde_json::from_str(
            r#"{"streams":[{"avg_frame_rate":"25/1"}],"format":{"duration":"10.0"}}"#,
        )
        .unwrap();
        assert_eq!(stream_metadata(&info), Some((25.0, 250)));
    }

    #[test]
    fn test_open_missing_file_fails_fast() {
        let err = FfmpegVideo::open(Path::new("/nonexistent/video.mp4"), &FramesConfig::default())
            .err()
            .unwrap();
        assert!(matches!(err, Error::SourceUnavailable { .. }));
    }
}
