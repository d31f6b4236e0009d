//! Media retrieval.
//!
//! [`MediaFetcher`] produces a local audio file and a local video file for a
//! source URL. [`YtDlpFetcher`] shells out to `yt-dlp`: best audio converted
//! to mp3, and the best mp4 video stream at or below 720p. A URL that names
//! an existing local file is used as-is without invoking `yt-dlp`.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use crate::config::DownloadConfig;
use crate::error::{Error, Result};

#[async_trait]
pub trait MediaFetcher: Send + Sync {
    async fn fetch_audio(&self, url: &str, dir: &Path, video_id: &str) -> Result<PathBuf>;
    async fn fetch_video(&self, url: &str, dir: &Path, video_id: &str) -> Result<PathBuf>;
}

/// Derive a video id from a URL: the `v=` query parameter when present,
/// otherwise the last path segment without its extension.
pub fn video_id_from_url(url: &str) -> Option<String> {
    let trimmed = url.trim();
    if let Some((_, query)) = trimmed.split_once('?') {
        for pair in query.split('&') {
            if let Some(value) = pair.strip_prefix("v=") {
                let value = value.split('#').next().unwrap_or_default();
                if !value.is_empty() {
                    return Some(value.to_string());
                }
            }
        }
    }
    let path = trimmed.split(['?', '#']).next().unwrap_or_default();
    let last = path.trim_end_matches('/').rsplit('/').next()?;
    let stem = match last.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => last,
    };
    let id: String = stem
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
        .collect();
    (!id.is_empty()).then_some(id)
}

pub struct YtDlpFetcher {
    ytdlp: String,
}

impl YtDlpFetcher {
    pub fn new(ytdlp: impl Into<String>) -> Self {
        Self {
            ytdlp: ytdlp.into(),
        }
    }

    pub fn from_config(cfg: &DownloadConfig) -> Self {
        Self::new(cfg.ytdlp.clone())
    }

    async fn run(&self, args: &[&str], url: &str) -> Result<()> {
        debug!(tool = %self.ytdlp, ?args, url, "invoking downloader");
        let output = Command::new(&self.ytdlp)
            .args(args)
            .arg(url)
            .output()
            .await
            .map_err(|e| Error::source_unavailable(&self.ytdlp, e))?;
        if !output.status.success() {
            return Err(Error::source_unavailable(
                url,
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }
        Ok(())
    }
}

fn local_file(url: &str) -> Option<PathBuf> {
    let path = Path::new(url.strip_prefix("file://").unwrap_or(url));
    path.is_file().then(|| path.to_path_buf())
}

fn expect_file(path: PathBuf, url: &str) -> Result<PathBuf> {
    if path.is_file() {
        Ok(path)
    } else {
        Err(Error::source_unavailable(
            url,
            format!("download finished but {} is missing", path.display()),
        ))
    }
}

#[async_trait]
impl MediaFetcher for YtDlpFetcher {
    async fn fetch_audio(&self, url: &str, dir: &Path, video_id: &str) -> Result<PathBuf> {
        if let Some(path) = local_file(url) {
            return Ok(path);
        }
        let template = dir.join(format!("{}.%(ext)s", video_id));
        let template = template.to_string_lossy();
        self.run(
            &[
                "-f",
                "bestaudio/best",
                "-x",
                "--audio-format",
                "mp3",
                "--no-playlist",
                "-q",
                "-o",
                template.as_ref(),
            ],
            url,
        )
        .await?;
        let path = expect_file(dir.join(format!("{}.mp3", video_id)), url)?;
        info!(path = %path.display(), "audio ready");
        Ok(path)
    }

    async fn fetch_video(&self, url: &str, dir: &Path, video_id: &str) -> Result<PathBuf> {
        if let Some(path) = local_file(url) {
            return Ok(path);
        }
        let template = dir.join(format!("{}_video.%(ext)s", video_id));
        let template = template.to_string_lossy();
        self.run(
            &[
                "-f",
                "bestvideo[height<=720][ext=mp4]/best[height<=720][ext=mp4]/best[ext=mp4]",
                "--no-playlist",
                "-q",
                "-o",
                template.as_ref(),
            ],
            url,
        )
        .await?;
        let path = expect_file(dir.join(format!("{}_video.mp4", video_id)), url)?;
        info!(path = %path.display(), "video ready");
        Ok(path)
    }
}
