//! Speech-to-text.
//!
//! [`Transcriber`] turns an audio file into time-stamped [`Segment`]s with
//! non-decreasing start times. [`OpenAiTranscriber`] posts the file to
//! `/v1/audio/transcriptions` with `response_format = verbose_json` and
//! reads back the segment list.

use std::path::Path;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use tracing::info;

use crate::config::TranscriptionConfig;
use crate::error::{Error, Result};
use crate::models::Segment;
use crate::openai::OpenAiClient;

#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, audio: &Path) -> Result<Vec<Segment>>;
}

pub struct OpenAiTranscriber {
    client: OpenAiClient,
    model: String,
    language: Option<String>,
}

impl OpenAiTranscriber {
    pub fn new(config: &TranscriptionConfig) -> Result<Self> {
        Ok(Self {
            client: OpenAiClient::from_env("openai-transcription", config.timeout_secs)?,
            model: config.model.clone(),
            language: config.language.clone(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct VerboseTranscript {
    #[serde(default)]
    segments: Vec<RawSegment>,
}

#[derive(Debug, Deserialize)]
struct RawSegment {
    start: f64,
    end: f64,
    text: String,
}

/// Convert a `verbose_json` body into ordered segments.
fn parse_segments(body: serde_json::Value) -> Result<Vec<Segment>> {
    let transcript: VerboseTranscript = serde_json::from_value(body)
        .map_err(|e| Error::backend("openai-transcription", format!("unexpected response: {}", e)))?;
    let mut segments: Vec<Segment> = transcript
        .segments
        .into_iter()
        .map(|s| Segment::new(s.start, s.end.max(s.start), s.text.trim()))
        .collect();
    segments.sort_by(|a, b| a.start.total_cmp(&b.start));
    Ok(segments)
}

#[async_trait]
impl Transcriber for OpenAiTranscriber {
    async fn transcribe(&self, audio: &Path) -> Result<Vec<Segment>> {
        let bytes = tokio::fs::read(audio)
            .await
            .map_err(|e| Error::source_unavailable(audio.display().to_string(), e))?;
        let file_name = audio
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "audio.mp3".to_string());

        let mut form = Form::new()
            .text("model", self.model.clone())
            .text("response_format", "verbose_json")
            .part("file", Part::bytes(bytes).file_name(file_name));
        if let Some(language) = &self.language {
            form = form.text("language", language.clone());
        }

        let body = self.client.post_multipart("audio/transcriptions", form).await?;
        let segments = parse_segments(body)?;
        info!(segments = segments.len(), "transcribed audio");
        Ok(segments)
    }
}
