//! Map heterogeneous chunk shapes onto the canonical [`Payload`].
//!
//! Typed chunks from the pipeline go through [`normalize`]. Dynamic records
//! (payloads read back from a remote index, older JSON dumps) go through
//! [`normalize_value`], which recognizes three shapes:
//!
//! | Shape     | Fields                                                        |
//! |-----------|---------------------------------------------------------------|
//! | canonical | `type`, `text`, `start`, `end`, optional `frame_ref`          |
//! | visual    | `page_content`, `metadata.timestamp`, `metadata.frame_path`   |
//! | audio     | `text`, `start`, `end`                                        |
//!
//! Anything else is logged and mapped to an empty `unknown` placeholder,
//! which [`normalize_batch`] and the ingest path drop before embedding.

use serde_json::Value;
use tracing::warn;

use crate::error::Error;
use crate::models::{Chunk, ChunkKind, Payload, SourceKind};

/// Canonical payload for a typed chunk.
pub fn normalize(video_id: &str, chunk: &Chunk) -> Payload {
    match &chunk.kind {
        ChunkKind::Audio => Payload {
            video_id: video_id.to_string(),
            text: chunk.text.clone(),
            kind: SourceKind::Audio,
            start: chunk.start,
            end: chunk.end,
            frame_ref: None,
        },
        ChunkKind::Visual { frame_ref } => Payload {
            video_id: video_id.to_string(),
            text: chunk.text.clone(),
            kind: SourceKind::Visual,
            start: chunk.start,
            end: chunk.start,
            frame_ref: frame_ref.clone(),
        },
    }
}

/// Normalize a batch of chunks, dropping payloads with no text.
pub fn normalize_batch(video_id: &str, chunks: &[Chunk]) -> Vec<Payload> {
    chunks
        .iter()
        .map(|c| normalize(video_id, c))
        .filter(|p| !p.text.trim().is_empty())
        .collect()
}

/// Canonical payload for a dynamic record.
pub fn normalize_value(video_id: &str, value: &Value) -> Payload {
    match try_normalize_value(video_id, value) {
        Ok(payload) => payload,
        Err(e) => {
            warn!(video_id, error = %e, "dropping malformed record");
            placeholder(video_id)
        }
    }
}

fn try_normalize_value(video_id: &str, value: &Value) -> Result<Payload, Error> {
    let obj = value
        .as_object()
        .ok_or_else(|| Error::MalformedRecord("record is not an object".into()))?;

    if let Some(kind) = obj.get("type").and_then(Value::as_str) {
        let start = number(value, "start")?;
        return Ok(Payload {
            video_id: video_id.to_string(),
            text: string(value, "text")?,
            kind: SourceKind::parse(kind),
            start,
            end: value.get("end").and_then(Value::as_f64).unwrap_or(start),
            frame_ref: value
                .get("frame_ref")
                .and_then(Value::as_str)
                .map(str::to_string),
        });
    }

    if obj.contains_key("page_content") {
        let metadata = value
            .get("metadata")
            .ok_or_else(|| Error::MalformedRecord("visual record without metadata".into()))?;
        let timestamp = number(metadata, "timestamp")?;
        return Ok(Payload {
            video_id: video_id.to_string(),
            text: string(value, "page_content")?,
            kind: SourceKind::Visual,
            start: timestamp,
            end: timestamp,
            frame_ref: metadata
                .get("frame_path")
                .and_then(Value::as_str)
                .map(frame_name),
        });
    }

    if obj.contains_key("text") {
        return Ok(Payload {
            video_id: video_id.to_string(),
            text: string(value, "text")?,
            kind: SourceKind::Audio,
            start: number(value, "start")?,
            end: number(value, "end")?,
            frame_ref: None,
        });
    }

    Err(Error::MalformedRecord(format!(
        "unrecognized record shape with keys {:?}",
        obj.keys().collect::<Vec<_>>()
    )))
}

fn placeholder(video_id: &str) -> Payload {
    Payload {
        video_id: video_id.to_string(),
        text: String::new(),
        kind: SourceKind::Unknown,
        start: 0.0,
        end: 0.0,
        frame_ref: None,
    }
}

fn string(value: &Value, key: &str) -> Result<String, Error> {
    value
        .get(key)
        .and_then(Value::as_str)
        .map(|s| s.trim().to_string())
        .ok_or_else(|| Error::MalformedRecord(format!("missing string field '{}'", key)))
}

fn number(value: &Value, key: &str) -> Result<f64, Error> {
    value
        .get(key)
        .and_then(Value::as_f64)
        .ok_or_else(|| Error::MalformedRecord(format!("missing numeric field '{}'", key)))
}

/// Keep only the file name of a stored frame path.
fn frame_name(path: &str) -> String {
    std::path::Path::new(path)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string())
}
