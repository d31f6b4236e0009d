//! Core data models used throughout reelsearch.
//!
//! These types represent the segments, chunks, frames, and stored records
//! that flow through the ingestion and retrieval pipeline.

use image::DynamicImage;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A time-stamped piece of transcribed speech.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub start: f64,
    pub end: f64,
    pub text: String,
}

impl Segment {
    pub fn new(start: f64, end: f64, text: impl Into<String>) -> Self {
        Self {
            start,
            end,
            text: text.into(),
        }
    }
}

/// Which track a chunk was produced from.
#[derive(Debug, Clone, PartialEq)]
pub enum ChunkKind {
    Audio,
    /// On-screen text; `frame_ref` names the frame image for display.
    Visual { frame_ref: Option<String> },
}

/// A retrievable text unit with temporal bounds.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub text: String,
    pub start: f64,
    pub end: f64,
    pub kind: ChunkKind,
}

impl Chunk {
    pub fn audio(text: impl Into<String>, start: f64, end: f64) -> Self {
        Self {
            text: text.into(),
            start,
            end,
            kind: ChunkKind::Audio,
        }
    }

    /// A visual chunk is an instantaneous event: `start == end == timestamp`.
    pub fn visual(text: impl Into<String>, timestamp: f64, frame_ref: Option<String>) -> Self {
        Self {
            text: text.into(),
            start: timestamp,
            end: timestamp,
            kind: ChunkKind::Visual { frame_ref },
        }
    }

    pub fn is_visual(&self) -> bool {
        matches!(self.kind, ChunkKind::Visual { .. })
    }
}

/// A sampled video frame awaiting OCR. Never persisted.
#[derive(Debug, Clone)]
pub struct FrameCandidate {
    pub timestamp: f64,
    /// Position of the frame in the source stream. Unique per video.
    pub frame_index: u64,
    pub image: DynamicImage,
}

/// Source discriminant as persisted in the payload `type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Audio,
    Visual,
    Unknown,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Audio => "audio",
            SourceKind::Visual => "visual",
            SourceKind::Unknown => "unknown",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "audio" => SourceKind::Audio,
            "visual" => SourceKind::Visual,
            _ => SourceKind::Unknown,
        }
    }
}

/// The payload projection of a stored record. Search returns these;
/// vectors are never read back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payload {
    pub video_id: String,
    pub text: String,
    #[serde(rename = "type")]
    pub kind: SourceKind,
    pub start: f64,
    pub end: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frame_ref: Option<String>,
}

/// Bag-of-weighted-terms vector.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SparseVector {
    pub indices: Vec<u32>,
    pub values: Vec<f32>,
}

impl SparseVector {
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Dot product of two sparse vectors. Indices need not be sorted.
    pub fn dot(&self, other: &SparseVector) -> f32 {
        let (small, large) = if self.indices.len() <= other.indices.len() {
            (self, other)
        } else {
            (other, self)
        };
        let lookup: std::collections::HashMap<u32, f32> = large
            .indices
            .iter()
            .copied()
            .zip(large.values.iter().copied())
            .collect();
        small
            .indices
            .iter()
            .zip(small.values.iter())
            .filter_map(|(i, v)| lookup.get(i).map(|w| v * w))
            .sum()
    }
}

/// A record as submitted to the vector index.
#[derive(Debug, Clone)]
pub struct StoredRecord {
    pub id: Uuid,
    pub payload: Payload,
    pub dense: Vec<f32>,
    pub sparse: SparseVector,
}

impl StoredRecord {
    /// Build a record with a fresh, never-reused id.
    pub fn new(payload: Payload, dense: Vec<f32>, sparse: SparseVector) -> Self {
        Self {
            id: Uuid::new_v4(),
            payload,
            dense,
            sparse,
        }
    }
}

/// A payload returned from a fused query, with its fused rank score.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredPayload {
    pub id: String,
    /// Reciprocal-rank-fusion score. Not comparable to raw similarities.
    pub score: f64,
    pub payload: Payload,
}
