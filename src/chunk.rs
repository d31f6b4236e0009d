//! Overlapping transcript chunker.
//!
//! Groups ordered transcription [`Segment`]s into [`Chunk`]s large enough to
//! carry context for retrieval, while keeping precise start/end timestamps
//! for citation.
//!
//! # Algorithm
//!
//! 1. Append segments to a working group, summing their text length in
//!    characters.
//! 2. When the sum reaches `min_chunk_chars`, or the current segment is the
//!    last one, emit a chunk: `start` of the first segment, `end` of the last,
//!    texts joined with a single space.
//! 3. After an emission that is not at the final segment, rewind the cursor by
//!    `overlap_segments` so the next group repeats the tail of this one. The
//!    rewind is clamped at zero and the cursor always moves past the start of
//!    the group just emitted.
//!
//! # Example
//!
//! ```rust
//! use reelsearch::chunk::ChunkingProcessor;
//! use reelsearch::models::Segment;
//!
//! let segments = vec![Segment::new(0.0, 2.0, "Hello"), Segment::new(2.0, 4.0, "World")];
//! let chunks = ChunkingProcessor::new(10, 0).process(&segments);
//! assert_eq!(chunks.len(), 1);
//! assert_eq!(chunks[0].text, "Hello World");
//! assert_eq!((chunks[0].start, chunks[0].end), (0.0, 4.0));
//! ```

use tracing::debug;

use crate::models::{Chunk, Segment};

/// Splits a transcript into overlapping chunks.
#[derive(Debug, Clone)]
pub struct ChunkingProcessor {
    min_chunk_chars: usize,
    overlap_segments: usize,
}

impl ChunkingProcessor {
    pub fn new(min_chunk_chars: usize, overlap_segments: usize) -> Self {
        Self {
            min_chunk_chars,
            overlap_segments,
        }
    }

    /// Group `segments` into chunks. Output order follows input order.
    ///
    /// # Guarantees
    ///
    /// - Empty input yields empty output.
    /// - A single oversized segment yields exactly one chunk.
    /// - Every segment's text appears in at least one chunk.
    pub fn process(&self, segments: &[Segment]) -> Vec<Chunk> {
        let mut chunks = Vec::new();
        let last = match segments.len().checked_sub(1) {
            Some(last) => last,
            None => return chunks,
        };

        let mut group_start = 0usize;
        let mut text_len = 0usize;
        let mut i = 0usize;

        while i <= last {
            text_len += segments[i].text.chars().count();

            if text_len >= self.min_chunk_chars || i == last {
                chunks.push(make_chunk(&segments[group_start..=i]));

                if i == last {
                    break;
                }
                // Rewind for overlap, but never back to (or before) the group just emitted.
                let rewound = (i + 1).saturating_sub(self.overlap_segments);
                i = rewound.max(group_start + 1);
                group_start = i;
                text_len = 0;
            } else {
                i += 1;
            }
        }

        debug!(
            segments = segments.len(),
            chunks = chunks.len(),
            "grouped transcript segments"
        );
        chunks
    }
}

fn make_chunk(group: &[Segment]) -> Chunk {
    let text = group
        .iter()
        .map(|s| s.text.as_str())
        .collect::<Vec<_>>()
        .join(" ");
    Chunk::audio(text.trim(), group[0].start, group[group.len() - 1].end)
}
