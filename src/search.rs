//! Hybrid retrieval: dense + sparse prefetch fused with Reciprocal Rank Fusion.
//!
//! # Fusion
//!
//! Each prefetch branch produces a ranked list. A document's fused score is
//!
//! ```text
//! score(d) = Σ 1 / (k + rank_i(d))        rank is 1-based, k = 60
//! ```
//!
//! summed over the lists that contain it. Ties keep the order in which
//! documents were first seen (dense list first). Fused scores only order
//! results; they are not comparable to cosine or dot-product similarities.
//!
//! # Projections
//!
//! A [`Retrieval`] holds one ranked result set and offers two views of it:
//! [`narrative`](Retrieval::narrative) (everything, in time order) for
//! prompt context and [`anchors`](Retrieval::anchors) (a few diverse, highly
//! ranked moments) for citations.

use std::collections::{HashMap, HashSet};
use std::hash::Hash;
use std::sync::Arc;

use anyhow::bail;
use tracing::debug;

use crate::config::Config;
use crate::embedding::{create_dense_encoder, create_sparse_encoder, encode_query, DenseEncoder, SparseEncoder};
use crate::error::{Error, Result};
use crate::models::{Payload, ScoredPayload};
use crate::store::{create_index, HybridQuery, VectorIndex};

/// Fuse ranked lists with RRF. Returns `(item, score)` best first.
pub fn rrf_fuse<T: Clone + Eq + Hash>(lists: &[Vec<T>], k: f64) -> Vec<(T, f64)> {
    let mut scores: HashMap<T, (usize, f64)> = HashMap::new();
    let mut seen = 0usize;

    for list in lists {
        for (rank, item) in list.iter().enumerate() {
            let entry = scores.entry(item.clone()).or_insert_with(|| {
                seen += 1;
                (seen, 0.0)
            });
            entry.1 += 1.0 / (k + (rank + 1) as f64);
        }
    }

    let mut fused: Vec<(T, usize, f64)> = scores
        .into_iter()
        .map(|(item, (order, score))| (item, order, score))
        .collect();
    fused.sort_by(|a, b| b.2.total_cmp(&a.2).then(a.1.cmp(&b.1)));
    fused.into_iter().map(|(item, _, score)| (item, score)).collect()
}

/// One ranked result set.
#[derive(Debug, Clone, Default)]
pub struct Retrieval {
    pub results: Vec<ScoredPayload>,
}

impl Retrieval {
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    /// Every payload, sorted by start time. Equal starts keep rank order.
    pub fn narrative(&self) -> Vec<Payload> {
        let mut payloads: Vec<Payload> = self.results.iter().map(|r| r.payload.clone()).collect();
        payloads.sort_by(|a, b| a.start.total_cmp(&b.start));
        payloads
    }

    /// At most `max` payloads, one per `bucket_seconds` window, chosen in rank
    /// order and returned sorted by start time.
    pub fn anchors(&self, bucket_seconds: f64, max: usize) -> Vec<Payload> {
        let mut windows = HashSet::new();
        let mut picked = Vec::new();
        for result in &self.results {
            if picked.len() >= max {
                break;
            }
            let window = (result.payload.start / bucket_seconds).floor() as i64;
            if windows.insert(window) {
                picked.push(result.payload.clone());
            }
        }
        picked.sort_by(|a, b| a.start.total_cmp(&b.start));
        picked
    }
}

/// Embeds a question and runs the fused query.
#[derive(Clone)]
pub struct HybridSearcher {
    index: Arc<dyn VectorIndex>,
    dense: Arc<dyn DenseEncoder>,
    sparse: Arc<dyn SparseEncoder>,
    rrf_k: f64,
}

impl HybridSearcher {
    pub fn new(
        index: Arc<dyn VectorIndex>,
        dense: Arc<dyn DenseEncoder>,
        sparse: Arc<dyn SparseEncoder>,
        rrf_k: f64,
    ) -> Self {
        Self {
            index,
            dense,
            sparse,
            rrf_k,
        }
    }

    /// Search for `query_text`, optionally restricted to one video.
    ///
    /// Each prefetch branch contributes `2 × result_limit` candidates before
    /// fusion. A blank query returns an empty retrieval without touching the
    /// index.
    pub async fn search(
        &self,
        query_text: &str,
        result_limit: usize,
        video_id: Option<&str>,
    ) -> Result<Retrieval> {
        if query_text.trim().is_empty() || result_limit == 0 {
            return Ok(Retrieval::default());
        }

        let dense = encode_query(self.dense.as_ref(), query_text).await?;
        let sparse = self
            .sparse
            .embed(&[query_text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| Error::internal("sparse encoder returned no vector"))?;

        let query = HybridQuery {
            dense,
            sparse,
            prefetch_limit: result_limit * 2,
            limit: result_limit,
            video_id: video_id.map(str::to_string),
            rrf_k: self.rrf_k,
        };
        let results = self.index.query(&query).await?;
        debug!(
            returned = results.len(),
            video_id = video_id.unwrap_or("*"),
            "hybrid search"
        );
        Ok(Retrieval { results })
    }
}

/// Format seconds as `mm:ss`; hours roll into minutes.
pub fn format_timestamp(seconds: f64) -> String {
    let total = seconds.max(0.0).floor() as u64;
    format!("{:02}:{:02}", total / 60, total % 60)
}

/// Run `reel search` and print fused results.
pub async fn run_search(
    config: &Config,
    query: &str,
    video_id: Option<&str>,
    limit: Option<usize>,
) -> anyhow::Result<()> {
    if query.trim().is_empty() {
        println!("No results.");
        return Ok(());
    }
    if !config.embedding.is_enabled() {
        bail!("search requires embeddings. Set [embedding] provider in config.");
    }

    let searcher = HybridSearcher::new(
        create_index(config).await?,
        create_dense_encoder(&config.embedding)?,
        create_sparse_encoder(&config.embedding)?,
        config.retrieval.rrf_k,
    );
    let limit = limit.unwrap_or(config.retrieval.result_limit);
    let retrieval = searcher.search(query, limit, video_id).await?;

    if retrieval.is_empty() {
        println!("No results.");
        return Ok(());
    }
    for (i, r) in retrieval.results.iter().enumerate() {
        println!(
            "{}. [{:.4}] {} {} {}",
            i + 1,
            r.score,
            r.payload.video_id,
            format_timestamp(r.payload.start),
            r.payload.kind.as_str()
        );
        println!("    {}", preview(&r.payload.text, 160));
    }
    Ok(())
}

/// First `max` characters of `text` on one line.
pub fn preview(text: &str, max: usize) -> String {
    let flat: String = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max {
        flat
    } else {
        let cut: String = flat.chars().take(max).collect();
        format!("{}…", cut)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SourceKind;

    fn scored(text: &str, start: f64) -> ScoredPayload {
        ScoredPayload {
            id: text.into(),
            score: 0.0,
            payload: Payload {
                video_id: "v".into(),
                text: text.into(),
                kind: SourceKind::Audio,
                start,
                end: start + 1.0,
                frame_ref: None,
            },
        }
    }

    #[test]
    fn test_rrf_single_list_keeps_order() {
        let fused = rrf_fuse(&[vec!["a", "b", "c"]], 60.0);
        let order: Vec<&str> = fused.iter().map(|(d, _)| *d).collect();
        assert_eq!(order, vec!["a", "b", "c"]);
        assert!((fused[0].1 - 1.0 / 61.0).abs() < 1e-12);
    }

    #[test]
    fn test_rrf_shared_items_rise() {
        let fused = rrf_fuse(&[vec!["a", "b", "c"], vec!["c", "d"]], 60.0);
        assert_eq!(fused[0].0, "c");
        assert!((fused[0].1 - (1.0 / 63.0 + 1.0 / 61.0)).abs() < 1e-12);
        assert_eq!(fused.len(), 4);
    }

    #[test]
    fn test_rrf_ties_break_by_first_appearance() {
        // a and x both rank first in one list.
        let fused = rrf_fuse(&[vec!["a"], vec!["x"]], 60.0);
        assert_eq!(fused[0].0, "a");
        assert_eq!(fused[1].0, "x");
    }

    #[test]
    fn test_rrf_deterministic() {
        let lists = vec![vec![1, 2, 3, 4], vec![4, 3, 9, 1]];
        assert_eq!(rrf_fuse(&lists, 60.0), rrf_fuse(&lists, 60.0));
    }

    #[test]
    fn test_rrf_empty() {
        assert!(rrf_fuse::<u32>(&[vec![], vec![]], 60.0).is_empty());
    }

    #[test]
    fn test_narrative_is_chronological() {
        let r = Retrieval {
            results: vec![scored("late", 90.0), scored("early", 5.0), scored("mid", 40.0)],
        };
        let texts: Vec<String> = r.narrative().into_iter().map(|p| p.text).collect();
        assert_eq!(texts, vec!["early", "mid", "late"]);
    }

    #[test]
    fn test_anchors_one_per_window() {
        // Rank order: b (12s) beats a (15s) for the 10-20s window.
        let r = Retrieval {
            results: vec![
                scored("b", 12.0),
                scored("a", 15.0),
                scored("c", 3.0),
                scored("d", 45.0),
            ],
        };
        let texts: Vec<String> = r.anchors(10.0, 7).into_iter().map(|p| p.text).collect();
        assert_eq!(texts, vec!["c", "b", "d"]);
    }

    #[test]
    fn test_anchors_capped() {
        let r = Retrieval {
            results: (0..20).map(|i| scored(&format!("s{}", i), i as f64 * 10.0)).collect(),
        };
        let anchors = r.anchors(10.0, 7);
        assert_eq!(anchors.len(), 7);
        assert_eq!(anchors[0].text, "s0");
        assert_eq!(anchors[6].text, "s6");
    }

    #[test]
    fn test_format_timestamp() {
        assert_eq!(format_timestamp(0.0), "00:00");
        assert_eq!(format_timestamp(75.9), "01:15");
        assert_eq!(format_timestamp(3725.0), "62:05");
    }

    #[test]
    fn test_preview_truncates() {
        assert_eq!(preview("a  b\nc", 10), "a b c");
        assert_eq!(preview("abcdef", 3), "abc…");
    }
}
