//! Grounded question answering over one video.
//!
//! [`AnswerEngine`] runs a hybrid search, renders the results as a
//! chronological transcript-like context, and asks a [`Completer`] to answer
//! with timestamp citations. The highest-ranked moments, spread across time,
//! are returned as anchors for display.
//!
//! When the index has nothing relevant the engine answers with
//! [`NO_CONTENT_ANSWER`] and never calls the model.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tracing::info;

use crate::config::{Config, GenerationConfig, RetrievalConfig};
use crate::embedding::{create_dense_encoder, create_sparse_encoder};
use crate::error::Result;
use crate::models::{Payload, SourceKind};
use crate::openai::OpenAiClient;
use crate::search::{format_timestamp, preview, HybridSearcher};
use crate::store::create_index;

pub const NO_CONTENT_ANSWER: &str = "No relevant information was found in this video.";

const SYSTEM_PROMPT: &str = "You answer questions about a video using only the numbered sources \
provided. Sources are either speech from the audio track or text read from the screen. \
Cite the timestamp (mm:ss) of every source you rely on, for each claim you make. \
When a fact comes from on-screen text, say so explicitly (for example \"as shown on screen at 03:15\"). \
If the sources do not contain the answer, say that you don't know.";

/// Text generation collaborator.
#[async_trait]
pub trait Completer: Send + Sync {
    async fn complete(&self, system: &str, user: &str) -> Result<String>;
}

/// Chat completions over the OpenAI API.
pub struct OpenAiChat {
    client: OpenAiClient,
    model: String,
    temperature: f32,
}

impl OpenAiChat {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        Ok(Self {
            client: OpenAiClient::from_env("openai-chat", config.timeout_secs)?,
            model: config.model.clone(),
            temperature: config.temperature,
        })
    }
}

#[async_trait]
impl Completer for OpenAiChat {
    async fn complete(&self, system: &str, user: &str) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "temperature": self.temperature,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user},
            ],
        });
        let json = self.client.post_json("chat/completions", &body, 3).await?;
        Ok(json["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or_default()
            .trim()
            .to_string())
    }
}

/// The answer to one question.
#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    pub text: String,
    /// Diverse top-ranked moments, in time order.
    pub anchors: Vec<Payload>,
    /// Everything that was shown to the model, in time order.
    pub context: Vec<Payload>,
}

/// Source tag used in prompts and listings.
pub fn source_tag(kind: SourceKind) -> &'static str {
    match kind {
        SourceKind::Visual => "[VISUAL/SCREEN]",
        SourceKind::Audio => "[AUDIO/SPEECH]",
        SourceKind::Unknown => "[UNKNOWN]",
    }
}

/// Render the user prompt: numbered sources then the question.
pub fn build_prompt(question: &str, narrative: &[Payload]) -> String {
    let mut prompt = String::from("Sources:\n");
    for (i, p) in narrative.iter().enumerate() {
        prompt.push_str(&format!(
            "[Source {}] {} ({}): {}\n",
            i + 1,
            source_tag(p.kind),
            format_timestamp(p.start),
            p.text
        ));
    }
    prompt.push_str(&format!("\nQuestion: {}\n", question.trim()));
    prompt
}

pub struct AnswerEngine {
    searcher: HybridSearcher,
    completer: Arc<dyn Completer>,
    retrieval: RetrievalConfig,
}

impl AnswerEngine {
    pub fn new(searcher: HybridSearcher, completer: Arc<dyn Completer>, retrieval: RetrievalConfig) -> Self {
        Self {
            searcher,
            completer,
            retrieval,
        }
    }

    pub async fn answer(&self, question: &str, video_id: Option<&str>) -> Result<Answer> {
        let retrieval = self
            .searcher
            .search(question, self.retrieval.result_limit, video_id)
            .await?;

        if retrieval.is_empty() {
            info!(video_id = video_id.unwrap_or("*"), "no matching content");
            return Ok(Answer {
                text: NO_CONTENT_ANSWER.to_string(),
                anchors: Vec::new(),
                context: Vec::new(),
            });
        }

        let context = retrieval.narrative();
        let anchors = retrieval.anchors(
            self.retrieval.anchor_bucket_seconds,
            self.retrieval.max_anchors,
        );
        let text = self
            .completer
            .complete(SYSTEM_PROMPT, &build_prompt(question, &context))
            .await?;

        info!(
            sources = context.len(),
            anchors = anchors.len(),
            "answered question"
        );
        Ok(Answer {
            text,
            anchors,
            context,
        })
    }
}

/// Run `reel ask` and print the answer with its anchors.
pub async fn run_ask(config: &Config, question: &str, video_id: Option<&str>) -> anyhow::Result<()> {
    if !config.embedding.is_enabled() {
        anyhow::bail!("ask requires embeddings. Set [embedding] provider in config.");
    }
    let searcher = HybridSearcher::new(
        create_index(config).await?,
        create_dense_encoder(&config.embedding)?,
        create_sparse_encoder(&config.embedding)?,
        config.retrieval.rrf_k,
    );
    let engine = AnswerEngine::new(
        searcher,
        Arc::new(OpenAiChat::new(&config.generation)?),
        config.retrieval.clone(),
    );
    let answer = engine.answer(question, video_id).await?;

    println!("{}", answer.text);
    if !answer.anchors.is_empty() {
        println!("\nSources:");
        for a in &answer.anchors {
            println!(
                "  {} {} {}",
                format_timestamp(a.start),
                source_tag(a.kind),
                preview(&a.text, 100)
            );
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::{DenseEncoder, TermWeightEncoder};
    use crate::models::ScoredPayload;
    use crate::store::{CollectionSchema, EnsureOutcome, HybridQuery, VectorIndex};
    use std::sync::Mutex;

    struct FixedIndex(Vec<ScoredPayload>);

    #[async_trait]
    impl VectorIndex for FixedIndex {
        async fn ensure_collection(&self, _: &CollectionSchema) -> Result<EnsureOutcome> {
            Ok(EnsureOutcome::AlreadyExists)
        }
        async fn upsert(&self, records: &[crate::models::StoredRecord]) -> Result<usize> {
            Ok(records.len())
        }
        async fn query(&self, q: &HybridQuery) -> Result<Vec<ScoredPayload>> {
            Ok(self
                .0
                .iter()
                .filter(|p| q.video_id.as_deref().map_or(true, |v| p.payload.video_id == v))
                .take(q.limit)
                .cloned()
                .collect())
        }
        async fn count(&self, _: Option<&str>) -> Result<u64> {
            Ok(self.0.len() as u64)
        }
        async fn delete_video(&self, _: &str) -> Result<u64> {
            Ok(0)
        }
    }

    struct UnitEncoder;

    #[async_trait]
    impl DenseEncoder for UnitEncoder {
        fn model_name(&self) -> &str {
            "unit"
        }
        fn dims(&self) -> usize {
            1
        }
        async fn encode(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|_| vec![1.0]).collect())
        }
    }

    #[derive(Default)]
    struct RecordingCompleter {
        prompts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Completer for RecordingCompleter {
        async fn complete(&self, _system: &str, user: &str) -> Result<String> {
            self.prompts.lock().unwrap().push(user.to_string());
            Ok("It is explained at 00:30.".into())
        }
    }

    fn hit(video: &str, kind: SourceKind, text: &str, start: f64) -> ScoredPayload {
        ScoredPayload {
            id: format!("{}-{}", video, start),
            score: 0.0,
            payload: Payload {
                video_id: video.into(),
                text: text.into(),
                kind,
                start,
                end: start,
                frame_ref: None,
            },
        }
    }

    fn engine(hits: Vec<ScoredPayload>, completer: Arc<RecordingCompleter>) -> AnswerEngine {
        let searcher = HybridSearcher::new(
            Arc::new(FixedIndex(hits)),
            Arc::new(UnitEncoder),
            Arc::new(TermWeightEncoder::new()),
            60.0,
        );
        AnswerEngine::new(searcher, completer, RetrievalConfig::default())
    }

    #[test]
    fn test_build_prompt_tags_and_timestamps() {
        let narrative = vec![
            hit("v", SourceKind::Audio, "we install the crate", 5.0).payload,
            hit("v", SourceKind::Visual, "cargo add tokio", 75.0).payload,
        ];
        let prompt = build_prompt("How is tokio added?", &narrative);
        assert!(prompt.contains("[Source 1] [AUDIO/SPEECH] (00:05): we install the crate"));
        assert!(prompt.contains("[Source 2] [VISUAL/SCREEN] (01:15): cargo add tokio"));
        assert!(prompt.ends_with("Question: How is tokio added?\n"));
    }

    #[tokio::test]
    async fn test_empty_index_skips_model() {
        let completer = Arc::new(RecordingCompleter::default());
        let answer = engine(vec![], completer.clone())
            .answer("anything?", Some("abc"))
            .await
            .unwrap();
        assert_eq!(answer.text, NO_CONTENT_ANSWER);
        assert!(answer.anchors.is_empty());
        assert!(completer.prompts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_answer_uses_chronological_context() {
        let completer = Arc::new(RecordingCompleter::default());
        let hits = vec![
            hit("abc", SourceKind::Visual, "fn main() {}", 30.0),
            hit("abc", SourceKind::Audio, "first we open the editor", 2.0),
            hit("zzz", SourceKind::Audio, "other video", 1.0),
        ];
        let answer = engine(hits, completer.clone())
            .answer("what is typed?", Some("abc"))
            .await
            .unwrap();

        assert_eq!(answer.text, "It is explained at 00:30.");
        assert_eq!(answer.context.len(), 2);
        assert_eq!(answer.context[0].start, 2.0);
        assert_eq!(answer.anchors.len(), 2);
        let prompt = completer.prompts.lock().unwrap()[0].clone();
        assert!(prompt.find("first we open").unwrap() < prompt.find("fn main").unwrap());
        assert!(!prompt.contains("other video"));
    }

    #[tokio::test]
    async fn test_blank_question_is_no_content() {
        let completer = Arc::new(RecordingCompleter::default());
        let answer = engine(vec![hit("v", SourceKind::Audio, "x", 0.0)], completer)
            .answer("   ", None)
            .await
            .unwrap();
        assert_eq!(answer.text, NO_CONTENT_ANSWER);
    }
}
