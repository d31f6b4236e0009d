//! # Reelsearch
//!
//! Multimodal video ingestion and cited question answering.
//!
//! A video is split into two branches that run concurrently: the audio track
//! is transcribed and grouped into overlapping time-stamped chunks, and
//! sampled frames are de-duplicated and read with OCR. Both branches are
//! normalized into one payload shape, embedded as dense and sparse vectors,
//! and stored in a hybrid vector index. Questions are answered from a fused
//! dense + sparse search, with every claim tied to a timestamp.
//!
//! ## Architecture
//!
//! ```text
//!              ┌────────────┐   ┌──────────┐
//!         ┌──▶│ transcribe │──▶│  chunk    │──┐
//! ┌──────┐ │   └────────────┘   └──────────┘  │   ┌───────────┐   ┌────────┐
//! │ URL  │─┤                                  ├──▶│ normalize │──▶│ index  │
//! └──────┘ │   ┌────────────┐   ┌──────────┐  │   │  + embed  │   │ (RRF)  │
//!         └──▶│  frames    │──▶│   OCR     │──┘   └───────────┘   └───┬────┘
//!              └────────────┘   └──────────┘                           │
//!                                                     search / ask ◀───┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! reel init                                   # create the collection
//! reel ingest "https://youtu.be/abc123"       # audio + on-screen text
//! reel search "borrow checker" --video abc123
//! reel ask "Which command adds tokio?" --video abc123
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Pipeline error taxonomy |
//! | [`models`] | Core data types |
//! | [`pool`] | Bounded worker pools for blocking work |
//! | [`download`] | Audio and video retrieval |
//! | [`transcribe`] | Speech-to-text |
//! | [`chunk`] | Transcript chunking with overlap |
//! | [`frames`] | Frame sampling and de-duplication |
//! | [`ocr`] | On-screen text extraction |
//! | [`normalize`] | Unified payload shape |
//! | [`embedding`] | Dense and sparse encoders |
//! | [`store`] | Hybrid vector index backends |
//! | [`ingest`] | Pipeline orchestration |
//! | [`search`] | Hybrid search and RRF fusion |
//! | [`answer`] | Grounded question answering |
//! | [`stats`] | Index statistics |

pub mod answer;
pub mod chunk;
pub mod config;
pub mod download;
pub mod embedding;
pub mod error;
pub mod frames;
pub mod ingest;
pub mod models;
pub mod normalize;
pub mod ocr;
pub mod openai;
pub mod pool;
pub mod search;
pub mod stats;
pub mod store;
pub mod transcribe;
