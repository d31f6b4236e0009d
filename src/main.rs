//! # Reelsearch CLI (`reel`)
//!
//! ## Usage
//!
//! ```bash
//! reel --config ./config/reel.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `reel init` | Create the vector collection if it is missing |
//! | `reel ingest <url>` | Transcribe, OCR, embed, and store one video |
//! | `reel search "<query>"` | Print fused hybrid search results |
//! | `reel ask "<question>"` | Answer a question with timestamp citations |
//! | `reel stats` | Show stored record counts |
//!
//! ## Examples
//!
//! ```bash
//! # Ingest speech only, replacing earlier records for the video
//! reel ingest "https://www.youtube.com/watch?v=abc123" --no-visuals --replace
//!
//! # Ask about one video
//! reel ask "What does the slide at the start say?" --video abc123
//! ```
//!
//! Logs go to stderr and are controlled by `RUST_LOG`
//! (default `reelsearch=info`).

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use reelsearch::{answer, config, ingest, search, stats, store};

/// Reelsearch — ask questions about videos, answered from what is said and
/// what is shown on screen.
#[derive(Parser)]
#[command(name = "reel", version, about)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/reel.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the vector collection. Safe to run repeatedly.
    Init,

    /// Ingest one video.
    Ingest {
        /// Video URL or local file path.
        url: String,

        /// Video id to store records under. Derived from the URL by default.
        #[arg(long = "id")]
        video_id: Option<String>,

        /// Skip frame sampling and OCR.
        #[arg(long)]
        no_visuals: bool,

        /// Replace existing records for this video once the new ones are ready.
        #[arg(long)]
        replace: bool,
    },

    /// Search stored content.
    Search {
        query: String,

        /// Restrict results to one video.
        #[arg(long)]
        video: Option<String>,

        /// Maximum results. Defaults to `retrieval.result_limit`.
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Answer a question with timestamp citations.
    Ask {
        question: String,

        /// Restrict the answer to one video.
        #[arg(long)]
        video: Option<String>,
    },

    /// Show stored record counts.
    Stats {
        /// Also count records for this video.
        #[arg(long)]
        video: Option<String>,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("reelsearch=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            store::run_init(&cfg).await?;
        }
        Commands::Ingest {
            url,
            video_id,
            no_visuals,
            replace,
        } => {
            ingest::run_ingest(&cfg, &url, video_id, no_visuals, replace).await?;
        }
        Commands::Search {
            query,
            video,
            limit,
        } => {
            search::run_search(&cfg, &query, video.as_deref(), limit).await?;
        }
        Commands::Ask { question, video } => {
            answer::run_ask(&cfg, &question, video.as_deref()).await?;
        }
        Commands::Stats { video } => {
            stats::run_stats(&cfg, video.as_deref()).await?;
        }
    }

    Ok(())
}
