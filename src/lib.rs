//! text2pod - Technical documents to podcast episodes
//!
//! A CLI tool that turns PDFs, Markdown and plain text into narrated,
//! multi-voice podcast audio.
//!
//! # Overview
//!
//! Every document goes through five stages, each leaving a durable artifact so an
//! interrupted run resumes where it stopped:
//!
//! 1. **Extracted** - text pulled from the source file
//! 2. **Analyzed** - formatted markdown plus a structured podcast analysis
//! 3. **Scripted** - speaker-attributed dialogue lines
//! 4. **Synthesized** - one audio segment per line
//! 5. **Assembled** - the final episode with crossfades between speakers
//!
//! Documents too large for one model request are split on a token budget and the
//! partial responses are merged back together.
//!
//! # Architecture
//!
//! - `config` - Settings and prompt templates
//! - `document` - Text extraction and structural units
//! - `tokens` - Token estimation and usage accounting
//! - `chunking` - Token-budgeted splitting
//! - `llm` - Language model trait, OpenAI client and chunked completion
//! - `combine` - Merging per-chunk responses
//! - `analysis` - Podcast analysis artifact
//! - `script` - Dialogue script generation
//! - `voice` - Speech synthesis and voice mapping
//! - `audio` - WAV handling and crossfade assembly
//! - `retry` - Retry policy and state machine
//! - `pipeline` - Stage orchestration, artifacts and the run store
//!
//! # Example
//!
//! ```rust,no_run
//! use std::path::Path;
//! use text2pod::config::Settings;
//! use text2pod::pipeline::{Orchestrator, ProcessOptions};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let settings = Settings::load()?;
//!     let orchestrator = Orchestrator::new(settings)?;
//!
//!     let outcome = orchestrator
//!         .process_document(Path::new("paper.pdf"), &ProcessOptions::default())
//!         .await;
//!     println!("{:?}: {:?}", outcome.status, outcome.audio_path);
//!
//!     Ok(())
//! }
//! ```

pub mod analysis;
pub mod audio;
pub mod chunking;
pub mod cli;
pub mod combine;
pub mod config;
pub mod document;
pub mod error;
pub mod llm;
pub mod pipeline;
pub mod retry;
pub mod script;
pub mod tokens;
pub mod voice;

pub use error::{PodError, Result};
