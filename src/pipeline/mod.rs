//! Multi-stage document to podcast pipeline.
//!
//! Each document moves through [`Stage`]s in order. Every stage writes a durable
//! artifact (see [`ArtifactStore`]) and its completion is recorded in the
//! [`RunStore`], so an interrupted run picks up at the first stage whose artifact
//! is missing or invalid.

mod artifacts;
mod orchestrator;
mod store;

pub use artifacts::ArtifactStore;
pub use orchestrator::{discover_inputs, DocumentOutcome, Orchestrator, ProcessOptions};
pub use store::{PipelineRun, RunStatus, RunStore};

use crate::error::{PodError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::{self, BufRead, Write};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Pipeline stage, named after the state reached when it completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Extracted,
    Analyzed,
    Scripted,
    Synthesized,
    Assembled,
}

impl Stage {
    pub const ALL: [Stage; 5] = [
        Stage::Extracted,
        Stage::Analyzed,
        Stage::Scripted,
        Stage::Synthesized,
        Stage::Assembled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Extracted => "extracted",
            Stage::Analyzed => "analyzed",
            Stage::Scripted => "scripted",
            Stage::Synthesized => "synthesized",
            Stage::Assembled => "assembled",
        }
    }

    /// What running this stage does, for progress output.
    pub fn action(&self) -> &'static str {
        match self {
            Stage::Extracted => "Extracting text",
            Stage::Analyzed => "Analyzing content",
            Stage::Scripted => "Writing script",
            Stage::Synthesized => "Synthesizing speech",
            Stage::Assembled => "Assembling audio",
        }
    }

    pub fn next(&self) -> Option<Stage> {
        Stage::ALL.iter().copied().find(|s| s > self)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = PodError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "extracted" | "extract" => Ok(Stage::Extracted),
            "analyzed" | "analyze" | "analysis" => Ok(Stage::Analyzed),
            "scripted" | "script" => Ok(Stage::Scripted),
            "synthesized" | "synthesize" | "tts" => Ok(Stage::Synthesized),
            "assembled" | "assemble" => Ok(Stage::Assembled),
            other => Err(PodError::Configuration(format!(
                "Unknown stage '{}'. Expected one of: extracted, analyzed, scripted, synthesized, assembled",
                other
            ))),
        }
    }
}

/// Answer at an interactive checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Proceed,
    /// Stop this document cleanly; it can be resumed later.
    Skip,
    /// Stop this document and mark it aborted.
    Abort,
}

/// Supplies the decision taken before each stage runs.
pub trait DecisionSource: Send + Sync {
    fn decide(&self, stage: Stage, title: &str) -> Decision;
}

/// Always proceeds. Used when checkpoints are disabled.
#[derive(Debug, Default, Clone, Copy)]
pub struct AutoProceed;

impl DecisionSource for AutoProceed {
    fn decide(&self, _stage: Stage, _title: &str) -> Decision {
        Decision::Proceed
    }
}

/// Asks on the terminal before each stage.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleDecisions;

impl ConsoleDecisions {
    fn parse(answer: &str) -> Decision {
        match answer.trim().to_lowercase().as_str() {
            "s" | "skip" => Decision::Skip,
            "a" | "abort" | "q" => Decision::Abort,
            _ => Decision::Proceed,
        }
    }
}

impl DecisionSource for ConsoleDecisions {
    fn decide(&self, stage: Stage, title: &str) -> Decision {
        eprint!(
            "  {} for '{}'? [P]roceed / [s]kip / [a]bort: ",
            stage.action(),
            title
        );
        let _ = io::stderr().flush();

        let mut input = String::new();
        match io::stdin().lock().read_line(&mut input) {
            Ok(0) | Err(_) => Decision::Abort,
            Ok(_) => Self::parse(&input),
        }
    }
}

/// Cooperative cancellation flag, checked at stage boundaries.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
