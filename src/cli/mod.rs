//! CLI module for text2pod.

pub mod commands;
mod output;
pub mod preflight;

pub use output::Output;

use crate::analysis::FormatStyle;
use crate::config::Settings;
use crate::pipeline::{ProcessOptions, Stage};
use clap::{Args, Parser, Subcommand};

/// text2pod - Turn technical documents into podcast episodes
///
/// Extracts text from PDF, Markdown or plain text files, plans an episode with a
/// language model and voices it with text-to-speech.
#[derive(Parser, Debug)]
#[command(name = "text2pod")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Increase verbosity (-v for info, -vv for debug, -vvv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Path to configuration file
    #[arg(short, long, global = true, env = "TEXT2POD_CONFIG")]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Convert a document, or every supported document in a directory, into an episode
    Process {
        /// PDF, Markdown or text file, or a directory of them
        input: String,

        #[command(flatten)]
        run: RunArgs,

        /// Tokens per request before reserves and safety margin
        #[arg(long)]
        chunk_tokens: Option<usize>,

        /// Re-run from this stage (extracted, analyzed, scripted, synthesized, assembled)
        #[arg(long)]
        from_stage: Option<Stage>,

        /// Ignore existing artifacts and start from extraction
        #[arg(short, long)]
        force: bool,
    },

    /// Build an episode from an existing analysis JSON file
    Podcast {
        /// Analysis JSON file
        analysis: String,

        /// Episode title (defaults to the file name)
        #[arg(short, long)]
        title: Option<String>,

        #[command(flatten)]
        run: RunArgs,

        /// Regenerate the script and audio even if they exist
        #[arg(short, long)]
        force: bool,
    },

    /// Show recorded pipeline runs
    Status {
        /// Only show this document id
        document_id: Option<String>,

        /// Print runs as JSON
        #[arg(long)]
        json: bool,
    },

    /// Check API keys, directories and service reachability
    Doctor,

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Options shared by the commands that produce audio.
#[derive(Args, Debug, Clone, Default)]
pub struct RunArgs {
    /// Podcast format (host_expert, two_experts, panel) instead of the recommendation
    #[arg(long)]
    pub format: Option<FormatStyle>,

    /// Total attempts per API call
    #[arg(long)]
    pub max_retries: Option<u32>,

    /// Delay between attempts in milliseconds
    #[arg(long)]
    pub retry_delay_ms: Option<u64>,

    /// Crossfade between speakers in milliseconds
    #[arg(long)]
    pub crossfade_ms: Option<u64>,

    /// Ask before each stage
    #[arg(short, long)]
    pub interactive: bool,

    /// Remove segment audio after the episode is assembled
    #[arg(long)]
    pub cleanup: bool,

    /// Chat model to use
    #[arg(short, long)]
    pub model: Option<String>,
}

impl RunArgs {
    /// Apply command-line overrides on top of the loaded settings.
    pub fn apply(&self, settings: &mut Settings) {
        if let Some(attempts) = self.max_retries {
            settings.retry.max_attempts = attempts;
        }
        if let Some(delay) = self.retry_delay_ms {
            settings.retry.delay_ms = delay;
        }
        if let Some(crossfade) = self.crossfade_ms {
            settings.audio.crossfade_ms = crossfade;
        }
        if let Some(model) = &self.model {
            settings.llm.model = model.clone();
        }
    }

    pub fn options(&self, force: bool, from_stage: Option<Stage>) -> ProcessOptions {
        ProcessOptions {
            format: self.format,
            force,
            from_stage,
            cleanup: self.cleanup,
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Show configuration file path
    Path,

    /// Write the current configuration to the config file
    Init {
        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_process_flags() {
        let cli = Cli::try_parse_from([
            "text2pod",
            "-vv",
            "process",
            "paper.pdf",
            "--format",
            "two-experts",
            "--chunk-tokens",
            "16000",
            "--max-retries",
            "5",
            "--from-stage",
            "script",
            "--cleanup",
        ])
        .unwrap();

        assert_eq!(cli.verbose, 2);
        let Commands::Process {
            input,
            run,
            chunk_tokens,
            from_stage,
            force,
        } = cli.command
        else {
            panic!("expected process command");
        };
        assert_eq!(input, "paper.pdf");
        assert_eq!(chunk_tokens, Some(16_000));
        assert!(!force);

        let options = run.options(force, from_stage);
        assert_eq!(options.format, Some(FormatStyle::TwoExperts));
        assert_eq!(options.from_stage, Some(Stage::Scripted));
        assert!(options.cleanup);

        let mut settings = Settings::default();
        run.apply(&mut settings);
        assert_eq!(settings.retry.max_attempts, 5);
        assert_eq!(settings.retry.delay_ms, 1_000);
    }

    #[test]
    fn test_unknown_format_is_rejected() {
        assert!(Cli::try_parse_from(["text2pod", "process", "a.pdf", "--format", "solo"]).is_err());
    }
}
