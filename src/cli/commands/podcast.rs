//! Podcast command: build an episode from an existing analysis file.

use crate::cli::preflight::{self, Operation};
use crate::cli::{Output, RunArgs};
use crate::config::Settings;
use crate::pipeline::{CancelToken, ConsoleDecisions, Orchestrator, Stage};
use anyhow::Result;
use std::path::Path;
use std::sync::Arc;

/// Run the podcast command.
pub async fn run_podcast(
    analysis: &str,
    title: Option<&str>,
    run: &RunArgs,
    force: bool,
    mut settings: Settings,
    cancel: CancelToken,
) -> Result<()> {
    run.apply(&mut settings);

    let operation = Operation::Podcast {
        expand_dialogue: settings.script.expand_dialogue,
    };
    if let Err(e) = preflight::check(operation, &settings) {
        Output::error(&format!("{}", e));
        Output::info("Run 'text2pod doctor' for detailed diagnostics.");
        return Err(e.into());
    }

    let path = Path::new(analysis);
    if !path.is_file() {
        anyhow::bail!("Analysis file not found: {}", analysis);
    }

    Output::info(&format!("Building episode from {}", path.display()));

    let mut orchestrator = Orchestrator::new(settings)?.with_cancel_token(cancel);
    if run.interactive {
        orchestrator = orchestrator.with_decisions(Arc::new(ConsoleDecisions));
    }

    let from_stage = force.then_some(Stage::Scripted);
    let outcome = orchestrator
        .process_analysis(path, title, &run.options(false, from_stage))
        .await;

    println!();
    Output::outcome(&outcome);
    if let Some(report) = orchestrator.usage_report() {
        Output::usage(&report);
    }

    if !outcome.is_success() {
        anyhow::bail!(
            "'{}' did not complete: {}",
            outcome.title,
            outcome.error.as_deref().unwrap_or(outcome.status.as_str())
        );
    }
    Ok(())
}
