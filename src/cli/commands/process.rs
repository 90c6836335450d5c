//! Process command implementation.

use crate::cli::preflight::{self, Operation};
use crate::cli::{Output, RunArgs};
use crate::config::Settings;
use crate::pipeline::{discover_inputs, CancelToken, ConsoleDecisions, Orchestrator, Stage};
use anyhow::Result;
use std::path::Path;
use std::sync::Arc;

/// Run the process command.
pub async fn run_process(
    input: &str,
    run: &RunArgs,
    chunk_tokens: Option<usize>,
    from_stage: Option<Stage>,
    force: bool,
    mut settings: Settings,
    cancel: CancelToken,
) -> Result<()> {
    run.apply(&mut settings);
    if let Some(tokens) = chunk_tokens {
        settings.chunking.max_tokens_per_chunk = tokens;
    }

    if let Err(e) = preflight::check(Operation::Process, &settings) {
        Output::error(&format!("{}", e));
        Output::info("Run 'text2pod doctor' for detailed diagnostics.");
        return Err(e.into());
    }

    let inputs = discover_inputs(Path::new(input))?;
    if inputs.is_empty() {
        Output::warning(&format!("No PDF, Markdown or text files found in {}", input));
        return Ok(());
    }
    if inputs.len() > 1 {
        Output::info(&format!("Found {} documents to process", inputs.len()));
    }

    let mut orchestrator = Orchestrator::new(settings)?.with_cancel_token(cancel);
    if run.interactive {
        orchestrator = orchestrator.with_decisions(Arc::new(ConsoleDecisions));
    }

    let options = run.options(force, from_stage);
    let outcomes = orchestrator.process_batch(&inputs, &options).await;

    if let [outcome] = outcomes.as_slice() {
        println!();
        Output::outcome(outcome);
    } else {
        Output::summary(&outcomes);
    }
    if let Some(report) = orchestrator.usage_report() {
        Output::usage(&report);
    }

    let failed = outcomes.iter().filter(|o| !o.is_success()).count();
    if outcomes.len() < inputs.len() {
        Output::warning(&format!(
            "Stopped early: {} of {} documents not started",
            inputs.len() - outcomes.len(),
            inputs.len()
        ));
    }
    if failed > 0 {
        anyhow::bail!("{} of {} document(s) did not complete", failed, outcomes.len());
    }
    Ok(())
}
