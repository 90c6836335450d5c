//! CLI output formatting utilities.

use crate::pipeline::{DocumentOutcome, PipelineRun, RunStatus};
use crate::tokens::UsageReport;
use console::style;
use indicatif::{ProgressBar, ProgressStyle};

/// Output helper for CLI formatting.
pub struct Output;

impl Output {
    /// Print an info message.
    pub fn info(msg: &str) {
        println!("{} {}", style(">>").cyan().bold(), msg);
    }

    /// Print a success message.
    pub fn success(msg: &str) {
        println!("{} {}", style(">>").green().bold(), msg);
    }

    /// Print a warning message.
    pub fn warning(msg: &str) {
        eprintln!("{} {}", style(">>").yellow().bold(), msg);
    }

    /// Print an error message.
    pub fn error(msg: &str) {
        eprintln!("{} {}", style(">>").red().bold(), msg);
    }

    /// Print a header.
    pub fn header(msg: &str) {
        println!("\n{}", style(msg).bold().underlined());
    }

    /// Print a key-value pair.
    pub fn kv(key: &str, value: &str) {
        println!("  {}: {}", style(key).dim(), value);
    }

    /// Print a list item.
    pub fn list_item(msg: &str) {
        println!("  {} {}", style("*").cyan(), msg);
    }

    /// Print the result of one document.
    pub fn outcome(outcome: &DocumentOutcome) {
        let (icon, detail) = match outcome.status {
            RunStatus::Completed if outcome.already_complete => {
                (style("=").dim(), "already complete".to_string())
            }
            RunStatus::Completed => (
                style("✓").green(),
                outcome
                    .audio_path
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_default(),
            ),
            RunStatus::Paused => (style("‖").yellow(), stage_note("paused after", outcome)),
            RunStatus::Aborted => (style("!").yellow(), stage_note("aborted after", outcome)),
            RunStatus::Failed | RunStatus::Running => (
                style("✗").red(),
                format!(
                    "failed at {}: {}",
                    outcome
                        .failed_stage
                        .map(|s| s.to_string())
                        .unwrap_or_else(|| "start".to_string()),
                    outcome.error.as_deref().unwrap_or("unknown error")
                ),
            ),
        };
        println!(
            "  {} {} ({}) {}",
            icon,
            style(&outcome.title).bold(),
            style(short_id(&outcome.document_id)).dim(),
            detail
        );
    }

    /// Print a summary of a batch.
    pub fn summary(outcomes: &[DocumentOutcome]) {
        Output::header(&format!("Summary ({} documents)", outcomes.len()));
        for outcome in outcomes {
            Output::outcome(outcome);
        }

        let count = |status: RunStatus| outcomes.iter().filter(|o| o.status == status).count();
        println!();
        Output::kv("Completed", &count(RunStatus::Completed).to_string());
        Output::kv("Failed", &count(RunStatus::Failed).to_string());
        let stopped = count(RunStatus::Paused) + count(RunStatus::Aborted);
        if stopped > 0 {
            Output::kv("Stopped", &stopped.to_string());
        }
    }

    /// Print a stored pipeline run.
    pub fn run_info(run: &PipelineRun) {
        let status = match run.status {
            RunStatus::Completed => style(run.status.as_str()).green(),
            RunStatus::Failed => style(run.status.as_str()).red(),
            RunStatus::Running => style(run.status.as_str()).cyan(),
            RunStatus::Paused | RunStatus::Aborted => style(run.status.as_str()).yellow(),
        };
        println!(
            "  {} {} ({}) {} at {}",
            style("*").cyan(),
            style(&run.title).bold(),
            style(short_id(&run.document_id)).dim(),
            status,
            run.completed_stage
                .map(|s| s.to_string())
                .unwrap_or_else(|| "-".to_string()),
        );
        if let Some(error) = &run.last_error {
            println!("    {} {}", style("→").dim(), style(content_preview(error, 160)).dim());
        }
    }

    /// Print token usage and estimated cost.
    pub fn usage(report: &UsageReport) {
        if report.requests == 0 {
            return;
        }
        Output::header("Token Usage");
        Output::kv("Model", &report.model);
        Output::kv("Requests", &report.requests.to_string());
        Output::kv(
            "Tokens",
            &format!("{} in / {} out", report.prompt_tokens, report.completion_tokens),
        );
        Output::kv("Estimated cost", &format!("${:.4}", report.total_cost));
    }

    /// Create a spinner.
    pub fn spinner(msg: &str) -> ProgressBar {
        let pb = ProgressBar::new_spinner();
        if let Ok(template) = ProgressStyle::default_spinner().template("{spinner:.green} {msg}") {
            pb.set_style(template);
        }
        pb.set_message(msg.to_string());
        pb.enable_steady_tick(std::time::Duration::from_millis(100));
        pb
    }
}

fn stage_note(prefix: &str, outcome: &DocumentOutcome) -> String {
    match outcome.completed_stage {
        Some(stage) => format!("{} {}", prefix, stage),
        None => format!("{} start", prefix),
    }
}

fn short_id(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}

/// Truncate content with ellipsis.
fn content_preview(content: &str, max_chars: usize) -> String {
    let content = content.replace('\n', " ");
    if content.chars().count() <= max_chars {
        content
    } else {
        let truncated: String = content.chars().take(max_chars).collect();
        format!("{}...", truncated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_preview_respects_char_boundaries() {
        assert_eq!(content_preview("short", 10), "short");
        assert_eq!(content_preview("línea\nuno", 5), "línea...");
    }

    #[test]
    fn test_short_id() {
        assert_eq!(short_id("0123456789abcdef"), "01234567");
        assert_eq!(short_id("abc"), "abc");
    }
}
