//! Status command implementation.

use crate::cli::Output;
use crate::config::Settings;
use crate::pipeline::RunStore;
use anyhow::Result;

/// Run the status command.
pub fn run_status(document_id: Option<&str>, json: bool, settings: &Settings) -> Result<()> {
    let db_path = settings.runs_db_path();
    if !db_path.exists() {
        Output::info("No runs recorded yet. Use 'text2pod process <file>' to start one.");
        return Ok(());
    }

    let store = RunStore::new(&db_path)?;
    let runs = match document_id {
        Some(id) => {
            let matching: Vec<_> = store
                .list()?
                .into_iter()
                .filter(|run| run.document_id.starts_with(id))
                .collect();
            if matching.is_empty() {
                Output::warning(&format!("No run found for '{}'", id));
                return Ok(());
            }
            matching
        }
        None => store.list()?,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&runs)?);
        return Ok(());
    }

    if runs.is_empty() {
        Output::info("No runs recorded yet.");
        return Ok(());
    }

    Output::header(&format!("Pipeline Runs ({})", runs.len()));
    println!();
    for run in &runs {
        Output::run_info(run);
    }

    if let [run] = runs.as_slice() {
        println!();
        Output::kv("Source", &run.source_path);
        Output::kv("Attempts", &run.attempts.to_string());
        Output::kv("Updated", &run.updated_at.to_rfc3339());
        for (stage, paths) in &run.artifacts {
            for path in paths {
                Output::kv(stage, path);
            }
        }
    }
    Ok(())
}
