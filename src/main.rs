//! text2pod CLI entry point.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use text2pod::cli::{commands, Cli, Commands, Output};
use text2pod::config::Settings;
use text2pod::pipeline::CancelToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // API keys may live in a .env file next to the documents
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let config_path = cli.config.as_ref().map(PathBuf::from);
    let settings = Settings::load_from(config_path.as_ref())?;

    let log_level = match cli.verbose {
        0 => settings.general.log_level.as_str(),
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| format!("text2pod={}", log_level)),
        ))
        .with(tracing_subscriber::fmt::layer().with_target(false).with_writer(std::io::stderr))
        .init();

    std::fs::create_dir_all(settings.data_dir())?;

    // First Ctrl-C stops at the next stage boundary, a second one exits.
    let cancel = CancelToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                Output::warning("Interrupted, stopping after the current stage (Ctrl-C again to quit)");
                cancel.cancel();
                if tokio::signal::ctrl_c().await.is_ok() {
                    std::process::exit(130);
                }
            }
        });
    }

    match &cli.command {
        Commands::Process {
            input,
            run,
            chunk_tokens,
            from_stage,
            force,
        } => {
            commands::run_process(input, run, *chunk_tokens, *from_stage, *force, settings, cancel)
                .await?;
        }

        Commands::Podcast {
            analysis,
            title,
            run,
            force,
        } => {
            commands::run_podcast(analysis, title.as_deref(), run, *force, settings, cancel).await?;
        }

        Commands::Status { document_id, json } => {
            commands::run_status(document_id.as_deref(), *json, &settings)?;
        }

        Commands::Doctor => {
            commands::run_doctor(&settings).await?;
        }

        Commands::Config { action } => {
            commands::run_config(action, settings, config_path)?;
        }
    }

    Ok(())
}
