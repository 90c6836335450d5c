//! Config command implementation.

use crate::cli::{ConfigAction, Output};
use crate::config::Settings;
use anyhow::Result;
use std::path::PathBuf;

/// Run the config command.
pub fn run_config(action: &ConfigAction, settings: Settings, config_path: Option<PathBuf>) -> Result<()> {
    let config_path = config_path.unwrap_or_else(Settings::default_config_path);

    match action {
        ConfigAction::Show => {
            let toml_str = toml::to_string_pretty(&settings)
                .map_err(|e| anyhow::anyhow!("Failed to serialize config: {}", e))?;
            println!("{}", toml_str);
        }

        ConfigAction::Path => {
            println!("{}", config_path.display());
        }

        ConfigAction::Init { force } => {
            if config_path.exists() && !force {
                Output::warning(&format!(
                    "Config file already exists at {}. Use --force to overwrite.",
                    config_path.display()
                ));
                return Ok(());
            }

            if let Some(parent) = config_path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            settings.save_to(&config_path)?;
            Output::success(&format!("Wrote config file: {}", config_path.display()));
            Output::info("Set OPENAI_API_KEY and ELEVENLABS_API_KEY in your shell or a .env file.");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_writes_loadable_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("text2pod/config.toml");

        let mut settings = Settings::default();
        settings.audio.crossfade_ms = 250;
        run_config(&ConfigAction::Init { force: false }, settings, Some(path.clone())).unwrap();

        let loaded = Settings::load_from(Some(&path)).unwrap();
        assert_eq!(loaded.audio.crossfade_ms, 250);

        // Existing file is kept without --force.
        run_config(&ConfigAction::Init { force: false }, Settings::default(), Some(path.clone()))
            .unwrap();
        assert_eq!(Settings::load_from(Some(&path)).unwrap().audio.crossfade_ms, 250);
    }
}
