//! Pre-flight checks before expensive operations.
//!
//! Validates that required keys and configuration are available
//! before starting operations that would otherwise fail midway.

use crate::config::Settings;
use crate::error::{PodError, Result};

/// Requirements for different operations.
#[derive(Debug, Clone, Copy)]
pub enum Operation {
    /// Full pipeline: language model and voice synthesis.
    Process,
    /// Episode from an existing analysis; dialogue expansion needs the language model.
    Podcast { expand_dialogue: bool },
    /// Reading the run store.
    Status,
}

/// Run pre-flight checks for the given operation.
pub fn check(operation: Operation, settings: &Settings) -> Result<()> {
    settings.validate()?;
    match operation {
        Operation::Process => {
            check_key("OPENAI_API_KEY", "sk-...")?;
            check_key("ELEVENLABS_API_KEY", "...")?;
        }
        Operation::Podcast { expand_dialogue } => {
            if expand_dialogue {
                check_key("OPENAI_API_KEY", "sk-...")?;
            }
            check_key("ELEVENLABS_API_KEY", "...")?;
        }
        Operation::Status => {}
    }
    Ok(())
}

/// Check that an API key environment variable is set and non-empty.
fn check_key(name: &str, example: &str) -> Result<()> {
    match std::env::var(name) {
        Ok(key) if !key.trim().is_empty() => Ok(()),
        Ok(_) => Err(PodError::Configuration(format!(
            "{} is empty. Set it with: export {}='{}'",
            name, name, example
        ))),
        Err(_) => Err(PodError::Configuration(format!(
            "{} not set. Set it with: export {}='{}' (or add it to .env)",
            name, name, example
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_status_no_requirements() {
        assert!(check(Operation::Status, &Settings::default()).is_ok());
    }

    #[test]
    fn test_invalid_settings_fail_preflight() {
        let mut settings = Settings::default();
        settings.retry.max_attempts = 0;
        assert!(check(Operation::Status, &settings).is_err());
    }

    #[test]
    fn test_missing_key_is_reported() {
        let err = check_key("TEXT2POD_TEST_UNSET_KEY", "x").unwrap_err();
        assert!(err.to_string().contains("TEXT2POD_TEST_UNSET_KEY not set"));
    }
}
