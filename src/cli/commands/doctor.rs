//! Doctor command - verify API keys, directories and configuration.

use crate::cli::Output;
use crate::config::Settings;
use crate::voice::ElevenLabsSynthesizer;
use console::style;

/// Check result for a single item.
#[derive(Debug)]
pub struct CheckResult {
    pub name: String,
    pub status: CheckStatus,
    pub message: String,
    pub hint: Option<String>,
}

#[derive(Debug, PartialEq)]
pub enum CheckStatus {
    Ok,
    Warning,
    Error,
}

impl CheckResult {
    fn ok(name: &str, message: &str) -> Self {
        Self {
            name: name.to_string(),
            status: CheckStatus::Ok,
            message: message.to_string(),
            hint: None,
        }
    }

    fn warning(name: &str, message: &str, hint: &str) -> Self {
        Self {
            name: name.to_string(),
            status: CheckStatus::Warning,
            message: message.to_string(),
            hint: Some(hint.to_string()),
        }
    }

    fn error(name: &str, message: &str, hint: &str) -> Self {
        Self {
            name: name.to_string(),
            status: CheckStatus::Error,
            message: message.to_string(),
            hint: Some(hint.to_string()),
        }
    }

    fn print(&self) {
        let icon = match self.status {
            CheckStatus::Ok => style("✓").green(),
            CheckStatus::Warning => style("!").yellow(),
            CheckStatus::Error => style("✗").red(),
        };

        println!("  {} {} - {}", icon, style(&self.name).bold(), self.message);

        if let Some(hint) = &self.hint {
            println!("    {} {}", style("→").dim(), style(hint).dim());
        }
    }
}

/// Run all diagnostic checks.
pub async fn run_doctor(settings: &Settings) -> anyhow::Result<()> {
    Output::header("text2pod Doctor");
    println!();
    println!("Checking API keys, directories and configuration...\n");

    let mut checks = Vec::new();

    println!("{}", style("API Configuration").bold());
    let key_checks = vec![
        check_api_key("OPENAI_API_KEY", Some("sk-"), "https://platform.openai.com/api-keys"),
        check_api_key(
            "ELEVENLABS_API_KEY",
            None,
            "https://elevenlabs.io/app/settings/api-keys",
        ),
    ];
    for check in &key_checks {
        check.print();
    }
    checks.extend(key_checks);

    let voice_check = check_voice_service(settings).await;
    voice_check.print();
    checks.push(voice_check);

    println!();

    println!("{}", style("Directories").bold());
    let dir_checks = check_directories(settings);
    for check in &dir_checks {
        check.print();
    }
    checks.extend(dir_checks);

    println!();

    println!("{}", style("Configuration").bold());
    let config_checks = vec![check_config_file(), check_settings(settings)];
    for check in &config_checks {
        check.print();
    }
    checks.extend(config_checks);

    println!();

    let errors = checks.iter().filter(|c| c.status == CheckStatus::Error).count();
    let warnings = checks.iter().filter(|c| c.status == CheckStatus::Warning).count();

    if errors > 0 {
        Output::error(&format!(
            "{} error(s) found. Please fix them before using text2pod.",
            errors
        ));
        std::process::exit(1);
    } else if warnings > 0 {
        Output::warning(&format!("All checks passed with {} warning(s).", warnings));
    } else {
        Output::success("All checks passed! text2pod is ready to use.");
    }

    Ok(())
}

/// Check that an API key is configured, masking it in the output.
fn check_api_key(name: &str, prefix: Option<&str>, url: &str) -> CheckResult {
    let hint = format!("Set with: export {}='...' or add it to .env ({})", name, url);
    match std::env::var(name) {
        Ok(key) if key.trim().is_empty() => CheckResult::error(name, "empty", &hint),
        Ok(key) if prefix.is_some_and(|p| !key.starts_with(p)) => CheckResult::warning(
            name,
            "set but format looks unusual",
            &format!("Expected a key starting with {}", prefix.unwrap_or_default()),
        ),
        Ok(key) if key.is_ascii() && key.len() > 12 => {
            let masked = format!("{}...{}", &key[..4], &key[key.len() - 4..]);
            CheckResult::ok(name, &format!("configured ({})", masked))
        }
        Ok(_) => CheckResult::ok(name, "configured"),
        Err(_) => CheckResult::error(name, "not set", &hint),
    }
}

/// Check that the voice service answers with the configured key.
async fn check_voice_service(settings: &Settings) -> CheckResult {
    let name = "ElevenLabs";
    let synthesizer = match ElevenLabsSynthesizer::from_env(&settings.voice) {
        Ok(s) => s,
        Err(_) => {
            return CheckResult::warning(name, "skipped", "Set ELEVENLABS_API_KEY to check access")
        }
    };

    let spinner = Output::spinner("Contacting ElevenLabs...");
    let result = synthesizer.list_voices().await;
    spinner.finish_and_clear();

    match result {
        Ok(voices) => {
            let roles = [
                ("host", &settings.voice.host),
                ("expert", &settings.voice.expert),
                ("panelist", &settings.voice.panelist),
            ];
            let missing: Vec<String> = roles
                .iter()
                .filter(|(_, role)| role.voice_id.is_none())
                .filter(|(_, role)| {
                    !voices
                        .keys()
                        .any(|v| v.eq_ignore_ascii_case(&role.voice_name))
                })
                .map(|(label, role)| format!("{} ({})", role.voice_name, label))
                .collect();

            if missing.is_empty() {
                CheckResult::ok(name, &format!("reachable, {} voices available", voices.len()))
            } else {
                CheckResult::warning(
                    name,
                    &format!("voices not found: {}", missing.join(", ")),
                    "Set voice.<role>.voice_name or voice.<role>.voice_id in the config file",
                )
            }
        }
        Err(e) => CheckResult::error(
            name,
            &format!("unreachable: {}", e),
            "Check the API key and voice.base_url",
        ),
    }
}

/// Check state and output directories.
fn check_directories(settings: &Settings) -> Vec<CheckResult> {
    let mut results = Vec::new();

    let data_dir = settings.data_dir();
    if data_dir.exists() {
        results.push(CheckResult::ok("Data directory", &data_dir.display().to_string()));
    } else {
        results.push(CheckResult::warning(
            "Data directory",
            &format!("{} (will be created)", data_dir.display()),
            "Directory will be created on first use",
        ));
    }

    let db_path = settings.runs_db_path();
    if db_path.exists() {
        let size = std::fs::metadata(&db_path)
            .map(|m| format_size(m.len()))
            .unwrap_or_else(|_| "unknown size".to_string());
        results.push(CheckResult::ok(
            "Run database",
            &format!("{} ({})", db_path.display(), size),
        ));
    } else {
        results.push(CheckResult::warning(
            "Run database",
            &format!("{} (not created yet)", db_path.display()),
            "Database will be created on the first run",
        ));
    }

    let output_dir = settings.output_dir();
    results.push(check_writable("Output directory", &output_dir));

    results
}

/// Check that a directory can be created and written to.
fn check_writable(name: &str, dir: &std::path::Path) -> CheckResult {
    let hint = "Set general.output_dir to a writable location";
    if let Err(e) = std::fs::create_dir_all(dir) {
        return CheckResult::error(name, &format!("{}: {}", dir.display(), e), hint);
    }
    let marker = dir.join(".text2pod-write-test");
    match std::fs::write(&marker, b"ok") {
        Ok(()) => {
            let _ = std::fs::remove_file(&marker);
            CheckResult::ok(name, &format!("{} (writable)", dir.display()))
        }
        Err(e) => CheckResult::error(name, &format!("{} not writable: {}", dir.display(), e), hint),
    }
}

/// Check if config file exists.
fn check_config_file() -> CheckResult {
    let config_path = Settings::default_config_path();
    if config_path.exists() {
        CheckResult::ok("Config file", &config_path.display().to_string())
    } else {
        CheckResult::warning(
            "Config file",
            "using defaults",
            "Create with: text2pod config init",
        )
    }
}

fn check_settings(settings: &Settings) -> CheckResult {
    match settings.validate() {
        Ok(()) => CheckResult::ok(
            "Settings",
            &format!(
                "model {}, {} tokens per chunk, {} attempts",
                settings.llm.model, settings.chunking.max_tokens_per_chunk, settings.retry.max_attempts
            ),
        ),
        Err(e) => CheckResult::error("Settings", &e.to_string(), "Fix the value in the config file"),
    }
}

/// Format file size in human-readable format.
fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_result_error() {
        let result = CheckResult::error("test", "failed", "fix it");
        assert_eq!(result.status, CheckStatus::Error);
        assert_eq!(result.hint, Some("fix it".to_string()));
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(500), "500 B");
        assert_eq!(format_size(1024), "1.0 KB");
        assert_eq!(format_size(1024 * 1024), "1.0 MB");
    }

    #[test]
    fn test_writable_directory() {
        let dir = tempfile::tempdir().unwrap();
        let result = check_writable("Output", &dir.path().join("nested"));
        assert_eq!(result.status, CheckStatus::Ok);
        assert!(!dir.path().join("nested/.text2pod-write-test").exists());
    }

    #[test]
    fn test_invalid_settings_are_reported() {
        let mut settings = Settings::default();
        settings.chunking.safety_margin_fraction = 1.5;
        assert_eq!(check_settings(&settings).status, CheckStatus::Error);
    }
}
