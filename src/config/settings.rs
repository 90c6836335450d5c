//! Configuration settings for text2pod.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::chunking::ChunkBudget;
use crate::retry::{Backoff, RetryPolicy};

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
#[derive(Default)]
pub struct Settings {
    pub general: GeneralSettings,
    pub llm: LlmSettings,
    pub chunking: ChunkingSettings,
    pub retry: RetrySettings,
    pub script: ScriptSettings,
    pub voice: VoiceSettings,
    pub audio: AudioSettings,
    pub prompts: PromptSettings,
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralSettings {
    /// Directory for application state (the pipeline run database).
    pub data_dir: String,
    /// Directory where per-document artifacts are written.
    pub output_dir: String,
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Default for GeneralSettings {
    fn default() -> Self {
        Self {
            data_dir: "~/.text2pod".to_string(),
            output_dir: "./output".to_string(),
            log_level: "info".to_string(),
        }
    }
}

/// Language model settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmSettings {
    /// Chat model used for formatting, analysis and script generation.
    pub model: String,
    /// Sampling temperature.
    pub temperature: f32,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
    /// Override for the model's context window (tokens).
    pub context_window: Option<usize>,
    /// Chunk requests of one document allowed in flight at once.
    pub max_concurrent_requests: usize,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            temperature: 0.3,
            timeout_secs: 300,
            context_window: None,
            max_concurrent_requests: 4,
        }
    }
}

/// Token budget used when a document has to be split across requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingSettings {
    /// Upper bound on tokens per request, before reserves and safety margin.
    pub max_tokens_per_chunk: usize,
    /// Tokens reserved for the system prompt.
    pub system_reserve: usize,
    /// Tokens reserved for the model's response.
    pub response_reserve: usize,
    /// Fraction of the budget held back as a safety margin (0.0 to <1.0).
    pub safety_margin_fraction: f64,
    /// Average characters per token used by the estimator.
    pub chars_per_token: f64,
}

impl Default for ChunkingSettings {
    fn default() -> Self {
        Self {
            max_tokens_per_chunk: 32_000,
            system_reserve: 1_000,
            response_reserve: 4_000,
            safety_margin_fraction: 0.1,
            chars_per_token: 4.0,
        }
    }
}

impl ChunkingSettings {
    /// Build the chunker budget from these settings.
    pub fn budget(&self) -> ChunkBudget {
        ChunkBudget {
            max_tokens_per_chunk: self.max_tokens_per_chunk,
            system_reserve: self.system_reserve,
            response_reserve: self.response_reserve,
            safety_margin_fraction: self.safety_margin_fraction,
        }
    }
}

/// Retry behaviour for external calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    /// Total attempts per call, including the first.
    pub max_attempts: u32,
    /// Delay between attempts in milliseconds.
    pub delay_ms: u64,
    /// fixed or exponential.
    pub backoff: Backoff,
    /// Cap for exponential backoff in milliseconds.
    pub max_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay_ms: 1_000,
            backoff: Backoff::Fixed,
            max_delay_ms: 30_000,
        }
    }
}

impl RetrySettings {
    /// Build the retry policy from these settings.
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            delay: Duration::from_millis(self.delay_ms),
            backoff: self.backoff,
            max_delay: Duration::from_millis(self.max_delay_ms),
        }
    }
}

/// Script generation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScriptSettings {
    /// Ask the model to expand each analysis segment into dialogue.
    /// When false, analysis segments are used as script lines directly.
    pub expand_dialogue: bool,
}

impl Default for ScriptSettings {
    fn default() -> Self {
        Self {
            expand_dialogue: true,
        }
    }
}

/// Voice assignment for one speaker role.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VoiceRoleSettings {
    /// Voice name as listed by the provider.
    pub voice_name: String,
    /// Explicit voice id; resolved from `voice_name` when absent.
    pub voice_id: Option<String>,
    pub stability: f32,
    pub similarity_boost: f32,
    pub style: f32,
    pub use_speaker_boost: bool,
}

impl Default for VoiceRoleSettings {
    fn default() -> Self {
        Self {
            voice_name: "Adam".to_string(),
            voice_id: None,
            stability: 0.71,
            similarity_boost: 0.5,
            style: 0.0,
            use_speaker_boost: true,
        }
    }
}

/// Text-to-speech settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VoiceSettings {
    /// Base URL of the ElevenLabs API.
    pub base_url: String,
    /// Synthesis model id.
    pub model_id: String,
    /// Raw PCM sample rate requested from the provider.
    pub sample_rate: u32,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
    pub host: VoiceRoleSettings,
    pub expert: VoiceRoleSettings,
    pub panelist: VoiceRoleSettings,
}

impl Default for VoiceSettings {
    fn default() -> Self {
        Self {
            base_url: "https://api.elevenlabs.io/v1".to_string(),
            model_id: "eleven_multilingual_v2".to_string(),
            sample_rate: 24_000,
            timeout_secs: 120,
            host: VoiceRoleSettings {
                voice_name: "Jessica".to_string(),
                ..Default::default()
            },
            expert: VoiceRoleSettings {
                voice_name: "Daniel".to_string(),
                stability: 0.75,
                similarity_boost: 0.6,
                ..Default::default()
            },
            panelist: VoiceRoleSettings::default(),
        }
    }
}

/// Audio assembly settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioSettings {
    /// Crossfade between segments of different speakers, in milliseconds.
    pub crossfade_ms: u64,
    /// Remove per-segment files after a successful assembly.
    pub cleanup_segments: bool,
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self {
            crossfade_ms: 500,
            cleanup_segments: false,
        }
    }
}

/// Prompt customization settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
#[derive(Default)]
pub struct PromptSettings {
    /// Directory for custom prompts (overrides defaults).
    pub custom_dir: Option<String>,
    /// Custom variables available in all prompts as {{variable_name}}.
    pub variables: std::collections::HashMap<String, String>,
}

impl Settings {
    /// Load settings from the default configuration file.
    pub fn load() -> crate::error::Result<Self> {
        Self::load_from(None)
    }

    /// Load settings from a specific path, or default location if None.
    pub fn load_from(path: Option<&PathBuf>) -> crate::error::Result<Self> {
        let config_path = match path {
            Some(p) => p.clone(),
            None => Self::default_config_path(),
        };

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            let settings: Settings = toml::from_str(&content)?;
            Ok(settings)
        } else {
            Ok(Settings::default())
        }
    }

    /// Save settings to the default configuration file.
    pub fn save(&self) -> crate::error::Result<()> {
        self.save_to(&Self::default_config_path())
    }

    /// Save settings to a specific path.
    pub fn save_to(&self, path: &PathBuf) -> crate::error::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| crate::error::PodError::Configuration(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Reject option combinations that cannot work, before any processing starts.
    pub fn validate(&self) -> crate::error::Result<()> {
        use crate::error::PodError;

        self.chunking.budget().effective()?;
        if self.chunking.chars_per_token <= 0.0 {
            return Err(PodError::Configuration(
                "chunking.chars_per_token must be positive".to_string(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(PodError::Configuration(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.voice.sample_rate == 0 {
            return Err(PodError::Configuration(
                "voice.sample_rate must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Get the default configuration file path.
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("text2pod")
            .join("config.toml")
    }

    /// Expand shell variables in paths (e.g., ~).
    pub fn expand_path(path: &str) -> PathBuf {
        PathBuf::from(shellexpand::tilde(path).to_string())
    }

    /// Get the expanded data directory path.
    pub fn data_dir(&self) -> PathBuf {
        Self::expand_path(&self.general.data_dir)
    }

    /// Get the expanded output directory path.
    pub fn output_dir(&self) -> PathBuf {
        Self::expand_path(&self.general.output_dir)
    }

    /// Path of the SQLite database holding pipeline runs.
    pub fn runs_db_path(&self) -> PathBuf {
        self.data_dir().join("runs.db")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.retry.max_attempts, 3);
        assert_eq!(settings.audio.crossfade_ms, 500);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let toml_str = r#"
            [chunking]
            max_tokens_per_chunk = 8000

            [retry]
            max_attempts = 5
            backoff = "exponential"
        "#;
        let settings: Settings = toml::from_str(toml_str).unwrap();
        assert_eq!(settings.chunking.max_tokens_per_chunk, 8000);
        assert_eq!(settings.chunking.system_reserve, 1_000);
        assert_eq!(settings.retry.max_attempts, 5);
        assert_eq!(settings.retry.backoff, Backoff::Exponential);
        assert_eq!(settings.llm.model, "gpt-4o-mini");
    }

    #[test]
    fn test_invalid_budget_rejected() {
        let mut settings = Settings::default();
        settings.chunking.max_tokens_per_chunk = 4_000;
        assert!(matches!(
            settings.validate(),
            Err(crate::error::PodError::Configuration(_))
        ));
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let mut settings = Settings::default();
        settings.llm.model = "gpt-4.1".to_string();
        settings.save_to(&path).unwrap();

        let loaded = Settings::load_from(Some(&path)).unwrap();
        assert_eq!(loaded.llm.model, "gpt-4.1");
    }
}
