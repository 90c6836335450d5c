//! Configuration module for text2pod.
//!
//! Handles loading and managing application settings and prompt templates.

mod prompts;
mod settings;

pub use prompts::{Prompts, StagePrompts};
pub use settings::{
    AudioSettings, ChunkingSettings, GeneralSettings, LlmSettings, PromptSettings,
    RetrySettings, ScriptSettings, Settings, VoiceRoleSettings, VoiceSettings,
};
