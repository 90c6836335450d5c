//! Error types for text2pod.

use thiserror::Error;

/// Library-level error type for text2pod operations.
#[derive(Error, Debug)]
pub enum PodError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Extraction failed: {0}")]
    Extraction(String),

    #[error("Token budget exceeded: {0}")]
    TokenBudget(String),

    #[error("Could not combine responses: {0}")]
    Combination(String),

    #[error("Transient API failure: {0}")]
    TransientApi(String),

    #[error("Permanent API failure: {0}")]
    PermanentApi(String),

    #[error("{operation} failed after {attempts} attempt(s): {last}")]
    RetriesExhausted {
        operation: String,
        attempts: u32,
        last: Box<PodError>,
    },

    #[error("Audio assembly failed: {0}")]
    Assembly(String),

    #[error("Artifact validation failed: {0}")]
    Validation(String),

    #[error("Aborted: {0}")]
    Aborted(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),
}

impl PodError {
    /// Whether the failure may succeed if the same call is attempted again.
    pub fn is_transient(&self) -> bool {
        match self {
            PodError::TransientApi(_) => true,
            PodError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request() || e.is_body(),
            _ => false,
        }
    }

    /// Short, stable label used when logging retries and recording run failures.
    pub fn kind(&self) -> &'static str {
        match self {
            PodError::Configuration(_) => "configuration",
            PodError::Extraction(_) => "extraction",
            PodError::TokenBudget(_) => "token_budget",
            PodError::Combination(_) => "combination",
            PodError::TransientApi(_) => "transient_api",
            PodError::PermanentApi(_) => "permanent_api",
            PodError::RetriesExhausted { .. } => "retries_exhausted",
            PodError::Assembly(_) => "assembly",
            PodError::Validation(_) => "validation",
            PodError::Aborted(_) => "aborted",
            PodError::Io(_) => "io",
            PodError::Json(_) => "json",
            PodError::TomlParse(_) => "toml",
            PodError::Http(_) => "http",
            PodError::Database(_) => "database",
            PodError::Wav(_) => "wav",
        }
    }
}

/// Result type alias for text2pod operations.
pub type Result<T> = std::result::Result<T, PodError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(PodError::TransientApi("rate limited".into()).is_transient());
        assert!(!PodError::PermanentApi("bad key".into()).is_transient());
        assert!(!PodError::Combination("missing".into()).is_transient());
    }

    #[test]
    fn test_exhausted_message_includes_attempts() {
        let err = PodError::RetriesExhausted {
            operation: "analysis chunk 2".into(),
            attempts: 3,
            last: Box::new(PodError::TransientApi("timeout".into())),
        };
        let msg = err.to_string();
        assert!(msg.contains("3 attempt"));
        assert!(msg.contains("timeout"));
        assert_eq!(err.kind(), "retries_exhausted");
    }
}
