//! Podcast analysis artifact.
//!
//! The analysis is produced by the language model (possibly per chunk and then
//! combined) and persisted as `analysis.json`. It is validated whenever it
//! crosses the persistence boundary.

use crate::error::{PodError, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Conversation layout of the podcast.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FormatStyle {
    HostExpert,
    TwoExperts,
    Panel,
}

impl FormatStyle {
    pub const ALL: [FormatStyle; 3] = [
        FormatStyle::HostExpert,
        FormatStyle::TwoExperts,
        FormatStyle::Panel,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FormatStyle::HostExpert => "host_expert",
            FormatStyle::TwoExperts => "two_experts",
            FormatStyle::Panel => "panel",
        }
    }

    /// Speakers that take part in this format.
    pub fn speakers(&self) -> &'static [Speaker] {
        match self {
            FormatStyle::HostExpert => &[Speaker::Host, Speaker::Expert],
            FormatStyle::TwoExperts => &[Speaker::Expert, Speaker::Panelist],
            FormatStyle::Panel => &[Speaker::Host, Speaker::Expert, Speaker::Panelist],
        }
    }
}

impl fmt::Display for FormatStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FormatStyle {
    type Err = PodError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "host_expert" => Ok(FormatStyle::HostExpert),
            "two_experts" => Ok(FormatStyle::TwoExperts),
            "panel" => Ok(FormatStyle::Panel),
            other => Err(PodError::Configuration(format!(
                "Unknown podcast format '{}'. Expected one of: host_expert, two_experts, panel",
                other
            ))),
        }
    }
}

/// Intended audience level. Ordered from least to most technical.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TechnicalLevel {
    Beginner,
    Intermediate,
    Advanced,
}

/// Voice role in the conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    Host,
    Expert,
    Panelist,
}

impl Speaker {
    pub fn as_str(&self) -> &'static str {
        match self {
            Speaker::Host => "host",
            Speaker::Expert => "expert",
            Speaker::Panelist => "panelist",
        }
    }
}

impl fmt::Display for Speaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Speaker {
    type Err = PodError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "host" => Ok(Speaker::Host),
            "expert" => Ok(Speaker::Expert),
            "panelist" => Ok(Speaker::Panelist),
            other => Err(PodError::Validation(format!("Unknown speaker '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormatRecommendation {
    pub recommended: FormatStyle,
    pub reasoning: String,
    pub technical_level: TechnicalLevel,
    pub estimated_duration_minutes: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisSegment {
    pub id: String,
    pub speaker: Speaker,
    pub content: String,
    #[serde(default = "default_tone")]
    pub tone: String,
    #[serde(default)]
    pub technical_terms: Vec<String>,
}

fn default_tone() -> String {
    "neutral".to_string()
}

/// Structured analysis of a document, ready for script generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PodcastAnalysis {
    pub podcast_format: FormatRecommendation,
    pub segments: Vec<AnalysisSegment>,
    #[serde(default)]
    pub technical_glossary: IndexMap<String, String>,
}

/// Segment id for a 0-based position.
pub fn segment_id(position: usize) -> String {
    format!("seg_{:03}", position + 1)
}

impl PodcastAnalysis {
    /// Parse and validate an analysis from JSON text.
    pub fn from_json(json: &str) -> Result<Self> {
        let analysis: PodcastAnalysis = serde_json::from_str(json)
            .map_err(|e| PodError::Validation(format!("Invalid analysis JSON: {}", e)))?;
        analysis.validate()?;
        Ok(analysis)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Check the invariants serde cannot express.
    pub fn validate(&self) -> Result<()> {
        let format = &self.podcast_format;
        if !format.estimated_duration_minutes.is_finite() || format.estimated_duration_minutes < 0.0
        {
            return Err(PodError::Validation(format!(
                "estimated_duration_minutes must be a non-negative number, got {}",
                format.estimated_duration_minutes
            )));
        }
        if self.segments.is_empty() {
            return Err(PodError::Validation("analysis has no segments".to_string()));
        }

        let mut seen = std::collections::HashSet::new();
        for (i, segment) in self.segments.iter().enumerate() {
            if segment.id.trim().is_empty() {
                return Err(PodError::Validation(format!("segment {} has an empty id", i)));
            }
            if segment.content.trim().is_empty() {
                return Err(PodError::Validation(format!(
                    "segment '{}' has empty content",
                    segment.id
                )));
            }
            if !seen.insert(segment.id.as_str()) {
                return Err(PodError::Validation(format!(
                    "duplicate segment id '{}'",
                    segment.id
                )));
            }
        }
        Ok(())
    }

    /// Load and validate an analysis file.
    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// Validate and write the analysis to `path`.
    pub fn store(&self, path: &Path) -> Result<()> {
        self.validate()?;
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }
}
