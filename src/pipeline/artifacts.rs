//! Filesystem layout and validation of stage artifacts.
//!
//! ```text
//! <root>/<document-id>/
//!   document.json
//!   content.md
//!   analysis.json
//!   script.json
//!   segments/segment_000_host.wav ...
//!   voice_segments.csv
//!   <title>.wav
//!   metadata.json
//! ```

use super::Stage;
use crate::analysis::PodcastAnalysis;
use crate::audio::{segment_file_name, Pcm};
use crate::document::Document;
use crate::error::{PodError, Result};
use crate::script::{Script, ScriptLine};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Artifact locations for all documents under one output directory.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn document_dir(&self, id: &str) -> PathBuf {
        self.root.join(id)
    }

    /// Create the directory for a document's artifacts.
    pub fn prepare(&self, id: &str) -> Result<PathBuf> {
        let dir = self.document_dir(id);
        std::fs::create_dir_all(dir.join("segments"))?;
        Ok(dir)
    }

    pub fn document_path(&self, id: &str) -> PathBuf {
        self.document_dir(id).join("document.json")
    }

    pub fn markdown_path(&self, id: &str) -> PathBuf {
        self.document_dir(id).join("content.md")
    }

    pub fn analysis_path(&self, id: &str) -> PathBuf {
        self.document_dir(id).join("analysis.json")
    }

    pub fn script_path(&self, id: &str) -> PathBuf {
        self.document_dir(id).join("script.json")
    }

    pub fn segments_dir(&self, id: &str) -> PathBuf {
        self.document_dir(id).join("segments")
    }

    pub fn segment_path(&self, id: &str, line: &ScriptLine) -> PathBuf {
        self.segments_dir(id)
            .join(segment_file_name(line.ordinal, line.speaker))
    }

    /// Voice assignment of every segment.
    pub fn voice_segments_path(&self, id: &str) -> PathBuf {
        self.document_dir(id).join("voice_segments.csv")
    }

    pub fn audio_path(&self, id: &str, title: &str) -> PathBuf {
        self.document_dir(id)
            .join(format!("{}.wav", file_safe(title)))
    }

    pub fn metadata_path(&self, id: &str) -> PathBuf {
        self.document_dir(id).join("metadata.json")
    }

    pub fn store_document(&self, document: &Document) -> Result<PathBuf> {
        document.validate()?;
        let path = self.document_path(&document.id);
        std::fs::write(&path, serde_json::to_string(document)?)?;
        Ok(path)
    }

    pub fn load_document(&self, id: &str) -> Result<Document> {
        let json = std::fs::read_to_string(self.document_path(id))?;
        let document: Document = serde_json::from_str(&json)
            .map_err(|e| PodError::Validation(format!("Invalid document.json: {}", e)))?;
        document.validate()?;
        Ok(document)
    }

    pub fn load_markdown(&self, id: &str) -> Result<String> {
        let markdown = std::fs::read_to_string(self.markdown_path(id))?;
        if markdown.trim().is_empty() {
            return Err(PodError::Validation("content.md is empty".to_string()));
        }
        Ok(markdown)
    }

    /// Load a segment file if it exists and decodes to non-empty audio.
    pub fn valid_segment(&self, id: &str, line: &ScriptLine) -> Option<PathBuf> {
        let path = self.segment_path(id, line);
        match Pcm::read(&path) {
            Ok(pcm) if !pcm.samples.is_empty() => Some(path),
            _ => None,
        }
    }

    /// Check the artifacts of `stage` for a document titled `title`.
    pub fn validate(&self, stage: Stage, id: &str, title: &str) -> Result<()> {
        match stage {
            Stage::Extracted => self.load_document(id).map(|_| ()),
            Stage::Analyzed => {
                self.load_markdown(id)?;
                PodcastAnalysis::load(&self.analysis_path(id)).map(|_| ())
            }
            Stage::Scripted => Script::load(&self.script_path(id)).map(|_| ()),
            Stage::Synthesized => {
                // Segments removed by cleanup are fine once the episode exists.
                if self.validate(Stage::Assembled, id, title).is_ok() {
                    return Ok(());
                }
                let script = Script::load(&self.script_path(id))?;
                let missing = script
                    .lines
                    .iter()
                    .filter(|line| self.valid_segment(id, line).is_none())
                    .count();
                if missing > 0 {
                    return Err(PodError::Validation(format!(
                        "{} of {} segments are missing or unreadable",
                        missing,
                        script.lines.len()
                    )));
                }
                Ok(())
            }
            Stage::Assembled => {
                let pcm = Pcm::read(&self.audio_path(id, title))?;
                if pcm.samples.is_empty() {
                    return Err(PodError::Validation("assembled audio is empty".to_string()));
                }
                if !self.metadata_path(id).exists() {
                    return Err(PodError::Validation("metadata.json is missing".to_string()));
                }
                Ok(())
            }
        }
    }

    /// First stage among `stages` whose artifacts do not validate.
    pub fn resume_point(&self, stages: &[Stage], id: &str, title: &str) -> Option<Stage> {
        stages.iter().copied().find(|stage| match self.validate(*stage, id, title) {
            Ok(()) => false,
            Err(e) => {
                debug!("Stage {} of {} needs to run: {}", stage, id, e);
                true
            }
        })
    }

    /// Remove the artifacts of `from` and every later stage.
    pub fn remove_from(&self, from: Stage, id: &str, title: &str) -> Result<()> {
        for stage in Stage::ALL.iter().copied().filter(|s| *s >= from) {
            let paths = match stage {
                Stage::Extracted => vec![self.document_path(id)],
                Stage::Analyzed => vec![self.markdown_path(id), self.analysis_path(id)],
                Stage::Scripted => vec![self.script_path(id)],
                Stage::Synthesized => {
                    self.remove_segments(id)?;
                    vec![self.voice_segments_path(id)]
                }
                Stage::Assembled => vec![self.audio_path(id, title), self.metadata_path(id)],
            };
            for path in paths {
                match std::fs::remove_file(&path) {
                    Ok(()) => debug!("Removed stale {}", path.display()),
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => return Err(e.into()),
                }
            }
        }
        Ok(())
    }

    /// Remove per-segment audio files.
    pub fn remove_segments(&self, id: &str) -> Result<usize> {
        let dir = self.segments_dir(id);
        if !dir.exists() {
            return Ok(0);
        }
        let mut removed = 0;
        for entry in std::fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) == Some("wav") {
                std::fs::remove_file(&path)?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

/// Title reduced to characters that are safe in file names.
pub fn file_safe(title: &str) -> String {
    let cleaned: String = title
        .trim()
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_matches('_').to_string();
    if cleaned.is_empty() {
        "podcast".to_string()
    } else {
        cleaned
    }
}
