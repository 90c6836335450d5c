//! Document model and extraction.
//!
//! A [`Document`] is the extracted text of one input file together with its
//! structural units (headings and paragraphs). Unit spans tile the text exactly,
//! so any ordered grouping of units reproduces the original text.

mod pdf;

pub use pdf::extract_pdf_text;

use crate::error::{PodError, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::OnceLock;
use tracing::{debug, instrument};

/// File extensions the extractor understands.
pub const SUPPORTED_EXTENSIONS: &[&str] = &["pdf", "txt", "md", "markdown"];

/// Kind of structural unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum UnitKind {
    Heading { level: u8 },
    Paragraph,
}

/// A contiguous span of the document text (byte offsets, end exclusive).
///
/// The span includes any blank-line separator that follows the unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructuralUnit {
    pub kind: UnitKind,
    pub start: usize,
    pub end: usize,
}

impl StructuralUnit {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// Extracted document text with structural metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Content-derived identifier (hex SHA-256 prefix of the source bytes).
    pub id: String,
    /// Human-readable title, usually the file stem.
    pub title: String,
    /// Full extracted text.
    pub text: String,
    /// Units in document order, tiling `text`.
    pub units: Vec<StructuralUnit>,
}

impl Document {
    /// Build a document from text, deriving the id from the text itself.
    pub fn from_text(title: &str, text: impl Into<String>) -> Self {
        let text = text.into();
        let id = content_id(text.as_bytes());
        Self::with_id(id, title, text)
    }

    /// Build a document with an explicit id (e.g. hashed from the source file bytes).
    pub fn with_id(id: String, title: &str, text: String) -> Self {
        let units = segment_units(&text);
        Self {
            id,
            title: title.to_string(),
            text,
            units,
        }
    }

    /// Text of a single unit.
    pub fn unit_text(&self, unit: &StructuralUnit) -> &str {
        &self.text[unit.start..unit.end]
    }

    /// Whether the document has no meaningful content.
    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty()
    }

    /// Check that the units tile the text exactly and lie on char boundaries.
    pub fn validate(&self) -> Result<()> {
        if self.is_empty() {
            return Err(PodError::Validation(format!(
                "document '{}' has no text content",
                self.title
            )));
        }

        let mut expected_start = 0;
        for (i, unit) in self.units.iter().enumerate() {
            if unit.start != expected_start || unit.end < unit.start || unit.end > self.text.len() {
                return Err(PodError::Validation(format!(
                    "unit {} of '{}' does not continue the previous unit",
                    i, self.title
                )));
            }
            if !self.text.is_char_boundary(unit.start) || !self.text.is_char_boundary(unit.end) {
                return Err(PodError::Validation(format!(
                    "unit {} of '{}' splits a character",
                    i, self.title
                )));
            }
            expected_start = unit.end;
        }

        if expected_start != self.text.len() {
            return Err(PodError::Validation(format!(
                "units of '{}' cover {} of {} bytes",
                self.title,
                expected_start,
                self.text.len()
            )));
        }
        Ok(())
    }
}

/// Hex SHA-256 prefix used as the stable identifier for a document.
pub fn content_id(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    digest.iter().take(8).map(|b| format!("{:02x}", b)).collect()
}

/// Whether the path has an extension the extractor supports.
pub fn is_supported(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| SUPPORTED_EXTENSIONS.contains(&e.to_lowercase().as_str()))
        .unwrap_or(false)
}

/// Load and extract a document from disk.
#[instrument(fields(path = %path.display()))]
pub fn load(path: &Path) -> Result<Document> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .unwrap_or_default();

    let bytes = std::fs::read(path)
        .map_err(|e| PodError::Extraction(format!("Cannot read {}: {}", path.display(), e)))?;

    let text = match extension.as_str() {
        "pdf" => extract_pdf_text(&bytes)?,
        "txt" | "md" | "markdown" => String::from_utf8(bytes.clone()).map_err(|e| {
            PodError::Extraction(format!("{} is not valid UTF-8: {}", path.display(), e))
        })?,
        other => {
            return Err(PodError::Extraction(format!(
                "Unsupported file type '{}' for {}",
                other,
                path.display()
            )))
        }
    };

    let title = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("document")
        .to_string();

    let document = Document::with_id(content_id(&bytes), &title, text);
    debug!(
        "Extracted {} chars in {} units from {}",
        document.text.len(),
        document.units.len(),
        path.display()
    );
    Ok(document)
}

fn separator_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\n[ \t\r]*\n\s*").expect("valid separator regex"))
}

fn heading_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?:(#{1,6})\s+\S|(\d+(?:\.\d+)*)\.?\s+[A-Z][^.!?]{0,80}$)")
            .expect("valid heading regex")
    })
}

/// Heading level of a line, if it looks like a heading.
///
/// Recognises markdown ATX headings and numbered section titles ("2.1 Results").
pub fn heading_level(line: &str) -> Option<u8> {
    let line = line.trim_end();
    let caps = heading_regex().captures(line)?;
    if let Some(hashes) = caps.get(1) {
        return Some(hashes.as_str().len() as u8);
    }
    caps.get(2)
        .map(|num| (num.as_str().split('.').count().min(6)) as u8)
}

/// Split text into blank-line separated blocks, separating a leading heading line
/// from the paragraph it introduces.
fn segment_units(text: &str) -> Vec<StructuralUnit> {
    if text.is_empty() {
        return Vec::new();
    }

    let mut blocks: Vec<(usize, usize)> = Vec::new();
    let mut start = 0;
    for sep in separator_regex().find_iter(text) {
        if sep.end() > start {
            blocks.push((start, sep.end()));
            start = sep.end();
        }
    }
    if start < text.len() {
        blocks.push((start, text.len()));
    }

    let mut units = Vec::with_capacity(blocks.len());
    for (start, end) in blocks {
        let block = &text[start..end];
        let first_line_end = block.find('\n');
        let first_line = &block[..first_line_end.unwrap_or(block.len())];

        match (heading_level(first_line.trim_start()), first_line_end) {
            (Some(level), Some(nl)) if !block[nl + 1..].trim().is_empty() => {
                units.push(StructuralUnit {
                    kind: UnitKind::Heading { level },
                    start,
                    end: start + nl + 1,
                });
                units.push(StructuralUnit {
                    kind: UnitKind::Paragraph,
                    start: start + nl + 1,
                    end,
                });
            }
            (Some(level), _) => units.push(StructuralUnit {
                kind: UnitKind::Heading { level },
                start,
                end,
            }),
            (None, _) => units.push(StructuralUnit {
                kind: UnitKind::Paragraph,
                start,
                end,
            }),
        }
    }
    units
}
