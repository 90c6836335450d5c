//! Token-budgeted chunking of documents for language model requests.
//!
//! Documents are split along their structural units so that each chunk fits the
//! effective token budget. Chunks are contiguous and ordered; concatenating their
//! text reproduces the document text exactly.

mod split;

use crate::document::Document;
use crate::error::{PodError, Result};
use crate::tokens::TokenCounter;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Token budget configuration for one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkBudget {
    /// Upper bound on tokens per request, before reserves and safety margin.
    pub max_tokens_per_chunk: usize,
    /// Tokens reserved for the system prompt.
    pub system_reserve: usize,
    /// Tokens reserved for the model's response.
    pub response_reserve: usize,
    /// Fraction of `max_tokens_per_chunk` held back as a safety margin.
    pub safety_margin_fraction: f64,
}

impl Default for ChunkBudget {
    fn default() -> Self {
        Self {
            max_tokens_per_chunk: 32_000,
            system_reserve: 1_000,
            response_reserve: 4_000,
            safety_margin_fraction: 0.1,
        }
    }
}

impl ChunkBudget {
    /// Tokens available for document content in each chunk.
    ///
    /// `max_tokens_per_chunk * (1 - safety_margin_fraction) - system_reserve - response_reserve`
    pub fn effective(&self) -> Result<usize> {
        if !(0.0..1.0).contains(&self.safety_margin_fraction) {
            return Err(PodError::Configuration(format!(
                "safety_margin_fraction must be in [0, 1), got {}",
                self.safety_margin_fraction
            )));
        }

        let scaled = (self.max_tokens_per_chunk as f64 * (1.0 - self.safety_margin_fraction))
            .floor() as i64;
        let effective = scaled - self.system_reserve as i64 - self.response_reserve as i64;

        if effective <= 0 {
            return Err(PodError::Configuration(format!(
                "chunk budget leaves no room for content: {} tokens after {:.0}% margin, \
                 {} system reserve and {} response reserve",
                scaled,
                self.safety_margin_fraction * 100.0,
                self.system_reserve,
                self.response_reserve
            )));
        }
        Ok(effective as usize)
    }

    /// This budget with `max_tokens_per_chunk` limited to a model's context window.
    pub fn capped_to(&self, context_window: usize) -> Self {
        Self {
            max_tokens_per_chunk: self.max_tokens_per_chunk.min(context_window),
            ..self.clone()
        }
    }
}

/// An ordered, budget-bounded slice of a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// Position in the document, starting at 0 with no gaps.
    pub index: usize,
    /// Text of this chunk.
    pub text: String,
    /// Estimated tokens, never above the effective budget.
    pub token_estimate: usize,
    /// The chunk begins partway through a structural unit.
    pub starts_mid_unit: bool,
    /// The chunk ends partway through a structural unit.
    pub ends_mid_unit: bool,
}

impl Chunk {
    /// Context line describing where this chunk sits, for the model prompt.
    pub fn position_note(&self, total: usize) -> String {
        if total <= 1 {
            return String::new();
        }
        let mut note = format!("This is part {} of {} of the document.", self.index + 1, total);
        if self.starts_mid_unit {
            note.push_str(" It starts in the middle of a paragraph continued from the previous part.");
        }
        if self.ends_mid_unit {
            note.push_str(" It ends in the middle of a paragraph that continues in the next part.");
        }
        note
    }
}

/// Piece of a structural unit queued for a chunk.
struct Piece<'a> {
    text: &'a str,
    tokens: usize,
    starts_mid: bool,
    ends_mid: bool,
}

/// Splits documents into chunks within a token budget.
pub struct Chunker {
    counter: Arc<dyn TokenCounter>,
    budget: usize,
}

impl Chunker {
    /// Create a chunker, validating the budget.
    pub fn new(counter: Arc<dyn TokenCounter>, budget: &ChunkBudget) -> Result<Self> {
        let budget = budget.effective()?;
        debug!("Effective chunk budget: {} tokens", budget);
        Ok(Self { counter, budget })
    }

    /// Effective content budget in tokens.
    pub fn budget(&self) -> usize {
        self.budget
    }

    /// Split a document into chunks.
    ///
    /// An empty document yields no chunks; callers decide whether that is an error.
    pub fn chunk(&self, document: &Document) -> Result<Vec<Chunk>> {
        if document.is_empty() {
            warn!("Document '{}' has no content to chunk", document.title);
            return Ok(Vec::new());
        }

        let pieces = self.pieces(document)?;

        let mut chunks: Vec<Chunk> = Vec::new();
        let mut current: Vec<Piece> = Vec::new();
        let mut running = 0;

        for piece in pieces {
            if !current.is_empty() && running + piece.tokens > self.budget {
                chunks.push(self.close(chunks.len(), &current));
                current.clear();
                running = 0;
            }
            running += piece.tokens;
            current.push(piece);
        }
        if !current.is_empty() {
            chunks.push(self.close(chunks.len(), &current));
        }

        info!(
            "Split '{}' into {} chunk(s) (budget {} tokens)",
            document.title,
            chunks.len(),
            self.budget
        );
        for chunk in &chunks {
            debug!(
                "Chunk {}: {} tokens ({:.1}% of budget)",
                chunk.index,
                chunk.token_estimate,
                chunk.token_estimate as f64 / self.budget as f64 * 100.0
            );
        }
        Ok(chunks)
    }

    /// Units in order, with oversized units broken into budget-sized pieces.
    fn pieces<'a>(&self, document: &'a Document) -> Result<Vec<Piece<'a>>> {
        let mut pieces = Vec::with_capacity(document.units.len());

        for unit in &document.units {
            let text = document.unit_text(unit);
            let tokens = self.counter.count(text);

            if tokens <= self.budget {
                pieces.push(Piece {
                    text,
                    tokens,
                    starts_mid: false,
                    ends_mid: false,
                });
                continue;
            }

            warn!(
                "Unit of {} tokens exceeds the {} token budget, splitting it",
                tokens, self.budget
            );
            let parts = split::split_oversized(text, self.budget, self.counter.as_ref())?;
            let last = parts.len().saturating_sub(1);
            for (i, part) in parts.into_iter().enumerate() {
                pieces.push(Piece {
                    text: part,
                    tokens: self.counter.count(part),
                    starts_mid: i > 0,
                    ends_mid: i < last,
                });
            }
        }
        Ok(pieces)
    }

    fn close(&self, index: usize, pieces: &[Piece]) -> Chunk {
        let text: String = pieces.iter().map(|p| p.text).collect();
        let token_estimate = self.counter.count(&text);
        Chunk {
            index,
            text,
            token_estimate,
            starts_mid_unit: pieces.first().map(|p| p.starts_mid).unwrap_or(false),
            ends_mid_unit: pieces.last().map(|p| p.ends_mid).unwrap_or(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokens::HeuristicCounter;

    fn chunker(effective: usize) -> Chunker {
        let budget = ChunkBudget {
            max_tokens_per_chunk: effective + 300,
            system_reserve: 100,
            response_reserve: 200,
            safety_margin_fraction: 0.0,
        };
        Chunker::new(Arc::new(HeuristicCounter::new("gpt-4o")), &budget).unwrap()
    }

    fn paragraph(seed: usize, chars: usize) -> String {
        let words = ["alpha", "beta", "gamma", "delta", "epsilon", "zeta"];
        let mut out = String::new();
        let mut i = seed;
        while out.len() < chars {
            out.push_str(words[i % words.len()]);
            out.push(' ');
            i += 1;
        }
        out.truncate(chars);
        out
    }

    #[test]
    fn test_effective_budget() {
        let budget = ChunkBudget {
            max_tokens_per_chunk: 10_000,
            system_reserve: 1_000,
            response_reserve: 4_000,
            safety_margin_fraction: 0.1,
        };
        assert_eq!(budget.effective().unwrap(), 4_000);
    }

    #[test]
    fn test_non_positive_budget_is_configuration_error() {
        let budget = ChunkBudget {
            max_tokens_per_chunk: 5_000,
            system_reserve: 1_000,
            response_reserve: 4_000,
            safety_margin_fraction: 0.0,
        };
        assert!(matches!(budget.effective(), Err(PodError::Configuration(_))));

        let bad_margin = ChunkBudget {
            safety_margin_fraction: 1.0,
            ..ChunkBudget::default()
        };
        assert!(matches!(bad_margin.effective(), Err(PodError::Configuration(_))));
    }

    #[test]
    fn test_budget_capped_to_context_window() {
        let capped = ChunkBudget::default().capped_to(8_192);
        assert_eq!(capped.max_tokens_per_chunk, 8_192);
        assert_eq!(capped.response_reserve, ChunkBudget::default().response_reserve);
        assert_eq!(ChunkBudget::default().capped_to(128_000), ChunkBudget::default());
    }

    #[test]
    fn test_empty_document_yields_no_chunks() {
        let doc = Document::from_text("empty", "");
        assert!(chunker(100).chunk(&doc).unwrap().is_empty());
    }

    #[test]
    fn test_small_document_single_chunk() {
        let doc = Document::from_text("small", "# Intro\n\nOne paragraph.\n\nAnother one.");
        let chunks = chunker(1_000).chunk(&doc).unwrap();

        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, doc.text);
        assert!(!chunks[0].starts_mid_unit);
        assert!(!chunks[0].ends_mid_unit);
    }

    #[test]
    fn test_concatenation_is_lossless_and_within_budget() {
        let text = (0..40)
            .map(|i| {
                if i % 7 == 0 {
                    format!("## Section {}\n\n", i)
                } else {
                    format!("{}\n\n", paragraph(i, 30 + (i * 37) % 300))
                }
            })
            .collect::<String>();
        let doc = Document::from_text("mixed", text);

        for effective in [80, 120, 400, 5_000] {
            let c = chunker(effective);
            let chunks = c.chunk(&doc).unwrap();

            let rebuilt: String = chunks.iter().map(|ch| ch.text.as_str()).collect();
            assert_eq!(rebuilt, doc.text, "budget {}", effective);

            for (i, chunk) in chunks.iter().enumerate() {
                assert_eq!(chunk.index, i);
                assert!(chunk.token_estimate <= effective);
            }
        }
    }

    #[test]
    fn test_oversized_unit_is_split_not_truncated() {
        let long = paragraph(0, 2_000);
        let text = format!("Short intro.\n\n{}\n\nShort outro.", long);
        let doc = Document::from_text("long", text);

        let chunks = chunker(100).chunk(&doc).unwrap();
        let rebuilt: String = chunks.iter().map(|ch| ch.text.as_str()).collect();

        assert_eq!(rebuilt, doc.text);
        assert!(chunks.iter().all(|c| c.token_estimate <= 100));
        assert!(chunks.iter().any(|c| c.ends_mid_unit));
        assert!(chunks.iter().any(|c| c.starts_mid_unit));
        assert!(!chunks.first().unwrap().starts_mid_unit);
        assert!(!chunks.last().unwrap().ends_mid_unit);
    }

    #[test]
    fn test_units_are_not_reordered() {
        let doc = Document::from_text("order", "first\n\nsecond\n\nthird\n\nfourth");
        let chunks = chunker(3).chunk(&doc).unwrap();

        let joined: String = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(joined, "first\n\nsecond\n\nthird\n\nfourth");
        assert!(chunks[0].text.starts_with("first"));
    }

    #[test]
    fn test_long_report_splits_into_six_chunks() {
        // 300,000 characters against a 12,500 token budget at 4 chars/token
        let budget = ChunkBudget {
            max_tokens_per_chunk: 20_000,
            system_reserve: 2_500,
            response_reserve: 5_000,
            safety_margin_fraction: 0.0,
        };
        let chunker = Chunker::new(Arc::new(HeuristicCounter::new("gpt-4o")), &budget).unwrap();
        assert_eq!(chunker.budget(), 12_500);

        let mut text = String::with_capacity(300_000);
        for _ in 0..59 {
            text.push_str(&"a".repeat(4_998));
            text.push_str("\n\n");
        }
        text.push_str(&"a".repeat(5_000));
        assert_eq!(text.len(), 300_000);

        let doc = Document::from_text("report", text);
        let chunks = chunker.chunk(&doc).unwrap();

        assert_eq!(chunks.len(), 6);
        assert!(chunks.iter().all(|c| c.token_estimate <= 12_500));
        assert!(chunks.iter().all(|c| !c.starts_mid_unit && !c.ends_mid_unit));
        let rebuilt: String = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(rebuilt, doc.text);
    }

    #[test]
    fn test_position_note() {
        let chunk = Chunk {
            index: 1,
            text: String::new(),
            token_estimate: 0,
            starts_mid_unit: true,
            ends_mid_unit: false,
        };
        let note = chunk.position_note(3);
        assert!(note.contains("part 2 of 3"));
        assert!(note.contains("middle of a paragraph continued"));
        assert!(chunk.position_note(1).is_empty());
    }
}
