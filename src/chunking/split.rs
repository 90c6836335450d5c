//! Fallback splitting for structural units that exceed the chunk budget.
//!
//! Units are cut at sentence boundaries first, then at whitespace, and only as a
//! last resort between characters. Pieces are contiguous slices of the input, so
//! concatenating them gives back the unit unchanged.

use crate::error::{PodError, Result};
use crate::tokens::TokenCounter;
use regex::Regex;
use std::sync::OnceLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Level {
    Sentence,
    Word,
    Char,
}

impl Level {
    fn finer(self) -> Option<Level> {
        match self {
            Level::Sentence => Some(Level::Word),
            Level::Word => Some(Level::Char),
            Level::Char => None,
        }
    }
}

fn sentence_end_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"[.!?]+["')\]]*\s+"#).expect("valid sentence regex"))
}

fn whitespace_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s+").expect("valid whitespace regex"))
}

/// Split `text` into contiguous pieces that each fit within `budget` tokens.
pub(crate) fn split_oversized<'a>(
    text: &'a str,
    budget: usize,
    counter: &dyn TokenCounter,
) -> Result<Vec<&'a str>> {
    split_at_level(text, budget, counter, Level::Sentence)
}

fn split_at_level<'a>(
    text: &'a str,
    budget: usize,
    counter: &dyn TokenCounter,
    level: Level,
) -> Result<Vec<&'a str>> {
    let mut pieces = Vec::new();
    let mut piece_start = 0;
    let mut piece_end = 0;
    // Sum of span counts, never below the count of the joined text.
    let mut piece_tokens = 0;

    for (start, end) in spans(text, level) {
        let part = &text[start..end];
        let tokens = counter.count(part);

        if tokens > budget {
            if piece_end > piece_start {
                pieces.push(&text[piece_start..piece_end]);
            }
            match level.finer() {
                Some(finer) => pieces.extend(split_at_level(part, budget, counter, finer)?),
                None => {
                    return Err(PodError::TokenBudget(format!(
                        "a single character costs {} tokens, budget is {}",
                        tokens, budget
                    )))
                }
            }
            piece_start = end;
            piece_end = end;
            piece_tokens = 0;
            continue;
        }

        if piece_end > piece_start && piece_tokens + tokens > budget {
            pieces.push(&text[piece_start..piece_end]);
            piece_start = start;
            piece_tokens = 0;
        }
        piece_end = end;
        piece_tokens += tokens;
    }

    if piece_end > piece_start {
        pieces.push(&text[piece_start..piece_end]);
    }
    Ok(pieces)
}

/// Contiguous spans covering `text` at the given granularity.
fn spans(text: &str, level: Level) -> Vec<(usize, usize)> {
    let cuts: Vec<usize> = match level {
        Level::Sentence => sentence_end_regex().find_iter(text).map(|m| m.end()).collect(),
        Level::Word => whitespace_regex().find_iter(text).map(|m| m.end()).collect(),
        Level::Char => text.char_indices().skip(1).map(|(i, _)| i).collect(),
    };

    let mut spans = Vec::with_capacity(cuts.len() + 1);
    let mut start = 0;
    for cut in cuts {
        if cut > start {
            spans.push((start, cut));
            start = cut;
        }
    }
    if start < text.len() {
        spans.push((start, text.len()));
    }
    spans
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokens::HeuristicCounter;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Heuristic counter that tallies how many characters it was asked to count.
    struct TallyCounter {
        inner: HeuristicCounter,
        chars: AtomicUsize,
    }

    impl TokenCounter for TallyCounter {
        fn count(&self, text: &str) -> usize {
            self.chars.fetch_add(text.len(), Ordering::Relaxed);
            self.inner.count(text)
        }

        fn context_window(&self) -> usize {
            self.inner.context_window()
        }
    }

    #[test]
    fn test_long_unit_is_counted_in_linear_work() {
        let counter = TallyCounter {
            inner: HeuristicCounter::new("gpt-4o"),
            chars: AtomicUsize::new(0),
        };
        let text = "word ".repeat(20_000);
        let pieces = split_oversized(&text, 200, &counter).unwrap();

        assert_eq!(pieces.concat(), text);
        for piece in &pieces {
            assert!(counter.inner.count(piece) <= 200);
        }
        // the whole unit once at sentence level, then each word once
        assert!(counter.chars.load(Ordering::Relaxed) <= 3 * text.len());
    }

    #[test]
    fn test_splits_at_sentences_first() {
        let counter = HeuristicCounter::new("gpt-4o");
        let text = "First sentence here. Second sentence here. Third one.";
        let pieces = split_oversized(text, 6, &counter).unwrap();

        assert_eq!(pieces.concat(), text);
        assert_eq!(pieces[0], "First sentence here. ");
        for piece in &pieces {
            assert!(counter.count(piece) <= 6);
        }
    }

    #[test]
    fn test_falls_back_to_words() {
        let counter = HeuristicCounter::new("gpt-4o");
        let text = "one two three four five six seven eight nine ten eleven twelve";
        let pieces = split_oversized(text, 3, &counter).unwrap();

        assert!(pieces.len() > 1);
        assert_eq!(pieces.concat(), text);
        for piece in &pieces {
            assert!(counter.count(piece) <= 3);
        }
    }

    #[test]
    fn test_falls_back_to_characters() {
        let counter = HeuristicCounter::new("gpt-4o");
        let text = "x".repeat(50);
        let pieces = split_oversized(&text, 2, &counter).unwrap();

        assert_eq!(pieces.concat(), text);
        assert!(pieces.iter().all(|p| counter.count(p) <= 2));
        assert_eq!(pieces.len(), 7);
    }

    #[test]
    fn test_unsplittable_character() {
        struct Expensive;
        impl TokenCounter for Expensive {
            fn count(&self, text: &str) -> usize {
                text.chars().count() * 10
            }
            fn context_window(&self) -> usize {
                100
            }
        }

        let result = split_oversized("ab", 5, &Expensive);
        assert!(matches!(result, Err(PodError::TokenBudget(_))));
    }
}
