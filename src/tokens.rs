//! Token estimation and usage accounting.
//!
//! Estimates are used to size requests against a model's context window; actual
//! usage reported by the API is tracked separately for the end-of-run cost report.

use serde::Serialize;
use std::sync::Mutex;
use tracing::info;

/// Estimates the token cost of a span of text.
///
/// Implementations must be deterministic and monotonic: a longer text never
/// counts fewer tokens than any of its prefixes. The chunker also relies on
/// `count(a + b) <= count(a) + count(b)` when it sums per-unit estimates.
pub trait TokenCounter: Send + Sync {
    /// Estimated token count for `text`.
    fn count(&self, text: &str) -> usize;

    /// Maximum context (prompt + completion) of the model this counter is for.
    fn context_window(&self) -> usize;
}

/// Character-ratio estimator.
///
/// Counts `ceil(chars / chars_per_token)`, which tracks BPE tokenizers closely
/// enough for budgeting English technical prose.
#[derive(Debug, Clone)]
pub struct HeuristicCounter {
    model: String,
    chars_per_token: f64,
    context_window: usize,
}

impl HeuristicCounter {
    /// Create a counter for `model` with the default ratio of 4 characters per token.
    pub fn new(model: &str) -> Self {
        Self::with_ratio(model, 4.0)
    }

    /// Create a counter with a custom characters-per-token ratio.
    pub fn with_ratio(model: &str, chars_per_token: f64) -> Self {
        let chars_per_token = if chars_per_token > 0.0 { chars_per_token } else { 4.0 };
        Self {
            model: model.to_string(),
            chars_per_token,
            context_window: context_window(model),
        }
    }

    /// Override the context window (e.g. for models not in the built-in table).
    pub fn with_context_window(mut self, tokens: usize) -> Self {
        self.context_window = tokens;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

impl TokenCounter for HeuristicCounter {
    fn count(&self, text: &str) -> usize {
        let chars = text.chars().count();
        (chars as f64 / self.chars_per_token).ceil() as usize
    }

    fn context_window(&self) -> usize {
        self.context_window
    }
}

/// Context window (tokens) for known chat models.
pub fn context_window(model: &str) -> usize {
    let model = model.to_lowercase();
    if model.starts_with("gpt-4.1") {
        1_047_576
    } else if model.starts_with("gpt-4o") || model.starts_with("gpt-4-turbo") {
        128_000
    } else if model.starts_with("gpt-4-32k") {
        32_768
    } else if model.starts_with("gpt-4") {
        8_192
    } else if model.starts_with("gpt-3.5-turbo") {
        16_385
    } else {
        128_000
    }
}

/// Price per 1K tokens (prompt, completion) in USD.
fn pricing(model: &str) -> (f64, f64) {
    let model = model.to_lowercase();
    if model.starts_with("gpt-4o-mini") {
        (0.000_15, 0.000_6)
    } else if model.starts_with("gpt-4o") {
        (0.002_5, 0.01)
    } else if model.starts_with("gpt-4.1-mini") {
        (0.000_4, 0.001_6)
    } else if model.starts_with("gpt-4.1") {
        (0.002, 0.008)
    } else if model.starts_with("gpt-4-32k") {
        (0.06, 0.12)
    } else if model.starts_with("gpt-4") {
        (0.03, 0.06)
    } else {
        (0.001, 0.002)
    }
}

/// Token usage of a single request.
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
    pub cost: f64,
}

/// Aggregated usage across a run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct UsageReport {
    pub model: String,
    pub requests: usize,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    pub total_cost: f64,
}

impl UsageReport {
    pub fn average_tokens_per_request(&self) -> f64 {
        if self.requests == 0 {
            0.0
        } else {
            self.total_tokens as f64 / self.requests as f64
        }
    }
}

/// Thread-safe accumulator of API-reported usage.
#[derive(Debug)]
pub struct UsageTracker {
    model: String,
    history: Mutex<Vec<TokenUsage>>,
}

impl UsageTracker {
    pub fn new(model: &str) -> Self {
        Self {
            model: model.to_string(),
            history: Mutex::new(Vec::new()),
        }
    }

    /// Estimated cost of a request with the given token counts.
    pub fn cost(&self, prompt_tokens: u32, completion_tokens: u32) -> f64 {
        let (prompt_price, completion_price) = pricing(&self.model);
        (prompt_tokens as f64 / 1000.0) * prompt_price
            + (completion_tokens as f64 / 1000.0) * completion_price
    }

    /// Record usage reported by the API for one request.
    pub fn record(&self, prompt_tokens: u32, completion_tokens: u32) -> TokenUsage {
        let usage = TokenUsage {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
            cost: self.cost(prompt_tokens, completion_tokens),
        };

        info!(
            "Token usage - prompt: {}, completion: {}, cost: ${:.4}",
            usage.prompt_tokens, usage.completion_tokens, usage.cost
        );

        if let Ok(mut history) = self.history.lock() {
            history.push(usage);
        }
        usage
    }

    pub fn report(&self) -> UsageReport {
        let history = self.history.lock().map(|h| h.clone()).unwrap_or_default();
        UsageReport {
            model: self.model.clone(),
            requests: history.len(),
            prompt_tokens: history.iter().map(|u| u.prompt_tokens as u64).sum(),
            completion_tokens: history.iter().map(|u| u.completion_tokens as u64).sum(),
            total_tokens: history.iter().map(|u| u.total_tokens as u64).sum(),
            total_cost: history.iter().map(|u| u.cost).sum(),
        }
    }
}
