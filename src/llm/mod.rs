//! Language model access.
//!
//! [`LanguageModel`] is the seam used by the pipeline; [`OpenAiModel`] is the
//! production implementation and tests substitute fakes. [`CompletionService`]
//! handles documents that do not fit in one request.

mod openai;
mod service;

pub use openai::{create_client, create_client_with_timeout, OpenAiModel};
pub use service::{CompletionService, DocumentRequest};

use crate::error::Result;
use crate::tokens::TokenUsage;
use async_trait::async_trait;

/// Expected shape of the model reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseMode {
    Markdown,
    Json,
}

/// A single model reply.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub text: String,
    pub usage: Option<TokenUsage>,
}

impl Completion {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            usage: None,
        }
    }
}

/// Chat-style language model.
///
/// Implementations classify failures: transient ones as
/// [`PodError::TransientApi`](crate::error::PodError::TransientApi) so the
/// retry controller can repeat the call, everything else as permanent.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn complete(&self, system: &str, user: &str, mode: ResponseMode) -> Result<Completion>;

    /// Model identifier, used for token estimates and logging.
    fn model(&self) -> &str;
}
