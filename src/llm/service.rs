//! Whole-document completions that split long inputs across requests.

use super::{LanguageModel, ResponseMode};
use crate::chunking::{ChunkBudget, Chunker};
use crate::combine::{self, CombinedResult, PartialResponse};
use crate::config::{Prompts, StagePrompts};
use crate::document::Document;
use crate::error::{PodError, Result};
use crate::retry::{retry, RetryPolicy};
use crate::tokens::TokenCounter;
use futures::stream::{self, StreamExt, TryStreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// One model pass over a document.
pub struct DocumentRequest<'a> {
    /// Name used in logs and retry errors, e.g. "analysis".
    pub label: &'a str,
    pub document: &'a Document,
    pub prompts: &'a StagePrompts,
    pub mode: ResponseMode,
}

/// Sends a document to the model, chunking it when it does not fit the context
/// window, retrying each call and combining the partial responses.
pub struct CompletionService {
    model: Arc<dyn LanguageModel>,
    counter: Arc<dyn TokenCounter>,
    chunker: Chunker,
    budget: ChunkBudget,
    policy: RetryPolicy,
    prompts: Prompts,
    concurrency: usize,
}

impl CompletionService {
    pub fn new(
        model: Arc<dyn LanguageModel>,
        counter: Arc<dyn TokenCounter>,
        budget: &ChunkBudget,
        policy: RetryPolicy,
        prompts: Prompts,
    ) -> Result<Self> {
        // A chunk never asks for more than the model accepts.
        let budget = budget.capped_to(counter.context_window());
        let chunker = Chunker::new(Arc::clone(&counter), &budget)?;
        Ok(Self {
            model,
            counter,
            chunker,
            budget,
            policy,
            prompts,
            concurrency: 1,
        })
    }

    /// Allow up to `requests` chunk requests in flight at once.
    pub fn with_concurrency(mut self, requests: usize) -> Self {
        self.concurrency = requests.max(1);
        self
    }

    /// Whether `text` plus the reserves exceeds the model's context window.
    pub fn needs_chunking(&self, text: &str) -> bool {
        let needed =
            self.counter.count(text) + self.budget.system_reserve + self.budget.response_reserve;
        needed > self.counter.context_window()
    }

    #[instrument(skip(self, request), fields(label = request.label, doc = %request.document.id))]
    pub async fn run(&self, request: &DocumentRequest<'_>) -> Result<CombinedResult> {
        let document = request.document;
        if document.is_empty() {
            return Err(PodError::Extraction(format!(
                "'{}' has no text to send to the model",
                document.title
            )));
        }

        let parts: Vec<(String, String)> = if self.needs_chunking(&document.text) {
            let chunks = self.chunker.chunk(document)?;
            info!(
                "{}: '{}' exceeds the context window, using {} chunks",
                request.label,
                document.title,
                chunks.len()
            );
            let total = chunks.len();
            chunks
                .into_iter()
                .map(|c| (c.position_note(total), c.text))
                .collect()
        } else {
            debug!("{}: '{}' fits in a single request", request.label, document.title);
            vec![(String::new(), document.text.clone())]
        };

        // Chunks are independent; responses are joined in chunk order.
        let expected = parts.len();
        let responses: Vec<PartialResponse> = stream::iter(parts.iter().enumerate())
            .map(|(index, (position, content))| async move {
                let text = self.call(request, index, expected, position, content).await?;
                Ok::<_, PodError>(match request.mode {
                    ResponseMode::Markdown => PartialResponse::markdown(index, text),
                    ResponseMode::Json => PartialResponse::analysis(index, text),
                })
            })
            .buffered(self.concurrency)
            .try_collect()
            .await?;

        combine::combine(expected, &responses)
    }

    async fn call(
        &self,
        request: &DocumentRequest<'_>,
        index: usize,
        total: usize,
        position: &str,
        content: &str,
    ) -> Result<String> {
        let mut vars = HashMap::new();
        vars.insert("title".to_string(), request.document.title.clone());
        vars.insert("position".to_string(), position.to_string());
        vars.insert("content".to_string(), content.to_string());

        let system = self.prompts.render_with_custom(&request.prompts.system, &vars);
        let user = self.prompts.render_with_custom(&request.prompts.user, &vars);
        let label = if total > 1 {
            format!("{} chunk {}/{}", request.label, index + 1, total)
        } else {
            request.label.to_string()
        };

        retry(&self.policy, &label, |_| async {
            let completion = self.model.complete(&system, &user, request.mode).await?;
            if request.mode == ResponseMode::Json {
                serde_json::from_str::<serde_json::Value>(combine::extract_json(&completion.text))
                    .map_err(|e| {
                        PodError::TransientApi(format!("model returned malformed JSON: {}", e))
                    })?;
            }
            Ok(completion.text)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::Completion;
    use crate::retry::Backoff;
    use crate::tokens::HeuristicCounter;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Echoes the content it was given back as markdown, failing the first
    /// `failures` calls with a transient error.
    struct EchoModel {
        failures: Mutex<u32>,
        calls: Mutex<Vec<String>>,
    }

    impl EchoModel {
        fn new(failures: u32) -> Self {
            Self {
                failures: Mutex::new(failures),
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl LanguageModel for EchoModel {
        async fn complete(&self, _system: &str, user: &str, _mode: ResponseMode) -> Result<Completion> {
            self.calls.lock().unwrap().push(user.to_string());
            let mut failures = self.failures.lock().unwrap();
            if *failures > 0 {
                *failures -= 1;
                return Err(PodError::TransientApi("503".into()));
            }
            let body = user.split("\n\n").skip(1).collect::<Vec<_>>().join("\n\n");
            Ok(Completion::text(body))
        }

        fn model(&self) -> &str {
            "echo"
        }
    }

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            delay: Duration::ZERO,
            backoff: Backoff::Fixed,
            max_delay: Duration::ZERO,
        }
    }

    fn service(model: Arc<EchoModel>, context_window: usize) -> CompletionService {
        let counter = Arc::new(HeuristicCounter::new("gpt-4o").with_context_window(context_window));
        let budget = ChunkBudget {
            max_tokens_per_chunk: 400,
            system_reserve: 50,
            response_reserve: 50,
            safety_margin_fraction: 0.0,
        };
        CompletionService::new(model, counter, &budget, policy(), Prompts::defaults()).unwrap()
    }

    fn long_document() -> Document {
        let text = (0..12)
            .map(|i| format!("Paragraph {} {}", i, "word ".repeat(60).trim_end()))
            .collect::<Vec<_>>()
            .join("\n\n");
        Document::from_text("long", text)
    }

    #[tokio::test]
    async fn test_small_document_single_call() {
        let model = Arc::new(EchoModel::new(0));
        let service = service(Arc::clone(&model), 128_000);
        let doc = Document::from_text("short", "Just one paragraph.");

        let result = service
            .run(&DocumentRequest {
                label: "formatting",
                document: &doc,
                prompts: &StagePrompts {
                    system: "s".into(),
                    user: "{{title}}\n\n{{content}}".into(),
                },
                mode: ResponseMode::Markdown,
            })
            .await
            .unwrap();

        assert_eq!(model.calls.lock().unwrap().len(), 1);
        assert_eq!(result, CombinedResult::Markdown("Just one paragraph.".into()));
    }

    #[tokio::test]
    async fn test_long_document_is_chunked_and_recombined() {
        let model = Arc::new(EchoModel::new(1));
        let service = service(Arc::clone(&model), 1_000);
        let doc = long_document();
        assert!(service.needs_chunking(&doc.text));

        let stage = StagePrompts {
            system: "s".into(),
            user: "{{title}}\n\n{{content}}".into(),
        };
        let result = service
            .run(&DocumentRequest {
                label: "formatting",
                document: &doc,
                prompts: &stage,
                mode: ResponseMode::Markdown,
            })
            .await
            .unwrap();

        let CombinedResult::Markdown(text) = result else {
            panic!("expected markdown");
        };
        assert_eq!(text, doc.text);
        // one transient failure retried, plus one call per chunk
        let calls = model.calls.lock().unwrap().len();
        assert!(calls > 2);
    }

    #[tokio::test]
    async fn test_concurrent_chunks_keep_document_order() {
        let model = Arc::new(EchoModel::new(0));
        let service = service(Arc::clone(&model), 1_000).with_concurrency(4);
        let doc = long_document();
        let stage = StagePrompts {
            system: "s".into(),
            user: "{{title}}\n\n{{content}}".into(),
        };

        let result = service
            .run(&DocumentRequest {
                label: "formatting",
                document: &doc,
                prompts: &stage,
                mode: ResponseMode::Markdown,
            })
            .await
            .unwrap();

        assert_eq!(result, CombinedResult::Markdown(doc.text.clone()));
    }

    #[tokio::test]
    async fn test_chunks_fit_small_context_window() {
        let model = Arc::new(EchoModel::new(0));
        let counter = Arc::new(HeuristicCounter::new("gpt-4"));
        let window = counter.context_window();
        let service = CompletionService::new(
            Arc::clone(&model) as Arc<dyn LanguageModel>,
            Arc::clone(&counter) as Arc<dyn TokenCounter>,
            &ChunkBudget::default(),
            policy(),
            Prompts::defaults(),
        )
        .unwrap();
        let text = (0..300)
            .map(|i| format!("Paragraph {} {}", i, "word ".repeat(60).trim_end()))
            .collect::<Vec<_>>()
            .join("\n\n");
        let doc = Document::from_text("large", text);
        let stage = StagePrompts {
            system: "s".into(),
            user: "{{title}}\n\n{{content}}".into(),
        };

        service
            .run(&DocumentRequest {
                label: "formatting",
                document: &doc,
                prompts: &stage,
                mode: ResponseMode::Markdown,
            })
            .await
            .unwrap();

        let calls = model.calls.lock().unwrap();
        assert!(calls.len() > 2);
        for user in calls.iter() {
            assert!(counter.count(user) + 1_000 + 4_000 <= window);
        }
    }

    #[tokio::test]
    async fn test_empty_document_is_rejected() {
        let model = Arc::new(EchoModel::new(0));
        let service = service(Arc::clone(&model), 1_000);
        let doc = Document::from_text("blank", "   \n\n  ");
        let stage = StagePrompts::default();

        let result = service
            .run(&DocumentRequest {
                label: "formatting",
                document: &doc,
                prompts: &stage,
                mode: ResponseMode::Markdown,
            })
            .await;
        assert!(matches!(result, Err(PodError::Extraction(_))));
        assert!(model.calls.lock().unwrap().is_empty());
    }
}
