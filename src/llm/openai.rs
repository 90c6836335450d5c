//! OpenAI chat completions via `async-openai`.

use super::{Completion, LanguageModel, ResponseMode};
use crate::error::{PodError, Result};
use crate::tokens::UsageTracker;
use async_openai::error::OpenAIError;
use async_openai::types::{
    ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
    ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequestArgs, ResponseFormat,
};
use async_openai::{config::OpenAIConfig, Client};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument};

/// Default timeout for OpenAI API requests (5 minutes).
const DEFAULT_TIMEOUT_SECS: u64 = 300;

/// Create an OpenAI client with the default timeout.
pub fn create_client() -> Result<Client<OpenAIConfig>> {
    create_client_with_timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
}

/// Create an OpenAI client with a custom timeout.
///
/// The API key is read from `OPENAI_API_KEY` by `OpenAIConfig`.
pub fn create_client_with_timeout(timeout: Duration) -> Result<Client<OpenAIConfig>> {
    let http_client = reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| PodError::Configuration(format!("Failed to create HTTP client: {}", e)))?;

    Ok(Client::with_config(OpenAIConfig::default()).with_http_client(http_client))
}

/// Chat model backed by the OpenAI API.
pub struct OpenAiModel {
    client: Client<OpenAIConfig>,
    model: String,
    temperature: f32,
    usage: Arc<UsageTracker>,
}

impl OpenAiModel {
    pub fn new(model: &str, temperature: f32, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: create_client_with_timeout(timeout)?,
            model: model.to_string(),
            temperature,
            usage: Arc::new(UsageTracker::new(model)),
        })
    }

    /// Usage recorded across every call made by this model.
    pub fn usage(&self) -> Arc<UsageTracker> {
        Arc::clone(&self.usage)
    }
}

#[async_trait]
impl LanguageModel for OpenAiModel {
    #[instrument(skip(self, system, user), fields(model = %self.model))]
    async fn complete(&self, system: &str, user: &str, mode: ResponseMode) -> Result<Completion> {
        let messages: Vec<ChatCompletionRequestMessage> = vec![
            ChatCompletionRequestSystemMessageArgs::default()
                .content(system)
                .build()
                .map_err(classify)?
                .into(),
            ChatCompletionRequestUserMessageArgs::default()
                .content(user)
                .build()
                .map_err(classify)?
                .into(),
        ];

        let mut request = CreateChatCompletionRequestArgs::default();
        request
            .model(&self.model)
            .messages(messages)
            .temperature(self.temperature);
        if mode == ResponseMode::Json {
            request.response_format(ResponseFormat::JsonObject);
        }
        let request = request.build().map_err(classify)?;

        let response = self.client.chat().create(request).await.map_err(classify)?;

        let text = response
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| PodError::TransientApi("Empty response from model".to_string()))?;

        let usage = response
            .usage
            .map(|u| self.usage.record(u.prompt_tokens, u.completion_tokens));

        debug!("Model response: {}", &text.chars().take(300).collect::<String>());
        Ok(Completion { text, usage })
    }

    fn model(&self) -> &str {
        &self.model
    }
}

/// Map an OpenAI error onto the transient/permanent split.
fn classify(err: OpenAIError) -> PodError {
    match err {
        OpenAIError::Reqwest(e) => PodError::Http(e),
        OpenAIError::JSONDeserialize(e) => {
            PodError::TransientApi(format!("Malformed response from OpenAI: {}", e))
        }
        OpenAIError::StreamError(e) => PodError::TransientApi(e),
        OpenAIError::ApiError(api) => {
            let kind = api.r#type.clone().unwrap_or_default();
            let message = api.message.clone();
            if is_transient_api_error(&kind, &message) {
                PodError::TransientApi(format!("OpenAI {}: {}", kind, message))
            } else {
                PodError::PermanentApi(format!("OpenAI {}: {}", kind, message))
            }
        }
        other => PodError::PermanentApi(other.to_string()),
    }
}

fn is_transient_api_error(kind: &str, message: &str) -> bool {
    let kind = kind.to_lowercase();
    let message = message.to_lowercase();
    if kind.contains("insufficient_quota") || message.contains("quota") {
        return false;
    }
    kind.contains("server_error")
        || kind.contains("rate_limit")
        || kind == "requests"
        || kind == "tokens"
        || message.contains("rate limit")
        || message.contains("overloaded")
        || message.contains("try again")
}
