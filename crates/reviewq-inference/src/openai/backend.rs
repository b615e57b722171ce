//! OpenAI-compatible model backend implementation.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, info, warn};

use reviewq_core::{
    defaults, ChecklistPrompt, DocumentPart, Error, ItemVerdict, QaModel, Result, ReviewModel,
};

use super::error::{to_reviewq_error, OpenAIErrorCode};
use super::streaming::{parse_sse_stream, TokenStream};
use super::types::*;
use crate::prompts;

/// Default OpenAI API endpoint.
pub const DEFAULT_OPENAI_URL: &str = "https://api.openai.com/v1";

/// Default generation model.
pub const DEFAULT_GEN_MODEL: &str = "gpt-4o-mini";

/// Default timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 300;

/// Configuration for OpenAI-compatible backend.
#[derive(Debug, Clone)]
pub struct OpenAIConfig {
    /// Base URL for the API endpoint.
    pub base_url: String,
    /// API key for authentication (optional for local endpoints).
    pub api_key: Option<String>,
    /// Model to use for generation.
    pub gen_model: String,
    /// Request timeout in seconds.
    pub timeout_seconds: u64,
    /// Sampling temperature for review and checklist calls.
    pub temperature: Option<f32>,
    /// Labels the model may assign, best first.
    pub evaluation_labels: Vec<String>,
}

impl Default for OpenAIConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_OPENAI_URL.to_string(),
            api_key: None,
            gen_model: DEFAULT_GEN_MODEL.to_string(),
            timeout_seconds: DEFAULT_TIMEOUT_SECS,
            temperature: Some(0.0),
            evaluation_labels: defaults::EVALUATION_LABELS
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl OpenAIConfig {
    /// Read `OPENAI_BASE_URL`, `OPENAI_API_KEY`, `OPENAI_GEN_MODEL` and
    /// `OPENAI_TIMEOUT`, falling back to the defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            base_url: std::env::var("OPENAI_BASE_URL").unwrap_or(defaults.base_url),
            api_key: std::env::var("OPENAI_API_KEY").ok().filter(|k| !k.is_empty()),
            gen_model: std::env::var("OPENAI_GEN_MODEL").unwrap_or(defaults.gen_model),
            timeout_seconds: std::env::var("OPENAI_TIMEOUT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.timeout_seconds),
            temperature: defaults.temperature,
            evaluation_labels: defaults.evaluation_labels,
        }
    }

    pub fn with_evaluation_labels(mut self, labels: Vec<String>) -> Self {
        self.evaluation_labels = labels;
        self
    }
}

/// OpenAI-compatible backend implementing [`ReviewModel`] and [`QaModel`].
pub struct OpenAIBackend {
    client: Client,
    config: OpenAIConfig,
}

impl OpenAIBackend {
    /// Create a new OpenAI backend with the given configuration.
    pub fn new(config: OpenAIConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| Error::Inference(format!("Failed to create HTTP client: {}", e)))?;

        info!(
            subsystem = "inference",
            base_url = %config.base_url,
            model = %config.gen_model,
            "Initializing OpenAI backend"
        );

        Ok(Self { client, config })
    }

    /// Create from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::new(OpenAIConfig::from_env())
    }

    /// Get the current configuration.
    pub fn config(&self) -> &OpenAIConfig {
        &self.config
    }

    /// Build a request with authentication if configured.
    fn build_request(&self, endpoint: &str) -> reqwest::RequestBuilder {
        let url = format!("{}{}", self.config.base_url.trim_end_matches('/'), endpoint);
        let mut req = self.client.post(&url);

        if let Some(ref api_key) = self.config.api_key {
            req = req.header("Authorization", format!("Bearer {}", api_key));
        }

        req.header("Content-Type", "application/json")
    }

    /// POST a chat completion and return the raw response, mapping error
    /// bodies to typed errors.
    async fn send(&self, request: &ChatCompletionRequest) -> Result<reqwest::Response> {
        let response = self
            .build_request("/chat/completions")
            .json(request)
            .send()
            .await
            .map_err(|e| Error::Inference(format!("Request failed: {}", e)))?;

        if response.status().is_success() {
            return Ok(response);
        }

        let status = response.status();
        let body: OpenAIErrorResponse = response
            .json()
            .await
            .unwrap_or_else(|_| OpenAIErrorResponse::unknown());
        let code = OpenAIErrorCode::from_response(
            status.as_u16(),
            &body.error.error_type,
            body.error.code.as_deref(),
        );
        warn!(
            subsystem = "inference",
            status = status.as_u16(),
            retryable = code.is_retryable(),
            error = %body.error.message,
            "Model request failed"
        );
        Err(to_reviewq_error(
            code,
            &format!("OpenAI returned {}: {}", status, body.error.message),
        ))
    }

    /// Non-streaming completion returning the first choice's content.
    async fn complete(&self, system: &str, prompt: String) -> Result<String> {
        let start = Instant::now();
        let request = ChatCompletionRequest {
            model: self.config.gen_model.clone(),
            messages: vec![ChatMessage::system(system), ChatMessage::user(prompt)],
            temperature: self.config.temperature,
            max_tokens: None,
            stream: false,
        };

        let result: ChatCompletionResponse = self
            .send(&request)
            .await?
            .json()
            .await
            .map_err(|e| Error::Inference(format!("Failed to parse response: {}", e)))?;

        let choice = result
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| Error::Inference("Model returned no choices".to_string()))?;

        // A reply cut off by the token limit cannot be parsed reliably.
        if choice.finish_reason.as_deref() == Some("length") {
            return Err(Error::ContextOverflow(
                "Model reply truncated at the output token limit".to_string(),
            ));
        }

        debug!(
            subsystem = "inference",
            model = %self.config.gen_model,
            response_len = choice.message.content.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Generation complete"
        );
        Ok(choice.message.content)
    }

    /// Streaming completion yielding content deltas.
    pub async fn complete_stream(&self, system: &str, prompt: String) -> Result<TokenStream> {
        let request = ChatCompletionRequest {
            model: self.config.gen_model.clone(),
            messages: vec![ChatMessage::system(system), ChatMessage::user(prompt)],
            temperature: None,
            max_tokens: None,
            stream: true,
        };
        let response = self.send(&request).await?;
        Ok(parse_sse_stream(response.bytes_stream()))
    }
}

#[async_trait]
impl ReviewModel for OpenAIBackend {
    async fn generate_checklist(
        &self,
        documents: &[DocumentPart],
        requirements: Option<&str>,
    ) -> Result<Vec<String>> {
        let content = self
            .complete(
                prompts::CHECKLIST_SYSTEM_PROMPT,
                prompts::checklist_user_prompt(documents, requirements),
            )
            .await?;
        prompts::parse_checklist(&content)
    }

    async fn review_chunk(
        &self,
        items: &[ChecklistPrompt],
        document: &DocumentPart,
    ) -> Result<Vec<ItemVerdict>> {
        let system = prompts::review_system_prompt(&self.config.evaluation_labels);
        let content = self
            .complete(&system, prompts::review_user_prompt(items, document))
            .await?;
        prompts::parse_verdicts(&content, items)
    }
}

#[async_trait]
impl QaModel for OpenAIBackend {
    async fn answer(&self, question: &str, context: &str) -> Result<TokenStream> {
        self.complete_stream(
            prompts::QA_SYSTEM_PROMPT,
            prompts::qa_user_prompt(question, context),
        )
        .await
    }
}
