//! Language-model completion service.
//!
//! Every pipeline stage talks to the model through [`CompletionModel`], so the
//! orchestrator and tests can swap the transport. [`OpenRouterClient`] is the
//! production implementation against an OpenAI-compatible
//! `/chat/completions` endpoint.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use pagelens_shared::{AppConfig, OpenRouterConfig, PageLensError, validate_api_key};

// ---------------------------------------------------------------------------
// Request / error types
// ---------------------------------------------------------------------------

/// Which pipeline step a completion serves. Used for logging and by scripted
/// models in tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Purpose {
    Extraction,
    /// Second extraction attempt with a stricter "JSON only" instruction.
    ExtractionStrict,
    Analysis,
    Comparison,
    Qna,
}

impl Purpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Extraction => "extraction",
            Self::ExtractionStrict => "extraction_strict",
            Self::Analysis => "analysis",
            Self::Comparison => "comparison",
            Self::Qna => "qna",
        }
    }
}

/// One prompt sent to the model. Responses are expected to be a JSON object.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub purpose: Purpose,
    pub prompt: String,
    pub temperature: f32,
}

impl CompletionRequest {
    pub fn new(purpose: Purpose, prompt: impl Into<String>) -> Self {
        Self {
            purpose,
            prompt: prompt.into(),
            temperature: 0.2,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }
}

/// Failure talking to the model service.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ModelError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("model request timed out: {0}")]
    Timeout(String),

    #[error("model returned an empty response")]
    EmptyResponse,
}

/// A text-completion backend.
#[async_trait]
pub trait CompletionModel: Send + Sync {
    /// Send one prompt and return the raw text of the first choice.
    async fn complete(&self, request: &CompletionRequest) -> Result<String, ModelError>;
}

// ---------------------------------------------------------------------------
// OpenAI-compatible wire types
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    response_format: ResponseFormat,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
    #[serde(default)]
    error: Option<ApiError>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct ApiError {
    #[serde(default)]
    message: String,
}

#[derive(Deserialize)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

const SYSTEM_PROMPT: &str = "You are a precise web data analyst. \
     Always reply with a single valid JSON object and nothing else.";

// ---------------------------------------------------------------------------
// OpenRouterClient
// ---------------------------------------------------------------------------

/// [`CompletionModel`] backed by OpenRouter (or any OpenAI-compatible API).
pub struct OpenRouterClient {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
}

impl OpenRouterClient {
    /// Build a client from the `[openrouter]` section and an API key.
    pub fn new(config: &OpenRouterConfig, api_key: impl Into<String>) -> Result<Self, PageLensError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| PageLensError::Network(format!("failed to build HTTP client: {e}")))?;

        let endpoint = format!(
            "{}/chat/completions",
            config.base_url.trim_end_matches('/')
        );
        info!(endpoint = %endpoint, model = %config.default_model, "model client configured");

        Ok(Self {
            client,
            endpoint,
            api_key: api_key.into(),
            model: config.default_model.clone(),
        })
    }

    /// Build a client from the full config, reading the key from the environment.
    pub fn from_config(config: &AppConfig) -> Result<Self, PageLensError> {
        let api_key = validate_api_key(config)?;
        Self::new(&config.openrouter, api_key)
    }

    /// Override the model id.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl CompletionModel for OpenRouterClient {
    #[instrument(skip_all, fields(purpose = request.purpose.as_str(), model = %self.model))]
    async fn complete(&self, request: &CompletionRequest) -> Result<String, ModelError> {
        let start = Instant::now();
        let body = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: &request.prompt,
                },
            ],
            temperature: request.temperature,
            response_format: ResponseFormat {
                kind: "json_object",
            },
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .header("X-Title", "PageLens")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ModelError::Timeout(e.to_string())
                } else {
                    ModelError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let snippet: String = text.chars().take(200).collect();
            warn!(status = status.as_u16(), "model request rejected");
            return Err(match status {
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                    ModelError::Auth(format!("HTTP {status}: {snippet}"))
                }
                StatusCode::TOO_MANY_REQUESTS => {
                    ModelError::RateLimited(format!("HTTP {status}: {snippet}"))
                }
                StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => {
                    ModelError::Timeout(format!("HTTP {status}"))
                }
                _ => ModelError::Transport(format!("HTTP {status}: {snippet}")),
            });
        }

        let parsed: ChatResponse = response.json().await.map_err(|e| {
            if e.is_timeout() {
                ModelError::Timeout(e.to_string())
            } else {
                ModelError::Transport(format!("invalid response body: {e}"))
            }
        })?;

        if let Some(error) = parsed.error {
            return Err(ModelError::Transport(error.message));
        }

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or(ModelError::EmptyResponse)?;

        let (tokens_in, tokens_out) = parsed
            .usage
            .map(|u| (u.prompt_tokens, u.completion_tokens))
            .unwrap_or((0, 0));
        debug!(
            latency_ms = start.elapsed().as_millis() as u64,
            tokens_in,
            tokens_out,
            chars = content.len(),
            "model call complete"
        );

        Ok(content)
    }
}
