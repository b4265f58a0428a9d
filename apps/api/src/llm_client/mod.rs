//! LLM Client: the external analysis capability used by the profile engine.
//!
//! ARCHITECTURAL RULE: No other module may call the Anthropic API directly.
//! A `CompletionProvider` makes exactly one attempt; retries, per-attempt
//! timeouts and usage reporting belong to `profile::invoker`.
//!
//! Model is pinned in `MODEL` so profile versions stay comparable.
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

pub mod prompts;

const MESSAGES_URL: &str = "https://api.anthropic.com/v1/messages";
const API_VERSION: &str = "2023-06-01";
/// Backstop only; the invoker enforces the real per-attempt deadline.
const HTTP_TIMEOUT_SECS: u64 = 300;

pub const MODEL: &str = "claude-sonnet-4-5";
pub const MAX_TOKENS: u32 = 4096;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("completion API returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("undecodable completion response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("completion had no text content")]
    EmptyContent,
}

impl LlmError {
    /// Whether the same request may succeed if sent again.
    pub fn is_transient(&self) -> bool {
        match self {
            LlmError::Transport(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            LlmError::Status { status, .. } => *status == 408 || *status == 429 || *status >= 500,
            LlmError::Decode(_) | LlmError::EmptyContent => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseFormat {
    Text,
    Json,
}

#[derive(Debug, Clone)]
pub struct CompletionRequest {
    /// Telemetry label, e.g. `profile_analysis`.
    pub operation: String,
    pub model: String,
    pub system: String,
    pub prompt: String,
    pub response_format: ResponseFormat,
    pub max_tokens: u32,
}

impl CompletionRequest {
    pub fn json(operation: &str, system: &str, prompt: String) -> Self {
        Self {
            operation: operation.to_string(),
            model: MODEL.to_string(),
            system: system.to_string(),
            prompt,
            response_format: ResponseFormat::Json,
            max_tokens: MAX_TOKENS,
        }
    }

    /// System prompt as sent on the wire.
    fn effective_system(&self) -> String {
        match self.response_format {
            ResponseFormat::Json => format!("{}\n\n{}", self.system, prompts::JSON_ONLY_SYSTEM),
            ResponseFormat::Text => self.system.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

#[derive(Debug, Clone)]
pub struct Completion {
    pub content: String,
    pub usage: TokenUsage,
}

/// One completion attempt against an external model. No retries.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, LlmError>;
}

// ────────────────────────────────────────────────────────────────────────────
// Messages API wire types
// ────────────────────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct MessagesBody<'a> {
    model: &'a str,
    max_tokens: u32,
    system: &'a str,
    messages: [WireMessage<'a>; 1],
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct MessagesReply {
    content: Vec<ReplyBlock>,
    usage: ReplyUsage,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ReplyBlock {
    Text { text: String },
    #[serde(other)]
    Other,
}

#[derive(Deserialize)]
struct ReplyUsage {
    input_tokens: u32,
    output_tokens: u32,
}

#[derive(Deserialize)]
struct ErrorReply {
    error: ErrorDetail,
}

#[derive(Deserialize)]
struct ErrorDetail {
    message: String,
}

impl MessagesReply {
    fn first_text(&self) -> Option<&str> {
        self.content.iter().find_map(|block| match block {
            ReplyBlock::Text { text } => Some(text.as_str()),
            ReplyBlock::Other => None,
        })
    }
}

/// Anthropic Messages API client.
#[derive(Clone)]
pub struct LlmClient {
    http: Client,
    api_key: String,
}

impl LlmClient {
    pub fn new(api_key: String) -> Result<Self, LlmError> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(HTTP_TIMEOUT_SECS))
            .build()?;
        Ok(Self { http, api_key })
    }
}

#[async_trait]
impl CompletionProvider for LlmClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, LlmError> {
        let system = request.effective_system();
        let body = MessagesBody {
            model: &request.model,
            max_tokens: request.max_tokens,
            system: &system,
            messages: [WireMessage {
                role: "user",
                content: &request.prompt,
            }],
        };

        let response = self
            .http
            .post(MESSAGES_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let raw = response.text().await?;
        if !status.is_success() {
            let message = serde_json::from_str::<ErrorReply>(&raw)
                .map(|reply| reply.error.message)
                .unwrap_or(raw);
            return Err(LlmError::Status {
                status: status.as_u16(),
                message,
            });
        }

        let reply: MessagesReply = serde_json::from_str(&raw)?;
        debug!(
            operation = %request.operation,
            input_tokens = reply.usage.input_tokens,
            output_tokens = reply.usage.output_tokens,
            "completion received"
        );

        let text = reply.first_text().ok_or(LlmError::EmptyContent)?;
        let content = match request.response_format {
            ResponseFormat::Json => strip_json_fences(text).to_string(),
            ResponseFormat::Text => text.to_string(),
        };

        Ok(Completion {
            content,
            usage: TokenUsage {
                prompt_tokens: reply.usage.input_tokens,
                completion_tokens: reply.usage.output_tokens,
            },
        })
    }
}

/// Removes a surrounding markdown code fence (with or without a language tag).
pub fn strip_json_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(opened) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Skip the info string ("json", "JSON", ...) up to the first newline.
    let body = match opened.find('\n') {
        Some(newline) if opened[..newline].chars().all(|c| c.is_ascii_alphanumeric()) => {
            &opened[newline + 1..]
        }
        _ => opened,
    };
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}
