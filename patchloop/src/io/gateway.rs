//! Model gateway: one provider request per call, no retries.
//!
//! [`ModelGateway`] is the seam between the loop controller and the model
//! provider. [`AnthropicGateway`] speaks the Anthropic Messages API over a
//! blocking HTTP client. Every failure is returned as a [`GatewayError`];
//! a failed call is never turned into an empty reply.

use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use reqwest::StatusCode;
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::core::conversation::{ContentBlock, Conversation};
use crate::core::tools::ToolSpec;

pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
pub const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Longest error body kept in a [`GatewayError::Status`].
const MAX_ERROR_BODY_CHARS: usize = 2_000;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("provider returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("malformed provider response: {0}")]
    Malformed(String),
}

impl GatewayError {
    /// Transport failures, rate limits and server errors may succeed on a later attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            GatewayError::Transport(_) => true,
            GatewayError::Status { status, .. } => *status == 429 || *status >= 500,
            GatewayError::Malformed(_) => false,
        }
    }
}

/// Everything the provider sees for one round.
#[derive(Debug, Clone, Copy)]
pub struct ModelRequest<'a> {
    pub system_prompt: &'a str,
    pub conversation: &'a Conversation,
    pub tools: &'a [ToolSpec],
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
}

/// Structured provider reply.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelReply {
    /// Text and tool invocation blocks, in provider order.
    pub content: Vec<ContentBlock>,
    pub stop_reason: Option<String>,
    pub usage: Option<Usage>,
    /// Undecoded response body, kept for the raw exchange capture.
    pub raw: Value,
}

pub trait ModelGateway {
    /// Perform exactly one provider request.
    fn send(&self, request: &ModelRequest<'_>) -> Result<ModelReply, GatewayError>;
}

/// Connection settings for [`AnthropicGateway`].
#[derive(Debug, Clone)]
pub struct AnthropicSettings {
    pub api_key: String,
    pub model: String,
    pub max_tokens: u32,
    pub base_url: String,
    pub timeout: Duration,
}

pub struct AnthropicGateway {
    settings: AnthropicSettings,
    messages_url: String,
    client: Client,
}

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    system: &'a str,
    messages: &'a Conversation,
    tools: &'a [ToolSpec],
}

#[derive(Deserialize)]
struct MessagesResponse {
    content: Vec<ResponseBlock>,
    #[serde(default)]
    stop_reason: Option<String>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ResponseBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    /// Thinking blocks and future block types carry nothing the loop acts on.
    #[serde(other)]
    Unsupported,
}

impl AnthropicGateway {
    pub fn new(settings: AnthropicSettings) -> Result<Self, GatewayError> {
        let base = settings.base_url.trim_end_matches('/');
        let messages_url = format!("{base}/v1/messages");
        let client = Client::builder()
            .timeout(settings.timeout)
            .build()
            .map_err(|err| GatewayError::Transport(format!("build http client: {err}")))?;
        Ok(Self {
            settings,
            messages_url,
            client,
        })
    }

    pub fn messages_url(&self) -> &str {
        &self.messages_url
    }

    /// JSON body for one request.
    pub fn request_body(&self, request: &ModelRequest<'_>) -> Result<Value, GatewayError> {
        serde_json::to_value(MessagesRequest {
            model: &self.settings.model,
            max_tokens: self.settings.max_tokens,
            system: request.system_prompt,
            messages: request.conversation,
            tools: request.tools,
        })
        .map_err(|err| GatewayError::Malformed(format!("encode request: {err}")))
    }
}

impl ModelGateway for AnthropicGateway {
    #[instrument(skip_all, fields(model = %self.settings.model, turns = request.conversation.len()))]
    fn send(&self, request: &ModelRequest<'_>) -> Result<ModelReply, GatewayError> {
        let body = self.request_body(request)?;
        debug!(url = %self.messages_url, "sending model request");

        let response = self
            .client
            .post(&self.messages_url)
            .header("x-api-key", self.settings.api_key.trim())
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .map_err(|err| GatewayError::Transport(redact(&err.to_string())))?;

        let status = response.status();
        let text = response
            .text()
            .map_err(|err| GatewayError::Transport(format!("read response body: {err}")))?;
        if !status.is_success() {
            warn!(status = status.as_u16(), "provider returned error status");
            return Err(status_error(status, &text));
        }

        let reply = decode_reply(&text)?;
        debug!(
            blocks = reply.content.len(),
            stop_reason = reply.stop_reason.as_deref().unwrap_or(""),
            "model reply decoded"
        );
        Ok(reply)
    }
}

/// Decode a successful Messages API body. Unknown block types are skipped.
pub fn decode_reply(body: &str) -> Result<ModelReply, GatewayError> {
    let raw: Value = serde_json::from_str(body)
        .map_err(|err| GatewayError::Malformed(format!("response is not JSON: {err}")))?;
    let parsed: MessagesResponse = serde_json::from_value(raw.clone())
        .map_err(|err| GatewayError::Malformed(err.to_string()))?;

    let content = parsed
        .content
        .into_iter()
        .filter_map(|block| match block {
            ResponseBlock::Text { text } => Some(ContentBlock::Text { text }),
            ResponseBlock::ToolUse { id, name, input } => {
                Some(ContentBlock::ToolInvocation { id, name, input })
            }
            ResponseBlock::Unsupported => None,
        })
        .collect();

    Ok(ModelReply {
        content,
        stop_reason: parsed.stop_reason,
        usage: parsed.usage,
        raw,
    })
}

fn status_error(status: StatusCode, body: &str) -> GatewayError {
    GatewayError::Status {
        status: status.as_u16(),
        body: truncate_chars(&redact(body), MAX_ERROR_BODY_CHARS),
    }
}

static SECRET_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(sk-ant-[A-Za-z0-9_\-]+|x-api-key:\s*\S+)").expect("secret pattern should compile")
});

/// Replace credential-looking substrings before text reaches logs or artifacts.
pub fn redact(text: &str) -> String {
    SECRET_PATTERN.replace_all(text, "[REDACTED]").into_owned()
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}
