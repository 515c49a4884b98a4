//! Provider-facing LLM layer.
//!
//! The engine talks to providers through [`LlmProvider`]: one streaming
//! call that owns the whole tool loop for a turn, and one non-streaming
//! call used by the voting paths. Adapters normalize both wire dialects to
//! the same [`ProviderEvent`] sequence, so the orchestrator never learns
//! which vendor produced a delta. Tool execution stays inside the adapter
//! loop (results have to go back on the same wire), but what actually runs
//! is whatever [`ToolDispatcher`] the caller handed in.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_stream::wrappers::ReceiverStream;

use crate::core::config::Settings;
use crate::core::error::{AgentError, Result};

mod gemini;
mod openai;

pub use gemini::GeminiProvider;
pub use openai::OpenAiProvider;

/// Hard cap on provider round-trips inside one user turn. A model that
/// keeps calling tools past this gets cut off with whatever text it has.
pub(crate) const MAX_TOOL_ROUNDS: usize = 8;

/// Breathing room before each tool runs so the status line the engine just
/// wrote is actually seen.
pub(crate) const TOOL_EXECUTION_DELAY: Duration = Duration::from_millis(500);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    OpenAi,
    Gemini,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "openai",
            ProviderKind::Gemini => "gemini",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

/// One piece of a message. Images travel as data URLs until an adapter
/// reshapes them for its wire.
#[derive(Clone, Debug, PartialEq)]
pub enum MessagePart {
    Text(String),
    Image { data: String, detail_high: bool },
}

#[derive(Clone, Debug, PartialEq)]
pub struct ChatMessage {
    pub role: MessageRole,
    pub parts: Vec<MessagePart>,
}

impl ChatMessage {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            parts: vec![MessagePart::Text(text.into())],
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            parts: vec![MessagePart::Text(text.into())],
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            parts: vec![MessagePart::Text(text.into())],
        }
    }

    /// All text parts joined with newlines; images contribute nothing.
    pub fn joined_text(&self) -> String {
        let mut out = String::new();
        for part in &self.parts {
            if let MessagePart::Text(text) = part {
                if !out.is_empty() {
                    out.push('\n');
                }
                out.push_str(text);
            }
        }
        out
    }

    pub fn has_image(&self) -> bool {
        self.parts
            .iter()
            .any(|p| matches!(p, MessagePart::Image { .. }))
    }
}

/// Declaration of one callable tool, parameters as a JSON schema.
#[derive(Clone, Debug)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ToolChoice {
    /// The model decides whether to call anything.
    Auto,
    /// The model must call one of the offered tools.
    Required,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResponseFormat {
    Text,
    Json,
}

#[derive(Clone, Debug)]
pub struct SamplingParams {
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f64,
    pub top_p: f64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

/// Normalized stream of what happens during one provider turn.
#[derive(Clone, Debug)]
pub enum ProviderEvent {
    /// The wire is up; deltas follow.
    Connect,
    ContentDelta {
        delta: String,
        /// Everything streamed so far, across tool rounds.
        snapshot: String,
    },
    /// The model asked for a tool; emitted before the tool runs.
    FunctionCall { name: String, arguments: String },
    /// JSON payload a finished tool sent back to the model.
    FunctionCallResult { payload: String },
    /// A whole assistant message, emitted when a round finishes with text.
    Message { text: String },
    /// Accumulated token counts for the turn. At most one per stream.
    Usage(TokenUsage),
    /// The stream died after it connected. Terminal.
    Error { message: String },
    /// Normal end of stream. Terminal.
    End,
}

pub type EventStream = ReceiverStream<ProviderEvent>;

/// Runs tools on behalf of an adapter's wire loop. Implementations never
/// fail: anything that goes wrong comes back as a `{"success": false}`
/// payload for the model to read.
#[async_trait]
pub trait ToolDispatcher: Send + Sync {
    async fn dispatch(&self, name: &str, arguments: &str) -> String;
}

/// Dispatcher for calls made with no tools offered, where a function call
/// would be a protocol violation anyway.
pub struct NoTools;

#[async_trait]
impl ToolDispatcher for NoTools {
    async fn dispatch(&self, name: &str, _arguments: &str) -> String {
        serde_json::json!({
            "success": false,
            "reason": format!("tool {name} is not available in this context"),
        })
        .to_string()
    }
}

#[derive(Clone)]
pub struct StreamRequest {
    pub messages: Vec<ChatMessage>,
    pub params: SamplingParams,
    pub tools: Vec<ToolSpec>,
    pub tool_choice: ToolChoice,
    pub dispatcher: Arc<dyn ToolDispatcher>,
}

#[derive(Clone)]
pub struct CompleteRequest {
    pub messages: Vec<ChatMessage>,
    pub params: SamplingParams,
    pub response_format: ResponseFormat,
    /// How many independent choices to sample.
    pub n: u32,
}

#[derive(Clone, Debug, Default)]
pub struct Completion {
    pub choices: Vec<String>,
    pub usage: Option<TokenUsage>,
}

#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Opens a streaming turn. The adapter drives the full tool loop:
    /// deltas, function calls, their results, and a final usage total all
    /// arrive as events. Errors before the wire is up come back as `Err`;
    /// anything later is a [`ProviderEvent::Error`] on the stream.
    async fn stream_with_tools(&self, request: StreamRequest) -> Result<EventStream>;

    /// One non-streaming completion with `n` sampled choices. No tools.
    async fn complete(&self, request: CompleteRequest) -> Result<Completion>;
}

/// Builds the adapter the current settings point at. Fails fast when the
/// provider has no usable API key.
pub fn make_provider(settings: &Settings) -> Result<Arc<dyn LlmProvider>> {
    let kind = settings.llm.provider;
    let key = settings.api_key_for(kind).ok_or_else(|| {
        AgentError::Configuration(format!(
            "no API key configured for the {} provider",
            kind.as_str()
        ))
    })?;
    let base_url = settings.base_url_for(kind).trim_end_matches('/').to_string();
    Ok(match kind {
        ProviderKind::OpenAi => Arc::new(OpenAiProvider::new(base_url, key)?),
        ProviderKind::Gemini => Arc::new(GeminiProvider::new(base_url, key)?),
    })
}

pub(crate) fn build_http_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .build()
        .map_err(|err| AgentError::Configuration(format!("http client: {err}")))
}
