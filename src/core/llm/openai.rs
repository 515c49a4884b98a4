//! OpenAI-compatible chat adapter.
//!
//! Speaks `/chat/completions` in both streaming and non-streaming form.
//! The streaming path reads SSE line-by-line, reassembles tool-call
//! fragments by index, runs the requested tools through the dispatcher,
//! and feeds the results back on the same conversation until the model
//! answers with plain text or the round limit trips. Token usage is
//! accumulated across rounds and reported once.

use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};

use crate::core::error::{AgentError, Result};

use super::{
    ChatMessage, CompleteRequest, Completion, EventStream, LlmProvider, MAX_TOOL_ROUNDS,
    MessagePart, MessageRole, ProviderEvent, ResponseFormat, StreamRequest, TOOL_EXECUTION_DELAY,
    TokenUsage, ToolChoice, ToolSpec, build_http_client,
};

#[derive(Clone)]
pub struct OpenAiProvider {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAiProvider {
    pub fn new(base_url: String, api_key: String) -> Result<Self> {
        Ok(Self {
            base_url,
            api_key,
            client: build_http_client()?,
        })
    }

    async fn post_chat(&self, body: &Value) -> Result<reqwest::Response> {
        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(AgentError::Provider {
                status: status.as_u16(),
                message: short_error(&message),
            });
        }
        Ok(response)
    }

    fn stream_body(
        &self,
        request: &StreamRequest,
        wire_messages: &[WireMessage],
        first_round: bool,
    ) -> Value {
        let mut body = json!({
            "model": request.params.model,
            "messages": wire_messages,
            "max_tokens": request.params.max_tokens,
            "temperature": request.params.temperature,
            "top_p": request.params.top_p,
            "stream": true,
            "stream_options": { "include_usage": true },
        });
        if !request.tools.is_empty()
            && let Some(map) = body.as_object_mut()
        {
            map.insert("tools".into(), wire_tools(&request.tools));
            // A required choice only binds the first round; keeping it would
            // force a tool call after every result, which never terminates.
            let choice = if first_round {
                request.tool_choice
            } else {
                ToolChoice::Auto
            };
            map.insert(
                "tool_choice".into(),
                Value::String(
                    match choice {
                        ToolChoice::Auto => "auto",
                        ToolChoice::Required => "required",
                    }
                    .into(),
                ),
            );
        }
        body
    }

    async fn drive_turn(
        &self,
        request: StreamRequest,
        mut wire_messages: Vec<WireMessage>,
        first_response: reqwest::Response,
        tx: &mpsc::Sender<ProviderEvent>,
    ) -> Result<()> {
        let mut snapshot = String::new();
        let mut usage_total = TokenUsage::default();
        let mut saw_usage = false;
        let mut response = first_response;

        for round in 0..MAX_TOOL_ROUNDS {
            let outcome = read_stream_round(response, &mut snapshot, tx).await?;
            if let Some(usage) = outcome.usage {
                usage_total.prompt_tokens += usage.prompt_tokens;
                usage_total.completion_tokens += usage.completion_tokens;
                saw_usage = true;
            }
            if !outcome.round_text.is_empty() {
                let _ = tx
                    .send(ProviderEvent::Message {
                        text: outcome.round_text.clone(),
                    })
                    .await;
            }
            if outcome.tool_calls.is_empty() {
                break;
            }
            if round + 1 == MAX_TOOL_ROUNDS {
                warn!("tool round limit ({MAX_TOOL_ROUNDS}) reached, ending turn");
                break;
            }

            wire_messages.push(assistant_call_message(&outcome.round_text, &outcome.tool_calls));
            for call in &outcome.tool_calls {
                if tx
                    .send(ProviderEvent::FunctionCall {
                        name: call.name.clone(),
                        arguments: call.arguments.clone(),
                    })
                    .await
                    .is_err()
                {
                    return Ok(());
                }
                tokio::time::sleep(TOOL_EXECUTION_DELAY).await;
                let payload = request.dispatcher.dispatch(&call.name, &call.arguments).await;
                if tx
                    .send(ProviderEvent::FunctionCallResult {
                        payload: payload.clone(),
                    })
                    .await
                    .is_err()
                {
                    return Ok(());
                }
                wire_messages.push(WireMessage {
                    role: "tool",
                    content: Some(Value::String(payload)),
                    tool_calls: None,
                    tool_call_id: Some(call.id.clone()),
                });
            }

            let body = self.stream_body(&request, &wire_messages, false);
            response = self.post_chat(&body).await?;
        }

        if saw_usage {
            let _ = tx.send(ProviderEvent::Usage(usage_total)).await;
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl LlmProvider for OpenAiProvider {
    async fn stream_with_tools(&self, request: StreamRequest) -> Result<EventStream> {
        let wire_messages = to_wire_messages(&request.messages);
        let body = self.stream_body(&request, &wire_messages, true);
        let first_response = self.post_chat(&body).await?;

        let (tx, rx) = mpsc::channel(64);
        let provider = self.clone();
        tokio::spawn(async move {
            let _ = tx.send(ProviderEvent::Connect).await;
            match provider
                .drive_turn(request, wire_messages, first_response, &tx)
                .await
            {
                Ok(()) => {
                    let _ = tx.send(ProviderEvent::End).await;
                }
                Err(err) => {
                    let _ = tx
                        .send(ProviderEvent::Error {
                            message: err.to_string(),
                        })
                        .await;
                }
            }
        });
        Ok(ReceiverStream::new(rx))
    }

    async fn complete(&self, request: CompleteRequest) -> Result<Completion> {
        let wire_messages = to_wire_messages(&request.messages);
        let mut body = json!({
            "model": request.params.model,
            "messages": wire_messages,
            "max_tokens": request.params.max_tokens,
            "temperature": request.params.temperature,
            "top_p": request.params.top_p,
            "n": request.n,
        });
        if request.response_format == ResponseFormat::Json
            && let Some(map) = body.as_object_mut()
        {
            map.insert("response_format".into(), json!({ "type": "json_object" }));
        }
        let response = self.post_chat(&body).await?;
        let parsed: CompletionResponse = response.json().await?;
        Ok(Completion {
            choices: parsed
                .choices
                .into_iter()
                .map(|c| c.message.content.unwrap_or_default())
                .collect(),
            usage: parsed.usage.map(TokenUsage::from),
        })
    }
}

#[derive(Clone, serde::Serialize)]
struct WireMessage {
    role: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<WireToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Clone, serde::Serialize)]
struct WireToolCall {
    id: String,
    #[serde(rename = "type")]
    kind: &'static str,
    function: WireFunction,
}

#[derive(Clone, serde::Serialize)]
struct WireFunction {
    name: String,
    arguments: String,
}

fn to_wire_messages(messages: &[ChatMessage]) -> Vec<WireMessage> {
    messages
        .iter()
        .map(|msg| {
            let role = match msg.role {
                MessageRole::System => "system",
                MessageRole::User => "user",
                MessageRole::Assistant => "assistant",
            };
            let content = if msg.has_image() {
                let parts: Vec<Value> = msg
                    .parts
                    .iter()
                    .map(|part| match part {
                        MessagePart::Text(text) => json!({ "type": "text", "text": text }),
                        MessagePart::Image { data, detail_high } => json!({
                            "type": "image_url",
                            "image_url": {
                                "url": data,
                                "detail": if *detail_high { "high" } else { "auto" },
                            },
                        }),
                    })
                    .collect();
                Value::Array(parts)
            } else {
                Value::String(msg.joined_text())
            };
            WireMessage {
                role,
                content: Some(content),
                tool_calls: None,
                tool_call_id: None,
            }
        })
        .collect()
}

fn wire_tools(tools: &[ToolSpec]) -> Value {
    Value::Array(
        tools
            .iter()
            .map(|tool| {
                json!({
                    "type": "function",
                    "function": {
                        "name": tool.name,
                        "description": tool.description,
                        "parameters": tool.parameters,
                    },
                })
            })
            .collect(),
    )
}

fn assistant_call_message(text: &str, calls: &[CompletedToolCall]) -> WireMessage {
    WireMessage {
        role: "assistant",
        content: if text.is_empty() {
            None
        } else {
            Some(Value::String(text.to_string()))
        },
        tool_calls: Some(
            calls
                .iter()
                .map(|call| WireToolCall {
                    id: call.id.clone(),
                    kind: "function",
                    function: WireFunction {
                        name: call.name.clone(),
                        arguments: call.arguments.clone(),
                    },
                })
                .collect(),
        ),
        tool_call_id: None,
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
struct CompletedToolCall {
    id: String,
    name: String,
    arguments: String,
}

#[derive(Debug)]
struct RoundOutcome {
    round_text: String,
    tool_calls: Vec<CompletedToolCall>,
    usage: Option<TokenUsage>,
}

/// Consumes one SSE response. Content deltas go out as events while
/// tool-call fragments accumulate; the finished calls are returned for the
/// follow-up request. A dropped consumer quietly ends the read.
async fn read_stream_round(
    response: reqwest::Response,
    snapshot: &mut String,
    tx: &mpsc::Sender<ProviderEvent>,
) -> Result<RoundOutcome> {
    use tokio::io::AsyncBufReadExt;
    use tokio_stream::StreamExt;

    let stream = response.bytes_stream();
    let mut reader =
        tokio_util::io::StreamReader::new(stream.map(|r| r.map_err(std::io::Error::other)));
    let mut buf_reader = tokio::io::BufReader::new(&mut reader);
    let mut line_buf = String::new();

    let mut round_text = String::new();
    let mut usage = None;
    let mut pending: Vec<CompletedToolCall> = Vec::new();

    loop {
        line_buf.clear();
        match buf_reader.read_line(&mut line_buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = line_buf.trim();
                if line.is_empty() {
                    continue;
                }
                let Some(data) = line.strip_prefix("data:") else {
                    continue;
                };
                let data = data.trim();
                if data == "[DONE]" {
                    break;
                }
                let Ok(chunk) = serde_json::from_str::<StreamChunk>(data) else {
                    debug!("skipping unparseable stream chunk");
                    continue;
                };
                if let Some(wire) = chunk.usage {
                    usage = Some(TokenUsage::from(wire));
                }
                for choice in chunk.choices {
                    if let Some(content) = choice.delta.content
                        && !content.is_empty()
                    {
                        snapshot.push_str(&content);
                        round_text.push_str(&content);
                        let sent = tx
                            .send(ProviderEvent::ContentDelta {
                                delta: content,
                                snapshot: snapshot.clone(),
                            })
                            .await;
                        if sent.is_err() {
                            return Ok(RoundOutcome {
                                round_text,
                                tool_calls: Vec::new(),
                                usage,
                            });
                        }
                    }
                    for fragment in choice.delta.tool_calls.unwrap_or_default() {
                        merge_tool_call_fragment(&mut pending, fragment);
                    }
                }
            }
            Err(err) => return Err(AgentError::Transport(format!("stream read: {err}"))),
        }
    }

    pending.retain(|call| !call.name.is_empty());
    Ok(RoundOutcome {
        round_text,
        tool_calls: pending,
        usage,
    })
}

/// Tool calls stream as fragments keyed by choice index: the id and name
/// arrive once, the argument string in pieces.
fn merge_tool_call_fragment(pending: &mut Vec<CompletedToolCall>, fragment: ToolCallDelta) {
    if pending.len() <= fragment.index {
        pending.resize_with(fragment.index + 1, Default::default);
    }
    let slot = &mut pending[fragment.index];
    if let Some(id) = fragment.id {
        slot.id = id;
    }
    if let Some(function) = fragment.function {
        if let Some(name) = function.name {
            slot.name.push_str(&name);
        }
        if let Some(arguments) = function.arguments {
            slot.arguments.push_str(&arguments);
        }
    }
}

fn short_error(body: &str) -> String {
    let trimmed: String = body.chars().take(300).collect();
    if trimmed.len() < body.len() {
        format!("{trimmed}...")
    } else {
        trimmed
    }
}

#[derive(Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
}

#[derive(Default, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ToolCallDelta>>,
}

#[derive(Deserialize)]
struct ToolCallDelta {
    index: usize,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<FunctionDelta>,
}

#[derive(Default, Deserialize)]
struct FunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

#[derive(Clone, Copy, Deserialize)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

impl From<WireUsage> for TokenUsage {
    fn from(wire: WireUsage) -> Self {
        Self {
            prompt_tokens: wire.prompt_tokens,
            completion_tokens: wire.completion_tokens,
        }
    }
}

#[derive(Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Deserialize)]
struct CompletionMessage {
    #[serde(default)]
    content: Option<String>,
}
