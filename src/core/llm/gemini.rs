//! Gemini-compatible chat adapter.
//!
//! Same event contract as the OpenAI adapter, different wire. The quirks
//! all live here: assistant turns become `model` role, leading system
//! messages fold into `systemInstruction`, consecutive same-role messages
//! merge (the API rejects runs), a history that opens with a model turn
//! loses it, and tool schemas are stripped of JSON-Schema keys the API
//! refuses. Auth rides as a `key` query parameter.

use serde::{Deserialize, Serialize};
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
pub struct GeminiProvider {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl GeminiProvider {
    pub fn new(base_url: String, api_key: String) -> Result<Self> {
        Ok(Self {
            base_url,
            api_key,
            client: build_http_client()?,
        })
    }

    fn url(&self, model: &str, method: &str) -> String {
        format!(
            "{}/models/{}:{}?key={}",
            self.base_url, model, method, self.api_key
        )
    }

    fn stream_url(&self, model: &str) -> String {
        format!(
            "{}/models/{}:streamGenerateContent?alt=sse&key={}",
            self.base_url, model, self.api_key
        )
    }

    async fn post_json(&self, url: String, body: &Value) -> Result<reqwest::Response> {
        let response = self.client.post(url).json(body).send().await?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            let trimmed: String = message.chars().take(300).collect();
            return Err(AgentError::Provider {
                status: status.as_u16(),
                message: trimmed,
            });
        }
        Ok(response)
    }

    fn stream_body(
        &self,
        system: &Option<String>,
        contents: &[GContent],
        request: &StreamRequest,
        first_round: bool,
    ) -> Value {
        let mut body = json!({
            "contents": contents,
            "generationConfig": {
                "temperature": request.params.temperature,
                "topP": request.params.top_p,
                "maxOutputTokens": request.params.max_tokens,
            },
        });
        let Some(map) = body.as_object_mut() else {
            return body;
        };
        if let Some(text) = system {
            map.insert(
                "systemInstruction".into(),
                json!({ "parts": [{ "text": text }] }),
            );
        }
        if !request.tools.is_empty() {
            map.insert(
                "tools".into(),
                json!([{ "functionDeclarations": function_declarations(&request.tools) }]),
            );
            // ANY mode only binds the first round; kept on, the model must
            // call a function after every result and the loop never ends.
            let config = if first_round && request.tool_choice == ToolChoice::Required {
                json!({
                    "mode": "ANY",
                    "allowedFunctionNames":
                        request.tools.iter().map(|t| t.name.clone()).collect::<Vec<_>>(),
                })
            } else {
                json!({ "mode": "AUTO" })
            };
            map.insert(
                "toolConfig".into(),
                json!({ "functionCallingConfig": config }),
            );
        }
        body
    }

    async fn drive_turn(
        &self,
        request: StreamRequest,
        system: Option<String>,
        mut contents: Vec<GContent>,
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
            if outcome.calls.is_empty() {
                break;
            }
            if round + 1 == MAX_TOOL_ROUNDS {
                warn!("tool round limit ({MAX_TOOL_ROUNDS}) reached, ending turn");
                break;
            }

            let mut model_parts = Vec::new();
            if !outcome.round_text.is_empty() {
                model_parts.push(GPart::text(outcome.round_text.clone()));
            }
            model_parts.extend(outcome.calls.iter().cloned().map(|call| GPart {
                function_call: Some(call),
                ..Default::default()
            }));
            contents.push(GContent {
                role: "model".into(),
                parts: model_parts,
            });

            let mut response_parts = Vec::new();
            for call in &outcome.calls {
                let arguments = call.args.to_string();
                if tx
                    .send(ProviderEvent::FunctionCall {
                        name: call.name.clone(),
                        arguments: arguments.clone(),
                    })
                    .await
                    .is_err()
                {
                    return Ok(());
                }
                tokio::time::sleep(TOOL_EXECUTION_DELAY).await;
                let payload = request.dispatcher.dispatch(&call.name, &arguments).await;
                if tx
                    .send(ProviderEvent::FunctionCallResult {
                        payload: payload.clone(),
                    })
                    .await
                    .is_err()
                {
                    return Ok(());
                }
                response_parts.push(GPart {
                    function_response: Some(GFunctionResponse {
                        name: call.name.clone(),
                        response: wrap_function_response(&payload),
                    }),
                    ..Default::default()
                });
            }
            contents.push(GContent {
                role: "user".into(),
                parts: response_parts,
            });

            let body = self.stream_body(&system, &contents, &request, false);
            response = self
                .post_json(self.stream_url(&request.params.model), &body)
                .await?;
        }

        if saw_usage {
            let _ = tx.send(ProviderEvent::Usage(usage_total)).await;
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl LlmProvider for GeminiProvider {
    async fn stream_with_tools(&self, request: StreamRequest) -> Result<EventStream> {
        let (system, contents) = to_gemini_contents(&request.messages);
        let body = self.stream_body(&system, &contents, &request, true);
        let first_response = self
            .post_json(self.stream_url(&request.params.model), &body)
            .await?;

        let (tx, rx) = mpsc::channel(64);
        let provider = self.clone();
        tokio::spawn(async move {
            let _ = tx.send(ProviderEvent::Connect).await;
            match provider
                .drive_turn(request, system, contents, first_response, &tx)
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
        let (system, contents) = to_gemini_contents(&request.messages);
        let mut generation = json!({
            "temperature": request.params.temperature,
            "topP": request.params.top_p,
            "maxOutputTokens": request.params.max_tokens,
            "candidateCount": request.n,
        });
        if request.response_format == ResponseFormat::Json
            && let Some(map) = generation.as_object_mut()
        {
            map.insert(
                "responseMimeType".into(),
                Value::String("application/json".into()),
            );
        }
        let mut body = json!({ "contents": contents, "generationConfig": generation });
        if let Some(text) = &system
            && let Some(map) = body.as_object_mut()
        {
            map.insert(
                "systemInstruction".into(),
                json!({ "parts": [{ "text": text }] }),
            );
        }
        let response = self
            .post_json(self.url(&request.params.model, "generateContent"), &body)
            .await?;
        let parsed: GenerateResponse = response.json().await?;
        Ok(Completion {
            choices: parsed
                .candidates
                .into_iter()
                .map(|candidate| candidate_text(&candidate))
                .collect(),
            usage: parsed.usage_metadata.map(TokenUsage::from),
        })
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GContent {
    #[serde(default)]
    role: String,
    #[serde(default)]
    parts: Vec<GPart>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GPart {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    inline_data: Option<GInlineData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    function_call: Option<GFunctionCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    function_response: Option<GFunctionResponse>,
}

impl GPart {
    fn text(text: impl Into<String>) -> Self {
        GPart {
            text: Some(text.into()),
            ..Default::default()
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GInlineData {
    mime_type: String,
    data: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
struct GFunctionCall {
    name: String,
    #[serde(default)]
    args: Value,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
struct GFunctionResponse {
    name: String,
    response: Value,
}

/// Splits leading system text off into `systemInstruction` and converts
/// the rest, merging consecutive same-role messages and dropping a
/// leading model turn.
fn to_gemini_contents(messages: &[ChatMessage]) -> (Option<String>, Vec<GContent>) {
    let mut system: Option<String> = None;
    let mut contents: Vec<GContent> = Vec::new();

    for msg in messages {
        match msg.role {
            MessageRole::System => {
                if contents.is_empty() {
                    let text = msg.joined_text();
                    match system.as_mut() {
                        Some(acc) => {
                            acc.push('\n');
                            acc.push_str(&text);
                        }
                        None => system = Some(text),
                    }
                } else {
                    // Mid-conversation system notes ride along as user text.
                    push_merged(
                        &mut contents,
                        "user",
                        vec![GPart::text(format!("[SYSTEM] {}", msg.joined_text()))],
                    );
                }
            }
            MessageRole::User => push_merged(&mut contents, "user", to_parts(msg)),
            MessageRole::Assistant => push_merged(&mut contents, "model", to_parts(msg)),
        }
    }

    if contents.first().is_some_and(|c| c.role == "model") {
        contents.remove(0);
    }
    (system, contents)
}

fn push_merged(contents: &mut Vec<GContent>, role: &str, parts: Vec<GPart>) {
    if let Some(last) = contents.last_mut()
        && last.role == role
    {
        last.parts.extend(parts);
        return;
    }
    contents.push(GContent {
        role: role.to_string(),
        parts,
    });
}

fn to_parts(msg: &ChatMessage) -> Vec<GPart> {
    msg.parts
        .iter()
        .map(|part| match part {
            MessagePart::Text(text) => GPart::text(text.clone()),
            MessagePart::Image { data, .. } => GPart {
                inline_data: Some(GInlineData {
                    mime_type: "image/jpeg".into(),
                    data: strip_data_url(data).to_string(),
                }),
                ..Default::default()
            },
        })
        .collect()
}

fn strip_data_url(data: &str) -> &str {
    match data.find("base64,") {
        Some(idx) => &data[idx + "base64,".len()..],
        None => data,
    }
}

fn function_declarations(tools: &[ToolSpec]) -> Value {
    Value::Array(
        tools
            .iter()
            .map(|tool| {
                json!({
                    "name": tool.name,
                    "description": tool.description,
                    "parameters": strip_schema_fields(&tool.parameters),
                })
            })
            .collect(),
    )
}

/// Removes JSON-Schema keys the function-declaration endpoint rejects.
fn strip_schema_fields(schema: &Value) -> Value {
    match schema {
        Value::Object(map) => Value::Object(
            map.iter()
                .filter(|(key, _)| {
                    !matches!(
                        key.as_str(),
                        "$schema" | "additionalProperties" | "default" | "examples"
                    )
                })
                .map(|(key, value)| (key.clone(), strip_schema_fields(value)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(strip_schema_fields).collect()),
        other => other.clone(),
    }
}

/// `functionResponse.response` must be an object; other payload shapes get
/// wrapped rather than rejected.
fn wrap_function_response(payload: &str) -> Value {
    match serde_json::from_str::<Value>(payload) {
        Ok(value) if value.is_object() => value,
        Ok(value) => json!({ "result": value }),
        Err(_) => json!({ "result": payload }),
    }
}

struct GRoundOutcome {
    round_text: String,
    calls: Vec<GFunctionCall>,
    usage: Option<TokenUsage>,
}

async fn read_stream_round(
    response: reqwest::Response,
    snapshot: &mut String,
    tx: &mpsc::Sender<ProviderEvent>,
) -> Result<GRoundOutcome> {
    use tokio::io::AsyncBufReadExt;
    use tokio_stream::StreamExt;

    let stream = response.bytes_stream();
    let mut reader =
        tokio_util::io::StreamReader::new(stream.map(|r| r.map_err(std::io::Error::other)));
    let mut buf_reader = tokio::io::BufReader::new(&mut reader);
    let mut line_buf = String::new();

    let mut round_text = String::new();
    let mut calls = Vec::new();
    let mut usage = None;

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
                let Ok(chunk) = serde_json::from_str::<GStreamChunk>(data.trim()) else {
                    debug!("skipping unparseable stream chunk");
                    continue;
                };
                if let Some(meta) = chunk.usage_metadata {
                    // Counts are running totals; the last chunk wins.
                    usage = Some(TokenUsage::from(meta));
                }
                for candidate in chunk.candidates {
                    let Some(content) = candidate.content else {
                        continue;
                    };
                    for part in content.parts {
                        if let Some(text) = part.text
                            && !text.is_empty()
                        {
                            snapshot.push_str(&text);
                            round_text.push_str(&text);
                            let sent = tx
                                .send(ProviderEvent::ContentDelta {
                                    delta: text,
                                    snapshot: snapshot.clone(),
                                })
                                .await;
                            if sent.is_err() {
                                return Ok(GRoundOutcome {
                                    round_text,
                                    calls: Vec::new(),
                                    usage,
                                });
                            }
                        }
                        if let Some(call) = part.function_call {
                            calls.push(call);
                        }
                    }
                }
            }
            Err(err) => return Err(AgentError::Transport(format!("stream read: {err}"))),
        }
    }

    Ok(GRoundOutcome {
        round_text,
        calls,
        usage,
    })
}

fn candidate_text(candidate: &GCandidate) -> String {
    let Some(content) = &candidate.content else {
        return String::new();
    };
    let mut out = String::new();
    for part in &content.parts {
        if let Some(text) = &part.text {
            out.push_str(text);
        }
    }
    out
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GStreamChunk {
    #[serde(default)]
    candidates: Vec<GCandidate>,
    #[serde(default)]
    usage_metadata: Option<GUsageMetadata>,
}

#[derive(Deserialize)]
struct GCandidate {
    #[serde(default)]
    content: Option<GContent>,
}

#[derive(Clone, Copy, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GUsageMetadata {
    #[serde(default)]
    prompt_token_count: u64,
    #[serde(default)]
    candidates_token_count: u64,
}

impl From<GUsageMetadata> for TokenUsage {
    fn from(meta: GUsageMetadata) -> Self {
        Self {
            prompt_tokens: meta.prompt_token_count,
            completion_tokens: meta.candidates_token_count,
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<GCandidate>,
    #[serde(default)]
    usage_metadata: Option<GUsageMetadata>,
}
