//! Conversation engine.
//!
//! One user message becomes one engine turn: resolve the current settings,
//! optionally let the selector adjust the tool set, pick a model, send the
//! trailing slice of the log, and stream the reply into a placeholder turn
//! that exists before the first byte arrives. Tool execution happens inside
//! the provider adapter; this module only narrates it into the placeholder
//! and watches for the one tool whose real work cannot happen mid-stream:
//! the screen capture, which is flushed as a single follow-up turn after
//! the reply finishes.
//!
//! Turns are strictly serial. A second chat while one is streaming is
//! refused with [`AgentError::Busy`]; macro steps instead queue up behind
//! the gate.

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::sync::Mutex as AsyncMutex;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::core::chat::{
    ChatContent, ChatTurn, DONE_MARKER, ImageContent, LOADING_MARKER, SAVE_MARKER, TurnRole,
    prettify_tool_name,
};
use crate::core::config::{RuntimeSettings, Settings, SettingsStore};
use crate::core::error::{AgentError, Result};
use crate::core::llm::{
    ChatMessage, LlmProvider, MessagePart, MessageRole, ProviderEvent, SamplingParams,
    StreamRequest, TokenUsage, ToolChoice, make_provider,
};
use crate::core::selector::ToolSelector;
use crate::core::store::activation::ToolActivationStore;
use crate::core::store::conversation::ConversationStore;
use crate::core::store::usage::UsageLedger;
use crate::core::suggestion::SuggestionAgent;
use crate::core::throttle::{ThrottledWriter, TurnSink, WRITE_INTERVAL};
use crate::tools::ToolRegistry;
use crate::tools::bridge::BrowserBridge;
use crate::tools::catalog::ANY_CALL;
use crate::tools::screen::CAPTURE_REQUEST;

/// Turns the selector and the suggestion agent get to read.
const SELECTION_WINDOW: usize = 10;

/// Below this many active tools a turn without images may run on the
/// economy model.
const ECONOMY_TOOL_THRESHOLD: usize = 5;

/// What one streamed turn produced.
#[derive(Debug, Clone)]
pub struct TurnReport {
    pub text: String,
    /// The model asked for a screenshot; the caller decides when to take it.
    pub capture_requested: bool,
}

/// Per-turn behavior switches.
struct TurnOptions {
    /// Exact tool names to offer, or `None` for the activation store's set.
    tool_names: Option<Vec<String>>,
    run_selection: bool,
    allow_capture: bool,
    allow_downgrade: bool,
    tool_choice: ToolChoice,
}

impl TurnOptions {
    fn conversational(settings: &Settings) -> Self {
        Self {
            tool_names: None,
            run_selection: settings.runtime.auto_tool_selection,
            allow_capture: true,
            allow_downgrade: true,
            tool_choice: ToolChoice::Auto,
        }
    }

    /// The turn that delivers a requested screenshot. No selection and no
    /// further captures, so one request cannot chain into a second.
    fn capture_follow_up() -> Self {
        Self {
            tool_names: None,
            run_selection: false,
            allow_capture: false,
            allow_downgrade: true,
            tool_choice: ToolChoice::Auto,
        }
    }

    fn scripted(tools: Vec<String>) -> Self {
        let tool_choice = if tools.is_empty() {
            ToolChoice::Auto
        } else {
            ToolChoice::Required
        };
        Self {
            tool_names: Some(tools),
            run_selection: false,
            allow_capture: true,
            allow_downgrade: false,
            tool_choice,
        }
    }
}

pub struct Orchestrator {
    settings: Arc<SettingsStore>,
    conversation: Arc<ConversationStore>,
    activation: Arc<ToolActivationStore>,
    ledger: Arc<UsageLedger>,
    registry: Arc<ToolRegistry>,
    bridge: Arc<dyn BrowserBridge>,
    selector: ToolSelector,
    suggestion: SuggestionAgent,
    turn_gate: AsyncMutex<()>,
    cancel: Mutex<Option<CancellationToken>>,
}

impl Orchestrator {
    pub fn new(
        settings: Arc<SettingsStore>,
        conversation: Arc<ConversationStore>,
        activation: Arc<ToolActivationStore>,
        ledger: Arc<UsageLedger>,
        registry: Arc<ToolRegistry>,
        bridge: Arc<dyn BrowserBridge>,
    ) -> Self {
        let selector = ToolSelector::new(activation.clone(), ledger.clone());
        let suggestion = SuggestionAgent::new(ledger.clone());
        Self {
            settings,
            conversation,
            activation,
            ledger,
            registry,
            bridge,
            selector,
            suggestion,
            turn_gate: AsyncMutex::new(()),
            cancel: Mutex::new(None),
        }
    }

    /// Handles one incoming chat message end to end: the reply turn, plus
    /// at most one capture follow-up turn if the model asked for a
    /// screenshot.
    pub async fn converse(&self, content: ChatContent) -> Result<()> {
        let _gate = self.turn_gate.try_lock().map_err(|_| AgentError::Busy)?;
        let settings = self.settings.get();
        let provider = make_provider(&settings)?;

        let mut content = content;
        if settings.runtime.auto_capture && content.image.is_none() {
            match self.capture_screen().await {
                Ok(capture) => content.image = capture.image,
                Err(err) => warn!("auto capture failed: {err}"),
            }
        }
        self.conversation.append_user_turn(content).await;

        let report = self
            .run_turn(
                provider.as_ref(),
                &settings,
                TurnOptions::conversational(&settings),
            )
            .await?;

        if report.capture_requested {
            match self.capture_screen().await {
                Ok(capture) => {
                    self.conversation.append_user_turn(capture).await;
                    self.run_turn(
                        provider.as_ref(),
                        &settings,
                        TurnOptions::capture_follow_up(),
                    )
                    .await?;
                }
                Err(err) => warn!("screen capture failed: {err}"),
            }
        }
        Ok(())
    }

    /// One macro step: append the step prompt as a user turn and stream the
    /// reply with exactly the given tools. Waits for an in-flight chat turn
    /// instead of refusing.
    pub async fn scripted_turn(&self, prompt: &str, tools: Vec<String>) -> Result<TurnReport> {
        let _gate = self.turn_gate.lock().await;
        let settings = self.settings.get();
        let provider = make_provider(&settings)?;
        self.conversation
            .append_user_turn(ChatContent::from_text(prompt))
            .await;
        self.run_turn(provider.as_ref(), &settings, TurnOptions::scripted(tools))
            .await
    }

    /// Cancels the turn currently streaming, if any. The placeholder keeps
    /// whatever was last written; its spinner is removed by the turn loop.
    pub async fn stop(&self) {
        let token = self
            .cancel
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(token) = token {
            info!("stopping the in-flight turn");
            token.cancel();
        }
    }

    /// Asks the model what the user might say next. Read-only; runs fine
    /// while a turn streams.
    pub async fn suggest_next_message(&self) -> Result<String> {
        let settings = self.settings.get();
        let provider = make_provider(&settings)?;
        let recent = clip_history(self.conversation.turns(), SELECTION_WINDOW);
        self.suggestion
            .suggest(provider.as_ref(), &settings, &render_transcript(&recent))
            .await
    }

    /// Grabs a frame of the visible tab through the extension.
    pub async fn capture_screen(&self) -> anyhow::Result<ChatContent> {
        let settings = self.settings.get();
        let reply = self
            .bridge
            .request(
                "captureVisibleTab",
                json!({
                    "format": "jpeg",
                    "quality": settings.runtime.capture_quality,
                }),
            )
            .await?;
        let data = reply
            .get("dataUrl")
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow::anyhow!("capture reply has no dataUrl"))?;
        Ok(ChatContent {
            text: None,
            image: Some(ImageContent {
                data: data.to_string(),
                width: reply.get("width").and_then(Value::as_u64).map(|v| v as u32),
                height: reply
                    .get("height")
                    .and_then(Value::as_u64)
                    .map(|v| v as u32),
                size_kb: None,
            }),
        })
    }

    async fn run_turn(
        &self,
        provider: &dyn LlmProvider,
        settings: &Settings,
        options: TurnOptions,
    ) -> Result<TurnReport> {
        if options.run_selection {
            let recent = clip_history(self.conversation.turns(), SELECTION_WINDOW);
            let outcome = self
                .selector
                .run(provider, settings, &render_transcript(&recent))
                .await;
            debug!("tool selection: {outcome:?}");
        }

        let offered = match &options.tool_names {
            Some(names) => names.clone(),
            None => self.activation.activated_names(),
        };
        let history = clip_history(self.conversation.turns(), settings.runtime.forget_chat_after);
        let model = if options.allow_downgrade {
            choose_model(settings, &history, offered.len())
        } else {
            settings.llm.model.clone()
        };

        let mut messages = vec![ChatMessage::system(settings.llm.system_prompt.clone())];
        messages.extend(history_to_messages(history, &settings.runtime));
        let specs = self.registry.specs_for(&offered);
        let tool_choice = if specs.is_empty() {
            ToolChoice::Auto
        } else {
            options.tool_choice
        };

        // The placeholder exists before the request goes out, so the panel
        // has something to spin on and errors have somewhere to land.
        let turn_id = self.conversation.start_assistant_turn().await;
        let token = CancellationToken::new();
        self.set_cancel(token.clone());

        let request = StreamRequest {
            messages,
            params: SamplingParams {
                model: model.clone(),
                max_tokens: settings.llm.max_tokens,
                temperature: settings.llm.temperature,
                top_p: settings.llm.top_p,
            },
            tools: specs,
            tool_choice,
            dispatcher: self.registry.clone(),
        };
        let mut stream = match provider.stream_with_tools(request).await {
            Ok(stream) => stream,
            Err(err) => {
                self.clear_cancel();
                self.conversation.strip_loading_markers().await;
                return Err(err);
            }
        };

        let sink: Arc<dyn TurnSink> = Arc::new(StoreSink {
            store: self.conversation.clone(),
            turn_id,
        });
        let mut writer = ThrottledWriter::new(sink, WRITE_INTERVAL);
        let mut text = String::new();
        let mut capture_requested = false;
        let mut usage: Option<TokenUsage> = None;
        let mut failure: Option<String> = None;
        let mut canceled = false;

        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    canceled = true;
                    break;
                }
                event = stream.next() => {
                    let Some(event) = event else { break };
                    match event {
                        ProviderEvent::Connect => debug!("stream up for turn {turn_id}"),
                        ProviderEvent::ContentDelta { delta, .. } => {
                            text.push_str(&delta);
                            writer.push(with_loading(&text)).await;
                        }
                        ProviderEvent::FunctionCall { name, arguments } => {
                            let shown = called_tool_name(&name, &arguments);
                            if options.allow_capture && shown == CAPTURE_REQUEST {
                                capture_requested = true;
                            }
                            text = call_status_line(&text, &shown);
                            writer.write_now(with_loading(&text)).await;
                        }
                        ProviderEvent::FunctionCallResult { payload } => {
                            debug!("tool result for turn {turn_id}: {payload}");
                        }
                        ProviderEvent::Message { .. } => {}
                        ProviderEvent::Usage(u) => usage = Some(u),
                        ProviderEvent::Error { message } => {
                            failure = Some(message);
                            break;
                        }
                        ProviderEvent::End => break,
                    }
                }
            }
        }
        self.clear_cancel();

        if canceled {
            // Dropping the stream hangs up the adapter's send side.
            drop(stream);
            self.conversation.strip_loading_markers().await;
            return Err(AgentError::Canceled);
        }
        if let Some(message) = failure {
            self.conversation.strip_loading_markers().await;
            return Err(AgentError::Transport(message));
        }

        writer.write_now(text.clone()).await;
        if let Some(usage) = usage {
            self.ledger
                .add_input_tokens(usage.prompt_tokens, &model)
                .await;
            self.ledger
                .add_output_tokens(usage.completion_tokens, &model)
                .await;
        }
        Ok(TurnReport {
            text,
            capture_requested,
        })
    }

    fn set_cancel(&self, token: CancellationToken) {
        *self.cancel.lock().unwrap_or_else(PoisonError::into_inner) = Some(token);
    }

    fn clear_cancel(&self) {
        self.cancel
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }
}

/// Writes the evolving turn text back into the log by id.
struct StoreSink {
    store: Arc<ConversationStore>,
    turn_id: u64,
}

#[async_trait]
impl TurnSink for StoreSink {
    async fn write(&self, text: String) {
        self.store.update_turn(self.turn_id, text).await;
    }
}

fn with_loading(text: &str) -> String {
    format!("{text}{LOADING_MARKER}")
}

/// Status line shown while a tool call runs, e.g. `Tab Group ...`.
fn call_status_line(current: &str, tool_name: &str) -> String {
    let pretty = prettify_tool_name(tool_name);
    if current.is_empty() {
        format!("{pretty} ...\n")
    } else {
        format!("{current}\n\n{pretty} ...\n")
    }
}

/// The name to narrate: `any_call` is unwrapped to the tool it forwards to.
fn called_tool_name(name: &str, arguments: &str) -> String {
    if name == ANY_CALL
        && let Ok(value) = serde_json::from_str::<Value>(arguments)
        && let Some(inner) = value.get("toolName").and_then(Value::as_str)
    {
        return inner.to_string();
    }
    name.to_string()
}

/// Trailing `keep` turns. At least one turn always goes out, or the model
/// would see nothing at all.
fn clip_history(mut turns: Vec<ChatTurn>, keep: usize) -> Vec<ChatTurn> {
    let keep = keep.max(1);
    if turns.len() > keep {
        turns.split_off(turns.len() - keep)
    } else {
        turns
    }
}

/// Drops every image except the newest. A turn reduced to nothing keeps a
/// stub line so the model still knows an image was there.
fn prune_old_images(mut turns: Vec<ChatTurn>) -> Vec<ChatTurn> {
    let Some(latest) = turns.iter().rposition(|t| t.content.image.is_some()) else {
        return turns;
    };
    for (i, turn) in turns.iter_mut().enumerate() {
        if i == latest {
            continue;
        }
        if turn.content.image.take().is_some() && turn.content.text_or_empty().is_empty() {
            turn.content.text = Some("This is an image.".to_string());
        }
    }
    turns
}

/// Panel markers are for the panel; the model never sees them.
fn wire_text(text: &str) -> String {
    let mut out = text.replace(LOADING_MARKER, "").replace(DONE_MARKER, "");
    while let Some(idx) = out.find(SAVE_MARKER) {
        let tail = out[idx + SAVE_MARKER.len()..]
            .find(char::is_whitespace)
            .map(|off| idx + SAVE_MARKER.len() + off)
            .unwrap_or(out.len());
        out.replace_range(idx..tail, "");
    }
    out.trim().to_string()
}

fn history_to_messages(turns: Vec<ChatTurn>, runtime: &RuntimeSettings) -> Vec<ChatMessage> {
    let turns = if runtime.use_latest_image {
        prune_old_images(turns)
    } else {
        turns
    };
    let mut messages = Vec::with_capacity(turns.len());
    for turn in turns {
        let role = match turn.role {
            TurnRole::User => MessageRole::User,
            TurnRole::Assistant => MessageRole::Assistant,
        };
        let mut parts = Vec::new();
        let text = wire_text(turn.content.text_or_empty());
        if !text.is_empty() {
            parts.push(MessagePart::Text(text));
        }
        if let Some(image) = turn.content.image {
            if let (Some(w), Some(h)) = (image.width, image.height) {
                parts.push(MessagePart::Text(format!("The image is {w}x{h}.")));
            }
            parts.push(MessagePart::Image {
                data: image.data,
                detail_high: runtime.detail_analyze_image,
            });
        }
        if parts.is_empty() {
            continue;
        }
        messages.push(ChatMessage { role, parts });
    }
    messages
}

fn choose_model(settings: &Settings, history: &[ChatTurn], active_tools: usize) -> String {
    if settings.runtime.auto_select_model
        && active_tools < ECONOMY_TOOL_THRESHOLD
        && !history.iter().any(|t| t.content.image.is_some())
    {
        settings.llm.economy_model.clone()
    } else {
        settings.llm.model.clone()
    }
}

fn render_transcript(turns: &[ChatTurn]) -> String {
    turns
        .iter()
        .map(|turn| {
            let who = match turn.role {
                TurnRole::User => "user",
                TurnRole::Assistant => "assistant",
            };
            format!("{who}: {}", wire_text(turn.content.text_or_empty()))
        })
        .collect::<Vec<_>>()
        .join("\n")
}
