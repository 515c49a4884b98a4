//! HTTP API for the extension panel.
//!
//! Every mutable piece of daemon state the panel shows has a route here:
//! the conversation (with an SSE feed so the panel can render a streaming
//! turn live), tool activation flags, macro programs, the usage ledger,
//! and settings. Responses use a `{"success": ..}` envelope; errors carry
//! their text so the panel can show them verbatim.

use std::convert::Infallible;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::{Method, StatusCode},
    response::sse::{Event, Sse},
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio_stream::{Stream, StreamExt, wrappers::BroadcastStream, wrappers::WatchStream};
use tower_http::cors::{Any, CorsLayer};
use tracing::warn;

use super::{AppState, ws};
use crate::core::chat::ChatContent;
use crate::core::config::Settings;
use crate::core::error::AgentError;
use crate::core::llm::ProviderKind;
use crate::core::program_runner::MAIN_RUNNER;
use crate::core::store::program::ProgramStep;

/// Extension pages call from `chrome-extension://` origins, which cannot be
/// enumerated ahead of time, so the API answers any origin. It binds to
/// localhost; the network boundary is the bind address, not CORS.
fn build_extension_cors() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::DELETE,
            Method::PATCH,
            Method::OPTIONS,
        ])
        .allow_headers(Any)
}

pub(crate) fn build_api_router(state: AppState) -> Router {
    Router::new()
        .route("/api/chat", post(chat_endpoint))
        .route("/api/chat/stop", post(stop_endpoint))
        .route("/api/suggest", post(suggest_endpoint))
        .route(
            "/api/conversation",
            get(get_conversation).delete(clear_conversation),
        )
        .route("/api/conversation/events", get(conversation_events))
        .route(
            "/api/conversation/{id}",
            axum::routing::delete(delete_turn_endpoint),
        )
        .route("/api/tools", get(get_tools))
        .route("/api/tools/activate", post(activate_tool))
        .route("/api/tools/category", post(activate_category))
        .route("/api/usage", get(get_usage).delete(reset_usage))
        .route("/api/settings", get(get_settings).patch(patch_settings))
        .route("/api/programs", get(get_programs).post(create_program))
        .route(
            "/api/programs/{id}",
            axum::routing::delete(delete_program).patch(update_program),
        )
        .route("/api/programs/{id}/run", post(run_program))
        .route("/api/logs/events", get(log_events))
        .route("/bridge", get(ws::bridge_ws))
        .layer(build_extension_cors())
        .with_state(state)
}

// --- Chat ---

async fn chat_endpoint(
    State(state): State<AppState>,
    Json(content): Json<ChatContent>,
) -> (StatusCode, Json<Value>) {
    if content.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "success": false, "error": "message is empty" })),
        );
    }
    match state.orchestrator.converse(content).await {
        Ok(()) => (StatusCode::OK, Json(json!({ "success": true }))),
        Err(AgentError::Canceled) => (
            StatusCode::OK,
            Json(json!({ "success": true, "stopped": true })),
        ),
        Err(AgentError::Busy) => (
            StatusCode::CONFLICT,
            Json(json!({ "success": false, "error": AgentError::Busy.to_string() })),
        ),
        Err(err @ (AgentError::Transport(_) | AgentError::Provider { .. })) => {
            // The reply bubble shows the raw error where the answer would be.
            let text = err.to_string();
            state
                .conversation
                .update_last_assistant_turn(|prev| {
                    if prev.is_empty() {
                        text.clone()
                    } else {
                        format!("{prev}\n{text}")
                    }
                })
                .await;
            (
                StatusCode::BAD_GATEWAY,
                Json(json!({ "success": false, "error": err.to_string() })),
            )
        }
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "success": false, "error": err.to_string() })),
        ),
    }
}

async fn stop_endpoint(State(state): State<AppState>) -> Json<Value> {
    state.orchestrator.stop().await;
    Json(json!({ "success": true }))
}

async fn suggest_endpoint(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    match state.orchestrator.suggest_next_message().await {
        Ok(suggestion) => (
            StatusCode::OK,
            Json(json!({ "success": true, "suggestion": suggestion })),
        ),
        Err(err @ AgentError::Configuration(_)) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "success": false, "error": err.to_string() })),
        ),
        Err(err) => (
            StatusCode::BAD_GATEWAY,
            Json(json!({ "success": false, "error": err.to_string() })),
        ),
    }
}

// --- Conversation ---

async fn get_conversation(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "chats": state.conversation.turns() }))
}

async fn clear_conversation(State(state): State<AppState>) -> Json<Value> {
    state.conversation.reset().await;
    Json(json!({ "success": true }))
}

async fn delete_turn_endpoint(
    Path(id): Path<u64>,
    State(state): State<AppState>,
) -> Json<Value> {
    state.conversation.delete_turn(id).await;
    Json(json!({ "success": true }))
}

/// One SSE event per conversation change, carrying the whole log. The panel
/// rerenders from the snapshot instead of patching, which keeps a reconnect
/// and a delta the same code path.
async fn conversation_events(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream = WatchStream::new(state.conversation.subscribe()).map(|conversation| {
        let payload = serde_json::to_string(&conversation).unwrap_or_else(|_| "{}".to_string());
        Ok(Event::default().data(payload))
    });
    Sse::new(stream)
}

// --- Tools ---

async fn get_tools(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "tools": state.activation.all() }))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ActivateBody {
    name: String,
    is_activated: bool,
}

async fn activate_tool(
    State(state): State<AppState>,
    Json(body): Json<ActivateBody>,
) -> (StatusCode, Json<Value>) {
    if state.activation.set_active(&body.name, body.is_activated).await {
        (StatusCode::OK, Json(json!({ "success": true })))
    } else {
        (
            StatusCode::BAD_REQUEST,
            Json(json!({ "success": false, "error": format!("unknown tool {}", body.name) })),
        )
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CategoryBody {
    category: String,
    is_activated: bool,
}

async fn activate_category(
    State(state): State<AppState>,
    Json(body): Json<CategoryBody>,
) -> Json<Value> {
    state
        .activation
        .set_category_active(&body.category, body.is_activated)
        .await;
    Json(json!({ "success": true }))
}

// --- Usage ---

async fn get_usage(State(state): State<AppState>) -> Json<Value> {
    let record = state.ledger.get();
    let mut doc = serde_json::to_value(record).unwrap_or_else(|_| json!({}));
    if let Some(map) = doc.as_object_mut() {
        map.insert("totalPrice".into(), json!(record.total_price()));
    }
    Json(json!({ "usage": doc }))
}

async fn reset_usage(State(state): State<AppState>) -> Json<Value> {
    state.ledger.reset().await;
    Json(json!({ "success": true }))
}

// --- Settings ---

/// Settings as the panel may see them: the API key values never leave the
/// daemon, only whether they are set.
fn settings_doc(settings: &Settings) -> Value {
    let mut doc = serde_json::to_value(settings).unwrap_or_else(|_| json!({}));
    if let Some(providers) = doc.get_mut("providers").and_then(Value::as_object_mut) {
        providers.insert(
            "openai_api_key".into(),
            json!(settings.api_key_for(ProviderKind::OpenAi).is_some()),
        );
        providers.insert(
            "gemini_api_key".into(),
            json!(settings.api_key_for(ProviderKind::Gemini).is_some()),
        );
    }
    doc
}

async fn get_settings(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "settings": settings_doc(&state.settings.get()) }))
}

#[derive(Default, Deserialize)]
#[serde(default)]
struct SettingsPatch {
    llm: Option<LlmPatch>,
    runtime: Option<RuntimePatch>,
}

#[derive(Default, Deserialize)]
#[serde(default)]
struct LlmPatch {
    provider: Option<ProviderKind>,
    model: Option<String>,
    economy_model: Option<String>,
    system_prompt: Option<String>,
    max_tokens: Option<u32>,
    temperature: Option<f64>,
    top_p: Option<f64>,
}

#[derive(Default, Deserialize)]
#[serde(default)]
struct RuntimePatch {
    auto_capture: Option<bool>,
    auto_tool_selection: Option<bool>,
    auto_select_model: Option<bool>,
    detail_analyze_image: Option<bool>,
    use_latest_image: Option<bool>,
    capture_quality: Option<u8>,
    forget_chat_after: Option<usize>,
}

/// Field names match `config.toml`; absent fields stay untouched. Provider
/// endpoints and keys are deliberately not patchable over HTTP.
async fn patch_settings(
    State(state): State<AppState>,
    Json(patch): Json<SettingsPatch>,
) -> Json<Value> {
    let updated = state
        .settings
        .update(move |mut settings| {
            if let Some(llm) = patch.llm {
                let mut next = settings.llm;
                if let Some(v) = llm.provider {
                    next.provider = v;
                }
                if let Some(v) = llm.model {
                    next.model = v;
                }
                if let Some(v) = llm.economy_model {
                    next.economy_model = v;
                }
                if let Some(v) = llm.system_prompt {
                    next.system_prompt = v;
                }
                if let Some(v) = llm.max_tokens {
                    next.max_tokens = v;
                }
                if let Some(v) = llm.temperature {
                    next.temperature = v;
                }
                if let Some(v) = llm.top_p {
                    next.top_p = v;
                }
                settings.llm = next.clamped();
            }
            if let Some(runtime) = patch.runtime {
                let mut next = settings.runtime;
                if let Some(v) = runtime.auto_capture {
                    next.auto_capture = v;
                }
                if let Some(v) = runtime.auto_tool_selection {
                    next.auto_tool_selection = v;
                }
                if let Some(v) = runtime.auto_select_model {
                    next.auto_select_model = v;
                }
                if let Some(v) = runtime.detail_analyze_image {
                    next.detail_analyze_image = v;
                }
                if let Some(v) = runtime.use_latest_image {
                    next.use_latest_image = v;
                }
                if let Some(v) = runtime.capture_quality {
                    next.capture_quality = v.min(100);
                }
                if let Some(v) = runtime.forget_chat_after {
                    next.forget_chat_after = v;
                }
                settings.runtime = next;
            }
            settings
        })
        .await;
    Json(json!({ "success": true, "settings": settings_doc(&updated) }))
}

// --- Programs ---

async fn get_programs(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "programs": state.programs.programs(),
        "runner": state.programs.runner(MAIN_RUNNER),
    }))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StepBody {
    what_to_do: String,
    #[serde(default)]
    tools: Vec<String>,
}

#[derive(Deserialize)]
struct CreateProgramBody {
    name: String,
    steps: Vec<StepBody>,
}

fn to_steps(steps: Vec<StepBody>) -> Vec<ProgramStep> {
    steps
        .into_iter()
        .map(|step| ProgramStep::new(step.what_to_do, step.tools))
        .collect()
}

async fn create_program(
    State(state): State<AppState>,
    Json(body): Json<CreateProgramBody>,
) -> (StatusCode, Json<Value>) {
    if body.name.trim().is_empty() || body.steps.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({
                "success": false,
                "error": "a program needs a name and at least one step",
            })),
        );
    }
    let program = state.programs.create(body.name, to_steps(body.steps)).await;
    (
        StatusCode::OK,
        Json(json!({ "success": true, "program": program })),
    )
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProgramPatch {
    name: Option<String>,
    is_pinned: Option<bool>,
    steps: Option<Vec<StepBody>>,
}

async fn update_program(
    Path(id): Path<String>,
    State(state): State<AppState>,
    Json(patch): Json<ProgramPatch>,
) -> (StatusCode, Json<Value>) {
    let Some(mut program) = state.programs.get(&id) else {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({ "success": false, "error": format!("program {id} not found") })),
        );
    };
    if let Some(name) = patch.name {
        program.name = name;
    }
    if let Some(pinned) = patch.is_pinned {
        program.is_pinned = pinned;
    }
    if let Some(steps) = patch.steps {
        program.steps = to_steps(steps);
    }
    state.programs.upsert(program.clone()).await;
    (
        StatusCode::OK,
        Json(json!({ "success": true, "program": program })),
    )
}

async fn delete_program(
    Path(id): Path<String>,
    State(state): State<AppState>,
) -> (StatusCode, Json<Value>) {
    if state.programs.remove(&id).await {
        (StatusCode::OK, Json(json!({ "success": true })))
    } else {
        (
            StatusCode::NOT_FOUND,
            Json(json!({ "success": false, "error": format!("program {id} not found") })),
        )
    }
}

/// Kicks the run off and returns; the panel follows progress through the
/// conversation feed and the runner status in `GET /api/programs`.
async fn run_program(
    Path(id): Path<String>,
    State(state): State<AppState>,
) -> (StatusCode, Json<Value>) {
    if state.programs.get(&id).is_none() {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({ "success": false, "error": format!("program {id} not found") })),
        );
    }
    let runner = state.runner.clone();
    tokio::spawn(async move {
        if let Err(err) = runner.run(MAIN_RUNNER, &id).await {
            warn!("program run failed: {err}");
        }
    });
    (
        StatusCode::OK,
        Json(json!({ "success": true, "started": true })),
    )
}

// --- Logs ---

async fn log_events(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let receiver = state.log_tx.subscribe();
    let stream = BroadcastStream::new(receiver).map(|msg| match msg {
        Ok(line) => Ok(Event::default().data(line)),
        Err(_) => Ok(Event::default().data("log stream lagged")),
    });
    Sse::new(stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::SettingsStore;
    use crate::core::orchestrator::Orchestrator;
    use crate::core::program_runner::ProgramRunner;
    use crate::core::store::activation::ToolActivationStore;
    use crate::core::store::conversation::ConversationStore;
    use crate::core::store::program::ProgramStore;
    use crate::core::store::usage::UsageLedger;
    use crate::interfaces::ws::BridgeHub;
    use crate::tools::{ToolDeps, build_registry, category};
    use axum::body::Body;
    use axum::http::Request;
    use std::collections::HashSet;
    use std::sync::Arc;
    use tower::util::ServiceExt;

    async fn test_state() -> AppState {
        let settings = Arc::new(SettingsStore::in_memory(Settings::default()));
        let conversation = Arc::new(ConversationStore::in_memory());
        let activation = Arc::new(ToolActivationStore::in_memory());
        let ledger = Arc::new(UsageLedger::in_memory());
        let programs = Arc::new(ProgramStore::in_memory());
        let bridge = Arc::new(BridgeHub::new());
        let deps = ToolDeps {
            bridge: bridge.clone(),
            settings: settings.clone(),
            ledger: ledger.clone(),
            programs: programs.clone(),
        };
        let registry = Arc::new(build_registry(&deps));
        activation.register(registry.flags()).await;
        programs.ensure_runner(MAIN_RUNNER).await;

        let orchestrator = Arc::new(Orchestrator::new(
            settings.clone(),
            conversation.clone(),
            activation.clone(),
            ledger.clone(),
            registry,
            bridge.clone(),
        ));
        let runner = Arc::new(ProgramRunner::new(
            orchestrator.clone(),
            conversation.clone(),
            programs.clone(),
        ));
        let (log_tx, _) = tokio::sync::broadcast::channel(16);
        AppState {
            settings,
            conversation,
            activation,
            ledger,
            programs,
            orchestrator,
            runner,
            bridge,
            log_tx,
        }
    }

    async fn json_request(
        app: Router,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let body = match body {
            Some(json) => Body::from(serde_json::to_string(&json).unwrap()),
            None => Body::empty(),
        };
        let req = Request::builder()
            .method(method)
            .uri(path)
            .header("content-type", "application/json")
            .body(body)
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        let status = resp.status();
        let body_bytes = axum::body::to_bytes(resp.into_body(), 1024 * 1024)
            .await
            .unwrap();
        let json: Value = serde_json::from_slice(&body_bytes).unwrap_or(json!({}));
        (status, json)
    }

    #[tokio::test]
    async fn tools_list_and_activate_round_trip() {
        let state = test_state().await;
        let app = build_api_router(state.clone());
        let (status, json) = json_request(app, Method::GET, "/api/tools", None).await;
        assert_eq!(status, StatusCode::OK);
        let tools = json["tools"].as_array().unwrap();
        assert!(!tools.is_empty());
        assert!(tools.iter().all(|t| t["isActivated"] == false));

        let app = build_api_router(state.clone());
        let (status, _) = json_request(
            app,
            Method::POST,
            "/api/tools/activate",
            Some(json!({ "name": "tab_group", "isActivated": true })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(state.activation.is_active("tab_group"));

        let app = build_api_router(state);
        let (status, json) = json_request(
            app,
            Method::POST,
            "/api/tools/activate",
            Some(json!({ "name": "no_such_tool", "isActivated": true })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["success"], false);
    }

    #[tokio::test]
    async fn category_toggle_activates_the_whole_family() {
        let state = test_state().await;
        let app = build_api_router(state.clone());
        let (status, _) = json_request(
            app,
            Method::POST,
            "/api/tools/category",
            Some(json!({ "category": category::TABS, "isActivated": true })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(state.activation.is_active("tab_group"));
        assert!(state.activation.is_active("get_current_tab_info"));
        assert!(!state.activation.is_active("search_web"));
    }

    #[tokio::test]
    async fn conversation_get_delete_turn_and_clear() {
        let state = test_state().await;
        let first = state
            .conversation
            .append_user_turn(ChatContent::from_text("hello"))
            .await;
        state
            .conversation
            .append_user_turn(ChatContent::from_text("again"))
            .await;

        let app = build_api_router(state.clone());
        let (status, json) = json_request(app, Method::GET, "/api/conversation", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["chats"].as_array().unwrap().len(), 2);

        let app = build_api_router(state.clone());
        let (status, _) = json_request(
            app,
            Method::DELETE,
            &format!("/api/conversation/{first}"),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(state.conversation.turns().len(), 1);

        let app = build_api_router(state.clone());
        let (status, _) = json_request(app, Method::DELETE, "/api/conversation", None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(state.conversation.turns().is_empty());
    }

    #[tokio::test]
    async fn settings_doc_reports_key_presence_not_value() {
        let mut initial = Settings::default();
        initial.providers.openai_api_key = "sk-secret".to_string();
        let doc = settings_doc(&initial);
        assert_eq!(doc["providers"]["openai_api_key"], true);
        assert!(doc.to_string().find("sk-secret").is_none());
    }

    #[tokio::test]
    async fn patch_settings_clamps_and_keeps_the_rest() {
        let state = test_state().await;
        let app = build_api_router(state.clone());
        let (status, json) = json_request(
            app,
            Method::PATCH,
            "/api/settings",
            Some(json!({
                "llm": { "temperature": 5.0 },
                "runtime": { "capture_quality": 200 },
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["settings"]["llm"]["temperature"], 2.0);
        assert_eq!(json["settings"]["runtime"]["capture_quality"], 100);

        let settings = state.settings.get();
        assert_eq!(settings.llm.model, "gpt-4o");
        assert!(settings.runtime.use_latest_image);
    }

    #[tokio::test]
    async fn usage_reports_total_price_and_resets() {
        let state = test_state().await;
        state.ledger.add_input_tokens(1000, "gpt-4o").await;

        let app = build_api_router(state.clone());
        let (status, json) = json_request(app, Method::GET, "/api/usage", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["usage"]["requestCount"]["total"], 1);
        assert!(json["usage"]["totalPrice"].as_f64().unwrap() > 0.0);

        let app = build_api_router(state.clone());
        let (status, _) = json_request(app, Method::DELETE, "/api/usage", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(state.ledger.get().request_count.total, 0);
    }

    #[tokio::test]
    async fn program_crud_round_trip() {
        let state = test_state().await;

        let app = build_api_router(state.clone());
        let (status, json) = json_request(
            app,
            Method::POST,
            "/api/programs",
            Some(json!({
                "name": "morning tabs",
                "steps": [
                    { "whatToDo": "open the news", "tools": ["navigate_tab"] },
                ],
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let id = json["program"]["id"].as_str().unwrap().to_string();

        let app = build_api_router(state.clone());
        let (_, json) = json_request(
            app,
            Method::PATCH,
            &format!("/api/programs/{id}"),
            Some(json!({ "isPinned": true })),
        )
        .await;
        assert_eq!(json["program"]["isPinned"], true);

        let app = build_api_router(state.clone());
        let (status, json) = json_request(app, Method::GET, "/api/programs", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["programs"].as_array().unwrap().len(), 1);
        assert_eq!(json["runner"]["status"], "idle");

        let app = build_api_router(state.clone());
        let (status, _) = json_request(
            app,
            Method::DELETE,
            &format!("/api/programs/{id}"),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let app = build_api_router(state);
        let (status, _) = json_request(
            app,
            Method::POST,
            &format!("/api/programs/{id}/run"),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn empty_program_is_rejected() {
        let state = test_state().await;
        let app = build_api_router(state);
        let (status, json) = json_request(
            app,
            Method::POST,
            "/api/programs",
            Some(json!({ "name": "", "steps": [] })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["success"], false);
    }

    #[tokio::test]
    async fn empty_chat_message_is_rejected() {
        let state = test_state().await;
        let app = build_api_router(state);
        let (status, json) =
            json_request(app, Method::POST, "/api/chat", Some(json!({}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["success"], false);
    }

    #[tokio::test]
    async fn method_not_allowed_returns_405() {
        let state = test_state().await;
        let app = build_api_router(state);
        let req = Request::builder()
            .method(Method::PATCH)
            .uri("/api/tools")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn api_route_contract_has_all_expected_paths() {
        let paths = [
            "/api/chat",
            "/api/chat/stop",
            "/api/suggest",
            "/api/conversation",
            "/api/conversation/events",
            "/api/conversation/17",
            "/api/tools",
            "/api/tools/activate",
            "/api/tools/category",
            "/api/usage",
            "/api/settings",
            "/api/programs",
            "/api/programs/prog_1",
            "/api/programs/prog_1/run",
            "/api/logs/events",
            "/bridge",
        ];

        let unique: HashSet<&str> = paths.iter().copied().collect();
        assert_eq!(unique.len(), paths.len());

        let state = test_state().await;
        let app = build_api_router(state);
        for path in paths {
            let req = Request::builder()
                .method(Method::PUT)
                .uri(path)
                .body(Body::empty())
                .expect("request should build");
            let resp = app
                .clone()
                .oneshot(req)
                .await
                .expect("router oneshot should succeed");
            assert_ne!(
                resp.status(),
                StatusCode::NOT_FOUND,
                "Route missing from router: {}",
                path
            );
        }
    }
}
