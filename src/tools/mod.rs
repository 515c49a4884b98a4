//! Browser tool registry.
//!
//! Tools are small structs behind one trait; the registry is the only
//! dispatch point. It parses raw argument JSON, folds every failure
//! (unknown name, bad arguments, tool error) into a `{"success": false,
//! "reason": ...}` payload for the model, and resolves the catch-all
//! `any_call` indirection plus the catalog introspection names itself.
//! Activation is not checked here: offering tools is the engine's job,
//! running whatever the model names is this one's.

pub mod bridge;
pub mod browsing;
pub mod catalog;
pub mod misc;
pub mod programs;
pub mod screen;
pub mod search;
pub mod settings;
pub mod tabs;
pub mod usage;

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::info;

use crate::core::config::SettingsStore;
use crate::core::llm::{ToolDispatcher, ToolSpec};
use crate::core::store::activation::ToolFlag;
use crate::core::store::program::ProgramStore;
use crate::core::store::usage::UsageLedger;

use bridge::BrowserBridge;

/// Category labels shown in the panel's tool list and used for bulk
/// toggles.
pub mod category {
    pub const CONFIG: &str = "Config";
    pub const HISTORY_AND_BOOKMARKS: &str = "History & Bookmark";
    pub const TABS: &str = "Tab Manage & Navigation";
    pub const SEARCH_AND_CAPTURE: &str = "Search & Screen Capture";
    pub const PROGRAMS: &str = "Programs & Macros";
    pub const ETC: &str = "ETC tools";
    pub const USAGE: &str = "Usage";
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &'static str;
    fn description(&self) -> &'static str;
    fn category(&self) -> &'static str;
    /// JSON schema for the arguments object.
    fn parameters(&self) -> Value;
    async fn run(&self, args: Value) -> anyhow::Result<Value>;
}

/// Typed argument parsing with the tool name in the failure, so the model
/// learns which call was malformed and which field serde rejected.
pub(crate) fn parse_args<T: DeserializeOwned>(tool: &str, args: Value) -> anyhow::Result<T> {
    serde_json::from_value(args)
        .map_err(|err| anyhow::anyhow!("invalid arguments for {tool}: {err}"))
}

pub(crate) fn failure(reason: impl Into<String>) -> String {
    json!({ "success": false, "reason": reason.into() }).to_string()
}

/// Everything the built-in tool set needs to run.
pub struct ToolDeps {
    pub bridge: Arc<dyn BrowserBridge>,
    pub settings: Arc<SettingsStore>,
    pub ledger: Arc<UsageLedger>,
    pub programs: Arc<ProgramStore>,
}

pub fn build_registry(deps: &ToolDeps) -> ToolRegistry {
    let mut tools: Vec<Arc<dyn Tool>> = Vec::new();
    tools.extend(tabs::tools(deps.bridge.clone()));
    tools.extend(browsing::tools(deps.bridge.clone()));
    tools.extend(screen::tools());
    tools.extend(search::tools(deps.bridge.clone()));
    tools.extend(settings::tools(deps.settings.clone()));
    tools.extend(usage::tools(deps.ledger.clone()));
    tools.extend(programs::tools(deps.programs.clone()));
    tools.extend(misc::tools(deps.bridge.clone()));
    ToolRegistry::new(tools)
}

pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new(tools: Vec<Arc<dyn Tool>>) -> Self {
        Self { tools }
    }

    /// Registered names plus the registry's own intrinsic names, in the
    /// order they are listed to the model.
    pub fn names(&self) -> Vec<String> {
        self.tools
            .iter()
            .map(|tool| tool.name().to_string())
            .chain(catalog::intrinsic_specs().into_iter().map(|s| s.name))
            .collect()
    }

    pub fn has(&self, name: &str) -> bool {
        self.tools.iter().any(|tool| tool.name() == name)
            || catalog::intrinsic_specs().iter().any(|s| s.name == name)
    }

    /// Flags for syncing the activation store at boot.
    pub fn flags(&self) -> Vec<ToolFlag> {
        self.tools
            .iter()
            .map(|tool| ToolFlag {
                name: tool.name().to_string(),
                description: tool.description().to_string(),
                category: tool.category().to_string(),
                is_activated: false,
            })
            .chain(catalog::intrinsic_flags())
            .collect()
    }

    /// Declarations for the given names, in registry order. Unknown names
    /// are skipped; the activation store may lag a registry change.
    pub fn specs_for(&self, names: &[String]) -> Vec<ToolSpec> {
        let wanted = |name: &str| names.iter().any(|n| n == name);
        self.tools
            .iter()
            .filter(|tool| wanted(tool.name()))
            .map(|tool| spec_of(tool.as_ref()))
            .chain(
                catalog::intrinsic_specs()
                    .into_iter()
                    .filter(|spec| wanted(&spec.name)),
            )
            .collect()
    }

    pub async fn invoke(&self, name: &str, arguments: &str) -> String {
        self.invoke_inner(name, arguments, true).await
    }

    async fn invoke_inner(&self, name: &str, arguments: &str, allow_any_call: bool) -> String {
        let args: Value = if arguments.trim().is_empty() {
            json!({})
        } else {
            match serde_json::from_str(arguments) {
                Ok(value) => value,
                Err(err) => {
                    return failure(format!("arguments for {name} are not valid JSON: {err}"));
                }
            }
        };

        match name {
            catalog::ANY_CALL if allow_any_call => self.invoke_any_call(args).await,
            catalog::ANY_CALL => failure("any_call cannot invoke itself"),
            catalog::GET_MY_TOOLS => self.list_summaries(),
            catalog::GET_TOOL_DETAIL => self.describe(&args),
            _ => {
                let Some(tool) = self.tools.iter().find(|tool| tool.name() == name) else {
                    return failure(format!("tool {name} is not registered"));
                };
                info!("running tool {name}");
                match tool.run(args).await {
                    Ok(value) => value.to_string(),
                    Err(err) => failure(err.to_string()),
                }
            }
        }
    }

    async fn invoke_any_call(&self, args: Value) -> String {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct AnyCallParams {
            tool_name: String,
            #[serde(default)]
            tool_params: Value,
        }
        let params: AnyCallParams = match serde_json::from_value(args) {
            Ok(params) => params,
            Err(err) => return failure(format!("invalid arguments for any_call: {err}")),
        };
        // Models pass the inner arguments either inline or as a JSON string.
        let raw = match params.tool_params {
            Value::String(s) => s,
            Value::Null => "{}".to_string(),
            other => other.to_string(),
        };
        Box::pin(self.invoke_inner(&params.tool_name, &raw, false)).await
    }

    fn list_summaries(&self) -> String {
        let list: Vec<Value> = self
            .tools
            .iter()
            .map(|tool| json!({ "name": tool.name(), "desc": tool.description() }))
            .chain(
                catalog::intrinsic_specs()
                    .into_iter()
                    .map(|spec| json!({ "name": spec.name, "desc": spec.description })),
            )
            .collect();
        Value::Array(list).to_string()
    }

    fn describe(&self, args: &Value) -> String {
        let Some(name) = args.get("toolName").and_then(|v| v.as_str()) else {
            return failure("toolName is required");
        };
        let spec = self
            .tools
            .iter()
            .find(|tool| tool.name() == name)
            .map(|tool| spec_of(tool.as_ref()))
            .or_else(|| {
                catalog::intrinsic_specs()
                    .into_iter()
                    .find(|spec| spec.name == name)
            });
        match spec {
            Some(spec) => json!({
                "name": spec.name,
                "description": spec.description,
                "input": spec.parameters,
            })
            .to_string(),
            None => failure(format!("tool {name} is not registered")),
        }
    }
}

fn spec_of(tool: &dyn Tool) -> ToolSpec {
    ToolSpec {
        name: tool.name().to_string(),
        description: tool.description().to_string(),
        parameters: tool.parameters(),
    }
}

#[async_trait]
impl ToolDispatcher for ToolRegistry {
    async fn dispatch(&self, name: &str, arguments: &str) -> String {
        self.invoke(name, arguments).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &'static str {
            "echo"
        }
        fn description(&self) -> &'static str {
            "Echoes its arguments back."
        }
        fn category(&self) -> &'static str {
            category::ETC
        }
        fn parameters(&self) -> Value {
            json!({ "type": "object", "properties": { "text": { "type": "string" } } })
        }
        async fn run(&self, args: Value) -> anyhow::Result<Value> {
            Ok(json!({ "success": true, "echo": args }))
        }
    }

    struct FailingTool;

    #[async_trait]
    impl Tool for FailingTool {
        fn name(&self) -> &'static str {
            "always_fails"
        }
        fn description(&self) -> &'static str {
            "Fails on purpose."
        }
        fn category(&self) -> &'static str {
            category::ETC
        }
        fn parameters(&self) -> Value {
            json!({ "type": "object" })
        }
        async fn run(&self, _args: Value) -> anyhow::Result<Value> {
            anyhow::bail!("the browser said no")
        }
    }

    fn registry() -> ToolRegistry {
        ToolRegistry::new(vec![Arc::new(EchoTool), Arc::new(FailingTool)])
    }

    #[tokio::test]
    async fn invoke_runs_registered_tool() {
        let payload = registry().invoke("echo", r#"{"text":"hi"}"#).await;
        let value: Value = serde_json::from_str(&payload).unwrap();
        assert_eq!(value["echo"]["text"], "hi");
    }

    #[tokio::test]
    async fn unknown_tool_becomes_failure_payload() {
        let payload = registry().invoke("nope", "{}").await;
        let value: Value = serde_json::from_str(&payload).unwrap();
        assert_eq!(value["success"], false);
        assert!(value["reason"].as_str().unwrap().contains("nope"));
    }

    #[tokio::test]
    async fn invalid_json_arguments_become_failure_payload() {
        let payload = registry().invoke("echo", "{not json").await;
        let value: Value = serde_json::from_str(&payload).unwrap();
        assert_eq!(value["success"], false);
    }

    #[tokio::test]
    async fn tool_errors_are_contained() {
        let payload = registry().invoke("always_fails", "{}").await;
        let value: Value = serde_json::from_str(&payload).unwrap();
        assert_eq!(value["success"], false);
        assert_eq!(value["reason"], "the browser said no");
    }

    #[tokio::test]
    async fn empty_arguments_default_to_empty_object() {
        let payload = registry().invoke("echo", "").await;
        let value: Value = serde_json::from_str(&payload).unwrap();
        assert_eq!(value["success"], true);
    }

    #[tokio::test]
    async fn any_call_dispatches_by_indirection() {
        let payload = registry()
            .invoke(
                catalog::ANY_CALL,
                r#"{"toolName":"echo","toolParams":{"text":"via any_call"}}"#,
            )
            .await;
        let value: Value = serde_json::from_str(&payload).unwrap();
        assert_eq!(value["echo"]["text"], "via any_call");
    }

    #[tokio::test]
    async fn any_call_accepts_string_encoded_params() {
        let payload = registry()
            .invoke(
                catalog::ANY_CALL,
                r#"{"toolName":"echo","toolParams":"{\"text\":\"nested\"}"}"#,
            )
            .await;
        let value: Value = serde_json::from_str(&payload).unwrap();
        assert_eq!(value["echo"]["text"], "nested");
    }

    #[tokio::test]
    async fn any_call_cannot_call_itself() {
        let payload = registry()
            .invoke(
                catalog::ANY_CALL,
                r#"{"toolName":"any_call","toolParams":{}}"#,
            )
            .await;
        let value: Value = serde_json::from_str(&payload).unwrap();
        assert_eq!(value["success"], false);
    }

    #[tokio::test]
    async fn catalog_names_are_listed_and_described() {
        let reg = registry();
        let listing: Value =
            serde_json::from_str(&reg.invoke(catalog::GET_MY_TOOLS, "{}").await).unwrap();
        let names: Vec<&str> = listing
            .as_array()
            .unwrap()
            .iter()
            .map(|item| item["name"].as_str().unwrap())
            .collect();
        assert!(names.contains(&"echo"));
        assert!(names.contains(&catalog::ANY_CALL));

        let detail: Value = serde_json::from_str(
            &reg.invoke(catalog::GET_TOOL_DETAIL, r#"{"toolName":"echo"}"#)
                .await,
        )
        .unwrap();
        assert_eq!(detail["name"], "echo");
        assert!(detail["input"].is_object());
    }

    #[test]
    fn specs_for_respects_activation_subset() {
        let reg = registry();
        let specs = reg.specs_for(&["echo".to_string(), catalog::ANY_CALL.to_string()]);
        let names: Vec<&str> = specs.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["echo", catalog::ANY_CALL]);
    }
}
