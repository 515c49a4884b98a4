//! Tab management and navigation tools.

use std::sync::Arc;

use anyhow::bail;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};

use super::bridge::BrowserBridge;
use super::{Tool, category, parse_args};
use crate::tools::catalog::empty_object;

pub fn tools(bridge: Arc<dyn BrowserBridge>) -> Vec<Arc<dyn Tool>> {
    vec![
        Arc::new(GetCurrentTabInfo {
            bridge: bridge.clone(),
        }),
        Arc::new(GetTabsInfo {
            bridge: bridge.clone(),
        }),
        Arc::new(NavigateTab {
            bridge: bridge.clone(),
        }),
        Arc::new(TabCreateOrRemove {
            bridge: bridge.clone(),
        }),
        Arc::new(TabGroup {
            bridge: bridge.clone(),
        }),
        Arc::new(GetAllTabGroups {
            bridge: bridge.clone(),
        }),
        Arc::new(UpdateTabGroup { bridge }),
    ]
}

const GROUP_COLORS: &[&str] = &[
    "grey", "blue", "red", "yellow", "green", "pink", "purple", "cyan", "orange",
];

fn check_group_color(color: Option<&str>) -> anyhow::Result<()> {
    if let Some(color) = color
        && !GROUP_COLORS.contains(&color)
    {
        bail!("color must be one of: {}", GROUP_COLORS.join(", "));
    }
    Ok(())
}

fn check_url(url: &str) -> anyhow::Result<()> {
    url::Url::parse(url).map_err(|err| anyhow::anyhow!("url is not valid: {err}"))?;
    Ok(())
}

struct GetCurrentTabInfo {
    bridge: Arc<dyn BrowserBridge>,
}

#[async_trait]
impl Tool for GetCurrentTabInfo {
    fn name(&self) -> &'static str {
        "get_current_tab_info"
    }
    fn description(&self) -> &'static str {
        "Get the id, title and URL of the tab the user is currently looking at."
    }
    fn category(&self) -> &'static str {
        category::TABS
    }
    fn parameters(&self) -> Value {
        empty_object()
    }
    async fn run(&self, _args: Value) -> anyhow::Result<Value> {
        self.bridge.request("getCurrentTab", json!({})).await
    }
}

struct GetTabsInfo {
    bridge: Arc<dyn BrowserBridge>,
}

#[async_trait]
impl Tool for GetTabsInfo {
    fn name(&self) -> &'static str {
        "get_tabs_info"
    }
    fn description(&self) -> &'static str {
        "List every open tab with its id, title, URL and group."
    }
    fn category(&self) -> &'static str {
        category::TABS
    }
    fn parameters(&self) -> Value {
        empty_object()
    }
    async fn run(&self, _args: Value) -> anyhow::Result<Value> {
        self.bridge.request("listTabs", json!({})).await
    }
}

#[derive(Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
enum NavigateAction {
    GoBack,
    GoForward,
    Reload,
    Move,
    Focus,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct NavigateTabArgs {
    action: NavigateAction,
    #[serde(default)]
    tab_id: Option<u64>,
    #[serde(default)]
    url: Option<String>,
}

struct NavigateTab {
    bridge: Arc<dyn BrowserBridge>,
}

#[async_trait]
impl Tool for NavigateTab {
    fn name(&self) -> &'static str {
        "navigate_tab"
    }
    fn description(&self) -> &'static str {
        "Navigate a tab: go back or forward, reload, move it to a URL, or focus it."
    }
    fn category(&self) -> &'static str {
        category::TABS
    }
    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "action": {
                    "type": "string",
                    "enum": ["goBack", "goForward", "reload", "move", "focus"],
                },
                "tabId": {
                    "type": "integer",
                    "description": "Target tab. Defaults to the current tab.",
                },
                "url": {
                    "type": "string",
                    "description": "Destination for the move action.",
                },
            },
            "required": ["action"],
        })
    }
    async fn run(&self, args: Value) -> anyhow::Result<Value> {
        let parsed: NavigateTabArgs = parse_args(self.name(), args.clone())?;
        match parsed.action {
            NavigateAction::Move => match parsed.url.as_deref() {
                Some(url) => check_url(url)?,
                None => bail!("the move action needs a url"),
            },
            NavigateAction::Focus if parsed.tab_id.is_none() => {
                bail!("the focus action needs a tabId")
            }
            _ => {}
        }
        self.bridge.request("navigateTab", args).await
    }
}

#[derive(Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
enum CreateOrRemoveAction {
    Create,
    Remove,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TabCreateOrRemoveArgs {
    action: CreateOrRemoveAction,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    tab_ids: Vec<u64>,
}

struct TabCreateOrRemove {
    bridge: Arc<dyn BrowserBridge>,
}

#[async_trait]
impl Tool for TabCreateOrRemove {
    fn name(&self) -> &'static str {
        "tab_create_or_remove"
    }
    fn description(&self) -> &'static str {
        "Open a new tab (optionally at a URL) or close tabs by id."
    }
    fn category(&self) -> &'static str {
        category::TABS
    }
    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "action": { "type": "string", "enum": ["create", "remove"] },
                "url": { "type": "string", "description": "URL for a new tab." },
                "tabIds": {
                    "type": "array",
                    "items": { "type": "integer" },
                    "description": "Tabs to close.",
                },
            },
            "required": ["action"],
        })
    }
    async fn run(&self, args: Value) -> anyhow::Result<Value> {
        let parsed: TabCreateOrRemoveArgs = parse_args(self.name(), args.clone())?;
        match parsed.action {
            CreateOrRemoveAction::Create => {
                if let Some(url) = parsed.url.as_deref() {
                    check_url(url)?;
                }
            }
            CreateOrRemoveAction::Remove if parsed.tab_ids.is_empty() => {
                bail!("the remove action needs at least one tabId")
            }
            CreateOrRemoveAction::Remove => {}
        }
        self.bridge.request("tabCreateOrRemove", args).await
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TabGroupArgs {
    #[allow(dead_code)]
    action: GroupAction,
    tab_ids: Vec<u64>,
    #[serde(default)]
    #[allow(dead_code)]
    title: Option<String>,
    #[serde(default)]
    color: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
enum GroupAction {
    Group,
    Ungroup,
}

struct TabGroup {
    bridge: Arc<dyn BrowserBridge>,
}

#[async_trait]
impl Tool for TabGroup {
    fn name(&self) -> &'static str {
        "tab_group"
    }
    fn description(&self) -> &'static str {
        "Group tabs together (with an optional title and color) or ungroup them."
    }
    fn category(&self) -> &'static str {
        category::TABS
    }
    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "action": { "type": "string", "enum": ["group", "ungroup"] },
                "tabIds": { "type": "array", "items": { "type": "integer" } },
                "title": { "type": "string" },
                "color": { "type": "string", "enum": GROUP_COLORS },
            },
            "required": ["action", "tabIds"],
        })
    }
    async fn run(&self, args: Value) -> anyhow::Result<Value> {
        let parsed: TabGroupArgs = parse_args(self.name(), args.clone())?;
        if parsed.tab_ids.is_empty() {
            bail!("tabIds must not be empty");
        }
        check_group_color(parsed.color.as_deref())?;
        self.bridge.request("tabGroup", args).await
    }
}

struct GetAllTabGroups {
    bridge: Arc<dyn BrowserBridge>,
}

#[async_trait]
impl Tool for GetAllTabGroups {
    fn name(&self) -> &'static str {
        "get_all_tab_groups"
    }
    fn description(&self) -> &'static str {
        "List every tab group with its id, title, color and collapsed state."
    }
    fn category(&self) -> &'static str {
        category::TABS
    }
    fn parameters(&self) -> Value {
        empty_object()
    }
    async fn run(&self, _args: Value) -> anyhow::Result<Value> {
        self.bridge.request("listTabGroups", json!({})).await
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateTabGroupArgs {
    #[allow(dead_code)]
    group_id: u64,
    #[serde(default)]
    #[allow(dead_code)]
    title: Option<String>,
    #[serde(default)]
    color: Option<String>,
    #[serde(default)]
    #[allow(dead_code)]
    collapsed: Option<bool>,
}

struct UpdateTabGroup {
    bridge: Arc<dyn BrowserBridge>,
}

#[async_trait]
impl Tool for UpdateTabGroup {
    fn name(&self) -> &'static str {
        "update_tab_group"
    }
    fn description(&self) -> &'static str {
        "Rename, recolor or collapse an existing tab group."
    }
    fn category(&self) -> &'static str {
        category::TABS
    }
    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "groupId": { "type": "integer" },
                "title": { "type": "string" },
                "color": { "type": "string", "enum": GROUP_COLORS },
                "collapsed": { "type": "boolean" },
            },
            "required": ["groupId"],
        })
    }
    async fn run(&self, args: Value) -> anyhow::Result<Value> {
        let parsed: UpdateTabGroupArgs = parse_args(self.name(), args.clone())?;
        check_group_color(parsed.color.as_deref())?;
        self.bridge.request("updateTabGroup", args).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct StubBridge {
        last: Mutex<Option<(String, Value)>>,
    }

    impl StubBridge {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                last: Mutex::new(None),
            })
        }
        fn last_command(&self) -> Option<(String, Value)> {
            self.last.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl BrowserBridge for StubBridge {
        async fn request(&self, command: &str, params: Value) -> anyhow::Result<Value> {
            *self.last.lock().unwrap() = Some((command.to_string(), params));
            Ok(json!({ "success": true }))
        }
    }

    #[tokio::test]
    async fn navigate_move_requires_valid_url() {
        let stub = StubBridge::new();
        let tool = NavigateTab {
            bridge: stub.clone(),
        };
        assert!(tool.run(json!({ "action": "move" })).await.is_err());
        assert!(
            tool.run(json!({ "action": "move", "url": "not a url" }))
                .await
                .is_err()
        );
        assert!(stub.last_command().is_none());

        tool.run(json!({ "action": "move", "url": "https://example.com" }))
            .await
            .unwrap();
        let (command, params) = stub.last_command().unwrap();
        assert_eq!(command, "navigateTab");
        assert_eq!(params["url"], "https://example.com");
    }

    #[tokio::test]
    async fn navigate_focus_requires_tab_id() {
        let stub = StubBridge::new();
        let tool = NavigateTab {
            bridge: stub.clone(),
        };
        assert!(tool.run(json!({ "action": "focus" })).await.is_err());
        tool.run(json!({ "action": "focus", "tabId": 12 }))
            .await
            .unwrap();
        assert!(stub.last_command().is_some());
    }

    #[tokio::test]
    async fn remove_requires_tab_ids() {
        let stub = StubBridge::new();
        let tool = TabCreateOrRemove {
            bridge: stub.clone(),
        };
        assert!(tool.run(json!({ "action": "remove" })).await.is_err());
        tool.run(json!({ "action": "remove", "tabIds": [3, 4] }))
            .await
            .unwrap();
        let (command, _) = stub.last_command().unwrap();
        assert_eq!(command, "tabCreateOrRemove");
    }

    #[tokio::test]
    async fn group_rejects_unknown_color() {
        let stub = StubBridge::new();
        let tool = TabGroup {
            bridge: stub.clone(),
        };
        let err = tool
            .run(json!({ "action": "group", "tabIds": [1], "color": "mauve" }))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("color"));

        tool.run(json!({ "action": "group", "tabIds": [1], "color": "cyan" }))
            .await
            .unwrap();
        assert!(stub.last_command().is_some());
    }

    #[tokio::test]
    async fn unknown_action_is_rejected_by_parse() {
        let stub = StubBridge::new();
        let tool = NavigateTab { bridge: stub };
        let err = tool.run(json!({ "action": "teleport" })).await.unwrap_err();
        assert!(err.to_string().contains("navigate_tab"));
    }
}
