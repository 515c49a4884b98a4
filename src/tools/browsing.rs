//! History and bookmark lookup tools.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::bail;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};

use super::bridge::BrowserBridge;
use super::{Tool, category, parse_args};

const MAX_HISTORY_DAYS: u64 = 7;
const MAX_HISTORY_ITEMS: usize = 20;

pub fn tools(bridge: Arc<dyn BrowserBridge>) -> Vec<Arc<dyn Tool>> {
    vec![
        Arc::new(GetBookmarks {
            bridge: bridge.clone(),
        }),
        Arc::new(GetHistory { bridge }),
    ]
}

struct GetBookmarks {
    bridge: Arc<dyn BrowserBridge>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GetBookmarksArgs {
    #[serde(default)]
    #[allow(dead_code)]
    query: Option<String>,
}

#[async_trait]
impl Tool for GetBookmarks {
    fn name(&self) -> &'static str {
        "get_bookmarks"
    }
    fn description(&self) -> &'static str {
        "Search the user's bookmarks by title or URL. Without a query, returns the bookmark tree."
    }
    fn category(&self) -> &'static str {
        category::HISTORY_AND_BOOKMARKS
    }
    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "Words to match against bookmark titles and URLs.",
                },
            },
        })
    }
    async fn run(&self, args: Value) -> anyhow::Result<Value> {
        let _: GetBookmarksArgs = parse_args(self.name(), args.clone())?;
        self.bridge.request("getBookmarks", args).await
    }
}

#[derive(Deserialize, Clone, Copy, PartialEq)]
#[serde(rename_all = "camelCase")]
enum HistorySort {
    Recent,
    Frequent,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GetHistoryArgs {
    #[serde(default = "default_recent_days")]
    recent_days: u64,
    #[serde(default = "default_sort")]
    sort_by: HistorySort,
}

fn default_recent_days() -> u64 {
    1
}

fn default_sort() -> HistorySort {
    HistorySort::Recent
}

#[derive(Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
struct HistoryItem {
    #[serde(default)]
    title: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    visit_count: u64,
    #[serde(default)]
    last_visit_time: f64,
}

struct GetHistory {
    bridge: Arc<dyn BrowserBridge>,
}

#[async_trait]
impl Tool for GetHistory {
    fn name(&self) -> &'static str {
        "get_history"
    }
    fn description(&self) -> &'static str {
        "Look up recently visited pages, sorted by recency or by visit count."
    }
    fn category(&self) -> &'static str {
        category::HISTORY_AND_BOOKMARKS
    }
    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "recentDays": {
                    "type": "integer",
                    "description": "How many days back to look, at most 7.",
                },
                "sortBy": {
                    "type": "string",
                    "enum": ["recent", "frequent"],
                },
            },
        })
    }
    async fn run(&self, args: Value) -> anyhow::Result<Value> {
        let parsed: GetHistoryArgs = parse_args(self.name(), args)?;
        if parsed.recent_days == 0 || parsed.recent_days > MAX_HISTORY_DAYS {
            bail!("recentDays must be between 1 and {MAX_HISTORY_DAYS}");
        }
        let raw = self
            .bridge
            .request("getHistory", json!({ "recentDays": parsed.recent_days }))
            .await?;
        let items: Vec<HistoryItem> = serde_json::from_value(raw)?;
        Ok(shape_history(items, parsed.sort_by))
    }
}

/// Deduplicates by title, orders by the requested sort and keeps the top
/// entries. The extension returns raw visit rows, which repeat a page once
/// per visit.
fn shape_history(items: Vec<HistoryItem>, sort: HistorySort) -> Value {
    let mut items = items;
    match sort {
        HistorySort::Recent => {
            items.sort_by(|a, b| b.last_visit_time.total_cmp(&a.last_visit_time));
        }
        HistorySort::Frequent => {
            items.sort_by(|a, b| b.visit_count.cmp(&a.visit_count));
        }
    }
    let mut seen = HashSet::new();
    let shaped: Vec<Value> = items
        .into_iter()
        .filter(|item| seen.insert(item.title.clone()))
        .take(MAX_HISTORY_ITEMS)
        .map(|item| {
            json!({
                "title": item.title,
                "url": item.url,
                "visitCount": item.visit_count,
            })
        })
        .collect();
    json!(shaped)
}
