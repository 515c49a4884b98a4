//! Web search tool.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};

use super::bridge::BrowserBridge;
use super::{Tool, category, parse_args};

/// Settling time for the result page before we report success. The search
/// opens in a real tab and the model is expected to capture it afterwards.
const PAGE_SETTLE_DELAY: Duration = Duration::from_secs(1);

pub fn tools(bridge: Arc<dyn BrowserBridge>) -> Vec<Arc<dyn Tool>> {
    vec![Arc::new(SearchWeb { bridge })]
}

#[derive(Deserialize)]
struct SearchWebArgs {
    #[allow(dead_code)]
    query: String,
}

struct SearchWeb {
    bridge: Arc<dyn BrowserBridge>,
}

#[async_trait]
impl Tool for SearchWeb {
    fn name(&self) -> &'static str {
        "search_web"
    }
    fn description(&self) -> &'static str {
        "Run a web search in the browser. Capture the screen afterwards to read the results."
    }
    fn category(&self) -> &'static str {
        category::SEARCH_AND_CAPTURE
    }
    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "Search terms." },
            },
            "required": ["query"],
        })
    }
    async fn run(&self, args: Value) -> anyhow::Result<Value> {
        let _: SearchWebArgs = parse_args(self.name(), args.clone())?;
        self.bridge.request("searchWeb", args).await?;
        tokio::time::sleep(PAGE_SETTLE_DELAY).await;
        Ok(json!({
            "status": "success",
            "message": "Search completed. Now you can request me to capture the screen!",
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct StubBridge {
        last: Mutex<Option<(String, Value)>>,
    }

    #[async_trait]
    impl BrowserBridge for StubBridge {
        async fn request(&self, command: &str, params: Value) -> anyhow::Result<Value> {
            *self.last.lock().unwrap() = Some((command.to_string(), params));
            Ok(json!({}))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn search_forwards_query_and_reports_success() {
        let stub = Arc::new(StubBridge {
            last: Mutex::new(None),
        });
        let tool = SearchWeb {
            bridge: stub.clone(),
        };
        let out = tool.run(json!({ "query": "rust async" })).await.unwrap();
        let (command, params) = stub.last.lock().unwrap().clone().unwrap();
        assert_eq!(command, "searchWeb");
        assert_eq!(params["query"], "rust async");
        assert!(out["message"].as_str().unwrap().contains("capture"));
    }

    #[tokio::test]
    async fn search_requires_a_query() {
        let stub = Arc::new(StubBridge {
            last: Mutex::new(None),
        });
        let tool = SearchWeb { bridge: stub };
        assert!(tool.run(json!({})).await.is_err());
    }
}
