//! Fun extras.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};

use super::bridge::BrowserBridge;
use super::{Tool, category};
use crate::tools::catalog::empty_object;

pub fn tools(bridge: Arc<dyn BrowserBridge>) -> Vec<Arc<dyn Tool>> {
    vec![Arc::new(PartyFirecrackers { bridge })]
}

struct PartyFirecrackers {
    bridge: Arc<dyn BrowserBridge>,
}

#[async_trait]
impl Tool for PartyFirecrackers {
    fn name(&self) -> &'static str {
        "party_firecrackers"
    }
    fn description(&self) -> &'static str {
        "Fire a confetti animation on the current page to celebrate something."
    }
    fn category(&self) -> &'static str {
        category::ETC
    }
    fn parameters(&self) -> Value {
        empty_object()
    }
    async fn run(&self, _args: Value) -> anyhow::Result<Value> {
        self.bridge.request("partyFirecrackers", json!({})).await?;
        Ok(json!({ "status": "success", "message": "The party has started." }))
    }
}
