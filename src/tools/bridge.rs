//! Seam between tools and the browser extension.
//!
//! Every browser action funnels through one request/reply call. The live
//! implementation rides the extension's WebSocket connection; tests and
//! headless runs use stand-ins. Command names mirror the extension's
//! message handlers, which in turn mirror the chrome.* APIs they wrap.

use async_trait::async_trait;
use serde_json::Value;

#[async_trait]
pub trait BrowserBridge: Send + Sync {
    /// Sends one command to the extension and waits for its reply payload.
    async fn request(&self, command: &str, params: Value) -> anyhow::Result<Value>;
}

/// Bridge used before any extension has connected. Every call fails with
/// the same message, which tools surface to the model as a tool failure.
pub struct DisconnectedBridge;

#[async_trait]
impl BrowserBridge for DisconnectedBridge {
    async fn request(&self, command: &str, _params: Value) -> anyhow::Result<Value> {
        anyhow::bail!("browser extension is not connected (command {command})")
    }
}
