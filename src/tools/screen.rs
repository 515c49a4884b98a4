//! Screen capture request tool.
//!
//! Capturing happens outside the model round-trip: this tool only
//! acknowledges the request, and the engine schedules the real capture
//! as a follow-up turn once the current reply has finished streaming.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};

use super::{Tool, category};
use crate::tools::catalog::empty_object;

/// Tool name the engine watches for to schedule a capture follow-up.
pub const CAPTURE_REQUEST: &str = "capture_request";

pub fn tools() -> Vec<Arc<dyn Tool>> {
    vec![Arc::new(CaptureRequest)]
}

struct CaptureRequest;

#[async_trait]
impl Tool for CaptureRequest {
    fn name(&self) -> &'static str {
        CAPTURE_REQUEST
    }
    fn description(&self) -> &'static str {
        "Request a screenshot of the visible page. The image arrives in a follow-up message."
    }
    fn category(&self) -> &'static str {
        category::SEARCH_AND_CAPTURE
    }
    fn parameters(&self) -> Value {
        empty_object()
    }
    async fn run(&self, _args: Value) -> anyhow::Result<Value> {
        Ok(json!({
            "status": "success",
            "message": "I will send you a screenshot. Please wait.",
        }))
    }
}
