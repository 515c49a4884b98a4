//! Usage reporting tool.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};

use super::{Tool, category};
use crate::core::store::usage::UsageLedger;
use crate::tools::catalog::empty_object;

pub fn tools(ledger: Arc<UsageLedger>) -> Vec<Arc<dyn Tool>> {
    vec![Arc::new(GetUsageInfo { ledger })]
}

struct GetUsageInfo {
    ledger: Arc<UsageLedger>,
}

#[async_trait]
impl Tool for GetUsageInfo {
    fn name(&self) -> &'static str {
        "get_usage_info"
    }
    fn description(&self) -> &'static str {
        "Report accumulated request counts, token totals and estimated cost."
    }
    fn category(&self) -> &'static str {
        category::USAGE
    }
    fn parameters(&self) -> Value {
        empty_object()
    }
    async fn run(&self, _args: Value) -> anyhow::Result<Value> {
        let record = self.ledger.get();
        let mut value = serde_json::to_value(record)?;
        if let Some(map) = value.as_object_mut() {
            map.insert("totalPrice".to_string(), json!(record.total_price()));
        }
        Ok(value)
    }
}
