//! Token usage and spend ledger.
//!
//! Consumers of provider responses report token counts here; the ledger
//! turns them into running totals and a dollar estimate from a per-model
//! rate table. Request counting is asymmetric on purpose: the overall total
//! bumps only on the input side, so one completed turn counts as exactly
//! one request even though it reports twice.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::core::store::kv::KvCell;

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RequestCount {
    pub total: u64,
    pub input: u64,
    pub output: u64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenTally {
    pub input: u64,
    pub output: u64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PriceTally {
    pub input: f64,
    pub output: f64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UsageRecord {
    pub request_count: RequestCount,
    pub tokens: TokenTally,
    pub price: PriceTally,
}

impl UsageRecord {
    pub fn total_price(&self) -> f64 {
        self.price.input + self.price.output
    }
}

/// USD per 1K tokens as (input, output). Models we cannot price bill zero
/// rather than guessing.
fn rates_per_kilotoken(model: &str) -> (f64, f64) {
    if model.starts_with("gpt-4o") {
        (0.005, 0.015)
    } else if model.starts_with("gpt-3.5") {
        (0.0005, 0.0015)
    } else if model.starts_with("gemini-1.5-pro") {
        (0.00125, 0.005)
    } else if model.starts_with("gemini") {
        (0.000075, 0.0003)
    } else {
        (0.0, 0.0)
    }
}

pub struct UsageLedger {
    cell: KvCell<UsageRecord>,
}

impl UsageLedger {
    pub fn open(dir: &Path) -> Self {
        Self {
            cell: KvCell::open(dir, "usage", UsageRecord::default()),
        }
    }

    pub fn in_memory() -> Self {
        Self {
            cell: KvCell::in_memory("usage", UsageRecord::default()),
        }
    }

    pub async fn add_input_tokens(&self, count: u64, model: &str) {
        let (input_rate, _) = rates_per_kilotoken(model);
        self.cell
            .set(|mut rec| {
                rec.request_count.total += 1;
                rec.request_count.input += 1;
                rec.tokens.input += count;
                rec.price.input += count as f64 * input_rate / 1000.0;
                rec
            })
            .await;
    }

    pub async fn add_output_tokens(&self, count: u64, model: &str) {
        let (_, output_rate) = rates_per_kilotoken(model);
        self.cell
            .set(|mut rec| {
                rec.request_count.output += 1;
                rec.tokens.output += count;
                rec.price.output += count as f64 * output_rate / 1000.0;
                rec
            })
            .await;
    }

    pub fn get(&self) -> UsageRecord {
        self.cell.get()
    }

    pub async fn reset(&self) {
        self.cell.set(|_| UsageRecord::default()).await;
    }

    pub fn subscribe(&self) -> watch::Receiver<UsageRecord> {
        self.cell.subscribe()
    }
}
