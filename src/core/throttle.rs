//! Write throttling for streamed placeholder updates.
//!
//! Content deltas can arrive every few milliseconds; rewriting the stored
//! turn (and waking every store subscriber) at that rate is wasted work.
//! The writer keeps the newest snapshot and lets one through per interval.
//! `finish` must run at the end of every turn, success or not, so the last
//! snapshot always lands.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;

pub const WRITE_INTERVAL: Duration = Duration::from_millis(30);

/// Receives the evolving text of one assistant turn.
#[async_trait]
pub trait TurnSink: Send + Sync {
    async fn write(&self, text: String);
}

pub struct ThrottledWriter {
    sink: Arc<dyn TurnSink>,
    interval: Duration,
    last_write: Option<Instant>,
    pending: Option<String>,
}

impl ThrottledWriter {
    pub fn new(sink: Arc<dyn TurnSink>, interval: Duration) -> Self {
        Self {
            sink,
            interval,
            last_write: None,
            pending: None,
        }
    }

    /// Queues `text` as the newest snapshot, writing it through when the
    /// interval has passed. Skipped snapshots are superseded, never lost:
    /// each one contains the full text so far.
    pub async fn push(&mut self, text: String) {
        match self.last_write {
            Some(at) if at.elapsed() < self.interval => self.pending = Some(text),
            _ => self.write_now(text).await,
        }
    }

    /// Writes immediately, interval or not. Used for status lines that must
    /// be visible before a tool starts running.
    pub async fn write_now(&mut self, text: String) {
        self.pending = None;
        self.last_write = Some(Instant::now());
        self.sink.write(text).await;
    }

    /// Flushes whatever is still queued.
    pub async fn finish(&mut self) {
        if let Some(text) = self.pending.take() {
            self.last_write = Some(Instant::now());
            self.sink.write(text).await;
        }
    }
}
