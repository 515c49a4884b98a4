//! Typed single-value stores persisted as JSON files.
//!
//! Every durable piece of daemon state (conversation log, tool activation
//! flags, usage ledger, macro programs, live settings) is one [`KvCell`]:
//! a whole value read and replaced atomically, mirrored to
//! `<data-dir>/<name>.json`, with a watch channel so interfaces can stream
//! snapshots to the panel.

use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use tokio::sync::{Mutex, watch};
use tracing::warn;

pub struct KvCell<T> {
    name: String,
    path: Option<PathBuf>,
    // Serializes read-modify-write cycles; the watch sender holds the value.
    write_lock: Mutex<()>,
    tx: watch::Sender<T>,
}

impl<T> KvCell<T>
where
    T: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Cell without a backing file. Used by tests and one-shot commands.
    pub fn in_memory(name: &str, initial: T) -> Self {
        Self {
            name: name.to_string(),
            path: None,
            write_lock: Mutex::new(()),
            tx: watch::Sender::new(initial),
        }
    }

    /// Opens `<dir>/<name>.json`, falling back to `initial` when the file is
    /// missing or unreadable. A corrupt file is logged and left in place; it
    /// gets overwritten on the next write.
    pub fn open(dir: &Path, name: &str, initial: T) -> Self {
        let path = dir.join(format!("{name}.json"));
        let value = match std::fs::read_to_string(&path) {
            Ok(raw) => match serde_json::from_str::<T>(&raw) {
                Ok(value) => value,
                Err(err) => {
                    warn!("store {name}: ignoring corrupt {}: {err}", path.display());
                    initial
                }
            },
            Err(_) => initial,
        };
        Self {
            name: name.to_string(),
            path: Some(path),
            write_lock: Mutex::new(()),
            tx: watch::Sender::new(value),
        }
    }

    pub fn get(&self) -> T {
        self.tx.borrow().clone()
    }

    /// Atomic read-modify-write. Concurrent callers are serialized, so every
    /// update sees the value the previous one produced.
    pub async fn set<F>(&self, apply: F) -> T
    where
        F: FnOnce(T) -> T,
    {
        let _guard = self.write_lock.lock().await;
        let next = apply(self.tx.borrow().clone());
        self.tx.send_replace(next.clone());
        self.persist(&next).await;
        next
    }

    pub fn subscribe(&self) -> watch::Receiver<T> {
        self.tx.subscribe()
    }

    async fn persist(&self, value: &T) {
        let Some(path) = &self.path else { return };
        let raw = match serde_json::to_string_pretty(value) {
            Ok(raw) => raw,
            Err(err) => {
                warn!("store {}: serialize failed: {err}", self.name);
                return;
            }
        };
        let tmp = path.with_extension("json.tmp");
        let written = async {
            tokio::fs::write(&tmp, raw.as_bytes()).await?;
            tokio::fs::rename(&tmp, path).await
        }
        .await;
        if let Err(err) = written {
            warn!("store {}: persist failed: {err}", self.name);
        }
    }
}
