//! WebSocket side of the browser bridge.
//!
//! The extension dials `/bridge` once and keeps the socket open. Tool calls
//! become request frames `{id, command, params}` written to that socket;
//! the extension answers with `{id, ok, result|error}` and the hub routes
//! the reply back to the waiting call by id. One extension at a time: a
//! second connection replaces the first.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::AppState;
use crate::tools::bridge::BrowserBridge;

/// How long a tool call waits for the extension to answer one command.
pub(crate) const REPLY_TIMEOUT: Duration = Duration::from_secs(15);

type ReplyResult = std::result::Result<Value, String>;

pub struct BridgeHub {
    outbound: Mutex<Option<mpsc::Sender<String>>>,
    pending: Mutex<HashMap<String, oneshot::Sender<ReplyResult>>>,
}

impl BridgeHub {
    pub fn new() -> Self {
        Self {
            outbound: Mutex::new(None),
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Claims the hub for a freshly connected extension and hands back that
    /// connection's own sender, so its serve loop can later release exactly
    /// itself. Requests queued for a previous connection can no longer be
    /// answered.
    fn connect(&self) -> (mpsc::Sender<String>, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(32);
        let replaced = self
            .outbound
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(tx.clone())
            .is_some();
        if replaced {
            self.fail_pending("browser extension reconnected");
        }
        (tx, rx)
    }

    /// Releases the hub if `mine` is still the live connection. A socket
    /// that was already replaced must not tear down its successor.
    fn disconnect(&self, mine: &mpsc::Sender<String>) {
        let mut slot = self.outbound.lock().unwrap_or_else(PoisonError::into_inner);
        let ours = slot.as_ref().is_some_and(|live| live.same_channel(mine));
        if ours {
            *slot = None;
        }
        drop(slot);
        if ours {
            self.fail_pending("browser extension disconnected");
        }
    }

    fn fail_pending(&self, reason: &str) {
        let drained: Vec<_> = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .collect();
        for (_, tx) in drained {
            let _ = tx.send(Err(reason.to_string()));
        }
    }

    /// Routes one reply frame from the extension to its waiting call.
    fn resolve_frame(&self, text: &str) {
        let frame: ReplyFrame = match serde_json::from_str(text) {
            Ok(frame) => frame,
            Err(err) => {
                warn!("unreadable bridge reply: {err}");
                return;
            }
        };
        let waiter = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&frame.id);
        let Some(waiter) = waiter else {
            debug!("bridge reply {} has no waiter", frame.id);
            return;
        };
        let result = if frame.ok {
            Ok(frame.result.unwrap_or(Value::Null))
        } else {
            Err(frame
                .error
                .unwrap_or_else(|| "unspecified extension error".to_string()))
        };
        let _ = waiter.send(result);
    }

    fn live_sender(&self) -> Option<mpsc::Sender<String>> {
        self.outbound
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn forget(&self, id: &str) {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id);
    }
}

#[async_trait]
impl BrowserBridge for BridgeHub {
    async fn request(&self, command: &str, params: Value) -> anyhow::Result<Value> {
        let Some(sender) = self.live_sender() else {
            anyhow::bail!("browser extension is not connected (command {command})");
        };
        let id = Uuid::new_v4().to_string();
        let frame = json!({ "id": id, "command": command, "params": params }).to_string();

        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.clone(), tx);

        if sender.send(frame).await.is_err() {
            self.forget(&id);
            anyhow::bail!("browser extension hung up before {command} was sent");
        }

        match tokio::time::timeout(REPLY_TIMEOUT, rx).await {
            Ok(Ok(Ok(result))) => Ok(result),
            Ok(Ok(Err(reason))) => anyhow::bail!("{command} failed: {reason}"),
            Ok(Err(_)) => anyhow::bail!("{command} reply channel closed"),
            Err(_) => {
                self.forget(&id);
                anyhow::bail!(
                    "{command} timed out after {}s waiting for the extension",
                    REPLY_TIMEOUT.as_secs()
                )
            }
        }
    }
}

#[derive(Deserialize)]
struct ReplyFrame {
    id: String,
    ok: bool,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<String>,
}

pub(crate) async fn bridge_ws(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| serve_extension(socket, state))
}

/// Owns the socket for one extension connection: writes queued request
/// frames out and feeds reply frames back into the hub.
async fn serve_extension(mut socket: WebSocket, state: AppState) {
    let hub = state.bridge;
    let (mine, mut outbound) = hub.connect();
    info!("browser extension connected");

    loop {
        tokio::select! {
            frame = outbound.recv() => match frame {
                Some(frame) => {
                    if socket.send(Message::Text(frame.into())).await.is_err() {
                        break;
                    }
                }
                // Replaced by a newer connection; that one owns the hub now.
                None => break,
            },
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Text(text))) => hub.resolve_frame(text.as_str()),
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    warn!("bridge socket error: {err}");
                    break;
                }
            },
        }
    }

    hub.disconnect(&mine);
    info!("browser extension disconnected");
}
