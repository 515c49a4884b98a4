//! Engine error taxonomy.
//!
//! Only failures that abort a turn live here. Tool execution failures and
//! bad tool arguments never become `Err`: the registry folds them into a
//! `{"success": false, "reason": ...}` payload so the model can read the
//! failure and try again.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AgentError {
    /// Missing or invalid setup (no API key, unreadable config). Fatal for
    /// the operation that needed it.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The provider could not be reached or the connection died mid-stream.
    #[error("provider request failed: {0}")]
    Transport(String),

    /// The provider answered with a non-success status.
    #[error("provider returned {status}: {message}")]
    Provider { status: u16, message: String },

    /// A turn is already in flight; one conversation runs one turn at a time.
    #[error("another turn is already running")]
    Busy,

    /// The user stopped the turn. Whatever was already written stays.
    #[error("turn canceled")]
    Canceled,

    /// Automatic tool selection failed or timed out. Never aborts the turn
    /// that requested it.
    #[error("tool selection failed: {0}")]
    ToolSelection(String),
}

impl From<reqwest::Error> for AgentError {
    fn from(err: reqwest::Error) -> Self {
        AgentError::Transport(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, AgentError>;
