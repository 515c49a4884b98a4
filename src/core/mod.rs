//! Engine side of the daemon: conversation state, provider adapters, and
//! the orchestration that turns one chat message into one streamed reply.

pub mod chat;
pub mod config;
pub mod error;
pub mod llm;
pub mod orchestrator;
pub mod program_runner;
pub mod selector;
pub mod store;
pub mod suggestion;
pub mod throttle;
