//! Durable daemon state, one JSON-backed cell per concern.

pub mod activation;
pub mod conversation;
pub mod kv;
pub mod program;
pub mod usage;
