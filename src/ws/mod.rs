//! WebSocket client library
//!
//! Provides a reusable WebSocket client with automatic reconnection,
//! jittered exponential backoff, ping/pong keepalive, an idle-read
//! timeout, and a published connection state machine.

mod client;
mod types;

pub use client::WsClient;
pub use types::{ConnectorState, WsConfig, WsError, WsMessage};
