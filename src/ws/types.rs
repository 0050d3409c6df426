//! WebSocket types and configuration

use serde::Serialize;
use std::time::Duration;

/// WebSocket client configuration
#[derive(Debug, Clone)]
pub struct WsConfig {
    /// WebSocket URL to connect to
    pub url: String,
    /// Maximum reconnection attempts before giving up (0 = infinite)
    pub max_reconnect_attempts: u32,
    /// Initial delay before first reconnection attempt
    pub initial_reconnect_delay: Duration,
    /// Maximum delay between reconnection attempts
    pub max_reconnect_delay: Duration,
    /// A connection alive for at least this long resets the backoff
    pub stable_reset: Duration,
    /// No inbound message for this long forces a reconnect
    pub idle_read_timeout: Duration,
    /// Interval for sending ping frames
    pub ping_interval: Duration,
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            max_reconnect_attempts: 0,
            initial_reconnect_delay: Duration::from_secs(1),
            max_reconnect_delay: Duration::from_secs(60),
            stable_reset: Duration::from_secs(60),
            idle_read_timeout: Duration::from_secs(60),
            ping_interval: Duration::from_secs(30),
        }
    }
}

impl WsConfig {
    /// Create a new config with the given URL
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// Set maximum reconnection attempts (0 = infinite)
    pub fn max_reconnects(mut self, n: u32) -> Self {
        self.max_reconnect_attempts = n;
        self
    }

    /// Set initial reconnection delay
    pub fn initial_delay(mut self, d: Duration) -> Self {
        self.initial_reconnect_delay = d;
        self
    }

    /// Set maximum reconnection delay
    pub fn max_delay(mut self, d: Duration) -> Self {
        self.max_reconnect_delay = d;
        self
    }

    /// Set the stable-connectivity period that resets backoff
    pub fn stable_reset(mut self, d: Duration) -> Self {
        self.stable_reset = d;
        self
    }

    /// Set the idle-read timeout
    pub fn idle_read_timeout(mut self, d: Duration) -> Self {
        self.idle_read_timeout = d;
        self
    }

    /// Set ping interval
    pub fn ping_interval(mut self, d: Duration) -> Self {
        self.ping_interval = d;
        self
    }
}

/// WebSocket message types delivered to the consumer
#[derive(Debug, Clone)]
pub enum WsMessage {
    /// Text message
    Text(String),
    /// Connection established
    Connected,
    /// Connection closed for good (shutdown or attempts exhausted)
    Disconnected,
    /// Reconnecting after failure
    Reconnecting { attempt: u32 },
}

/// Connection lifecycle state, published via a watch channel for the
/// health/status surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectorState {
    Disconnected,
    Connecting,
    Connected,
    Backoff,
    Closing,
}

impl std::fmt::Display for ConnectorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ConnectorState::Disconnected => "disconnected",
            ConnectorState::Connecting => "connecting",
            ConnectorState::Connected => "connected",
            ConnectorState::Backoff => "backoff",
            ConnectorState::Closing => "closing",
        };
        write!(f, "{}", s)
    }
}

/// WebSocket errors
#[derive(Debug, Clone)]
pub enum WsError {
    /// Connection failed
    ConnectionFailed(String),
    /// Maximum reconnection attempts exceeded
    MaxReconnectsExceeded,
    /// Send failed
    SendFailed(String),
}

impl std::fmt::Display for WsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WsError::ConnectionFailed(e) => write!(f, "Connection failed: {}", e),
            WsError::MaxReconnectsExceeded => write!(f, "Maximum reconnection attempts exceeded"),
            WsError::SendFailed(e) => write!(f, "Send failed: {}", e),
        }
    }
}

impl std::error::Error for WsError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ws_config_default() {
        let config = WsConfig::default();
        assert_eq!(config.max_reconnect_attempts, 0);
        assert_eq!(config.initial_reconnect_delay, Duration::from_secs(1));
        assert_eq!(config.max_reconnect_delay, Duration::from_secs(60));
        assert_eq!(config.idle_read_timeout, Duration::from_secs(60));
    }

    #[test]
    fn test_ws_config_builder() {
        let config = WsConfig::new("wss://example.com")
            .max_reconnects(5)
            .initial_delay(Duration::from_millis(500))
            .max_delay(Duration::from_secs(30))
            .stable_reset(Duration::from_secs(90))
            .idle_read_timeout(Duration::from_secs(45))
            .ping_interval(Duration::from_secs(15));

        assert_eq!(config.url, "wss://example.com");
        assert_eq!(config.max_reconnect_attempts, 5);
        assert_eq!(config.initial_reconnect_delay, Duration::from_millis(500));
        assert_eq!(config.max_reconnect_delay, Duration::from_secs(30));
        assert_eq!(config.stable_reset, Duration::from_secs(90));
        assert_eq!(config.idle_read_timeout, Duration::from_secs(45));
        assert_eq!(config.ping_interval, Duration::from_secs(15));
    }

    #[test]
    fn test_connector_state_display() {
        assert_eq!(ConnectorState::Connected.to_string(), "connected");
        assert_eq!(ConnectorState::Backoff.to_string(), "backoff");
    }

    #[test]
    fn test_ws_error_display() {
        let err = WsError::ConnectionFailed("timeout".to_string());
        assert_eq!(err.to_string(), "Connection failed: timeout");

        let err = WsError::MaxReconnectsExceeded;
        assert_eq!(err.to_string(), "Maximum reconnection attempts exceeded");
    }
}
