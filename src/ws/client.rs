//! WebSocket client with automatic reconnection

use super::types::{ConnectorState, WsConfig, WsError, WsMessage};
use futures_util::{SinkExt, StreamExt};
use rand::Rng;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep, Instant};
use tokio_tungstenite::{connect_async, tungstenite::Message};

/// Reusable WebSocket client with automatic reconnection, ping/pong
/// keepalive, and an idle-read timeout.
///
/// The connection lifecycle is published on a watch channel so callers can
/// expose it on a health surface without owning the connection task.
pub struct WsClient {
    config: WsConfig,
}

impl WsClient {
    /// Create a new WebSocket client with the given configuration
    pub fn new(config: WsConfig) -> Self {
        Self { config }
    }

    /// Get the configured URL
    pub fn url(&self) -> &str {
        &self.config.url
    }

    /// Connect and return a message receiver plus a state watch.
    ///
    /// Spawns a background task that handles connection management,
    /// reconnection with jittered exponential backoff, and keepalive. The
    /// backoff resets to the initial delay once a connection has stayed up
    /// for the configured stable period. Dropping the receiver shuts the
    /// connection down.
    pub fn connect(&self) -> (mpsc::Receiver<WsMessage>, watch::Receiver<ConnectorState>) {
        let (tx, rx) = mpsc::channel(1024);
        let (state_tx, state_rx) = watch::channel(ConnectorState::Disconnected);
        let config = self.config.clone();

        tokio::spawn(async move {
            if let Err(e) = Self::run_connection_loop(config, tx, state_tx).await {
                tracing::error!(error = %e, "WebSocket connection loop failed");
            }
        });

        (rx, state_rx)
    }

    /// Run the connection loop with automatic reconnection
    async fn run_connection_loop(
        config: WsConfig,
        tx: mpsc::Sender<WsMessage>,
        state_tx: watch::Sender<ConnectorState>,
    ) -> Result<(), WsError> {
        let mut reconnect_attempts = 0u32;
        let mut reconnect_delay = config.initial_reconnect_delay;

        loop {
            let _ = state_tx.send(ConnectorState::Connecting);
            let connected_at = Instant::now();

            match Self::connect_and_stream(&config, &tx, &state_tx).await {
                Ok(()) => {
                    // Clean close: receiver dropped or explicit shutdown
                    let _ = state_tx.send(ConnectorState::Closing);
                    let _ = tx.send(WsMessage::Disconnected).await;
                    break;
                }
                Err(e) => {
                    // A sustained stable connection resets the backoff so a
                    // one-off drop after hours of uptime retries immediately.
                    if connected_at.elapsed() >= config.stable_reset {
                        reconnect_attempts = 0;
                        reconnect_delay = config.initial_reconnect_delay;
                    }

                    reconnect_attempts += 1;
                    tracing::warn!(
                        error = %e,
                        attempt = reconnect_attempts,
                        delay_ms = reconnect_delay.as_millis() as u64,
                        "WebSocket connection error, reconnecting..."
                    );

                    // Check max reconnects (0 = infinite)
                    if config.max_reconnect_attempts > 0
                        && reconnect_attempts >= config.max_reconnect_attempts
                    {
                        tracing::error!("Max reconnection attempts reached");
                        let _ = tx.send(WsMessage::Disconnected).await;
                        let _ = state_tx.send(ConnectorState::Disconnected);
                        return Err(WsError::MaxReconnectsExceeded);
                    }

                    if tx.is_closed() {
                        tracing::info!("Receiver dropped, stopping reconnection");
                        break;
                    }

                    let _ = tx
                        .send(WsMessage::Reconnecting {
                            attempt: reconnect_attempts,
                        })
                        .await;

                    let _ = state_tx.send(ConnectorState::Backoff);
                    sleep(Self::with_jitter(reconnect_delay)).await;
                    reconnect_delay = (reconnect_delay * 2).min(config.max_reconnect_delay);
                }
            }
        }

        let _ = state_tx.send(ConnectorState::Disconnected);
        Ok(())
    }

    /// Add uniform jitter of up to 25% so a fleet of connectors does not
    /// reconnect in lockstep.
    fn with_jitter(delay: Duration) -> Duration {
        let base_ms = delay.as_millis() as u64;
        if base_ms == 0 {
            return delay;
        }
        let jitter_ms = rand::thread_rng().gen_range(0..=base_ms / 4);
        delay + Duration::from_millis(jitter_ms)
    }

    /// Connect to WebSocket and stream messages until error or shutdown
    async fn connect_and_stream(
        config: &WsConfig,
        tx: &mpsc::Sender<WsMessage>,
        state_tx: &watch::Sender<ConnectorState>,
    ) -> Result<(), WsError> {
        tracing::info!(url = %config.url, "Connecting to WebSocket");

        let (ws_stream, _response) = connect_async(config.url.as_str())
            .await
            .map_err(|e| WsError::ConnectionFailed(e.to_string()))?;

        let (mut write, mut read) = ws_stream.split();

        tracing::info!("WebSocket connected");
        let _ = state_tx.send(ConnectorState::Connected);

        if tx.send(WsMessage::Connected).await.is_err() {
            return Ok(());
        }

        let mut ping_interval = tokio::time::interval(config.ping_interval);
        ping_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut waiting_for_pong = false;

        // Idle-read watchdog: if the server goes quiet past the timeout the
        // connection is torn down and re-established.
        let idle_check_every = (config.idle_read_timeout / 4).max(Duration::from_millis(100));
        let mut idle_check = tokio::time::interval(idle_check_every);
        idle_check.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut last_read = Instant::now();

        loop {
            tokio::select! {
                msg = read.next() => {
                    last_read = Instant::now();
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            if tx.send(WsMessage::Text(text)).await.is_err() {
                                tracing::debug!("Receiver dropped, closing connection");
                                return Ok(());
                            }
                        }
                        Some(Ok(Message::Ping(data))) => {
                            write.send(Message::Pong(data)).await
                                .map_err(|e| WsError::SendFailed(e.to_string()))?;
                        }
                        Some(Ok(Message::Pong(_))) => {
                            waiting_for_pong = false;
                        }
                        Some(Ok(Message::Close(_))) => {
                            return Err(WsError::ConnectionFailed("Server sent close frame".into()));
                        }
                        Some(Err(e)) => {
                            return Err(WsError::ConnectionFailed(e.to_string()));
                        }
                        None => {
                            return Err(WsError::ConnectionFailed("Stream ended unexpectedly".into()));
                        }
                        _ => {}
                    }
                }

                _ = idle_check.tick() => {
                    if last_read.elapsed() >= config.idle_read_timeout {
                        return Err(WsError::ConnectionFailed("Idle read timeout".into()));
                    }
                    if tx.is_closed() {
                        tracing::debug!("Receiver dropped, closing connection");
                        return Ok(());
                    }
                }

                _ = ping_interval.tick() => {
                    if waiting_for_pong {
                        return Err(WsError::ConnectionFailed("Pong timeout".into()));
                    }
                    write.send(Message::Ping(vec![])).await
                        .map_err(|e| WsError::SendFailed(e.to_string()))?;
                    waiting_for_pong = true;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ws_client_creation() {
        let client = WsClient::new(WsConfig::new("wss://example.com"));
        assert_eq!(client.url(), "wss://example.com");
    }

    #[test]
    fn test_jitter_bounds() {
        let base = Duration::from_millis(1000);
        for _ in 0..100 {
            let jittered = WsClient::with_jitter(base);
            assert!(jittered >= base);
            assert!(jittered <= base + Duration::from_millis(250));
        }
    }

    #[test]
    fn test_jitter_zero_delay() {
        assert_eq!(
            WsClient::with_jitter(Duration::ZERO),
            Duration::ZERO
        );
    }

    #[tokio::test]
    async fn test_ws_client_connection_failure() {
        // Connect to an invalid URL should retry then give up gracefully
        let client = WsClient::new(
            WsConfig::new("wss://invalid.localhost.test:12345")
                .max_reconnects(1)
                .initial_delay(Duration::from_millis(10)),
        );

        let (mut rx, _state) = client.connect();

        let mut got_disconnect = false;
        let timeout = tokio::time::timeout(Duration::from_secs(5), async {
            while let Some(msg) = rx.recv().await {
                match msg {
                    WsMessage::Disconnected => {
                        got_disconnect = true;
                        break;
                    }
                    WsMessage::Reconnecting { .. } => continue,
                    _ => {}
                }
            }
        });

        timeout.await.expect("Test timed out");
        assert!(got_disconnect, "Should receive Disconnected message");
    }

    #[tokio::test]
    async fn test_state_watch_reports_backoff() {
        let client = WsClient::new(
            WsConfig::new("wss://invalid.localhost.test:12345")
                .max_reconnects(2)
                .initial_delay(Duration::from_millis(50)),
        );

        let (_rx, mut state) = client.connect();

        let saw_backoff = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                state.changed().await.ok()?;
                if *state.borrow() == ConnectorState::Backoff {
                    return Some(());
                }
            }
        })
        .await
        .expect("Test timed out");

        assert!(saw_backoff.is_some(), "Should pass through Backoff state");
    }
}
