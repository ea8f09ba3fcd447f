//! Dashboard-side realtime client.
//!
//! Two loops run side by side. The subscribe loop keeps a websocket open,
//! reconnecting with exponential backoff until its attempts run out. The poll
//! loop fetches stats on a fixed interval, but only while the socket is down.
//! They coordinate through a single health flag.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use super::protocol::{ClientMessage, ServerMessage};
use crate::analytics::{Stats, TimeRange};
use crate::models::Event;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub max_attempts: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            max_attempts: 5,
        }
    }
}

impl BackoffPolicy {
    /// Delay before reconnect attempt `attempt` (0-based), `None` once exhausted.
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        if attempt >= self.max_attempts {
            return None;
        }
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        Some(self.base.saturating_mul(factor))
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// e.g. `ws://localhost:8080/ws`
    pub ws_url: String,
    /// e.g. `http://localhost:8080`
    pub api_base_url: String,
    pub rooms: Vec<String>,
    pub time_range: TimeRange,
    pub backoff: BackoffPolicy,
    pub poll_interval: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ClientUpdate {
    Connected,
    Disconnected,
    Event(Event),
    Stats { room: String, stats: Stats },
}

const SUBSCRIBED_MARKER: &[u8] = b"linkpulse-subscribed";

enum SessionEnd {
    Closed,
    Shutdown,
}

/// Stats endpoint backing a room, `None` for unknown room kinds.
pub fn stats_url(api_base_url: &str, room: &str, range: TimeRange) -> Option<String> {
    let base = api_base_url.trim_end_matches('/');
    match room.split_once(':')? {
        ("url", id) if !id.is_empty() => {
            Some(format!("{base}/api/stats/{id}?timeRange={range}"))
        }
        ("user", owner) if !owner.is_empty() => {
            Some(format!("{base}/api/users/{owner}/stats?timeRange={range}"))
        }
        _ => None,
    }
}

#[derive(Clone)]
pub struct RealtimeClient {
    config: ClientConfig,
    http: reqwest::Client,
    connected: Arc<AtomicBool>,
}

impl RealtimeClient {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
            connected: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Run both loops until `shutdown` flips to `true` (or its sender drops)
    /// or `updates` is closed.
    pub async fn run(&self, updates: mpsc::Sender<ClientUpdate>, shutdown: watch::Receiver<bool>) {
        tokio::join!(
            self.subscribe_loop(updates.clone(), shutdown.clone()),
            self.poll_loop(updates, shutdown),
        );
    }

    async fn subscribe_loop(
        &self,
        updates: mpsc::Sender<ClientUpdate>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut attempt = 0;

        loop {
            if *shutdown.borrow() {
                return;
            }

            match connect_async(self.config.ws_url.as_str()).await {
                Ok((stream, _)) => {
                    attempt = 0;
                    self.connected.store(true, Ordering::Release);
                    info!(url = %self.config.ws_url, "Realtime connected");
                    if updates.send(ClientUpdate::Connected).await.is_err() {
                        return;
                    }

                    let end = self.session(stream, &updates, &mut shutdown).await;
                    self.connected.store(false, Ordering::Release);
                    let _ = updates.send(ClientUpdate::Disconnected).await;

                    match end {
                        Ok(SessionEnd::Shutdown) => return,
                        Ok(SessionEnd::Closed) => debug!("Realtime connection closed"),
                        Err(err) => warn!(error = %err, "Realtime session failed"),
                    }
                    if updates.is_closed() {
                        return;
                    }
                }
                Err(err) => warn!(attempt, error = %err, "Realtime connect failed"),
            }

            let Some(delay) = self.config.backoff.delay_for(attempt) else {
                warn!(
                    attempts = self.config.backoff.max_attempts,
                    "Giving up on realtime connection, polling only"
                );
                return;
            };
            attempt += 1;

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.changed() => return,
            }
        }
    }

    async fn session(
        &self,
        stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
        updates: &mpsc::Sender<ClientUpdate>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<SessionEnd> {
        let (mut sink, mut source) = stream.split();

        for room in &self.config.rooms {
            let subscribe = serde_json::to_string(&ClientMessage::Subscribe { room: room.clone() })?;
            sink.send(Message::Text(subscribe))
                .await
                .context("Failed to send subscribe message")?;
        }
        // The server answers this ping only after it has handled the frames
        // sent before it, so its pong marks the subscriptions as live
        sink.send(Message::Ping(SUBSCRIBED_MARKER.to_vec()))
            .await
            .context("Failed to send subscription marker")?;
        let mut subscribed = false;

        loop {
            tokio::select! {
                msg = source.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            if let Ok(ServerMessage::Event { data }) = serde_json::from_str(&text) {
                                if updates.send(ClientUpdate::Event(data)).await.is_err() {
                                    return Ok(SessionEnd::Shutdown);
                                }
                            }
                        }
                        Some(Ok(Message::Pong(payload)))
                            if !subscribed && payload == SUBSCRIBED_MARKER =>
                        {
                            subscribed = true;
                            // Events published while unsubscribed are never
                            // replayed; from here on they are pushed, so the
                            // backfill covers everything before
                            if updates.is_closed() {
                                return Ok(SessionEnd::Shutdown);
                            }
                            self.poll_once(updates).await;
                        }
                        Some(Ok(Message::Close(_))) | None => return Ok(SessionEnd::Closed),
                        Some(Ok(_)) => {}
                        Some(Err(err)) => return Err(err.into()),
                    }
                }
                _ = shutdown.changed() => {
                    let _ = sink.send(Message::Close(None)).await;
                    return Ok(SessionEnd::Shutdown);
                }
            }
        }
    }

    async fn poll_loop(
        &self,
        updates: mpsc::Sender<ClientUpdate>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // Skip the first tick which fires immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.changed() => return,
            }
            if *shutdown.borrow() || updates.is_closed() {
                return;
            }
            if self.is_connected() {
                continue;
            }
            self.poll_once(&updates).await;
        }
    }

    async fn poll_once(&self, updates: &mpsc::Sender<ClientUpdate>) {
        for room in &self.config.rooms {
            match self.fetch_stats(room).await {
                Ok(Some(stats)) => {
                    let update = ClientUpdate::Stats {
                        room: room.clone(),
                        stats,
                    };
                    if updates.send(update).await.is_err() {
                        return;
                    }
                }
                Ok(None) => debug!(room = %room, "No stats endpoint for room"),
                Err(err) => warn!(room = %room, error = %err, "Stats poll failed"),
            }
        }
    }

    async fn fetch_stats(&self, room: &str) -> Result<Option<Stats>> {
        let Some(url) = stats_url(&self.config.api_base_url, room, self.config.time_range) else {
            return Ok(None);
        };
        let stats = self
            .http
            .get(&url)
            .send()
            .await
            .with_context(|| format!("GET {url}"))?
            .error_for_status()?
            .json::<Stats>()
            .await?;
        Ok(Some(stats))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_until_exhausted() {
        let policy = BackoffPolicy {
            base: Duration::from_millis(500),
            max_attempts: 5,
        };
        let delays: Vec<_> = (0..6).map(|a| policy.delay_for(a)).collect();
        assert_eq!(
            delays,
            vec![
                Some(Duration::from_millis(500)),
                Some(Duration::from_millis(1000)),
                Some(Duration::from_millis(2000)),
                Some(Duration::from_millis(4000)),
                Some(Duration::from_millis(8000)),
                None,
            ]
        );
    }

    #[test]
    fn test_backoff_saturates() {
        let policy = BackoffPolicy {
            base: Duration::from_secs(1),
            max_attempts: 100,
        };
        assert!(policy.delay_for(64).is_some());
    }

    #[test]
    fn test_stats_url() {
        assert_eq!(
            stats_url("http://localhost:8080/", "url:abc123", TimeRange::Day).as_deref(),
            Some("http://localhost:8080/api/stats/abc123?timeRange=24h")
        );
        assert_eq!(
            stats_url("http://localhost:8080", "user:u1", TimeRange::Week).as_deref(),
            Some("http://localhost:8080/api/users/u1/stats?timeRange=7d")
        );
        assert_eq!(stats_url("http://localhost:8080", "room", TimeRange::Week), None);
        assert_eq!(stats_url("http://localhost:8080", "url:", TimeRange::Week), None);
    }

    #[tokio::test]
    async fn test_unreachable_server_gives_up_and_polls() {
        let client = RealtimeClient::new(ClientConfig {
            // Port 9 (discard) on localhost is closed in test environments
            ws_url: "ws://127.0.0.1:9/ws".to_string(),
            api_base_url: "http://127.0.0.1:9".to_string(),
            rooms: vec!["url:abc123".to_string()],
            time_range: TimeRange::Day,
            backoff: BackoffPolicy {
                base: Duration::from_millis(1),
                max_attempts: 2,
            },
            poll_interval: Duration::from_millis(10),
        });
        let (tx, mut rx) = mpsc::channel(16);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let runner = {
            let client = client.clone();
            tokio::spawn(async move { client.run(tx, shutdown_rx).await })
        };

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!client.is_connected());
        assert!(rx.try_recv().is_err());

        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), runner)
            .await
            .unwrap()
            .unwrap();
    }
}
