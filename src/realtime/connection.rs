//! Live event stream connection with automatic reconnection.
//!
//! One session task owns the socket. Control operations (`connect`,
//! `disconnect`, `force_reconnect`) are serialized through the session slot,
//! so at most one session exists at a time.

use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use rand::Rng;
use serde_json::Value;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::interval;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};
use url::Url;

use super::subscribers::{Subscribers, Subscription, SubscriptionId};
use crate::config::StreamConfig;
use crate::domain::{ConnectionState, ConnectionStatusEvent, InboundEvent};
use crate::error::{Result, SentinelError};

/// How long `disconnect` waits for the session to close the socket
const SESSION_STOP_GRACE: Duration = Duration::from_secs(2);

/// How a streaming session ended without an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamEnd {
    /// Server closed the stream
    Closed,
    /// Local stop requested
    Stopped,
}

struct Session {
    stop_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl Session {
    async fn stop(mut self) {
        let _ = self.stop_tx.send(true);
        if tokio::time::timeout(SESSION_STOP_GRACE, &mut self.handle).await.is_err() {
            warn!("Stream session did not stop in {:?}, aborting", SESSION_STOP_GRACE);
            self.handle.abort();
        }
    }
}

/// State shared between the manager and its session task
struct Shared {
    url: String,
    config: StreamConfig,
    state: StdMutex<ConnectionState>,
    attempts: AtomicU32,
    status: Subscribers<ConnectionStatusEvent>,
    messages: Subscribers<InboundEvent>,
}

impl Shared {
    fn state(&self) -> ConnectionState {
        *self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Move to `next` and notify status subscribers. No-op if unchanged.
    fn transition(&self, next: ConnectionState, error: Option<String>) -> bool {
        let mut state = self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if *state == next {
            return false;
        }
        let previous = *state;
        *state = next;

        let event = ConnectionStatusEvent {
            state: next,
            previous,
            at: Utc::now(),
            attempt: self.attempts.load(Ordering::SeqCst),
            error,
        };
        // Published under the state lock so subscribers observe transitions in order
        self.status.publish(&event);
        drop(state);

        info!("Event stream {} -> {}", previous, next);
        true
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let base = Duration::from_millis(self.config.reconnect_delay_ms) * attempt.clamp(1, 10);
        let delay = base.min(Duration::from_millis(self.config.max_reconnect_delay_ms));

        // Jitter: ±25%
        let quarter = delay.as_millis() as i64 / 4;
        if quarter == 0 {
            return delay;
        }
        let offset = rand::thread_rng().gen_range(-quarter..=quarter);
        Duration::from_millis((delay.as_millis() as i64 + offset).max(0) as u64)
    }

    async fn run(self: Arc<Self>, mut stop_rx: watch::Receiver<bool>) {
        let max_attempts = self.config.max_reconnect_attempts.max(1);

        loop {
            if *stop_rx.borrow() {
                break;
            }
            self.transition(ConnectionState::Connecting, None);

            match self.connect_and_stream(&mut stop_rx).await {
                Ok(StreamEnd::Stopped) => break,
                Ok(StreamEnd::Closed) => {
                    info!("Event stream closed by server");
                    self.transition(ConnectionState::Disconnected, None);
                }
                Err(e) => {
                    let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
                    error!("Event stream error (attempt {}): {}", attempt, e);
                    if attempt >= max_attempts {
                        error!(
                            "Event stream reconnects exhausted after {} attempts, degraded",
                            attempt
                        );
                        self.transition(ConnectionState::Degraded, Some(e.to_string()));
                        break;
                    }
                    self.transition(ConnectionState::Disconnected, Some(e.to_string()));
                }
            }

            let delay = self.backoff(self.attempts.load(Ordering::SeqCst));
            info!("Reconnecting event stream in {:?}", delay);
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = stop_rx.changed() => break,
            }
        }
        debug!("Event stream session finished");
    }

    async fn connect_and_stream(&self, stop_rx: &mut watch::Receiver<bool>) -> Result<StreamEnd> {
        let url = Url::parse(&self.url)
            .map_err(|e| SentinelError::Internal(format!("Invalid WebSocket URL: {}", e)))?;
        let connect_timeout = Duration::from_secs(self.config.connect_timeout_secs);

        info!("Connecting to event stream: {}", url);

        let (ws_stream, _) = tokio::select! {
            res = tokio::time::timeout(connect_timeout, connect_async(url.as_str())) => {
                res.map_err(|_| {
                    SentinelError::timeout("event stream connect", connect_timeout.as_millis() as u64)
                })??
            }
            _ = stop_rx.changed() => return Ok(StreamEnd::Stopped),
        };

        self.attempts.store(0, Ordering::SeqCst);
        self.transition(ConnectionState::Connected, None);

        let (mut write, mut read) = ws_stream.split();
        let mut ping_interval = interval(Duration::from_secs(self.config.ping_interval_secs.max(1)));
        // First tick fires immediately
        ping_interval.tick().await;

        loop {
            tokio::select! {
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => self.handle_frame(&text),
                        Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                            Ok(text) => self.handle_frame(&text),
                            Err(_) => warn!("Dropping non-UTF-8 binary frame"),
                        },
                        Some(Ok(Message::Ping(data))) => {
                            if let Err(e) = write.send(Message::Pong(data)).await {
                                error!("Failed to send pong: {}", e);
                            }
                        }
                        Some(Ok(Message::Close(_))) => {
                            info!("Received close frame from event stream");
                            return Ok(StreamEnd::Closed);
                        }
                        Some(Err(e)) => return Err(SentinelError::WebSocket(e)),
                        None => return Ok(StreamEnd::Closed),
                        _ => {}
                    }
                }
                _ = ping_interval.tick() => {
                    write.send(Message::Ping(vec![])).await?;
                    debug!("Sent ping to event stream");
                }
                _ = stop_rx.changed() => {
                    let _ = write.send(Message::Close(None)).await;
                    return Ok(StreamEnd::Stopped);
                }
            }
        }
    }

    fn handle_frame(&self, text: &str) {
        let frame: Value = match serde_json::from_str(text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Dropping malformed stream frame: {}", e);
                return;
            }
        };
        match InboundEvent::from_frame(frame) {
            Some(event) => {
                debug!("Stream event {} from {:?}", event.kind.as_str(), event.source);
                self.messages.publish(&event);
            }
            None => warn!("Dropping stream frame without a type"),
        }
    }
}

/// Owns the live event stream and fans out status changes and messages.
pub struct RealtimeConnectionManager {
    shared: Arc<Shared>,
    session: Mutex<Option<Session>>,
}

impl RealtimeConnectionManager {
    pub fn new(ws_url: impl Into<String>, config: StreamConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                url: ws_url.into(),
                config,
                state: StdMutex::new(ConnectionState::Disconnected),
                attempts: AtomicU32::new(0),
                status: Subscribers::new(),
                messages: Subscribers::new(),
            }),
            session: Mutex::new(None),
        }
    }

    pub fn url(&self) -> &str {
        &self.shared.url
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    /// Consecutive failed connection attempts
    pub fn attempts(&self) -> u32 {
        self.shared.attempts.load(Ordering::SeqCst)
    }

    /// Start a session. No-op while one is connecting, connected or retrying.
    pub async fn connect(&self) {
        let mut slot = self.session.lock().await;
        if let Some(session) = slot.as_ref() {
            if !session.handle.is_finished() {
                debug!("connect ignored: stream session already active ({})", self.state());
                return;
            }
        }
        *slot = Some(self.spawn_session());
    }

    /// Stop the session and settle in `Disconnected`. Always safe to call.
    pub async fn disconnect(&self) {
        let mut slot = self.session.lock().await;
        if let Some(session) = slot.take() {
            session.stop().await;
        }
        self.shared.attempts.store(0, Ordering::SeqCst);
        self.shared.transition(ConnectionState::Disconnected, None);
    }

    /// Drop any session and start a fresh one with the attempt count reset.
    pub async fn force_reconnect(&self) {
        let mut slot = self.session.lock().await;
        if let Some(session) = slot.take() {
            session.stop().await;
        }
        self.shared.attempts.store(0, Ordering::SeqCst);
        info!("Forcing event stream reconnect");
        *slot = Some(self.spawn_session());
    }

    pub fn subscribe_status(&self) -> Subscription<ConnectionStatusEvent> {
        self.shared.status.subscribe()
    }

    pub fn subscribe_messages(&self) -> Subscription<InboundEvent> {
        self.shared.messages.subscribe()
    }

    pub fn unsubscribe_status(&self, id: SubscriptionId) -> bool {
        self.shared.status.unsubscribe(id)
    }

    pub fn unsubscribe_messages(&self, id: SubscriptionId) -> bool {
        self.shared.messages.unsubscribe(id)
    }

    fn spawn_session(&self) -> Session {
        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(Arc::clone(&self.shared).run(stop_rx));
        Session { stop_tx, handle }
    }
}

impl Drop for RealtimeConnectionManager {
    fn drop(&mut self) {
        if let Some(session) = self.session.get_mut().take() {
            session.handle.abort();
        }
    }
}
