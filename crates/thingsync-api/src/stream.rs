//! Event stream with auto-reconnect.
//!
//! Connects to the things service's socket.io endpoint over a raw
//! WebSocket (`EIO=4`, `transport=websocket`) and streams parsed events
//! through a [`tokio::sync::broadcast`] channel. Reconnection with
//! exponential backoff + jitter happens here, at the transport level:
//! consumers only ever see [`StreamEvent::Disconnected`] followed, once the
//! link is back, by [`StreamEvent::Connected`].
//!
//! # Example
//!
//! ```rust,ignore
//! use thingsync_api::stream::{EventStreamHandle, ReconnectConfig, StreamEvent};
//! use tokio_util::sync::CancellationToken;
//!
//! let url = "ws://hub.local:5000/socket.io/?EIO=4&transport=websocket".parse()?;
//! let handle = EventStreamHandle::spawn(url, ReconnectConfig::default(), CancellationToken::new());
//! let mut rx = handle.subscribe();
//!
//! while let Ok(event) = rx.recv().await {
//!     if let StreamEvent::ThingMessage(things) = event.as_ref() {
//!         println!("{things:?}");
//!     }
//! }
//! ```

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::broadcast;
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::Error;
use crate::models::ThingState;

// ── Event names ──────────────────────────────────────────────────────

/// Routine per-thing partial state push: `{ name: partialState }`.
pub const THING_MSG_EVENT: &str = "mqtt_thing_msg";
/// One-shot "network map ready" notification.
pub const NETWORK_MAP_EVENT: &str = "mqtt_networkmap";
pub const CONNECT_EVENT: &str = "connect";
pub const DISCONNECT_EVENT: &str = "disconnect";

const EVENT_CHANNEL_CAPACITY: usize = 1024;

// ── StreamEvent ──────────────────────────────────────────────────────

/// A parsed event from the stream.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// The link is up (initial connect or successful reconnect).
    Connected,
    /// The link dropped; the transport is retrying in the background.
    Disconnected,
    /// `mqtt_thing_msg`: partial states keyed by thing name, as received.
    ThingMessage(ThingState),
    /// `mqtt_networkmap`: the network map payload.
    NetworkMap(Value),
    /// Any other named event.
    Other { name: String, payload: Value },
}

impl StreamEvent {
    /// Build an event from its socket.io name and payload.
    ///
    /// Returns `None` for a `mqtt_thing_msg` whose payload is not an object.
    pub fn from_named(name: &str, payload: Value) -> Option<Self> {
        match name {
            THING_MSG_EVENT => match payload {
                Value::Object(things) => Some(Self::ThingMessage(things)),
                other => {
                    tracing::debug!(payload = %other, "ignoring non-object thing message");
                    None
                }
            },
            NETWORK_MAP_EVENT => Some(Self::NetworkMap(payload)),
            CONNECT_EVENT => Some(Self::Connected),
            DISCONNECT_EVENT => Some(Self::Disconnected),
            other => Some(Self::Other {
                name: other.to_owned(),
                payload,
            }),
        }
    }
}

// ── ReconnectConfig ──────────────────────────────────────────────────

/// Exponential backoff configuration for stream reconnection.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectConfig {
    /// Delay before the first reconnection attempt. Default: 1s.
    pub initial_delay: Duration,

    /// Upper bound on backoff delay. Default: 30s.
    pub max_delay: Duration,

    /// Maximum reconnection attempts before giving up.
    /// `None` means retry forever.
    pub max_retries: Option<u32>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_retries: None,
        }
    }
}

// ── EventStreamHandle ────────────────────────────────────────────────

/// Handle to a running event stream.
///
/// Call [`shutdown`](Self::shutdown) to tear down the background task.
pub struct EventStreamHandle {
    event_rx: broadcast::Receiver<Arc<StreamEvent>>,
    cancel: CancellationToken,
}

impl EventStreamHandle {
    /// Spawn the connect/read/reconnect loop for `ws_url`.
    ///
    /// Returns immediately; the first connection attempt happens in the
    /// background. Must be called from within a tokio runtime.
    pub fn spawn(ws_url: Url, reconnect: ReconnectConfig, cancel: CancellationToken) -> Self {
        let (event_tx, event_rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        let task_cancel = cancel.clone();
        tokio::spawn(async move {
            ws_loop(ws_url, event_tx, reconnect, task_cancel).await;
        });

        Self { event_rx, cancel }
    }

    /// Wrap an externally driven event channel (alternate transports, tests).
    ///
    /// `cancel` is cancelled by [`shutdown`](Self::shutdown) so the producer
    /// can stop.
    pub fn from_receiver(
        event_rx: broadcast::Receiver<Arc<StreamEvent>>,
        cancel: CancellationToken,
    ) -> Self {
        Self { event_rx, cancel }
    }

    /// Get a new broadcast receiver for the event stream.
    ///
    /// If a consumer falls behind, it receives
    /// [`broadcast::error::RecvError::Lagged`].
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<StreamEvent>> {
        self.event_rx.resubscribe()
    }

    /// Signal the background task to shut down.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

// ── Background reconnection loop ─────────────────────────────────────

/// Main loop: connect → read → on error, backoff → reconnect.
async fn ws_loop(
    ws_url: Url,
    event_tx: broadcast::Sender<Arc<StreamEvent>>,
    reconnect: ReconnectConfig,
    cancel: CancellationToken,
) {
    let mut attempt: u32 = 0;

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            result = connect_and_read(&ws_url, &event_tx, &cancel) => {
                match result {
                    // Clean close: reset the counter and reconnect immediately.
                    Ok(()) => {
                        if cancel.is_cancelled() {
                            break;
                        }
                        tracing::info!("event stream closed cleanly, reconnecting");
                        attempt = 0;
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, attempt, "event stream error");

                        if let Some(max) = reconnect.max_retries {
                            if attempt >= max {
                                tracing::error!(
                                    max_retries = max,
                                    "event stream reconnection limit reached, giving up"
                                );
                                break;
                            }
                        }

                        let delay = calculate_backoff(attempt, &reconnect);
                        tracing::info!(
                            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                            attempt,
                            "waiting before reconnect"
                        );

                        tokio::select! {
                            biased;
                            () = cancel.cancelled() => break,
                            () = tokio::time::sleep(delay) => {}
                        }

                        attempt += 1;
                    }
                }
            }
        }
    }

    tracing::debug!("event stream loop exiting");
}

// ── Single connection lifecycle ──────────────────────────────────────

/// Establish one WebSocket connection and read frames until it drops.
///
/// Emits `Connected` once the handshake succeeds and `Disconnected` when
/// the connection ends for any reason after that.
async fn connect_and_read(
    url: &Url,
    event_tx: &broadcast::Sender<Arc<StreamEvent>>,
    cancel: &CancellationToken,
) -> Result<(), Error> {
    tracing::info!(url = %url, "connecting event stream");

    let (ws_stream, _response) = tokio_tungstenite::connect_async(url.as_str())
        .await
        .map_err(|e| Error::StreamConnect(e.to_string()))?;

    tracing::info!("event stream connected");
    let _ = event_tx.send(Arc::new(StreamEvent::Connected));

    let (mut write, mut read) = ws_stream.split();
    let outcome = loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break Ok(()),
            frame = read.next() => {
                match frame {
                    Some(Ok(tungstenite::Message::Text(text))) => match parse_frame(&text) {
                        Frame::Open => {
                            // Join the default namespace.
                            if let Err(e) = write.send(tungstenite::Message::Text("40".into())).await {
                                break Err(Error::StreamConnect(e.to_string()));
                            }
                        }
                        Frame::Ping => {
                            if let Err(e) = write.send(tungstenite::Message::Text("3".into())).await {
                                break Err(Error::StreamConnect(e.to_string()));
                            }
                        }
                        Frame::Event(event) => {
                            // Send errors only mean nobody is listening right now.
                            let _ = event_tx.send(Arc::new(event));
                        }
                        Frame::Ignore => {}
                    },
                    Some(Ok(tungstenite::Message::Close(frame))) => {
                        if let Some(ref cf) = frame {
                            tracing::info!(code = %cf.code, reason = %cf.reason, "event stream close frame");
                        }
                        break Ok(());
                    }
                    Some(Err(e)) => break Err(Error::StreamConnect(e.to_string())),
                    None => {
                        tracing::info!("event stream ended");
                        break Ok(());
                    }
                    // Binary, Ping, Pong, raw frames
                    Some(Ok(_)) => {}
                }
            }
        }
    };

    let _ = event_tx.send(Arc::new(StreamEvent::Disconnected));
    outcome
}

// ── Frame parsing ────────────────────────────────────────────────────

/// What a single text frame means for the connection.
#[derive(Debug, PartialEq)]
enum Frame {
    /// engine.io open packet (`0{...}`).
    Open,
    /// engine.io ping (`2`); must be answered with a pong.
    Ping,
    Event(StreamEvent),
    Ignore,
}

/// Parse one text frame.
///
/// Accepts socket.io event packets (`42["name", payload]`), bare event
/// arrays (`["name", payload]`) and `{"event": "name", "data": payload}`
/// objects.
fn parse_frame(text: &str) -> Frame {
    let text = text.trim();
    let body_start = text
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(text.len());
    let (packet_type, body) = text.split_at(body_start);

    match (packet_type, body.is_empty()) {
        ("0", _) => return Frame::Open,
        ("2", true) => return Frame::Ping,
        (_, true) => return Frame::Ignore,
        _ => {}
    }

    let value: Value = match serde_json::from_str(body) {
        Ok(v) => v,
        Err(e) => {
            tracing::debug!(error = %e, "failed to parse stream frame");
            return Frame::Ignore;
        }
    };

    let named = match value {
        Value::Array(mut items) if !items.is_empty() => {
            let payload = if items.len() > 1 {
                items.swap_remove(1)
            } else {
                Value::Null
            };
            items.first().and_then(Value::as_str).map(|name| (name.to_owned(), payload))
        }
        Value::Object(mut obj) => {
            let payload = obj.remove("data").unwrap_or(Value::Null);
            obj.get("event")
                .and_then(Value::as_str)
                .map(|name| (name.to_owned(), payload))
        }
        _ => None,
    };

    named
        .and_then(|(name, payload)| StreamEvent::from_named(&name, payload))
        .map_or(Frame::Ignore, Frame::Event)
}

// ── Backoff calculation ──────────────────────────────────────────────

/// Exponential backoff with jitter.
///
/// `delay = min(initial * 2^attempt, max) * (1 ± 0.25)`
fn calculate_backoff(attempt: u32, config: &ReconnectConfig) -> Duration {
    let exponent = i32::try_from(attempt.min(30)).unwrap_or(30);
    let base = config.initial_delay.as_secs_f64() * 2.0_f64.powi(exponent);
    let capped = base.min(config.max_delay.as_secs_f64());

    // Deterministic jitter seeded from the attempt number.
    let jitter_factor = 1.0 + 0.25 * (f64::from(attempt) * 7.3).sin();
    let with_jitter = (capped * jitter_factor).max(0.0);

    Duration::from_secs_f64(with_jitter)
}

// ── Tests ────────────────────────────────────────────────────────────
