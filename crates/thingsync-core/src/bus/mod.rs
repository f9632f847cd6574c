// ── Live update bus ──
//
// Owns the single streaming connection to the things service and the
// subscription table. The connection is opened when the first consumer
// shows interest and closed when the last one goes away. Every partial
// state is normalized once, then fanned out to each consumer that
// subscribed to that entity.
//
// The table lives behind a std `Mutex` that is never held across an
// `.await` and never held while a callback runs.

mod normalize;

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use serde_json::Value;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use url::Url;

use thingsync_api::{EventStreamHandle, ReconnectConfig, StreamEvent, ThingState};

use crate::error::CoreError;

pub use normalize::normalize_partial;

/// A normalized partial state: only the fields that changed.
pub type PartialState = ThingState;

type Callback = Arc<dyn Fn(&BusMessage) + Send + Sync>;

/// What a subscriber callback receives.
#[derive(Debug, Clone, PartialEq)]
pub enum BusMessage {
    State(PartialState),
    /// The stream (re)connected; state may have moved while it was down.
    Connected,
    Disconnected,
}

/// Observable state of the streaming link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// No interest, no connection.
    Closed,
    /// Connection requested, not yet confirmed.
    Connecting,
    Connected,
    /// Dropped; the transport is reconnecting.
    Disconnected,
}

// ── Connectors ───────────────────────────────────────────────────────

/// Opens the event stream the bus reads from.
pub trait StreamConnector: Send + Sync + 'static {
    fn connect(&self) -> Result<EventStreamHandle, CoreError>;
}

/// Connects to the things service's socket.io endpoint.
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    url: Url,
    reconnect: ReconnectConfig,
}

impl WebSocketConnector {
    pub fn new(url: Url, reconnect: ReconnectConfig) -> Self {
        Self { url, reconnect }
    }
}

impl StreamConnector for WebSocketConnector {
    fn connect(&self) -> Result<EventStreamHandle, CoreError> {
        Ok(EventStreamHandle::spawn(
            self.url.clone(),
            self.reconnect.clone(),
            CancellationToken::new(),
        ))
    }
}

/// Connector fed from an in-process broadcast channel.
///
/// Useful for alternate transports and for driving the bus in tests.
#[derive(Debug, Clone)]
pub struct ChannelConnector {
    tx: broadcast::Sender<Arc<StreamEvent>>,
    connects: Arc<AtomicUsize>,
    current: Arc<Mutex<Option<CancellationToken>>>,
}

impl ChannelConnector {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(256);
        Self {
            tx,
            connects: Arc::default(),
            current: Arc::default(),
        }
    }

    /// Push an event to the open connection, if any.
    pub fn emit(&self, event: StreamEvent) {
        let _ = self.tx.send(Arc::new(event));
    }

    /// How many times the bus opened a connection.
    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Whether the most recent connection is still open.
    pub fn is_open(&self) -> bool {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|token| !token.is_cancelled())
    }
}

impl Default for ChannelConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamConnector for ChannelConnector {
    fn connect(&self) -> Result<EventStreamHandle, CoreError> {
        let cancel = CancellationToken::new();
        *self.current.lock().unwrap_or_else(PoisonError::into_inner) = Some(cancel.clone());
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(EventStreamHandle::from_receiver(self.tx.subscribe(), cancel))
    }
}

// ── Subscription table ───────────────────────────────────────────────

struct Registration {
    token: u64,
    callback: Callback,
}

struct Connection {
    handle: EventStreamHandle,
    pump_cancel: CancellationToken,
}

impl Connection {
    fn close(self) {
        self.pump_cancel.cancel();
        self.handle.shutdown();
    }
}

#[derive(Default)]
struct Table {
    /// entity -> consumer id -> registration
    entities: HashMap<String, HashMap<u64, Registration>>,
    map_waiters: Vec<(u64, oneshot::Sender<Value>)>,
    connection: Option<Connection>,
    next_token: u64,
    next_consumer: u64,
}

impl Table {
    fn interest(&self) -> usize {
        self.subscription_count() + self.map_waiters.len()
    }

    fn subscription_count(&self) -> usize {
        self.entities.values().map(HashMap::len).sum()
    }

    fn token(&mut self) -> u64 {
        self.next_token += 1;
        self.next_token
    }
}

struct BusInner {
    connector: Box<dyn StreamConnector>,
    table: Mutex<Table>,
    link: watch::Sender<LinkState>,
}

impl BusInner {
    fn lock(&self) -> MutexGuard<'_, Table> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for BusInner {
    fn drop(&mut self) {
        let table = self.table.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(connection) = table.connection.take() {
            connection.close();
        }
    }
}

/// Open or close the connection so that it exists exactly while there is
/// interest.
fn sync_connection(inner: &Arc<BusInner>, table: &mut Table) {
    let interest = table.interest();

    if interest > 0 && table.connection.is_none() {
        if tokio::runtime::Handle::try_current().is_err() {
            warn!("no async runtime, live update stream not opened");
            return;
        }
        match inner.connector.connect() {
            Ok(handle) => {
                // Subscribe before spawning so no event slips past the pump.
                let rx = handle.subscribe();
                let pump_cancel = CancellationToken::new();
                tokio::spawn(pump(Arc::downgrade(inner), rx, pump_cancel.clone()));
                table.connection = Some(Connection {
                    handle,
                    pump_cancel,
                });
                inner.link.send_replace(LinkState::Connecting);
                info!(interest, "live update stream opened");
            }
            Err(e) => warn!(error = %e, "cannot open live update stream"),
        }
    } else if interest == 0 {
        if let Some(connection) = table.connection.take() {
            connection.close();
            inner.link.send_replace(LinkState::Closed);
            info!("live update stream closed, no subscribers left");
        }
    }
}

/// Forward stream events into the bus until cancelled or the bus is gone.
async fn pump(
    bus: Weak<BusInner>,
    mut rx: broadcast::Receiver<Arc<StreamEvent>>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            event = rx.recv() => match event {
                Ok(event) => {
                    let Some(inner) = bus.upgrade() else { break };
                    LiveUpdateBus { inner }.dispatch(&event);
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "live update bus lagged behind the stream");
                }
                Err(RecvError::Closed) => break,
            }
        }
    }
    debug!("live update pump exiting");
}

// ── LiveUpdateBus ────────────────────────────────────────────────────

/// Multiplexes one streaming connection to many per-entity subscribers.
///
/// Cheaply cloneable; clones share the connection and the table.
#[derive(Clone)]
pub struct LiveUpdateBus {
    inner: Arc<BusInner>,
}

impl LiveUpdateBus {
    pub fn new(connector: impl StreamConnector) -> Self {
        let (link, _) = watch::channel(LinkState::Closed);
        Self {
            inner: Arc::new(BusInner {
                connector: Box::new(connector),
                table: Mutex::new(Table::default()),
                link,
            }),
        }
    }

    /// A bus reading the things service's WebSocket stream.
    pub fn websocket(url: Url, reconnect: ReconnectConfig) -> Self {
        Self::new(WebSocketConnector::new(url, reconnect))
    }

    /// A new independent consumer.
    pub fn consumer(&self) -> BusConsumer {
        let id = {
            let mut table = self.inner.lock();
            table.next_consumer += 1;
            table.next_consumer
        };
        BusConsumer {
            bus: self.clone(),
            id,
        }
    }

    pub fn link_state(&self) -> watch::Receiver<LinkState> {
        self.inner.link.subscribe()
    }

    /// Whether the streaming connection is currently open.
    pub fn is_streaming(&self) -> bool {
        self.inner.lock().connection.is_some()
    }

    /// Total registered callbacks across all consumers and entities.
    pub fn subscription_count(&self) -> usize {
        self.inner.lock().subscription_count()
    }

    /// Wait for the next `mqtt_networkmap` event.
    ///
    /// Keeps the connection open while pending. Dropping the future
    /// withdraws the request.
    pub async fn request_network_map(&self) -> Result<Value, CoreError> {
        let (tx, rx) = oneshot::channel();
        let id = {
            let mut table = self.inner.lock();
            let id = table.token();
            table.map_waiters.push((id, tx));
            sync_connection(&self.inner, &mut table);
            id
        };
        let _guard = WaiterGuard {
            bus: Arc::downgrade(&self.inner),
            id,
        };

        rx.await.map_err(|_| CoreError::StreamUnavailable {
            reason: "network map request abandoned".into(),
        })
    }

    /// Route one stream event to its subscribers.
    ///
    /// Called by the connection pump; public so alternate transports can
    /// feed the bus directly.
    pub fn dispatch(&self, event: &StreamEvent) {
        match event {
            StreamEvent::ThingMessage(things) => {
                for (entity, partial) in things {
                    let Some(state) = normalize_partial(partial) else {
                        debug!(entity = %entity, "dropping non-object partial state");
                        continue;
                    };
                    let callbacks = self.callbacks_for(entity);
                    if callbacks.is_empty() {
                        trace!(entity = %entity, "no subscribers for entity");
                        continue;
                    }
                    let message = BusMessage::State(state);
                    for callback in callbacks {
                        callback(&message);
                    }
                }
            }
            StreamEvent::NetworkMap(map) => self.resolve_network_map(map),
            StreamEvent::Connected => {
                self.broadcast_link(LinkState::Connected, &BusMessage::Connected);
            }
            StreamEvent::Disconnected => {
                self.broadcast_link(LinkState::Disconnected, &BusMessage::Disconnected);
            }
            StreamEvent::Other { name, .. } => trace!(event = %name, "ignoring stream event"),
        }
    }

    fn callbacks_for(&self, entity: &str) -> Vec<Callback> {
        let table = self.inner.lock();
        table
            .entities
            .get(entity)
            .map(|regs| regs.values().map(|r| Arc::clone(&r.callback)).collect())
            .unwrap_or_default()
    }

    fn resolve_network_map(&self, map: &Value) {
        let waiters = {
            let mut table = self.inner.lock();
            let waiters = std::mem::take(&mut table.map_waiters);
            sync_connection(&self.inner, &mut table);
            waiters
        };
        debug!(waiters = waiters.len(), "network map received");
        for (_, tx) in waiters {
            let _ = tx.send(map.clone());
        }
    }

    fn broadcast_link(&self, state: LinkState, message: &BusMessage) {
        let callbacks: Vec<Callback> = {
            let table = self.inner.lock();
            if table.connection.is_none() {
                // Late event from a connection that was already closed.
                return;
            }
            table
                .entities
                .values()
                .flat_map(HashMap::values)
                .map(|r| Arc::clone(&r.callback))
                .collect()
        };
        self.inner.link.send_replace(state);
        info!(?state, subscribers = callbacks.len(), "live update link changed");
        for callback in callbacks {
            callback(message);
        }
    }
}

struct WaiterGuard {
    bus: Weak<BusInner>,
    id: u64,
}

impl Drop for WaiterGuard {
    fn drop(&mut self) {
        let Some(inner) = self.bus.upgrade() else {
            return;
        };
        let mut table = inner.lock();
        table.map_waiters.retain(|(id, _)| *id != self.id);
        sync_connection(&inner, &mut table);
    }
}

// ── Consumers and subscriptions ──────────────────────────────────────

/// One independent subscriber of the bus.
///
/// Holds at most one callback per entity: subscribing again to the same
/// entity replaces the previous callback.
#[derive(Clone)]
pub struct BusConsumer {
    bus: LiveUpdateBus,
    id: u64,
}

impl BusConsumer {
    pub fn subscribe<F>(&self, entity: impl Into<String>, callback: F) -> Subscription
    where
        F: Fn(&BusMessage) + Send + Sync + 'static,
    {
        let entity = entity.into();
        let inner = &self.bus.inner;
        let mut table = inner.lock();
        let token = table.token();

        let replaced = table
            .entities
            .entry(entity.clone())
            .or_default()
            .insert(
                self.id,
                Registration {
                    token,
                    callback: Arc::new(callback),
                },
            )
            .is_some();
        trace!(entity = %entity, consumer = self.id, replaced, "subscribed");

        sync_connection(inner, &mut table);
        Subscription {
            bus: Arc::downgrade(inner),
            entity,
            consumer: self.id,
            token,
        }
    }

    /// Entities this consumer currently has a callback for, sorted.
    pub fn entities(&self) -> Vec<String> {
        let table = self.bus.inner.lock();
        let mut entities: Vec<String> = table
            .entities
            .iter()
            .filter(|(_, regs)| regs.contains_key(&self.id))
            .map(|(entity, _)| entity.clone())
            .collect();
        entities.sort();
        entities
    }
}

/// Disposer for one callback registration. Dropping it unsubscribes.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    bus: Weak<BusInner>,
    entity: String,
    consumer: u64,
    token: u64,
}

impl Subscription {
    pub fn entity(&self) -> &str {
        &self.entity
    }

    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("entity", &self.entity)
            .field("consumer", &self.consumer)
            .finish_non_exhaustive()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let Some(inner) = self.bus.upgrade() else {
            return;
        };
        let mut table = inner.lock();

        let mut now_empty = false;
        if let Some(regs) = table.entities.get_mut(&self.entity) {
            // A newer subscription for the same entity replaced this one.
            if regs.get(&self.consumer).is_some_and(|r| r.token == self.token) {
                regs.remove(&self.consumer);
            }
            now_empty = regs.is_empty();
        }
        if now_empty {
            table.entities.remove(&self.entity);
        }

        sync_connection(&inner, &mut table);
    }
}
