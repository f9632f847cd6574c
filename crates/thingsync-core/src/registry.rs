// ── Registry synchronization ──
//
// The top-level orchestrator. Owns the in-memory catalog, decides when a
// full rebuild is needed by comparing catalog hashes, persists the result
// per category, and keeps device state current through the live update
// bus and an outgoing mutation queue.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use futures_util::future::join_all;
use serde::Serialize;
use serde_json::Value;
use strum::IntoEnumIterator;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use thingsync_api::{ThingState, ThingsClient};

use crate::bus::{BusConsumer, BusMessage, LinkState, LiveUpdateBus, Subscription, normalize_partial};
use crate::cache::PersistentCache;
use crate::config::SyncConfig;
use crate::debounce::{ControlValue, DebouncedControl, Mutation, MutationSender};
use crate::error::CoreError;
use crate::grouping::{Grouping, GroupingEngine};
use crate::model::{ActionDescriptor, ActionKind, Bounds, CatalogHash, Device, DeviceType};
use crate::store::Catalog;
use crate::stream::CatalogStream;

/// Sorted names of every known device.
pub const CATALOG_KEY: &str = "things_catalog";
/// Catalog hash recorded at the last successful rebuild.
pub const HASH_KEY: &str = "things_hash";

// ── Public state types ───────────────────────────────────────────────

/// Lifecycle of the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// No usable catalog yet.
    Uninitialized,
    /// A rebuild is in flight.
    Loading,
    Ready,
}

/// Outcome of [`RegistrySync::ensure_fresh`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// The remote hash matched; no metadata was fetched.
    UpToDate,
    Rebuilt { devices: usize },
}

/// A battery-powered device reporting a level under the threshold.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatteryReport {
    pub name: String,
    pub level: f64,
}

// ── RegistrySync ─────────────────────────────────────────────────────

/// Keeps the local device catalog consistent with the things service.
///
/// Cheaply cloneable via `Arc<RegistryInner>`. Construction only reads the
/// cache; call [`ensure_fresh`](Self::ensure_fresh) to reconcile with the
/// server and [`start`](Self::start) to run the background tasks.
#[derive(Clone)]
pub struct RegistrySync {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    config: SyncConfig,
    client: ThingsClient,
    cache: PersistentCache,
    bus: LiveUpdateBus,
    catalog: Catalog,
    grouping: GroupingEngine,
    state: watch::Sender<SyncState>,
    banner: watch::Sender<Option<String>>,
    needs_rebuild: AtomicBool,
    mutation_tx: MutationSender,
    mutation_rx: Mutex<Option<mpsc::UnboundedReceiver<Mutation>>>,
    live: Mutex<Option<LiveTracking>>,
    started: AtomicBool,
    cancel: CancellationToken,
    task_handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Drop for RegistryInner {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// The registry's own bus consumer, one subscription per catalog entity.
struct LiveTracking {
    consumer: BusConsumer,
    subscriptions: HashMap<String, Subscription>,
    cancel: CancellationToken,
}

impl Drop for LiveTracking {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl RegistrySync {
    /// Build the client, cache and bus described by `config`, then load
    /// the cached catalog. Does not touch the network.
    pub fn new(config: SyncConfig) -> Result<Self, CoreError> {
        let client = ThingsClient::new(config.server_url.clone(), &config.transport())?;
        let cache = config.open_cache();
        let bus = LiveUpdateBus::websocket(config.stream_url()?, config.reconnect.clone());
        Ok(Self::with_parts(config, client, cache, bus))
    }

    /// Assemble a registry from pre-built parts and load the cached catalog.
    pub fn with_parts(
        config: SyncConfig,
        client: ThingsClient,
        cache: PersistentCache,
        bus: LiveUpdateBus,
    ) -> Self {
        let (state, _) = watch::channel(SyncState::Uninitialized);
        let (banner, _) = watch::channel(None);
        let (mutation_tx, mutation_rx) = MutationSender::channel();

        let registry = Self {
            inner: Arc::new(RegistryInner {
                grouping: GroupingEngine::new(config.grouping),
                config,
                client,
                cache,
                bus,
                catalog: Catalog::new(),
                state,
                banner,
                needs_rebuild: AtomicBool::new(false),
                mutation_tx,
                mutation_rx: Mutex::new(Some(mutation_rx)),
                live: Mutex::new(None),
                started: AtomicBool::new(false),
                cancel: CancellationToken::new(),
                task_handles: Mutex::new(Vec::new()),
            }),
        };
        registry.load_cached_catalog();
        registry
    }

    fn load_cached_catalog(&self) {
        let inner = &self.inner;
        let mut devices = Vec::new();
        let mut missing = Vec::new();
        let mut expired = 0_usize;

        for device_type in DeviceType::iter() {
            let key = device_type.cache_key();
            match inner.cache.get_ignoring_expiry::<Vec<Device>>(key) {
                Some(cached) => {
                    if cached.expired {
                        expired += 1;
                    }
                    devices.extend(cached.value.into_iter().map(|mut device| {
                        device.stale = cached.expired;
                        device
                    }));
                }
                None => missing.push(key),
            }
        }

        let needs_rebuild = !missing.is_empty();
        inner.needs_rebuild.store(needs_rebuild, Ordering::SeqCst);
        let count = devices.len();
        inner.catalog.load(devices);

        if needs_rebuild {
            debug!(?missing, "catalog cache incomplete, rebuild required");
        } else {
            inner.state.send_replace(SyncState::Ready);
            info!(devices = count, expired_categories = expired, "catalog loaded from cache");
        }
    }

    // ── Accessors ────────────────────────────────────────────────────

    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }

    pub fn client(&self) -> &ThingsClient {
        &self.inner.client
    }

    pub fn cache(&self) -> &PersistentCache {
        &self.inner.cache
    }

    pub fn bus(&self) -> &LiveUpdateBus {
        &self.inner.bus
    }

    pub fn catalog(&self) -> &Catalog {
        &self.inner.catalog
    }

    pub fn state(&self) -> watch::Receiver<SyncState> {
        self.inner.state.subscribe()
    }

    /// The global error banner: the last transport failure, cleared by the
    /// next successful rebuild or hash check.
    pub fn banner(&self) -> watch::Receiver<Option<String>> {
        self.inner.banner.subscribe()
    }

    pub fn needs_rebuild(&self) -> bool {
        self.inner.needs_rebuild.load(Ordering::SeqCst)
    }

    // ── Freshness ────────────────────────────────────────────────────

    /// Rebuild if the cache is incomplete or the remote catalog hash moved.
    pub async fn ensure_fresh(&self) -> Result<Freshness, CoreError> {
        if self.needs_rebuild() {
            let devices = self.rebuild().await?;
            return Ok(Freshness::Rebuilt { devices });
        }

        let remote = match self.inner.client.known_things_hash().await {
            Ok(hash) => hash,
            Err(e) => return Err(self.fail(e.into())),
        };

        if self.hash_matches(&remote) {
            debug!(remote = %remote, "catalog hash unchanged");
            self.confirm_fresh();
            self.inner.banner.send_replace(None);
            self.inner.state.send_replace(SyncState::Ready);
            Ok(Freshness::UpToDate)
        } else {
            info!(remote = %remote, "catalog hash changed, rebuilding");
            let devices = self.rebuild().await?;
            Ok(Freshness::Rebuilt { devices })
        }
    }

    /// Whether `remote` matches the names we hold, or the hash the server
    /// reported at the last rebuild.
    fn hash_matches(&self, remote: &str) -> bool {
        if self.inner.catalog.local_hash().matches(remote) {
            return true;
        }
        self.inner
            .cache
            .get_ignoring_expiry::<CatalogHash>(HASH_KEY)
            .is_some_and(|stored| stored.value.matches(remote))
    }

    /// The catalog was confirmed current: clear stale flags and restart
    /// the TTL on the category caches.
    fn confirm_fresh(&self) {
        let catalog = &self.inner.catalog;
        if catalog.all().iter().any(|d| d.stale) {
            catalog.mark_fresh();
            let devices: Vec<Device> = catalog.all().iter().map(|d| Device::clone(d)).collect();
            if !self.persist(&devices) {
                self.inner.cache.remove(HASH_KEY);
            }
            debug!("stale catalog revalidated");
        }
    }

    /// Fetch the full catalog and commit it. Returns the device count.
    ///
    /// On failure the previous catalog and caches are left untouched and
    /// the error is published to the banner.
    pub async fn rebuild(&self) -> Result<usize, CoreError> {
        let previous = *self.inner.state.borrow();
        self.inner.state.send_replace(SyncState::Loading);

        match self.fetch_catalog().await {
            Ok((devices, hash)) => {
                let committed = self.inner.catalog.commit_rebuild(devices);
                if self.persist(&committed) {
                    self.inner.cache.save(HASH_KEY, &hash, None);
                } else {
                    // A partial write must not be trusted on the next load.
                    warn!("catalog cache write incomplete, next start rebuilds");
                    self.inner.cache.remove(HASH_KEY);
                }

                self.inner.needs_rebuild.store(false, Ordering::SeqCst);
                self.inner.banner.send_replace(None);
                self.inner.state.send_replace(SyncState::Ready);
                self.sync_live_subscriptions();
                info!(devices = committed.len(), hash = %hash, "catalog rebuilt");
                Ok(committed.len())
            }
            Err(e) => {
                self.inner.needs_rebuild.store(true, Ordering::SeqCst);
                self.inner.state.send_replace(previous);
                Err(self.fail(e))
            }
        }
    }

    /// Explicit user-requested rebuild.
    pub async fn reload(&self) -> Result<usize, CoreError> {
        self.inner.needs_rebuild.store(true, Ordering::SeqCst);
        self.rebuild().await
    }

    /// Forget every cached catalog key and the in-memory catalog.
    pub fn reset_cache(&self) {
        let cache = &self.inner.cache;
        for device_type in DeviceType::iter() {
            cache.remove(device_type.cache_key());
        }
        cache.remove(CATALOG_KEY);
        cache.remove(HASH_KEY);

        self.inner.catalog.clear();
        self.inner.needs_rebuild.store(true, Ordering::SeqCst);
        self.inner.state.send_replace(SyncState::Uninitialized);
        self.sync_live_subscriptions();
        info!("catalog cache reset");
    }

    async fn fetch_catalog(&self) -> Result<(Vec<Device>, CatalogHash), CoreError> {
        let client = &self.inner.client;

        // Read the hash first: if the catalog moves mid-rebuild, the next
        // check sees a mismatch rather than a false match.
        let remote_hash = match client.known_things_hash().await {
            Ok(hash) => Some(hash),
            Err(e) if e.is_not_found() || e.is_malformed() => {
                debug!(error = %e, "no usable remote hash, recording local hash");
                None
            }
            Err(e) => return Err(e.into()),
        };

        let names: BTreeSet<String> = client.list_things().await?.into_iter().collect();
        debug!(count = names.len(), "fetching device metadata");

        let results = join_all(names.iter().map(|name| async move {
            (name, client.thing_meta(name).await)
        }))
        .await;

        let mut devices = Vec::with_capacity(results.len());
        for (name, result) in results {
            match result {
                Ok(meta) => devices.push(Device::from_meta(name, &meta)),
                Err(e) if e.is_malformed() => {
                    warn!(device = %name, error = %e, "malformed metadata, classifying as unknown");
                    devices.push(Device::unknown(name));
                }
                Err(e) => return Err(e.into()),
            }
        }

        let hash = remote_hash.map_or_else(
            || CatalogHash::of_names(&names),
            |remote| CatalogHash::from_remote(&remote),
        );
        Ok((devices, hash))
    }

    /// Write every category cache and the name index. Returns `false` if
    /// any write failed; failed keys are left absent.
    fn persist(&self, devices: &[Device]) -> bool {
        let cache = &self.inner.cache;
        let ttl = self.inner.config.metadata_ttl;
        let mut complete = true;

        for device_type in DeviceType::iter() {
            let members: Vec<&Device> = devices
                .iter()
                .filter(|d| d.device_type == device_type)
                .collect();
            complete &= cache.save(device_type.cache_key(), &members, ttl);
        }

        let mut names: Vec<&str> = devices.iter().map(|d| d.name.as_str()).collect();
        names.sort_unstable();
        complete &= cache.save(CATALOG_KEY, &names, ttl);
        complete
    }

    /// Publish an error to the banner and hand it back.
    fn fail(&self, error: CoreError) -> CoreError {
        warn!(error = %error, "things service request failed");
        self.inner.banner.send_replace(Some(error.to_string()));
        error
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub fn devices(&self, device_type: DeviceType) -> Vec<Arc<Device>> {
        self.inner.catalog.by_type(device_type)
    }

    pub fn all_devices(&self) -> Arc<Vec<Arc<Device>>> {
        self.inner.catalog.all()
    }

    pub fn device(&self, name: &str) -> Option<Arc<Device>> {
        self.inner.catalog.get(name)
    }

    /// Group the names of one category, or of every device.
    pub fn grouped(&self, device_type: Option<DeviceType>) -> Grouping {
        let names: Vec<String> = match device_type {
            Some(dt) => self
                .inner
                .catalog
                .by_type(dt)
                .iter()
                .map(|d| d.name.clone())
                .collect(),
            None => self.inner.catalog.names(),
        };
        self.inner.grouping.group(names)
    }

    pub fn subscribe_catalog(&self) -> CatalogStream {
        self.inner.catalog.subscribe()
    }

    /// Sorted names of devices exposing a `battery` action.
    pub fn battery_powered(&self) -> Vec<String> {
        self.inner.catalog.battery_powered()
    }

    /// Battery devices whose last known level is below `threshold`,
    /// lowest first.
    pub fn low_battery(&self, threshold: f64) -> Vec<BatteryReport> {
        let mut reports: Vec<BatteryReport> = self
            .inner
            .catalog
            .all()
            .iter()
            .filter(|d| d.capabilities.battery)
            .filter_map(|d| {
                let level = d.battery_level()?;
                (level < threshold).then(|| BatteryReport {
                    name: d.name.clone(),
                    level,
                })
            })
            .collect();
        reports.sort_by(|a, b| a.level.total_cmp(&b.level).then_with(|| a.name.cmp(&b.name)));
        reports
    }

    // ── Live state ───────────────────────────────────────────────────

    /// Merge live partial states into every catalog device.
    ///
    /// Subscriptions follow the catalog across rebuilds. After the stream
    /// reconnects the whole world is reloaded, since updates may have been
    /// missed while it was down.
    pub fn track_live_state(&self) {
        {
            let mut live = lock(&self.inner.live);
            if live.is_some() {
                return;
            }
            let cancel = self.inner.cancel.child_token();
            if tokio::runtime::Handle::try_current().is_ok() {
                let registry = Arc::downgrade(&self.inner);
                let link = self.inner.bus.link_state();
                let handle = tokio::spawn(reload_on_reconnect(registry, link, cancel.clone()));
                lock(&self.inner.task_handles).push(handle);
            }
            *live = Some(LiveTracking {
                consumer: self.inner.bus.consumer(),
                subscriptions: HashMap::new(),
                cancel,
            });
        }
        self.sync_live_subscriptions();
    }

    /// Drop every live subscription held by the registry.
    pub fn stop_live_state(&self) {
        let tracking = lock(&self.inner.live).take();
        if let Some(tracking) = tracking {
            debug!(entities = tracking.subscriptions.len(), "live state tracking stopped");
        }
    }

    pub fn is_tracking_live_state(&self) -> bool {
        lock(&self.inner.live).is_some()
    }

    /// Bring the registry's subscriptions in line with the catalog names.
    fn sync_live_subscriptions(&self) {
        let mut live = lock(&self.inner.live);
        let Some(tracking) = live.as_mut() else {
            return;
        };

        let names: BTreeSet<String> = self.inner.catalog.names().into_iter().collect();
        tracking.subscriptions.retain(|name, _| names.contains(name));

        for name in names {
            if tracking.subscriptions.contains_key(&name) {
                continue;
            }
            let registry = Arc::downgrade(&self.inner);
            let entity = name.clone();
            let subscription = tracking.consumer.subscribe(name.clone(), move |msg| {
                if let BusMessage::State(partial) = msg {
                    if let Some(inner) = registry.upgrade() {
                        inner.catalog.merge_state(&entity, partial);
                    }
                }
            });
            tracking.subscriptions.insert(name, subscription);
        }
        debug!(entities = tracking.subscriptions.len(), "live subscriptions synced");
    }

    /// Replace one device's state from `GET /get/{name}`.
    pub async fn refresh_state(&self, name: &str) -> Result<(), CoreError> {
        if self.inner.catalog.get(name).is_none() {
            return Err(CoreError::DeviceNotFound { name: name.into() });
        }
        let state = match self.inner.client.thing_state(name).await {
            Ok(state) => state,
            Err(e) => return Err(self.fail(e.into())),
        };
        let state = normalize_partial(&Value::Object(state)).unwrap_or_default();
        self.inner.catalog.replace_state(name, state);
        Ok(())
    }

    /// Merge `GET /get_world` into the catalog. Returns how many known
    /// devices were updated.
    pub async fn load_world(&self) -> Result<usize, CoreError> {
        let world = match self.inner.client.world().await {
            Ok(world) => world,
            Err(e) => return Err(self.fail(e.into())),
        };

        let mut updated = 0;
        for (name, state) in &world {
            let Some(state) = normalize_partial(state) else {
                debug!(device = %name, "skipping non-object world entry");
                continue;
            };
            if self.inner.catalog.merge_state(name, &state) {
                updated += 1;
            }
        }
        debug!(updated, total = world.len(), "world state loaded");
        Ok(updated)
    }

    // ── Mutations ────────────────────────────────────────────────────

    /// Sender feeding the mutation worker spawned by [`start`](Self::start).
    pub fn mutation_sender(&self) -> MutationSender {
        self.inner.mutation_tx.clone()
    }

    /// A debounced control bound to one of a device's actions.
    pub fn control<T: ControlValue>(
        &self,
        name: &str,
        action: &str,
        initial: T,
    ) -> Result<DebouncedControl<T>, CoreError> {
        let descriptor = self.settable_action(name, action)?;
        Ok(DebouncedControl::for_action(
            name,
            &descriptor,
            initial,
            self.mutation_sender(),
        ))
    }

    /// Set one action now: validate, clamp numeric values into bounds,
    /// apply optimistically, then `PUT /set/{name}`.
    ///
    /// A failed request does not roll the optimistic state back.
    pub async fn set_action(&self, name: &str, action: &str, value: Value) -> Result<(), CoreError> {
        let descriptor = self.settable_action(name, action)?;
        let mut values = ThingState::new();
        values.insert(action.to_owned(), clamp_value(&descriptor, value));
        self.apply(name, &values).await
    }

    fn settable_action(&self, name: &str, action: &str) -> Result<ActionDescriptor, CoreError> {
        let device = self
            .inner
            .catalog
            .get(name)
            .ok_or_else(|| CoreError::DeviceNotFound { name: name.into() })?;
        let descriptor = device
            .action(action)
            .ok_or_else(|| CoreError::ActionNotFound {
                device: name.into(),
                action: action.into(),
            })?;
        if !descriptor.settable {
            return Err(CoreError::ReadOnlyAction {
                device: name.into(),
                action: action.into(),
            });
        }
        Ok(descriptor.clone())
    }

    async fn apply(&self, name: &str, values: &ThingState) -> Result<(), CoreError> {
        self.inner.catalog.merge_state(name, values);
        match self.inner.client.set_thing(name, values).await {
            Ok(()) => {
                debug!(device = %name, "mutation applied");
                Ok(())
            }
            Err(e) => Err(self.fail(e.into())),
        }
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Spawn the mutation worker and, when configured, the periodic
    /// revalidation task. Calling it again is a no-op.
    pub fn start(&self) {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut handles = lock(&self.inner.task_handles);

        if let Some(rx) = lock(&self.inner.mutation_rx).take() {
            handles.push(tokio::spawn(mutation_worker(self.clone(), rx)));
        }

        let interval_secs = self.inner.config.revalidate_interval_secs;
        if interval_secs > 0 {
            let registry = self.clone();
            let cancel = self.inner.cancel.clone();
            handles.push(tokio::spawn(revalidate_task(registry, interval_secs, cancel)));
        }
        debug!(revalidate_interval_secs = interval_secs, "registry started");
    }

    /// Cancel background tasks and release live subscriptions.
    pub async fn shutdown(&self) {
        self.inner.cancel.cancel();
        self.stop_live_state();

        let handles: Vec<JoinHandle<()>> = lock(&self.inner.task_handles).drain(..).collect();
        for handle in handles {
            let _ = handle.await;
        }
        debug!("registry shut down");
    }
}

/// Clamp numeric values into the action's bounds, keeping integers integral.
fn clamp_value(descriptor: &ActionDescriptor, value: Value) -> Value {
    let (ActionKind::Numeric, Some(bounds)) = (descriptor.kind, descriptor.bounds) else {
        return value;
    };
    clamp_number(&bounds, value)
}

fn clamp_number(bounds: &Bounds, value: Value) -> Value {
    if let Some(n) = value.as_i64() {
        Value::from(n.clamp_to(bounds))
    } else if let Some(n) = value.as_f64() {
        Value::from(n.clamp_to(bounds))
    } else {
        value
    }
}

// ── Background tasks ─────────────────────────────────────────────────

/// Drain the mutation queue, issuing one `PUT` per mutation.
async fn mutation_worker(registry: RegistrySync, mut rx: mpsc::UnboundedReceiver<Mutation>) {
    let cancel = registry.inner.cancel.clone();

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            mutation = rx.recv() => {
                let Some(mutation) = mutation else { break };
                // Failures already went to the banner.
                let _ = registry.apply(&mutation.thing, &mutation.values).await;
            }
        }
    }
    debug!("mutation worker exiting");
}

/// Periodically re-check the catalog hash.
async fn revalidate_task(registry: RegistrySync, interval_secs: u64, cancel: CancellationToken) {
    let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));
    interval.tick().await; // consume the immediate first tick

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = interval.tick() => {
                if let Err(e) = registry.ensure_fresh().await {
                    warn!(error = %e, "periodic revalidation failed");
                }
            }
        }
    }
}

/// Reload world state whenever the stream comes back after a drop.
async fn reload_on_reconnect(
    registry: Weak<RegistryInner>,
    mut link: watch::Receiver<LinkState>,
    cancel: CancellationToken,
) {
    let mut was_down = false;
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            changed = link.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = *link.borrow_and_update();
                match state {
                    LinkState::Disconnected => was_down = true,
                    LinkState::Connected if was_down => {
                        was_down = false;
                        let Some(inner) = registry.upgrade() else { break };
                        let registry = RegistrySync { inner };
                        if let Err(e) = registry.load_world().await {
                            warn!(error = %e, "world reload after reconnect failed");
                        }
                    }
                    _ => {}
                }
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
    use super::*;
    use crate::bus::ChannelConnector;
    use crate::cache::{ManualClock, MemoryStorage};
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use thingsync_api::{ThingMeta, TransportConfig};

    fn registry_with(cache: PersistentCache) -> RegistrySync {
        let config = SyncConfig::new("http://127.0.0.1:9".parse().unwrap());
        let client = ThingsClient::new(config.server_url.clone(), &TransportConfig::default()).unwrap();
        RegistrySync::with_parts(config, client, cache, LiveUpdateBus::new(ChannelConnector::new()))
    }

    fn device(name: &str, meta: Value) -> Device {
        let meta: ThingMeta = serde_json::from_value(meta).unwrap();
        Device::from_meta(name, &meta)
    }

    fn seed(cache: &PersistentCache, ttl: Option<Duration>) {
        for device_type in DeviceType::iter() {
            let members: Vec<Device> = match device_type {
                DeviceType::Light => vec![device(
                    "Lamp1",
                    json!({ "type": "light", "actions": { "brightness": { "min": 0, "max": 254 } } }),
                )],
                DeviceType::Sensor => vec![device(
                    "Door",
                    json!({ "type": "sensor", "actions": { "battery": { "settable": false } } }),
                )],
                _ => Vec::new(),
            };
            cache.save(device_type.cache_key(), &members, ttl);
        }
    }

    #[test]
    fn empty_cache_needs_rebuild() {
        let registry = registry_with(PersistentCache::in_memory());
        assert!(registry.needs_rebuild());
        assert_eq!(*registry.state().borrow(), SyncState::Uninitialized);
        assert!(registry.all_devices().is_empty());
    }

    #[test]
    fn complete_cache_is_ready_without_network() {
        let cache = PersistentCache::in_memory();
        seed(&cache, None);

        let registry = registry_with(cache);
        assert!(!registry.needs_rebuild());
        assert_eq!(*registry.state().borrow(), SyncState::Ready);
        assert_eq!(registry.devices(DeviceType::Light).len(), 1);
        assert_eq!(registry.battery_powered(), ["Door"]);
    }

    #[test]
    fn expired_categories_mark_devices_stale() {
        let clock = ManualClock::new(0);
        let cache = PersistentCache::with_clock(MemoryStorage::new(), clock.clone());
        seed(&cache, Some(Duration::from_secs(60)));
        clock.advance(Duration::from_secs(61));

        let registry = registry_with(cache);
        assert!(!registry.needs_rebuild(), "expired entries are still usable");
        assert!(registry.device("Lamp1").unwrap().stale);
    }

    #[test]
    fn one_missing_category_forces_rebuild() {
        let cache = PersistentCache::in_memory();
        seed(&cache, None);
        cache.remove(DeviceType::Scene.cache_key());

        let registry = registry_with(cache);
        assert!(registry.needs_rebuild());
        assert_eq!(registry.all_devices().len(), 2, "cached categories still load");
    }

    #[tokio::test]
    async fn set_action_validates_before_touching_the_network() {
        let cache = PersistentCache::in_memory();
        seed(&cache, None);
        let registry = registry_with(cache);

        let err = registry.set_action("Ghost", "state", json!(true)).await.unwrap_err();
        assert!(matches!(err, CoreError::DeviceNotFound { .. }));

        let err = registry.set_action("Lamp1", "color", json!("red")).await.unwrap_err();
        assert!(matches!(err, CoreError::ActionNotFound { .. }));

        let err = registry.set_action("Door", "battery", json!(5)).await.unwrap_err();
        assert!(matches!(err, CoreError::ReadOnlyAction { .. }));
    }

    #[test]
    fn clamp_keeps_integers_integral() {
        let bounds = Bounds::new(0.0, 254.0);
        assert_eq!(clamp_number(&bounds, json!(300)), json!(254));
        assert_eq!(clamp_number(&bounds, json!(-2.5)), json!(0.0));
        assert_eq!(clamp_number(&bounds, json!("loud")), json!("loud"));
    }

    #[test]
    fn low_battery_reports_sorted_levels_under_threshold() {
        let cache = PersistentCache::in_memory();
        seed(&cache, None);
        let registry = registry_with(cache);
        let catalog = registry.catalog();

        let level = |v: Value| json!({ "battery": v }).as_object().unwrap().clone();
        catalog.merge_state("Door", &level(json!(12)));
        assert_eq!(
            registry.low_battery(20.0),
            [BatteryReport { name: "Door".into(), level: 12.0 }]
        );

        catalog.merge_state("Door", &level(json!("55")));
        assert!(registry.low_battery(20.0).is_empty());
    }

    #[test]
    fn grouped_uses_the_configured_engine() {
        let cache = PersistentCache::in_memory();
        seed(&cache, None);
        let registry = registry_with(cache);

        let grouping = registry.grouped(None);
        assert_eq!(grouping.others().unwrap().members, ["Door", "Lamp1"]);
        let lights = registry.grouped(Some(DeviceType::Light));
        assert_eq!(lights.assignments.len(), 1);
    }

    #[tokio::test]
    async fn live_tracking_follows_catalog_and_merges_state() {
        let cache = PersistentCache::in_memory();
        seed(&cache, None);
        let registry = registry_with(cache);

        registry.track_live_state();
        assert!(registry.is_tracking_live_state());
        assert_eq!(registry.bus().subscription_count(), 2);

        registry.bus().dispatch(&thingsync_api::StreamEvent::ThingMessage(
            json!({ "Lamp1": { "state": "off", "brightness": null } })
                .as_object()
                .unwrap()
                .clone(),
        ));
        assert_eq!(registry.device("Lamp1").unwrap().current_state["state"], json!(false));

        registry.reset_cache();
        assert_eq!(registry.bus().subscription_count(), 0);
        registry.stop_live_state();
        assert!(!registry.is_tracking_live_state());
        assert!(!registry.bus().is_streaming());
    }
}
