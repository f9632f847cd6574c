// ── In-memory device catalog ──
//
// The registry's authoritative local view of which devices exist and
// what state they were last seen in.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::watch;

use thingsync_api::ThingState;

use super::collection::EntityCollection;
use crate::model::{CatalogHash, Device, DeviceType};
use crate::stream::CatalogStream;

/// Reactive catalog of devices keyed by name.
pub struct Catalog {
    devices: EntityCollection<Device>,
    last_rebuild: watch::Sender<Option<DateTime<Utc>>>,
    last_live_update: watch::Sender<Option<DateTime<Utc>>>,
}

impl Catalog {
    pub fn new() -> Self {
        let (last_rebuild, _) = watch::channel(None);
        let (last_live_update, _) = watch::channel(None);
        Self {
            devices: EntityCollection::new(),
            last_rebuild,
            last_live_update,
        }
    }

    // ── Bulk operations ──────────────────────────────────────────────

    /// Replace every device with a cache-loaded set.
    pub fn load(&self, devices: Vec<Device>) {
        self.devices
            .replace_all(devices.into_iter().map(|d| (d.name.clone(), d)).collect());
    }

    /// Commit a freshly fetched catalog. Devices that already existed keep
    /// their last known state.
    pub fn commit_rebuild(&self, devices: Vec<Device>) -> Vec<Device> {
        let merged: Vec<Device> = devices
            .into_iter()
            .map(|mut device| {
                if let Some(existing) = self.devices.get(&device.name) {
                    device.current_state.clone_from(&existing.current_state);
                }
                device
            })
            .collect();

        self.devices.replace_all(
            merged
                .iter()
                .map(|d| (d.name.clone(), d.clone()))
                .collect(),
        );
        self.last_rebuild.send_replace(Some(Utc::now()));
        merged
    }

    pub fn clear(&self) {
        self.devices.clear();
        self.last_rebuild.send_replace(None);
    }

    /// Clear every `stale` flag after the catalog was confirmed current.
    pub fn mark_fresh(&self) {
        for name in self.devices.names() {
            self.devices.update(&name, |d| d.stale = false);
        }
    }

    // ── State updates ────────────────────────────────────────────────

    /// Merge a partial state into a known device. Unknown names are ignored.
    pub fn merge_state(&self, name: &str, partial: &ThingState) -> bool {
        let merged = self.devices.update(name, |d| d.merge_state(partial));
        if merged {
            self.last_live_update.send_replace(Some(Utc::now()));
        }
        merged
    }

    /// Replace a known device's whole state.
    pub fn replace_state(&self, name: &str, state: ThingState) -> bool {
        self.devices.update(name, |d| d.current_state = state)
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub fn get(&self, name: &str) -> Option<Arc<Device>> {
        self.devices.get(name)
    }

    pub fn all(&self) -> Arc<Vec<Arc<Device>>> {
        self.devices.snapshot()
    }

    pub fn by_type(&self, device_type: DeviceType) -> Vec<Arc<Device>> {
        self.devices
            .snapshot()
            .iter()
            .filter(|d| d.device_type == device_type)
            .cloned()
            .collect()
    }

    /// Sorted device names.
    pub fn names(&self) -> Vec<String> {
        self.devices.names()
    }

    /// Sorted names of devices exposing a `battery` action.
    pub fn battery_powered(&self) -> Vec<String> {
        self.devices
            .snapshot()
            .iter()
            .filter(|d| d.capabilities.battery)
            .map(|d| d.name.clone())
            .collect()
    }

    /// Hash over the names currently in the catalog.
    pub fn local_hash(&self) -> CatalogHash {
        CatalogHash::of_names(self.devices.names())
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn subscribe(&self) -> CatalogStream {
        CatalogStream::new(self.devices.subscribe())
    }

    pub fn last_rebuild(&self) -> Option<DateTime<Utc>> {
        *self.last_rebuild.borrow()
    }

    pub fn last_live_update(&self) -> Option<DateTime<Utc>> {
        *self.last_live_update.borrow()
    }
}

impl Default for Catalog {
    fn default() -> Self {
        Self::new()
    }
}
