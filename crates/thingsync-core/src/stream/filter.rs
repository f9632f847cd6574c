// ── Filter predicates for device snapshots ──
//
// Used by the CLI to narrow catalog snapshots without re-querying.

use crate::model::{Capability, Device, DeviceType};

/// Filter predicate for device collections.
pub enum DeviceFilter {
    All,
    ByType(DeviceType),
    WithCapability(Capability),
    /// Read from an expired cache entry.
    Stale,
    /// Case-insensitive substring of the name.
    NameContains(String),
    Custom(Box<dyn Fn(&Device) -> bool + Send + Sync>),
}

impl DeviceFilter {
    pub fn matches(&self, device: &Device) -> bool {
        match self {
            Self::All => true,
            Self::ByType(dt) => device.device_type == *dt,
            Self::WithCapability(cap) => device.capabilities.has(*cap),
            Self::Stale => device.stale,
            Self::NameContains(needle) => device
                .name
                .to_lowercase()
                .contains(&needle.to_lowercase()),
            Self::Custom(f) => f(device),
        }
    }
}
