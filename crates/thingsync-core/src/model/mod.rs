// ── Domain model ──
//
// The canonical representation of devices as the registry, the cache and
// every consumer see them. Wire types live in `thingsync_api::models`.

pub mod device;
pub mod hash;

pub use device::{
    ActionDescriptor, ActionKind, Bounds, Capabilities, Capability, Device, DeviceType, Preset,
};
pub use hash::CatalogHash;
