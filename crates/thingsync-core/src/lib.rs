//! Device registry layer between `thingsync-api` and its consumers (the CLI).
//!
//! - **[`RegistrySync`]**: the facade. Loads the cached catalog at
//!   construction, revalidates it against the server's catalog hash with
//!   [`ensure_fresh()`](RegistrySync::ensure_fresh), and rebuilds every
//!   category in one commit when the hash moves.
//!
//! - **[`PersistentCache`]**: JSON values with save time and optional TTL
//!   over a [`Storage`] backend ([`MemoryStorage`] or [`FileStorage`]).
//!   A write that fails leaves its key absent.
//!
//! - **[`GroupingEngine`]**: groups device names by shared prefix, with an
//!   `Others` bucket always last.
//!
//! - **[`DebouncedControl`]**: turns a slider gesture into a single
//!   [`Mutation`], drained by the registry's worker.
//!
//! - **[`LiveUpdateBus`]**: one lazily opened socket.io stream fanned out to
//!   per-device [`Subscription`]s, with state payloads normalized first.
//!
//! - **[`Catalog`]** / **[`CatalogStream`]**: the in-memory device store
//!   (`DashMap` + `tokio::sync::watch`) and its filtered snapshot stream.

pub mod bus;
pub mod cache;
pub mod config;
pub mod debounce;
pub mod error;
pub mod grouping;
pub mod model;
pub mod registry;
pub mod store;
pub mod stream;

// ── Primary re-exports ──────────────────────────────────────────────
pub use bus::{BusConsumer, BusMessage, ChannelConnector, LinkState, LiveUpdateBus, Subscription};
pub use cache::{FileStorage, MemoryStorage, PersistentCache, Storage};
pub use config::{SyncConfig, TlsVerification};
pub use debounce::{ActionTarget, ControlState, DebouncedControl, Mutation, MutationSender};
pub use error::CoreError;
pub use grouping::{Group, Grouping, GroupingEngine, GroupingStrategy};
pub use registry::{BatteryReport, Freshness, RegistrySync, SyncState};
pub use store::Catalog;
pub use stream::{CatalogStream, DeviceFilter};

pub use model::{
    ActionDescriptor, ActionKind, Bounds, Capabilities, Capability, CatalogHash, Device,
    DeviceType, Preset,
};
