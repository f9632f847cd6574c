// thingsync-api: Async client for the things service (HTTP endpoints + event stream)

pub mod client;
pub mod error;
pub mod models;
pub mod stream;
pub mod transport;

pub use client::ThingsClient;
pub use error::Error;
pub use models::{ActionMeta, PresetMeta, ThingMeta, ThingState};
pub use stream::{EventStreamHandle, ReconnectConfig, StreamEvent};
pub use transport::{TlsMode, TransportConfig};
