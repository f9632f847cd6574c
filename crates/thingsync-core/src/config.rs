// ── Runtime sync configuration ──
//
// These types describe *how* to talk to a things service and where the
// catalog is cached. They never read config files themselves: the CLI
// builds a `SyncConfig` (usually from thingsync-config) and hands it in.

use std::path::PathBuf;
use std::time::Duration;

use url::Url;

use thingsync_api::{ReconnectConfig, TlsMode, TransportConfig};

use crate::cache::{FileStorage, PersistentCache};
use crate::error::CoreError;
use crate::grouping::GroupingStrategy;

/// Default metadata TTL: one day.
pub const DEFAULT_METADATA_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Default battery percentage below which a device is reported as low.
pub const DEFAULT_LOW_BATTERY_THRESHOLD: f64 = 20.0;

/// TLS verification strategy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TlsVerification {
    /// System CA store (strict).
    #[default]
    SystemDefaults,
    /// Custom CA certificate file.
    CustomCa(PathBuf),
    /// Skip verification (self-signed home servers).
    DangerAcceptInvalid,
}

/// Configuration for syncing against a single things service.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Service root, e.g. `http://192.168.1.20:5000/`.
    pub server_url: Url,
    /// Explicit WebSocket URL. Derived from `server_url` when unset.
    pub stream_url: Option<Url>,
    pub tls: TlsVerification,
    /// Request timeout.
    pub timeout: Duration,
    /// How long cached metadata is considered fresh. `None` never expires.
    pub metadata_ttl: Option<Duration>,
    /// Directory for the persistent cache. `None` keeps it in memory.
    pub cache_dir: Option<PathBuf>,
    pub grouping: GroupingStrategy,
    pub reconnect: ReconnectConfig,
    pub low_battery_threshold: f64,
    /// How often `start()` re-checks the catalog hash (seconds). 0 = never.
    pub revalidate_interval_secs: u64,
}

impl SyncConfig {
    /// Defaults for everything except the service URL.
    pub fn new(server_url: Url) -> Self {
        Self {
            server_url,
            stream_url: None,
            tls: TlsVerification::default(),
            timeout: Duration::from_secs(10),
            metadata_ttl: Some(DEFAULT_METADATA_TTL),
            cache_dir: None,
            grouping: GroupingStrategy::default(),
            reconnect: ReconnectConfig::default(),
            low_battery_threshold: DEFAULT_LOW_BATTERY_THRESHOLD,
            revalidate_interval_secs: 0,
        }
    }

    /// The socket.io WebSocket endpoint.
    ///
    /// Without an explicit `stream_url`, `http(s)://host/base/` becomes
    /// `ws(s)://host/base/socket.io/?EIO=4&transport=websocket`.
    pub fn stream_url(&self) -> Result<Url, CoreError> {
        if let Some(url) = &self.stream_url {
            return Ok(url.clone());
        }

        let mut url = self.server_url.clone();
        let scheme = match url.scheme() {
            "https" | "wss" => "wss",
            "http" | "ws" => "ws",
            other => {
                return Err(CoreError::Config {
                    message: format!("unsupported URL scheme for stream: {other}"),
                });
            }
        };
        url.set_scheme(scheme).map_err(|()| CoreError::Config {
            message: format!("cannot derive stream URL from {}", self.server_url),
        })?;
        url.path_segments_mut()
            .map_err(|()| CoreError::Config {
                message: format!("server URL cannot be a base: {}", self.server_url),
            })?
            .pop_if_empty()
            .extend(["socket.io", ""]);
        url.set_query(Some("EIO=4&transport=websocket"));
        Ok(url)
    }

    /// Open the cache described by `cache_dir`.
    pub fn open_cache(&self) -> PersistentCache {
        match &self.cache_dir {
            Some(dir) => PersistentCache::new(FileStorage::new(dir)),
            None => PersistentCache::in_memory(),
        }
    }

    pub(crate) fn transport(&self) -> TransportConfig {
        TransportConfig {
            tls: tls_to_transport(&self.tls),
            timeout: self.timeout,
        }
    }
}

fn tls_to_transport(tls: &TlsVerification) -> TlsMode {
    match tls {
        TlsVerification::SystemDefaults => TlsMode::System,
        TlsVerification::CustomCa(path) => TlsMode::CustomCa(path.clone()),
        TlsVerification::DangerAcceptInvalid => TlsMode::DangerAcceptInvalid,
    }
}
