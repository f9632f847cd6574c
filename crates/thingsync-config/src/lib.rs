//! Shared configuration for thingsync tools.
//!
//! TOML profiles layered with environment overrides, and translation to
//! `thingsync_core::SyncConfig`. The CLI adds flag-aware wrappers on top.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use thingsync_api::ReconnectConfig;
use thingsync_core::{GroupingStrategy, SyncConfig, TlsVerification};

/// Prefix for environment overrides, e.g. `THINGSYNC_DEFAULTS__TIMEOUT=5`.
pub const ENV_PREFIX: &str = "THINGSYNC_";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("profile '{name}' not found in config")]
    UnknownProfile { name: String },

    #[error("no profiles configured")]
    NoProfiles,

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Config {
    /// Default profile name.
    pub default_profile: Option<String>,

    /// Global defaults.
    #[serde(default)]
    pub defaults: Defaults,

    /// Named server profiles.
    #[serde(default)]
    pub profiles: HashMap<String, Profile>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_profile: Some("default".into()),
            defaults: Defaults::default(),
            profiles: HashMap::new(),
        }
    }
}

impl Config {
    /// Resolve a profile by name, falling back to `default_profile`, then
    /// to the only profile when exactly one exists.
    pub fn profile(&self, name: Option<&str>) -> Result<(String, &Profile), ConfigError> {
        if self.profiles.is_empty() {
            return Err(ConfigError::NoProfiles);
        }
        if let Some(name) = name.or(self.default_profile.as_deref()) {
            if let Some(profile) = self.profiles.get(name) {
                return Ok((name.to_owned(), profile));
            }
            if name != "default" || self.profiles.len() != 1 {
                return Err(ConfigError::UnknownProfile { name: name.into() });
            }
        }

        let mut profiles = self.profiles.iter();
        match (profiles.next(), profiles.next()) {
            (Some((name, profile)), None) => Ok((name.clone(), profile)),
            (None, _) => Err(ConfigError::NoProfiles),
            (Some(_), Some(_)) => Err(ConfigError::UnknownProfile {
                name: "default".into(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Defaults {
    #[serde(default = "default_output")]
    pub output: String,

    #[serde(default = "default_color")]
    pub color: String,

    #[serde(default)]
    pub insecure: bool,

    /// Request timeout (seconds).
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    /// Metadata cache TTL (seconds). 0 = never expire.
    #[serde(default = "default_metadata_ttl")]
    pub metadata_ttl: u64,

    #[serde(default)]
    pub grouping: GroupingStrategy,

    #[serde(default = "default_low_battery")]
    pub low_battery_threshold: f64,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            output: default_output(),
            color: default_color(),
            insecure: false,
            timeout: default_timeout(),
            metadata_ttl: default_metadata_ttl(),
            grouping: GroupingStrategy::default(),
            low_battery_threshold: default_low_battery(),
        }
    }
}

fn default_output() -> String {
    "table".into()
}
fn default_color() -> String {
    "auto".into()
}
fn default_timeout() -> u64 {
    10
}
fn default_metadata_ttl() -> u64 {
    thingsync_core::config::DEFAULT_METADATA_TTL.as_secs()
}
fn default_low_battery() -> f64 {
    thingsync_core::config::DEFAULT_LOW_BATTERY_THRESHOLD
}

/// A named things service profile.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Profile {
    /// Service base URL (e.g., "http://192.168.1.20:5000").
    pub server: String,

    /// Explicit WebSocket URL; derived from `server` when unset.
    pub stream_url: Option<String>,

    /// Path to custom CA certificate.
    pub ca_cert: Option<PathBuf>,

    /// Override insecure TLS setting.
    pub insecure: Option<bool>,

    /// Override timeout (seconds).
    pub timeout: Option<u64>,

    /// Override metadata TTL (seconds). 0 = never expire.
    pub metadata_ttl: Option<u64>,

    /// Cache directory; defaults to the platform cache dir for the profile.
    pub cache_dir: Option<PathBuf>,

    /// Override the grouping strategy.
    pub grouping: Option<GroupingStrategy>,

    /// Override the low-battery threshold (percent).
    pub low_battery_threshold: Option<f64>,

    /// Stream reconnect tuning (milliseconds / attempts).
    pub reconnect_initial_ms: Option<u64>,
    pub reconnect_max_ms: Option<u64>,
    pub reconnect_max_retries: Option<u32>,

    /// Periodic hash re-check for long-running commands (seconds).
    pub revalidate_interval: Option<u64>,
}

// ── Paths ───────────────────────────────────────────────────────────

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("io", "thingsync", "thingsync")
}

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    project_dirs().map_or_else(
        || dirs_fallback(".config").join("config.toml"),
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

/// Default cache directory for one profile.
pub fn cache_dir(profile_name: &str) -> PathBuf {
    project_dirs()
        .map_or_else(|| dirs_fallback(".cache"), |dirs| dirs.cache_dir().to_path_buf())
        .join(profile_name)
}

fn dirs_fallback(kind: &str) -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(kind);
    p.push("thingsync");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the full Config from the canonical file + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load the full Config from `path` + environment.
///
/// Nested keys in environment variables are separated by `__`, so
/// `THINGSYNC_DEFAULTS__TIMEOUT` overrides `defaults.timeout`.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed(ENV_PREFIX).split("__"));

    let config: Config = figment.extract()?;
    Ok(config)
}

/// Load config, returning a default if the file doesn't exist.
pub fn load_config_or_default() -> Config {
    load_config().unwrap_or_default()
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write to the canonical config path.
pub fn save_config(cfg: &Config) -> Result<PathBuf, ConfigError> {
    let path = config_path();
    save_config_to(cfg, &path)?;
    Ok(path)
}

pub fn save_config_to(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

// ── Translation ─────────────────────────────────────────────────────

/// Build a `SyncConfig` from a profile and the global defaults.
pub fn profile_to_sync_config(
    profile: &Profile,
    profile_name: &str,
    defaults: &Defaults,
) -> Result<SyncConfig, ConfigError> {
    let server_url = parse_url("server", &profile.server)?;
    let stream_url = profile
        .stream_url
        .as_deref()
        .map(|raw| parse_url("stream_url", raw))
        .transpose()?;

    let tls = if profile.insecure.unwrap_or(defaults.insecure) {
        TlsVerification::DangerAcceptInvalid
    } else if let Some(ref ca_path) = profile.ca_cert {
        TlsVerification::CustomCa(ca_path.clone())
    } else {
        TlsVerification::SystemDefaults
    };

    let ttl_secs = profile.metadata_ttl.unwrap_or(defaults.metadata_ttl);
    let metadata_ttl = (ttl_secs > 0).then(|| Duration::from_secs(ttl_secs));

    let threshold = profile
        .low_battery_threshold
        .unwrap_or(defaults.low_battery_threshold);
    if !(0.0..=100.0).contains(&threshold) {
        return Err(ConfigError::Validation {
            field: "low_battery_threshold".into(),
            reason: format!("expected a percentage between 0 and 100, got {threshold}"),
        });
    }

    let base_reconnect = ReconnectConfig::default();
    let reconnect = ReconnectConfig {
        initial_delay: profile
            .reconnect_initial_ms
            .map_or(base_reconnect.initial_delay, Duration::from_millis),
        max_delay: profile
            .reconnect_max_ms
            .map_or(base_reconnect.max_delay, Duration::from_millis),
        max_retries: profile.reconnect_max_retries,
    };

    let mut config = SyncConfig::new(server_url);
    config.stream_url = stream_url;
    config.tls = tls;
    config.timeout = Duration::from_secs(profile.timeout.unwrap_or(defaults.timeout));
    config.metadata_ttl = metadata_ttl;
    config.cache_dir = Some(
        profile
            .cache_dir
            .clone()
            .unwrap_or_else(|| cache_dir(profile_name)),
    );
    config.grouping = profile.grouping.unwrap_or(defaults.grouping);
    config.reconnect = reconnect;
    config.low_battery_threshold = threshold;
    config.revalidate_interval_secs = profile.revalidate_interval.unwrap_or(0);
    Ok(config)
}

fn parse_url(field: &str, raw: &str) -> Result<url::Url, ConfigError> {
    raw.parse().map_err(|_| ConfigError::Validation {
        field: field.into(),
        reason: format!("invalid URL: {raw}"),
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn profile(server: &str) -> Profile {
        Profile {
            server: server.into(),
            ..Profile::default()
        }
    }

    #[test]
    fn load_reads_profiles_from_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
default_profile = "home"

[defaults]
timeout = 5
grouping = "leading-word"

[profiles.home]
server = "http://hub.local:5000"
metadata_ttl = 0
"#,
        )
        .unwrap();

        let cfg = load_config_from(&path).unwrap();
        assert_eq!(cfg.defaults.timeout, 5);
        assert_eq!(cfg.defaults.grouping, GroupingStrategy::LeadingWord);
        assert_eq!(cfg.defaults.output, "table");

        let (name, home) = cfg.profile(None).unwrap();
        assert_eq!(name, "home");
        assert_eq!(home.server, "http://hub.local:5000");
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = load_config_from(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(cfg, Config::default());
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut cfg = Config::default();
        cfg.profiles.insert("default".into(), profile("http://hub.local"));
        save_config_to(&cfg, &path).unwrap();

        assert_eq!(load_config_from(&path).unwrap(), cfg);
    }

    #[test]
    fn profile_resolution() {
        let mut cfg = Config::default();
        assert!(matches!(cfg.profile(None), Err(ConfigError::NoProfiles)));

        cfg.profiles.insert("home".into(), profile("http://a"));
        let (name, _) = cfg.profile(None).unwrap();
        assert_eq!(name, "home", "a single profile stands in for 'default'");

        cfg.profiles.insert("office".into(), profile("http://b"));
        assert!(matches!(cfg.profile(None), Err(ConfigError::UnknownProfile { .. })));
        assert_eq!(cfg.profile(Some("office")).unwrap().1.server, "http://b");
        assert!(matches!(
            cfg.profile(Some("cabin")),
            Err(ConfigError::UnknownProfile { .. })
        ));
    }

    #[test]
    fn translation_applies_defaults_and_overrides() {
        let defaults = Defaults::default();
        let mut p = profile("https://hub.local/things/");
        p.metadata_ttl = Some(0);
        p.reconnect_max_retries = Some(3);
        p.cache_dir = Some(PathBuf::from("/tmp/things"));

        let sync = profile_to_sync_config(&p, "home", &defaults).unwrap();
        assert_eq!(sync.server_url.as_str(), "https://hub.local/things/");
        assert_eq!(sync.tls, TlsVerification::SystemDefaults);
        assert_eq!(sync.timeout, Duration::from_secs(10));
        assert_eq!(sync.metadata_ttl, None);
        assert_eq!(sync.reconnect.max_retries, Some(3));
        assert_eq!(sync.reconnect.initial_delay, Duration::from_secs(1));
        assert_eq!(sync.cache_dir, Some(PathBuf::from("/tmp/things")));
        assert_eq!(sync.low_battery_threshold, 20.0);
    }

    #[test]
    fn insecure_and_ca_cert_select_tls_mode() {
        let defaults = Defaults::default();
        let mut p = profile("https://hub.local");
        p.ca_cert = Some(PathBuf::from("/etc/ca.pem"));
        assert_eq!(
            profile_to_sync_config(&p, "x", &defaults).unwrap().tls,
            TlsVerification::CustomCa(PathBuf::from("/etc/ca.pem"))
        );

        p.insecure = Some(true);
        assert_eq!(
            profile_to_sync_config(&p, "x", &defaults).unwrap().tls,
            TlsVerification::DangerAcceptInvalid
        );
    }

    #[test]
    fn invalid_values_are_rejected() {
        let defaults = Defaults::default();
        let err = profile_to_sync_config(&profile("not a url"), "x", &defaults).unwrap_err();
        assert!(matches!(err, ConfigError::Validation { ref field, .. } if field == "server"));

        let mut p = profile("http://hub.local");
        p.low_battery_threshold = Some(150.0);
        assert!(profile_to_sync_config(&p, "x", &defaults).is_err());
    }

    #[test]
    fn default_cache_dir_is_per_profile() {
        assert!(cache_dir("home").ends_with("home"));
        assert_ne!(cache_dir("home"), cache_dir("office"));
    }
}
