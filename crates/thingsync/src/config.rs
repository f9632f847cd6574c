//! CLI configuration: thin wrapper around `thingsync_config`.
//!
//! Adds resolution that respects `GlobalOpts` flag overrides
//! (--server, --insecure, --timeout, --cache-dir).

use std::path::PathBuf;
use std::time::Duration;

use thingsync_config::{ConfigError, profile_to_sync_config};
use thingsync_core::{SyncConfig, TlsVerification};

use crate::cli::GlobalOpts;
use crate::error::CliError;

pub use thingsync_config::{Config, Profile, save_config_to};

/// Config file in effect: `--config` / `THINGSYNC_CONFIG`, else the
/// platform default.
pub fn config_file(global: &GlobalOpts) -> PathBuf {
    global
        .config
        .clone()
        .unwrap_or_else(thingsync_config::config_path)
}

pub fn load(global: &GlobalOpts) -> Result<Config, CliError> {
    Ok(thingsync_config::load_config_from(&config_file(global))?)
}

/// Resolve the active profile name from CLI flags and config.
pub fn active_profile_name(global: &GlobalOpts, config: &Config) -> String {
    global
        .profile
        .clone()
        .or_else(|| config.default_profile.clone())
        .unwrap_or_else(|| "default".into())
}

/// Build the `SyncConfig` for this invocation.
///
/// A configured profile is used when one resolves; otherwise `--server`
/// alone is enough for an ad-hoc profile. Flag overrides are applied last.
pub fn resolve(global: &GlobalOpts, config: &Config) -> Result<(String, SyncConfig), CliError> {
    let (name, mut sync) = match config.profile(global.profile.as_deref()) {
        Ok((name, profile)) => {
            let sync = profile_to_sync_config(profile, &name, &config.defaults)?;
            (name, sync)
        }
        Err(ConfigError::NoProfiles) => match global.server.as_deref() {
            Some(server) => {
                let name = active_profile_name(global, config);
                let profile = Profile {
                    server: server.to_owned(),
                    ..Profile::default()
                };
                let sync = profile_to_sync_config(&profile, &name, &config.defaults)?;
                (name, sync)
            }
            None => {
                return Err(CliError::NoConfig {
                    path: config_file(global).display().to_string(),
                });
            }
        },
        Err(ConfigError::UnknownProfile { name }) => {
            let mut available: Vec<&str> = config.profiles.keys().map(String::as_str).collect();
            available.sort_unstable();
            return Err(CliError::ProfileNotFound {
                name,
                available: available.join(", "),
            });
        }
        Err(other) => return Err(other.into()),
    };

    apply_overrides(&mut sync, global)?;
    Ok((name, sync))
}

fn apply_overrides(sync: &mut SyncConfig, global: &GlobalOpts) -> Result<(), CliError> {
    if let Some(server) = global.server.as_deref() {
        sync.server_url = server.parse().map_err(|_| CliError::Validation {
            field: "server".into(),
            reason: format!("invalid URL: {server}"),
        })?;
    }
    if global.insecure {
        sync.tls = TlsVerification::DangerAcceptInvalid;
    }
    if let Some(secs) = global.timeout {
        sync.timeout = Duration::from_secs(secs);
    }
    if let Some(dir) = &global.cache_dir {
        sync.cache_dir = Some(dir.clone());
    }
    Ok(())
}
