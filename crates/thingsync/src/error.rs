//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError` and `ConfigError` variants into user-facing errors with
//! actionable help text.

use miette::Diagnostic;
use thiserror::Error;

use thingsync_config::ConfigError;
use thingsync_core::CoreError;

/// Process exit codes.
pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const NOT_FOUND: i32 = 4;
    pub const UNAVAILABLE: i32 = 6;
    pub const CONNECTION: i32 = 7;
    pub const TIMEOUT: i32 = 8;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Connection ───────────────────────────────────────────────────
    #[error("Could not reach the things service at {url}")]
    #[diagnostic(
        code(thingsync::connection_failed),
        help(
            "Check that the service is running and reachable.\n\
             {reason}\n\
             Use --offline to work from the cached catalog."
        )
    )]
    ConnectionFailed { url: String, reason: String },

    #[error("Request to the things service timed out")]
    #[diagnostic(
        code(thingsync::timeout),
        help("Increase the timeout with --timeout or the profile's `timeout` key.")
    )]
    Timeout,

    #[error("Live update stream unavailable: {reason}")]
    #[diagnostic(code(thingsync::stream_unavailable))]
    StreamUnavailable { reason: String },

    #[error("No {what} arrived within {secs}s")]
    #[diagnostic(code(thingsync::wait_timeout))]
    WaitTimedOut { what: String, secs: u64 },

    // ── Resources ────────────────────────────────────────────────────
    #[error("Device '{name}' not found")]
    #[diagnostic(
        code(thingsync::device_not_found),
        help("Run: thingsync list  to see known devices, or thingsync reload  to refresh the catalog")
    )]
    DeviceNotFound { name: String },

    #[error("Device '{device}' has no action '{action}'")]
    #[diagnostic(
        code(thingsync::action_not_found),
        help("Run: thingsync show {device}  to see its actions")
    )]
    ActionNotFound { device: String, action: String },

    #[error("Action '{action}' on '{device}' is read-only")]
    #[diagnostic(code(thingsync::read_only))]
    ReadOnly { device: String, action: String },

    // ── Server ───────────────────────────────────────────────────────
    #[error("Things service returned HTTP {status} for {path}")]
    #[diagnostic(code(thingsync::api_error))]
    Api { status: u16, path: String },

    #[error("Unexpected response from the things service: {message}")]
    #[diagnostic(code(thingsync::malformed_response))]
    MalformedResponse { message: String },

    // ── Validation ───────────────────────────────────────────────────
    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(thingsync::validation))]
    Validation { field: String, reason: String },

    // ── Configuration ────────────────────────────────────────────────
    #[error("Profile '{name}' not found in configuration")]
    #[diagnostic(
        code(thingsync::profile_not_found),
        help(
            "Available profiles: {available}\n\
             Create one with: thingsync config init <URL> --name {name}"
        )
    )]
    ProfileNotFound { name: String, available: String },

    #[error("No things service configured")]
    #[diagnostic(
        code(thingsync::no_config),
        help(
            "Create a profile with: thingsync config init <URL>\n\
             Or pass --server / set THINGSYNC_SERVER.\n\
             Config file: {path}"
        )
    )]
    NoConfig { path: String },

    #[error("Profile '{name}' already exists")]
    #[diagnostic(code(thingsync::profile_exists), help("Pass --force to overwrite it."))]
    ProfileExists { name: String },

    #[error(transparent)]
    #[diagnostic(code(thingsync::config))]
    Config(ConfigError),

    // ── Output ───────────────────────────────────────────────────────
    #[error("Could not render output: {0}")]
    #[diagnostic(code(thingsync::render))]
    Render(String),

    #[error(transparent)]
    #[diagnostic(code(thingsync::io))]
    Io(#[from] std::io::Error),

    // ── Catch-all ────────────────────────────────────────────────────
    #[error("{0}")]
    #[diagnostic(code(thingsync::internal))]
    Internal(String),
}

impl CliError {
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ConnectionFailed { .. } => exit_code::CONNECTION,
            Self::Timeout | Self::WaitTimedOut { .. } => exit_code::TIMEOUT,
            Self::StreamUnavailable { .. } | Self::Api { .. } => exit_code::UNAVAILABLE,
            Self::DeviceNotFound { .. }
            | Self::ActionNotFound { .. }
            | Self::ProfileNotFound { .. } => exit_code::NOT_FOUND,
            Self::Validation { .. }
            | Self::ReadOnly { .. }
            | Self::NoConfig { .. }
            | Self::ProfileExists { .. } => exit_code::USAGE,
            _ => exit_code::GENERAL,
        }
    }
}

// ── Conversions ──────────────────────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::ConnectionFailed { url, reason } => Self::ConnectionFailed { url, reason },
            CoreError::Timeout => Self::Timeout,
            CoreError::StreamUnavailable { reason } => Self::StreamUnavailable { reason },
            CoreError::DeviceNotFound { name } => Self::DeviceNotFound { name },
            CoreError::ActionNotFound { device, action } => {
                Self::ActionNotFound { device, action }
            }
            CoreError::ReadOnlyAction { device, action } => Self::ReadOnly { device, action },
            CoreError::MalformedResponse { message } => Self::MalformedResponse { message },
            CoreError::Api { status, path } => Self::Api { status, path },
            CoreError::Config { message } => Self::Validation {
                field: "config".into(),
                reason: message,
            },
            CoreError::ShutDown => Self::Internal("registry shut down".into()),
            CoreError::Internal(message) => Self::Internal(message),
        }
    }
}

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Validation { field, reason } => Self::Validation { field, reason },
            other => Self::Config(other),
        }
    }
}
