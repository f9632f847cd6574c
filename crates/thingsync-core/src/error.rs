// ── Core error types ──
//
// User-facing errors from thingsync-core. Consumers never see reqwest
// errors or raw JSON parse failures directly: the `From<thingsync_api::Error>`
// impl translates transport-layer errors into domain variants.

use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Connection errors ────────────────────────────────────────────
    #[error("Cannot reach things service at {url}: {reason}")]
    ConnectionFailed { url: String, reason: String },

    #[error("Things service request timed out")]
    Timeout,

    #[error("Live update stream unavailable: {reason}")]
    StreamUnavailable { reason: String },

    // ── Data errors ──────────────────────────────────────────────────
    #[error("Device not found: {name}")]
    DeviceNotFound { name: String },

    #[error("Action {action} not found on {device}")]
    ActionNotFound { device: String, action: String },

    #[error("Action {action} on {device} is read-only")]
    ReadOnlyAction { device: String, action: String },

    #[error("Unexpected response from things service: {message}")]
    MalformedResponse { message: String },

    // ── Server errors ────────────────────────────────────────────────
    #[error("Things service returned HTTP {status} for {path}")]
    Api { status: u16, path: String },

    // ── Operation errors ─────────────────────────────────────────────
    #[error("Registry is shut down")]
    ShutDown,

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Whether retrying the same operation later may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::ConnectionFailed { .. } | Self::Timeout | Self::StreamUnavailable { .. } => true,
            Self::Api { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<thingsync_api::Error> for CoreError {
    fn from(err: thingsync_api::Error) -> Self {
        match err {
            thingsync_api::Error::Transport(ref e) => {
                if e.is_timeout() {
                    CoreError::Timeout
                } else if let Some(status) = e.status() {
                    CoreError::Api {
                        status: status.as_u16(),
                        path: e.url().map(|u| u.path().to_owned()).unwrap_or_default(),
                    }
                } else {
                    CoreError::ConnectionFailed {
                        url: e
                            .url()
                            .map_or_else(|| "<unknown>".into(), ToString::to_string),
                        reason: e.to_string(),
                    }
                }
            }
            thingsync_api::Error::InvalidUrl(e) => CoreError::Config {
                message: format!("Invalid URL: {e}"),
            },
            thingsync_api::Error::ClientBuild(message) => CoreError::Config { message },
            thingsync_api::Error::Status { status, path } => CoreError::Api { status, path },
            thingsync_api::Error::StreamConnect(reason) => CoreError::StreamUnavailable { reason },
            thingsync_api::Error::Deserialization { message, body: _ } => {
                CoreError::MalformedResponse { message }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_errors_keep_code_and_path() {
        let err: CoreError = thingsync_api::Error::Status {
            status: 502,
            path: "/ls".into(),
        }
        .into();
        assert!(matches!(err, CoreError::Api { status: 502, ref path } if path == "/ls"));
        assert!(err.is_transient());
    }

    #[test]
    fn deserialization_becomes_malformed_response() {
        let err: CoreError = thingsync_api::Error::Deserialization {
            message: "expected array".into(),
            body: "{}".into(),
        }
        .into();
        assert!(matches!(err, CoreError::MalformedResponse { .. }));
        assert!(!err.is_transient());
    }
}
