use thiserror::Error;

/// Top-level error type for the `thingsync-api` crate.
///
/// Covers every failure mode across the HTTP endpoints and the event
/// stream. `thingsync-core` maps these into domain errors.
#[derive(Debug, Error)]
pub enum Error {
    // ── Transport ───────────────────────────────────────────────────
    /// HTTP transport error (connection refused, DNS failure, timeout, etc.)
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// URL parsing or construction error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Building the HTTP client failed (bad CA file, TLS backend, etc.)
    #[error("Failed to build HTTP client: {0}")]
    ClientBuild(String),

    // ── Server ──────────────────────────────────────────────────────
    /// The server answered with a non-2xx status.
    #[error("Server returned HTTP {status} for {path}")]
    Status { status: u16, path: String },

    // ── Event stream ────────────────────────────────────────────────
    /// WebSocket connection failed or broke mid-stream.
    #[error("Event stream connection failed: {0}")]
    StreamConnect(String),

    // ── Data ────────────────────────────────────────────────────────
    /// JSON deserialization failed, with the raw body for debugging.
    #[error("Deserialization error: {message}")]
    Deserialization { message: String, body: String },
}

impl Error {
    /// Returns `true` if this is a transient error worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_timeout() || e.is_connect(),
            Self::Status { status, .. } => *status >= 500 || *status == 429,
            Self::StreamConnect(_) => true,
            _ => false,
        }
    }

    /// Returns `true` if this is a "not found" error.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::Transport(e) => e.status() == Some(reqwest::StatusCode::NOT_FOUND),
            Self::Status { status: 404, .. } => true,
            _ => false,
        }
    }

    /// Returns `true` if the server answered but the body had an
    /// unexpected shape.
    pub fn is_malformed(&self) -> bool {
        matches!(self, Self::Deserialization { .. })
    }

    /// HTTP status code, if the failure carried one.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            Self::Transport(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}
