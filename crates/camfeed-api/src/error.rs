use thiserror::Error;

/// Top-level error type for the `camfeed-api` crate.
///
/// Covers every failure mode of talking to a recording backend over HTTP:
/// credentials, transport, non-2xx statuses, and bodies that do not look
/// like what the endpoint is supposed to serve. `camfeed-core` maps these
/// into the pipeline's error taxonomy.
#[derive(Debug, Error)]
pub enum Error {
    // ── Authentication ──────────────────────────────────────────────
    /// Credentials could not be turned into request headers, or the
    /// backend rejected them (HTTP 401/403).
    #[error("Authentication failed: {message}")]
    Authentication { message: String },

    // ── Transport ───────────────────────────────────────────────────
    /// HTTP transport error (connection refused, DNS failure, etc.)
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Base URL that cannot carry endpoint paths (e.g. `mailto:` or `data:`).
    #[error("Unsupported base URL: {0}")]
    UnsupportedBaseUrl(String),

    /// Request timed out.
    #[error("Request timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// TLS handshake or certificate error.
    #[error("TLS error: {0}")]
    Tls(String),

    // ── Responses ───────────────────────────────────────────────────
    /// Non-2xx status from an endpoint.
    #[error("HTTP {status} from {url}")]
    Status { status: u16, url: String },

    /// 2xx status, but the body or content type is not what the endpoint serves.
    #[error("Invalid response from {url}: {message}")]
    InvalidResponse { url: String, message: String },
}

impl Error {
    /// Returns `true` if the backend could not be reached at all
    /// (as opposed to answering with something unusable).
    pub fn is_unreachable(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            Self::Timeout { .. } | Self::Tls(_) => true,
            _ => false,
        }
    }

    /// Returns `true` if this is a transient error worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_timeout() || e.is_connect(),
            Self::Timeout { .. } => true,
            Self::Status { status, .. } => *status >= 500 || *status == 429,
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

    /// The HTTP status carried by this error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            Self::Transport(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}
