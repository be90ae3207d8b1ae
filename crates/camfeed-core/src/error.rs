// ── Core error types ──
//
// Pipeline-level errors from camfeed-core. Consumers never see raw HTTP
// failures; the `From<camfeed_api::Error>` impl folds transport errors
// into the acquisition taxonomy (unreachable, invalid response, decode,
// storage, cancelled).

use serde::{Deserialize, Serialize};
use strum::Display;
use thiserror::Error;

/// Failure class carried by probe results and degraded states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Timeout, refused connection, DNS or TLS failure.
    Unreachable,
    /// Non-2xx status or a body that is not what the endpoint serves.
    InvalidResponse,
    /// A playable resource started but failed during playback.
    DecodeFailure,
    /// Disk write, rename or eviction failure in the clip cache.
    StorageFailure,
    /// Aborted by teardown. Never user-visible.
    Cancelled,
}

/// Unified error type for the core crate.
///
/// `Clone` so a single download outcome can be handed to every waiter.
#[derive(Debug, Clone, Error)]
pub enum CoreError {
    // ── Acquisition errors ───────────────────────────────────────────
    #[error("Backend unreachable: {reason}")]
    Unreachable { reason: String },

    #[error("Invalid response from {url}: {message}")]
    InvalidResponse { url: String, message: String },

    #[error("Authentication failed: {message}")]
    AuthenticationFailed { message: String },

    #[error("Playback failed: {message}")]
    DecodeFailure { message: String },

    // ── Cache errors ─────────────────────────────────────────────────
    #[error("Storage failure at {path}: {message}")]
    StorageFailure { path: String, message: String },

    #[error("Operation cancelled")]
    Cancelled,

    // ── Configuration errors ─────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    // ── Internal errors ──────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// The acquisition failure class, if this error belongs to one.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            Self::Unreachable { .. } => Some(ErrorKind::Unreachable),
            Self::InvalidResponse { .. } | Self::AuthenticationFailed { .. } => {
                Some(ErrorKind::InvalidResponse)
            }
            Self::DecodeFailure { .. } => Some(ErrorKind::DecodeFailure),
            Self::StorageFailure { .. } => Some(ErrorKind::StorageFailure),
            Self::Cancelled => Some(ErrorKind::Cancelled),
            Self::Config { .. } | Self::Internal(_) => None,
        }
    }

    pub(crate) fn storage(path: &std::path::Path, err: &std::io::Error) -> Self {
        Self::StorageFailure {
            path: path.display().to_string(),
            message: err.to_string(),
        }
    }
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<camfeed_api::Error> for CoreError {
    fn from(err: camfeed_api::Error) -> Self {
        match err {
            camfeed_api::Error::Authentication { message } => {
                CoreError::AuthenticationFailed { message }
            }
            camfeed_api::Error::Transport(ref e) => {
                if let Some(status) = e.status() {
                    CoreError::InvalidResponse {
                        url: e.url().map(ToString::to_string).unwrap_or_default(),
                        message: format!("HTTP {}", status.as_u16()),
                    }
                } else {
                    CoreError::Unreachable {
                        reason: e.to_string(),
                    }
                }
            }
            camfeed_api::Error::InvalidUrl(e) => CoreError::Config {
                message: format!("Invalid URL: {e}"),
            },
            camfeed_api::Error::UnsupportedBaseUrl(url) => CoreError::Config {
                message: format!("Unsupported base URL: {url}"),
            },
            camfeed_api::Error::Timeout { timeout_ms } => CoreError::Unreachable {
                reason: format!("timed out after {timeout_ms}ms"),
            },
            camfeed_api::Error::Tls(msg) => CoreError::Unreachable {
                reason: format!("TLS error: {msg}"),
            },
            camfeed_api::Error::Status { status, url } => CoreError::InvalidResponse {
                url,
                message: format!("HTTP {status}"),
            },
            camfeed_api::Error::InvalidResponse { url, message } => {
                CoreError::InvalidResponse { url, message }
            }
        }
    }
}
