//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError` and `ConfigError` into user-facing errors with
//! actionable help text and stable exit codes.

use miette::Diagnostic;
use thiserror::Error;

use camfeed_config::ConfigError;
use camfeed_core::CoreError;

/// Process exit codes.
pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const AUTH: i32 = 3;
    pub const NOT_FOUND: i32 = 4;
    pub const STORAGE: i32 = 5;
    pub const PLAYBACK: i32 = 6;
    pub const CONNECTION: i32 = 7;
    pub const INTERRUPTED: i32 = 130;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Connection ───────────────────────────────────────────────────
    #[error("Could not reach the backend at {url}")]
    #[diagnostic(
        code(camfeed::unreachable),
        help(
            "Check that the recorder is running and reachable.\n\
             {reason}\n\
             Self-signed certificate? Retry with --insecure (-k)."
        )
    )]
    Unreachable { url: String, reason: String },

    #[error("Unexpected response from {url}")]
    #[diagnostic(code(camfeed::invalid_response), help("{message}"))]
    InvalidResponse { url: String, message: String },

    // ── Authentication ───────────────────────────────────────────────
    #[error("Authentication failed")]
    #[diagnostic(
        code(camfeed::auth_failed),
        help(
            "{message}\n\
             Store credentials with: camfeed config set-secret password --profile {profile}"
        )
    )]
    AuthFailed { profile: String, message: String },

    #[error("No credentials configured for profile '{profile}'")]
    #[diagnostic(
        code(camfeed::no_credentials),
        help(
            "Configure credentials with: camfeed config init\n\
             Or set CAMFEED_PASSWORD / CAMFEED_TOKEN."
        )
    )]
    NoCredentials { profile: String },

    // ── Acquisition ──────────────────────────────────────────────────
    #[error("No playable stream for camera '{camera}'")]
    #[diagnostic(
        code(camfeed::no_stream),
        help(
            "Every stream candidate failed its probe.\n\
             Run: camfeed probe {camera} --all"
        )
    )]
    NoStream { camera: String },

    #[error("Playback failed: {message}")]
    #[diagnostic(
        code(camfeed::playback),
        help("Check the player command, e.g. --player \"ffplay -loglevel error {{url}}\"")
    )]
    Playback { message: String },

    #[error("{failed} of {total} clip downloads failed")]
    #[diagnostic(code(camfeed::preload_failed), help("Run with -v to see each failure."))]
    PreloadFailed { failed: usize, total: usize },

    // ── Storage ──────────────────────────────────────────────────────
    #[error("Could not write {path}")]
    #[diagnostic(code(camfeed::storage), help("{message}"))]
    Storage { path: String, message: String },

    // ── Validation ───────────────────────────────────────────────────
    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(camfeed::validation))]
    Validation { field: String, reason: String },

    // ── Configuration ────────────────────────────────────────────────
    #[error("Profile '{name}' not found in configuration")]
    #[diagnostic(
        code(camfeed::profile_not_found),
        help(
            "Available profiles: {available}\n\
             Create one with: camfeed config init"
        )
    )]
    ProfileNotFound { name: String, available: String },

    #[error("No backend configured")]
    #[diagnostic(
        code(camfeed::no_config),
        help(
            "Create a profile with: camfeed config init\n\
             Or pass --base-url. Expected config at: {path}"
        )
    )]
    NoConfig { path: String },

    #[error("Configuration error: {message}")]
    #[diagnostic(code(camfeed::config))]
    Config { message: String },

    // ── Interrupted ──────────────────────────────────────────────────
    #[error("Operation cancelled")]
    #[diagnostic(code(camfeed::cancelled))]
    Cancelled,

    // ── IO / Serialization ────────────────────────────────────────────
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("JSON serialization failed: {0}")]
    #[diagnostic(code(camfeed::json))]
    Json(#[from] serde_json::Error),

    #[error("YAML serialization failed: {0}")]
    #[diagnostic(code(camfeed::yaml))]
    Yaml(#[from] serde_yaml::Error),

    #[error("Internal error: {0}")]
    #[diagnostic(code(camfeed::internal))]
    Internal(String),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Unreachable { .. } => exit_code::CONNECTION,
            Self::AuthFailed { .. } | Self::NoCredentials { .. } => exit_code::AUTH,
            Self::NoStream { .. } | Self::ProfileNotFound { .. } => exit_code::NOT_FOUND,
            Self::Playback { .. } => exit_code::PLAYBACK,
            Self::Storage { .. } | Self::PreloadFailed { .. } => exit_code::STORAGE,
            Self::Validation { .. } | Self::NoConfig { .. } => exit_code::USAGE,
            Self::Cancelled => exit_code::INTERRUPTED,
            _ => exit_code::GENERAL,
        }
    }

    /// Fill in the backend URL and profile that core errors do not carry.
    pub fn in_context(self, base_url: &str, profile: &str) -> Self {
        match self {
            Self::Unreachable { url, reason } if url.is_empty() => Self::Unreachable {
                url: base_url.to_owned(),
                reason,
            },
            Self::AuthFailed { profile: p, message } if p.is_empty() => Self::AuthFailed {
                profile: profile.to_owned(),
                message,
            },
            other => other,
        }
    }
}

// ── CoreError → CliError mapping ─────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Unreachable { reason } => Self::Unreachable {
                url: String::new(),
                reason,
            },
            CoreError::InvalidResponse { url, message } => Self::InvalidResponse { url, message },
            CoreError::AuthenticationFailed { message } => Self::AuthFailed {
                profile: String::new(),
                message,
            },
            CoreError::DecodeFailure { message } => Self::Playback { message },
            CoreError::StorageFailure { path, message } => Self::Storage { path, message },
            CoreError::Cancelled => Self::Cancelled,
            CoreError::Config { message } => Self::Validation {
                field: "input".into(),
                reason: message,
            },
            CoreError::Internal(message) => Self::Internal(message),
        }
    }
}

// ── ConfigError → CliError mapping ───────────────────────────────────

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Validation { field, reason } => Self::Validation { field, reason },
            ConfigError::NoCredentials { profile } => Self::NoCredentials { profile },
            ConfigError::ProfileNotFound { name, available } => Self::ProfileNotFound {
                name,
                available: if available.is_empty() {
                    "(none)".into()
                } else {
                    available.join(", ")
                },
            },
            ConfigError::Io(err) => Self::Io(err),
            other => Self::Config {
                message: other.to_string(),
            },
        }
    }
}
