//! Shared configuration for camfeed.
//!
//! TOML profiles, credential resolution (env + keyring + plaintext),
//! and translation to `camfeed_core::BackendConfig`. The CLI layers its
//! flag overrides on top of what this crate produces.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use camfeed_core::{
    AuthScheme, BackendConfig, Credentials, ProbeMode, QualityTier, TlsMode, TransportKind,
};

/// Keyring service name for stored secrets.
pub const KEYRING_SERVICE: &str = "camfeed";

/// Environment variable overriding the config file location.
pub const CONFIG_PATH_ENV: &str = "CAMFEED_CONFIG";

const ENV_PREFIX: &str = "CAMFEED_";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("no credentials configured for profile '{profile}'")]
    NoCredentials { profile: String },

    #[error("profile '{name}' not found")]
    ProfileNotFound { name: String, available: Vec<String> },

    #[error("keyring access failed: {0}")]
    Keyring(#[from] keyring::Error),

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

fn invalid(field: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Validation {
        field: field.into(),
        reason: reason.into(),
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Default profile name.
    pub default_profile: Option<String>,

    /// Global defaults.
    #[serde(default)]
    pub defaults: Defaults,

    /// Named backend profiles.
    #[serde(default)]
    pub profiles: BTreeMap<String, Profile>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_profile: Some("default".into()),
            defaults: Defaults::default(),
            profiles: BTreeMap::new(),
        }
    }
}

impl Config {
    /// Look up a profile, listing the known names on failure.
    pub fn profile(&self, name: &str) -> Result<&Profile, ConfigError> {
        self.profiles
            .get(name)
            .ok_or_else(|| ConfigError::ProfileNotFound {
                name: name.into(),
                available: self.profiles.keys().cloned().collect(),
            })
    }

    /// Build the backend config for a profile, with global defaults
    /// filling what the profile leaves unset.
    pub fn backend_config(&self, name: &str) -> Result<BackendConfig, ConfigError> {
        let profile = self.profile(name)?;
        let mut config = profile_to_backend_config(profile, name)?;
        if profile.insecure.is_none() && self.defaults.insecure {
            config.tls = TlsMode::DangerAcceptInvalid;
        }
        if profile.timeout.is_none() {
            config.connect_timeout = Duration::from_secs(self.defaults.timeout);
        }
        Ok(config)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Defaults {
    #[serde(default = "default_output")]
    pub output: String,

    #[serde(default = "default_color")]
    pub color: String,

    #[serde(default)]
    pub insecure: bool,

    /// Connect timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            output: default_output(),
            color: default_color(),
            insecure: false,
            timeout: default_timeout(),
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
    5
}

/// A named backend profile.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Profile {
    /// Backend base URL (e.g., "http://nvr.local:5000").
    pub base_url: String,

    /// Preferred stream tier: "high" or "low".
    #[serde(default)]
    pub quality: QualityTier,

    /// Auth mode: "none", "basic", or "bearer".
    #[serde(default = "default_auth_mode")]
    pub auth_mode: String,

    /// Username for basic auth.
    pub username: Option<String>,

    /// Password for basic auth (plaintext, prefer keyring or env var).
    pub password: Option<String>,

    /// Environment variable name containing the password.
    pub password_env: Option<String>,

    /// Bearer token (plaintext, prefer keyring or env var).
    pub token: Option<String>,

    /// Environment variable name containing the token.
    pub token_env: Option<String>,

    /// Path to custom CA certificate.
    pub ca_cert: Option<PathBuf>,

    /// Override insecure TLS setting.
    pub insecure: Option<bool>,

    /// Override connect timeout (seconds).
    pub timeout: Option<u64>,

    /// External player command line; `{url}` is replaced by the stream URL.
    pub player: Option<String>,

    /// Pipeline tuning.
    #[serde(default)]
    pub tuning: Tuning,
}

fn default_auth_mode() -> String {
    "none".into()
}

impl Profile {
    /// A profile with every optional field unset.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            quality: QualityTier::default(),
            auth_mode: default_auth_mode(),
            username: None,
            password: None,
            password_env: None,
            token: None,
            token_env: None,
            ca_cert: None,
            insecure: None,
            timeout: None,
            player: None,
            tuning: Tuning::default(),
        }
    }
}

/// Pipeline tuning. Durations use humantime syntax ("5s", "500ms", "1m").
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Tuning {
    pub probe_timeout: Option<String>,
    /// Probes in flight at once; 1 probes sequentially.
    pub probe_concurrency: Option<usize>,
    pub backoff: Option<String>,
    pub max_reconnect_attempts: Option<u32>,
    pub stable_after: Option<String>,
    pub snapshot_interval: Option<String>,
    pub snapshot_timeout: Option<String>,
    /// "off" disables the offline transition.
    pub offline_after: Option<String>,
    /// Stream transports in priority order.
    pub transports: Option<Vec<TransportKind>>,
    pub fallback_to_other_tier: Option<bool>,
    pub cache_capacity: Option<usize>,
    pub scratch_dir: Option<PathBuf>,
    pub download_header_timeout: Option<String>,
    pub download_stall_timeout: Option<String>,
}

impl Tuning {
    /// Overlay the set fields onto `config`.
    pub fn apply(&self, config: &mut BackendConfig) -> Result<(), ConfigError> {
        let feed = &mut config.feed;
        if let Some(raw) = &self.probe_timeout {
            feed.probe.timeout = parse_duration("probe_timeout", raw)?;
        }
        if let Some(limit) = self.probe_concurrency {
            feed.probe.mode = if limit <= 1 {
                ProbeMode::Sequential
            } else {
                ProbeMode::Concurrent { limit }
            };
        }
        if let Some(raw) = &self.backoff {
            feed.retry.backoff = parse_duration("backoff", raw)?;
        }
        if let Some(attempts) = self.max_reconnect_attempts {
            feed.retry.max_reconnect_attempts = attempts;
        }
        if let Some(raw) = &self.stable_after {
            feed.retry.stable_after = parse_duration("stable_after", raw)?;
        }
        if let Some(raw) = &self.snapshot_interval {
            feed.snapshot.interval = parse_duration("snapshot_interval", raw)?;
        }
        if let Some(raw) = &self.snapshot_timeout {
            feed.snapshot.timeout = parse_duration("snapshot_timeout", raw)?;
        }
        if let Some(raw) = &self.offline_after {
            feed.snapshot.offline_after = parse_optional_duration("offline_after", raw)?;
        }
        if let Some(transports) = &self.transports {
            feed.candidates.transports.clone_from(transports);
        }
        if let Some(fallback) = self.fallback_to_other_tier {
            feed.candidates.fallback_to_other_tier = fallback;
        }

        let cache = &mut config.cache;
        if let Some(capacity) = self.cache_capacity {
            if capacity == 0 {
                return Err(invalid("cache_capacity", "must be at least 1"));
            }
            cache.capacity = capacity;
        }
        if let Some(dir) = &self.scratch_dir {
            cache.scratch_dir.clone_from(dir);
        }
        if let Some(raw) = &self.download_header_timeout {
            cache.header_timeout = parse_duration("download_header_timeout", raw)?;
        }
        if let Some(raw) = &self.download_stall_timeout {
            cache.stall_timeout = parse_duration("download_stall_timeout", raw)?;
        }
        Ok(())
    }
}

fn parse_duration(field: &str, raw: &str) -> Result<Duration, ConfigError> {
    let duration = humantime::parse_duration(raw.trim())
        .map_err(|e| invalid(field, format!("{e} (expected e.g. \"5s\" or \"500ms\")")))?;
    if duration.is_zero() {
        return Err(invalid(field, "must be greater than zero"));
    }
    Ok(duration)
}

fn parse_optional_duration(field: &str, raw: &str) -> Result<Option<Duration>, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "off" | "never" | "none" => Ok(None),
        _ => parse_duration(field, raw).map(Some),
    }
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path: `CAMFEED_CONFIG`, else platform conventions.
pub fn config_path() -> PathBuf {
    if let Some(path) = std::env::var_os(CONFIG_PATH_ENV).filter(|p| !p.is_empty()) {
        return PathBuf::from(path);
    }
    ProjectDirs::from("com", "camfeed", "camfeed").map_or_else(
        || dirs_fallback().join("config.toml"),
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("camfeed");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the full Config from the canonical file + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load from `path` + environment. A missing file yields the defaults.
///
/// Environment keys nest with a double underscore:
/// `CAMFEED_PROFILES__HOME__QUALITY=low`.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed(ENV_PREFIX).split("__"));

    let config: Config = figment.extract()?;
    Ok(config)
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write to the canonical config path.
pub fn save_config(cfg: &Config) -> Result<PathBuf, ConfigError> {
    let path = config_path();
    save_config_to(cfg, &path)?;
    Ok(path)
}

pub fn save_config_to(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

// ── Credential resolution ───────────────────────────────────────────

/// Which stored secret a keyring entry holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecretKind {
    Password,
    Token,
}

impl SecretKind {
    fn keyring_key(self, profile_name: &str) -> String {
        match self {
            Self::Password => format!("{profile_name}/password"),
            Self::Token => format!("{profile_name}/token"),
        }
    }

    fn global_env(self) -> &'static str {
        match self {
            Self::Password => "CAMFEED_PASSWORD",
            Self::Token => "CAMFEED_TOKEN",
        }
    }
}

/// Store a secret for a profile in the system keyring.
pub fn store_secret(profile_name: &str, kind: SecretKind, secret: &str) -> Result<(), ConfigError> {
    let entry = keyring::Entry::new(KEYRING_SERVICE, &kind.keyring_key(profile_name))?;
    entry.set_password(secret)?;
    Ok(())
}

/// Look a secret up: profile's env var, global env var, keyring, plaintext.
fn lookup_secret(
    profile_name: &str,
    kind: SecretKind,
    env_name: Option<&str>,
    plaintext: Option<&str>,
) -> Option<SecretString> {
    // 1. Environment
    let from_env = env_name
        .and_then(|name| std::env::var(name).ok())
        .or_else(|| std::env::var(kind.global_env()).ok())
        .filter(|value| !value.is_empty());
    if let Some(value) = from_env {
        return Some(SecretString::from(value));
    }

    // 2. System keyring
    if let Ok(entry) = keyring::Entry::new(KEYRING_SERVICE, &kind.keyring_key(profile_name)) {
        if let Ok(secret) = entry.get_password() {
            return Some(SecretString::from(secret));
        }
    }

    // 3. Plaintext in config
    plaintext.map(|value| SecretString::from(value.to_owned()))
}

/// Resolve `Credentials` from a profile's `auth_mode` field.
pub fn resolve_credentials(profile: &Profile, profile_name: &str) -> Result<Credentials, ConfigError> {
    let scheme: AuthScheme = profile.auth_mode.parse().map_err(|_| {
        invalid(
            "auth_mode",
            format!(
                "expected 'none', 'basic', or 'bearer', got '{}'",
                profile.auth_mode
            ),
        )
    })?;

    let no_credentials = || ConfigError::NoCredentials {
        profile: profile_name.into(),
    };

    match scheme {
        AuthScheme::None => Ok(Credentials::None),
        AuthScheme::Basic => {
            let username = profile
                .username
                .clone()
                .or_else(|| std::env::var("CAMFEED_USERNAME").ok())
                .filter(|u| !u.is_empty())
                .ok_or_else(no_credentials)?;
            let password = lookup_secret(
                profile_name,
                SecretKind::Password,
                profile.password_env.as_deref(),
                profile.password.as_deref(),
            )
            .ok_or_else(no_credentials)?;
            Ok(Credentials::Basic { username, password })
        }
        AuthScheme::Bearer => {
            let token = lookup_secret(
                profile_name,
                SecretKind::Token,
                profile.token_env.as_deref(),
                profile.token.as_deref(),
            )
            .ok_or_else(no_credentials)?;
            Ok(Credentials::Bearer { token })
        }
    }
}

/// Parse and check a backend base URL.
pub fn parse_base_url(raw: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(raw.trim()).map_err(|e| invalid("base_url", format!("{e}: {raw}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid(
            "base_url",
            format!("expected an http or https URL, got '{raw}'"),
        ));
    }
    Ok(url)
}

/// Build a `BackendConfig` from a profile, without CLI flag overrides.
pub fn profile_to_backend_config(
    profile: &Profile,
    profile_name: &str,
) -> Result<BackendConfig, ConfigError> {
    let mut config = BackendConfig::new(parse_base_url(&profile.base_url)?);
    config.credentials = resolve_credentials(profile, profile_name)?;

    config.tls = if profile.insecure.unwrap_or(false) {
        TlsMode::DangerAcceptInvalid
    } else if let Some(ref ca_path) = profile.ca_cert {
        TlsMode::CustomCa(ca_path.clone())
    } else {
        TlsMode::System
    };

    if let Some(secs) = profile.timeout {
        config.connect_timeout = Duration::from_secs(secs);
    }
    config.feed.quality = profile.quality;
    profile.tuning.apply(&mut config)?;
    Ok(config)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use figment::Jail;
    use pretty_assertions::assert_eq;
    use secrecy::ExposeSecret;

    use super::*;

    const SAMPLE: &str = r#"
default_profile = "home"

[defaults]
timeout = 8

[profiles.home]
base_url = "http://nvr.local:5000"
quality = "low"
player = "mpv --really-quiet {url}"

[profiles.home.tuning]
probe_timeout = "2s"
probe_concurrency = 3
backoff = "500ms"
max_reconnect_attempts = 5
offline_after = "off"
transports = ["mjpeg", "hls"]
cache_capacity = 5

[profiles.proxy]
base_url = "https://cams.example.com/nvr"
auth_mode = "bearer"
token_env = "TEST_CAMFEED_TOKEN"
insecure = true
"#;

    #[test]
    fn missing_file_yields_defaults() {
        Jail::expect_with(|jail| {
            let cfg = load_config_from(&jail.directory().join("absent.toml")).unwrap();
            assert_eq!(cfg.default_profile.as_deref(), Some("default"));
            assert_eq!(cfg.defaults.output, "table");
            assert!(cfg.profiles.is_empty());
            Ok(())
        });
    }

    #[test]
    fn profile_and_tuning_translate_to_backend_config() {
        Jail::expect_with(|jail| {
            jail.create_file("camfeed.toml", SAMPLE)?;
            let cfg = load_config_from(Path::new("camfeed.toml")).unwrap();
            assert_eq!(cfg.default_profile.as_deref(), Some("home"));

            let home = cfg.backend_config("home").unwrap();
            assert_eq!(home.base_url.as_str(), "http://nvr.local:5000/");
            assert_eq!(home.feed.quality, QualityTier::Low);
            assert_eq!(home.connect_timeout, Duration::from_secs(8));
            assert!(matches!(home.credentials, Credentials::None));
            assert!(matches!(home.tls, TlsMode::System));
            assert_eq!(home.feed.probe.timeout, Duration::from_secs(2));
            assert_eq!(home.feed.probe.mode, ProbeMode::Concurrent { limit: 3 });
            assert_eq!(home.feed.retry.backoff, Duration::from_millis(500));
            assert_eq!(home.feed.retry.max_reconnect_attempts, 5);
            assert_eq!(home.feed.snapshot.offline_after, None);
            assert_eq!(
                home.feed.candidates.transports,
                vec![TransportKind::Mjpeg, TransportKind::Hls]
            );
            assert_eq!(home.cache.capacity, 5);
            assert_eq!(
                cfg.profiles["home"].player.as_deref(),
                Some("mpv --really-quiet {url}")
            );
            Ok(())
        });
    }

    #[test]
    fn bearer_token_comes_from_named_env_var() {
        Jail::expect_with(|jail| {
            jail.create_file("camfeed.toml", SAMPLE)?;
            jail.set_env("TEST_CAMFEED_TOKEN", "s3cret");
            let cfg = load_config_from(Path::new("camfeed.toml")).unwrap();

            let proxy = cfg.backend_config("proxy").unwrap();
            assert!(matches!(proxy.tls, TlsMode::DangerAcceptInvalid));
            match proxy.credentials {
                Credentials::Bearer { token } => assert_eq!(token.expose_secret(), "s3cret"),
                other => panic!("expected bearer credentials, got {other:?}"),
            }
            Ok(())
        });
    }

    #[test]
    fn environment_overrides_file() {
        Jail::expect_with(|jail| {
            jail.create_file("camfeed.toml", SAMPLE)?;
            jail.set_env("CAMFEED_DEFAULT_PROFILE", "proxy");
            jail.set_env("CAMFEED_PROFILES__HOME__QUALITY", "high");
            let cfg = load_config_from(Path::new("camfeed.toml")).unwrap();

            assert_eq!(cfg.default_profile.as_deref(), Some("proxy"));
            assert_eq!(cfg.profiles["home"].quality, QualityTier::High);
            Ok(())
        });
    }

    #[test]
    fn config_path_honours_override() {
        Jail::expect_with(|jail| {
            jail.set_env(CONFIG_PATH_ENV, "/tmp/elsewhere/camfeed.toml");
            assert_eq!(config_path(), PathBuf::from("/tmp/elsewhere/camfeed.toml"));
            Ok(())
        });
    }

    #[test]
    fn basic_auth_password_from_env() {
        Jail::expect_with(|jail| {
            jail.set_env("NVR_PASS", "hunter2");
            let mut profile = Profile::new("http://nvr.local");
            profile.auth_mode = "basic".into();
            profile.username = Some("viewer".into());
            profile.password_env = Some("NVR_PASS".into());

            match resolve_credentials(&profile, "home").unwrap() {
                Credentials::Basic { username, password } => {
                    assert_eq!(username, "viewer");
                    assert_eq!(password.expose_secret(), "hunter2");
                }
                other => panic!("expected basic credentials, got {other:?}"),
            }
            Ok(())
        });
    }

    #[test]
    fn basic_auth_without_username_is_rejected() {
        let mut profile = Profile::new("http://nvr.local");
        profile.auth_mode = "basic".into();
        profile.password = Some("pw".into());

        let err = resolve_credentials(&profile, "home").unwrap_err();
        assert!(matches!(err, ConfigError::NoCredentials { .. }), "got: {err:?}");
    }

    #[test]
    fn unknown_auth_mode_is_rejected() {
        let mut profile = Profile::new("http://nvr.local");
        profile.auth_mode = "digest".into();
        let err = resolve_credentials(&profile, "home").unwrap_err();
        assert!(
            matches!(&err, ConfigError::Validation { field, .. } if field == "auth_mode"),
            "got: {err:?}"
        );
    }

    #[test]
    fn invalid_tuning_values_are_rejected() {
        let mut profile = Profile::new("http://nvr.local");
        profile.tuning.backoff = Some("soon".into());
        let err = profile_to_backend_config(&profile, "home").unwrap_err();
        assert!(
            matches!(&err, ConfigError::Validation { field, .. } if field == "backoff"),
            "got: {err:?}"
        );

        let mut profile = Profile::new("http://nvr.local");
        profile.tuning.cache_capacity = Some(0);
        assert!(profile_to_backend_config(&profile, "home").is_err());

        let mut profile = Profile::new("http://nvr.local");
        profile.tuning.snapshot_interval = Some("0s".into());
        assert!(profile_to_backend_config(&profile, "home").is_err());
    }

    #[test]
    fn non_http_base_url_is_rejected() {
        let err = parse_base_url("rtsp://nvr.local:554").unwrap_err();
        assert!(matches!(err, ConfigError::Validation { .. }));
        assert!(parse_base_url("not a url").is_err());
    }

    #[test]
    fn unknown_profile_lists_available() {
        let mut cfg = Config::default();
        cfg.profiles
            .insert("home".into(), Profile::new("http://nvr.local"));
        match cfg.backend_config("office").unwrap_err() {
            ConfigError::ProfileNotFound { name, available } => {
                assert_eq!(name, "office");
                assert_eq!(available, vec!["home".to_owned()]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn saved_config_loads_back() {
        Jail::expect_with(|jail| {
            let path = jail.directory().join("nested").join("config.toml");

            let mut profile = Profile::new("http://nvr.local:5000");
            profile.quality = QualityTier::Low;
            profile.tuning.probe_timeout = Some("3s".into());
            let mut cfg = Config::default();
            cfg.default_profile = Some("home".into());
            cfg.profiles.insert("home".into(), profile.clone());

            save_config_to(&cfg, &path).unwrap();
            let loaded = load_config_from(&path).unwrap();

            assert_eq!(loaded.default_profile.as_deref(), Some("home"));
            assert_eq!(loaded.profiles["home"], profile);
            Ok(())
        });
    }
}
