//! CLI configuration -- thin wrapper around `camfeed_config` shared types.
//!
//! Adds the resolution that respects `GlobalOpts` flag overrides
//! (--base-url, --token, --insecure, --timeout).

use std::time::Duration;

use camfeed_config::{Config, ConfigError};
use camfeed_core::{BackendConfig, Credentials, TlsMode};

use crate::cli::GlobalOpts;
use crate::error::CliError;

/// A backend config ready for `Controller::new`, plus what the CLI needs
/// beside it.
#[derive(Debug)]
pub struct Resolved {
    pub profile: String,
    pub backend: BackendConfig,
    /// Player command configured on the profile.
    pub player: Option<String>,
}

/// Resolve the active profile name from CLI flags and config.
pub fn active_profile_name(global: &GlobalOpts, config: &Config) -> String {
    global
        .profile
        .clone()
        .or_else(|| config.default_profile.clone())
        .unwrap_or_else(|| "default".into())
}

/// Build the backend config from the config file, the active profile and
/// CLI overrides. Without a matching profile, `--base-url` alone is enough.
pub fn resolve(global: &GlobalOpts) -> Result<Resolved, CliError> {
    let cfg = camfeed_config::load_config()?;
    let profile = active_profile_name(global, &cfg);

    let (mut backend, player) = if let Some(p) = cfg.profiles.get(&profile) {
        (cfg.backend_config(&profile)?, p.player.clone())
    } else if global.profile.is_some() && global.base_url.is_none() {
        // An explicitly requested profile must exist.
        return Err(ConfigError::ProfileNotFound {
            name: profile,
            available: cfg.profiles.keys().cloned().collect(),
        }
        .into());
    } else {
        let url = global.base_url.as_deref().ok_or_else(|| CliError::NoConfig {
            path: camfeed_config::config_path().display().to_string(),
        })?;
        let mut backend = BackendConfig::new(camfeed_config::parse_base_url(url)?);
        backend.connect_timeout = Duration::from_secs(cfg.defaults.timeout);
        if cfg.defaults.insecure {
            backend.tls = TlsMode::DangerAcceptInvalid;
        }
        (backend, None)
    };

    apply_overrides(&mut backend, global)?;
    Ok(Resolved {
        profile,
        backend,
        player,
    })
}

/// Apply flag overrides. Flags win over profile values.
pub fn apply_overrides(backend: &mut BackendConfig, global: &GlobalOpts) -> Result<(), CliError> {
    if let Some(ref url) = global.base_url {
        backend.base_url = camfeed_config::parse_base_url(url)?;
    }
    if let Some(ref token) = global.token {
        backend.credentials = Credentials::Bearer {
            token: token.clone().into(),
        };
    }
    if global.insecure {
        backend.tls = TlsMode::DangerAcceptInvalid;
    }
    if let Some(secs) = global.timeout {
        backend.connect_timeout = Duration::from_secs(secs);
    }

    // Per-process scratch directory; shutdown purges it.
    backend.cache.scratch_dir = backend
        .cache
        .scratch_dir
        .join(format!("run-{}", std::process::id()));
    Ok(())
}
