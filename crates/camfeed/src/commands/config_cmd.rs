//! Config subcommand handlers.

use std::fmt::Write as _;

use dialoguer::{Confirm, Input, Select};

use camfeed_config::{Config, Profile, SecretKind};
use camfeed_core::QualityTier;

use crate::cli::{ConfigArgs, ConfigCommand, GlobalOpts, InitArgs, SecretArg};
use crate::config;
use crate::error::CliError;
use crate::output;

use super::util;

const MASK: &str = "****";

// ── Helpers ─────────────────────────────────────────────────────────

/// Copy of the config with plaintext secrets masked.
fn redacted(cfg: &Config) -> Config {
    let mut cfg = cfg.clone();
    for profile in cfg.profiles.values_mut() {
        if profile.password.is_some() {
            profile.password = Some(MASK.into());
        }
        if profile.token.is_some() {
            profile.token = Some(MASK.into());
        }
    }
    cfg
}

/// Format config for display. Secrets are expected to be masked already.
fn format_config(cfg: &Config) -> String {
    let mut out = String::new();

    if let Some(ref default) = cfg.default_profile {
        let _ = writeln!(out, "default_profile = \"{default}\"");
    }
    let _ = writeln!(out);
    let _ = writeln!(out, "[defaults]");
    let _ = writeln!(out, "output = \"{}\"", cfg.defaults.output);
    let _ = writeln!(out, "color = \"{}\"", cfg.defaults.color);
    let _ = writeln!(out, "insecure = {}", cfg.defaults.insecure);
    let _ = writeln!(out, "timeout = {}", cfg.defaults.timeout);

    for (name, p) in &cfg.profiles {
        let _ = writeln!(out);
        let _ = writeln!(out, "[profiles.{name}]");
        let _ = writeln!(out, "base_url = \"{}\"", p.base_url);
        let _ = writeln!(out, "quality = \"{}\"", p.quality);
        let _ = writeln!(out, "auth_mode = \"{}\"", p.auth_mode);
        if let Some(ref u) = p.username {
            let _ = writeln!(out, "username = \"{u}\"");
        }
        if let Some(ref pw) = p.password {
            let _ = writeln!(out, "password = \"{pw}\"");
        }
        if let Some(ref env) = p.password_env {
            let _ = writeln!(out, "password_env = \"{env}\"");
        }
        if let Some(ref token) = p.token {
            let _ = writeln!(out, "token = \"{token}\"");
        }
        if let Some(ref env) = p.token_env {
            let _ = writeln!(out, "token_env = \"{env}\"");
        }
        if let Some(ref ca) = p.ca_cert {
            let _ = writeln!(out, "ca_cert = \"{}\"", ca.display());
        }
        if let Some(insecure) = p.insecure {
            let _ = writeln!(out, "insecure = {insecure}");
        }
        if let Some(timeout) = p.timeout {
            let _ = writeln!(out, "timeout = {timeout}");
        }
        if let Some(ref player) = p.player {
            let _ = writeln!(out, "player = \"{player}\"");
        }
    }

    out
}

/// Map a dialoguer / interactive I/O failure into CliError.
fn prompt_err(e: impl std::fmt::Display) -> CliError {
    CliError::Validation {
        field: "interactive".into(),
        reason: format!("prompt failed: {e}"),
    }
}

fn parse_bool(field: &str, value: &str) -> Result<bool, CliError> {
    value.parse().map_err(|_| CliError::Validation {
        field: field.into(),
        reason: "must be 'true' or 'false'".into(),
    })
}

fn parse_quality(value: &str) -> Result<QualityTier, CliError> {
    value.parse().map_err(|_| CliError::Validation {
        field: "quality".into(),
        reason: "must be 'high' or 'low'".into(),
    })
}

fn check_auth_mode(value: &str) -> Result<(), CliError> {
    if matches!(value, "none" | "basic" | "bearer") {
        Ok(())
    } else {
        Err(CliError::Validation {
            field: "auth_mode".into(),
            reason: "must be 'none', 'basic', or 'bearer'".into(),
        })
    }
}

/// Prompt for a secret and store it in the keyring, or return it for
/// plaintext config when the user prefers that.
fn prompt_secret(
    profile_name: &str,
    kind: SecretKind,
    label: &str,
) -> Result<Option<String>, CliError> {
    let secret = rpassword::prompt_password(format!("{label}: ")).map_err(prompt_err)?;
    if secret.is_empty() {
        return Err(CliError::Validation {
            field: label.to_lowercase(),
            reason: format!("{label} cannot be empty"),
        });
    }

    let choices = &[
        "Store in system keyring (recommended)",
        "Save to config file (plaintext)",
    ];
    let selection = Select::new()
        .with_prompt(format!("Where to store the {}?", label.to_lowercase()))
        .items(choices)
        .default(0)
        .interact()
        .map_err(prompt_err)?;

    if selection == 0 {
        camfeed_config::store_secret(profile_name, kind, &secret)?;
        eprintln!("   ✓ {label} stored in system keyring");
        Ok(None)
    } else {
        Ok(Some(secret))
    }
}

/// Interactive wizard for one profile.
fn prompt_profile(profile_name: &str, args: &InitArgs) -> Result<Profile, CliError> {
    let base_url: String = Input::new()
        .with_prompt("Backend URL")
        .default("http://127.0.0.1:5000".into())
        .validate_with(|input: &String| {
            camfeed_config::parse_base_url(input)
                .map(|_| ())
                .map_err(|e| e.to_string())
        })
        .interact_text()
        .map_err(prompt_err)?;
    let mut profile = Profile::new(base_url);

    profile.quality = match args.quality {
        Some(q) => q.into(),
        None => {
            let tier = Select::new()
                .with_prompt("Preferred quality")
                .items(&["High (main stream)", "Low (substream)"])
                .default(0)
                .interact()
                .map_err(prompt_err)?;
            if tier == 0 {
                QualityTier::High
            } else {
                QualityTier::Low
            }
        }
    };

    let auth = Select::new()
        .with_prompt("Authentication")
        .items(&["None", "Username/Password", "Bearer token"])
        .default(0)
        .interact()
        .map_err(prompt_err)?;
    match auth {
        1 => {
            let user: String = Input::new()
                .with_prompt("Username")
                .interact_text()
                .map_err(prompt_err)?;
            profile.auth_mode = "basic".into();
            profile.username = Some(user);
            profile.password = prompt_secret(profile_name, SecretKind::Password, "Password")?;
        }
        2 => {
            profile.auth_mode = "bearer".into();
            profile.token = prompt_secret(profile_name, SecretKind::Token, "Token")?;
        }
        _ => {}
    }

    if profile.base_url.starts_with("https")
        && Confirm::new()
            .with_prompt("Accept self-signed TLS certificates?")
            .default(false)
            .interact()
            .map_err(prompt_err)?
    {
        profile.insecure = Some(true);
    }

    profile.player = match args.player.clone() {
        Some(player) => Some(player),
        None => {
            let player: String = Input::new()
                .with_prompt("Player command (empty for none)")
                .default("ffplay -loglevel error {url}".into())
                .allow_empty(true)
                .interact_text()
                .map_err(prompt_err)?;
            Some(player).filter(|p| !p.trim().is_empty())
        }
    };

    Ok(profile)
}

fn init(args: &InitArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let mut cfg = camfeed_config::load_config()?;
    let profile_name = args
        .name
        .clone()
        .or_else(|| global.profile.clone())
        .unwrap_or_else(|| "default".into());

    let profile = if let Some(ref url) = args.url {
        camfeed_config::parse_base_url(url)?;
        let mut profile = Profile::new(url.trim());
        if let Some(q) = args.quality {
            profile.quality = q.into();
        }
        profile.player.clone_from(&args.player);
        profile
    } else {
        eprintln!("camfeed configuration wizard");
        eprintln!("   Config path: {}\n", camfeed_config::config_path().display());
        prompt_profile(&profile_name, args)?
    };

    if cfg.profiles.is_empty() || cfg.default_profile.is_none() {
        cfg.default_profile = Some(profile_name.clone());
    }
    cfg.profiles.insert(profile_name.clone(), profile);
    let path = camfeed_config::save_config(&cfg)?;

    util::note(
        global,
        &format!(
            "✓ Profile '{profile_name}' written to {}\n  Try it: camfeed probe <camera> --profile {profile_name}",
            path.display()
        ),
    );
    Ok(())
}

fn set(key: &str, value: String, global: &GlobalOpts) -> Result<(), CliError> {
    let mut cfg = camfeed_config::load_config()?;
    let profile_name = config::active_profile_name(global, &cfg);
    let mut profile = cfg.profile(&profile_name)?.clone();

    match key {
        "base_url" | "base-url" | "url" => {
            camfeed_config::parse_base_url(&value)?;
            profile.base_url = value;
        }
        "quality" => profile.quality = parse_quality(&value)?,
        "auth_mode" | "auth-mode" => {
            check_auth_mode(&value)?;
            profile.auth_mode = value;
        }
        "username" => profile.username = Some(value),
        "password_env" | "password-env" => profile.password_env = Some(value),
        "token_env" | "token-env" => profile.token_env = Some(value),
        "ca_cert" | "ca-cert" => profile.ca_cert = Some(value.into()),
        "insecure" => profile.insecure = Some(parse_bool("insecure", &value)?),
        "timeout" => {
            profile.timeout = Some(value.parse().map_err(|_| CliError::Validation {
                field: "timeout".into(),
                reason: "must be a number (seconds)".into(),
            })?);
        }
        "player" => profile.player = Some(value).filter(|p| !p.trim().is_empty()),
        other => {
            return Err(CliError::Validation {
                field: other.into(),
                reason: format!(
                    "unknown config key '{other}'. Valid keys: base_url, quality, auth_mode, \
                     username, password_env, token_env, ca_cert, insecure, timeout, player"
                ),
            });
        }
    }

    cfg.profiles.insert(profile_name.clone(), profile);
    camfeed_config::save_config(&cfg)?;
    util::note(global, &format!("✓ Set {key} on profile '{profile_name}'"));
    Ok(())
}

// ── Handler ─────────────────────────────────────────────────────────

pub fn handle(args: ConfigArgs, global: &GlobalOpts) -> Result<(), CliError> {
    match args.command {
        ConfigCommand::Init(init_args) => init(&init_args, global),

        ConfigCommand::Show => {
            let cfg = redacted(&camfeed_config::load_config()?);
            let out = output::render_single(&global.output, &cfg, format_config, |_| {
                camfeed_config::config_path().display().to_string()
            })?;
            output::print_output(&out, global.quiet);
            Ok(())
        }

        ConfigCommand::Path => {
            println!("{}", camfeed_config::config_path().display());
            Ok(())
        }

        ConfigCommand::Set { key, value } => set(&key, value, global),

        ConfigCommand::Profiles => {
            let cfg = camfeed_config::load_config()?;
            let default = cfg.default_profile.as_deref().unwrap_or("default");
            if cfg.profiles.is_empty() {
                util::note(global, "No profiles configured. Run: camfeed config init");
            } else {
                for (name, profile) in &cfg.profiles {
                    let marker = if name == default { " *" } else { "" };
                    println!("{name}{marker}\t{}", profile.base_url);
                }
            }
            Ok(())
        }

        ConfigCommand::Use { name } => {
            let mut cfg = camfeed_config::load_config()?;
            cfg.profile(&name)?;
            cfg.default_profile = Some(name.clone());
            camfeed_config::save_config(&cfg)?;
            util::note(global, &format!("✓ Default profile set to '{name}'"));
            Ok(())
        }

        ConfigCommand::SetSecret { kind } => {
            let cfg = camfeed_config::load_config()?;
            let profile_name = config::active_profile_name(global, &cfg);
            cfg.profile(&profile_name)?;

            let (kind, label) = match kind {
                SecretArg::Password => (SecretKind::Password, "Password"),
                SecretArg::Token => (SecretKind::Token, "Token"),
            };
            let secret = rpassword::prompt_password(format!("{label}: ")).map_err(prompt_err)?;
            if secret.is_empty() {
                return Err(CliError::Validation {
                    field: label.to_lowercase(),
                    reason: format!("{label} cannot be empty"),
                });
            }
            camfeed_config::store_secret(&profile_name, kind, &secret)?;
            util::note(
                global,
                &format!("✓ {label} stored in system keyring for '{profile_name}'"),
            );
            Ok(())
        }
    }
}
