//! Clap derive structures for the `camfeed` CLI.
//!
//! Defines the complete command tree, global flags, and shared types.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use camfeed_core::QualityTier;

// ── Top-Level CLI ────────────────────────────────────────────────────

/// camfeed -- camera feeds, snapshots and event clips from the terminal
#[derive(Debug, Parser)]
#[command(
    name = "camfeed",
    version,
    about = "Watch camera feeds and fetch event clips from a recording backend",
    long_about = "Acquires live camera feeds from a network video recorder.\n\n\
        Probes HLS and MJPEG streams in priority order, reconnects on playback\n\
        failure and falls back to periodic still images when no stream works.",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Backend profile to use
    #[arg(long, short = 'p', env = "CAMFEED_PROFILE", global = true)]
    pub profile: Option<String>,

    /// Backend base URL (overrides profile)
    #[arg(long, short = 'u', env = "CAMFEED_BASE_URL", global = true)]
    pub base_url: Option<String>,

    /// Bearer token (overrides profile credentials)
    #[arg(long, env = "CAMFEED_TOKEN", global = true, hide_env = true)]
    pub token: Option<String>,

    /// Output format
    #[arg(
        long,
        short = 'o',
        env = "CAMFEED_OUTPUT",
        default_value = "table",
        global = true
    )]
    pub output: OutputFormat,

    /// When to use color output
    #[arg(long, default_value = "auto", global = true)]
    pub color: ColorMode,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,

    /// Accept self-signed TLS certificates
    #[arg(long, short = 'k', env = "CAMFEED_INSECURE", global = true)]
    pub insecure: bool,

    /// Connect timeout in seconds (overrides profile)
    #[arg(long, env = "CAMFEED_TIMEOUT", global = true)]
    pub timeout: Option<u64>,
}

// ── Output & Color Enums ─────────────────────────────────────────────

#[derive(Debug, Clone, ValueEnum)]
pub enum OutputFormat {
    /// Pretty table (default, interactive)
    Table,
    /// Pretty-printed JSON
    Json,
    /// Compact single-line JSON
    JsonCompact,
    /// YAML
    Yaml,
    /// Plain text, one value per line (scripting)
    Plain,
}

#[derive(Debug, Clone, ValueEnum)]
pub enum ColorMode {
    /// Auto-detect (color if terminal is interactive)
    Auto,
    /// Always emit color codes
    Always,
    /// Never emit color codes
    Never,
}

/// Stream quality tier.
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum QualityArg {
    /// Main stream
    High,
    /// Substream
    Low,
}

impl From<QualityArg> for QualityTier {
    fn from(arg: QualityArg) -> Self {
        match arg {
            QualityArg::High => Self::High,
            QualityArg::Low => Self::Low,
        }
    }
}

// ── Top-Level Command Enum ───────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// List the stream candidates for a camera, in priority order
    #[command(alias = "cand")]
    Candidates(CameraArgs),

    /// Check which streams of a camera are reachable
    Probe(ProbeArgs),

    /// Acquire a live feed and follow its state
    #[command(alias = "w")]
    Watch(WatchArgs),

    /// Save the camera's current still image
    #[command(alias = "snap")]
    Snapshot(SnapshotArgs),

    /// Download and play recorded event clips
    Clip(ClipArgs),

    /// Manage configuration profiles
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

// ── Feed commands ────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct CameraArgs {
    /// Camera id as known to the backend
    pub camera: String,

    /// Quality tier (defaults to the profile's)
    #[arg(long, short = 'Q')]
    pub quality: Option<QualityArg>,
}

#[derive(Debug, Args)]
pub struct ProbeArgs {
    #[command(flatten)]
    pub target: CameraArgs,

    /// Probe every candidate instead of stopping at the first usable stream
    #[arg(long, short = 'a')]
    pub all: bool,
}

#[derive(Debug, Args)]
pub struct WatchArgs {
    #[command(flatten)]
    pub target: CameraArgs,

    /// Player command, e.g. "ffplay -loglevel error {url}"
    #[arg(long, env = "CAMFEED_PLAYER", conflicts_with = "headless")]
    pub player: Option<String>,

    /// Follow the feed state without starting a player
    #[arg(long)]
    pub headless: bool,

    /// Stop after this long (e.g. "30s", "5m")
    #[arg(long, short = 'd')]
    pub duration: Option<humantime::Duration>,
}

#[derive(Debug, Args)]
pub struct SnapshotArgs {
    #[command(flatten)]
    pub target: CameraArgs,

    /// Output file (defaults to <camera>.jpg)
    #[arg(long = "output-file", short = 'O')]
    pub output_file: Option<PathBuf>,
}

// ── Clips ────────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ClipArgs {
    #[command(subcommand)]
    pub command: ClipCommand,
}

#[derive(Debug, Subcommand)]
pub enum ClipCommand {
    /// Download an event clip, optionally playing it
    Fetch {
        /// Event id
        event: String,

        /// Output file (defaults to <event>.mp4 unless --play is given)
        #[arg(long = "output-file", short = 'O')]
        output_file: Option<PathBuf>,

        /// Play the clip once it is downloaded
        #[arg(long)]
        play: bool,

        /// Player command used with --play
        #[arg(long, env = "CAMFEED_PLAYER")]
        player: Option<String>,
    },

    /// Download several clips in the background and report the cache
    Preload {
        /// Event ids
        #[arg(required = true)]
        events: Vec<String>,

        /// Copy the downloaded clips into this directory
        #[arg(long)]
        dir: Option<PathBuf>,
    },
}

// ── Config ───────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Create or update a profile (interactive unless --url is given)
    Init(InitArgs),

    /// Show the current configuration, secrets masked
    Show,

    /// Print the configuration file path
    Path,

    /// Set a value on the active profile
    Set {
        /// Key (base_url, quality, auth_mode, username, player, insecure, timeout, ...)
        key: String,
        /// New value
        value: String,
    },

    /// List configured profiles
    Profiles,

    /// Set the default profile
    Use {
        /// Profile name
        name: String,
    },

    /// Store a password or token in the system keyring
    SetSecret {
        /// Which secret to store
        kind: SecretArg,
    },
}

#[derive(Debug, Args)]
pub struct InitArgs {
    /// Profile name (defaults to --profile, then "default")
    #[arg(long)]
    pub name: Option<String>,

    /// Backend base URL; skips the interactive wizard
    #[arg(long)]
    pub url: Option<String>,

    /// Default quality tier for the profile
    #[arg(long, short = 'Q')]
    pub quality: Option<QualityArg>,

    /// Player command for the profile
    #[arg(long)]
    pub player: Option<String>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum SecretArg {
    /// Basic-auth password
    Password,
    /// Bearer token
    Token,
}

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}
