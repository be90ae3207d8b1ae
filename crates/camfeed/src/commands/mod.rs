//! Command dispatch: bridges CLI args -> controller operations -> output.

pub mod candidates;
pub mod clip;
pub mod config_cmd;
pub mod probe;
pub mod snapshot;
pub mod util;
pub mod watch;

use std::sync::Arc;

use camfeed_core::{BackendConfig, Controller, Player, ProcessPlayer};

use crate::cli::{ClipArgs, ClipCommand, Command, GlobalOpts};
use crate::error::CliError;

/// Dispatch a backend-bound command to the appropriate handler.
pub async fn dispatch(
    cmd: Command,
    controller: &Controller,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    match cmd {
        Command::Candidates(args) => candidates::handle(controller, &args, global),
        Command::Probe(args) => probe::handle(controller, &args, global).await,
        Command::Watch(args) => watch::handle(controller, args, global).await,
        Command::Snapshot(args) => snapshot::handle(controller, args, global).await,
        Command::Clip(args) => clip::handle(controller, args, global).await,
        // Config and Completions are handled before dispatch
        Command::Config(_) | Command::Completions(_) => Err(CliError::Internal(
            "config and completions never reach the controller".into(),
        )),
    }
}

/// Adjust the backend config for a command before the controller is built.
pub fn tune_backend(cmd: &Command, backend: &mut BackendConfig) {
    // A preload batch never evicts its own clips.
    if let Command::Clip(ClipArgs {
        command: ClipCommand::Preload { events, .. },
    }) = cmd
    {
        backend.cache.capacity = backend.cache.capacity.max(events.len());
    }
}

/// Pick the playback backend for a command. `None` keeps the controller's
/// headless default.
pub fn player_for(
    cmd: &Command,
    profile_player: Option<&str>,
) -> Result<Option<Arc<dyn Player>>, CliError> {
    let line = match cmd {
        Command::Watch(args) if !args.headless => args.player.as_deref().or(profile_player),
        Command::Clip(ClipArgs {
            command: ClipCommand::Fetch {
                play: true, player, ..
            },
        }) => Some(player.as_deref().or(profile_player).ok_or_else(|| {
            CliError::Validation {
                field: "player".into(),
                reason: "--play needs a player command (--player or the profile's `player`)"
                    .into(),
            }
        })?),
        _ => None,
    };

    let Some(line) = line else {
        return Ok(None);
    };
    let player = ProcessPlayer::from_command_line(line)?;
    tracing::debug!(program = player.program(), "using external player");
    Ok(Some(Arc::new(player)))
}
