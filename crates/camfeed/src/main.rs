mod cli;
mod commands;
mod config;
mod error;
mod output;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use camfeed_core::Controller;

use crate::cli::{Cli, Command};
use crate::error::CliError;

#[tokio::main]
async fn main() {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Setup tracing based on verbosity
    init_tracing(cli.global.verbose);

    // Dispatch and handle errors with proper exit codes
    if let Err(err) = run(cli).await {
        let code = err.exit_code();
        eprintln!("{:?}", miette::Report::new(err));
        std::process::exit(code);
    }
}

fn init_tracing(verbosity: u8) {
    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: Cli) -> Result<(), CliError> {
    match cli.command {
        // Config commands don't need a backend
        Command::Config(args) => commands::config_cmd::handle(args, &cli.global),

        // Shell completions generation
        Command::Completions(args) => {
            use clap::CommandFactory;
            use clap_complete::generate;

            let mut cmd = Cli::command();
            generate(args.shell, &mut cmd, "camfeed", &mut std::io::stdout());
            Ok(())
        }

        // All other commands require a controller
        cmd => {
            let mut resolved = config::resolve(&cli.global)?;
            commands::tune_backend(&cmd, &mut resolved.backend);
            let base_url = resolved.backend.base_url.to_string();
            let profile = resolved.profile;

            let mut builder = Controller::builder(resolved.backend);
            if let Some(player) = commands::player_for(&cmd, resolved.player.as_deref())? {
                builder = builder.player(player);
            }
            let controller = builder
                .build()
                .await
                .map_err(|e| CliError::from(e).in_context(&base_url, &profile))?;

            tracing::debug!(command = ?cmd, profile = %profile, "dispatching command");
            let result = commands::dispatch(cmd, &controller, &cli.global).await;

            // Always tear down feeds and purge the clip scratch directory.
            let shutdown = controller.shutdown().await;
            result.map_err(|e| e.in_context(&base_url, &profile))?;
            shutdown.map_err(CliError::from)
        }
    }
}
