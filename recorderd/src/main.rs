//! Capture station daemon and CLI front-end.
//!
//! Without a subcommand this runs the daemon. The control subcommands are a
//! thin dispatcher: start/stop/restart/status/transcode talk to the running
//! daemon over its HTTP API; stats and cleanup operate on the recordings
//! tree directly.

mod commands;
mod daemon;
mod monitor;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use config_manager::Config;

use crate::commands::CliError;

#[derive(Parser)]
#[command(name = "recorderd")]
#[command(about = "Capture supervisor for attached USB video sources")]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = "/etc/recorderd/config.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the capture daemon (default)
    Run,
    /// Per-source status from the running daemon
    Status,
    /// Start one source, or all
    Start { id: String },
    /// Stop one source, or all
    Stop { id: String },
    /// Restart one source, or all
    Restart { id: String },
    /// Recording totals and disk usage
    Stats,
    /// Prune recordings older than the configured maximum age
    Cleanup {
        /// Report what would be removed without deleting
        #[arg(long)]
        dry_run: bool,
    },
    /// Background transcoder control
    Transcode {
        #[command(subcommand)]
        action: TranscodeAction,
    },
}

#[derive(Subcommand)]
enum TranscodeAction {
    /// Cumulative transcoding statistics
    Stats,
    /// Allow the transcoder to pick up work
    Enable,
    /// Quiesce the transcoder after the current file
    Disable,
}

fn main() {
    let cli = Cli::parse();
    std::process::exit(run(cli));
}

fn run(cli: Cli) -> i32 {
    let config = match Config::load(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {}", e);
            return 1;
        }
    };

    let result = match cli.command.unwrap_or(Command::Run) {
        Command::Run => {
            return match daemon::run(config) {
                Ok(()) => 0,
                Err(e) => {
                    eprintln!("error: {:#}", e);
                    2
                }
            };
        }
        Command::Status => commands::status(&config),
        Command::Start { id } => commands::control(&config, "start", &id),
        Command::Stop { id } => commands::control(&config, "stop", &id),
        Command::Restart { id } => commands::control(&config, "restart", &id),
        Command::Stats => commands::stats(&config),
        Command::Cleanup { dry_run } => commands::cleanup(&config, dry_run),
        Command::Transcode { action } => match action {
            TranscodeAction::Stats => commands::transcode_stats(&config),
            TranscodeAction::Enable => commands::transcode_toggle(&config, true),
            TranscodeAction::Disable => commands::transcode_toggle(&config, false),
        },
    };

    match result {
        Ok(()) => 0,
        Err(CliError::Validation(msg)) => {
            eprintln!("error: {}", msg);
            1
        }
        Err(CliError::Operational(msg)) => {
            eprintln!("error: {}", msg);
            2
        }
    }
}
