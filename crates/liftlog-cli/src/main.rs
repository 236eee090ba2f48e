//! liftlog - a command-line workout log.
//!
//! Signs into the workout backend, browses exercises by muscle group,
//! records finished exercises and manages the user profile.

mod commands;
mod prompt;

use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use liftlog_core::{ApiClient, Config, SessionManager};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Log file name inside the data directory
const LOG_FILE: &str = "liftlog.log";

#[derive(Parser)]
#[command(name = "liftlog", version, about = "Command-line workout log")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Also write logs to stderr
    #[arg(long, short = 'v', global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
pub enum Command {
    /// Sign in to your account
    Login {
        /// Account e-mail (defaults to the last one used)
        #[arg(long)]
        email: Option<String>,
    },

    /// Create an account and sign in
    Signup,

    /// Sign out and forget the stored session
    Logout,

    /// Show the signed-in user
    Whoami,

    /// List muscle groups
    Groups,

    /// List the exercises of a muscle group
    Exercises {
        /// Muscle group name
        group: String,
    },

    /// Show one exercise
    Exercise {
        /// Exercise id
        id: String,
    },

    /// Mark an exercise as done
    Done {
        /// Exercise id
        id: String,
    },

    /// Show finished exercises grouped by day
    History,

    /// Update your profile
    Profile {
        /// New display name
        #[arg(long)]
        name: String,
    },

    /// Change your password
    Password,

    /// Upload a new profile picture
    Avatar {
        /// Image file
        path: PathBuf,
    },
}

/// Initialize the tracing subscriber for logging.
///
/// Logs go to a file in the data directory; `RUST_LOG` controls the level
/// (default `warn`). The returned guard flushes the file writer on drop.
fn init_tracing(log_dir: &Path, verbose: bool) -> Result<WorkerGuard> {
    std::fs::create_dir_all(log_dir)
        .with_context(|| format!("Failed to create log directory {}", log_dir.display()))?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let (file_writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::never(log_dir, LOG_FILE));

    let stderr_layer = verbose.then(|| fmt::layer().with_writer(io::stderr));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(file_writer).with_ansi(false))
        .with(stderr_layer)
        .with(filter)
        .init();

    Ok(guard)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let mut config = Config::load()?;
    let log_guard = init_tracing(&config.data_dir()?, cli.verbose)?;
    info!(api_url = %config.api_url, storage = ?config.storage, "liftlog starting");

    let api = ApiClient::from_config(&config).context("Failed to create API client")?;
    let storage = config.open_storage()?;
    let session = SessionManager::new(api, storage);

    if session.restore_session() {
        info!("Restored stored session");
    }

    let result = commands::run(&cli.command, &session, &mut config).await;

    if let Err(e) = result {
        warn!(error = %e, "Command failed");
        eprintln!("{}", commands::describe_error(&e, cli.command.fallback()));
        drop(log_guard);
        std::process::exit(1);
    }

    Ok(())
}
