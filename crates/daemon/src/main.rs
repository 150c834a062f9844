// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! ork daemon (orkd)
//!
//! Background process that schedules jobs onto runners and executes them.

use std::path::{Path, PathBuf};

use clap::Parser;
use ork_daemon::{server, Config, LifecycleError};
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info};

#[derive(Debug, Parser)]
#[command(name = "orkd", version, about = "ork job scheduling daemon")]
struct Args {
    /// TOML configuration file
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Directory for the lock file, log, WAL and socket
    #[arg(long, value_name = "DIR")]
    state_dir: Option<PathBuf>,

    /// Do not start the embedded runner
    #[arg(long)]
    no_runner: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut config = Config::load(args.config.as_deref())?;
    if let Some(dir) = args.state_dir {
        config = config.with_state_dir(dir);
    }
    if args.no_runner {
        config = config.with_runner_enabled(false);
    }
    let paths = config.paths()?;

    // Before tracing setup, so a supervisor can find where this attempt begins
    write_startup_marker(&paths.log_path)?;

    let log_guard = setup_logging(&paths.log_path)?;

    info!(state_dir = %paths.state_dir.display(), "starting orkd");

    let mut daemon = match ork_daemon::startup(&config).await {
        Ok(d) => d,
        Err(e) => {
            // Tracing is non-blocking and may not flush before exit
            write_startup_error(&paths.log_path, &e);
            error!(error = %e, "failed to start daemon");
            drop(log_guard);
            return Err(e.into());
        }
    };

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    info!(socket = %paths.socket_path.display(), "daemon ready");
    println!("READY");

    server::serve(&mut daemon, async {
        tokio::select! {
            _ = sigterm.recv() => info!("received SIGTERM, shutting down"),
            _ = sigint.recv() => info!("received SIGINT, shutting down"),
        }
    })
    .await;

    daemon.shutdown().await?;
    info!("daemon stopped");
    Ok(())
}

/// Startup marker prefix written to the log before anything else.
/// Full format: "--- orkd: starting (pid: 12345) ---"
pub const STARTUP_MARKER_PREFIX: &str = "--- orkd: starting (pid: ";

fn write_startup_marker(log_path: &Path) -> Result<(), LifecycleError> {
    use std::io::Write;

    if let Some(parent) = log_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)?;
    writeln!(file, "{}{}) ---", STARTUP_MARKER_PREFIX, std::process::id())?;
    Ok(())
}

fn write_startup_error(log_path: &Path, error: &LifecycleError) {
    use std::io::Write;

    let Ok(mut file) = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)
    else {
        return;
    };
    let _ = writeln!(file, "ERROR failed to start daemon: {}", error);
}

fn setup_logging(
    log_path: &Path,
) -> Result<tracing_appender::non_blocking::WorkerGuard, LifecycleError> {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let (Some(dir), Some(file)) = (log_path.parent(), log_path.file_name()) else {
        return Err(LifecycleError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("invalid log path {}", log_path.display()),
        )));
    };
    let file_appender = tracing_appender::rolling::never(dir, file);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(non_blocking))
        .init();

    Ok(guard)
}
