// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon lifecycle management: startup, supervision, shutdown.

use std::fs::File;
use std::io::Write;
use std::sync::Arc;
use std::time::{Duration, Instant};

use fs2::FileExt;
use ork_adapters::{
    AllowAll, FsRemote, ReleaseDownloader, StoreNotifyAdapter, TracedNotifyAdapter,
    TracedToolDownloader,
};
use ork_core::{HolderId, IdGen, SystemClock, UuidIdGen};
use ork_engine::{
    allocator_loop, manager_loop, supervise, BackoffConfig, LocalRunnerClient, LoopContext,
    RunnerDaemon, Service, ServiceDeps, TokenSigner,
};
use ork_storage::{Store, StoreError};
use thiserror::Error;
use tokio::net::UnixListener;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::{Config, ConfigError, Paths};

/// Service with the concrete adapters used by the daemon
pub type DaemonService = Service<TracedNotifyAdapter<StoreNotifyAdapter>, SystemClock, UuidIdGen>;

/// How long shutdown waits for the loops and running operations
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Daemon state during operation
pub struct DaemonState {
    pub paths: Paths,
    // NOTE(lifetime): Held to maintain exclusive file lock; released on drop
    #[allow(dead_code)]
    lock_file: File,
    pub listener: UnixListener,
    pub service: DaemonService,
    /// Filesystem-backed runs, workspaces, variables and state
    pub remote: FsRemote,
    pub start_time: Instant,
    /// Set by a `Shutdown` request
    pub shutdown_requested: bool,
    cancel: CancellationToken,
    tasks: JoinSet<()>,
}

impl DaemonState {
    /// Stop the loops and the embedded runner, then remove runtime files
    pub async fn shutdown(&mut self) -> Result<(), LifecycleError> {
        info!("shutting down daemon");
        self.cancel.cancel();
        let tasks = &mut self.tasks;
        let drained = tokio::time::timeout(SHUTDOWN_TIMEOUT, async {
            while tasks.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!(
                remaining = self.tasks.len(),
                "timed out waiting for tasks, aborting"
            );
            self.tasks.abort_all();
        }

        for path in [
            &self.paths.socket_path,
            &self.paths.lock_path,
            &self.paths.version_path,
        ] {
            if path.exists() {
                if let Err(e) = std::fs::remove_file(path) {
                    warn!(path = %path.display(), error = %e, "failed to remove runtime file");
                }
            }
        }

        info!("daemon shutdown complete");
        Ok(())
    }
}

/// Lifecycle errors
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to acquire lock: daemon already running?")]
    LockFailed(#[source] std::io::Error),

    #[error("failed to bind socket at {}: {source}", path.display())]
    BindFailed {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Start the daemon
pub async fn startup(config: &Config) -> Result<DaemonState, LifecycleError> {
    let paths = config.paths()?;
    match startup_inner(config, paths.clone()).await {
        Ok(state) => Ok(state),
        Err(e) => {
            // A held lock means another daemon owns these files
            if !matches!(e, LifecycleError::LockFailed(_)) {
                cleanup_on_failure(&paths);
            }
            Err(e)
        }
    }
}

async fn startup_inner(config: &Config, paths: Paths) -> Result<DaemonState, LifecycleError> {
    std::fs::create_dir_all(&paths.state_dir)?;

    // Lock before touching anything else
    let mut lock_file = std::fs::OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(&paths.lock_path)?;
    lock_file
        .try_lock_exclusive()
        .map_err(LifecycleError::LockFailed)?;
    lock_file.set_len(0)?;
    writeln!(lock_file, "{}", std::process::id())?;

    std::fs::write(&paths.version_path, env!("CARGO_PKG_VERSION"))?;

    if let Some(parent) = paths.wal_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let store = Store::open(&paths.wal_path)?;
    let unfinished = store
        .list_jobs()
        .into_iter()
        .filter(|j| !j.is_terminal())
        .count();
    info!(
        jobs = store.list_jobs().len(),
        unfinished,
        runners = store.list_runners().len(),
        pools = store.list_pools().len(),
        "loaded state"
    );

    std::fs::create_dir_all(&paths.remote_root)?;
    let remote = FsRemote::new(&paths.remote_root);
    let secret = load_secret(config, &paths)?;
    let mut service = Service::new(
        ServiceDeps {
            store: store.clone(),
            notify: TracedNotifyAdapter::new(StoreNotifyAdapter::new(store.clone())),
            phases: Arc::new(remote.clone()),
            authorizer: Arc::new(AllowAll),
        },
        TokenSigner::new(secret),
        SystemClock,
        UuidIdGen,
    );
    if let Some(secret) = &config.tokens.dynamic_credentials_secret {
        service = service.with_dynamic_credentials(TokenSigner::new(secret.clone()));
    }

    // Bind LAST, once everything else is known to work
    if paths.socket_path.exists() {
        std::fs::remove_file(&paths.socket_path)?;
    }
    if let Some(parent) = paths.socket_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let listener =
        UnixListener::bind(&paths.socket_path).map_err(|source| LifecycleError::BindFailed {
            path: paths.socket_path.clone(),
            source,
        })?;

    let cancel = CancellationToken::new();
    let mut tasks = JoinSet::new();
    spawn_loops(&mut tasks, config, &paths, &service, &remote, &cancel);

    info!(socket = %paths.socket_path.display(), "daemon started");
    Ok(DaemonState {
        paths,
        lock_file,
        listener,
        service,
        remote,
        start_time: Instant::now(),
        shutdown_requested: false,
        cancel,
        tasks,
    })
}

fn spawn_loops(
    tasks: &mut JoinSet<()>,
    config: &Config,
    paths: &Paths,
    service: &DaemonService,
    remote: &FsRemote,
    cancel: &CancellationToken,
) {
    let restart = BackoffConfig::default();

    let signaler = service.signaler().clone();
    tasks.spawn(supervise("signaler", restart.clone(), cancel.clone(), move |token| {
        let signaler = signaler.clone();
        async move { signaler.start(token).await }
    }));

    let ctx = LoopContext::new(
        service.store().clone(),
        HolderId::new(format!("orkd-{}", std::process::id())),
        SystemClock,
    )
    .with_backoff(config.allocator.backoff.clone());
    tasks.spawn(allocator_loop(ctx.clone(), service.clone(), cancel.clone()));
    tasks.spawn(manager_loop(
        ctx,
        service.clone(),
        config.manager.clone(),
        cancel.clone(),
    ));

    if !config.runner.enabled {
        info!("embedded runner disabled");
        return;
    }
    let runner = Arc::new(RunnerDaemon::new(
        LocalRunnerClient::new(service.clone()),
        Arc::new(remote.clone()),
        Arc::new(TracedToolDownloader::new(engine_downloader(config, paths))),
        config.runner.daemon.clone(),
    ));
    tasks.spawn(supervise("runner", restart, cancel.clone(), move |token| {
        let runner = Arc::clone(&runner);
        async move { runner.run(token).await }
    }));
}

/// Engine releases cached under the engine dir, as configured in `[runner]`
pub(crate) fn engine_downloader(config: &Config, paths: &Paths) -> ReleaseDownloader {
    let mut downloader = ReleaseDownloader::new(&paths.engine_dir);
    if let Some(url) = &config.runner.engine_url {
        downloader = downloader.with_base_url(url.clone());
    }
    if let Some(binary) = &config.runner.engine_binary {
        downloader = downloader.with_binary(binary.clone());
    }
    downloader
}

/// The configured token secret, or one generated on first start and kept
/// in the state directory
fn load_secret(config: &Config, paths: &Paths) -> Result<String, LifecycleError> {
    if let Some(secret) = &config.tokens.secret {
        return Ok(secret.clone());
    }
    match std::fs::read_to_string(&paths.secret_path) {
        Ok(secret) if !secret.trim().is_empty() => return Ok(secret.trim().to_string()),
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }

    use std::os::unix::fs::OpenOptionsExt;
    let secret = format!("{}{}", UuidIdGen.next(), UuidIdGen.next());
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .truncate(true)
        .write(true)
        .mode(0o600)
        .open(&paths.secret_path)?;
    file.write_all(secret.as_bytes())?;
    info!(path = %paths.secret_path.display(), "generated token secret");
    Ok(secret)
}

/// Clean up resources on startup failure
fn cleanup_on_failure(paths: &Paths) {
    for path in [&paths.socket_path, &paths.version_path, &paths.lock_path] {
        if path.exists() {
            let _ = std::fs::remove_file(path);
        }
    }
}

#[cfg(test)]
#[path = "lifecycle_tests.rs"]
mod tests;
