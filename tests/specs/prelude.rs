// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared fixtures for the scenario specs

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use flate2::write::GzEncoder;
use flate2::Compression;

pub use std::sync::Arc;
pub use std::time::Duration;

pub use ork_adapters::{
    FakeAuthorizer, FakeDownloader, FakeNotifyAdapter, FakeRemote, Variable, Workspace,
};
pub use ork_core::{
    Clock, CreatePoolOptions, FakeClock, HolderId, Job, JobSignal, JobStatus, Phase,
    RegistrationRequest, Run, RunStatus, RunnerMeta, RunnerStatus, SequentialIdGen, Subject,
    JOB_SIGNAL_CHANNEL,
};
pub use ork_engine::{
    allocator_loop, BackoffConfig, DaemonConfig, DaemonError, LocalRunnerClient, LoopContext,
    Manager, ManagerConfig, RunnerDaemon, Service, ServiceDeps, TokenSigner,
};
pub use ork_storage::Store;
pub use tokio_util::sync::CancellationToken;

pub type SpecService = Service<FakeNotifyAdapter, FakeClock, SequentialIdGen>;

/// A scheduler wired to in-memory collaborators. Dropping it stops every
/// loop it started.
pub struct World {
    pub service: SpecService,
    pub store: Store,
    pub notify: FakeNotifyAdapter,
    pub remote: FakeRemote,
    pub authz: FakeAuthorizer,
    pub clock: FakeClock,
    cancel: CancellationToken,
}

impl World {
    pub fn new() -> Self {
        let store = Store::in_memory();
        let notify = FakeNotifyAdapter::new();
        let remote = FakeRemote::new();
        let authz = FakeAuthorizer::new();
        let clock = FakeClock::new();
        let service = Service::new(
            ServiceDeps {
                store: store.clone(),
                notify: notify.clone(),
                phases: Arc::new(remote.clone()),
                authorizer: Arc::new(authz.clone()),
            },
            TokenSigner::new(b"scenario-signing-key".to_vec()),
            clock.clone(),
            SequentialIdGen::new("s"),
        );
        Self {
            service,
            store,
            notify,
            remote,
            authz,
            clock,
            cancel: CancellationToken::new(),
        }
    }

    /// Register a server runner directly, without a daemon behind it
    pub async fn runner(&self, max_jobs: usize) -> RunnerMeta {
        self.service
            .register(
                &Subject::Unregistered { pool: None },
                RegistrationRequest::new("0.1.0", max_jobs),
            )
            .await
            .unwrap()
    }

    /// Create a job for `run`, making the run known to the remote
    pub async fn job(&self, run: Run) -> Job {
        self.remote.add_run(run.clone());
        self.service.create_job(&run).await.unwrap()
    }

    pub fn job_state(&self, job: &Job) -> Job {
        self.store.get_job(&job.id).unwrap()
    }

    pub fn runner_state(&self, runner: &RunnerMeta) -> RunnerMeta {
        self.store.get_runner(&runner.id).unwrap()
    }

    /// A run with a workspace, configuration and variables in the remote
    pub fn seed_run(&self, id: &str, variables: Vec<Variable>) -> Run {
        let mut run = Run::new(id, "acme", "ws-1");
        run.config_version_id = "cv-1".to_string();
        run.engine_version = "1.9.0".to_string();
        self.remote.add_workspace(Workspace::new("ws-1", "dev", "acme"));
        self.remote.add_config("cv-1", config_tarball());
        self.remote.set_variables(&run.id, variables);
        run
    }

    /// Run the allocator loop until the world is dropped
    pub fn start_allocator(&self) {
        let ctx = LoopContext::new(self.store.clone(), HolderId::new("scenario"), self.clock.clone())
            .with_backoff(fast_backoff());
        tokio::spawn(allocator_loop(
            ctx,
            self.service.clone(),
            self.cancel.child_token(),
        ));
    }

    /// Relay job signals and wait for the relay to attach
    pub async fn start_signaler(&self) {
        let signaler = self.service.signaler().clone();
        let cancel = self.cancel.child_token();
        tokio::spawn(async move { signaler.start(cancel).await });
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    /// Start a runner daemon executing with the engine in `bin`
    pub fn start_daemon(
        &self,
        bin: &Path,
        max_jobs: usize,
    ) -> (
        CancellationToken,
        tokio::task::JoinHandle<Result<(), DaemonError>>,
    ) {
        let daemon = RunnerDaemon::new(
            LocalRunnerClient::new(self.service.clone()),
            Arc::new(self.remote.clone()),
            Arc::new(FakeDownloader::new(write_engine(bin))),
            DaemonConfig::default()
                .with_max_jobs(max_jobs)
                .with_heartbeat_interval(Duration::from_millis(20))
                .with_backoff(fast_backoff()),
        );
        let cancel = self.cancel.child_token();
        let task = tokio::spawn({
            let cancel = cancel.clone();
            async move { daemon.run(cancel).await }
        });
        (cancel, task)
    }

    /// Child of the token every started loop listens on
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.child_token()
    }

    /// Wait for the first runner to register
    pub async fn registered(&self) -> RunnerMeta {
        for _ in 0..500 {
            if let Some(runner) = self.service.list_runners().into_iter().next() {
                return runner;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("no runner registered");
    }

    /// Signals published on the bus
    pub fn published_signals(&self) -> Vec<JobSignal> {
        self.notify
            .calls()
            .into_iter()
            .filter(|c| c.channel == JOB_SIGNAL_CHANNEL)
            .map(|c| serde_json::from_str(&c.payload).unwrap())
            .collect()
    }
}

impl Drop for World {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

pub fn fast_backoff() -> BackoffConfig {
    BackoffConfig::default()
        .with_initial(Duration::from_millis(10))
        .with_max(Duration::from_millis(50))
}

/// Poll `check` until it holds
pub async fn eventually<F: Fn() -> bool>(what: &str, check: F) {
    for _ in 0..1000 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

/// Shell stand-in for the engine. `SLOW` makes plan run until interrupted.
pub const ENGINE: &str = r##"#!/bin/sh
case "$1" in
init)
  echo "engine init"
  echo "# providers" > .terraform.lock.hcl
  ;;
plan)
  echo "engine plan"
  if [ -n "$SLOW" ]; then
    trap 'echo interrupted; exit 1' INT
    while true; do sleep 0.05; done
  fi
  echo "binary plan" > plan.out
  ;;
show)
  echo '{"format_version":"1.2"}'
  ;;
apply)
  echo "engine apply"
  echo '{"serial": 3}' > terraform.tfstate
  ;;
esac
"##;

pub const MAIN_TF: &str = "resource \"null_resource\" \"x\" {}\n";

pub fn write_engine(dir: &Path) -> PathBuf {
    std::fs::create_dir_all(dir).unwrap();
    let path = dir.join("terraform");
    std::fs::write(&path, ENGINE).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// Gzipped configuration holding [`MAIN_TF`]
pub fn config_tarball() -> Vec<u8> {
    let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
    let mut header = tar::Header::new_gnu();
    header.set_size(MAIN_TF.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder
        .append_data(&mut header, "main.tf", MAIN_TF.as_bytes())
        .unwrap();
    builder.into_inner().unwrap().finish().unwrap()
}
