// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! orkd control socket specs
//!
//! Start the daemon in a scratch state directory and drive it the way an
//! operator would: through requests on its Unix socket.

use std::path::PathBuf;

use ork_adapters::{FsRemote, RunClient};
use ork_daemon::protocol::{self, Request, Response};
use ork_daemon::{serve, startup, Config};
use similar_asserts::assert_eq;

use crate::prelude::*;

struct Orkd {
    socket: PathBuf,
    lock: PathBuf,
    remote: FsRemote,
    task: tokio::task::JoinHandle<()>,
    dir: tempfile::TempDir,
}

impl Orkd {
    /// Start orkd with the embedded runner, its engine already cached
    async fn start() -> Self {
        Self::start_with(true).await
    }

    async fn start_with(runner: bool) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default()
            .with_state_dir(dir.path())
            .with_runner_enabled(runner);
        config.runner.engine_binary = Some("terraform".to_string());
        config.runner.daemon = DaemonConfig::default()
            .with_name("orkd-runner")
            .with_heartbeat_interval(Duration::from_millis(50))
            .with_backoff(fast_backoff());
        let paths = config.paths().unwrap();
        write_engine(&paths.engine_dir.join("1.9.0"));

        let mut daemon = startup(&config).await.unwrap();
        let remote = daemon.remote.clone();
        let task = tokio::spawn(async move {
            serve(&mut daemon, std::future::pending()).await;
            daemon.shutdown().await.unwrap();
        });
        Self {
            socket: paths.socket_path,
            lock: paths.lock_path,
            remote,
            task,
            dir,
        }
    }

    async fn call(&self, request: Request) -> Response {
        protocol::call(&self.socket, &request, Duration::from_secs(5))
            .await
            .unwrap()
    }

    /// A planable run in the remote, ready to enqueue
    async fn seed_run(&self, id: &str) -> Run {
        let mut run = Run::new(id, "acme", "ws-1");
        run.config_version_id = "cv-1".to_string();
        run.engine_version = "1.9.0".to_string();
        self.remote.put_run(&run).await.unwrap();
        self.remote
            .put_workspace(&Workspace::new("ws-1", "dev", "acme"))
            .await
            .unwrap();
        self.remote
            .put_config("cv-1", &config_tarball())
            .await
            .unwrap();
        run
    }

    async fn jobs(&self) -> Vec<Job> {
        match self.call(Request::ListJobs).await {
            Response::Jobs { jobs } => jobs,
            other => panic!("unexpected response: {other:?}"),
        }
    }

    /// Ask orkd to shut down and wait for it. The state directory outlives
    /// the daemon until the returned guard is dropped.
    async fn stop(self) -> tempfile::TempDir {
        assert_eq!(self.call(Request::Shutdown).await, Response::ShuttingDown);
        tokio::time::timeout(Duration::from_secs(10), self.task)
            .await
            .unwrap()
            .unwrap();
        self.dir
    }
}

#[tokio::test]
async fn enqueued_run_is_planned_by_the_embedded_runner() {
    let orkd = Orkd::start().await;
    let run = orkd.seed_run("run-1").await;

    let job = match orkd.call(Request::EnqueueRun { run: run.id.clone() }).await {
        Response::Job { job: Some(job) } => job,
        other => panic!("unexpected response: {other:?}"),
    };
    assert_eq!(job.spec.phase, Phase::Plan);

    let mut finished = None;
    for _ in 0..1000 {
        finished = orkd
            .jobs()
            .await
            .into_iter()
            .find(|j| j.id == job.id && j.is_terminal());
        if finished.is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(finished.map(|j| j.status), Some(JobStatus::Finished));

    let planned = orkd.remote.get_run(&run.id).await.unwrap();
    assert_eq!(planned.status, RunStatus::Planned);
    let output = std::fs::read_to_string(orkd.remote.log_path(&run.id, Phase::Plan)).unwrap();
    assert!(output.contains("engine plan"));

    orkd.stop().await;
}

#[tokio::test]
async fn cancel_reaches_a_queued_job() {
    let orkd = Orkd::start_with(false).await;
    let run = orkd.seed_run("run-1").await;
    orkd.call(Request::EnqueueRun { run: run.id.clone() }).await;

    let response = orkd
        .call(Request::CancelRun {
            run: run.id.clone(),
            force: false,
        })
        .await;

    let Response::Job { job: Some(job) } = response else {
        panic!("unexpected response: {response:?}");
    };
    assert_eq!(job.status, JobStatus::Canceled);
    let canceled = orkd.remote.get_run(&run.id).await.unwrap();
    assert_eq!(canceled.status, RunStatus::Canceled);

    orkd.stop().await;
}

#[tokio::test]
async fn agent_tokens_are_minted_for_pools() {
    let orkd = Orkd::start_with(false).await;

    let pool = match orkd
        .call(Request::CreatePool {
            options: CreatePoolOptions {
                name: "builders".to_string(),
                organization: "acme".to_string(),
                ..Default::default()
            },
        })
        .await
    {
        Response::Pool { pool } => pool,
        other => panic!("unexpected response: {other:?}"),
    };
    let response = orkd
        .call(Request::CreateAgentToken {
            pool_id: pool.id.clone(),
            description: "ci agent".to_string(),
        })
        .await;

    let Response::AgentToken { token, bearer } = response else {
        panic!("unexpected response: {response:?}");
    };
    assert_eq!(token.pool_id, pool.id);
    assert!(!bearer.is_empty());
    assert_eq!(
        orkd.call(Request::ListRunners).await,
        Response::Runners { runners: vec![] }
    );

    orkd.stop().await;
}

#[tokio::test]
async fn status_counts_the_embedded_runner() {
    let orkd = Orkd::start().await;

    let mut runners_active = 0;
    for _ in 0..500 {
        if let Response::Status { runners_active: n, .. } = orkd.call(Request::Status).await {
            runners_active = n;
        }
        if runners_active > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    assert_eq!(runners_active, 1);
    orkd.stop().await;
}

#[tokio::test]
async fn shutdown_request_releases_the_state_directory() {
    let orkd = Orkd::start().await;
    let (socket, lock) = (orkd.socket.clone(), orkd.lock.clone());
    assert!(socket.exists());

    let _dir = orkd.stop().await;

    assert!(!socket.exists());
    assert!(!lock.exists());
}
