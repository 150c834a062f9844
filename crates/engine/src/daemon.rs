// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Runner daemon: registers a runner and executes the jobs allocated to it
//!
//! Three activities share one registration. A heartbeat reports `busy` or
//! `idle` on a fixed interval; intake long-polls for jobs, starting
//! allocated ones and relaying pending cancel signals to their operations;
//! and each started job runs as an [`Operation`] in its own task. On
//! shutdown every operation is interrupted and awaited before the runner
//! reports `exited`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use ork_adapters::{Remote, ToolDownloader};
use ork_core::{Job, JobId, JobStatus, RegistrationRequest, RunnerId, RunnerStatus, DEFAULT_MAX_JOBS};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::backoff::{Backoff, BackoffConfig};
use crate::client::RunnerClient;
use crate::error::ServiceError;
use crate::operation::{sandbox, Operation, OperationConfig, OperationHandle, ScopedRemote};

#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("registering runner: {0}")]
    Register(#[source] ServiceError),

    #[error("sandbox enabled but {} was not found in PATH", sandbox::BWRAP)]
    SandboxUnavailable,

    #[error("runner needs to re-register: {0}")]
    Reregister(#[source] ServiceError),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub name: Option<String>,
    /// Operations executed concurrently
    pub max_jobs: usize,
    #[serde(with = "humantime_serde")]
    pub heartbeat_interval: Duration,
    /// Bound on the final `exited` report
    #[serde(with = "humantime_serde")]
    pub exit_timeout: Duration,
    /// Retry policy for failed job polls
    pub backoff: BackoffConfig,
    #[serde(flatten)]
    pub operation: OperationConfig,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            name: None,
            max_jobs: DEFAULT_MAX_JOBS,
            heartbeat_interval: Duration::from_secs(10),
            exit_timeout: Duration::from_secs(10),
            backoff: BackoffConfig::default(),
            operation: OperationConfig::default(),
        }
    }
}

impl DaemonConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_max_jobs(mut self, max_jobs: usize) -> Self {
        self.max_jobs = max_jobs;
        self
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_operation(mut self, operation: OperationConfig) -> Self {
        self.operation = operation;
        self
    }
}

/// Operations currently executing, by job
type Operations = Arc<Mutex<HashMap<JobId, OperationHandle>>>;

pub struct RunnerDaemon<C> {
    client: C,
    remote: Arc<dyn Remote>,
    downloader: Arc<dyn ToolDownloader>,
    config: DaemonConfig,
}

impl<C: RunnerClient> RunnerDaemon<C> {
    pub fn new(
        client: C,
        remote: Arc<dyn Remote>,
        downloader: Arc<dyn ToolDownloader>,
        config: DaemonConfig,
    ) -> Self {
        Self {
            client,
            remote,
            downloader,
            config,
        }
    }

    /// Register and serve jobs until `cancel` fires or the registration is
    /// no longer valid
    pub async fn run(&self, cancel: CancellationToken) -> Result<(), DaemonError> {
        if self.config.operation.sandbox && !sandbox::available() {
            return Err(DaemonError::SandboxUnavailable);
        }
        let mut request = RegistrationRequest::new(env!("CARGO_PKG_VERSION"), self.config.max_jobs);
        if let Some(name) = &self.config.name {
            request = request.with_name(name.clone());
        }
        let meta = self
            .client
            .register(request)
            .await
            .map_err(DaemonError::Register)?;
        let runner = meta.id;
        tracing::info!(runner_id = %runner, max_jobs = meta.max_jobs, pool = ?meta.agent_pool.as_ref().map(|p| &p.name), "registered runner");

        let ops: Operations = Arc::default();
        let stop = cancel.child_token();
        let beat_stop = CancellationToken::new();
        let (beat, ()) = tokio::join!(
            async {
                let result = self.heartbeat(&runner, &ops, &beat_stop).await;
                if result.is_err() {
                    stop.cancel();
                }
                result
            },
            async {
                self.intake(&runner, &ops, &stop).await;
                beat_stop.cancel();
            }
        );
        beat?;

        match tokio::time::timeout(
            self.config.exit_timeout,
            self.client.update_status(&runner, RunnerStatus::Exited),
        )
        .await
        {
            Ok(Ok(_)) => tracing::info!(runner_id = %runner, "runner exited"),
            Ok(Err(e)) => {
                tracing::warn!(runner_id = %runner, error = %e, "failed to report runner exit")
            }
            Err(_) => tracing::warn!(runner_id = %runner, "timed out reporting runner exit"),
        }
        Ok(())
    }

    async fn heartbeat(
        &self,
        runner: &RunnerId,
        ops: &Operations,
        stop: &CancellationToken,
    ) -> Result<(), DaemonError> {
        let mut interval = tokio::time::interval(self.config.heartbeat_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = stop.cancelled() => return Ok(()),
                _ = interval.tick() => {}
            }
            let running = ops.lock().unwrap_or_else(|e| e.into_inner()).len();
            let status = if running == 0 {
                RunnerStatus::Idle
            } else {
                RunnerStatus::Busy
            };
            match self.client.update_status(runner, status).await {
                Ok(_) => tracing::debug!(runner_id = %runner, %status, running, "sent heartbeat"),
                Err(e) if e.is_conflict() || e.is_not_found() => {
                    tracing::error!(runner_id = %runner, error = %e, "heartbeat rejected");
                    return Err(DaemonError::Reregister(e));
                }
                Err(e) => tracing::warn!(runner_id = %runner, error = %e, "sending heartbeat"),
            }
        }
    }

    /// Poll for jobs until `stop`, then interrupt and await every operation
    async fn intake(&self, runner: &RunnerId, ops: &Operations, stop: &CancellationToken) {
        let permits = Arc::new(Semaphore::new(self.config.max_jobs.max(1)));
        let mut tasks = JoinSet::new();
        let mut backoff = Backoff::new(self.config.backoff.clone());
        loop {
            let result = match self.client.get_jobs(runner, stop).await {
                Ok(jobs) => {
                    self.process(runner, jobs, ops, &permits, &mut tasks, stop)
                        .await
                }
                Err(e) => Err(e),
            };
            while tasks.try_join_next().is_some() {}
            if stop.is_cancelled() {
                break;
            }
            match result {
                Ok(()) => backoff.reset(),
                Err(e) => {
                    let delay = backoff.next_delay();
                    tracing::warn!(runner_id = %runner, error = %e, backoff_ms = delay.as_millis() as u64, "processing jobs");
                    tokio::select! {
                        _ = stop.cancelled() => break,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }

        let handles: Vec<OperationHandle> = ops
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect();
        if !handles.is_empty() {
            tracing::info!(runner_id = %runner, count = handles.len(), "interrupting operations");
        }
        for handle in handles {
            handle.cancel(false, true);
        }
        while tasks.join_next().await.is_some() {}
    }

    async fn process(
        &self,
        runner: &RunnerId,
        jobs: Vec<Job>,
        ops: &Operations,
        permits: &Arc<Semaphore>,
        tasks: &mut JoinSet<()>,
        stop: &CancellationToken,
    ) -> Result<(), ServiceError> {
        for job in jobs {
            match job.status {
                JobStatus::Allocated => {
                    let permit = tokio::select! {
                        _ = stop.cancelled() => return Ok(()),
                        permit = Arc::clone(permits).acquire_owned() => permit,
                    };
                    let Ok(permit) = permit else {
                        return Ok(());
                    };
                    self.start(runner, job, permit, ops, tasks).await?;
                }
                JobStatus::Running if job.signaled.is_some() => {
                    let force = job.signaled == Some(true);
                    let handle = ops
                        .lock()
                        .unwrap_or_else(|e| e.into_inner())
                        .get(&job.id)
                        .cloned();
                    match handle {
                        Some(handle) => handle.cancel(force, true),
                        None => {
                            tracing::warn!(job_id = %job.id, "signal for job without an operation")
                        }
                    }
                    self.client.acknowledge_signal(runner, &job.id).await?;
                }
                status => tracing::debug!(job_id = %job.id, %status, "skipping job"),
            }
        }
        Ok(())
    }

    async fn start(
        &self,
        runner: &RunnerId,
        job: Job,
        permit: OwnedSemaphorePermit,
        ops: &Operations,
        tasks: &mut JoinSet<()>,
    ) -> Result<(), ServiceError> {
        let token = self.client.start_job(runner, &job.spec).await?;
        let jobs = self.client.job_client(&token);
        let job = jobs.job().await?;
        let remote = Arc::new(ScopedRemote::new(Arc::clone(&self.remote), job.clone()));
        let operation = Operation::new(
            job.clone(),
            &token,
            jobs,
            remote,
            Arc::clone(&self.downloader),
            self.config.operation.clone(),
        );
        ops.lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(job.id.clone(), operation.handle());
        tracing::info!(runner_id = %runner, job_id = %job.id, spec = %job.spec, "started operation");

        let ops = Arc::clone(ops);
        tasks.spawn(async move {
            let status = operation.run().await;
            ops.lock().unwrap_or_else(|e| e.into_inner()).remove(&job.id);
            drop(permit);
            tracing::debug!(job_id = %job.id, ?status, "operation done");
        });
        Ok(())
    }
}

#[cfg(test)]
#[path = "daemon_tests.rs"]
mod tests;
