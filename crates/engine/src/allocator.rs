// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Allocator: assigns unallocated jobs to runners
//!
//! The allocator keeps its own view of jobs and runners, seeded from a
//! snapshot and then maintained from the store's change streams. Only the
//! allocator loop touches that view. Each pass:
//!
//! - places `Unallocated` jobs on an eligible runner;
//! - moves `Allocated` jobs off runners that are no longer Idle/Busy;
//! - forgets terminal jobs, releasing their runner's capacity.
//!
//! Eligible runners are Idle or Busy, below capacity and in the job's pool
//! scope; the runner with the freshest heartbeat wins.

use std::collections::HashMap;

use ork_core::{ChangeEvent, Job, JobId, JobStatus, RunnerId, RunnerMeta};
use thiserror::Error;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;

use crate::client::AllocatorClient;
use crate::error::ServiceError;

#[derive(Debug, Error)]
pub enum AllocatorError {
    /// An allocated job references a runner the allocator does not know
    #[error("job {job} is allocated to unknown runner {runner}")]
    UnknownRunner { job: JobId, runner: RunnerId },

    #[error("job {0} is allocated without a runner")]
    MissingRunner(JobId),

    #[error("{0} watch lagged by {1} events")]
    Lagged(&'static str, u64),

    #[error("{0} watch closed")]
    Closed(&'static str),

    #[error(transparent)]
    Service(#[from] ServiceError),
}

pub struct Allocator<C> {
    client: C,
    jobs: HashMap<JobId, Job>,
    runners: HashMap<RunnerId, RunnerMeta>,
}

impl<C: AllocatorClient> Allocator<C> {
    pub fn new(client: C) -> Self {
        Self {
            client,
            jobs: HashMap::new(),
            runners: HashMap::new(),
        }
    }

    /// Replace the tracked view with a full snapshot
    pub fn seed(&mut self, jobs: Vec<Job>, runners: Vec<RunnerMeta>) {
        self.jobs = jobs.into_iter().map(|j| (j.id.clone(), j)).collect();
        self.runners = runners.into_iter().map(|r| (r.id.clone(), r)).collect();
        self.refresh_loads();
    }

    /// Allocate from a snapshot, then on every change until `cancel` fires
    pub async fn run(&mut self, cancel: CancellationToken) -> Result<(), AllocatorError> {
        // Subscribe before the snapshot so no change falls in between.
        let mut job_events = self.client.watch_jobs();
        let mut runner_events = self.client.watch_runners();
        self.seed(self.client.list_jobs(), self.client.list_runners());
        tracing::info!(
            jobs = self.jobs.len(),
            runners = self.runners.len(),
            "allocator started"
        );
        self.allocate().await?;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("allocator stopped");
                    return Ok(());
                }
                event = job_events.recv() => {
                    self.apply_job_event(received("job", event)?);
                }
                event = runner_events.recv() => {
                    self.apply_runner_event(received("runner", event)?);
                }
            }
            self.allocate().await?;
        }
    }

    /// Track a job change. Events older than the allocator's own writes
    /// (a job never moves backwards through its states) are ignored.
    pub fn apply_job_event(&mut self, event: ChangeEvent<Job>) {
        if let Some(tracked) = self.jobs.get(&event.payload.id) {
            if !event.is_deleted() && progress(event.payload.status) < progress(tracked.status) {
                tracing::trace!(job_id = %tracked.id, "ignoring stale job event");
                return;
            }
        }
        let current = event.payload.runner_id.clone();
        let previous = if event.is_deleted() {
            self.jobs.remove(&event.payload.id)
        } else {
            self.jobs.insert(event.payload.id.clone(), event.payload)
        };
        for runner in [current, previous.and_then(|j| j.runner_id)]
            .into_iter()
            .flatten()
        {
            self.refresh_load(&runner);
        }
    }

    pub fn apply_runner_event(&mut self, event: ChangeEvent<RunnerMeta>) {
        if event.is_deleted() {
            self.runners.remove(&event.payload.id);
        } else {
            if self
                .runners
                .get(&event.payload.id)
                .is_some_and(|r| r.last_status_at > event.payload.last_status_at)
            {
                return;
            }
            let mut runner = event.payload;
            runner.current_jobs = self.load(&runner.id);
            self.runners.insert(runner.id.clone(), runner);
        }
    }

    /// One allocation pass over every tracked job
    pub async fn allocate(&mut self) -> Result<(), AllocatorError> {
        let mut pending: Vec<(chrono::DateTime<chrono::Utc>, JobId)> = self
            .jobs
            .values()
            .map(|j| (j.created_at, j.id.clone()))
            .collect();
        pending.sort();

        for (_, id) in pending {
            let Some(job) = self.jobs.get(&id).cloned() else {
                continue;
            };
            match job.status {
                JobStatus::Unallocated => self.place(&job, false).await?,
                JobStatus::Allocated => {
                    let runner_id = job
                        .runner_id
                        .as_ref()
                        .ok_or_else(|| AllocatorError::MissingRunner(job.id.clone()))?;
                    let runner = self.runners.get(runner_id).ok_or_else(|| {
                        AllocatorError::UnknownRunner {
                            job: job.id.clone(),
                            runner: runner_id.clone(),
                        }
                    })?;
                    if runner.status.is_available() {
                        continue;
                    }
                    tracing::info!(
                        job_id = %job.id,
                        runner_id = %runner_id,
                        runner_status = %runner.status,
                        "reallocating job from unavailable runner"
                    );
                    self.place(&job, true).await?;
                }
                JobStatus::Finished | JobStatus::Errored | JobStatus::Canceled => {
                    self.jobs.remove(&id);
                    if let Some(runner) = job.runner_id.as_ref() {
                        tracing::debug!(job_id = %id, runner_id = %runner, "released finished job");
                        self.refresh_load(runner);
                    }
                }
                JobStatus::Running => {}
            }
        }
        Ok(())
    }

    async fn place(&mut self, job: &Job, reallocate: bool) -> Result<(), AllocatorError> {
        let Some(runner) = self.select(job) else {
            tracing::info!(
                job_id = %job.id,
                pool_id = ?job.agent_pool_id,
                "no eligible runner for job"
            );
            return Ok(());
        };
        let result = if reallocate {
            self.client.reallocate_job(&job.id, &runner).await
        } else {
            self.client.allocate_job(&job.id, &runner).await
        };
        match result {
            Ok(updated) => {
                let previous = job.runner_id.clone();
                self.jobs.insert(updated.id.clone(), updated);
                self.refresh_load(&runner);
                if let Some(previous) = previous {
                    self.refresh_load(&previous);
                }
                Ok(())
            }
            // Someone else moved the job first; its change event follows.
            Err(e) if e.is_conflict() || e.is_not_found() => {
                tracing::warn!(job_id = %job.id, runner_id = %runner, error = %e, "allocation skipped");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    fn select(&self, job: &Job) -> Option<RunnerId> {
        self.runners
            .values()
            .filter(|r| r.status.is_available() && r.has_capacity() && r.serves(job))
            .max_by(|a, b| {
                a.last_ping_at
                    .cmp(&b.last_ping_at)
                    .then_with(|| b.id.cmp(&a.id))
            })
            .map(|r| r.id.clone())
    }

    /// Capacity held on a runner by tracked jobs
    fn load(&self, runner: &RunnerId) -> usize {
        self.jobs
            .values()
            .filter(|j| j.status.holds_capacity() && j.runner_id.as_ref() == Some(runner))
            .count()
    }

    fn refresh_load(&mut self, runner: &RunnerId) {
        let load = self.load(runner);
        if let Some(r) = self.runners.get_mut(runner) {
            r.current_jobs = load;
        }
    }

    fn refresh_loads(&mut self) {
        let ids: Vec<RunnerId> = self.runners.keys().cloned().collect();
        for id in ids {
            self.refresh_load(&id);
        }
    }

    pub fn runner(&self, id: &RunnerId) -> Option<&RunnerMeta> {
        self.runners.get(id)
    }

    pub fn job(&self, id: &JobId) -> Option<&Job> {
        self.jobs.get(id)
    }
}

fn progress(status: JobStatus) -> u8 {
    match status {
        JobStatus::Unallocated => 0,
        JobStatus::Allocated => 1,
        JobStatus::Running => 2,
        JobStatus::Finished | JobStatus::Errored | JobStatus::Canceled => 3,
    }
}

fn received<T>(kind: &'static str, event: Result<T, RecvError>) -> Result<T, AllocatorError> {
    match event {
        Ok(event) => Ok(event),
        Err(RecvError::Lagged(n)) => Err(AllocatorError::Lagged(kind, n)),
        Err(RecvError::Closed) => Err(AllocatorError::Closed(kind)),
    }
}

#[cfg(test)]
#[path = "allocator_tests.rs"]
mod tests;
