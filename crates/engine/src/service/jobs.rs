// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Job lifecycle: creation, allocation, execution reports and cancellation

use ork_adapters::NotifyAdapter;
use ork_core::{
    AccessError, ChangeEvent, Clock, IdGen, Job, JobId, JobSignal, JobSpec, JobStatus, Run,
    RunnerId, Subject,
};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio_util::sync::CancellationToken;

use super::Service;
use crate::error::ServiceError;
use crate::tokens::TokenError;

/// Whether a runner has something to do for this job: start it, or relay a
/// pending cancellation to it.
fn awaits_runner(job: &Job, runner: &RunnerId) -> bool {
    if job.runner_id.as_ref() != Some(runner) {
        return false;
    }
    match job.status {
        JobStatus::Allocated => true,
        JobStatus::Running => job.signaled.is_some(),
        _ => false,
    }
}

impl<N, K, I> Service<N, K, I>
where
    N: NotifyAdapter,
    K: Clock,
    I: IdGen,
{
    /// Create an unallocated job for the run's current phase
    pub async fn create_job(&self, run: &Run) -> Result<Job, ServiceError> {
        let job = Job::new(JobId::generate(&self.ids), run, self.clock.now());
        let job = self.store.insert(job)?;
        tracing::info!(
            job_id = %job.id,
            run_id = %job.spec.run_id,
            phase = %job.spec.phase,
            pool_id = ?job.agent_pool_id,
            "created job"
        );
        Ok(job)
    }

    /// Apply the run's cancellation to its job.
    ///
    /// The signal, if any, is published while the job row is held so a
    /// concurrent status report cannot interleave. A run without a job is
    /// not an error.
    pub async fn cancel_job(&self, run: &Run) -> Result<Option<Job>, ServiceError> {
        let job_id = match self.store.find_run_job(&run.id) {
            Ok(job) => job.id,
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let mut row = self.store.lock::<Job>(&job_id).await?;
        let before = (*row).clone();
        let signal = row.cancel(run).inspect_err(|e| {
            tracing::warn!(job_id = %job_id, run_status = ?run.status, error = %e, "canceling job");
        })?;
        if *row == before {
            return Ok(Some(before));
        }
        if let Some(signal) = &signal {
            self.signaler.publish(signal).await?;
        }
        let job = row.commit()?;
        tracing::info!(
            job_id = %job.id,
            run_status = ?run.status,
            status = %job.status,
            signaled = ?job.signaled,
            "canceled job"
        );
        Ok(Some(job))
    }

    /// Wait until the runner has jobs to start or signal.
    ///
    /// Subscribes before listing so an allocation racing the listing is
    /// still seen.
    pub async fn await_allocated_jobs(
        &self,
        subject: &Subject,
        runner: &RunnerId,
        cancel: &CancellationToken,
    ) -> Result<Vec<Job>, ServiceError> {
        subject.require_runner(runner)?;
        let mut events = self.store.watch_jobs();
        loop {
            let pending = self.pending_jobs(runner);
            if !pending.is_empty() {
                return Ok(pending);
            }
            loop {
                let event = tokio::select! {
                    _ = cancel.cancelled() => return Err(ServiceError::Canceled),
                    event = events.recv() => event,
                };
                match event {
                    Ok(event) if !event.is_deleted() && awaits_runner(&event.payload, runner) => {
                        return Ok(vec![event.payload]);
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::debug!(runner_id = %runner, skipped, "job watch lagged, relisting");
                        break;
                    }
                    Err(RecvError::Closed) => return Err(ServiceError::Canceled),
                }
            }
        }
    }

    fn pending_jobs(&self, runner: &RunnerId) -> Vec<Job> {
        self.store
            .jobs_for_runner(runner)
            .into_iter()
            .filter(|job| awaits_runner(job, runner))
            .collect()
    }

    /// Mark an allocated job as running and return its job token
    pub async fn start_job(&self, subject: &Subject, spec: &JobSpec) -> Result<String, ServiceError> {
        let Some(runner) = subject.runner_id() else {
            return Err(AccessError {
                subject: subject.to_string(),
                action: "start a job",
            }
            .into());
        };
        let job = self.store.find_job(spec)?;
        let mut row = self.store.lock::<Job>(&job.id).await?;
        if row.runner_id.as_ref() != Some(runner) {
            return Err(ServiceError::NotAllocatedTo {
                job: row.id.clone(),
                runner: runner.clone(),
            });
        }
        row.start()?;
        self.phases
            .start_phase(&row.spec.run_id, row.spec.phase)
            .await
            .inspect_err(|e| {
                tracing::error!(job_id = %row.id, error = %e, "starting run phase");
            })?;
        let token = self.tokens.job_token(&row.id, self.clock.now())?;
        let job = row.commit()?;
        tracing::info!(job_id = %job.id, runner_id = %runner, spec = %job.spec, "started job");
        Ok(token)
    }

    /// Record the outcome of a job and forward it to the run's phase
    pub async fn finish_job(
        &self,
        subject: &Subject,
        spec: &JobSpec,
        status: JobStatus,
        error: Option<String>,
    ) -> Result<Job, ServiceError> {
        let job = self.store.find_job(spec)?;
        subject.require_job(&job.id)?;
        let mut row = self.store.lock::<Job>(&job.id).await?;
        row.finish(status, error)?;
        let (run, phase) = (&row.spec.run_id, row.spec.phase);
        let result = match status {
            JobStatus::Canceled => self.phases.cancel_run(run).await,
            _ => {
                self.phases
                    .finish_phase(run, phase, status == JobStatus::Errored)
                    .await
            }
        };
        result.inspect_err(|e| {
            tracing::error!(job_id = %row.id, %status, error = %e, "finishing run phase");
        })?;
        let job = row.commit()?;
        tracing::info!(
            job_id = %job.id,
            %status,
            error = job.error.as_deref().unwrap_or_default(),
            "finished job"
        );
        Ok(job)
    }

    pub async fn allocate_job(&self, job: &JobId, runner: &RunnerId) -> Result<Job, ServiceError> {
        let job = self
            .store
            .update::<Job, ServiceError, _>(job, |j| Ok(j.allocate(runner.clone())?))
            .await?;
        tracing::info!(job_id = %job.id, runner_id = %runner, "allocated job");
        Ok(job)
    }

    /// Move an allocated job to another runner
    pub async fn reallocate_job(&self, job: &JobId, runner: &RunnerId) -> Result<Job, ServiceError> {
        let mut from = None;
        let job = self
            .store
            .update::<Job, ServiceError, _>(job, |j| {
                from = j.runner_id.clone();
                Ok(j.reallocate(runner.clone())?)
            })
            .await?;
        tracing::info!(
            job_id = %job.id,
            from = ?from,
            to = %runner,
            "reallocated job"
        );
        Ok(job)
    }

    pub fn get_job(&self, job: &JobId) -> Result<Job, ServiceError> {
        Ok(self.store.get_job(job)?)
    }

    pub fn list_jobs(&self) -> Vec<Job> {
        self.store.list_jobs()
    }

    pub fn watch_jobs(&self) -> broadcast::Receiver<ChangeEvent<Job>> {
        self.store.watch_jobs()
    }

    /// Block until a cancellation signal for the calling job arrives on
    /// this node. The pending flag is cleared once delivered.
    pub async fn await_job_signal(
        &self,
        subject: &Subject,
        job: &JobId,
        cancel: &CancellationToken,
    ) -> Result<JobSignal, ServiceError> {
        subject.require_job(job)?;
        let waiter = self.signaler.subscribe(job)?;
        let signal = waiter.wait(cancel).await?;
        if let Err(e) = self.clear_signal(job).await {
            tracing::warn!(job_id = %job, error = %e, "clearing delivered job signal");
        }
        Ok(signal)
    }

    /// Acknowledge a pending signal the runner relayed to its execution
    pub async fn acknowledge_signal(
        &self,
        subject: &Subject,
        job: &JobId,
    ) -> Result<Job, ServiceError> {
        let current = self.store.get_job(job)?;
        match subject.runner_id() {
            Some(runner) if current.runner_id.as_ref() == Some(runner) => {}
            Some(runner) => {
                return Err(ServiceError::NotAllocatedTo {
                    job: job.clone(),
                    runner: runner.clone(),
                })
            }
            None => {
                subject.require_job(job)?;
            }
        }
        self.clear_signal(job).await
    }

    async fn clear_signal(&self, job: &JobId) -> Result<Job, ServiceError> {
        let mut row = self.store.lock::<Job>(job).await?;
        // Signals on terminal jobs are history; the job is immutable.
        if row.status != JobStatus::Running || row.signaled.is_none() {
            return Ok((*row).clone());
        }
        row.signaled = None;
        let job = row.commit()?;
        tracing::debug!(job_id = %job.id, "cleared job signal");
        Ok(job)
    }

    /// Mint a workload identity token for the calling job
    pub fn generate_dynamic_credentials_token(
        &self,
        subject: &Subject,
        job: &JobId,
        audience: &str,
    ) -> Result<String, ServiceError> {
        let job = subject.require_job(job)?;
        let signer = self
            .credentials
            .as_ref()
            .ok_or(TokenError::NoSigningKey)?;
        Ok(signer.dynamic_credentials(job, audience, self.clock.now())?)
    }
}

#[cfg(test)]
#[path = "jobs_tests.rs"]
mod tests;
