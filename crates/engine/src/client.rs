// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Client seams between the scheduling loops and the service
//!
//! The allocator, manager, runner daemon and executor only talk to the
//! service through these traits. The local implementations call an
//! in-process [`Service`] with the subject each caller authenticates as.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ork_adapters::NotifyAdapter;
use ork_core::{
    ChangeEvent, Clock, IdGen, Job, JobId, JobSignal, JobSpec, JobStatus, RegistrationRequest,
    RunnerId, RunnerMeta, RunnerStatus, Subject,
};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::error::ServiceError;
use crate::manager::{ManagerConfig, Reconciled};
use crate::service::Service;

/// Operations the allocator performs
#[async_trait]
pub trait AllocatorClient: Send + Sync + 'static {
    fn list_jobs(&self) -> Vec<Job>;
    fn list_runners(&self) -> Vec<RunnerMeta>;
    fn watch_jobs(&self) -> broadcast::Receiver<ChangeEvent<Job>>;
    fn watch_runners(&self) -> broadcast::Receiver<ChangeEvent<RunnerMeta>>;
    async fn allocate_job(&self, job: &JobId, runner: &RunnerId) -> Result<Job, ServiceError>;
    async fn reallocate_job(&self, job: &JobId, runner: &RunnerId) -> Result<Job, ServiceError>;
}

/// Operations the manager performs, always as the manager subject
#[async_trait]
pub trait ManagerClient: Send + Sync + 'static {
    fn list_runners(&self) -> Vec<RunnerMeta>;
    /// Decide and apply the liveness action for one runner against its
    /// stored record, under the runner's row lock. `None` when the record
    /// needs nothing by the time the lock is held.
    async fn reconcile_runner(
        &self,
        runner: &RunnerId,
        now: DateTime<Utc>,
        config: &ManagerConfig,
    ) -> Result<Option<Reconciled>, ServiceError>;
}

/// The runner-facing surface used by a runner daemon
#[async_trait]
pub trait RunnerClient: Send + Sync + 'static {
    async fn register(&self, request: RegistrationRequest) -> Result<RunnerMeta, ServiceError>;
    /// Long-poll for jobs to start or signal
    async fn get_jobs(
        &self,
        runner: &RunnerId,
        cancel: &CancellationToken,
    ) -> Result<Vec<Job>, ServiceError>;
    async fn update_status(
        &self,
        runner: &RunnerId,
        status: RunnerStatus,
    ) -> Result<RunnerMeta, ServiceError>;
    /// Start an allocated job, returning its job token
    async fn start_job(&self, runner: &RunnerId, spec: &JobSpec) -> Result<String, ServiceError>;
    /// Acknowledge a pending signal relayed to the job's execution
    async fn acknowledge_signal(&self, runner: &RunnerId, job: &JobId)
        -> Result<Job, ServiceError>;
    /// Client authenticated as the job holding `token`
    fn job_client(&self, token: &str) -> Arc<dyn JobClient>;
}

/// Calls made on behalf of a running job
#[async_trait]
pub trait JobClient: Send + Sync + 'static {
    /// The job this client authenticates as
    async fn job(&self) -> Result<Job, ServiceError>;
    async fn finish_job(
        &self,
        spec: &JobSpec,
        status: JobStatus,
        error: Option<String>,
    ) -> Result<Job, ServiceError>;
    async fn await_job_signal(
        &self,
        job: &JobId,
        cancel: &CancellationToken,
    ) -> Result<JobSignal, ServiceError>;
    async fn generate_dynamic_credentials_token(
        &self,
        job: &JobId,
        audience: &str,
    ) -> Result<String, ServiceError>;
}

#[async_trait]
impl<N, K, I> AllocatorClient for Service<N, K, I>
where
    N: NotifyAdapter,
    K: Clock,
    I: IdGen,
{
    fn list_jobs(&self) -> Vec<Job> {
        Service::list_jobs(self)
    }

    fn list_runners(&self) -> Vec<RunnerMeta> {
        Service::list_runners(self)
    }

    fn watch_jobs(&self) -> broadcast::Receiver<ChangeEvent<Job>> {
        Service::watch_jobs(self)
    }

    fn watch_runners(&self) -> broadcast::Receiver<ChangeEvent<RunnerMeta>> {
        Service::watch_runners(self)
    }

    async fn allocate_job(&self, job: &JobId, runner: &RunnerId) -> Result<Job, ServiceError> {
        Service::allocate_job(self, job, runner).await
    }

    async fn reallocate_job(&self, job: &JobId, runner: &RunnerId) -> Result<Job, ServiceError> {
        Service::reallocate_job(self, job, runner).await
    }
}

#[async_trait]
impl<N, K, I> ManagerClient for Service<N, K, I>
where
    N: NotifyAdapter,
    K: Clock,
    I: IdGen,
{
    fn list_runners(&self) -> Vec<RunnerMeta> {
        Service::list_runners(self)
    }

    async fn reconcile_runner(
        &self,
        runner: &RunnerId,
        now: DateTime<Utc>,
        config: &ManagerConfig,
    ) -> Result<Option<Reconciled>, ServiceError> {
        Service::reconcile_runner(self, runner, now, config).await
    }
}

/// Runner client calling an in-process service
#[derive(Clone)]
pub struct LocalRunnerClient<N, K, I> {
    service: Service<N, K, I>,
    /// Presented at registration
    registration: Subject,
}

impl<N, K, I> LocalRunnerClient<N, K, I>
where
    N: NotifyAdapter,
    K: Clock,
    I: IdGen,
{
    /// Client for a server runner, which registers without a pool
    pub fn new(service: Service<N, K, I>) -> Self {
        Self {
            service,
            registration: Subject::Unregistered { pool: None },
        }
    }

    /// Client for an agent runner registering with an agent token
    pub fn with_agent_token(service: Service<N, K, I>, bearer: &str) -> Result<Self, ServiceError> {
        let registration = service.authenticate(bearer)?;
        Ok(Self {
            service,
            registration,
        })
    }
}

#[async_trait]
impl<N, K, I> RunnerClient for LocalRunnerClient<N, K, I>
where
    N: NotifyAdapter,
    K: Clock,
    I: IdGen,
{
    async fn register(&self, request: RegistrationRequest) -> Result<RunnerMeta, ServiceError> {
        self.service.register(&self.registration, request).await
    }

    async fn get_jobs(
        &self,
        runner: &RunnerId,
        cancel: &CancellationToken,
    ) -> Result<Vec<Job>, ServiceError> {
        let subject = self.service.runner_subject(runner)?;
        self.service
            .await_allocated_jobs(&subject, runner, cancel)
            .await
    }

    async fn update_status(
        &self,
        runner: &RunnerId,
        status: RunnerStatus,
    ) -> Result<RunnerMeta, ServiceError> {
        let subject = self.service.runner_subject(runner)?;
        self.service.update_status(&subject, runner, status).await
    }

    async fn start_job(&self, runner: &RunnerId, spec: &JobSpec) -> Result<String, ServiceError> {
        let subject = self.service.runner_subject(runner)?;
        self.service.start_job(&subject, spec).await
    }

    async fn acknowledge_signal(
        &self,
        runner: &RunnerId,
        job: &JobId,
    ) -> Result<Job, ServiceError> {
        let subject = self.service.runner_subject(runner)?;
        self.service.acknowledge_signal(&subject, job).await
    }

    fn job_client(&self, token: &str) -> Arc<dyn JobClient> {
        Arc::new(LocalJobClient {
            service: self.service.clone(),
            token: token.to_string(),
        })
    }
}

/// Job client that authenticates every call with the job token
pub struct LocalJobClient<N, K, I> {
    service: Service<N, K, I>,
    token: String,
}

#[async_trait]
impl<N, K, I> JobClient for LocalJobClient<N, K, I>
where
    N: NotifyAdapter,
    K: Clock,
    I: IdGen,
{
    async fn job(&self) -> Result<Job, ServiceError> {
        match self.service.authenticate(&self.token)? {
            Subject::Job(job) => Ok(job),
            other => Err(ork_core::AccessError {
                subject: other.to_string(),
                action: "act as a job",
            }
            .into()),
        }
    }

    async fn finish_job(
        &self,
        spec: &JobSpec,
        status: JobStatus,
        error: Option<String>,
    ) -> Result<Job, ServiceError> {
        let subject = self.service.authenticate(&self.token)?;
        self.service.finish_job(&subject, spec, status, error).await
    }

    async fn await_job_signal(
        &self,
        job: &JobId,
        cancel: &CancellationToken,
    ) -> Result<JobSignal, ServiceError> {
        let subject = self.service.authenticate(&self.token)?;
        self.service.await_job_signal(&subject, job, cancel).await
    }

    async fn generate_dynamic_credentials_token(
        &self,
        job: &JobId,
        audience: &str,
    ) -> Result<String, ServiceError> {
        let subject = self.service.authenticate(&self.token)?;
        self.service
            .generate_dynamic_credentials_token(&subject, job, audience)
    }
}

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;
