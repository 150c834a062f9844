// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Runner registry

use chrono::{DateTime, Utc};
use ork_adapters::{NotifyAdapter, OperatorAction};
use ork_core::{
    ChangeEvent, Clock, IdGen, JobStatus, PoolId, RegistrationRequest, RunnerId, RunnerMeta,
    RunnerStatus, Subject,
};
use tokio::sync::broadcast;

use super::Service;
use crate::error::ServiceError;
use crate::manager::{evaluate, Action, ManagerConfig, Reconciled};

impl<N, K, I> Service<N, K, I>
where
    N: NotifyAdapter,
    K: Clock,
    I: IdGen,
{
    /// Register the calling runner process. Agent runners join the pool of
    /// the agent token they authenticated with.
    pub async fn register(
        &self,
        subject: &Subject,
        request: RegistrationRequest,
    ) -> Result<RunnerMeta, ServiceError> {
        let pool = subject.registration_pool()?;
        let runner = RunnerMeta::register(
            RunnerId::generate(&self.ids),
            request,
            pool,
            self.clock.now(),
        );
        let runner = self.store.insert(runner).inspect_err(|e| {
            tracing::error!(error = %e, "registering runner");
        })?;
        tracing::info!(
            runner_id = %runner.id,
            name = runner.label(),
            pool_id = ?runner.pool_id(),
            max_jobs = runner.max_jobs,
            "registered runner"
        );
        Ok(runner)
    }

    /// Set a runner's status. Only the runner itself (which also counts as
    /// a ping) or the manager may do this; terminal runners reject it.
    pub async fn update_status(
        &self,
        subject: &Subject,
        runner: &RunnerId,
        status: RunnerStatus,
    ) -> Result<RunnerMeta, ServiceError> {
        let ping = subject.status_ping(runner)?;
        let now = self.clock.now();
        let mut from = None;
        let updated = self
            .store
            .update::<RunnerMeta, ServiceError, _>(runner, |r| {
                from = Some(r.status);
                r.set_status(status, ping, now)?;
                Ok(())
            })
            .await
            .inspect_err(|e| {
                tracing::error!(
                    runner_id = %runner,
                    %status,
                    %subject,
                    error = %e,
                    "updating runner status"
                );
            })?;
        tracing::debug!(
            runner_id = %runner,
            from = ?from,
            to = %status,
            %subject,
            "updated runner status"
        );
        Ok(updated)
    }

    pub fn get_runner(&self, runner: &RunnerId) -> Result<RunnerMeta, ServiceError> {
        Ok(self.store.get_runner(runner)?)
    }

    /// Subject for a registered runner, as currently stored
    pub fn runner_subject(&self, runner: &RunnerId) -> Result<Subject, ServiceError> {
        Ok(Subject::Runner(self.store.get_runner(runner)?))
    }

    pub fn list_runners(&self) -> Vec<RunnerMeta> {
        self.store.list_runners()
    }

    /// Runners belonging to a pool, for operators of its organization
    pub fn list_pool_runners(
        &self,
        subject: &Subject,
        pool: &PoolId,
    ) -> Result<Vec<RunnerMeta>, ServiceError> {
        let pool = self.store.get_pool(pool)?;
        self.authorize(subject, OperatorAction::ListRunners, &pool.organization)?;
        Ok(self
            .store
            .list_runners()
            .into_iter()
            .filter(|r| r.pool_id() == Some(&pool.id))
            .collect())
    }

    pub fn watch_runners(&self) -> broadcast::Receiver<ChangeEvent<RunnerMeta>> {
        self.store.watch_runners()
    }

    /// Liveness transition for one runner, decided on the record as it
    /// stands under the row lock. Purges wait until the allocator has
    /// moved the runner's allocated jobs elsewhere.
    pub async fn reconcile_runner(
        &self,
        runner: &RunnerId,
        now: DateTime<Utc>,
        config: &ManagerConfig,
    ) -> Result<Option<Reconciled>, ServiceError> {
        let mut row = self.store.lock::<RunnerMeta>(runner).await?;
        let Some(action) = evaluate(&row, now, config) else {
            return Ok(None);
        };
        let decided_on = RunnerMeta::clone(&row);
        match action {
            Action::MarkUnknown => {
                row.set_status(RunnerStatus::Unknown, false, now)?;
                row.commit()?;
            }
            Action::MarkErrored => {
                row.set_status(RunnerStatus::Errored, false, now)?;
                row.commit()?;
            }
            Action::Purge => {
                let allocated = self
                    .store
                    .jobs_for_runner(runner)
                    .iter()
                    .filter(|j| j.status == JobStatus::Allocated)
                    .count();
                if allocated > 0 {
                    tracing::debug!(runner_id = %runner, allocated, "deferring runner purge");
                    return Ok(None);
                }
                row.delete()?;
            }
        }
        Ok(Some(Reconciled {
            action,
            runner: decided_on,
        }))
    }

    pub async fn delete_runner(&self, runner: &RunnerId) -> Result<RunnerMeta, ServiceError> {
        let deleted = self
            .store
            .remove::<RunnerMeta>(runner)
            .await
            .inspect_err(|e| tracing::error!(runner_id = %runner, error = %e, "deleting runner"))?;
        tracing::info!(runner_id = %runner, "deleted runner");
        Ok(deleted)
    }
}

#[cfg(test)]
#[path = "runners_tests.rs"]
mod tests;
