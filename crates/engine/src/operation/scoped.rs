// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Remote access limited to what a job may do

use std::sync::Arc;

use async_trait::async_trait;
use ork_adapters::{
    ClientError, ConfigClient, LogChunk, PlanFormat, Remote, RunClient, StateClient, Variable,
    VariablesClient, Workspace, WorkspaceClient,
};
use ork_core::{Job, JobAction, Run, RunId, Subject, WorkspaceId};

/// Wraps a remote so that every call is checked against the capabilities
/// of the job subject. Run-keyed calls must name the job's own run.
pub struct ScopedRemote {
    inner: Arc<dyn Remote>,
    subject: Subject,
}

impl ScopedRemote {
    pub fn new(inner: Arc<dyn Remote>, job: Job) -> Self {
        Self {
            inner,
            subject: Subject::Job(job),
        }
    }

    fn job(&self) -> Option<&Job> {
        match &self.subject {
            Subject::Job(job) => Some(job),
            _ => None,
        }
    }

    fn check_workspace(&self, action: JobAction, workspace: &WorkspaceId) -> Result<(), ClientError> {
        if self.subject.can_access_workspace(action, workspace) {
            Ok(())
        } else {
            tracing::warn!(subject = %self.subject, ?action, %workspace, "denied remote call");
            Err(ClientError::AccessDenied(format!(
                "{} cannot {:?} in workspace {}",
                self.subject, action, workspace
            )))
        }
    }

    fn check_run(&self, action: JobAction, run: &RunId) -> Result<(), ClientError> {
        match self.job() {
            Some(job) if &job.spec.run_id == run => self.check_workspace(action, &job.workspace_id),
            _ => Err(ClientError::AccessDenied(format!(
                "{} cannot {:?} for run {}",
                self.subject, action, run
            ))),
        }
    }

    fn check_own_workspace(&self, action: JobAction) -> Result<(), ClientError> {
        match self.job() {
            Some(job) => self.check_workspace(action, &job.workspace_id),
            None => Err(ClientError::AccessDenied(format!(
                "{} cannot {:?}",
                self.subject, action
            ))),
        }
    }
}

#[async_trait]
impl RunClient for ScopedRemote {
    async fn get_run(&self, run: &RunId) -> Result<Run, ClientError> {
        self.check_run(JobAction::GetRun, run)?;
        self.inner.get_run(run).await
    }

    async fn get_plan_file(&self, run: &RunId, format: PlanFormat) -> Result<Vec<u8>, ClientError> {
        self.check_run(JobAction::GetPlanFile, run)?;
        self.inner.get_plan_file(run, format).await
    }

    async fn upload_plan_file(
        &self,
        run: &RunId,
        plan: Vec<u8>,
        format: PlanFormat,
    ) -> Result<(), ClientError> {
        self.check_run(JobAction::UploadPlanFile, run)?;
        self.inner.upload_plan_file(run, plan, format).await
    }

    async fn get_lock_file(&self, run: &RunId) -> Result<Vec<u8>, ClientError> {
        self.check_run(JobAction::GetLockFile, run)?;
        self.inner.get_lock_file(run).await
    }

    async fn upload_lock_file(&self, run: &RunId, lock: Vec<u8>) -> Result<(), ClientError> {
        self.check_run(JobAction::UploadLockFile, run)?;
        self.inner.upload_lock_file(run, lock).await
    }

    async fn put_chunk(&self, chunk: LogChunk) -> Result<(), ClientError> {
        self.check_run(JobAction::PutChunk, &chunk.run_id)?;
        self.inner.put_chunk(chunk).await
    }
}

#[async_trait]
impl WorkspaceClient for ScopedRemote {
    async fn get_workspace(&self, workspace: &WorkspaceId) -> Result<Workspace, ClientError> {
        self.check_workspace(JobAction::GetWorkspace, workspace)?;
        self.inner.get_workspace(workspace).await
    }
}

#[async_trait]
impl VariablesClient for ScopedRemote {
    async fn list_effective_variables(&self, run: &RunId) -> Result<Vec<Variable>, ClientError> {
        self.check_run(JobAction::ListVariables, run)?;
        self.inner.list_effective_variables(run).await
    }
}

#[async_trait]
impl StateClient for ScopedRemote {
    async fn download_current(
        &self,
        workspace: &WorkspaceId,
    ) -> Result<Option<Vec<u8>>, ClientError> {
        self.check_workspace(JobAction::DownloadState, workspace)?;
        self.inner.download_current(workspace).await
    }

    async fn create_state_version(
        &self,
        workspace: &WorkspaceId,
        serial: i64,
        state: Vec<u8>,
    ) -> Result<(), ClientError> {
        self.check_workspace(JobAction::CreateStateVersion, workspace)?;
        self.inner.create_state_version(workspace, serial, state).await
    }
}

#[async_trait]
impl ConfigClient for ScopedRemote {
    async fn download_config(&self, config_version: &str) -> Result<Vec<u8>, ClientError> {
        self.check_own_workspace(JobAction::DownloadConfig)?;
        self.inner.download_config(config_version).await
    }
}

#[cfg(test)]
#[path = "scoped_tests.rs"]
mod tests;
