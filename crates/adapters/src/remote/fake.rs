// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Fake remote services for testing
#![cfg_attr(coverage_nightly, coverage(off))]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use ork_core::{Phase, Run, RunId, RunStatus, WorkspaceId};

use super::{
    finished_status, started_status, ClientError, ConfigClient, LogChunk, PhaseClient,
    PlanFormat, RunClient, StateClient, Variable, VariablesClient, Workspace, WorkspaceClient,
};

/// Recorded remote call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteCall {
    GetRun(RunId),
    GetPlanFile { run: RunId, format: PlanFormat },
    UploadPlanFile { run: RunId, format: PlanFormat },
    GetLockFile(RunId),
    UploadLockFile(RunId),
    StartPhase { run: RunId, phase: Phase },
    FinishPhase { run: RunId, phase: Phase, errored: bool },
    CancelRun(RunId),
    GetWorkspace(WorkspaceId),
    ListVariables(RunId),
    DownloadState(WorkspaceId),
    CreateStateVersion { workspace: WorkspaceId, serial: i64 },
    DownloadConfig(String),
}

#[derive(Default)]
struct FakeRemoteState {
    runs: HashMap<RunId, Run>,
    workspaces: HashMap<WorkspaceId, Workspace>,
    variables: HashMap<RunId, Vec<Variable>>,
    configs: HashMap<String, Vec<u8>>,
    state: HashMap<WorkspaceId, Vec<u8>>,
    state_versions: Vec<(WorkspaceId, i64, Vec<u8>)>,
    plans: HashMap<(RunId, PlanFormat), Vec<u8>>,
    lock_files: HashMap<RunId, Vec<u8>>,
    chunks: Vec<LogChunk>,
    calls: Vec<RemoteCall>,
}

/// In-memory stand-in for every remote client
#[derive(Clone, Default)]
pub struct FakeRemote {
    inner: Arc<Mutex<FakeRemoteState>>,
}

impl FakeRemote {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut FakeRemoteState) -> R) -> R {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut inner)
    }

    pub fn add_run(&self, run: Run) {
        self.with_state(|s| s.runs.insert(run.id.clone(), run));
    }

    pub fn add_workspace(&self, workspace: Workspace) {
        self.with_state(|s| s.workspaces.insert(workspace.id.clone(), workspace));
    }

    pub fn set_variables(&self, run: &RunId, variables: Vec<Variable>) {
        self.with_state(|s| s.variables.insert(run.clone(), variables));
    }

    pub fn add_config(&self, config_version: &str, tarball: Vec<u8>) {
        self.with_state(|s| s.configs.insert(config_version.to_string(), tarball));
    }

    pub fn set_state(&self, workspace: &WorkspaceId, state: Vec<u8>) {
        self.with_state(|s| s.state.insert(workspace.clone(), state));
    }

    pub fn set_plan_file(&self, run: &RunId, format: PlanFormat, plan: Vec<u8>) {
        self.with_state(|s| s.plans.insert((run.clone(), format), plan));
    }

    pub fn set_lock_file(&self, run: &RunId, lock: Vec<u8>) {
        self.with_state(|s| s.lock_files.insert(run.clone(), lock));
    }

    /// Get all recorded calls
    pub fn calls(&self) -> Vec<RemoteCall> {
        self.with_state(|s| s.calls.clone())
    }

    pub fn run(&self, run: &RunId) -> Option<Run> {
        self.with_state(|s| s.runs.get(run).cloned())
    }

    pub fn plan_file(&self, run: &RunId, format: PlanFormat) -> Option<Vec<u8>> {
        self.with_state(|s| s.plans.get(&(run.clone(), format)).cloned())
    }

    pub fn lock_file(&self, run: &RunId) -> Option<Vec<u8>> {
        self.with_state(|s| s.lock_files.get(run).cloned())
    }

    /// State versions created so far, oldest first
    pub fn state_versions(&self) -> Vec<(WorkspaceId, i64, Vec<u8>)> {
        self.with_state(|s| s.state_versions.clone())
    }

    /// Concatenated log output of a run phase
    pub fn output(&self, run: &RunId, phase: Phase) -> String {
        self.with_state(|s| {
            let bytes: Vec<u8> = s
                .chunks
                .iter()
                .filter(|c| &c.run_id == run && c.phase == phase)
                .flat_map(|c| c.data.iter().copied())
                .collect();
            String::from_utf8_lossy(&bytes).into_owned()
        })
    }

    pub fn chunks(&self) -> Vec<LogChunk> {
        self.with_state(|s| s.chunks.clone())
    }

    fn record(&self, call: RemoteCall) {
        self.with_state(|s| s.calls.push(call));
    }

    fn set_run_status(&self, run: &RunId, status: RunStatus) -> Result<Run, ClientError> {
        self.with_state(|s| {
            let run = s
                .runs
                .get_mut(run)
                .ok_or_else(|| ClientError::not_found("run", run))?;
            run.status = status;
            Ok(run.clone())
        })
    }
}

#[async_trait]
impl RunClient for FakeRemote {
    async fn get_run(&self, run: &RunId) -> Result<Run, ClientError> {
        self.record(RemoteCall::GetRun(run.clone()));
        self.run(run).ok_or_else(|| ClientError::not_found("run", run))
    }

    async fn get_plan_file(&self, run: &RunId, format: PlanFormat) -> Result<Vec<u8>, ClientError> {
        self.record(RemoteCall::GetPlanFile {
            run: run.clone(),
            format,
        });
        self.plan_file(run, format)
            .ok_or_else(|| ClientError::not_found("plan file", run))
    }

    async fn upload_plan_file(
        &self,
        run: &RunId,
        plan: Vec<u8>,
        format: PlanFormat,
    ) -> Result<(), ClientError> {
        self.record(RemoteCall::UploadPlanFile {
            run: run.clone(),
            format,
        });
        self.set_plan_file(run, format, plan);
        Ok(())
    }

    async fn get_lock_file(&self, run: &RunId) -> Result<Vec<u8>, ClientError> {
        self.record(RemoteCall::GetLockFile(run.clone()));
        self.lock_file(run)
            .ok_or_else(|| ClientError::not_found("lock file", run))
    }

    async fn upload_lock_file(&self, run: &RunId, lock: Vec<u8>) -> Result<(), ClientError> {
        self.record(RemoteCall::UploadLockFile(run.clone()));
        self.set_lock_file(run, lock);
        Ok(())
    }

    async fn put_chunk(&self, chunk: LogChunk) -> Result<(), ClientError> {
        self.with_state(|s| s.chunks.push(chunk));
        Ok(())
    }
}

#[async_trait]
impl PhaseClient for FakeRemote {
    async fn start_phase(&self, run: &RunId, phase: Phase) -> Result<Run, ClientError> {
        self.record(RemoteCall::StartPhase {
            run: run.clone(),
            phase,
        });
        self.set_run_status(run, started_status(phase))
    }

    async fn finish_phase(
        &self,
        run: &RunId,
        phase: Phase,
        errored: bool,
    ) -> Result<Run, ClientError> {
        self.record(RemoteCall::FinishPhase {
            run: run.clone(),
            phase,
            errored,
        });
        self.set_run_status(run, finished_status(phase, errored))
    }

    async fn cancel_run(&self, run: &RunId) -> Result<Run, ClientError> {
        self.record(RemoteCall::CancelRun(run.clone()));
        self.set_run_status(run, RunStatus::Canceled)
    }
}

#[async_trait]
impl WorkspaceClient for FakeRemote {
    async fn get_workspace(&self, workspace: &WorkspaceId) -> Result<Workspace, ClientError> {
        self.record(RemoteCall::GetWorkspace(workspace.clone()));
        self.with_state(|s| s.workspaces.get(workspace).cloned())
            .ok_or_else(|| ClientError::not_found("workspace", workspace))
    }
}

#[async_trait]
impl VariablesClient for FakeRemote {
    async fn list_effective_variables(&self, run: &RunId) -> Result<Vec<Variable>, ClientError> {
        self.record(RemoteCall::ListVariables(run.clone()));
        Ok(self.with_state(|s| s.variables.get(run).cloned().unwrap_or_default()))
    }
}

#[async_trait]
impl StateClient for FakeRemote {
    async fn download_current(
        &self,
        workspace: &WorkspaceId,
    ) -> Result<Option<Vec<u8>>, ClientError> {
        self.record(RemoteCall::DownloadState(workspace.clone()));
        Ok(self.with_state(|s| s.state.get(workspace).cloned()))
    }

    async fn create_state_version(
        &self,
        workspace: &WorkspaceId,
        serial: i64,
        state: Vec<u8>,
    ) -> Result<(), ClientError> {
        self.record(RemoteCall::CreateStateVersion {
            workspace: workspace.clone(),
            serial,
        });
        self.with_state(|s| {
            s.state.insert(workspace.clone(), state.clone());
            s.state_versions.push((workspace.clone(), serial, state));
        });
        Ok(())
    }
}

#[async_trait]
impl ConfigClient for FakeRemote {
    async fn download_config(&self, config_version: &str) -> Result<Vec<u8>, ClientError> {
        self.record(RemoteCall::DownloadConfig(config_version.to_string()));
        self.with_state(|s| s.configs.get(config_version).cloned())
            .ok_or_else(|| ClientError::not_found("configuration version", config_version))
    }
}

#[cfg(test)]
#[path = "fake_tests.rs"]
mod tests;
