// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Filesystem-backed remote services
//!
//! Layout under the root directory:
//!
//! ```text
//! runs/<run>.json            run record
//! runs/<run>/plan.out        binary plan
//! runs/<run>/plan.json       JSON plan
//! runs/<run>/lock.hcl        dependency lock file
//! runs/<run>/<phase>.log     phase output
//! workspaces/<ws>.json       workspace record
//! variables/<run>.json       effective variables
//! configs/<cv>.tar.gz        configuration version tarball
//! state/<ws>.tfstate         current state
//! state/<ws>/<serial>.tfstate state history
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ork_core::{Phase, Run, RunId, RunStatus, WorkspaceId};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use super::{
    finished_status, started_status, ClientError, ConfigClient, LogChunk, PhaseClient,
    PlanFormat, RunClient, StateClient, Variable, VariablesClient, Workspace, WorkspaceClient,
};

/// Remote services stored as plain files, for single-node deployments
#[derive(Clone, Debug)]
pub struct FsRemote {
    root: PathBuf,
    // Serializes read-modify-write of run records
    runs: Arc<Mutex<()>>,
}

impl FsRemote {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            runs: Arc::new(Mutex::new(())),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn run_path(&self, run: &RunId) -> PathBuf {
        self.root.join("runs").join(format!("{}.json", run))
    }

    fn run_dir(&self, run: &RunId) -> PathBuf {
        self.root.join("runs").join(run.as_str())
    }

    fn plan_path(&self, run: &RunId, format: PlanFormat) -> PathBuf {
        match format {
            PlanFormat::Binary => self.run_dir(run).join("plan.out"),
            PlanFormat::Json => self.run_dir(run).join("plan.json"),
        }
    }

    /// Where the output of a run phase is written
    pub fn log_path(&self, run: &RunId, phase: Phase) -> PathBuf {
        self.run_dir(run).join(format!("{}.log", phase))
    }

    pub async fn put_run(&self, run: &Run) -> Result<(), ClientError> {
        let _guard = self.runs.lock().await;
        write_json(&self.run_path(&run.id), "run", run).await
    }

    pub async fn put_workspace(&self, workspace: &Workspace) -> Result<(), ClientError> {
        let path = self
            .root
            .join("workspaces")
            .join(format!("{}.json", workspace.id));
        write_json(&path, "workspace", workspace).await
    }

    pub async fn put_variables(
        &self,
        run: &RunId,
        variables: &[Variable],
    ) -> Result<(), ClientError> {
        let path = self.root.join("variables").join(format!("{}.json", run));
        write_json(&path, "variables", &variables).await
    }

    pub async fn put_config(&self, config_version: &str, tarball: &[u8]) -> Result<(), ClientError> {
        let path = self
            .root
            .join("configs")
            .join(format!("{}.tar.gz", config_version));
        write_atomic(&path, tarball).await
    }

    /// Record a cancellation request against a run.
    ///
    /// A run with a phase in progress is only marked as signaled unless
    /// `force` is set; anything else is canceled outright.
    pub async fn request_cancel(
        &self,
        run: &RunId,
        force: bool,
        now: DateTime<Utc>,
    ) -> Result<Run, ClientError> {
        self.update_run(run, |r| {
            let in_progress = matches!(r.status, RunStatus::Planning | RunStatus::Applying);
            match (in_progress, force) {
                (true, false) => r.cancel_signaled_at = Some(now),
                (true, true) => r.status = RunStatus::ForceCanceled,
                (false, _) => r.status = RunStatus::Canceled,
            }
        })
        .await
    }

    async fn update_run(&self, run: &RunId, f: impl FnOnce(&mut Run)) -> Result<Run, ClientError> {
        let _guard = self.runs.lock().await;
        let path = self.run_path(run);
        let mut record: Run = read_json(&path, "run", run.as_str()).await?;
        f(&mut record);
        write_json(&path, "run", &record).await?;
        Ok(record)
    }
}

#[async_trait]
impl RunClient for FsRemote {
    async fn get_run(&self, run: &RunId) -> Result<Run, ClientError> {
        read_json(&self.run_path(run), "run", run.as_str()).await
    }

    async fn get_plan_file(&self, run: &RunId, format: PlanFormat) -> Result<Vec<u8>, ClientError> {
        read_bytes(&self.plan_path(run, format), "plan file", run.as_str()).await
    }

    async fn upload_plan_file(
        &self,
        run: &RunId,
        plan: Vec<u8>,
        format: PlanFormat,
    ) -> Result<(), ClientError> {
        write_atomic(&self.plan_path(run, format), &plan).await
    }

    async fn get_lock_file(&self, run: &RunId) -> Result<Vec<u8>, ClientError> {
        read_bytes(&self.run_dir(run).join("lock.hcl"), "lock file", run.as_str()).await
    }

    async fn upload_lock_file(&self, run: &RunId, lock: Vec<u8>) -> Result<(), ClientError> {
        write_atomic(&self.run_dir(run).join("lock.hcl"), &lock).await
    }

    async fn put_chunk(&self, chunk: LogChunk) -> Result<(), ClientError> {
        let path = self.log_path(&chunk.run_id, chunk.phase);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        file.write_all(&chunk.data).await?;
        Ok(())
    }
}

#[async_trait]
impl PhaseClient for FsRemote {
    async fn start_phase(&self, run: &RunId, phase: Phase) -> Result<Run, ClientError> {
        self.update_run(run, |r| r.status = started_status(phase)).await
    }

    async fn finish_phase(
        &self,
        run: &RunId,
        phase: Phase,
        errored: bool,
    ) -> Result<Run, ClientError> {
        self.update_run(run, |r| r.status = finished_status(phase, errored))
            .await
    }

    async fn cancel_run(&self, run: &RunId) -> Result<Run, ClientError> {
        self.update_run(run, |r| r.status = RunStatus::Canceled).await
    }
}

#[async_trait]
impl WorkspaceClient for FsRemote {
    async fn get_workspace(&self, workspace: &WorkspaceId) -> Result<Workspace, ClientError> {
        let path = self
            .root
            .join("workspaces")
            .join(format!("{}.json", workspace));
        read_json(&path, "workspace", workspace.as_str()).await
    }
}

#[async_trait]
impl VariablesClient for FsRemote {
    async fn list_effective_variables(&self, run: &RunId) -> Result<Vec<Variable>, ClientError> {
        let path = self.root.join("variables").join(format!("{}.json", run));
        match read_json(&path, "variables", run.as_str()).await {
            Err(e) if e.is_not_found() => Ok(Vec::new()),
            other => other,
        }
    }
}

#[async_trait]
impl StateClient for FsRemote {
    async fn download_current(
        &self,
        workspace: &WorkspaceId,
    ) -> Result<Option<Vec<u8>>, ClientError> {
        let path = self
            .root
            .join("state")
            .join(format!("{}.tfstate", workspace));
        match read_bytes(&path, "state", workspace.as_str()).await {
            Ok(state) => Ok(Some(state)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn create_state_version(
        &self,
        workspace: &WorkspaceId,
        serial: i64,
        state: Vec<u8>,
    ) -> Result<(), ClientError> {
        let dir = self.root.join("state");
        write_atomic(
            &dir.join(workspace.as_str())
                .join(format!("{}.tfstate", serial)),
            &state,
        )
        .await?;
        write_atomic(&dir.join(format!("{}.tfstate", workspace)), &state).await
    }
}

#[async_trait]
impl ConfigClient for FsRemote {
    async fn download_config(&self, config_version: &str) -> Result<Vec<u8>, ClientError> {
        let path = self
            .root
            .join("configs")
            .join(format!("{}.tar.gz", config_version));
        read_bytes(&path, "configuration version", config_version).await
    }
}

async fn read_bytes(path: &Path, kind: &'static str, id: &str) -> Result<Vec<u8>, ClientError> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(bytes),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(ClientError::not_found(kind, id)),
        Err(e) => Err(e.into()),
    }
}

async fn read_json<T: DeserializeOwned>(
    path: &Path,
    kind: &'static str,
    id: &str,
) -> Result<T, ClientError> {
    let bytes = read_bytes(path, kind, id).await?;
    serde_json::from_slice(&bytes).map_err(|source| ClientError::Malformed { kind, source })
}

async fn write_json<T: Serialize + ?Sized>(
    path: &Path,
    kind: &'static str,
    value: &T,
) -> Result<(), ClientError> {
    let bytes =
        serde_json::to_vec_pretty(value).map_err(|source| ClientError::Malformed { kind, source })?;
    write_atomic(path, &bytes).await
}

/// Write to a sibling temp file, then rename over the target
async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), ClientError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    tokio::fs::write(&tmp, bytes).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

#[cfg(test)]
#[path = "fs_tests.rs"]
mod tests;
