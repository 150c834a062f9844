// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Operation executor: carries out one job inside the runner process
//!
//! An operation downloads the engine and the configuration, prepares the
//! working directory and runs the phase's engine commands, streaming their
//! output to the run's phase log. It then reports exactly one outcome
//! through the job's own client:
//!
//! - canceled, when a cancel was requested (a forced cancel reports
//!   nothing, the server has already canceled the job);
//! - errored with the failing step's message;
//! - finished otherwise.

pub mod credentials;
mod output;
pub mod process;
pub mod sandbox;
mod scoped;
pub mod steps;
pub mod tfvars;
pub mod workdir;

pub use output::PhaseOutput;
pub use scoped::ScopedRemote;
pub use steps::Step;

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::ExitStatus;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

use ork_adapters::{
    ClientError, DownloadError, PlanFormat, Remote, ToolDownloader, Variable, VariableCategory,
};
use ork_core::{Job, JobId, JobStatus, Run};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::backoff::{Backoff, BackoffConfig};
use crate::client::JobClient;
use crate::error::ServiceError;
use process::{CurrentProcess, Invocation};
use sandbox::Sandbox;
use steps::{JSON_PLAN_FILE, LOCK_FILE, PLAN_FILE, STATE_FILE};
use workdir::Workdir;

const DEFAULT_ENV: [(&str, &str); 2] = [("TF_IN_AUTOMATION", "true"), ("CHECKPOINT_DISABLE", "true")];

#[derive(Debug, Error)]
pub enum OperationError {
    #[error("execution canceled")]
    Canceled,

    #[error("{context}: {source}")]
    Client {
        context: &'static str,
        #[source]
        source: ClientError,
    },

    #[error("downloading engine: {0}")]
    Download(#[from] DownloadError),

    #[error("{context}: {source}")]
    Io {
        context: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("executing {command}: {status}: {stderr}")]
    Process {
        command: &'static str,
        status: ExitStatus,
        stderr: String,
    },

    #[error("engine has not been downloaded")]
    MissingEngine,

    #[error("reading state file: {0}")]
    State(#[source] serde_json::Error),

    #[error("setting up dynamic provider credentials: {0}")]
    Credentials(String),

    #[error(transparent)]
    Service(#[from] ServiceError),

    #[error("{0}; {1}")]
    Joined(Box<OperationError>, Box<OperationError>),
}

impl OperationError {
    pub fn client(context: &'static str, source: ClientError) -> Self {
        OperationError::Client { context, source }
    }

    pub fn io(context: &'static str, source: std::io::Error) -> Self {
        OperationError::Io { context, source }
    }
}

/// Executor settings shared by every operation of a runner
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OperationConfig {
    /// Keep working directories and write debug details to the output
    pub debug: bool,
    /// Run apply inside a bubblewrap sandbox
    pub sandbox: bool,
    pub plugin_cache: bool,
    pub plugin_cache_dir: PathBuf,
    /// Host the job token is issued for, exported as the engine credential
    pub hostname: String,
    /// Parent of the per-run working directories
    pub work_dir: Option<PathBuf>,
}

impl Default for OperationConfig {
    fn default() -> Self {
        Self {
            debug: false,
            sandbox: false,
            plugin_cache: false,
            plugin_cache_dir: std::env::temp_dir().join("plugin-cache"),
            hostname: "localhost".to_string(),
            work_dir: None,
        }
    }
}

impl OperationConfig {
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn with_sandbox(mut self, sandbox: bool) -> Self {
        self.sandbox = sandbox;
        self
    }

    pub fn with_plugin_cache(mut self, dir: impl Into<PathBuf>) -> Self {
        self.plugin_cache = true;
        self.plugin_cache_dir = dir.into();
        self
    }

    pub fn with_work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.work_dir = Some(dir.into());
        self
    }
}

/// Engine credential variable for `hostname`
pub fn credential_env(hostname: &str, token: &str) -> (String, String) {
    let host = hostname.replace('-', "__").replace(['.', ':'], "_");
    (format!("TF_TOKEN_{host}"), token.to_string())
}

/// Cancels a running operation
#[derive(Clone)]
pub struct OperationHandle {
    job: JobId,
    canceled: Arc<AtomicBool>,
    /// Canceled only by a forced cancel
    work: CancellationToken,
    process: CurrentProcess,
}

impl OperationHandle {
    fn new(job: JobId) -> Self {
        Self {
            job,
            canceled: Arc::new(AtomicBool::new(false)),
            work: CancellationToken::new(),
            process: CurrentProcess::default(),
        }
    }

    pub fn job_id(&self) -> &JobId {
        &self.job
    }

    /// Skip the remaining steps. With `send_signal` the running engine
    /// process is interrupted, or killed when `force` is set; a forced
    /// cancel also abandons the operation without waiting for the process.
    /// A repeated graceful cancel does not interrupt the process again.
    pub fn cancel(&self, force: bool, send_signal: bool) {
        let repeated = self.canceled.swap(true, Ordering::SeqCst);
        tracing::info!(job_id = %self.job, force, send_signal, repeated, "canceling operation");
        if force {
            self.work.cancel();
        }
        if send_signal && (force || !repeated) {
            self.process.signal(force);
        }
    }

    pub fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::SeqCst)
    }

    pub fn is_force_canceled(&self) -> bool {
        self.work.is_cancelled()
    }
}

/// Mutable state threaded through the steps
struct Execution {
    run: Run,
    workdir: Workdir,
    output: PhaseOutput,
    engine: Option<PathBuf>,
    env: Vec<(String, String)>,
    vars: Vec<Variable>,
}

pub struct Operation {
    job: Job,
    jobs: Arc<dyn JobClient>,
    remote: Arc<dyn Remote>,
    downloader: Arc<dyn ToolDownloader>,
    config: OperationConfig,
    env: Vec<(String, String)>,
    handle: OperationHandle,
}

impl Operation {
    pub fn new(
        job: Job,
        token: &str,
        jobs: Arc<dyn JobClient>,
        remote: Arc<dyn Remote>,
        downloader: Arc<dyn ToolDownloader>,
        config: OperationConfig,
    ) -> Self {
        let mut env: Vec<(String, String)> = DEFAULT_ENV
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        env.push(credential_env(&config.hostname, token));
        let handle = OperationHandle::new(job.id.clone());
        Self {
            job,
            jobs,
            remote,
            downloader,
            config,
            env,
            handle,
        }
    }

    pub fn handle(&self) -> OperationHandle {
        self.handle.clone()
    }

    /// Execute the job and report its outcome. Returns the reported status,
    /// `None` when nothing was reported.
    pub async fn run(self) -> Option<JobStatus> {
        let relay = self.handle.work.child_token();
        let relay_task = tokio::spawn(relay_signals(
            Arc::clone(&self.jobs),
            self.job.id.clone(),
            self.handle.clone(),
            relay.clone(),
        ));

        let result = tokio::select! {
            _ = self.handle.work.cancelled() => Err(OperationError::Canceled),
            result = self.execute() => result,
        };
        relay.cancel();
        let _ = relay_task.await;

        self.report(result).await
    }

    async fn report(&self, result: Result<(), OperationError>) -> Option<JobStatus> {
        let job_id = &self.job.id;
        let (status, error) = if self.handle.is_canceled() {
            if self.handle.is_force_canceled() {
                tracing::warn!(%job_id, "job forcibly canceled");
                return None;
            }
            tracing::info!(%job_id, "job canceled");
            (JobStatus::Canceled, None)
        } else {
            match result {
                Ok(()) => {
                    tracing::info!(%job_id, "finished job successfully");
                    (JobStatus::Finished, None)
                }
                Err(e) => {
                    tracing::warn!(%job_id, error = %e, "finished job with error");
                    (JobStatus::Errored, Some(e.to_string()))
                }
            }
        };
        if let Err(e) = self.jobs.finish_job(&self.job.spec, status, error).await {
            tracing::error!(%job_id, %status, error = %e, "failed to report job status");
        }
        Some(status)
    }

    async fn execute(&self) -> Result<(), OperationError> {
        let run = self
            .remote
            .get_run(&self.job.spec.run_id)
            .await
            .map_err(|e| OperationError::client("retrieving run", e))?;
        let workspace = self
            .remote
            .get_workspace(&self.job.workspace_id)
            .await
            .map_err(|e| OperationError::client("retrieving workspace", e))?;
        let workdir = Workdir::new(
            self.config.work_dir.as_deref(),
            &workspace.working_directory,
            &run.id,
        )
        .map_err(|e| OperationError::io("constructing working directory", e))?;
        let output = PhaseOutput::new(Arc::clone(&self.remote), run.id.clone(), self.job.spec.phase);

        let mut ex = Execution {
            run,
            workdir,
            output,
            engine: None,
            env: self.env.clone(),
            vars: Vec::new(),
        };
        if self.config.debug {
            ex.output.line("").await;
            ex.output.line("Debug mode enabled").await;
            ex.output.line("------------------").await;
            ex.output.line(format!("Job: {}", self.job.id)).await;
            ex.output.line(format!("Sandbox mode: {}", self.config.sandbox)).await;
            ex.output
                .line(format!("Working directory: {}", ex.workdir.path().display()))
                .await;
            ex.output.line("------------------").await;
            ex.output.line("").await;
        }

        let result = self.steps(&mut ex).await;
        if let Err(e) = &result {
            ex.output.write(format!("\nError: {e}\n").as_bytes()).await;
        }
        ex.output.close().await;

        if self.config.debug {
            let kept = ex.workdir.keep();
            tracing::info!(job_id = %self.job.id, path = %kept.display(), "kept working directory");
        } else if let Err(e) = ex.workdir.close() {
            tracing::warn!(job_id = %self.job.id, error = %e, "failed to delete working directory");
        }
        result
    }

    async fn steps(&self, ex: &mut Execution) -> Result<(), OperationError> {
        for step in steps::steps(self.job.spec.phase, self.config.plugin_cache) {
            if self.handle.is_canceled() {
                return Err(OperationError::Canceled);
            }
            tracing::debug!(job_id = %self.job.id, step = step.name(), "running step");
            self.step(step, ex).await?;
        }
        Ok(())
    }

    async fn step(&self, step: Step, ex: &mut Execution) -> Result<(), OperationError> {
        let run_id = ex.run.id.clone();
        match step {
            Step::DownloadEngine => {
                let path = self.downloader.download(&ex.run.engine_version).await?;
                tracing::debug!(version = %ex.run.engine_version, path = %path.display(), "downloaded engine");
                ex.engine = Some(path);
            }
            Step::DownloadConfig => {
                let tarball = self
                    .remote
                    .download_config(&ex.run.config_version_id)
                    .await
                    .map_err(|e| OperationError::client("downloading config", e))?;
                ex.workdir
                    .unpack(&tarball)
                    .map_err(|e| OperationError::io("unpacking config", e))?;
            }
            Step::ReadVariables => {
                let variables = self
                    .remote
                    .list_effective_variables(&run_id)
                    .await
                    .map_err(|e| OperationError::client("retrieving variables", e))?;
                for var in variables {
                    match var.category {
                        VariableCategory::Env => ex.env.push((var.key, var.value)),
                        VariableCategory::Terraform => ex.vars.push(var),
                    }
                }
            }
            Step::SetupDynamicCredentials => {
                let env: HashMap<String, String> = ex.env.iter().cloned().collect();
                let exported = credentials::setup(
                    self.jobs.as_ref(),
                    &self.job.id,
                    self.job.spec.phase,
                    &ex.workdir.path(),
                    &env,
                )
                .await?;
                ex.env.extend(exported);
            }
            Step::WriteVariables => {
                tfvars::write_terraform_vars(&ex.workdir.path(), &ex.vars)
                    .map_err(|e| OperationError::io("writing terraform.tfvars", e))?;
            }
            Step::DeleteBackendConfig => {
                let changed = ex
                    .workdir
                    .remove_backend_config()
                    .map_err(|e| OperationError::io("removing backend config", e))?;
                if !changed.is_empty() {
                    tracing::debug!(files = ?changed, "removed backend config");
                }
            }
            Step::DownloadState => {
                let state = self
                    .remote
                    .download_current(&ex.run.workspace_id)
                    .await
                    .map_err(|e| OperationError::client("downloading state version", e))?;
                if let Some(state) = state {
                    ex.workdir
                        .write_file(STATE_FILE, &state)
                        .map_err(|e| OperationError::io("saving state to local disk", e))?;
                }
            }
            Step::EnablePluginCache => {
                std::fs::create_dir_all(&self.config.plugin_cache_dir)
                    .map_err(|e| OperationError::io("creating plugin cache directory", e))?;
                ex.env.push((
                    "TF_PLUGIN_CACHE_DIR".to_string(),
                    self.config.plugin_cache_dir.display().to_string(),
                ));
            }
            Step::Init => self.engine(ex, "init", steps::init_args(), None, false).await?,
            Step::Plan => {
                let args = steps::plan_args(&ex.run);
                self.engine(ex, "plan", args, None, false).await?
            }
            Step::ConvertPlanToJson => {
                self.engine(ex, "show", steps::show_json_args(), Some(JSON_PLAN_FILE), false)
                    .await?
            }
            Step::UploadPlan => self.upload_plan(ex, PLAN_FILE, PlanFormat::Binary).await?,
            Step::UploadJsonPlan => self.upload_plan(ex, JSON_PLAN_FILE, PlanFormat::Json).await?,
            Step::UploadLockFile => match ex.workdir.read_file(LOCK_FILE) {
                Ok(lock) => self
                    .remote
                    .upload_lock_file(&run_id, lock)
                    .await
                    .map_err(|e| OperationError::client("uploading lock file", e))?,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(OperationError::io("reading lock file", e)),
            },
            Step::DownloadLockFile => match self.remote.get_lock_file(&run_id).await {
                Ok(lock) => ex
                    .workdir
                    .write_file(LOCK_FILE, &lock)
                    .map_err(|e| OperationError::io("writing lock file", e))?,
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(OperationError::client("downloading lock file", e)),
            },
            Step::DownloadPlanFile => {
                let plan = self
                    .remote
                    .get_plan_file(&run_id, PlanFormat::Binary)
                    .await
                    .map_err(|e| OperationError::client("downloading plan file", e))?;
                ex.workdir
                    .write_file(PLAN_FILE, &plan)
                    .map_err(|e| OperationError::io("writing plan file", e))?;
            }
            Step::Apply => self.apply(ex).await?,
        }
        Ok(())
    }

    /// Apply, then upload the state whenever the state file changed, even
    /// when the apply failed part way
    async fn apply(&self, ex: &Execution) -> Result<(), OperationError> {
        let before = modified(&ex.workdir.file(STATE_FILE));
        let args = steps::apply_args(&ex.run);
        let result = self.engine(ex, "apply", args, None, self.config.sandbox).await;
        let after = modified(&ex.workdir.file(STATE_FILE));
        if after.is_none() || (before.is_some() && before == after) {
            return result;
        }
        match (result, self.upload_state(ex).await) {
            (Ok(()), upload) => upload,
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(upload)) => Err(OperationError::Joined(Box::new(e), Box::new(upload))),
        }
    }

    async fn upload_state(&self, ex: &Execution) -> Result<(), OperationError> {
        #[derive(Deserialize)]
        struct StateFile {
            #[serde(default)]
            serial: i64,
        }

        let state = ex
            .workdir
            .read_file(STATE_FILE)
            .map_err(|e| OperationError::io("reading state file", e))?;
        let file: StateFile = serde_json::from_slice(&state).map_err(OperationError::State)?;
        self.remote
            .create_state_version(&ex.run.workspace_id, file.serial, state)
            .await
            .map_err(|e| OperationError::client("creating state version", e))?;
        tracing::info!(workspace_id = %ex.run.workspace_id, serial = file.serial, "uploaded state");
        Ok(())
    }

    async fn upload_plan(
        &self,
        ex: &Execution,
        file: &str,
        format: PlanFormat,
    ) -> Result<(), OperationError> {
        let plan = ex
            .workdir
            .read_file(file)
            .map_err(|e| OperationError::io("reading plan file", e))?;
        self.remote
            .upload_plan_file(&ex.run.id, plan, format)
            .await
            .map_err(|e| OperationError::client("uploading plan", e))
    }

    async fn engine(
        &self,
        ex: &Execution,
        command: &'static str,
        args: Vec<String>,
        stdout_to: Option<&str>,
        sandboxed: bool,
    ) -> Result<(), OperationError> {
        let engine = ex.engine.as_deref().ok_or(OperationError::MissingEngine)?;
        let argv = if sandboxed {
            let certs = sandbox::certs_dir();
            Sandbox {
                root: ex.workdir.root(),
                relative: ex.workdir.relative(),
                certs: &certs,
                plugin_cache: self
                    .config
                    .plugin_cache
                    .then_some(self.config.plugin_cache_dir.as_path()),
            }
            .wrap(engine, &args)
        } else {
            let mut argv = vec![engine.display().to_string()];
            argv.extend(args);
            argv
        };
        let dir = ex.workdir.path();
        let exit = process::run(
            Invocation {
                args: argv,
                dir: &dir,
                env: &ex.env,
                stdout_to: stdout_to.map(|f| ex.workdir.file(f)),
            },
            &ex.output,
            &self.handle.process,
        )
        .await
        .map_err(|e| OperationError::io("starting engine", e))?;
        if exit.status.success() {
            Ok(())
        } else {
            Err(OperationError::Process {
                command,
                status: exit.status,
                stderr: exit.stderr,
            })
        }
    }
}

fn modified(path: &std::path::Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

/// Relay cancel signals for the job to the operation until `cancel` fires.
/// Subscription failures are retried with backoff.
async fn relay_signals(
    jobs: Arc<dyn JobClient>,
    job: JobId,
    handle: OperationHandle,
    cancel: CancellationToken,
) {
    let mut backoff = Backoff::new(BackoffConfig::default());
    loop {
        match jobs.await_job_signal(&job, &cancel).await {
            Ok(signal) => {
                backoff.reset();
                handle.cancel(signal.force, true);
            }
            Err(_) if cancel.is_cancelled() => return,
            Err(e) => {
                let delay = backoff.next_delay();
                tracing::debug!(job_id = %job, error = %e, backoff_ms = delay.as_millis() as u64, "awaiting job signal");
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "operation_tests.rs"]
mod tests;
