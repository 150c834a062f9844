// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Authenticated callers and what each kind may do

use std::fmt;

use thiserror::Error;

use crate::id::{JobId, RunnerId, WorkspaceId};
use crate::job::Job;
use crate::run::Phase;
use crate::runner::{AgentPoolSummary, RunnerMeta};

/// The caller of a service operation
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Subject {
    /// A registered runner process
    Runner(RunnerMeta),
    /// A running job, authenticated with its job token
    Job(Job),
    /// The liveness manager
    Manager,
    /// A runner process that has not registered yet. Agent runners carry
    /// the pool of the agent token they presented.
    Unregistered { pool: Option<AgentPoolSummary> },
    /// A human or API caller; checked by the authorizer
    Operator(String),
}

/// Workspace-scoped actions a job may perform on its own behalf
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum JobAction {
    GetRun,
    GetWorkspace,
    ListVariables,
    PutChunk,
    DownloadConfig,
    DownloadState,
    GetPlanFile,
    CancelRun,
    UploadPlanFile,
    UploadLockFile,
    ApplyRun,
    GetLockFile,
    CreateStateVersion,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("access not permitted: {subject} cannot {action}")]
pub struct AccessError {
    pub subject: String,
    pub action: &'static str,
}

impl Subject {
    pub fn kind(&self) -> &'static str {
        match self {
            Subject::Runner(_) => "runner",
            Subject::Job(_) => "job",
            Subject::Manager => "manager",
            Subject::Unregistered { .. } => "unregistered runner",
            Subject::Operator(_) => "operator",
        }
    }

    fn denied(&self, action: &'static str) -> AccessError {
        AccessError {
            subject: self.to_string(),
            action,
        }
    }

    /// Pool to register into. Only unregistered runners may register.
    pub fn registration_pool(&self) -> Result<Option<AgentPoolSummary>, AccessError> {
        match self {
            Subject::Unregistered { pool } => Ok(pool.clone()),
            _ => Err(self.denied("register a runner")),
        }
    }

    /// Whether this subject may set the status of `runner`, and if so
    /// whether the update counts as a ping.
    pub fn status_ping(&self, runner: &RunnerId) -> Result<bool, AccessError> {
        match self {
            Subject::Runner(meta) if &meta.id == runner => Ok(true),
            Subject::Manager => Ok(false),
            _ => Err(self.denied("update runner status")),
        }
    }

    /// Require the caller to be the given runner
    pub fn require_runner(&self, runner: &RunnerId) -> Result<(), AccessError> {
        match self {
            Subject::Runner(meta) if &meta.id == runner => Ok(()),
            _ => Err(self.denied("act on behalf of this runner")),
        }
    }

    pub fn runner_id(&self) -> Option<&RunnerId> {
        match self {
            Subject::Runner(meta) => Some(&meta.id),
            _ => None,
        }
    }

    /// Require the caller to be the given job
    pub fn require_job(&self, job: &JobId) -> Result<&Job, AccessError> {
        match self {
            Subject::Job(j) if &j.id == job => Ok(j),
            _ => Err(self.denied("act on behalf of this job")),
        }
    }

    /// Job capability check for workspace-scoped actions. Non-job subjects
    /// are never granted access here.
    pub fn can_access_workspace(&self, action: JobAction, workspace: &WorkspaceId) -> bool {
        let Subject::Job(job) = self else {
            return false;
        };
        if &job.workspace_id != workspace {
            return false;
        }
        use JobAction::*;
        match action {
            GetRun | GetWorkspace | ListVariables | PutChunk | DownloadConfig | DownloadState
            | GetPlanFile | CancelRun => true,
            UploadPlanFile | UploadLockFile | ApplyRun => job.spec.phase == Phase::Plan,
            GetLockFile | CreateStateVersion => job.spec.phase == Phase::Apply,
        }
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Subject::Runner(meta) => write!(f, "runner {}", meta.id),
            Subject::Job(job) => write!(f, "job {}", job.id),
            Subject::Manager => f.write_str("manager"),
            Subject::Unregistered { pool: Some(pool) } => {
                write!(f, "unregistered runner (pool {})", pool.id)
            }
            Subject::Unregistered { pool: None } => f.write_str("unregistered runner"),
            Subject::Operator(name) => write!(f, "operator {}", name),
        }
    }
}

#[cfg(test)]
#[path = "subject_tests.rs"]
mod tests;
