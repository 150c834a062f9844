// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Job state machine
//!
//! A job is one phase of a run and the unit the allocator assigns to a
//! runner. Legal transitions:
//!
//! ```text
//! Unallocated -> Allocated | Canceled
//! Allocated   -> Running | Canceled
//! Running     -> Finished | Errored | Canceled
//! ```

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::id::{JobId, PoolId, RunId, RunnerId, WorkspaceId};
use crate::run::{Phase, Run, RunStatus};
use crate::signal::JobSignal;

/// Job status
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Unallocated,
    Allocated,
    Running,
    Finished,
    Errored,
    Canceled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Unallocated => "unallocated",
            JobStatus::Allocated => "allocated",
            JobStatus::Running => "running",
            JobStatus::Finished => "finished",
            JobStatus::Errored => "errored",
            JobStatus::Canceled => "canceled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Finished | JobStatus::Errored | JobStatus::Canceled
        )
    }

    /// Whether a job in this status counts against its runner's capacity
    pub fn holds_capacity(&self) -> bool {
        matches!(self, JobStatus::Allocated | JobStatus::Running)
    }

    pub fn can_transition_to(&self, to: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, to),
            (Unallocated, Allocated)
                | (Unallocated, Canceled)
                | (Allocated, Running)
                | (Allocated, Canceled)
                | (Running, Finished)
                | (Running, Canceled)
                | (Running, Errored)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifies a job by the run and phase it executes
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobSpec {
    pub run_id: RunId,
    pub phase: Phase,
}

impl JobSpec {
    pub fn new(run_id: impl Into<RunId>, phase: Phase) -> Self {
        Self {
            run_id: run_id.into(),
            phase,
        }
    }
}

impl fmt::Display for JobSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.run_id, self.phase)
    }
}

impl std::str::FromStr for JobSpec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (run, phase) = s
            .rsplit_once('/')
            .ok_or_else(|| format!("malformed job spec: {}", s))?;
        if run.is_empty() {
            return Err(format!("malformed job spec: {}", s));
        }
        Ok(JobSpec::new(run, phase.parse()?))
    }
}

/// Errors raised by illegal job operations. None of them mutate the job.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JobError {
    #[error("invalid job state transition: {from} -> {to}")]
    InvalidStateTransition { from: JobStatus, to: JobStatus },

    #[error("job can only be reallocated while allocated (status: {0})")]
    NotAllocated(JobStatus),

    #[error("job can only be signaled while running (status: {0})")]
    NotRunning(JobStatus),

    #[error("job cannot finish with non-terminal status {0}")]
    NotTerminal(JobStatus),
}

/// One phase of a run, scheduled onto a runner
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub spec: JobSpec,
    pub status: JobStatus,
    pub organization: String,
    pub workspace_id: WorkspaceId,
    /// Immutable; copied from the workspace at creation
    #[serde(default)]
    pub agent_pool_id: Option<PoolId>,
    /// Set on allocation and retained once the job is terminal
    #[serde(default)]
    pub runner_id: Option<RunnerId>,
    /// Pending cancellation: `Some(force)`
    #[serde(default)]
    pub signaled: Option<bool>,
    /// Failure message when the job errored
    #[serde(default)]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Job {
    /// Create an unallocated job for the run's current phase
    pub fn new(id: JobId, run: &Run, now: DateTime<Utc>) -> Self {
        Self {
            id,
            spec: JobSpec::new(run.id.clone(), run.phase()),
            status: JobStatus::Unallocated,
            organization: run.organization.clone(),
            workspace_id: run.workspace_id.clone(),
            agent_pool_id: run.agent_pool_id.clone(),
            runner_id: None,
            signaled: None,
            error: None,
            created_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Apply a transition from the legal table, leaving the job untouched
    /// on failure.
    pub fn update_status(&mut self, to: JobStatus) -> Result<(), JobError> {
        if !self.status.can_transition_to(to) {
            return Err(JobError::InvalidStateTransition {
                from: self.status,
                to,
            });
        }
        self.status = to;
        Ok(())
    }

    pub fn allocate(&mut self, runner: RunnerId) -> Result<(), JobError> {
        self.update_status(JobStatus::Allocated)?;
        self.runner_id = Some(runner);
        Ok(())
    }

    /// Move an allocated job to a different runner
    pub fn reallocate(&mut self, runner: RunnerId) -> Result<(), JobError> {
        if self.status != JobStatus::Allocated {
            return Err(JobError::NotAllocated(self.status));
        }
        self.runner_id = Some(runner);
        Ok(())
    }

    pub fn start(&mut self) -> Result<(), JobError> {
        self.update_status(JobStatus::Running)
    }

    pub fn finish(&mut self, to: JobStatus, error: Option<String>) -> Result<(), JobError> {
        if !to.is_terminal() {
            return Err(JobError::NotTerminal(to));
        }
        self.update_status(to)?;
        if to == JobStatus::Errored {
            self.error = error;
        }
        Ok(())
    }

    /// Apply the cancellation policy for the parent run's status.
    ///
    /// Returns the signal to publish, if any. The job is only mutated when
    /// the whole operation succeeds.
    pub fn cancel(&mut self, run: &Run) -> Result<Option<JobSignal>, JobError> {
        let mut next = self.clone();
        let signal = match run.status {
            RunStatus::Planning | RunStatus::Applying if run.cancel_signaled_at.is_some() => {
                if next.status != JobStatus::Running {
                    return Err(JobError::NotRunning(next.status));
                }
                next.signaled = Some(false);
                Some(JobSignal::graceful(next.id.clone()))
            }
            RunStatus::Canceled => {
                next.update_status(JobStatus::Canceled)?;
                None
            }
            RunStatus::ForceCanceled => {
                // Only an executing job has a process to kill.
                let was_running = next.status == JobStatus::Running;
                next.update_status(JobStatus::Canceled)?;
                if was_running {
                    next.signaled = Some(true);
                    Some(JobSignal::force(next.id.clone()))
                } else {
                    None
                }
            }
            _ => None,
        };
        *self = next;
        Ok(signal)
    }
}

impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.id, self.spec)
    }
}

#[cfg(test)]
#[path = "job_tests.rs"]
mod tests;
