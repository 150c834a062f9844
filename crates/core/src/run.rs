// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Run snapshots consumed from the external run service

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::{PoolId, RunId, WorkspaceId};

/// Run phase executed by a single job
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Plan,
    Apply,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Plan => "plan",
            Phase::Apply => "apply",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Phase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "plan" => Ok(Phase::Plan),
            "apply" => Ok(Phase::Apply),
            other => Err(format!("unknown phase: {}", other)),
        }
    }
}

/// Run status as reported by the run service
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    PlanQueued,
    Planning,
    Planned,
    ApplyQueued,
    Applying,
    Applied,
    Errored,
    Discarded,
    Canceled,
    ForceCanceled,
}

/// Snapshot of a run, enough to create, execute and cancel its jobs
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Run {
    pub id: RunId,
    pub organization: String,
    pub workspace_id: WorkspaceId,
    pub status: RunStatus,
    /// Copied from the workspace when the run was created
    #[serde(default)]
    pub agent_pool_id: Option<PoolId>,
    /// Set when a user has requested cancellation of an in-progress phase
    #[serde(default)]
    pub cancel_signaled_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub config_version_id: String,
    #[serde(default)]
    pub engine_version: String,
    #[serde(default)]
    pub plan_only: bool,
    #[serde(default)]
    pub destroy: bool,
    #[serde(default = "default_refresh")]
    pub refresh: bool,
    #[serde(default)]
    pub refresh_only: bool,
    #[serde(default)]
    pub replace_addrs: Vec<String>,
    #[serde(default)]
    pub target_addrs: Vec<String>,
}

fn default_refresh() -> bool {
    true
}

impl Run {
    pub fn new(
        id: impl Into<RunId>,
        organization: impl Into<String>,
        workspace_id: impl Into<WorkspaceId>,
    ) -> Self {
        Self {
            id: id.into(),
            organization: organization.into(),
            workspace_id: workspace_id.into(),
            status: RunStatus::PlanQueued,
            agent_pool_id: None,
            cancel_signaled_at: None,
            config_version_id: String::new(),
            engine_version: String::new(),
            plan_only: false,
            destroy: false,
            refresh: true,
            refresh_only: false,
            replace_addrs: Vec::new(),
            target_addrs: Vec::new(),
        }
    }

    pub fn with_status(mut self, status: RunStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_pool(mut self, pool: impl Into<PoolId>) -> Self {
        self.agent_pool_id = Some(pool.into());
        self
    }

    pub fn with_cancel_signaled_at(mut self, at: DateTime<Utc>) -> Self {
        self.cancel_signaled_at = Some(at);
        self
    }

    /// Phase the run is currently in, derived from its status
    pub fn phase(&self) -> Phase {
        match self.status {
            RunStatus::ApplyQueued | RunStatus::Applying | RunStatus::Applied => Phase::Apply,
            _ => Phase::Plan,
        }
    }
}

#[cfg(test)]
#[path = "run_tests.rs"]
mod tests;
