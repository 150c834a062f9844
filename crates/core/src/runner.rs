// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Runner metadata and liveness status

use std::fmt;
use std::net::{IpAddr, Ipv4Addr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::id::{PoolId, RunnerId};
use crate::job::Job;

/// Capacity assumed when a runner does not state one
pub const DEFAULT_MAX_JOBS: usize = 5;

/// Runner status. `Errored` and `Exited` are final.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunnerStatus {
    Idle,
    Busy,
    Unknown,
    Errored,
    Exited,
}

impl RunnerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunnerStatus::Idle => "idle",
            RunnerStatus::Busy => "busy",
            RunnerStatus::Unknown => "unknown",
            RunnerStatus::Errored => "errored",
            RunnerStatus::Exited => "exited",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RunnerStatus::Errored | RunnerStatus::Exited)
    }

    /// Whether a runner in this status may receive new jobs
    pub fn is_available(&self) -> bool {
        matches!(self, RunnerStatus::Idle | RunnerStatus::Busy)
    }
}

impl fmt::Display for RunnerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RunnerError {
    #[error("invalid runner state transition: {from} -> {to}")]
    InvalidStateTransition { from: RunnerStatus, to: RunnerStatus },
}

/// Pool a runner belongs to, denormalized onto the runner record
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentPoolSummary {
    pub id: PoolId,
    pub name: String,
    pub organization: String,
}

/// What a runner process reports about itself when registering
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationRequest {
    #[serde(default)]
    pub name: Option<String>,
    pub version: String,
    pub max_jobs: usize,
    /// Derived from the connection by the server when absent
    #[serde(default)]
    pub ip_address: Option<IpAddr>,
}

impl RegistrationRequest {
    pub fn new(version: impl Into<String>, max_jobs: usize) -> Self {
        Self {
            name: None,
            version: version.into(),
            max_jobs,
            ip_address: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_ip_address(mut self, ip: IpAddr) -> Self {
        self.ip_address = Some(ip);
        self
    }
}

/// A registered runner process
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunnerMeta {
    pub id: RunnerId,
    #[serde(default)]
    pub name: Option<String>,
    pub version: String,
    pub status: RunnerStatus,
    pub max_jobs: usize,
    /// Derived from the jobs allocated to or running on this runner
    #[serde(default)]
    pub current_jobs: usize,
    pub last_ping_at: DateTime<Utc>,
    pub last_status_at: DateTime<Utc>,
    pub ip_address: IpAddr,
    /// `None` for server runners, which only serve pool-less jobs
    #[serde(default)]
    pub agent_pool: Option<AgentPoolSummary>,
}

impl RunnerMeta {
    /// Mint a runner record for a successful registration: idle, pinged now
    pub fn register(
        id: RunnerId,
        request: RegistrationRequest,
        agent_pool: Option<AgentPoolSummary>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            name: request.name,
            version: request.version,
            status: RunnerStatus::Idle,
            max_jobs: request.max_jobs,
            current_jobs: 0,
            last_ping_at: now,
            last_status_at: now,
            ip_address: request
                .ip_address
                .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST)),
            agent_pool,
        }
    }

    pub fn pool_id(&self) -> Option<&PoolId> {
        self.agent_pool.as_ref().map(|p| &p.id)
    }

    /// Set status, refreshing `last_ping_at` only when the runner itself is
    /// reporting. Terminal runners reject every update.
    pub fn set_status(
        &mut self,
        status: RunnerStatus,
        ping: bool,
        now: DateTime<Utc>,
    ) -> Result<(), RunnerError> {
        if self.status.is_terminal() {
            return Err(RunnerError::InvalidStateTransition {
                from: self.status,
                to: status,
            });
        }
        self.status = status;
        self.last_status_at = now;
        if ping {
            self.last_ping_at = now;
        }
        Ok(())
    }

    pub fn has_capacity(&self) -> bool {
        self.current_jobs < self.max_jobs
    }

    /// Pool scope check: pool-less runners serve pool-less jobs, agent
    /// runners serve jobs of their own pool.
    pub fn serves(&self, job: &Job) -> bool {
        self.pool_id() == job.agent_pool_id.as_ref()
    }

    /// Display name, falling back to the ID
    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or(self.id.as_str())
    }
}

#[cfg(test)]
#[path = "runner_tests.rs"]
mod tests;
