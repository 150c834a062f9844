// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Clients for the services an operation talks to while it executes
//!
//! Runs, workspaces, variables, state and configuration versions are owned
//! by other parts of the platform. The executor only sees them through
//! these traits.

mod fs;

pub use fs::FsRemote;

// Test support - only compiled for tests or when explicitly requested
#[cfg(any(test, feature = "test-support"))]
mod fake;
#[cfg(any(test, feature = "test-support"))]
pub use fake::{FakeRemote, RemoteCall};

use std::fmt;

use async_trait::async_trait;
use ork_core::{Phase, PoolId, Run, RunId, RunStatus, WorkspaceId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from remote clients
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("access denied: {0}")]
    AccessDenied(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed {kind}: {source}")]
    Malformed {
        kind: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("{0}")]
    Remote(String),
}

impl ClientError {
    pub fn not_found(kind: &'static str, id: impl fmt::Display) -> Self {
        ClientError::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ClientError::NotFound { .. })
    }
}

/// The workspace a run belongs to
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workspace {
    pub id: WorkspaceId,
    pub name: String,
    pub organization: String,
    /// Directory within the configuration to run the engine in
    #[serde(default)]
    pub working_directory: String,
    #[serde(default)]
    pub agent_pool_id: Option<PoolId>,
}

impl Workspace {
    pub fn new(
        id: impl Into<WorkspaceId>,
        name: impl Into<String>,
        organization: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            organization: organization.into(),
            working_directory: String::new(),
            agent_pool_id: None,
        }
    }

    pub fn with_working_directory(mut self, dir: impl Into<String>) -> Self {
        self.working_directory = dir.into();
        self
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariableCategory {
    Terraform,
    Env,
}

/// A variable resolved for a run, after set and workspace precedence
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variable {
    pub key: String,
    pub value: String,
    pub category: VariableCategory,
    #[serde(default)]
    pub hcl: bool,
    #[serde(default)]
    pub sensitive: bool,
}

impl Variable {
    pub fn terraform(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            category: VariableCategory::Terraform,
            hcl: false,
            sensitive: false,
        }
    }

    pub fn env(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            category: VariableCategory::Env,
            ..Self::terraform(key, value)
        }
    }

    pub fn hcl(mut self) -> Self {
        self.hcl = true;
        self
    }
}

/// Plan file representations
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanFormat {
    Binary,
    Json,
}

impl PlanFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanFormat::Binary => "binary",
            PlanFormat::Json => "json",
        }
    }
}

/// A piece of a phase's log output
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogChunk {
    pub run_id: RunId,
    pub phase: Phase,
    /// Byte offset of `data` within the phase log
    pub offset: usize,
    pub data: Vec<u8>,
    #[serde(default)]
    pub start: bool,
    #[serde(default)]
    pub end: bool,
}

/// Run reads, plan artifacts and log output
#[async_trait]
pub trait RunClient: Send + Sync {
    async fn get_run(&self, run: &RunId) -> Result<Run, ClientError>;

    async fn get_plan_file(&self, run: &RunId, format: PlanFormat) -> Result<Vec<u8>, ClientError>;

    async fn upload_plan_file(
        &self,
        run: &RunId,
        plan: Vec<u8>,
        format: PlanFormat,
    ) -> Result<(), ClientError>;

    async fn get_lock_file(&self, run: &RunId) -> Result<Vec<u8>, ClientError>;

    async fn upload_lock_file(&self, run: &RunId, lock: Vec<u8>) -> Result<(), ClientError>;

    async fn put_chunk(&self, chunk: LogChunk) -> Result<(), ClientError>;
}

/// Run phase transitions driven by job start and finish
#[async_trait]
pub trait PhaseClient: Send + Sync {
    async fn start_phase(&self, run: &RunId, phase: Phase) -> Result<Run, ClientError>;

    async fn finish_phase(
        &self,
        run: &RunId,
        phase: Phase,
        errored: bool,
    ) -> Result<Run, ClientError>;

    async fn cancel_run(&self, run: &RunId) -> Result<Run, ClientError>;
}

#[async_trait]
pub trait WorkspaceClient: Send + Sync {
    async fn get_workspace(&self, workspace: &WorkspaceId) -> Result<Workspace, ClientError>;
}

#[async_trait]
pub trait VariablesClient: Send + Sync {
    async fn list_effective_variables(&self, run: &RunId) -> Result<Vec<Variable>, ClientError>;
}

#[async_trait]
pub trait StateClient: Send + Sync {
    /// Current state of the workspace; `None` when it has no state yet
    async fn download_current(
        &self,
        workspace: &WorkspaceId,
    ) -> Result<Option<Vec<u8>>, ClientError>;

    async fn create_state_version(
        &self,
        workspace: &WorkspaceId,
        serial: i64,
        state: Vec<u8>,
    ) -> Result<(), ClientError>;
}

#[async_trait]
pub trait ConfigClient: Send + Sync {
    /// Gzipped tarball of a configuration version
    async fn download_config(&self, config_version: &str) -> Result<Vec<u8>, ClientError>;
}

/// Every client an operation needs, as one object
pub trait Remote: RunClient + WorkspaceClient + VariablesClient + StateClient + ConfigClient {}

impl<T> Remote for T where
    T: RunClient + WorkspaceClient + VariablesClient + StateClient + ConfigClient
{
}

/// Run status after a phase starts
pub fn started_status(phase: Phase) -> RunStatus {
    match phase {
        Phase::Plan => RunStatus::Planning,
        Phase::Apply => RunStatus::Applying,
    }
}

/// Run status after a phase finishes
pub fn finished_status(phase: Phase, errored: bool) -> RunStatus {
    match (phase, errored) {
        (_, true) => RunStatus::Errored,
        (Phase::Plan, false) => RunStatus::Planned,
        (Phase::Apply, false) => RunStatus::Applied,
    }
}
