// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Agent pools: organization-scoped groups of agent runners

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::id::{PoolId, WorkspaceId};
use crate::runner::AgentPoolSummary;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PoolError {
    #[error("pool name cannot be empty")]
    EmptyName,

    #[error("workspace {0} is not allowed to use this pool")]
    WorkspaceNotAllowed(WorkspaceId),

    #[error("workspace belongs to organization {workspace} but pool belongs to {pool}")]
    OrganizationMismatch { workspace: String, pool: String },

    #[error("pool is still assigned to {0} workspace(s)")]
    AssignedWorkspaces(usize),
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatePoolOptions {
    pub name: String,
    pub organization: String,
    /// Defaults to true: every workspace in the organization may use the pool
    #[serde(default)]
    pub organization_scoped: Option<bool>,
    #[serde(default)]
    pub allowed_workspaces: Vec<WorkspaceId>,
}

/// Partial update; absent fields are left unchanged
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdatePoolOptions {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub organization_scoped: Option<bool>,
    #[serde(default)]
    pub allowed_workspaces: Option<Vec<WorkspaceId>>,
    #[serde(default)]
    pub assigned_workspaces: Option<Vec<WorkspaceId>>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pool {
    pub id: PoolId,
    pub name: String,
    pub organization: String,
    pub organization_scoped: bool,
    pub allowed_workspaces: BTreeSet<WorkspaceId>,
    /// Workspaces configured to run on this pool
    pub assigned_workspaces: BTreeSet<WorkspaceId>,
    pub created_at: DateTime<Utc>,
}

impl Pool {
    pub fn new(id: PoolId, opts: CreatePoolOptions, now: DateTime<Utc>) -> Result<Self, PoolError> {
        if opts.name.trim().is_empty() {
            return Err(PoolError::EmptyName);
        }
        Ok(Self {
            id,
            name: opts.name,
            organization: opts.organization,
            organization_scoped: opts.organization_scoped.unwrap_or(true),
            allowed_workspaces: opts.allowed_workspaces.into_iter().collect(),
            assigned_workspaces: BTreeSet::new(),
            created_at: now,
        })
    }

    /// Whether the workspace may be configured to use this pool
    pub fn allows(&self, workspace: &WorkspaceId) -> bool {
        self.organization_scoped || self.allowed_workspaces.contains(workspace)
    }

    /// Check that a workspace of the given organization may use this pool
    pub fn check_access(&self, organization: &str, workspace: &WorkspaceId) -> Result<(), PoolError> {
        if organization != self.organization {
            return Err(PoolError::OrganizationMismatch {
                workspace: organization.to_string(),
                pool: self.organization.clone(),
            });
        }
        if !self.allows(workspace) {
            return Err(PoolError::WorkspaceNotAllowed(workspace.clone()));
        }
        Ok(())
    }

    /// Apply an update, keeping assigned workspaces within the allow-list
    /// when the pool is not organization-scoped. All-or-nothing.
    pub fn update(&mut self, opts: UpdatePoolOptions) -> Result<(), PoolError> {
        let mut next = self.clone();
        if let Some(name) = opts.name {
            if name.trim().is_empty() {
                return Err(PoolError::EmptyName);
            }
            next.name = name;
        }
        if let Some(scoped) = opts.organization_scoped {
            next.organization_scoped = scoped;
        }
        if let Some(allowed) = opts.allowed_workspaces {
            next.allowed_workspaces = allowed.into_iter().collect();
        }
        if let Some(assigned) = opts.assigned_workspaces {
            next.assigned_workspaces = assigned.into_iter().collect();
        }
        next.validate()?;
        *self = next;
        Ok(())
    }

    /// Record that a workspace now runs on this pool
    pub fn assign(&mut self, workspace: WorkspaceId) -> Result<(), PoolError> {
        if !self.allows(&workspace) {
            return Err(PoolError::WorkspaceNotAllowed(workspace));
        }
        self.assigned_workspaces.insert(workspace);
        Ok(())
    }

    pub fn unassign(&mut self, workspace: &WorkspaceId) {
        self.assigned_workspaces.remove(workspace);
    }

    pub fn check_deletable(&self) -> Result<(), PoolError> {
        if self.assigned_workspaces.is_empty() {
            Ok(())
        } else {
            Err(PoolError::AssignedWorkspaces(self.assigned_workspaces.len()))
        }
    }

    pub fn summary(&self) -> AgentPoolSummary {
        AgentPoolSummary {
            id: self.id.clone(),
            name: self.name.clone(),
            organization: self.organization.clone(),
        }
    }

    fn validate(&self) -> Result<(), PoolError> {
        if self.organization_scoped {
            return Ok(());
        }
        match self
            .assigned_workspaces
            .iter()
            .find(|ws| !self.allowed_workspaces.contains(*ws))
        {
            Some(ws) => Err(PoolError::WorkspaceNotAllowed(ws.clone())),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
#[path = "pool_tests.rs"]
mod tests;
