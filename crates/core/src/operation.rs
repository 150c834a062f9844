// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Operations for the write-ahead log

use serde::{Deserialize, Serialize};

use crate::agent_token::AgentToken;
use crate::id::{AgentTokenId, JobId, PoolId, RunnerId};
use crate::job::Job;
use crate::pool::Pool;
use crate::runner::RunnerMeta;

/// Operations that can be persisted to the WAL. Records are written whole
/// so replay is a plain upsert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operation {
    /// Create or replace a job
    JobPut(Job),

    /// Delete a job (its run was deleted)
    JobDelete { id: JobId },

    /// Create or replace a runner
    RunnerPut(RunnerMeta),

    /// Delete a runner
    RunnerDelete { id: RunnerId },

    /// Create or replace a pool
    PoolPut(Pool),

    /// Delete a pool
    PoolDelete { id: PoolId },

    /// Create an agent token record
    AgentTokenPut(AgentToken),

    /// Delete an agent token record
    AgentTokenDelete { id: AgentTokenId },
}

#[cfg(test)]
#[path = "operation_tests.rs"]
mod tests;
