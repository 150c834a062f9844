// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Agent tokens: long-lived credentials for pool runner registration

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::id::{AgentTokenId, PoolId};
use crate::pool::Pool;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AgentTokenError {
    #[error("agent token description cannot be empty")]
    EmptyDescription,
}

/// Record backing an agent token. The bearer string itself is never
/// stored; it is a signed reference to this record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentToken {
    pub id: AgentTokenId,
    pub description: String,
    pub pool_id: PoolId,
    pub organization: String,
    pub created_at: DateTime<Utc>,
}

impl AgentToken {
    pub fn new(
        id: AgentTokenId,
        pool: &Pool,
        description: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<Self, AgentTokenError> {
        let description = description.into();
        if description.trim().is_empty() {
            return Err(AgentTokenError::EmptyDescription);
        }
        Ok(Self {
            id,
            description,
            pool_id: pool.id.clone(),
            organization: pool.organization.clone(),
            created_at: now,
        })
    }
}

#[cfg(test)]
#[path = "agent_token_tests.rs"]
mod tests;
