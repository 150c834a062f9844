// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Error types for the scheduling service

use ork_adapters::{AuthzError, ClientError, NotifyError};
use ork_core::{
    AccessError, AgentTokenError, JobError, JobId, PoolError, RunnerError, RunnerId,
};
use ork_storage::StoreError;
use thiserror::Error;

use crate::signaler::SignalError;
use crate::tokens::TokenError;

/// Errors returned by service operations
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Job(#[from] JobError),

    #[error(transparent)]
    Runner(#[from] RunnerError),

    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error(transparent)]
    AgentToken(#[from] AgentTokenError),

    #[error(transparent)]
    Access(#[from] AccessError),

    #[error(transparent)]
    Authz(#[from] AuthzError),

    #[error("job {job} is not allocated to runner {runner}")]
    NotAllocatedTo { job: JobId, runner: RunnerId },

    #[error("job is not running: {0}")]
    JobNotRunning(JobId),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Client(#[from] ClientError),

    #[error(transparent)]
    Notify(#[from] NotifyError),

    #[error(transparent)]
    Signal(#[from] SignalError),

    #[error(transparent)]
    Token(#[from] TokenError),

    #[error("canceled")]
    Canceled,
}

impl ServiceError {
    /// Whether the request conflicts with the current state of a resource.
    /// API layers map these to a conflict response.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            ServiceError::Job(_)
                | ServiceError::Runner(RunnerError::InvalidStateTransition { .. })
                | ServiceError::Pool(PoolError::AssignedWorkspaces(_))
                | ServiceError::Store(StoreError::AlreadyExists { .. })
        )
    }

    pub fn is_not_found(&self) -> bool {
        match self {
            ServiceError::Store(e) => e.is_not_found(),
            ServiceError::Client(e) => e.is_not_found(),
            _ => false,
        }
    }

    pub fn is_access_denied(&self) -> bool {
        matches!(
            self,
            ServiceError::Access(_)
                | ServiceError::Authz(_)
                | ServiceError::NotAllocatedTo { .. }
                | ServiceError::JobNotRunning(_)
                | ServiceError::Token(_)
        )
    }
}
