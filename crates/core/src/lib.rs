// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! ork-core: data model and state machines for the ork job scheduler
//!
//! This crate provides:
//! - Pure state machines for jobs, runners, pools and leases
//! - Authenticated subjects and their capabilities
//! - Change events and write-ahead log operations
//! - Clock and ID abstractions for deterministic tests

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod clock;
pub mod id;

pub mod agent_token;
pub mod event;
pub mod job;
pub mod lease;
pub mod operation;
pub mod pool;
pub mod run;
pub mod runner;
pub mod signal;
pub mod subject;

pub use agent_token::{AgentToken, AgentTokenError};
pub use clock::{elapsed, Clock, FakeClock, SystemClock};
pub use event::{ChangeEvent, ChangeKind};
pub use id::{
    AgentTokenId, IdGen, JobId, PoolId, RunId, RunnerId, SequentialIdGen, UuidIdGen, WorkspaceId,
};
pub use job::{Job, JobError, JobSpec, JobStatus};
pub use lease::{
    HolderId, Lease, LeaseConfig, LeaseInput, LeaseOutcome, LeaseState, ALLOCATOR_LEASE,
    MANAGER_LEASE,
};
pub use operation::Operation;
pub use pool::{CreatePoolOptions, Pool, PoolError, UpdatePoolOptions};
pub use run::{Phase, Run, RunStatus};
pub use runner::{
    AgentPoolSummary, RegistrationRequest, RunnerError, RunnerMeta, RunnerStatus,
    DEFAULT_MAX_JOBS,
};
pub use signal::{JobSignal, JOB_SIGNAL_CHANNEL};
pub use subject::{AccessError, JobAction, Subject};
