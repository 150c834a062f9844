// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! ork job scheduling and execution
//!
//! The service owns job and runner state. Around it run the allocator and
//! the liveness manager, each under a cluster-wide lease, and any number
//! of runner daemons that execute jobs as operations.

mod allocator;
mod backoff;
mod client;
mod daemon;
mod error;
mod exclusive;
mod manager;
pub mod operation;
mod service;
mod signaler;
mod tokens;

#[cfg(test)]
mod test_support;

pub use allocator::{Allocator, AllocatorError};
pub use backoff::{supervise, Backoff, BackoffConfig};
pub use client::{
    AllocatorClient, JobClient, LocalJobClient, LocalRunnerClient, ManagerClient, RunnerClient,
};
pub use daemon::{DaemonConfig, DaemonError, RunnerDaemon};
pub use error::ServiceError;
pub use exclusive::{
    allocator_loop, manager_loop, run_exclusive, AllocatorLoopError, ExclusiveError,
    LoopContext, ManagerLoopError,
};
pub use manager::{Action, Manager, ManagerConfig, Reconciled};
pub use operation::{Operation, OperationConfig, OperationError, OperationHandle};
pub use service::{Service, ServiceDeps};
pub use signaler::{JobSignaler, SignalError, SignalWaiter};
pub use tokens::{Claims, TokenError, TokenKind, TokenSigner, DEFAULT_TOKEN_EXPIRY};
