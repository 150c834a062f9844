// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
// Enable coverage(off) attribute for excluding test infrastructure
#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

//! Adapters for the collaborators of the scheduler

pub mod authz;
pub mod notify;
pub mod remote;
pub mod tool;
pub mod traced;

pub use authz::{AllowAll, Authorizer, AuthzError, OperatorAction};
pub use notify::{NotifyAdapter, NotifyError, StoreNotifyAdapter};
pub use remote::{
    ClientError, ConfigClient, FsRemote, LogChunk, PhaseClient, PlanFormat, Remote, RunClient,
    StateClient, Variable, VariableCategory, VariablesClient, Workspace, WorkspaceClient,
};
pub use tool::{DownloadError, ReleaseDownloader, ToolDownloader};
pub use traced::{TracedNotifyAdapter, TracedToolDownloader};

// Test support - only compiled for tests or when explicitly requested
#[cfg(any(test, feature = "test-support"))]
pub use authz::FakeAuthorizer;
#[cfg(any(test, feature = "test-support"))]
pub use notify::{FakeNotifyAdapter, NotifyCall};
#[cfg(any(test, feature = "test-support"))]
pub use remote::{FakeRemote, RemoteCall};
#[cfg(any(test, feature = "test-support"))]
pub use tool::FakeDownloader;
