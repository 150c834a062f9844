// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! orkd: the single-node ork daemon
//!
//! Owns the store, runs the allocator, manager and signal relay, hosts an
//! embedded server runner and answers control requests on a Unix socket.

pub mod config;
pub mod lifecycle;
pub mod protocol;
pub mod server;

pub use config::{Config, ConfigError, Paths};
pub use lifecycle::{startup, DaemonService, DaemonState, LifecycleError};
pub use protocol::{ProtocolError, Request, Response};
pub use server::{serve, ServerError};
