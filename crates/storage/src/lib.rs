// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! ork-storage: durable job, runner, pool and agent token records
//!
//! Provides the row-locked [`Store`], its change streams and notification
//! channels, backed by a JSON-lines write-ahead log.

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

mod state;
mod store;
mod wal;

pub use state::MaterializedState;
pub use store::{Record, RowGuard, RowKey, Store, StoreError};
pub use wal::{Wal, WalError};
