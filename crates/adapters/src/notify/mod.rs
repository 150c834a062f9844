// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Cluster notification bus adapters
//!
//! A bus carries string payloads on named channels to every listener in the
//! cluster. Delivery is best-effort and unordered across channels.

mod store;

pub use store::StoreNotifyAdapter;

// Test support - only compiled for tests or when explicitly requested
#[cfg(any(test, feature = "test-support"))]
mod fake;
#[cfg(any(test, feature = "test-support"))]
pub use fake::{FakeNotifyAdapter, NotifyCall};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::broadcast;

/// Errors from notification operations
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("publish failed: {0}")]
    PublishFailed(String),
    #[error("listen failed: {0}")]
    ListenFailed(String),
}

/// Adapter for the cluster-wide publish/subscribe bus
#[async_trait]
pub trait NotifyAdapter: Clone + Send + Sync + 'static {
    /// Broadcast `payload` on `channel`
    async fn publish(&self, channel: &str, payload: &str) -> Result<(), NotifyError>;

    /// Receive payloads published on `channel` from now on
    async fn listen(&self, channel: &str) -> Result<broadcast::Receiver<String>, NotifyError>;
}
