// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Notification bus backed by the store's notification channels

use async_trait::async_trait;
use ork_storage::Store;
use tokio::sync::broadcast;

use super::{NotifyAdapter, NotifyError};

/// Publishes through the shared store so every node attached to it hears
/// the payload.
#[derive(Clone, Debug)]
pub struct StoreNotifyAdapter {
    store: Store,
}

impl StoreNotifyAdapter {
    pub fn new(store: Store) -> Self {
        Self { store }
    }
}

#[async_trait]
impl NotifyAdapter for StoreNotifyAdapter {
    async fn publish(&self, channel: &str, payload: &str) -> Result<(), NotifyError> {
        let listeners = self.store.notify(channel, payload.to_string());
        tracing::trace!(channel, listeners, "published notification");
        Ok(())
    }

    async fn listen(&self, channel: &str) -> Result<broadcast::Receiver<String>, NotifyError> {
        Ok(self.store.listen(channel))
    }
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
