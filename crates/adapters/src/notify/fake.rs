// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Fake notification adapter for testing
#![cfg_attr(coverage_nightly, coverage(off))]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::broadcast;

use super::{NotifyAdapter, NotifyError};

/// Recorded publish
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotifyCall {
    pub channel: String,
    pub payload: String,
}

#[derive(Default)]
struct FakeNotifyState {
    calls: Vec<NotifyCall>,
    channels: HashMap<String, broadcast::Sender<String>>,
    fail_publish: bool,
}

/// In-process bus that records every publish and delivers it to local
/// listeners
#[derive(Clone, Default)]
pub struct FakeNotifyAdapter {
    inner: Arc<Mutex<FakeNotifyState>>,
}

impl FakeNotifyAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get all recorded publishes
    pub fn calls(&self) -> Vec<NotifyCall> {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .calls
            .clone()
    }

    /// Make subsequent publishes fail
    pub fn fail_publish(&self, fail: bool) {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .fail_publish = fail;
    }
}

#[async_trait]
impl NotifyAdapter for FakeNotifyAdapter {
    async fn publish(&self, channel: &str, payload: &str) -> Result<(), NotifyError> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if inner.fail_publish {
            return Err(NotifyError::PublishFailed("injected failure".into()));
        }
        inner.calls.push(NotifyCall {
            channel: channel.to_string(),
            payload: payload.to_string(),
        });
        if let Some(tx) = inner.channels.get(channel) {
            let _ = tx.send(payload.to_string());
        }
        Ok(())
    }

    async fn listen(&self, channel: &str) -> Result<broadcast::Receiver<String>, NotifyError> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        Ok(inner
            .channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(64).0)
            .subscribe())
    }
}

#[cfg(test)]
#[path = "fake_tests.rs"]
mod tests;
