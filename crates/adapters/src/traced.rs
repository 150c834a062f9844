// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Traced adapter wrappers for consistent observability

use std::path::PathBuf;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::Instrument;

use crate::notify::{NotifyAdapter, NotifyError};
use crate::tool::{DownloadError, ToolDownloader};

/// Wrapper that adds tracing to any NotifyAdapter
#[derive(Clone)]
pub struct TracedNotifyAdapter<N> {
    inner: N,
}

impl<N> TracedNotifyAdapter<N> {
    pub fn new(inner: N) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<N: NotifyAdapter> NotifyAdapter for TracedNotifyAdapter<N> {
    async fn publish(&self, channel: &str, payload: &str) -> Result<(), NotifyError> {
        let span = tracing::info_span!("notify.publish", channel);
        async {
            tracing::debug!(payload_len = payload.len(), "publishing");
            let result = self.inner.publish(channel, payload).await;
            match &result {
                Ok(()) => tracing::debug!("published"),
                Err(e) => tracing::error!(error = %e, "publish failed"),
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn listen(&self, channel: &str) -> Result<broadcast::Receiver<String>, NotifyError> {
        let span = tracing::info_span!("notify.listen", channel);
        async {
            let result = self.inner.listen(channel).await;
            match &result {
                Ok(_) => tracing::info!("listening"),
                Err(e) => tracing::error!(error = %e, "listen failed"),
            }
            result
        }
        .instrument(span)
        .await
    }
}

/// Wrapper that adds tracing to any ToolDownloader
#[derive(Clone)]
pub struct TracedToolDownloader<D> {
    inner: D,
}

impl<D> TracedToolDownloader<D> {
    pub fn new(inner: D) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<D: ToolDownloader> ToolDownloader for TracedToolDownloader<D> {
    async fn download(&self, version: &str) -> Result<PathBuf, DownloadError> {
        let span = tracing::info_span!("tool.download", version);
        async {
            let start = std::time::Instant::now();
            let result = self.inner.download(version).await;
            let elapsed = start.elapsed();

            match &result {
                Ok(path) => tracing::info!(
                    path = %path.display(),
                    elapsed_ms = elapsed.as_millis() as u64,
                    "engine ready"
                ),
                Err(e) => tracing::error!(
                    elapsed_ms = elapsed.as_millis() as u64,
                    error = %e,
                    "download failed"
                ),
            }
            result
        }
        .instrument(span)
        .await
    }
}

#[cfg(test)]
#[path = "traced_tests.rs"]
mod tests;
