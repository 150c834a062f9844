// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Streaming operation output to the run's phase log

use std::sync::Arc;

use ork_adapters::{LogChunk, Remote};
use ork_core::{Phase, RunId};
use tokio::sync::Mutex;

/// Shared writer for one phase log. Chunks are sent as they arrive; a
/// failed send is logged and the output continues.
#[derive(Clone)]
pub struct PhaseOutput {
    inner: Arc<Mutex<PhaseWriter>>,
}

struct PhaseWriter {
    remote: Arc<dyn Remote>,
    run: RunId,
    phase: Phase,
    offset: usize,
    started: bool,
    closed: bool,
}

impl PhaseOutput {
    pub fn new(remote: Arc<dyn Remote>, run: RunId, phase: Phase) -> Self {
        Self {
            inner: Arc::new(Mutex::new(PhaseWriter {
                remote,
                run,
                phase,
                offset: 0,
                started: false,
                closed: false,
            })),
        }
    }

    pub async fn write(&self, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        let mut writer = self.inner.lock().await;
        if writer.closed {
            return;
        }
        writer.send(data.to_vec(), false).await;
    }

    pub async fn line(&self, line: impl AsRef<str>) {
        self.write(format!("{}\n", line.as_ref()).as_bytes()).await;
    }

    /// Mark the end of the log
    pub async fn close(&self) {
        let mut writer = self.inner.lock().await;
        if writer.closed {
            return;
        }
        writer.send(Vec::new(), true).await;
        writer.closed = true;
    }
}

impl PhaseWriter {
    async fn send(&mut self, data: Vec<u8>, end: bool) {
        let len = data.len();
        let chunk = LogChunk {
            run_id: self.run.clone(),
            phase: self.phase,
            offset: self.offset,
            data,
            start: !self.started,
            end,
        };
        if let Err(e) = self.remote.put_chunk(chunk).await {
            tracing::warn!(run_id = %self.run, phase = %self.phase, error = %e, "dropped output chunk");
        }
        self.started = true;
        self.offset += len;
    }
}

#[cfg(test)]
#[path = "output_tests.rs"]
mod tests;
