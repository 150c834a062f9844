// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Job Signaler: relays cancellation signals to in-flight executions
//!
//! Every node listens on the shared [`JOB_SIGNAL_CHANNEL`] and hands each
//! signal to the local waiter for that job, if there is one. A waiter is
//! retired as soon as it receives a signal; signals with no waiter are
//! dropped.
//!
//! When the relay falls behind the bus and skips payloads, it re-reads the
//! job record of every local waiter and delivers the signal still pending
//! there, so a skipped force signal still reaches its execution.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use ork_adapters::{NotifyAdapter, NotifyError};
use ork_core::{JobId, JobSignal, JOB_SIGNAL_CHANNEL};
use ork_storage::Store;
use thiserror::Error;
use tokio::sync::{broadcast, oneshot};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Error)]
pub enum SignalError {
    #[error("job {0} already has a signal waiter")]
    AlreadySubscribed(JobId),

    #[error("signal wait canceled")]
    Canceled,

    #[error("signal relay stopped")]
    RelayStopped,

    #[error("encoding signal: {0}")]
    Encode(#[from] serde_json::Error),

    #[error(transparent)]
    Notify(#[from] NotifyError),
}

struct Slot {
    generation: u64,
    tx: oneshot::Sender<JobSignal>,
}

type Slots = Arc<Mutex<HashMap<JobId, Slot>>>;

#[derive(Clone)]
pub struct JobSignaler<N> {
    notify: N,
    store: Store,
    slots: Slots,
    generation: Arc<AtomicU64>,
}

impl<N: NotifyAdapter> JobSignaler<N> {
    pub fn new(notify: N, store: Store) -> Self {
        Self {
            notify,
            store,
            slots: Arc::new(Mutex::new(HashMap::new())),
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Relay signals from the bus to local waiters until `cancel` fires
    pub async fn start(&self, cancel: CancellationToken) -> Result<(), SignalError> {
        let mut rx = self.notify.listen(JOB_SIGNAL_CHANNEL).await?;
        tracing::info!("job signaler started");
        loop {
            let payload = tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                payload = rx.recv() => payload,
            };
            match payload {
                Ok(payload) => self.relay(&payload),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(skipped = n, "job signal relay lagged");
                    self.redeliver_pending();
                }
                Err(broadcast::error::RecvError::Closed) => return Err(SignalError::RelayStopped),
            }
        }
    }

    fn relay(&self, payload: &str) {
        let signal: JobSignal = match serde_json::from_str(payload) {
            Ok(signal) => signal,
            Err(e) => {
                tracing::warn!(error = %e, payload, "discarding malformed job signal");
                return;
            }
        };
        self.deliver(signal);
    }

    /// Deliver the signals still recorded on the jobs of local waiters
    fn redeliver_pending(&self) {
        let waiting: Vec<JobId> = self
            .slots
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect();
        for job_id in waiting {
            let force = match self.store.get_job(&job_id) {
                Ok(job) => job.signaled,
                Err(e) => {
                    tracing::trace!(%job_id, error = %e, "no job record for waiter");
                    continue;
                }
            };
            match force {
                Some(true) => self.deliver(JobSignal::force(job_id)),
                Some(false) => self.deliver(JobSignal::graceful(job_id)),
                None => {}
            }
        }
    }

    fn deliver(&self, signal: JobSignal) {
        let slot = self
            .slots
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&signal.job_id);
        match slot {
            Some(slot) => {
                tracing::debug!(job_id = %signal.job_id, force = signal.force, "delivering job signal");
                let _ = slot.tx.send(signal);
            }
            None => tracing::trace!(job_id = %signal.job_id, "no local waiter for job signal"),
        }
    }

    /// Register the waiter for a job's next signal
    pub fn subscribe(&self, job: &JobId) -> Result<SignalWaiter, SignalError> {
        let (tx, rx) = oneshot::channel();
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        // A waiter whose receiver is gone is stale and may be replaced.
        if slots.get(job).is_some_and(|slot| !slot.tx.is_closed()) {
            return Err(SignalError::AlreadySubscribed(job.clone()));
        }
        slots.insert(job.clone(), Slot { generation, tx });
        Ok(SignalWaiter {
            job_id: job.clone(),
            generation,
            rx: Some(rx),
            slots: Arc::clone(&self.slots),
        })
    }

    /// Broadcast a signal to every node
    pub async fn publish(&self, signal: &JobSignal) -> Result<(), SignalError> {
        let payload = serde_json::to_string(signal)?;
        self.notify.publish(JOB_SIGNAL_CHANNEL, &payload).await?;
        Ok(())
    }

    /// Number of jobs with a live waiter on this node
    pub fn waiters(&self) -> usize {
        self.slots.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

/// One-shot accessor for a job's next signal. Dropping it retires the
/// subscription.
pub struct SignalWaiter {
    job_id: JobId,
    generation: u64,
    rx: Option<oneshot::Receiver<JobSignal>>,
    slots: Slots,
}

impl SignalWaiter {
    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    /// Block until the signal arrives or `cancel` fires
    pub async fn wait(mut self, cancel: &CancellationToken) -> Result<JobSignal, SignalError> {
        let Some(rx) = self.rx.take() else {
            return Err(SignalError::RelayStopped);
        };
        tokio::select! {
            _ = cancel.cancelled() => Err(SignalError::Canceled),
            signal = rx => signal.map_err(|_| SignalError::RelayStopped),
        }
    }
}

impl Drop for SignalWaiter {
    fn drop(&mut self) {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        if slots
            .get(&self.job_id)
            .is_some_and(|slot| slot.generation == self.generation)
        {
            slots.remove(&self.job_id);
        }
    }
}

#[cfg(test)]
#[path = "signaler_tests.rs"]
mod tests;
