// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use async_trait::async_trait;
use ork_adapters::{FakeNotifyAdapter, StoreNotifyAdapter};
use ork_core::{FakeClock, Clock, Job, JobStatus, Run};
use std::time::Duration;

async fn started<N: NotifyAdapter>(notify: N) -> (JobSignaler<N>, CancellationToken) {
    started_on(notify, Store::in_memory()).await
}

async fn started_on<N: NotifyAdapter>(
    notify: N,
    store: Store,
) -> (JobSignaler<N>, CancellationToken) {
    let signaler = JobSignaler::new(notify, store);
    let cancel = CancellationToken::new();
    tokio::spawn({
        let signaler = signaler.clone();
        let cancel = cancel.clone();
        async move { signaler.start(cancel).await }
    });
    // Let the relay attach to the channel before publishing.
    tokio::task::yield_now().await;
    tokio::time::sleep(Duration::from_millis(10)).await;
    (signaler, cancel)
}

#[tokio::test]
async fn delivers_to_subscribed_job() {
    let (signaler, _cancel) = started(FakeNotifyAdapter::new()).await;
    let job = JobId::new("job-1");
    let waiter = signaler.subscribe(&job).unwrap();

    signaler.publish(&JobSignal::force(job.clone())).await.unwrap();

    let signal = waiter.wait(&CancellationToken::new()).await.unwrap();
    assert_eq!(signal, JobSignal::force(job));
    assert_eq!(signaler.waiters(), 0);
}

#[tokio::test]
async fn signals_cross_nodes_through_the_store() {
    let store = Store::in_memory();
    let (node_a, _a) = started_on(StoreNotifyAdapter::new(store.clone()), store.clone()).await;
    let (node_b, _b) = started_on(StoreNotifyAdapter::new(store.clone()), store).await;
    let job = JobId::new("job-1");
    let waiter = node_b.subscribe(&job).unwrap();

    node_a.publish(&JobSignal::graceful(job.clone())).await.unwrap();

    let signal = waiter.wait(&CancellationToken::new()).await.unwrap();
    assert!(!signal.force);
}

#[tokio::test]
async fn unrelated_signal_is_not_delivered() {
    let (signaler, _cancel) = started(FakeNotifyAdapter::new()).await;
    let waiter = signaler.subscribe(&JobId::new("job-1")).unwrap();

    signaler
        .publish(&JobSignal::graceful(JobId::new("job-2")))
        .await
        .unwrap();

    let cancel = CancellationToken::new();
    cancel.cancel();
    assert!(matches!(waiter.wait(&cancel).await, Err(SignalError::Canceled)));
}

#[tokio::test]
async fn canceled_wait_returns_reason_and_retires_waiter() {
    let signaler = JobSignaler::new(FakeNotifyAdapter::new(), Store::in_memory());
    let job = JobId::new("job-1");
    let waiter = signaler.subscribe(&job).unwrap();
    let cancel = CancellationToken::new();
    cancel.cancel();

    assert!(matches!(waiter.wait(&cancel).await, Err(SignalError::Canceled)));
    assert_eq!(signaler.waiters(), 0);
    // The job can subscribe again afterwards.
    assert!(signaler.subscribe(&job).is_ok());
}

#[tokio::test]
async fn second_subscription_is_refused() {
    let signaler = JobSignaler::new(FakeNotifyAdapter::new(), Store::in_memory());
    let job = JobId::new("job-1");
    let _waiter = signaler.subscribe(&job).unwrap();
    assert!(matches!(
        signaler.subscribe(&job),
        Err(SignalError::AlreadySubscribed(_))
    ));
}

#[tokio::test]
async fn signal_without_waiter_is_dropped() {
    let (signaler, _cancel) = started(FakeNotifyAdapter::new()).await;
    let job = JobId::new("job-1");
    signaler.publish(&JobSignal::force(job.clone())).await.unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;

    // A later subscription does not see the earlier signal.
    let waiter = signaler.subscribe(&job).unwrap();
    let cancel = CancellationToken::new();
    let result = tokio::time::timeout(Duration::from_millis(50), waiter.wait(&cancel)).await;
    assert!(result.is_err());
}

#[test]
fn malformed_payload_is_ignored() {
    let signaler = JobSignaler::new(FakeNotifyAdapter::new(), Store::in_memory());
    let _waiter = signaler.subscribe(&JobId::new("job-1")).unwrap();
    signaler.relay("{not json");
    assert_eq!(signaler.waiters(), 1);
}

/// Bus that buffers a single payload per listener
#[derive(Clone)]
struct NarrowBus {
    tx: broadcast::Sender<String>,
}

impl NarrowBus {
    fn new() -> Self {
        Self {
            tx: broadcast::channel(1).0,
        }
    }
}

#[async_trait]
impl NotifyAdapter for NarrowBus {
    async fn publish(&self, _channel: &str, payload: &str) -> Result<(), NotifyError> {
        let _ = self.tx.send(payload.to_string());
        Ok(())
    }

    async fn listen(&self, _channel: &str) -> Result<broadcast::Receiver<String>, NotifyError> {
        Ok(self.tx.subscribe())
    }
}

fn payload(signal: &JobSignal) -> String {
    serde_json::to_string(signal).unwrap()
}

#[tokio::test]
async fn lagging_relay_redelivers_pending_force_signal() {
    let store = Store::in_memory();
    let mut job = Job::new(
        JobId::new("job-1"),
        &Run::new("run-1", "acme", "ws-1"),
        FakeClock::new().now(),
    );
    job.status = JobStatus::Canceled;
    job.signaled = Some(true);
    store.insert(job.clone()).unwrap();
    let bus = NarrowBus::new();
    let (signaler, _cancel) = started_on(bus.clone(), store).await;
    let waiter = signaler.subscribe(&job.id).unwrap();

    // The relay is parked, so all but the last payload are skipped.
    bus.tx.send(payload(&JobSignal::force(job.id.clone()))).unwrap();
    for other in ["job-2", "job-3", "job-4"] {
        bus.tx
            .send(payload(&JobSignal::graceful(JobId::new(other))))
            .unwrap();
    }

    let signal = tokio::time::timeout(
        Duration::from_secs(1),
        waiter.wait(&CancellationToken::new()),
    )
    .await
    .unwrap()
    .unwrap();
    assert_eq!(signal, JobSignal::force(job.id));
}

#[tokio::test]
async fn lag_leaves_waiters_without_pending_signal() {
    let store = Store::in_memory();
    let job = Job::new(
        JobId::new("job-1"),
        &Run::new("run-1", "acme", "ws-1"),
        FakeClock::new().now(),
    );
    store.insert(job.clone()).unwrap();
    let bus = NarrowBus::new();
    let (signaler, _cancel) = started_on(bus.clone(), store).await;
    let _waiter = signaler.subscribe(&job.id).unwrap();

    for other in ["job-2", "job-3", "job-4"] {
        bus.tx
            .send(payload(&JobSignal::graceful(JobId::new(other))))
            .unwrap();
    }
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(signaler.waiters(), 1);
}
