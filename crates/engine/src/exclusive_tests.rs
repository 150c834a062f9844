// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ork_core::{FakeClock, JobStatus, LeaseOutcome, Run};

use super::*;
use crate::test_support::Harness;

fn holder(name: &str) -> HolderId {
    HolderId::new(name)
}

async fn hold_until_canceled(cancel: CancellationToken) -> Result<(), std::io::Error> {
    cancel.cancelled().await;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn second_holder_waits_for_release() {
    let store = Store::in_memory();
    let clock = FakeClock::new();
    let config = LeaseConfig::new(ALLOCATOR_LEASE);
    let first_cancel = CancellationToken::new();
    let first = tokio::spawn({
        let (store, clock, config, cancel) =
            (store.clone(), clock.clone(), config.clone(), first_cancel.clone());
        async move {
            run_exclusive(&store, &config, &holder("a"), &clock, cancel, hold_until_canceled).await
        }
    });
    tokio::time::sleep(Duration::from_millis(1)).await;

    let ran = Arc::new(AtomicBool::new(false));
    let second = tokio::spawn({
        let (store, clock, config, ran) = (store.clone(), clock.clone(), config.clone(), ran.clone());
        async move {
            run_exclusive(&store, &config, &holder("b"), &clock, CancellationToken::new(), |_| async move {
                ran.store(true, Ordering::SeqCst);
                Ok::<(), std::io::Error>(())
            })
            .await
        }
    });
    tokio::time::sleep(Duration::from_secs(25)).await;
    assert!(!ran.load(Ordering::SeqCst));

    first_cancel.cancel();
    first.await.unwrap().unwrap();
    tokio::time::sleep(Duration::from_secs(11)).await;

    second.await.unwrap().unwrap();
    assert!(ran.load(Ordering::SeqCst));
    assert_eq!(
        store.lease(&config, LeaseInput::Acquire { holder: holder("c") }, &clock),
        LeaseOutcome::Granted
    );
}

#[tokio::test(start_paused = true)]
async fn lost_lease_cancels_work() {
    let store = Store::in_memory();
    let clock = FakeClock::new();
    let config = LeaseConfig::new(MANAGER_LEASE);
    let task = tokio::spawn({
        let (store, clock, config) = (store.clone(), clock.clone(), config.clone());
        async move {
            run_exclusive(
                &store,
                &config,
                &holder("a"),
                &clock,
                CancellationToken::new(),
                hold_until_canceled,
            )
            .await
        }
    });
    tokio::time::sleep(Duration::from_millis(1)).await;

    clock.advance(Duration::from_secs(31));
    let taken = store.lease(&config, LeaseInput::Acquire { holder: holder("b") }, &clock);
    assert_eq!(taken, LeaseOutcome::Reclaimed { previous: holder("a") });
    tokio::time::sleep(Duration::from_secs(11)).await;

    let err = task.await.unwrap().unwrap_err();
    assert!(matches!(err, ExclusiveError::LeaseLost(name) if name == MANAGER_LEASE));
    assert_eq!(
        store.lease(&config, LeaseInput::Heartbeat { holder: holder("b") }, &clock),
        LeaseOutcome::Refreshed
    );
}

#[tokio::test(start_paused = true)]
async fn inner_error_surfaces_and_releases() {
    let store = Store::in_memory();
    let clock = FakeClock::new();
    let config = LeaseConfig::new(ALLOCATOR_LEASE);

    let err = run_exclusive(&store, &config, &holder("a"), &clock, CancellationToken::new(), |_| async {
        Err::<(), _>(std::io::Error::other("boom"))
    })
    .await
    .unwrap_err();

    assert_eq!(err.to_string(), "boom");
    assert_eq!(
        store.lease(&config, LeaseInput::Acquire { holder: holder("b") }, &clock),
        LeaseOutcome::Granted
    );
}

#[tokio::test]
async fn allocator_loop_allocates_under_lease() {
    let h = Harness::new();
    let runner = h.runner(1).await;
    let cancel = CancellationToken::new();
    let ctx = LoopContext::new(h.store.clone(), holder("node-1"), h.clock.clone());
    let task = tokio::spawn({
        let (service, cancel) = (h.service.clone(), cancel.clone());
        async move { allocator_loop(ctx, service, cancel).await }
    });

    let job = h.job(Run::new("run-1", "acme", "ws-1")).await;
    let allocated = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            let job = h.store.get_job(&job.id).unwrap();
            if job.status == JobStatus::Allocated {
                return job;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
    assert_eq!(allocated.runner_id, Some(runner.id));

    cancel.cancel();
    task.await.unwrap();
    assert_eq!(
        h.store.lease(
            &LeaseConfig::new(ALLOCATOR_LEASE),
            LeaseInput::Acquire { holder: holder("node-2") },
            &h.clock
        ),
        LeaseOutcome::Granted
    );
}
