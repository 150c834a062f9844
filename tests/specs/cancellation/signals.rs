// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Cancellation specs
//!
//! Verify run cancellation reaches the job on the server and the engine
//! process on the runner.

use crate::prelude::*;

/// A runner daemon executing a plan that runs until interrupted
async fn slow_plan(world: &World, bin: &tempfile::TempDir) -> (RunnerMeta, Job) {
    world.start_signaler().await;
    world.start_allocator();
    world.start_daemon(bin.path(), 1);
    let runner = world.registered().await;
    let run = world.seed_run("run-1", vec![Variable::env("SLOW", "1")]);
    let job = world.job(run).await;
    eventually("engine to start planning", || {
        world
            .remote
            .output(&job.spec.run_id, Phase::Plan)
            .contains("engine plan")
    })
    .await;
    eventually("runner to report busy", || {
        world.runner_state(&runner).status == RunnerStatus::Busy
    })
    .await;
    (runner, job)
}

#[tokio::test]
async fn force_cancel_kills_the_engine() {
    let world = World::new();
    let bin = tempfile::tempdir().unwrap();
    let (runner, job) = slow_plan(&world, &bin).await;
    assert_eq!(world.job_state(&job).status, JobStatus::Running);

    let mut run = world.remote.run(&job.spec.run_id).unwrap();
    run.status = RunStatus::ForceCanceled;
    world.remote.add_run(run.clone());
    let canceled = world.service.cancel_job(&run).await.unwrap().unwrap();

    assert_eq!(canceled.status, JobStatus::Canceled);
    assert_eq!(canceled.signaled, Some(true));
    assert_eq!(world.published_signals(), vec![JobSignal::force(job.id.clone())]);
    eventually("runner to go idle", || {
        world.runner_state(&runner).status == RunnerStatus::Idle
    })
    .await;
    // Killed, not interrupted, and the abandoned operation reports nothing
    assert!(!world
        .remote
        .output(&job.spec.run_id, Phase::Plan)
        .contains("interrupted"));
    assert_eq!(world.job_state(&job).status, JobStatus::Canceled);
    assert_eq!(
        world.remote.run(&job.spec.run_id).unwrap().status,
        RunStatus::ForceCanceled
    );
}

#[tokio::test]
async fn graceful_cancel_interrupts_the_engine() {
    let world = World::new();
    let bin = tempfile::tempdir().unwrap();
    let (_runner, job) = slow_plan(&world, &bin).await;

    let run = world
        .remote
        .run(&job.spec.run_id)
        .unwrap()
        .with_cancel_signaled_at(world.clock.now());
    let signaled = world.service.cancel_job(&run).await.unwrap().unwrap();
    assert_eq!(signaled.status, JobStatus::Running);
    assert_eq!(signaled.signaled, Some(false));

    eventually("job to be canceled", || {
        world.job_state(&job).status == JobStatus::Canceled
    })
    .await;
    assert!(world
        .remote
        .output(&job.spec.run_id, Phase::Plan)
        .contains("interrupted"));
    assert_eq!(
        world.remote.run(&job.spec.run_id).unwrap().status,
        RunStatus::Canceled
    );
    assert_eq!(
        world.published_signals(),
        vec![JobSignal::graceful(job.id.clone())]
    );
}

#[tokio::test]
async fn cancel_before_allocation_needs_no_signal() {
    let world = World::new();
    let job = world.job(Run::new("run-1", "acme", "ws-1")).await;

    let run = world
        .remote
        .run(&job.spec.run_id)
        .unwrap()
        .with_status(RunStatus::Canceled);
    let canceled = world.service.cancel_job(&run).await.unwrap().unwrap();

    assert_eq!(canceled.status, JobStatus::Canceled);
    assert_eq!(canceled.signaled, None);
    assert!(world.published_signals().is_empty());
}

#[tokio::test]
async fn signal_for_pending_run_is_a_conflict() {
    let world = World::new();
    let job = world.job(Run::new("run-1", "acme", "ws-1")).await;

    let run = world
        .remote
        .run(&job.spec.run_id)
        .unwrap()
        .with_status(RunStatus::Planning)
        .with_cancel_signaled_at(world.clock.now());
    let err = world.service.cancel_job(&run).await.unwrap_err();

    assert!(err.is_conflict());
    assert_eq!(world.job_state(&job).status, JobStatus::Unallocated);
}
