// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Allocation specs
//!
//! Verify the allocator loop places, moves and releases jobs as runners
//! come and go.

use crate::prelude::*;

#[tokio::test]
async fn idle_runner_receives_unallocated_job() {
    let world = World::new();
    let runner = world.runner(1).await;
    let job = world.job(Run::new("run-1", "acme", "ws-1")).await;

    world.start_allocator();

    eventually("job to be allocated", || {
        world.job_state(&job).status == JobStatus::Allocated
    })
    .await;
    assert_eq!(world.job_state(&job).runner_id, Some(runner.id.clone()));
    assert_eq!(world.runner_state(&runner).current_jobs, 1);
}

#[tokio::test]
async fn job_moves_off_runner_that_went_unknown() {
    let world = World::new();
    let first = world.runner(1).await;
    let job = world.job(Run::new("run-1", "acme", "ws-1")).await;
    world.start_allocator();
    eventually("job to be allocated", || {
        world.job_state(&job).runner_id.as_ref() == Some(&first.id)
    })
    .await;

    // The first runner stops pinging; a second one registers afterwards
    world.clock.advance(Duration::from_secs(31));
    let second = world.runner(1).await;
    Manager::new(
        world.service.clone(),
        world.clock.clone(),
        ManagerConfig::default(),
    )
    .reconcile()
    .await;
    assert_eq!(world.runner_state(&first).status, RunnerStatus::Unknown);

    eventually("job to be reallocated", || {
        world.job_state(&job).runner_id.as_ref() == Some(&second.id)
    })
    .await;
    assert_eq!(world.job_state(&job).status, JobStatus::Allocated);
    assert_eq!(world.runner_state(&first).current_jobs, 0);
    assert_eq!(world.runner_state(&second).current_jobs, 1);
}

#[tokio::test]
async fn finished_job_frees_runner_capacity() {
    let world = World::new();
    let runner = world.runner(1).await;
    let first = world.job(Run::new("run-1", "acme", "ws-1")).await;
    world.clock.advance(Duration::from_secs(1));
    let second = world.job(Run::new("run-2", "acme", "ws-1")).await;
    world.start_allocator();
    eventually("first job to be allocated", || {
        world.job_state(&first).status == JobStatus::Allocated
    })
    .await;
    assert_eq!(world.job_state(&second).status, JobStatus::Unallocated);

    let subject = Subject::Runner(world.runner_state(&runner));
    world.service.start_job(&subject, &first.spec).await.unwrap();
    world
        .service
        .finish_job(
            &Subject::Job(world.job_state(&first)),
            &first.spec,
            JobStatus::Finished,
            None,
        )
        .await
        .unwrap();

    eventually("second job to take the freed slot", || {
        world.job_state(&second).status == JobStatus::Allocated
    })
    .await;
    assert_eq!(world.job_state(&second).runner_id, Some(runner.id.clone()));
    assert_eq!(world.runner_state(&runner).current_jobs, 1);
    assert_eq!(
        world.remote.run(&first.spec.run_id).unwrap().status,
        RunStatus::Planned
    );
}

#[tokio::test]
async fn jobs_wait_until_a_runner_registers() {
    let world = World::new();
    let job = world.job(Run::new("run-1", "acme", "ws-1")).await;
    world.start_allocator();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(world.job_state(&job).status, JobStatus::Unallocated);

    let runner = world.runner(5).await;

    eventually("job to be allocated", || {
        world.job_state(&job).runner_id.as_ref() == Some(&runner.id)
    })
    .await;
}

#[tokio::test]
async fn pooled_job_ignores_server_runners() {
    let world = World::new();
    world.runner(5).await;
    let job = world
        .job(Run::new("run-1", "acme", "ws-1").with_pool("apool-1"))
        .await;
    world.start_allocator();

    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(world.job_state(&job).status, JobStatus::Unallocated);
}
