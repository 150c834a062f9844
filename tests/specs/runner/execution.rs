// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Runner execution specs
//!
//! Verify runner daemons execute allocated jobs end to end and report
//! their outcome to the run.

use ork_adapters::PlanFormat;

use crate::prelude::*;

#[tokio::test]
async fn plan_then_apply_on_server_runner() {
    let world = World::new();
    let bin = tempfile::tempdir().unwrap();
    world.start_allocator();
    world.start_daemon(bin.path(), 2);
    let run = world.seed_run("run-1", vec![Variable::terraform("region", "eu-west-1")]);

    let plan = world.job(run.clone()).await;
    eventually("plan to finish", || {
        world.job_state(&plan).status == JobStatus::Finished
    })
    .await;
    assert_eq!(world.remote.run(&run.id).unwrap().status, RunStatus::Planned);
    assert_eq!(
        world.remote.plan_file(&run.id, PlanFormat::Binary).unwrap(),
        b"binary plan\n"
    );
    assert!(world.remote.lock_file(&run.id).is_some());

    let apply = world
        .job(world.remote.run(&run.id).unwrap().with_status(RunStatus::ApplyQueued))
        .await;
    assert_eq!(apply.spec.phase, Phase::Apply);
    eventually("apply to finish", || {
        world.job_state(&apply).status == JobStatus::Finished
    })
    .await;
    assert_eq!(world.remote.run(&run.id).unwrap().status, RunStatus::Applied);
    let versions = world.remote.state_versions();
    assert_eq!(versions.len(), 1);
    assert_eq!(versions[0].1, 3);
    assert!(world
        .remote
        .output(&run.id, Phase::Apply)
        .contains("engine apply"));
}

#[tokio::test]
async fn agent_runner_serves_its_pool() {
    let world = World::new();
    let bin = tempfile::tempdir().unwrap();
    world.authz.grant("admin", "acme");
    let admin = Subject::Operator("admin".to_string());
    let pool = world
        .service
        .create_pool(
            &admin,
            CreatePoolOptions {
                name: "builders".to_string(),
                organization: "acme".to_string(),
                ..Default::default()
            },
        )
        .unwrap();
    let (_, bearer) = world
        .service
        .create_agent_token(&admin, &pool.id, "ci agent")
        .unwrap();
    world.start_allocator();

    let agent = RunnerDaemon::new(
        LocalRunnerClient::with_agent_token(world.service.clone(), &bearer).unwrap(),
        Arc::new(world.remote.clone()),
        Arc::new(FakeDownloader::new(write_engine(bin.path()))),
        DaemonConfig::default()
            .with_name("agent-1")
            .with_heartbeat_interval(Duration::from_millis(20))
            .with_backoff(fast_backoff()),
    );
    let cancel = world.cancel_token();
    tokio::spawn(async move { agent.run(cancel).await });
    let runner = world.registered().await;
    assert_eq!(runner.pool_id(), Some(&pool.id));

    let run = world
        .seed_run("run-1", vec![])
        .with_pool(pool.id.clone());
    let job = world.job(run).await;

    eventually("pooled job to finish", || {
        world.job_state(&job).status == JobStatus::Finished
    })
    .await;
    assert_eq!(world.job_state(&job).runner_id, Some(runner.id));
}

#[tokio::test]
async fn busy_runner_takes_no_more_than_max_jobs() {
    let world = World::new();
    let bin = tempfile::tempdir().unwrap();
    world.start_allocator();
    world.start_daemon(bin.path(), 1);
    let runner = world.registered().await;

    let first = world
        .job(world.seed_run("run-1", vec![Variable::env("SLOW", "1")]))
        .await;
    eventually("first job to run", || {
        world.job_state(&first).status == JobStatus::Running
    })
    .await;
    let second = world.job(world.seed_run("run-2", vec![])).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(world.job_state(&second).status, JobStatus::Unallocated);
    assert_eq!(world.runner_state(&runner).current_jobs, 1);
}

#[tokio::test]
async fn shutdown_interrupts_operations_and_exits() {
    let world = World::new();
    let bin = tempfile::tempdir().unwrap();
    world.start_allocator();
    let (cancel, task) = world.start_daemon(bin.path(), 1);
    let runner = world.registered().await;
    let job = world
        .job(world.seed_run("run-1", vec![Variable::env("SLOW", "1")]))
        .await;
    eventually("engine to start", || {
        world
            .remote
            .output(&job.spec.run_id, Phase::Plan)
            .contains("engine plan")
    })
    .await;

    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(10), task)
        .await
        .unwrap()
        .unwrap()
        .unwrap();

    assert_eq!(world.job_state(&job).status, JobStatus::Canceled);
    assert_eq!(world.runner_state(&runner).status, RunnerStatus::Exited);
}
