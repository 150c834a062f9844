// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::Duration;

use ork_adapters::RemoteCall;
use ork_core::{
    Clock, Job, JobId, JobSignal, JobSpec, JobStatus, Phase, Run, RunStatus, RunnerMeta,
    Subject, JOB_SIGNAL_CHANNEL,
};
use tokio_util::sync::CancellationToken;
use yare::parameterized;

use crate::error::ServiceError;
use crate::test_support::{Harness, SIGNING_KEY};
use crate::tokens::{TokenError, TokenKind, TokenSigner};

fn run(id: &str) -> Run {
    Run::new(id, "acme", "ws-1")
}

/// A job allocated to a fresh runner
async fn allocated(h: &Harness) -> (RunnerMeta, Job) {
    let runner = h.runner(2).await;
    let job = h.job(run("run-1")).await;
    let job = h.service.allocate_job(&job.id, &runner.id).await.unwrap();
    (runner, job)
}

/// A job started by its runner
async fn running(h: &Harness) -> (RunnerMeta, Job) {
    let (runner, job) = allocated(h).await;
    h.service
        .start_job(&h.runner_subject(&runner), &job.spec)
        .await
        .unwrap();
    (runner, h.store.get_job(&job.id).unwrap())
}

#[tokio::test]
async fn create_job_copies_run_scope() {
    let h = Harness::new();

    let job = h
        .job(run("run-1").with_status(RunStatus::ApplyQueued).with_pool("apool-1"))
        .await;

    assert_eq!(job.status, JobStatus::Unallocated);
    assert_eq!(job.spec, JobSpec::new("run-1", Phase::Apply));
    assert_eq!(job.agent_pool_id.as_ref().map(|p| p.as_str()), Some("apool-1"));
    assert_eq!(job.created_at, h.clock.now());
}

#[tokio::test]
async fn start_job_marks_running_and_issues_job_token() {
    let h = Harness::new();
    let (runner, job) = allocated(&h).await;

    let token = h
        .service
        .start_job(&h.runner_subject(&runner), &job.spec)
        .await
        .unwrap();

    assert_eq!(h.store.get_job(&job.id).unwrap().status, JobStatus::Running);
    assert_eq!(
        h.remote.run(&job.spec.run_id).unwrap().status,
        RunStatus::Planning
    );
    let claims = TokenSigner::new(SIGNING_KEY)
        .verify_kind(&token, TokenKind::Job, h.clock.now())
        .unwrap();
    assert_eq!(claims.sub, job.id.as_str());
}

#[tokio::test]
async fn start_job_rejects_other_runner() {
    let h = Harness::new();
    let (_, job) = allocated(&h).await;
    let other = h.runner(1).await;

    let err = h
        .service
        .start_job(&h.runner_subject(&other), &job.spec)
        .await
        .unwrap_err();

    assert!(matches!(err, ServiceError::NotAllocatedTo { .. }));
    assert_eq!(h.store.get_job(&job.id).unwrap().status, JobStatus::Allocated);
    assert!(!h
        .remote
        .calls()
        .iter()
        .any(|c| matches!(c, RemoteCall::StartPhase { .. })));
}

#[tokio::test]
async fn start_job_requires_runner() {
    let h = Harness::new();
    let (_, job) = allocated(&h).await;

    let err = h
        .service
        .start_job(&Subject::Manager, &job.spec)
        .await
        .unwrap_err();

    assert!(err.is_access_denied());
}

#[tokio::test]
async fn start_job_twice_conflicts() {
    let h = Harness::new();
    let (runner, job) = running(&h).await;

    let err = h
        .service
        .start_job(&h.runner_subject(&runner), &job.spec)
        .await
        .unwrap_err();

    assert!(err.is_conflict());
}

#[parameterized(
    finished = { JobStatus::Finished, None, RemoteCall::FinishPhase { run: "run-1".into(), phase: Phase::Plan, errored: false } },
    errored = { JobStatus::Errored, Some("boom"), RemoteCall::FinishPhase { run: "run-1".into(), phase: Phase::Plan, errored: true } },
    canceled = { JobStatus::Canceled, None, RemoteCall::CancelRun("run-1".into()) },
)]
#[test_macro(tokio::test)]
async fn finish_job_reports_to_run(status: JobStatus, error: Option<&str>, call: RemoteCall) {
    let h = Harness::new();
    let (_, job) = running(&h).await;

    let finished = h
        .service
        .finish_job(
            &h.job_subject(&job.id),
            &job.spec,
            status,
            error.map(String::from),
        )
        .await
        .unwrap();

    assert_eq!(finished.status, status);
    assert_eq!(finished.error.as_deref(), error);
    assert!(h.remote.calls().contains(&call));
}

#[tokio::test]
async fn finish_job_requires_the_job_itself() {
    let h = Harness::new();
    let (runner, job) = running(&h).await;

    let err = h
        .service
        .finish_job(&h.runner_subject(&runner), &job.spec, JobStatus::Finished, None)
        .await
        .unwrap_err();

    assert!(err.is_access_denied());
    assert_eq!(h.store.get_job(&job.id).unwrap().status, JobStatus::Running);
}

#[tokio::test]
async fn finish_job_rejects_illegal_transition_before_reporting() {
    let h = Harness::new();
    let (_, job) = allocated(&h).await;

    let err = h
        .service
        .finish_job(&h.job_subject(&job.id), &job.spec, JobStatus::Finished, None)
        .await
        .unwrap_err();

    assert!(err.is_conflict());
    assert!(!h
        .remote
        .calls()
        .iter()
        .any(|c| matches!(c, RemoteCall::FinishPhase { .. })));
}

#[tokio::test]
async fn cancel_job_before_allocation_cancels_without_signal() {
    let h = Harness::new();
    let job = h.job(run("run-1")).await;

    let canceled = h
        .service
        .cancel_job(&run("run-1").with_status(RunStatus::Canceled))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(canceled.id, job.id);
    assert_eq!(canceled.status, JobStatus::Canceled);
    assert_eq!(canceled.signaled, None);
    assert!(h.notify.calls().is_empty());
}

#[tokio::test]
async fn graceful_cancel_signals_running_job() {
    let h = Harness::new();
    let (_, job) = running(&h).await;
    let run = h
        .remote
        .run(&job.spec.run_id)
        .unwrap()
        .with_cancel_signaled_at(h.clock.now());

    let canceled = h.service.cancel_job(&run).await.unwrap().unwrap();

    assert_eq!(canceled.status, JobStatus::Running);
    assert_eq!(canceled.signaled, Some(false));
    let calls = h.notify.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].channel, JOB_SIGNAL_CHANNEL);
    let signal: JobSignal = serde_json::from_str(&calls[0].payload).unwrap();
    assert_eq!(signal, JobSignal::graceful(job.id));
}

#[tokio::test]
async fn force_cancel_terminates_running_job() {
    let h = Harness::new();
    let (_, job) = running(&h).await;

    let canceled = h
        .service
        .cancel_job(&run("run-1").with_status(RunStatus::ForceCanceled))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(canceled.status, JobStatus::Canceled);
    assert_eq!(canceled.signaled, Some(true));
    let signal: JobSignal = serde_json::from_str(&h.notify.calls()[0].payload).unwrap();
    assert_eq!(signal, JobSignal::force(job.id));
}

#[tokio::test]
async fn failed_publish_leaves_job_unchanged() {
    let h = Harness::new();
    let (_, job) = running(&h).await;
    h.notify.fail_publish(true);

    let err = h
        .service
        .cancel_job(&run("run-1").with_status(RunStatus::ForceCanceled))
        .await
        .unwrap_err();

    assert!(matches!(err, ServiceError::Signal(_)));
    assert_eq!(h.store.get_job(&job.id).unwrap().status, JobStatus::Running);
}

#[tokio::test]
async fn cancel_job_without_job_is_a_no_op() {
    let h = Harness::new();

    let result = h
        .service
        .cancel_job(&run("run-9").with_status(RunStatus::Canceled))
        .await
        .unwrap();

    assert!(result.is_none());
}

#[tokio::test]
async fn cancel_with_unrelated_run_status_changes_nothing() {
    let h = Harness::new();
    let job = h.job(run("run-1")).await;
    let mut events = h.service.watch_jobs();

    let unchanged = h.service.cancel_job(&run("run-1")).await.unwrap().unwrap();

    assert_eq!(unchanged, job);
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn await_allocated_jobs_returns_pending_immediately() {
    let h = Harness::new();
    let (runner, job) = allocated(&h).await;

    let jobs = h
        .service
        .await_allocated_jobs(&h.runner_subject(&runner), &runner.id, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(jobs, vec![job]);
}

#[tokio::test]
async fn await_allocated_jobs_wakes_on_allocation() {
    let h = Harness::new();
    let runner = h.runner(1).await;
    let other = h.runner(1).await;
    let first = h.job(run("run-1")).await;
    let second = h.job(run("run-2")).await;
    let waiter = tokio::spawn({
        let service = h.service.clone();
        let subject = h.runner_subject(&runner);
        let id = runner.id.clone();
        async move {
            service
                .await_allocated_jobs(&subject, &id, &CancellationToken::new())
                .await
        }
    });
    tokio::time::sleep(Duration::from_millis(10)).await;

    h.service.allocate_job(&first.id, &other.id).await.unwrap();
    h.service.allocate_job(&second.id, &runner.id).await.unwrap();

    let jobs = tokio::time::timeout(Duration::from_secs(1), waiter)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].id, second.id);
}

#[tokio::test]
async fn await_allocated_jobs_stops_on_cancel() {
    let h = Harness::new();
    let runner = h.runner(1).await;
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = h
        .service
        .await_allocated_jobs(&h.runner_subject(&runner), &runner.id, &cancel)
        .await
        .unwrap_err();

    assert!(matches!(err, ServiceError::Canceled));
}

#[tokio::test]
async fn await_allocated_jobs_is_for_the_runner_only() {
    let h = Harness::new();
    let runner = h.runner(1).await;

    let err = h
        .service
        .await_allocated_jobs(&Subject::Manager, &runner.id, &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(err.is_access_denied());
}

#[tokio::test]
async fn signaled_running_job_is_pending_until_acknowledged() {
    let h = Harness::new();
    let (runner, job) = running(&h).await;
    let run = h
        .remote
        .run(&job.spec.run_id)
        .unwrap()
        .with_cancel_signaled_at(h.clock.now());
    h.service.cancel_job(&run).await.unwrap();
    let subject = h.runner_subject(&runner);

    let jobs = h
        .service
        .await_allocated_jobs(&subject, &runner.id, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(jobs[0].signaled, Some(false));

    let acked = h.service.acknowledge_signal(&subject, &job.id).await.unwrap();
    assert_eq!(acked.signaled, None);
    assert_eq!(acked.status, JobStatus::Running);
}

#[tokio::test]
async fn await_job_signal_delivers_and_clears() {
    let h = Harness::new();
    let _relay = h.start_signaler().await;
    let (_, job) = running(&h).await;
    let waiter = tokio::spawn({
        let service = h.service.clone();
        let subject = h.job_subject(&job.id);
        let id = job.id.clone();
        async move {
            service
                .await_job_signal(&subject, &id, &CancellationToken::new())
                .await
        }
    });
    tokio::time::sleep(Duration::from_millis(10)).await;
    let run = h
        .remote
        .run(&job.spec.run_id)
        .unwrap()
        .with_cancel_signaled_at(h.clock.now());

    h.service.cancel_job(&run).await.unwrap();

    let signal = tokio::time::timeout(Duration::from_secs(1), waiter)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(signal, JobSignal::graceful(job.id.clone()));
    assert_eq!(h.store.get_job(&job.id).unwrap().signaled, None);
}

#[tokio::test]
async fn await_job_signal_requires_the_job_itself() {
    let h = Harness::new();
    let (runner, job) = running(&h).await;

    let err = h
        .service
        .await_job_signal(&h.runner_subject(&runner), &job.id, &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(err.is_access_denied());
}

#[tokio::test]
async fn reallocate_moves_allocated_job() {
    let h = Harness::new();
    let (_, job) = allocated(&h).await;
    let other = h.runner(1).await;

    let moved = h.service.reallocate_job(&job.id, &other.id).await.unwrap();

    assert_eq!(moved.runner_id, Some(other.id));
    assert_eq!(moved.status, JobStatus::Allocated);
}

#[tokio::test]
async fn reallocate_running_job_conflicts() {
    let h = Harness::new();
    let (_, job) = running(&h).await;
    let other = h.runner(1).await;

    let err = h.service.reallocate_job(&job.id, &other.id).await.unwrap_err();

    assert!(err.is_conflict());
}

#[tokio::test]
async fn dynamic_credentials_need_a_signing_key() {
    let h = Harness::new();
    let (_, job) = running(&h).await;

    let err = h
        .service
        .generate_dynamic_credentials_token(&h.job_subject(&job.id), &job.id, "aws.workload")
        .unwrap_err();

    assert!(matches!(err, ServiceError::Token(TokenError::NoSigningKey)));
}

#[tokio::test]
async fn dynamic_credentials_are_scoped_to_the_job() {
    let h = Harness::new();
    let (_, job) = running(&h).await;
    let signer = TokenSigner::new(b"oidc-key".to_vec());
    let service = h.service.clone().with_dynamic_credentials(signer.clone());

    let token = service
        .generate_dynamic_credentials_token(&h.job_subject(&job.id), &job.id, "aws.workload")
        .unwrap();
    let claims = signer
        .verify_kind(&token, TokenKind::DynamicCredentials, h.clock.now())
        .unwrap();
    assert_eq!(claims.aud.as_deref(), Some("aws.workload"));
    assert_eq!(claims.run_phase.as_deref(), Some("plan"));

    let err = service
        .generate_dynamic_credentials_token(
            &h.job_subject(&job.id),
            &JobId::new("job-other"),
            "aws.workload",
        )
        .unwrap_err();
    assert!(err.is_access_denied());
}
