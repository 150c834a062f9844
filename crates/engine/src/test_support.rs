// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared fixtures for engine tests
#![cfg_attr(coverage_nightly, coverage(off))]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use flate2::write::GzEncoder;
use flate2::Compression;
use ork_adapters::{FakeAuthorizer, FakeNotifyAdapter, FakeRemote};
use ork_core::{
    FakeClock, Job, JobId, RegistrationRequest, Run, RunnerMeta, SequentialIdGen, Subject,
};
use ork_storage::Store;
use tokio_util::sync::CancellationToken;

use crate::service::{Service, ServiceDeps};
use crate::tokens::TokenSigner;

pub type TestService = Service<FakeNotifyAdapter, FakeClock, SequentialIdGen>;

pub const SIGNING_KEY: &[u8] = b"test-signing-key";

/// A service wired to in-memory fakes
pub struct Harness {
    pub service: TestService,
    pub store: Store,
    pub notify: FakeNotifyAdapter,
    pub remote: FakeRemote,
    pub authz: FakeAuthorizer,
    pub clock: FakeClock,
}

impl Harness {
    pub fn new() -> Self {
        let store = Store::in_memory();
        let notify = FakeNotifyAdapter::new();
        let remote = FakeRemote::new();
        let authz = FakeAuthorizer::new();
        let clock = FakeClock::new();
        let service = Service::new(
            ServiceDeps {
                store: store.clone(),
                notify: notify.clone(),
                phases: Arc::new(remote.clone()),
                authorizer: Arc::new(authz.clone()),
            },
            TokenSigner::new(SIGNING_KEY),
            clock.clone(),
            SequentialIdGen::new("t"),
        );
        Self {
            service,
            store,
            notify,
            remote,
            authz,
            clock,
        }
    }

    /// Register a server runner
    pub async fn runner(&self, max_jobs: usize) -> RunnerMeta {
        self.service
            .register(
                &Subject::Unregistered { pool: None },
                RegistrationRequest::new("0.1.0", max_jobs),
            )
            .await
            .unwrap()
    }

    /// Current subject for a registered runner
    pub fn runner_subject(&self, runner: &RunnerMeta) -> Subject {
        Subject::Runner(self.store.get_runner(&runner.id).unwrap())
    }

    /// Current subject for a job
    pub fn job_subject(&self, job: &JobId) -> Subject {
        Subject::Job(self.store.get_job(job).unwrap())
    }

    /// Create a job for a run known to the remote
    pub async fn job(&self, run: Run) -> Job {
        self.remote.add_run(run.clone());
        self.service.create_job(&run).await.unwrap()
    }

    /// Allocate and start a job for `run` on a fresh runner, returning the
    /// job and its job token
    pub async fn started(&self, run: Run) -> (RunnerMeta, Job, String) {
        let runner = self.runner(2).await;
        let job = self.job(run).await;
        let job = self.service.allocate_job(&job.id, &runner.id).await.unwrap();
        let token = self
            .service
            .start_job(&self.runner_subject(&runner), &job.spec)
            .await
            .unwrap();
        (runner, self.store.get_job(&job.id).unwrap(), token)
    }

    /// Start the signal relay and wait for it to attach
    pub async fn start_signaler(&self) -> CancellationToken {
        let cancel = CancellationToken::new();
        tokio::spawn({
            let signaler = self.service.signaler().clone();
            let cancel = cancel.clone();
            async move { signaler.start(cancel).await }
        });
        tokio::task::yield_now().await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        cancel
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}

/// Shell stand-in for the engine binary. `SLOW` makes plan wait for an
/// interrupt and `FAIL` makes it fail.
pub const FAKE_ENGINE: &str = r##"#!/bin/sh
case "$1" in
init)
  echo "engine init"
  cat main.tf
  echo "# providers" > .terraform.lock.hcl
  ;;
plan)
  echo "engine $*"
  [ -n "$TF_TOKEN_localhost" ] && echo "has job token"
  cat terraform.tfvars
  if [ -n "$SLOW" ]; then
    trap 'echo interrupted; exit 1' INT
    while true; do sleep 0.05; done
  fi
  if [ -n "$FAIL" ]; then
    echo "Error: invalid configuration" >&2
    exit 1
  fi
  echo "binary plan" > plan.out
  ;;
show)
  echo '{"format_version":"1.2"}'
  ;;
apply)
  echo "engine $*"
  cat plan.out
  echo '{"serial": 7}' > terraform.tfstate
  ;;
esac
"##;

pub const MAIN_TF: &str = r#"terraform {
  backend "s3" {
    bucket = "state"
  }
}

resource "null_resource" "x" {}
"#;

/// Gzipped configuration holding [`MAIN_TF`]
pub fn config_tarball() -> Vec<u8> {
    let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
    let mut header = tar::Header::new_gnu();
    header.set_size(MAIN_TF.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder
        .append_data(&mut header, "main.tf", MAIN_TF.as_bytes())
        .unwrap();
    builder.into_inner().unwrap().finish().unwrap()
}

/// Write the fake engine script into `dir`
pub fn write_engine(dir: &Path) -> PathBuf {
    let path = dir.join("terraform");
    std::fs::write(&path, FAKE_ENGINE).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}
