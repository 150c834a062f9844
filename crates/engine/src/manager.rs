// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Manager: runner liveness reconciliation
//!
//! ```text
//! Idle | Busy     -> Unknown   no ping for ping_timeout
//! Unknown         -> Errored   no status change for unknown_timeout
//! Errored | Exited -> deleted  no status change for purge_after
//! ```

use std::time::Duration;

use ork_core::{elapsed, Clock, RunnerMeta, RunnerStatus};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::client::ManagerClient;
use crate::error::ServiceError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Time between reconciliation passes
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
    #[serde(with = "humantime_serde")]
    pub ping_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub unknown_timeout: Duration,
    /// Grace window before terminal runners are deleted
    #[serde(with = "humantime_serde")]
    pub purge_after: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            ping_timeout: Duration::from_secs(30),
            unknown_timeout: Duration::from_secs(5 * 60),
            purge_after: Duration::from_secs(60 * 60),
        }
    }
}

impl ManagerConfig {
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_ping_timeout(mut self, timeout: Duration) -> Self {
        self.ping_timeout = timeout;
        self
    }

    pub fn with_unknown_timeout(mut self, timeout: Duration) -> Self {
        self.unknown_timeout = timeout;
        self
    }

    pub fn with_purge_after(mut self, purge_after: Duration) -> Self {
        self.purge_after = purge_after;
        self
    }
}

/// What the manager does to a runner
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    MarkUnknown,
    MarkErrored,
    Purge,
}

/// Decide the liveness action for one runner
pub fn evaluate(
    runner: &RunnerMeta,
    now: chrono::DateTime<chrono::Utc>,
    config: &ManagerConfig,
) -> Option<Action> {
    match runner.status {
        RunnerStatus::Idle | RunnerStatus::Busy
            if elapsed(runner.last_ping_at, now) > config.ping_timeout =>
        {
            Some(Action::MarkUnknown)
        }
        RunnerStatus::Unknown if elapsed(runner.last_status_at, now) > config.unknown_timeout => {
            Some(Action::MarkErrored)
        }
        RunnerStatus::Errored | RunnerStatus::Exited
            if elapsed(runner.last_status_at, now) > config.purge_after =>
        {
            Some(Action::Purge)
        }
        _ => None,
    }
}

pub struct Manager<C, K> {
    client: C,
    clock: K,
    config: ManagerConfig,
}

impl<C: ManagerClient, K: Clock> Manager<C, K> {
    pub fn new(client: C, clock: K, config: ManagerConfig) -> Self {
        Self {
            client,
            clock,
            config,
        }
    }

    /// Reconcile once at startup and then every interval until `cancel`
    /// fires
    pub async fn run(&self, cancel: CancellationToken) -> Result<(), ServiceError> {
        tracing::info!(interval = ?self.config.interval, "manager started");
        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("manager stopped");
                    return Ok(());
                }
                _ = ticker.tick() => self.reconcile().await,
            }
        }
    }

    /// One pass over every runner. The listing only selects candidates;
    /// each action is decided again on the locked record, so a runner that
    /// pings in between is left alone. Failures are logged per runner and
    /// retried on the next pass.
    pub async fn reconcile(&self) {
        for runner in self.client.list_runners() {
            if evaluate(&runner, self.clock.now(), &self.config).is_none() {
                continue;
            }
            match self
                .client
                .reconcile_runner(&runner.id, self.clock.now(), &self.config)
                .await
            {
                Ok(Some(done)) => done.log(),
                Ok(None) => tracing::debug!(runner_id = %runner.id, "no liveness action on current record"),
                Err(e) if e.is_not_found() => {}
                Err(e) => tracing::warn!(
                    runner_id = %runner.id,
                    error = %e,
                    "runner reconciliation failed"
                ),
            }
        }
    }
}

/// A liveness action applied to a runner, with the record it was decided on
#[derive(Debug, Clone, PartialEq)]
pub struct Reconciled {
    pub action: Action,
    pub runner: RunnerMeta,
}

impl Reconciled {
    fn log(&self) {
        let runner = &self.runner;
        match self.action {
            Action::MarkUnknown => tracing::info!(
                runner_id = %runner.id,
                last_ping_at = %runner.last_ping_at,
                "runner stopped pinging, marked unknown"
            ),
            Action::MarkErrored => {
                tracing::info!(runner_id = %runner.id, "runner silent too long, marked errored")
            }
            Action::Purge => {
                tracing::info!(runner_id = %runner.id, status = %runner.status, "purged runner")
            }
        }
    }
}

#[cfg(test)]
#[path = "manager_tests.rs"]
mod tests;
