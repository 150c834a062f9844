// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Exponential backoff for restarting failed loops

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Retry policy. Delays double from `initial` up to `max`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    #[serde(with = "humantime_serde")]
    pub initial: Duration,
    #[serde(with = "humantime_serde")]
    pub max: Duration,
    pub factor: u32,
    /// A run lasting at least this long resets the delay
    #[serde(with = "humantime_serde")]
    pub healthy_after: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(30),
            factor: 2,
            healthy_after: Duration::from_secs(60),
        }
    }
}

impl BackoffConfig {
    pub fn with_initial(mut self, initial: Duration) -> Self {
        self.initial = initial;
        self
    }

    pub fn with_max(mut self, max: Duration) -> Self {
        self.max = max;
        self
    }
}

/// Stateful delay sequence
#[derive(Clone, Debug)]
pub struct Backoff {
    config: BackoffConfig,
    next: Duration,
}

impl Backoff {
    pub fn new(config: BackoffConfig) -> Self {
        let next = config.initial.min(config.max);
        Self { config, next }
    }

    /// Delay to wait before the next attempt
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.next;
        self.next = delay
            .saturating_mul(self.config.factor.max(1))
            .min(self.config.max);
        delay
    }

    pub fn reset(&mut self) {
        self.next = self.config.initial.min(self.config.max);
    }
}

/// Run `f` until `cancel` fires, restarting it after each failure or early
/// return with a growing delay.
pub async fn supervise<F, Fut, E>(
    name: &str,
    config: BackoffConfig,
    cancel: CancellationToken,
    mut f: F,
) where
    F: FnMut(CancellationToken) -> Fut,
    Fut: Future<Output = Result<(), E>>,
    E: Display,
{
    let healthy_after = config.healthy_after;
    let mut backoff = Backoff::new(config);
    loop {
        let started = Instant::now();
        let result = f(cancel.child_token()).await;
        if cancel.is_cancelled() {
            tracing::debug!(name, "loop stopped");
            return;
        }
        if started.elapsed() >= healthy_after {
            backoff.reset();
        }
        let delay = backoff.next_delay();
        match result {
            Ok(()) => tracing::warn!(name, backoff_ms = delay.as_millis() as u64, "loop exited"),
            Err(e) => tracing::error!(
                name,
                error = %e,
                backoff_ms = delay.as_millis() as u64,
                "loop failed"
            ),
        }
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

#[cfg(test)]
#[path = "backoff_tests.rs"]
mod tests;
