// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Cluster-exclusive loops
//!
//! The allocator and manager each run under a named lease. A node polls
//! until it is granted the lease, heartbeats while the loop runs and
//! cancels the loop if the lease is lost. Failed loops restart under
//! [`supervise`].

use std::future::Future;
use std::time::Duration;

use ork_core::{
    Clock, HolderId, LeaseConfig, LeaseInput, ALLOCATOR_LEASE, MANAGER_LEASE,
};
use ork_storage::Store;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::allocator::{Allocator, AllocatorError};
use crate::backoff::{supervise, BackoffConfig};
use crate::client::{AllocatorClient, ManagerClient};
use crate::error::ServiceError;
use crate::manager::{Manager, ManagerConfig};

#[derive(Debug, Error)]
pub enum ExclusiveError<E: std::error::Error + 'static> {
    #[error("lease {0} lost")]
    LeaseLost(String),

    #[error(transparent)]
    Inner(E),
}

/// Run `f` while holding the lease named by `config`
pub async fn run_exclusive<K, F, Fut, E>(
    store: &Store,
    config: &LeaseConfig,
    holder: &HolderId,
    clock: &K,
    cancel: CancellationToken,
    f: F,
) -> Result<(), ExclusiveError<E>>
where
    K: Clock,
    F: FnOnce(CancellationToken) -> Fut,
    Fut: Future<Output = Result<(), E>>,
    E: std::error::Error + 'static,
{
    let lease = config.name.as_str();
    loop {
        let outcome = store.lease(
            config,
            LeaseInput::Acquire {
                holder: holder.clone(),
            },
            clock,
        );
        if outcome.is_held() {
            tracing::info!(lease, %holder, ?outcome, "lease acquired");
            break;
        }
        tracing::debug!(lease, %holder, ?outcome, "waiting for lease");
        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            _ = tokio::time::sleep(config.heartbeat_interval) => {}
        }
    }

    let token = cancel.child_token();
    let work = f(token.clone());
    tokio::pin!(work);
    let mut heartbeat = tokio::time::interval(config.heartbeat_interval);
    heartbeat.tick().await;

    let result = loop {
        tokio::select! {
            result = &mut work => break result.map_err(ExclusiveError::Inner),
            _ = heartbeat.tick() => {
                let outcome = store.lease(
                    config,
                    LeaseInput::Heartbeat { holder: holder.clone() },
                    clock,
                );
                if !outcome.is_held() {
                    tracing::warn!(lease, %holder, "lease lost, stopping loop");
                    token.cancel();
                    let _ = (&mut work).await;
                    break Err(ExclusiveError::LeaseLost(lease.to_string()));
                }
            }
        }
    };

    store.lease(
        config,
        LeaseInput::Release {
            holder: holder.clone(),
        },
        clock,
    );
    tracing::info!(lease, %holder, "lease released");
    result
}

/// Shared settings of the exclusive loops on one node
#[derive(Clone)]
pub struct LoopContext<K> {
    pub store: Store,
    pub holder: HolderId,
    pub clock: K,
    pub backoff: BackoffConfig,
    pub stale_threshold: Duration,
    pub heartbeat_interval: Duration,
}

impl<K: Clock> LoopContext<K> {
    pub fn new(store: Store, holder: HolderId, clock: K) -> Self {
        let defaults = LeaseConfig::new("");
        Self {
            store,
            holder,
            clock,
            backoff: BackoffConfig::default(),
            stale_threshold: defaults.stale_threshold,
            heartbeat_interval: defaults.heartbeat_interval,
        }
    }

    pub fn with_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    pub fn with_stale_threshold(mut self, threshold: Duration) -> Self {
        self.stale_threshold = threshold;
        self
    }

    fn lease(&self, name: &str) -> LeaseConfig {
        LeaseConfig::new(name)
            .with_stale_threshold(self.stale_threshold)
            .with_heartbeat_interval(self.heartbeat_interval)
    }
}

/// Supervised allocator, exclusive across nodes
pub async fn allocator_loop<C, K>(ctx: LoopContext<K>, client: C, cancel: CancellationToken)
where
    C: AllocatorClient + Clone,
    K: Clock,
{
    let lease = ctx.lease(ALLOCATOR_LEASE);
    supervise("allocator", ctx.backoff.clone(), cancel, |token| {
        let (ctx, client, lease) = (ctx.clone(), client.clone(), lease.clone());
        async move {
            run_exclusive(&ctx.store, &lease, &ctx.holder, &ctx.clock, token, |t| async move {
                let mut allocator = Allocator::new(client);
                allocator.run(t).await
            })
            .await
        }
    })
    .await;
}

/// Supervised manager, exclusive across nodes
pub async fn manager_loop<C, K>(
    ctx: LoopContext<K>,
    client: C,
    config: ManagerConfig,
    cancel: CancellationToken,
) where
    C: ManagerClient + Clone,
    K: Clock,
{
    let lease = ctx.lease(MANAGER_LEASE);
    supervise("manager", ctx.backoff.clone(), cancel, |token| {
        let (ctx, client, lease, config) =
            (ctx.clone(), client.clone(), lease.clone(), config.clone());
        async move {
            let manager = Manager::new(client, ctx.clock.clone(), config);
            run_exclusive(&ctx.store, &lease, &ctx.holder, &ctx.clock, token, |t| async move {
                manager.run(t).await
            })
            .await
        }
    })
    .await;
}

/// Error type of a supervised allocator pass
pub type AllocatorLoopError = ExclusiveError<AllocatorError>;
/// Error type of a supervised manager pass
pub type ManagerLoopError = ExclusiveError<ServiceError>;

#[cfg(test)]
#[path = "exclusive_tests.rs"]
mod tests;
