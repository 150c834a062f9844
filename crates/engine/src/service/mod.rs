// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Scheduling service: the operations runners, jobs, the manager and
//! operators perform against the store
//!
//! Every mutation of a job or runner goes through a row lock, so the
//! allocator, the manager and runner daemons never overwrite each other.
//! The loops observe the results through the store's change streams.

mod agent_tokens;
mod jobs;
mod pools;
mod runners;

use std::sync::Arc;

use ork_adapters::{Authorizer, NotifyAdapter, OperatorAction, PhaseClient};
use ork_core::{AccessError, Clock, IdGen, Subject};
use ork_storage::Store;

use crate::error::ServiceError;
use crate::signaler::JobSignaler;
use crate::tokens::TokenSigner;

/// Collaborators of the service
pub struct ServiceDeps<N> {
    pub store: Store,
    pub notify: N,
    pub phases: Arc<dyn PhaseClient>,
    pub authorizer: Arc<dyn Authorizer>,
}

#[derive(Clone)]
pub struct Service<N, K, I> {
    store: Store,
    signaler: JobSignaler<N>,
    phases: Arc<dyn PhaseClient>,
    authorizer: Arc<dyn Authorizer>,
    tokens: TokenSigner,
    credentials: Option<TokenSigner>,
    clock: K,
    ids: I,
}

impl<N, K, I> Service<N, K, I>
where
    N: NotifyAdapter,
    K: Clock,
    I: IdGen,
{
    pub fn new(deps: ServiceDeps<N>, tokens: TokenSigner, clock: K, ids: I) -> Self {
        Self {
            signaler: JobSignaler::new(deps.notify, deps.store.clone()),
            store: deps.store,
            phases: deps.phases,
            authorizer: deps.authorizer,
            tokens,
            credentials: None,
            clock,
            ids,
        }
    }

    /// Enable minting of workload identity tokens
    pub fn with_dynamic_credentials(mut self, signer: TokenSigner) -> Self {
        self.credentials = Some(signer);
        self
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn signaler(&self) -> &JobSignaler<N> {
        &self.signaler
    }

    pub fn clock(&self) -> &K {
        &self.clock
    }

    fn authorize(
        &self,
        subject: &Subject,
        action: OperatorAction,
        organization: &str,
    ) -> Result<(), ServiceError> {
        match subject {
            Subject::Operator(name) => Ok(self
                .authorizer
                .authorize(name, action, organization)?),
            _ => Err(AccessError {
                subject: subject.to_string(),
                action: action.as_str(),
            }
            .into()),
        }
    }
}
