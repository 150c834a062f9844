// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Job/Runner Store: the single source of truth for scheduling state
//!
//! Records are kept in a [`MaterializedState`] and, when opened on disk,
//! persisted through the [`Wal`] before they become visible. Mutations that
//! read before they write go through per-row locks ([`RowGuard`]), so two
//! writers of the same job or runner are serialized while unrelated rows
//! proceed in parallel. Every committed change is broadcast to watchers.

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::ops::{Deref, DerefMut};
use std::path::Path;
use std::sync::{Arc, Mutex};

use ork_core::{
    AgentToken, AgentTokenId, ChangeEvent, Clock, Job, JobId, JobSpec, Lease, LeaseConfig,
    LeaseInput, LeaseOutcome, Operation, Pool, PoolId, RunId, RunnerId, RunnerMeta,
};
use thiserror::Error;
use tokio::sync::{broadcast, OwnedMutexGuard};
use tracing::debug;

use crate::state::MaterializedState;
use crate::wal::{Wal, WalError};

/// Buffered events per watcher before it starts lagging
const WATCH_CAPACITY: usize = 1024;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("{kind} already exists: {id}")]
    AlreadyExists { kind: &'static str, id: String },

    #[error("WAL error: {0}")]
    Wal(#[from] WalError),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}

/// Identifies a lockable row
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum RowKey {
    Job(JobId),
    Runner(RunnerId),
    Pool(PoolId),
}

/// A record type with its own row lock and change stream
pub trait Record: Clone + Send + Sync + 'static {
    type Id: Clone + Eq + Hash + fmt::Display + Send + Sync;

    const KIND: &'static str;

    fn id(&self) -> &Self::Id;
    fn row_key(id: &Self::Id) -> RowKey;
    fn load(state: &MaterializedState, id: &Self::Id) -> Option<Self>;
    fn put(self) -> Operation;
    fn delete(id: Self::Id) -> Operation;
    fn sender(store: &Store) -> &broadcast::Sender<ChangeEvent<Self>>;
}

impl Record for Job {
    type Id = JobId;
    const KIND: &'static str = "job";

    fn id(&self) -> &JobId {
        &self.id
    }
    fn row_key(id: &JobId) -> RowKey {
        RowKey::Job(id.clone())
    }
    fn load(state: &MaterializedState, id: &JobId) -> Option<Self> {
        state.jobs.get(id).cloned()
    }
    fn put(self) -> Operation {
        Operation::JobPut(self)
    }
    fn delete(id: JobId) -> Operation {
        Operation::JobDelete { id }
    }
    fn sender(store: &Store) -> &broadcast::Sender<ChangeEvent<Self>> {
        &store.inner.jobs
    }
}

impl Record for RunnerMeta {
    type Id = RunnerId;
    const KIND: &'static str = "runner";

    fn id(&self) -> &RunnerId {
        &self.id
    }
    fn row_key(id: &RunnerId) -> RowKey {
        RowKey::Runner(id.clone())
    }
    fn load(state: &MaterializedState, id: &RunnerId) -> Option<Self> {
        state.runner(id)
    }
    fn put(self) -> Operation {
        Operation::RunnerPut(self)
    }
    fn delete(id: RunnerId) -> Operation {
        Operation::RunnerDelete { id }
    }
    fn sender(store: &Store) -> &broadcast::Sender<ChangeEvent<Self>> {
        &store.inner.runners
    }
}

impl Record for Pool {
    type Id = PoolId;
    const KIND: &'static str = "pool";

    fn id(&self) -> &PoolId {
        &self.id
    }
    fn row_key(id: &PoolId) -> RowKey {
        RowKey::Pool(id.clone())
    }
    fn load(state: &MaterializedState, id: &PoolId) -> Option<Self> {
        state.pools.get(id).cloned()
    }
    fn put(self) -> Operation {
        Operation::PoolPut(self)
    }
    fn delete(id: PoolId) -> Operation {
        Operation::PoolDelete { id }
    }
    fn sender(store: &Store) -> &broadcast::Sender<ChangeEvent<Self>> {
        &store.inner.pools
    }
}

struct Inner {
    state: Mutex<MaterializedState>,
    wal: Option<Mutex<Wal>>,
    rows: Mutex<HashMap<RowKey, Arc<tokio::sync::Mutex<()>>>>,
    jobs: broadcast::Sender<ChangeEvent<Job>>,
    runners: broadcast::Sender<ChangeEvent<RunnerMeta>>,
    pools: broadcast::Sender<ChangeEvent<Pool>>,
    channels: Mutex<HashMap<String, broadcast::Sender<String>>>,
    leases: Mutex<HashMap<String, Lease>>,
}

/// Shared handle to the store; cheap to clone
#[derive(Clone)]
pub struct Store {
    inner: Arc<Inner>,
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("durable", &self.inner.wal.is_some())
            .finish()
    }
}

impl Store {
    /// Volatile store, used by tests and embedded deployments
    pub fn in_memory() -> Self {
        Self::with_state(MaterializedState::default(), None)
    }

    /// Open a durable store: replay the WAL, compact it, keep appending
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let mut state = MaterializedState::default();
        for op in Wal::replay(path)? {
            state.apply(&op);
        }
        Wal::compact(path, &state.snapshot())?;
        let wal = Wal::open(path)?;
        debug!(
            jobs = state.jobs.len(),
            runners = state.runners.len(),
            pools = state.pools.len(),
            "store opened"
        );
        Ok(Self::with_state(state, Some(wal)))
    }

    fn with_state(state: MaterializedState, wal: Option<Wal>) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(state),
                wal: wal.map(Mutex::new),
                rows: Mutex::new(HashMap::new()),
                jobs: broadcast::channel(WATCH_CAPACITY).0,
                runners: broadcast::channel(WATCH_CAPACITY).0,
                pools: broadcast::channel(WATCH_CAPACITY).0,
                channels: Mutex::new(HashMap::new()),
                leases: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Read-only view of the whole state
    pub fn snapshot(&self) -> MaterializedState {
        self.read(|s| s.clone())
    }

    fn read<R>(&self, f: impl FnOnce(&MaterializedState) -> R) -> R {
        let state = self.inner.state.lock().unwrap_or_else(|e| e.into_inner());
        f(&state)
    }

    /// Persist then apply. The WAL guard is held across the apply so log
    /// order always matches state order.
    fn write(&self, op: Operation) -> Result<(), StoreError> {
        let mut wal = self
            .inner
            .wal
            .as_ref()
            .map(|w| w.lock().unwrap_or_else(|e| e.into_inner()));
        if let Some(wal) = wal.as_mut() {
            wal.append(&op)?;
        }
        let mut state = self.inner.state.lock().unwrap_or_else(|e| e.into_inner());
        state.apply(&op);
        Ok(())
    }

    // -- generic record access --

    pub fn get<T: Record>(&self, id: &T::Id) -> Result<T, StoreError> {
        self.read(|s| T::load(s, id)).ok_or_else(|| StoreError::NotFound {
            kind: T::KIND,
            id: id.to_string(),
        })
    }

    /// Insert a new record
    pub fn insert<T: Record>(&self, value: T) -> Result<T, StoreError> {
        if self.read(|s| T::load(s, value.id()).is_some()) {
            return Err(StoreError::AlreadyExists {
                kind: T::KIND,
                id: value.id().to_string(),
            });
        }
        self.write(value.clone().put())?;
        let stored = self.get::<T>(value.id())?;
        let _ = T::sender(self).send(ChangeEvent::created(stored.clone()));
        Ok(stored)
    }

    /// Lock a row for read-modify-write. The lock is held until the guard
    /// is dropped; changes are only persisted by [`RowGuard::commit`].
    pub async fn lock<T: Record>(&self, id: &T::Id) -> Result<RowGuard<T>, StoreError> {
        let key = T::row_key(id);
        let mutex = {
            let mut rows = self.inner.rows.lock().unwrap_or_else(|e| e.into_inner());
            Arc::clone(rows.entry(key.clone()).or_default())
        };
        let guard = Arc::clone(&mutex).lock_owned().await;
        // Read only once the row is ours so the value is current.
        match self.get::<T>(id) {
            Ok(value) => Ok(RowGuard {
                store: self.clone(),
                key,
                mutex,
                guard: Some(guard),
                value,
            }),
            Err(e) => {
                drop(guard);
                self.release_row(&key, &mutex);
                Err(e)
            }
        }
    }

    /// Row-locked update: `f` mutates the record, which is committed only
    /// if `f` succeeds.
    pub async fn update<T, E, F>(&self, id: &T::Id, f: F) -> Result<T, E>
    where
        T: Record,
        E: From<StoreError>,
        F: FnOnce(&mut T) -> Result<(), E>,
    {
        let mut row = self.lock::<T>(id).await?;
        f(&mut row)?;
        Ok(row.commit()?)
    }

    /// Row-locked delete
    pub async fn remove<T: Record>(&self, id: &T::Id) -> Result<T, StoreError> {
        self.lock::<T>(id).await?.delete()
    }

    fn commit_row<T: Record>(&self, value: T) -> Result<T, StoreError> {
        self.write(value.clone().put())?;
        let stored = self.get::<T>(value.id())?;
        let _ = T::sender(self).send(ChangeEvent::updated(stored.clone()));
        Ok(stored)
    }

    fn delete_row<T: Record>(&self, value: T) -> Result<T, StoreError> {
        self.write(T::delete(value.id().clone()))?;
        let _ = T::sender(self).send(ChangeEvent::deleted(value.clone()));
        Ok(value)
    }

    fn release_row(&self, key: &RowKey, mutex: &Arc<tokio::sync::Mutex<()>>) {
        let mut rows = self.inner.rows.lock().unwrap_or_else(|e| e.into_inner());
        // Clones are only handed out under `rows`, so the count is stable
        // here: ours plus the map's means no one else is waiting.
        if Arc::strong_count(mutex) == 2 {
            rows.remove(key);
        }
    }

    // -- jobs --

    pub fn get_job(&self, id: &JobId) -> Result<Job, StoreError> {
        self.get(id)
    }

    pub fn list_jobs(&self) -> Vec<Job> {
        self.read(|s| s.jobs())
    }

    pub fn jobs_for_runner(&self, runner: &RunnerId) -> Vec<Job> {
        self.read(|s| {
            s.jobs()
                .into_iter()
                .filter(|j| j.runner_id.as_ref() == Some(runner))
                .collect()
        })
    }

    pub fn find_job(&self, spec: &JobSpec) -> Result<Job, StoreError> {
        self.read(|s| s.job_by_spec(spec).cloned())
            .ok_or_else(|| StoreError::NotFound {
                kind: Job::KIND,
                id: spec.to_string(),
            })
    }

    /// Latest job of a run
    pub fn find_run_job(&self, run: &RunId) -> Result<Job, StoreError> {
        self.read(|s| s.job_by_run(run).cloned())
            .ok_or_else(|| StoreError::NotFound {
                kind: Job::KIND,
                id: run.to_string(),
            })
    }

    pub fn watch_jobs(&self) -> broadcast::Receiver<ChangeEvent<Job>> {
        self.inner.jobs.subscribe()
    }

    // -- runners --

    pub fn get_runner(&self, id: &RunnerId) -> Result<RunnerMeta, StoreError> {
        self.get(id)
    }

    pub fn list_runners(&self) -> Vec<RunnerMeta> {
        self.read(|s| s.runners())
    }

    pub fn watch_runners(&self) -> broadcast::Receiver<ChangeEvent<RunnerMeta>> {
        self.inner.runners.subscribe()
    }

    // -- pools --

    pub fn get_pool(&self, id: &PoolId) -> Result<Pool, StoreError> {
        self.get(id)
    }

    pub fn list_pools(&self) -> Vec<Pool> {
        self.read(|s| {
            let mut pools: Vec<_> = s.pools.values().cloned().collect();
            pools.sort_by(|a, b| a.id.cmp(&b.id));
            pools
        })
    }

    pub fn watch_pools(&self) -> broadcast::Receiver<ChangeEvent<Pool>> {
        self.inner.pools.subscribe()
    }

    // -- agent tokens --

    pub fn create_agent_token(&self, token: AgentToken) -> Result<AgentToken, StoreError> {
        if self.read(|s| s.agent_tokens.contains_key(&token.id)) {
            return Err(StoreError::AlreadyExists {
                kind: "agent token",
                id: token.id.to_string(),
            });
        }
        self.write(Operation::AgentTokenPut(token.clone()))?;
        Ok(token)
    }

    pub fn get_agent_token(&self, id: &AgentTokenId) -> Result<AgentToken, StoreError> {
        self.read(|s| s.agent_tokens.get(id).cloned())
            .ok_or_else(|| StoreError::NotFound {
                kind: "agent token",
                id: id.to_string(),
            })
    }

    pub fn list_agent_tokens(&self, pool: &PoolId) -> Vec<AgentToken> {
        self.read(|s| {
            let mut tokens: Vec<_> = s
                .agent_tokens
                .values()
                .filter(|t| &t.pool_id == pool)
                .cloned()
                .collect();
            tokens.sort_by(|a, b| a.created_at.cmp(&b.created_at));
            tokens
        })
    }

    pub fn delete_agent_token(&self, id: &AgentTokenId) -> Result<AgentToken, StoreError> {
        let token = self.get_agent_token(id)?;
        self.write(Operation::AgentTokenDelete { id: id.clone() })?;
        Ok(token)
    }

    // -- notification channels --

    /// Publish a payload to every listener of `channel`. Delivery is
    /// best-effort: with no listeners the payload is dropped.
    pub fn notify(&self, channel: &str, payload: String) -> usize {
        let sender = self.channel(channel);
        sender.send(payload).unwrap_or(0)
    }

    /// Listen on `channel` for payloads published after this call
    pub fn listen(&self, channel: &str) -> broadcast::Receiver<String> {
        self.channel(channel).subscribe()
    }

    fn channel(&self, channel: &str) -> broadcast::Sender<String> {
        let mut channels = self.inner.channels.lock().unwrap_or_else(|e| e.into_inner());
        channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(WATCH_CAPACITY).0)
            .clone()
    }

    // -- advisory leases --

    /// Drive the lease named by `config.name` through one transition
    pub fn lease(
        &self,
        config: &LeaseConfig,
        input: LeaseInput,
        clock: &impl Clock,
    ) -> LeaseOutcome {
        let mut leases = self.inner.leases.lock().unwrap_or_else(|e| e.into_inner());
        let current = leases
            .entry(config.name.clone())
            .or_insert_with(|| Lease::new(config.clone()));
        current.config = config.clone();
        let (next, outcome) = current.transition(input, clock);
        *current = next;
        outcome
    }
}

/// Exclusive access to one row. Dereferences to the record; dropping the
/// guard without [`commit`](RowGuard::commit) discards changes.
pub struct RowGuard<T: Record> {
    store: Store,
    key: RowKey,
    mutex: Arc<tokio::sync::Mutex<()>>,
    guard: Option<OwnedMutexGuard<()>>,
    value: T,
}

impl<T: Record> RowGuard<T> {
    /// Persist the modified record and release the row
    pub fn commit(self) -> Result<T, StoreError> {
        self.store.commit_row(self.value.clone())
    }

    /// Delete the record and release the row
    pub fn delete(self) -> Result<T, StoreError> {
        self.store.delete_row(self.value.clone())
    }
}

impl<T: Record> Deref for RowGuard<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}

impl<T: Record> DerefMut for RowGuard<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.value
    }
}

impl<T: Record> Drop for RowGuard<T> {
    fn drop(&mut self) {
        drop(self.guard.take());
        self.store.release_row(&self.key, &self.mutex);
    }
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
