// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Materialized state from WAL replay

use std::collections::HashMap;

use ork_core::{
    AgentToken, AgentTokenId, Job, JobId, JobSpec, Operation, Pool, PoolId, RunId, RunnerId,
    RunnerMeta,
};

/// Materialized state built from WAL operations
#[derive(Debug, Default, Clone)]
pub struct MaterializedState {
    pub jobs: HashMap<JobId, Job>,
    pub runners: HashMap<RunnerId, RunnerMeta>,
    pub pools: HashMap<PoolId, Pool>,
    pub agent_tokens: HashMap<AgentTokenId, AgentToken>,
}

impl MaterializedState {
    /// Apply an operation to update the state
    pub fn apply(&mut self, op: &Operation) {
        match op {
            Operation::JobPut(job) => {
                self.jobs.insert(job.id.clone(), job.clone());
            }
            Operation::JobDelete { id } => {
                self.jobs.remove(id);
            }
            Operation::RunnerPut(runner) => {
                self.runners.insert(runner.id.clone(), runner.clone());
            }
            Operation::RunnerDelete { id } => {
                self.runners.remove(id);
            }
            Operation::PoolPut(pool) => {
                self.pools.insert(pool.id.clone(), pool.clone());
            }
            Operation::PoolDelete { id } => {
                self.pools.remove(id);
            }
            Operation::AgentTokenPut(token) => {
                self.agent_tokens.insert(token.id.clone(), token.clone());
            }
            Operation::AgentTokenDelete { id } => {
                self.agent_tokens.remove(id);
            }
        }
    }

    /// Number of jobs allocated to or running on the runner
    pub fn current_jobs(&self, runner: &RunnerId) -> usize {
        self.jobs
            .values()
            .filter(|j| j.status.holds_capacity() && j.runner_id.as_ref() == Some(runner))
            .count()
    }

    /// Runner with its derived `current_jobs`
    pub fn runner(&self, id: &RunnerId) -> Option<RunnerMeta> {
        self.runners.get(id).map(|r| self.with_load(r))
    }

    /// All runners with derived `current_jobs`, ordered by ID
    pub fn runners(&self) -> Vec<RunnerMeta> {
        let mut runners: Vec<_> = self.runners.values().map(|r| self.with_load(r)).collect();
        runners.sort_by(|a, b| a.id.cmp(&b.id));
        runners
    }

    /// All jobs, oldest first
    pub fn jobs(&self) -> Vec<Job> {
        let mut jobs: Vec<_> = self.jobs.values().cloned().collect();
        jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        jobs
    }

    /// Most recently created job for a run phase
    pub fn job_by_spec(&self, spec: &JobSpec) -> Option<&Job> {
        self.jobs
            .values()
            .filter(|j| &j.spec == spec)
            .max_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)))
    }

    /// Most recently created job of a run, whatever its phase
    pub fn job_by_run(&self, run: &RunId) -> Option<&Job> {
        self.jobs
            .values()
            .filter(|j| &j.spec.run_id == run)
            .max_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)))
    }

    /// Replay ops reproducing this state, used to compact the WAL
    pub fn snapshot(&self) -> Vec<Operation> {
        let mut ops = Vec::new();
        let mut pools: Vec<_> = self.pools.values().collect();
        pools.sort_by(|a, b| a.id.cmp(&b.id));
        ops.extend(pools.into_iter().cloned().map(Operation::PoolPut));

        let mut tokens: Vec<_> = self.agent_tokens.values().collect();
        tokens.sort_by(|a, b| a.id.cmp(&b.id));
        ops.extend(tokens.into_iter().cloned().map(Operation::AgentTokenPut));

        let mut runners: Vec<_> = self.runners.values().collect();
        runners.sort_by(|a, b| a.id.cmp(&b.id));
        ops.extend(runners.into_iter().cloned().map(Operation::RunnerPut));

        ops.extend(self.jobs().into_iter().map(Operation::JobPut));
        ops
    }

    fn with_load(&self, runner: &RunnerMeta) -> RunnerMeta {
        let mut runner = runner.clone();
        runner.current_jobs = self.current_jobs(&runner.id);
        runner
    }
}

#[cfg(test)]
#[path = "state_tests.rs"]
mod tests;
