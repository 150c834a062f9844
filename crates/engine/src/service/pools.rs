// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Agent pools

use ork_adapters::{NotifyAdapter, OperatorAction};
use ork_core::{
    Clock, CreatePoolOptions, IdGen, Pool, PoolId, Subject, UpdatePoolOptions, WorkspaceId,
};

use super::Service;
use crate::error::ServiceError;

impl<N, K, I> Service<N, K, I>
where
    N: NotifyAdapter,
    K: Clock,
    I: IdGen,
{
    pub fn create_pool(
        &self,
        subject: &Subject,
        opts: CreatePoolOptions,
    ) -> Result<Pool, ServiceError> {
        self.authorize(subject, OperatorAction::CreatePool, &opts.organization)?;
        let pool = Pool::new(PoolId::generate(&self.ids), opts, self.clock.now())?;
        let pool = self.store.insert(pool)?;
        tracing::info!(
            pool_id = %pool.id,
            name = %pool.name,
            organization = %pool.organization,
            "created agent pool"
        );
        Ok(pool)
    }

    pub async fn update_pool(
        &self,
        subject: &Subject,
        pool: &PoolId,
        opts: UpdatePoolOptions,
    ) -> Result<Pool, ServiceError> {
        let current = self.store.get_pool(pool)?;
        self.authorize(subject, OperatorAction::UpdatePool, &current.organization)?;
        let updated = self
            .store
            .update::<Pool, ServiceError, _>(pool, |p| Ok(p.update(opts)?))
            .await
            .inspect_err(|e| tracing::warn!(pool_id = %pool, error = %e, "updating agent pool"))?;
        tracing::info!(pool_id = %pool, "updated agent pool");
        Ok(updated)
    }

    pub fn get_pool(&self, subject: &Subject, pool: &PoolId) -> Result<Pool, ServiceError> {
        let pool = self.store.get_pool(pool)?;
        self.authorize(subject, OperatorAction::GetPool, &pool.organization)?;
        Ok(pool)
    }

    pub fn list_pools(
        &self,
        subject: &Subject,
        organization: &str,
    ) -> Result<Vec<Pool>, ServiceError> {
        self.authorize(subject, OperatorAction::ListPools, organization)?;
        Ok(self
            .store
            .list_pools()
            .into_iter()
            .filter(|p| p.organization == organization)
            .collect())
    }

    /// Delete a pool. Refused while workspaces are still assigned to it.
    pub async fn delete_pool(&self, subject: &Subject, pool: &PoolId) -> Result<Pool, ServiceError> {
        let current = self.store.get_pool(pool)?;
        self.authorize(subject, OperatorAction::DeletePool, &current.organization)?;
        let row = self.store.lock::<Pool>(pool).await?;
        row.check_deletable()?;
        let deleted = row.delete()?;
        for token in self.store.list_agent_tokens(pool) {
            self.store.delete_agent_token(&token.id)?;
        }
        tracing::info!(pool_id = %pool, "deleted agent pool");
        Ok(deleted)
    }

    /// Check that a workspace may be configured to use a pool
    pub fn check_workspace_pool_access(
        &self,
        organization: &str,
        workspace: &WorkspaceId,
        pool: &PoolId,
    ) -> Result<Pool, ServiceError> {
        let pool = self.store.get_pool(pool)?;
        pool.check_access(organization, workspace)?;
        Ok(pool)
    }
}

#[cfg(test)]
#[path = "pools_tests.rs"]
mod tests;
