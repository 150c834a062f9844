// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Agent tokens and bearer authentication

use ork_adapters::{NotifyAdapter, OperatorAction};
use ork_core::{AgentToken, AgentTokenId, Clock, IdGen, JobId, PoolId, Subject};

use super::Service;
use crate::error::ServiceError;
use crate::tokens::{TokenError, TokenKind};

impl<N, K, I> Service<N, K, I>
where
    N: NotifyAdapter,
    K: Clock,
    I: IdGen,
{
    /// Create an agent token for a pool, returning the record and the
    /// bearer string. The bearer is not stored and cannot be retrieved
    /// again.
    pub fn create_agent_token(
        &self,
        subject: &Subject,
        pool: &PoolId,
        description: &str,
    ) -> Result<(AgentToken, String), ServiceError> {
        let pool = self.store.get_pool(pool)?;
        self.authorize(subject, OperatorAction::CreateAgentToken, &pool.organization)?;
        let now = self.clock.now();
        let token = AgentToken::new(AgentTokenId::generate(&self.ids), &pool, description, now)?;
        let bearer = self.tokens.agent_token(&token.id, now)?;
        let token = self.store.create_agent_token(token)?;
        tracing::info!(token_id = %token.id, pool_id = %pool.id, "created agent token");
        Ok((token, bearer))
    }

    pub fn get_agent_token(
        &self,
        subject: &Subject,
        token: &AgentTokenId,
    ) -> Result<AgentToken, ServiceError> {
        let token = self.store.get_agent_token(token)?;
        self.authorize(subject, OperatorAction::GetAgentToken, &token.organization)?;
        Ok(token)
    }

    pub fn list_agent_tokens(
        &self,
        subject: &Subject,
        pool: &PoolId,
    ) -> Result<Vec<AgentToken>, ServiceError> {
        let pool = self.store.get_pool(pool)?;
        self.authorize(subject, OperatorAction::ListAgentTokens, &pool.organization)?;
        Ok(self.store.list_agent_tokens(&pool.id))
    }

    pub fn delete_agent_token(
        &self,
        subject: &Subject,
        token: &AgentTokenId,
    ) -> Result<AgentToken, ServiceError> {
        let record = self.store.get_agent_token(token)?;
        self.authorize(subject, OperatorAction::DeleteAgentToken, &record.organization)?;
        let deleted = self.store.delete_agent_token(token)?;
        tracing::info!(token_id = %token, pool_id = %deleted.pool_id, "deleted agent token");
        Ok(deleted)
    }

    /// Resolve a bearer string to the subject it authenticates.
    ///
    /// Agent tokens yield an unregistered runner of the token's pool; job
    /// tokens yield the job as currently stored.
    pub fn authenticate(&self, bearer: &str) -> Result<Subject, ServiceError> {
        let claims = self.tokens.verify(bearer, self.clock.now())?;
        match claims.kind {
            TokenKind::AgentToken => {
                let token = self
                    .store
                    .get_agent_token(&AgentTokenId::new(claims.sub))
                    .map_err(|_| TokenError::Revoked("agent token"))?;
                let pool = self
                    .store
                    .get_pool(&token.pool_id)
                    .map_err(|_| TokenError::Revoked("agent pool"))?;
                Ok(Subject::Unregistered {
                    pool: Some(pool.summary()),
                })
            }
            TokenKind::Job => {
                let job = self
                    .store
                    .get_job(&JobId::new(claims.sub))
                    .map_err(|_| TokenError::Revoked("job"))?;
                Ok(Subject::Job(job))
            }
            actual => Err(TokenError::WrongKind {
                expected: TokenKind::Job,
                actual,
            }
            .into()),
        }
    }
}

#[cfg(test)]
#[path = "agent_tokens_tests.rs"]
mod tests;
