// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Operator authorization
//!
//! Policy evaluation lives outside the scheduler; it only asks whether an
//! operator may perform an action within an organization.

use std::fmt;

use thiserror::Error;

/// Operator actions on scheduling resources
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OperatorAction {
    CreatePool,
    UpdatePool,
    GetPool,
    ListPools,
    DeletePool,
    CreateAgentToken,
    GetAgentToken,
    ListAgentTokens,
    DeleteAgentToken,
    ListRunners,
    DeleteRunner,
    ListJobs,
}

impl OperatorAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperatorAction::CreatePool => "create_agent_pool",
            OperatorAction::UpdatePool => "update_agent_pool",
            OperatorAction::GetPool => "get_agent_pool",
            OperatorAction::ListPools => "list_agent_pools",
            OperatorAction::DeletePool => "delete_agent_pool",
            OperatorAction::CreateAgentToken => "create_agent_token",
            OperatorAction::GetAgentToken => "get_agent_token",
            OperatorAction::ListAgentTokens => "list_agent_tokens",
            OperatorAction::DeleteAgentToken => "delete_agent_token",
            OperatorAction::ListRunners => "list_runners",
            OperatorAction::DeleteRunner => "delete_runner",
            OperatorAction::ListJobs => "list_jobs",
        }
    }
}

impl fmt::Display for OperatorAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{operator} is not permitted to {action} in organization {organization}")]
pub struct AuthzError {
    pub operator: String,
    pub action: OperatorAction,
    pub organization: String,
}

/// Yes/no capability check for operator actions
pub trait Authorizer: Send + Sync {
    fn authorize(
        &self,
        operator: &str,
        action: OperatorAction,
        organization: &str,
    ) -> Result<(), AuthzError>;
}

/// Grants everything; used by single-tenant deployments
#[derive(Clone, Copy, Debug, Default)]
pub struct AllowAll;

impl Authorizer for AllowAll {
    fn authorize(&self, _: &str, _: OperatorAction, _: &str) -> Result<(), AuthzError> {
        Ok(())
    }
}

#[cfg(any(test, feature = "test-support"))]
pub use fake::FakeAuthorizer;

#[cfg(any(test, feature = "test-support"))]
mod fake {
    #![cfg_attr(coverage_nightly, coverage(off))]

    use std::collections::HashSet;
    use std::sync::{Arc, Mutex};

    use super::{AuthzError, Authorizer, OperatorAction};

    #[derive(Default)]
    struct FakeAuthzState {
        grants: HashSet<(String, String)>,
        calls: Vec<(String, OperatorAction, String)>,
    }

    /// Allows operators only within organizations granted to them
    #[derive(Clone, Default)]
    pub struct FakeAuthorizer {
        inner: Arc<Mutex<FakeAuthzState>>,
    }

    impl FakeAuthorizer {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn grant(&self, operator: &str, organization: &str) {
            self.inner
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .grants
                .insert((operator.to_string(), organization.to_string()));
        }

        /// Get all recorded checks
        pub fn calls(&self) -> Vec<(String, OperatorAction, String)> {
            self.inner
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .calls
                .clone()
        }
    }

    impl Authorizer for FakeAuthorizer {
        fn authorize(
            &self,
            operator: &str,
            action: OperatorAction,
            organization: &str,
        ) -> Result<(), AuthzError> {
            let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            inner
                .calls
                .push((operator.to_string(), action, organization.to_string()));
            if inner
                .grants
                .contains(&(operator.to_string(), organization.to_string()))
            {
                Ok(())
            } else {
                Err(AuthzError {
                    operator: operator.to_string(),
                    action,
                    organization: organization.to_string(),
                })
            }
        }
    }
}

#[cfg(test)]
#[path = "authz_tests.rs"]
mod tests;
