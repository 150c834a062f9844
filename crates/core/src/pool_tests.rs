// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::clock::{Clock, FakeClock};

fn ws(id: &str) -> WorkspaceId {
    WorkspaceId::new(id)
}

fn pool(scoped: bool, allowed: &[&str]) -> Pool {
    Pool::new(
        PoolId::new("apool-1"),
        CreatePoolOptions {
            name: "pool-1".into(),
            organization: "acme".into(),
            organization_scoped: Some(scoped),
            allowed_workspaces: allowed.iter().map(|w| ws(w)).collect(),
        },
        FakeClock::new().now(),
    )
    .unwrap()
}

#[test]
fn new_pool_defaults_to_organization_scoped() {
    let pool = Pool::new(
        PoolId::new("apool-1"),
        CreatePoolOptions {
            name: "pool-1".into(),
            organization: "acme".into(),
            ..Default::default()
        },
        FakeClock::new().now(),
    )
    .unwrap();
    assert!(pool.organization_scoped);
    assert!(pool.allows(&ws("ws-any")));
}

#[test]
fn new_pool_requires_name() {
    let err = Pool::new(
        PoolId::new("apool-1"),
        CreatePoolOptions {
            name: "  ".into(),
            organization: "acme".into(),
            ..Default::default()
        },
        FakeClock::new().now(),
    )
    .unwrap_err();
    assert_eq!(err, PoolError::EmptyName);
}

#[test]
fn unscoped_pool_only_allows_listed_workspaces() {
    let pool = pool(false, &["ws-1"]);
    assert!(pool.allows(&ws("ws-1")));
    assert!(!pool.allows(&ws("ws-2")));
    assert_eq!(
        pool.check_access("acme", &ws("ws-2")),
        Err(PoolError::WorkspaceNotAllowed(ws("ws-2")))
    );
}

#[test]
fn access_check_rejects_other_organization() {
    let pool = pool(true, &[]);
    assert!(matches!(
        pool.check_access("globex", &ws("ws-1")),
        Err(PoolError::OrganizationMismatch { .. })
    ));
}

#[test]
fn update_rejects_assignment_outside_allow_list() {
    let mut pool = pool(false, &["ws-1"]);
    let before = pool.clone();
    let err = pool
        .update(UpdatePoolOptions {
            assigned_workspaces: Some(vec![ws("ws-1"), ws("ws-2")]),
            ..Default::default()
        })
        .unwrap_err();
    assert_eq!(err, PoolError::WorkspaceNotAllowed(ws("ws-2")));
    assert_eq!(pool, before);
}

#[test]
fn narrowing_scope_must_keep_assigned_subset_of_allowed() {
    let mut pool = pool(true, &[]);
    pool.assign(ws("ws-1")).unwrap();

    let err = pool
        .update(UpdatePoolOptions {
            organization_scoped: Some(false),
            ..Default::default()
        })
        .unwrap_err();
    assert_eq!(err, PoolError::WorkspaceNotAllowed(ws("ws-1")));

    pool.update(UpdatePoolOptions {
        organization_scoped: Some(false),
        allowed_workspaces: Some(vec![ws("ws-1")]),
        ..Default::default()
    })
    .unwrap();
    assert!(!pool.organization_scoped);
}

#[test]
fn assign_requires_access() {
    let mut pool = pool(false, &["ws-1"]);
    pool.assign(ws("ws-1")).unwrap();
    assert_eq!(
        pool.assign(ws("ws-9")),
        Err(PoolError::WorkspaceNotAllowed(ws("ws-9")))
    );
    assert_eq!(pool.assigned_workspaces.len(), 1);
}

#[test]
fn pool_with_assigned_workspaces_cannot_be_deleted() {
    let mut pool = pool(true, &[]);
    assert!(pool.check_deletable().is_ok());
    pool.assign(ws("ws-1")).unwrap();
    assert_eq!(pool.check_deletable(), Err(PoolError::AssignedWorkspaces(1)));
    pool.unassign(&ws("ws-1"));
    assert!(pool.check_deletable().is_ok());
}
