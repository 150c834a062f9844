// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn fake_authorizer_checks_grants() {
    let authz = FakeAuthorizer::new();
    authz.grant("alice", "acme");

    assert!(authz
        .authorize("alice", OperatorAction::CreatePool, "acme")
        .is_ok());
    let err = authz
        .authorize("alice", OperatorAction::CreatePool, "globex")
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "alice is not permitted to create_agent_pool in organization globex"
    );
    assert_eq!(authz.calls().len(), 2);
}
