// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use yare::parameterized;

#[parameterized(
    pending = { RunStatus::Pending, Phase::Plan },
    plan_queued = { RunStatus::PlanQueued, Phase::Plan },
    planning = { RunStatus::Planning, Phase::Plan },
    planned = { RunStatus::Planned, Phase::Plan },
    apply_queued = { RunStatus::ApplyQueued, Phase::Apply },
    applying = { RunStatus::Applying, Phase::Apply },
    applied = { RunStatus::Applied, Phase::Apply },
    canceled = { RunStatus::Canceled, Phase::Plan },
)]
fn phase_follows_status(status: RunStatus, phase: Phase) {
    assert_eq!(Run::new("run-1", "acme", "ws-1").with_status(status).phase(), phase);
}

#[test]
fn phase_parses_its_display_form() {
    for phase in [Phase::Plan, Phase::Apply] {
        assert_eq!(phase.to_string().parse::<Phase>(), Ok(phase));
    }
    assert!("destroy".parse::<Phase>().is_err());
}

#[test]
fn sparse_run_record_takes_defaults() {
    let run: Run = serde_json::from_str(
        r#"{"id":"run-1","organization":"acme","workspace_id":"ws-1","status":"plan_queued"}"#,
    )
    .unwrap();

    assert!(run.refresh);
    assert!(!run.plan_only);
    assert!(run.agent_pool_id.is_none());
    assert!(run.target_addrs.is_empty());
}
