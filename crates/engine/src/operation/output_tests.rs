// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use ork_adapters::FakeRemote;

use super::*;

#[tokio::test]
async fn chunks_carry_offsets_and_markers() {
    let remote = FakeRemote::new();
    let run = RunId::new("run-1");
    let output = PhaseOutput::new(Arc::new(remote.clone()), run.clone(), Phase::Plan);

    output.write(b"Initializing...\n").await;
    output.write(b"").await;
    output.line("Plan: 1 to add").await;
    output.close().await;
    output.line("ignored").await;

    let chunks = remote.chunks();
    let summary: Vec<(usize, bool, bool)> =
        chunks.iter().map(|c| (c.offset, c.start, c.end)).collect();
    assert_eq!(summary, vec![(0, true, false), (16, false, false), (31, false, true)]);
    assert_eq!(
        remote.output(&run, Phase::Plan),
        "Initializing...\nPlan: 1 to add\n"
    );
}
