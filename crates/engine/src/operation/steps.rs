// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The ordered steps of an operation and the engine command lines

use ork_core::{Phase, Run};

pub const STATE_FILE: &str = "terraform.tfstate";
pub const PLAN_FILE: &str = "plan.out";
pub const JSON_PLAN_FILE: &str = "plan.out.json";
pub const LOCK_FILE: &str = ".terraform.lock.hcl";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    DownloadEngine,
    DownloadConfig,
    ReadVariables,
    SetupDynamicCredentials,
    WriteVariables,
    DeleteBackendConfig,
    DownloadState,
    EnablePluginCache,
    Init,
    Plan,
    ConvertPlanToJson,
    UploadPlan,
    UploadJsonPlan,
    UploadLockFile,
    DownloadLockFile,
    DownloadPlanFile,
    Apply,
}

impl Step {
    pub fn name(&self) -> &'static str {
        match self {
            Step::DownloadEngine => "download engine",
            Step::DownloadConfig => "download config",
            Step::ReadVariables => "read variables",
            Step::SetupDynamicCredentials => "setup dynamic credentials",
            Step::WriteVariables => "write variables",
            Step::DeleteBackendConfig => "delete backend config",
            Step::DownloadState => "download state",
            Step::EnablePluginCache => "enable plugin cache",
            Step::Init => "init",
            Step::Plan => "plan",
            Step::ConvertPlanToJson => "convert plan to json",
            Step::UploadPlan => "upload plan",
            Step::UploadJsonPlan => "upload json plan",
            Step::UploadLockFile => "upload lock file",
            Step::DownloadLockFile => "download lock file",
            Step::DownloadPlanFile => "download plan file",
            Step::Apply => "apply",
        }
    }
}

/// Steps for a phase, in execution order
pub fn steps(phase: Phase, plugin_cache: bool) -> Vec<Step> {
    let mut steps = vec![
        Step::DownloadEngine,
        Step::DownloadConfig,
        Step::ReadVariables,
        Step::SetupDynamicCredentials,
        Step::WriteVariables,
        Step::DeleteBackendConfig,
        Step::DownloadState,
    ];
    if plugin_cache {
        steps.push(Step::EnablePluginCache);
    }
    match phase {
        Phase::Plan => steps.extend([
            Step::Init,
            Step::Plan,
            Step::ConvertPlanToJson,
            Step::UploadPlan,
            Step::UploadJsonPlan,
            Step::UploadLockFile,
        ]),
        // The lock file from the plan pins the same providers for apply.
        Phase::Apply => steps.extend([
            Step::DownloadLockFile,
            Step::DownloadPlanFile,
            Step::Init,
            Step::Apply,
        ]),
    }
    steps
}

pub fn init_args() -> Vec<String> {
    vec!["init".into(), "-input=false".into()]
}

pub fn plan_args(run: &Run) -> Vec<String> {
    let mut args = vec!["plan".to_string(), "-input=false".to_string()];
    if run.destroy {
        args.push("-destroy".into());
    }
    if !run.refresh {
        args.push("-refresh=false".into());
    }
    if run.refresh_only {
        args.push("-refresh-only".into());
    }
    args.extend(run.replace_addrs.iter().map(|a| format!("-replace={a}")));
    args.extend(run.target_addrs.iter().map(|a| format!("-target={a}")));
    args.push(format!("-out={PLAN_FILE}"));
    args
}

pub fn show_json_args() -> Vec<String> {
    vec!["show".into(), "-json".into(), PLAN_FILE.into()]
}

pub fn apply_args(run: &Run) -> Vec<String> {
    let mut args = vec!["apply".to_string(), "-input=false".to_string()];
    if run.destroy {
        args.push("-destroy".into());
    }
    args.push(PLAN_FILE.into());
    args
}

#[cfg(test)]
#[path = "steps_tests.rs"]
mod tests;
