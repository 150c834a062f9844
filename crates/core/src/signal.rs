// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Cancellation signals carried on the notification bus

use serde::{Deserialize, Serialize};

use crate::id::JobId;

/// Name of the notification channel carrying job signals
pub const JOB_SIGNAL_CHANNEL: &str = "job_signals";

/// A request to cancel the in-flight execution of a job.
///
/// `force` distinguishes an immediate kill from a graceful interrupt.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSignal {
    pub job_id: JobId,
    pub force: bool,
}

impl JobSignal {
    pub fn graceful(job_id: JobId) -> Self {
        Self {
            job_id,
            force: false,
        }
    }

    pub fn force(job_id: JobId) -> Self {
        Self {
            job_id,
            force: true,
        }
    }
}
