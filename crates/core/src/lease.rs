// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Lease state machine for cluster-exclusive loops
//!
//! A lease is an advisory lock with heartbeat-based stale detection: a
//! holder that stops heartbeating loses the lease to the next acquirer.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::clock::{elapsed, Clock};

/// Well-known lease guarding the allocator loop
pub const ALLOCATOR_LEASE: &str = "allocator";
/// Well-known lease guarding the manager loop
pub const MANAGER_LEASE: &str = "manager";

/// Unique identifier for a lease holder
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HolderId(pub String);

impl HolderId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl std::fmt::Display for HolderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lease configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseConfig {
    /// Name identifying this lease
    pub name: String,
    /// How long before a holder is considered stale
    #[serde(with = "humantime_serde")]
    pub stale_threshold: Duration,
    /// How often holders should refresh their heartbeat
    #[serde(with = "humantime_serde")]
    pub heartbeat_interval: Duration,
}

impl LeaseConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stale_threshold: Duration::from_secs(30),
            heartbeat_interval: Duration::from_secs(10),
        }
    }

    pub fn with_stale_threshold(mut self, threshold: Duration) -> Self {
        self.stale_threshold = threshold;
        self
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }
}

/// Lease state
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LeaseState {
    Free,
    Held {
        holder: HolderId,
        acquired_at: DateTime<Utc>,
        last_heartbeat: DateTime<Utc>,
    },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    pub config: LeaseConfig,
    pub state: LeaseState,
}

/// Inputs that drive lease transitions
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LeaseInput {
    Acquire { holder: HolderId },
    Release { holder: HolderId },
    Heartbeat { holder: HolderId },
}

/// Result of applying an input
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LeaseOutcome {
    /// Lease was free and is now held by the caller
    Granted,
    /// Lease was held by a stale holder and has been taken over
    Reclaimed { previous: HolderId },
    /// Lease is held by someone else
    Denied { current: HolderId },
    /// Caller already held the lease (acquire or heartbeat)
    Refreshed,
    /// Caller heartbeated a lease it no longer holds
    Lost,
    Released,
    /// Release by a non-holder
    Ignored,
}

impl LeaseOutcome {
    /// Whether the caller holds the lease after the transition
    pub fn is_held(&self) -> bool {
        matches!(
            self,
            LeaseOutcome::Granted | LeaseOutcome::Reclaimed { .. } | LeaseOutcome::Refreshed
        )
    }
}

impl Lease {
    pub fn new(config: LeaseConfig) -> Self {
        Self {
            config,
            state: LeaseState::Free,
        }
    }

    pub fn is_free(&self) -> bool {
        matches!(self.state, LeaseState::Free)
    }

    pub fn is_held_by(&self, holder: &HolderId) -> bool {
        matches!(&self.state, LeaseState::Held { holder: h, .. } if h == holder)
    }

    pub fn holder(&self) -> Option<&HolderId> {
        match &self.state {
            LeaseState::Free => None,
            LeaseState::Held { holder, .. } => Some(holder),
        }
    }

    pub fn is_stale(&self, clock: &impl Clock) -> bool {
        match &self.state {
            LeaseState::Free => false,
            LeaseState::Held { last_heartbeat, .. } => {
                elapsed(*last_heartbeat, clock.now()) > self.config.stale_threshold
            }
        }
    }

    /// Pure state transition function
    pub fn transition(&self, input: LeaseInput, clock: &impl Clock) -> (Lease, LeaseOutcome) {
        let mut next = self.clone();
        let now = clock.now();

        let outcome = match input {
            LeaseInput::Acquire { holder } => match &self.state {
                LeaseState::Free => {
                    next.state = held(holder, now);
                    LeaseOutcome::Granted
                }
                LeaseState::Held { holder: current, .. } if current == &holder => {
                    next.state = refreshed(&self.state, now);
                    LeaseOutcome::Refreshed
                }
                LeaseState::Held { holder: current, .. } => {
                    if self.is_stale(clock) {
                        let previous = current.clone();
                        next.state = held(holder, now);
                        LeaseOutcome::Reclaimed { previous }
                    } else {
                        LeaseOutcome::Denied {
                            current: current.clone(),
                        }
                    }
                }
            },

            LeaseInput::Heartbeat { holder } => match &self.state {
                LeaseState::Held { holder: current, .. } if current == &holder => {
                    next.state = refreshed(&self.state, now);
                    LeaseOutcome::Refreshed
                }
                _ => LeaseOutcome::Lost,
            },

            LeaseInput::Release { holder } => match &self.state {
                LeaseState::Held { holder: current, .. } if current == &holder => {
                    next.state = LeaseState::Free;
                    LeaseOutcome::Released
                }
                _ => LeaseOutcome::Ignored,
            },
        };

        (next, outcome)
    }
}

fn held(holder: HolderId, now: DateTime<Utc>) -> LeaseState {
    LeaseState::Held {
        holder,
        acquired_at: now,
        last_heartbeat: now,
    }
}

fn refreshed(state: &LeaseState, now: DateTime<Utc>) -> LeaseState {
    match state {
        LeaseState::Held {
            holder,
            acquired_at,
            ..
        } => LeaseState::Held {
            holder: holder.clone(),
            acquired_at: *acquired_at,
            last_heartbeat: now,
        },
        LeaseState::Free => LeaseState::Free,
    }
}

#[cfg(test)]
#[path = "lease_tests.rs"]
mod tests;
