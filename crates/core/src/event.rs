// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Change events emitted by the store for watchers

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Created,
    Updated,
    Deleted,
}

/// A record changed. For deletions the payload is the last known value.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent<T> {
    pub kind: ChangeKind,
    pub payload: T,
}

impl<T> ChangeEvent<T> {
    pub fn created(payload: T) -> Self {
        Self {
            kind: ChangeKind::Created,
            payload,
        }
    }

    pub fn updated(payload: T) -> Self {
        Self {
            kind: ChangeKind::Updated,
            payload,
        }
    }

    pub fn deleted(payload: T) -> Self {
        Self {
            kind: ChangeKind::Deleted,
            payload,
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.kind == ChangeKind::Deleted
    }
}

#[cfg(test)]
#[path = "event_tests.rs"]
mod tests;
