// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Fake engine downloader for testing
#![cfg_attr(coverage_nightly, coverage(off))]

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use super::{DownloadError, ToolDownloader};

/// Returns a fixed binary for every version and records requests
#[derive(Clone)]
pub struct FakeDownloader {
    binary: PathBuf,
    versions: Arc<Mutex<Vec<String>>>,
}

impl FakeDownloader {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            versions: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Versions requested so far
    pub fn versions(&self) -> Vec<String> {
        self.versions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl ToolDownloader for FakeDownloader {
    async fn download(&self, version: &str) -> Result<PathBuf, DownloadError> {
        self.versions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(version.to_string());
        Ok(self.binary.clone())
    }
}
