// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Infrastructure engine binaries

mod release;

pub use release::ReleaseDownloader;

// Test support - only compiled for tests or when explicitly requested
#[cfg(any(test, feature = "test-support"))]
mod fake;
#[cfg(any(test, feature = "test-support"))]
pub use fake::FakeDownloader;

use std::path::PathBuf;

use async_trait::async_trait;
use thiserror::Error;

/// Errors from fetching an engine binary
#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("invalid engine version: {0:?}")]
    InvalidVersion(String),

    #[error("download of {url} failed: {message}")]
    Http { url: String, message: String },

    #[error("release archive does not contain {0}")]
    MissingBinary(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Resolves an engine version to an executable on local disk
#[async_trait]
pub trait ToolDownloader: Send + Sync {
    async fn download(&self, version: &str) -> Result<PathBuf, DownloadError>;
}
