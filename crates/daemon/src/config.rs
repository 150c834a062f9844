// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! orkd configuration file and the paths derived from it

use std::path::{Path, PathBuf};

use ork_engine::{BackoffConfig, DaemonConfig, ManagerConfig};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("reading config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parsing config {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("could not determine state directory")]
    NoStateDir,
}

/// Contents of `orkd.toml`. Every section and field is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub daemon: DaemonSection,
    pub manager: ManagerConfig,
    pub allocator: AllocatorSection,
    pub runner: RunnerSection,
    pub tokens: TokensSection,
    pub remote: RemoteSection,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonSection {
    /// Defaults to `$XDG_STATE_HOME/ork`
    pub state_dir: Option<PathBuf>,
    /// Defaults to `<state_dir>/orkd.sock`
    pub socket_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AllocatorSection {
    /// Restart policy when the allocator loop fails or loses its lease
    #[serde(flatten)]
    pub backoff: BackoffConfig,
}

/// The embedded server runner
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerSection {
    pub enabled: bool,
    /// Where downloaded engine binaries are cached; defaults to
    /// `<state_dir>/engines`
    pub engine_dir: Option<PathBuf>,
    /// Release server the engine is downloaded from
    pub engine_url: Option<String>,
    /// Name of the engine binary inside a release; defaults to `tofu`
    pub engine_binary: Option<String>,
    #[serde(flatten)]
    pub daemon: DaemonConfig,
}

impl Default for RunnerSection {
    fn default() -> Self {
        Self {
            enabled: true,
            engine_dir: None,
            engine_url: None,
            engine_binary: None,
            daemon: DaemonConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TokensSection {
    /// Key for job and agent tokens. Generated and kept in the state
    /// directory when unset.
    pub secret: Option<String>,
    /// Key for workload identity tokens; dynamic credentials are
    /// unavailable without it
    pub dynamic_credentials_secret: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteSection {
    /// Defaults to `<state_dir>/remote`
    pub root: Option<PathBuf>,
}

impl Config {
    /// Read `path`, or return the defaults when no file is given
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn parse(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    pub fn with_state_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.daemon.state_dir = Some(dir.into());
        self
    }

    pub fn with_runner_enabled(mut self, enabled: bool) -> Self {
        self.runner.enabled = enabled;
        self
    }

    /// Resolve every file location the daemon uses
    pub fn paths(&self) -> Result<Paths, ConfigError> {
        let state_dir = match &self.daemon.state_dir {
            Some(dir) => dir.clone(),
            None => default_state_dir()?,
        };
        Ok(Paths {
            socket_path: self
                .daemon
                .socket_path
                .clone()
                .unwrap_or_else(|| state_dir.join("orkd.sock")),
            lock_path: state_dir.join("orkd.pid"),
            version_path: state_dir.join("orkd.version"),
            log_path: state_dir.join("orkd.log"),
            wal_path: state_dir.join("wal").join("ork.wal"),
            secret_path: state_dir.join("token.secret"),
            remote_root: self
                .remote
                .root
                .clone()
                .unwrap_or_else(|| state_dir.join("remote")),
            engine_dir: self
                .runner
                .engine_dir
                .clone()
                .unwrap_or_else(|| state_dir.join("engines")),
            state_dir,
        })
    }
}

/// Resolved file locations
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Paths {
    pub state_dir: PathBuf,
    pub socket_path: PathBuf,
    /// Holds the daemon PID under an exclusive lock
    pub lock_path: PathBuf,
    pub version_path: PathBuf,
    pub log_path: PathBuf,
    pub wal_path: PathBuf,
    pub secret_path: PathBuf,
    pub remote_root: PathBuf,
    pub engine_dir: PathBuf,
}

fn default_state_dir() -> Result<PathBuf, ConfigError> {
    if let Ok(xdg) = std::env::var("XDG_STATE_HOME") {
        return Ok(PathBuf::from(xdg).join("ork"));
    }
    dirs::state_dir()
        .or_else(|| dirs::home_dir().map(|home| home.join(".local").join("state")))
        .map(|dir| dir.join("ork"))
        .ok_or(ConfigError::NoStateDir)
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
