// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Write-ahead log for durable storage
//!
//! One JSON entry per line. A torn final line (crash mid-append) is
//! dropped on replay; corruption anywhere else is an error.

use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::Path;

use ork_core::Operation;
use thiserror::Error;

/// Errors that can occur in WAL operations
#[derive(Debug, Error)]
pub enum WalError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("JSON error at line {line}: {source}")]
    Json {
        line: usize,
        #[source]
        source: serde_json::Error,
    },
    #[error("JSON error: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Write-ahead log for durable operation storage
pub struct Wal {
    file: File,
    sequence: u64,
}

impl Wal {
    /// Open or create a WAL at the given path
    pub fn open(path: &Path) -> Result<Self, WalError> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .read(true)
            .open(path)?;

        let reader = BufReader::new(File::open(path)?);
        let sequence = reader.lines().count() as u64;

        Ok(Self { file, sequence })
    }

    /// Append an operation to the log and sync it to disk
    pub fn append(&mut self, op: &Operation) -> Result<u64, WalError> {
        let entry = WalEntry {
            seq: self.sequence + 1,
            op: op.clone(),
        };
        let line = serde_json::to_string(&entry)?;
        writeln!(self.file, "{}", line)?;
        self.file.sync_data()?;
        self.sequence += 1;
        Ok(self.sequence)
    }

    /// Get the current sequence number
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Replay all operations from the log
    pub fn replay(path: &Path) -> Result<Vec<Operation>, WalError> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let lines = BufReader::new(file)
            .lines()
            .collect::<Result<Vec<_>, _>>()?;
        let last = lines.len();
        let mut ops = Vec::with_capacity(lines.len());

        for (idx, line) in lines.iter().enumerate() {
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<WalEntry>(line) {
                Ok(entry) => ops.push(entry.op),
                Err(e) if idx + 1 == last => {
                    tracing::warn!(line = idx + 1, error = %e, "dropping torn WAL entry");
                }
                Err(source) => {
                    return Err(WalError::Json {
                        line: idx + 1,
                        source,
                    })
                }
            }
        }

        Ok(ops)
    }

    /// Replace the log at `path` with `ops`, atomically via rename
    pub fn compact(path: &Path, ops: &[Operation]) -> Result<(), WalError> {
        let tmp = path.with_extension("compact");
        {
            let mut file = File::create(&tmp)?;
            for (idx, op) in ops.iter().enumerate() {
                let entry = WalEntry {
                    seq: idx as u64 + 1,
                    op: op.clone(),
                };
                writeln!(file, "{}", serde_json::to_string(&entry)?)?;
            }
            file.sync_all()?;
        }
        std::fs::rename(&tmp, path)?;
        Ok(())
    }
}

#[derive(Debug, serde::Serialize, serde::Deserialize)]
struct WalEntry {
    seq: u64,
    op: Operation,
}

#[cfg(test)]
#[path = "wal_tests.rs"]
mod tests;
