// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-run working directory
//!
//! The configuration tarball is unpacked into a temporary root. The engine
//! runs in `root/<relative>`, the workspace's working directory within the
//! configuration.

use std::io;
use std::path::{Component, Path, PathBuf};

use flate2::read::GzDecoder;
use ork_core::RunId;
use tempfile::TempDir;

pub struct Workdir {
    root: TempDir,
    relative: PathBuf,
}

impl Workdir {
    /// Create a fresh root under `parent` (the system temp dir when `None`)
    pub fn new(parent: Option<&Path>, relative: &str, run: &RunId) -> io::Result<Self> {
        let relative = PathBuf::from(relative);
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
        {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid working directory: {}", relative.display()),
            ));
        }
        let prefix = format!("ork-{run}-");
        let mut builder = tempfile::Builder::new();
        builder.prefix(&prefix);
        let root = match parent {
            Some(parent) => {
                std::fs::create_dir_all(parent)?;
                builder.tempdir_in(parent)?
            }
            None => builder.tempdir()?,
        };
        std::fs::create_dir_all(root.path().join(&relative))?;
        Ok(Self { root, relative })
    }

    pub fn root(&self) -> &Path {
        self.root.path()
    }

    pub fn relative(&self) -> &Path {
        &self.relative
    }

    /// Directory the engine runs in
    pub fn path(&self) -> PathBuf {
        self.root.path().join(&self.relative)
    }

    pub fn file(&self, name: &str) -> PathBuf {
        self.path().join(name)
    }

    pub fn write_file(&self, name: &str, data: &[u8]) -> io::Result<()> {
        std::fs::write(self.file(name), data)
    }

    pub fn read_file(&self, name: &str) -> io::Result<Vec<u8>> {
        std::fs::read(self.file(name))
    }

    /// Unpack a gzipped tarball into the root
    pub fn unpack(&self, tarball: &[u8]) -> io::Result<()> {
        let mut archive = tar::Archive::new(GzDecoder::new(tarball));
        archive.set_preserve_permissions(true);
        archive.unpack(self.root.path())
    }

    /// Strip remote-state wiring from every `.tf` file in the working
    /// directory, returning the files that changed
    pub fn remove_backend_config(&self) -> io::Result<Vec<PathBuf>> {
        let mut changed = Vec::new();
        for entry in std::fs::read_dir(self.path())? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("tf") || !path.is_file() {
                continue;
            }
            let source = std::fs::read_to_string(&path)?;
            if let Some(stripped) = strip_backend_blocks(&source) {
                std::fs::write(&path, stripped)?;
                changed.push(path);
            }
        }
        Ok(changed)
    }

    /// Leave the directory on disk and return its root
    pub fn keep(self) -> PathBuf {
        self.root.keep()
    }

    pub fn close(self) -> io::Result<()> {
        self.root.close()
    }
}

/// Remove `backend` and `cloud` blocks nested directly in top-level
/// `terraform` blocks. `None` when there is nothing to remove.
pub fn strip_backend_blocks(source: &str) -> Option<String> {
    let bytes = source.as_bytes();
    let mut out = String::with_capacity(source.len());
    // One entry per open brace: whether it opened a top-level terraform block
    let mut blocks: Vec<bool> = Vec::new();
    let mut statement = 0;
    let mut copied = 0;
    let mut i = 0;
    while i < bytes.len() {
        if let Some(next) = skip_literal(bytes, i) {
            i = next;
            continue;
        }
        match bytes[i] {
            b'{' => {
                let keyword = source[statement..i].split_whitespace().next().unwrap_or("");
                if blocks.len() == 1 && blocks[0] && matches!(keyword, "backend" | "cloud") {
                    let end = closing_brace(bytes, i);
                    out.push_str(&source[copied..statement]);
                    copied = end;
                    i = end;
                    statement = end;
                    continue;
                }
                blocks.push(blocks.is_empty() && keyword == "terraform");
                i += 1;
                statement = i;
            }
            b'}' => {
                blocks.pop();
                i += 1;
                statement = i;
            }
            b'\n' => {
                i += 1;
                statement = i;
            }
            _ => i += 1,
        }
    }
    if copied == 0 {
        return None;
    }
    out.push_str(&source[copied..]);
    Some(out)
}

/// Index just past the brace matching the one at `open`
fn closing_brace(bytes: &[u8], open: usize) -> usize {
    let mut depth = 0usize;
    let mut i = open;
    while i < bytes.len() {
        if let Some(next) = skip_literal(bytes, i) {
            i = next;
            continue;
        }
        match bytes[i] {
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return i + 1;
                }
            }
            _ => {}
        }
        i += 1;
    }
    bytes.len()
}

/// Skip a string or comment starting at `i`
fn skip_literal(bytes: &[u8], i: usize) -> Option<usize> {
    match (bytes[i], bytes.get(i + 1)) {
        (b'"', _) => {
            let mut j = i + 1;
            while j < bytes.len() {
                match bytes[j] {
                    b'\\' => j += 2,
                    b'"' => return Some(j + 1),
                    b'\n' => return Some(j),
                    _ => j += 1,
                }
            }
            Some(bytes.len())
        }
        (b'#', _) | (b'/', Some(b'/')) => Some(
            bytes[i..]
                .iter()
                .position(|b| *b == b'\n')
                .map_or(bytes.len(), |p| i + p),
        ),
        (b'/', Some(b'*')) => Some(
            bytes[i + 2..]
                .windows(2)
                .position(|w| w == b"*/")
                .map_or(bytes.len(), |p| i + 2 + p + 2),
        ),
        _ => None,
    }
}

#[cfg(test)]
#[path = "workdir_tests.rs"]
mod tests;
