// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Bubblewrap isolation for privileged engine commands

use std::path::{Path, PathBuf};

pub const BWRAP: &str = "bwrap";

const CERT_DIRS: &[&str] = &[
    "/etc/ssl/certs",
    "/etc/pki/tls/certs",
    "/system/etc/security/cacerts",
];

/// Directory holding the trusted CA certificates
pub fn certs_dir() -> PathBuf {
    CERT_DIRS
        .iter()
        .map(PathBuf::from)
        .find(|p| p.is_dir())
        .unwrap_or_else(|| PathBuf::from(CERT_DIRS[0]))
}

/// Whether `bwrap` can be found on `PATH`
pub fn available() -> bool {
    std::env::var_os("PATH").is_some_and(|paths| {
        std::env::split_paths(&paths).any(|dir| dir.join(BWRAP).is_file())
    })
}

pub struct Sandbox<'a> {
    /// Configuration root, mounted read-write at `/config`
    pub root: &'a Path,
    /// Working directory relative to the root
    pub relative: &'a Path,
    pub certs: &'a Path,
    pub plugin_cache: Option<&'a Path>,
}

impl Sandbox<'_> {
    /// Command line running `program args..` inside the sandbox. Only the
    /// configuration, DNS resolution and the certificate store are visible.
    pub fn wrap(&self, program: &Path, args: &[String]) -> Vec<String> {
        let name = program
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let bin = format!("/bin/{name}");
        let certs = self.certs.display().to_string();
        let mut wrapped = vec![
            BWRAP.to_string(),
            "--ro-bind".into(),
            program.display().to_string(),
            bin.clone(),
            "--bind".into(),
            self.root.display().to_string(),
            "/config".into(),
            "--ro-bind".into(),
            "/etc/resolv.conf".into(),
            "/etc/resolv.conf".into(),
            "--ro-bind".into(),
            certs.clone(),
            certs,
            "--chdir".into(),
            Path::new("/config").join(self.relative).display().to_string(),
            "--proc".into(),
            "/proc".into(),
            "--tmpfs".into(),
            "/tmp".into(),
        ];
        if let Some(cache) = self.plugin_cache {
            let cache = cache.display().to_string();
            wrapped.extend(["--ro-bind".into(), cache.clone(), cache]);
        }
        wrapped.push(bin);
        wrapped.extend(args.iter().cloned());
        wrapped
    }
}

#[cfg(test)]
#[path = "sandbox_tests.rs"]
mod tests;
