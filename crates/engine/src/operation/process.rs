// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Engine child processes

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex};

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tokio::io::{AsyncRead, AsyncReadExt};

use super::output::PhaseOutput;

/// Pid of the child an operation is currently waiting on
#[derive(Clone, Default)]
pub struct CurrentProcess {
    pid: Arc<Mutex<Option<u32>>>,
}

impl CurrentProcess {
    fn set(&self, pid: Option<u32>) {
        *self.pid.lock().unwrap_or_else(|e| e.into_inner()) = pid;
    }

    pub fn pid(&self) -> Option<u32> {
        *self.pid.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Interrupt the child, or kill it when `force` is set
    pub fn signal(&self, force: bool) {
        let Some(pid) = self.pid() else {
            return;
        };
        let signal = if force {
            Signal::SIGKILL
        } else {
            Signal::SIGINT
        };
        tracing::debug!(pid, %signal, "signaling engine process");
        if let Err(e) = kill(Pid::from_raw(pid as i32), signal) {
            tracing::warn!(pid, %signal, error = %e, "failed to signal engine process");
        }
    }
}

/// A command line to run in the working directory
pub struct Invocation<'a> {
    pub args: Vec<String>,
    pub dir: &'a Path,
    pub env: &'a [(String, String)],
    /// Send stdout to this file instead of the output
    pub stdout_to: Option<PathBuf>,
}

/// How a child ended
pub struct Exit {
    pub status: ExitStatus,
    /// Stderr, cleaned for use in an error message
    pub stderr: String,
}

/// Run a child to completion. Stdout and stderr stream to `output`; stderr
/// is also captured.
pub async fn run(
    invocation: Invocation<'_>,
    output: &PhaseOutput,
    current: &CurrentProcess,
) -> std::io::Result<Exit> {
    let Some((program, args)) = invocation.args.split_first() else {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "missing command name",
        ));
    };
    let mut command = tokio::process::Command::new(program);
    command
        .args(args)
        .current_dir(invocation.dir)
        .envs(invocation.env.iter().map(|(k, v)| (k, v)))
        .stdin(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    match &invocation.stdout_to {
        Some(path) => command.stdout(std::fs::File::create(path)?),
        None => command.stdout(Stdio::piped()),
    };

    let mut child = command.spawn()?;
    current.set(child.id());
    tracing::debug!(program, ?args, pid = ?child.id(), "executing process");

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let (_, captured) = tokio::join!(
        async {
            if let Some(stdout) = stdout {
                pipe(stdout, output, None).await;
            }
        },
        async {
            let mut captured = Vec::new();
            if let Some(stderr) = stderr {
                pipe(stderr, output, Some(&mut captured)).await;
            }
            captured
        }
    );
    let status = child.wait().await;
    current.set(None);
    Ok(Exit {
        status: status?,
        stderr: clean_stderr(&String::from_utf8_lossy(&captured)),
    })
}

async fn pipe<R: AsyncRead + Unpin>(
    mut reader: R,
    output: &PhaseOutput,
    mut capture: Option<&mut Vec<u8>>,
) {
    let mut buf = [0u8; 8192];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => return,
            Ok(n) => {
                output.write(&buf[..n]).await;
                if let Some(capture) = capture.as_mut() {
                    capture.extend_from_slice(&buf[..n]);
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "reading engine output failed");
                return;
            }
        }
    }
}

/// Strip ANSI escapes and non-ASCII characters and collapse whitespace to
/// single spaces
pub fn clean_stderr(stderr: &str) -> String {
    let mut plain = String::with_capacity(stderr.len());
    let mut chars = stderr.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\u{1b}' {
            if chars.peek() == Some(&'[') {
                chars.next();
                // Parameters and intermediates up to the final byte
                for c in chars.by_ref() {
                    if ('\u{40}'..='\u{7e}').contains(&c) {
                        break;
                    }
                }
            } else {
                chars.next();
            }
            continue;
        }
        if c.is_ascii() {
            plain.push(c);
        }
    }
    plain.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
#[path = "process_tests.rs"]
mod tests;
