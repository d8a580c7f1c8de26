// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Run external tools with a wall-clock timeout.
// Author: Lukas Bower
#![forbid(unsafe_code)]

use std::io::Read;
use std::process::{Command, ExitStatus, Stdio};
use std::thread;
use std::time::Duration;

use log::{debug, warn};
use wait_timeout::ChildExt;

use crate::error::{Result, SyncError};

/// Captured result of one external tool run.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    /// Exit status of the process.
    pub status: ExitStatus,
    /// Captured standard output, lossily decoded.
    pub stdout: String,
    /// Captured standard error, lossily decoded.
    pub stderr: String,
}

impl ToolOutput {
    /// First non-empty line of stderr, falling back to stdout.
    #[must_use]
    pub fn diagnostic(&self) -> String {
        [&self.stderr, &self.stdout]
            .iter()
            .flat_map(|text| text.lines())
            .map(str::trim)
            .find(|line| !line.is_empty())
            .map_or_else(|| format!("exited with {}", self.status), str::to_owned)
    }
}

/// Run `program args...`, killing it once `timeout` elapses.
///
/// A program that cannot be found maps to [`SyncError::ToolMissing`]; an
/// elapsed timeout maps to [`SyncError::ToolTimeout`]. A non-zero exit is
/// returned as a normal [`ToolOutput`] for the caller to interpret.
pub fn run_tool(program: &str, args: &[&str], timeout: Duration) -> Result<ToolOutput> {
    debug!("running {program} {}", args.join(" "));
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|err| match err.kind() {
            std::io::ErrorKind::NotFound => SyncError::ToolMissing {
                tool: program.to_owned(),
            },
            _ => SyncError::ToolFailed {
                tool: program.to_owned(),
                detail: format!("spawn: {err}"),
            },
        })?;

    let stdout = child.stdout.take().map(drain);
    let stderr = child.stderr.take().map(drain);

    let status = match child.wait_timeout(timeout) {
        Ok(Some(status)) => status,
        Ok(None) => {
            warn!("{program} exceeded {}s; killing", timeout.as_secs());
            let _ = child.kill();
            let _ = child.wait();
            return Err(SyncError::ToolTimeout {
                tool: program.to_owned(),
                secs: timeout.as_secs(),
            });
        }
        Err(err) => {
            let _ = child.kill();
            return Err(SyncError::ToolFailed {
                tool: program.to_owned(),
                detail: format!("wait: {err}"),
            });
        }
    };

    Ok(ToolOutput {
        status,
        stdout: stdout.map(join_drain).unwrap_or_default(),
        stderr: stderr.map(join_drain).unwrap_or_default(),
    })
}

fn drain<R: Read + Send + 'static>(mut pipe: R) -> thread::JoinHandle<String> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        String::from_utf8_lossy(&buf).into_owned()
    })
}

fn join_drain(handle: thread::JoinHandle<String>) -> String {
    handle.join().unwrap_or_default()
}
