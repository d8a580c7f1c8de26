// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: sbctl adapter translating tool output into typed results.
// Author: Lukas Bower
#![forbid(unsafe_code)]

//! Every phrase marker scraped from `sbctl` output lives in this module.
//! The markers track sbctl's human-readable output and are the most fragile
//! contract in the crate.

use std::path::Path;
use std::time::Duration;

use log::debug;

use crate::error::{Result, SyncError};
use crate::process::{run_tool, ToolOutput};
use crate::signing::{SecureBootStatus, SigningTool};

const MARKER_NOT_SIGNED: &str = "is not signed";
const MARKER_SIGNED: &str = "is signed";
const MARKER_INSTALLED: &str = "Installed:";
const MARKER_NOT_INSTALLED: &str = "not installed";
const MARKER_SETUP_MODE: &str = "Setup Mode:";
const MARKER_SECURE_BOOT: &str = "Secure Boot:";
const MARKER_ENABLED: &str = "Enabled";

/// `sbctl`-backed [`SigningTool`].
#[derive(Debug, Clone)]
pub struct Sbctl {
    program: String,
    timeout: Duration,
}

impl Sbctl {
    /// Adapter invoking `program` with a per-call `timeout`.
    pub fn new(program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }

    fn run(&self, args: &[&str]) -> Result<ToolOutput> {
        run_tool(&self.program, args, self.timeout)
    }

    fn run_checked(&self, args: &[&str]) -> Result<ToolOutput> {
        let output = self.run(args)?;
        if !output.status.success() {
            return Err(SyncError::ToolFailed {
                tool: format!("{} {}", self.program, args.first().copied().unwrap_or("")),
                detail: output.diagnostic(),
            });
        }
        Ok(output)
    }
}

impl SigningTool for Sbctl {
    fn name(&self) -> &str {
        &self.program
    }

    fn ensure_available(&self) -> Result<()> {
        which::which(&self.program)
            .map(|path| debug!("{} resolved to {}", self.program, path.display()))
            .map_err(|_| SyncError::ToolMissing {
                tool: self.program.clone(),
            })
    }

    fn verify(&self, path: &Path) -> Result<bool> {
        let path_arg = path.to_string_lossy();
        let output = self.run(&["verify", path_arg.as_ref()])?;
        parse_verify(&output.stdout)
            .or_else(|| parse_verify(&output.stderr))
            .ok_or_else(|| SyncError::ToolFailed {
                tool: format!("{} verify", self.program),
                detail: format!("unrecognised output for {}: {}", path.display(), output.diagnostic()),
            })
    }

    fn sign(&self, path: &Path) -> Result<bool> {
        let path_arg = path.to_string_lossy();
        let output = self.run(&["sign", "-s", path_arg.as_ref()])?;
        if !output.status.success() {
            debug!("sbctl sign {}: {}", path.display(), output.diagnostic());
        }
        Ok(output.status.success())
    }

    fn status(&self) -> Result<SecureBootStatus> {
        let output = self.run(&["status"])?;
        Ok(parse_status(&output.stdout))
    }

    fn create_keys(&self) -> Result<()> {
        self.run_checked(&["create-keys"]).map(|_| ())
    }

    fn enroll_keys(&self, include_microsoft: bool) -> Result<()> {
        if include_microsoft {
            self.run_checked(&["enroll-keys", "-m"]).map(|_| ())
        } else {
            self.run_checked(&["enroll-keys"]).map(|_| ())
        }
    }
}

/// Interpret `sbctl verify` output; `None` when no marker is present.
#[must_use]
pub fn parse_verify(text: &str) -> Option<bool> {
    if text.contains(MARKER_NOT_SIGNED) {
        Some(false)
    } else if text.contains(MARKER_SIGNED) {
        Some(true)
    } else {
        None
    }
}

/// Interpret `sbctl status` output.
#[must_use]
pub fn parse_status(text: &str) -> SecureBootStatus {
    let mut status = SecureBootStatus::default();
    for line in text.lines() {
        if let Some(rest) = line.trim().strip_prefix(MARKER_INSTALLED) {
            status.installed = !rest.contains(MARKER_NOT_INSTALLED);
        } else if let Some(rest) = line.trim().strip_prefix(MARKER_SETUP_MODE) {
            status.setup_mode = rest.contains(MARKER_ENABLED);
        } else if let Some(rest) = line.trim().strip_prefix(MARKER_SECURE_BOOT) {
            status.secure_boot = rest.contains(MARKER_ENABLED);
        }
    }
    status
}
