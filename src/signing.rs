// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Signing tool interface and the sign-all orchestration pass.
// Author: Lukas Bower
#![forbid(unsafe_code)]

use std::path::{Path, PathBuf};

use log::{info, warn};

use crate::cache::{FileHasher, HashCache};
use crate::discovery::BootEntry;
use crate::error::{Result, SyncError};

/// Firmware and tool state reported by the signing tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SecureBootStatus {
    /// Signing keys are installed on this machine.
    pub installed: bool,
    /// Firmware accepts new keys.
    pub setup_mode: bool,
    /// Secure Boot enforcement is active.
    pub secure_boot: bool,
}

/// Narrow interface onto the external signing tool.
///
/// Implementations own all parsing of tool output; callers only see typed
/// results.
pub trait SigningTool {
    /// Tool name used in diagnostics.
    fn name(&self) -> &str;
    /// Fail with a precondition error when the tool is not installed.
    fn ensure_available(&self) -> Result<()>;
    /// `true` when `path` carries a valid signature.
    fn verify(&self, path: &Path) -> Result<bool>;
    /// Embed a signature in `path`; `true` on apparent success.
    fn sign(&self, path: &Path) -> Result<bool>;
    /// Query key and firmware state.
    fn status(&self) -> Result<SecureBootStatus>;
    /// Generate a fresh signing key set.
    fn create_keys(&self) -> Result<()>;
    /// Enrol the key set into firmware, optionally with vendor certificates.
    fn enroll_keys(&self, include_microsoft: bool) -> Result<()>;
}

/// Per-entry results of [`sign_all`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SignOutcome {
    /// Entries that already verified.
    pub already_signed: Vec<PathBuf>,
    /// Entries signed during this pass.
    pub signed: Vec<PathBuf>,
    /// Entries whose verification or signing failed.
    pub failed: Vec<PathBuf>,
}

impl SignOutcome {
    /// `true` when at least one entry was (re)signed.
    #[must_use]
    pub fn any_signed(&self) -> bool {
        !self.signed.is_empty()
    }

    /// Number of entries examined.
    #[must_use]
    pub fn total(&self) -> usize {
        self.already_signed.len() + self.signed.len() + self.failed.len()
    }
}

/// Verify every entry and sign those that do not verify.
///
/// Tool absence is checked once up front and aborts the pass. Failures on
/// individual entries are logged and skipped. Each successfully signed path
/// is evicted from `cache` since its content changed.
pub fn sign_all<H: FileHasher>(
    tool: &dyn SigningTool,
    entries: &[BootEntry],
    cache: &mut HashCache<H>,
) -> Result<SignOutcome> {
    tool.ensure_available()?;
    let mut outcome = SignOutcome::default();
    for entry in entries {
        let path = entry.path.as_path();
        match tool.verify(path) {
            Ok(true) => {
                outcome.already_signed.push(path.to_path_buf());
                continue;
            }
            Ok(false) => {}
            Err(err) => {
                warn!("verify {} failed: {err}", path.display());
                outcome.failed.push(path.to_path_buf());
                continue;
            }
        }
        match tool.sign(path) {
            Ok(true) => {
                cache.invalidate(path);
                info!("signed {}", path.display());
                outcome.signed.push(path.to_path_buf());
            }
            Ok(false) => {
                warn!("{} reported failure signing {}", tool.name(), path.display());
                outcome.failed.push(path.to_path_buf());
            }
            Err(err) => {
                warn!("sign {} failed: {err}", path.display());
                outcome.failed.push(path.to_path_buf());
            }
        }
    }
    Ok(outcome)
}

/// Enrol keys, refusing unless the firmware reports Setup Mode.
pub fn enroll(tool: &dyn SigningTool, include_microsoft: bool) -> Result<()> {
    tool.ensure_available()?;
    let status = tool.status()?;
    if !status.setup_mode {
        return Err(SyncError::NotInSetupMode);
    }
    if !status.installed {
        info!("no {} keys installed; creating keys first", tool.name());
        tool.create_keys()?;
    }
    tool.enroll_keys(include_microsoft)?;
    info!("enrolled keys (microsoft={include_microsoft})");
    Ok(())
}
