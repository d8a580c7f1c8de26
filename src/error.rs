// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Error taxonomy shared by the reconciliation core and its tool adapters.
// Author: Lukas Bower
#![forbid(unsafe_code)]

use std::path::PathBuf;

use thiserror::Error;

/// Errors surfaced by limine-sbsync operations.
///
/// Variants map onto four failure classes: preconditions (`ToolMissing`,
/// `PackagesMissing`, `NotInSetupMode`, `Settings`), per-item failures (`Io`, `ToolTimeout`,
/// `ToolFailed`), and mutation failures (`BackupFailed`, `ConfigWrite`).
/// A declined confirmation is not an error.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The external signing tool is not installed or not on `PATH`.
    #[error("{tool} is not installed; install it (e.g. `pacman -S {tool}`) and retry")]
    ToolMissing {
        /// Name of the missing executable.
        tool: String,
    },
    /// One or more required packages are absent.
    #[error("missing required packages: {}; install them with `pacman -S {}`", .packages.join(", "), .packages.join(" "))]
    PackagesMissing {
        /// Package names reported absent.
        packages: Vec<String>,
    },
    /// Key enrolment requested while firmware is not in Setup Mode.
    #[error("firmware is not in Setup Mode; enable Setup Mode in the firmware setup before enrolling keys")]
    NotInSetupMode,
    /// An external tool did not finish before its timeout.
    #[error("{tool} timed out after {secs}s")]
    ToolTimeout {
        /// Invoked program.
        tool: String,
        /// Timeout that elapsed.
        secs: u64,
    },
    /// An external tool ran but reported failure.
    #[error("{tool} failed: {detail}")]
    ToolFailed {
        /// Invoked program.
        tool: String,
        /// Exit status or captured diagnostic.
        detail: String,
    },
    /// Reading or hashing a file failed.
    #[error("{}: {source}", .path.display())]
    Io {
        /// Path being accessed.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// Copying the configuration to its backup location failed.
    #[error("backup of {} to {} failed: {source}", .path.display(), .backup.display())]
    BackupFailed {
        /// Live configuration file.
        path: PathBuf,
        /// Intended backup location.
        backup: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// Writing the patched configuration failed.
    #[error("writing {} failed: {source}", .path.display())]
    ConfigWrite {
        /// Live configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The settings file is unreadable or invalid.
    #[error("invalid settings: {0}")]
    Settings(String),
}

impl SyncError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Return `true` for failures that must abort the whole command.
    #[must_use]
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            Self::ToolMissing { .. }
                | Self::PackagesMissing { .. }
                | Self::NotInSetupMode
                | Self::Settings(_)
        )
    }
}

/// Result alias used across the library.
pub type Result<T> = std::result::Result<T, SyncError>;
