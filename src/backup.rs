// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Timestamped configuration backups and mutation recovery.
// Author: Lukas Bower
#![forbid(unsafe_code)]

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Local;
use log::{error, info, warn};

use crate::error::{Result, SyncError};

/// Outcome of [`BackupLedger::recover`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recovery {
    /// No mutation was in flight; nothing was touched.
    NotNeeded,
    /// The latest backup was copied back over the live file.
    Restored(PathBuf),
    /// A mutation was in flight but restoration was impossible or failed.
    Failed,
}

/// Session-scoped list of backups plus the mutation-in-flight flag.
///
/// The flag brackets a whole multi-line update. Restoration is all or
/// nothing: the live file is replaced by the most recent backup.
#[derive(Debug)]
pub struct BackupLedger {
    target: PathBuf,
    suffix: String,
    backups: Vec<PathBuf>,
    in_flight: bool,
}

impl BackupLedger {
    /// Track backups of `target` named `<target>.<suffix>.<YYYYMMDD_HHMMSS>`.
    pub fn new(target: impl Into<PathBuf>, suffix: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            suffix: suffix.into(),
            backups: Vec::new(),
            in_flight: false,
        }
    }

    /// Backups created this session, oldest first.
    #[must_use]
    pub fn backups(&self) -> &[PathBuf] {
        &self.backups
    }

    /// Most recent backup, if any.
    #[must_use]
    pub fn latest(&self) -> Option<&Path> {
        self.backups.last().map(PathBuf::as_path)
    }

    /// Copy the live file to a new timestamped backup and record it.
    ///
    /// Two backups inside the same second share a name; the later copy wins.
    pub fn backup(&mut self) -> Result<PathBuf> {
        let stamp = Local::now().format("%Y%m%d_%H%M%S");
        let mut name = self.target.as_os_str().to_owned();
        name.push(format!(".{}.{stamp}", self.suffix));
        let backup = PathBuf::from(name);
        fs::copy(&self.target, &backup).map_err(|source| SyncError::BackupFailed {
            path: self.target.clone(),
            backup: backup.clone(),
            source,
        })?;
        info!("backed up {} to {}", self.target.display(), backup.display());
        self.backups.push(backup.clone());
        Ok(backup)
    }

    /// Copy the most recent backup over the live file.
    pub fn restore_latest(&self) -> bool {
        let Some(latest) = self.latest() else {
            warn!("no backup available to restore {}", self.target.display());
            return false;
        };
        match fs::copy(latest, &self.target) {
            Ok(_) => {
                info!("restored {} from {}", self.target.display(), latest.display());
                true
            }
            Err(err) => {
                error!(
                    "failed to restore {} from {}: {err}",
                    self.target.display(),
                    latest.display()
                );
                false
            }
        }
    }

    /// Mark the start of a multi-step mutation.
    pub fn begin_mutation(&mut self) {
        self.in_flight = true;
    }

    /// Mark the whole mutation as committed.
    pub fn commit_mutation(&mut self) {
        self.in_flight = false;
    }

    /// `true` between [`begin_mutation`](Self::begin_mutation) and
    /// [`commit_mutation`](Self::commit_mutation).
    #[must_use]
    pub fn mutation_in_flight(&self) -> bool {
        self.in_flight
    }

    /// Restore the latest backup iff a mutation was left in flight.
    pub fn recover(&mut self) -> Recovery {
        if !self.in_flight {
            return Recovery::NotNeeded;
        }
        error!(
            "mutation of {} interrupted; restoring latest backup",
            self.target.display()
        );
        let outcome = if self.restore_latest() {
            self.latest()
                .map_or(Recovery::Failed, |path| Recovery::Restored(path.to_path_buf()))
        } else {
            Recovery::Failed
        };
        self.in_flight = false;
        outcome
    }
}
