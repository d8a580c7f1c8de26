// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Package presence checks run before any signing work.
// Author: Lukas Bower
#![forbid(unsafe_code)]

use std::time::Duration;

use log::debug;

use crate::error::{Result, SyncError};
use crate::process::run_tool;

/// Reports whether packages are installed.
pub trait PackageQuery {
    /// `true` when `name` is installed.
    fn is_installed(&self, name: &str) -> Result<bool>;
}

/// `pacman -Q` backed package query.
#[derive(Debug, Clone)]
pub struct Pacman {
    timeout: Duration,
}

impl Pacman {
    /// Query with a per-call `timeout`.
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl PackageQuery for Pacman {
    fn is_installed(&self, name: &str) -> Result<bool> {
        let output = run_tool("pacman", &["-Q", name], self.timeout)?;
        debug!("pacman -Q {name}: {}", output.status);
        Ok(output.status.success())
    }
}

/// Names from `packages` that `query` reports absent.
pub fn missing_packages(query: &dyn PackageQuery, packages: &[String]) -> Result<Vec<String>> {
    let mut missing = Vec::new();
    for name in packages {
        if !query.is_installed(name)? {
            missing.push(name.clone());
        }
    }
    Ok(missing)
}

/// Fail with every absent package named at once.
pub fn require_packages(query: &dyn PackageQuery, packages: &[String]) -> Result<()> {
    let missing = missing_packages(query, packages)?;
    if missing.is_empty() {
        Ok(())
    } else {
        Err(SyncError::PackagesMissing { packages: missing })
    }
}
