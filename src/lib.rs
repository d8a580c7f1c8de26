// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Shared library for keeping limine.conf hashes in step with signed boot images.
// Author: Lukas Bower
#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! Secure Boot hash reconciliation for Limine.
//!
//! Signing a boot executable changes its bytes, which invalidates the
//! BLAKE2b-512 hash Limine verifies from `image_path: <path>#<hash>`. This
//! crate discovers boot executables, signs them through an external tool and
//! rewrites the affected hash fragments in `limine.conf` under backup.

/// Session-scoped backups and crash recovery.
pub mod backup;
/// Memoised file hashing keyed on modification time.
pub mod cache;
/// Bulk-update confirmation.
pub mod confirm;
/// Identity and verification digest types.
pub mod digest;
/// Boot tree scanning and entry classification.
pub mod discovery;
/// Library error taxonomy.
pub mod error;
/// Typed model of `limine.conf`.
pub mod limine;
/// Required package checks.
pub mod packages;
/// Bounded external process execution.
pub mod process;
/// `sbctl` adapter.
pub mod sbctl;
/// Configuration reconciler.
pub mod session;
/// Settings file loading.
pub mod settings;
/// Signing orchestration.
pub mod signing;

pub use error::{Result, SyncError};
pub use session::SyncSession;

/// Outcome marker for a transcript line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditStatus {
    /// Step completed.
    Ok,
    /// Step failed.
    Err,
}

impl AuditStatus {
    fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::Err => "ERR",
        }
    }
}

/// Buffered transcript of user-facing summary lines.
#[derive(Debug, Default)]
pub struct SyncAudit {
    lines: Vec<String>,
}

impl SyncAudit {
    /// Create a new empty transcript.
    #[must_use]
    pub fn new() -> Self {
        Self { lines: Vec::new() }
    }

    /// Borrow the collected transcript lines.
    #[must_use]
    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// Consume the transcript and return the captured lines.
    #[must_use]
    pub fn into_lines(self) -> Vec<String> {
        self.lines
    }

    /// Append an acknowledgement line such as `OK SIGN signed=2`.
    pub fn push_ack(&mut self, status: AuditStatus, verb: &str, detail: Option<&str>) {
        let mut line = format!("{} {verb}", status.as_str());
        if let Some(detail) = detail.filter(|detail| !detail.is_empty()) {
            line.push(' ');
            line.push_str(detail);
        }
        self.lines.push(line);
    }

    /// Append a plain output line.
    pub fn push_line(&mut self, line: impl Into<String>) {
        self.lines.push(line.into());
    }
}
