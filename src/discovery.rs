// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Discover signable boot executables under the boot tree.
// Author: Lukas Bower
#![forbid(unsafe_code)]

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use log::{debug, warn};
use regex::Regex;
use walkdir::WalkDir;

use crate::digest::IdentityDigest;

/// Whether an entry is the live kernel image or a historical snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    /// Live kernel image (or bootloader stage) outside the snapshot history.
    Current,
    /// Image under the snapshot history directory.
    Snapshot,
}

/// One discovered boot executable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootEntry {
    /// Absolute location on disk.
    pub path: PathBuf,
    /// Classification derived from the path.
    pub kind: EntryKind,
    /// Identity token parsed from a snapshot file name.
    pub snapshot_token: Option<IdentityDigest>,
}

impl BootEntry {
    /// File name component as UTF-8, if representable.
    #[must_use]
    pub fn file_name(&self) -> Option<&str> {
        self.path.file_name().and_then(|name| name.to_str())
    }

    /// `true` for snapshot entries whose token could be extracted.
    #[must_use]
    pub fn has_valid_token(&self) -> bool {
        self.kind == EntryKind::Snapshot && self.snapshot_token.is_some()
    }
}

/// Inputs controlling [`find_boot_entries`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryRules {
    /// Root of the boot tree.
    pub boot_dir: PathBuf,
    /// Case-insensitive executable suffix, e.g. `.efi`.
    pub efi_suffix: String,
    /// Path marker identifying snapshot history.
    pub snapshot_marker: String,
    /// Case-insensitive substrings marking foreign-OS files.
    pub foreign_markers: Vec<String>,
}

impl DiscoveryRules {
    /// Case-insensitive test for the snapshot marker in `text`.
    #[must_use]
    pub fn is_snapshot_path(&self, text: &str) -> bool {
        contains_ignore_case(text, &self.snapshot_marker)
    }

    /// Case-insensitive test for any foreign-OS marker in `text`.
    #[must_use]
    pub fn is_foreign(&self, text: &str) -> bool {
        self.foreign_markers
            .iter()
            .any(|marker| contains_ignore_case(text, marker))
    }

    fn has_efi_suffix(&self, name: &str) -> bool {
        name.to_ascii_lowercase()
            .ends_with(&self.efi_suffix.to_ascii_lowercase())
    }
}

fn token_regex() -> &'static Regex {
    static TOKEN: OnceLock<Regex> = OnceLock::new();
    TOKEN.get_or_init(|| {
        Regex::new(r"_sha256_([0-9A-Fa-f]{64})").expect("snapshot token pattern")
    })
}

/// Extract the `_sha256_<hex64>` identity token from `text`.
#[must_use]
pub fn extract_snapshot_token(text: &str) -> Option<IdentityDigest> {
    token_regex()
        .captures(text)
        .and_then(|caps| caps.get(1))
        .and_then(|m| IdentityDigest::parse(m.as_str()))
}

/// Enumerate boot executables below `rules.boot_dir`.
///
/// Only regular files are returned; directories and symlinks with a matching
/// name are skipped. An absent or empty boot tree yields an empty list.
#[must_use]
pub fn find_boot_entries(rules: &DiscoveryRules) -> Vec<BootEntry> {
    let mut entries = Vec::new();
    for item in WalkDir::new(&rules.boot_dir)
        .follow_links(false)
        .sort_by_file_name()
    {
        let item = match item {
            Ok(item) => item,
            Err(err) => {
                warn!("skipping unreadable boot tree entry: {err}");
                continue;
            }
        };
        if !item.file_type().is_file() {
            continue;
        }
        let name = item.file_name().to_string_lossy();
        if !rules.has_efi_suffix(&name) {
            continue;
        }
        if let Some(entry) = classify(rules, item.path()) {
            entries.push(entry);
        }
    }
    debug!(
        "discovered {} boot entries under {}",
        entries.len(),
        rules.boot_dir.display()
    );
    entries
}

fn classify(rules: &DiscoveryRules, path: &Path) -> Option<BootEntry> {
    // Markers are matched below the boot root so the root itself never classifies.
    let relative = path.strip_prefix(&rules.boot_dir).unwrap_or(path);
    let text = relative.to_string_lossy();
    if rules.is_foreign(&text) {
        debug!("excluding foreign entry {}", path.display());
        return None;
    }
    if rules.is_snapshot_path(&text) {
        let token = path
            .file_name()
            .and_then(|name| name.to_str())
            .and_then(extract_snapshot_token);
        if token.is_none() {
            debug!("snapshot entry {} has no identity token", path.display());
        }
        return Some(BootEntry {
            path: path.to_path_buf(),
            kind: EntryKind::Snapshot,
            snapshot_token: token,
        });
    }
    Some(BootEntry {
        path: path.to_path_buf(),
        kind: EntryKind::Current,
        snapshot_token: None,
    })
}

fn contains_ignore_case(haystack: &str, needle: &str) -> bool {
    haystack
        .to_ascii_lowercase()
        .contains(&needle.to_ascii_lowercase())
}
