// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Per-invocation reconciliation of limine.conf hashes with boot images.
// Author: Lukas Bower
#![forbid(unsafe_code)]

//! A [`SyncSession`] owns everything one command invocation needs: the hash
//! cache, the backup ledger with its mutation-in-flight flag, and the rules
//! used to discover boot entries. Nothing here outlives the session.

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};

use crate::backup::{BackupLedger, Recovery};
use crate::cache::{Blake2bHasher, FileHasher, HashCache};
use crate::confirm::Confirm;
use crate::digest::{truncate_hex, IdentityDigest, VerificationDigest};
use crate::discovery::{extract_snapshot_token, find_boot_entries, BootEntry, DiscoveryRules, EntryKind};
use crate::error::{Result, SyncError};
use crate::limine::{ConfigDocument, ImagePathLine};
use crate::settings::Settings;
use crate::signing::{sign_all, SignOutcome, SigningTool};

/// One entry whose declared hash differs from its file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mismatch {
    /// Boot executable on disk.
    pub path: PathBuf,
    /// Entry classification.
    pub kind: EntryKind,
    /// 1-based line declaring the image.
    pub line_number: usize,
    /// Hash fragment currently declared, possibly empty.
    pub declared: String,
    /// Hash of the file content.
    pub actual: VerificationDigest,
}

impl fmt::Display for Mismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let declared = if self.declared.is_empty() {
            "<none>".to_owned()
        } else {
            format!("{}…", truncate_hex(&self.declared))
        };
        let kind = match self.kind {
            EntryKind::Current => "current",
            EntryKind::Snapshot => "snapshot",
        };
        write!(
            f,
            "{kind} {} (line {}): declared {declared} actual {}…",
            self.path.display(),
            self.line_number,
            self.actual.short()
        )
    }
}

/// Result of [`SyncSession::check_mismatches`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MismatchReport {
    /// Entries out of sync.
    pub mismatches: Vec<Mismatch>,
    /// Entries with both a readable file and a declaring line.
    pub checked: usize,
}

impl MismatchReport {
    /// Number of mismatching entries.
    #[must_use]
    pub fn mismatch_count(&self) -> usize {
        self.mismatches.len()
    }

    /// Number of entries compared.
    #[must_use]
    pub fn total_checked(&self) -> usize {
        self.checked
    }

    /// `true` when there was nothing applicable to compare.
    #[must_use]
    pub fn nothing_to_check(&self) -> bool {
        self.checked == 0
    }
}

impl fmt::Display for MismatchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.nothing_to_check() {
            f.write_str("no boot entries found to check")
        } else {
            write!(
                f,
                "{} hash mismatch(es) out of {} entries checked",
                self.mismatch_count(),
                self.checked
            )
        }
    }
}

/// Result of [`SyncSession::reconcile_snapshots`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SnapshotSummary {
    /// Lines rewritten.
    pub updated: usize,
    /// Snapshot lines whose file was found and hashed.
    pub checked: usize,
    /// Lines found out of sync before confirmation.
    pub out_of_sync: usize,
    /// Line numbers whose snapshot file could not be located.
    pub missing_files: Vec<usize>,
    /// The bulk update was declined.
    pub declined: bool,
}

impl fmt::Display for SnapshotSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.checked == 0 {
            f.write_str("no snapshot entries found to check")?;
        } else if self.declined {
            write!(
                f,
                "{} of {} snapshot entries out of sync; update declined",
                self.out_of_sync, self.checked
            )?;
        } else {
            write!(
                f,
                "updated {} of {} snapshot entries",
                self.updated, self.checked
            )?;
        }
        if !self.missing_files.is_empty() {
            write!(f, "; {} snapshot file(s) not found", self.missing_files.len())?;
        }
        Ok(())
    }
}

/// Result of [`SyncSession::sync`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncSummary {
    /// Signing pass results.
    pub signing: SignOutcome,
    /// Mismatch check run after signing.
    pub check: MismatchReport,
    /// Whether the current-kernel line was rewritten.
    pub current_updated: bool,
    /// Snapshot reconciliation results, when run.
    pub snapshots: Option<SnapshotSummary>,
}

struct PendingPatch {
    line_number: usize,
    file_name: String,
    digest: VerificationDigest,
}

/// Reconciliation context for one command invocation.
#[derive(Debug)]
pub struct SyncSession<H = Blake2bHasher> {
    rules: DiscoveryRules,
    conf_path: PathBuf,
    cache: HashCache<H>,
    backups: BackupLedger,
    auto_confirm: bool,
}

impl SyncSession<Blake2bHasher> {
    /// Session using BLAKE2b-512 hashing and the given settings.
    #[must_use]
    pub fn new(settings: &Settings) -> Self {
        Self::with_hasher(settings, Blake2bHasher)
    }
}

impl<H: FileHasher> SyncSession<H> {
    /// Session using a caller-supplied hasher.
    pub fn with_hasher(settings: &Settings, hasher: H) -> Self {
        Self {
            rules: settings.discovery_rules(),
            conf_path: settings.limine_conf.clone(),
            cache: HashCache::with_hasher(hasher),
            backups: BackupLedger::new(&settings.limine_conf, settings.backup_suffix.clone()),
            auto_confirm: settings.auto_confirm,
        }
    }

    /// Live configuration path.
    #[must_use]
    pub fn conf_path(&self) -> &Path {
        &self.conf_path
    }

    /// Backups made during this session.
    #[must_use]
    pub fn backups(&self) -> &BackupLedger {
        &self.backups
    }

    /// Forget every cached hash.
    pub fn clear_cache(&mut self) {
        self.cache.clear();
    }

    /// Discover boot entries under the configured boot tree.
    #[must_use]
    pub fn entries(&self) -> Vec<BootEntry> {
        find_boot_entries(&self.rules)
    }

    /// Restore the latest backup if a mutation was left in flight.
    pub fn recover(&mut self) -> Recovery {
        self.backups.recover()
    }

    /// Compare every resolvable entry's file hash with its declared hash.
    ///
    /// Never mutates. A missing or unreadable configuration yields an empty
    /// report.
    pub fn check_mismatches(&mut self) -> MismatchReport {
        let mut report = MismatchReport::default();
        let Some(doc) = self.load_document() else {
            return report;
        };
        let entries = self.entries();
        let mut resolved = self.current_targets(&doc, &entries);
        for entry in entries.iter().filter(|entry| entry.has_valid_token()) {
            let line = entry
                .snapshot_token
                .as_ref()
                .and_then(|token| self.snapshot_line(&doc, token));
            if let Some(line_number) = line {
                resolved.push((entry, vec![line_number]));
            }
        }
        for (entry, lines) in resolved {
            let actual = match self.cache.get_hash(&entry.path) {
                Ok(hash) => hash,
                Err(err) => {
                    warn!("skipping {}: {err}", entry.path.display());
                    continue;
                }
            };
            report.checked += 1;
            let stale = lines.iter().copied().find(|line_number| {
                doc.image_path_at(*line_number)
                    .map_or(false, |line| line.declared_digest().as_ref() != Some(&actual))
            });
            if let Some(line_number) = stale {
                let declared = doc
                    .image_path_at(line_number)
                    .map(|line| line.declared_hash().to_owned())
                    .unwrap_or_default();
                let mismatch = Mismatch {
                    path: entry.path.clone(),
                    kind: entry.kind,
                    line_number,
                    declared,
                    actual,
                };
                warn!("hash mismatch: {mismatch}");
                report.mismatches.push(mismatch);
            }
        }
        info!("{report}");
        report
    }

    /// Rewrite the hash on every line declaring a current (non-snapshot) image.
    ///
    /// Each line is resolved to exactly one image, so every line naming that
    /// image outside the snapshot history is patched with its hash. Returns
    /// `false` when nothing needed changing, including when the configuration
    /// is missing or declares no current image.
    pub fn reconcile_current(&mut self) -> Result<bool> {
        let Some(mut doc) = self.load_document() else {
            return Ok(false);
        };
        let entries = self.entries();
        let mut pending = Vec::new();
        for (entry, lines) in self.current_targets(&doc, &entries) {
            let digest = match self.cache.get_hash(&entry.path) {
                Ok(hash) => hash,
                Err(err) => {
                    warn!("skipping {}: {err}", entry.path.display());
                    continue;
                }
            };
            for line in lines.iter().filter_map(|n| doc.image_path_at(*n)) {
                if line.declared_digest().as_ref() == Some(&digest) {
                    continue;
                }
                pending.push(PendingPatch {
                    line_number: line.line_number(),
                    file_name: line.file_name().to_owned(),
                    digest: digest.clone(),
                });
            }
        }
        let mut patched = 0usize;
        for patch in &pending {
            if doc.patch_hash(patch.line_number, &patch.file_name, &patch.digest) {
                info!(
                    "line {}: {} hash set to {}…",
                    patch.line_number,
                    patch.file_name,
                    patch.digest.short()
                );
                patched += 1;
            }
        }
        if patched == 0 {
            debug!("current image hashes already in sync");
            return Ok(false);
        }
        self.commit(&doc)?;
        Ok(true)
    }

    /// Bring every snapshot line's hash in line with its snapshot file.
    ///
    /// Out-of-sync lines are collected first and confirmed once as a batch.
    /// One backup covers the batch; each line is then patched by line number.
    pub fn reconcile_snapshots(&mut self, confirm: &mut dyn Confirm) -> Result<SnapshotSummary> {
        let mut summary = SnapshotSummary::default();
        let Some(mut doc) = self.load_document() else {
            return Ok(summary);
        };
        let by_token: HashMap<IdentityDigest, BootEntry> = self
            .entries()
            .into_iter()
            .filter(BootEntry::has_valid_token)
            .filter_map(|entry| entry.snapshot_token.clone().map(|token| (token, entry)))
            .collect();

        let mut pending = Vec::new();
        for line in doc.image_paths() {
            if !self.rules.is_snapshot_path(line.raw()) {
                continue;
            }
            let Some(token) = extract_snapshot_token(line.declared_path()) else {
                debug!("line {}: snapshot path without identity token", line.line_number());
                continue;
            };
            let Some(entry) = by_token.get(&token) else {
                warn!(
                    "line {}: snapshot file not found for {}",
                    line.line_number(),
                    line.declared_path()
                );
                summary.missing_files.push(line.line_number());
                continue;
            };
            let digest = match self.cache.get_hash(&entry.path) {
                Ok(hash) => hash,
                Err(err) => {
                    warn!("line {}: snapshot file not found: {err}", line.line_number());
                    summary.missing_files.push(line.line_number());
                    continue;
                }
            };
            summary.checked += 1;
            if line.declared_digest().as_ref() != Some(&digest) {
                pending.push(PendingPatch {
                    line_number: line.line_number(),
                    file_name: line.file_name().to_owned(),
                    digest,
                });
            }
        }
        summary.out_of_sync = pending.len();
        if pending.is_empty() {
            info!("{summary}");
            return Ok(summary);
        }

        let prompt = format!(
            "Update hashes for {} snapshot entr{} in {}?",
            pending.len(),
            if pending.len() == 1 { "y" } else { "ies" },
            self.conf_path.display()
        );
        if !self.auto_confirm && !confirm.confirm(&prompt) {
            info!("snapshot hash update declined");
            summary.declined = true;
            return Ok(summary);
        }

        for patch in &pending {
            if doc.patch_hash(patch.line_number, &patch.file_name, &patch.digest) {
                summary.updated += 1;
            }
        }
        if summary.updated > 0 {
            self.commit(&doc)?;
        }
        info!("{summary}");
        Ok(summary)
    }

    /// Sign every discovered entry that does not verify.
    pub fn sign_all(&mut self, tool: &dyn SigningTool) -> Result<SignOutcome> {
        let entries = self.entries();
        sign_all(tool, &entries, &mut self.cache)
    }

    /// Sign, then reconcile hashes when signing changed anything or the
    /// configuration is already out of sync.
    pub fn sync(
        &mut self,
        tool: &dyn SigningTool,
        confirm: &mut dyn Confirm,
    ) -> Result<SyncSummary> {
        self.clear_cache();
        let signing = self.sign_all(tool)?;
        let check = self.check_mismatches();
        let mut summary = SyncSummary {
            signing,
            check,
            ..SyncSummary::default()
        };
        if !summary.signing.any_signed() && summary.check.mismatch_count() == 0 {
            return Ok(summary);
        }
        summary.current_updated = self.reconcile_current()?;
        summary.snapshots = Some(self.reconcile_snapshots(confirm)?);
        Ok(summary)
    }

    fn load_document(&self) -> Option<ConfigDocument> {
        match fs::read_to_string(&self.conf_path) {
            Ok(text) => Some(ConfigDocument::parse(&text)),
            Err(err) => {
                warn!("cannot read {}: {err}", self.conf_path.display());
                None
            }
        }
    }

    /// Group non-snapshot `image_path:` lines by the current image they declare.
    fn current_targets<'e>(
        &self,
        doc: &ConfigDocument,
        entries: &'e [BootEntry],
    ) -> Vec<(&'e BootEntry, Vec<usize>)> {
        let current: Vec<&BootEntry> = entries
            .iter()
            .filter(|entry| entry.kind == EntryKind::Current)
            .collect();
        let mut targets: Vec<(&BootEntry, Vec<usize>)> = Vec::new();
        for line in doc.image_paths() {
            if self.rules.is_snapshot_path(line.raw()) {
                continue;
            }
            let Some(entry) = self.resolve_current(line, &current) else {
                continue;
            };
            match targets.iter_mut().find(|(known, _)| known.path == entry.path) {
                Some((_, lines)) => lines.push(line.line_number()),
                None => targets.push((entry, vec![line.line_number()])),
            }
        }
        targets
    }

    /// Match a line by its path below the boot root, then by a unique file name.
    fn resolve_current<'e>(
        &self,
        line: &ImagePathLine,
        current: &[&'e BootEntry],
    ) -> Option<&'e BootEntry> {
        let declared = line.resource_path();
        let exact = current.iter().copied().find(|entry| {
            entry
                .path
                .strip_prefix(&self.rules.boot_dir)
                .map_or(false, |rel| rel.to_string_lossy().eq_ignore_ascii_case(declared))
        });
        if exact.is_some() {
            return exact;
        }
        let mut by_name = current.iter().copied().filter(|entry| {
            entry
                .file_name()
                .map_or(false, |name| line.references_file(name))
        });
        let first = by_name.next()?;
        if by_name.next().is_some() {
            warn!(
                "line {}: {} matches several boot images; leaving it untouched",
                line.line_number(),
                line.declared_path()
            );
            return None;
        }
        Some(first)
    }

    fn snapshot_line(&self, doc: &ConfigDocument, token: &IdentityDigest) -> Option<usize> {
        doc.image_paths()
            .filter(|line| self.rules.is_snapshot_path(line.raw()))
            .find(|line| extract_snapshot_token(line.declared_path()).as_ref() == Some(token))
            .map(|line| line.line_number())
    }

    fn commit(&mut self, doc: &ConfigDocument) -> Result<()> {
        self.backups.backup()?;
        self.backups.begin_mutation();
        write_atomic(&self.conf_path, doc.render().as_bytes())?;
        self.backups.commit_mutation();
        info!("updated {}", self.conf_path.display());
        Ok(())
    }
}

fn write_atomic(path: &Path, payload: &[u8]) -> Result<()> {
    let write_err = |source| SyncError::ConfigWrite {
        path: path.to_path_buf(),
        source,
    };
    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".partial");
    let tmp_path = PathBuf::from(tmp_name);
    fs::write(&tmp_path, payload).map_err(write_err)?;
    match fs::metadata(path) {
        Ok(meta) => {
            if let Err(err) = fs::set_permissions(&tmp_path, meta.permissions()) {
                warn!("cannot copy permissions onto {}: {err}", tmp_path.display());
            }
        }
        Err(err) => debug!("no permissions to copy from {}: {err}", path.display()),
    }
    if let Err(source) = fs::rename(&tmp_path, path) {
        if let Err(err) = fs::remove_file(&tmp_path) {
            warn!("cannot remove {}: {err}", tmp_path.display());
        }
        return Err(write_err(source));
    }
    Ok(())
}
