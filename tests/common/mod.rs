// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Shared boot-tree fixtures for limine-sbsync integration tests.
// Author: Lukas Bower
#![forbid(unsafe_code)]
#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use limine_sbsync::confirm::Confirm;
use limine_sbsync::digest::{IdentityDigest, VerificationDigest};
use limine_sbsync::settings::Settings;
use tempfile::TempDir;

/// Temporary `/boot` with a `limine.conf` at its root.
pub struct BootTree {
    dir: TempDir,
}

impl BootTree {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().expect("tempdir"),
        }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn conf_path(&self) -> PathBuf {
        self.root().join("limine.conf")
    }

    pub fn settings(&self) -> Settings {
        Settings {
            boot_dir: self.root().to_path_buf(),
            limine_conf: self.conf_path(),
            ..Settings::default()
        }
    }

    pub fn write(&self, relative: &str, content: &[u8]) -> PathBuf {
        let path = self.root().join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create parent");
        }
        fs::write(&path, content).expect("write fixture");
        path
    }

    pub fn write_conf(&self, text: &str) {
        fs::write(self.conf_path(), text).expect("write limine.conf");
    }

    pub fn read_conf(&self) -> String {
        fs::read_to_string(self.conf_path()).expect("read limine.conf")
    }

    /// Write a snapshot image under `limine_history/` and return its file name.
    pub fn write_snapshot(&self, stem: &str, content: &[u8]) -> String {
        let token = IdentityDigest::of_bytes(content);
        let name = format!("{stem}_sha256_{token}.efi");
        self.write(&format!("limine_history/{name}"), content);
        name
    }

    pub fn backup_files(&self) -> Vec<PathBuf> {
        let mut found: Vec<PathBuf> = fs::read_dir(self.root())
            .expect("read boot dir")
            .filter_map(|entry| entry.ok().map(|entry| entry.path()))
            .filter(|path| {
                path.file_name()
                    .and_then(|name| name.to_str())
                    .map_or(false, |name| name.starts_with("limine.conf.sbsync-backup."))
            })
            .collect();
        found.sort();
        found
    }
}

pub fn blake(content: &[u8]) -> VerificationDigest {
    VerificationDigest::of_bytes(content)
}

/// Confirm double answering every prompt the same way.
pub struct ScriptedConfirm {
    pub answer: bool,
    pub prompts: Vec<String>,
}

impl ScriptedConfirm {
    pub fn answering(answer: bool) -> Self {
        Self {
            answer,
            prompts: Vec::new(),
        }
    }
}

impl Confirm for ScriptedConfirm {
    fn confirm(&mut self, prompt: &str) -> bool {
        self.prompts.push(prompt.to_owned());
        self.answer
    }
}
