// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: In-memory verification hash cache keyed by path and mtime.
// Author: Lukas Bower
#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use log::debug;

use crate::digest::VerificationDigest;
use crate::error::{Result, SyncError};

/// Source of verification digests for files on disk.
pub trait FileHasher {
    /// Compute the digest of the file at `path`.
    fn hash_file(&self, path: &Path) -> Result<VerificationDigest>;
}

/// Hashes file content with BLAKE2b-512.
#[derive(Debug, Default, Clone, Copy)]
pub struct Blake2bHasher;

impl FileHasher for Blake2bHasher {
    fn hash_file(&self, path: &Path) -> Result<VerificationDigest> {
        VerificationDigest::of_file(path)
    }
}

#[derive(Debug, Clone)]
struct CachedHash {
    hash: VerificationDigest,
    mtime: SystemTime,
}

/// Per-session hash cache.
///
/// A cached hash is served only while the file's modification time still
/// equals the one recorded when the hash was computed.
#[derive(Debug)]
pub struct HashCache<H = Blake2bHasher> {
    hasher: H,
    entries: HashMap<PathBuf, CachedHash>,
}

impl Default for HashCache<Blake2bHasher> {
    fn default() -> Self {
        Self::new()
    }
}

impl HashCache<Blake2bHasher> {
    /// Create an empty cache backed by BLAKE2b-512.
    #[must_use]
    pub fn new() -> Self {
        Self::with_hasher(Blake2bHasher)
    }
}

impl<H: FileHasher> HashCache<H> {
    /// Create an empty cache backed by `hasher`.
    pub fn with_hasher(hasher: H) -> Self {
        Self {
            hasher,
            entries: HashMap::new(),
        }
    }

    /// Return the verification digest for `path`, recomputing when stale.
    pub fn get_hash(&mut self, path: &Path) -> Result<VerificationDigest> {
        let mtime = fs::metadata(path)
            .and_then(|meta| meta.modified())
            .map_err(|err| SyncError::io(path, err))?;
        if let Some(cached) = self.entries.get(path) {
            if cached.mtime == mtime {
                return Ok(cached.hash.clone());
            }
            debug!("hash cache stale for {}", path.display());
        }
        let hash = self.hasher.hash_file(path)?;
        self.entries.insert(
            path.to_path_buf(),
            CachedHash {
                hash: hash.clone(),
                mtime,
            },
        );
        Ok(hash)
    }

    /// Drop the cached entry for `path`, if any.
    pub fn invalidate(&mut self, path: &Path) {
        if self.entries.remove(path).is_some() {
            debug!("hash cache invalidated {}", path.display());
        }
    }

    /// Drop every cached entry.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Number of cached paths.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Return `true` when nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Borrow the underlying hasher.
    pub fn hasher(&self) -> &H {
        &self.hasher
    }
}
