// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Strongly typed identity and verification digests.
// Author: Lukas Bower
#![forbid(unsafe_code)]

//! Two digest namespaces coexist on a Limine system: the SHA-256 identity
//! token embedded in snapshot file names, and the BLAKE2b-512 verification
//! hash Limine checks after `#` in `image_path:`. They are distinct types so
//! one can never be compared against the other.

use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use blake2::{Blake2b512, Digest};
use sha2::Sha256;

use crate::error::{Result, SyncError};

/// Hex length of an identity digest.
pub const IDENTITY_HEX_LEN: usize = 64;
/// Hex length of a verification digest.
pub const VERIFICATION_HEX_LEN: usize = 128;

/// SHA-256 identity token taken from a snapshot file name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IdentityDigest(String);

/// BLAKE2b-512 content hash checked by Limine at boot.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VerificationDigest(String);

impl IdentityDigest {
    /// Parse a 64-character hex string, normalising to lowercase.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        parse_hex(value, IDENTITY_HEX_LEN).map(Self)
    }

    /// SHA-256 of an in-memory payload, as snapshot tooling names files.
    #[must_use]
    pub fn of_bytes(data: &[u8]) -> Self {
        Self(hex::encode(Sha256::digest(data)))
    }

    /// Borrow the lowercase hex form.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl VerificationDigest {
    /// Parse a 128-character hex string, normalising to lowercase.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        parse_hex(value, VERIFICATION_HEX_LEN).map(Self)
    }

    /// Hash an in-memory payload.
    #[must_use]
    pub fn of_bytes(data: &[u8]) -> Self {
        Self(hex::encode(Blake2b512::digest(data)))
    }

    /// Hash a file in 8 KiB chunks.
    pub fn of_file(path: &Path) -> Result<Self> {
        let mut file = File::open(path).map_err(|err| SyncError::io(path, err))?;
        let mut hasher = Blake2b512::new();
        let mut buf = [0u8; 8192];
        loop {
            let n = file.read(&mut buf).map_err(|err| SyncError::io(path, err))?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        Ok(Self(hex::encode(hasher.finalize())))
    }

    /// Borrow the lowercase hex form.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Shortened form for log and summary lines. Comparisons always use the full value.
    #[must_use]
    pub fn short(&self) -> &str {
        truncate_hex(&self.0)
    }
}

impl fmt::Display for IdentityDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for VerificationDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Shorten a hex string to 16 characters for display.
#[must_use]
pub fn truncate_hex(value: &str) -> &str {
    value.get(..16).unwrap_or(value)
}

fn parse_hex(value: &str, len: usize) -> Option<String> {
    if value.len() != len || !value.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    Some(value.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_identity_of_empty_input() {
        assert_eq!(
            IdentityDigest::of_bytes(b"").as_str(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn blake2b_of_empty_input() {
        let digest = VerificationDigest::of_bytes(b"");
        assert_eq!(
            digest.as_str(),
            "786a02f742015903c6c6fd852552d272912f4740e15847618a86e217f71f5419\
             d25e1031afee585313896444934eb04b903a685b1448b755d56f701afe9be2ce"
        );
    }

    #[test]
    fn file_digest_matches_bytes_digest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("large.efi");
        let content = vec![0x4du8; 20_000];
        std::fs::write(&path, &content).unwrap();
        assert_eq!(
            VerificationDigest::of_file(&path).unwrap(),
            VerificationDigest::of_bytes(&content)
        );
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(VerificationDigest::of_file(Path::new("/nonexistent/arch.efi")).is_err());
    }

    #[test]
    fn parse_enforces_length_and_normalises_case() {
        let upper = "AB".repeat(32);
        let id = IdentityDigest::parse(&upper).unwrap();
        assert_eq!(id.as_str(), "ab".repeat(32));
        assert!(IdentityDigest::parse(&"ab".repeat(64)).is_none());
        assert!(VerificationDigest::parse(&"ab".repeat(32)).is_none());
        assert!(VerificationDigest::parse(&"zz".repeat(64)).is_none());
    }

    #[test]
    fn short_form_is_a_prefix() {
        let digest = VerificationDigest::of_bytes(b"kernel");
        assert_eq!(digest.short().len(), 16);
        assert!(digest.as_str().starts_with(digest.short()));
    }
}
