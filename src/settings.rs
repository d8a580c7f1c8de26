// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Load and validate limine-sbsync settings from TOML.
// Author: Lukas Bower
#![forbid(unsafe_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::discovery::DiscoveryRules;
use crate::error::{Result, SyncError};

/// Default settings file location.
pub const DEFAULT_SETTINGS_PATH: &str = "/etc/limine-sbsync.toml";
/// Environment variable overriding the settings file location.
pub const SETTINGS_ENV: &str = "LIMINE_SBSYNC_CONFIG";

/// Resolved runtime settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Root of the boot tree scanned for executables.
    pub boot_dir: PathBuf,
    /// Live Limine configuration file.
    pub limine_conf: PathBuf,
    /// Case-insensitive boot executable suffix.
    pub efi_suffix: String,
    /// Path marker identifying the snapshot history directory.
    pub snapshot_marker: String,
    /// Case-insensitive substrings excluding foreign-OS files.
    pub foreign_markers: Vec<String>,
    /// Fixed marker inserted into backup file names.
    pub backup_suffix: String,
    /// External signing tool executable.
    pub signing_tool: String,
    /// Wall-clock limit for each external tool invocation.
    pub tool_timeout: Duration,
    /// Include Microsoft certificates when enrolling keys.
    pub enroll_microsoft: bool,
    /// Packages that must be installed before signing.
    pub required_packages: Vec<String>,
    /// Skip bulk confirmation prompts.
    pub auto_confirm: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            boot_dir: PathBuf::from("/boot"),
            limine_conf: PathBuf::from("/boot/limine.conf"),
            efi_suffix: ".efi".to_owned(),
            snapshot_marker: "limine_history".to_owned(),
            foreign_markers: vec!["microsoft".to_owned(), "windows".to_owned()],
            backup_suffix: "sbsync-backup".to_owned(),
            signing_tool: "sbctl".to_owned(),
            tool_timeout: Duration::from_secs(30),
            enroll_microsoft: true,
            required_packages: vec!["sbctl".to_owned()],
            auto_confirm: false,
        }
    }
}

impl Settings {
    /// Discovery rules derived from these settings.
    #[must_use]
    pub fn discovery_rules(&self) -> DiscoveryRules {
        DiscoveryRules {
            boot_dir: self.boot_dir.clone(),
            efi_suffix: self.efi_suffix.clone(),
            snapshot_marker: self.snapshot_marker.clone(),
            foreign_markers: self.foreign_markers.clone(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct SettingsToml {
    #[serde(default)]
    paths: PathsSection,
    #[serde(default)]
    discovery: DiscoverySection,
    #[serde(default)]
    backup: BackupSection,
    #[serde(default)]
    signing: SigningSection,
    #[serde(default)]
    confirm: ConfirmSection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct PathsSection {
    boot_dir: Option<PathBuf>,
    limine_conf: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct DiscoverySection {
    efi_suffix: Option<String>,
    snapshot_marker: Option<String>,
    foreign_markers: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct BackupSection {
    suffix: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct SigningSection {
    tool: Option<String>,
    timeout_secs: Option<u64>,
    enroll_microsoft: Option<bool>,
    required_packages: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfirmSection {
    auto_confirm: Option<bool>,
}

/// Pick the settings path from the CLI, then the environment, then the default.
///
/// The returned flag is `true` when the path was named explicitly.
#[must_use]
pub fn resolve_settings_path(cli_path: Option<PathBuf>) -> (PathBuf, bool) {
    if let Some(path) = cli_path {
        return (path, true);
    }
    if let Ok(value) = std::env::var(SETTINGS_ENV) {
        let trimmed = value.trim();
        if !trimmed.is_empty() {
            return (PathBuf::from(trimmed), true);
        }
    }
    (PathBuf::from(DEFAULT_SETTINGS_PATH), false)
}

/// Load settings from `path`.
///
/// A missing file yields defaults unless `required` is set.
pub fn load_settings(path: &Path, required: bool) -> Result<Settings> {
    if !path.exists() && !required {
        return Ok(Settings::default());
    }
    let text = fs::read_to_string(path)
        .map_err(|err| SyncError::Settings(format!("read {}: {err}", path.display())))?;
    parse_settings(&text)
        .map_err(|err| SyncError::Settings(format!("{}: {err}", path.display())))
}

/// Parse settings from TOML text layered over the defaults.
pub fn parse_settings(text: &str) -> std::result::Result<Settings, String> {
    let parsed: SettingsToml = toml::from_str(text).map_err(|err| err.to_string())?;
    let mut settings = Settings::default();
    if let Some(value) = parsed.paths.boot_dir {
        settings.boot_dir = value;
    }
    if let Some(value) = parsed.paths.limine_conf {
        settings.limine_conf = value;
    }
    if let Some(value) = parsed.discovery.efi_suffix {
        settings.efi_suffix = value;
    }
    if let Some(value) = parsed.discovery.snapshot_marker {
        settings.snapshot_marker = value;
    }
    if let Some(value) = parsed.discovery.foreign_markers {
        settings.foreign_markers = value;
    }
    if let Some(value) = parsed.backup.suffix {
        settings.backup_suffix = value;
    }
    if let Some(value) = parsed.signing.tool {
        settings.signing_tool = value;
    }
    if let Some(value) = parsed.signing.timeout_secs {
        settings.tool_timeout = Duration::from_secs(value);
    }
    if let Some(value) = parsed.signing.enroll_microsoft {
        settings.enroll_microsoft = value;
    }
    if let Some(value) = parsed.signing.required_packages {
        settings.required_packages = value;
    }
    if let Some(value) = parsed.confirm.auto_confirm {
        settings.auto_confirm = value;
    }
    validate_settings(&settings)?;
    Ok(settings)
}

fn validate_settings(settings: &Settings) -> std::result::Result<(), String> {
    validate_absolute("paths.boot_dir", &settings.boot_dir)?;
    validate_absolute("paths.limine_conf", &settings.limine_conf)?;
    if settings.efi_suffix.len() < 2 || !settings.efi_suffix.starts_with('.') {
        return Err("discovery.efi_suffix must start with '.' and name an extension".to_owned());
    }
    if settings.snapshot_marker.trim().is_empty() {
        return Err("discovery.snapshot_marker must not be empty".to_owned());
    }
    if settings
        .foreign_markers
        .iter()
        .any(|marker| marker.trim().is_empty())
    {
        return Err("discovery.foreign_markers must not contain empty entries".to_owned());
    }
    let suffix = settings.backup_suffix.trim();
    if suffix.is_empty() || suffix.contains('/') {
        return Err("backup.suffix must be a non-empty file name fragment".to_owned());
    }
    if settings.signing_tool.trim().is_empty() {
        return Err("signing.tool must not be empty".to_owned());
    }
    if settings.tool_timeout.is_zero() {
        return Err("signing.timeout_secs must be >= 1".to_owned());
    }
    Ok(())
}

fn validate_absolute(label: &str, path: &Path) -> std::result::Result<(), String> {
    if !path.is_absolute() {
        return Err(format!("{label} must be absolute"));
    }
    if path
        .components()
        .any(|component| matches!(component, std::path::Component::ParentDir))
    {
        return Err(format!("{label} must not contain '..'"));
    }
    Ok(())
}
