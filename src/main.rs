// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: CLI entry point for limine-sbsync.
// Author: Lukas Bower
#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! CLI entry point for limine-sbsync.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use env_logger::Env;
use limine_sbsync::backup::Recovery;
use limine_sbsync::confirm::PromptConfirm;
use limine_sbsync::discovery::EntryKind;
use limine_sbsync::packages::{require_packages, Pacman};
use limine_sbsync::sbctl::Sbctl;
use limine_sbsync::settings::{load_settings, resolve_settings_path, Settings};
use limine_sbsync::signing::{enroll, SignOutcome, SigningTool};
use limine_sbsync::{AuditStatus, SyncAudit, SyncSession};
use log::{error, info, LevelFilter};

const EXIT_MISMATCH: u8 = 2;

#[derive(Debug, Parser)]
#[command(
    author = "Lukas Bower",
    version,
    about = "Keep limine.conf image hashes in step with Secure Boot signatures"
)]
struct Cli {
    /// Path to the limine-sbsync settings TOML.
    #[arg(long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Apply bulk snapshot updates without prompting.
    #[arg(short = 'y', long, default_value_t = false, global = true)]
    yes: bool,

    /// Enable debug logging.
    #[arg(short, long, default_value_t = false, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Report key and firmware Secure Boot state.
    Status,
    /// List discovered boot executables.
    List,
    /// Compare declared hashes with boot executables without writing.
    Check,
    /// Sign every boot executable that does not verify.
    Sign,
    /// Rewrite stale hashes for the current image and snapshots.
    Update,
    /// Sign, then update hashes when anything changed.
    Sync,
    /// Generate a fresh signing key set.
    CreateKeys,
    /// Enrol signing keys into firmware (requires Setup Mode).
    EnrollKeys {
        /// Leave out Microsoft certificates.
        #[arg(long, default_value_t = false)]
        no_microsoft: bool,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    match run(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: bool) {
    let default_level = if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Warn
    };
    let mut builder =
        env_logger::Builder::from_env(Env::default().default_filter_or(default_level.as_str()));
    builder.format_timestamp_millis();
    let _ = builder.try_init();
}

fn run(cli: Cli) -> Result<ExitCode> {
    let (settings_path, explicit) = resolve_settings_path(cli.config);
    let mut settings = load_settings(&settings_path, explicit)
        .with_context(|| format!("load settings from {}", settings_path.display()))?;
    if cli.yes {
        settings.auto_confirm = true;
    }
    let tool = Sbctl::new(settings.signing_tool.clone(), settings.tool_timeout);
    let mut session = SyncSession::new(&settings);
    let mut audit = SyncAudit::new();

    let (verb, result) = match cli.command {
        Command::Status => ("STATUS", run_status(&tool, &mut audit)),
        Command::List => ("LIST", run_list(&session, &mut audit)),
        Command::Check => ("CHECK", run_check(&mut session, &mut audit)),
        Command::Sign => ("SIGN", run_sign(&settings, &tool, &mut session, &mut audit)),
        Command::Update => ("UPDATE", run_update(&mut session, &mut audit)),
        Command::Sync => ("SYNC", run_sync(&settings, &tool, &mut session, &mut audit)),
        Command::CreateKeys => ("CREATE-KEYS", run_create_keys(&tool, &mut audit)),
        Command::EnrollKeys { no_microsoft } => (
            "ENROLL-KEYS",
            run_enroll(&tool, settings.enroll_microsoft && !no_microsoft, &mut audit),
        ),
    };

    if let Err(err) = &result {
        match session.recover() {
            Recovery::NotNeeded => {}
            Recovery::Restored(backup) => {
                info!("restored {} from {}", session.conf_path().display(), backup.display());
                audit.push_line(format!(
                    "restored {} from {}",
                    session.conf_path().display(),
                    backup.display()
                ));
            }
            Recovery::Failed => {
                error!(
                    "could not restore {}; inspect it and its backups by hand",
                    session.conf_path().display()
                );
            }
        }
        let detail = format!("reason={err:#}");
        audit.push_ack(AuditStatus::Err, verb, Some(detail.as_str()));
    }
    emit_audit(audit);
    result
}

fn emit_audit(audit: SyncAudit) {
    for line in audit.lines() {
        println!("{line}");
    }
}

fn run_status(tool: &Sbctl, audit: &mut SyncAudit) -> Result<ExitCode> {
    tool.ensure_available()?;
    let status = tool.status().context("query Secure Boot status")?;
    audit.push_line(format!("keys installed: {}", yes_no(status.installed)));
    audit.push_line(format!("setup mode:     {}", yes_no(status.setup_mode)));
    audit.push_line(format!("secure boot:    {}", yes_no(status.secure_boot)));
    audit.push_ack(AuditStatus::Ok, "STATUS", None);
    Ok(ExitCode::SUCCESS)
}

fn run_list(session: &SyncSession, audit: &mut SyncAudit) -> Result<ExitCode> {
    let entries = session.entries();
    if entries.is_empty() {
        audit.push_line("no boot entries found");
    }
    for entry in &entries {
        let line = match (entry.kind, &entry.snapshot_token) {
            (EntryKind::Current, _) => format!("current   {}", entry.path.display()),
            (EntryKind::Snapshot, Some(token)) => {
                format!("snapshot  {} token={token}", entry.path.display())
            }
            (EntryKind::Snapshot, None) => {
                format!("snapshot  {} (no identity token)", entry.path.display())
            }
        };
        audit.push_line(line);
    }
    let detail = format!("entries={}", entries.len());
    audit.push_ack(AuditStatus::Ok, "LIST", Some(detail.as_str()));
    Ok(ExitCode::SUCCESS)
}

fn run_check(session: &mut SyncSession, audit: &mut SyncAudit) -> Result<ExitCode> {
    let report = session.check_mismatches();
    for mismatch in &report.mismatches {
        audit.push_line(mismatch.to_string());
    }
    audit.push_line(report.to_string());
    let detail = format!(
        "mismatches={} checked={}",
        report.mismatch_count(),
        report.total_checked()
    );
    audit.push_ack(AuditStatus::Ok, "CHECK", Some(detail.as_str()));
    if report.mismatch_count() > 0 {
        Ok(ExitCode::from(EXIT_MISMATCH))
    } else {
        Ok(ExitCode::SUCCESS)
    }
}

fn run_sign(
    settings: &Settings,
    tool: &Sbctl,
    session: &mut SyncSession,
    audit: &mut SyncAudit,
) -> Result<ExitCode> {
    require_packages(&Pacman::new(settings.tool_timeout), &settings.required_packages)?;
    let outcome = session.sign_all(tool)?;
    push_sign_outcome(audit, &outcome);
    Ok(ExitCode::SUCCESS)
}

fn run_update(session: &mut SyncSession, audit: &mut SyncAudit) -> Result<ExitCode> {
    let mut confirm = PromptConfirm::stdio();
    let current = session
        .reconcile_current()
        .context("update current image hashes")?;
    audit.push_line(if current {
        "current image hashes updated"
    } else {
        "current image hashes already in sync"
    });
    let snapshots = session
        .reconcile_snapshots(&mut confirm)
        .context("update snapshot hashes")?;
    audit.push_line(snapshots.to_string());
    let detail = format!("current={current} snapshots={}", snapshots.updated);
    audit.push_ack(AuditStatus::Ok, "UPDATE", Some(detail.as_str()));
    Ok(ExitCode::SUCCESS)
}

fn run_sync(
    settings: &Settings,
    tool: &Sbctl,
    session: &mut SyncSession,
    audit: &mut SyncAudit,
) -> Result<ExitCode> {
    require_packages(&Pacman::new(settings.tool_timeout), &settings.required_packages)?;
    let mut confirm = PromptConfirm::stdio();
    let summary = session.sync(tool, &mut confirm)?;
    push_sign_outcome(audit, &summary.signing);
    audit.push_line(summary.check.to_string());
    if summary.current_updated {
        audit.push_line("current image hashes updated");
    }
    if let Some(snapshots) = &summary.snapshots {
        audit.push_line(snapshots.to_string());
    }
    audit.push_ack(AuditStatus::Ok, "SYNC", None);
    Ok(ExitCode::SUCCESS)
}

fn run_create_keys(tool: &Sbctl, audit: &mut SyncAudit) -> Result<ExitCode> {
    tool.ensure_available()?;
    tool.create_keys().context("create signing keys")?;
    audit.push_ack(AuditStatus::Ok, "CREATE-KEYS", None);
    Ok(ExitCode::SUCCESS)
}

fn run_enroll(tool: &Sbctl, include_microsoft: bool, audit: &mut SyncAudit) -> Result<ExitCode> {
    enroll(tool, include_microsoft)?;
    let detail = format!("microsoft={include_microsoft}");
    audit.push_ack(AuditStatus::Ok, "ENROLL-KEYS", Some(detail.as_str()));
    Ok(ExitCode::SUCCESS)
}

fn push_sign_outcome(audit: &mut SyncAudit, outcome: &SignOutcome) {
    for path in &outcome.signed {
        audit.push_line(format!("signed    {}", path.display()));
    }
    for path in &outcome.failed {
        audit.push_line(format!("failed    {}", path.display()));
    }
    let detail = format!(
        "signed={} already={} failed={}",
        outcome.signed.len(),
        outcome.already_signed.len(),
        outcome.failed.len()
    );
    audit.push_ack(AuditStatus::Ok, "SIGN", Some(detail.as_str()));
}

fn yes_no(value: bool) -> &'static str {
    if value {
        "yes"
    } else {
        "no"
    }
}
