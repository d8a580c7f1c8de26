// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Validate hash reconciliation of limine.conf against boot images.
// Author: Lukas Bower
#![forbid(unsafe_code)]

mod common;

use std::fs;

use anyhow::Result;
use common::{blake, BootTree, ScriptedConfirm};
use limine_sbsync::backup::Recovery;
use limine_sbsync::SyncSession;

const KERNEL: &[u8] = b"arch linux unified kernel image v1";

fn stale() -> String {
    "b".repeat(128)
}

#[test]
fn current_entry_mismatch_is_reported_then_fixed_once() -> Result<()> {
    let tree = BootTree::new();
    tree.write("EFI/Linux/arch-linux.efi", KERNEL);
    tree.write_conf(&format!(
        "timeout: 3\n\n/Arch Linux\n    protocol: efi\n    image_path: boot():/EFI/Linux/arch-linux.efi#{}\n",
        stale()
    ));
    let mut session = SyncSession::new(&tree.settings());

    let report = session.check_mismatches();
    assert_eq!(report.mismatch_count(), 1);
    assert_eq!(report.total_checked(), 1);
    assert_eq!(report.mismatches[0].line_number, 5);
    assert_eq!(report.mismatches[0].actual, blake(KERNEL));

    assert!(session.reconcile_current()?);
    let expected = format!("arch-linux.efi#{}", blake(KERNEL));
    assert!(tree.read_conf().contains(&expected));
    assert!(!tree.read_conf().contains(&stale()));

    assert!(!session.reconcile_current()?);
    assert_eq!(session.check_mismatches().mismatch_count(), 0);
    assert_eq!(tree.backup_files().len(), 1);
    Ok(())
}

#[test]
fn missing_hash_fragment_is_appended() -> Result<()> {
    let tree = BootTree::new();
    tree.write("EFI/Linux/arch-linux.efi", KERNEL);
    tree.write_conf("/Arch\n    image_path: boot():/EFI/Linux/arch-linux.efi\n");
    let mut session = SyncSession::new(&tree.settings());

    assert_eq!(session.check_mismatches().mismatch_count(), 1);
    assert!(session.reconcile_current()?);
    assert_eq!(
        tree.read_conf(),
        format!(
            "/Arch\n    image_path: boot():/EFI/Linux/arch-linux.efi#{}\n",
            blake(KERNEL)
        )
    );
    Ok(())
}

#[test]
fn untouched_lines_stay_byte_identical() -> Result<()> {
    let tree = BootTree::new();
    tree.write("EFI/Linux/arch-linux.efi", KERNEL);
    let original = format!(
        "# managed by hand\r\ntimeout:   5\r\n\r\n/Arch Linux\r\n\tprotocol: efi\r\n\timage_path: boot():/EFI/Linux/arch-linux.efi#{}   \r\n\tcmdline: quiet splash\r\n# image_path: boot():/EFI/Linux/arch-linux.efi#old",
        stale()
    );
    tree.write_conf(&original);
    let mut session = SyncSession::new(&tree.settings());

    assert!(session.reconcile_current()?);
    let patched = tree.read_conf();
    let before: Vec<&str> = original.split_inclusive('\n').collect();
    let after: Vec<&str> = patched.split_inclusive('\n').collect();
    assert_eq!(before.len(), after.len());
    for (index, (old, new)) in before.iter().zip(&after).enumerate() {
        if index == 5 {
            assert_eq!(
                *new,
                format!(
                    "\timage_path: boot():/EFI/Linux/arch-linux.efi#{}   \r\n",
                    blake(KERNEL)
                )
            );
        } else {
            assert_eq!(old, new, "line {} changed", index + 1);
        }
    }
    Ok(())
}

#[test]
fn every_line_naming_the_current_image_is_rewritten() -> Result<()> {
    let tree = BootTree::new();
    tree.write("EFI/Linux/arch-linux.efi", KERNEL);
    tree.write_conf(&format!(
        "/Arch\n    image_path: boot():/EFI/Linux/arch-linux.efi#{stale}\n/Arch (fallback)\n    image_path: boot():/EFI/Linux/arch-linux.efi\n    cmdline: nomodeset\n",
        stale = stale()
    ));
    let mut session = SyncSession::new(&tree.settings());

    assert!(session.reconcile_current()?);
    let conf = tree.read_conf();
    let expected = format!("arch-linux.efi#{}", blake(KERNEL));
    assert_eq!(conf.matches(&expected).count(), 2);
    assert_eq!(tree.backup_files().len(), 1);
    Ok(())
}

#[test]
fn same_file_name_in_two_directories_resolves_by_path() -> Result<()> {
    let tree = BootTree::new();
    tree.write("EFI/Linux/arch-linux.efi", KERNEL);
    tree.write("arch-linux.efi", b"stale copy at the root");
    tree.write_conf(&format!(
        "/Arch\n    image_path: boot():/EFI/Linux/arch-linux.efi#{}\n",
        stale()
    ));
    let mut session = SyncSession::new(&tree.settings());

    let report = session.check_mismatches();
    assert_eq!(report.total_checked(), 1);
    assert_eq!(report.mismatch_count(), 1);
    assert_eq!(report.mismatches[0].path, tree.root().join("EFI/Linux/arch-linux.efi"));

    assert!(session.reconcile_current()?);
    assert!(tree
        .read_conf()
        .contains(&format!("arch-linux.efi#{}", blake(KERNEL))));
    assert!(!session.reconcile_current()?);
    assert_eq!(session.check_mismatches().mismatch_count(), 0);
    assert_eq!(tree.backup_files().len(), 1);
    Ok(())
}

#[test]
fn each_current_image_gets_its_own_hash() -> Result<()> {
    let tree = BootTree::new();
    tree.write("EFI/BOOT/BOOTX64.EFI", b"limine loader");
    tree.write("EFI/Linux/arch-linux.efi", KERNEL);
    tree.write_conf(&format!(
        "/Limine\n    image_path: boot():/EFI/BOOT/BOOTX64.EFI#{stale}\n/Arch\n    image_path: boot():/EFI/Linux/arch-linux.efi#{stale}\n",
        stale = stale()
    ));
    let mut session = SyncSession::new(&tree.settings());

    let report = session.check_mismatches();
    assert_eq!(report.total_checked(), 2);
    assert_eq!(report.mismatch_count(), 2);

    assert!(session.reconcile_current()?);
    let conf = tree.read_conf();
    assert!(conf.contains(&format!("BOOTX64.EFI#{}", blake(b"limine loader"))));
    assert!(conf.contains(&format!("arch-linux.efi#{}", blake(KERNEL))));
    let report = session.check_mismatches();
    assert_eq!(report.total_checked(), 2);
    assert_eq!(report.mismatch_count(), 0);
    Ok(())
}

#[test]
fn path_outside_the_boot_root_falls_back_to_file_name() -> Result<()> {
    let tree = BootTree::new();
    tree.write("EFI/Linux/arch-linux.efi", KERNEL);
    tree.write_conf(&format!(
        "/Arch\n    image_path: boot():/Linux/arch-linux.efi#{}\n",
        stale()
    ));
    let mut session = SyncSession::new(&tree.settings());

    assert_eq!(session.check_mismatches().mismatch_count(), 1);
    assert!(session.reconcile_current()?);
    assert!(tree
        .read_conf()
        .contains(&format!("/Linux/arch-linux.efi#{}", blake(KERNEL))));
    Ok(())
}

#[test]
fn ambiguous_file_name_is_left_untouched() -> Result<()> {
    let tree = BootTree::new();
    tree.write("EFI/Linux/arch-linux.efi", KERNEL);
    tree.write("EFI/Backup/arch-linux.efi", b"another build");
    let original = format!(
        "/Arch\n    image_path: boot():/Other/arch-linux.efi#{}\n",
        stale()
    );
    tree.write_conf(&original);
    let mut session = SyncSession::new(&tree.settings());

    assert!(session.check_mismatches().nothing_to_check());
    assert!(!session.reconcile_current()?);
    assert_eq!(tree.read_conf(), original);
    assert!(tree.backup_files().is_empty());
    Ok(())
}

#[test]
fn uppercase_declared_hash_counts_as_in_sync() -> Result<()> {
    let tree = BootTree::new();
    tree.write("EFI/Linux/arch-linux.efi", KERNEL);
    let original = format!(
        "/Arch\n    image_path: boot():/EFI/Linux/arch-linux.efi#{}\n",
        blake(KERNEL).to_string().to_uppercase()
    );
    tree.write_conf(&original);
    let mut session = SyncSession::new(&tree.settings());

    assert_eq!(session.check_mismatches().mismatch_count(), 0);
    assert!(!session.reconcile_current()?);
    assert_eq!(tree.read_conf(), original);
    assert!(tree.backup_files().is_empty());
    Ok(())
}

#[test]
fn current_rewrite_leaves_snapshot_lines_alone() -> Result<()> {
    let tree = BootTree::new();
    tree.write("EFI/Linux/arch-linux.efi", KERNEL);
    let snapshot = tree.write_snapshot("arch-linux", b"older kernel");
    let snapshot_line = format!(
        "    image_path: boot():/limine_history/{snapshot}#{}\n",
        stale()
    );
    tree.write_conf(&format!(
        "/Arch\n    image_path: boot():/EFI/Linux/arch-linux.efi\n/Snapshots\n{snapshot_line}"
    ));
    let mut session = SyncSession::new(&tree.settings());

    assert!(session.reconcile_current()?);
    assert!(tree.read_conf().ends_with(&snapshot_line));
    Ok(())
}

#[test]
fn snapshots_are_confirmed_once_and_backed_up_once() -> Result<()> {
    let tree = BootTree::new();
    let first = tree.write_snapshot("arch-linux", b"snapshot one");
    let second = tree.write_snapshot("arch-linux", b"snapshot two");
    let third = tree.write_snapshot("arch-linux", b"snapshot three");
    tree.write_conf(&format!(
        "/Snapshots\n//one\n    image_path: boot():/limine_history/{first}#{}\n//two\n    image_path: boot():/limine_history/{second}#{}\n//three\n    image_path: boot():/limine_history/{third}#{}\n",
        blake(b"snapshot one"),
        blake(b"snapshot two"),
        stale()
    ));
    let mut session = SyncSession::new(&tree.settings());
    let mut confirm = ScriptedConfirm::answering(true);

    let summary = session.reconcile_snapshots(&mut confirm)?;
    assert_eq!(summary.updated, 1);
    assert_eq!(summary.checked, 3);
    assert_eq!(summary.out_of_sync, 1);
    assert!(summary.missing_files.is_empty());
    assert_eq!(confirm.prompts.len(), 1);
    assert_eq!(tree.backup_files().len(), 1);
    assert_eq!(session.backups().backups().len(), 1);
    assert!(tree
        .read_conf()
        .contains(&format!("{third}#{}", blake(b"snapshot three"))));
    Ok(())
}

#[test]
fn declined_snapshot_update_writes_nothing() -> Result<()> {
    let tree = BootTree::new();
    let name = tree.write_snapshot("arch-linux", b"snapshot");
    let original = format!(
        "/Snapshot\n    image_path: boot():/limine_history/{name}#{}\n",
        stale()
    );
    tree.write_conf(&original);
    let mut session = SyncSession::new(&tree.settings());
    let mut confirm = ScriptedConfirm::answering(false);

    let summary = session.reconcile_snapshots(&mut confirm)?;
    assert!(summary.declined);
    assert_eq!(summary.updated, 0);
    assert_eq!(summary.checked, 1);
    assert_eq!(tree.read_conf(), original);
    assert!(tree.backup_files().is_empty());
    Ok(())
}

#[test]
fn auto_confirm_skips_the_prompt() -> Result<()> {
    let tree = BootTree::new();
    let name = tree.write_snapshot("arch-linux", b"snapshot");
    tree.write_conf(&format!(
        "/Snapshot\n    image_path: boot():/limine_history/{name}\n"
    ));
    let mut settings = tree.settings();
    settings.auto_confirm = true;
    let mut session = SyncSession::new(&settings);
    let mut confirm = ScriptedConfirm::answering(false);

    let summary = session.reconcile_snapshots(&mut confirm)?;
    assert_eq!(summary.updated, 1);
    assert!(confirm.prompts.is_empty());
    Ok(())
}

#[test]
fn absent_snapshot_file_is_neither_checked_nor_updated() -> Result<()> {
    let tree = BootTree::new();
    let present = tree.write_snapshot("arch-linux", b"kept snapshot");
    let gone_token = "c".repeat(64);
    tree.write_conf(&format!(
        "/Snapshots\n    image_path: boot():/limine_history/arch-linux_sha256_{gone_token}.efi#{}\n    image_path: boot():/limine_history/{present}#{}\n",
        stale(),
        stale()
    ));
    let mut session = SyncSession::new(&tree.settings());
    let mut confirm = ScriptedConfirm::answering(true);

    let summary = session.reconcile_snapshots(&mut confirm)?;
    assert_eq!(summary.missing_files, vec![2]);
    assert_eq!(summary.checked, 1);
    assert_eq!(summary.updated, 1);
    assert!(tree
        .read_conf()
        .contains(&format!("arch-linux_sha256_{gone_token}.efi#{}", stale())));
    Ok(())
}

#[test]
fn missing_config_is_not_an_error() -> Result<()> {
    let tree = BootTree::new();
    tree.write("EFI/Linux/arch-linux.efi", KERNEL);
    let mut session = SyncSession::new(&tree.settings());
    let mut confirm = ScriptedConfirm::answering(true);

    let report = session.check_mismatches();
    assert!(report.nothing_to_check());
    assert_eq!(report.to_string(), "no boot entries found to check");
    assert!(!session.reconcile_current()?);
    assert_eq!(session.reconcile_snapshots(&mut confirm)?.checked, 0);
    assert!(confirm.prompts.is_empty());
    Ok(())
}

#[test]
fn unreferenced_entries_are_not_counted() {
    let tree = BootTree::new();
    tree.write("EFI/Linux/arch-linux.efi", KERNEL);
    tree.write("EFI/Linux/arch-linux-lts.efi", b"lts");
    tree.write_conf(&format!(
        "/Arch\n    image_path: boot():/EFI/Linux/arch-linux.efi#{}\n",
        blake(KERNEL)
    ));
    let mut session = SyncSession::new(&tree.settings());

    let report = session.check_mismatches();
    assert_eq!(report.total_checked(), 1);
    assert_eq!(report.mismatch_count(), 0);
}

#[test]
fn failed_write_restores_the_backup() -> Result<()> {
    let tree = BootTree::new();
    tree.write("EFI/Linux/arch-linux.efi", KERNEL);
    let original = format!(
        "/Arch\n    image_path: boot():/EFI/Linux/arch-linux.efi#{}\n",
        stale()
    );
    tree.write_conf(&original);
    // A directory in place of the temporary file makes the final write fail.
    fs::create_dir(tree.root().join("limine.conf.partial"))?;
    let mut session = SyncSession::new(&tree.settings());

    assert!(session.reconcile_current().is_err());
    assert!(session.backups().mutation_in_flight());
    let backup = tree.backup_files().pop().expect("backup taken");
    assert_eq!(session.recover(), Recovery::Restored(backup));
    assert!(!session.backups().mutation_in_flight());
    assert_eq!(tree.read_conf(), original);
    assert_eq!(session.recover(), Recovery::NotNeeded);
    Ok(())
}

#[test]
fn recovery_after_success_is_a_no_op() -> Result<()> {
    let tree = BootTree::new();
    tree.write("EFI/Linux/arch-linux.efi", KERNEL);
    tree.write_conf("/Arch\n    image_path: boot():/EFI/Linux/arch-linux.efi\n");
    let mut session = SyncSession::new(&tree.settings());

    assert!(session.reconcile_current()?);
    let patched = tree.read_conf();
    assert_eq!(session.recover(), Recovery::NotNeeded);
    assert_eq!(tree.read_conf(), patched);
    Ok(())
}
