// SPDX-FileCopyrightText: Copyright © 2020-2024 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Purger (§4.8): the reverse of install — removes a package's footprint
//! from both the filesystem and the in-memory directory tree, respecting
//! protected-path policy unless `PURGE` overrides it.

use std::path::{Path, PathBuf};

use fs_err as fs;
use log::warn;
use vfs::dirtree::{DirTree, ProtectMode, UnrefMode};

use crate::flags::InstallFlags;
use crate::migrate::{audit_file, Audit};
use crate::package::InstalledPackage;

/// Whether this purge is unwinding a committed install (files really are on
/// disk, owned by this package) or canceling an aborted one mid-install
/// (files were only ever staged). Mirrors spec.md §8 "Cancellation":
/// `is_installed=false` issues `CANCEL` rather than `DELETE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PurgeMode {
    Installed,
    Aborted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PurgeAction {
    Delete,
    Cancel,
}

/// Decide the per-file purge action (spec.md §4.8).
pub fn decide_action(mode: PurgeMode, protect_mode: ProtectMode, audit: Audit, flags: InstallFlags) -> PurgeAction {
    if mode == PurgeMode::Aborted {
        return PurgeAction::Cancel;
    }

    let is_protected = !matches!(protect_mode, ProtectMode::None | ProtectMode::Ignore);
    if is_protected && audit != Audit::Clean && !flags.contains(InstallFlags::PURGE) {
        return PurgeAction::Cancel;
    }

    PurgeAction::Delete
}

/// Purge `ipkg`'s entire footprint: for every owned `DirInstance`/`File`,
/// apply the appropriate filesystem action, drop the global index entry,
/// mark the dir `modified` for the trigger sweep, and unref the `DirInstance`
/// from the tree (potentially removing the directory itself).
///
/// Returns the count of files actually deleted from disk.
pub fn purge(tree: &mut DirTree, ipkg: &mut InstalledPackage, root: &Path, mode: PurgeMode, flags: InstallFlags) -> usize {
    let mut deleted = 0;

    for diri in ipkg.dir_instances.drain(..) {
        let dir_path = diri.borrow().dir.borrow().path.clone();
        let files = std::mem::take(&mut diri.borrow_mut().files);

        for file in files {
            let name = file.borrow().name.clone();
            let protect_mode = diri.borrow().dir.borrow().protect_mode;
            let final_path = join_root(root, &dir_path, &name);

            let audit = audit_file(&final_path, file.borrow().checksum.as_ref());
            let action = decide_action(mode, protect_mode, audit, flags);

            match action {
                PurgeAction::Delete => {
                    if let Err(e) = fs::remove_file(&final_path) {
                        if e.kind() != std::io::ErrorKind::NotFound {
                            warn!("removing {final_path:?}: {e}");
                        }
                    } else {
                        deleted += 1;
                    }
                }
                PurgeAction::Cancel => {}
            }

            tree.file_remove(&dir_path, &name);
        }

        diri.borrow().dir.borrow_mut().modified = true;
        let dir = diri.borrow().dir.clone();
        tree.dir_unref(&dir, unref_mode(mode));
    }

    deleted
}

fn unref_mode(mode: PurgeMode) -> UnrefMode {
    match mode {
        PurgeMode::Installed => UnrefMode::Remove,
        PurgeMode::Aborted => UnrefMode::Keep,
    }
}

fn join_root(root: &Path, dir_path: &str, name: &str) -> PathBuf {
    root.join(dir_path.trim_start_matches('/')).join(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;
    use vfs::dirtree::{Checksum, DirInstance, DirInstanceId, FileEntry};

    fn owned_diri(tree: &mut DirTree, path: &str, pkg: &str) -> DirInstanceId {
        let dir = tree.dir_get(path);
        Rc::new(std::cell::RefCell::new(DirInstance {
            package: pkg.to_string(),
            dir,
            acl: tree.acls().default_dir(),
            files: Vec::new(),
        }))
    }

    #[test]
    fn purge_deletes_clean_file_and_removes_from_index() {
        let dir = tempfile::tempdir().unwrap();
        let mut tree = DirTree::new();
        let diri = owned_diri(&mut tree, "/usr/bin", "foo");

        fs::create_dir_all(dir.path().join("usr/bin")).unwrap();
        fs::write(dir.path().join("usr/bin/foo"), b"hello").unwrap();

        let file = Rc::new(std::cell::RefCell::new(FileEntry {
            diri: diri.clone(),
            name: "foo".to_string(),
            acl: tree.acls().default_file(),
            checksum: None,
        }));
        diri.borrow_mut().files.push(file.clone());
        tree.file_insert(file);

        let mut ipkg = InstalledPackage::new();
        ipkg.dir_instances.push(diri);

        let deleted = purge(&mut tree, &mut ipkg, dir.path(), PurgeMode::Installed, InstallFlags::NONE);
        assert_eq!(deleted, 1);
        assert!(tree.file_query("/usr/bin", "foo").is_none());
        assert!(!dir.path().join("usr/bin/foo").exists());
    }

    #[test]
    fn aborted_install_cancels_instead_of_deleting() {
        let dir = tempfile::tempdir().unwrap();
        let mut tree = DirTree::new();
        let diri = owned_diri(&mut tree, "/usr/bin", "foo");

        fs::create_dir_all(dir.path().join("usr/bin")).unwrap();
        fs::write(dir.path().join("usr/bin/foo"), b"hello").unwrap();

        let file = Rc::new(std::cell::RefCell::new(FileEntry {
            diri: diri.clone(),
            name: "foo".to_string(),
            acl: tree.acls().default_file(),
            checksum: Some(Checksum::Sha256(vec![9u8; 32].into_boxed_slice())),
        }));
        diri.borrow_mut().files.push(file.clone());
        tree.file_insert(file);

        let mut ipkg = InstalledPackage::new();
        ipkg.dir_instances.push(diri);

        let deleted = purge(&mut tree, &mut ipkg, dir.path(), PurgeMode::Aborted, InstallFlags::NONE);
        assert_eq!(deleted, 0);
        assert!(dir.path().join("usr/bin/foo").exists());
    }

    #[test]
    fn purge_flag_deletes_protected_file_even_if_modified() {
        let action = decide_action(PurgeMode::Installed, ProtectMode::Changed, Audit::Modified, InstallFlags::PURGE);
        assert_eq!(action, PurgeAction::Delete);
    }

    #[test]
    fn protected_modified_file_is_kept_without_purge_flag() {
        let action = decide_action(PurgeMode::Installed, ProtectMode::Changed, Audit::Modified, InstallFlags::NONE);
        assert_eq!(action, PurgeAction::Cancel);
    }
}
