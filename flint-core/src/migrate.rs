// SPDX-FileCopyrightText: Copyright © 2020-2024 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Migrator (§4.7): two-phase commit of staged files to their final
//! locations, priority-ordered, resolving conflicts against protected-path
//! policy and keeping user-modified protected files as `.apk-new`.

use std::io;
use std::path::{Path, PathBuf};

use fs_err as fs;
use log::warn;
use sha2::{Digest as _, Sha256};
use thiserror::Error;
use vfs::dirtree::{Checksum, DirTree, FileId, ProtectMode};

use crate::flags::InstallFlags;

#[derive(Debug, Error)]
pub enum Error {
    #[error("io error migrating {path:?}: {source}")]
    Io { path: PathBuf, source: io::Error },
}

/// The single on-disk location priority this implementation schedules
/// (spec.md §4.7 "each file-system location has a priority in {DISK, ...}");
/// a real multi-location install (overlayfs layers, etc.) would add more
/// variants here without changing the pass-loop below.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
    Disk,
}

/// Control action chosen for one staged file (spec.md §4.7 step 2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrateAction {
    /// Discard the staged file; keep whatever (if anything) is on disk.
    Cancel,
    /// Keep the on-disk file; install the staged one alongside as `.apk-new`.
    ApkNew,
    /// Atomically rename the staged file onto the final path.
    Commit,
}

/// One file staged by the installer, ready to be finalized at `final_path`.
pub struct StagedFile {
    pub staged_path: PathBuf,
    pub final_path: PathBuf,
    pub dir_path: String,
    pub file_name: String,
    pub file: FileId,
    pub priority: Priority,
}

/// Audit outcome of comparing on-disk content against a recorded checksum
/// (spec.md §4.7 step 2, §4.8): `Clean` means the file matches what the
/// database expects, i.e. no local modification to preserve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Audit {
    Clean,
    Modified,
    Missing,
    /// The recorded checksum is a digest type this build can't recompute
    /// (v2 MD5, since no `md5` crate is in the dependency stack). Treated
    /// the same as `Modified` by every protected-path decision so a changed
    /// file is never silently waved through as clean, but kept distinct so
    /// callers can surface it (e.g. `broken_files`) instead of it reading as
    /// an ordinary detected modification.
    Unverifiable,
}

/// Hash `path`'s content the same way a checksum of `expected`'s variant
/// would be computed, and compare. Missing files audit as [`Audit::Missing`].
pub fn audit_file(path: &Path, expected: Option<&Checksum>) -> Audit {
    let Some(expected) = expected else { return Audit::Clean };

    let Ok(bytes) = fs::read(path) else { return Audit::Missing };

    let digest = match expected {
        Checksum::Sha256(_) | Checksum::Sha256Truncated160(_) => {
            let mut hasher = Sha256::new();
            hasher.update(&bytes);
            hasher.finalize().to_vec()
        }
        Checksum::Sha1(_) => {
            use sha1::Sha1;
            let mut hasher = Sha1::new();
            hasher.update(&bytes);
            hasher.finalize().to_vec()
        }
        Checksum::Md5(_) => {
            warn!("{path:?}: can't verify MD5-digested content, treating as unverifiable");
            return Audit::Unverifiable;
        }
    };

    let expected_bytes = expected.bytes();
    let n = expected_bytes.len().min(digest.len());
    if &digest[..n] == &expected_bytes[..n] {
        Audit::Clean
    } else {
        Audit::Modified
    }
}

/// Decide the migrate action for one staged file (spec.md §4.7 step 2).
///
/// `old_owner_pkg` is the package name currently owning `(dir, name)` in the
/// installed index, if any; `None` means either there's no prior owner, or
/// the prior owner is an overlay entry with no package (which always cancels).
pub fn decide_action(
    protect_mode: ProtectMode,
    old_owner_pkg: Option<&str>,
    old_audit: Audit,
    staged_equals_disk: bool,
    flags: InstallFlags,
) -> MigrateAction {
    if old_owner_pkg.is_none() && old_audit != Audit::Missing {
        // An on-disk file with no package owner at all is an overlay entry;
        // spec.md §4.7 step 2 says to discard the staged file in that case.
        return MigrateAction::Cancel;
    }

    let is_protected = !matches!(protect_mode, ProtectMode::None | ProtectMode::Ignore);
    // A missing on-disk file is not a user modification — there is nothing
    // to protect, so a fresh install into a protected directory must still
    // commit (spec.md §8 scenario 1), not go to `.apk-new`. An unverifiable
    // (MD5) digest is treated the same as a detected modification: it is
    // never safe to assume clean.
    let user_modified = matches!(old_audit, Audit::Modified | Audit::Unverifiable);

    if is_protected && user_modified {
        if flags.contains(InstallFlags::CLEAN_PROTECTED) || staged_equals_disk {
            MigrateAction::Cancel
        } else {
            MigrateAction::ApkNew
        }
    } else {
        MigrateAction::Commit
    }
}

/// Apply `action` to `staged` on the real filesystem (spec.md §4.7 step 3,
/// the `fs_control` operation).
pub fn fs_control(staged: &StagedFile, action: MigrateAction) -> Result<(), Error> {
    let map_err = |source: io::Error| Error::Io {
        path: staged.final_path.clone(),
        source,
    };

    match action {
        MigrateAction::Cancel => {
            let _ = fs::remove_file(&staged.staged_path);
        }
        MigrateAction::ApkNew => {
            let apk_new = apk_new_path(&staged.final_path);
            fs::rename(&staged.staged_path, &apk_new).map_err(map_err)?;
        }
        MigrateAction::Commit => {
            if let Some(parent) = staged.final_path.parent() {
                fs::create_dir_all(parent).map_err(map_err)?;
            }
            fs::rename(&staged.staged_path, &staged.final_path).map_err(map_err)?;
        }
    }
    Ok(())
}

pub fn apk_new_path(final_path: &Path) -> PathBuf {
    let mut name = final_path.file_name().unwrap_or_default().to_os_string();
    name.push(".apk-new");
    final_path.with_file_name(name)
}

/// Files whose commit resets the process-wide id cache (spec.md §4.7 step 4).
pub fn resets_id_cache(final_path: &Path) -> bool {
    matches!(final_path.to_str(), Some("/etc/passwd") | Some("/etc/group"))
}

/// Run every pending priority pass over `files`, lowest priority first
/// (spec.md §4.7: "picks the lowest pending priority in each pass"),
/// updating `tree`'s global file index and marking touched dirs `modified`
/// for the trigger sweep. Returns the number of files committed.
pub fn migrate_all(tree: &mut DirTree, mut files: Vec<StagedFile>, flags: InstallFlags) -> Result<usize, Error> {
    files.sort_by_key(|f| f.priority);

    let mut committed = 0;
    let mut id_cache_dirty = false;

    for staged in files {
        let ofile = tree.file_query(&staged.dir_path, &staged.file_name);
        let old_owner_pkg = ofile.as_ref().map(|f| f.borrow().diri.borrow().package.clone());

        let protect_mode = staged.file.borrow().diri.borrow().dir.borrow().protect_mode;
        // Audit against the *old* owner's recorded checksum (spec.md §4.7
        // step 2, §8: "on-disk differs from old-db entry"), not the
        // incoming staged file's checksum — otherwise an unmodified
        // protected file would always look "modified" relative to a
        // differing new version and wrongly go to `.apk-new`.
        let old_checksum = ofile.as_ref().map(|f| f.borrow().checksum.clone());
        let old_audit = match &old_checksum {
            Some(checksum) => audit_file(&staged.final_path, checksum.as_ref()),
            None => Audit::Missing,
        };
        let staged_equals_disk = fs::read(&staged.staged_path).ok() == fs::read(&staged.final_path).ok();

        let action = decide_action(protect_mode, old_owner_pkg.as_deref(), old_audit, staged_equals_disk, flags);

        if let Err(e) = fs_control(&staged, action) {
            warn!("migrating {:?}: {e}", staged.final_path);
            staged.file.borrow_mut().diri.borrow().dir.borrow_mut().modified = true;
            continue;
        }

        if action == MigrateAction::Commit {
            committed += 1;
            if resets_id_cache(&staged.final_path) {
                id_cache_dirty = true;
            }

            if let Some(old) = &ofile {
                if !std::rc::Rc::ptr_eq(old, &staged.file) {
                    let diri_rc = old.borrow().diri.clone();
                    diri_rc.borrow_mut().files.retain(|f| !std::rc::Rc::ptr_eq(f, old));
                }
                tree.file_remove(&staged.dir_path, &staged.file_name);
            }
            tree.file_insert(staged.file.clone());
        }

        staged.file.borrow().diri.borrow().dir.borrow_mut().modified = true;
    }

    if id_cache_dirty {
        warn!("/etc/passwd or /etc/group committed; id cache should be invalidated by the caller");
    }

    Ok(committed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;
    use vfs::dirtree::{AclValue, DirInstance, FileEntry};

    fn make_staged(tree: &mut DirTree, dir_path: &str, name: &str, staging: &Path, content: &[u8]) -> StagedFile {
        let dir = tree.dir_get(dir_path);
        let diri = Rc::new(std::cell::RefCell::new(DirInstance {
            package: "pkg".to_string(),
            dir,
            acl: tree.acls().default_dir(),
            files: Vec::new(),
        }));
        let mut hasher = Sha256::new();
        hasher.update(content);
        let checksum = Checksum::Sha256(hasher.finalize().to_vec().into_boxed_slice());

        let file = Rc::new(std::cell::RefCell::new(FileEntry {
            diri: diri.clone(),
            name: name.to_string(),
            acl: tree.acls().default_file(),
            checksum: Some(checksum),
        }));
        diri.borrow_mut().files.push(file.clone());

        let staged_path = staging.join(format!("staged-{name}"));
        fs::write(&staged_path, content).unwrap();

        StagedFile {
            staged_path,
            final_path: staging.join(name),
            dir_path: dir_path.to_string(),
            file_name: name.to_string(),
            file,
            priority: Priority::Disk,
        }
    }

    #[test]
    fn fresh_install_commits_when_no_prior_owner() {
        let dir = tempfile::tempdir().unwrap();
        let mut tree = DirTree::new();
        let staged = make_staged(&mut tree, "/usr/bin", "foo", dir.path(), b"hello");

        let committed = migrate_all(&mut tree, vec![staged], InstallFlags::NONE).unwrap();
        assert_eq!(committed, 1);
        assert!(dir.path().join("foo").exists());
    }

    /// Upgrade over an unmodified protected file: on-disk content matches
    /// the *old* owner's recorded checksum (`H1`), the incoming staged file
    /// carries a different checksum (`H3`). Spec.md §4.7 step 2 / §8 require
    /// `COMMIT`, not `.apk-new` — regression test for `migrate_all` auditing
    /// against the old owner's checksum rather than the staged file's.
    #[test]
    fn migrate_all_commits_unmodified_protected_file_on_upgrade() {
        let dir = tempfile::tempdir().unwrap();
        let mut tree = DirTree::new();
        let etc = tree.dir_get("/etc");
        etc.borrow_mut().protect_mode = ProtectMode::Changed;

        // Old owner's record and the on-disk content both match H1.
        let old_diri = Rc::new(std::cell::RefCell::new(DirInstance {
            package: "foo".to_string(),
            dir: etc.clone(),
            acl: tree.acls().default_dir(),
            files: Vec::new(),
        }));
        let old_content = b"old config\n";
        let mut hasher = Sha256::new();
        hasher.update(old_content);
        let old_checksum = Checksum::Sha256(hasher.finalize().to_vec().into_boxed_slice());
        let old_file = Rc::new(std::cell::RefCell::new(FileEntry {
            diri: old_diri.clone(),
            name: "foo.conf".to_string(),
            acl: tree.acls().default_file(),
            checksum: Some(old_checksum),
        }));
        old_diri.borrow_mut().files.push(old_file.clone());
        tree.file_insert(old_file);
        fs::write(dir.path().join("foo.conf"), old_content).unwrap();

        // New package ships a different config (H3 != H1).
        let staged = make_staged(&mut tree, "/etc", "foo.conf", dir.path(), b"new config\n");

        let committed = migrate_all(&mut tree, vec![staged], InstallFlags::NONE).unwrap();
        assert_eq!(committed, 1);
        assert_eq!(fs::read(dir.path().join("foo.conf")).unwrap(), b"new config\n");
        assert!(!dir.path().join("foo.conf.apk-new").exists());
    }

    #[test]
    fn protected_dir_with_identical_content_cancels_not_apknew() {
        let protect_mode = ProtectMode::Changed;
        let action = decide_action(protect_mode, Some("pkg"), Audit::Modified, true, InstallFlags::NONE);
        assert_eq!(action, MigrateAction::Cancel);
    }

    #[test]
    fn protected_dir_with_divergent_content_goes_apknew() {
        let protect_mode = ProtectMode::Changed;
        let action = decide_action(protect_mode, Some("pkg"), Audit::Modified, false, InstallFlags::NONE);
        assert_eq!(action, MigrateAction::ApkNew);
    }

    #[test]
    fn clean_protected_flag_forces_cancel() {
        let action = decide_action(ProtectMode::Changed, Some("pkg"), Audit::Modified, false, InstallFlags::CLEAN_PROTECTED);
        assert_eq!(action, MigrateAction::Cancel);
    }

    #[test]
    fn unprotected_dir_always_commits() {
        let action = decide_action(ProtectMode::None, Some("pkg"), Audit::Modified, false, InstallFlags::NONE);
        assert_eq!(action, MigrateAction::Commit);
    }

    #[test]
    fn overlay_owner_cancels() {
        let action = decide_action(ProtectMode::None, None, Audit::Clean, false, InstallFlags::NONE);
        assert_eq!(action, MigrateAction::Cancel);
    }

    #[test]
    fn apk_new_path_appends_suffix() {
        assert_eq!(apk_new_path(Path::new("/etc/foo.conf")), PathBuf::from("/etc/foo.conf.apk-new"));
    }

    #[test]
    fn resets_id_cache_for_passwd_and_group() {
        assert!(resets_id_cache(Path::new("/etc/passwd")));
        assert!(resets_id_cache(Path::new("/etc/group")));
        assert!(!resets_id_cache(Path::new("/etc/foo.conf")));
    }
}
