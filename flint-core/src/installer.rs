// SPDX-FileCopyrightText: Copyright © 2020-2024 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Installer (§4.6): drives archive extraction into the staging area,
//! building the in-memory footprint for one package and validating every
//! entry against path-sanitization, hardlink integrity and file-ownership
//! conflict rules.
//!
//! The archive codec itself (v2 tar.gz, v3 ADB) is an external collaborator
//! (spec.md §1); this module only consumes the op-vector spec.md §4.6
//! describes (`v2meta`/`v3meta`, `script`, `file`) through the small
//! [`ArchiveEvent`] enum below, so any archive reader — `crates/stone`'s ADB
//! payloads or a tar walker — can drive it.

use std::io;
use std::rc::Rc;

use fs_err as fs;
use log::warn;
use sha2::{Digest as _, Sha256};
use thiserror::Error;
use vfs::dirtree::{AclValue, Checksum, DirInstance, DirInstanceId, DirTree, FileEntry, FileId};

use crate::flags::InstallFlags;
use crate::package::{InstalledPackage, Package, ScriptKind};

#[derive(Debug, Error)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("preparing directory: {0}")]
    Dir(#[from] vfs::dirtree::Error),
    #[error("hardlink target {0:?} not found in this package")]
    MissingHardlinkTarget(String),
}

/// One archive entry's file-type payload, as the installer needs it.
/// Mirrors spec.md §4.6.1's three shapes: directories, regular files
/// (optionally the source of a later hardlink), and hardlinks to an
/// already-seen regular entry in the same package.
#[derive(Debug, Clone)]
pub enum ArchiveEntryKind {
    Directory,
    Regular {
        /// Archive-provided content digest; `None` for old v2 archives that
        /// shipped no checksum (spec.md §4.6.1 "missing digests warn").
        digest: Option<Checksum>,
    },
    Symlink {
        target: String,
    },
    /// Hardlink to a regular entry already unpacked earlier in this same
    /// package (`(hldir, hlfile)`).
    Hardlink {
        target_dir: String,
        target_file: String,
    },
}

/// One `file` op-vector event: an archive path plus its kind, uid/gid/mode.
#[derive(Debug, Clone)]
pub struct ArchiveEntry {
    /// Path exactly as stored in the archive (leading `/` optional).
    pub path: String,
    pub kind: ArchiveEntryKind,
    pub uid: u32,
    pub gid: u32,
    pub mode: u16,
    /// Content size in bytes (0 for directories/symlinks/hardlinks); summed
    /// into [`Installer::installed_size`] (spec.md §4.6.1 "sum installed
    /// size for progress callbacks").
    pub size: u64,
}

/// The op-vector events spec.md §4.6 step 4 lists, in the order an archive
/// reader would emit them.
pub enum ArchiveEvent {
    /// `v2meta`/`v3meta`: populates the package's installed-state before any
    /// file entries arrive.
    Meta {
        replaces: Vec<String>,
        replaces_priority: Option<u32>,
        trigger_patterns: Vec<String>,
        v3: bool,
    },
    /// A lifecycle script blob read from the archive's control stream.
    Script { kind: ScriptKind, blob: Vec<u8> },
    /// A single filesystem entry.
    File(ArchiveEntry),
}

/// Outcome of consulting the global file index for an existing owner
/// (spec.md §4.6.1 `replaces_file`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileReplace {
    /// Proceed, silently overwriting the previous owner.
    Yes,
    /// Overwrite only if `FORCE_OVERWRITE` is set; otherwise an error.
    Conflict,
    /// Skip this entry silently; the existing owner wins.
    No,
}

/// Decide whether `new_pkg`'s file may replace the one owned by `old_pkg_name`.
/// Reinstalling/upgrading the same package always wins; an explicit
/// `replaces:` entry naming the old package wins; anything else conflicts.
///
/// This is the precise policy spec.md §9 "Open questions" defers to the
/// package-metadata component without specifying further; kept here as a
/// pure function so it's trivially swappable once that component exists.
pub fn replaces_file(old_pkg_name: &str, new_pkg_name: &str, new_replaces: &[String]) -> FileReplace {
    if old_pkg_name == new_pkg_name {
        FileReplace::Yes
    } else if new_replaces.iter().any(|r| r == old_pkg_name) {
        FileReplace::Yes
    } else {
        FileReplace::Conflict
    }
}

/// Reject entries whose path would escape the install root: absolute paths,
/// `.`/`..` traversal segments, or embedded control characters (spec.md
/// §4.6.1, end-to-end scenario 4).
pub fn sanitize_path(path: &str) -> Result<String, String> {
    if path.starts_with('/') {
        return Err(format!("{path:?} is absolute"));
    }
    if path.chars().any(|c| c.is_control()) {
        return Err(format!("{path:?} contains control characters"));
    }
    for segment in path.split('/') {
        if segment == ".." || segment == "." {
            return Err(format!("{path:?} contains a traversal segment"));
        }
    }
    Ok(path.to_string())
}

/// Right-split an archive-relative path into `(dir, filename)`, rooted at `/`.
fn split_dir_file(path: &str) -> (String, String) {
    match path.rsplit_once('/') {
        Some((dir, file)) => (format!("/{dir}"), file.to_string()),
        None => ("/".to_string(), path.to_string()),
    }
}

/// Drives one package's extraction into `tree`, building its `ipkg`
/// footprint and staging regular-file content under `staging_dir`.
pub struct Installer<'a> {
    tree: &'a mut DirTree,
    pkg_name: String,
    staging_dir: std::path::PathBuf,
    flags: InstallFlags,
    ipkg: InstalledPackage,
    /// Regular files staged this package, keyed by archive path, for
    /// hardlink target resolution within the same archive.
    staged: std::collections::HashMap<String, FileId>,
    pub installed_size: u64,
}

impl<'a> Installer<'a> {
    pub fn new(tree: &'a mut DirTree, pkg_name: impl Into<String>, staging_dir: impl Into<std::path::PathBuf>, flags: InstallFlags) -> Self {
        Self {
            tree,
            pkg_name: pkg_name.into(),
            staging_dir: staging_dir.into(),
            flags,
            ipkg: InstalledPackage::new(),
            staged: std::collections::HashMap::new(),
            installed_size: 0,
        }
    }

    /// Apply one [`ArchiveEvent`]. Per-entry failures (conflicts, sanitization,
    /// missing hardlink targets) are recorded as `broken_files` rather than
    /// aborting the whole install (spec.md §7 "per-file install failures
    /// ... continue").
    pub fn apply(&mut self, event: ArchiveEvent, replaces_dir: impl Fn(&str, &str) -> bool) -> Result<(), Error> {
        match event {
            ArchiveEvent::Meta {
                replaces,
                replaces_priority,
                trigger_patterns,
                v3,
            } => {
                self.ipkg.replaces = replaces;
                self.ipkg.replaces_priority = replaces_priority;
                self.ipkg.trigger_patterns = trigger_patterns;
                self.ipkg.v3 = v3;
                Ok(())
            }
            ArchiveEvent::Script { kind, blob } => {
                self.ipkg.set_script(kind, blob);
                Ok(())
            }
            ArchiveEvent::File(entry) => self.install_entry(entry, replaces_dir),
        }
    }

    fn install_entry(&mut self, entry: ArchiveEntry, replaces_dir: impl Fn(&str, &str) -> bool) -> Result<(), Error> {
        let sanitized = match sanitize_path(&entry.path) {
            Ok(p) => p,
            Err(reason) => {
                warn!("skipping {:?}: {reason}", entry.path);
                self.ipkg.broken_files = true;
                return Ok(());
            }
        };

        match &entry.kind {
            ArchiveEntryKind::Directory => self.install_dir(&sanitized, &entry, replaces_dir),
            ArchiveEntryKind::Regular { digest } => self.install_regular(&sanitized, &entry, digest.clone()),
            ArchiveEntryKind::Symlink { target } => self.install_symlink(&sanitized, &entry, target),
            ArchiveEntryKind::Hardlink { target_dir, target_file } => {
                self.install_hardlink(&sanitized, &entry, target_dir, target_file)
            }
        }
    }

    fn diri_for(&mut self, dir_path: &str, acl: AclValue) -> DirInstanceId {
        if let Some(existing) = self.ipkg.dir_instances.iter().find(|d| d.borrow().dir.borrow().path == dir_path) {
            return existing.clone();
        }
        let dir = self.tree.dir_get(dir_path);
        let diri = Rc::new(std::cell::RefCell::new(DirInstance {
            package: self.pkg_name.clone(),
            dir,
            acl: self.tree.acls().intern(acl),
            files: Vec::new(),
        }));
        self.ipkg.dir_instances.push(diri.clone());
        diri
    }

    fn install_dir(&mut self, path: &str, entry: &ArchiveEntry, replaces_dir: impl Fn(&str, &str) -> bool) -> Result<(), Error> {
        let rooted = format!("/{path}");
        let acl = AclValue {
            mode: entry.mode,
            uid: entry.uid,
            gid: entry.gid,
            xattr_digest: None,
        };
        let diri = self.diri_for(&rooted, acl.clone());
        self.tree.apply_diri_permissions(&diri, replaces_dir);

        let current_owner_acl = diri.borrow().dir.borrow().owner.as_ref().map(|o| o.borrow().acl.value().clone());
        self.tree.dir_prepare(&diri.borrow().dir.clone(), current_owner_acl.as_ref())?;
        Ok(())
    }

    fn install_regular(&mut self, path: &str, entry: &ArchiveEntry, digest: Option<Checksum>) -> Result<(), Error> {
        let (bdir, bfile) = split_dir_file(path);

        if let Some(existing) = self.tree.file_query(&bdir, &bfile) {
            let old_owner = existing.borrow().diri.borrow().package.clone();
            match replaces_file(&old_owner, &self.pkg_name, &self.ipkg.replaces) {
                FileReplace::Yes => {}
                FileReplace::Conflict if self.flags.contains(InstallFlags::FORCE_OVERWRITE) => {
                    warn!("forcing overwrite of {path:?} previously owned by {old_owner}");
                }
                FileReplace::Conflict => {
                    warn!("conflict installing {path:?}: already owned by {old_owner}");
                    self.ipkg.broken_files = true;
                    return Ok(());
                }
                FileReplace::No => return Ok(()),
            }
        }

        let acl = AclValue {
            mode: entry.mode,
            uid: entry.uid,
            gid: entry.gid,
            xattr_digest: None,
        };
        // The dir claim normally already exists from a preceding directory
        // entry; fall back to the default dir ACL if the archive omitted it.
        let default_dir_acl = self.tree.acls().default_dir().value().clone();
        let diri = self.diri_for(&bdir, default_dir_acl);

        let checksum = match digest {
            Some(d) => d,
            None => {
                warn!("{path:?} has no archive-provided digest; marking broken_files");
                self.ipkg.broken_files = true;
                Checksum::Sha256(Box::new([0u8; 32]))
            }
        };

        let file = Rc::new(std::cell::RefCell::new(FileEntry {
            diri: diri.clone(),
            name: bfile.clone(),
            acl: self.tree.acls().intern(acl),
            checksum: Some(checksum),
        }));

        self.stage_path(path)?;
        diri.borrow_mut().files.push(file.clone());
        self.tree.file_insert(file.clone());
        self.staged.insert(path.to_string(), file);
        self.installed_size += entry.size;
        Ok(())
    }

    fn install_symlink(&mut self, path: &str, entry: &ArchiveEntry, target: &str) -> Result<(), Error> {
        let (bdir, bfile) = split_dir_file(path);
        let acl = AclValue {
            mode: entry.mode,
            uid: entry.uid,
            gid: entry.gid,
            xattr_digest: None,
        };
        let diri = self.diri_for(&bdir, acl.clone());

        // v3 symlinks checksum their target, SHA-256 truncated to 160 bits
        // (spec.md §4.6.1); v2 archives carry no meaningful symlink digest.
        let mut hasher = Sha256::new();
        hasher.update(target.as_bytes());
        let full = hasher.finalize();
        self.ipkg.sha256_160 = true;

        let file = Rc::new(std::cell::RefCell::new(FileEntry {
            diri: diri.clone(),
            name: bfile,
            acl: self.tree.acls().intern(acl),
            checksum: Some(Checksum::Sha256Truncated160(full[..20].to_vec().into_boxed_slice())),
        }));

        diri.borrow_mut().files.push(file.clone());
        self.tree.file_insert(file.clone());
        self.staged.insert(path.to_string(), file);
        Ok(())
    }

    fn install_hardlink(&mut self, path: &str, entry: &ArchiveEntry, target_dir: &str, target_file: &str) -> Result<(), Error> {
        let target_key = format!("{}/{}", target_dir.trim_matches('/'), target_file);
        let Some(target) = self.staged.get(&target_key).cloned() else {
            warn!("hardlink {path:?} targets missing entry {target_key:?}");
            self.ipkg.broken_files = true;
            return Ok(());
        };

        let (bdir, bfile) = split_dir_file(path);
        let acl = AclValue {
            mode: entry.mode,
            uid: entry.uid,
            gid: entry.gid,
            xattr_digest: None,
        };
        let diri = self.diri_for(&bdir, acl.clone());
        let checksum = target.borrow().checksum.clone();

        let file = Rc::new(std::cell::RefCell::new(FileEntry {
            diri: diri.clone(),
            name: bfile,
            acl: self.tree.acls().intern(acl),
            checksum,
        }));

        self.stage_hardlink(path, &target_key)?;
        diri.borrow_mut().files.push(file.clone());
        self.tree.file_insert(file.clone());
        self.staged.insert(path.to_string(), file);
        Ok(())
    }

    /// Stage content at `lib/apk/tmp/<path>`, i.e. the filesystem layer's
    /// `fs_extract` writing to a temporary name adjacent to the final path
    /// (spec.md §4.6.1). The archive reader is expected to have already
    /// written the bytes there by the time `apply` runs; this just ensures
    /// the parent directory exists so a simulate-mode caller can no-op.
    fn stage_path(&self, rel_path: &str) -> Result<(), Error> {
        let staged = self.staging_dir.join(rel_path);
        if let Some(parent) = staged.parent() {
            fs::create_dir_all(parent)?;
        }
        Ok(())
    }

    fn stage_hardlink(&self, rel_path: &str, target_rel: &str) -> Result<(), Error> {
        self.stage_path(rel_path)?;
        let staged = self.staging_dir.join(rel_path);
        let target = self.staging_dir.join(target_rel);
        if target.exists() && !staged.exists() {
            let _ = fs::hard_link(&target, &staged);
        }
        Ok(())
    }

    pub fn finish(self) -> InstalledPackage {
        self.ipkg
    }
}

/// Select the source to install `pkg` from (spec.md §4.6 step 1): the
/// package's own `filename` if this is a direct-file install, otherwise a
/// repository whose `repos` bitmask intersects the package's, preferring a
/// local (`file://`) repository when more than one matches.
pub fn select_source<'a>(pkg: &Package, repositories: &'a [crate::repository::Repository], repo_mask: u32) -> Option<InstallSource<'a>> {
    if let Some(filename) = &pkg.filename {
        return Some(InstallSource::File(filename.clone()));
    }

    let mut candidates: Vec<&crate::repository::Repository> = repositories
        .iter()
        .enumerate()
        .filter(|(i, _)| repo_mask & (1 << i) != 0)
        .map(|(_, r)| r)
        .collect();

    candidates.sort_by_key(|r| r.is_remote());
    candidates.into_iter().next().map(InstallSource::Repository)
}

pub enum InstallSource<'a> {
    File(String),
    Repository(&'a crate::repository::Repository),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_rejects_absolute_path() {
        assert!(sanitize_path("/etc/shadow").is_err());
    }

    #[test]
    fn sanitize_rejects_traversal() {
        assert!(sanitize_path("../etc/shadow").is_err());
        assert!(sanitize_path("usr/../../etc/shadow").is_err());
    }

    #[test]
    fn sanitize_accepts_normal_path() {
        assert_eq!(sanitize_path("usr/bin/foo").unwrap(), "usr/bin/foo");
    }

    #[test]
    fn replaces_file_same_package_is_yes() {
        assert_eq!(replaces_file("bash", "bash", &[]), FileReplace::Yes);
    }

    #[test]
    fn replaces_file_declared_replaces_is_yes() {
        assert_eq!(replaces_file("old-bash", "bash", &["old-bash".to_string()]), FileReplace::Yes);
    }

    #[test]
    fn replaces_file_undeclared_conflict() {
        assert_eq!(replaces_file("pkg-a", "pkg-b", &[]), FileReplace::Conflict);
    }

    #[test]
    fn split_dir_file_roots_at_slash() {
        assert_eq!(split_dir_file("usr/bin/foo"), ("/usr/bin".to_string(), "foo".to_string()));
        assert_eq!(split_dir_file("foo"), ("/".to_string(), "foo".to_string()));
    }

    #[test]
    fn install_two_files_populates_footprint() {
        let dir = tempfile::tempdir().unwrap();
        let mut tree = DirTree::new();
        let mut installer = Installer::new(&mut tree, "foo", dir.path(), InstallFlags::NONE);

        installer
            .apply(
                ArchiveEvent::File(ArchiveEntry {
                    path: "usr/bin".to_string(),
                    kind: ArchiveEntryKind::Directory,
                    uid: 0,
                    gid: 0,
                    mode: 0o755,
                    size: 5,
                }),
                |_, _| false,
            )
            .unwrap();

        installer
            .apply(
                ArchiveEvent::File(ArchiveEntry {
                    path: "usr/bin/foo".to_string(),
                    kind: ArchiveEntryKind::Regular {
                        digest: Some(Checksum::Sha256(vec![1u8; 32].into_boxed_slice())),
                    },
                    uid: 0,
                    gid: 0,
                    mode: 0o755,
                    size: 5,
                }),
                |_, _| false,
            )
            .unwrap();

        assert_eq!(installer.installed_size, 5);

        let ipkg = installer.finish();
        assert!(!ipkg.broken_files);
        assert!(tree.file_query("/usr/bin", "foo").is_some());
    }

    #[test]
    fn conflicting_file_without_replaces_marks_broken_and_keeps_old_owner() {
        let dir = tempfile::tempdir().unwrap();
        let mut tree = DirTree::new();

        let mut a = Installer::new(&mut tree, "pkg-a", dir.path(), InstallFlags::NONE);
        a.apply(
            ArchiveEvent::File(ArchiveEntry {
                path: "usr/bin/foo".to_string(),
                kind: ArchiveEntryKind::Regular {
                    digest: Some(Checksum::Sha256(vec![1u8; 32].into_boxed_slice())),
                },
                uid: 0,
                gid: 0,
                mode: 0o755,
                size: 5,
            }),
            |_, _| false,
        )
        .unwrap();
        a.finish();

        let mut b = Installer::new(&mut tree, "pkg-b", dir.path(), InstallFlags::NONE);
        b.apply(
            ArchiveEvent::File(ArchiveEntry {
                path: "usr/bin/foo".to_string(),
                kind: ArchiveEntryKind::Regular {
                    digest: Some(Checksum::Sha256(vec![2u8; 32].into_boxed_slice())),
                },
                uid: 0,
                gid: 0,
                mode: 0o755,
                size: 5,
            }),
            |_, _| false,
        )
        .unwrap();
        let ipkg_b = b.finish();

        assert!(ipkg_b.broken_files);
        let owner = tree.file_query("/usr/bin", "foo").unwrap().borrow().diri.borrow().package.clone();
        assert_eq!(owner, "pkg-a");
    }
}
