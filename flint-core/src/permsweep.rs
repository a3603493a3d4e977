// SPDX-FileCopyrightText: Copyright © 2020-2024 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Permission sweeper (§4.11): after migration and purge have settled which
//! `DirInstance` owns each `Dir`, reapplies ownership and reconciles
//! filesystem permissions for every directory the transaction touched.

use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use log::warn;
use nix::unistd::{chown, Gid, Uid};
use thiserror::Error;
use vfs::dirtree::{DirId, DirTree};

#[derive(Debug, Error)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("chown failed: {0}")]
    Chown(#[from] nix::Error),
}

/// Resolve dir ownership across every `DirInstance` attached to this
/// transaction's packages (spec.md §4.11 step 1, `apply_diri_permissions`
/// run once per claim), then reconcile `permissions_stale` directories
/// against the real filesystem (step 2, `fs_update_perms`).
///
/// `replaces` breaks ownership ties the same way the installer's directory
/// handling does. Returns the number of directories whose on-disk mode/owner
/// were actually changed.
pub fn sweep(tree: &mut DirTree, root: &Path, replaces: impl Fn(&str, &str) -> bool + Copy) -> usize {
    resolve_ownership(tree, replaces);
    apply_stale_permissions(tree, root)
}

/// Step 1: for every directory, let its current owner's claim stand unless
/// another claim on the same `Dir` wins by `replaces`. This walks the whole
/// tree rather than tracking a dirty-set, since no global "ownership changed"
/// flag is threaded through the rest of this implementation.
fn resolve_ownership(tree: &mut DirTree, replaces: impl Fn(&str, &str) -> bool + Copy) {
    let dirs: Vec<DirId> = tree.dirs().cloned().collect();
    for dir in dirs {
        let owner = dir.borrow().owner.clone();
        let Some(owner) = owner else { continue };
        tree.apply_diri_permissions(&owner, replaces);
    }
}

/// Step 2: `chmod`/`chown` every directory marked `permissions_stale` to its
/// resolved owner's ACL, clearing the flag on success and logging (rather
/// than aborting the transaction) on failure — a dir this implementation
/// cannot fix up is not a reason to roll back an otherwise-successful
/// install (spec.md §7 "best-effort maintenance work").
fn apply_stale_permissions(tree: &mut DirTree, root: &Path) -> usize {
    let mut fixed = 0;

    for dir in tree.dirs() {
        let stale = dir.borrow().permissions_stale;
        if !stale {
            continue;
        }

        let Some(owner) = dir.borrow().owner.clone() else { continue };
        let acl = owner.borrow().acl.value().clone();
        let path = root.join(dir.borrow().path.trim_start_matches('/'));

        match apply_acl(&path, acl.mode, acl.uid, acl.gid) {
            Ok(()) => {
                dir.borrow_mut().permissions_stale = false;
                dir.borrow_mut().permissions_ok = true;
                fixed += 1;
            }
            Err(e) => {
                warn!("updating permissions on {path:?}: {e}");
            }
        }
    }

    fixed
}

fn apply_acl(path: &Path, mode: u16, uid: u32, gid: u32) -> Result<(), Error> {
    let perms = std::fs::Permissions::from_mode(mode as u32);
    std::fs::set_permissions(path, perms)?;
    chown(path, Some(Uid::from_raw(uid)), Some(Gid::from_raw(gid)))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;
    use vfs::dirtree::{AclValue, DirInstance};

    #[test]
    fn sweep_applies_owner_and_clears_stale_flag() {
        let dir = tempfile::tempdir().unwrap();
        let mut tree = DirTree::new();

        fs_err::create_dir_all(dir.path().join("usr/bin")).unwrap();

        // chown to the current uid/gid rather than 0:0 so this passes
        // without running as root.
        let uid = nix::unistd::getuid().as_raw();
        let gid = nix::unistd::getgid().as_raw();

        let node = tree.dir_get("/usr/bin");
        let diri = Rc::new(std::cell::RefCell::new(DirInstance {
            package: "pkg".into(),
            dir: node.clone(),
            acl: tree.acls().intern(AclValue {
                mode: 0o700,
                uid,
                gid,
                xattr_digest: None,
            }),
            files: Vec::new(),
        }));

        assert!(tree.apply_diri_permissions(&diri, |_, _| false));
        assert!(node.borrow().permissions_stale);

        let fixed = sweep(&mut tree, dir.path(), |_, _| false);
        assert_eq!(fixed, 1);
        assert!(!node.borrow().permissions_stale);

        let mode = std::fs::metadata(dir.path().join("usr/bin")).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o700);
    }

    #[test]
    fn sweep_is_a_no_op_when_nothing_is_stale() {
        let mut tree = DirTree::new();
        let dir = tempfile::tempdir().unwrap();
        tree.dir_get("/usr");
        let fixed = sweep(&mut tree, dir.path(), |_, _| false);
        assert_eq!(fixed, 0);
    }
}
