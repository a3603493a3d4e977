// SPDX-FileCopyrightText: Copyright © 2020-2024 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Reference-counted directory tree: `Dir`, `DirInstance`, `File` and interned `Acl`.
//!
//! Mirrors the installed-state footprint model of an apk-style package
//! database: a `Dir` is shared across every package that lays claim to it,
//! a `DirInstance` is one package's claim, and a `File` always hangs off
//! exactly one `DirInstance`.

use std::cell::RefCell;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

use thiserror::Error;

use crate::path;

/// Interned `(mode, uid, gid, xattr digest)` tuple. Equality is by handle, not by value.
#[derive(Clone)]
pub struct Acl(Rc<AclValue>);

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AclValue {
    pub mode: u16,
    pub uid: u32,
    pub gid: u32,
    pub xattr_digest: Option<Box<[u8]>>,
}

impl Acl {
    pub fn value(&self) -> &AclValue {
        &self.0
    }
}

impl fmt::Debug for Acl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl PartialEq for Acl {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for Acl {}

/// Interning table for [`Acl`] tuples, keeping every `File`/`DirInstance` to a single handle.
#[derive(Default)]
pub struct AclTable {
    interned: RefCell<HashMap<AclValue, Acl>>,
}

impl AclTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn intern(&self, value: AclValue) -> Acl {
        if let Some(existing) = self.interned.borrow().get(&value) {
            return existing.clone();
        }
        let acl = Acl(Rc::new(value.clone()));
        self.interned.borrow_mut().insert(value, acl.clone());
        acl
    }

    pub fn default_dir(&self) -> Acl {
        self.intern(AclValue {
            mode: 0o755,
            uid: 0,
            gid: 0,
            xattr_digest: None,
        })
    }

    pub fn default_file(&self) -> Acl {
        self.intern(AclValue {
            mode: 0o644,
            uid: 0,
            gid: 0,
            xattr_digest: None,
        })
    }
}

/// Content checksum of a `File`. The leading variant tag is what the FDB codec
/// persists as the first hex byte of `Z:`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Checksum {
    Md5(Box<[u8]>),
    Sha1(Box<[u8]>),
    Sha256(Box<[u8]>),
    /// v3 symlink target digest, truncated to 160 bits.
    Sha256Truncated160(Box<[u8]>),
}

impl Checksum {
    pub fn bytes(&self) -> &[u8] {
        match self {
            Checksum::Md5(b) | Checksum::Sha1(b) | Checksum::Sha256(b) | Checksum::Sha256Truncated160(b) => b,
        }
    }
}

/// Directory protection policy, inherited down the tree from configured protected paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProtectMode {
    #[default]
    None,
    Changed,
    Ignore,
    SymlinksOnly,
    All,
}

/// One unresolved segment of a protected-path pattern, inherited from a parent `Dir`
/// until it either matches a child's basename (and is consumed) or runs out of segments.
#[derive(Debug, Clone)]
pub struct ProtectedPattern {
    pub segments: Vec<String>,
    pub mode: ProtectMode,
}

pub type DirId = Rc<RefCell<DirNode>>;
pub type DirInstanceId = Rc<RefCell<DirInstance>>;
pub type FileId = Rc<RefCell<FileEntry>>;

pub struct DirNode {
    pub path: String,
    pub parent: Option<DirId>,
    pub hash: u64,
    pub refs: u32,
    pub owner: Option<DirInstanceId>,
    pub protect_mode: ProtectMode,
    pub protected_children: Vec<ProtectedPattern>,
    pub created: bool,
    pub modified: bool,
    pub permissions_ok: bool,
    pub permissions_stale: bool,
    pub has_protected_children: bool,
}

impl DirNode {
    pub fn basename(&self) -> &str {
        path::file_name(&self.path).unwrap_or(&self.path)
    }
}

/// One package's claim on a `Dir`.
pub struct DirInstance {
    pub package: String,
    pub dir: DirId,
    pub acl: Acl,
    pub files: Vec<FileId>,
}

/// A single filesystem entry owned by a `DirInstance`.
pub struct FileEntry {
    pub diri: DirInstanceId,
    pub name: String,
    pub acl: Acl,
    pub checksum: Option<Checksum>,
}

impl FileEntry {
    pub fn dir_path(&self) -> String {
        self.diri.borrow().dir.borrow().path.clone()
    }
}

/// Whether a just-emptied `Dir` should be removed from disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnrefMode {
    Keep,
    Remove,
}

/// Outcome of reconciling an expected `Acl` against what's on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrepareAction {
    /// Created unconditionally (no expected ACL to check against).
    Created,
    /// Didn't exist; created, and the caller should mark this stale.
    CreatedStale,
    /// Already existed with matching permissions.
    Ok,
    /// Already existed but the ACL needs to be reapplied.
    Modified,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("io error preparing directory: {0}")]
    Io(#[from] std::io::Error),
}

/// The shared directory tree plus global `(dir, filename) -> File` index.
#[derive(Default)]
pub struct DirTree {
    dirs: HashMap<String, DirId>,
    file_index: HashMap<(String, String), FileId>,
    acls: AclTable,
    root_patterns: Vec<ProtectedPattern>,
}

impl DirTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn acls(&self) -> &AclTable {
        &self.acls
    }

    /// Configure the protected-path patterns inherited by the tree root (`/`).
    pub fn set_protected_paths(&mut self, patterns: Vec<ProtectedPattern>) {
        self.root_patterns = patterns;
    }

    fn canonicalize(path: &str) -> String {
        if path == "/" {
            "/".to_string()
        } else {
            let trimmed = path.trim_end_matches('/');
            if trimmed.is_empty() {
                "/".to_string()
            } else {
                trimmed.to_string()
            }
        }
    }

    fn compute_protection(&self, canonical: &str, parent: Option<&DirId>) -> (ProtectMode, Vec<ProtectedPattern>) {
        let basename = path::file_name(canonical).unwrap_or(canonical);
        let inherited: Vec<ProtectedPattern> = match parent {
            Some(p) => p.borrow().protected_children.clone(),
            None => self.root_patterns.clone(),
        };

        let mut mode = ProtectMode::None;
        let mut next = Vec::new();

        for pattern in inherited {
            match pattern.segments.first() {
                Some(seg) if seg == basename => {
                    if pattern.segments.len() == 1 {
                        mode = pattern.mode;
                    } else {
                        next.push(ProtectedPattern {
                            segments: pattern.segments[1..].to_vec(),
                            mode: pattern.mode,
                        });
                    }
                }
                _ => {}
            }
        }

        (mode, next)
    }

    /// Look up (or create) the `Dir` for `path`, incrementing its refcount.
    ///
    /// Idempotent in the sense that repeated calls return the same handle;
    /// each call still bumps `refs` by one, matching the "lookup holds a
    /// reference" contract used by `DirInstance` creation.
    pub fn dir_get(&mut self, path: &str) -> DirId {
        let canonical = Self::canonicalize(path);

        if let Some(existing) = self.dirs.get(&canonical) {
            existing.borrow_mut().refs += 1;
            return existing.clone();
        }

        let parent = path::parent(&canonical)
            .filter(|p| *p != canonical)
            .map(|p| self.dir_get(p));

        let (protect_mode, protected_children) = self.compute_protection(&canonical, parent.as_ref());
        let has_protected_children = !protected_children.is_empty();

        let mut hasher = DefaultHasher::new();
        canonical.hash(&mut hasher);

        let node = Rc::new(RefCell::new(DirNode {
            path: canonical.clone(),
            parent,
            hash: hasher.finish(),
            refs: 1,
            owner: None,
            protect_mode,
            protected_children,
            created: false,
            modified: false,
            permissions_ok: false,
            permissions_stale: false,
            has_protected_children,
        }));

        self.dirs.insert(canonical, node.clone());
        node
    }

    /// Release a reference to `dir`. When the refcount reaches zero the node
    /// is cleared and, in `Remove` mode, an on-disk `rmdir` is attempted
    /// before the parent is transitively unreffed.
    pub fn dir_unref(&mut self, dir: &DirId, mode: UnrefMode) {
        let parent = {
            let mut node = dir.borrow_mut();
            node.refs = node.refs.saturating_sub(1);

            if node.refs != 0 {
                return;
            }

            node.created = false;
            node.permissions_ok = false;
            node.permissions_stale = false;

            if mode == UnrefMode::Remove {
                let _ = std::fs::remove_dir(&node.path);
            }

            self.dirs.remove(&node.path);
            node.parent.clone()
        };

        if let Some(parent) = parent {
            self.dir_unref(&parent, mode);
        }
    }

    /// Ensure `dir` exists on disk with `expected_acl`. A `None` ACL means
    /// "create unconditionally"; otherwise the filesystem is consulted.
    pub fn dir_prepare(&self, dir: &DirId, expected_acl: Option<&AclValue>) -> Result<PrepareAction, Error> {
        let path = dir.borrow().path.clone();

        match expected_acl {
            None => {
                std::fs::create_dir_all(&path)?;
                Ok(PrepareAction::Created)
            }
            Some(acl) => match std::fs::metadata(&path) {
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    std::fs::create_dir_all(&path)?;
                    Ok(PrepareAction::CreatedStale)
                }
                Ok(_meta) => {
                    #[cfg(unix)]
                    {
                        use std::os::unix::fs::MetadataExt;
                        let meta = std::fs::metadata(&path)?;
                        if meta.mode() & 0o7777 == acl.mode as u32 && meta.uid() == acl.uid && meta.gid() == acl.gid {
                            Ok(PrepareAction::Ok)
                        } else {
                            Ok(PrepareAction::Modified)
                        }
                    }
                    #[cfg(not(unix))]
                    {
                        Ok(PrepareAction::Ok)
                    }
                }
                Err(e) => Err(e.into()),
            },
        }
    }

    /// Resolve which `DirInstance` owns `diri`'s dir, using `replaces` to break ties
    /// between two packages both claiming the same directory. Returns whether the
    /// owning ACL changed (and so the dir must be marked `permissions_stale`).
    pub fn apply_diri_permissions(&mut self, diri: &DirInstanceId, replaces: impl Fn(&str, &str) -> bool) -> bool {
        let dir = diri.borrow().dir.clone();
        let new_pkg = diri.borrow().package.clone();

        let mut node = dir.borrow_mut();

        let should_replace = match &node.owner {
            None => true,
            Some(current) => {
                let current_pkg = current.borrow().package.clone();
                current_pkg == new_pkg || replaces(&current_pkg, &new_pkg)
            }
        };

        if !should_replace {
            return false;
        }

        let acl_changed = node
            .owner
            .as_ref()
            .map(|current| current.borrow().acl != diri.borrow().acl)
            .unwrap_or(true);

        node.owner = Some(diri.clone());

        if acl_changed {
            node.permissions_stale = true;
        }

        acl_changed
    }

    pub fn file_query(&self, dir_path: &str, name: &str) -> Option<FileId> {
        self.file_index.get(&(Self::canonicalize(dir_path), name.to_string())).cloned()
    }

    pub fn file_insert(&mut self, file: FileId) {
        let key = {
            let entry = file.borrow();
            (entry.dir_path(), entry.name.clone())
        };
        self.file_index.insert(key, file);
    }

    pub fn file_remove(&mut self, dir_path: &str, name: &str) -> Option<FileId> {
        self.file_index.remove(&(Self::canonicalize(dir_path), name.to_string()))
    }

    pub fn dirs(&self) -> impl Iterator<Item = &DirId> {
        self.dirs.values()
    }

    pub fn files(&self) -> impl Iterator<Item = &FileId> {
        self.file_index.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dir_get_is_idempotent_and_refcounts() {
        let mut tree = DirTree::new();
        let a = tree.dir_get("/usr/bin");
        assert_eq!(a.borrow().refs, 1);
        let b = tree.dir_get("/usr/bin");
        assert!(Rc::ptr_eq(&a, &b));
        assert_eq!(a.borrow().refs, 2);
    }

    #[test]
    fn dir_get_chains_parent_refs() {
        let mut tree = DirTree::new();
        let bin = tree.dir_get("/usr/bin");
        let usr = tree.dir_get("/usr");
        assert!(Rc::ptr_eq(&usr, &bin.borrow().parent.clone().unwrap()));
        // usr was referenced once by constructing /usr/bin's parent link, then
        // once again by the explicit dir_get("/usr") above.
        assert_eq!(usr.borrow().refs, 2);
    }

    #[test]
    fn dir_unref_cascades_to_parent() {
        let mut tree = DirTree::new();
        let bin = tree.dir_get("/usr/bin");
        let usr = bin.borrow().parent.clone().unwrap();
        assert_eq!(usr.borrow().refs, 1);
        tree.dir_unref(&bin, UnrefMode::Keep);
        assert_eq!(usr.borrow().refs, 0);
    }

    #[test]
    fn protected_paths_single_segment_sets_mode() {
        let mut tree = DirTree::new();
        tree.set_protected_paths(vec![ProtectedPattern {
            segments: vec!["etc".into()],
            mode: ProtectMode::Changed,
        }]);
        let etc = tree.dir_get("/etc");
        assert_eq!(etc.borrow().protect_mode, ProtectMode::Changed);
    }

    #[test]
    fn protected_paths_multi_segment_inherits_to_child() {
        let mut tree = DirTree::new();
        tree.set_protected_paths(vec![ProtectedPattern {
            segments: vec!["etc".into(), "init.d".into()],
            mode: ProtectMode::SymlinksOnly,
        }]);
        let etc = tree.dir_get("/etc");
        assert_eq!(etc.borrow().protect_mode, ProtectMode::None);
        assert!(etc.borrow().has_protected_children);
        let initd = tree.dir_get("/etc/init.d");
        assert_eq!(initd.borrow().protect_mode, ProtectMode::SymlinksOnly);
    }

    #[test]
    fn file_index_round_trips() {
        let mut tree = DirTree::new();
        let dir = tree.dir_get("/usr/bin");
        let diri = Rc::new(RefCell::new(DirInstance {
            package: "pkg-a".into(),
            dir: dir.clone(),
            acl: tree.acls().default_dir(),
            files: vec![],
        }));
        let file = Rc::new(RefCell::new(FileEntry {
            diri: diri.clone(),
            name: "foo".into(),
            acl: tree.acls().default_file(),
            checksum: None,
        }));
        tree.file_insert(file.clone());
        let found = tree.file_query("/usr/bin", "foo").expect("file present");
        assert!(Rc::ptr_eq(&found, &file));
        assert!(tree.file_query("/usr/bin", "bar").is_none());
    }
}
