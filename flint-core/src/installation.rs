// SPDX-FileCopyrightText: Copyright © 2020-2024 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Filesystem layout for an installation root: `etc/apk`, `lib/apk/db[-uvol]`
//! and `var/cache/apk`, plus the read-write/read-only detection the open
//! lifecycle (§4.12) needs before it can acquire the DB lock.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use log::trace;
use nix::unistd::{access, AccessFlags, Uid};

pub mod lockfile;

/// System mutability: whether the caller holds write access to the root.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mutability {
    ReadOnly,
    ReadWrite,
}

impl fmt::Display for Mutability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mutability::ReadOnly => "read-only".fmt(f),
            Mutability::ReadWrite => "read-write".fmt(f),
        }
    }
}

/// A self-contained database directory: `root` is the primary layer,
/// `uvol` is the optional secondary layer sharing the same on-disk schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Layer {
    Root,
    Uvol,
}

impl Layer {
    fn db_dir_name(self) -> &'static str {
        match self {
            Layer::Root => "db",
            Layer::Uvol => "db-uvol",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Installation {
    pub root: PathBuf,
    pub mutability: Mutability,
}

impl Installation {
    pub fn open(root: impl Into<PathBuf>) -> Self {
        let root: PathBuf = root.into();

        let mutability = if Uid::effective().is_root() {
            Mutability::ReadWrite
        } else if access(&root, AccessFlags::W_OK).is_ok() {
            Mutability::ReadWrite
        } else {
            Mutability::ReadOnly
        };

        trace!("Mutability: {mutability}");
        trace!("Root dir: {root:?}");

        if matches!(mutability, Mutability::ReadWrite) {
            ensure_dirs_exist(&root);
        }

        Self { root, mutability }
    }

    pub fn read_only(&self) -> bool {
        matches!(self.mutability, Mutability::ReadOnly)
    }

    fn etc_apk(&self, path: impl AsRef<Path>) -> PathBuf {
        self.root.join("etc/apk").join(path)
    }

    fn lib_apk(&self, layer: Layer, path: impl AsRef<Path>) -> PathBuf {
        self.root.join("lib/apk").join(layer.db_dir_name()).join(path)
    }

    pub fn cache_path(&self, path: impl AsRef<Path>) -> PathBuf {
        self.root.join("var/cache/apk").join(path)
    }

    /// `etc/apk/world` is only carried by the root layer.
    pub fn world_path(&self) -> PathBuf {
        self.etc_apk("world")
    }

    pub fn arch_path(&self) -> PathBuf {
        self.etc_apk("arch")
    }

    pub fn repositories_path(&self) -> PathBuf {
        self.etc_apk("repositories")
    }

    pub fn repositories_d_path(&self) -> PathBuf {
        self.etc_apk("repositories.d")
    }

    pub fn protected_paths_d_path(&self) -> PathBuf {
        self.etc_apk("protected_paths.d")
    }

    pub fn installed_path(&self, layer: Layer) -> PathBuf {
        self.lib_apk(layer, "installed")
    }

    pub fn scripts_path(&self, layer: Layer) -> PathBuf {
        self.lib_apk(layer, "scripts.tar")
    }

    pub fn triggers_path(&self, layer: Layer) -> PathBuf {
        self.lib_apk(layer, "triggers")
    }

    pub fn lock_path(&self, layer: Layer) -> PathBuf {
        self.lib_apk(layer, "lock")
    }

    /// Staging area the installer extracts archive entries into prior to
    /// migration finalizing them at their target paths.
    pub fn staging_dir(&self) -> PathBuf {
        self.root.join("lib/apk/tmp")
    }

    pub fn staging_path(&self, path: impl AsRef<Path>) -> PathBuf {
        self.staging_dir().join(path)
    }
}

fn ensure_dirs_exist(root: &Path) {
    for path in [
        root.join("etc/apk/repositories.d"),
        root.join("etc/apk/protected_paths.d"),
        root.join("lib/apk/db"),
        root.join("var/cache/apk"),
        root.join("lib/apk/tmp"),
    ] {
        let _ = fs::create_dir_all(path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layer_paths_split_root_and_uvol() {
        let installation = Installation {
            root: PathBuf::from("/"),
            mutability: Mutability::ReadOnly,
        };
        assert_eq!(installation.installed_path(Layer::Root), PathBuf::from("/lib/apk/db/installed"));
        assert_eq!(
            installation.installed_path(Layer::Uvol),
            PathBuf::from("/lib/apk/db-uvol/installed")
        );
    }

    #[test]
    fn cache_path_is_var_cache_apk() {
        let installation = Installation {
            root: PathBuf::from("/"),
            mutability: Mutability::ReadOnly,
        };
        assert_eq!(installation.cache_path("foo.apk"), PathBuf::from("/var/cache/apk/foo.apk"));
    }
}
