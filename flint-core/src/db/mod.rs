// SPDX-FileCopyrightText: Copyright © 2020-2024 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Installed-state database: the `Database` object tying together the
//! installation layout, in-memory registry/directory-tree, and on-disk
//! layer files, and implementing the Open/Close/Write lifecycle (§4.12).

pub mod fdb;
pub mod scripts;
pub mod triggers;
pub mod world;

use std::path::PathBuf;

use fs_err as fs;
use log::{debug, warn};
use nix::mount::{mount, umount2, MntFlags, MsFlags};
use thiserror::Error;
use vfs::dirtree::DirTree;

use crate::config;
use crate::installation::{lockfile, Installation, Layer};
use crate::registry::Registry;
use crate::repository::{self, Repository};

/// Both on-disk layers a database tracks: the primary root layer and the
/// optional `uvol` layer sharing the same schema (§4.2, §4.12 step 10).
const LAYERS: [(Layer, u8); 2] = [(Layer::Root, 0), (Layer::Uvol, 1)];

#[derive(Debug, Error)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("acquiring database lock: {0}")]
    Lock(#[from] lockfile::Error),
    #[error("loading configuration: {0}")]
    Config(#[from] config::Error),
    #[error("parsing installed-state record: {0}")]
    Fdb(#[from] fdb::Error),
    #[error("parsing world file: {0}")]
    World(#[from] world::Error),
    #[error("reading script archive: {0}")]
    Scripts(#[from] scripts::Error),
    #[error("reading triggers file: {0}")]
    Triggers(#[from] triggers::Error),
}

/// Options controlling how a database is opened (§4.12 steps 2-9).
#[derive(Debug, Clone, Default)]
pub struct OpenOptions {
    /// Command-line architecture override (step 4).
    pub architecture: Option<String>,
    /// Bound the lock-acquisition wait to this many seconds (0 = block forever).
    pub lock_wait: u32,
    /// Skip acquiring the exclusive lock entirely (read-only queries).
    pub no_lock: bool,
    /// Re-fetch every configured repository's index even if still fresh.
    pub force_refresh: bool,
    /// Skip mounting `/proc` (e.g. already mounted, or sandboxed callers).
    pub no_mount_proc: bool,
}

/// The open installed-state database: registry, directory tree, repository
/// list and the installation layout they were loaded from.
pub struct Database {
    pub installation: Installation,
    pub registry: Registry,
    pub tree: DirTree,
    pub repositories: Vec<Repository>,
    pub architecture: String,
    lock: Option<lockfile::Lock>,
    proc_mounted: bool,
    open_complete: bool,
}

impl Database {
    /// Run the full open sequence (§4.12 "Open") against `root`.
    pub fn open(root: impl Into<PathBuf>, options: OpenOptions) -> Result<Self, Error> {
        let installation = Installation::open(root);

        // Step 1: atomize default ACLs. `DirTree::acls()` interns its two
        // canonical (dir, file) ACLs lazily on first use; touching them here
        // keeps the `default_dir`/`default_file` handles stable for the
        // whole session the way an eager atomize pass would.
        let mut tree = DirTree::new();
        tree.acls().default_dir();
        tree.acls().default_file();

        // Step 2: configure repositories, cache first. Finalized once the
        // configured list is read in step 12; the cache pseudo-repo always
        // occupies slot 0.
        let repo_configs = config::load_repositories(&installation)?;

        // Step 3: root_fd / tmpfs / user-mode detection is folded into
        // `Installation::open` (mutability is exactly that check).
        debug!("opened installation at {:?} ({})", installation.root, installation.mutability);

        // Step 4: resolve architecture.
        let architecture = config::resolve_architecture(&installation, options.architecture.as_deref());

        // Step 5: acquire the exclusive lock unless this is a non-mutating open.
        let lock = if options.no_lock || installation.read_only() {
            None
        } else {
            Some(lockfile::acquire_with_timeout(
                installation.lock_path(Layer::Root),
                format!("waiting for database lock at {:?}", installation.lock_path(Layer::Root)),
                options.lock_wait,
            )?)
        };

        // Step 6: mount /proc, best-effort.
        let proc_mounted = if options.no_mount_proc {
            false
        } else {
            mount_proc(&installation)?
        };

        // Step 7: load protected paths.
        let protected_paths = config::load_protected_paths(&installation)?;
        tree.set_protected_paths(protected_paths);

        // Step 8: cache directory. Remounting RW when the filesystem demands
        // it is out of scope here (no mount-flag probing crate in the
        // dependency stack); ensure_dirs_exist already created it read-write.
        let cache_dir = installation.cache_path("");
        fs::create_dir_all(&cache_dir).or_else(|e| if installation.read_only() { Ok(()) } else { Err(e) })?;

        // Step 9: overlay file-list from STDIN is a CLI-level concern
        // (`flint add --overlay`); the database itself has no opinion on it.

        let mut registry = Registry::new();

        // Step 10: for each layer, read world/installed FDB/triggers/scripts.
        for (layer, layer_id) in LAYERS {
            read_layer(&installation, layer, layer_id, &mut registry, &mut tree)?;
        }

        // Step 11: load the cache index as pseudo-repo -2.
        let matched = crate::cache::cache_foreach_item(&cache_dir, &mut registry).unwrap_or(0);
        debug!("matched {matched} cached non-repository packages");

        // Step 12: load configured repositories, appending the cache
        // pseudo-repo first (repository::from_configs already does this).
        let repositories = repository::from_configs(&repo_configs);
        if options.force_refresh {
            debug!("force-refresh requested; index autoupdate deferred to the async cache layer");
        }

        // Step 13: recompute rdepends.
        registry.recompute_rdepends();

        // Step 14: cross-mark cached packages (already folded into step 11);
        // mark the open complete.
        let open_complete = true;

        Ok(Self {
            installation,
            registry,
            tree,
            repositories,
            architecture,
            lock,
            proc_mounted,
            open_complete,
        })
    }

    pub fn is_open_complete(&self) -> bool {
        self.open_complete
    }

    /// Write every active layer's `world`, `installed`, `scripts.tar` and
    /// `triggers` back to disk (§4.12 "Write"), ahead of (and independent
    /// from) [`Self::close`].
    pub fn write(&self) -> Result<(), Error> {
        for (layer, layer_id) in LAYERS {
            write_layer(&self.installation, layer, layer_id, &self.registry)?;
        }
        Ok(())
    }

    /// Release dir-instances, unmount `/proc` if we mounted it, and drop the
    /// lock (§4.12 "Close"). Consumes `self`: nothing about the database is
    /// valid afterward.
    pub fn close(mut self) -> Result<(), Error> {
        // Step 1: free every installed package's dir-instances (no rmdir —
        // `UnrefMode::Keep`).
        for pkg in self.registry.packages_mut() {
            let Some(ipkg) = pkg.ipkg.as_mut() else { continue };
            for diri in ipkg.dir_instances.drain(..) {
                let dir = diri.borrow().dir.clone();
                self.tree.dir_unref(&dir, vfs::dirtree::UnrefMode::Keep);
            }
        }

        // Steps 2/5: repositories, protected paths, world, hash tables and
        // the lock fd are all released by simply dropping `self`.

        // Step 3: unmount /proc if we mounted it.
        if self.proc_mounted {
            let target = self.installation.root.join("proc");
            if let Err(e) = umount2(&target, MntFlags::MNT_DETACH) {
                warn!("unmounting {target:?}: {e}");
            }
        }

        // Step 4: remounting cache read-only only applies when we remounted
        // it RW in the first place, which this implementation never does
        // (see the step-8 comment in `open`).

        self.lock = None;
        Ok(())
    }
}

fn mount_proc(installation: &Installation) -> Result<bool, Error> {
    let target = installation.root.join("proc");
    fs::create_dir_all(&target)?;

    match mount(Some("proc"), &target, Some("proc"), MsFlags::empty(), None::<&str>) {
        Ok(()) => Ok(true),
        Err(nix::errno::Errno::EBUSY) => Ok(false),
        Err(e) => {
            warn!("could not mount /proc at {target:?}: {e}");
            Ok(false)
        }
    }
}

fn read_layer(installation: &Installation, layer: Layer, layer_id: u8, registry: &mut Registry, tree: &mut DirTree) -> Result<(), Error> {
    let world_path = installation.world_path();
    if layer == Layer::Root && world_path.exists() {
        let content = fs::read_to_string(&world_path)?;
        let _entries = world::read_strict(&content)?;
    }

    let installed_path = installation.installed_path(layer);
    if installed_path.exists() {
        let content = fs::read_to_string(&installed_path)?;
        fdb::read_installed(&content, registry, tree, layer_id, false)?;
    }

    let triggers_path = installation.triggers_path(layer);
    if triggers_path.exists() {
        let content = fs::read_to_string(&triggers_path)?;
        triggers::read_triggers(&content, registry)?;
    }

    let scripts_path = installation.scripts_path(layer);
    if scripts_path.exists() {
        let file = fs::File::open(&scripts_path)?;
        scripts::read_scripts(file, registry)?;
    }

    Ok(())
}

fn write_layer(installation: &Installation, layer: Layer, layer_id: u8, registry: &Registry) -> Result<(), Error> {
    if layer == Layer::Root {
        // World entries live only at the root layer; the database doesn't
        // own world-membership changes (that's `flint add`/`flint del`'s
        // job via `db::world`), so an absent world file is left untouched.
        let world_path = installation.world_path();
        if world_path.exists() {
            let content = fs::read_to_string(&world_path)?;
            let entries = world::read_strict(&content)?;
            fs::write(&world_path, world::write(&entries))?;
        }
    }

    fs::write(installation.installed_path(layer), fdb::write_installed(registry, layer_id))?;
    fs::write(installation.triggers_path(layer), triggers::write_triggers(registry))?;
    fs::write(installation.scripts_path(layer), scripts::write_scripts(registry)?)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_on_fresh_root_starts_with_empty_registry() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(
            dir.path(),
            OpenOptions {
                no_lock: true,
                no_mount_proc: true,
                ..Default::default()
            },
        )
        .unwrap();

        assert!(db.registry.packages().next().is_none());
        assert!(db.is_open_complete());
        assert_eq!(db.repositories[0].digest, repository::LOCAL_CACHE_DIGEST);
    }

    #[test]
    fn write_then_reopen_round_trips_an_installed_package() {
        let dir = tempfile::tempdir().unwrap();

        {
            let mut db = Database::open(
                dir.path(),
                OpenOptions {
                    no_lock: true,
                    no_mount_proc: true,
                    ..Default::default()
                },
            )
            .unwrap();

            db.registry.pkg_add(crate::package::Package {
                digest: "aabbccdd".parse().unwrap(),
                meta: crate::package::Meta {
                    name: "bash".to_string(),
                    version_identifier: "5.2".to_string(),
                    source_release: 1,
                    build_release: 1,
                    architecture: "x86_64".to_string(),
                    summary: String::new(),
                    description: String::new(),
                    source_id: "bash".to_string(),
                    homepage: String::new(),
                    licenses: Vec::new(),
                    dependencies: Vec::new(),
                    providers: Vec::new(),
                    install_if: Vec::new(),
                    replaces: Vec::new(),
                    installed_size: None,
                    build_time: 0,
                    uri: None,
                    hash: None,
                    download_size: None,
                },
                repos: 0,
                layer: 0,
                filename: None,
                ipkg: Some(crate::package::InstalledPackage::new()),
                cached_non_repository: false,
                seen: false,
                state_int: 0,
            });

            db.write().unwrap();
            db.close().unwrap();
        }

        let db = Database::open(
            dir.path(),
            OpenOptions {
                no_lock: true,
                no_mount_proc: true,
                ..Default::default()
            },
        )
        .unwrap();

        let pkg = db.registry.package(&"aabbccdd".parse().unwrap()).unwrap();
        assert_eq!(pkg.meta.name, "bash");
    }
}
