// SPDX-FileCopyrightText: Copyright © 2020-2024 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Trigger sweep (§4.9): after install/migrate/purge marks directories
//! `modified`, `fire_triggers` walks every dir in the tree and, for each
//! installed package, appends a match to that package's pending-trigger
//! queue. Glob matching itself is `crates/triggers::TriggerSet`.

use thiserror::Error;
use triggers::TriggerSet;
use vfs::dirtree::DirTree;

use crate::registry::Registry;

/// Sweep every `modified` dir in `tree` against each installed package's
/// registered trigger globs, queuing a pending-trigger entry on match.
/// Returns the number of (package, dir) matches queued.
pub fn fire_triggers(registry: &mut Registry, tree: &DirTree) -> Result<usize, Error> {
    let modified_dirs: Vec<String> = tree
        .dirs()
        .filter(|dir| dir.borrow().modified)
        .map(|dir| dir.borrow().path.clone())
        .collect();

    if modified_dirs.is_empty() {
        return Ok(0);
    }

    let mut fired = 0;

    for pkg in registry.packages_mut() {
        let Some(ipkg) = pkg.ipkg.as_mut() else { continue };
        if ipkg.trigger_patterns.is_empty() && !ipkg.run_all_triggers {
            continue;
        }

        let set = TriggerSet::compile(&ipkg.trigger_patterns)?;

        for dir_path in &modified_dirs {
            if ipkg.run_all_triggers || set.matches_any(dir_path) {
                ipkg.queue_trigger(dir_path.clone());
                fired += 1;
            }
        }
    }

    Ok(fired)
}

/// Total count of pending trigger invocations across every installed package.
pub fn pending_count(registry: &Registry) -> usize {
    registry
        .packages()
        .filter_map(|pkg| pkg.ipkg.as_ref())
        .map(|ipkg| ipkg.pending_triggers.iter().filter(|entry| entry.is_some()).count())
        .sum()
}

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Pattern(#[from] triggers::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::package::{Digest, InstalledPackage, Package};

    fn meta(name: &str) -> crate::package::Meta {
        crate::package::Meta {
            name: name.to_string(),
            version_identifier: "1.0".to_string(),
            source_release: 1,
            build_release: 1,
            architecture: "x86_64".to_string(),
            summary: String::new(),
            description: String::new(),
            source_id: name.to_string(),
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
        }
    }

    #[test]
    fn fires_on_matching_modified_dir() {
        let mut registry = Registry::new();
        let mut ipkg = InstalledPackage::new();
        ipkg.trigger_patterns.push("/usr/lib/modules/*".to_string());

        let pkg = Package {
            digest: Digest::from(vec![1, 2, 3]),
            meta: meta("kmod-consumer"),
            repos: 0,
            layer: 0,
            filename: None,
            ipkg: Some(ipkg),
            cached_non_repository: false,
            seen: false,
            state_int: 0,
        };
        registry.pkg_add(pkg);

        let mut tree = DirTree::new();
        let dir = tree.dir_get("/usr/lib/modules/6.1.0");
        dir.borrow_mut().modified = true;

        let fired = fire_triggers(&mut registry, &tree).unwrap();
        assert_eq!(fired, 1);

        let pkg = registry.package(&Digest::from(vec![1, 2, 3])).unwrap();
        let pending = &pkg.ipkg.as_ref().unwrap().pending_triggers;
        assert_eq!(pending[0], None);
        assert_eq!(pending[1].as_deref(), Some("/usr/lib/modules/6.1.0"));
    }

    #[test]
    fn does_not_fire_without_matching_dir() {
        let mut registry = Registry::new();
        let mut ipkg = InstalledPackage::new();
        ipkg.trigger_patterns.push("/usr/lib/modules/*".to_string());

        registry.pkg_add(Package {
            digest: Digest::from(vec![9]),
            meta: meta("kmod-consumer"),
            repos: 0,
            layer: 0,
            filename: None,
            ipkg: Some(ipkg),
            cached_non_repository: false,
            seen: false,
            state_int: 0,
        });

        let mut tree = DirTree::new();
        let dir = tree.dir_get("/usr/lib/firmware");
        dir.borrow_mut().modified = true;

        let fired = fire_triggers(&mut registry, &tree).unwrap();
        assert_eq!(fired, 0);
    }
}
