// SPDX-FileCopyrightText: Copyright © 2020-2024 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Name/Package registry: hash tables of package names and packages, plus
//! the reverse-dependency and provider indices built over them.

use std::collections::HashMap;

use crate::dependency::Kind;
use crate::package::{Digest, Name, Package, ProviderRecord};

/// Owning storage for every known [`Name`] and [`Package`]; everything else
/// (provider lists, rdepends) refers to these by name string or [`Digest`],
/// never by owning pointer.
#[derive(Default)]
pub struct Registry {
    names: HashMap<String, Name>,
    packages: HashMap<Digest, Package>,
    open_complete: bool,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up `name`, constructing and inserting a new [`Name`] on miss.
    pub fn get_name(&mut self, name: &str) -> &mut Name {
        self.names.entry(name.to_string()).or_insert_with(|| Name::new(name))
    }

    pub fn find_name(&self, name: &str) -> Option<&Name> {
        self.names.get(name)
    }

    pub fn package(&self, digest: &Digest) -> Option<&Package> {
        self.packages.get(digest)
    }

    pub fn package_mut(&mut self, digest: &Digest) -> Option<&mut Package> {
        self.packages.get_mut(digest)
    }

    pub fn packages(&self) -> impl Iterator<Item = &Package> {
        self.packages.values()
    }

    pub fn packages_mut(&mut self) -> impl Iterator<Item = &mut Package> {
        self.packages.values_mut()
    }

    pub fn names(&self) -> impl Iterator<Item = &Name> {
        self.names.values()
    }

    /// Insert `pkg`, canonicalizing its default license and registering
    /// provider records for its own name and every `provides:` entry. If a
    /// package with the same digest already exists, metadata is merged
    /// instead (§3: union of `repos`, preserve first non-null `filename`/`ipkg`).
    pub fn pkg_add(&mut self, mut pkg: Package) {
        if pkg.meta.licenses.is_empty() {
            pkg.meta.licenses.push("null atom".to_string());
        }
        if pkg.filename.is_some() {
            pkg.cached_non_repository = true;
        }

        let digest = pkg.digest.clone();

        let version = Some(pkg.meta.version_identifier.clone());

        // Own-name provider record.
        self.add_provider_record(&pkg.meta.name.clone(), &digest, version.clone(), true);

        // Every `provides:` entry, excluding the redundant own-name one added
        // above (archive meta already folds the name into `providers`).
        for provider in pkg.meta.providers.clone() {
            if provider.kind == Kind::PackageName && provider.name == pkg.meta.name {
                continue;
            }
            self.add_provider_record(&provider.name, &digest, version.clone(), false);
        }

        for dependency in &pkg.meta.dependencies {
            self.get_name(&dependency.name).is_dependency = true;
        }

        match self.packages.remove(&digest) {
            Some(mut existing) => {
                existing.merge_from(pkg);
                self.packages.insert(digest, existing);
            }
            None => {
                self.packages.insert(digest, pkg);
            }
        }
    }

    fn add_provider_record(&mut self, name: &str, package: &Digest, version: Option<String>, real: bool) {
        let entry = self.get_name(name);
        if let Some(existing) = entry.providers.iter_mut().find(|p| p.package == *package) {
            existing.real = existing.real || real;
            existing.version = version;
        } else {
            entry.providers.push(ProviderRecord {
                package: package.clone(),
                version,
                real,
            });
        }
        entry.providers.sort_by(|a, b| a.package.cmp(&b.package));
    }

    /// Walk every name's provider list and populate `rdepends`/`rinstall_if`
    /// on the depended-upon names, deduplicating through a per-name
    /// touched-list instead of repeated linear scans.
    pub fn recompute_rdepends(&mut self) {
        for name in self.names.values_mut() {
            name.rdepends.clear();
            name.rinstall_if.clear();
            name.touched = 0;
        }

        let digests: Vec<Digest> = self.packages.keys().cloned().collect();
        let mut touched_list: Vec<String> = Vec::new();

        for digest in digests {
            let Some(pkg) = self.packages.get(&digest) else { continue };
            let provider_name = pkg.meta.name.clone();
            let depends: Vec<String> = pkg.meta.dependencies.iter().map(|d| d.name.clone()).collect();
            let install_if: Vec<String> = pkg.meta.install_if.clone();

            for dep_name in depends {
                self.mark_rdepend(&dep_name, &provider_name, &mut touched_list);
            }
            for dep_name in install_if {
                self.mark_rinstall_if(&dep_name, &provider_name, &mut touched_list);
            }
        }

        for name in touched_list {
            if let Some(n) = self.names.get_mut(&name) {
                n.touched = 0;
            }
        }

        self.open_complete = true;
    }

    fn mark_rdepend(&mut self, dep_name: &str, provider_name: &str, touched_list: &mut Vec<String>) {
        let name = self.get_name(dep_name);
        if name.touched & 0b01 == 0 {
            name.touched |= 0b01;
            name.rdepends.push(provider_name.to_string());
            touched_list.push(dep_name.to_string());
        }
    }

    fn mark_rinstall_if(&mut self, dep_name: &str, provider_name: &str, touched_list: &mut Vec<String>) {
        let name = self.get_name(dep_name);
        if name.touched & 0b10 == 0 {
            name.touched |= 0b10;
            name.rinstall_if.push(provider_name.to_string());
            touched_list.push(dep_name.to_string());
        }
    }

    /// Incremental rdepends update for a single freshly-added package; only
    /// valid once [`Self::recompute_rdepends`] has run at least once (i.e.
    /// after open completes).
    pub fn pkg_rdepends(&mut self, digest: &Digest) {
        if !self.open_complete {
            return;
        }
        let Some(pkg) = self.packages.get(digest) else { return };
        let provider_name = pkg.meta.name.clone();
        let depends: Vec<String> = pkg.meta.dependencies.iter().map(|d| d.name.clone()).collect();
        let install_if: Vec<String> = pkg.meta.install_if.clone();
        let mut touched_list = Vec::new();

        for dep_name in depends {
            let name = self.get_name(&dep_name);
            if !name.rdepends.contains(&provider_name) {
                name.rdepends.push(provider_name.clone());
            }
            name.touched = 0;
            touched_list.push(dep_name);
        }
        for dep_name in install_if {
            let name = self.get_name(&dep_name);
            if !name.rinstall_if.contains(&provider_name) {
                name.rinstall_if.push(provider_name.clone());
            }
            name.touched = 0;
        }
        let _ = touched_list;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::package::meta::Meta;
    use crate::package::InstalledPackage;

    fn meta(name: &str) -> Meta {
        Meta {
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

    fn package(digest: &[u8], name: &str) -> Package {
        Package {
            digest: Digest::from(digest.to_vec()),
            meta: meta(name),
            repos: 0,
            layer: 0,
            filename: None,
            ipkg: None,
            cached_non_repository: false,
            seen: false,
            state_int: 0,
        }
    }

    #[test]
    fn get_name_creates_lazily() {
        let mut registry = Registry::new();
        assert!(registry.find_name("bash").is_none());
        registry.get_name("bash");
        assert!(registry.find_name("bash").is_some());
    }

    #[test]
    fn pkg_add_registers_own_name_provider() {
        let mut registry = Registry::new();
        registry.pkg_add(package(&[1, 2, 3, 4], "bash"));
        let name = registry.find_name("bash").unwrap();
        assert_eq!(name.providers.len(), 1);
        assert!(name.providers[0].real);
    }

    #[test]
    fn pkg_add_merges_duplicate_digest() {
        let mut registry = Registry::new();
        let mut a = package(&[9, 9, 9, 9], "bash");
        a.repos = 0b01;
        registry.pkg_add(a);

        let mut b = package(&[9, 9, 9, 9], "bash");
        b.repos = 0b10;
        registry.pkg_add(b);

        let merged = registry.package(&Digest::from(vec![9, 9, 9, 9])).unwrap();
        assert_eq!(merged.repos, 0b11);
    }

    #[test]
    fn recompute_rdepends_populates_reverse_index() {
        let mut registry = Registry::new();
        let mut consumer = package(&[1], "app");
        consumer.meta.dependencies.push(crate::dependency::Dependency {
            kind: Kind::PackageName,
            name: "libfoo".to_string(),
        });
        registry.pkg_add(consumer);
        registry.pkg_add(package(&[2], "libfoo"));

        registry.recompute_rdepends();

        let libfoo = registry.find_name("libfoo").unwrap();
        assert_eq!(libfoo.rdepends, vec!["app".to_string()]);
    }

    #[test]
    fn default_license_applied_when_missing() {
        let mut registry = Registry::new();
        registry.pkg_add(package(&[3], "nolicense"));
        let pkg = registry.package(&Digest::from(vec![3])).unwrap();
        assert_eq!(pkg.meta.licenses, vec!["null atom".to_string()]);
    }

    #[test]
    fn ipkg_presence_marks_installed() {
        let mut pkg = package(&[4], "installed-pkg");
        pkg.ipkg = Some(InstalledPackage::new());
        assert!(pkg.is_installed());
    }
}
