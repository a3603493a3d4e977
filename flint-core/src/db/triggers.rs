// SPDX-FileCopyrightText: Copyright © 2020-2024 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Triggers file codec (§4.4): `lib/apk/db/triggers`, one line per installed
//! package carrying registered trigger globs — `<hex-digest> glob1 glob2 ...`.
//!
//! Distinct from [`crate::trigger_engine`] (the modified-dir sweep) and from
//! the `triggers` crate (glob compilation/matching): this module only reads
//! and writes the flat per-package glob list the other two operate on.

use std::fmt::Write as _;

use thiserror::Error;

use crate::package::Digest;
use crate::registry::Registry;

#[derive(Debug, Error)]
pub enum Error {
    #[error("line {line}: missing digest")]
    MissingDigest { line: usize },
    #[error("line {line}: invalid digest: {source}")]
    InvalidDigest { line: usize, source: hex::FromHexError },
}

/// Read trigger glob lists into each installed package's `ipkg.trigger_patterns`.
/// A digest with no matching installed package is ignored (the package may
/// have been removed since the triggers file was last written).
pub fn read_triggers(content: &str, registry: &mut Registry) -> Result<(), Error> {
    for (idx, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let mut parts = line.split_whitespace();
        let digest_str = parts.next().ok_or(Error::MissingDigest { line: idx + 1 })?;
        let digest: Digest = digest_str
            .parse()
            .map_err(|source| Error::InvalidDigest { line: idx + 1, source })?;

        if let Some(pkg) = registry.package_mut(&digest) {
            if let Some(ipkg) = pkg.ipkg.as_mut() {
                ipkg.trigger_patterns = parts.map(str::to_string).collect();
            }
        }
    }

    Ok(())
}

/// Serialize every installed package with at least one trigger pattern, in
/// (name, version) order to match the installed-db write order.
pub fn write_triggers(registry: &Registry) -> String {
    let mut packages: Vec<_> = registry
        .packages()
        .filter(|p| p.ipkg.as_ref().is_some_and(|ipkg| !ipkg.trigger_patterns.is_empty()))
        .collect();
    packages.sort_by(|a, b| (&a.meta.name, &a.meta.version_identifier).cmp(&(&b.meta.name, &b.meta.version_identifier)));

    let mut out = String::new();
    for pkg in packages {
        let ipkg = pkg.ipkg.as_ref().unwrap();
        let _ = write!(out, "{}", pkg.digest);
        for pattern in &ipkg.trigger_patterns {
            let _ = write!(out, " {pattern}");
        }
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::package::{InstalledPackage, Meta, Package};

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

    fn installed(digest: &str, patterns: &[&str]) -> Package {
        let mut ipkg = InstalledPackage::new();
        ipkg.trigger_patterns = patterns.iter().map(|s| s.to_string()).collect();
        Package {
            digest: digest.parse().unwrap(),
            meta: meta("kmod-consumer"),
            repos: 0,
            layer: 0,
            filename: None,
            ipkg: Some(ipkg),
            cached_non_repository: false,
            seen: false,
            state_int: 0,
        }
    }

    #[test]
    fn round_trips_trigger_globs() {
        let mut registry = Registry::new();
        registry.pkg_add(installed("aabbccdd", &["/usr/lib/modules/*", "/usr/lib/firmware/*"]));

        let content = write_triggers(&registry);
        assert_eq!(content, "aabbccdd /usr/lib/modules/* /usr/lib/firmware/*\n");

        let mut read_back = Registry::new();
        read_back.pkg_add(installed("aabbccdd", &[]));
        read_triggers(&content, &mut read_back).unwrap();

        let pkg = read_back.package(&"aabbccdd".parse().unwrap()).unwrap();
        assert_eq!(
            pkg.ipkg.as_ref().unwrap().trigger_patterns,
            vec!["/usr/lib/modules/*".to_string(), "/usr/lib/firmware/*".to_string()]
        );
    }

    #[test]
    fn packages_without_triggers_are_omitted() {
        let mut registry = Registry::new();
        registry.pkg_add(installed("11223344", &[]));
        assert_eq!(write_triggers(&registry), "");
    }
}
