// SPDX-FileCopyrightText: Copyright © 2020-2024 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Script archive codec (§4.4): `lib/apk/db/scripts.tar`, one regular tar
//! entry per lifecycle script blob, named
//! `pkgname-version.<hex-digest>.<action>`, mode 0755, mtime = the owning
//! package's build time.

use std::io::{self, Read, Write};

use tar::{Builder, EntryType, Header};
use thiserror::Error;

use crate::package::{Digest, ScriptKind};
use crate::registry::Registry;

#[derive(Debug, Error)]
pub enum Error {
    #[error("io error reading script archive: {0}")]
    Io(#[from] io::Error),
    #[error("malformed script archive entry name: {0:?}")]
    EntryName(String),
}

/// Read every entry of a script archive, attaching blobs to the matching
/// installed package's `ipkg.scripts` slot. Entries for digests not present
/// in `registry` (stale leftovers) are skipped rather than treated as fatal.
pub fn read_scripts<R: Read>(reader: R, registry: &mut Registry) -> Result<(), Error> {
    let mut archive = tar::Archive::new(reader);

    for entry in archive.entries()? {
        let mut entry = entry?;
        let path = entry.path()?.to_string_lossy().into_owned();
        let (digest, kind) = parse_entry_name(&path)?;

        let mut blob = Vec::with_capacity(entry.header().size().unwrap_or(0) as usize);
        entry.read_to_end(&mut blob)?;

        if let Some(pkg) = registry.package_mut(&digest) {
            if let Some(ipkg) = pkg.ipkg.as_mut() {
                ipkg.set_script(kind, blob);
            }
        }
    }

    Ok(())
}

/// Split `pkgname-version.<hex-digest>.<action>` from the right so package
/// names containing `.`/`-` don't confuse the parse.
fn parse_entry_name(name: &str) -> Result<(Digest, ScriptKind), Error> {
    let mut parts = name.rsplitn(3, '.');
    let action = parts.next().ok_or_else(|| Error::EntryName(name.to_string()))?;
    let hex_digest = parts.next().ok_or_else(|| Error::EntryName(name.to_string()))?;
    let _name_version = parts.next().ok_or_else(|| Error::EntryName(name.to_string()))?;

    let kind = ScriptKind::from_suffix(action).ok_or_else(|| Error::EntryName(name.to_string()))?;
    let digest: Digest = hex_digest.parse().map_err(|_| Error::EntryName(name.to_string()))?;

    Ok((digest, kind))
}

/// Serialize every installed package's script blobs into a new script
/// archive, in (name, version) order to match the installed-db write order.
pub fn write_scripts(registry: &Registry) -> Result<Vec<u8>, Error> {
    let mut builder = Builder::new(Vec::new());

    let mut packages: Vec<_> = registry.packages().filter(|p| p.is_installed()).collect();
    packages.sort_by(|a, b| (&a.meta.name, &a.meta.version_identifier).cmp(&(&b.meta.name, &b.meta.version_identifier)));

    for pkg in packages {
        let ipkg = pkg.ipkg.as_ref().unwrap();
        for kind in ScriptKind::ALL {
            let Some(blob) = ipkg.script(kind) else { continue };
            let entry_name = format!("{}-{}.{}.{}", pkg.meta.name, pkg.meta.version_identifier, pkg.digest, kind.suffix());

            let mut header = Header::new_gnu();
            header.set_entry_type(EntryType::Regular);
            header.set_mode(0o755);
            header.set_size(blob.len() as u64);
            header.set_mtime(pkg.meta.build_time);
            header.set_cksum();

            builder.append_data(&mut header, &entry_name, blob.as_slice())?;
        }
    }

    let mut out = builder.into_inner()?;
    out.flush()?;
    Ok(out)
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
            build_time: 1_700_000_000,
            uri: None,
            hash: None,
            download_size: None,
        }
    }

    #[test]
    fn entry_name_parses_from_the_right() {
        let (digest, kind) = parse_entry_name("my-pkg-name-1.2.3.aabbccdd.post-install").unwrap();
        assert_eq!(digest.to_string(), "aabbccdd");
        assert_eq!(kind, ScriptKind::PostInstall);
    }

    #[test]
    fn round_trips_a_single_script() {
        let mut registry = Registry::new();
        let mut ipkg = InstalledPackage::new();
        ipkg.set_script(ScriptKind::PostInstall, b"#!/bin/sh\necho hi\n".to_vec());

        registry.pkg_add(Package {
            digest: "aabbccdd".parse().unwrap(),
            meta: meta("bash"),
            repos: 0,
            layer: 0,
            filename: None,
            ipkg: Some(ipkg),
            cached_non_repository: false,
            seen: false,
            state_int: 0,
        });

        let archive = write_scripts(&registry).unwrap();

        let mut read_back = Registry::new();
        let mut ipkg2 = InstalledPackage::new();
        read_back.pkg_add(Package {
            digest: "aabbccdd".parse().unwrap(),
            meta: meta("bash"),
            repos: 0,
            layer: 0,
            filename: None,
            ipkg: Some(std::mem::replace(&mut ipkg2, InstalledPackage::new())),
            cached_non_repository: false,
            seen: false,
            state_int: 0,
        });

        read_scripts(archive.as_slice(), &mut read_back).unwrap();

        let pkg = read_back.package(&"aabbccdd".parse().unwrap()).unwrap();
        let blob = pkg.ipkg.as_ref().unwrap().script(ScriptKind::PostInstall).unwrap();
        assert_eq!(blob, b"#!/bin/sh\necho hi\n");
    }
}
