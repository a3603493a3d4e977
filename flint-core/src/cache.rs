// SPDX-FileCopyrightText: Copyright © 2020-2024 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Package cache (§4.5): on-disk `var/cache/apk`, entry naming (§6.2), and
//! reconciliation of cached archives against the loaded package table
//! (`cache_foreach_item`).

use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use fs_err as fs;
use log::debug;
use thiserror::Error;

use crate::package::{Digest, Package};
use crate::registry::Registry;

#[derive(Debug, Error)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("fetching {url}: {source}")]
    Fetch { url: String, source: reqwest::Error },
    #[error("cache directory not available")]
    NotAvailable,
}

/// Canonical cache filename for a package (§6.2): `{name}-{version}.{first-8-hex-of-digest}.apk`.
pub fn package_filename(pkg: &Package) -> String {
    let digest_hex = hex::encode(pkg.digest.as_bytes());
    let short = &digest_hex[..digest_hex.len().min(8)];
    format!("{}-{}.{}.apk", pkg.meta.name, pkg.meta.version_identifier, short)
}

/// Full path to `pkg`'s cache entry under `cache_dir`.
pub fn package_path(cache_dir: &Path, pkg: &Package) -> PathBuf {
    cache_dir.join(package_filename(pkg))
}

/// Age of `path`'s mtime relative to now, or `None` if the file doesn't exist.
pub fn entry_age(path: &Path) -> Option<Duration> {
    let metadata = fs::metadata(path).ok()?;
    let modified = metadata.modified().ok()?;
    SystemTime::now().duration_since(modified).ok()
}

/// Fetch `pkg`'s archive from `url` into the cache, skipping the network
/// round-trip entirely when the cached copy is already within
/// `cache_max_age` and `force_refresh` is not set (§4.5 `cache_download`).
pub async fn cache_download(
    client: &reqwest::Client,
    cache_dir: &Path,
    url: &str,
    pkg: &Package,
    cache_max_age: Duration,
    force_refresh: bool,
) -> Result<PathBuf, Error> {
    let path = package_path(cache_dir, pkg);

    if !force_refresh {
        if let Some(age) = entry_age(&path) {
            if age <= cache_max_age {
                debug!("cache entry for {} is fresh, skipping download", pkg.meta.name);
                return Ok(path);
            }
        }
    }

    debug!("downloading {} to cache", pkg.meta.name);

    let response = client
        .get(url)
        .send()
        .await
        .map_err(|source| Error::Fetch { url: url.to_string(), source })?;

    if response.status() == reqwest::StatusCode::NOT_MODIFIED {
        touch(&path)?;
        return Ok(path);
    }

    let bytes = response
        .bytes()
        .await
        .map_err(|source| Error::Fetch { url: url.to_string(), source })?;

    fs::create_dir_all(cache_dir)?;
    fs::write(&path, &bytes)?;

    Ok(path)
}

fn touch(path: &Path) -> Result<(), Error> {
    let file = fs::OpenOptions::new().write(true).open(path)?;
    file.set_modified(SystemTime::now())?;
    Ok(())
}

/// Parse a cache entry's filename back into `(name, version, digest_prefix)`.
/// Returns `None` for anything that doesn't fit the `{name}-{version}.{hex}.apk`
/// shape (e.g. leftover index files).
fn parse_cache_filename(filename: &str) -> Option<(&str, &str)> {
    let stem = filename.strip_suffix(".apk")?;
    let (name_version, _digest_prefix) = stem.rsplit_once('.')?;
    let (name, version) = name_version.rsplit_once('-')?;
    Some((name, version))
}

/// Enumerate `cache_dir`, matching each entry against a known [`Package`] by
/// its canonical cache filename and marking matches `cached_non_repository`
/// (§4.5 `cache_foreach_item`). Returns the count of matched entries.
pub fn cache_foreach_item(cache_dir: &Path, registry: &mut Registry) -> Result<usize, Error> {
    let entries = match fs::read_dir(cache_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e.into()),
    };

    let mut matched = 0;

    for entry in entries {
        let entry = entry?;
        let filename = entry.file_name();
        let Some(filename) = filename.to_str() else { continue };
        let Some((name, version)) = parse_cache_filename(filename) else { continue };

        for pkg in registry.packages_mut() {
            if pkg.meta.name == name && pkg.meta.version_identifier == version && package_filename(pkg) == filename {
                pkg.cached_non_repository = true;
                matched += 1;
                break;
            }
        }
    }

    Ok(matched)
}

/// Remove a cache entry by digest, e.g. after a package is uninstalled and
/// `NO_CACHE`/cache-gc policy decides it's no longer worth keeping.
pub fn remove_from_cache(cache_dir: &Path, digest: &Digest) -> Result<(), Error> {
    let digest_hex = hex::encode(digest.as_bytes());
    let short = &digest_hex[..digest_hex.len().min(8)];
    for entry in fs::read_dir(cache_dir)?.flatten() {
        if entry.file_name().to_string_lossy().contains(&format!(".{short}.apk")) {
            fs::remove_file(entry.path())?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::package::Meta;

    fn meta(name: &str, version: &str) -> Meta {
        Meta {
            name: name.to_string(),
            version_identifier: version.to_string(),
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

    fn package(digest: &[u8], name: &str, version: &str) -> Package {
        Package {
            digest: Digest::from(digest.to_vec()),
            meta: meta(name, version),
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
    fn package_filename_matches_spec_pattern() {
        let pkg = package(&[0xaa, 0xbb, 0xcc, 0xdd], "bash", "5.2-1");
        assert_eq!(package_filename(&pkg), "bash-5.2-1.aabbccdd.apk");
    }

    #[test]
    fn parse_cache_filename_round_trips_name_and_version() {
        let (name, version) = parse_cache_filename("bash-5.2-1.aabbccdd.apk").unwrap();
        assert_eq!(name, "bash");
        assert_eq!(version, "5.2-1");
    }

    #[test]
    fn cache_foreach_item_matches_and_marks_package() {
        use tempfile::tempdir;

        let dir = tempdir().unwrap();
        let mut registry = Registry::new();
        registry.pkg_add(package(&[0xaa, 0xbb, 0xcc, 0xdd], "bash", "5.2-1"));

        fs::write(dir.path().join("bash-5.2-1.aabbccdd.apk"), b"data").unwrap();

        let matched = cache_foreach_item(dir.path(), &mut registry).unwrap();
        assert_eq!(matched, 1);

        let pkg = registry.package(&Digest::from(vec![0xaa, 0xbb, 0xcc, 0xdd])).unwrap();
        assert!(pkg.cached_non_repository);
    }

    #[test]
    fn cache_foreach_item_tolerates_missing_dir() {
        let mut registry = Registry::new();
        let matched = cache_foreach_item(Path::new("/nonexistent/cache/dir"), &mut registry).unwrap();
        assert_eq!(matched, 0);
    }
}
