// SPDX-FileCopyrightText: Copyright © 2020-2024 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

use std::fmt;
use std::str::FromStr;

use bitflags::bitflags;
use itertools::Itertools;

pub use self::ipkg::{InstalledPackage, ScriptKind};
pub use self::meta::{Meta, MissingMetaError};

pub mod ipkg;
pub mod meta;

/// Content digest: the primary key of a [`Package`]. Registry hashing reads
/// the top 4 bytes directly, so digests must come from a uniform hash
/// (sha-256 in practice).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Digest(Box<[u8]>);

impl Digest {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Top 4 bytes as a `u32`, used as the hash-table bucket key.
    pub fn hash_prefix(&self) -> u32 {
        let mut buf = [0u8; 4];
        let n = self.0.len().min(4);
        buf[..n].copy_from_slice(&self.0[..n]);
        u32::from_be_bytes(buf)
    }
}

impl From<Vec<u8>> for Digest {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes.into_boxed_slice())
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(&self.0))
    }
}

impl FromStr for Digest {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(hex::decode(s)?.into_boxed_slice()))
    }
}

/// A unique package name, with the providers, reverse dependencies and
/// priority derived from them.
///
/// Created lazily on first reference (`Registry::get_name`) and lives until
/// the database closes.
#[derive(Debug, Clone)]
pub struct Name {
    pub name: String,
    /// Sorted `(package, version)` provider records for this name.
    pub providers: Vec<ProviderRecord>,
    /// Names of packages that depend on this name.
    pub rdepends: Vec<String>,
    /// Names of packages whose `install_if` references this name.
    pub rinstall_if: Vec<String>,
    /// Whether some package's `dependencies` vector references this name.
    pub is_dependency: bool,
    /// Scratch field used by `recompute_rdepends` to dedupe in one pass.
    pub(crate) touched: u8,
}

impl Name {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            providers: Vec::new(),
            rdepends: Vec::new(),
            rinstall_if: Vec::new(),
            is_dependency: false,
            touched: 0,
        }
    }

    /// `SoleReal` when exactly one real package provides this name,
    /// `OnlyVirtual` when every provider came from a `provides:` entry
    /// rather than a package's own identity, `Mixed` otherwise.
    pub fn priority(&self) -> Priority {
        if self.providers.is_empty() {
            return Priority::Mixed;
        }
        let real = self.providers.iter().filter(|p| p.real).count();
        if real == self.providers.len() && self.providers.len() == 1 {
            Priority::SoleReal
        } else if real == 0 {
            Priority::OnlyVirtual
        } else {
            Priority::Mixed
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
    SoleReal = 0,
    Mixed = 1,
    OnlyVirtual = 2,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderRecord {
    pub package: Digest,
    pub version: Option<String>,
    /// `true` when this is the package's own name, `false` when it came
    /// from the package's `provides` vector.
    pub real: bool,
}

/// Metadata plus installed-state for a single package, keyed by content
/// [`Digest`].
#[derive(Debug, Clone)]
pub struct Package {
    pub digest: Digest,
    pub meta: Meta,
    /// Bitmask of source repositories carrying this exact digest.
    pub repos: u32,
    /// Layer this package belongs to (root = 0, uvol = 1, ...).
    pub layer: u8,
    /// Set for direct-file installs (`apk add ./foo.apk`).
    pub filename: Option<String>,
    /// Present iff the package is installed.
    pub ipkg: Option<InstalledPackage>,
    pub cached_non_repository: bool,
    pub seen: bool,
    pub state_int: u32,
}

impl Package {
    pub fn is_installed(&self) -> bool {
        self.ipkg.is_some()
    }

    /// Merge metadata from a duplicate insert of the same digest: union the
    /// `repos` mask, keep the first non-null `filename`/`ipkg`.
    pub fn merge_from(&mut self, other: Package) {
        self.repos |= other.repos;
        if self.filename.is_none() {
            self.filename = other.filename;
        }
        if self.ipkg.is_none() {
            self.ipkg = other.ipkg;
        }
        self.seen = self.seen || other.seen;
        self.cached_non_repository = self.cached_non_repository || other.cached_non_repository;
    }
}

impl PartialEq for Package {
    fn eq(&self, other: &Self) -> bool {
        self.digest == other.digest
    }
}

impl Eq for Package {}

impl PartialOrd for Package {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Package {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.meta
            .build_time
            .cmp(&other.meta.build_time)
            .reverse()
            .then_with(|| self.digest.cmp(&other.digest))
    }
}

bitflags! {
    /// Filter flags used when listing packages; orthogonal to the
    /// install-state recorded on [`Package::ipkg`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Flags: u8 {
        const NONE = 0;
        const AVAILABLE = 1 << 1;
        const INSTALLED = 1 << 2;
        const CACHED = 1 << 3;
    }
}

/// Iterate packages in display order (most recent build first).
pub struct Sorted<I>(I);

impl<I> Sorted<I> {
    pub fn new(iter: I) -> Self {
        Self(iter)
    }
}

impl<I> IntoIterator for Sorted<I>
where
    I: IntoIterator<Item = Package>,
{
    type Item = Package;
    type IntoIter = std::vec::IntoIter<Self::Item>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter().sorted().collect_vec().into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_round_trips_through_hex() {
        let digest: Digest = "deadbeef".parse().unwrap();
        assert_eq!(digest.to_string(), "deadbeef");
    }

    #[test]
    fn priority_sole_real_provider() {
        let mut name = Name::new("bash");
        name.providers.push(ProviderRecord {
            package: Digest::from(vec![1, 2, 3, 4]),
            version: Some("5.2".into()),
            real: true,
        });
        assert_eq!(name.priority(), Priority::SoleReal);
    }

    #[test]
    fn priority_only_virtual_providers() {
        let mut name = Name::new("mail-transport-agent");
        name.providers.push(ProviderRecord {
            package: Digest::from(vec![1]),
            version: None,
            real: false,
        });
        name.providers.push(ProviderRecord {
            package: Digest::from(vec![2]),
            version: None,
            real: false,
        });
        assert_eq!(name.priority(), Priority::OnlyVirtual);
    }

    #[test]
    fn priority_mixed_providers() {
        let mut name = Name::new("sh");
        name.providers.push(ProviderRecord {
            package: Digest::from(vec![1]),
            version: Some("1".into()),
            real: true,
        });
        name.providers.push(ProviderRecord {
            package: Digest::from(vec![2]),
            version: None,
            real: false,
        });
        assert_eq!(name.priority(), Priority::Mixed);
    }
}
