// SPDX-FileCopyrightText: Copyright © 2020-2024 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Dependency and provider expressions.
//!
//! A `Name`'s provider list and a `Package`'s dependency/provides vectors
//! are built from these. The textual form is what round-trips through the
//! `world` file and the FDB's dependency-blob fields: a bare string for a
//! plain package-name reference, `kind:name` for every other kind.

use std::fmt;
use std::str::FromStr;

use stone::StonePayloadMetaDependency;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Kind {
    PackageName,
    SharedLibrary,
    PkgConfig,
    Interpreter,
    CMake,
    Python,
    Binary,
    SystemBinary,
    PkgConfig32,
}

impl Kind {
    fn prefix(self) -> &'static str {
        match self {
            Kind::PackageName => "name",
            Kind::SharedLibrary => "soname",
            Kind::PkgConfig => "pkgconfig",
            Kind::Interpreter => "interpreter",
            Kind::CMake => "cmake",
            Kind::Python => "python",
            Kind::Binary => "binary",
            Kind::SystemBinary => "sysbinary",
            Kind::PkgConfig32 => "pkgconfig32",
        }
    }

    fn from_prefix(prefix: &str) -> Option<Kind> {
        Some(match prefix {
            "name" => Kind::PackageName,
            "soname" => Kind::SharedLibrary,
            "pkgconfig" => Kind::PkgConfig,
            "interpreter" => Kind::Interpreter,
            "cmake" => Kind::CMake,
            "python" => Kind::Python,
            "binary" => Kind::Binary,
            "sysbinary" => Kind::SystemBinary,
            "pkgconfig32" => Kind::PkgConfig32,
            _ => return None,
        })
    }
}

impl From<StonePayloadMetaDependency> for Kind {
    fn from(value: StonePayloadMetaDependency) -> Self {
        match value {
            StonePayloadMetaDependency::PackageName => Kind::PackageName,
            StonePayloadMetaDependency::SharedLibrary => Kind::SharedLibrary,
            StonePayloadMetaDependency::PkgConfig => Kind::PkgConfig,
            StonePayloadMetaDependency::Interpreter => Kind::Interpreter,
            StonePayloadMetaDependency::CMake => Kind::CMake,
            StonePayloadMetaDependency::Python => Kind::Python,
            StonePayloadMetaDependency::Binary => Kind::Binary,
            StonePayloadMetaDependency::SystemBinary => Kind::SystemBinary,
            StonePayloadMetaDependency::PkgConfig32 => Kind::PkgConfig32,
        }
    }
}

/// A requirement on a [`Provider`] with the same kind and name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Dependency {
    pub kind: Kind,
    pub name: String,
}

/// A capability a package makes available; matched against [`Dependency`]
/// by equal `(kind, name)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Provider {
    pub kind: Kind,
    pub name: String,
}

macro_rules! kind_name_newtype {
    ($ty:ident) => {
        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                match self.kind {
                    Kind::PackageName => self.name.fmt(f),
                    other => write!(f, "{}:{}", other.prefix(), self.name),
                }
            }
        }

        impl FromStr for $ty {
            type Err = ParseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let s = s.trim();
                if s.is_empty() {
                    return Err(ParseError::Empty);
                }

                match s.split_once(':').and_then(|(p, n)| Kind::from_prefix(p).map(|k| (k, n))) {
                    Some((kind, name)) => Ok($ty {
                        kind,
                        name: name.to_string(),
                    }),
                    None => Ok($ty {
                        kind: Kind::PackageName,
                        name: s.to_string(),
                    }),
                }
            }
        }
    };
}

kind_name_newtype!(Dependency);
kind_name_newtype!(Provider);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("empty dependency expression")]
    Empty,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_name_round_trips() {
        let dep: Dependency = "bash".parse().unwrap();
        assert_eq!(dep.kind, Kind::PackageName);
        assert_eq!(dep.to_string(), "bash");
    }

    #[test]
    fn prefixed_kind_round_trips() {
        let dep: Dependency = "soname:libc.so.6".parse().unwrap();
        assert_eq!(dep.kind, Kind::SharedLibrary);
        assert_eq!(dep.to_string(), "soname:libc.so.6");
    }

    #[test]
    fn provider_matches_dependency_by_kind_and_name() {
        let dep: Dependency = "soname:libfoo.so.1".parse().unwrap();
        let provider: Provider = "soname:libfoo.so.1".parse().unwrap();
        assert_eq!(dep.kind, provider.kind);
        assert_eq!(dep.name, provider.name);
    }
}
