// SPDX-FileCopyrightText: Copyright © 2020-2024 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! `etc/apk/world` codec (§4.4, §6.3): one dependency expression per line.
//!
//! The distilled spec treats the world file as a plain newline-separated
//! dependency list and repository tags as a separate topic (§6.3); the real
//! grammar combines them, pinning a world entry to a tag with `name@tag`
//! (`Entry::tag`). Round-tripping preserves that pin.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

use crate::dependency::{Dependency, ParseError};

/// One `world` line: a dependency expression, optionally pinned to a
/// repository tag (§6.3 — tag 0/`None` is the default, untagged case).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub dependency: Dependency,
    pub tag: Option<String>,
}

impl fmt::Display for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.tag {
            Some(tag) => write!(f, "{}@{tag}", self.dependency),
            None => self.dependency.fmt(f),
        }
    }
}

impl FromStr for Entry {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(ParseError::Empty);
        }

        match s.rsplit_once('@') {
            Some((expr, tag)) if !tag.is_empty() => Ok(Entry {
                dependency: expr.parse()?,
                tag: Some(tag.to_string()),
            }),
            _ => Ok(Entry {
                dependency: s.parse()?,
                tag: None,
            }),
        }
    }
}

/// Parse `content` into world entries, skipping blank lines. Malformed
/// entries are collected-through-the-caller; the world file's failure model
/// (§9 "FORCE_BROKEN_WORLD") is to keep going and let the caller decide
/// whether an unparsable line is fatal.
pub fn read(content: &str) -> Vec<Result<Entry, ParseError>> {
    content.lines().map(str::trim).filter(|line| !line.is_empty()).map(str::parse).collect()
}

/// Serialize world entries back to `etc/apk/world` content, one per line.
pub fn write(entries: &[Entry]) -> String {
    let mut out = String::new();
    for entry in entries {
        out.push_str(&entry.to_string());
        out.push('\n');
    }
    out
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("world entry {line}: {source}")]
    Entry { line: usize, source: ParseError },
}

/// Strict variant of [`read`] that aborts on the first malformed line,
/// reporting its 1-based line number (§7 `FDB_FORMAT`-style reporting).
pub fn read_strict(content: &str) -> Result<Vec<Entry>, Error> {
    let mut entries = Vec::new();
    for (idx, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let entry = line.parse().map_err(|source| Error::Entry { line: idx + 1, source })?;
        entries.push(entry);
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dependency::Kind;

    #[test]
    fn plain_name_has_no_tag() {
        let entry: Entry = "bash".parse().unwrap();
        assert_eq!(entry.dependency.name, "bash");
        assert_eq!(entry.tag, None);
        assert_eq!(entry.to_string(), "bash");
    }

    #[test]
    fn tagged_name_round_trips() {
        let entry: Entry = "bash@testing".parse().unwrap();
        assert_eq!(entry.dependency.name, "bash");
        assert_eq!(entry.tag.as_deref(), Some("testing"));
        assert_eq!(entry.to_string(), "bash@testing");
    }

    #[test]
    fn kind_prefixed_and_tagged_round_trips() {
        let entry: Entry = "soname:libfoo.so.1@testing".parse().unwrap();
        assert_eq!(entry.dependency.kind, Kind::SharedLibrary);
        assert_eq!(entry.dependency.name, "libfoo.so.1");
        assert_eq!(entry.tag.as_deref(), Some("testing"));
        assert_eq!(entry.to_string(), "soname:libfoo.so.1@testing");
    }

    #[test]
    fn read_skips_blank_lines() {
        let entries = read("bash\n\nvim@testing\n");
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().all(Result::is_ok));
    }

    #[test]
    fn write_round_trips_through_read() {
        let entries = vec![
            Entry {
                dependency: "bash".parse().unwrap(),
                tag: None,
            },
            Entry {
                dependency: "vim".parse().unwrap(),
                tag: Some("testing".to_string()),
            },
        ];
        let content = write(&entries);
        let parsed = read_strict(&content).unwrap();
        assert_eq!(parsed, entries);
    }

    #[test]
    fn read_strict_reports_line_number() {
        let err = read_strict("bash\n@testing\n").unwrap_err();
        match err {
            Error::Entry { line, .. } => assert_eq!(line, 2),
        }
    }
}
