// SPDX-FileCopyrightText: Copyright © 2020-2024 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Glob matching for package-registered directory-change triggers.
//!
//! A trigger is just a set of `fnmatch::Pattern` globs an installed package
//! registered against its own installed-db record (§4.9). This crate only
//! owns the compiled pattern set and the match test; the sweep over
//! modified directories and the pending-trigger queue it feeds both live
//! where the directory tree and installed packages do.

use thiserror::Error;

/// A compiled set of glob patterns registered by one installed package.
pub struct TriggerSet {
    patterns: Vec<fnmatch::Pattern>,
}

impl TriggerSet {
    /// Compile `globs` (as stored in the installed-db/triggers-file record)
    /// into a matchable set.
    pub fn compile(globs: &[String]) -> Result<Self, Error> {
        let patterns = globs
            .iter()
            .map(|glob| glob.parse::<fnmatch::Pattern>())
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { patterns })
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Whether `path` (a rooted directory name) matches any registered glob.
    pub fn matches_any(&self, path: &str) -> bool {
        self.patterns.iter().any(|pattern| pattern.match_path(path).is_some())
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid trigger glob: {0}")]
    Pattern(#[from] fnmatch::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_any_true_for_registered_glob() {
        let set = TriggerSet::compile(&["/usr/lib/modules/*".to_string()]).unwrap();
        assert!(set.matches_any("/usr/lib/modules/6.1.0"));
        assert!(!set.matches_any("/usr/lib/firmware"));
    }

    #[test]
    fn empty_set_matches_nothing() {
        let set = TriggerSet::compile(&[]).unwrap();
        assert!(set.is_empty());
        assert!(!set.matches_any("/usr/lib/modules/6.1.0"));
    }

    #[test]
    fn rejects_malformed_glob() {
        let err = TriggerSet::compile(&["/usr/lib/(broken".to_string()]);
        assert!(err.is_err());
    }
}
