// SPDX-FileCopyrightText: Copyright © 2020-2024 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Plain line-oriented configuration (§6.1): repository lists, protected-path
//! policy and the target-architecture marker. Unlike the teacher's
//! `serde_yaml`-driven `Config` trait, the wire format here is a fixed line
//! grammar, so a `Manager`-style loader (base file merged with a `*.d`
//! drop-in directory) is reimplemented directly over text parsing instead.

use std::io;
use std::path::{Path, PathBuf};

use fs_err as fs;
use thiserror::Error;
use vfs::dirtree::{ProtectMode, ProtectedPattern};

use crate::installation::Installation;

/// One configured repository (`etc/apk/repositories` / `repositories.d/*.list`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryConfig {
    pub url: String,
    /// Tag this repository's packages are pinned under, if any (`@tag URL`).
    pub tag: Option<String>,
}

/// Parse one `repositories`-format line. Blank lines and `#`-comments are
/// skipped by the caller; this only handles the `[@tag ]URL` grammar.
fn parse_repository_line(line: &str) -> Option<RepositoryConfig> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }

    if let Some(rest) = line.strip_prefix('@') {
        let mut parts = rest.splitn(2, char::is_whitespace);
        let tag = parts.next()?.to_string();
        let url = parts.next()?.trim().to_string();
        if url.is_empty() {
            return None;
        }
        Some(RepositoryConfig { url, tag: Some(tag) })
    } else {
        Some(RepositoryConfig {
            url: line.to_string(),
            tag: None,
        })
    }
}

/// Merged configuration for one installation: repositories, protected-path
/// policy and the resolved architecture, loaded together the way the
/// teacher's `config::Manager` merges a base file with a `*.d` drop-in
/// directory — here, three independent text-file loaders combined into one
/// snapshot at open time (§4.12 steps 2/4/7).
#[derive(Debug, Clone)]
pub struct Config {
    pub repositories: Vec<RepositoryConfig>,
    pub protected_paths: Vec<ProtectedPattern>,
    pub architecture: String,
}

impl Config {
    pub fn load(installation: &Installation, override_arch: Option<&str>) -> Result<Self, Error> {
        Ok(Self {
            repositories: load_repositories(installation)?,
            protected_paths: load_protected_paths(installation)?,
            architecture: resolve_architecture(installation, override_arch),
        })
    }
}

/// Load `etc/apk/repositories` plus every `etc/apk/repositories.d/*.list` file.
pub fn load_repositories(installation: &Installation) -> Result<Vec<RepositoryConfig>, Error> {
    let mut repos = Vec::new();

    if installation.repositories_path().exists() {
        repos.extend(parse_repository_lines(&fs::read_to_string(installation.repositories_path())?));
    }

    for path in list_files_with_extension(&installation.repositories_d_path(), "list")? {
        repos.extend(parse_repository_lines(&fs::read_to_string(path)?));
    }

    Ok(repos)
}

fn parse_repository_lines(content: &str) -> Vec<RepositoryConfig> {
    content.lines().filter_map(parse_repository_line).collect()
}

/// The spec's fixed default set when no `protected_paths.d` files exist:
/// `+etc`, `@etc/init.d`, `!etc/apk`.
pub fn default_protected_paths() -> Vec<ProtectedPattern> {
    vec![
        pattern("etc", ProtectMode::Changed),
        pattern("etc/init.d", ProtectMode::SymlinksOnly),
        pattern("etc/apk", ProtectMode::All),
    ]
}

fn pattern(path: &str, mode: ProtectMode) -> ProtectedPattern {
    ProtectedPattern {
        segments: path.split('/').map(str::to_string).collect(),
        mode,
    }
}

/// Parse one `protected_paths.d/*.list` line: `#` comments, and one of
/// `-` (ignore) `+` (changed) `@` (symlinks-only) `!` (all) prefixing a path,
/// defaulting to `changed` when no prefix is given.
fn parse_protected_path_line(line: &str) -> Option<ProtectedPattern> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }

    let (mode, path) = match line.split_at(1) {
        ("-", rest) => (ProtectMode::Ignore, rest),
        ("+", rest) => (ProtectMode::Changed, rest),
        ("@", rest) => (ProtectMode::SymlinksOnly, rest),
        ("!", rest) => (ProtectMode::All, rest),
        _ => (ProtectMode::Changed, line),
    };

    let path = path.trim_start_matches('/');
    if path.is_empty() {
        return None;
    }

    Some(pattern(path, mode))
}

/// Load protected-path patterns: the built-in defaults followed by every
/// `etc/apk/protected_paths.d/*.list` entry.
pub fn load_protected_paths(installation: &Installation) -> Result<Vec<ProtectedPattern>, Error> {
    let mut patterns = default_protected_paths();

    for path in list_files_with_extension(&installation.protected_paths_d_path(), "list")? {
        let content = fs::read_to_string(path)?;
        patterns.extend(content.lines().filter_map(parse_protected_path_line));
    }

    Ok(patterns)
}

/// Determine the target architecture: explicit override (command line) wins,
/// then `etc/apk/arch`, then the compile-time default.
pub fn resolve_architecture(installation: &Installation, override_arch: Option<&str>) -> String {
    if let Some(arch) = override_arch {
        return arch.to_string();
    }

    if let Ok(content) = fs::read_to_string(installation.arch_path()) {
        let trimmed = content.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }

    default_architecture().to_string()
}

pub fn write_architecture(installation: &Installation, arch: &str) -> Result<(), Error> {
    fs::write(installation.arch_path(), format!("{arch}\n"))?;
    Ok(())
}

#[cfg(target_arch = "x86_64")]
fn default_architecture() -> &'static str {
    "x86_64"
}

#[cfg(target_arch = "aarch64")]
fn default_architecture() -> &'static str {
    "aarch64"
}

#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
fn default_architecture() -> &'static str {
    "unknown"
}

fn list_files_with_extension(dir: &Path, extension: &str) -> Result<Vec<PathBuf>, Error> {
    match fs::read_dir(dir) {
        Ok(entries) => {
            let mut paths: Vec<PathBuf> = entries
                .filter_map(|entry| entry.ok())
                .map(|entry| entry.path())
                .filter(|path| path.extension().and_then(|ext| ext.to_str()) == Some(extension))
                .collect();
            paths.sort();
            Ok(paths)
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(e.into()),
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_repository_line() {
        let repo = parse_repository_line("https://example.org/repo").unwrap();
        assert_eq!(repo.url, "https://example.org/repo");
        assert_eq!(repo.tag, None);
    }

    #[test]
    fn parses_tagged_repository_line() {
        let repo = parse_repository_line("@testing https://example.org/repo").unwrap();
        assert_eq!(repo.url, "https://example.org/repo");
        assert_eq!(repo.tag.as_deref(), Some("testing"));
    }

    #[test]
    fn ignores_comments_and_blank_lines() {
        let repos = parse_repository_lines("# a comment\n\nhttps://example.org/repo\n");
        assert_eq!(repos.len(), 1);
    }

    #[test]
    fn protected_path_prefixes_select_mode() {
        assert_eq!(parse_protected_path_line("-var/cache").unwrap().mode, ProtectMode::Ignore);
        assert_eq!(parse_protected_path_line("+etc").unwrap().mode, ProtectMode::Changed);
        assert_eq!(
            parse_protected_path_line("@etc/init.d").unwrap().mode,
            ProtectMode::SymlinksOnly
        );
        assert_eq!(parse_protected_path_line("!etc/apk").unwrap().mode, ProtectMode::All);
        assert_eq!(parse_protected_path_line("etc/foo").unwrap().mode, ProtectMode::Changed);
    }

    #[test]
    fn config_load_resolves_override_architecture() {
        let dir = tempfile::tempdir().unwrap();
        let installation = crate::installation::Installation::open(dir.path());
        let config = Config::load(&installation, Some("riscv64")).unwrap();
        assert_eq!(config.architecture, "riscv64");
        assert_eq!(config.protected_paths.len(), 3);
    }

    #[test]
    fn default_protected_paths_match_spec_defaults() {
        let defaults = default_protected_paths();
        assert_eq!(defaults.len(), 3);
        assert_eq!(defaults[2].segments, vec!["etc".to_string(), "apk".to_string()]);
        assert_eq!(defaults[2].mode, ProtectMode::All);
    }
}
