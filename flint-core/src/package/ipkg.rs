// SPDX-FileCopyrightText: Copyright © 2020-2024 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Per-installed-package state (`ipkg`): footprint, lifecycle scripts and
//! pending trigger bookkeeping. Attached to a [`super::Package`] the moment
//! the first installed-db line for it is read, detached on uninstall.

use vfs::dirtree::DirInstanceId;

/// One of the seven lifecycle script slots a script archive entry may fill.
/// The textual suffix is what the script-archive tar entry name ends in
/// (`pkgname-version.<digest>.<suffix>`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ScriptKind {
    PreInstall,
    PostInstall,
    PreDeinstall,
    PostDeinstall,
    PreUpgrade,
    PostUpgrade,
    Trigger,
}

impl ScriptKind {
    pub const ALL: [ScriptKind; 7] = [
        ScriptKind::PreInstall,
        ScriptKind::PostInstall,
        ScriptKind::PreDeinstall,
        ScriptKind::PostDeinstall,
        ScriptKind::PreUpgrade,
        ScriptKind::PostUpgrade,
        ScriptKind::Trigger,
    ];

    pub fn suffix(self) -> &'static str {
        match self {
            ScriptKind::PreInstall => "pre-install",
            ScriptKind::PostInstall => "post-install",
            ScriptKind::PreDeinstall => "pre-deinstall",
            ScriptKind::PostDeinstall => "post-deinstall",
            ScriptKind::PreUpgrade => "pre-upgrade",
            ScriptKind::PostUpgrade => "post-upgrade",
            ScriptKind::Trigger => "trigger",
        }
    }

    pub fn from_suffix(suffix: &str) -> Option<ScriptKind> {
        Some(match suffix {
            "pre-install" => ScriptKind::PreInstall,
            "post-install" => ScriptKind::PostInstall,
            "pre-deinstall" => ScriptKind::PreDeinstall,
            "post-deinstall" => ScriptKind::PostDeinstall,
            "pre-upgrade" => ScriptKind::PreUpgrade,
            "post-upgrade" => ScriptKind::PostUpgrade,
            "trigger" => ScriptKind::Trigger,
            _ => return None,
        })
    }
}

/// Per-installed-package state: footprint, scripts, triggers and repair flags.
#[derive(Default)]
pub struct InstalledPackage {
    /// Intrusive (insertion-ordered) list of this package's directory claims.
    pub dir_instances: Vec<DirInstanceId>,
    /// Lifecycle script blobs, indexed by [`ScriptKind`]; `None` when the
    /// archive didn't ship that slot.
    pub scripts: [Option<Vec<u8>>; 7],
    /// Trigger glob patterns this package registered.
    pub trigger_patterns: Vec<String>,
    /// If set, fire every trigger regardless of glob match (`f:` flag `A`-style opt-out).
    pub run_all_triggers: bool,
    /// Package names this package's dirs/files supersede on conflict.
    pub replaces: Vec<String>,
    /// Overrides the default replace-priority comparison when set.
    pub replaces_priority: Option<u32>,
    /// Numeric id of the repository tag this install came from (0 = untagged).
    pub repo_tag: u32,
    pub broken_files: bool,
    pub broken_script: bool,
    pub broken_xattr: bool,
    /// v3 symlink checksums are SHA-256 truncated to 160 bits; this flag
    /// records that a package used that scheme so reads match re-writes.
    pub sha256_160: bool,
    /// Package came from a v3 (ADB) archive rather than v2 (tar).
    pub v3: bool,
    /// Pending trigger arguments for this package: `None` is the leading
    /// placeholder reserved for the (not-yet-resolved) script-name argument,
    /// `Some(path)` is a modified directory that matched a registered glob.
    pub pending_triggers: Vec<Option<String>>,
}

impl InstalledPackage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self, kind: ScriptKind) -> Option<&[u8]> {
        self.scripts[kind as usize].as_deref()
    }

    pub fn set_script(&mut self, kind: ScriptKind, blob: Vec<u8>) {
        self.scripts[kind as usize] = Some(blob);
    }

    /// Queue a directory path for this package's pending trigger invocation,
    /// inserting the leading `None` placeholder on first use.
    pub fn queue_trigger(&mut self, dir_path: String) {
        if self.pending_triggers.is_empty() {
            self.pending_triggers.push(None);
        }
        self.pending_triggers.push(Some(dir_path));
    }

    pub fn has_pending_triggers(&self) -> bool {
        !self.pending_triggers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn script_kind_suffix_round_trips() {
        for kind in ScriptKind::ALL {
            assert_eq!(ScriptKind::from_suffix(kind.suffix()), Some(kind));
        }
    }

    #[test]
    fn queue_trigger_places_leading_placeholder() {
        let mut ipkg = InstalledPackage::new();
        ipkg.queue_trigger("/usr/lib/modules/6.1.0".into());
        assert_eq!(ipkg.pending_triggers.len(), 2);
        assert_eq!(ipkg.pending_triggers[0], None);
        assert_eq!(ipkg.pending_triggers[1].as_deref(), Some("/usr/lib/modules/6.1.0"));
    }
}
