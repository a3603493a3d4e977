// SPDX-FileCopyrightText: Copyright © 2020-2024 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! The nine configuration flags of spec.md §6.4, split the way
//! `package::Flags` splits filter bits from transaction-level concerns: the
//! ones that gate how the database opens/closes a root, and the ones that
//! gate what a single install/upgrade transaction is allowed to do.

use bitflags::bitflags;

bitflags! {
    /// Flags that affect [`crate::db::Database::open`]/[`crate::db::Database::close`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OpenFlags: u32 {
        const NONE = 0;
        /// Don't perform any filesystem mutation; exercise every decision
        /// path (dir_prepare, fs_control, script invocation) without side
        /// effects.
        const SIMULATE = 1 << 0;
        const NO_NETWORK = 1 << 1;
        const NO_CACHE = 1 << 2;
        /// Consume an overlay file-list from STDIN at open (§4.12 step 9).
        const OVERLAY_FROM_STDIN = 1 << 3;
        const FORCE_OLD_APK = 1 << 4;
        const FORCE_MISSING_REPOSITORIES = 1 << 5;
        const FORCE_BROKEN_WORLD = 1 << 6;
        const USERMODE = 1 << 7;
        const ALLOW_ARCH = 1 << 8;
    }
}

bitflags! {
    /// Flags that affect a single install/upgrade/remove transaction
    /// (installer, migrator, purger, script runner).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct InstallFlags: u32 {
        const NONE = 0;
        const NO_CHROOT = 1 << 0;
        const PRESERVE_ENV = 1 << 1;
        const PURGE = 1 << 2;
        const CLEAN_PROTECTED = 1 << 3;
        const FORCE_OVERWRITE = 1 << 4;
        const FORCE_REFRESH = 1 << 5;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_flags_compose() {
        let flags = OpenFlags::SIMULATE | OpenFlags::NO_NETWORK;
        assert!(flags.contains(OpenFlags::SIMULATE));
        assert!(flags.contains(OpenFlags::NO_NETWORK));
        assert!(!flags.contains(OpenFlags::NO_CACHE));
    }

    #[test]
    fn install_flags_compose() {
        let flags = InstallFlags::PURGE | InstallFlags::CLEAN_PROTECTED;
        assert!(flags.contains(InstallFlags::PURGE));
        assert!(!flags.contains(InstallFlags::FORCE_OVERWRITE));
    }
}
