// SPDX-FileCopyrightText: Copyright © 2020-2023 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! The installed-state database and package-installation engine: atom
//! interning, the name/package registry, the reference-counted directory
//! tree, the installed-db/scripts/triggers/world codecs, the repository and
//! cache layer, and the installer/migrator/purger/script-runner/permission
//! sweeper that drive a transaction end to end.

pub use self::config::Config;
pub use self::db::Database;
pub use self::dependency::{Dependency, Provider};
pub use self::installation::Installation;
pub use self::package::Package;
pub use self::registry::Registry;
pub use self::repository::Repository;

pub mod atom;
pub mod cache;
pub mod config;
pub mod db;
pub mod dependency;
pub mod flags;
pub mod installation;
pub mod installer;
pub mod migrate;
pub mod package;
pub mod permsweep;
pub mod purge;
pub mod registry;
pub mod repository;
pub mod scriptrunner;
pub mod signal;
pub mod trigger_engine;
