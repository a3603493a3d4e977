// SPDX-FileCopyrightText: Copyright © 2020-2023 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

use clap::{ArgMatches, Command};
use thiserror::Error;

use crate::db::{self, Database, OpenOptions};

pub fn command() -> Command {
    Command::new("list").about("List installed packages")
}

pub fn handle(_args: &ArgMatches, root: &str) -> Result<(), Error> {
    let db = Database::open(
        root,
        OpenOptions {
            no_lock: true,
            no_mount_proc: true,
            ..Default::default()
        },
    )?;

    for pkg in db.registry.packages().filter(|p| p.is_installed()) {
        println!("{} {}", pkg.meta.name, pkg.meta.version_identifier);
    }

    Ok(())
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("opening database: {0}")]
    Db(#[from] db::Error),
}
