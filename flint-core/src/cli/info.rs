// SPDX-FileCopyrightText: Copyright © 2020-2023 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

use clap::{Arg, ArgMatches, Command};
use thiserror::Error;

use crate::db::{self, Database, OpenOptions};

pub fn command() -> Command {
    Command::new("info")
        .about("Show metadata for an installed or known package")
        .arg(Arg::new("name").required(true))
}

pub fn handle(args: &ArgMatches, root: &str) -> Result<(), Error> {
    let name = args.get_one::<String>("name").expect("required");

    let db = Database::open(
        root,
        OpenOptions {
            no_lock: true,
            no_mount_proc: true,
            ..Default::default()
        },
    )?;

    let pkg = db
        .registry
        .packages()
        .find(|p| &p.meta.name == name)
        .ok_or_else(|| Error::NotFound(name.clone()))?;

    println!("name:      {}", pkg.meta.name);
    println!("version:   {}", pkg.meta.version_identifier);
    println!("installed: {}", pkg.is_installed());
    if !pkg.meta.summary.is_empty() {
        println!("summary:   {}", pkg.meta.summary);
    }

    Ok(())
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("opening database: {0}")]
    Db(#[from] db::Error),
    #[error("no package named {0:?}")]
    NotFound(String),
}
