// SPDX-FileCopyrightText: Copyright © 2020-2023 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

use clap::{Arg, ArgMatches, Command};
use thiserror::Error;

use crate::db::{self, Database, OpenOptions};
use crate::flags::InstallFlags;
use crate::purge::{self, PurgeMode};
use crate::{permsweep, trigger_engine};

pub fn command() -> Command {
    Command::new("remove")
        .about("Remove an installed package")
        .arg(Arg::new("name").required(true))
}

pub fn handle(args: &ArgMatches, root: &str) -> Result<(), Error> {
    let name = args.get_one::<String>("name").expect("required");

    let mut db = Database::open(
        root,
        OpenOptions {
            no_mount_proc: true,
            ..Default::default()
        },
    )?;

    let digest = db
        .registry
        .packages()
        .find(|p| &p.meta.name == name && p.is_installed())
        .map(|p| p.digest.clone())
        .ok_or_else(|| Error::NotInstalled(name.clone()))?;

    let mut ipkg = db
        .registry
        .package_mut(&digest)
        .and_then(|pkg| pkg.ipkg.take())
        .ok_or_else(|| Error::NotInstalled(name.clone()))?;

    let root_path = db.installation.root.clone();
    purge::purge(&mut db.tree, &mut ipkg, &root_path, PurgeMode::Installed, InstallFlags::NONE);

    trigger_engine::fire_triggers(&mut db.registry, &db.tree)?;
    permsweep::sweep(&mut db.tree, &root_path, |_, _| false);

    db.write()?;
    db.close()?;

    Ok(())
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("opening database: {0}")]
    Db(#[from] db::Error),
    #[error("{0:?} is not installed")]
    NotInstalled(String),
    #[error("sweeping triggers: {0}")]
    Trigger(#[from] trigger_engine::Error),
}
