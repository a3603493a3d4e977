// SPDX-FileCopyrightText: Copyright © 2020-2024 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

use clap::{Arg, ArgAction, Command};
use thiserror::Error;

mod info;
mod list;
mod remove;
mod version;

/// Generate the CLI command structure.
fn command() -> Command {
    Command::new("flint")
        .about("Installed-state database and package-installation engine")
        .arg(
            Arg::new("root")
                .short('D')
                .long("directory")
                .global(true)
                .help("Installation root")
                .action(ArgAction::Set)
                .default_value("/"),
        )
        .arg(
            Arg::new("yes")
                .short('y')
                .long("yes-all")
                .global(true)
                .help("Assume yes for all questions")
                .action(ArgAction::SetTrue),
        )
        .arg_required_else_help(true)
        .subcommand(info::command())
        .subcommand(list::command())
        .subcommand(remove::command())
        .subcommand(version::command())
}

/// Process all CLI arguments.
pub async fn process() -> Result<(), Error> {
    let matches = command().get_matches();
    let root = matches.get_one::<String>("root").cloned().unwrap_or_else(|| "/".to_string());

    match matches.subcommand() {
        Some(("info", args)) => info::handle(args, &root).map_err(Error::Info),
        Some(("list", args)) => list::handle(args, &root).map_err(Error::List),
        Some(("remove", args)) => remove::handle(args, &root).map_err(Error::Remove),
        Some(("version", _)) => {
            version::print();
            Ok(())
        }
        _ => unreachable!(),
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("error handling info: {0}")]
    Info(#[from] info::Error),
    #[error("error handling list: {0}")]
    List(#[from] list::Error),
    #[error("error handling remove: {0}")]
    Remove(#[from] remove::Error),
}
