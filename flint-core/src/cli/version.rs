// SPDX-FileCopyrightText: Copyright © 2020-2024 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

use clap::Command;

pub fn command() -> Command {
    Command::new("version").about("Display version and exit")
}

pub fn print() {
    println!("flint {}", env!("CARGO_PKG_VERSION"));
}
