// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

//! Host-side tool for building and signing `specter_upgrade*.bin` files:
//! dump a file's sections, assemble an unsigned file from raw payloads,
//! and add multisig signatures to it.
//!
//! Grounded on the teacher's `cosign2-bin`, generalized from its single
//! fixed-layout firmware header to this format's `boot`/`main`/`sign`
//! section model; reuses `bl-core`'s section, signature-message and
//! Bitcoin-message-digest code rather than re-deriving any of it, so a
//! file this tool signs is guaranteed to verify against the exact
//! contract `bl_core::sigverify::verify_multisig` checks on-target.

mod build;
mod cli;
mod dump;
mod error;
mod file;
mod keys;
mod parse;
mod sign;

pub use error::Error;

use clap::Parser;
use colored::Colorize;

fn main() {
    let args = cli::Args::parse();
    if let Err(e) = run(args.command) {
        eprintln!("{} {e}", "error:".red().bold());
        std::process::exit(1);
    }
}

fn run(command: cli::Command) -> Result<(), Error> {
    match command {
        cli::Command::Dump { input } => dump::run(&input),
        cli::Command::Build { boot, boot_version, boot_base, main, main_version, main_base, main_entry, platform, output } => {
            build::run(build::Request {
                boot: boot.as_deref(),
                boot_version: boot_version.as_deref(),
                boot_base: boot_base.as_deref(),
                main: main.as_deref(),
                main_version: main_version.as_deref(),
                main_base: main_base.as_deref(),
                main_entry: main_entry.as_deref(),
                platform: &platform,
                output: &output,
            })
        }
        cli::Command::Sign { input, secret, in_place, output } => {
            let output = match (in_place, output) {
                (true, None) => input.clone(),
                (false, Some(output)) => output,
                _ => return Err(Error::MissingOutput),
            };
            sign::run(&input, &secret, &output)
        }
    }
}
