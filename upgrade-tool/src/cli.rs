//! Command line arguments.

use std::path::PathBuf;

#[derive(clap::Parser)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(clap::Subcommand)]
pub enum Command {
    /// Dump the section contents of an upgrade file to stdout.
    Dump {
        /// The upgrade file.
        #[clap(short, long)]
        input: PathBuf,
    },
    /// Assemble an unsigned upgrade file out of a Bootloader and/or Main
    /// Firmware payload. Run `sign` on the result before shipping it.
    Build {
        /// Bootloader payload binary.
        #[clap(long)]
        boot: Option<PathBuf>,
        /// Bootloader version, e.g. "1.2.3" or "1.2.3-rc5".
        #[clap(long, requires = "boot")]
        boot_version: Option<String>,
        /// Flash base address the Bootloader payload is written to.
        #[clap(long, requires = "boot")]
        boot_base: Option<String>,
        /// Main Firmware payload binary.
        #[clap(long)]
        main: Option<PathBuf>,
        /// Main Firmware version, e.g. "2.0.0".
        #[clap(long, requires = "main")]
        main_version: Option<String>,
        /// Flash base address the Main Firmware payload is written to.
        #[clap(long, requires = "main")]
        main_base: Option<String>,
        /// Main Firmware reset-vector entry point, if it differs from
        /// `main_base`.
        #[clap(long)]
        main_entry: Option<String>,
        /// Target platform identifier, checked against the board's
        /// `platform_id()` at upgrade time.
        #[clap(long, default_value = "nrf52805-prime")]
        platform: String,
        /// Path to write the unsigned upgrade file.
        #[clap(short, long)]
        output: PathBuf,
    },
    /// Add a multisig signature to an upgrade file.
    Sign {
        /// The upgrade file to sign.
        #[clap(short, long)]
        input: PathBuf,
        /// Path to a PEM-encoded SEC1 EC private key.
        #[clap(long)]
        secret: PathBuf,
        /// Update the upgrade file in place.
        #[clap(long, conflicts_with = "output")]
        in_place: bool,
        /// Path to write the signed upgrade file.
        #[clap(short, long)]
        output: Option<PathBuf>,
    },
}
