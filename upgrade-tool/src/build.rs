//! `build` subcommand: assemble an unsigned upgrade file out of a
//! Bootloader and/or Main Firmware payload. The result has no signature
//! section yet — run `sign` on it before it will pass
//! `bl_core::upgrade::Upgrade::run`'s metadata check.

use std::path::{Path, PathBuf};

use crate::file::{self, Section};
use crate::{parse, Error};

pub struct Request<'a> {
    pub boot: Option<&'a Path>,
    pub boot_version: Option<&'a str>,
    pub boot_base: Option<&'a str>,
    pub main: Option<&'a Path>,
    pub main_version: Option<&'a str>,
    pub main_base: Option<&'a str>,
    pub main_entry: Option<&'a str>,
    pub platform: &'a str,
    pub output: &'a PathBuf,
}

pub fn run(req: Request<'_>) -> Result<(), Error> {
    if req.boot.is_none() && req.main.is_none() {
        return Err(Error::NothingToBuild);
    }

    let mut sections = Vec::new();
    if let Some(path) = req.boot {
        sections.push(payload_section(path, "boot", req.boot_version, req.boot_base, None, req.platform)?);
    }
    if let Some(path) = req.main {
        sections.push(payload_section(path, "main", req.main_version, req.main_base, req.main_entry, req.platform)?);
    }

    let out = file::serialize(&sections);
    std::fs::write(req.output, out).map_err(|source| Error::WriteFile { path: req.output.clone(), source })?;
    Ok(())
}

fn payload_section(
    path: &Path,
    name: &str,
    version: Option<&str>,
    base: Option<&str>,
    entry: Option<&str>,
    platform: &str,
) -> Result<Section, Error> {
    let payload = std::fs::read(path).map_err(|source| Error::ReadFile { path: path.to_path_buf(), source })?;
    let version = parse::version(version.unwrap_or(""))?;
    let base_addr = parse::address(base.unwrap_or(""))?;
    let entry_point = entry.map(parse::address).transpose()?;
    Ok(file::build_payload_section(name, version, base_addr, entry_point, platform, &payload))
}
