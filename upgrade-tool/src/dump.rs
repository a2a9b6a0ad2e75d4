//! `dump` subcommand: print an upgrade file's section contents, in the
//! shape of the teacher's `cosign2 dump` (one labelled field per line,
//! hex for binary fields, `colored` for the section-name headers).

use std::path::Path;

use bl_core::section::AttrKey;
use bl_core::util::{version_to_str, VersionFormat};
use colored::Colorize;
use humansize::{format_size, BINARY};

use crate::file;
use crate::Error;

const SIG_REC_SIZE: usize = 16 + 64;

pub fn run(input: &Path) -> Result<(), Error> {
    let data = std::fs::read(input).map_err(|source| Error::ReadFile { path: input.to_path_buf(), source })?;
    let sections = file::parse(&data)?;

    if sections.is_empty() {
        println!("{}", "no sections".yellow());
        return Ok(());
    }

    for section in &sections {
        let header = &section.header;
        let name = header.name().unwrap_or("?");
        println!("{}", format!("[{name}]").bold());
        println!("  version:  {}", display_version(header.pl_ver()));
        println!("  size:     {}", format_size(header.pl_size() as u64, BINARY));
        println!("  crc32:    {:#010x}", header.pl_crc());

        if let Some(base_addr) = header.get_attr_uint(AttrKey::BaseAddr) {
            println!("  base:     {base_addr:#010x}");
        }
        if let Some(entry) = header.get_attr_uint(AttrKey::EntryPoint) {
            println!("  entry:    {entry:#010x}");
        }
        if let Some(platform) = header.get_attr_str(AttrKey::Platform) {
            println!("  platform: {platform}");
        }
        if let Some(algo) = header.get_attr_str(AttrKey::Algorithm) {
            println!("  algo:     {algo}");
        }

        if header.is_signature() {
            for (idx, rec) in section.payload.chunks(SIG_REC_SIZE).enumerate() {
                let (fp, sig) = rec.split_at(16);
                println!("  signature {idx}:");
                println!("    fingerprint: {}", hex::encode(fp));
                println!("    signature:   {}", hex::encode(sig));
            }
        }
        println!();
    }
    Ok(())
}

fn display_version(raw: u32) -> String {
    let s = version_to_str(raw, VersionFormat::Display);
    if s.is_empty() {
        "n/a".to_string()
    } else {
        s.to_string()
    }
}
