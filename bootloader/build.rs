// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

//! Generates `memory.x` for both binaries this crate builds (`selector` and
//! `bootloader`) from the single `bl_consts::NRF52805_MEMORY_MAP` the rest
//! of the workspace shares, so the linker layout can never drift from the
//! addresses the core's `MemoryMap` value encodes.
//!
//! Reserves a fixed 32-byte `.mailbox` region at the base of RAM: the
//! Start-up selector writes the `Mailbox` there before jumping, and the
//! Bootloader binary reads it back at the same address.

use std::env;
use std::fs::File;
use std::io::Write;
use std::path::PathBuf;

use bl_consts::{mailbox, NRF52805_MEMORY_MAP};

fn main() {
    let map = NRF52805_MEMORY_MAP;
    // Both the `selector` and `bootloader` binaries link against
    // Bootloader copy 1's address by default; flashing the identical image
    // at copy 2 (`bootloader_copy2_base`) is a deploy-time relocation step,
    // not a separate build, same as the original's two pre-flashed, link-
    // time-identical slot images.
    let memory_x_content = format!(
        r##"
        MEMORY
        {{
            FLASH (rx) : ORIGIN = {copy1_base:#X}, LENGTH = {bootloader_size:#X}
            MAILBOX (rw) : ORIGIN = 0x20000000, LENGTH = {mailbox_size:#X}
            RAM (rw)     : ORIGIN = 0x20000000 + {mailbox_size:#X}, LENGTH = 24K - {mailbox_size:#X}
        }}

        SECTIONS {{
            .mailbox (NOLOAD) : {{
                KEEP(*(.mailbox))
            }} > MAILBOX
        }} INSERT BEFORE .bss;
        "##,
        copy1_base = map.bootloader_copy1_base,
        bootloader_size = map.bootloader_size,
        mailbox_size = mailbox::SIZE,
    );

    let out = &PathBuf::from(env::var_os("OUT_DIR").unwrap());
    File::create(out.join("memory.x")).unwrap().write_all(memory_x_content.as_bytes()).unwrap();
    println!("cargo:rustc-link-search={}", out.display());
    println!("cargo:rerun-if-changed=build.rs");

    println!("cargo:rustc-link-arg-bins=-Tlink.x");
    println!("cargo:rustc-link-arg-bins=-Tdefmt.x");
}
