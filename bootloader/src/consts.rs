// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

//! Board-specific constants: the flash memory map (shared with `bl-core`
//! via `bl-consts`) plus the fixed SRAM mailbox address `build.rs` reserves.

pub use bl_consts::NRF52805_MEMORY_MAP as MEMORY_MAP;

/// Fixed SRAM address of the `.mailbox` region `build.rs` carves out of
/// RAM. The Start-up selector writes a [`bl_consts::Mailbox`] here before
/// jumping; the Bootloader binary reads it back at the same address.
pub const MAILBOX_ADDR: u32 = 0x2000_0000;

/// Short, stable identifier compared against a section's `platform`
/// attribute.
pub const PLATFORM_ID: &str = "nrf52805-prime";

/// Build-time placeholder version this image is stamped with. Release
/// tooling overwrites the digits in place after linking, the same way the
/// board packages this is adapted from bake a literal
/// `<version:tag10>...</version:tag10>` string into each image rather than
/// computing it at runtime.
const BUILD_VERSION: u32 = bl_core::util::VERSION_NA;

/// Embedded version tag, scanned by the Start-up selector (own image) and
/// by host tooling (installed images) per [`bl_consts::tags`].
#[used]
#[link_section = ".version_tag"]
pub static VERSION_TAG: [u8; bl_consts::tags::VERSION_TAG_SIZE] = bl_consts::tags::build_version_tag(BUILD_VERSION);

/// Embedded memory-map record, scanned by host tooling to recover this
/// image's flash layout without needing a matching linker script.
#[used]
#[link_section = ".memory_map"]
pub static MEMORY_MAP_RECORD: [u8; bl_consts::tags::MEMORY_MAP_RECORD_SIZE] = bl_consts::tags::build_memory_map_record(
    MEMORY_MAP.bootloader_size,
    MEMORY_MAP.firmware_base,
    MEMORY_MAP.firmware_size,
);
