// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

#![no_std]
#![no_main]

//! Start-up selector entry point: the very first code this board's ROM
//! bootloader hands control to. Picks whichever Bootloader copy is intact
//! (preferring the higher version, see `bl_core::startup`), writes the
//! mailbox, and jumps — never returns.

#[path = "../consts.rs"]
mod consts;
#[path = "../launch.rs"]
mod launch;
#[path = "../platform.rs"]
mod platform;

use bl_core::platform::PlatformServices;
use bl_core::startup::{select_bootloader_copy, SelectorError};
use core::cell::RefCell;
use cortex_m_rt::entry;
use defmt::info;
use defmt_rtt as _;
use embassy_nrf::gpio::{Level, Output, OutputDrive};
use embassy_nrf::nvmc::Nvmc;
use embedded_sdmmc::{SdCard, TimeSource, Timestamp, VolumeManager};
use panic_probe as _;

use crate::platform::BoardPlatform;

struct FixedTime;

impl TimeSource for FixedTime {
    fn get_timestamp(&self) -> Timestamp {
        Timestamp {
            year_since_1970: 54,
            zero_indexed_month: 0,
            zero_indexed_day: 0,
            hours: 0,
            minutes: 0,
            seconds: 0,
        }
    }
}

/// The selector's own flashed image, scanned for its embedded
/// `<version:tag10>` so the mailbox records which Start-up selector ran.
/// `build.rs` links this binary at a fixed, known-size location so the
/// whole image can be addressed as a slice without a loader.
const OWN_IMAGE_BASE: u32 = 0x0000_0000;
const OWN_IMAGE_SIZE: usize = 0x0000_1000;

#[entry]
fn main() -> ! {
    let p = embassy_nrf::init(Default::default());
    let flash = Nvmc::new(p.NVMC);
    let status_led = Output::new(p.P0_13, Level::High, OutputDrive::Standard);

    let spi_bus = embassy_nrf::spim::Spim::new_blocking(p.TWISPI0, p.P0_08, p.P0_09, p.P0_10, Default::default());
    let cs = Output::new(p.P0_11, Level::High, OutputDrive::Standard);
    let spi_device = embedded_hal_bus::spi::ExclusiveDevice::new(spi_bus, cs, embassy_time::Delay).expect("cs pin infallible");
    let sdcard = SdCard::new(spi_device, embassy_time::Delay);
    let volume_mgr = RefCell::new(VolumeManager::new(sdcard, FixedTime));

    let mut board = BoardPlatform::new(flash, &volume_mgr, status_led);
    let map = consts::MEMORY_MAP;

    let mut own_image = [0u8; OWN_IMAGE_SIZE];
    board.flash_read(OWN_IMAGE_BASE, &mut own_image);

    info!("selector: choosing a bootloader copy");
    match select_bootloader_copy(&mut board, &map, &own_image) {
        Ok(selection) => {
            info!("selector: chose copy at {=u32:x}", selection.base_addr);
            write_mailbox_and_jump(&mut board, selection)
        }
        Err(SelectorError::NoBootloader) => {
            info!("selector: no intact bootloader copy found");
            board.blink_error(SelectorError::NoBootloader.blink_count())
        }
    }
}

fn write_mailbox_and_jump<'d, D, T>(board: &mut BoardPlatform<'d, D, T>, selection: bl_core::startup::Selection) -> !
where
    D: embedded_sdmmc::BlockDevice,
    T: embedded_sdmmc::TimeSource,
{
    let bytes = selection.mailbox.to_bytes();
    unsafe {
        core::ptr::write_volatile(consts::MAILBOX_ADDR as *mut [u8; bl_consts::mailbox::SIZE], bytes);
    }
    unsafe { launch::jump_to_vector_table(selection.base_addr, consts::MAILBOX_ADDR) }
}
