// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

#![no_std]
#![no_main]

//! Bootloader-main entry point: runs the Known-Answer Tests, looks for an
//! upgrade file on removable media and installs it if found, then verifies
//! and launches the installed Main Firmware.
//!
//! Mirrors the teacher's `main.rs` bring-up shape (peripherals once, then
//! an infinite `loop`/`!`-returning dispatch), generalized from BLE/UART
//! message handling to the upgrade-then-launch sequence spec.md §4.4-§4.6
//! describe.

mod consts;
mod keys;
mod launch;
mod platform;

use bl_core::icr;
use bl_core::platform::{Alert, AlertKind, AlertTimeout, PlatformServices};
use bl_core::sigverify::KeySet;
use bl_core::upgrade::{Upgrade, UpgradePolicy, WeightedProgress};
use bl_core::util::{version_to_str, VersionFormat};
use core::cell::RefCell;
use core::fmt::Write as _;
use cortex_m_rt::entry;
use defmt::{info, warn};
use defmt_rtt as _;
use embassy_nrf::gpio::{Level, Output, OutputDrive};
use embassy_nrf::nvmc::Nvmc;
use embedded_sdmmc::{SdCard, TimeSource, Timestamp, VolumeManager};
use heapless::String as HString;
use panic_probe as _;

use crate::platform::BoardPlatform;

/// A fixed timestamp source: this target has no RTC, so every directory
/// entry embedded-sdmmc touches is stamped with the same placeholder time.
struct FixedTime;

impl TimeSource for FixedTime {
    fn get_timestamp(&self) -> Timestamp {
        Timestamp {
            year_since_1970: 54, // 2024
            zero_indexed_month: 0,
            zero_indexed_day: 0,
            hours: 0,
            minutes: 0,
            seconds: 0,
        }
    }
}

const UPGRADE_POLICY: UpgradePolicy = UpgradePolicy {
    rc_allowed: cfg!(feature = "rc-allowed"),
    write_protect_on_completion: cfg!(feature = "flash-protect"),
    bootloader_sig_threshold: 2,
    main_fw_sig_threshold: 1,
};

#[entry]
fn main() -> ! {
    let p = embassy_nrf::init(Default::default());
    let flash = Nvmc::new(p.NVMC);
    let mut status_led = Output::new(p.P0_13, Level::High, OutputDrive::Standard);

    info!("bootloader: running known-answer tests");
    if let Err(e) = bl_core::kats::run_known_answer_tests() {
        warn!("known-answer test failed: {}", defmt::Debug2Format(&e));
        status_led.set_low();
        loop {
            cortex_m::asm::delay(16_000_000);
        }
    }

    let spi_bus = embassy_nrf::spim::Spim::new_blocking(p.TWISPI0, p.P0_08, p.P0_09, p.P0_10, Default::default());
    let cs = Output::new(p.P0_11, Level::High, OutputDrive::Standard);
    let spi_device = embedded_hal_bus::spi::ExclusiveDevice::new(spi_bus, cs, embassy_time::Delay).expect("cs pin infallible");
    let sdcard = SdCard::new(spi_device, embassy_time::Delay);
    let volume_mgr = RefCell::new(VolumeManager::new(sdcard, FixedTime));

    let mut board = BoardPlatform::new(flash, &volume_mgr, status_led);
    let map = consts::MEMORY_MAP;

    run_bootloader(&mut board, &map)
}

fn run_bootloader<'d, D, T>(board: &mut BoardPlatform<'d, D, T>, map: &bl_consts::MemoryMap) -> !
where
    D: embedded_sdmmc::BlockDevice,
    T: embedded_sdmmc::TimeSource,
{
    if !board.media_mount(0) {
        info!("no removable media present, booting installed firmware");
        boot_main_firmware(board, map);
    }

    match board.media_find_upgrade_file(0) {
        Ok(Some(found)) if found.show_version_only => {
            show_installed_versions(board, map);
            board.media_umount(0);
            boot_main_firmware(board, map);
        }
        Ok(Some(mut found)) => {
            info!("upgrade file found, running upgrade pipeline");
            let report = run_upgrade(board, map, &mut found.file);
            board.media_umount(0);
            match report {
                Ok(report) => {
                    let mut text: HString<96> = HString::new();
                    let _ = write!(
                        text,
                        "boot: {} -> {}, main: {} -> {}",
                        fmt_opt(report.boot_before).as_str(),
                        fmt_opt(report.boot_after).as_str(),
                        fmt_opt(report.main_before).as_str(),
                        fmt_opt(report.main_after).as_str(),
                    );
                    board.ui_alert(Alert {
                        kind: AlertKind::Info,
                        caption: "upgrade complete",
                        text: text.as_str(),
                        timeout: AlertTimeout::Millis(3000),
                    });
                }
                Err(e) => {
                    let mut text: HString<64> = HString::new();
                    let _ = write!(text, "{}", defmt::Debug2Format(&e));
                    board.ui_alert(Alert {
                        kind: AlertKind::Error,
                        caption: "upgrade failed",
                        text: text.as_str(),
                        timeout: AlertTimeout::Millis(5000),
                    });
                }
            }
            boot_main_firmware(board, map);
        }
        Ok(None) => {
            board.media_umount(0);
            boot_main_firmware(board, map);
        }
        Err(_) => {
            board.media_umount(0);
            board.ui_alert(Alert {
                kind: AlertKind::Error,
                caption: "upgrade error",
                text: "multiple upgrade files found on media",
                timeout: AlertTimeout::Millis(5000),
            });
            boot_main_firmware(board, map);
        }
    }
}

fn run_upgrade<'d, D, T>(
    board: &mut BoardPlatform<'d, D, T>,
    map: &bl_consts::MemoryMap,
    file: &mut <BoardPlatform<'d, D, T> as PlatformServices>::File,
) -> Result<bl_core::upgrade::Report, bl_core::upgrade::UpgradeError>
where
    D: embedded_sdmmc::BlockDevice,
    T: embedded_sdmmc::TimeSource,
{
    let vendor_keys = KeySet::new(&[&keys::VENDOR_KEYS]);
    let maintainer_keys = Some(KeySet::new(&[&keys::MAINTAINER_KEYS]));
    let active_slot = map.is_bootloader_slot_base(map.bootloader_image_base).then_some(map.bootloader_image_base);

    let mut upgrade = Upgrade::new(board, *map, UPGRADE_POLICY, vendor_keys, maintainer_keys, active_slot);
    let mut progress = WeightedProgress::new(None, None);
    upgrade.run(file, &mut progress)
}

fn show_installed_versions<'d, D, T>(board: &mut BoardPlatform<'d, D, T>, map: &bl_consts::MemoryMap)
where
    D: embedded_sdmmc::BlockDevice,
    T: embedded_sdmmc::TimeSource,
{
    let boot_ver = icr::icr_get_version(board, map.bootloader_image_base, map.bootloader_size);
    let main_ver = icr::icr_get_version(board, map.firmware_base, map.firmware_size);
    let mut text: HString<64> = HString::new();
    let _ = write!(
        text,
        "boot {} / main {}",
        boot_ver.map(|v| version_to_str(v, VersionFormat::Display)).unwrap_or_default().as_str(),
        main_ver.map(|v| version_to_str(v, VersionFormat::Display)).unwrap_or_default().as_str(),
    );
    board.ui_alert(Alert {
        kind: AlertKind::Info,
        caption: "installed versions",
        text: text.as_str(),
        timeout: AlertTimeout::Millis(4000),
    });
}

fn fmt_opt(v: Option<u32>) -> HString<24> {
    match v {
        Some(v) => version_to_str(v, VersionFormat::Display),
        None => HString::new(),
    }
}

/// Verify the installed Main Firmware's ICR and jump to it, or halt with a
/// fatal alert if it doesn't verify — this binary never falls back to
/// re-running the upgrade pipeline on a verify failure; that is the
/// operator's job via a fresh upgrade file.
fn boot_main_firmware<'d, D, T>(board: &mut BoardPlatform<'d, D, T>, map: &bl_consts::MemoryMap) -> !
where
    D: embedded_sdmmc::BlockDevice,
    T: embedded_sdmmc::TimeSource,
{
    match icr::icr_verify(board, map.firmware_base, map.firmware_size) {
        Some(_version) => board.start_firmware(map.firmware_base, 0),
        None => board.ui_fatal_error("main firmware failed integrity check"),
    }
}
