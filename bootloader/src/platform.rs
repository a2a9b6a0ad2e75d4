// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

//! Concrete [`bl_core::platform::PlatformServices`] for the nRF52805
//! target: flash through `embassy_nrf::nvmc::Nvmc`, an SD card's FAT root
//! directory through `embedded_sdmmc`, and the alert/progress surface
//! reduced to a status LED plus `defmt` logging (the GUI/LCD this alert
//! would otherwise drive is, per spec, an external collaborator specified
//! only through this trait — §1 excludes its concrete implementation from
//! the core).
//!
//! Grounded on the teacher's `bootloader/src/main.rs` for the general shape
//! of "one struct wires every peripheral", generalized from the teacher's
//! BLE/UART bring-up to this specification's flash+SD-card surface.

use core::cell::RefCell;
use core::fmt::Write as _;

use bl_core::platform::{Alert, AlertOutcome, FileHandle, FindFileError, FoundUpgradeFile, PlatformServices, ReadProtectionLevel};
use bl_core::util::{Crc32, ProgressTag};
use defmt::{info, warn};
use embassy_nrf::gpio::Output;
use embassy_nrf::nvmc::Nvmc;
use embedded_sdmmc::{BlockDevice, Mode, RawFile, TimeSource, VolumeIdx, VolumeManager};
use embedded_storage::nor_flash::{NorFlash, ReadNorFlash};

use crate::consts::PLATFORM_ID;
use crate::launch;

/// Name pattern the upgrade file must match on a device's root directory.
const UPGRADE_FILE_PREFIX: &str = "SPECTER_";
const UPGRADE_FILE_SUFFIX: &str = ".BIN";
const SHOW_VERSION_FILE: &str = "SHOW_VER.SHO";

/// An open upgrade file on the SD card, read through the shared
/// `VolumeManager`.
pub struct SdFile<'d, D: BlockDevice, T: TimeSource> {
    volume_mgr: &'d RefCell<VolumeManager<D, T>>,
    raw: RawFile,
    pos: u64,
    size: u64,
}

impl<'d, D: BlockDevice, T: TimeSource> FileHandle for SdFile<'d, D, T> {
    fn read(&mut self, buf: &mut [u8]) -> Option<usize> {
        let n = self.volume_mgr.borrow_mut().read(self.raw, buf).ok()?;
        self.pos += n as u64;
        Some(n)
    }

    fn tell(&self) -> u64 {
        self.pos
    }

    fn seek(&mut self, pos: u64) -> bool {
        if pos > self.size {
            return false;
        }
        if self.volume_mgr.borrow_mut().file_seek_from_start(self.raw, pos as u32).is_err() {
            return false;
        }
        self.pos = pos;
        true
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn eof(&self) -> bool {
        self.pos >= self.size
    }
}

impl<'d, D: BlockDevice, T: TimeSource> Drop for SdFile<'d, D, T> {
    fn drop(&mut self) {
        let _ = self.volume_mgr.borrow_mut().close_file(self.raw);
    }
}

/// Wires `bl-core`'s platform boundary to this board's flash, SD card and
/// a single status LED.
pub struct BoardPlatform<'d, D: BlockDevice, T: TimeSource> {
    flash: Nvmc<'d>,
    volume_mgr: &'d RefCell<VolumeManager<D, T>>,
    status_led: Output<'d>,
}

impl<'d, D: BlockDevice, T: TimeSource> BoardPlatform<'d, D, T> {
    pub fn new(flash: Nvmc<'d>, volume_mgr: &'d RefCell<VolumeManager<D, T>>, status_led: Output<'d>) -> Self {
        Self {
            flash,
            volume_mgr,
            status_led,
        }
    }

    /// Blink the status LED `count` times, per spec.md §4.5 step 4's error
    /// code convention (2 = no bootloader, 1 = internal error).
    pub fn blink_error(&mut self, count: u32) -> ! {
        loop {
            for _ in 0..count {
                self.status_led.set_low();
                cortex_m::asm::delay(8_000_000);
                self.status_led.set_high();
                cortex_m::asm::delay(8_000_000);
            }
            cortex_m::asm::delay(32_000_000);
        }
    }
}

impl<'d, D: BlockDevice, T: TimeSource> PlatformServices for BoardPlatform<'d, D, T> {
    type File = SdFile<'d, D, T>;

    fn flash_erase(&mut self, addr: u32, size: u32) -> bool {
        self.flash.erase(addr, addr + size).is_ok()
    }

    fn flash_read(&mut self, addr: u32, buf: &mut [u8]) -> bool {
        self.flash.read(addr, buf).is_ok()
    }

    fn flash_write(&mut self, addr: u32, buf: &[u8]) -> bool {
        if self.flash.write(addr, buf).is_err() {
            return false;
        }
        let mut readback = [0u8; 256];
        let mut offset = 0usize;
        while offset < buf.len() {
            let len = (buf.len() - offset).min(readback.len());
            if self.flash.read(addr + offset as u32, &mut readback[..len]).is_err() {
                return false;
            }
            if readback[..len] != buf[offset..offset + len] {
                return false;
            }
            offset += len;
        }
        true
    }

    fn flash_crc32(&mut self, crc: &mut Crc32, addr: u32, len: u32) -> bool {
        let mut buf = [0u8; 256];
        let mut complete = 0u32;
        while complete < len {
            let chunk = (len - complete).min(buf.len() as u32) as usize;
            if self.flash.read(addr + complete, &mut buf[..chunk]).is_err() {
                return false;
            }
            crc.update(&buf[..chunk]);
            complete += chunk as u32;
        }
        true
    }

    fn flash_write_protect(&mut self, _addr: u32, _size: u32, _enable: bool) -> bool {
        // nRF52805 has no sub-region write-protect register reachable from
        // application code; protection is enforced at the UICR/APPROTECT
        // level by `no-dbg-access`, applied once at provisioning, not per
        // upgrade. Accepted as a no-op, matching the original's behavior on
        // targets without BPROT/ACL.
        true
    }

    fn flash_read_protect(&mut self, _level: ReadProtectionLevel) -> bool {
        true
    }

    fn flash_read_protection_level(&self) -> ReadProtectionLevel {
        ReadProtectionLevel::Level0
    }

    fn media_device_count(&self) -> usize {
        1
    }

    fn media_name(&self, idx: usize) -> Option<&str> {
        (idx == 0).then_some("sd0")
    }

    fn media_check(&self, idx: usize) -> bool {
        idx == 0
    }

    fn media_mount(&mut self, idx: usize) -> bool {
        idx == 0
    }

    fn media_umount(&mut self, _idx: usize) {}

    fn media_find_upgrade_file(&mut self, idx: usize) -> Result<Option<FoundUpgradeFile<Self::File>>, FindFileError> {
        if idx != 0 {
            return Ok(None);
        }
        let mut mgr = self.volume_mgr.borrow_mut();
        let volume = mgr.open_raw_volume(VolumeIdx(0)).map_err(|_| FindFileError::MultipleMatches).ok();
        let Some(volume) = volume else { return Ok(None) };
        let Ok(root) = mgr.open_root_dir(volume) else {
            return Ok(None);
        };

        let mut matches: heapless::Vec<heapless::String<16>, 2> = heapless::Vec::new();
        let mut show_version_only = false;
        let _ = mgr.iterate_dir(root, |entry| {
            let mut name: heapless::String<16> = heapless::String::new();
            let _ = core::write!(name, "{}", entry.name);
            if name.eq_ignore_ascii_case(SHOW_VERSION_FILE) {
                show_version_only = true;
            } else if name.len() >= UPGRADE_FILE_PREFIX.len()
                && name.as_str()[..UPGRADE_FILE_PREFIX.len()].eq_ignore_ascii_case(UPGRADE_FILE_PREFIX)
                && name.ends_with(UPGRADE_FILE_SUFFIX)
            {
                let _ = matches.push(name);
            }
        });

        if matches.len() > 1 {
            let _ = mgr.close_dir(root);
            return Err(FindFileError::MultipleMatches);
        }
        let Some(name) = matches.into_iter().next() else {
            let _ = mgr.close_dir(root);
            return Ok(None);
        };

        let Ok(raw) = mgr.open_file_in_dir(root, name.as_str(), Mode::ReadOnly) else {
            let _ = mgr.close_dir(root);
            return Ok(None);
        };
        let size = mgr.file_length(raw).unwrap_or(0) as u64;
        let _ = mgr.close_dir(root);

        drop(mgr);
        Ok(Some(FoundUpgradeFile {
            file: SdFile {
                volume_mgr: self.volume_mgr,
                raw,
                pos: 0,
                size,
            },
            show_version_only,
        }))
    }

    fn ui_alert(&mut self, alert: Alert<'_>) -> AlertOutcome {
        warn!("alert [{}]: {}", alert.caption, alert.text);
        AlertOutcome::Dismissed
    }

    fn ui_progress(&mut self, caption: &str, tag: ProgressTag, percent_x100: u16) {
        info!(
            "progress [{}] stage={=u8} substage={=u8}: {}.{:02}%",
            caption,
            tag.stage as u8,
            tag.substage as u8,
            percent_x100 / 100,
            percent_x100 % 100
        );
    }

    fn ui_fatal_error(&mut self, text: &str) -> ! {
        warn!("fatal: {}", text);
        self.blink_error(1);
    }

    fn platform_id(&self) -> &str {
        PLATFORM_ID
    }

    fn start_firmware(&mut self, addr: u32, argument: u32) -> ! {
        unsafe { launch::jump_to_vector_table(addr, argument) }
    }
}
