//! The `PlatformServices` boundary: every external dependency the core has
//! on concrete hardware, expressed as a trait so the whole core can run
//! against a simulated implementation on a desktop host.
//!
//! Mirrors the single weak-symbol syscalls translation unit of the original
//! board support package (flash, media, file and UI operations all grouped
//! under one surface the platform implements once per target).

use crate::util::{Crc32, ProgressTag};

/// Outcome of an alert shown to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertOutcome {
    /// The alert's timeout elapsed.
    Terminated,
    /// The user dismissed the alert.
    Dismissed,
}

/// Severity of an alert, used by the UI to pick an icon/color.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertKind {
    Info,
    Warning,
    Error,
}

/// How long an alert stays on screen before auto-dismissing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertTimeout {
    Forever,
    Millis(u32),
}

/// An alert to be displayed by the UI layer.
#[derive(Debug, Clone, Copy)]
pub struct Alert<'a> {
    pub kind: AlertKind,
    pub caption: &'a str,
    pub text: &'a str,
    pub timeout: AlertTimeout,
}

/// Flash read-protection level. `Level2` permanently disables debug access
/// and is never set by the upgrade pipeline (see `Upgrade::apply_protection`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ReadProtectionLevel {
    Level0,
    Level1,
    Level2,
}

/// A handle to an open file on removable media.
///
/// Only read access is required — the upgrade pipeline never writes to the
/// upgrade file.
pub trait FileHandle {
    /// Read up to `buf.len()` bytes, returning the number read (`0` at
    /// EOF). `None` signals an I/O error.
    fn read(&mut self, buf: &mut [u8]) -> Option<usize>;

    /// Current read position.
    fn tell(&self) -> u64;

    /// Seek to an absolute position.
    fn seek(&mut self, pos: u64) -> bool;

    /// Total size of the file.
    fn size(&self) -> u64;

    /// `true` once every byte has been read.
    fn eof(&self) -> bool;
}

/// Why `find_upgrade_file` failed outright (as opposed to finding nothing).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FindFileError {
    /// Two or more files matched `specter_upgrade*.bin` on one device.
    MultipleMatches,
}

/// An upgrade file located on a mounted device.
pub struct FoundUpgradeFile<F> {
    pub file: F,
    /// `true` if a companion `.show_version` file was also present, which
    /// requests a version display instead of an upgrade.
    pub show_version_only: bool,
}

/// Every operation the core needs from the concrete platform: flash,
/// removable media, and the user-facing alert/progress/fatal-error sink.
pub trait PlatformServices {
    type File: FileHandle;

    fn flash_erase(&mut self, addr: u32, size: u32) -> bool;
    fn flash_read(&mut self, addr: u32, buf: &mut [u8]) -> bool;
    /// Writes must be verified by the implementer via readback.
    fn flash_write(&mut self, addr: u32, buf: &[u8]) -> bool;
    /// Folds the CRC-32 of `len` bytes starting at `addr` into `crc`,
    /// delegating to a memory-mapped CRC peripheral where available.
    fn flash_crc32(&mut self, crc: &mut Crc32, addr: u32, len: u32) -> bool;
    fn flash_write_protect(&mut self, addr: u32, size: u32, enable: bool) -> bool;
    fn flash_read_protect(&mut self, level: ReadProtectionLevel) -> bool;
    fn flash_read_protection_level(&self) -> ReadProtectionLevel;

    fn media_device_count(&self) -> usize;
    fn media_name(&self, idx: usize) -> Option<&str>;
    fn media_check(&self, idx: usize) -> bool;
    fn media_mount(&mut self, idx: usize) -> bool;
    fn media_umount(&mut self, idx: usize);

    /// Search the root directory of a mounted device for exactly one file
    /// matching `specter_upgrade*.bin`.
    fn media_find_upgrade_file(
        &mut self,
        idx: usize,
    ) -> Result<Option<FoundUpgradeFile<Self::File>>, FindFileError>;

    fn ui_alert(&mut self, alert: Alert<'_>) -> AlertOutcome;
    fn ui_progress(&mut self, caption: &str, tag: ProgressTag, percent_x100: u16);
    /// Displays `text` and halts. Never returns.
    fn ui_fatal_error(&mut self, text: &str) -> !;

    /// Short stable platform identifier, compared against the `platform`
    /// section attribute.
    fn platform_id(&self) -> &str;

    /// Jumps to the Main Firmware's vector table at `addr`, passing
    /// `argument`. Never returns.
    fn start_firmware(&mut self, addr: u32, argument: u32) -> !;
}

/// Hand-rolled fakes implementing `PlatformServices` against plain
/// in-memory buffers, shared by every module's `#[cfg(test)]` code —
/// mirrors the original's `platforms/testbench` syscalls layer and the
/// pack's preference for fakes over a mocking framework.
#[cfg(test)]
pub mod tests {
    extern crate std;

    use super::*;
    use std::string::String;
    use std::vec::Vec;

    /// An in-memory file, used to stand in for the upgrade file on
    /// removable media.
    #[derive(Debug, Clone)]
    pub struct SimFile {
        data: Vec<u8>,
        pos: usize,
    }

    impl SimFile {
        pub fn new(data: Vec<u8>) -> Self {
            Self { data, pos: 0 }
        }
    }

    impl FileHandle for SimFile {
        fn read(&mut self, buf: &mut [u8]) -> Option<usize> {
            let remaining = self.data.len() - self.pos;
            let n = remaining.min(buf.len());
            buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
            self.pos += n;
            Some(n)
        }

        fn tell(&self) -> u64 {
            self.pos as u64
        }

        fn seek(&mut self, pos: u64) -> bool {
            if pos > self.data.len() as u64 {
                return false;
            }
            self.pos = pos as usize;
            true
        }

        fn size(&self) -> u64 {
            self.data.len() as u64
        }

        fn eof(&self) -> bool {
            self.pos >= self.data.len()
        }
    }

    /// A flat in-memory flash, plus enough media/UI state to exercise the
    /// upgrade pipeline and Start-up selector end to end.
    ///
    /// Flash is erased to `0xFF` per byte, matching NOR flash semantics:
    /// an eraseless write can only clear bits, never set them, so tests
    /// that want to observe "interrupted upgrade" behavior erase first.
    pub struct SimPlatform {
        flash: Vec<u8>,
        write_protected: Vec<(u32, u32)>,
        read_protection: ReadProtectionLevel,
        platform_id: String,
        devices: Vec<Option<SimFile>>,
        show_version: Vec<bool>,
        alerts: Vec<String>,
        fatal: Option<String>,
    }

    impl SimPlatform {
        pub fn new(flash_size: u32) -> Self {
            Self {
                flash: std::vec![0xFFu8; flash_size as usize],
                write_protected: Vec::new(),
                read_protection: ReadProtectionLevel::Level0,
                platform_id: String::from("sim-platform"),
                devices: Vec::new(),
                show_version: Vec::new(),
                alerts: Vec::new(),
                fatal: None,
            }
        }

        pub fn with_platform_id(mut self, id: &str) -> Self {
            self.platform_id = String::from(id);
            self
        }

        /// Write `data` directly into flash, bypassing write-protection
        /// and CRC readback checks — for building test fixtures.
        pub fn poke(&mut self, addr: u32, data: &[u8]) {
            let addr = addr as usize;
            self.flash[addr..addr + data.len()].copy_from_slice(data);
        }

        pub fn peek(&self, addr: u32, len: usize) -> &[u8] {
            let addr = addr as usize;
            &self.flash[addr..addr + len]
        }

        /// Flip one bit at `addr`, for "single bit corrupts the result"
        /// test cases.
        pub fn flip_bit(&mut self, addr: u32) {
            self.flash[addr as usize] ^= 0x01;
        }

        /// Place `file` as the sole upgrade file found on device `idx`.
        pub fn place_upgrade_file(&mut self, idx: usize, file: SimFile, show_version: bool) {
            while self.devices.len() <= idx {
                self.devices.push(None);
                self.show_version.push(false);
            }
            self.devices[idx] = Some(file);
            self.show_version[idx] = show_version;
        }

        pub fn alerts(&self) -> &[String] {
            &self.alerts
        }

        pub fn fatal(&self) -> Option<&str> {
            self.fatal.as_deref()
        }
    }

    /// A type alias used where a test only exercises flash operations —
    /// same fake, narrower intent at the call site.
    pub type SimFlash = SimPlatform;

    impl PlatformServices for SimPlatform {
        type File = SimFile;

        fn flash_erase(&mut self, addr: u32, size: u32) -> bool {
            let addr = addr as usize;
            let size = size as usize;
            if addr + size > self.flash.len() {
                return false;
            }
            self.flash[addr..addr + size].fill(0xFF);
            true
        }

        fn flash_read(&mut self, addr: u32, buf: &mut [u8]) -> bool {
            let addr = addr as usize;
            if addr + buf.len() > self.flash.len() {
                return false;
            }
            buf.copy_from_slice(&self.flash[addr..addr + buf.len()]);
            true
        }

        fn flash_write(&mut self, addr: u32, buf: &[u8]) -> bool {
            let addr32 = addr;
            for &(pstart, psize) in &self.write_protected {
                if addr32 < pstart + psize && addr32 + buf.len() as u32 > pstart {
                    return false;
                }
            }
            let addr = addr as usize;
            if addr + buf.len() > self.flash.len() {
                return false;
            }
            // NOR flash write can only clear bits.
            for (dst, &src) in self.flash[addr..addr + buf.len()].iter_mut().zip(buf) {
                *dst &= src;
            }
            self.flash[addr..addr + buf.len()] == *buf
        }

        fn flash_crc32(&mut self, crc: &mut Crc32, addr: u32, len: u32) -> bool {
            let addr = addr as usize;
            let len = len as usize;
            if addr + len > self.flash.len() {
                return false;
            }
            crc.update(&self.flash[addr..addr + len]);
            true
        }

        fn flash_write_protect(&mut self, addr: u32, size: u32, enable: bool) -> bool {
            if enable {
                self.write_protected.push((addr, size));
            } else {
                self.write_protected.retain(|&(a, _)| a != addr);
            }
            true
        }

        fn flash_read_protect(&mut self, level: ReadProtectionLevel) -> bool {
            self.read_protection = level;
            true
        }

        fn flash_read_protection_level(&self) -> ReadProtectionLevel {
            self.read_protection
        }

        fn media_device_count(&self) -> usize {
            self.devices.len()
        }

        fn media_name(&self, idx: usize) -> Option<&str> {
            if idx < self.devices.len() {
                Some("sim0")
            } else {
                None
            }
        }

        fn media_check(&self, idx: usize) -> bool {
            idx < self.devices.len()
        }

        fn media_mount(&mut self, idx: usize) -> bool {
            idx < self.devices.len()
        }

        fn media_umount(&mut self, _idx: usize) {}

        fn media_find_upgrade_file(
            &mut self,
            idx: usize,
        ) -> Result<Option<FoundUpgradeFile<Self::File>>, FindFileError> {
            match self.devices.get(idx).cloned().flatten() {
                Some(file) => Ok(Some(FoundUpgradeFile {
                    file,
                    show_version_only: self.show_version.get(idx).copied().unwrap_or(false),
                })),
                None => Ok(None),
            }
        }

        fn ui_alert(&mut self, alert: Alert<'_>) -> AlertOutcome {
            self.alerts.push(String::from(alert.text));
            AlertOutcome::Dismissed
        }

        fn ui_progress(&mut self, _caption: &str, _tag: ProgressTag, _percent_x100: u16) {}

        fn ui_fatal_error(&mut self, text: &str) -> ! {
            self.fatal = Some(String::from(text));
            panic!("fatal: {text}");
        }

        fn platform_id(&self) -> &str {
            &self.platform_id
        }

        fn start_firmware(&mut self, _addr: u32, _argument: u32) -> ! {
            panic!("start_firmware called in simulation");
        }
    }
}
