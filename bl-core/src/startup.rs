//! Start-up selector: picks a valid Bootloader copy among the two flash
//! slots and hands it a CRC-protected mailbox.
//!
//! The selection logic here is fully portable — it only touches flash
//! through [`PlatformServices`]. The actual hardware jump (remap SRAM, set
//! MSP/VTOR, branch to the reset vector) is isolated in a single
//! platform-specific `startup::launch` function the `bootloader` binary
//! provides, per DESIGN NOTES §9; this module never contains assembly.

use bl_consts::{Mailbox, MemoryMap};

use crate::icr;
use crate::platform::PlatformServices;
use crate::util;

/// Why the selector could not find a Bootloader copy to launch.
///
/// Each variant has a fixed LED blink count per spec.md §4.5 step 4, so the
/// caller's fatal-error path can report a code without needing the text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectorError {
    /// Neither copy passed a full integrity check.
    NoBootloader,
}

impl SelectorError {
    /// Number of blinks the caller's error LED should emit for this error.
    pub const fn blink_count(self) -> u32 {
        match self {
            SelectorError::NoBootloader => 2,
        }
    }
}

/// The Bootloader copy the selector picked, and the mailbox to hand it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Selection {
    /// Base address of the chosen Bootloader copy.
    pub base_addr: u32,
    /// Mailbox to write (at the platform's fixed mailbox address) before
    /// jumping.
    pub mailbox: Mailbox,
}

/// Run the selector against the two copies named in `map`.
///
/// 1. Read each copy's ICR version without a payload CRC check, and rank
///    the slot with the greater version first (a slot whose ICR struct
///    itself doesn't validate has no version and ranks lowest).
/// 2. Full-integrity-verify the higher-ranked slot; if it passes, choose it.
/// 3. Otherwise, full-integrity-verify the other slot, but only if it
///    reported the *same* version in step 1 — per spec.md §4.5 step 3 and
///    the original's `version[idx] == version[selected]` gate. A same-
///    version fallback covers an upgrade interrupted after writing the
///    payload but before (or while) writing the ICR; a lower-versioned
///    surviving copy is never silently promoted.
/// 4. Otherwise, `SelectorError::NoBootloader`.
///
/// `own_image` is the Start-up code's own image, scanned for its embedded
/// `<version:tag10>` to populate the mailbox's `startup_version`.
pub fn select_bootloader_copy(
    platform: &mut impl PlatformServices,
    map: &MemoryMap,
    own_image: &[u8],
) -> Result<Selection, SelectorError> {
    let [copy1, copy2] = map.bootloader_slots();
    let size = map.bootloader_size;

    let v1 = icr::icr_get_version(platform, copy1, size);
    let v2 = icr::icr_get_version(platform, copy2, size);

    let (first, first_ver, second, second_ver) = if v2 > v1 { (copy2, v2, copy1, v1) } else { (copy1, v1, copy2, v2) };

    let chosen = if icr::icr_verify(platform, first, size).is_some() {
        first
    } else if first_ver.is_some() && first_ver == second_ver && icr::icr_verify(platform, second, size).is_some() {
        second
    } else {
        return Err(SelectorError::NoBootloader);
    };

    let startup_version = util::decode_version_tag(own_image).unwrap_or(util::VERSION_NA);
    Ok(Selection {
        base_addr: chosen,
        mailbox: Mailbox::new(chosen, startup_version),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::tests::SimPlatform;

    fn test_map() -> MemoryMap {
        MemoryMap {
            firmware_base: 0,
            firmware_size: 16384,
            bootloader_image_base: 32768,
            bootloader_copy1_base: 32768,
            bootloader_copy2_base: 49152,
            bootloader_size: 8192,
        }
    }

    #[test]
    fn s6_picks_intact_lower_version_over_corrupted_higher_version() {
        let map = test_map();
        let mut platform = SimPlatform::new(65536);

        platform.poke(map.bootloader_copy1_base, &[0x11; 128]);
        assert!(icr::icr_create(&mut platform, map.bootloader_copy1_base, map.bootloader_size, 128, 100));
        // Corrupt slot 1's ICR itself (its `pl_ver` field, within the
        // struct_crc-covered range), so its version can't even be read back
        // — it ranks below slot 2 in step 1 rather than needing a fallback.
        let icr1_addr = map.bootloader_copy1_base + map.bootloader_size - 32 + 8;
        platform.flip_bit(icr1_addr);

        platform.poke(map.bootloader_copy2_base, &[0x22; 64]);
        assert!(icr::icr_create(&mut platform, map.bootloader_copy2_base, map.bootloader_size, 64, 99));

        let selection = select_bootloader_copy(&mut platform, &map, b"no tag here").unwrap();
        assert_eq!(selection.base_addr, map.bootloader_copy2_base);
        assert_eq!(selection.mailbox.loaded_from, map.bootloader_copy2_base);
    }

    #[test]
    fn same_version_fallback_when_higher_ranked_slot_fails_full_verify() {
        let map = test_map();
        let mut platform = SimPlatform::new(65536);

        platform.poke(map.bootloader_copy1_base, &[0x11; 64]);
        assert!(icr::icr_create(&mut platform, map.bootloader_copy1_base, map.bootloader_size, 64, 100));
        // Corrupt slot 1's payload only — its ICR (and therefore its quick
        // version read) stays intact, but full-integrity verification fails.
        platform.flip_bit(map.bootloader_copy1_base + 4);

        platform.poke(map.bootloader_copy2_base, &[0x11; 64]);
        assert!(icr::icr_create(&mut platform, map.bootloader_copy2_base, map.bootloader_size, 64, 100));

        let selection = select_bootloader_copy(&mut platform, &map, b"").unwrap();
        assert_eq!(selection.base_addr, map.bootloader_copy2_base);
    }

    #[test]
    fn mismatched_version_fallback_is_rejected() {
        let map = test_map();
        let mut platform = SimPlatform::new(65536);

        platform.poke(map.bootloader_copy1_base, &[0x11; 128]);
        assert!(icr::icr_create(&mut platform, map.bootloader_copy1_base, map.bootloader_size, 128, 100));
        // Corrupt slot 1's payload only, leaving its (higher) version
        // readable but its full integrity check failing.
        platform.flip_bit(map.bootloader_copy1_base + 4);

        platform.poke(map.bootloader_copy2_base, &[0x22; 64]);
        assert!(icr::icr_create(&mut platform, map.bootloader_copy2_base, map.bootloader_size, 64, 99));
        // Slot 2 is intact but its version (99) doesn't match slot 1's (100),
        // so it must not be accepted as a fallback.

        let selection = select_bootloader_copy(&mut platform, &map, b"");
        assert_eq!(selection.unwrap_err(), SelectorError::NoBootloader);
    }

    #[test]
    fn picks_higher_version_when_both_intact() {
        let map = test_map();
        let mut platform = SimPlatform::new(65536);

        platform.poke(map.bootloader_copy1_base, &[0x33; 32]);
        assert!(icr::icr_create(&mut platform, map.bootloader_copy1_base, map.bootloader_size, 32, 5));
        platform.poke(map.bootloader_copy2_base, &[0x44; 32]);
        assert!(icr::icr_create(&mut platform, map.bootloader_copy2_base, map.bootloader_size, 32, 9));

        let selection = select_bootloader_copy(&mut platform, &map, b"").unwrap();
        assert_eq!(selection.base_addr, map.bootloader_copy2_base);
    }

    #[test]
    fn both_invalid_is_no_bootloader() {
        let map = test_map();
        let mut platform = SimPlatform::new(65536);
        let selection = select_bootloader_copy(&mut platform, &map, b"");
        assert_eq!(selection.unwrap_err(), SelectorError::NoBootloader);
        assert_eq!(SelectorError::NoBootloader.blink_count(), 2);
    }

    #[test]
    fn reads_startup_version_from_embedded_tag() {
        let map = test_map();
        let mut platform = SimPlatform::new(65536);
        platform.poke(map.bootloader_copy1_base, &[0x55; 16]);
        assert!(icr::icr_create(&mut platform, map.bootloader_copy1_base, map.bootloader_size, 16, 1));

        let image = b"junk<version:tag10>0100000099</version:tag10>junk";
        let selection = select_bootloader_copy(&mut platform, &map, image).unwrap();
        assert_eq!(selection.mailbox.startup_version, 100_000_099);
    }
}
