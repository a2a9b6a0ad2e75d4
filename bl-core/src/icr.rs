//! Integrity Check Record (ICR) and Version Check Record (VCR): the
//! self-describing, tamper-evident tail a firmware section carries in
//! flash once it has been written and hashed.

use crate::platform::PlatformServices;
use crate::util::Crc32;

/// Fixed per-section overhead reserved for the ICR and one tail VCR.
pub const FW_SECT_OVERHEAD: u32 = 64;

/// Size in bytes of a serialized ICR.
pub const ICR_SIZE: usize = 32;
const ICR_CRC_COVERED: usize = 28;
const ICR_MAGIC: u32 = 0x4754_4E49; // "INTG", read little-endian.
const ICR_STRUCT_REV: u32 = 1;

/// Size in bytes of a serialized VCR.
pub const VCR_SIZE: usize = 32;
const VCR_CRC_COVERED: usize = 28;
const VCR_MAGIC: &[u8; 16] = b"VERSIONCHECKREC\0";
const VCR_STRUCT_REV: u32 = 1;

/// One section's payload size/CRC pair, as embedded in an ICR.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SectInfo {
    pl_size: u32,
    pl_crc: u32,
}

/// Integrity Check Record: binds a firmware section's payload to a CRC and
/// a version, stored at `sect_addr + sect_size - ICR_SIZE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Icr {
    pl_ver: u32,
    main_sect: SectInfo,
    /// Reserved for a future auxiliary section; must stay zero for the
    /// current structure revision.
    aux_sect: SectInfo,
}

impl Icr {
    fn to_bytes(self) -> [u8; ICR_SIZE] {
        let mut buf = [0u8; ICR_SIZE];
        buf[0..4].copy_from_slice(&ICR_MAGIC.to_le_bytes());
        buf[4..8].copy_from_slice(&ICR_STRUCT_REV.to_le_bytes());
        buf[8..12].copy_from_slice(&self.pl_ver.to_le_bytes());
        buf[12..16].copy_from_slice(&self.main_sect.pl_size.to_le_bytes());
        buf[16..20].copy_from_slice(&self.main_sect.pl_crc.to_le_bytes());
        buf[20..24].copy_from_slice(&self.aux_sect.pl_size.to_le_bytes());
        buf[24..28].copy_from_slice(&self.aux_sect.pl_crc.to_le_bytes());
        let crc = Crc32::of(&buf[..ICR_CRC_COVERED]);
        buf[28..32].copy_from_slice(&crc.to_le_bytes());
        buf
    }

    fn from_bytes(buf: &[u8; ICR_SIZE]) -> Option<Self> {
        let magic = u32::from_le_bytes(buf[0..4].try_into().unwrap());
        let struct_rev = u32::from_le_bytes(buf[4..8].try_into().unwrap());
        let struct_crc = u32::from_le_bytes(buf[28..32].try_into().unwrap());
        if magic != ICR_MAGIC || struct_rev != ICR_STRUCT_REV {
            return None;
        }
        if Crc32::of(&buf[..ICR_CRC_COVERED]) != struct_crc {
            return None;
        }
        let icr = Self {
            pl_ver: u32::from_le_bytes(buf[8..12].try_into().unwrap()),
            main_sect: SectInfo {
                pl_size: u32::from_le_bytes(buf[12..16].try_into().unwrap()),
                pl_crc: u32::from_le_bytes(buf[16..20].try_into().unwrap()),
            },
            aux_sect: SectInfo {
                pl_size: u32::from_le_bytes(buf[20..24].try_into().unwrap()),
                pl_crc: u32::from_le_bytes(buf[24..28].try_into().unwrap()),
            },
        };
        if icr.aux_sect != (SectInfo { pl_size: 0, pl_crc: 0 }) {
            return None;
        }
        Some(icr)
    }
}

/// `sect_size >= pl_size + FW_SECT_OVERHEAD` and both are positive, with no
/// overflow in the addition.
pub fn check_sect_size(sect_size: u32, pl_size: u32) -> bool {
    if sect_size == 0 || pl_size == 0 {
        return false;
    }
    match pl_size.checked_add(FW_SECT_OVERHEAD) {
        Some(min_size) => sect_size >= min_size,
        None => false,
    }
}

/// Build an ICR for the `pl_size` bytes of payload already written at
/// `sect_addr`, and write it at `sect_addr + sect_size - ICR_SIZE`.
///
/// Returns `false` if the size precondition fails or a flash read/write
/// fails.
pub fn icr_create(
    platform: &mut impl PlatformServices,
    sect_addr: u32,
    sect_size: u32,
    pl_size: u32,
    pl_ver: u32,
) -> bool {
    if !check_sect_size(sect_size, pl_size) {
        return false;
    }

    let mut crc = Crc32::new();
    let mut buf = [0u8; 4096];
    let mut complete: u32 = 0;
    while complete < pl_size {
        let len = (pl_size - complete).min(buf.len() as u32) as usize;
        if !platform.flash_read(sect_addr + complete, &mut buf[..len]) {
            return false;
        }
        crc.update(&buf[..len]);
        complete += len as u32;
    }

    let icr = Icr {
        pl_ver,
        main_sect: SectInfo {
            pl_size,
            pl_crc: crc.value(),
        },
        aux_sect: SectInfo { pl_size: 0, pl_crc: 0 },
    };
    let bytes = icr.to_bytes();
    let icr_addr = sect_addr + sect_size - ICR_SIZE as u32;
    platform.flash_write(icr_addr, &bytes)
}

/// Read and validate the ICR at `sect_addr + sect_size - ICR_SIZE`,
/// recomputing the payload CRC over the first `pl_size` bytes of the
/// section. Returns the stored version on a full match.
pub fn icr_verify(platform: &mut impl PlatformServices, sect_addr: u32, sect_size: u32) -> Option<u32> {
    let icr = read_icr(platform, sect_addr, sect_size)?;

    let mut crc = Crc32::new();
    let mut buf = [0u8; 4096];
    let mut complete: u32 = 0;
    while complete < icr.main_sect.pl_size {
        let len = (icr.main_sect.pl_size - complete).min(buf.len() as u32) as usize;
        if !platform.flash_read(sect_addr + complete, &mut buf[..len]) {
            return None;
        }
        crc.update(&buf[..len]);
        complete += len as u32;
    }
    if crc.value() != icr.main_sect.pl_crc {
        return None;
    }
    Some(icr.pl_ver)
}

/// Read the ICR's recorded version without recomputing the payload CRC.
/// Used by the Start-up selector's first pass, which only wants to rank
/// versions before committing to a full integrity check.
pub fn icr_get_version(platform: &mut impl PlatformServices, sect_addr: u32, sect_size: u32) -> Option<u32> {
    read_icr(platform, sect_addr, sect_size).map(|icr| icr.pl_ver)
}

fn read_icr(platform: &mut impl PlatformServices, sect_addr: u32, sect_size: u32) -> Option<Icr> {
    if sect_size < ICR_SIZE as u32 {
        return None;
    }
    let icr_addr = sect_addr + sect_size - ICR_SIZE as u32;
    let mut buf = [0u8; ICR_SIZE];
    if !platform.flash_read(icr_addr, &mut buf) {
        return None;
    }
    Icr::from_bytes(&buf)
}

/// Where a VCR may live within a section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    Starting,
    Ending,
    Any,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Vcr {
    pl_ver: u32,
}

impl Vcr {
    fn to_bytes(self) -> [u8; VCR_SIZE] {
        let mut buf = [0u8; VCR_SIZE];
        buf[0..16].copy_from_slice(VCR_MAGIC);
        buf[16..20].copy_from_slice(&VCR_STRUCT_REV.to_le_bytes());
        buf[20..24].copy_from_slice(&self.pl_ver.to_le_bytes());
        // buf[24..28] stays the reserved zero word.
        let crc = Crc32::of(&buf[..VCR_CRC_COVERED]);
        buf[28..32].copy_from_slice(&crc.to_le_bytes());
        buf
    }

    fn from_bytes(buf: &[u8; VCR_SIZE]) -> Option<Self> {
        if &buf[0..16] != VCR_MAGIC {
            return None;
        }
        let struct_rev = u32::from_le_bytes(buf[16..20].try_into().unwrap());
        let struct_crc = u32::from_le_bytes(buf[28..32].try_into().unwrap());
        if struct_rev != VCR_STRUCT_REV {
            return None;
        }
        if Crc32::of(&buf[..VCR_CRC_COVERED]) != struct_crc {
            return None;
        }
        Some(Self {
            pl_ver: u32::from_le_bytes(buf[20..24].try_into().unwrap()),
        })
    }
}

/// Serialize a VCR for `pl_ver`, for use by the host-side upgrade-file
/// builder and by flash-fixture setup in tests.
pub fn vcr_build(pl_ver: u32) -> [u8; VCR_SIZE] {
    Vcr { pl_ver }.to_bytes()
}

/// Read up to two VCRs (starting at `sect_addr`, ending at
/// `sect_addr + sect_size - VCR_SIZE`) per `placement`, and return the
/// highest valid version found. `None` if no selected placement is valid.
pub fn vcr_get_version(
    platform: &mut impl PlatformServices,
    sect_addr: u32,
    sect_size: u32,
    placement: Placement,
) -> Option<u32> {
    let check_start = matches!(placement, Placement::Starting | Placement::Any);
    let check_end = matches!(placement, Placement::Ending | Placement::Any);

    let mut best: Option<u32> = None;
    if check_start {
        if let Some(v) = read_vcr_at(platform, sect_addr) {
            best = Some(best.map_or(v, |b: u32| b.max(v)));
        }
    }
    if check_end && sect_size >= VCR_SIZE as u32 {
        if let Some(v) = read_vcr_at(platform, sect_addr + sect_size - VCR_SIZE as u32) {
            best = Some(best.map_or(v, |b: u32| b.max(v)));
        }
    }
    best
}

fn read_vcr_at(platform: &mut impl PlatformServices, addr: u32) -> Option<u32> {
    let mut buf = [0u8; VCR_SIZE];
    if !platform.flash_read(addr, &mut buf) {
        return None;
    }
    Vcr::from_bytes(&buf).map(|vcr| vcr.pl_ver)
}
