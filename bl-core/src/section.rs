//! Section format: the fixed 256-byte header every payload and signature
//! section in an upgrade file (and in flash) carries, plus the attribute
//! TLV list and payload validation/hashing built on top of it.

use sha2::{Digest, Sha256};

use crate::platform::{FileHandle, PlatformServices};
use crate::util::{self, Crc32, ProgressTag};

/// Total size of a serialized section header.
pub const SIZE: usize = 256;

/// Number of leading bytes covered by `struct_crc`.
const CRC_COVERED: usize = 252;

const MAGIC: u32 = 0x5443_4553; // "SECT", read little-endian.
const STRUCT_REV: u32 = 1;

const PAYLOAD_SIZE_MAX: u32 = 16 * 1024 * 1024;

/// Default chunk size used when streaming a payload from file or flash.
pub const DEFAULT_CHUNK_SIZE: usize = 4096;

/// Recognized attribute keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AttrKey {
    Algorithm = 1,
    BaseAddr = 2,
    EntryPoint = 3,
    Platform = 4,
}

const ATTR_TERMINATOR: u8 = 0;
const ATTR_LIST_SIZE: usize = 216;

/// A fixed-layout 256-byte section header.
///
/// Multi-byte fields are stored as little-endian byte arrays rather than
/// native integers, so the layout is exact regardless of host endianness or
/// alignment — the same approach the signed-firmware header format this is
/// grounded on uses.
#[derive(Debug, Clone, Copy)]
pub struct SectionHeader {
    magic: [u8; 4],
    struct_rev: [u8; 4],
    name: [u8; 16],
    pl_ver: [u8; 4],
    pl_size: [u8; 4],
    pl_crc: [u8; 4],
    attr_list: [u8; ATTR_LIST_SIZE],
    struct_crc: [u8; 4],
}

/// Produced by [`SectionHeader::hash_over_flash`]: binds a payload section's
/// content to its name and version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hash {
    pub digest: [u8; 32],
    pub sect_name: [u8; 16],
    pub pl_ver: u32,
}

impl SectionHeader {
    /// Parse the fixed fields out of a 256-byte buffer. Does not validate
    /// them — use [`validate_header`](Self::validate_header) for that.
    pub fn from_bytes(data: &[u8; SIZE]) -> Self {
        Self {
            magic: data[0..4].try_into().unwrap(),
            struct_rev: data[4..8].try_into().unwrap(),
            name: data[8..24].try_into().unwrap(),
            pl_ver: data[24..28].try_into().unwrap(),
            pl_size: data[28..32].try_into().unwrap(),
            pl_crc: data[32..36].try_into().unwrap(),
            attr_list: data[36..252].try_into().unwrap(),
            struct_crc: data[252..256].try_into().unwrap(),
        }
    }

    /// Serialize back to the 256-byte wire format.
    pub fn to_bytes(&self) -> [u8; SIZE] {
        let mut buf = [0u8; SIZE];
        buf[0..4].copy_from_slice(&self.magic);
        buf[4..8].copy_from_slice(&self.struct_rev);
        buf[8..24].copy_from_slice(&self.name);
        buf[24..28].copy_from_slice(&self.pl_ver);
        buf[28..32].copy_from_slice(&self.pl_size);
        buf[32..36].copy_from_slice(&self.pl_crc);
        buf[36..252].copy_from_slice(&self.attr_list);
        buf[252..256].copy_from_slice(&self.struct_crc);
        buf
    }

    /// Build a well-formed header and compute its `struct_crc`. Intended
    /// for tests and the host-side upgrade-file builder.
    pub fn build(name: &str, pl_ver: u32, pl_size: u32, pl_crc: u32, attr_list: [u8; ATTR_LIST_SIZE]) -> Self {
        let mut name_bytes = [0u8; 16];
        name_bytes[..name.len()].copy_from_slice(name.as_bytes());

        let mut header = Self {
            magic: MAGIC.to_le_bytes(),
            struct_rev: STRUCT_REV.to_le_bytes(),
            name: name_bytes,
            pl_ver: pl_ver.to_le_bytes(),
            pl_size: pl_size.to_le_bytes(),
            pl_crc: pl_crc.to_le_bytes(),
            attr_list,
            struct_crc: [0; 4],
        };
        let crc = Crc32::of(&header.to_bytes()[..CRC_COVERED]);
        header.struct_crc = crc.to_le_bytes();
        header
    }

    pub fn magic(&self) -> u32 {
        u32::from_le_bytes(self.magic)
    }

    pub fn struct_rev(&self) -> u32 {
        u32::from_le_bytes(self.struct_rev)
    }

    /// Section name up to its NUL terminator, or `None` if the name field
    /// has no terminator.
    pub fn name(&self) -> Option<&str> {
        let term = self.name.iter().position(|&b| b == 0)?;
        core::str::from_utf8(&self.name[..term]).ok()
    }

    pub fn pl_ver(&self) -> u32 {
        u32::from_le_bytes(self.pl_ver)
    }

    pub fn pl_size(&self) -> u32 {
        u32::from_le_bytes(self.pl_size)
    }

    pub fn pl_crc(&self) -> u32 {
        u32::from_le_bytes(self.pl_crc)
    }

    pub fn struct_crc(&self) -> u32 {
        u32::from_le_bytes(self.struct_crc)
    }

    /// Checks magic, struct revision, struct CRC, name rules, version and
    /// payload-size ranges, and the attribute list's well-formedness.
    pub fn validate_header(&self) -> bool {
        if self.magic() != MAGIC || self.struct_rev() != STRUCT_REV {
            return false;
        }
        if Crc32::of(&self.to_bytes()[..CRC_COVERED]) != self.struct_crc() {
            return false;
        }
        if !validate_name(&self.name) {
            return false;
        }
        let pl_ver = self.pl_ver();
        if pl_ver != util::VERSION_NA && pl_ver > util::VERSION_MAX {
            return false;
        }
        let pl_size = self.pl_size();
        if pl_size == 0 || pl_size > PAYLOAD_SIZE_MAX {
            return false;
        }
        validate_attributes(&self.attr_list)
    }

    /// `true` if this is the signature section (named `"sign"`).
    pub fn is_signature(&self) -> bool {
        self.name() == Some("sign")
    }

    /// `true` if this is a payload section (any valid name other than
    /// `"sign"`).
    pub fn is_payload(&self) -> bool {
        matches!(self.name(), Some(name) if name != "sign")
    }

    /// Read an unsigned-integer attribute. Value lengths `0..=8` are
    /// accepted; a zero-length value decodes to `0`.
    pub fn get_attr_uint(&self, key: AttrKey) -> Option<u64> {
        let (start, len) = find_attribute(&self.attr_list, key as u8)?;
        if len > 8 {
            return None;
        }
        let mut value: u64 = 0;
        for (i, &b) in self.attr_list[start..start + len].iter().enumerate() {
            value |= u64::from(b) << (8 * i);
        }
        Some(value)
    }

    /// Read a string attribute. Rejects a value containing an embedded NUL
    /// or invalid UTF-8.
    pub fn get_attr_str(&self, key: AttrKey) -> Option<&str> {
        let (start, len) = find_attribute(&self.attr_list, key as u8)?;
        let value = &self.attr_list[start..start + len];
        if value.contains(&0) {
            return None;
        }
        core::str::from_utf8(value).ok()
    }

    /// Validate the full payload buffer against `pl_size`/`pl_crc`.
    pub fn validate_payload(&self, payload: &[u8]) -> bool {
        payload.len() as u32 == self.pl_size() && Crc32::of(payload) == self.pl_crc()
    }

    /// Stream-validate the payload from an open file, starting at its
    /// current read position.
    pub fn validate_payload_from_file(
        &self,
        file: &mut impl FileHandle,
        progress: &mut impl crate::util::ProgressSink,
        tag: ProgressTag,
        chunk_size: usize,
    ) -> bool {
        let total = self.pl_size();
        let mut crc = Crc32::new();
        let mut complete: u32 = 0;
        let mut buf = [0u8; DEFAULT_CHUNK_SIZE];
        let chunk_size = chunk_size.min(buf.len()).max(1);
        while complete < total {
            let want = (total - complete) as usize;
            let want = want.min(chunk_size);
            let Some(read) = file.read(&mut buf[..want]) else {
                return false;
            };
            if read == 0 {
                return false;
            }
            crc.update(&buf[..read]);
            complete += read as u32;
            progress.report(tag, total, complete);
        }
        crc.value() == self.pl_crc()
    }

    /// Stream-validate the payload directly from flash, delegating the
    /// running CRC to the platform's memory-mapped CRC helper.
    pub fn validate_payload_from_flash(
        &self,
        platform: &mut impl PlatformServices,
        addr: u32,
        progress: &mut impl crate::util::ProgressSink,
        tag: ProgressTag,
        chunk_size: usize,
    ) -> bool {
        let total = self.pl_size();
        let mut crc = Crc32::new();
        let mut complete: u32 = 0;
        let chunk_size = (chunk_size.max(1) as u32).min(total.max(1));
        while complete < total {
            let len = (total - complete).min(chunk_size);
            if !platform.flash_crc32(&mut crc, addr + complete, len) {
                return false;
            }
            complete += len;
            progress.report(tag, total, complete);
        }
        crc.value() == self.pl_crc()
    }

    /// `SHA256(header ‖ payload)`, read directly from flash at `addr`
    /// (the payload's own start address, i.e. the section address plus
    /// [`SIZE`]).
    pub fn hash_over_flash(
        &self,
        platform: &mut impl PlatformServices,
        addr: u32,
        progress: &mut impl crate::util::ProgressSink,
        tag: ProgressTag,
    ) -> Option<Hash> {
        let mut hasher = Sha256::new();
        hasher.update(self.to_bytes());

        let total = self.pl_size();
        let mut complete: u32 = 0;
        let mut buf = [0u8; DEFAULT_CHUNK_SIZE];
        while complete < total {
            let len = (total - complete).min(buf.len() as u32) as usize;
            if !platform.flash_read(addr + complete, &mut buf[..len]) {
                return None;
            }
            hasher.update(&buf[..len]);
            complete += len as u32;
            progress.report(tag, total, complete);
        }

        Some(Hash {
            digest: hasher.finalize().into(),
            sect_name: self.name,
            pl_ver: self.pl_ver(),
        })
    }
}

fn validate_name(name: &[u8; 16]) -> bool {
    let Some(term) = name.iter().position(|&b| b == 0) else {
        return false;
    };
    if term == 0 || !name[0].is_ascii_alphabetic() {
        return false;
    }
    if !name[1..term].iter().all(u8::is_ascii_alphanumeric) {
        return false;
    }
    name[term..].iter().all(|&b| b == 0)
}

/// Scan an attribute list until the terminating `key == 0` record,
/// requiring every record to fit and every byte after the terminator to be
/// zero. Shared by validation and attribute lookup.
fn validate_attributes(attr_list: &[u8; ATTR_LIST_SIZE]) -> bool {
    let mut idx = 0;
    loop {
        if idx >= attr_list.len() {
            return false;
        }
        let key = attr_list[idx];
        if key == ATTR_TERMINATOR {
            return attr_list[idx + 1..].iter().all(|&b| b == 0);
        }
        let Some(&len) = attr_list.get(idx + 1) else {
            return false;
        };
        let value_end = idx + 2 + len as usize;
        if value_end > attr_list.len() {
            return false;
        }
        idx = value_end;
    }
}

fn find_attribute(attr_list: &[u8; ATTR_LIST_SIZE], key: u8) -> Option<(usize, usize)> {
    let mut idx = 0;
    loop {
        if idx >= attr_list.len() {
            return None;
        }
        let record_key = attr_list[idx];
        if record_key == ATTR_TERMINATOR {
            return None;
        }
        let len = *attr_list.get(idx + 1)? as usize;
        let value_start = idx + 2;
        let value_end = value_start + len;
        if value_end > attr_list.len() {
            return None;
        }
        if record_key == key {
            return Some((value_start, len));
        }
        idx = value_end;
    }
}

/// Build a 216-byte attribute list out of `(key, value)` pairs, terminated
/// with a zero key and zero-padded. Intended for tests and the host-side
/// upgrade-file builder.
pub fn build_attr_list(attrs: &[(AttrKey, &[u8])]) -> [u8; ATTR_LIST_SIZE] {
    let mut buf = [0u8; ATTR_LIST_SIZE];
    let mut idx = 0;
    for (key, value) in attrs {
        buf[idx] = *key as u8;
        buf[idx + 1] = value.len() as u8;
        buf[idx + 2..idx + 2 + value.len()].copy_from_slice(value);
        idx += 2 + value.len();
    }
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_attrs() -> [u8; ATTR_LIST_SIZE] {
        build_attr_list(&[
            (AttrKey::Algorithm, b"secp256k1-sha256"),
            (AttrKey::Platform, b"nrf52805"),
            (AttrKey::BaseAddr, &0x0001_9800u32.to_le_bytes()),
        ])
    }

    #[test]
    fn validate_header_round_trip() {
        let payload = [0x42u8; 30];
        let pl_crc = Crc32::of(&payload);
        let header = SectionHeader::build("boot", 102_213_405, 30, pl_crc, sample_attrs());
        assert!(header.validate_header());
        assert!(header.validate_payload(&payload));
    }

    #[test]
    fn s1_header_crc_flips_invalidate() {
        // Field values from the header CRC scenario; the reference
        // attribute-list contents aren't specified, so this exercises the
        // round-trip and single-bit-flip properties rather than the exact
        // struct_crc constant.
        let header = SectionHeader::build("boot", 102_213_405, 30, 0x77AC_5BCC, [0u8; ATTR_LIST_SIZE]);
        assert!(header.validate_header());

        let bytes = header.to_bytes();
        for i in 0..CRC_COVERED {
            let mut corrupt = bytes;
            corrupt[i] ^= 0x01;
            let corrupted = SectionHeader::from_bytes(&corrupt);
            assert!(!corrupted.validate_header(), "byte {i} should invalidate header");
        }
    }

    #[test]
    fn name_rules() {
        assert!(validate_name(b"boot\0\0\0\0\0\0\0\0\0\0\0\0"));
        assert!(!validate_name(b"\0ain\0\0\0\0\0\0\0\0\0\0\0\0"));
        assert!(!validate_name(b"1oot\0\0\0\0\0\0\0\0\0\0\0\0"));
        assert!(!validate_name(b"bo ot\0\0\0\0\0\0\0\0\0\0\0\0"));
        assert!(!validate_name(b"boot\0ZZZ\0\0\0\0\0\0\0\0"));
        assert!(!validate_name(b"sixteencharacters"[..16].try_into().unwrap()));
    }

    #[test]
    fn attribute_scanner_is_total_and_bounded() {
        let attrs = sample_attrs();
        assert!(validate_attributes(&attrs));

        let mut corrupt = attrs;
        corrupt[0] = 200; // unknown but nonzero key, oversized length follows
        corrupt[1] = 255;
        assert!(!validate_attributes(&corrupt));
    }

    #[test]
    fn get_attr_uint_decodes_little_endian() {
        let header = SectionHeader::build("boot", 1, 1, 0, sample_attrs());
        assert_eq!(header.get_attr_uint(AttrKey::BaseAddr), Some(0x0001_9800));
        assert_eq!(header.get_attr_uint(AttrKey::EntryPoint), None);
    }

    #[test]
    fn get_attr_str_rejects_embedded_nul() {
        let attrs = build_attr_list(&[(AttrKey::Algorithm, b"sec\0p256k1")]);
        let header = SectionHeader::build("boot", 1, 1, 0, attrs);
        assert_eq!(header.get_attr_str(AttrKey::Algorithm), None);
    }

    #[test]
    fn is_payload_and_is_signature() {
        let boot = SectionHeader::build("boot", 1, 1, 0, [0; ATTR_LIST_SIZE]);
        assert!(boot.is_payload());
        assert!(!boot.is_signature());

        let sign = SectionHeader::build("sign", util::VERSION_NA, 80, 0, [0; ATTR_LIST_SIZE]);
        assert!(sign.is_signature());
        assert!(!sign.is_payload());
    }
}
