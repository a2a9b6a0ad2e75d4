//! In-memory model of an upgrade file: a sequence of payload sections
//! followed by exactly one signature section, read from or written to a
//! flat byte buffer.
//!
//! `bl_core::section` validates a section header and its payload against a
//! platform or an open file one section at a time; this module adds the
//! host-side bookkeeping of walking a whole buffer section by section,
//! which the target never needs since it only ever sees one section's
//! payload at a time during the upgrade pipeline.

use bl_core::section::{self, AttrKey, SectionHeader};
use sha2::{Digest, Sha256};

use crate::Error;

/// One parsed section: its header plus the exact payload bytes that
/// followed it in the file.
pub struct Section {
    pub header: SectionHeader,
    pub payload: Vec<u8>,
}

impl Section {
    /// `SHA256(header ‖ payload)`, the same digest `hash_over_flash`
    /// produces on the target, computed here directly from the in-memory
    /// payload instead of streaming it off flash.
    pub fn hash(&self) -> section::Hash {
        let mut hasher = Sha256::new();
        hasher.update(self.header.to_bytes());
        hasher.update(&self.payload);
        section::Hash {
            digest: hasher.finalize().into(),
            sect_name: sect_name_bytes(self.header.name().unwrap_or_default()),
            pl_ver: self.header.pl_ver(),
        }
    }
}

fn sect_name_bytes(name: &str) -> [u8; 16] {
    let mut buf = [0u8; 16];
    buf[..name.len()].copy_from_slice(name.as_bytes());
    buf
}

/// Parse `data` into its sections, requiring the whole buffer to decompose
/// exactly into zero or more payload sections and at most one trailing
/// signature section, with no leftover bytes.
pub fn parse(data: &[u8]) -> Result<Vec<Section>, Error> {
    let mut sections = Vec::new();
    let mut offset = 0usize;
    let mut seen_sign = false;

    while offset < data.len() {
        let header_bytes: [u8; section::SIZE] =
            data.get(offset..offset + section::SIZE).ok_or(Error::Truncated)?.try_into().unwrap();
        let header = SectionHeader::from_bytes(&header_bytes);
        if !header.validate_header() {
            return Err(Error::BadHeader { offset });
        }
        let pl_start = offset + section::SIZE;
        let pl_size = header.pl_size() as usize;
        let payload = data.get(pl_start..pl_start + pl_size).ok_or(Error::Truncated)?.to_vec();
        if !header.validate_payload(&payload) {
            return Err(Error::BadPayload { offset });
        }

        if header.is_signature() {
            if seen_sign {
                return Err(Error::MultipleSignatureSections);
            }
            seen_sign = true;
        }

        offset = pl_start + pl_size;
        sections.push(Section { header, payload });
    }

    Ok(sections)
}

/// Serialize a list of sections back to a flat buffer, header immediately
/// followed by payload, in order.
pub fn serialize(sections: &[Section]) -> Vec<u8> {
    let mut out = Vec::with_capacity(sections.iter().map(|s| section::SIZE + s.payload.len()).sum());
    for s in sections {
        out.extend_from_slice(&s.header.to_bytes());
        out.extend_from_slice(&s.payload);
    }
    out
}

/// Build a payload section header for `name`/`version` over `payload`,
/// carrying `AttrKey::BaseAddr` and `AttrKey::Platform` always, and
/// `AttrKey::EntryPoint` when `entry_point` is given (a firmware image
/// whose reset vector differs from its load address).
pub fn build_payload_section(
    name: &str,
    version: u32,
    base_addr: u32,
    entry_point: Option<u32>,
    platform: &str,
    payload: &[u8],
) -> Section {
    let base_bytes = base_addr.to_le_bytes();
    let entry_bytes = entry_point.map(|e| e.to_le_bytes());
    let mut attrs: Vec<(AttrKey, &[u8])> = vec![(AttrKey::BaseAddr, &base_bytes), (AttrKey::Platform, platform.as_bytes())];
    if let Some(entry_bytes) = &entry_bytes {
        attrs.push((AttrKey::EntryPoint, entry_bytes));
    }
    let pl_crc = bl_consts::Crc32::of(payload);
    let header = SectionHeader::build(name, version, payload.len() as u32, pl_crc, section::build_attr_list(&attrs));
    Section { header, payload: payload.to_vec() }
}
