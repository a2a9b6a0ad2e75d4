//! Deterministic construction of the Bech32 message that gets multisig-
//! verified over: a human-readable part naming every section and its
//! version, and a data part that is the SHA-256 of their concatenated
//! digests.

use bech32::Hrp;
use sha2::{Digest, Sha256};

use crate::section::Hash;
use crate::util::{self, VersionFormat};

/// Maximum length of the final Bech32-encoded message.
pub const MAX_MESSAGE_LEN: usize = 90;

/// Why `make_signature_message` could not build a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// A section name has no brief-name mapping.
    UnknownSectionName,
    /// A section's version is `VERSION_NA`.
    MissingVersion,
    /// The human-readable part exceeds Bech32's limits.
    HrpTooLong,
    /// The Bech32 library rejected the assembled HRP or data.
    EncodeFailed,
}

fn brief_name(sect_name: &str) -> Option<&'static str> {
    match sect_name {
        "boot" => Some("b"),
        "main" => Some(""),
        _ => None,
    }
}

fn sect_name_str(hash: &Hash) -> Option<&str> {
    let term = hash.sect_name.iter().position(|&b| b == 0)?;
    core::str::from_utf8(&hash.sect_name[..term]).ok()
}

/// Build the Bech32-encoded signature message for a set of section hashes,
/// in the order the sections were processed.
///
/// Renders into a fixed-capacity [`heapless::String`] rather than an
/// `alloc`-backed one: the core has no global allocator, matching the
/// original's preference for static buffers over heap allocation.
pub fn make_signature_message(hashes: &[Hash]) -> Result<heapless::String<MAX_MESSAGE_LEN>, Error> {
    let mut hrp_buf: heapless::String<83> = heapless::String::new();
    let mut digest_hasher = Sha256::new();

    for hash in hashes {
        let name = sect_name_str(hash).ok_or(Error::UnknownSectionName)?;
        let brief = brief_name(name).ok_or(Error::UnknownSectionName)?;
        if hash.pl_ver == util::VERSION_NA {
            return Err(Error::MissingVersion);
        }
        let version = util::version_to_str(hash.pl_ver, VersionFormat::Signature);

        hrp_buf
            .push_str(brief)
            .map_err(|_| Error::HrpTooLong)?;
        hrp_buf
            .push_str(&version)
            .map_err(|_| Error::HrpTooLong)?;
        hrp_buf.push_str("-").map_err(|_| Error::HrpTooLong)?;

        digest_hasher.update(hash.digest);
    }

    let digest = digest_hasher.finalize();
    let hrp = Hrp::parse(&hrp_buf).map_err(|_| Error::HrpTooLong)?;

    let mut message: heapless::String<MAX_MESSAGE_LEN> = heapless::String::new();
    bech32::encode_to_fmt::<bech32::Bech32, _>(&mut message, hrp, digest.as_slice())
        .map_err(|_| Error::EncodeFailed)?;

    Ok(message)
}

/// Just the human-readable part, exposed for tests and tooling that wants
/// to check it without caring about the Bech32 data part.
pub fn hrp_string(hashes: &[Hash]) -> Result<heapless::String<83>, Error> {
    let mut hrp_buf: heapless::String<83> = heapless::String::new();
    for hash in hashes {
        let name = sect_name_str(hash).ok_or(Error::UnknownSectionName)?;
        let brief = brief_name(name).ok_or(Error::UnknownSectionName)?;
        if hash.pl_ver == util::VERSION_NA {
            return Err(Error::MissingVersion);
        }
        let version = util::version_to_str(hash.pl_ver, VersionFormat::Signature);
        hrp_buf
            .push_str(brief)
            .map_err(|_| Error::HrpTooLong)?;
        hrp_buf
            .push_str(&version)
            .map_err(|_| Error::HrpTooLong)?;
        hrp_buf.push_str("-").map_err(|_| Error::HrpTooLong)?;
    }
    Ok(hrp_buf)
}
