//! Parsing for the small ad hoc formats the CLI accepts: a
//! `major.minor.patch[-rcN]` version string and a decimal-or-`0x`-hex
//! address.

use bl_core::util::Version;

use crate::Error;

/// Parse `"1.2.3"` or `"1.2.3-rc5"` into the encoded `u32` version value
/// `bl_core::util::Version::encode` produces.
pub fn version(s: &str) -> Result<u32, Error> {
    let (core, rc) = match s.split_once("-rc") {
        Some((core, rc)) => (core, rc.parse::<u32>().map_err(|_| Error::InvalidVersion(s.to_string()))?),
        None => (s, bl_core::util::VERSION_RC_RELEASE),
    };
    let mut parts = core.splitn(3, '.');
    let (Some(major), Some(minor), Some(patch), None) = (parts.next(), parts.next(), parts.next(), parts.next()) else {
        return Err(Error::InvalidVersion(s.to_string()));
    };
    let major = major.parse().map_err(|_| Error::InvalidVersion(s.to_string()))?;
    let minor = minor.parse().map_err(|_| Error::InvalidVersion(s.to_string()))?;
    let patch = patch.parse().map_err(|_| Error::InvalidVersion(s.to_string()))?;
    let encoded = Version { major, minor, patch, rc }.encode();
    if encoded == bl_core::util::VERSION_NA || encoded > bl_core::util::VERSION_MAX {
        return Err(Error::InvalidVersion(s.to_string()));
    }
    Ok(encoded)
}

/// Parse a `0x`-prefixed hex address or a plain decimal one.
pub fn address(s: &str) -> Result<u32, Error> {
    let s = s.trim();
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16).map_err(|_| Error::InvalidAddress(s.to_string()))
    } else {
        s.parse().map_err(|_| Error::InvalidAddress(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_release_version() {
        assert_eq!(version("1.22.134").unwrap(), Version { major: 1, minor: 22, patch: 134, rc: 99 }.encode());
    }

    #[test]
    fn parses_rc_version() {
        assert_eq!(version("1.22.134-rc5").unwrap(), 102_213_405);
    }

    #[test]
    fn rejects_malformed_version() {
        assert!(version("1.22").is_err());
        assert!(version("not.a.version").is_err());
    }

    #[test]
    fn parses_hex_and_decimal_addresses() {
        assert_eq!(address("0x19800").unwrap(), 0x0001_9800);
        assert_eq!(address("103424").unwrap(), 103_424);
        assert!(address("nope").is_err());
    }
}
