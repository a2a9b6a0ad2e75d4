//! CRC-32 used throughout the section, ICR/VCR and mailbox formats.
//!
//! This is the Ethernet polynomial in reflected form with the initial value
//! pinned to zero rather than the usual 0xFFFFFFFF — not one of the named
//! algorithms `crc` ships (`CRC_32_ISO_HDLC`/`CRC_32_ISCSI` both use
//! init = xorout = 0xFFFFFFFF), so it is defined here as a one-off
//! `Algorithm`.

use crc::{Algorithm, Crc};

const ALGORITHM: Algorithm<u32> = Algorithm {
    width: 32,
    poly: 0x04c1_1db7,
    init: 0x0000_0000,
    refin: true,
    refout: true,
    xorout: 0x0000_0000,
    check: 0x2dfd_2d88,
    residue: 0x0000_0000,
};

static CRC: Crc<u32> = Crc::<u32>::new(&ALGORITHM);

/// Running CRC-32 accumulator.
///
/// Mirrors the original `crc32_fast(data, length, previousCrc32)` contract:
/// each chunk is folded into a running value seeded with zero, so streaming a
/// buffer in pieces produces the same result as hashing it in one call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Crc32(u32);

impl Crc32 {
    /// A fresh accumulator, equivalent to `previousCrc32 = 0`.
    pub const fn new() -> Self {
        Self(0)
    }

    /// CRC-32 of a single contiguous buffer.
    pub fn of(data: &[u8]) -> u32 {
        let mut digest = CRC.digest();
        digest.update(data);
        digest.finalize()
    }

    /// Fold another chunk into the running value.
    pub fn update(&mut self, data: &[u8]) {
        let mut digest = CRC.digest_with_initial(self.0);
        digest.update(data);
        self.0 = digest.finalize();
    }

    /// Current accumulated value.
    pub const fn value(self) -> u32 {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_reference_check_value() {
        assert_eq!(Crc32::of(b"123456789"), ALGORITHM.check);
    }

    #[test]
    fn empty_input_is_zero() {
        assert_eq!(Crc32::of(b""), 0);
    }

    #[test]
    fn streaming_matches_one_shot() {
        let data = b"the quick brown fox jumps over the lazy dog";
        let mut running = Crc32::new();
        for chunk in data.chunks(7) {
            running.update(chunk);
        }
        assert_eq!(running.value(), Crc32::of(data));
    }

    #[test]
    fn single_bit_flip_changes_result() {
        let mut data = *b"specter upgrade payload bytes!!";
        let base = Crc32::of(&data);
        data[3] ^= 0x01;
        assert_ne!(Crc32::of(&data), base);
    }
}
