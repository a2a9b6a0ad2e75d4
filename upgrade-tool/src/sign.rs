//! `sign` subcommand: append one multisig signature record to an upgrade
//! file's signature section, creating the section if this is the first
//! signature.
//!
//! Mirrors `cosign2-bin`'s "add a second signature if the header already
//! has one, else sign fresh" shape, generalized from a fixed two-signature
//! header to this format's open-ended signature-record list.

use std::path::Path;

use bl_core::section::AttrKey;
use bl_core::sigverify::ALG_SECP256K1_SHA256;
use bl_core::util::VERSION_NA;
use secp256k1::{Message, SecretKey};
use sha2::{Digest, Sha256};

use crate::file::{self, Section};
use crate::{keys, Error};

const SIG_REC_SIZE: usize = 16 + 64;

pub fn run(input: &Path, secret_path: &Path, output: &Path) -> Result<(), Error> {
    let data = std::fs::read(input).map_err(|source| Error::ReadFile { path: input.to_path_buf(), source })?;
    let sections = file::parse(&data)?;
    let secret = keys::load_secret_key(secret_path)?;

    let out = file::serialize(&add_signature(sections, &secret, secret_path)?);
    std::fs::write(output, out).map_err(|source| Error::WriteFile { path: output.to_path_buf(), source })?;
    Ok(())
}

/// Split `sections` into payload sections and an existing signature
/// payload (if any), sign the file's hashes with `secret`, and return the
/// payload sections followed by the rebuilt signature section.
///
/// `secret_path` is only used to name the key in [`Error::AlreadySigned`].
fn add_signature(sections: Vec<Section>, secret: &SecretKey, secret_path: &Path) -> Result<Vec<Section>, Error> {
    let mut payload_sections: Vec<Section> = Vec::new();
    let mut sign_payload: Vec<u8> = Vec::new();
    for section in sections {
        if section.header.is_signature() {
            sign_payload = section.payload;
        } else {
            payload_sections.push(section);
        }
    }
    if payload_sections.is_empty() {
        return Err(Error::NoPayloadSections);
    }

    let hashes: Vec<_> = payload_sections.iter().map(Section::hash).collect();
    let message = bl_core::sigmsg::make_signature_message(&hashes).map_err(Error::SigMessage)?;
    let digest = bl_core::sigverify::bitcoin_message_digest(message.as_bytes());

    let pubkey = keys::uncompressed_public_key(secret);
    let fingerprint = fingerprint_of(&pubkey);
    if sign_payload.chunks(SIG_REC_SIZE).any(|rec| rec[..16] == fingerprint[..]) {
        return Err(Error::AlreadySigned { path: secret_path.to_path_buf() });
    }

    let secp = secp256k1::Secp256k1::new();
    let msg = Message::from_digest(digest);
    let signature = secp.sign_ecdsa(&msg, secret).serialize_compact();

    sign_payload.extend_from_slice(&fingerprint);
    sign_payload.extend_from_slice(&signature);

    let attrs = [(AttrKey::Algorithm, ALG_SECP256K1_SHA256.as_bytes())];
    let sign_header = bl_core::section::SectionHeader::build(
        "sign",
        VERSION_NA,
        sign_payload.len() as u32,
        bl_consts::Crc32::of(&sign_payload),
        bl_core::section::build_attr_list(&attrs),
    );
    payload_sections.push(Section { header: sign_header, payload: sign_payload });
    Ok(payload_sections)
}

fn fingerprint_of(pubkey: &[u8; 65]) -> [u8; 16] {
    let digest = Sha256::digest(pubkey);
    let mut fp = [0u8; 16];
    fp.copy_from_slice(&digest[..16]);
    fp
}

#[cfg(test)]
mod tests {
    use super::*;
    use bl_core::sigverify::{KeySet, PublicKey};
    use bl_core::upgrade::{Stage, Substage};
    use bl_core::util::{NullProgress, ProgressTag};

    fn test_key(seed: u8) -> SecretKey {
        let mut bytes = [seed; 32];
        bytes[31] = bytes[31].wrapping_add(11);
        SecretKey::from_slice(&bytes).unwrap()
    }

    fn boot_section() -> Section {
        file::build_payload_section("boot", 100_000_099, 0x2_7000, None, "nrf52805-prime", &[0xAAu8; 64])
    }

    #[test]
    fn signs_a_fresh_file_and_the_signature_verifies() {
        let secret = test_key(1);
        let pubkey = PublicKey::from_bytes(keys::uncompressed_public_key(&secret));
        let sections = add_signature(vec![boot_section()], &secret, Path::new("key.pem")).unwrap();

        let sign_section = sections.iter().find(|s| s.header.is_signature()).unwrap();
        let hashes: Vec<_> = sections.iter().filter(|s| !s.header.is_signature()).map(Section::hash).collect();
        let message = bl_core::sigmsg::make_signature_message(&hashes).unwrap();

        let list = [pubkey, PublicKey::end_of_list()];
        let keys = KeySet::new(&[&list]);
        let mut progress = NullProgress;
        let result = bl_core::sigverify::verify_multisig(
            "secp256k1-sha256",
            &sign_section.payload,
            &keys,
            message.as_bytes(),
            &mut progress,
            ProgressTag::new(Stage::VerifyingSignatures, Substage::Main),
        );
        assert_eq!(result, Ok(1));
    }

    #[test]
    fn second_signature_is_appended_not_replaced() {
        let secret_a = test_key(2);
        let secret_b = test_key(3);
        let sections = add_signature(vec![boot_section()], &secret_a, Path::new("a.pem")).unwrap();
        let sections = add_signature(sections, &secret_b, Path::new("b.pem")).unwrap();

        let sign_section = sections.iter().find(|s| s.header.is_signature()).unwrap();
        assert_eq!(sign_section.payload.len(), SIG_REC_SIZE * 2);
    }

    #[test]
    fn signing_twice_with_the_same_key_is_rejected() {
        let secret = test_key(4);
        let sections = add_signature(vec![boot_section()], &secret, Path::new("key.pem")).unwrap();
        let err = add_signature(sections, &secret, Path::new("key.pem")).unwrap_err();
        assert!(matches!(err, Error::AlreadySigned { .. }));
    }

    #[test]
    fn signing_with_no_payload_sections_fails() {
        let secret = test_key(5);
        let err = add_signature(vec![], &secret, Path::new("key.pem")).unwrap_err();
        assert!(matches!(err, Error::NoPayloadSections));
    }
}
