//! Multisig verification over a Signature section's payload: the
//! `secp256k1-sha256` algorithm, key-set lookup, and duplicate-signature
//! rejection.
//!
//! Grounded on the original's single-translation-unit signature module,
//! which keeps its ECDSA context in a 480-byte static buffer rather than
//! allocating one; we do the same with `secp256k1`'s preallocated API so
//! `bl-core` never needs a global allocator just to verify a signature.

use secp256k1::ecdsa::Signature as EcdsaSignature;
use secp256k1::{Message, Secp256k1, VerifyOnly};
use sha2::{Digest, Sha256};

use crate::util::{ProgressSink, ProgressTag};

/// Size in bytes of an uncompressed secp256k1 public key.
pub const PUBKEY_SIZE: usize = 65;
/// Leading byte of a valid uncompressed public key.
const PUBKEY_PREFIX: u8 = 0x04;
/// Leading byte of the "end of list" sentinel record.
const PUBKEY_EOL_PREFIX: u8 = 0x00;

/// Size of the buffer `secp256k1` needs to hold a preallocated
/// verify-only context. Matches `BLSIG_ECDSA_BUF_SIZE` in the original.
pub const ECDSA_CTX_BUF_SIZE: usize = 480;

/// Size of one signature record inside a Signature section's payload:
/// a 16-byte fingerprint followed by a 64-byte compact signature.
const SIG_REC_SIZE: usize = 16 + 64;

/// Largest message length accepted by the Bitcoin-message varint prefix
/// this module always emits as a single byte.
const VARINT_MAX_ONE_BYTE: usize = 0xFC;

/// Digital signature algorithm identifier understood by
/// [`verify_multisig`].
pub const ALG_SECP256K1_SHA256: &str = "secp256k1-sha256";

/// A 65-byte uncompressed secp256k1 public key record, or the "end of
/// list" sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublicKey {
    bytes: [u8; PUBKEY_SIZE],
}

impl PublicKey {
    /// Build a key record from raw bytes without validating the prefix.
    pub const fn from_bytes(bytes: [u8; PUBKEY_SIZE]) -> Self {
        Self { bytes }
    }

    /// The "end of list" sentinel record that terminates one key list.
    pub const fn end_of_list() -> Self {
        let mut bytes = [0u8; PUBKEY_SIZE];
        bytes[0] = PUBKEY_EOL_PREFIX;
        Self { bytes }
    }

    /// `true` if this record terminates a key list.
    pub fn is_end_of_list(&self) -> bool {
        self.bytes[0] == PUBKEY_EOL_PREFIX
    }

    /// `true` if this record carries the uncompressed-key prefix.
    pub fn is_valid(&self) -> bool {
        self.bytes[0] == PUBKEY_PREFIX
    }

    pub fn as_bytes(&self) -> &[u8; PUBKEY_SIZE] {
        &self.bytes
    }

    fn fingerprint(&self) -> Fingerprint {
        let digest = Sha256::digest(self.bytes);
        let mut bytes = [0u8; 16];
        bytes.copy_from_slice(&digest[..16]);
        Fingerprint { bytes }
    }
}

/// First 16 bytes of SHA-256(public key), used to identify which key a
/// signature record claims to be signed by without embedding the key
/// itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Fingerprint {
    bytes: [u8; 16],
}

/// A list of pointers to public-key lists ("list of lists"), combining
/// e.g. a vendor key list and a maintainer key list into one scope to
/// search. Each inner slice must end with [`PublicKey::end_of_list`].
#[derive(Debug, Clone, Copy)]
pub struct KeySet<'a> {
    lists: &'a [&'a [PublicKey]],
}

impl<'a> KeySet<'a> {
    pub const fn new(lists: &'a [&'a [PublicKey]]) -> Self {
        Self { lists }
    }

    /// The underlying list of key lists, for composing a larger `KeySet`
    /// out of several scoped ones (e.g. vendor + maintainer).
    pub fn lists(&self) -> &'a [&'a [PublicKey]] {
        self.lists
    }

    fn find(&self, fp: &Fingerprint) -> Option<&PublicKey> {
        for list in self.lists {
            for key in list.iter() {
                if key.is_end_of_list() {
                    break;
                }
                if &key.fingerprint() == fp {
                    return Some(key);
                }
            }
        }
        None
    }
}

/// Why [`verify_multisig`] could not complete successfully.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyError {
    /// One or more arguments were invalid (payload not a positive
    /// multiple of the record size, empty message, message too long).
    BadArg,
    /// `algorithm` names an unsupported signature scheme.
    AlgoNotSupported,
    /// Two or more signature records share the same key fingerprint.
    DuplicatingSig,
    /// A signature record's fingerprint matched a known key but the
    /// signature itself did not verify.
    VerificationFail,
}

/// Verify every signature record in `sig_payload` against `message`,
/// using whichever keys in `keys` match each record's fingerprint.
///
/// Records whose fingerprint matches no key in `keys` are silently
/// skipped — only the payload author decides which keys actually sign.
/// A record whose fingerprint *does* match a key but fails to verify
/// fails the whole call immediately, matching the original's
/// fail-fast behavior.
///
/// Returns the number of signatures that verified successfully.
pub fn verify_multisig(
    algorithm: &str,
    sig_payload: &[u8],
    keys: &KeySet<'_>,
    message: &[u8],
    progress: &mut dyn ProgressSink,
    tag: ProgressTag,
) -> Result<u32, VerifyError> {
    if algorithm != ALG_SECP256K1_SHA256 {
        return Err(VerifyError::AlgoNotSupported);
    }
    if sig_payload.is_empty()
        || sig_payload.len() % SIG_REC_SIZE != 0
        || message.is_empty()
        || message.len() > VARINT_MAX_ONE_BYTE
    {
        return Err(VerifyError::BadArg);
    }

    let n_sig = sig_payload.len() / SIG_REC_SIZE;
    let records: heapless::Vec<(Fingerprint, [u8; 64]), 32> = {
        let mut v = heapless::Vec::new();
        for idx in 0..n_sig {
            let rec = &sig_payload[idx * SIG_REC_SIZE..(idx + 1) * SIG_REC_SIZE];
            let mut fp_bytes = [0u8; 16];
            fp_bytes.copy_from_slice(&rec[..16]);
            let mut sig_bytes = [0u8; 64];
            sig_bytes.copy_from_slice(&rec[16..]);
            if v.push((Fingerprint { bytes: fp_bytes }, sig_bytes)).is_err() {
                return Err(VerifyError::BadArg);
            }
        }
        v
    };

    if has_duplicate_fingerprint(&records) {
        return Err(VerifyError::DuplicatingSig);
    }

    let mut ctx_buf = [0u8; ECDSA_CTX_BUF_SIZE];
    let secp = Secp256k1::preallocated_verification_only(&mut ctx_buf)
        .map_err(|_| VerifyError::BadArg)?;

    let digest = bitcoin_message_digest(message);
    let msg = Message::from_digest(digest);

    let mut n_valid: u32 = 0;
    progress.report(tag, records.len() as u32, 0);
    for (idx, (fp, sig_bytes)) in records.iter().enumerate() {
        if let Some(pubkey) = keys.find(fp) {
            if verify_one(&secp, &msg, sig_bytes, pubkey) {
                n_valid += 1;
            } else {
                return Err(VerifyError::VerificationFail);
            }
        }
        progress.report(tag, records.len() as u32, (idx + 1) as u32);
    }

    Ok(n_valid)
}

fn has_duplicate_fingerprint(records: &[(Fingerprint, [u8; 64])]) -> bool {
    for i in 0..records.len() {
        for j in (i + 1)..records.len() {
            if records[i].0 == records[j].0 {
                return true;
            }
        }
    }
    false
}

fn verify_one(
    secp: &Secp256k1<VerifyOnly>,
    msg: &Message,
    sig_bytes: &[u8; 64],
    pubkey: &PublicKey,
) -> bool {
    let Ok(key) = secp256k1::PublicKey::from_slice(pubkey.as_bytes()) else {
        return false;
    };
    let Ok(sig) = EcdsaSignature::from_compact(sig_bytes) else {
        return false;
    };
    secp.verify_ecdsa(msg, &sig, &key).is_ok()
}

/// `SHA256(SHA256("\x18Bitcoin Signed Message:\n" + len_byte + message))`,
/// the digest ECDSA actually signs over for this algorithm. `message`
/// must be no longer than 252 bytes so its length fits the single-byte
/// varint prefix the original always emits.
///
/// Exposed (not just used internally) so host-side signing tools — which
/// need to produce signatures this module's `verify_multisig` will accept —
/// share the exact same digest contract instead of re-deriving it.
pub fn bitcoin_message_digest(message: &[u8]) -> [u8; 32] {
    const PREFIX: &[u8] = b"\x18Bitcoin Signed Message:\n";
    let mut inner = Sha256::new();
    inner.update(PREFIX);
    inner.update([message.len() as u8]);
    inner.update(message);
    let inner_digest = inner.finalize();

    let mut outer = Sha256::new();
    outer.update(inner_digest);
    outer.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::NullProgress;
    use secp256k1::SecretKey;

    /// Buffer for a preallocated signing context, used only by tests to
    /// build fixtures; large enough for secp256k1's full-capability
    /// context without relying on the `std`/`alloc` globals.
    const TEST_CTX_BUF_SIZE: usize = 1024;

    /// Deterministic key pairs for tests, avoiding a dependency on an RNG.
    fn make_key_pair_from(seed: u8) -> (SecretKey, PublicKey) {
        let mut bytes = [seed; 32];
        // Arbitrary perturbation so distinct seeds can't collide trivially.
        bytes[31] = bytes[31].wrapping_add(7);
        let sk = SecretKey::from_slice(&bytes).expect("valid scalar");
        let mut buf = [0u8; TEST_CTX_BUF_SIZE];
        let secp = Secp256k1::preallocated_signing_only(&mut buf).expect("context fits");
        let pk = secp256k1::PublicKey::from_secret_key(&secp, &sk);
        (sk, PublicKey::from_bytes(pk.serialize_uncompressed()))
    }

    fn sign(sk: &SecretKey, message: &[u8]) -> [u8; 64] {
        let mut buf = [0u8; TEST_CTX_BUF_SIZE];
        let secp = Secp256k1::preallocated_signing_only(&mut buf).expect("context fits");
        let digest = bitcoin_message_digest(message);
        let msg = Message::from_digest(digest);
        secp.sign_ecdsa(&msg, sk).serialize_compact()
    }

    fn record(pk: &PublicKey, sig: [u8; 64]) -> [u8; SIG_REC_SIZE] {
        let mut out = [0u8; SIG_REC_SIZE];
        out[..16].copy_from_slice(&pk.fingerprint().bytes);
        out[16..].copy_from_slice(&sig);
        out
    }

    #[test]
    fn rejects_unsupported_algorithm() {
        let keys = KeySet::new(&[]);
        let mut progress = NullProgress;
        let result = verify_multisig(
            "rsa-sha256",
            &[0u8; SIG_REC_SIZE],
            &keys,
            b"msg",
            &mut progress,
            ProgressTag::new(
                crate::upgrade::Stage::VerifyingSignatures,
                crate::upgrade::Substage::Main,
            ),
        );
        assert_eq!(result, Err(VerifyError::AlgoNotSupported));
    }

    #[test]
    fn rejects_malformed_payload_size() {
        let keys = KeySet::new(&[]);
        let mut progress = NullProgress;
        let result = verify_multisig(
            ALG_SECP256K1_SHA256,
            &[0u8; 10],
            &keys,
            b"msg",
            &mut progress,
            ProgressTag::new(
                crate::upgrade::Stage::VerifyingSignatures,
                crate::upgrade::Substage::Main,
            ),
        );
        assert_eq!(result, Err(VerifyError::BadArg));
    }

    #[test]
    fn verifies_a_known_good_signature() {
        let (sk, pk) = make_key_pair_from(1);
        let message = b"hello bootloader";
        let sig = sign(&sk, message);
        let payload = record(&pk, sig);
        let list = [pk, PublicKey::end_of_list()];
        let keys = KeySet::new(&[&list]);
        let mut progress = NullProgress;

        let result = verify_multisig(
            ALG_SECP256K1_SHA256,
            &payload,
            &keys,
            message,
            &mut progress,
            ProgressTag::new(
                crate::upgrade::Stage::VerifyingSignatures,
                crate::upgrade::Substage::Main,
            ),
        );
        assert_eq!(result, Ok(1));
    }

    #[test]
    fn unknown_fingerprint_is_silently_skipped() {
        let (sk, _pk) = make_key_pair_from(2);
        let (_other_sk, other_pk) = make_key_pair_from(3);
        let message = b"hello bootloader";
        let sig = sign(&sk, message);
        // Record carries a fingerprint for a key not present in `keys`.
        let (_, signer_pk) = make_key_pair_from(2);
        let payload = record(&signer_pk, sig);
        let list = [other_pk, PublicKey::end_of_list()];
        let keys = KeySet::new(&[&list]);
        let mut progress = NullProgress;

        let result = verify_multisig(
            ALG_SECP256K1_SHA256,
            &payload,
            &keys,
            message,
            &mut progress,
            ProgressTag::new(
                crate::upgrade::Stage::VerifyingSignatures,
                crate::upgrade::Substage::Main,
            ),
        );
        assert_eq!(result, Ok(0));
    }

    #[test]
    fn tampered_signature_for_a_known_key_fails() {
        let (sk, pk) = make_key_pair_from(4);
        let message = b"hello bootloader";
        let mut sig = sign(&sk, message);
        sig[0] ^= 0xFF;
        let payload = record(&pk, sig);
        let list = [pk, PublicKey::end_of_list()];
        let keys = KeySet::new(&[&list]);
        let mut progress = NullProgress;

        let result = verify_multisig(
            ALG_SECP256K1_SHA256,
            &payload,
            &keys,
            message,
            &mut progress,
            ProgressTag::new(
                crate::upgrade::Stage::VerifyingSignatures,
                crate::upgrade::Substage::Main,
            ),
        );
        assert_eq!(result, Err(VerifyError::VerificationFail));
    }

    #[test]
    fn duplicate_fingerprints_are_rejected_before_verification() {
        let (sk, pk) = make_key_pair_from(5);
        let message = b"hello bootloader";
        let sig = sign(&sk, message);
        let rec = record(&pk, sig);
        let mut payload = [0u8; SIG_REC_SIZE * 2];
        payload[..SIG_REC_SIZE].copy_from_slice(&rec);
        payload[SIG_REC_SIZE..].copy_from_slice(&rec);
        let list = [pk, PublicKey::end_of_list()];
        let keys = KeySet::new(&[&list]);
        let mut progress = NullProgress;

        let result = verify_multisig(
            ALG_SECP256K1_SHA256,
            &payload,
            &keys,
            message,
            &mut progress,
            ProgressTag::new(
                crate::upgrade::Stage::VerifyingSignatures,
                crate::upgrade::Substage::Main,
            ),
        );
        assert_eq!(result, Err(VerifyError::DuplicatingSig));
    }
}
