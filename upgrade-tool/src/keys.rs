//! PEM-encoded EC secret key loading, grounded on `cosign2-bin`'s own
//! `pem` + `sec1` pattern for reading a signer's private key off disk.

use std::path::Path;

use sec1::der::Decode;
use secp256k1::SecretKey;

use crate::Error;

/// Load a secp256k1 secret key from a PEM-encoded SEC1 `EC PRIVATE KEY`
/// file.
pub fn load_secret_key(path: &Path) -> Result<SecretKey, Error> {
    let contents = std::fs::read(path).map_err(|source| Error::ReadFile { path: path.to_path_buf(), source })?;
    let pem = pem::parse(contents).map_err(|source| Error::Pem { path: path.to_path_buf(), source })?;
    if pem.tag() != "EC PRIVATE KEY" {
        return Err(Error::WrongPemTag { path: path.to_path_buf(), tag: pem.tag().to_string() });
    }
    let ec_key =
        sec1::EcPrivateKey::from_der(pem.contents()).map_err(|source| Error::Sec1 { path: path.to_path_buf(), source })?;
    SecretKey::from_slice(ec_key.private_key).map_err(|_| Error::InvalidSecretKey { path: path.to_path_buf() })
}

/// Derive the 65-byte uncompressed public key for a secret key, in the
/// format `bl_core::sigverify::PublicKey` stores.
pub fn uncompressed_public_key(secret: &SecretKey) -> [u8; 65] {
    let secp = secp256k1::Secp256k1::new();
    secp256k1::PublicKey::from_secret_key(&secp, secret).serialize_uncompressed()
}
