//! Error type for the whole binary.
//!
//! Grounded on the teacher's `cosign2-bin::args::Error` (hand-rolled,
//! one variant per failure site) but expressed with `thiserror` per
//! `SPEC_FULL.md`'s ambient-stack choice for host/std-enabled crates.

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to read {path}: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },

    #[error("failed to write {path}: {source}")]
    WriteFile { path: PathBuf, source: std::io::Error },

    #[error("{path} is not valid PEM: {source}")]
    Pem { path: PathBuf, source: pem::PemError },

    #[error("{path} has PEM tag \"{tag}\", expected \"EC PRIVATE KEY\"")]
    WrongPemTag { path: PathBuf, tag: String },

    #[error("{path} is not a valid SEC1 EC private key: {source}")]
    Sec1 { path: PathBuf, source: sec1::der::Error },

    #[error("{path} does not contain a valid secp256k1 secret key")]
    InvalidSecretKey { path: PathBuf },

    #[error("file is truncated: expected more data than it contains")]
    Truncated,

    #[error("section header at byte offset {offset} failed validation")]
    BadHeader { offset: usize },

    #[error("section payload at byte offset {offset} failed its CRC check")]
    BadPayload { offset: usize },

    #[error("file contains more than one signature section")]
    MultipleSignatureSections,

    #[error("file contains no payload sections to sign")]
    NoPayloadSections,

    #[error("\"{0}\" is not a valid version (expected e.g. \"1.2.3\" or \"1.2.3-rc5\")")]
    InvalidVersion(String),

    #[error("\"{0}\" is not a valid address (expected e.g. \"0x19800\" or \"103424\")")]
    InvalidAddress(String),

    #[error("at least one of --boot or --main must be given")]
    NothingToBuild,

    #[error("specify exactly one of --in-place or --output")]
    MissingOutput,

    #[error("failed to build the signature message: {0:?}")]
    SigMessage(bl_core::sigmsg::Error),

    #[error("key at {path} has already signed this file (duplicate fingerprint)")]
    AlreadySigned { path: PathBuf },

    #[error("{0}")]
    Cli(#[from] clap::Error),
}
