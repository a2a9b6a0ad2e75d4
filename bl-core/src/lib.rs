#![no_std]

//! Core of the dual-copy firmware bootloader: section format, signature
//! message and verification, integrity/version records, known-answer
//! tests, the upgrade state machine and the Start-up selector.
//!
//! Every type and function here is target-agnostic; it talks to hardware
//! only through the [`platform::PlatformServices`] trait, so the whole
//! crate is exercised against a simulated flash in `#[cfg(test)]`.

pub mod icr;
pub mod kats;
pub mod platform;
pub mod section;
pub mod sigmsg;
pub mod sigverify;
pub mod startup;
pub mod upgrade;
pub mod util;

pub use section::{Hash, SectionHeader};
pub use sigverify::{KeySet, PublicKey};
