#![no_std]

//! Flash memory map, bootloader-argument mailbox and embedded metadata
//! constants shared by `bl-core` and the `bootloader` binary.

pub mod crc32;
pub mod mailbox;
pub mod memmap;
pub mod tags;

pub use crc32::Crc32;
pub use mailbox::Mailbox;
pub use memmap::MemoryMap;
