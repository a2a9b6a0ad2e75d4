// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

//! Trust anchors baked into this binary: the vendor key list an upgrade
//! file's signature section is checked against, plus an optional
//! maintainer list for field-support re-signing.
//!
//! Real key material is provisioned per batch at manufacturing time by
//! overwriting these arrays before the final image is linked, the same
//! place the teacher's UICR secret-provisioning step ran. The bytes below
//! are placeholders only: well-formed (`0x04`-prefixed uncompressed)
//! records so `bl_core::sigverify::KeySet` construction and fingerprinting
//! exercise real code paths, terminated by `PublicKey::end_of_list()`.

use bl_core::sigverify::PublicKey;

const fn key(fill: u8) -> PublicKey {
    let mut bytes = [fill; bl_core::sigverify::PUBKEY_SIZE];
    bytes[0] = 0x04;
    PublicKey::from_bytes(bytes)
}

pub static VENDOR_KEYS: [PublicKey; 3] = [key(0xA1), key(0xA2), PublicKey::end_of_list()];

pub static MAINTAINER_KEYS: [PublicKey; 2] = [key(0xB1), PublicKey::end_of_list()];
