// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

//! Hardware jump into a firmware image's vector table.
//!
//! Isolated in a single platform-specific module per DESIGN NOTES §9: every
//! other part of the Start-up selector and the Bootloader's upgrade
//! pipeline is portable and talks to this only through
//! [`launch`]/[`jump_to_vector_table`]. Adapted from the teacher's
//! `jump_app.rs`, dropping the SoftDevice/MBR vector-table-forwarding dance
//! (this target has no SoftDevice) down to the plain Cortex-M "disable
//! interrupts, load MSP and reset vector, branch" sequence.

use defmt::info;

/// Jump to the vector table at `addr`, passing `argument` nowhere in
/// particular (Cortex-M reset entry takes no arguments; firmware images
/// that need it read it back out of the mailbox at [`crate::consts::MAILBOX_ADDR`]
/// themselves, the same place the Start-up selector wrote it).
///
/// # Safety
/// `addr` must point at a valid Cortex-M vector table (initial SP at
/// `addr`, reset vector at `addr + 4`) belonging to an image that has
/// already passed integrity verification. Never returns.
pub unsafe fn jump_to_vector_table(addr: u32, argument: u32) -> ! {
    let _ = argument;
    cortex_m::interrupt::disable();

    let msp = *(addr as *const u32);
    let rv = *((addr + 4) as *const u32);
    info!("launch: vector table at {=u32:x} (msp={=u32:x}, rv={=u32:x})", addr, msp, rv);

    core::arch::asm!(
        "mrs {tmp}, CONTROL",
        "bics {tmp}, {spsel}",
        "msr CONTROL, {tmp}",
        "isb",
        "msr MSP, {msp}",
        "mov lr, {new_lr}",
        "bx {rv}",
        tmp = in(reg) 0,
        spsel = in(reg) 2,
        new_lr = in(reg) 0xFFFF_FFFFu32,
        msp = in(reg) msp,
        rv = in(reg) rv,
        options(noreturn),
    );
}
