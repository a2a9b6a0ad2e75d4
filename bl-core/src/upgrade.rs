//! The upgrade state machine: parses an upgrade file, enforces
//! compatibility/version/integrity policy, erases and rewrites flash, and
//! creates fresh Integrity Check Records — all as one linear, non-retrying
//! pipeline reported through [`util::ProgressSink`].
//!
//! The pipeline never journals partial progress. Safety instead comes from
//! the ordering "erase -> write -> verify -> ICR": an [`Icr`](crate::icr::Icr)
//! only appears once a written section's payload and CRC match in flash, so
//! an upgrade interrupted at any point before that leaves the section
//! without a valid ICR, and the Start-up selector (§4.5) falls back to
//! whichever Bootloader slot it did not touch.

use bl_consts::MemoryMap;

use crate::icr::{self, Placement};
use crate::kats::KatFailure;
use crate::platform::{FileHandle, PlatformServices, ReadProtectionLevel};
use crate::section::{self, AttrKey, SectionHeader};
use crate::sigverify::{self, KeySet, VerifyError};
use crate::util::{self, NullProgress, ProgressSink, ProgressTag, Version};

/// One stage of the upgrade pipeline, in execution order. The associated
/// weight (summing to 100 across all nine) drives the unified 0..10000
/// progress value reported to the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    ReadingFile,
    VerifyingIntegrity,
    RemovingWriteProtection,
    ErasingFlash,
    WritingFlash,
    CalculatingHashes,
    VerifyingSignatures,
    CreatingIntegrityRecords,
    ApplyingWriteProtection,
}

impl Stage {
    const ORDERED: [Stage; 9] = [
        Stage::ReadingFile,
        Stage::VerifyingIntegrity,
        Stage::RemovingWriteProtection,
        Stage::ErasingFlash,
        Stage::WritingFlash,
        Stage::CalculatingHashes,
        Stage::VerifyingSignatures,
        Stage::CreatingIntegrityRecords,
        Stage::ApplyingWriteProtection,
    ];

    /// Nominal weight out of 100, per spec.md §4.6's stage table.
    pub const fn weight(self) -> u32 {
        match self {
            Stage::ReadingFile => 2,
            Stage::VerifyingIntegrity => 21,
            Stage::RemovingWriteProtection => 1,
            Stage::ErasingFlash => 30,
            Stage::WritingFlash => 36,
            Stage::CalculatingHashes => 5,
            Stage::VerifyingSignatures => 2,
            Stage::CreatingIntegrityRecords => 2,
            Stage::ApplyingWriteProtection => 1,
        }
    }

    /// Sum of every preceding stage's weight.
    fn base_weight(self) -> u32 {
        Self::ORDERED.iter().take_while(|&&s| s != self).map(|s| s.weight()).sum()
    }
}

/// Which per-stage workload a progress update belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Substage {
    /// The stage isn't split by section (e.g. removing write protection).
    None,
    Boot,
    Main,
}

/// Which firmware role a section plays. Mirrors the two payload section
/// names spec.md §3 recognizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Boot,
    Main,
}

impl Role {
    fn section_name(self) -> &'static str {
        match self {
            Role::Boot => "boot",
            Role::Main => "main",
        }
    }

    fn substage(self) -> Substage {
        match self {
            Role::Boot => Substage::Boot,
            Role::Main => Substage::Main,
        }
    }
}

/// Version-check outcome for one section, ranked by severity. Declaration
/// order is the severity order the derived `Ord` uses: `Same < Newer <
/// RcBlocked < Older < Invalid`; aggregating across sections picks the
/// numerically greatest (most severe) variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum VersionCheckResult {
    Same,
    Newer,
    RcBlocked,
    Older,
    Invalid,
}

fn check_version(file_ver: u32, installed_ver: Option<u32>, rc_allowed: bool) -> VersionCheckResult {
    let Some(file_version) = Version::decode(file_ver) else {
        return VersionCheckResult::Invalid;
    };
    if !file_version.is_release() && !rc_allowed {
        return VersionCheckResult::RcBlocked;
    }
    match installed_ver {
        None => VersionCheckResult::Newer,
        Some(installed) if file_ver > installed => VersionCheckResult::Newer,
        Some(installed) if file_ver == installed => VersionCheckResult::Same,
        Some(_) => VersionCheckResult::Older,
    }
}

/// Compile/runtime policy knobs the upgrade pipeline enforces. The
/// Rust-native analogue of the original's `bl_flags_t` bitmask.
#[derive(Debug, Clone, Copy)]
pub struct UpgradePolicy {
    /// Whether release-candidate versions are accepted at all.
    pub rc_allowed: bool,
    /// Whether to reapply write protection after a successful upgrade.
    pub write_protect_on_completion: bool,
    /// Minimum valid-signature count required when the upgrade includes
    /// the Bootloader.
    pub bootloader_sig_threshold: u32,
    /// Minimum valid-signature count required when the upgrade includes
    /// only the Main Firmware.
    pub main_fw_sig_threshold: u32,
}

/// Why the upgrade pipeline stopped short of success. Every non-`Kat`
/// variant maps to one of §7's error categories and is surfaced to the
/// caller as an alert or fatal message; the pipeline itself never panics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpgradeError {
    /// No sections, an unparseable header, a file that doesn't decompose
    /// exactly into payload sections plus one signature section, or an
    /// oversized/malformed signature payload.
    BadFormat,
    /// A payload section's `platform`/`base_addr` attribute doesn't match
    /// this device, or it doesn't fit in its allocated flash region.
    Incompatible,
    /// At least one present section's file version is not newer than what
    /// is installed.
    VersionOlder,
    /// At least one present section's version is a release candidate and
    /// RC upgrades are disabled.
    VersionRcBlocked,
    /// A section's encoded version is out of range.
    VersionInvalid,
    /// `verify_multisig` returned fewer valid signatures than the
    /// applicable threshold.
    SignatureInsufficient,
    /// `verify_multisig` itself failed (duplicate fingerprint, bad
    /// algorithm, tampered signature, malformed payload).
    Signature(VerifyError),
    /// A flash erase, write or protection-state change failed.
    FlashOperationFailed,
    /// A Known-Answer Test failed; this is an invariant violation, not a
    /// recoverable policy outcome.
    Kat(KatFailure),
}

/// Before/after summary the pipeline fills in as it runs, formatted by the
/// `bootloader` binary into the final user-facing alert.
#[derive(Debug, Clone, Copy, Default)]
pub struct Report {
    pub boot_before: Option<u32>,
    pub boot_after: Option<u32>,
    pub main_before: Option<u32>,
    pub main_after: Option<u32>,
    pub write_protected: bool,
    pub read_protection: Option<ReadProtectionLevel>,
}

struct FoundSection {
    role: Role,
    header: SectionHeader,
    file_offset: u64,
}

#[derive(Clone, Copy)]
enum Action {
    Install,
    /// Version is `Same` and the installed section already verifies
    /// intact — the original's "self-heal" path skips a no-op rewrite.
    Skip,
}

struct Plan {
    role: Role,
    header: SectionHeader,
    file_offset: u64,
    flash_addr: u32,
    flash_region_size: u32,
    installed_ver: Option<u32>,
    action: Action,
}

/// Drives one upgrade-file installation against a concrete platform. Owns
/// the single shared I/O buffer used for every chunked copy/hash/CRC
/// operation — the Rust-native replacement for the original's two C
/// statics (DESIGN NOTES §9).
pub struct Upgrade<'p, P: PlatformServices> {
    platform: &'p mut P,
    map: MemoryMap,
    policy: UpgradePolicy,
    vendor_keys: KeySet<'p>,
    maintainer_keys: Option<KeySet<'p>>,
    /// Base address of the Bootloader slot currently running this code,
    /// if known — the inactive slot is the only one ever written.
    active_bootloader_slot: Option<u32>,
    io_buf: [u8; section::DEFAULT_CHUNK_SIZE],
}

impl<'p, P: PlatformServices> Upgrade<'p, P> {
    pub fn new(
        platform: &'p mut P,
        map: MemoryMap,
        policy: UpgradePolicy,
        vendor_keys: KeySet<'p>,
        maintainer_keys: Option<KeySet<'p>>,
        active_bootloader_slot: Option<u32>,
    ) -> Self {
        Self {
            platform,
            map,
            policy,
            vendor_keys,
            maintainer_keys,
            active_bootloader_slot,
            io_buf: [0u8; section::DEFAULT_CHUNK_SIZE],
        }
    }

    fn inactive_bootloader_slot(&self) -> u32 {
        let slots = self.map.bootloader_slots();
        match self.active_bootloader_slot {
            Some(active) => slots.into_iter().find(|&s| s != active).unwrap_or(slots[0]),
            None => slots[0],
        }
    }

    fn expected_base_addr(&self, role: Role) -> u32 {
        match role {
            Role::Boot => self.map.bootloader_image_base,
            Role::Main => self.map.firmware_base,
        }
    }

    fn flash_region(&self, role: Role) -> (u32, u32) {
        match role {
            Role::Boot => (self.inactive_bootloader_slot(), self.map.bootloader_size),
            Role::Main => (self.map.firmware_base, self.map.firmware_size),
        }
    }

    fn installed_version(&mut self, role: Role) -> Option<u32> {
        let (addr, size) = self.flash_region(role);
        icr::icr_get_version(self.platform, addr, size)
    }

    /// Run the full pipeline against an already-opened, already-sought
    /// (to its start) upgrade file. `progress` receives every stage's
    /// weighted update.
    pub fn run(&mut self, file: &mut P::File, progress: &mut dyn ProgressSink) -> Result<Report, UpgradeError> {
        let sections = self.read_metadata(file, progress)?;
        let plans = self.plan(&sections)?;

        self.verify_file_payloads(file, &plans, progress)?;
        self.unprotect(&plans, progress)?;
        self.erase(&plans, progress)?;
        self.write(file, &plans, progress)?;
        let hashes = self.rehash(&plans, progress)?;
        self.verify_signatures(file, &sections, &hashes, &plans, progress)?;
        self.create_icrs(&plans, progress)?;
        let report = self.finish(&plans, progress)?;
        Ok(report)
    }

    fn read_metadata(
        &mut self,
        file: &mut P::File,
        progress: &mut dyn ProgressSink,
    ) -> Result<(heapless::Vec<FoundSection, 2>, SignatureSection), UpgradeError> {
        let mut payloads: heapless::Vec<FoundSection, 2> = heapless::Vec::new();
        let mut signature: Option<SignatureSection> = None;

        if !file.seek(0) {
            return Err(UpgradeError::BadFormat);
        }

        loop {
            if file.tell() == file.size() {
                break;
            }
            let mut header_buf = [0u8; section::SIZE];
            let offset = file.tell();
            let read = file.read(&mut header_buf).ok_or(UpgradeError::BadFormat)?;
            if read != section::SIZE {
                return Err(UpgradeError::BadFormat);
            }
            let header = SectionHeader::from_bytes(&header_buf);
            if !header.validate_header() {
                return Err(UpgradeError::BadFormat);
            }

            if header.is_signature() {
                if signature.is_some() {
                    return Err(UpgradeError::BadFormat);
                }
                let pl_size = header.pl_size() as usize;
                if pl_size == 0 || pl_size % 80 != 0 || pl_size > 32 * 80 {
                    return Err(UpgradeError::BadFormat);
                }
                let mut buf = [0u8; 32 * 80];
                let read = file.read(&mut buf[..pl_size]).ok_or(UpgradeError::BadFormat)?;
                if read != pl_size || !header.validate_payload(&buf[..pl_size]) {
                    return Err(UpgradeError::BadFormat);
                }
                signature = Some(SignatureSection {
                    header,
                    payload: {
                        let mut v: heapless::Vec<u8, { 32 * 80 }> = heapless::Vec::new();
                        v.extend_from_slice(&buf[..pl_size]).map_err(|_| UpgradeError::BadFormat)?;
                        v
                    },
                });
                progress.report(ProgressTag::new(Stage::ReadingFile, Substage::None), 2, 2);
                continue;
            }

            let role = match header.name() {
                Some("boot") => Role::Boot,
                Some("main") => Role::Main,
                _ => return Err(UpgradeError::BadFormat),
            };
            if payloads.iter().any(|s| s.role == role) {
                return Err(UpgradeError::BadFormat);
            }
            let pl_size = header.pl_size() as u64;
            if !file.seek(offset + section::SIZE as u64 + pl_size) {
                return Err(UpgradeError::BadFormat);
            }
            payloads
                .push(FoundSection {
                    role,
                    header,
                    file_offset: offset + section::SIZE as u64,
                })
                .map_err(|_| UpgradeError::BadFormat)?;
            progress.report(ProgressTag::new(Stage::ReadingFile, Substage::None), 2, 1);
        }

        if payloads.is_empty() {
            return Err(UpgradeError::BadFormat);
        }
        let signature = signature.ok_or(UpgradeError::BadFormat)?;
        Ok((payloads, signature))
    }

    fn plan(&mut self, sections: &(heapless::Vec<FoundSection, 2>, SignatureSection)) -> Result<heapless::Vec<Plan, 2>, UpgradeError> {
        let (payloads, _signature) = sections;
        let mut plans: heapless::Vec<Plan, 2> = heapless::Vec::new();
        let mut worst = VersionCheckResult::Same;

        for found in payloads {
            let platform_attr = found.header.get_attr_str(AttrKey::Platform).ok_or(UpgradeError::Incompatible)?;
            if platform_attr != self.platform.platform_id() {
                return Err(UpgradeError::Incompatible);
            }
            let base_addr = found.header.get_attr_uint(AttrKey::BaseAddr).ok_or(UpgradeError::Incompatible)?;
            if base_addr != u64::from(self.expected_base_addr(found.role)) {
                return Err(UpgradeError::Incompatible);
            }
            let (flash_addr, flash_region_size) = self.flash_region(found.role);
            if !icr::check_sect_size(flash_region_size, found.header.pl_size()) {
                return Err(UpgradeError::Incompatible);
            }

            let installed_ver = self.installed_version(found.role);
            let result = check_version(found.header.pl_ver(), installed_ver, self.policy.rc_allowed);
            worst = worst.max(result);

            let action = match result {
                VersionCheckResult::Same => {
                    if icr::icr_verify(self.platform, flash_addr, flash_region_size).is_some() {
                        Action::Skip
                    } else {
                        Action::Install
                    }
                }
                VersionCheckResult::Newer => Action::Install,
                _ => Action::Install, // overridden by the `worst` abort check below
            };

            plans
                .push(Plan {
                    role: found.role,
                    header: found.header,
                    file_offset: found.file_offset,
                    flash_addr,
                    flash_region_size,
                    installed_ver,
                    action,
                })
                .map_err(|_| UpgradeError::BadFormat)?;
        }

        match worst {
            VersionCheckResult::Invalid => return Err(UpgradeError::VersionInvalid),
            VersionCheckResult::Older => return Err(UpgradeError::VersionOlder),
            VersionCheckResult::RcBlocked => return Err(UpgradeError::VersionRcBlocked),
            VersionCheckResult::Same | VersionCheckResult::Newer => {}
        }

        Ok(plans)
    }

    fn verify_file_payloads(
        &mut self,
        file: &mut P::File,
        plans: &[Plan],
        progress: &mut dyn ProgressSink,
    ) -> Result<(), UpgradeError> {
        for plan in plans {
            if matches!(plan.action, Action::Skip) {
                continue;
            }
            if !file.seek(plan.file_offset) {
                return Err(UpgradeError::BadFormat);
            }
            let tag = ProgressTag::new(Stage::VerifyingIntegrity, plan.role.substage());
            if !plan
                .header
                .validate_payload_from_file(file, progress, tag, section::DEFAULT_CHUNK_SIZE)
            {
                return Err(UpgradeError::BadFormat);
            }
        }
        Ok(())
    }

    fn unprotect(&mut self, plans: &[Plan], progress: &mut dyn ProgressSink) -> Result<(), UpgradeError> {
        for plan in plans {
            if matches!(plan.action, Action::Skip) {
                continue;
            }
            if !self.platform.flash_write_protect(plan.flash_addr, plan.flash_region_size, false) {
                return Err(UpgradeError::FlashOperationFailed);
            }
            progress.report(ProgressTag::new(Stage::RemovingWriteProtection, plan.role.substage()), 1, 1);
        }
        Ok(())
    }

    fn erase(&mut self, plans: &[Plan], progress: &mut dyn ProgressSink) -> Result<(), UpgradeError> {
        for plan in plans {
            if matches!(plan.action, Action::Skip) {
                continue;
            }
            let tag = ProgressTag::new(Stage::ErasingFlash, plan.role.substage());
            if !self.platform.flash_erase(plan.flash_addr, plan.flash_region_size) {
                return Err(UpgradeError::FlashOperationFailed);
            }
            progress.report(tag, 1, 1);
        }
        Ok(())
    }

    fn write(&mut self, file: &mut P::File, plans: &[Plan], progress: &mut dyn ProgressSink) -> Result<(), UpgradeError> {
        for plan in plans {
            if matches!(plan.action, Action::Skip) {
                continue;
            }
            if !file.seek(plan.file_offset) {
                return Err(UpgradeError::BadFormat);
            }
            let total = plan.header.pl_size();
            let mut complete: u32 = 0;
            let tag = ProgressTag::new(Stage::WritingFlash, plan.role.substage());
            while complete < total {
                let want = (total - complete).min(self.io_buf.len() as u32) as usize;
                let read = file.read(&mut self.io_buf[..want]).ok_or(UpgradeError::BadFormat)?;
                if read != want {
                    return Err(UpgradeError::BadFormat);
                }
                if !self.platform.flash_write(plan.flash_addr + complete, &self.io_buf[..want]) {
                    return Err(UpgradeError::FlashOperationFailed);
                }
                complete += want as u32;
                progress.report(tag, total, complete);
            }
        }
        Ok(())
    }

    fn rehash(&mut self, plans: &[Plan], progress: &mut dyn ProgressSink) -> Result<heapless::Vec<section::Hash, 2>, UpgradeError> {
        let mut hashes: heapless::Vec<section::Hash, 2> = heapless::Vec::new();
        for plan in plans {
            let tag = ProgressTag::new(Stage::CalculatingHashes, plan.role.substage());
            let hash = plan
                .header
                .hash_over_flash(self.platform, plan.flash_addr, progress, tag)
                .ok_or(UpgradeError::FlashOperationFailed)?;
            hashes.push(hash).map_err(|_| UpgradeError::BadFormat)?;
        }
        Ok(hashes)
    }

    fn verify_signatures(
        &mut self,
        _file: &mut P::File,
        sections: &(heapless::Vec<FoundSection, 2>, SignatureSection),
        hashes: &[section::Hash],
        plans: &[Plan],
        progress: &mut dyn ProgressSink,
    ) -> Result<(), UpgradeError> {
        let (_, signature) = sections;
        let message = crate::sigmsg::make_signature_message(hashes).map_err(|_| UpgradeError::BadFormat)?;

        let algorithm = signature.header.get_attr_str(AttrKey::Algorithm).unwrap_or(sigverify::ALG_SECP256K1_SHA256);

        let includes_boot = plans.iter().any(|p| p.role == Role::Boot && !matches!(p.action, Action::Skip));
        let threshold = if includes_boot {
            self.policy.bootloader_sig_threshold
        } else {
            self.policy.main_fw_sig_threshold
        };

        let keys_lists: heapless::Vec<&[crate::sigverify::PublicKey], 2> = {
            let mut v: heapless::Vec<&[crate::sigverify::PublicKey], 2> = heapless::Vec::new();
            for list in self.vendor_keys.lists() {
                let _ = v.push(list);
            }
            if !includes_boot {
                if let Some(maintainer) = &self.maintainer_keys {
                    for list in maintainer.lists() {
                        let _ = v.push(list);
                    }
                }
            }
            v
        };
        let key_set = KeySet::new(keys_lists.as_slice());

        let tag = ProgressTag::new(Stage::VerifyingSignatures, Substage::None);
        let valid = sigverify::verify_multisig(algorithm, signature.payload.as_slice(), &key_set, message.as_bytes(), progress, tag)
            .map_err(UpgradeError::Signature)?;

        if valid < threshold {
            return Err(UpgradeError::SignatureInsufficient);
        }
        Ok(())
    }

    fn create_icrs(&mut self, plans: &[Plan], progress: &mut dyn ProgressSink) -> Result<(), UpgradeError> {
        for plan in plans {
            if matches!(plan.action, Action::Skip) {
                continue;
            }
            let tag = ProgressTag::new(Stage::CreatingIntegrityRecords, plan.role.substage());
            if !icr::icr_create(
                self.platform,
                plan.flash_addr,
                plan.flash_region_size,
                plan.header.pl_size(),
                plan.header.pl_ver(),
            ) {
                return Err(UpgradeError::FlashOperationFailed);
            }
            progress.report(tag, 1, 1);
        }
        Ok(())
    }

    fn finish(&mut self, plans: &[Plan], progress: &mut dyn ProgressSink) -> Result<Report, UpgradeError> {
        let mut report = Report::default();
        for plan in plans {
            let after = if matches!(plan.action, Action::Skip) {
                plan.installed_ver
            } else {
                Some(plan.header.pl_ver())
            };
            match plan.role {
                Role::Boot => {
                    report.boot_before = plan.installed_ver;
                    report.boot_after = after;
                }
                Role::Main => {
                    report.main_before = plan.installed_ver;
                    report.main_after = after;
                }
            }
        }

        if self.policy.write_protect_on_completion {
            for plan in plans {
                if matches!(plan.action, Action::Skip) {
                    continue;
                }
                if !self.platform.flash_write_protect(plan.flash_addr, plan.flash_region_size, true) {
                    return Err(UpgradeError::FlashOperationFailed);
                }
            }
            report.write_protected = true;
        }
        progress.report(ProgressTag::new(Stage::ApplyingWriteProtection, Substage::None), 1, 1);

        report.read_protection = Some(self.platform.flash_read_protection_level());
        Ok(report)
    }
}

struct SignatureSection {
    header: SectionHeader,
    payload: heapless::Vec<u8, { 32 * 80 }>,
}

/// Overall 0..10000 (0.01%) progress accumulator that combines a stage's
/// nominal weight with the size-proportional split between its Boot and
/// Main substages (default 50/50 when one or both sizes are unknown).
/// Implements [`ProgressSink`] so it can be handed directly to section,
/// hashing and signature-verification calls.
pub struct WeightedProgress {
    boot_permille: u32,
    main_permille: u32,
    boot_percent_x100: u16,
    main_percent_x100: u16,
    current_stage: Option<Stage>,
    overall_percent_x100: u16,
}

impl WeightedProgress {
    pub fn new(boot_size: Option<u32>, main_size: Option<u32>) -> Self {
        let (boot_permille, main_permille) = match (boot_size, main_size) {
            (Some(b), Some(m)) if b + m > 0 => (b * 1000 / (b + m), 1000 - b * 1000 / (b + m)),
            (Some(_), None) => (1000, 0),
            (None, Some(_)) => (0, 1000),
            _ => (500, 500),
        };
        Self {
            boot_permille,
            main_permille,
            boot_percent_x100: 0,
            main_percent_x100: 0,
            current_stage: None,
            overall_percent_x100: 0,
        }
    }

    pub fn overall_percent_x100(&self) -> u16 {
        self.overall_percent_x100
    }
}

impl ProgressSink for WeightedProgress {
    fn report(&mut self, tag: ProgressTag, total: u32, complete: u32) {
        if self.current_stage != Some(tag.stage) {
            self.current_stage = Some(tag.stage);
            self.boot_percent_x100 = 0;
            self.main_percent_x100 = 0;
        }
        let local = util::percent_x100(total.max(1), complete);
        match tag.substage {
            Substage::None => {
                self.boot_percent_x100 = local;
                self.main_percent_x100 = local;
            }
            Substage::Boot => self.boot_percent_x100 = local,
            Substage::Main => self.main_percent_x100 = local,
        }

        let stage_local = (u32::from(self.boot_percent_x100) * self.boot_permille + u32::from(self.main_percent_x100) * self.main_permille)
            / 1000;
        let base = tag.stage.base_weight();
        let weight = tag.stage.weight();
        let overall = base * 100 + (weight * stage_local) / 100;
        self.overall_percent_x100 = overall.min(10000) as u16;
    }
}

#[cfg(test)]
mod tests {
    extern crate std;

    use super::*;
    use crate::platform::tests::{SimFile, SimPlatform};
    use crate::section::{build_attr_list, AttrKey, SectionHeader};
    use crate::sigverify::PublicKey;
    use crate::util::Crc32;
    use secp256k1::{Message, Secp256k1, SecretKey};

    const CTX_BUF: usize = 1024;

    fn make_key_pair(seed: u8) -> (SecretKey, PublicKey) {
        let mut bytes = [seed; 32];
        bytes[31] = bytes[31].wrapping_add(11);
        let sk = SecretKey::from_slice(&bytes).unwrap();
        let mut buf = [0u8; CTX_BUF];
        let secp = Secp256k1::preallocated_signing_only(&mut buf).unwrap();
        let pk = secp256k1::PublicKey::from_secret_key(&secp, &sk);
        (sk, PublicKey::from_bytes(pk.serialize_uncompressed()))
    }

    fn sign_bitcoin(sk: &SecretKey, message: &[u8]) -> [u8; 64] {
        use sha2::{Digest, Sha256};
        const PREFIX: &[u8] = b"\x18Bitcoin Signed Message:\n";
        let mut inner = Sha256::new();
        inner.update(PREFIX);
        inner.update([message.len() as u8]);
        inner.update(message);
        let mut outer = Sha256::new();
        outer.update(inner.finalize());
        let digest: [u8; 32] = outer.finalize().into();
        let mut buf = [0u8; CTX_BUF];
        let secp = Secp256k1::preallocated_signing_only(&mut buf).unwrap();
        secp.sign_ecdsa(&Message::from_digest(digest), sk).serialize_compact()
    }

    fn test_map() -> MemoryMap {
        MemoryMap {
            firmware_base: 0,
            firmware_size: 16384,
            bootloader_image_base: 32768,
            bootloader_copy1_base: 32768,
            bootloader_copy2_base: 49152,
            bootloader_size: 8192,
        }
    }

    fn build_upgrade_file(main_payload: &[u8], main_ver: u32, signer: &SecretKey, pk: &PublicKey) -> std::vec::Vec<u8> {
        let attrs = build_attr_list(&[
            (AttrKey::Platform, b"sim-platform"),
            (AttrKey::BaseAddr, &0u64.to_le_bytes()),
        ]);
        let main_crc = Crc32::of(main_payload);
        let main_header = SectionHeader::build("main", main_ver, main_payload.len() as u32, main_crc, attrs);

        let mut file = std::vec::Vec::new();
        file.extend_from_slice(&main_header.to_bytes());
        file.extend_from_slice(main_payload);

        // Build the section hash the way `hash_over_flash` would, directly
        // from the in-memory bytes rather than through a simulated flash.
        use sha2::{Digest, Sha256};
        let mut hasher = Sha256::new();
        hasher.update(main_header.to_bytes());
        hasher.update(main_payload);
        let digest: [u8; 32] = hasher.finalize().into();
        let mut sect_name = [0u8; 16];
        sect_name[..4].copy_from_slice(b"main");
        let hash = section::Hash {
            digest,
            sect_name,
            pl_ver: main_ver,
        };
        let message = crate::sigmsg::make_signature_message(&[hash]).unwrap();
        let sig = sign_bitcoin(signer, message.as_bytes());
        let mut sig_payload = std::vec::Vec::new();
        sig_payload.extend_from_slice(&Sha256::digest(pk.as_bytes())[..16]);
        sig_payload.extend_from_slice(&sig);

        let sign_header = SectionHeader::build("sign", util::VERSION_NA, sig_payload.len() as u32, Crc32::of(&sig_payload), [0u8; 216]);
        file.extend_from_slice(&sign_header.to_bytes());
        file.extend_from_slice(&sig_payload);
        file
    }

    #[test]
    fn version_check_ranking_matches_spec_dominance_order() {
        assert!(VersionCheckResult::Same < VersionCheckResult::Newer);
        assert!(VersionCheckResult::Newer < VersionCheckResult::RcBlocked);
        assert!(VersionCheckResult::RcBlocked < VersionCheckResult::Older);
        assert!(VersionCheckResult::Older < VersionCheckResult::Invalid);
    }

    #[test]
    fn check_version_classifies_relative_to_installed() {
        assert_eq!(check_version(100_000_099, None, true), VersionCheckResult::Newer);
        assert_eq!(check_version(100_000_099, Some(100_000_099), true), VersionCheckResult::Same);
        assert_eq!(check_version(100_000_099, Some(200_000_099), true), VersionCheckResult::Older);
        assert_eq!(check_version(100_000_001, Some(50_000_099), false), VersionCheckResult::RcBlocked);
        assert_eq!(check_version(100_000_001, Some(50_000_099), true), VersionCheckResult::Newer);
    }

    #[test]
    fn check_version_blocks_rc_before_comparing_to_installed() {
        // An RC version equal to, or older than, what's installed must still
        // be `RcBlocked` when RC support is disabled — the RC gate applies
        // before the newer/same/older classification, not only to `Newer`.
        assert_eq!(check_version(100_000_001, Some(100_000_001), false), VersionCheckResult::RcBlocked);
        assert_eq!(check_version(100_000_001, Some(100_000_099), false), VersionCheckResult::RcBlocked);
        assert_eq!(check_version(100_000_001, Some(100_000_001), true), VersionCheckResult::Same);
    }

    #[test]
    fn end_to_end_upgrade_installs_main_firmware() {
        let (sk, pk) = make_key_pair(9);
        let main_payload = std::vec![0x5Au8; 512];
        let file_bytes = build_upgrade_file(&main_payload, 100_000_099, &sk, &pk);

        let mut platform = SimPlatform::new(128 * 1024);
        let list = [pk, PublicKey::end_of_list()];
        let vendor_keys = KeySet::new(std::slice::from_ref(&list.as_slice()));
        let policy = UpgradePolicy {
            rc_allowed: false,
            write_protect_on_completion: false,
            bootloader_sig_threshold: 1,
            main_fw_sig_threshold: 1,
        };

        let mut upgrade = Upgrade::new(&mut platform, test_map(), policy, vendor_keys, None, None);
        let mut file = SimFile::new(file_bytes);
        let mut progress = WeightedProgress::new(None, Some(main_payload.len() as u32));
        let report = upgrade.run(&mut file, &mut progress).expect("upgrade should succeed");

        assert_eq!(report.main_after, Some(100_000_099));
        assert_eq!(progress.overall_percent_x100(), 10000);
    }

    #[test]
    fn older_version_aborts_without_touching_flash() {
        let (sk, pk) = make_key_pair(10);
        let main_payload = std::vec![0x11u8; 64];
        let file_bytes = build_upgrade_file(&main_payload, 100_000_099, &sk, &pk);

        let mut platform = SimPlatform::new(128 * 1024);
        // Pre-install a higher version so the file's version is `Older`.
        platform.poke(0, &[0x77; 64]);
        assert!(icr::icr_create(&mut platform, 0, 16384, 64, 200_000_099));

        let list = [pk, PublicKey::end_of_list()];
        let vendor_keys = KeySet::new(std::slice::from_ref(&list.as_slice()));
        let policy = UpgradePolicy {
            rc_allowed: false,
            write_protect_on_completion: false,
            bootloader_sig_threshold: 1,
            main_fw_sig_threshold: 1,
        };
        let mut upgrade = Upgrade::new(&mut platform, test_map(), policy, vendor_keys, None, None);
        let mut file = SimFile::new(file_bytes);
        let mut progress = NullProgress;

        assert_eq!(upgrade.run(&mut file, &mut progress), Err(UpgradeError::VersionOlder));
        // The still-installed payload must be untouched.
        assert_eq!(platform.peek(0, 64), [0x77u8; 64]);
    }
}
