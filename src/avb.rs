//! avb.rs — A/B slot verification coordinator
//!
//! Drives one verification attempt per boot, no retries:
//!
//!   Start → QueryLockState → [RAM-source fixup] → RunSlotVerification
//!         → { Ok | OkWithVerificationError | terminal errors }
//!
//! `OkWithVerificationError` on an unlocked device degrades to an
//! interactive warning countdown and then shares the `Ok` continuation;
//! every other non-`Ok` outcome is terminal with its own diagnostic.

use bitflags::bitflags;

use crate::error::{BootError, Result};
use crate::image::BootImageHeader;
use crate::mem::AddressSpace;
use crate::pipeline::BootConfig;
use crate::ui::{warn_countdown, Console};

bitflags! {
    /// Flags handed to the verification engine for this attempt.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SlotVerifyFlags: u32 {
        /// Tolerate verification errors (set only on unlocked devices).
        const ALLOW_VERIFICATION_ERROR = 1 << 0;
    }
}

/// One partition buffer returned by the verification engine. Ownership of
/// the buffer transfers to the pipeline for the rest of the boot attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedPartition {
    pub name: String,
    pub addr: u64,
    pub size: u64,
}

/// Everything the engine loaded for the selected slot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SlotData {
    pub ab_suffix: String,
    pub cmdline: String,
    pub loaded_partitions: Vec<LoadedPartition>,
}

/// Result protocol of the A/B flow. Produced exactly once per attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotVerifyResult {
    Ok(SlotData),
    OkWithVerificationError(SlotData),
    ErrorOom,
    ErrorIo,
    ErrorNoBootableSlots,
    ErrorInvalidArgument,
}

/// Contract with the cryptographic slot-verification engine.
pub trait VerifyOps {
    /// Is the device unlocked for verification errors? A read failure here
    /// is always fatal — no trust decision can be made without it.
    fn read_is_device_unlocked(&mut self) -> Result<bool>;

    /// Run the A/B select flow over `requested` partition names.
    fn ab_flow(&mut self, requested: &[&str], flags: SlotVerifyFlags) -> SlotVerifyResult;
}

/// Where the packaged image comes from for this attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootSource {
    /// Persistent block storage; the engine loads the boot partition too.
    Storage,
    /// Transient in-memory image at `addr`, pushed by an earlier stage.
    /// Only permitted on unlocked devices.
    Ram { addr: u64 },
}

/// Buffers mapped to their boot roles after a successful attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedSet {
    pub boot: u64,
    pub dtb: u64,
    pub dtbo: u64,
}

const ALL_ROLES: [&str; 3] = ["boot", "dtb", "dtbo"];
const RAM_ROLES: [&str; 2] = ["dtb", "dtbo"];

/// Run the slot-verification state machine once.
pub fn run_slot_verification(
    ops: &mut dyn VerifyOps,
    console: &mut dyn Console,
    space: &mut dyn AddressSpace,
    cfg: &BootConfig,
    source: BootSource,
) -> Result<VerifiedSet> {
    let unlocked = ops
        .read_is_device_unlocked()
        .map_err(|_| BootError::LockStateUnavailable)?;
    log::info!(
        "read_is_device_unlocked() returned that device is {}",
        if unlocked { "UNLOCKED" } else { "LOCKED" }
    );

    let mut requested: &[&str] = &ALL_ROLES;
    let mut preassigned_boot = None;
    if let BootSource::Ram { addr } = source {
        if !unlocked {
            return Err(BootError::LockedRamBoot);
        }
        // The image buffer is supplied directly; only the tree partitions
        // go through the engine. The pushed header carries packer addresses
        // and is rebased before anything is laid out against it.
        requested = &RAM_ROLES;
        preassigned_boot = Some(addr);
        let mut hdr = BootImageHeader::parse(space, addr)?;
        hdr.rebase_in_place(
            space,
            addr,
            cfg.kernel_addr,
            cfg.ramdisk_addr,
            cfg.tables_addr,
        )?;
    }

    let mut flags = SlotVerifyFlags::empty();
    if unlocked {
        flags |= SlotVerifyFlags::ALLOW_VERIFICATION_ERROR;
    }

    match ops.ab_flow(requested, flags) {
        SlotVerifyResult::OkWithVerificationError(data) => {
            if !unlocked {
                return Err(BootError::LockedVerificationError);
            }
            warn_countdown(console, cfg.warn_ticks)?;
            assign_roles(data, preassigned_boot)
        }
        SlotVerifyResult::Ok(data) => assign_roles(data, preassigned_boot),
        SlotVerifyResult::ErrorOom => Err(BootError::VerifyOom),
        SlotVerifyResult::ErrorIo => Err(BootError::VerifyIo),
        SlotVerifyResult::ErrorNoBootableSlots => Err(BootError::NoBootableSlots),
        SlotVerifyResult::ErrorInvalidArgument => Err(BootError::VerifyInvalidArgument),
    }
}

/// Shared continuation for `Ok` and the tolerated-verification-error case.
///
/// Scans every loaded partition: prefix `boot` claims the boot role (first
/// match wins, unless the RAM fixup pre-assigned it), exactly `dtb` claims
/// the tree role, prefix `dtbo` claims the overlay role. The scan never
/// short-circuits so the failure can name every missing role at once.
fn assign_roles(data: SlotData, preassigned_boot: Option<u64>) -> Result<VerifiedSet> {
    log::info!("slot_suffix: {}", data.ab_suffix);
    log::info!("cmdline: {}", data.cmdline);

    let mut boot = preassigned_boot;
    let mut dtb = None;
    let mut dtbo = None;
    for part in &data.loaded_partitions {
        if boot.is_none() && part.name.starts_with("boot") {
            boot = Some(part.addr);
        } else if part.name == "dtb" {
            dtb = Some(part.addr);
        } else if part.name.starts_with("dtbo") {
            dtbo = Some(part.addr);
        }
    }

    let mut missing = Vec::new();
    if boot.is_none() {
        missing.push("boot");
    }
    if dtb.is_none() {
        missing.push("dtb");
    }
    if dtbo.is_none() {
        missing.push("dtbo");
    }
    match (boot, dtb, dtbo) {
        (Some(boot), Some(dtb), Some(dtbo)) => Ok(VerifiedSet { boot, dtb, dtbo }),
        _ => Err(BootError::MissingRoles(missing)),
    }
}
