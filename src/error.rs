//! error.rs — boot failure taxonomy
//!
//! One enum covers every way a boot attempt can die. Fatal variants abort
//! the attempt and propagate to the invoking layer; the non-fatal cases
//! (`Integrity`, `AllocationFailure`, per-overlay failures) are logged at
//! their producing step and never escape the pipeline.

use thiserror::Error;

/// Library result type.
pub type Result<T> = core::result::Result<T, BootError>;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BootError {
    /// A named partition, device or collaborator is absent.
    #[error("can't find '{0}'")]
    ResourceNotFound(String),

    /// A block read did not complete.
    #[error("storage read failed: {0}")]
    StorageIo(String),

    /// Image exceeds the partition or rounds to zero blocks.
    #[error("image size error ({0} blocks)")]
    SizeViolation(u64),

    /// Boot image header failed structural validation.
    #[error("invalid boot image: {0}")]
    InvalidImage(&'static str),

    /// Kernel payload decompression failed. `partial` is the number of
    /// bytes the codec produced before giving up, when known.
    #[error("kernel decompression error: {detail} (decompressed size: {partial} bytes)")]
    Codec { detail: String, partial: u64 },

    /// Checksum mismatch on an integrity-checked record. Non-fatal at the
    /// pipeline level: the consumer falls back to the next source.
    #[error("integrity check failed: {0}")]
    Integrity(&'static str),

    /// Device-tree table or overlay handling failed.
    #[error("device tree: {0}")]
    DeviceTree(String),

    /// Bounded memory access outside the address space.
    #[error("address range {addr:#x}+{len:#x} out of bounds")]
    AddressSpace { addr: u64, len: u64 },

    /// The unlock-for-verification-errors state could not be read.
    /// Always fatal: no trust decision is possible without it.
    #[error("error determining whether device is unlocked")]
    LockStateUnavailable,

    /// Verification error surfaced while the device is locked.
    #[error("verification error in locked state")]
    LockedVerificationError,

    /// RAM-sourced boot requested while the device is locked.
    #[error("RAM boot not supported in locked state")]
    LockedRamBoot,

    /// The operator pressed a key during the verification warning.
    #[error("booting halted by user request")]
    UserAbort,

    /// Terminal A/B flow results, one diagnostic each.
    #[error("OOM error while doing A/B select flow")]
    VerifyOom,
    #[error("I/O error while doing A/B select flow")]
    VerifyIo,
    #[error("no bootable slots - enter repair mode")]
    NoBootableSlots,
    #[error("invalid argument error while doing A/B select flow")]
    VerifyInvalidArgument,

    /// Role assignment left one or more roles unbound after scanning
    /// every loaded partition. Names every missing role, not just the first.
    #[error("partition roles not found: {}", .0.join(", "))]
    MissingRoles(Vec<&'static str>),

    /// A scratch allocation failed. Soft at the builder level: the one
    /// enhancement is skipped and the boot continues.
    #[error("allocation failed in {0}")]
    AllocationFailure(&'static str),
}
