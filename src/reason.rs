//! reason.rs — boot-reason record extraction
//!
//! The previous boot leaves a small integrity-checked record describing why
//! it ended, in one of two places: a fixed RAM region advertised by the
//! `/reserved-memory/rambootreason` tree node, or the reserved sub-region
//! of the persistent bootloader control message (BCB). The first source
//! that validates wins; both are cleared after a read so a stale reason can
//! never be replayed on a later boot.
//!
//! Record layout (little-endian):
//!
//!   +---------------+ 0
//!   | reason        | 128 (NUL-padded bytes)
//!   | crc           | 4   (u32 LE, CRC32 over the full reason field)
//!   +---------------+ 132

use crate::devicetree::{DeviceTreeOps, RAM_REASON_NODE};
use crate::error::{BootError, Result};
use crate::mem::AddressSpace;

/// Size of the NUL-padded reason field.
pub const REASON_FIELD: usize = 128;
/// Serialized record length.
pub const RECORD_SIZE: usize = REASON_FIELD + 4;
/// Reasons shorter than this are rejected as noise.
pub const REASON_MIN_LEN: usize = 3;
/// Reasons must be strictly shorter than this.
pub const REASON_MAX_LEN: usize = 127;

/// Reserved sub-region length inside the bootloader control message.
pub const BCB_RESERVED_SIZE: usize = 1184;

/// Default reason when no source validates. Never emitted as a token: the
/// OS boot-state service maps an absent token to this value by itself.
pub const UNKNOWN_REASON: &str = "unknown";

/// Integrity-checked boot-reason record.
#[derive(Debug, Clone, Copy)]
pub struct BootReasonRecord {
    pub reason: [u8; REASON_FIELD],
    pub crc: u32,
}

impl BootReasonRecord {
    /// Decode from raw bytes; `None` when the slice is too short.
    pub fn decode(raw: &[u8]) -> Option<Self> {
        if raw.len() < RECORD_SIZE {
            return None;
        }
        let mut reason = [0u8; REASON_FIELD];
        reason.copy_from_slice(&raw[..REASON_FIELD]);
        let mut crc = [0u8; 4];
        crc.copy_from_slice(&raw[REASON_FIELD..RECORD_SIZE]);
        Some(Self { reason, crc: u32::from_le_bytes(crc) })
    }

    /// Serialize (test and diagnostic-stage helper).
    pub fn encode(&self) -> [u8; RECORD_SIZE] {
        let mut raw = [0u8; RECORD_SIZE];
        raw[..REASON_FIELD].copy_from_slice(&self.reason);
        raw[REASON_FIELD..].copy_from_slice(&self.crc.to_le_bytes());
        raw
    }

    /// Build a record with a matching checksum.
    pub fn with_reason(reason: &str) -> Self {
        let mut field = [0u8; REASON_FIELD];
        field[..reason.len()].copy_from_slice(reason.as_bytes());
        Self { reason: field, crc: crc32fast::hash(&field) }
    }

    fn reason_len(&self) -> usize {
        self.reason.iter().position(|&b| b == 0).unwrap_or(REASON_FIELD)
    }

    /// Checked reason string: the CRC32 over the full reason field must
    /// match and the length must lie in `[REASON_MIN_LEN, REASON_MAX_LEN)`.
    pub fn validate(&self) -> Result<&str> {
        if crc32fast::hash(&self.reason) != self.crc {
            return Err(BootError::Integrity("boot reason crc mismatch"));
        }
        let len = self.reason_len();
        if len < REASON_MIN_LEN || len >= REASON_MAX_LEN {
            return Err(BootError::Integrity("boot reason length out of range"));
        }
        core::str::from_utf8(&self.reason[..len])
            .map_err(|_| BootError::Integrity("boot reason not utf-8"))
    }
}

/// Persistent bootloader control message. Only the reserved tail is
/// interpreted here; the other fields pass through untouched.
#[derive(Debug, Clone, Copy)]
pub struct BootloaderMessage {
    pub command: [u8; 32],
    pub status: [u8; 32],
    pub recovery: [u8; 768],
    pub stage: [u8; 32],
    pub reserved: [u8; BCB_RESERVED_SIZE],
}

impl BootloaderMessage {
    pub fn zeroed() -> Self {
        Self {
            command: [0; 32],
            status: [0; 32],
            recovery: [0; 768],
            stage: [0; 32],
            reserved: [0; BCB_RESERVED_SIZE],
        }
    }
}

/// Access to the persistent control-message store.
pub trait BcbStore {
    fn load(&mut self) -> Result<BootloaderMessage>;
    fn store(&mut self, msg: &BootloaderMessage) -> Result<()>;
}

/// In-memory control-message store for tests and the host harness.
pub struct RamBcb {
    pub msg: BootloaderMessage,
    pub stores: u32,
}

impl RamBcb {
    pub fn new(msg: BootloaderMessage) -> Self {
        Self { msg, stores: 0 }
    }
}

impl BcbStore for RamBcb {
    fn load(&mut self) -> Result<BootloaderMessage> {
        Ok(self.msg)
    }

    fn store(&mut self, msg: &BootloaderMessage) -> Result<()> {
        self.msg = *msg;
        self.stores += 1;
        Ok(())
    }
}

/// Extract the boot reason, trying the RAM record first and the BCB
/// reserved region second. Returns `None` when neither source validates;
/// the argument builder then omits the token entirely and the OS treats
/// the absence as "unknown".
pub fn extract_boot_reason(
    space: &mut dyn AddressSpace,
    dt: &dyn DeviceTreeOps,
    tree: u64,
    bcb: &mut dyn BcbStore,
) -> Option<String> {
    if let Some(addr) = dt.reserved_region(space, tree, RAM_REASON_NODE) {
        if let Ok(raw) = space.read_bytes(addr, RECORD_SIZE) {
            let accepted = BootReasonRecord::decode(&raw).and_then(|rec| match rec.validate() {
                Ok(reason) => Some(reason.to_string()),
                Err(e) => {
                    log::debug!("RAM boot reason rejected: {e}");
                    None
                }
            });
            // the RAM record is one-shot: wipe it whether or not it was valid
            if let Err(e) = space.fill(addr, RECORD_SIZE, 0) {
                log::warn!("failed to clear RAM boot reason: {e}");
            }
            if let Some(reason) = accepted {
                log::info!("bootreason: {reason} (RAM)");
                return Some(reason);
            }
        }
    }

    match bcb.load() {
        Ok(mut msg) => {
            let accepted =
                BootReasonRecord::decode(&msg.reserved[..RECORD_SIZE]).and_then(|rec| {
                    match rec.validate() {
                        Ok(reason) => Some(reason.to_string()),
                        Err(e) => {
                            log::debug!("BCB boot reason rejected: {e}");
                            None
                        }
                    }
                });
            if let Some(reason) = accepted {
                // clear only the reserved part and persist, so the reason
                // is not re-read on the next boot
                msg.reserved = [0; BCB_RESERVED_SIZE];
                if let Err(e) = bcb.store(&msg) {
                    log::warn!("failed to rewrite control message: {e}");
                }
                log::info!("bootreason: {reason} (BCB)");
                return Some(reason);
            }
        }
        Err(e) => log::debug!("no control message: {e}"),
    }

    log::info!("bootreason: {UNKNOWN_REASON}");
    None
}
