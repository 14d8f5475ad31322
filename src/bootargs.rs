//! bootargs.rs — kernel command-line assembly
//!
//! Tokens are prepended: each builder step composes a new line with its own
//! token ahead of everything already known. Every step runs exactly once
//! per boot attempt and soft-fails — a collaborator error skips that one
//! token and the boot goes on with a shorter command line.

use crate::error::Result;
use crate::reason;

/// Chip identifier whose 2.0 revision reads back wrong (see
/// [`append_cpu_revision`]).
pub const CPU_ID_R8A7796: u32 = 0x52;

/// Accumulated kernel command line for one boot attempt. Explicit context
/// object: steps receive it mutably and the final string is returned to the
/// caller, never written through a global store.
#[derive(Debug, Clone, Default)]
pub struct BootArgs {
    line: String,
}

impl BootArgs {
    pub fn new(initial: impl Into<String>) -> Self {
        Self { line: initial.into() }
    }

    /// Put `token` ahead of everything accumulated so far.
    pub fn prepend(&mut self, token: &str) {
        if self.line.is_empty() {
            self.line = token.to_string();
        } else {
            self.line = format!("{token} {}", self.line);
        }
    }

    pub fn as_str(&self) -> &str {
        &self.line
    }

    pub fn into_string(self) -> String {
        self.line
    }
}

/// Hardware and device-state queries the builder steps depend on.
pub trait BoardInfo {
    /// Platform identifier for the `board_id` token.
    fn platform_id(&self) -> Result<u32>;

    /// Chip identifier (product register).
    fn cpu_type(&self) -> Result<u32>;

    /// (integer, fraction) revision pair from the revision register.
    fn cpu_revision(&self) -> Result<(u32, u32)>;

    /// Verified-lock status. `Ok(true)` means locked.
    fn lock_status(&self) -> Result<bool>;

    /// Bootloader image size in blocks, for the carve-out descriptor.
    fn bootloader_size(&self) -> Result<u32>;

    /// Active A/B slot letter for legacy (non-verified) partition naming.
    fn active_slot(&self) -> Option<char>;
}

/// `androidboot.board_id=0x<id>` as a fixed-width lowercase hex literal.
pub fn append_board_id(args: &mut BootArgs, board: &dyn BoardInfo) {
    match board.platform_id() {
        Ok(id) => args.prepend(&format!("androidboot.board_id=0x{id:08x}")),
        Err(e) => log::warn!("board id unavailable ({e}), token skipped"),
    }
}

/// `androidboot.revision=<int>.<frac>`.
///
/// Erratum: R8A7796 parts report revision 2.0 for silicon that behaves as
/// 1.1; the pair is remapped before formatting.
pub fn append_cpu_revision(args: &mut BootArgs, board: &dyn BoardInfo) {
    let (revision, cpu_type) = match (board.cpu_revision(), board.cpu_type()) {
        (Ok(rev), Ok(ty)) => (rev, ty),
        (Err(e), _) | (_, Err(e)) => {
            log::warn!("cpu revision unavailable ({e}), token skipped");
            return;
        }
    };
    let (mut integer, mut fraction) = revision;
    if cpu_type == CPU_ID_R8A7796 && integer == 2 && fraction == 0 {
        integer = 1;
        fraction = 1;
    }
    args.prepend(&format!("androidboot.revision={integer}.{fraction}"));
}

/// Block-device carve-out for the two bootloader copies, emitted only when
/// the lock query succeeds and reports the device as not locked. (The
/// locked/unlocked polarity mirrors the long-standing platform behavior.)
pub fn append_blkdevparts(args: &mut BootArgs, board: &dyn BoardInfo) {
    let locked = match board.lock_status() {
        Ok(locked) => locked,
        Err(e) => {
            log::warn!("lock status unavailable ({e}), carve-out skipped");
            return;
        }
    };
    if locked {
        return;
    }
    let size = match board.bootloader_size() {
        Ok(size) => size,
        Err(e) => {
            log::warn!("bootloader size unavailable ({e}), carve-out skipped");
            return;
        }
    };
    args.prepend(&format!(
        "blkdevparts=mmcblk0boot0:{size}(bootloader_a);mmcblk0boot1:{size}(bootloader_b)"
    ));
}

/// `androidboot.bootreason=<reason>`. With no validated reason the token is
/// omitted entirely; the OS boot-state service maps the absence to
/// "unknown" on its own.
pub fn append_boot_reason(args: &mut BootArgs, reason: Option<&str>) {
    match reason {
        Some(reason) if reason != reason::UNKNOWN_REASON => {
            args.prepend(&format!("androidboot.bootreason={reason}"));
        }
        _ => log::info!("boot reason token omitted"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BootError;
    use crate::testutil::FakeBoard;
    use pretty_assertions::assert_eq;

    #[test]
    fn newest_token_is_leftmost() {
        let mut args = BootArgs::new("foo");
        let board = FakeBoard::default();
        append_board_id(&mut args, &board);
        append_boot_reason(&mut args, Some("watchdog"));
        assert_eq!(
            args.as_str(),
            "androidboot.bootreason=watchdog androidboot.board_id=0x0000002a foo"
        );
    }

    #[test]
    fn prepend_into_empty_line_adds_no_separator() {
        let mut args = BootArgs::new("");
        args.prepend("a=1");
        args.prepend("b=2");
        assert_eq!(args.as_str(), "b=2 a=1");
    }

    #[test]
    fn board_id_is_fixed_width_lowercase_hex() {
        let mut args = BootArgs::new("");
        let board = FakeBoard { platform_id: 0xAB, ..FakeBoard::default() };
        append_board_id(&mut args, &board);
        assert_eq!(args.as_str(), "androidboot.board_id=0x000000ab");
    }

    #[test]
    fn r8a7796_rev_2_0_is_remapped_to_1_1() {
        let mut args = BootArgs::new("");
        let board = FakeBoard {
            cpu_type: CPU_ID_R8A7796,
            cpu_revision: (2, 0),
            ..FakeBoard::default()
        };
        append_cpu_revision(&mut args, &board);
        assert_eq!(args.as_str(), "androidboot.revision=1.1");
    }

    #[test]
    fn other_chips_keep_rev_2_0() {
        let mut args = BootArgs::new("");
        let board = FakeBoard { cpu_type: 0x4f, cpu_revision: (2, 0), ..FakeBoard::default() };
        append_cpu_revision(&mut args, &board);
        assert_eq!(args.as_str(), "androidboot.revision=2.0");
    }

    #[test]
    fn carve_out_only_when_unlocked() {
        let mut args = BootArgs::new("");
        let board = FakeBoard { locked: true, ..FakeBoard::default() };
        append_blkdevparts(&mut args, &board);
        assert_eq!(args.as_str(), "");

        let board = FakeBoard { locked: false, bootloader_size: 448, ..FakeBoard::default() };
        append_blkdevparts(&mut args, &board);
        assert_eq!(
            args.as_str(),
            "blkdevparts=mmcblk0boot0:448(bootloader_a);mmcblk0boot1:448(bootloader_b)"
        );
    }

    #[test]
    fn carve_out_skipped_when_lock_query_fails() {
        let mut args = BootArgs::new("base");
        let board = FakeBoard {
            fail: Some(BootError::AllocationFailure("lock query")),
            ..FakeBoard::default()
        };
        append_blkdevparts(&mut args, &board);
        assert_eq!(args.as_str(), "base");
    }

    #[test]
    fn failing_step_skips_only_itself() {
        let mut args = BootArgs::new("root=/dev/mmcblk0p1");
        let board = FakeBoard {
            fail: Some(BootError::AllocationFailure("scratch")),
            ..FakeBoard::default()
        };
        append_board_id(&mut args, &board);
        append_cpu_revision(&mut args, &board);
        append_boot_reason(&mut args, Some("cold"));
        assert_eq!(args.as_str(), "androidboot.bootreason=cold root=/dev/mmcblk0p1");
    }

    #[test]
    fn unknown_reason_emits_no_token() {
        let mut args = BootArgs::new("foo");
        append_boot_reason(&mut args, None);
        assert_eq!(args.as_str(), "foo");
    }
}
