//! ui.rs — operator console and the verification warning countdown
//!
//! The pipeline has exactly one interactive point: the warning shown when
//! an unlocked device boots with a verification error. It busy-polls the
//! console in short sub-slices, one tick per second, and ends on either a
//! key press (boot halted, key consumed) or tick exhaustion (boot goes on).

use crate::error::{BootError, Result};

/// Sub-slices polled per one-second tick.
pub const SLICES_PER_TICK: u32 = 100;

/// Default tick count when no configuration overrides it.
pub const DEFAULT_WARN_TICKS: u32 = 5;

/// Key input and time slicing for the countdown.
pub trait Console {
    /// Is a key waiting?
    fn key_pressed(&mut self) -> bool;

    /// Consume the waiting key so it does not leak into the next stage.
    fn consume_key(&mut self);

    /// Block for one polling sub-slice.
    fn tick_slice(&mut self);
}

/// Run the warning countdown for `ticks` seconds.
///
/// A key press returns [`BootError::UserAbort`]; `ticks == 0` polls nothing
/// and returns immediately so the caller falls straight through to the
/// verified-ok continuation.
pub fn warn_countdown(console: &mut dyn Console, mut ticks: u32) -> Result<()> {
    log::warn!("OS was not verified! Press any key to halt booting!");
    while ticks > 0 {
        ticks -= 1;
        for _ in 0..SLICES_PER_TICK {
            if console.key_pressed() {
                console.consume_key();
                return Err(BootError::UserAbort);
            }
            console.tick_slice();
        }
        log::warn!("{ticks:2} ");
    }
    Ok(())
}

/// Host console: sleeps through its slices and never reports a key. The
/// embedded port binds the real UART poll here.
pub struct HostConsole;

impl Console for HostConsole {
    fn key_pressed(&mut self) -> bool {
        false
    }

    fn consume_key(&mut self) {}

    fn tick_slice(&mut self) {
        std::thread::sleep(std::time::Duration::from_millis(10));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::ScriptedConsole;

    #[test]
    fn zero_ticks_polls_nothing() {
        let mut console = ScriptedConsole::no_keys();
        assert_eq!(warn_countdown(&mut console, 0), Ok(()));
        assert_eq!(console.polls, 0);
    }

    #[test]
    fn exhaustion_falls_through() {
        let mut console = ScriptedConsole::no_keys();
        assert_eq!(warn_countdown(&mut console, 2), Ok(()));
        assert_eq!(console.polls, 2 * SLICES_PER_TICK);
    }

    #[test]
    fn key_press_aborts_and_consumes() {
        let mut console = ScriptedConsole::key_after(42);
        assert_eq!(warn_countdown(&mut console, 5), Err(BootError::UserAbort));
        assert_eq!(console.polls, 43);
        assert_eq!(console.consumed, 1);
    }
}
