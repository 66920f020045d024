//! Per-debugger session state.
//!
//! One [`DebugSession`] exists while a debugger is attached to the machine.
//! It is owned by the debug loop and passed by reference into every engine
//! and server call instead of living in globals.

use debugbox_protocol::{BreakpointId, StopReason};
use tracing::debug;

use crate::types::LinearAddress;

/// Mutable state shared by the breakpoint engine and the control server
///
/// The ignore state implements "the breakpoint you just stopped at does not
/// fire again on the very next check":
///
/// - `ignored` is the record that matched last; the next match of that same
///   record is swallowed and clears it.
/// - `ignore_address` is a one-shot linear address. The next code or
///   interrupt check clears it, and is suppressed if it hits that address.
#[derive(Debug, Default)]
pub struct DebugSession
{
    ignored: Option<BreakpointId>,
    ignore_address: Option<LinearAddress>,
    debugging: bool,
    pending_stop: Option<StopReason>,
    exit_code: u32,
    exit_requested: bool,
}

impl DebugSession
{
    /// Create an idle session (not debugging, no ignore state).
    #[must_use]
    pub fn new() -> Self
    {
        Self::default()
    }

    /// Enter debug mode with fresh ignore state.
    pub fn enable(&mut self)
    {
        debug!("debug session enabled");
        self.clear_ignore();
        self.debugging = true;
    }

    /// Forget both the ignored record and the one-shot address.
    pub fn clear_ignore(&mut self)
    {
        self.ignored = None;
        self.ignore_address = None;
    }

    /// Record whose next match is swallowed.
    #[must_use]
    pub const fn ignored(&self) -> Option<BreakpointId>
    {
        self.ignored
    }

    pub fn set_ignored(&mut self, id: Option<BreakpointId>)
    {
        self.ignored = id;
    }

    /// One-shot address suppressed by the next check.
    #[must_use]
    pub const fn ignore_address(&self) -> Option<LinearAddress>
    {
        self.ignore_address
    }

    pub fn set_ignore_address(&mut self, address: Option<LinearAddress>)
    {
        self.ignore_address = address;
    }

    /// Consume the one-shot address.
    pub fn take_ignore_address(&mut self) -> Option<LinearAddress>
    {
        self.ignore_address.take()
    }

    /// Whether the machine is under debugger control.
    #[must_use]
    pub const fn is_debugging(&self) -> bool
    {
        self.debugging
    }

    pub fn set_debugging(&mut self, debugging: bool)
    {
        self.debugging = debugging;
    }

    /// Queue a stop to be reported with `break_now`. A newer stop replaces
    /// one that was not reported yet.
    pub fn queue_stop(&mut self, reason: StopReason)
    {
        self.pending_stop = Some(reason);
    }

    #[must_use]
    pub const fn pending_stop(&self) -> Option<StopReason>
    {
        self.pending_stop
    }

    pub fn take_stop(&mut self) -> Option<StopReason>
    {
        self.pending_stop.take()
    }

    /// Latch a callback code that requires the loop to exit. Zero is ignored.
    pub fn latch_exit(&mut self, code: u32)
    {
        if code != 0 {
            self.exit_code = code;
        }
    }

    /// Return and clear the latched exit code (0 if none).
    pub fn take_exit_code(&mut self) -> u32
    {
        std::mem::take(&mut self.exit_code)
    }

    /// Ask the running core to return to the scheduler.
    pub fn request_exit(&mut self)
    {
        self.exit_requested = true;
    }

    pub fn take_exit_request(&mut self) -> bool
    {
        std::mem::take(&mut self.exit_requested)
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_enable_clears_ignore_state()
    {
        let mut session = DebugSession::new();
        session.set_ignored(Some(BreakpointId::from_parts(0, 0)));
        session.set_ignore_address(Some(LinearAddress::new(0x100)));

        session.enable();
        assert!(session.is_debugging());
        assert_eq!(session.ignored(), None);
        assert_eq!(session.ignore_address(), None);
    }

    #[test]
    fn test_exit_code_latches_nonzero_only()
    {
        let mut session = DebugSession::new();
        session.latch_exit(7);
        session.latch_exit(0);
        assert_eq!(session.take_exit_code(), 7);
        assert_eq!(session.take_exit_code(), 0);
    }
}
