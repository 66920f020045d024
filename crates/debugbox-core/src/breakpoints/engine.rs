//! # Breakpoint Engine
//!
//! Arming, disarming and hit detection on top of [`BreakpointStore`].
//!
//! Code breakpoints are implemented with a trap marker: activation saves the
//! guest byte at the breakpoint and writes `int3` over it, deactivation puts
//! the byte back if the marker is still there. Interrupt breakpoints and
//! memory watches never touch guest memory; activation only arms them.
//!
//! Every check takes the [`DebugSession`] so the ignore-once state travels
//! with the session rather than with the engine.

use debugbox_protocol::{BreakpointInfo, BreakpointSpec, WatchMode};
use tracing::{debug, trace};

use super::{AhMatch, BreakpointId, BreakpointRecord, BreakpointStore, CodeLocation, RecordKind, TRAP_OPCODE};
use crate::error::Result;
use crate::machine::{Cpu, GuestMemory};
use crate::resolver::AddressResolver;
use crate::session::DebugSession;
use crate::types::LinearAddress;

/// A code or interrupt breakpoint that stopped execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakpointHit
{
    pub id: BreakpointId,
    /// The record was `once` and has already been deleted.
    pub once: bool,
}

/// A memory watch whose byte changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchHit
{
    pub id: BreakpointId,
    pub address: LinearAddress,
    pub old: u8,
    pub new: u8,
}

/// Breakpoint store plus the algorithms that act on guest memory.
#[derive(Debug, Default)]
pub struct BreakpointEngine
{
    store: BreakpointStore,
}

impl BreakpointEngine
{
    /// Create an engine with no breakpoints.
    #[must_use]
    pub fn new() -> Self
    {
        Self::default()
    }

    /// Read-only access to the records.
    #[must_use]
    pub const fn store(&self) -> &BreakpointStore
    {
        &self.store
    }

    /// Add a code breakpoint, resolving its linear address now
    ///
    /// The record starts disarmed; it is armed by the next
    /// [`BreakpointEngine::set_activation`].
    ///
    /// ## Errors
    ///
    /// Returns [`crate::error::DebugError::Resolution`] if the location cannot
    /// be translated.
    pub fn add_code<C: Cpu + ?Sized>(&mut self, cpu: &C, segment: u16, offset: u32, once: bool) -> Result<BreakpointId>
    {
        let linear = AddressResolver::new(cpu).resolve(segment, offset)?;
        let id = self.store.add_code(CodeLocation { segment, offset, linear }, once);
        debug!(%id, segment, offset, %linear, once, "code breakpoint added");
        Ok(id)
    }

    /// Add a software interrupt breakpoint.
    pub fn add_interrupt(&mut self, number: u8, ah: AhMatch, once: bool) -> BreakpointId
    {
        let id = self.store.add_interrupt(number, ah, once);
        debug!(%id, number, ?ah, once, "interrupt breakpoint added");
        id
    }

    /// Add a memory watch whose baseline is the byte currently at the
    /// location (0 if it cannot be resolved or read).
    pub fn add_memory_watch<C: Cpu + ?Sized>(&mut self, cpu: &C, segment: u16, offset: u32, mode: WatchMode) -> BreakpointId
    {
        let id = self.store.add_memory_watch(segment, offset, mode);
        if let Some(record) = self.store.get_mut(id) {
            let baseline = watch_address(cpu, &record.kind).map_or(0, |address| cpu.read_u8(address));
            set_last_value(&mut record.kind, baseline);
            debug!(%id, segment, offset, ?mode, baseline, "memory watch added");
        }
        id
    }

    /// Add a breakpoint described by a protocol request.
    ///
    /// ## Errors
    ///
    /// Code breakpoints fail when their location cannot be resolved.
    pub fn add<C: Cpu + ?Sized>(&mut self, cpu: &C, spec: &BreakpointSpec) -> Result<BreakpointId>
    {
        match *spec {
            BreakpointSpec::Code { segment, offset, once } => self.add_code(cpu, segment, offset, once),
            BreakpointSpec::Interrupt { number, ah, once } => Ok(self.add_interrupt(number, ah.into(), once)),
            BreakpointSpec::MemoryWatch { segment, offset, mode } => {
                Ok(self.add_memory_watch(cpu, segment, offset, mode))
            }
        }
    }

    /// Arm or disarm every breakpoint
    ///
    /// When arming, the code breakpoint at `address` (the location execution
    /// is about to resume from) is marked active but its trap is not
    /// written, so the instruction there runs unpatched.
    pub fn set_activation<C: Cpu + ?Sized>(&mut self, cpu: &mut C, address: LinearAddress, activate: bool)
    {
        for id in self.store.ids() {
            let Some(record) = self.store.get_mut(id) else {
                continue;
            };
            if activate && record.code_address() == Some(address) {
                record.active = true;
                continue;
            }
            apply_activation(cpu, record, activate);
        }
        debug!(%address, activate, count = self.store.len(), "breakpoints activation changed");
    }

    /// Check whether execution reaching `segment:offset` should stop
    ///
    /// The session's one-shot ignore address is consumed by every call. A
    /// non-`once` match becomes the session's ignored record, so the next
    /// match of that record is swallowed; a `once` match deletes the record.
    /// Returns the record that stopped execution.
    pub fn check_code<C: Cpu + ?Sized>(
        &mut self,
        session: &mut DebugSession,
        cpu: &mut C,
        segment: u16,
        offset: u32,
    ) -> Option<BreakpointHit>
    {
        let resolved = AddressResolver::new(cpu).resolve(segment, offset).ok();
        if let Some(ignore) = session.take_ignore_address() {
            if Some(ignore) == resolved {
                trace!(%ignore, "code check suppressed by ignore address");
                return None;
            }
        }

        let found = self.store.iter().find_map(|(id, record)| match record.kind {
            RecordKind::Code { location, .. }
                if record.active && location.segment == segment && location.offset == offset =>
            {
                Some(id)
            }
            _ => None,
        });
        self.resolve_hit(session, cpu, found?)
    }

    /// Check whether `int number` with `ah` at `linear` should stop.
    ///
    /// Ignore handling is the same as for [`BreakpointEngine::check_code`].
    pub fn check_interrupt<C: Cpu + ?Sized>(
        &mut self,
        session: &mut DebugSession,
        cpu: &mut C,
        linear: LinearAddress,
        number: u8,
        ah: u8,
    ) -> Option<BreakpointHit>
    {
        if let Some(ignore) = session.take_ignore_address() {
            if ignore == linear {
                trace!(%ignore, "interrupt check suppressed by ignore address");
                return None;
            }
        }

        let found = self.store.iter().find_map(|(id, record)| match record.kind {
            RecordKind::Interrupt { number: wanted, ah: filter }
                if record.active && wanted == number && filter.matches(ah) =>
            {
                Some(id)
            }
            _ => None,
        });
        self.resolve_hit(session, cpu, found?)
    }

    fn resolve_hit<C: Cpu + ?Sized>(
        &mut self,
        session: &mut DebugSession,
        cpu: &mut C,
        id: BreakpointId,
    ) -> Option<BreakpointHit>
    {
        if session.ignored() == Some(id) {
            session.set_ignored(None);
            if let Some(record) = self.store.get_mut(id) {
                apply_activation(cpu, record, true);
            }
            trace!(%id, "ignored breakpoint re-armed");
            return None;
        }
        let once = self.store.get(id).is_some_and(|record| record.once);
        if once {
            self.remove(cpu, id);
        } else {
            session.set_ignored(Some(id));
        }
        debug!(%id, once, "breakpoint hit");
        Some(BreakpointHit { id, once })
    }

    /// Compare every armed memory watch with guest memory
    ///
    /// A watch fires when its byte differs from the last value it saw, and
    /// always remembers the new value. Watches that cannot be resolved are
    /// skipped, as are protected-mode watches outside protected mode or
    /// whose descriptor is missing or has a zero limit. Unreadable bytes
    /// count as 0.
    #[cfg(feature = "memory-watch")]
    pub fn check_memory_watches<C: Cpu + ?Sized>(&mut self, cpu: &C) -> Vec<WatchHit>
    {
        let mut hits = Vec::new();
        for id in self.store.ids() {
            let Some(record) = self.store.get_mut(id) else {
                continue;
            };
            if !record.active || !record.kind.is_watch() {
                continue;
            }
            if let RecordKind::MemoryWatchProtected { selector, .. } = record.kind {
                let usable = cpu.mode().protected && cpu.descriptor(selector).is_some_and(|d| d.limit != 0);
                if !usable {
                    continue;
                }
            }
            let Some(address) = watch_address(cpu, &record.kind) else {
                continue;
            };
            let value = cpu.read_u8(address);
            let old = set_last_value(&mut record.kind, value);
            if old != value {
                debug!(%id, %address, old, new = value, "memory watch triggered");
                hits.push(WatchHit {
                    id,
                    address,
                    old,
                    new: value,
                });
            }
        }
        hits
    }

    /// Delete a breakpoint, restoring its guest byte first.
    pub fn delete<C: Cpu + ?Sized>(&mut self, cpu: &mut C, id: BreakpointId) -> bool
    {
        self.remove(cpu, id).is_some()
    }

    /// Delete the newest code breakpoint at `linear`.
    pub fn delete_at<C: Cpu + ?Sized>(&mut self, cpu: &mut C, linear: LinearAddress) -> bool
    {
        self.store.find_code_at(linear).is_some_and(|id| self.delete(cpu, id))
    }

    /// Delete every breakpoint, restoring guest bytes. Returns the count.
    pub fn clear<C: Cpu + ?Sized>(&mut self, cpu: &mut C) -> usize
    {
        for id in self.store.ids() {
            if let Some(record) = self.store.get_mut(id) {
                apply_activation(cpu, record, false);
            }
        }
        let count = self.store.clear();
        debug!(count, "breakpoints cleared");
        count
    }

    /// Wire snapshots, newest first.
    #[must_use]
    pub fn list(&self) -> Vec<BreakpointInfo>
    {
        self.store.list()
    }

    fn remove<C: Cpu + ?Sized>(&mut self, cpu: &mut C, id: BreakpointId) -> Option<BreakpointRecord>
    {
        if let Some(record) = self.store.get_mut(id) {
            apply_activation(cpu, record, false);
        }
        let record = self.store.remove(id)?;
        debug!(%id, "breakpoint removed");
        Some(record)
    }
}

/// Arm or disarm one record. Only code records touch guest memory.
fn apply_activation<M: GuestMemory + ?Sized>(memory: &mut M, record: &mut BreakpointRecord, activate: bool)
{
    if let RecordKind::Code { location, saved_byte } = &mut record.kind {
        let current = memory.read_u8(location.linear);
        if activate {
            if current != TRAP_OPCODE {
                *saved_byte = Some(current);
                memory.write_u8(location.linear, TRAP_OPCODE);
            }
        } else if let Some(byte) = saved_byte.take() {
            if current == TRAP_OPCODE {
                memory.write_u8(location.linear, byte);
            }
        }
    }
    record.active = activate;
}

fn watch_address<C: Cpu + ?Sized>(cpu: &C, kind: &RecordKind) -> Option<LinearAddress>
{
    let resolver = AddressResolver::new(cpu);
    match *kind {
        RecordKind::MemoryWatch { segment, offset, .. } => resolver.resolve(segment, offset).ok(),
        RecordKind::MemoryWatchProtected { selector, offset, .. } => resolver.resolve(selector, offset).ok(),
        RecordKind::MemoryWatchLinear { linear, .. } => Some(linear),
        RecordKind::Code { .. } | RecordKind::Interrupt { .. } => None,
    }
}

/// Store `value` as the watch's last value and return the previous one.
fn set_last_value(kind: &mut RecordKind, value: u8) -> u8
{
    match kind {
        RecordKind::MemoryWatch { last_value, .. }
        | RecordKind::MemoryWatchProtected { last_value, .. }
        | RecordKind::MemoryWatchLinear { last_value, .. } => std::mem::replace(last_value, value),
        RecordKind::Code { .. } | RecordKind::Interrupt { .. } => value,
    }
}

#[cfg(test)]
mod tests
{
    use super::*;
    use crate::machine::SimMachine;

    #[test]
    fn test_activation_writes_and_restores_trap()
    {
        let mut machine = SimMachine::new(128);
        let at = LinearAddress::new(0x10010);
        machine.load(at, &[0x90]);
        let mut engine = BreakpointEngine::new();
        engine.add_code(&machine, 0x1000, 0x10, false).unwrap();

        for _ in 0..3 {
            engine.set_activation(&mut machine, LinearAddress::ZERO, true);
            assert_eq!(machine.read_u8(at), TRAP_OPCODE);
            engine.set_activation(&mut machine, LinearAddress::ZERO, false);
            assert_eq!(machine.read_u8(at), 0x90);
        }
    }

    #[test]
    fn test_activation_skips_resume_address()
    {
        let mut machine = SimMachine::new(128);
        let at = LinearAddress::new(0x10010);
        machine.load(at, &[0x90]);
        let mut engine = BreakpointEngine::new();
        let id = engine.add_code(&machine, 0x1000, 0x10, false).unwrap();

        engine.set_activation(&mut machine, at, true);
        assert_eq!(machine.read_u8(at), 0x90);
        assert!(engine.store().get(id).unwrap().active);
    }

    #[test]
    fn test_guest_overwrite_is_not_clobbered()
    {
        let mut machine = SimMachine::new(128);
        let at = LinearAddress::new(0x10010);
        machine.load(at, &[0x90]);
        let mut engine = BreakpointEngine::new();
        engine.add_code(&machine, 0x1000, 0x10, false).unwrap();

        engine.set_activation(&mut machine, LinearAddress::ZERO, true);
        machine.write_u8(at, 0xf4);
        engine.set_activation(&mut machine, LinearAddress::ZERO, false);
        assert_eq!(machine.read_u8(at), 0xf4);
    }

    #[test]
    fn test_delete_restores_byte()
    {
        let mut machine = SimMachine::new(128);
        let at = LinearAddress::new(0x10010);
        machine.load(at, &[0xb0]);
        let mut engine = BreakpointEngine::new();
        let id = engine.add_code(&machine, 0x1000, 0x10, false).unwrap();
        engine.set_activation(&mut machine, LinearAddress::ZERO, true);

        assert!(engine.delete(&mut machine, id));
        assert_eq!(machine.read_u8(at), 0xb0);
        assert!(!engine.delete(&mut machine, id));
    }

    #[test]
    fn test_watch_baseline_is_current_byte()
    {
        let mut machine = SimMachine::new(128);
        machine.load(LinearAddress::new(0x46c), &[0x12]);
        let mut engine = BreakpointEngine::new();
        let id = engine.add_memory_watch(&machine, 0x40, 0x6c, WatchMode::Real);
        assert_eq!(
            engine.store().get(id).unwrap().kind,
            RecordKind::MemoryWatch {
                segment: 0x40,
                offset: 0x6c,
                last_value: 0x12,
            }
        );
    }
}
