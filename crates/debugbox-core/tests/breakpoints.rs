//! Tests for breakpoint storage, arming and hit detection

use debugbox_core::breakpoints::{AhMatch, TRAP_OPCODE};
use debugbox_core::machine::{GuestMemory, SimMachine};
use debugbox_core::{BreakpointEngine, DebugSession, LinearAddress};
use debugbox_protocol::{BreakpointSpec, BreakpointTarget, WatchMode};

fn machine_with(at: LinearAddress, bytes: &[u8]) -> SimMachine
{
    let mut machine = SimMachine::new(256);
    machine.load(at, bytes);
    machine
}

#[test]
fn test_code_breakpoint_ignore_once_alternates()
{
    let mut machine = machine_with(LinearAddress::new(0x10010), &[0x90]);
    let mut session = DebugSession::new();
    let mut engine = BreakpointEngine::new();
    let id = engine.add_code(&machine, 0x1000, 0x0010, false).unwrap();
    engine.set_activation(&mut machine, LinearAddress::ZERO, true);

    let hit = engine.check_code(&mut session, &mut machine, 0x1000, 0x0010).unwrap();
    assert_eq!((hit.id, hit.once), (id, false));
    assert!(engine.check_code(&mut session, &mut machine, 0x1000, 0x0010).is_none());
    assert!(engine.check_code(&mut session, &mut machine, 0x1000, 0x0010).is_some());
    assert!(engine.check_code(&mut session, &mut machine, 0x1000, 0x0010).is_none());
}

#[test]
fn test_once_breakpoint_fires_once_and_disappears()
{
    let at = LinearAddress::new(0x20050);
    let mut machine = machine_with(at, &[0xb0]);
    let mut session = DebugSession::new();
    let mut engine = BreakpointEngine::new();
    let id = engine.add_code(&machine, 0x2000, 0x0050, true).unwrap();
    engine.set_activation(&mut machine, LinearAddress::ZERO, true);
    assert_eq!(machine.read_u8(at), TRAP_OPCODE);

    assert!(engine.check_code(&mut session, &mut machine, 0x2000, 0x0050).is_some());
    assert_eq!(engine.store().len(), 0);
    assert!(engine.store().get(id).is_none());
    assert_eq!(machine.read_u8(at), 0xb0);

    for _ in 0..5 {
        assert!(engine.check_code(&mut session, &mut machine, 0x2000, 0x0050).is_none());
    }
    assert!(!engine.delete(&mut machine, id));
}

#[test]
fn test_once_hit_reports_its_own_record()
{
    let mut machine = machine_with(LinearAddress::new(0x10010), &[0x90, 0x90]);
    let mut session = DebugSession::new();
    let mut engine = BreakpointEngine::new();
    let kept = engine.add_code(&machine, 0x1000, 0x0010, false).unwrap();
    let once = engine.add_code(&machine, 0x1000, 0x0011, true).unwrap();
    engine.set_activation(&mut machine, LinearAddress::ZERO, true);

    assert!(engine.check_code(&mut session, &mut machine, 0x1000, 0x0010).is_some());
    assert_eq!(session.ignored(), Some(kept));

    let hit = engine.check_code(&mut session, &mut machine, 0x1000, 0x0011).unwrap();
    assert_eq!(hit.id, once);
    assert!(hit.once);
    assert_eq!(session.ignored(), Some(kept));
}

#[test]
fn test_stale_handle_does_not_match_reused_slot()
{
    let mut machine = SimMachine::new(64);
    let mut engine = BreakpointEngine::new();
    let old = engine.add_code(&machine, 0, 0x100, false).unwrap();
    assert!(engine.delete(&mut machine, old));

    let new = engine.add_code(&machine, 0, 0x200, false).unwrap();
    assert_eq!(old.index(), new.index());
    assert_ne!(old, new);
    assert!(!engine.delete(&mut machine, old));
    assert!(engine.store().get(new).is_some());
}

#[test]
fn test_interrupt_breakpoint_filters_on_ah()
{
    let mut machine = SimMachine::new(64);
    let mut session = DebugSession::new();
    let mut engine = BreakpointEngine::new();
    engine.add_interrupt(0x21, AhMatch::Value(0x4c), false);
    engine.set_activation(&mut machine, LinearAddress::ZERO, true);
    let at = LinearAddress::new(0x500);

    assert!(engine.check_interrupt(&mut session, &mut machine, at, 0x21, 0x4c).is_some());
    assert!(engine.check_interrupt(&mut session, &mut machine, at, 0x21, 0x09).is_none());
    assert!(engine.check_interrupt(&mut session, &mut machine, at, 0x10, 0x4c).is_none());
}

#[test]
fn test_interrupt_wildcard_matches_any_ah()
{
    let mut machine = SimMachine::new(64);
    let mut session = DebugSession::new();
    let mut engine = BreakpointEngine::new();
    engine.add_interrupt(0x10, AhMatch::Any, false);
    engine.set_activation(&mut machine, LinearAddress::ZERO, true);
    let at = LinearAddress::new(0x500);

    assert!(engine.check_interrupt(&mut session, &mut machine, at, 0x10, 0x00).is_some());
    // Ignore-once swallows the next match.
    assert!(engine.check_interrupt(&mut session, &mut machine, at, 0x10, 0x0e).is_none());
    assert!(engine.check_interrupt(&mut session, &mut machine, at, 0x10, 0xff).is_some());
}

#[test]
fn test_ignore_address_is_one_shot()
{
    let at = LinearAddress::new(0x10010);
    let mut machine = machine_with(at, &[0x90]);
    let mut session = DebugSession::new();
    let mut engine = BreakpointEngine::new();
    engine.add_code(&machine, 0x1000, 0x0010, false).unwrap();
    engine.set_activation(&mut machine, LinearAddress::ZERO, true);

    session.set_ignore_address(Some(at));
    assert!(engine.check_code(&mut session, &mut machine, 0x1000, 0x0010).is_none());
    assert_eq!(session.ignore_address(), None);
    assert!(engine.check_code(&mut session, &mut machine, 0x1000, 0x0010).is_some());
}

#[test]
fn test_inactive_breakpoints_never_fire()
{
    let mut machine = machine_with(LinearAddress::new(0x10010), &[0x90]);
    let mut session = DebugSession::new();
    let mut engine = BreakpointEngine::new();
    engine.add_code(&machine, 0x1000, 0x0010, false).unwrap();
    engine.add_interrupt(0x21, AhMatch::Any, false);

    assert!(engine.check_code(&mut session, &mut machine, 0x1000, 0x0010).is_none());
    assert!(engine.check_interrupt(&mut session, &mut machine, LinearAddress::ZERO, 0x21, 0).is_none());
}

#[test]
fn test_activation_cycles_restore_original_byte()
{
    let at = LinearAddress::new(0x10010);
    let mut machine = machine_with(at, &[0xa2]);
    let mut engine = BreakpointEngine::new();
    engine.add_code(&machine, 0x1000, 0x0010, false).unwrap();

    for _ in 0..10 {
        engine.set_activation(&mut machine, LinearAddress::ZERO, true);
        assert_eq!(machine.read_u8(at), TRAP_OPCODE);
        engine.set_activation(&mut machine, LinearAddress::ZERO, false);
        assert_eq!(machine.read_u8(at), 0xa2);
    }
}

#[test]
fn test_two_breakpoints_at_one_address_restore_once()
{
    let at = LinearAddress::new(0x10010);
    let mut machine = machine_with(at, &[0x90]);
    let mut engine = BreakpointEngine::new();
    engine.add_code(&machine, 0x1000, 0x0010, false).unwrap();
    engine.add_code(&machine, 0x1001, 0x0000, true).unwrap();

    engine.set_activation(&mut machine, LinearAddress::ZERO, true);
    assert_eq!(machine.read_u8(at), TRAP_OPCODE);
    engine.set_activation(&mut machine, LinearAddress::ZERO, false);
    assert_eq!(machine.read_u8(at), 0x90);
}

#[test]
fn test_clear_empties_store_and_memory()
{
    let at = LinearAddress::new(0x10010);
    let mut machine = machine_with(at, &[0x90]);
    let mut engine = BreakpointEngine::new();
    engine.add_code(&machine, 0x1000, 0x0010, false).unwrap();
    engine.add_code(&machine, 0x1000, 0x0010, true).unwrap();
    engine.add_interrupt(0x21, AhMatch::Any, false);
    engine.set_activation(&mut machine, LinearAddress::ZERO, true);

    assert_eq!(engine.clear(&mut machine), 3);
    assert!(engine.store().is_empty());
    assert!(!engine.store().exists_at(at));
    assert!(!engine.store().is_visible_at(at));
    assert_eq!(machine.read_u8(at), 0x90);
}

#[test]
fn test_visibility_hides_once_breakpoints()
{
    let machine = SimMachine::new(64);
    let mut engine = BreakpointEngine::new();
    let at = LinearAddress::new(0x100);
    engine.add_code(&machine, 0, 0x100, true).unwrap();

    assert!(engine.store().exists_at(at));
    assert!(!engine.store().is_visible_at(at));

    engine.add_code(&machine, 0, 0x100, false).unwrap();
    assert!(engine.store().is_visible_at(at));
}

#[test]
fn test_delete_at_removes_newest_code_breakpoint()
{
    let at = LinearAddress::new(0x10010);
    let mut machine = machine_with(at, &[0x90]);
    let mut engine = BreakpointEngine::new();
    let first = engine.add_code(&machine, 0x1000, 0x0010, false).unwrap();
    let second = engine.add_code(&machine, 0x1000, 0x0010, false).unwrap();

    assert!(engine.delete_at(&mut machine, at));
    assert!(engine.store().get(second).is_none());
    assert!(engine.store().get(first).is_some());
    assert!(!engine.delete_at(&mut machine, LinearAddress::new(0x42)));
}

#[test]
fn test_list_is_newest_first()
{
    let machine = SimMachine::new(64);
    let mut engine = BreakpointEngine::new();
    engine.add(&machine, &BreakpointSpec::Code { segment: 0x10, offset: 4, once: false }).unwrap();
    engine
        .add(&machine, &BreakpointSpec::Interrupt { number: 0x21, ah: Some(0x4c), once: true })
        .unwrap();

    let list = engine.list();
    assert_eq!(list.len(), 2);
    assert_eq!(list[0].target, BreakpointTarget::Interrupt { number: 0x21, ah: Some(0x4c) });
    assert!(list[0].once);
    assert_eq!(
        list[1].target,
        BreakpointTarget::Code {
            segment: 0x10,
            offset: 4,
            linear: 0x104,
        }
    );
}

#[cfg(feature = "memory-watch")]
#[test]
fn test_memory_watch_triggers_once_per_change()
{
    let at = LinearAddress::new(0x10200);
    let mut machine = machine_with(at, &[0x41]);
    let mut engine = BreakpointEngine::new();
    let id = engine.add_memory_watch(&machine, 0x1000, 0x200, WatchMode::Real);
    engine.set_activation(&mut machine, LinearAddress::ZERO, true);

    for _ in 0..3 {
        assert!(engine.check_memory_watches(&machine).is_empty());
    }

    machine.write_u8(at, 0x42);
    let hits = engine.check_memory_watches(&machine);
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].id, id);
    assert_eq!((hits[0].old, hits[0].new), (0x41, 0x42));
    assert!(engine.check_memory_watches(&machine).is_empty());

    machine.write_u8(at, 0x41);
    assert_eq!(engine.check_memory_watches(&machine).len(), 1);
}

#[cfg(feature = "memory-watch")]
#[test]
fn test_linear_watch_ignores_segment()
{
    let at = LinearAddress::new(0x41c);
    let mut machine = SimMachine::new(64);
    let mut engine = BreakpointEngine::new();
    engine.add_memory_watch(&machine, 0xffff, 0x41c, WatchMode::Linear);
    engine.set_activation(&mut machine, LinearAddress::ZERO, true);

    machine.write_u8(at, 7);
    let hits = engine.check_memory_watches(&machine);
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].address, at);
}

#[cfg(feature = "memory-watch")]
#[test]
fn test_protected_watch_needs_protected_mode()
{
    use debugbox_core::types::Descriptor;

    let mut machine = SimMachine::new(256);
    let mut engine = BreakpointEngine::new();
    machine.insert_descriptor(
        0x08,
        Descriptor {
            base: 0x20000,
            limit: 0xffff,
            ..Descriptor::default()
        },
    );
    engine.add_memory_watch(&machine, 0x08, 0x10, WatchMode::Protected);
    engine.set_activation(&mut machine, LinearAddress::ZERO, true);

    // Real mode: the watch is dormant even though the byte changes.
    machine.write_u8(LinearAddress::new(0x20010), 1);
    assert!(engine.check_memory_watches(&machine).is_empty());

    machine.set_protected(true);
    let hits = engine.check_memory_watches(&machine);
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].address, LinearAddress::new(0x20010));
}
