//! Tests for segment translation

use debugbox_core::machine::{Cpu, SimMachine};
use debugbox_core::types::registers::flags;
use debugbox_core::types::{Descriptor, Register, SegmentRegister};
use debugbox_core::{AddressResolver, DebugError, LinearAddress, SegmentedAddress};

fn protected_machine() -> SimMachine
{
    let mut machine = SimMachine::new(64);
    machine.set_protected(true);
    machine.insert_descriptor(
        0x08,
        Descriptor {
            base: 0x0010_0000,
            limit: 0xffff,
            ..Descriptor::default()
        },
    );
    machine.insert_descriptor(
        0x10,
        Descriptor {
            base: 0x0020_0000,
            limit: 0xffff,
            big: true,
            ..Descriptor::default()
        },
    );
    machine
}

#[test]
fn test_real_mode_shifts_segment()
{
    let machine = SimMachine::new(64);
    let resolver = AddressResolver::new(&machine);
    assert_eq!(resolver.resolve(0xb800, 0x10).unwrap(), LinearAddress::new(0xb8010));
    assert_eq!(
        resolver.resolve_segmented(SegmentedAddress::new(0xffff, 0x10)).unwrap(),
        LinearAddress::new(0x10_0000)
    );
}

#[test]
fn test_offset_arithmetic_wraps()
{
    let machine = SimMachine::new(64);
    let resolver = AddressResolver::new(&machine);
    assert_eq!(resolver.resolve(0x10, u32::MAX).unwrap(), LinearAddress::new(0xff));
}

#[test]
fn test_code_segment_fast_path_in_every_mode()
{
    let mut machine = protected_machine();
    machine.jump(0x10, 0x1234);
    let base = machine.segment_base(SegmentRegister::Cs);
    assert_eq!(base, 0x0020_0000);
    for offset in [0, 0x10, 0xffff, 0x0001_0000] {
        let resolved = AddressResolver::new(&machine).resolve(0x10, offset).unwrap();
        assert_eq!(resolved, LinearAddress::new(base) + offset);
    }

    machine.set_protected(false);
    machine.jump(0x2000, 0);
    for offset in [0, 0x10, 0xffff] {
        let resolved = AddressResolver::new(&machine).resolve(0x2000, offset).unwrap();
        assert_eq!(resolved, LinearAddress::new(0x20000) + offset);
    }
}

#[test]
fn test_protected_mode_uses_descriptor_base()
{
    let mut machine = protected_machine();
    machine.jump(0x10, 0);
    let resolver = AddressResolver::new(&machine);
    assert_eq!(resolver.resolve(0x08, 0x20).unwrap(), LinearAddress::new(0x0010_0020));
    assert_eq!(resolver.resolve_descriptor(0x08).unwrap().base, 0x0010_0000);
}

#[test]
fn test_descriptor_miss_is_an_error()
{
    let mut machine = protected_machine();
    machine.jump(0x10, 0);
    let err = AddressResolver::new(&machine).resolve(0x28, 0).unwrap_err();
    assert!(matches!(err, DebugError::Resolution { selector: 0x28 }));
}

#[test]
fn test_vm86_uses_real_mode_arithmetic()
{
    let mut machine = protected_machine();
    let eflags = machine.register(Register::Eflags);
    machine.set_register(Register::Eflags, eflags | flags::VM);
    assert!(machine.mode().vm86);

    let resolver = AddressResolver::new(&machine);
    assert_eq!(resolver.resolve(0x28, 4).unwrap(), LinearAddress::new(0x284));
}

#[test]
fn test_current_is_cs_eip()
{
    let mut machine = SimMachine::new(64);
    machine.jump(0x1234, 0x0100);
    assert_eq!(AddressResolver::new(&machine).current().unwrap(), LinearAddress::new(0x12440));
}
