//! # Machine Collaborators
//!
//! Traits through which the engine talks to the emulated machine.
//!
//! The engine never owns the CPU, guest memory or the host event layer. It
//! borrows them through these traits for the duration of a single call, so
//! nothing read from the machine survives a call that could re-enter the
//! engine.
//!
//! - [`GuestMemory`]: checked byte/word/dword access at linear addresses
//! - [`Cpu`]: register file, mode flags, descriptor table, single-step
//! - [`Host`]: event pump, IRQ dispatch and loop switching
//! - [`ProgramLoader`]: DOS memory blocks and program execution
//!
//! [`SimMachine`] implements all four and is what the tests and the `serve`
//! command run against.

pub mod sim;

pub use sim::SimMachine;

use crate::types::{CpuMode, Descriptor, LinearAddress, Register, SegmentRegister};

/// Guest memory addressed linearly
///
/// Checked reads report whether the location exists. Unchecked reads degrade
/// to zero, which is what every debugger-facing read wants: probing unmapped
/// memory must never fail the caller.
///
/// Multi-byte accesses are little-endian and composed from byte accesses
/// unless the implementation overrides them.
pub trait GuestMemory
{
    /// Read one byte, or `None` if the address is not backed by memory.
    fn read_u8_checked(&self, address: LinearAddress) -> Option<u8>;

    /// Write one byte. Returns `false` if the address is not backed by memory.
    fn write_u8(&mut self, address: LinearAddress, value: u8) -> bool;

    /// Read a little-endian word.
    fn read_u16_checked(&self, address: LinearAddress) -> Option<u16>
    {
        let lo = self.read_u8_checked(address)?;
        let hi = self.read_u8_checked(address + 1)?;
        Some(u16::from_le_bytes([lo, hi]))
    }

    /// Read a little-endian dword.
    fn read_u32_checked(&self, address: LinearAddress) -> Option<u32>
    {
        let lo = self.read_u16_checked(address)?;
        let hi = self.read_u16_checked(address + 2)?;
        Some(u32::from(lo) | (u32::from(hi) << 16))
    }

    /// Read a byte, yielding 0 for unbacked addresses.
    fn read_u8(&self, address: LinearAddress) -> u8
    {
        self.read_u8_checked(address).unwrap_or(0)
    }

    /// Read a word, yielding 0 if any byte is unbacked.
    fn read_u16(&self, address: LinearAddress) -> u16
    {
        self.read_u16_checked(address).unwrap_or(0)
    }

    /// Read a dword, yielding 0 if any byte is unbacked.
    fn read_u32(&self, address: LinearAddress) -> u32
    {
        self.read_u32_checked(address).unwrap_or(0)
    }

    /// Write a little-endian word. Returns `false` if any byte was dropped.
    fn write_u16(&mut self, address: LinearAddress, value: u16) -> bool
    {
        let [lo, hi] = value.to_le_bytes();
        let first = self.write_u8(address, lo);
        let second = self.write_u8(address + 1, hi);
        first && second
    }

    /// Write a little-endian dword. Returns `false` if any byte was dropped.
    fn write_u32(&mut self, address: LinearAddress, value: u32) -> bool
    {
        let bytes = value.to_le_bytes();
        let mut all = true;
        for (i, byte) in (0u32..).zip(bytes) {
            all &= self.write_u8(address + i, byte);
        }
        all
    }
}

/// The emulated CPU
///
/// Guest memory is reached through the CPU because translation (segment
/// bases, descriptors) and access always go together in the engine.
pub trait Cpu: GuestMemory
{
    /// Read a full-width register.
    fn register(&self, register: Register) -> u32;

    /// Write a full-width register.
    fn set_register(&mut self, register: Register, value: u32);

    /// Cached linear base of a segment register.
    fn segment_base(&self, segment: SegmentRegister) -> u32;

    /// Current mode flags.
    fn mode(&self) -> CpuMode;

    /// Look up a selector in the descriptor tables.
    fn descriptor(&self, selector: u16) -> Option<Descriptor>;

    /// Execute exactly one instruction
    ///
    /// Returns a nonzero callback code when the instruction raised an event
    /// that requires the caller's loop to exit, 0 otherwise.
    fn step(&mut self) -> u32;

    /// Human readable description of an emulator callback slot.
    fn callback_description(&self, _index: u16) -> Option<String>
    {
        None
    }

    /// Current code segment selector.
    fn cs(&self) -> u16
    {
        selector(self.register(Register::Segment(SegmentRegister::Cs)))
    }

    /// Current instruction pointer.
    fn eip(&self) -> u32
    {
        self.register(Register::Eip)
    }
}

/// Host side of the emulator: input, hardware interrupts and the choice of
/// run loop.
pub trait Host
{
    /// Let the event layer handle pending input and window events.
    fn process_events(&mut self);

    /// Deliver pending hardware interrupts to the guest.
    fn dispatch_interrupts(&mut self);

    /// Switch the scheduler to the debug loop.
    fn enter_debug_loop(&mut self);

    /// Switch the scheduler back to the normal run loop.
    fn enter_normal_loop(&mut self);
}

/// Guest DOS services used to run a program under the debugger.
pub trait ProgramLoader
{
    /// Allocate a block of `paragraphs` 16-byte paragraphs and return its
    /// segment.
    fn allocate_paragraphs(&mut self, paragraphs: u16) -> Option<u16>;

    /// Release a block returned by [`ProgramLoader::allocate_paragraphs`].
    fn free_paragraphs(&mut self, segment: u16);

    /// Load and run a program with the given command tail
    ///
    /// `at_entry` must be called once the program is loaded, with CS:IP of
    /// its entry point, before its first instruction executes.
    fn execute_program(&mut self, program: &str, args: &str, at_entry: &mut dyn FnMut(&mut Self, u16, u32));
}

#[allow(clippy::cast_possible_truncation)]
pub(crate) const fn selector(value: u32) -> u16
{
    value as u16
}
