//! Reference machine used by the tests and the `serve` command.
//!
//! `SimMachine` is deliberately tiny: flat guest memory, a register file, a
//! descriptor table and an executor that understands a handful of opcodes.
//! That is enough to drive every path of the engine (traps, software
//! interrupts, memory changes, IRQ handlers, callbacks) without a real
//! emulator core.
//!
//! | opcode        | instruction               |
//! |---------------|---------------------------|
//! | `90`          | `nop`                     |
//! | `CC`          | `int3` (no-op when stepped) |
//! | `CD ib`       | `int ib` (recorded, not vectored) |
//! | `B0+r ib`     | `mov r8, ib`              |
//! | `A2 moffs`    | `mov [moffs], al` (DS relative) |
//! | `EB cb`       | `jmp short`               |
//! | `CF`          | `iret` from a dispatched IRQ |
//! | `F4`          | `hlt`                     |
//! | `FE 38 iw`    | emulator callback `iw`    |
//!
//! Anything else executes as a one byte no-op.

use std::collections::HashMap;

use debugbox_protocol::Transport;
use tracing::{debug, trace};

use super::{selector, Cpu, GuestMemory, Host, ProgramLoader};
use crate::debug_loop::DebugLoop;
use crate::error::Result;
use crate::types::registers::flags;
use crate::types::{CpuMode, Descriptor, GeneralRegister, LinearAddress, Register, SegmentRegister};

/// First segment handed out by the paragraph allocator.
const HEAP_START: u32 = 0x0800;

/// Top of conventional memory, in paragraphs.
const CONVENTIONAL_END: u32 = 0xa000;

/// Flat-memory machine with a minimal executor.
#[derive(Debug, Clone)]
pub struct SimMachine
{
    memory: Vec<u8>,
    general: [u32; 8],
    eip: u32,
    eflags: u32,
    segments: [u16; 6],
    protected: bool,
    descriptors: HashMap<u16, Descriptor>,
    callbacks: HashMap<u16, String>,
    pending_irq: Option<(u16, u32)>,
    irq_return: Option<(u16, u32)>,
    debug_loop_selected: bool,
    events_processed: u64,
    interrupts: Vec<u8>,
    halted: bool,
    heap_next: u32,
    heap_end: u32,
    allocations: Vec<(u16, u16)>,
    executed: Vec<ExecutedProgram>,
    program_entry: Option<(u16, u32)>,
}

/// A program run through [`ProgramLoader::execute_program`], with the stack
/// it was started on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutedProgram
{
    pub program: String,
    pub args: String,
    pub ss: u16,
    pub sp: u32,
}

impl SimMachine
{
    /// Create a real-mode machine with `memory_kb` KiB of guest memory
    ///
    /// All registers start at zero except `eflags`, which has its reserved
    /// bit 1 set.
    #[must_use]
    pub fn new(memory_kb: usize) -> Self
    {
        let memory = vec![0; memory_kb * 1024];
        let paragraphs = u32::try_from(memory.len() / 16).unwrap_or(u32::MAX);
        Self {
            memory,
            general: [0; 8],
            eip: 0,
            eflags: 0x2,
            segments: [0; 6],
            protected: false,
            descriptors: HashMap::new(),
            callbacks: HashMap::new(),
            pending_irq: None,
            irq_return: None,
            debug_loop_selected: false,
            events_processed: 0,
            interrupts: Vec::new(),
            halted: false,
            heap_next: HEAP_START,
            heap_end: paragraphs.min(CONVENTIONAL_END),
            allocations: Vec::new(),
            executed: Vec::new(),
            program_entry: None,
        }
    }

    /// Copy `bytes` into guest memory at `address`, dropping whatever falls
    /// past the end.
    pub fn load(&mut self, address: LinearAddress, bytes: &[u8])
    {
        for (i, &byte) in (0u32..).zip(bytes) {
            self.write_u8(address + i, byte);
        }
    }

    /// Point CS:EIP at `segment:offset`.
    pub fn jump(&mut self, segment: u16, offset: u32)
    {
        self.segments[seg_index(SegmentRegister::Cs)] = segment;
        self.eip = offset;
        self.halted = false;
    }

    /// Set a segment register.
    pub fn set_segment(&mut self, segment: SegmentRegister, value: u16)
    {
        self.segments[seg_index(segment)] = value;
    }

    /// Enable or disable protected mode.
    pub fn set_protected(&mut self, protected: bool)
    {
        self.protected = protected;
    }

    /// Install a descriptor for `selector`.
    pub fn insert_descriptor(&mut self, selector: u16, descriptor: Descriptor)
    {
        self.descriptors.insert(selector, descriptor);
    }

    /// Give a name to an emulator callback slot.
    pub fn register_callback(&mut self, index: u16, description: impl Into<String>)
    {
        self.callbacks.insert(index, description.into());
    }

    /// Queue a hardware interrupt whose handler lives at `segment:offset`.
    ///
    /// It is delivered by the next [`Host::dispatch_interrupts`].
    pub fn raise_irq(&mut self, segment: u16, offset: u32)
    {
        self.pending_irq = Some((segment, offset));
    }

    /// Limit the paragraph allocator to `paragraphs` more paragraphs.
    pub fn limit_heap(&mut self, paragraphs: u32)
    {
        self.heap_end = self.heap_next.saturating_add(paragraphs);
    }

    /// Entry point reported for every program the loader starts.
    pub fn set_program_entry(&mut self, segment: u16, offset: u32)
    {
        self.program_entry = Some((segment, offset));
    }

    /// Whether the scheduler currently runs the debug loop.
    #[must_use]
    pub const fn debug_loop_selected(&self) -> bool
    {
        self.debug_loop_selected
    }

    /// Number of times the host event layer ran.
    #[must_use]
    pub const fn events_processed(&self) -> u64
    {
        self.events_processed
    }

    /// Software interrupts executed so far, oldest first.
    #[must_use]
    pub fn interrupts(&self) -> &[u8]
    {
        &self.interrupts
    }

    /// Programs started through the loader.
    #[must_use]
    pub fn executed(&self) -> &[ExecutedProgram]
    {
        &self.executed
    }

    /// Blocks currently allocated as `(segment, paragraphs)`.
    #[must_use]
    pub fn allocations(&self) -> &[(u16, u16)]
    {
        &self.allocations
    }

    /// Whether the CPU is sitting on a `hlt`.
    #[must_use]
    pub const fn halted(&self) -> bool
    {
        self.halted
    }

    /// Linear address of CS:EIP.
    #[must_use]
    pub fn code_address(&self) -> LinearAddress
    {
        LinearAddress::new(self.segment_base(SegmentRegister::Cs)) + self.eip
    }

    /// Run the scheduler for at most `budget` slices
    ///
    /// Each slice is either one debug loop tick or one instruction of the
    /// normal loop, depending on which loop the host currently selects. The
    /// normal loop reports traps, software interrupts and (with
    /// `memory-watch`) memory changes to `debugger` before and after each
    /// instruction.
    ///
    /// Returns the first nonzero exit code, or 0 when the budget runs out.
    ///
    /// ## Errors
    ///
    /// Propagates transport failures from the debug loop.
    pub fn run<T: Transport>(&mut self, debugger: &mut DebugLoop<T>, budget: u64) -> Result<u32>
    {
        for _ in 0..budget {
            let code = if self.debug_loop_selected {
                debugger.tick(self)?
            } else {
                self.normal_step(debugger)
            };
            if code != 0 {
                return Ok(code);
            }
            if debugger.take_exit_request() {
                trace!("slice cut short by debugger entry");
            }
        }
        Ok(0)
    }

    fn normal_step<T: Transport>(&mut self, debugger: &mut DebugLoop<T>) -> u32
    {
        if self.halted {
            return 0;
        }
        let at = self.code_address();
        match self.read_u8(at) {
            0xcc if debugger.on_trap(self) => return 0,
            0xcd => {
                let number = self.read_u8(at + 1);
                if debugger.on_interrupt(self, number) {
                    return 0;
                }
            }
            _ => {}
        }
        let code = self.step();
        #[cfg(feature = "memory-watch")]
        debugger.on_instruction(self);
        code
    }

    fn fetch(&self, offset: u32) -> u8
    {
        self.read_u8(self.code_address() + offset)
    }

    fn advance(&mut self, length: u32)
    {
        self.eip = self.mask_ip(self.eip.wrapping_add(length));
    }

    fn mask_ip(&self, eip: u32) -> u32
    {
        if self.mode().big_code {
            eip
        } else {
            eip & 0xffff
        }
    }

    fn set_byte_register(&mut self, code: u8, value: u8)
    {
        // al cl dl bl ah ch dh bh
        const ORDER: [GeneralRegister; 4] = [
            GeneralRegister::Eax,
            GeneralRegister::Ecx,
            GeneralRegister::Edx,
            GeneralRegister::Ebx,
        ];
        let register = ORDER[usize::from(code & 3)] as usize;
        let shift = if code & 4 == 0 { 0 } else { 8 };
        let full = self.general[register];
        self.general[register] = (full & !(0xff << shift)) | (u32::from(value) << shift);
    }
}

const fn seg_index(segment: SegmentRegister) -> usize
{
    match segment {
        SegmentRegister::Es => 0,
        SegmentRegister::Cs => 1,
        SegmentRegister::Ss => 2,
        SegmentRegister::Ds => 3,
        SegmentRegister::Fs => 4,
        SegmentRegister::Gs => 5,
    }
}

impl GuestMemory for SimMachine
{
    fn read_u8_checked(&self, address: LinearAddress) -> Option<u8>
    {
        self.memory.get(usize::try_from(address.value()).ok()?).copied()
    }

    fn write_u8(&mut self, address: LinearAddress, value: u8) -> bool
    {
        let Ok(index) = usize::try_from(address.value()) else {
            return false;
        };
        match self.memory.get_mut(index) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }
}

impl Cpu for SimMachine
{
    fn register(&self, register: Register) -> u32
    {
        match register {
            Register::General(general) => self.general[general as usize],
            Register::Eip => self.eip,
            Register::Eflags => self.eflags,
            Register::Segment(segment) => u32::from(self.segments[seg_index(segment)]),
        }
    }

    fn set_register(&mut self, register: Register, value: u32)
    {
        match register {
            Register::General(general) => self.general[general as usize] = value,
            Register::Eip => self.eip = value,
            Register::Eflags => self.eflags = value | 0x2,
            Register::Segment(segment) => self.segments[seg_index(segment)] = selector(value),
        }
    }

    fn segment_base(&self, segment: SegmentRegister) -> u32
    {
        let value = self.segments[seg_index(segment)];
        if self.mode().protected && !self.mode().vm86 {
            self.descriptors.get(&value).map_or(0, |descriptor| descriptor.base)
        } else {
            u32::from(value) << 4
        }
    }

    fn mode(&self) -> CpuMode
    {
        let vm86 = self.protected && self.eflags & flags::VM != 0;
        let cs = self.segments[seg_index(SegmentRegister::Cs)];
        let big_code =
            self.protected && !vm86 && self.descriptors.get(&cs).is_some_and(|descriptor| descriptor.big);
        CpuMode {
            protected: self.protected,
            vm86,
            big_code,
        }
    }

    fn descriptor(&self, selector: u16) -> Option<Descriptor>
    {
        self.descriptors.get(&selector).copied()
    }

    fn step(&mut self) -> u32
    {
        if self.halted {
            return 0;
        }
        let opcode = self.fetch(0);
        trace!(opcode = format_args!("{opcode:02x}"), eip = self.eip, "sim step");
        match opcode {
            0xcd => {
                self.interrupts.push(self.fetch(1));
                self.advance(2);
            }
            0xb0..=0xb7 => {
                let value = self.fetch(1);
                self.set_byte_register(opcode - 0xb0, value);
                self.advance(2);
            }
            0xa2 => {
                let (offset, length) = if self.mode().big_code {
                    let bytes = [self.fetch(1), self.fetch(2), self.fetch(3), self.fetch(4)];
                    (u32::from_le_bytes(bytes), 5)
                } else {
                    (u32::from(u16::from_le_bytes([self.fetch(1), self.fetch(2)])), 3)
                };
                let target = LinearAddress::new(self.segment_base(SegmentRegister::Ds)) + offset;
                #[allow(clippy::cast_possible_truncation)]
                let al = self.general[GeneralRegister::Eax as usize] as u8;
                self.write_u8(target, al);
                self.advance(length);
            }
            0xeb => {
                #[allow(clippy::cast_possible_wrap)]
                let displacement = i32::from(self.fetch(1) as i8);
                self.advance(2_u32.wrapping_add_signed(displacement));
            }
            0xcf => match self.irq_return.take() {
                Some((segment, offset)) => self.jump(segment, offset),
                None => self.advance(1),
            }
            0xf4 => {
                self.halted = true;
                self.advance(1);
            }
            0xfe if self.fetch(1) == 0x38 => {
                let index = u16::from_le_bytes([self.fetch(2), self.fetch(3)]);
                self.advance(4);
                debug!(index, "sim callback");
                return u32::from(index);
            }
            _ => self.advance(1),
        }
        0
    }

    fn callback_description(&self, index: u16) -> Option<String>
    {
        self.callbacks.get(&index).cloned()
    }
}

impl Host for SimMachine
{
    fn process_events(&mut self)
    {
        self.events_processed += 1;
    }

    fn dispatch_interrupts(&mut self)
    {
        if let Some((segment, offset)) = self.pending_irq.take() {
            self.irq_return = Some((self.cs(), self.eip));
            self.jump(segment, offset);
        }
    }

    fn enter_debug_loop(&mut self)
    {
        self.debug_loop_selected = true;
    }

    fn enter_normal_loop(&mut self)
    {
        self.debug_loop_selected = false;
    }
}

impl ProgramLoader for SimMachine
{
    fn allocate_paragraphs(&mut self, paragraphs: u16) -> Option<u16>
    {
        let end = self.heap_next.checked_add(u32::from(paragraphs))?;
        if end > self.heap_end {
            return None;
        }
        let segment = u16::try_from(self.heap_next).ok()?;
        self.heap_next = end;
        self.allocations.push((segment, paragraphs));
        Some(segment)
    }

    fn free_paragraphs(&mut self, segment: u16)
    {
        if let Some(position) = self.allocations.iter().position(|&(start, _)| start == segment) {
            let (start, size) = self.allocations.remove(position);
            if u32::from(start) + u32::from(size) == self.heap_next {
                self.heap_next = u32::from(start);
            }
        }
    }

    fn execute_program(&mut self, program: &str, args: &str, at_entry: &mut dyn FnMut(&mut Self, u16, u32))
    {
        self.executed.push(ExecutedProgram {
            program: program.to_string(),
            args: args.to_string(),
            ss: self.segments[seg_index(SegmentRegister::Ss)],
            sp: self.general[GeneralRegister::Esp as usize],
        });
        if let Some((segment, offset)) = self.program_entry {
            at_entry(self, segment, offset);
        }
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_unmapped_reads_degrade_to_zero()
    {
        let machine = SimMachine::new(1);
        assert_eq!(machine.read_u8_checked(LinearAddress::new(0x400)), None);
        assert_eq!(machine.read_u32(LinearAddress::new(0x3fe)), 0);
        assert_eq!(machine.read_u8(LinearAddress::new(0x3ff)), 0);
    }

    #[test]
    fn test_mov_and_store()
    {
        let mut machine = SimMachine::new(64);
        machine.set_segment(SegmentRegister::Ds, 0x200);
        machine.load(LinearAddress::new(0x1000), &[0xb0, 0x41, 0xb4, 0x4c, 0xa2, 0x10, 0x00]);
        machine.jump(0x100, 0);

        assert_eq!(machine.step(), 0);
        assert_eq!(machine.step(), 0);
        assert_eq!(machine.register(Register::General(GeneralRegister::Eax)), 0x4c41);
        assert_eq!(machine.step(), 0);
        assert_eq!(machine.read_u8(LinearAddress::new(0x2010)), 0x41);
        assert_eq!(machine.eip(), 7);
    }

    #[test]
    fn test_callback_returns_code()
    {
        let mut machine = SimMachine::new(64);
        machine.load(LinearAddress::new(0), &[0xfe, 0x38, 0x05, 0x00, 0x90]);
        assert_eq!(machine.step(), 5);
        assert_eq!(machine.eip(), 4);
    }

    #[test]
    fn test_jmp_short_to_self()
    {
        let mut machine = SimMachine::new(64);
        machine.load(LinearAddress::new(0x1000), &[0xeb, 0xfe]);
        machine.jump(0x100, 0);
        machine.step();
        assert_eq!(machine.eip(), 0);
    }

    #[test]
    fn test_allocator_limits_and_frees()
    {
        let mut machine = SimMachine::new(640);
        machine.limit_heap(0x20);
        let segment = machine.allocate_paragraphs(0x20).unwrap();
        assert_eq!(machine.allocate_paragraphs(1), None);
        machine.free_paragraphs(segment);
        assert_eq!(machine.allocate_paragraphs(0x20), Some(segment));
    }

    #[test]
    fn test_protected_segment_base_uses_descriptor()
    {
        let mut machine = SimMachine::new(64);
        machine.set_protected(true);
        machine.insert_descriptor(
            0x08,
            Descriptor {
                base: 0x4000,
                limit: 0xffff,
                big: true,
                present: true,
                ..Descriptor::default()
            }
        );
        machine.jump(0x08, 0x10);
        assert_eq!(machine.code_address(), LinearAddress::new(0x4010));
        assert!(machine.mode().big_code);
    }
}
