//! CPU register identifiers and name parsing.

use std::fmt;
use std::str::FromStr;

use crate::error::DebugError;
use crate::machine::Cpu;

/// 32-bit general-purpose register
///
/// Declared in the order the register snapshot reports them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GeneralRegister
{
    Eax,
    Ebx,
    Ecx,
    Edx,
    Esi,
    Edi,
    Ebp,
    Esp,
}

/// Segment register
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SegmentRegister
{
    Es,
    Cs,
    Ss,
    Ds,
    Fs,
    Gs,
}

impl SegmentRegister
{
    /// Every segment register, in encoding order.
    pub const ALL: [SegmentRegister; 6] = [Self::Es, Self::Cs, Self::Ss, Self::Ds, Self::Fs, Self::Gs];
}

/// A full-width register of the CPU collaborator
///
/// This is the granularity at which the collaborator exposes its register
/// file. Narrower views (`ax`, `ip`, `flags`) are handled by
/// [`RegisterName`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Register
{
    /// EAX..ESP
    General(GeneralRegister),
    /// Instruction pointer
    Eip,
    /// Flags register
    Eflags,
    /// Segment selector (16 bits)
    Segment(SegmentRegister),
}

/// Width of a named register view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegisterWidth
{
    /// Low 16 bits.
    Word,
    /// All 32 bits.
    Dword,
}

impl RegisterWidth
{
    const fn mask(self) -> u32
    {
        match self {
            Self::Word => 0xffff,
            Self::Dword => 0xffff_ffff,
        }
    }
}

/// A register as named by a controller (`eax`, `ax`, `ip`, `cs`, ...)
///
/// Parsing is case-insensitive. Unknown names fail with
/// [`DebugError::UnknownRegister`].
///
/// ## Example
///
/// ```rust
/// use debugbox_core::types::{GeneralRegister, Register, RegisterName, RegisterWidth};
///
/// let name: RegisterName = "AX".parse().unwrap();
/// assert_eq!(name.register(), Register::General(GeneralRegister::Eax));
/// assert_eq!(name.width(), RegisterWidth::Word);
/// assert!("xmm0".parse::<RegisterName>().is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegisterName
{
    register: Register,
    width: RegisterWidth,
}

const NAMES: &[(&str, Register, RegisterWidth)] = &[
    ("eax", Register::General(GeneralRegister::Eax), RegisterWidth::Dword),
    ("ebx", Register::General(GeneralRegister::Ebx), RegisterWidth::Dword),
    ("ecx", Register::General(GeneralRegister::Ecx), RegisterWidth::Dword),
    ("edx", Register::General(GeneralRegister::Edx), RegisterWidth::Dword),
    ("esi", Register::General(GeneralRegister::Esi), RegisterWidth::Dword),
    ("edi", Register::General(GeneralRegister::Edi), RegisterWidth::Dword),
    ("ebp", Register::General(GeneralRegister::Ebp), RegisterWidth::Dword),
    ("esp", Register::General(GeneralRegister::Esp), RegisterWidth::Dword),
    ("ax", Register::General(GeneralRegister::Eax), RegisterWidth::Word),
    ("bx", Register::General(GeneralRegister::Ebx), RegisterWidth::Word),
    ("cx", Register::General(GeneralRegister::Ecx), RegisterWidth::Word),
    ("dx", Register::General(GeneralRegister::Edx), RegisterWidth::Word),
    ("si", Register::General(GeneralRegister::Esi), RegisterWidth::Word),
    ("di", Register::General(GeneralRegister::Edi), RegisterWidth::Word),
    ("bp", Register::General(GeneralRegister::Ebp), RegisterWidth::Word),
    ("sp", Register::General(GeneralRegister::Esp), RegisterWidth::Word),
    ("eip", Register::Eip, RegisterWidth::Dword),
    ("ip", Register::Eip, RegisterWidth::Word),
    ("eflags", Register::Eflags, RegisterWidth::Dword),
    ("efl", Register::Eflags, RegisterWidth::Dword),
    ("flags", Register::Eflags, RegisterWidth::Word),
    ("es", Register::Segment(SegmentRegister::Es), RegisterWidth::Word),
    ("cs", Register::Segment(SegmentRegister::Cs), RegisterWidth::Word),
    ("ss", Register::Segment(SegmentRegister::Ss), RegisterWidth::Word),
    ("ds", Register::Segment(SegmentRegister::Ds), RegisterWidth::Word),
    ("fs", Register::Segment(SegmentRegister::Fs), RegisterWidth::Word),
    ("gs", Register::Segment(SegmentRegister::Gs), RegisterWidth::Word),
];

impl RegisterName
{
    /// The collaborator register backing this name.
    #[must_use]
    pub const fn register(self) -> Register
    {
        self.register
    }

    /// How many bits of the backing register the name covers.
    #[must_use]
    pub const fn width(self) -> RegisterWidth
    {
        self.width
    }

    /// Read the named view from the CPU.
    pub fn read<C: Cpu + ?Sized>(self, cpu: &C) -> u32
    {
        cpu.register(self.register) & self.width.mask()
    }

    /// Write the named view, preserving bits outside it, and return the
    /// previous value of the view.
    pub fn write<C: Cpu + ?Sized>(self, cpu: &mut C, value: u32) -> u32
    {
        let full = cpu.register(self.register);
        let mask = self.width.mask();
        cpu.set_register(self.register, (full & !mask) | (value & mask));
        full & mask
    }
}

impl FromStr for RegisterName
{
    type Err = DebugError;

    fn from_str(s: &str) -> Result<Self, Self::Err>
    {
        let lowered = s.to_ascii_lowercase();
        NAMES
            .iter()
            .find(|(name, _, _)| *name == lowered)
            .map(|&(_, register, width)| Self { register, width })
            .ok_or_else(|| DebugError::UnknownRegister(s.to_string()))
    }
}

impl fmt::Display for RegisterName
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        let name = NAMES
            .iter()
            .find(|(_, register, width)| *register == self.register && *width == self.width)
            .map_or("?", |(name, _, _)| *name);
        f.write_str(name)
    }
}

/// Bit positions in EFLAGS that the engine itself looks at.
pub mod flags
{
    /// Virtual-8086 mode flag.
    pub const VM: u32 = 1 << 17;
}
