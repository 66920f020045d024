//! CPU mode and descriptor types.

use debugbox_protocol::{CpuInfo, DescriptorInfo};

/// Mode flags reported by the CPU collaborator
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CpuMode
{
    /// Protected mode is enabled.
    pub protected: bool,
    /// Virtual-8086 mode is active (only meaningful in protected mode).
    pub vm86: bool,
    /// The current code segment is a 32-bit segment.
    pub big_code: bool,
}

impl CpuMode
{
    /// Whether selectors must be translated through the descriptor table.
    #[must_use]
    pub const fn uses_descriptors(self) -> bool
    {
        self.protected && !self.vm86
    }
}

impl From<CpuMode> for CpuInfo
{
    fn from(mode: CpuMode) -> Self
    {
        Self {
            protected: mode.protected,
            vm86: mode.vm86,
            big_code: mode.big_code,
        }
    }
}

/// A segment or gate descriptor as stored in the GDT/LDT
///
/// The descriptor table itself belongs to the CPU collaborator; the engine
/// only asks it to resolve a selector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Descriptor
{
    /// Linear base address of the segment.
    pub base: u32,
    /// Segment limit (already scaled by the granularity bit).
    pub limit: u32,
    /// Raw 5-bit type field (including the S bit).
    pub kind: u8,
    /// Descriptor privilege level.
    pub dpl: u8,
    /// Present bit.
    pub present: bool,
    /// Default operand size is 32 bits.
    pub big: bool,
    /// Limit is counted in 4 KiB pages.
    pub granularity: bool,
}

impl Descriptor
{
    /// Convert into the wire representation for `selector`.
    #[must_use]
    pub const fn to_info(self, selector: u16) -> DescriptorInfo
    {
        DescriptorInfo {
            selector,
            base: self.base,
            limit: self.limit,
            kind: self.kind,
            dpl: self.dpl,
            present: self.present,
            big: self.big,
            granularity: self.granularity,
        }
    }
}
