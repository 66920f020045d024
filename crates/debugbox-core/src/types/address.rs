//! Guest address types.

use std::fmt;
use std::ops::{Add, Sub};

/// Strongly typed linear address in the emulated address space
///
/// A linear address is what a `segment:offset` pair becomes after segment
/// translation (real-mode shifting or a descriptor base). The wrapper keeps
/// linear addresses from being mixed up with offsets, selectors or byte
/// counts, which are all plain integers as well.
///
/// Arithmetic wraps at 32 bits, matching the guest's address arithmetic.
///
/// ## Example
///
/// ```rust
/// use debugbox_core::types::LinearAddress;
///
/// let addr = LinearAddress::from(0x1_0010);
/// assert_eq!((addr + 0x10).value(), 0x1_0020);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LinearAddress(u32);

impl LinearAddress
{
    /// Address 0, the bottom of the interrupt vector table.
    pub const ZERO: Self = LinearAddress(0);

    /// Create a new address from a `u32` value
    ///
    /// ## Example
    ///
    /// ```rust
    /// use debugbox_core::types::LinearAddress;
    ///
    /// const VIDEO_RAM: LinearAddress = LinearAddress::new(0xb8000);
    /// ```
    #[must_use]
    pub const fn new(value: u32) -> Self
    {
        LinearAddress(value)
    }

    /// Get the raw `u32` value of this address
    #[must_use]
    pub const fn value(self) -> u32
    {
        self.0
    }

    /// Add an offset to this address, checking for overflow
    #[must_use]
    pub fn checked_add(self, offset: u32) -> Option<Self>
    {
        self.0.checked_add(offset).map(LinearAddress)
    }
}

impl From<u32> for LinearAddress
{
    fn from(value: u32) -> Self
    {
        LinearAddress(value)
    }
}

impl From<LinearAddress> for u32
{
    fn from(address: LinearAddress) -> Self
    {
        address.0
    }
}

impl fmt::Display for LinearAddress
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "0x{:08x}", self.0)
    }
}

impl Add<u32> for LinearAddress
{
    type Output = LinearAddress;

    fn add(self, rhs: u32) -> Self::Output
    {
        LinearAddress(self.0.wrapping_add(rhs))
    }
}

impl Sub<u32> for LinearAddress
{
    type Output = LinearAddress;

    fn sub(self, rhs: u32) -> Self::Output
    {
        LinearAddress(self.0.wrapping_sub(rhs))
    }
}

/// A `segment:offset` pair as written by the guest
///
/// In protected mode the segment is a selector. The offset is 32 bits wide so
/// that 32-bit code segments can be addressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SegmentedAddress
{
    /// Segment value or protected-mode selector.
    pub segment: u16,
    /// Offset inside the segment.
    pub offset: u32,
}

impl SegmentedAddress
{
    /// Create a new `segment:offset` pair.
    #[must_use]
    pub const fn new(segment: u16, offset: u32) -> Self
    {
        Self { segment, offset }
    }
}

impl From<(u16, u32)> for SegmentedAddress
{
    fn from((segment, offset): (u16, u32)) -> Self
    {
        Self { segment, offset }
    }
}

impl fmt::Display for SegmentedAddress
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "{:04X}:{:04X}", self.segment, self.offset)
    }
}
