//! # Address Resolution
//!
//! Translation of `segment:offset` pairs into linear addresses.
//!
//! The rules, in order:
//!
//! 1. A segment equal to the current CS selector uses the cached CS base,
//!    whatever the CPU mode.
//! 2. In protected mode (outside virtual-8086 mode) the segment is a selector
//!    and is looked up in the descriptor tables. A miss is an error: there is
//!    no fallback address.
//! 3. Otherwise the segment is shifted left by four (real mode arithmetic).
//!
//! All arithmetic wraps at 32 bits.

use tracing::trace;

use crate::error::{DebugError, Result};
use crate::machine::Cpu;
use crate::types::{Descriptor, LinearAddress, SegmentRegister, SegmentedAddress};

/// Borrowing view of a CPU that translates guest addresses
///
/// The resolver reads the CPU state on every call and never caches it, so it
/// is safe to keep one around while the CPU keeps executing.
///
/// ## Example
///
/// ```rust
/// use debugbox_core::machine::SimMachine;
/// use debugbox_core::resolver::AddressResolver;
/// use debugbox_core::types::LinearAddress;
///
/// let machine = SimMachine::new(64);
/// let resolver = AddressResolver::new(&machine);
/// assert_eq!(resolver.resolve(0x1000, 0x10).unwrap(), LinearAddress::new(0x1_0010));
/// ```
#[derive(Debug, Clone, Copy)]
pub struct AddressResolver<'a, C: ?Sized>
{
    cpu: &'a C,
}

impl<'a, C: Cpu + ?Sized> AddressResolver<'a, C>
{
    /// Create a resolver over `cpu`.
    #[must_use]
    pub const fn new(cpu: &'a C) -> Self
    {
        Self { cpu }
    }

    /// Translate `segment:offset` to a linear address
    ///
    /// ## Errors
    ///
    /// Returns [`DebugError::Resolution`] in protected mode when `segment` has
    /// no descriptor.
    pub fn resolve(&self, segment: u16, offset: u32) -> Result<LinearAddress>
    {
        if segment == self.cpu.cs() {
            let base = self.cpu.segment_base(SegmentRegister::Cs);
            return Ok(LinearAddress::new(base) + offset);
        }
        if self.cpu.mode().uses_descriptors() {
            let descriptor = self.resolve_descriptor(segment)?;
            return Ok(LinearAddress::new(descriptor.base) + offset);
        }
        Ok(LinearAddress::new(u32::from(segment) << 4) + offset)
    }

    /// Translate a [`SegmentedAddress`].
    ///
    /// ## Errors
    ///
    /// Same as [`AddressResolver::resolve`].
    pub fn resolve_segmented(&self, address: SegmentedAddress) -> Result<LinearAddress>
    {
        self.resolve(address.segment, address.offset)
    }

    /// Linear address of the current CS:EIP.
    ///
    /// ## Errors
    ///
    /// Never fails in practice since CS always takes the fast path, but the
    /// signature matches [`AddressResolver::resolve`].
    pub fn current(&self) -> Result<LinearAddress>
    {
        self.resolve(self.cpu.cs(), self.cpu.eip())
    }

    /// Fetch the descriptor for `selector`.
    ///
    /// ## Errors
    ///
    /// Returns [`DebugError::Resolution`] when the tables have no entry.
    pub fn resolve_descriptor(&self, selector: u16) -> Result<Descriptor>
    {
        self.cpu.descriptor(selector).ok_or_else(|| {
            trace!(selector, "descriptor lookup missed");
            DebugError::Resolution { selector }
        })
    }
}
