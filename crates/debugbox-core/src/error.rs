//! # Error Types
//!
//! General error handling for the breakpoint engine and control server.
//!
//! We use `thiserror` to automatically generate `Error` trait implementations
//! and nice error messages.

use debugbox_protocol::{RemoteError, RemoteErrorKind, TransportError};
use thiserror::Error;

use crate::types::LinearAddress;

/// Main error type for engine and server operations
///
/// ## Error Categories
///
/// 1. **Translation errors**: Resolution
/// 2. **Request errors**: UnknownRegister, ProtocolMalformed
/// 3. **Guest errors**: MemoryUnavailable, ScratchAllocation
/// 4. **Transport errors**: Transport (fatal to the debug loop)
#[derive(Error, Debug)]
pub enum DebugError
{
    /// A segment could not be translated to a linear address
    ///
    /// Raised in protected mode when the descriptor table has no entry for
    /// the selector. There is no fallback address.
    #[error("Cannot resolve selector 0x{selector:04x}: no descriptor")]
    Resolution
    {
        /// The selector that missed the descriptor table.
        selector: u16,
    },

    /// The register name is not recognised
    #[error("Unknown register: {0}")]
    UnknownRegister(String),

    /// A guest memory location cannot be accessed
    ///
    /// Readers absorb this into a zero value; it never reaches a controller.
    #[error("Memory unavailable at {0}")]
    MemoryUnavailable(LinearAddress),

    /// A request did not match any expected shape and was dropped
    #[error("Malformed protocol message: {0}")]
    ProtocolMalformed(String),

    /// No scratch stack could be allocated for a guest-side helper
    ///
    /// The operation is aborted before any guest register is touched.
    #[error("Cannot allocate {paragraphs} paragraphs of scratch stack")]
    ScratchAllocation
    {
        /// Size of the failed allocation in 16-byte paragraphs.
        paragraphs: u16,
    },

    /// The controller connection failed
    ///
    /// Unrecoverable: the host is expected to shut down.
    #[error("Transport failure: {0}")]
    Transport(#[from] TransportError),
}

impl DebugError
{
    /// Convert the error into the reply sent to a controller.
    #[must_use]
    pub fn to_remote(&self) -> RemoteError
    {
        let kind = match self {
            Self::Resolution { .. } => RemoteErrorKind::Resolution,
            Self::UnknownRegister(_) => RemoteErrorKind::UnknownRegister,
            _ => RemoteErrorKind::Failed,
        };
        RemoteError::new(kind, self.to_string())
    }
}

/// Convenience type alias for `Result<T, DebugError>`
///
/// ```rust
/// use debugbox_core::error::Result;
/// fn foo() -> Result<()>
/// {
///     Ok(())
/// }
/// ```
pub type Result<T> = std::result::Result<T, DebugError>;
