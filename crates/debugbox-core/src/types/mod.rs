//! # Types
//!
//! Guest-facing types shared by the resolver, the breakpoint engine and the
//! control server.
//!
//! These types describe the emulated machine (addresses, registers, CPU
//! mode) independently of any particular emulator core.

pub mod address;
pub mod cpu;
pub mod registers;

// Re-export all public types
pub use address::{LinearAddress, SegmentedAddress};
pub use cpu::{CpuMode, Descriptor};
pub use registers::{GeneralRegister, Register, RegisterName, RegisterWidth, SegmentRegister};
