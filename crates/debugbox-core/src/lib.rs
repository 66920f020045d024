//! # debugbox-core
//!
//! Breakpoint engine and remote control server for an emulated x86 machine.
//!
//! This crate provides:
//! - Address translation from `segment:offset` to linear addresses
//! - Code, interrupt and memory-watch breakpoints with ignore-once re-arming
//! - A control server answering register, memory, CPU and breakpoint
//!   requests and reporting stops with `break_now`
//! - The debug loop the emulator's scheduler runs while the guest is stopped
//!
//! The emulator itself is reached through the traits in [`machine`].
//! [`machine::SimMachine`] is a small reference implementation.
//!
//! ## Features
//!
//! - `memory-watch` (default): check memory watches after every instruction.
//!   This is expensive and can be disabled for faster normal execution.

pub mod breakpoints;
pub mod config;
pub mod debug_loop;
pub mod error;
pub mod launcher;
pub mod machine;
pub mod prelude;
pub mod resolver;
pub mod server;
pub mod session;
pub mod types;

pub use breakpoints::{BreakpointEngine, BreakpointStore};
pub use config::DebugConfig;
pub use debug_loop::DebugLoop;
// Re-export commonly used types
pub use error::{DebugError, Result};
pub use resolver::AddressResolver;
pub use server::{ControlServer, ServerState};
pub use session::DebugSession;
pub use types::{LinearAddress, SegmentedAddress};
