//! Common module for library exports

pub use crate::breakpoints::{AhMatch, BreakpointEngine, BreakpointId, BreakpointStore, CodeLocation, RecordKind};
pub use crate::config::DebugConfig;
pub use crate::debug_loop::DebugLoop;
pub use crate::error::{DebugError, Result};
pub use crate::launcher::launch_under_debugger;
pub use crate::machine::{Cpu, GuestMemory, Host, ProgramLoader, SimMachine};
pub use crate::resolver::AddressResolver;
pub use crate::server::{ControlServer, ServerState};
pub use crate::session::DebugSession;
pub use crate::types::{CpuMode, Descriptor, LinearAddress, RegisterName, SegmentedAddress};
