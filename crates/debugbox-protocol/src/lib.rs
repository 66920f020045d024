//! # debugbox-protocol
//!
//! Communication layer between the DebugBox engine (running inside the
//! emulator) and an external controller.
//!
//! The protocol is a closed set of strongly-typed requests grouped by
//! endpoint:
//!
//! - **session**: `attach` / `detach`
//! - **registers**: read the whole register file or a single named register,
//!   write a named register
//! - **memory**: read a range, write a byte/word/dword or a byte string at a
//!   `segment:offset` location
//! - **cpu**: mode flags, callback descriptions, descriptor lookups
//! - **control**: `step_in` / `run`
//! - **breakpoints**: add, delete, list and clear breakpoints
//!
//! In the other direction the engine sends `break_now` notices and blocks
//! until the controller answers with a [`ResumeDecision`].
//!
//! ## Wire format
//!
//! Every message is a single line of JSON (see [`codec`]). Any transport that
//! can move lines of text in both directions can carry the protocol; this
//! crate ships an in-process channel transport and a blocking stream
//! transport suitable for TCP sockets.

pub mod codec;
pub mod messages;
pub mod transport;

pub use codec::{decode_line, encode_line, ProtocolError};
pub use messages::{
    BreakNotice, BreakpointId, BreakpointInfo, BreakpointSpec, BreakpointTarget, BreakpointsRequest, ControlRequest,
    CpuInfo, CpuRequest, DescriptorInfo, FlagBits, Inbound, MemoryRequest, Outbound, RegisterSnapshot,
    RegistersRequest, RemoteError, RemoteErrorKind, Reply, ReplyEnvelope, Request, RequestEnvelope, Response,
    ResumeDecision, SessionRequest, StopReason, WatchMode,
};
pub use transport::{channel_transport, ChannelTransport, ControllerHandle, StreamTransport, Transport, TransportError};
