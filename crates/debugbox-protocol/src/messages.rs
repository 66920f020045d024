//! Typed protocol messages.
//!
//! Requests are validated by `serde` at the boundary: anything that does not
//! deserialize into one of these types never reaches the engine. Register
//! names travel as strings and are checked by the engine, so an unknown name
//! produces an `unknown_register` error reply rather than a dropped message.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of a breakpoint record.
///
/// The pair (`index`, `generation`) is slot-stable: once the record is
/// deleted its identifier never matches again, even when the slot is reused
/// by a newer record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BreakpointId
{
    index: u32,
    generation: u32,
}

impl BreakpointId
{
    /// Build an identifier from its slot index and generation.
    #[must_use]
    pub const fn from_parts(index: u32, generation: u32) -> Self
    {
        Self { index, generation }
    }

    /// Arena slot the record occupies (or occupied).
    #[must_use]
    pub const fn index(self) -> u32
    {
        self.index
    }

    /// Generation of the slot when the record was inserted.
    #[must_use]
    pub const fn generation(self) -> u32
    {
        self.generation
    }
}

impl fmt::Display for BreakpointId
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "#{}.{}", self.index, self.generation)
    }
}

/// Addressing mode of a memory watch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WatchMode
{
    /// `segment:offset`, translated with the current CPU mode.
    Real,
    /// `selector:offset`, only checked while a valid descriptor exists.
    Protected,
    /// The offset is already a linear address; the segment is ignored.
    Linear,
}

/// Breakpoint creation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BreakpointSpec
{
    /// Execution breakpoint at `segment:offset`.
    Code
    {
        /// Segment (or selector) of the location.
        segment: u16,
        /// Offset inside the segment.
        offset: u32,
        /// Remove the breakpoint after its first hit.
        #[serde(default)]
        once: bool,
    },
    /// Breakpoint on a software interrupt, optionally filtered by AH.
    Interrupt
    {
        /// Interrupt vector number.
        number: u8,
        /// Required AH value; `None` matches any.
        #[serde(default)]
        ah: Option<u8>,
        /// Remove the breakpoint after its first hit.
        #[serde(default)]
        once: bool,
    },
    /// Memory watch triggering when the watched byte changes.
    MemoryWatch
    {
        /// Segment or selector (ignored for [`WatchMode::Linear`]).
        #[serde(default)]
        segment: u16,
        /// Offset, or the linear address for [`WatchMode::Linear`].
        offset: u32,
        /// How the location is translated.
        mode: WatchMode,
    },
}

/// Public view of a stored breakpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakpointInfo
{
    /// Identifier usable with `breakpoints.delete`.
    pub id: BreakpointId,
    /// What the breakpoint watches.
    pub target: BreakpointTarget,
    /// Whether the breakpoint removes itself after one hit.
    pub once: bool,
    /// Whether the breakpoint is currently armed.
    pub active: bool,
}

/// Kind-specific part of [`BreakpointInfo`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BreakpointTarget
{
    /// Execution breakpoint.
    Code
    {
        /// Segment the breakpoint was set with.
        segment: u16,
        /// Offset the breakpoint was set with.
        offset: u32,
        /// Linear address resolved when the breakpoint was added.
        linear: u32,
    },
    /// Interrupt breakpoint.
    Interrupt
    {
        /// Interrupt vector number.
        number: u8,
        /// AH filter, `None` for any.
        ah: Option<u8>,
    },
    /// Memory watch.
    MemoryWatch
    {
        /// Segment or selector (0 for linear watches).
        segment: u16,
        /// Offset or linear address.
        offset: u32,
        /// Addressing mode.
        mode: WatchMode,
        /// Last value observed at the location.
        last_value: u8,
    },
}

/// Requests of the `session` endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum SessionRequest
{
    /// Register a controller.
    Attach
    {
        /// Free-form controller name.
        client: String,
    },
    /// Unregister a controller.
    Detach
    {
        /// Name used with `attach`.
        client: String,
    },
}

/// Requests of the `registers` endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum RegistersRequest
{
    /// Snapshot of every register and decoded flag.
    GetAll,
    /// Read one register by name (`eax`, `ax`, `cs`, `eflags`, ...).
    Get
    {
        /// Register name, case-insensitive.
        name: String,
    },
    /// Write one register by name, returning its previous value.
    Set
    {
        /// Register name, case-insensitive.
        name: String,
        /// New value, truncated to the register width.
        value: u32,
    },
}

/// Requests of the `memory` endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum MemoryRequest
{
    /// Read `length` bytes; unreadable bytes come back as zero. The engine
    /// returns at most 64 KiB per request.
    Read
    {
        segment: u16,
        offset: u32,
        length: u32,
    },
    /// Write a byte, returning the previous byte.
    WriteByte
    {
        segment: u16,
        offset: u32,
        value: u8,
    },
    /// Write a word, returning the previous word.
    WriteWord
    {
        segment: u16,
        offset: u32,
        value: u16,
    },
    /// Write a dword, returning the previous dword.
    WriteDword
    {
        segment: u16,
        offset: u32,
        value: u32,
    },
    /// Write a byte string at increasing offsets, returning the count.
    WriteBytes
    {
        segment: u16,
        offset: u32,
        bytes: Vec<u8>,
    },
}

/// Requests of the `cpu` endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum CpuRequest
{
    /// Current mode flags.
    Info,
    /// Description of an emulator callback slot.
    CallbackInfo
    {
        index: u16,
    },
    /// Descriptor table entry for a selector.
    Descriptor
    {
        selector: u16,
    },
}

/// Execution control requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ControlRequest
{
    /// Execute exactly one guest instruction.
    StepIn,
    /// Leave debug mode and let the guest run until the next breakpoint.
    Run,
}

/// Requests of the `breakpoints` endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum BreakpointsRequest
{
    /// Create a breakpoint.
    Add
    {
        spec: BreakpointSpec,
    },
    /// Delete a breakpoint by identifier.
    Delete
    {
        id: BreakpointId,
    },
    /// Delete the code breakpoint at a linear address.
    DeleteAt
    {
        linear: u32,
    },
    /// Delete every breakpoint.
    Clear,
    /// List breakpoints, newest first.
    List,
}

/// A controller request, tagged with the endpoint it targets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "endpoint", content = "call", rename_all = "snake_case")]
pub enum Request
{
    Session(SessionRequest),
    Registers(RegistersRequest),
    Memory(MemoryRequest),
    Cpu(CpuRequest),
    Control(ControlRequest),
    Breakpoints(BreakpointsRequest),
}

impl Request
{
    /// Whether the request changes the execution state of the guest.
    #[must_use]
    pub const fn is_control(&self) -> bool
    {
        matches!(self, Self::Control(_))
    }
}

/// Decoded EFLAGS bits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlagBits
{
    pub of: bool,
    pub df: bool,
    #[serde(rename = "if")]
    pub if_: bool,
    pub sf: bool,
    pub zf: bool,
    pub af: bool,
    pub pf: bool,
    pub cf: bool,
    pub tf: bool,
    /// I/O privilege level, 0-3.
    pub iopl: u8,
    pub nt: bool,
    pub vm: bool,
    pub ac: bool,
    pub id: bool,
}

impl FlagBits
{
    /// Decode the individual flags of an EFLAGS value.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn from_eflags(eflags: u32) -> Self
    {
        let bit = |n: u32| eflags & (1 << n) != 0;
        let iopl = ((eflags >> 12) & 0b11) as u8;
        Self {
            cf: bit(0),
            pf: bit(2),
            af: bit(4),
            zf: bit(6),
            sf: bit(7),
            tf: bit(8),
            if_: bit(9),
            df: bit(10),
            of: bit(11),
            iopl,
            nt: bit(14),
            vm: bit(17),
            ac: bit(18),
            id: bit(21),
        }
    }
}

/// Full register file as reported by `registers.get_all`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterSnapshot
{
    pub eax: u32,
    pub ebx: u32,
    pub ecx: u32,
    pub edx: u32,
    pub esi: u32,
    pub edi: u32,
    pub ebp: u32,
    pub esp: u32,
    pub eip: u32,
    pub cs: u16,
    pub ds: u16,
    pub es: u16,
    pub fs: u16,
    pub gs: u16,
    pub ss: u16,
    pub flags: FlagBits,
}

/// CPU mode flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CpuInfo
{
    /// Protected mode enabled (CR0.PE).
    pub protected: bool,
    /// Virtual-8086 mode (EFLAGS.VM).
    pub vm86: bool,
    /// Current code segment is 32-bit.
    pub big_code: bool,
}

/// Descriptor table entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DescriptorInfo
{
    pub selector: u16,
    pub base: u32,
    pub limit: u32,
    /// Raw descriptor type field.
    pub kind: u8,
    pub dpl: u8,
    pub present: bool,
    pub big: bool,
    pub granularity: bool,
}

/// Successful reply payloads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reply
{
    Attached,
    Detached,
    Registers(RegisterSnapshot),
    /// Current value of a single register.
    Value(u32),
    /// Value overwritten by a register or memory write.
    Previous(u32),
    Bytes(Vec<u8>),
    /// Number of bytes written by `memory.write_bytes`.
    Written(u32),
    /// Instruction pointer after a control request.
    Eip(u32),
    CpuInfo(CpuInfo),
    Callback(Option<String>),
    Descriptor(Option<DescriptorInfo>),
    Added(BreakpointId),
    Deleted(bool),
    Cleared,
    Breakpoints(Vec<BreakpointInfo>),
}

/// Error categories reported to the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteErrorKind
{
    /// The register name is not recognised.
    UnknownRegister,
    /// A segment could not be translated to a linear address.
    Resolution,
    /// The engine is waiting for a break decision and cannot change
    /// execution state.
    Busy,
    /// Anything else the engine refused.
    Failed,
}

/// Failed reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteError
{
    pub kind: RemoteErrorKind,
    pub message: String,
}

impl RemoteError
{
    /// Build a remote error from a kind and a displayable message.
    pub fn new(kind: RemoteErrorKind, message: impl Into<String>) -> Self
    {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for RemoteError
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

/// Reply to a single request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Response
{
    Ok(Reply),
    Err(RemoteError),
}

/// Why the engine stopped the guest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum StopReason
{
    /// A code breakpoint matched. `id` is `None` when the breakpoint was a
    /// `once` breakpoint and has already been removed.
    Breakpoint
    {
        id: Option<BreakpointId>,
    },
    /// An interrupt breakpoint matched.
    Interrupt
    {
        number: u8,
        ah: u8,
    },
    /// A watched byte changed.
    Watch
    {
        id: BreakpointId,
        old: u8,
        new: u8,
    },
    /// A `step_in` completed.
    Step,
    /// The debugger was entered explicitly (hotkey, guest callback).
    Explicit,
}

/// Payload of the engine-initiated `break_now` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakNotice
{
    pub reason: StopReason,
    pub cs: u16,
    pub eip: u32,
    /// Linear address of CS:EIP, when it could be resolved.
    pub linear: Option<u32>,
}

/// Controller answer to a `break_now` notice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResumeDecision
{
    /// Stay stopped and keep serving requests.
    Break,
    /// Skip past the current location and resume normal execution.
    Continue,
}

/// A request together with the identifier its reply will carry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestEnvelope
{
    pub id: u64,
    pub request: Request,
}

/// A response together with the identifier of the request it answers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyEnvelope
{
    pub id: u64,
    pub response: Response,
}

/// Messages travelling from the controller to the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Inbound
{
    Request(RequestEnvelope),
    Decision(ResumeDecision),
}

/// Messages travelling from the engine to the controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outbound
{
    Reply(ReplyEnvelope),
    BreakNow(BreakNotice),
}
