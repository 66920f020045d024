//! # Control Server
//!
//! Serves controller requests against the live machine.
//!
//! The server owns the [`Transport`] and nothing else: the session, the
//! breakpoint engine and the machine are borrowed for each call. Every
//! handler reads the machine afresh, so no register or memory value is kept
//! between requests.
//!
//! ## State machine
//!
//! ```text
//!            run / continue
//!   Stopped ────────────────▶ Running
//!     ▲  │ step_in               │ breakpoint, watch, explicit break
//!     │  ▼                       ▼
//!   Stepping ──────────▶ AwaitingBreakDecision
//!           break_now           │ break
//!                               ▼
//!                            Stopped
//! ```
//!
//! While a `break_now` is waiting for its decision, ordinary requests are
//! still answered; `step_in` and `run` are refused with a `busy` error.

use debugbox_protocol::{
    BreakNotice, BreakpointsRequest, ControlRequest, CpuInfo, CpuRequest, FlagBits, Inbound, MemoryRequest, Outbound,
    RegisterSnapshot, RegistersRequest, RemoteError, RemoteErrorKind, Reply, ReplyEnvelope, Request, Response,
    ResumeDecision, SessionRequest, StopReason, Transport, TransportError,
};
use tracing::{debug, info, warn};

use crate::breakpoints::BreakpointEngine;
use crate::error::Result;
use crate::machine::{Cpu, Host};
use crate::resolver::AddressResolver;
use crate::session::DebugSession;
use crate::types::{GeneralRegister, Register, RegisterName, SegmentRegister};

/// Largest memory read served in one request, one real-mode segment.
pub const MAX_READ_LENGTH: u32 = 0x1_0000;

/// Execution state as seen by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState
{
    /// The guest runs in the normal loop.
    Running,
    /// A `step_in` completed and its stop has not been reported yet.
    Stepping,
    /// A `break_now` notice is waiting for the controller's decision.
    AwaitingBreakDecision,
    /// The guest is halted under debugger control.
    Stopped,
}

/// Everything a request handler may touch.
struct Target<'a, M: ?Sized>
{
    session: &'a mut DebugSession,
    engine: &'a mut BreakpointEngine,
    machine: &'a mut M,
}

/// Protocol endpoint of the debugger.
#[derive(Debug)]
pub struct ControlServer<T>
{
    transport: T,
    state: ServerState,
    clients: Vec<String>,
}

impl<T: Transport> ControlServer<T>
{
    /// Create a server speaking over `transport`.
    #[must_use]
    pub const fn new(transport: T) -> Self
    {
        Self {
            transport,
            state: ServerState::Running,
            clients: Vec::new(),
        }
    }

    #[must_use]
    pub const fn state(&self) -> ServerState
    {
        self.state
    }

    /// Names of the attached controllers, in attach order.
    #[must_use]
    pub fn clients(&self) -> &[String]
    {
        &self.clients
    }

    /// Mark the guest as stopped (debug mode entered outside the protocol).
    pub fn set_stopped(&mut self)
    {
        self.state = ServerState::Stopped;
    }

    /// Block for one inbound message and answer it
    ///
    /// Malformed messages are logged and dropped without a reply. A decision
    /// with no `break_now` outstanding is ignored.
    ///
    /// ## Errors
    ///
    /// Returns [`crate::error::DebugError::Transport`] when the controller
    /// connection is gone.
    pub fn serve_one<M: Cpu + Host + ?Sized>(
        &mut self,
        session: &mut DebugSession,
        engine: &mut BreakpointEngine,
        machine: &mut M,
    ) -> Result<()>
    {
        let mut target = Target {
            session,
            engine,
            machine,
        };
        match self.receive()? {
            Some(Inbound::Request(envelope)) => {
                let response = self.handle(&mut target, envelope.request);
                self.reply(envelope.id, response)?;
            }
            Some(Inbound::Decision(decision)) => {
                warn!(?decision, "decision received with no break pending, ignoring");
            }
            None => {}
        }
        Ok(())
    }

    /// Report a stop and block until the controller decides what to do
    ///
    /// `Break` leaves the guest stopped. `Continue` resumes it exactly like
    /// a `run` request.
    ///
    /// ## Errors
    ///
    /// Returns [`crate::error::DebugError::Transport`] when the controller
    /// connection is gone.
    pub fn break_now<M: Cpu + Host + ?Sized>(
        &mut self,
        reason: StopReason,
        session: &mut DebugSession,
        engine: &mut BreakpointEngine,
        machine: &mut M,
    ) -> Result<ResumeDecision>
    {
        let notice = notice(&*machine, reason);
        info!(?reason, cs = notice.cs, eip = notice.eip, "break_now");
        self.state = ServerState::AwaitingBreakDecision;
        self.send(&Outbound::BreakNow(notice))?;

        let mut target = Target {
            session,
            engine,
            machine,
        };
        loop {
            match self.receive()? {
                Some(Inbound::Decision(decision)) => {
                    debug!(?decision, "break decision received");
                    match decision {
                        ResumeDecision::Break => self.state = ServerState::Stopped,
                        ResumeDecision::Continue => self.resume(&mut target),
                    }
                    return Ok(decision);
                }
                Some(Inbound::Request(envelope)) => {
                    let response = if envelope.request.is_control() {
                        Response::Err(RemoteError::new(
                            RemoteErrorKind::Busy,
                            "a break decision is pending",
                        ))
                    } else {
                        self.handle(&mut target, envelope.request)
                    };
                    self.reply(envelope.id, response)?;
                }
                None => {}
            }
        }
    }

    fn receive(&mut self) -> Result<Option<Inbound>>
    {
        match self.transport.receive() {
            Ok(inbound) => Ok(Some(inbound)),
            Err(err) if err.is_malformed() => {
                warn!(error = %err, "dropping malformed message");
                Ok(None)
            }
            Err(err) => Err(err.into()),
        }
    }

    fn send(&mut self, message: &Outbound) -> std::result::Result<(), TransportError>
    {
        self.transport.send(message)
    }

    fn reply(&mut self, id: u64, response: Response) -> Result<()>
    {
        self.send(&Outbound::Reply(ReplyEnvelope { id, response }))?;
        Ok(())
    }

    fn handle<M: Cpu + Host + ?Sized>(&mut self, target: &mut Target<'_, M>, request: Request) -> Response
    {
        debug!(?request, "handling request");
        let result = match request {
            Request::Session(call) => Ok(self.session(call)),
            Request::Registers(call) => registers(&mut *target.machine, call),
            Request::Memory(call) => memory(&mut *target.machine, call),
            Request::Cpu(call) => Ok(query_cpu(&*target.machine, call)),
            Request::Control(call) => Ok(self.control(target, call)),
            Request::Breakpoints(call) => breakpoints(target, call),
        };
        match result {
            Ok(reply) => Response::Ok(reply),
            Err(err) => {
                debug!(error = %err, "request failed");
                Response::Err(err.to_remote())
            }
        }
    }

    fn session(&mut self, call: SessionRequest) -> Reply
    {
        match call {
            SessionRequest::Attach { client } => {
                info!(%client, "controller attached");
                self.clients.push(client);
                Reply::Attached
            }
            SessionRequest::Detach { client } => {
                info!(%client, "controller detached");
                self.clients.retain(|attached| *attached != client);
                Reply::Detached
            }
        }
    }

    fn control<M: Cpu + Host + ?Sized>(&mut self, target: &mut Target<'_, M>, call: ControlRequest) -> Reply
    {
        match call {
            ControlRequest::StepIn => {
                target.session.clear_ignore();
                let code = target.machine.step();
                target.session.latch_exit(code);
                target.session.queue_stop(StopReason::Step);
                self.state = ServerState::Stepping;
                debug!(code, eip = target.machine.eip(), "stepped one instruction");
            }
            ControlRequest::Run => self.resume(target),
        }
        Reply::Eip(target.machine.eip())
    }

    /// Skip past the current location and hand the guest back to the normal
    /// loop with every breakpoint armed.
    fn resume<M: Cpu + Host + ?Sized>(&mut self, target: &mut Target<'_, M>)
    {
        let current = AddressResolver::new(&*target.machine).current().ok();
        target.session.clear_ignore();
        target.session.set_ignore_address(current);
        target.session.take_stop();
        if let Some(address) = current {
            target.engine.set_activation(&mut *target.machine, address, true);
        }
        target.session.set_debugging(false);
        target.machine.enter_normal_loop();
        self.state = ServerState::Running;
        info!(cs = target.machine.cs(), eip = target.machine.eip(), "guest resumed");
    }
}

/// Build the `break_now` payload for the current CS:EIP.
#[must_use]
pub fn notice<C: Cpu + ?Sized>(cpu: &C, reason: StopReason) -> BreakNotice
{
    BreakNotice {
        reason,
        cs: cpu.cs(),
        eip: cpu.eip(),
        linear: AddressResolver::new(cpu).current().ok().map(u32::from),
    }
}

/// Read the whole register file.
#[must_use]
pub fn snapshot<C: Cpu + ?Sized>(cpu: &C) -> RegisterSnapshot
{
    let general = |register| cpu.register(Register::General(register));
    #[allow(clippy::cast_possible_truncation)]
    let segment = |register| cpu.register(Register::Segment(register)) as u16;
    RegisterSnapshot {
        eax: general(GeneralRegister::Eax),
        ebx: general(GeneralRegister::Ebx),
        ecx: general(GeneralRegister::Ecx),
        edx: general(GeneralRegister::Edx),
        esi: general(GeneralRegister::Esi),
        edi: general(GeneralRegister::Edi),
        ebp: general(GeneralRegister::Ebp),
        esp: general(GeneralRegister::Esp),
        eip: cpu.register(Register::Eip),
        cs: segment(SegmentRegister::Cs),
        ds: segment(SegmentRegister::Ds),
        es: segment(SegmentRegister::Es),
        fs: segment(SegmentRegister::Fs),
        gs: segment(SegmentRegister::Gs),
        ss: segment(SegmentRegister::Ss),
        flags: FlagBits::from_eflags(cpu.register(Register::Eflags)),
    }
}

fn registers<C: Cpu + ?Sized>(cpu: &mut C, call: RegistersRequest) -> Result<Reply>
{
    Ok(match call {
        RegistersRequest::GetAll => Reply::Registers(snapshot(cpu)),
        RegistersRequest::Get { name } => Reply::Value(name.parse::<RegisterName>()?.read(cpu)),
        RegistersRequest::Set { name, value } => {
            let register: RegisterName = name.parse()?;
            let previous = register.write(cpu, value);
            debug!(%register, previous, value, "register written");
            Reply::Previous(previous)
        }
    })
}

fn memory<C: Cpu + ?Sized>(cpu: &mut C, call: MemoryRequest) -> Result<Reply>
{
    Ok(match call {
        MemoryRequest::Read {
            segment,
            offset,
            length: requested,
        } => {
            let length = requested.min(MAX_READ_LENGTH);
            if length < requested {
                debug!(requested, length, "memory read truncated");
            }
            let mut bytes = Vec::with_capacity(length as usize);
            for i in 0..length {
                let address = AddressResolver::new(&*cpu).resolve(segment, offset.wrapping_add(i))?;
                bytes.push(cpu.read_u8(address));
            }
            Reply::Bytes(bytes)
        }
        MemoryRequest::WriteByte { segment, offset, value } => {
            let address = AddressResolver::new(&*cpu).resolve(segment, offset)?;
            let previous = cpu.read_u8(address);
            cpu.write_u8(address, value);
            Reply::Previous(u32::from(previous))
        }
        MemoryRequest::WriteWord { segment, offset, value } => {
            let address = AddressResolver::new(&*cpu).resolve(segment, offset)?;
            let previous = cpu.read_u16(address);
            cpu.write_u16(address, value);
            Reply::Previous(u32::from(previous))
        }
        MemoryRequest::WriteDword { segment, offset, value } => {
            let address = AddressResolver::new(&*cpu).resolve(segment, offset)?;
            let previous = cpu.read_u32(address);
            cpu.write_u32(address, value);
            Reply::Previous(previous)
        }
        MemoryRequest::WriteBytes { segment, offset, bytes } => {
            let mut written = 0u32;
            for (i, byte) in (0u32..).zip(bytes) {
                let address = AddressResolver::new(&*cpu).resolve(segment, offset.wrapping_add(i))?;
                cpu.write_u8(address, byte);
                written += 1;
            }
            Reply::Written(written)
        }
    })
}

fn query_cpu<C: Cpu + ?Sized>(cpu: &C, call: CpuRequest) -> Reply
{
    match call {
        CpuRequest::Info => Reply::CpuInfo(CpuInfo::from(cpu.mode())),
        CpuRequest::CallbackInfo { index } => Reply::Callback(cpu.callback_description(index)),
        CpuRequest::Descriptor { selector } => {
            Reply::Descriptor(cpu.descriptor(selector).map(|descriptor| descriptor.to_info(selector)))
        }
    }
}

fn breakpoints<M: Cpu + ?Sized>(target: &mut Target<'_, M>, call: BreakpointsRequest) -> Result<Reply>
{
    let engine = &mut *target.engine;
    Ok(match call {
        BreakpointsRequest::Add { spec } => Reply::Added(engine.add(&*target.machine, &spec)?),
        BreakpointsRequest::Delete { id } => Reply::Deleted(engine.delete(&mut *target.machine, id)),
        BreakpointsRequest::DeleteAt { linear } => Reply::Deleted(engine.delete_at(&mut *target.machine, linear.into())),
        BreakpointsRequest::Clear => {
            engine.clear(&mut *target.machine);
            Reply::Cleared
        }
        BreakpointsRequest::List => Reply::Breakpoints(engine.list()),
    })
}
