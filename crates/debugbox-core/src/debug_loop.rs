//! # Debug Loop
//!
//! Glue between the emulator's scheduler and the debugger.
//!
//! While the guest is stopped the scheduler calls [`DebugLoop::tick`] instead
//! of running instructions. While it runs, the normal loop reports traps,
//! software interrupts and (with the `memory-watch` feature) memory changes
//! through the `on_*` hooks, which decide whether to enter debug mode.
//!
//! `break_now` inside a tick is the only place where the emulator thread
//! blocks on the controller. Guest time stands still for as long as the
//! controller takes to answer.

use debugbox_protocol::{BreakpointId, StopReason, Transport};
use tracing::{debug, info, warn};

use crate::breakpoints::BreakpointEngine;
use crate::config::DebugConfig;
use crate::error::Result;
use crate::machine::{Cpu, Host};
use crate::resolver::AddressResolver;
use crate::server::{ControlServer, ServerState};
use crate::session::DebugSession;
use crate::types::{GeneralRegister, LinearAddress, Register};

/// The debugger attached to one machine.
#[derive(Debug)]
pub struct DebugLoop<T>
{
    session: DebugSession,
    engine: BreakpointEngine,
    server: ControlServer<T>,
    config: DebugConfig,
}

impl<T: Transport> DebugLoop<T>
{
    /// Create a debugger that talks to its controller over `transport`.
    #[must_use]
    pub fn new(transport: T, config: DebugConfig) -> Self
    {
        Self {
            session: DebugSession::new(),
            engine: BreakpointEngine::new(),
            server: ControlServer::new(transport),
            config,
        }
    }

    #[must_use]
    pub const fn session(&self) -> &DebugSession
    {
        &self.session
    }

    #[must_use]
    pub const fn engine(&self) -> &BreakpointEngine
    {
        &self.engine
    }

    /// Breakpoint engine, for adding breakpoints before the guest starts.
    pub fn engine_mut(&mut self) -> &mut BreakpointEngine
    {
        &mut self.engine
    }

    #[must_use]
    pub const fn server(&self) -> &ControlServer<T>
    {
        &self.server
    }

    #[must_use]
    pub const fn config(&self) -> &DebugConfig
    {
        &self.config
    }

    /// Whether the guest is under debugger control.
    #[must_use]
    pub const fn is_debugging(&self) -> bool
    {
        self.session.is_debugging()
    }

    /// Run one iteration of the debug loop
    ///
    /// 1. Let the host process its events.
    /// 2. Dispatch pending hardware interrupts.
    /// 3. Report a pending stop with `break_now`, or serve one request.
    /// 4. Return the latched exit code (0 if none).
    ///
    /// With [`DebugConfig::skip_interrupt_handlers`] set, a pending stop is
    /// reported before interrupts are dispatched. If a handler is then
    /// entered while the guest is still stopped, a `once` breakpoint is
    /// planted at the interrupted location and debug mode is left, so the
    /// handler runs at full speed and the guest stops again on its return.
    ///
    /// ## Errors
    ///
    /// Returns [`crate::error::DebugError::Transport`] when the controller
    /// connection fails. The caller is expected to shut down.
    pub fn tick<M: Cpu + Host + ?Sized>(&mut self, machine: &mut M) -> Result<u32>
    {
        machine.process_events();

        let skip = self.config.skip_interrupt_handlers;
        let mut reported = false;
        if skip {
            if let Some(reason) = self.session.take_stop() {
                self.server.break_now(reason, &mut self.session, &mut self.engine, machine)?;
                reported = true;
            }
        }

        let (cs, eip) = (machine.cs(), machine.eip());
        machine.dispatch_interrupts();
        let in_handler = (machine.cs(), machine.eip()) != (cs, eip);
        if skip && in_handler && self.session.is_debugging() {
            self.skip_interrupt_handler(machine, cs, eip);
        } else if !reported {
            match self.session.take_stop() {
                Some(reason) => {
                    self.server.break_now(reason, &mut self.session, &mut self.engine, machine)?;
                }
                None => self.server.serve_one(&mut self.session, &mut self.engine, machine)?,
            }
        }

        Ok(self.session.take_exit_code())
    }

    fn skip_interrupt_handler<M: Cpu + Host + ?Sized>(&mut self, machine: &mut M, cs: u16, eip: u32)
    {
        debug!(cs, eip, handler_cs = machine.cs(), handler_eip = machine.eip(), "skipping interrupt handler");
        if let Err(err) = self.engine.add_code(&*machine, cs, eip, true) {
            warn!(error = %err, "cannot plant return breakpoint");
        }
        let handler = current_address(&*machine);
        self.session.clear_ignore();
        self.engine.set_activation(machine, handler, true);
        self.session.set_debugging(false);
        machine.enter_normal_loop();
    }

    /// Called by the normal loop when the CPU is about to execute a trap
    /// marker at CS:EIP. Returns `true` when execution must stop.
    pub fn on_trap<M: Cpu + Host + ?Sized>(&mut self, machine: &mut M) -> bool
    {
        let (cs, eip) = (machine.cs(), machine.eip());
        let Some(hit) = self.engine.check_code(&mut self.session, machine, cs, eip) else {
            return false;
        };
        // A once record is already gone and is reported without an id.
        let id = (!hit.once).then_some(hit.id);
        self.stop(machine, StopReason::Breakpoint { id });
        true
    }

    /// Called by the normal loop before `int number` executes. Returns `true`
    /// when execution must stop.
    pub fn on_interrupt<M: Cpu + Host + ?Sized>(&mut self, machine: &mut M, number: u8) -> bool
    {
        let linear = current_address(&*machine);
        #[allow(clippy::cast_possible_truncation)]
        let ah = (machine.register(Register::General(GeneralRegister::Eax)) >> 8) as u8;
        if self.engine.check_interrupt(&mut self.session, machine, linear, number, ah).is_none() {
            return false;
        }
        self.stop(machine, StopReason::Interrupt { number, ah });
        true
    }

    /// Called by the normal loop after every instruction. Stops on the first
    /// memory watch whose byte changed.
    #[cfg(feature = "memory-watch")]
    pub fn on_instruction<M: Cpu + Host + ?Sized>(&mut self, machine: &mut M) -> bool
    {
        let hits = self.engine.check_memory_watches(&*machine);
        let Some(hit) = hits.first() else {
            return false;
        };
        self.stop(
            machine,
            StopReason::Watch {
                id: hit.id,
                old: hit.old,
                new: hit.new,
            },
        );
        true
    }

    /// Enter the debugger explicitly (hotkey, guest callback)
    ///
    /// Clears the ignore state and asks the running core to return to the
    /// scheduler (see [`DebugLoop::take_exit_request`]).
    pub fn enable<M: Cpu + Host + ?Sized>(&mut self, machine: &mut M, reason: StopReason)
    {
        self.session.enable();
        self.session.request_exit();
        self.stop(machine, reason);
    }

    /// Whether the core should stop its current slice because the debugger
    /// was entered. Reading the request clears it.
    pub fn take_exit_request(&mut self) -> bool
    {
        self.session.take_exit_request()
    }

    /// Plant a `once` breakpoint at the entry point of a program started
    /// under the debugger and arm everything.
    ///
    /// ## Errors
    ///
    /// Fails if the entry point cannot be resolved.
    pub fn break_at_program_start<M: Cpu + ?Sized>(&mut self, machine: &mut M, segment: u16, offset: u32) -> Result<BreakpointId>
    {
        let id = self.engine.add_code(&*machine, segment, offset, true)?;
        let current = current_address(&*machine);
        self.engine.set_activation(machine, current, true);
        info!(segment, offset, %id, "breaking at program start");
        Ok(id)
    }

    /// Remove every breakpoint, restoring guest memory, and leave debug mode.
    pub fn shutdown<M: Cpu + ?Sized>(&mut self, machine: &mut M)
    {
        let count = self.engine.clear(machine);
        self.session.set_debugging(false);
        info!(count, "debugger shut down");
    }

    fn stop<M: Cpu + Host + ?Sized>(&mut self, machine: &mut M, reason: StopReason)
    {
        let here = current_address(&*machine);
        self.engine.set_activation(machine, here, false);
        self.session.queue_stop(reason);
        self.session.set_debugging(true);
        self.server.set_stopped();
        machine.enter_debug_loop();
        info!(?reason, %here, "guest stopped");
    }

    /// Execution state as seen by the controller.
    #[must_use]
    pub const fn state(&self) -> ServerState
    {
        self.server.state()
    }
}

fn current_address<C: Cpu + ?Sized>(cpu: &C) -> LinearAddress
{
    AddressResolver::new(cpu).current().unwrap_or(LinearAddress::ZERO)
}
