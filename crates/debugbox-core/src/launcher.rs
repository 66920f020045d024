//! Running a guest program under the debugger.
//!
//! The program is started through the guest shell on a small scratch
//! stack, with a `once` breakpoint at its entry point so the controller gets
//! control before its first instruction. The caller's CS:EIP and SS:ESP are
//! restored when the shell returns.

use debugbox_protocol::Transport;
use tracing::{info, warn};

use crate::debug_loop::DebugLoop;
use crate::error::{DebugError, Result};
use crate::machine::{Cpu, ProgramLoader};
use crate::types::{GeneralRegister, Register, RegisterName, SegmentRegister};

/// Size of the scratch stack in paragraphs (512 bytes).
pub const SCRATCH_PARAGRAPHS: u16 = 0x20;

/// Initial SP on the scratch stack.
pub const SCRATCH_SP: u32 = 0x200;

/// Run `program` with `args` and break at its entry point
///
/// ## Errors
///
/// Returns [`DebugError::ScratchAllocation`] when the guest has no room for
/// the scratch stack. Nothing has been modified in that case.
///
/// ## Example
///
/// ```rust
/// use debugbox_core::config::DebugConfig;
/// use debugbox_core::launcher::launch_under_debugger;
/// use debugbox_core::machine::SimMachine;
/// use debugbox_core::DebugLoop;
/// use debugbox_protocol::channel_transport;
///
/// let (transport, _controller) = channel_transport();
/// let mut debugger = DebugLoop::new(transport, DebugConfig::default());
/// let mut machine = SimMachine::new(640);
/// machine.set_program_entry(0x1234, 0x100);
///
/// launch_under_debugger(&mut debugger, &mut machine, "GAME.EXE", &["/nosound"])?;
/// assert_eq!(machine.executed()[0].args, "/nosound ");
/// assert_eq!(debugger.engine().store().len(), 1);
/// # Ok::<(), debugbox_core::DebugError>(())
/// ```
pub fn launch_under_debugger<T, M>(debugger: &mut DebugLoop<T>, machine: &mut M, program: &str, args: &[&str]) -> Result<()>
where
    T: Transport,
    M: Cpu + ProgramLoader,
{
    let cs = Register::Segment(SegmentRegister::Cs);
    let ss = Register::Segment(SegmentRegister::Ss);
    let esp = Register::General(GeneralRegister::Esp);
    let saved = [
        (cs, machine.register(cs)),
        (Register::Eip, machine.register(Register::Eip)),
        (ss, machine.register(ss)),
        (esp, machine.register(esp)),
    ];

    let Some(segment) = machine.allocate_paragraphs(SCRATCH_PARAGRAPHS) else {
        warn!(program, "no room for the scratch stack");
        return Err(DebugError::ScratchAllocation {
            paragraphs: SCRATCH_PARAGRAPHS,
        });
    };
    machine.set_register(ss, u32::from(segment));
    let sp: RegisterName = "sp".parse()?;
    sp.write(machine, SCRATCH_SP);

    // Command tail as the shell builds it: every argument followed by a space.
    let tail: String = args.iter().map(|arg| format!("{arg} ")).collect();
    info!(program, args = %tail, stack = segment, "launching under debugger");
    machine.execute_program(program, &tail, &mut |machine, segment, offset| {
        if let Err(err) = debugger.break_at_program_start(machine, segment, offset) {
            warn!(error = %err, "cannot break at program start");
        }
    });

    machine.free_paragraphs(segment);
    for (register, value) in saved {
        machine.set_register(register, value);
    }
    Ok(())
}
