//! The `serve` command: a reference machine driven by a remote controller.
//!
//! The debug loop is synchronous and blocks the emulator thread while it
//! waits for the controller, so the endpoint uses a blocking `TcpListener`.
//! Controllers may come and go: [`ListenerTransport`] accepts the next one
//! when the current connection drops, and re-sends a `break_now` that was
//! never answered.

use std::io::{self, BufReader};
use std::net::{TcpListener, TcpStream};
use std::path::PathBuf;

use debugbox_core::config::DebugConfig;
use debugbox_core::launcher::launch_under_debugger;
use debugbox_core::machine::{Cpu, SimMachine};
use debugbox_core::types::SegmentRegister;
use debugbox_core::{DebugLoop, LinearAddress, SegmentedAddress};
use debugbox_protocol::{Inbound, Outbound, StopReason, StreamTransport, Transport, TransportError};
use tracing::{debug, info, warn};

/// Slices handed to the scheduler between housekeeping checks.
const SLICE_BUDGET: u64 = 4096;

/// Load address of the built-in guest program.
pub const DEMO_ENTRY: SegmentedAddress = SegmentedAddress::new(0x0100, 0x0000);

/// Built-in guest program
///
/// Alternately stores `A` and `B` at `DS:0200`, calling `int 21h` in
/// between, forever.
pub const DEMO_PROGRAM: &[u8] = &[
    0x90, // nop
    0xb0, 0x41, // mov al, 'A'
    0xa2, 0x00, 0x02, // mov [0200], al
    0xcd, 0x21, // int 21h
    0xb0, 0x42, // mov al, 'B'
    0xa2, 0x00, 0x02, // mov [0200], al
    0xeb, 0xf1, // jmp short 0
];

type Connection = StreamTransport<BufReader<TcpStream>, TcpStream>;

/// Controller endpoint accepting one controller at a time.
#[derive(Debug)]
pub struct ListenerTransport
{
    listener: TcpListener,
    connection: Option<Connection>,
    unanswered: Option<Outbound>,
}

impl ListenerTransport
{
    /// Bind the endpoint.
    ///
    /// ## Errors
    ///
    /// Fails if the address cannot be bound.
    pub fn bind(address: &str) -> io::Result<Self>
    {
        let listener = TcpListener::bind(address)?;
        info!(address = %listener.local_addr()?, "controller endpoint listening");
        Ok(Self {
            listener,
            connection: None,
            unanswered: None,
        })
    }

    fn connection(&mut self) -> Result<&mut Connection, TransportError>
    {
        if self.connection.is_none() {
            let (stream, peer) = self.listener.accept()?;
            info!(%peer, "controller connected");
            let mut connection = StreamTransport::from_tcp(stream)?;
            if let Some(notice) = &self.unanswered {
                debug!("re-sending unanswered break_now");
                connection.send(notice)?;
            }
            self.connection = Some(connection);
        }
        self.connection.as_mut().ok_or(TransportError::Closed)
    }
}

impl Transport for ListenerTransport
{
    fn receive(&mut self) -> Result<Inbound, TransportError>
    {
        loop {
            match self.connection()?.receive() {
                Ok(message) => {
                    if matches!(message, Inbound::Decision(_)) {
                        self.unanswered = None;
                    }
                    return Ok(message);
                }
                Err(err) if err.is_malformed() => return Err(err),
                Err(err) => {
                    info!(reason = %err, "controller disconnected");
                    self.connection = None;
                }
            }
        }
    }

    fn send(&mut self, message: &Outbound) -> Result<(), TransportError>
    {
        if matches!(message, Outbound::BreakNow(_)) {
            self.unanswered = Some(message.clone());
        }
        let Some(connection) = self.connection.as_mut() else {
            debug!("no controller connected, message dropped");
            return Ok(());
        };
        if let Err(err) = connection.send(message) {
            info!(reason = %err, "controller disconnected");
            self.connection = None;
        }
        Ok(())
    }
}

/// Options of the `serve` command.
#[derive(Debug, Clone)]
pub struct ServeOptions
{
    pub config: DebugConfig,
    /// Raw guest image; the built-in program when `None`.
    pub image: Option<PathBuf>,
    /// Where the image is loaded and started.
    pub entry: SegmentedAddress,
    /// Start the guest without stopping first.
    pub run: bool,
    /// Start a program through the guest loader, breaking at its entry.
    pub launch: Option<(String, Vec<String>)>,
}

/// Host the reference machine until the guest asks to exit
///
/// Returns the guest's exit code.
///
/// ## Errors
///
/// Fails when the image cannot be read, the endpoint cannot be bound, or the
/// debugger reports a fatal error.
pub fn serve(options: ServeOptions) -> Result<u32, Box<dyn std::error::Error>>
{
    let mut machine = SimMachine::new(options.config.memory_kb);
    let image = match &options.image {
        Some(path) => std::fs::read(path)?,
        None => DEMO_PROGRAM.to_vec(),
    };
    let entry = options.entry;
    let base = LinearAddress::new(u32::from(entry.segment) << 4) + entry.offset;
    machine.load(base, &image);
    machine.set_segment(SegmentRegister::Ds, entry.segment);
    machine.set_segment(SegmentRegister::Ss, entry.segment);
    machine.jump(entry.segment, entry.offset);
    info!(bytes = image.len(), %entry, %base, "guest image loaded");

    let transport = ListenerTransport::bind(&options.config.listen)?;
    let mut debugger = DebugLoop::new(transport, options.config.clone());

    if let Some((program, args)) = &options.launch {
        machine.set_program_entry(entry.segment, entry.offset);
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        launch_under_debugger(&mut debugger, &mut machine, program, &args)?;
    }
    if !options.run {
        debugger.enable(&mut machine, StopReason::Explicit);
    }

    loop {
        let code = match machine.run(&mut debugger, SLICE_BUDGET) {
            Ok(code) => code,
            Err(err) => {
                warn!(error = %err, "debugger failed, shutting down");
                debugger.shutdown(&mut machine);
                return Err(err.into());
            }
        };
        if code != 0 {
            info!(code, "guest requested exit");
            debugger.shutdown(&mut machine);
            return Ok(code);
        }
        if machine.halted() && !debugger.is_debugging() {
            info!(cs = machine.cs(), eip = machine.eip(), "guest halted");
            debugger.enable(&mut machine, StopReason::Explicit);
        }
    }
}

/// Parse `SEG:OFF` with hexadecimal parts.
///
/// ## Errors
///
/// Returns a message naming the bad input.
pub fn parse_segmented(text: &str) -> Result<SegmentedAddress, String>
{
    let (segment, offset) = text
        .split_once(':')
        .ok_or_else(|| format!("expected SEG:OFF, got {text:?}"))?;
    let segment = u16::from_str_radix(strip_hex(segment), 16).map_err(|e| format!("bad segment {segment:?}: {e}"))?;
    let offset = u32::from_str_radix(strip_hex(offset), 16).map_err(|e| format!("bad offset {offset:?}: {e}"))?;
    Ok(SegmentedAddress::new(segment, offset))
}

/// Parse a number, hexadecimal with a `0x` prefix or a trailing `h`.
///
/// ## Errors
///
/// Returns a message naming the bad input.
pub fn parse_number(text: &str) -> Result<u32, String>
{
    let trimmed = text.trim();
    let lowered = trimmed.to_ascii_lowercase();
    let parsed = if let Some(hex) = lowered.strip_prefix("0x") {
        u32::from_str_radix(hex, 16)
    } else if let Some(hex) = lowered.strip_suffix('h') {
        u32::from_str_radix(hex, 16)
    } else {
        lowered.parse()
    };
    parsed.map_err(|e| format!("bad number {trimmed:?}: {e}"))
}

fn strip_hex(text: &str) -> &str
{
    let text = text.trim();
    text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")).unwrap_or(text)
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_parse_segmented()
    {
        assert_eq!(parse_segmented("1234:0100").unwrap(), SegmentedAddress::new(0x1234, 0x100));
        assert_eq!(parse_segmented("0x10:0x20").unwrap(), SegmentedAddress::new(0x10, 0x20));
        assert!(parse_segmented("1234").is_err());
        assert!(parse_segmented("12345:0").is_err());
    }

    #[test]
    fn test_parse_number()
    {
        assert_eq!(parse_number("0x21").unwrap(), 0x21);
        assert_eq!(parse_number("21h").unwrap(), 0x21);
        assert_eq!(parse_number("33").unwrap(), 33);
        assert!(parse_number("zz").is_err());
    }

    #[test]
    fn test_demo_program_loops_back_to_start()
    {
        let end = i32::try_from(DEMO_PROGRAM.len()).unwrap();
        #[allow(clippy::cast_possible_wrap)]
        let displacement = i32::from(DEMO_PROGRAM[DEMO_PROGRAM.len() - 1] as i8);
        assert_eq!(end + displacement, 0);
    }
}
