use std::path::PathBuf;
use std::process;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use debugbox_core::config::DebugConfig;
use debugbox_core::SegmentedAddress;
use debugbox_protocol::{
    BreakNotice, BreakpointId, BreakpointSpec, BreakpointsRequest, ControlRequest, CpuRequest, MemoryRequest,
    RegistersRequest, Reply, Request, Response, ResumeDecision, WatchMode,
};
use debugbox_utils::{info, init_logging, LogConfig, LogLevel};

mod client;
mod serve;

use client::{Client, ClientResult};
use serve::{parse_number, parse_segmented, ServeOptions, DEMO_ENTRY};

/// Name controllers attach with.
const CLIENT_NAME: &str = "debugbox-cli";

/// Remote-controlled breakpoint debugger for emulated x86 DOS machines.
#[derive(Parser, Debug)]
#[command(name = "debugbox")]
#[command(version)]
#[command(about = "Remote-controlled breakpoint debugger for emulated x86 DOS machines", long_about = None)]
struct Cli
{
    /// Debugger endpoint (defaults to DEBUGBOX_LISTEN or 127.0.0.1:5455)
    #[arg(long, global = true)]
    connect: Option<String>,
    /// Print replies as JSON
    #[arg(long, global = true, default_value_t = false)]
    json: bool,
    /// Log level (overrides RUST_LOG)
    #[arg(long, global = true)]
    log_level: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands
{
    /// Run the reference machine and wait for controllers
    Serve
    {
        /// Raw guest image (a small demo program when omitted)
        #[arg(long)]
        image: Option<PathBuf>,
        /// Load and start address, SEG:OFF in hex (default 0100:0000)
        #[arg(long, value_parser = parse_segmented)]
        entry: Option<SegmentedAddress>,
        /// Start running instead of stopping before the first instruction
        #[arg(long, default_value_t = false)]
        run: bool,
        /// Run hardware interrupt handlers at full speed while stopped
        #[arg(long, default_value_t = false)]
        skip_irq_handlers: bool,
        /// Guest memory size in KiB
        #[arg(long)]
        memory_kb: Option<usize>,
        /// Start PROGRAM through the guest loader and break at its entry
        #[arg(long)]
        launch: Option<String>,
        /// Arguments for the launched program
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
    /// Show every register
    Regs,
    /// Read a register, or write it when VALUE is given
    Reg
    {
        /// Register name (eax, ax, ip, cs, flags, ...)
        name: String,
        /// New value (decimal, 0x.. or ..h)
        #[arg(value_parser = parse_number)]
        value: Option<u32>,
    },
    /// Read guest memory
    Mem
    {
        /// SEG:OFF in hex
        #[arg(value_parser = parse_segmented)]
        address: SegmentedAddress,
        /// Number of bytes to read
        #[arg(short, long, default_value_t = 16)]
        length: u32,
    },
    /// Write bytes to guest memory
    Poke
    {
        /// SEG:OFF in hex
        #[arg(value_parser = parse_segmented)]
        address: SegmentedAddress,
        /// Bytes to write
        #[arg(required = true, value_parser = parse_byte)]
        bytes: Vec<u8>,
    },
    /// Add a code breakpoint
    Break
    {
        /// SEG:OFF in hex
        #[arg(value_parser = parse_segmented)]
        address: SegmentedAddress,
        /// Remove the breakpoint after its first hit
        #[arg(long, default_value_t = false)]
        once: bool,
    },
    /// Add an interrupt breakpoint
    BreakInt
    {
        /// Interrupt number
        #[arg(value_parser = parse_byte)]
        number: u8,
        /// Only break when AH has this value
        #[arg(long, value_parser = parse_byte)]
        ah: Option<u8>,
        /// Remove the breakpoint after its first hit
        #[arg(long, default_value_t = false)]
        once: bool,
    },
    /// Watch a memory byte for changes
    Watch
    {
        /// SEG:OFF in hex (OFF is the linear address in linear mode)
        #[arg(value_parser = parse_segmented)]
        address: SegmentedAddress,
        /// How the address is translated
        #[arg(long, value_enum, default_value_t = WatchArg::Real)]
        mode: WatchArg,
    },
    /// Delete a breakpoint by id (INDEX.GENERATION)
    Delete
    {
        #[arg(value_parser = parse_breakpoint_id)]
        id: BreakpointId,
    },
    /// List breakpoints, newest first
    Breakpoints,
    /// Delete every breakpoint
    Clear,
    /// Show CPU mode flags
    Cpu,
    /// Show the descriptor of a selector
    Descriptor
    {
        #[arg(value_parser = parse_number)]
        selector: u32,
    },
    /// Describe an emulator callback slot
    Callback
    {
        #[arg(value_parser = parse_number)]
        index: u32,
    },
    /// Execute one instruction and wait for the stop
    Step,
    /// Resume the guest
    Run,
    /// Wait for the next stop
    Wait
    {
        /// Give up after this many seconds
        #[arg(long)]
        timeout: Option<u64>,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum WatchArg
{
    Real,
    Protected,
    Linear,
}

impl From<WatchArg> for WatchMode
{
    fn from(mode: WatchArg) -> Self
    {
        match mode {
            WatchArg::Real => WatchMode::Real,
            WatchArg::Protected => WatchMode::Protected,
            WatchArg::Linear => WatchMode::Linear,
        }
    }
}

fn main()
{
    let cli = Cli::parse();

    let mut log_config = LogConfig::from_env();
    if let Some(level) = &cli.log_level {
        match level.parse::<LogLevel>() {
            Ok(level) => log_config.level = Some(level),
            Err(e) => {
                eprintln!("{e}");
                process::exit(2);
            }
        }
    }
    // Keep the guard alive so the file sink flushes on exit
    let guard = match init_logging(&log_config) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {e}");
            process::exit(1);
        }
    };

    let config = match DebugConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e}");
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Serve {
            image,
            entry,
            run,
            skip_irq_handlers,
            memory_kb,
            launch,
            args,
        } => {
            let mut config = config;
            if let Some(listen) = cli.connect {
                config.listen = listen;
            }
            if skip_irq_handlers {
                config.skip_interrupt_handlers = true;
            }
            if let Some(memory_kb) = memory_kb {
                config.memory_kb = memory_kb;
            }
            let options = ServeOptions {
                config,
                image,
                entry: entry.unwrap_or(DEMO_ENTRY),
                run,
                launch: launch.map(|program| (program, args)),
            };
            match serve::serve(options) {
                Ok(code) => {
                    info!(code, "guest exited");
                    drop(guard);
                    process::exit(i32::try_from(code).unwrap_or(i32::MAX));
                }
                Err(e) => Err(e),
            }
        }
        command => {
            let address = cli.connect.unwrap_or(config.listen);
            match tokio::runtime::Runtime::new() {
                Ok(runtime) => runtime.block_on(run_controller(&address, command, cli.json)),
                Err(e) => Err(e.into()),
            }
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

async fn run_controller(address: &str, command: Commands, json: bool) -> ClientResult<()>
{
    let mut client = Client::connect(address, CLIENT_NAME).await?;
    // A stop reported before we attached is still waiting for a decision.
    let pending = client.wait_for_break(Some(Duration::from_millis(50))).await?;

    match command {
        Commands::Step => {
            if pending.is_some() {
                client.decide(ResumeDecision::Break).await?;
            }
            let response = client.call(Request::Control(ControlRequest::StepIn)).await?;
            print_response(&response, json)?;
            if let Some(notice) = client.wait_for_break(None).await? {
                client.decide(ResumeDecision::Break).await?;
                print_notice(&notice, json)?;
            }
        }
        Commands::Run => {
            if pending.is_some() {
                client.decide(ResumeDecision::Continue).await?;
                println!("continued");
            } else {
                let response = client.call(Request::Control(ControlRequest::Run)).await?;
                print_response(&response, json)?;
            }
        }
        Commands::Wait { timeout } => {
            let notice = match pending {
                Some(notice) => Some(notice),
                None => client.wait_for_break(timeout.map(Duration::from_secs)).await?,
            };
            match notice {
                Some(notice) => {
                    client.decide(ResumeDecision::Break).await?;
                    print_notice(&notice, json)?;
                }
                None => println!("no stop"),
            }
        }
        command => {
            if let Some(notice) = pending {
                client.decide(ResumeDecision::Break).await?;
                print_notice(&notice, json)?;
            }
            let response = client.call(request_for(command)?).await?;
            print_response(&response, json)?;
        }
    }

    for notice in client.take_notices() {
        print_notice(&notice, json)?;
    }
    client.close(CLIENT_NAME).await
}

fn request_for(command: Commands) -> ClientResult<Request>
{
    let request = match command {
        Commands::Regs => Request::Registers(RegistersRequest::GetAll),
        Commands::Reg { name, value: None } => Request::Registers(RegistersRequest::Get { name }),
        Commands::Reg { name, value: Some(value) } => Request::Registers(RegistersRequest::Set { name, value }),
        Commands::Mem { address, length } => Request::Memory(MemoryRequest::Read {
            segment: address.segment,
            offset: address.offset,
            length,
        }),
        Commands::Poke { address, bytes } => Request::Memory(MemoryRequest::WriteBytes {
            segment: address.segment,
            offset: address.offset,
            bytes,
        }),
        Commands::Break { address, once } => breakpoint(BreakpointSpec::Code {
            segment: address.segment,
            offset: address.offset,
            once,
        }),
        Commands::BreakInt { number, ah, once } => breakpoint(BreakpointSpec::Interrupt { number, ah, once }),
        Commands::Watch { address, mode } => breakpoint(BreakpointSpec::MemoryWatch {
            segment: address.segment,
            offset: address.offset,
            mode: mode.into(),
        }),
        Commands::Delete { id } => Request::Breakpoints(BreakpointsRequest::Delete { id }),
        Commands::Breakpoints => Request::Breakpoints(BreakpointsRequest::List),
        Commands::Clear => Request::Breakpoints(BreakpointsRequest::Clear),
        Commands::Cpu => Request::Cpu(CpuRequest::Info),
        Commands::Descriptor { selector } => Request::Cpu(CpuRequest::Descriptor {
            selector: u16::try_from(selector)?,
        }),
        Commands::Callback { index } => Request::Cpu(CpuRequest::CallbackInfo {
            index: u16::try_from(index)?,
        }),
        Commands::Serve { .. } | Commands::Step | Commands::Run | Commands::Wait { .. } => {
            return Err("not a single request".into());
        }
    };
    Ok(request)
}

fn breakpoint(spec: BreakpointSpec) -> Request
{
    Request::Breakpoints(BreakpointsRequest::Add { spec })
}

fn print_notice(notice: &BreakNotice, json: bool) -> ClientResult<()>
{
    if json {
        println!("{}", serde_json::to_string(notice)?);
        return Ok(());
    }
    let linear = notice.linear.map_or_else(|| "?".to_string(), |linear| format!("{linear:08x}"));
    println!("stopped at {:04X}:{:08X} ({linear}): {:?}", notice.cs, notice.eip, notice.reason);
    Ok(())
}

fn print_response(response: &Response, json: bool) -> ClientResult<()>
{
    if json {
        println!("{}", serde_json::to_string_pretty(response)?);
        return Ok(());
    }
    let reply = match response {
        Response::Ok(reply) => reply,
        Response::Err(err) => return Err(err.to_string().into()),
    };
    match reply {
        Reply::Registers(regs) => {
            println!(
                "EAX={:08X} EBX={:08X} ECX={:08X} EDX={:08X}",
                regs.eax, regs.ebx, regs.ecx, regs.edx
            );
            println!(
                "ESI={:08X} EDI={:08X} EBP={:08X} ESP={:08X}",
                regs.esi, regs.edi, regs.ebp, regs.esp
            );
            println!(
                "CS={:04X} DS={:04X} ES={:04X} FS={:04X} GS={:04X} SS={:04X} EIP={:08X}",
                regs.cs, regs.ds, regs.es, regs.fs, regs.gs, regs.ss, regs.eip
            );
            println!("{:?}", regs.flags);
        }
        Reply::Value(value) => println!("{value:#x}"),
        Reply::Previous(value) => println!("previous {value:#x}"),
        Reply::Bytes(bytes) => {
            for row in bytes.chunks(16) {
                let hex: Vec<String> = row.iter().map(|b| format!("{b:02x}")).collect();
                println!("{}", hex.join(" "));
            }
        }
        Reply::Written(count) => println!("wrote {count} bytes"),
        Reply::Eip(eip) => println!("eip {eip:#x}"),
        Reply::CpuInfo(cpu) => println!(
            "protected={} vm86={} big_code={}",
            cpu.protected, cpu.vm86, cpu.big_code
        ),
        Reply::Callback(description) => println!("{}", description.as_deref().unwrap_or("(none)")),
        Reply::Descriptor(Some(descriptor)) => println!(
            "selector={:#06x} base={:#010x} limit={:#x} type={:#x} dpl={} present={} big={} granularity={}",
            descriptor.selector,
            descriptor.base,
            descriptor.limit,
            descriptor.kind,
            descriptor.dpl,
            descriptor.present,
            descriptor.big,
            descriptor.granularity
        ),
        Reply::Descriptor(None) => println!("(no descriptor)"),
        Reply::Added(id) => println!("added {id}"),
        Reply::Deleted(deleted) => println!("{}", if *deleted { "deleted" } else { "not found" }),
        Reply::Breakpoints(list) => {
            if list.is_empty() {
                println!("no breakpoints");
            }
            for bp in list {
                let once = if bp.once { " once" } else { "" };
                let active = if bp.active { "" } else { " (inactive)" };
                println!("{} {:?}{once}{active}", bp.id, bp.target);
            }
        }
        Reply::Attached | Reply::Detached | Reply::Cleared => println!("ok"),
    }
    Ok(())
}

fn parse_byte(text: &str) -> Result<u8, String>
{
    let value = parse_number(text)?;
    u8::try_from(value).map_err(|_| format!("{text:?} does not fit in a byte"))
}

fn parse_breakpoint_id(text: &str) -> Result<BreakpointId, String>
{
    let text = text.trim_start_matches('#');
    let (index, generation) = text.split_once('.').unwrap_or((text, "0"));
    let index = index.parse().map_err(|e| format!("bad index {index:?}: {e}"))?;
    let generation = generation
        .parse()
        .map_err(|e| format!("bad generation {generation:?}: {e}"))?;
    Ok(BreakpointId::from_parts(index, generation))
}

#[cfg(test)]
mod tests
{
    use debugbox_core::config::DEFAULT_LISTEN;

    use super::*;

    #[test]
    fn test_cli_parses_breakpoint_commands()
    {
        let cli = Cli::try_parse_from(["debugbox", "break", "1234:0100", "--once"]).unwrap();
        match cli.command {
            Commands::Break { address, once } => {
                assert_eq!(address, SegmentedAddress::new(0x1234, 0x100));
                assert!(once);
            }
            other => panic!("unexpected command {other:?}"),
        }

        let cli = Cli::try_parse_from(["debugbox", "break-int", "0x21", "--ah", "4ch"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::BreakInt {
                number: 0x21,
                ah: Some(0x4c),
                once: false
            }
        ));
    }

    #[test]
    fn test_request_for_watch()
    {
        let request = request_for(Commands::Watch {
            address: SegmentedAddress::new(0, 0x41c),
            mode: WatchArg::Linear,
        })
        .unwrap();
        assert_eq!(
            request,
            Request::Breakpoints(BreakpointsRequest::Add {
                spec: BreakpointSpec::MemoryWatch {
                    segment: 0,
                    offset: 0x41c,
                    mode: WatchMode::Linear,
                },
            })
        );
    }

    #[test]
    fn test_parse_breakpoint_id()
    {
        assert_eq!(parse_breakpoint_id("#3.1").unwrap(), BreakpointId::from_parts(3, 1));
        assert_eq!(parse_breakpoint_id("2").unwrap(), BreakpointId::from_parts(2, 0));
        assert!(parse_breakpoint_id("x.1").is_err());
    }

    #[test]
    fn test_connect_defaults_to_listen_address()
    {
        let cli = Cli::try_parse_from(["debugbox", "regs"]).unwrap();
        assert!(cli.connect.is_none());
        assert_eq!(DebugConfig::default().listen, DEFAULT_LISTEN);
    }
}
