//! `thumb2sim` — load a ROM image and run it to completion (or to an
//! instruction-count abort), optionally dumping state and tracing every
//! step. Grounded on `original_source/app/thumb2sim.c`'s `main`.

use std::path::PathBuf;

use clap::Parser;
use thumb2sim::callbacks::HostCallbacks;
use thumb2sim::hw::{self, HardwareParams};

/// Default abort threshold, matching the original's "We're tired.
/// Quitting emulation." after a million instructions.
const DEFAULT_MAX_INSTRUCTIONS: u64 = 1_000_000;

#[derive(Parser, Debug)]
#[command(name = "thumb2sim", about = "Instruction-level Thumb-2 simulator")]
struct Args {
    /// Path to the flat ROM image to load at the ROM base address.
    rom_image: PathBuf,

    /// ROM region size in bytes.
    #[arg(long, default_value_t = HardwareParams::default().rom_size_bytes)]
    rom_size: u32,

    /// RAM region size in bytes.
    #[arg(long, default_value_t = HardwareParams::default().ram_size_bytes)]
    ram_size: u32,

    /// Base address of the interrupt vector table (and, by default, ROM).
    #[arg(long, value_parser=parse_hex_u32, default_value = "0x08000000")]
    ivt_base: u32,

    /// Base address RAM is mapped at.
    #[arg(long, value_parser=parse_hex_u32, default_value = "0x20000000")]
    ram_base: u32,

    /// Log a disassembly-style trace line for every executed instruction.
    #[arg(long)]
    trace: bool,

    /// Abort after this many instructions.
    #[arg(long, default_value_t = DEFAULT_MAX_INSTRUCTIONS)]
    max_instructions: u64,

    /// Write a state dump (memory slices + cpu.json) to this directory
    /// after the run ends.
    #[arg(long)]
    dump: Option<PathBuf>,
}

fn parse_hex_u32(s: &str) -> Result<u32, std::num::ParseIntError> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    u32::from_str_radix(s, 16)
}

/// Host callbacks for the standalone CLI runner: logs breakpoints,
/// services the guest syscall ABI with the same demo behavior the
/// original's launcher used, and aborts after `max_instructions`.
struct CliCallbacks {
    max_instructions: u64,
    end: bool,
}

impl HostCallbacks for CliCallbacks {
    fn bkpt(&mut self, imm: u8) {
        if imm != 0xFF {
            tracing::info!(imm, "breakpoint hit");
        }
    }

    fn end_emulation(&mut self) -> bool {
        self.end
    }

    fn syscall_read(&mut self, data: &mut [u8], length: u32) -> u32 {
        tracing::debug!(length, "guest read requested");
        if length == 8 {
            // 12345 + 75844 + 12257489 = 12345678, matching the original
            // launcher's fixed demo payload.
            data[0..4].copy_from_slice(&75844u32.to_le_bytes());
            data[4..8].copy_from_slice(&12257489u32.to_le_bytes());
        }
        0
    }

    fn syscall_write(&mut self, data: &[u8]) {
        tracing::info!(length = data.len(), data = ?data, "guest write");
    }

    fn syscall_puts(&mut self, data: &[u8]) {
        tracing::info!(message = %String::from_utf8_lossy(data), "guest puts");
    }

    fn syscall_exit(&mut self, status: u32) {
        tracing::info!(status, "guest exit");
        self.end = true;
    }
}

fn main() -> std::process::ExitCode {
    let args = Args::parse();

    // `--trace` requests the per-instruction `cpu_debug_insn`-style line
    // emitted by the step driver at debug level; RUST_LOG still wins if set.
    let default_filter = if args.trace { "thumb2sim=debug" } else { "thumb2sim=info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter)),
        )
        .init();

    let params = HardwareParams {
        rom_size_bytes: args.rom_size,
        ram_size_bytes: args.ram_size,
        ivt_base_address: args.ivt_base,
        rom_base_address: args.ivt_base,
        ram_base_address: args.ram_base,
    };

    let machine = hw::init(&params, &args.rom_image);
    let mut machine = match machine {
        Ok(m) => m,
        Err(e) => {
            tracing::error!(error = %e, "failed to initialize machine");
            return std::process::ExitCode::FAILURE;
        }
    };

    machine.cpu.log_state();

    let mut callbacks = CliCallbacks {
        max_instructions: args.max_instructions,
        end: false,
    };

    loop {
        let budget_exhausted = machine.cpu.insn_ctr >= callbacks.max_instructions;
        if callbacks.end_emulation() || budget_exhausted {
            if budget_exhausted {
                tracing::warn!("instruction budget exhausted, quitting emulation");
            }
            break;
        }
        thumb2sim::step::single_step(&mut machine.cpu, &mut machine.mem, &mut callbacks);
    }

    machine.cpu.log_state();

    if let Some(dir) = &args.dump {
        if let Err(e) = thumb2sim::dump::dump(&machine.cpu, &machine.mem, dir) {
            tracing::error!(error = %e, "failed to write state dump");
            return std::process::ExitCode::FAILURE;
        }
    }

    std::process::ExitCode::SUCCESS
}
