//! `thumb2sim-gdbserver` — load a ROM image, reset the machine, and serve
//! the GDB remote protocol over a UNIX socket.

use std::path::PathBuf;

use clap::Parser;
use thumb2sim::callbacks::NullCallbacks;
use thumb2sim::gdb;
use thumb2sim::hw::{self, HardwareParams};

#[derive(Parser, Debug)]
#[command(name = "thumb2sim-gdbserver", about = "GDB remote stub for the Thumb-2 simulator")]
struct Args {
    /// Path to the flat ROM image to load at the ROM base address.
    rom_image: PathBuf,

    /// UNIX socket path to listen on for a `target remote` connection.
    #[arg(long, default_value = "/tmp/thumb2sim-gdb.sock")]
    socket: PathBuf,
}

fn main() -> std::process::ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let params = HardwareParams::default();

    let mut machine = match hw::init(&params, &args.rom_image) {
        Ok(m) => m,
        Err(e) => {
            tracing::error!(error = %e, "failed to initialize machine");
            return std::process::ExitCode::FAILURE;
        }
    };

    let mut callbacks = NullCallbacks;
    if let Err(e) = gdb::serve(&args.socket, &mut machine.cpu, &mut machine.mem, &mut callbacks) {
        tracing::error!(error = %e, "gdb stub failed");
        return std::process::ExitCode::FAILURE;
    }

    std::process::ExitCode::SUCCESS
}
