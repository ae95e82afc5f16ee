//! GDB remote serial protocol subset: register dump, memory hex dump,
//! memory MD5 hash, single-step, kill.
//!
//! Grounded on `original_source/gdbserver/gdbserver.c`. One deliberate
//! deviation: the original *connects out* to a pre-existing UNIX socket
//! (as if something else were the listener). This implementation instead
//! binds and accepts — the arrangement `target remote` tooling expects —
//! recorded in DESIGN.md.

use std::io::{Read, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::Path;

use md5::{Digest, Md5};

use crate::address_space::AddressSpace;
use crate::callbacks::HostCallbacks;
use crate::cpu::CpuState;
use crate::step;

/// `+$<payload>#<checksum>`, checksum the 8-bit sum of the payload bytes.
fn tx_frame(payload: &str) -> String {
    let checksum: u8 = payload.bytes().fold(0u8, |acc, b| acc.wrapping_add(b));
    format!("+${payload}#{checksum:02x}")
}

fn nibble_to_hex(nibble: u8) -> char {
    char::from_digit((nibble & 0xf) as u32, 16).expect("nibble is always < 16")
}

fn bytes_to_hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push(nibble_to_hex(b >> 4));
        out.push(nibble_to_hex(b & 0xf));
    }
    out
}

/// 16 GPRs as big-endian 8-hex-digit words, 25 filler words of zero (the
/// original pads out to match GDB's expected register set width for a
/// target it never fully describes), then the PSR, also big-endian.
fn dump_register_set(cpu: &CpuState) -> String {
    let mut reply = String::new();
    for value in cpu.reg.iter() {
        reply.push_str(&format!("{:08x}", value.to_be()));
    }
    for _ in 0..25 {
        reply.push_str("00000000");
    }
    reply.push_str(&format!("{:08x}", cpu.psr.to_be()));
    reply
}

fn dump_memory(mem: &AddressSpace, start: u32, length: u32) -> Option<String> {
    mem.memory_ptr(start, length).map(bytes_to_hex)
}

fn hash_memory(mem: &AddressSpace, start: u32, length: u32) -> Option<String> {
    mem.memory_ptr(start, length).map(|bytes| {
        let digest = Md5::digest(bytes);
        bytes_to_hex(&digest)
    })
}

fn parse_addr_len(args: &str) -> Option<(u32, u32)> {
    let (addr_str, len_str) = args.split_once(',')?;
    let addr = u32::from_str_radix(addr_str, 16).ok()?;
    let len = u32::from_str_radix(len_str, 16).ok()?;
    Some((addr, len))
}

enum Outcome {
    Reply(String),
    Kill,
}

fn handle_command(msg: &str, cpu: &mut CpuState, mem: &mut AddressSpace, callbacks: &mut dyn HostCallbacks) -> Outcome {
    if msg == "g" {
        return Outcome::Reply(tx_frame(&dump_register_set(cpu)));
    }
    if let Some(rest) = msg.strip_prefix('m') {
        return match parse_addr_len(rest) {
            Some((addr, len)) => match dump_memory(mem, addr, len) {
                Some(hex) => Outcome::Reply(tx_frame(&hex)),
                None => Outcome::Reply("-".to_string()),
            },
            None => Outcome::Reply("-".to_string()),
        };
    }
    if msg == "vCont;s:1;c" {
        step::single_step(cpu, mem, callbacks);
        return Outcome::Reply(tx_frame(""));
    }
    if msg.starts_with('k') {
        return Outcome::Kill;
    }
    if let Some(rest) = msg.strip_prefix("qmemhash:") {
        return match parse_addr_len(rest) {
            Some((addr, len)) => match hash_memory(mem, addr, len) {
                Some(hex) => Outcome::Reply(tx_frame(&hex)),
                None => Outcome::Reply("-".to_string()),
            },
            None => Outcome::Reply("-".to_string()),
        };
    }
    tracing::warn!(command = %msg, "unknown debugger command");
    Outcome::Reply("-".to_string())
}

/// Strip the `+$...#checksum` framing. Returns `None` (and the original's
/// `-` NAK) if the frame is malformed.
fn interpret_rx(raw: &str) -> Option<&str> {
    let hash_pos = raw.find('#')?;
    let body = &raw[..hash_pos];
    body.strip_prefix("+$")
}

fn handle_connection(mut stream: UnixStream, cpu: &mut CpuState, mem: &mut AddressSpace, callbacks: &mut dyn HostCallbacks) {
    let mut buf = [0u8; 4096];
    loop {
        let n = match stream.read(&mut buf) {
            Ok(0) => return,
            Ok(n) => n,
            Err(e) => {
                tracing::warn!(error = %e, "gdb connection read error");
                return;
            }
        };
        let raw = String::from_utf8_lossy(&buf[..n]);
        let outcome = match interpret_rx(&raw) {
            Some(msg) => handle_command(msg, cpu, mem, callbacks),
            None => Outcome::Reply("-".to_string()),
        };
        match outcome {
            Outcome::Reply(reply) => {
                if stream.write_all(reply.as_bytes()).is_err() {
                    return;
                }
            }
            Outcome::Kill => return,
        }
    }
}

/// Bind a UNIX socket at `socket_path`, accept a single GDB client
/// connection, and serve remote-protocol commands against `cpu`/`mem`
/// until the client disconnects or sends `k`.
pub fn serve(socket_path: &Path, cpu: &mut CpuState, mem: &mut AddressSpace, callbacks: &mut dyn HostCallbacks) -> std::io::Result<()> {
    let _ = std::fs::remove_file(socket_path);
    let listener = UnixListener::bind(socket_path)?;
    tracing::info!(path = %socket_path.display(), "gdb stub listening");
    let (stream, _) = listener.accept()?;
    handle_connection(stream, cpu, mem, callbacks);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callbacks::NullCallbacks;

    #[test]
    fn tx_frame_computes_8bit_sum_checksum() {
        assert_eq!(tx_frame(""), "+$#00");
        assert_eq!(tx_frame("OK"), format!("+$OK#{:02x}", b'O'.wrapping_add(b'K')));
    }

    #[test]
    fn interpret_rx_strips_framing() {
        assert_eq!(interpret_rx("+$g#67"), Some("g"));
        assert_eq!(interpret_rx("garbage"), None);
    }

    #[test]
    fn register_dump_command_reports_all_registers_and_psr() {
        let mut cpu = CpuState::default();
        cpu.reg[0] = 0x1234_5678;
        cpu.psr = 0xAABB_CCDD;
        let mut mem = AddressSpace::new();
        let mut cb = NullCallbacks;
        match handle_command("g", &mut cpu, &mut mem, &mut cb) {
            Outcome::Reply(reply) => {
                assert!(reply.contains("78563412")); // r0 byte-swapped
                assert!(reply.ends_with(&format!("#{:02x}", checksum_of(&reply))));
            }
            Outcome::Kill => panic!("expected reply"),
        }
    }

    fn checksum_of(frame: &str) -> u8 {
        // frame is "+$<payload>#<hex>" - recompute over payload only.
        let payload = &frame[2..frame.len() - 3];
        payload.bytes().fold(0u8, |acc, b| acc.wrapping_add(b))
    }

    #[test]
    fn memory_hash_command_returns_md5_hex() {
        let mut cpu = CpuState::default();
        let mut mem = AddressSpace::new();
        mem.add_region("ram", 0x2000_0000, vec![0u8; 16], false, false).unwrap();
        let mut cb = NullCallbacks;
        match handle_command("qmemhash:20000000,10", &mut cpu, &mut mem, &mut cb) {
            Outcome::Reply(reply) => assert!(reply.starts_with("+$")),
            Outcome::Kill => panic!("expected reply"),
        }
    }

    #[test]
    fn kill_command_is_recognized() {
        let mut cpu = CpuState::default();
        let mut mem = AddressSpace::new();
        let mut cb = NullCallbacks;
        assert!(matches!(handle_command("k", &mut cpu, &mut mem, &mut cb), Outcome::Kill));
    }
}
