//! State dump: write every writable, non-shadow memory slice plus the CPU
//! register/flag state to a directory, grounded on `cpu_dump_file`.

use std::fs;
use std::io;
use std::path::Path;

use serde::Serialize;

use crate::address_space::AddressSpace;
use crate::cpu::CpuState;

#[derive(Serialize)]
struct Psr {
    value: u32,
    flags: String,
}

#[derive(Serialize)]
struct CpuDump {
    regs: std::collections::BTreeMap<String, u32>,
    psr: Psr,
}

/// Write `slice_<name>.bin` for each writable, non-shadow slice and a
/// `cpu.json` with registers and PSR flags, into `dir`.
pub fn dump(cpu: &CpuState, mem: &AddressSpace, dir: &Path) -> io::Result<()> {
    fs::create_dir_all(dir)?;
    for slice in mem.slices() {
        if slice.is_read_only() || slice.is_shadow() {
            continue;
        }
        let path = dir.join(format!("slice_{}.bin", slice.name()));
        fs::write(path, slice.data())?;
    }

    let mut regs = std::collections::BTreeMap::new();
    for (i, value) in cpu.reg.iter().enumerate() {
        regs.insert(format!("r{i}"), *value);
    }
    let dump = CpuDump {
        regs,
        psr: Psr {
            value: cpu.psr,
            flags: cpu.flags_string(),
        },
    };
    let json = serde_json::to_string_pretty(&dump).expect("CpuDump serialization cannot fail");
    fs::write(dir.join("cpu.json"), json)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dump_writes_writable_slices_and_cpu_json() {
        let mut mem = AddressSpace::new();
        mem.add_region("rom", 0, vec![0xAAu8; 4], true, false).unwrap();
        mem.add_region("ram", 0x1000, vec![0xBBu8; 4], false, false).unwrap();
        let mut cpu = CpuState::default();
        cpu.reg[0] = 42;

        let dir = std::env::temp_dir().join(format!("thumb2sim-dump-test-{}", std::process::id()));
        dump(&cpu, &mem, &dir).expect("dump should succeed");

        assert!(!dir.join("slice_rom.bin").exists());
        assert!(dir.join("slice_ram.bin").exists());
        let ram_contents = fs::read(dir.join("slice_ram.bin")).unwrap();
        assert_eq!(ram_contents, vec![0xBB; 4]);

        let json = fs::read_to_string(dir.join("cpu.json")).unwrap();
        assert!(json.contains("\"r0\": 42"));

        fs::remove_dir_all(&dir).ok();
    }
}
