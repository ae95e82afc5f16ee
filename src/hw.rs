//! Hardware configuration and machine bring-up.
//!
//! Grounded on `original_source/app/thumb2sim.c`'s `hardware_params_t`
//! literal and `init_cortexm`: a fixed-size ROM loaded from a file at a
//! configurable base address, a zeroed RAM region, and a CPU reset from
//! the IVT at the ROM base.

use std::fs;
use std::path::Path;

use crate::address_space::AddressSpace;
use crate::cpu::CpuState;
use crate::error::EmulatorError;

/// Machine layout, mirroring `struct hardware_params_t`.
#[derive(Debug, Clone)]
pub struct HardwareParams {
    pub rom_size_bytes: u32,
    pub ram_size_bytes: u32,
    pub ivt_base_address: u32,
    pub rom_base_address: u32,
    pub ram_base_address: u32,
}

impl Default for HardwareParams {
    /// The same defaults `app/thumb2sim.c` hardcodes: 1 MiB ROM, 128 KiB
    /// RAM, both based at the conventional Cortex-M addresses.
    fn default() -> Self {
        Self {
            rom_size_bytes: 1024 * 1024,
            ram_size_bytes: 128 * 1024,
            ivt_base_address: 0x0800_0000,
            rom_base_address: 0x0800_0000,
            ram_base_address: 0x2000_0000,
        }
    }
}

/// A freshly mapped and reset machine, ready to step.
pub struct Machine {
    pub cpu: CpuState,
    pub mem: AddressSpace,
}

/// Map ROM (from `rom_image_path`) and RAM per `params`, then reset the
/// CPU from the IVT. Mirrors `init_cortexm` followed by the implicit
/// `cpu_reset` every machine needs before stepping.
pub fn init(params: &HardwareParams, rom_image_path: &Path) -> Result<Machine, EmulatorError> {
    let rom_bytes = fs::read(rom_image_path).map_err(|source| EmulatorError::Io {
        path: rom_image_path.display().to_string(),
        source,
    })?;
    if rom_bytes.len() as u32 > params.rom_size_bytes {
        return Err(EmulatorError::ImageTooLarge {
            path: rom_image_path.display().to_string(),
            size: rom_bytes.len(),
            budget: params.rom_size_bytes,
        });
    }
    let mut rom = vec![0u8; params.rom_size_bytes as usize];
    rom[..rom_bytes.len()].copy_from_slice(&rom_bytes);

    let mut mem = AddressSpace::new();
    mem.add_region("rom", params.rom_base_address, rom, true, false)?;
    mem.add_region("ram", params.ram_base_address, vec![0u8; params.ram_size_bytes as usize], false, false)?;

    let mut cpu = CpuState::default();
    cpu.reset(&mem, params.ivt_base_address);

    Ok(Machine { cpu, mem })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn init_loads_rom_and_resets_cpu_from_ivt() {
        let mut rom_image = vec![0u8; 16];
        rom_image[0..4].copy_from_slice(&0x2000_1000u32.to_le_bytes()); // SP
        rom_image[4..8].copy_from_slice(&0x0800_0009u32.to_le_bytes()); // PC (thumb bit set)

        let dir = std::env::temp_dir();
        let path = dir.join(format!("thumb2sim-test-rom-{}.bin", std::process::id()));
        {
            let mut f = std::fs::File::create(&path).unwrap();
            f.write_all(&rom_image).unwrap();
        }

        let params = HardwareParams {
            rom_size_bytes: 64,
            ram_size_bytes: 64,
            ..HardwareParams::default()
        };
        let machine = init(&params, &path).expect("init should succeed");
        assert_eq!(machine.cpu.sp(), 0x2000_1000);
        assert_eq!(machine.cpu.pc(), 0x0800_0008);

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn init_rejects_oversized_rom_image() {
        let dir = std::env::temp_dir();
        let path = dir.join(format!("thumb2sim-test-big-{}.bin", std::process::id()));
        std::fs::write(&path, vec![0u8; 128]).unwrap();

        let params = HardwareParams {
            rom_size_bytes: 16,
            ..HardwareParams::default()
        };
        let result = init(&params, &path);
        assert!(matches!(result, Err(EmulatorError::ImageTooLarge { .. })));

        std::fs::remove_file(&path).ok();
    }
}
