//! CPU register file and program status register.
//!
//! Grounded on `original_source/include/thumb2sim.h` (register/flag
//! constants, `cm3_cpu_state_t`) and `original_source/cpu_cm3.c` (reset,
//! `cpu_print_state`).

use crate::address_space::AddressSpace;

pub const REG_SP: usize = 13;
pub const REG_LR: usize = 14;
pub const REG_PC: usize = 15;

pub const FLAG_NEGATIVE: u32 = 1 << 31;
pub const FLAG_ZERO: u32 = 1 << 30;
pub const FLAG_CARRY: u32 = 1 << 29;
pub const FLAG_OVERFLOW: u32 = 1 << 28;
pub const FLAG_SATURATION: u32 = 1 << 27;

const REGISTER_NAMES: [&str; 16] = [
    "r0", "r1", "r2", "r3", "r4", "r5", "r6", "r7", "r8", "r9", "r10", "r11", "r12", "sp", "lr",
    "pc",
];

/// IT (if-then) block state machine position. `None` means no active IT
/// block; `Some(n)` tracks the two-bit-shifted state the original encodes
/// inline in `it_state`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ItState {
    /// Raw shiftable state, as in the original `cpu.it_state`: nonzero
    /// means "this many more conditional slots remain", each step shifts
    /// right by 2 bits, reaching 0 when the block is exhausted.
    pub state: u8,
    /// The 4-bit base condition of the IT block (`cpu.it_cond`).
    pub cond: u8,
}

impl ItState {
    pub fn is_active(&self) -> bool {
        self.state != 0
    }

    /// `it_state & 0x3`: THEN (1) or ELSE (2) for the *current* instruction.
    pub fn current(&self) -> u8 {
        self.state & 0x3
    }

    pub fn shift(&mut self) {
        self.state >>= 2;
    }
}

/// The 16 general-purpose registers plus PSR and bookkeeping, matching
/// `struct cm3_cpu_state_t`.
pub struct CpuState {
    pub reg: [u32; 16],
    pub psr: u32,
    pub insn_ctr: u64,
    pub it: ItState,
}

impl Default for CpuState {
    fn default() -> Self {
        Self {
            reg: [0; 16],
            psr: 0,
            insn_ctr: 0,
            it: ItState::default(),
        }
    }
}

impl CpuState {
    pub fn pc(&self) -> u32 {
        self.reg[REG_PC]
    }

    pub fn set_pc(&mut self, value: u32) {
        self.reg[REG_PC] = value;
    }

    pub fn sp(&self) -> u32 {
        self.reg[REG_SP]
    }

    pub fn lr(&self) -> u32 {
        self.reg[REG_LR]
    }

    pub fn flag(&self, mask: u32) -> bool {
        self.psr & mask != 0
    }

    pub fn set_flag(&mut self, mask: u32, value: bool) {
        if value {
            self.psr |= mask;
        } else {
            self.psr &= !mask;
        }
    }

    pub fn n(&self) -> bool {
        self.flag(FLAG_NEGATIVE)
    }
    pub fn z(&self) -> bool {
        self.flag(FLAG_ZERO)
    }
    pub fn c(&self) -> bool {
        self.flag(FLAG_CARRY)
    }
    pub fn v(&self) -> bool {
        self.flag(FLAG_OVERFLOW)
    }
    pub fn q(&self) -> bool {
        self.flag(FLAG_SATURATION)
    }

    /// Reset per `cpu_reset`: zero all GPRs, PSR = 0x173 (Thumb bit + default
    /// mode bits as the original hardcodes), clear the instruction counter,
    /// then load SP/PC from the interrupt vector table at `ivt_base`.
    pub fn reset(&mut self, addr_space: &AddressSpace, ivt_base: u32) {
        self.reg = [0; 16];
        self.psr = 0x173;
        self.insn_ctr = 0;
        self.it = ItState::default();
        self.reg[REG_SP] = addr_space.read32(ivt_base);
        self.reg[REG_PC] = addr_space.read32(ivt_base + 4) & !1;
        tracing::info!(sp = %format!("{:#010x}", self.reg[REG_SP]), pc = %format!("{:#010x}", self.reg[REG_PC]), "cpu reset");
    }

    /// Human-readable register/flag dump at `info` level, mirroring
    /// `cpu_print_state`.
    pub fn log_state(&self) {
        for (i, name) in REGISTER_NAMES.iter().enumerate() {
            tracing::info!(register = %name, value = %format!("{:#010x}", self.reg[i]), "register");
        }
        tracing::info!(
            psr = %format!("{:#010x}", self.psr),
            flags = %self.flags_string(),
            "psr"
        );
    }

    /// Five-letter NZCVQ flag rendering, uppercase when set — shared by
    /// `log_state` and the state-dump JSON (`cpu.json`'s `"flags"` field).
    pub fn flags_string(&self) -> String {
        let bits = [
            ('N', FLAG_NEGATIVE),
            ('Z', FLAG_ZERO),
            ('C', FLAG_CARRY),
            ('V', FLAG_OVERFLOW),
            ('Q', FLAG_SATURATION),
        ];
        bits.iter()
            .map(|(c, mask)| {
                if self.psr & mask != 0 {
                    *c
                } else {
                    c.to_ascii_lowercase()
                }
            })
            .collect()
    }

    /// Rewrite the PSR's IT-echo bits (10-15, 25-26) from the current IT
    /// state, per `cpu_single_step`'s tail. Bits `0xff00` are cleared, then:
    /// no active IT block sets bit 8; an active block sets bits 8, 11 and
    /// the 4-bit cond into bits 12-15; state==5 (last THEN/ELSE slot) also
    /// sets bit 10.
    pub fn rewrite_it_echo(&mut self) {
        self.psr &= !0xff00;
        if self.it.state == 0 {
            self.psr |= 0x0100;
        } else {
            self.psr |= 0x0900 | (u32::from(self.it.cond) << 12);
            if self.it.state == 5 {
                self.psr |= 0x400;
            }
        }
    }
}
