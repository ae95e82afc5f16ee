//! IT-block construction and execution gating.
//!
//! Grounded on `original_source/impl_emulation.c`'s `emulation_i16_it_T1`
//! (state construction) and `conditionallyExecuteInstruction`/
//! `executionIsUnconditional` (gating). The constructed state is consumed
//! one 2-bit slot per step by [`crate::cpu::ItState::shift`].

use crate::cpu::{CpuState, ItState, FLAG_CARRY, FLAG_NEGATIVE, FLAG_OVERFLOW, FLAG_ZERO};

const IT_NONE: u8 = 0;
const IT_THEN: u8 = 1;
const IT_ELSE: u8 = 2;

/// Build the IT state vector from an `IT{x{y{z}}} cond` instruction's
/// `firstcond`/`mask` fields. Slot order is most-significant first: each
/// step consumes the low 2 bits and shifts right.
pub fn build_it_state(firstcond: u8, mask: u8) -> ItState {
    let mut len = 3i32;
    for i in 0..3 {
        if mask & (1 << i) != 0 {
            break;
        }
        len -= 1;
    }
    let match_bit = firstcond & 1;
    let mut state: u8 = 0;
    for i in (0..len).rev() {
        let then = ((mask >> (3 - i)) & 1) == match_bit;
        state <<= 2;
        state |= if then { IT_THEN } else { IT_ELSE };
    }
    state <<= 2;
    state |= IT_THEN;
    ItState { state, cond: firstcond }
}

/// ARM condition-code evaluation table (ARM ARM A7.3), ported verbatim from
/// `condSatisfied` — the same 15 named conditions plus `AL` (always true).
pub fn cond_satisfied(cpu: &CpuState, cond: u8) -> bool {
    let n = cpu.flag(FLAG_NEGATIVE);
    let z = cpu.flag(FLAG_ZERO);
    let c = cpu.flag(FLAG_CARRY);
    let v = cpu.flag(FLAG_OVERFLOW);
    match cond {
        0x0 => z,
        0x1 => !z,
        0x2 => c,
        0x3 => !c,
        0x4 => n,
        0x5 => !n,
        0x6 => v,
        0x7 => !v,
        0x8 => c && !z,
        0x9 => !(c && !z),
        0xa => n == v,
        0xb => n != v,
        0xc => !z && (n == v),
        0xd => z || (n != v),
        _ => true,
    }
}

/// Whether the *current* instruction (the one about to be decoded this
/// step) should be executed, given the IT state as of the *start* of the
/// step (before this step's shift).
pub fn should_execute(cpu: &CpuState) -> bool {
    match cpu.it.current() {
        IT_NONE => true,
        IT_THEN => cond_satisfied(cpu, cpu.it.cond),
        IT_ELSE => cond_satisfied(cpu, cpu.it.cond ^ 1),
        _ => true,
    }
}

/// Whether flag-setting is unconditional right now — used by data
/// processing forms whose `S` bit only takes effect outside an IT block's
/// conditional slots (`executionIsUnconditional`).
pub fn execution_is_unconditional(cpu: &CpuState) -> bool {
    cpu.it.current() == IT_NONE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn it_eq_then_else_produces_two_slots() {
        // IT EQ with mask 0b1000 -> just the IT instruction's own THEN slot.
        let it = build_it_state(0x0, 0b1000);
        assert_eq!(it.state & 0x3, IT_THEN);
    }

    #[test]
    fn itt_builds_then_then_sequence() {
        // firstcond EQ (0, even -> match_bit 0), mask 0b0100 (ITT): one extra THEN slot.
        let it = build_it_state(0x0, 0b0100);
        assert_eq!(it.state & 0x3, IT_THEN);
        assert_eq!((it.state >> 2) & 0x3, IT_THEN);
    }

    #[test]
    fn ite_builds_then_else_sequence() {
        // firstcond NE (1, odd -> match_bit 1), mask 0b0100 (ITE).
        let it = build_it_state(0x1, 0b0100);
        assert_eq!(it.state & 0x3, IT_THEN);
        assert_eq!((it.state >> 2) & 0x3, IT_ELSE);
    }

    #[test]
    fn cond_eq_true_when_zero_flag_set() {
        let mut cpu = CpuState::default();
        cpu.set_flag(FLAG_ZERO, true);
        assert!(cond_satisfied(&cpu, 0x0));
        assert!(!cond_satisfied(&cpu, 0x1));
    }

    #[test]
    fn should_execute_gates_then_slot_on_condition() {
        let mut cpu = CpuState::default();
        cpu.it = ItState { state: IT_THEN, cond: 0x0 }; // THEN, cond EQ
        assert!(!should_execute(&cpu)); // Z clear -> EQ false
        cpu.set_flag(FLAG_ZERO, true);
        assert!(should_execute(&cpu));
    }

    #[test]
    fn should_execute_gates_else_slot_on_inverted_condition() {
        let mut cpu = CpuState::default();
        cpu.it = ItState { state: IT_ELSE, cond: 0x0 }; // ELSE of EQ = NE
        assert!(should_execute(&cpu)); // Z clear -> NE true
        cpu.set_flag(FLAG_ZERO, true);
        assert!(!should_execute(&cpu));
    }
}
