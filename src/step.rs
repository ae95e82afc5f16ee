//! Step driver: the fetch/gate/decode/execute/advance sequence executed
//! once per guest instruction.
//!
//! Grounded directly on `original_source/cpu_cm3.c`'s `cpu_single_step`.
//! That function's shape is reproduced here almost unchanged: fetch the
//! combined instruction word, gate on IT state, decode, execute if gated
//! in, advance PC unless the instruction already set it, bump the
//! instruction counter, shift the IT state, then rewrite the PSR's IT-echo
//! bits. The one behavioral change from the original is that PC-advance
//! suppression is driven by the interpreter's own return value (did this
//! instruction set PC itself?) rather than an always-true flag that the
//! original never actually clears for branches — see DESIGN.md.

use crate::address_space::AddressSpace;
use crate::callbacks::HostCallbacks;
use crate::cpu::CpuState;
use crate::decode::{self, Instruction};
use crate::interp;
use crate::it;

/// Execute exactly one guest instruction.
pub fn single_step(cpu: &mut CpuState, mem: &mut AddressSpace, callbacks: &mut dyn HostCallbacks) {
    let span = tracing::trace_span!("step", pc = %format!("{:#010x}", cpu.pc()), insn_ctr = cpu.insn_ctr);
    let _enter = span.enter();

    let insn_word = mem.read_insn_word(cpu.pc());
    let should_execute = it::should_execute(cpu);
    let (insn, length) = decode::decode(insn_word);

    tracing::debug!(
        insn_ctr = cpu.insn_ctr,
        pc = %format!("{:#010x}", cpu.pc()),
        opcode = %format!("{insn_word:#010x}"),
        disasm = %decode::mnemonic(&insn),
        sp = %format!("{:#010x}", cpu.sp()),
        flags = %cpu.flags_string(),
        should_execute,
        "step"
    );

    let pc_set_by_insn = if should_execute {
        interp::interpret(&insn, length, cpu, mem, callbacks)
    } else {
        false
    };

    if !pc_set_by_insn {
        cpu.set_pc(cpu.pc() + length);
    }

    cpu.insn_ctr += 1;

    // The IT instruction itself must not shift the state it just built.
    if !matches!(insn, Instruction::It { .. }) {
        cpu.it.shift();
    }

    cpu.rewrite_it_echo();
}

/// Run until `callbacks.end_emulation()` reports true, polled once before
/// each step — matching `cpu_run`'s loop shape.
pub fn run(cpu: &mut CpuState, mem: &mut AddressSpace, callbacks: &mut dyn HostCallbacks) {
    loop {
        if callbacks.end_emulation() {
            break;
        }
        single_step(cpu, mem, callbacks);
    }
}
