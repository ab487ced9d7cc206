//! Executable view of a basic block.
//!
//! Instrumentation and canonical-ID assignment only ever look at the
//! instructions that correspond to real program semantics. PHIs, debug and
//! lifetime markers, and landing-pad declarators carry no runtime behavior:
//! they receive no ids, no callbacks, and no dynamic-instruction ticks.

use crate::ir::{InstrId, InstrKind, IrBlock};

/// Returns `true` if the instruction participates in program semantics.
pub fn is_exec_instr(kind: &InstrKind) -> bool {
    !matches!(
        kind,
        InstrKind::Phi { .. }
            | InstrKind::LandingPad { .. }
            | InstrKind::DbgMarker
            | InstrKind::LifetimeStart { .. }
            | InstrKind::LifetimeEnd { .. }
    )
}

/// Returns the executable instructions of `block` in program order, from the
/// first non-PHI, non-marker instruction through the terminator.
///
/// Every sealed block ends in a terminator, so the view is never empty.
pub fn executable_instrs(block: &IrBlock) -> Vec<InstrId> {
    let view: Vec<InstrId> = block
        .instrs
        .iter()
        .filter(|i| is_exec_instr(&i.kind))
        .map(|i| i.id)
        .collect();
    assert!(!view.is_empty(), "block {} has no executable instructions", block.id);
    view
}

/// Position of `instr` within an executable view. This is the number of
/// executable instructions retired in the block when control reaches
/// `instr`, which is what the call-return preludes report to the runtime.
///
/// Panics if the instruction is not in the view (programmer error).
pub fn retire_index(view: &[InstrId], instr: InstrId) -> u64 {
    view.iter()
        .position(|&i| i == instr)
        .unwrap_or_else(|| panic!("instruction {} not in executable view", instr)) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{InstrKind, IrFunctionBuilder, Operand};

    #[test]
    fn view_skips_markers_and_keeps_terminator() {
        let mut b = IrFunctionBuilder::new("f", 0);
        let entry = b.create_block(Some("entry"));
        b.set_current_block(entry);
        let slot = b.fresh_value();
        b.push(InstrKind::DbgMarker);
        let alloca = b.push(InstrKind::Alloca { result: slot });
        b.push(InstrKind::LifetimeStart { addr: Operand::Value(slot) });
        let store = b.push(InstrKind::Store {
            addr: Operand::Value(slot),
            value: Operand::Imm(7),
        });
        b.push(InstrKind::LifetimeEnd { addr: Operand::Value(slot) });
        let ret = b.push(InstrKind::Ret { value: None });
        let func = b.build();

        let view = executable_instrs(func.entry_block());
        assert_eq!(view, vec![alloca, store, ret]);
        assert_eq!(retire_index(&view, store), 1);
        assert_eq!(retire_index(&view, ret), 2);
    }
}
