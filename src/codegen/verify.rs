use crate::{
    asm::{Function, Operand},
    common::InstrId,
};

/// Placed instructions that still mention a virtual register.
pub fn check_allocated(func: &Function) -> Vec<InstrId> {
    func.all_instrs()
        .filter(|(_, instr)| instr.operands.iter().any(|op| matches!(op, Operand::Virt(_))))
        .map(|(id, _)| id)
        .collect()
}
