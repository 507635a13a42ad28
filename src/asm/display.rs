use std::fmt::{self, Display, Formatter};

use itertools::Itertools;

use crate::frame::RegisterFile;

use super::{Function, Instruction, Module, Operand, Remat};

pub struct FunctionDisplay<'a> {
    func: &'a Function,
    regs: &'a RegisterFile,
}

pub struct ModuleDisplay<'a> {
    module: &'a Module,
    regs: &'a RegisterFile,
}

struct OperandDisplay<'a>(&'a Operand, &'a RegisterFile);

impl Display for OperandDisplay<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self.0 {
            Operand::Phys(reg) => write!(f, "{}", self.1.name(*reg)),
            Operand::Virt(vreg) => write!(f, "{}", vreg),
            Operand::Imm(val) => write!(f, "${}", val),
            Operand::Frame(slot) => write!(f, "{}", slot),
            Operand::Global(name) => write!(f, "&{}", name),
            Operand::Function(name) => write!(f, "@{}", name),
            Operand::Block(block) => write!(f, "{}", block),
        }
    }
}

fn write_instruction(
    f: &mut Formatter<'_>,
    instr: &Instruction,
    regs: &RegisterFile,
) -> fmt::Result {
    write!(f, "  ")?;
    if !instr.defs.is_empty() {
        let defs = instr.def_operands().map(|op| OperandDisplay(op, regs)).join(", ");
        write!(f, "{} = ", defs)?;
    }
    write!(f, "{}", instr.opcode)?;
    if !instr.uses.is_empty() {
        let uses = instr.use_operands().map(|op| OperandDisplay(op, regs)).join(", ");
        write!(f, " {}", uses)?;
    }
    if !instr.imp_defs.is_empty() {
        let names = instr.imp_defs.iter().map(|&reg| regs.name(reg)).join(", ");
        write!(f, " implicit-def({})", names)?;
    }
    if !instr.imp_uses.is_empty() {
        let names = instr.imp_uses.iter().map(|&reg| regs.name(reg)).join(", ");
        write!(f, " implicit-use({})", names)?;
    }
    writeln!(f)
}

impl Display for FunctionDisplay<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let (func, regs) = (self.func, self.regs);
        writeln!(f, "function {}", func.name)?;

        for (vreg, info) in func.vregs() {
            write!(f, "  vreg {} {}", vreg, info.ty)?;
            match &info.remat {
                Some(Remat::Const(val)) => write!(f, " remat=${}", val)?,
                Some(Remat::Global(name)) => write!(f, " remat=&{}", name)?,
                Some(Remat::Frame(slot)) => write!(f, " remat={}", slot)?,
                None => {}
            }
            if info.spilled {
                write!(f, " spilled")?;
            }
            if info.sunk {
                write!(f, " sunk")?;
            }
            writeln!(f)?;
        }
        for slot in func.frame.slots() {
            writeln!(f, "  slot {} {} {}", slot.id, slot.size, slot.kind)?;
        }
        if let Some(clobbered) = &func.clobbered {
            let names = clobbered
                .iter()
                .map(|idx| regs.name(crate::frame::PhysReg::new(idx)))
                .join(", ");
            writeln!(f, "  clobbers {}", names)?;
        }

        for block in func.blocks() {
            write!(f, "{}: weight={}", block.id, block.weight)?;
            if !block.succs.is_empty() {
                write!(f, " succ={}", block.succs.iter().join(","))?;
            }
            writeln!(f)?;
            for (_, instr) in func.instrs(block.id) {
                write_instruction(f, instr, regs)?;
            }
        }
        writeln!(f, "end")
    }
}

impl Display for ModuleDisplay<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        for global in &self.module.globals {
            writeln!(f, "global {}", global)?;
        }
        for (idx, func) in self.module.functions.iter().enumerate() {
            if idx > 0 || !self.module.globals.is_empty() {
                writeln!(f)?;
            }
            write!(f, "{}", func.display(self.regs))?;
        }
        Ok(())
    }
}

impl Function {
    pub fn display<'a>(&'a self, regs: &'a RegisterFile) -> FunctionDisplay<'a> {
        FunctionDisplay { func: self, regs }
    }
}

impl Module {
    pub fn display<'a>(&'a self, regs: &'a RegisterFile) -> ModuleDisplay<'a> {
        ModuleDisplay { module: self, regs }
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        asm::{Opcode, VRegInfo, VRegType},
        frame::x86_64,
    };

    use super::*;

    #[test]
    fn test_display_function() {
        let regs = x86_64::registers();
        let rax = regs.find("rax").unwrap();
        let rflags = regs.find("rflags").unwrap();

        let mut func = Function::new("main");
        let bb0 = func.new_block();
        let bb1 = func.new_block();
        func.add_edge(bb0, bb1);
        let v0 = func.new_vreg(VRegInfo::new(VRegType::I64).with_remat(Remat::Const(7)));
        func.push(
            bb0,
            Instruction::new(Opcode::Mov, vec![Operand::Virt(v0)], vec![Operand::Imm(7)]),
        );
        func.push(
            bb0,
            Instruction::new(Opcode::Cmp, vec![], vec![Operand::Virt(v0), Operand::Imm(1)])
                .with_imp_defs([rflags]),
        );
        func.push(bb0, Instruction::new(Opcode::Jmp, vec![], vec![Operand::Block(bb1)]));
        func.push(
            bb1,
            Instruction::new(Opcode::Mov, vec![Operand::Phys(rax)], vec![Operand::Virt(v0)]),
        );
        func.push(bb1, Instruction::new(Opcode::Ret, vec![], vec![]).with_imp_uses([rax]));

        let expected = "\
function main
  vreg %0 i64 remat=$7
bb0: weight=1 succ=bb1
  %0 = mov $7
  cmp %0, $1 implicit-def(rflags)
  jmp bb1
bb1: weight=1
  rax = mov %0
  ret implicit-use(rax)
end
";
        assert_eq!(func.display(regs).to_string(), expected);
    }
}
