mod display;
mod function;
pub mod reader;

use strum::{Display, EnumIter, EnumString};

use crate::{
    common::{BlockId, SlotId, VReg},
    frame::{PhysReg, RegClass},
};

pub use display::{FunctionDisplay, ModuleDisplay};
pub use function::{Block, Function, Module, Remat, VRegInfo, VRegType};

/// Register-like operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Reg {
    Phys(PhysReg),
    Virt(VReg),
}

impl Reg {
    pub fn as_virt(self) -> Option<VReg> {
        match self {
            Reg::Virt(vreg) => Some(vreg),
            Reg::Phys(_) => None,
        }
    }

    pub fn as_phys(self) -> Option<PhysReg> {
        match self {
            Reg::Phys(reg) => Some(reg),
            Reg::Virt(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Operand {
    Phys(PhysReg),
    Virt(VReg),
    Imm(i64),
    Frame(SlotId),
    Global(String),
    Function(String),
    Block(BlockId),
}

impl Operand {
    pub fn reg(&self) -> Option<Reg> {
        match self {
            Operand::Phys(reg) => Some(Reg::Phys(*reg)),
            Operand::Virt(vreg) => Some(Reg::Virt(*vreg)),
            _ => None,
        }
    }
}

impl From<Reg> for Operand {
    fn from(reg: Reg) -> Self {
        match reg {
            Reg::Phys(reg) => Operand::Phys(reg),
            Reg::Virt(vreg) => Operand::Virt(vreg),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, EnumIter)]
#[strum(serialize_all = "lowercase")]
pub enum Opcode {
    Mov,
    FMov,
    Lea,
    Load,
    Store,
    FLoad,
    FStore,
    Add,
    Sub,
    Mul,
    Div,
    And,
    Or,
    Xor,
    Shl,
    Shr,
    Neg,
    FAdd,
    FSub,
    FMul,
    FDiv,
    IToF,
    FToI,
    Cmp,
    FCmp,
    Jmp,
    Br,
    Call,
    Ret,
}

impl Opcode {
    pub fn is_terminator(self) -> bool {
        matches!(self, Opcode::Jmp | Opcode::Br | Opcode::Ret)
    }

    pub fn is_copy(self) -> bool {
        matches!(self, Opcode::Mov | Opcode::FMov)
    }

    /// Reads a frame slot into its def.
    pub fn is_reload(self) -> bool {
        matches!(self, Opcode::Load | Opcode::FLoad)
    }

    /// Writes its last use into a frame slot.
    pub fn is_spill(self) -> bool {
        matches!(self, Opcode::Store | Opcode::FStore)
    }

    pub fn reload(class: RegClass) -> Self {
        match class {
            RegClass::Integer => Opcode::Load,
            RegClass::Float => Opcode::FLoad,
        }
    }

    pub fn spill(class: RegClass) -> Self {
        match class {
            RegClass::Integer => Opcode::Store,
            RegClass::Float => Opcode::FStore,
        }
    }
}

/// Machine instruction.
///
/// `defs` and `uses` index into `operands`. Implicit operands are always
/// physical registers.
#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    pub opcode: Opcode,
    pub operands: Vec<Operand>,
    pub defs: Vec<usize>,
    pub uses: Vec<usize>,
    pub imp_defs: Vec<PhysReg>,
    pub imp_uses: Vec<PhysReg>,
    /// Owning block, maintained by [`Function`].
    pub block: BlockId,
}

impl Instruction {
    pub fn new(opcode: Opcode, defs: Vec<Operand>, uses: Vec<Operand>) -> Self {
        let def_len = defs.len();
        let use_len = uses.len();
        let mut operands = defs;
        operands.extend(uses);
        Self {
            opcode,
            operands,
            defs: (0..def_len).collect(),
            uses: (def_len..def_len + use_len).collect(),
            imp_defs: Vec::new(),
            imp_uses: Vec::new(),
            block: BlockId::new(0),
        }
    }

    pub fn with_imp_defs(mut self, regs: impl IntoIterator<Item = PhysReg>) -> Self {
        self.imp_defs.extend(regs);
        self
    }

    pub fn with_imp_uses(mut self, regs: impl IntoIterator<Item = PhysReg>) -> Self {
        self.imp_uses.extend(regs);
        self
    }

    pub fn def_operands(&self) -> impl Iterator<Item = &Operand> + '_ {
        self.defs.iter().map(|&idx| &self.operands[idx])
    }

    pub fn use_operands(&self) -> impl Iterator<Item = &Operand> + '_ {
        self.uses.iter().map(|&idx| &self.operands[idx])
    }

    /// Explicit and implicit register defs.
    pub fn def_regs(&self) -> impl Iterator<Item = Reg> + '_ {
        self.def_operands()
            .filter_map(Operand::reg)
            .chain(self.imp_defs.iter().map(|&reg| Reg::Phys(reg)))
    }

    /// Explicit and implicit register uses.
    pub fn use_regs(&self) -> impl Iterator<Item = Reg> + '_ {
        self.use_operands()
            .filter_map(Operand::reg)
            .chain(self.imp_uses.iter().map(|&reg| Reg::Phys(reg)))
    }

    pub fn defines(&self, reg: Reg) -> bool {
        self.def_regs().any(|def| def == reg)
    }

    pub fn reads(&self, reg: Reg) -> bool {
        self.use_regs().any(|used| used == reg)
    }

    pub fn mentions(&self, reg: Reg) -> bool {
        self.operands.iter().any(|op| op.reg() == Some(reg))
    }

    /// `(dst, src)` when this is a register-to-register copy.
    pub fn copy_regs(&self) -> Option<(Reg, Reg)> {
        if !self.opcode.is_copy()
            || self.defs.len() != 1
            || self.uses.len() != 1
            || !self.imp_defs.is_empty()
        {
            return None;
        }
        let dst = self.operands[self.defs[0]].reg()?;
        let src = self.operands[self.uses[0]].reg()?;
        Some((dst, src))
    }

    /// Replaces every explicit occurrence of `from`. Returns the number replaced.
    pub fn replace_reg(&mut self, from: Reg, to: &Operand) -> usize {
        let mut count = 0;
        for op in self.operands.iter_mut() {
            if op.reg() == Some(from) {
                *op = to.clone();
                count += 1;
            }
        }
        count
    }

    /// Name of the called function for `call @f`.
    pub fn callee(&self) -> Option<&str> {
        if self.opcode != Opcode::Call {
            return None;
        }
        self.use_operands().find_map(|op| match op {
            Operand::Function(name) => Some(name.as_str()),
            _ => None,
        })
    }

    pub fn has_phys_operand(&self) -> bool {
        self.operands
            .iter()
            .any(|op| matches!(op, Operand::Phys(_)))
            || !self.imp_defs.is_empty()
            || !self.imp_uses.is_empty()
    }
}
