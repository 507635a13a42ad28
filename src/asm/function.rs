use std::collections::HashSet;

use strum::{Display, EnumString};

use crate::{
    common::{BitVector, BlockId, InstrId, SlotId, VReg},
    frame::{Frame, RegClass},
};

use super::{Instruction, Operand};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum VRegType {
    I32,
    I64,
    F32,
    F64,
    V128,
}

impl VRegType {
    pub fn class(self) -> RegClass {
        match self {
            VRegType::I32 | VRegType::I64 => RegClass::Integer,
            VRegType::F32 | VRegType::F64 | VRegType::V128 => RegClass::Float,
        }
    }

    /// Width in bits.
    pub fn bits(self) -> u32 {
        match self {
            VRegType::I32 | VRegType::F32 => 32,
            VRegType::I64 | VRegType::F64 => 64,
            VRegType::V128 => 128,
        }
    }
}

/// Where a virtual register's value can be recomputed from instead of reloaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Remat {
    Global(String),
    Frame(SlotId),
    Const(i64),
}

impl Remat {
    pub fn operand(&self) -> Operand {
        match self {
            Remat::Global(name) => Operand::Global(name.clone()),
            Remat::Frame(slot) => Operand::Frame(*slot),
            Remat::Const(val) => Operand::Imm(*val),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VRegInfo {
    pub ty: VRegType,
    /// Created by, or replaced by, spill code. Never cleared.
    pub spilled: bool,
    pub remat: Option<Remat>,
    /// Its definition was moved next to its only use instead of spilling.
    pub sunk: bool,
}

impl VRegInfo {
    pub fn new(ty: VRegType) -> Self {
        Self {
            ty,
            spilled: false,
            remat: None,
            sunk: false,
        }
    }

    pub fn with_remat(mut self, remat: Remat) -> Self {
        self.remat = Some(remat);
        self
    }

    pub fn class(&self) -> RegClass {
        self.ty.class()
    }

    pub fn size(&self) -> u32 {
        self.ty.bits()
    }

    /// Spill temporaries and sunk registers already live as briefly as they can.
    pub fn is_unspillable(&self) -> bool {
        self.spilled || self.sunk
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub id: BlockId,
    pub instrs: Vec<InstrId>,
    pub preds: Vec<BlockId>,
    pub succs: Vec<BlockId>,
    /// Execution-frequency estimate.
    pub weight: f64,
}

/// Machine function: blocks and instructions live in arenas, `layout` orders the blocks.
#[derive(Debug, Clone)]
pub struct Function {
    pub name: String,
    layout: Vec<BlockId>,
    blocks: Vec<Block>,
    instrs: Vec<Instruction>,
    vregs: Vec<VRegInfo>,
    pub frame: Frame,
    /// Physical registers written by this function, known once allocated.
    pub clobbered: Option<BitVector>,
}

impl Function {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            layout: Vec::new(),
            blocks: Vec::new(),
            instrs: Vec::new(),
            vregs: Vec::new(),
            frame: Frame::new(),
            clobbered: None,
        }
    }

    pub fn new_block(&mut self) -> BlockId {
        let id = BlockId::new(self.blocks.len());
        self.blocks.push(Block {
            id,
            instrs: Vec::new(),
            preds: Vec::new(),
            succs: Vec::new(),
            weight: 1.0,
        });
        self.layout.push(id);
        id
    }

    pub fn entry(&self) -> Option<BlockId> {
        self.layout.first().copied()
    }

    pub fn layout(&self) -> &[BlockId] {
        &self.layout
    }

    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }

    pub fn block(&self, id: BlockId) -> &Block {
        &self.blocks[id.index()]
    }

    pub fn block_mut(&mut self, id: BlockId) -> &mut Block {
        &mut self.blocks[id.index()]
    }

    /// Blocks in layout order.
    pub fn blocks(&self) -> impl Iterator<Item = &Block> + '_ {
        self.layout.iter().map(|&id| self.block(id))
    }

    pub fn add_edge(&mut self, from: BlockId, to: BlockId) {
        if !self.blocks[from.index()].succs.contains(&to) {
            self.blocks[from.index()].succs.push(to);
            self.blocks[to.index()].preds.push(from);
        }
    }

    pub fn new_vreg(&mut self, info: VRegInfo) -> VReg {
        let vreg = VReg::new(self.vregs.len());
        self.vregs.push(info);
        vreg
    }

    pub fn vreg(&self, vreg: VReg) -> &VRegInfo {
        &self.vregs[vreg.index()]
    }

    pub fn vreg_mut(&mut self, vreg: VReg) -> &mut VRegInfo {
        &mut self.vregs[vreg.index()]
    }

    pub fn num_vregs(&self) -> usize {
        self.vregs.len()
    }

    pub fn vregs(&self) -> impl Iterator<Item = (VReg, &VRegInfo)> + '_ {
        self.vregs
            .iter()
            .enumerate()
            .map(|(idx, info)| (VReg::new(idx), info))
    }

    pub fn instr(&self, id: InstrId) -> &Instruction {
        &self.instrs[id.index()]
    }

    pub fn instr_mut(&mut self, id: InstrId) -> &mut Instruction {
        &mut self.instrs[id.index()]
    }

    /// Instructions of `block` in order.
    pub fn instrs(&self, block: BlockId) -> impl Iterator<Item = (InstrId, &Instruction)> + '_ {
        self.block(block)
            .instrs
            .iter()
            .map(|&id| (id, self.instr(id)))
    }

    /// Every placed instruction, blocks in layout order.
    pub fn all_instrs(&self) -> impl Iterator<Item = (InstrId, &Instruction)> + '_ {
        self.layout.iter().flat_map(|&block| self.instrs(block))
    }

    pub fn push(&mut self, block: BlockId, instr: Instruction) -> InstrId {
        let pos = self.block(block).instrs.len();
        self.insert(block, pos, instr)
    }

    pub fn insert(&mut self, block: BlockId, pos: usize, mut instr: Instruction) -> InstrId {
        let id = InstrId::new(self.instrs.len());
        instr.block = block;
        self.instrs.push(instr);
        self.blocks[block.index()].instrs.insert(pos, id);
        id
    }

    pub fn position(&self, id: InstrId) -> usize {
        let block = self.instr(id).block;
        self.block(block)
            .instrs
            .iter()
            .position(|&other| other == id)
            .unwrap_or_else(|| panic!("{} is not placed in {}", id, block))
    }

    /// Unlinks `id` from its block. The arena entry stays but is unreachable.
    pub fn remove(&mut self, id: InstrId) {
        let pos = self.position(id);
        let block = self.instr(id).block;
        self.blocks[block.index()].instrs.remove(pos);
    }

    /// Moves `id` to position `pos` of `block` (position counted after unlinking).
    pub fn move_instr(&mut self, id: InstrId, block: BlockId, pos: usize) {
        self.remove(id);
        self.instrs[id.index()].block = block;
        self.blocks[block.index()].instrs.insert(pos, id);
    }

    /// Index of the first terminator in `block`, or its length.
    pub fn terminator_position(&self, block: BlockId) -> usize {
        self.instrs(block)
            .position(|(_, instr)| instr.opcode.is_terminator())
            .unwrap_or_else(|| self.block(block).instrs.len())
    }

    /// Reverse postorder from the entry; unreachable blocks follow in layout order.
    pub fn reverse_postorder(&self) -> Vec<BlockId> {
        let Some(entry) = self.entry() else {
            return Vec::new();
        };

        let mut visited = HashSet::new();
        let mut post_order = Vec::with_capacity(self.blocks.len());
        let mut stack = vec![(entry, 0)];
        visited.insert(entry);
        while let Some((block, next)) = stack.pop() {
            let succs = &self.block(block).succs;
            if let Some(&succ) = succs.get(next) {
                stack.push((block, next + 1));
                if visited.insert(succ) {
                    stack.push((succ, 0));
                }
            } else {
                post_order.push(block);
            }
        }

        let mut rpo: Vec<_> = post_order.into_iter().rev().collect();
        rpo.extend(self.layout.iter().filter(|&block| !visited.contains(block)));
        rpo
    }
}

#[derive(Debug, Clone, Default)]
pub struct Module {
    pub globals: Vec<String>,
    pub functions: Vec<Function>,
}

impl Module {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn function_index(&self, name: &str) -> Option<usize> {
        self.functions.iter().position(|func| func.name == name)
    }
}
