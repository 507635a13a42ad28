use std::collections::VecDeque;

use crate::{
    asm::{Function, Reg},
    common::{BitVector, BlockId, VReg},
    frame::{PhysReg, RegClass, RegisterFile},
};

/// Dense numbering of the registers of one class.
///
/// Physical registers keep their register-file index, virtual registers follow
/// at `num_phys + vreg`. Indices of the wrong class are never relevant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegIndex {
    class: RegClass,
    num_phys: usize,
    phys: BitVector,
    virt: BitVector,
}

impl RegIndex {
    pub fn new(func: &Function, regs: &RegisterFile, class: RegClass) -> Self {
        let phys = BitVector::from_indices(
            regs.len(),
            regs.iter()
                .filter(|(_, info)| info.class == class && info.allocatable)
                .map(|(reg, _)| reg.index()),
        );
        let virt = BitVector::from_indices(
            func.num_vregs(),
            func.vregs()
                .filter(|(_, info)| info.class() == class)
                .map(|(vreg, _)| vreg.index()),
        );
        Self {
            class,
            num_phys: regs.len(),
            phys,
            virt,
        }
    }

    pub fn class(&self) -> RegClass {
        self.class
    }

    pub fn len(&self) -> usize {
        self.num_phys + self.virt.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn num_phys(&self) -> usize {
        self.num_phys
    }

    /// Whether `reg` takes part in allocation of this class.
    pub fn is_relevant(&self, reg: Reg) -> bool {
        match reg {
            Reg::Phys(reg) => self.phys.test(reg.index()),
            Reg::Virt(vreg) => vreg.index() < self.virt.len() && self.virt.test(vreg.index()),
        }
    }

    pub fn index(&self, reg: Reg) -> Option<usize> {
        if !self.is_relevant(reg) {
            return None;
        }
        Some(match reg {
            Reg::Phys(reg) => reg.index(),
            Reg::Virt(vreg) => self.num_phys + vreg.index(),
        })
    }

    pub fn reg(&self, index: usize) -> Reg {
        if index < self.num_phys {
            Reg::Phys(PhysReg::new(index))
        } else {
            Reg::Virt(VReg::new(index - self.num_phys))
        }
    }

    pub fn is_precolored(&self, index: usize) -> bool {
        index < self.num_phys
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockLiveness {
    pub live_in: BitVector,
    pub live_out: BitVector,
    /// Read before written in the block.
    pub uses: BitVector,
    pub defs: BitVector,
}

/// Per-block liveness of one register class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Liveness {
    index: RegIndex,
    blocks: Vec<BlockLiveness>,
}

impl Liveness {
    pub fn analyze(func: &Function, regs: &RegisterFile, class: RegClass) -> Self {
        let index = RegIndex::new(func, regs, class);
        let width = index.len();

        let mut uses = vec![BitVector::new(width); func.num_blocks()];
        let mut defs = vec![BitVector::new(width); func.num_blocks()];
        for block in func.blocks() {
            let (block_uses, block_defs) =
                (&mut uses[block.id.index()], &mut defs[block.id.index()]);
            for (_, instr) in func.instrs(block.id) {
                for idx in instr.use_regs().filter_map(|reg| index.index(reg)) {
                    if !block_defs.test(idx) {
                        block_uses.set(idx);
                    }
                }
                for idx in instr.def_regs().filter_map(|reg| index.index(reg)) {
                    block_defs.set(idx);
                }
            }
        }

        let (live_in, live_out) = solve_backward(func, &uses, &defs, width);
        let blocks = live_in
            .into_iter()
            .zip(live_out)
            .zip(uses.into_iter().zip(defs))
            .map(|((live_in, live_out), (uses, defs))| BlockLiveness {
                live_in,
                live_out,
                uses,
                defs,
            })
            .collect();

        Self { index, blocks }
    }

    pub fn index(&self) -> &RegIndex {
        &self.index
    }

    pub fn block(&self, block: BlockId) -> &BlockLiveness {
        &self.blocks[block.index()]
    }

    pub fn live_out(&self, block: BlockId) -> &BitVector {
        &self.block(block).live_out
    }

    pub fn live_in(&self, block: BlockId) -> &BitVector {
        &self.block(block).live_in
    }
}

/// Solves `out[b] = U in[s]`, `in[b] = (out[b] - def[b]) U use[b]` with a
/// worklist seeded in reverse postorder. A predecessor is requeued only when
/// the `in` set of one of its successors changed.
///
/// Returns `(live_in, live_out)` indexed by block.
pub(super) fn solve_backward(
    func: &Function,
    uses: &[BitVector],
    defs: &[BitVector],
    width: usize,
) -> (Vec<BitVector>, Vec<BitVector>) {
    let num_blocks = func.num_blocks();
    let mut live_in = vec![BitVector::new(width); num_blocks];
    let mut live_out = vec![BitVector::new(width); num_blocks];

    let mut queued = BitVector::new(num_blocks);
    let mut worklist: VecDeque<_> = func.reverse_postorder().into_iter().collect();
    for block in &worklist {
        queued.set(block.index());
    }

    while let Some(block) = worklist.pop_front() {
        queued.reset(block.index());
        let idx = block.index();

        let mut out = BitVector::new(width);
        for succ in &func.block(block).succs {
            out.union(&live_in[succ.index()]);
        }
        let mut new_in = out.without(&defs[idx]);
        new_in.union(&uses[idx]);
        live_out[idx] = out;

        if new_in != live_in[idx] {
            live_in[idx] = new_in;
            for pred in &func.block(block).preds {
                if queued.set(pred.index()) {
                    worklist.push_back(*pred);
                }
            }
        }
    }

    (live_in, live_out)
}
