//! Merges spill slots whose live ranges never overlap.

use std::collections::BTreeMap;

use itertools::Itertools;
use log::trace;

use crate::{
    asm::{Function, Instruction, Operand, Remat},
    common::{BitVector, SlotId},
    frame::SlotKind,
};

use super::liveness::solve_backward;

/// Dense numbering of the spill slots of one function.
struct SlotIndex {
    slots: Vec<SlotId>,
    index: BTreeMap<SlotId, usize>,
}

impl SlotIndex {
    fn new(func: &Function) -> Self {
        let slots: Vec<_> = func
            .frame
            .slots()
            .filter(|slot| slot.kind == SlotKind::Spill)
            .map(|slot| slot.id)
            .collect();
        let index = slots.iter().enumerate().map(|(idx, &id)| (id, idx)).collect();
        Self { slots, index }
    }

    fn len(&self) -> usize {
        self.slots.len()
    }

    /// `(defs, uses)` of spill slots in `instr`. Only a store writes its slot.
    fn def_use(&self, instr: &Instruction) -> (Vec<usize>, Vec<usize>) {
        let mentioned = instr.operands.iter().filter_map(|op| match op {
            Operand::Frame(slot) => self.index.get(slot).copied(),
            _ => None,
        });
        if instr.opcode.is_spill() {
            (mentioned.collect(), Vec::new())
        } else {
            (Vec::new(), mentioned.collect())
        }
    }
}

/// Slot interference: `adj[a]` holds every slot live while `a` is written.
fn build(func: &Function, index: &SlotIndex) -> Vec<BitVector> {
    let width = index.len();
    let mut uses = vec![BitVector::new(width); func.num_blocks()];
    let mut defs = vec![BitVector::new(width); func.num_blocks()];
    for block in func.blocks() {
        let idx = block.id.index();
        for (_, instr) in func.instrs(block.id) {
            let (instr_defs, instr_uses) = index.def_use(instr);
            for slot in instr_uses {
                if !defs[idx].test(slot) {
                    uses[idx].set(slot);
                }
            }
            for slot in instr_defs {
                defs[idx].set(slot);
            }
        }
    }
    let (_, live_out) = solve_backward(func, &uses, &defs, width);

    let mut adj = vec![BitVector::new(width); width];
    for block in func.blocks() {
        let mut live = live_out[block.id.index()].clone();
        let instrs: Vec<_> = func.instrs(block.id).map(|(_, instr)| instr).collect();
        for instr in instrs.into_iter().rev() {
            let (instr_defs, instr_uses) = index.def_use(instr);
            for &def in &instr_defs {
                for other in live.iter().chain(instr_defs.iter().copied()) {
                    if other != def {
                        adj[def].set(other);
                        adj[other].set(def);
                    }
                }
            }
            for def in instr_defs {
                live.reset(def);
            }
            for slot in instr_uses {
                live.set(slot);
            }
        }
    }
    adj
}

/// Colors the spill-slot interference graph greedily, most-constrained slot
/// first, and folds every slot into the first slot of its color. The survivor
/// takes the largest size of its group. Returns the number of slots removed.
pub fn merge_spill_slots(func: &mut Function) -> usize {
    let index = SlotIndex::new(func);
    if index.len() < 2 {
        return 0;
    }
    let adj = build(func, &index);

    let order = (0..index.len())
        .sorted_by_key(|&slot| (std::cmp::Reverse(adj[slot].count()), slot))
        .collect_vec();
    let mut colors: Vec<Option<usize>> = vec![None; index.len()];
    for &slot in &order {
        let taken: Vec<_> = adj[slot].iter().filter_map(|other| colors[other]).collect();
        let color = (0..).find(|color| !taken.contains(color)).unwrap_or_default();
        colors[slot] = Some(color);
    }

    let mut representative: BTreeMap<usize, SlotId> = BTreeMap::new();
    let mut renames: BTreeMap<SlotId, SlotId> = BTreeMap::new();
    for (slot, color) in colors.into_iter().enumerate() {
        let Some(color) = color else {
            unreachable!("spill slot {} was left uncolored", index.slots[slot]);
        };
        let id = index.slots[slot];
        let rep = *representative.entry(color).or_insert(id);
        if rep != id {
            renames.insert(id, rep);
        }
    }
    if renames.is_empty() {
        return 0;
    }

    for (&from, &to) in &renames {
        let Some(merged) = func.frame.remove(from) else {
            unreachable!("spill slot {} vanished while merging", from);
        };
        if let Some(survivor) = func.frame.get_mut(to) {
            survivor.size = survivor.size.max(merged.size);
        }
        trace!("{}: merge {} into {}", func.name, from, to);
    }

    let placed: Vec<_> = func.all_instrs().map(|(id, _)| id).collect();
    for id in placed {
        for op in func.instr_mut(id).operands.iter_mut() {
            if let Operand::Frame(slot) = op {
                if let Some(&to) = renames.get(&*slot) {
                    *slot = to;
                }
            }
        }
    }
    let vregs: Vec<_> = func.vregs().map(|(vreg, _)| vreg).collect();
    for vreg in vregs {
        if let Some(Remat::Frame(slot)) = &mut func.vreg_mut(vreg).remat {
            if let Some(&to) = renames.get(&*slot) {
                *slot = to;
            }
        }
    }

    renames.len()
}
