use log::{debug, trace};

use crate::{
    asm::{Function, Instruction, Opcode, Operand, Reg, VRegInfo},
    common::{InstrId, SlotId, VReg},
    config::AllocatorConfig,
    frame::RegClass,
};

use super::{color::Coloring, dominator::DominatorTree};

/// What one rewrite pass did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RewriteStats {
    pub spilled: usize,
    pub sunk: usize,
    pub rematerialized: usize,
}

impl RewriteStats {
    pub fn total(&self) -> usize {
        self.spilled + self.sunk + self.rematerialized
    }
}

/// Rewrites every actual spill of a coloring round: sink the definition when
/// allowed, else recompute the value at each use, else go through a fresh
/// stack slot.
pub fn rewrite_spills(
    func: &mut Function,
    spilled: &[VReg],
    config: &AllocatorConfig,
) -> RewriteStats {
    let dom = DominatorTree::compute(func);
    let mut stats = RewriteStats::default();
    for &vreg in spilled {
        let (defs, uses) = occurrences(func, vreg);
        let info = func.vreg(vreg);

        if config.sinks()
            && !info.sunk
            && defs.len() + uses.len() >= config.min_sink_spill_count()
            && sink(func, &dom, vreg, &defs, &uses)
        {
            debug!("{}: sunk {}", func.name, vreg);
            func.vreg_mut(vreg).sunk = true;
            stats.sunk += 1;
        } else if can_rematerialize(func, vreg, &defs, &uses) {
            debug!("{}: rematerialized {}", func.name, vreg);
            rematerialize(func, vreg, defs[0], &uses);
            stats.rematerialized += 1;
        } else {
            debug!("{}: spilled {}", func.name, vreg);
            spill(func, vreg);
            stats.spilled += 1;
        }
    }
    stats
}

/// Placed instructions defining and reading `vreg`, in layout order.
fn occurrences(func: &Function, vreg: VReg) -> (Vec<InstrId>, Vec<InstrId>) {
    let reg = Reg::Virt(vreg);
    let mut defs = Vec::new();
    let mut uses = Vec::new();
    for (id, instr) in func.all_instrs() {
        if instr.defines(reg) {
            defs.push(id);
        }
        if instr.reads(reg) {
            uses.push(id);
        }
    }
    (defs, uses)
}

fn can_rematerialize(func: &Function, vreg: VReg, defs: &[InstrId], uses: &[InstrId]) -> bool {
    if func.vreg(vreg).remat.is_none() || defs.len() != 1 || uses.contains(&defs[0]) {
        return false;
    }
    let def = func.instr(defs[0]);
    def.defs.len() == 1 && def.imp_defs.is_empty()
}

fn rematerialize(func: &mut Function, vreg: VReg, def: InstrId, uses: &[InstrId]) {
    let Some(remat) = func.vreg(vreg).remat.clone() else {
        unreachable!("{} has no rematerialization source", vreg);
    };
    let source = remat.operand();
    for &id in uses {
        func.instr_mut(id).replace_reg(Reg::Virt(vreg), &source);
    }
    func.remove(def);
    func.vreg_mut(vreg).spilled = true;
}

/// Gives every instruction mentioning `vreg` its own short-lived temporary,
/// reloaded before a read and stored after a write.
fn spill(func: &mut Function, vreg: VReg) {
    let reg = Reg::Virt(vreg);
    let info = func.vreg(vreg).clone();
    let class = info.class();
    let slot = func.frame.alloc_spill(info.size());

    let mentions: Vec<_> = func
        .all_instrs()
        .filter(|(_, instr)| instr.mentions(reg))
        .map(|(id, _)| id)
        .collect();
    for id in mentions {
        let (reads, writes) = {
            let instr = func.instr(id);
            (instr.reads(reg), instr.defines(reg))
        };
        let temp = func.new_vreg(VRegInfo {
            spilled: true,
            remat: None,
            sunk: false,
            ..info.clone()
        });
        func.instr_mut(id).replace_reg(reg, &Operand::Virt(temp));

        let block = func.instr(id).block;
        if reads {
            let pos = func.position(id);
            func.insert(block, pos, reload(class, temp, slot));
        }
        if writes {
            let pos = func.position(id);
            func.insert(block, pos + 1, store(class, temp, slot));
        }
        trace!("{}: {} -> {} around {}", func.name, vreg, temp, id);
    }
    func.vreg_mut(vreg).spilled = true;
}

fn reload(class: RegClass, temp: VReg, slot: SlotId) -> Instruction {
    Instruction::new(
        Opcode::reload(class),
        vec![Operand::Virt(temp)],
        vec![Operand::Frame(slot)],
    )
}

fn store(class: RegClass, temp: VReg, slot: SlotId) -> Instruction {
    Instruction::new(
        Opcode::spill(class),
        vec![],
        vec![Operand::Frame(slot), Operand::Virt(temp)],
    )
}

/// Moves the single definition of `vreg` right before the one instruction
/// reading it instead of spilling. Afterwards `vreg` lives as briefly as a
/// reload temporary and is never chosen for spilling again.
///
/// Same block: the definition must come before the use and not already sit
/// right before it. Across blocks: the definition's block must dominate the
/// nearest common dominator of the uses, and the definition is placed before
/// the first use there (or before its terminator). Nothing on the path between
/// the old and new positions is checked.
fn sink(
    func: &mut Function,
    dom: &DominatorTree,
    vreg: VReg,
    defs: &[InstrId],
    uses: &[InstrId],
) -> bool {
    let [def] = defs else {
        return false;
    };
    let def = *def;
    if uses.len() != 1 || !is_sinkable(func, func.instr(def), vreg) {
        return false;
    }

    let def_block = func.instr(def).block;
    let def_pos = func.position(def);

    if uses.iter().all(|&id| func.instr(id).block == def_block) {
        let Some(first_use) = uses.iter().map(|&id| func.position(id)).min() else {
            return false;
        };
        if def_pos + 1 >= first_use {
            return false;
        }
        // Unlinking the definition shifts the first use down by one.
        func.move_instr(def, def_block, first_use - 1);
        trace!("{}: sink {} within {}", func.name, vreg, def_block);
        return true;
    }

    let Some(target) = dom.nearest_common_dominator_of(func, uses.iter().copied()) else {
        return false;
    };
    if target == def_block || !dom.dominates(def_block, target) {
        return false;
    }
    let pos = func
        .instrs(target)
        .position(|(id, _)| uses.contains(&id))
        .unwrap_or_else(|| func.terminator_position(target));
    func.move_instr(def, target, pos);
    trace!("{}: sink {} from {} to {}", func.name, vreg, def_block, target);
    true
}

/// Spill temporaries and sunk registers must stay next to their single
/// definition, so a definition reading one stays put.
fn is_sinkable(func: &Function, instr: &Instruction, vreg: VReg) -> bool {
    let opcode = instr.opcode;
    instr.defs.len() == 1
        && instr.defines(Reg::Virt(vreg))
        && !instr.reads(Reg::Virt(vreg))
        && !instr.has_phys_operand()
        && instr
            .use_regs()
            .filter_map(Reg::as_virt)
            .all(|used| !func.vreg(used).is_unspillable())
        && !opcode.is_terminator()
        && !opcode.is_reload()
        && !opcode.is_spill()
        && opcode != Opcode::Call
}

/// Replaces the virtual registers of `class` with their colors and drops the
/// copies that became `x := x`. Returns the number of copies removed.
pub fn apply_colors(func: &mut Function, class: RegClass, coloring: &Coloring) -> usize {
    let placed: Vec<_> = func.all_instrs().map(|(id, _)| id).collect();
    let mut redundant = Vec::new();
    for id in placed {
        let targets: Vec<_> = func
            .instr(id)
            .operands
            .iter()
            .filter_map(|op| match op {
                Operand::Virt(vreg) if func.vreg(*vreg).class() == class => Some(*vreg),
                _ => None,
            })
            .collect();
        for vreg in targets {
            let color = coloring.color(vreg).unwrap_or_else(|| {
                panic!("{} of {} has no color after coloring converged", vreg, func.name)
            });
            func.instr_mut(id).replace_reg(Reg::Virt(vreg), &Operand::Phys(color));
        }

        if let Some((Reg::Phys(dst), Reg::Phys(src))) = func.instr(id).copy_regs() {
            if dst == src {
                redundant.push(id);
            }
        }
    }

    for &id in &redundant {
        func.remove(id);
    }
    redundant.len()
}
