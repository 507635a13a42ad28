use std::collections::HashMap;

use log::{debug, info};
use strum::IntoEnumIterator;

use crate::{
    asm::{Function, Module, Opcode},
    common::BitVector,
    config::AllocatorConfig,
    frame::{PhysReg, RegClass, RegisterFile},
};

use super::{
    color,
    frame_color::merge_spill_slots,
    liveness::Liveness,
    rewrite::{apply_colors, rewrite_spills},
    verify,
};

/// Allocation of one register class of one function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassReport {
    pub class: RegClass,
    /// Coloring rounds, including the final successful one.
    pub iterations: usize,
    /// Rounds that ended in a rewrite.
    pub rewrites: usize,
    pub spilled: usize,
    pub sunk: usize,
    pub rematerialized: usize,
    /// Moves coalesced by the final round.
    pub coalesced_moves: usize,
    pub removed_copies: usize,
}

impl ClassReport {
    fn new(class: RegClass) -> Self {
        Self {
            class,
            iterations: 0,
            rewrites: 0,
            spilled: 0,
            sunk: 0,
            rematerialized: 0,
            coalesced_moves: 0,
            removed_copies: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionReport {
    pub name: String,
    pub classes: Vec<ClassReport>,
    pub merged_slots: usize,
    pub clobbered: Vec<PhysReg>,
}

impl FunctionReport {
    pub fn class(&self, class: RegClass) -> Option<&ClassReport> {
        self.classes.iter().find(|report| report.class == class)
    }
}

/// Per-function reports in allocation order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Report {
    pub functions: Vec<FunctionReport>,
}

impl Report {
    pub fn function(&self, name: &str) -> Option<&FunctionReport> {
        self.functions.iter().find(|report| report.name == name)
    }
}

pub struct Allocator<'a> {
    regs: &'a RegisterFile,
    config: AllocatorConfig,
}

impl<'a> Allocator<'a> {
    pub fn new(regs: &'a RegisterFile, config: AllocatorConfig) -> Self {
        Self { regs, config }
    }

    /// Allocates every function, callees before callers.
    pub fn allocate_module(&self, module: &mut Module) -> Report {
        let names: HashMap<String, usize> = module
            .functions
            .iter()
            .enumerate()
            .map(|(idx, func)| (func.name.clone(), idx))
            .collect();
        let callees: Vec<_> = module
            .functions
            .iter()
            .map(|func| call_graph_row(func, &names))
            .collect();

        let mut clobbers: Vec<Option<BitVector>> = vec![None; module.functions.len()];
        let mut report = Report::default();
        for idx in call_graph_order(&callees) {
            let func = &mut module.functions[idx];
            self.refresh_call_clobbers(func, |callee| {
                names.get(callee).and_then(|&idx| clobbers[idx].as_ref())
            });
            report.functions.push(self.allocate(func));
            clobbers[idx] = func.clobbered.clone();
        }
        report
    }

    /// Allocates a function on its own. Every call clobbers all caller-saved registers.
    pub fn allocate_function(&self, func: &mut Function) -> FunctionReport {
        self.refresh_call_clobbers(func, |_| None);
        self.allocate(func)
    }

    /// Rewrites the caller-saved part of every call's implicit defs to what the
    /// callee is known to clobber.
    fn refresh_call_clobbers<'b>(
        &self,
        func: &mut Function,
        known: impl Fn(&str) -> Option<&'b BitVector>,
    ) {
        let caller_saved = self.regs.caller_saved();
        let calls: Vec<_> = func
            .all_instrs()
            .filter(|(_, instr)| instr.opcode == Opcode::Call)
            .map(|(id, instr)| {
                let clobbered = match instr.callee().and_then(&known) {
                    Some(clobbered) => clobbered.and(&caller_saved),
                    None => caller_saved.clone(),
                };
                (id, clobbered)
            })
            .collect();

        for (id, clobbered) in calls {
            let instr = func.instr_mut(id);
            instr
                .imp_defs
                .retain(|reg| !caller_saved.test(reg.index()));
            instr.imp_defs.extend(clobbered.iter().map(PhysReg::new));
        }
    }

    fn allocate(&self, func: &mut Function) -> FunctionReport {
        let classes: Vec<_> = RegClass::iter()
            .map(|class| self.allocate_class(func, class))
            .collect();

        let mut clobbered = BitVector::new(self.regs.len());
        for (_, instr) in func.all_instrs() {
            for reg in instr.def_regs().filter_map(|reg| reg.as_phys()) {
                clobbered.set(reg.index());
            }
        }
        func.clobbered = Some(clobbered.clone());

        let merged_slots = if self.config.merges_spilled_frames() {
            merge_spill_slots(func)
        } else {
            0
        };

        debug_assert!(
            verify::check_allocated(func).is_empty(),
            "{} still holds virtual registers after allocation",
            func.name
        );

        for report in &classes {
            info!(
                "{}: {} class in {} iteration(s), {} spilled, {} sunk, {} rematerialized, {} moves coalesced",
                func.name,
                report.class,
                report.iterations,
                report.spilled,
                report.sunk,
                report.rematerialized,
                report.coalesced_moves
            );
        }
        if merged_slots > 0 {
            info!("{}: merged {} spill slot(s)", func.name, merged_slots);
        }

        FunctionReport {
            name: func.name.clone(),
            classes,
            merged_slots,
            clobbered: clobbered.iter().map(PhysReg::new).collect(),
        }
    }

    /// Colors `class` until no spill is left, rewriting between rounds.
    fn allocate_class(&self, func: &mut Function, class: RegClass) -> ClassReport {
        let mut report = ClassReport::new(class);
        loop {
            report.iterations += 1;
            let liveness = Liveness::analyze(func, self.regs, class);
            let coloring = color::color(func, self.regs, &self.config, &liveness);
            report.coalesced_moves = coloring.coalesced_moves;

            if coloring.spilled.is_empty() {
                report.removed_copies = apply_colors(func, class, &coloring);
                return report;
            }

            for &vreg in &coloring.spilled {
                assert!(
                    !func.vreg(vreg).is_unspillable(),
                    "{}: unspillable {} ran out of colors",
                    func.name,
                    vreg
                );
            }
            debug!(
                "{}: {} round {} spills {:?}",
                func.name, class, report.iterations, coloring.spilled
            );
            let stats = rewrite_spills(func, &coloring.spilled, &self.config);
            assert!(stats.total() > 0, "{}: rewrite made no progress", func.name);
            report.rewrites += 1;
            report.spilled += stats.spilled;
            report.sunk += stats.sunk;
            report.rematerialized += stats.rematerialized;
        }
    }
}

/// Module-internal callees of `func`.
fn call_graph_row(func: &Function, names: &HashMap<String, usize>) -> BitVector {
    BitVector::from_indices(
        names.len(),
        func.all_instrs()
            .filter_map(|(_, instr)| instr.callee())
            .filter_map(|callee| names.get(callee).copied()),
    )
}

/// Bottom-up order: a function comes after every function it calls. When only
/// cycles remain, the first remaining function in module order goes next.
fn call_graph_order(callees: &[BitVector]) -> Vec<usize> {
    let len = callees.len();
    let mut done = BitVector::new(len);
    let mut order = Vec::with_capacity(len);
    while order.len() < len {
        let before = order.len();
        for idx in 0..len {
            if done.test(idx) {
                continue;
            }
            let mut pending = callees[idx].without(&done);
            pending.reset(idx);
            if pending.all_zero() {
                done.set(idx);
                order.push(idx);
            }
        }
        if order.len() == before {
            if let Some(idx) = (0..len).find(|&idx| !done.test(idx)) {
                done.set(idx);
                order.push(idx);
            }
        }
    }
    order
}
