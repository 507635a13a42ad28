//! Iterated register coalescing (George & Appel) over one register class.
//!
//! One call to [`color`] is one round: build the graph from liveness, run the
//! simplify / coalesce / freeze / spill worklists to exhaustion, then assign
//! colors from the select stack. Nothing is kept between rounds.

use log::trace;

use crate::{
    asm::{Function, Remat},
    common::{BitVector, NodeId, VReg},
    config::AllocatorConfig,
    frame::{PhysReg, RegisterFile},
};

use super::{
    graph::{InterferenceGraph, MoveTag, WorklistTag},
    liveness::{Liveness, RegIndex},
};

/// Outcome of one coloring round.
#[derive(Debug, Clone, PartialEq)]
pub struct Coloring {
    /// Color of every virtual register of the class that got one.
    pub colors: Vec<Option<PhysReg>>,
    /// Actual spills, ascending.
    pub spilled: Vec<VReg>,
    pub coalesced_moves: usize,
}

impl Coloring {
    pub fn color(&self, vreg: VReg) -> Option<PhysReg> {
        self.colors.get(vreg.index()).copied().flatten()
    }
}

pub fn color(
    func: &Function,
    regs: &RegisterFile,
    config: &AllocatorConfig,
    liveness: &Liveness,
) -> Coloring {
    let index = liveness.index();
    let colors = regs.allocatable(index.class(), config.caller_saved_first());
    let mut color = Color {
        func,
        config,
        index,
        k: colors.len(),
        colors,
        num_regs: regs.len(),
        graph: InterferenceGraph::new(index.len()),
    };

    color.build(liveness);
    color.make_worklist();
    loop {
        if let Some(n) = color.graph.first(WorklistTag::Simplify) {
            color.simplify(n);
        } else if !color.graph.move_worklist(MoveTag::Worklist).is_empty() {
            color.coalesce();
        } else if let Some(n) = color.graph.first(WorklistTag::Freeze) {
            color.freeze(n);
        } else if !color.graph.worklist(WorklistTag::Spill).is_empty() {
            color.select_spill();
        } else {
            break;
        }
    }
    color.assign_colors();
    color.finish()
}

struct Color<'a> {
    func: &'a Function,
    config: &'a AllocatorConfig,
    index: &'a RegIndex,
    /// Allocatable registers in preference order.
    colors: Vec<PhysReg>,
    k: usize,
    num_regs: usize,
    graph: InterferenceGraph,
}

impl Color<'_> {
    fn insert_node(&mut self, idx: usize) -> NodeId {
        let n = NodeId::new(idx);
        let reg = self.index.reg(idx);
        self.graph.insert(n, reg, reg.as_phys());
        n
    }

    fn build(&mut self, liveness: &Liveness) {
        let func = self.func;
        for reg in self.colors.clone() {
            self.insert_node(reg.index());
        }
        for (_, instr) in func.all_instrs() {
            for reg in instr.def_regs().chain(instr.use_regs()) {
                if let Some(idx) = self.index.index(reg) {
                    self.insert_node(idx);
                }
            }
        }

        for block in func.blocks() {
            let mut live = liveness.live_out(block.id).clone();
            for &id in block.instrs.iter().rev() {
                let instr = func.instr(id);
                let uses: Vec<_> = instr
                    .use_regs()
                    .filter_map(|reg| self.index.index(reg))
                    .collect();
                let defs: Vec<_> = instr
                    .def_regs()
                    .filter_map(|reg| self.index.index(reg))
                    .collect();
                for &idx in uses.iter().chain(&defs) {
                    self.graph.node_mut(NodeId::new(idx)).weight += block.weight;
                }

                if let Some((dst, src)) = instr.copy_regs() {
                    if let (Some(dst), Some(src)) = (self.index.index(dst), self.index.index(src)) {
                        live.reset(src);
                        self.graph.add_move(id, NodeId::new(dst), NodeId::new(src));
                    }
                }

                for &def in &defs {
                    live.set(def);
                }
                for &def in &defs {
                    for other in &live {
                        self.graph.add_edge(NodeId::new(other), NodeId::new(def));
                    }
                }
                for &def in &defs {
                    live.reset(def);
                }
                for &used in &uses {
                    live.set(used);
                }
            }
        }
    }

    fn make_worklist(&mut self) {
        let initial: Vec<_> = self.graph.worklist(WorklistTag::Initial).iter().copied().collect();
        for n in initial {
            let tag = if self.graph.degree(n) >= self.k {
                WorklistTag::Spill
            } else if self.graph.move_related(n) {
                WorklistTag::Freeze
            } else {
                WorklistTag::Simplify
            };
            self.graph.set_tag(n, tag);
        }
    }

    fn simplify(&mut self, n: NodeId) {
        self.graph.set_tag(n, WorklistTag::Select);
        for m in self.graph.adjacent(n) {
            self.decrement_degree(m);
        }
    }

    fn decrement_degree(&mut self, m: NodeId) {
        if self.graph.is_precolored(m) {
            return;
        }
        let degree = self.graph.degree(m);
        self.graph.node_mut(m).degree = degree - 1;
        if degree == self.k {
            let mut nodes = self.graph.adjacent(m);
            nodes.push(m);
            self.enable_moves(&nodes);
            assert_eq!(
                self.graph.tag(m),
                WorklistTag::Spill,
                "{} had degree K outside the spill worklist",
                m
            );
            let tag = if self.graph.move_related(m) {
                WorklistTag::Freeze
            } else {
                WorklistTag::Simplify
            };
            self.graph.set_tag(m, tag);
        }
    }

    fn enable_moves(&mut self, nodes: &[NodeId]) {
        for &n in nodes {
            for m in self.graph.node_moves(n) {
                if self.graph.get_move(m).tag == MoveTag::Active {
                    self.graph.set_move_tag(m, MoveTag::Worklist);
                }
            }
        }
    }

    fn coalesce(&mut self) {
        let Some(m) = self.graph.move_worklist(MoveTag::Worklist).first().copied() else {
            return;
        };
        let (dst, src) = {
            let mv = self.graph.get_move(m);
            (mv.dst, mv.src)
        };
        let x = self.graph.alias(dst);
        let y = self.graph.alias(src);
        // The survivor is precolored if either side is, and never unspillable
        // when the other side is spillable.
        let keep_y = self.graph.is_precolored(y)
            || (!self.graph.is_precolored(x) && self.is_unspillable(x) && !self.is_unspillable(y));
        let (u, v) = if keep_y { (y, x) } else { (x, y) };

        if u == v {
            self.graph.set_move_tag(m, MoveTag::Coalesced);
            self.add_worklist(u);
        } else if self.graph.is_precolored(v) || self.graph.interferes(u, v) {
            self.graph.set_move_tag(m, MoveTag::Constrained);
            self.add_worklist(u);
            self.add_worklist(v);
        } else if self.can_coalesce(u, v) {
            trace!("coalesce {} into {}", v, u);
            self.graph.set_move_tag(m, MoveTag::Coalesced);
            self.combine(u, v);
            self.add_worklist(u);
        } else {
            self.graph.set_move_tag(m, MoveTag::Active);
        }
    }

    fn can_coalesce(&self, u: NodeId, v: NodeId) -> bool {
        if self.graph.is_precolored(u) {
            self.graph.adjacent(v).into_iter().all(|t| self.george_ok(t, u))
        } else {
            let mut nodes = self.graph.adjacent(u);
            nodes.extend(self.graph.adjacent(v));
            self.briggs_ok(&nodes)
        }
    }

    /// George: a neighbour `t` of the virtual side is harmless if it is
    /// low-degree and virtual, or already interferes with `r`.
    fn george_ok(&self, t: NodeId, r: NodeId) -> bool {
        (self.graph.degree(t) < self.k && !self.graph.is_precolored(t))
            || self.graph.interferes(t, r)
    }

    /// Briggs: fewer than K distinct significant-degree neighbours.
    fn briggs_ok(&self, nodes: &[NodeId]) -> bool {
        let mut seen = BitVector::new(self.graph.len());
        let significant = nodes
            .iter()
            .filter(|&&n| seen.set(n.index()) && self.graph.degree(n) >= self.k)
            .count();
        significant < self.k
    }

    fn add_worklist(&mut self, u: NodeId) {
        if self.graph.tag(u) == WorklistTag::Freeze
            && !self.graph.move_related(u)
            && self.graph.degree(u) < self.k
        {
            self.graph.set_tag(u, WorklistTag::Simplify);
        }
    }

    fn combine(&mut self, u: NodeId, v: NodeId) {
        assert!(
            !self.graph.interferes(u, v),
            "combining interfering nodes {} and {}",
            u,
            v
        );
        self.graph.set_tag(v, WorklistTag::Coalesced);
        self.graph.node_mut(v).alias = Some(u);
        let moves = self.graph.node(v).move_list.clone();
        self.graph.node_mut(u).move_list.extend(moves);
        self.enable_moves(&[v]);
        for t in self.graph.adjacent(v) {
            if self.graph.interferes(t, u) {
                self.decrement_degree(t);
            } else {
                // `t` trades `v` for `u`, so its degree stays put.
                let degree = self.graph.degree(t);
                self.graph.add_edge(t, u);
                self.graph.node_mut(t).degree = degree;
            }
        }
        if self.graph.degree(u) >= self.k && self.graph.tag(u) == WorklistTag::Freeze {
            self.graph.set_tag(u, WorklistTag::Spill);
        }
    }

    fn freeze(&mut self, u: NodeId) {
        trace!("freeze {}", u);
        self.graph.set_tag(u, WorklistTag::Simplify);
        self.freeze_moves(u);
    }

    fn freeze_moves(&mut self, u: NodeId) {
        let u_alias = self.graph.alias(u);
        for m in self.graph.node_moves(u) {
            let (x, y) = {
                let mv = self.graph.get_move(m);
                (mv.dst, mv.src)
            };
            let v = if self.graph.alias(y) == u_alias {
                self.graph.alias(x)
            } else {
                self.graph.alias(y)
            };
            self.graph.set_move_tag(m, MoveTag::Frozen);
            if self.graph.tag(v) == WorklistTag::Freeze
                && self.graph.node_moves(v).is_empty()
                && self.graph.degree(v) < self.k
            {
                self.graph.set_tag(v, WorklistTag::Simplify);
            }
        }
    }

    fn is_unspillable(&self, n: NodeId) -> bool {
        self.graph
            .node(n)
            .reg
            .as_virt()
            .map_or(false, |vreg| self.func.vreg(vreg).is_unspillable())
    }

    /// `weight / degree`, scaled down when the value can be recomputed.
    /// `None` for nodes that must never be chosen.
    fn spill_cost(&self, n: NodeId) -> Option<f64> {
        let node = self.graph.node(n);
        let vreg = node.reg.as_virt()?;
        let info = self.func.vreg(vreg);
        if node.degree == 0 || info.is_unspillable() || info.size() >= 128 {
            return None;
        }
        let priority = info.remat.as_ref().map_or(1.0, |remat| {
            let slot_bits = match remat {
                Remat::Frame(slot) => self.func.frame.get(*slot).map(|slot| slot.size),
                _ => None,
            };
            self.config.remat_priority(remat, slot_bits)
        });
        Some(node.weight / node.degree as f64 * priority)
    }

    fn select_spill(&mut self) {
        let mut best: Option<(NodeId, f64)> = None;
        for &n in self.graph.worklist(WorklistTag::Spill) {
            if let Some(cost) = self.spill_cost(n) {
                if best.map_or(true, |(_, best_cost)| cost < best_cost) {
                    best = Some((n, cost));
                }
            }
        }
        let (m, cost) = best
            .unwrap_or_else(|| panic!("spill worklist is non-empty but holds no spill candidate"));
        trace!("potential spill {:?} (cost {})", self.graph.node(m).reg, cost);
        self.graph.set_tag(m, WorklistTag::Simplify);
        self.freeze_moves(m);
    }

    fn assign_colors(&mut self) {
        while let Some(n) = self.graph.pop_select() {
            let mut taken = BitVector::new(self.num_regs);
            for w in self.graph.node(n).adj_list.clone() {
                let a = self.graph.alias(w);
                if matches!(self.graph.tag(a), WorklistTag::Colored | WorklistTag::Precolored) {
                    let color = self.graph.node(a).color.unwrap_or_else(|| {
                        panic!("{} is {:?} but has no color", a, self.graph.tag(a))
                    });
                    taken.set(color.index());
                }
            }
            match self.colors.iter().find(|color| !taken.test(color.index())) {
                Some(&color) => {
                    self.graph.set_tag(n, WorklistTag::Colored);
                    self.graph.node_mut(n).color = Some(color);
                }
                None => self.graph.set_tag(n, WorklistTag::Spilled),
            }
        }

        let coalesced: Vec<_> = self
            .graph
            .worklist(WorklistTag::Coalesced)
            .iter()
            .copied()
            .collect();
        for n in coalesced {
            let a = self.graph.alias(n);
            let color = self.graph.node(a).color;
            self.graph.node_mut(n).color = color;
        }
    }

    fn finish(self) -> Coloring {
        let mut colors = vec![None; self.func.num_vregs()];
        for (_, node) in self.graph.nodes() {
            if let Some(vreg) = node.reg.as_virt() {
                colors[vreg.index()] = node.color;
            }
        }
        let spilled = self
            .graph
            .worklist(WorklistTag::Spilled)
            .iter()
            .filter_map(|&n| self.graph.node(n).reg.as_virt())
            .collect();
        Coloring {
            colors,
            spilled,
            coalesced_moves: self.graph.move_worklist(MoveTag::Coalesced).len(),
        }
    }
}
