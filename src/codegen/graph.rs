use std::collections::BTreeSet;

use strum::EnumCount;

use crate::{
    asm::Reg,
    common::{BitVector, InstrId, MoveId, NodeId},
    frame::PhysReg,
};

/// The one worklist a node belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumCount)]
pub enum WorklistTag {
    Precolored,
    Initial,
    Simplify,
    Freeze,
    Spill,
    Coalesced,
    Select,
    Colored,
    Spilled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumCount)]
pub enum MoveTag {
    Worklist,
    Active,
    Coalesced,
    Constrained,
    Frozen,
}

#[derive(Debug, Clone)]
pub struct Node {
    pub reg: Reg,
    pub tag: WorklistTag,
    pub degree: usize,
    /// Only maintained for non-precolored nodes.
    pub adj_list: Vec<NodeId>,
    pub move_list: Vec<MoveId>,
    /// Sum of the weights of the blocks mentioning the register.
    pub weight: f64,
    pub alias: Option<NodeId>,
    pub color: Option<PhysReg>,
}

#[derive(Debug, Clone)]
pub struct Move {
    pub instr: InstrId,
    pub dst: NodeId,
    pub src: NodeId,
    pub tag: MoveTag,
}

/// Interference graph plus the node and move worklists of one coloring round.
///
/// A node moves between worklists only through [`InterferenceGraph::set_tag`],
/// which keeps the tag and the owning collection in step. The select stack is
/// ordered; every other worklist is an ordered set so iteration is deterministic.
#[derive(Debug)]
pub struct InterferenceGraph {
    nodes: Vec<Option<Node>>,
    adj_set: BitVector,
    moves: Vec<Move>,
    worklists: Vec<BTreeSet<NodeId>>,
    select_stack: Vec<NodeId>,
    move_worklists: Vec<BTreeSet<MoveId>>,
}

impl InterferenceGraph {
    pub fn new(len: usize) -> Self {
        Self {
            nodes: vec![None; len],
            adj_set: BitVector::new(len * len),
            moves: Vec::new(),
            worklists: vec![BTreeSet::new(); WorklistTag::COUNT],
            select_stack: Vec::new(),
            move_worklists: vec![BTreeSet::new(); MoveTag::COUNT],
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, n: NodeId) -> bool {
        self.nodes[n.index()].is_some()
    }

    /// Adds a node if it does not exist yet.
    pub fn insert(&mut self, n: NodeId, reg: Reg, precolor: Option<PhysReg>) {
        if self.contains(n) {
            return;
        }
        let (tag, degree) = match precolor {
            Some(_) => (WorklistTag::Precolored, usize::MAX),
            None => (WorklistTag::Initial, 0),
        };
        self.nodes[n.index()] = Some(Node {
            reg,
            tag,
            degree,
            adj_list: Vec::new(),
            move_list: Vec::new(),
            weight: 0.0,
            alias: None,
            color: precolor,
        });
        self.worklists[tag as usize].insert(n);
    }

    pub fn node(&self, n: NodeId) -> &Node {
        self.nodes[n.index()]
            .as_ref()
            .unwrap_or_else(|| panic!("interference-graph node {} does not exist", n))
    }

    pub fn node_mut(&mut self, n: NodeId) -> &mut Node {
        self.nodes[n.index()]
            .as_mut()
            .unwrap_or_else(|| panic!("interference-graph node {} does not exist", n))
    }

    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &Node)> + '_ {
        self.nodes
            .iter()
            .enumerate()
            .filter_map(|(idx, node)| node.as_ref().map(|node| (NodeId::new(idx), node)))
    }

    pub fn tag(&self, n: NodeId) -> WorklistTag {
        self.node(n).tag
    }

    pub fn is_precolored(&self, n: NodeId) -> bool {
        self.tag(n) == WorklistTag::Precolored
    }

    pub fn degree(&self, n: NodeId) -> usize {
        self.node(n).degree
    }

    /// Moves `n` from its current worklist to `tag`'s.
    pub fn set_tag(&mut self, n: NodeId, tag: WorklistTag) {
        let old = self.tag(n);
        if old == WorklistTag::Select {
            let pos = self
                .select_stack
                .iter()
                .rposition(|&other| other == n)
                .unwrap_or_else(|| panic!("{} is tagged select but not on the stack", n));
            self.select_stack.remove(pos);
        } else {
            let removed = self.worklists[old as usize].remove(&n);
            assert!(removed, "{} is tagged {:?} but not in that worklist", n, old);
        }

        if tag == WorklistTag::Select {
            self.select_stack.push(n);
        } else {
            self.worklists[tag as usize].insert(n);
        }
        self.node_mut(n).tag = tag;
    }

    pub fn worklist(&self, tag: WorklistTag) -> &BTreeSet<NodeId> {
        &self.worklists[tag as usize]
    }

    /// Lowest node of `tag`'s worklist.
    pub fn first(&self, tag: WorklistTag) -> Option<NodeId> {
        self.worklists[tag as usize].first().copied()
    }

    /// Pops the select stack. The node is parked in `Initial` until it is
    /// colored or spilled.
    pub fn pop_select(&mut self) -> Option<NodeId> {
        let n = self.select_stack.pop()?;
        self.worklists[WorklistTag::Initial as usize].insert(n);
        self.node_mut(n).tag = WorklistTag::Initial;
        Some(n)
    }

    pub fn interferes(&self, u: NodeId, v: NodeId) -> bool {
        self.adj_set.test(u.index() * self.len() + v.index())
    }

    /// Records `u -- v`. Precolored ends keep no adjacency list and infinite degree.
    pub fn add_edge(&mut self, u: NodeId, v: NodeId) {
        if u == v || self.interferes(u, v) {
            return;
        }
        let len = self.len();
        self.adj_set.set(u.index() * len + v.index());
        self.adj_set.set(v.index() * len + u.index());
        for (from, to) in [(u, v), (v, u)] {
            if !self.is_precolored(from) {
                let node = self.node_mut(from);
                node.adj_list.push(to);
                node.degree += 1;
            }
        }
    }

    /// Neighbours still in the graph.
    pub fn adjacent(&self, n: NodeId) -> Vec<NodeId> {
        self.node(n)
            .adj_list
            .iter()
            .copied()
            .filter(|&m| {
                !matches!(
                    self.tag(m),
                    WorklistTag::Select | WorklistTag::Coalesced
                )
            })
            .collect()
    }

    pub fn add_move(&mut self, instr: InstrId, dst: NodeId, src: NodeId) -> MoveId {
        let id = MoveId::new(self.moves.len());
        self.moves.push(Move {
            instr,
            dst,
            src,
            tag: MoveTag::Worklist,
        });
        self.move_worklists[MoveTag::Worklist as usize].insert(id);
        self.node_mut(dst).move_list.push(id);
        if src != dst {
            self.node_mut(src).move_list.push(id);
        }
        id
    }

    pub fn moves(&self) -> &[Move] {
        &self.moves
    }

    pub fn get_move(&self, m: MoveId) -> &Move {
        &self.moves[m.index()]
    }

    pub fn set_move_tag(&mut self, m: MoveId, tag: MoveTag) {
        let old = self.moves[m.index()].tag;
        self.move_worklists[old as usize].remove(&m);
        self.move_worklists[tag as usize].insert(m);
        self.moves[m.index()].tag = tag;
    }

    pub fn move_worklist(&self, tag: MoveTag) -> &BTreeSet<MoveId> {
        &self.move_worklists[tag as usize]
    }

    /// Moves of `n` that may still be coalesced.
    pub fn node_moves(&self, n: NodeId) -> Vec<MoveId> {
        let mut moves: Vec<_> = self
            .node(n)
            .move_list
            .iter()
            .copied()
            .filter(|&m| matches!(self.get_move(m).tag, MoveTag::Active | MoveTag::Worklist))
            .collect();
        moves.sort_unstable();
        moves.dedup();
        moves
    }

    pub fn move_related(&self, n: NodeId) -> bool {
        self.node(n)
            .move_list
            .iter()
            .any(|&m| matches!(self.get_move(m).tag, MoveTag::Active | MoveTag::Worklist))
    }

    /// Representative of `n`, compressing the alias chain on the way.
    pub fn alias(&mut self, n: NodeId) -> NodeId {
        let mut root = n;
        while let Some(next) = self.node(root).alias {
            root = next;
        }
        let mut current = n;
        while let Some(next) = self.node(current).alias {
            if next != root {
                self.node_mut(current).alias = Some(root);
            }
            current = next;
        }
        root
    }
}
