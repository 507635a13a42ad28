//! Dominator tree of a machine function, built with the Lengauer-Tarjan
//! algorithm (path-compressing forest, O(E log V)).

use crate::{
    asm::Function,
    common::{BitVector, BlockId, InstrId},
};

const NONE: usize = usize::MAX;

#[derive(Debug, Clone)]
pub struct DominatorTree {
    idom: Vec<Option<BlockId>>,
    children: Vec<Vec<BlockId>>,
    frontiers: Vec<BitVector>,
    /// Dominator-tree DFS enter/exit stamps from one shared counter.
    pre: Vec<usize>,
    post: Vec<usize>,
    preorder: Vec<BlockId>,
    /// Position of each block in `preorder`.
    preorder_pos: Vec<usize>,
}

impl DominatorTree {
    pub fn compute(func: &Function) -> Self {
        let num_blocks = func.num_blocks();
        let mut tree = Self {
            idom: vec![None; num_blocks],
            children: vec![Vec::new(); num_blocks],
            frontiers: vec![BitVector::new(num_blocks); num_blocks],
            pre: vec![NONE; num_blocks],
            post: vec![NONE; num_blocks],
            preorder: Vec::with_capacity(num_blocks),
            preorder_pos: vec![NONE; num_blocks],
        };
        let Some(entry) = func.entry() else {
            return tree;
        };

        let lt = LengauerTarjan::run(func, entry);
        for (dfnum, &block) in lt.vertex.iter().enumerate().skip(1) {
            let idom = lt.vertex[lt.idom[dfnum]];
            tree.idom[block.index()] = Some(idom);
            tree.children[idom.index()].push(block);
        }

        tree.number(entry);
        tree.compute_frontiers(func);
        tree
    }

    fn number(&mut self, entry: BlockId) {
        let mut counter = 0;
        let mut stack = vec![(entry, 0)];
        self.pre[entry.index()] = counter;
        self.preorder_pos[entry.index()] = self.preorder.len();
        self.preorder.push(entry);
        counter += 1;

        while let Some((block, next)) = stack.pop() {
            match self.children[block.index()].get(next).copied() {
                Some(child) => {
                    stack.push((block, next + 1));
                    self.pre[child.index()] = counter;
                    self.preorder_pos[child.index()] = self.preorder.len();
                    self.preorder.push(child);
                    counter += 1;
                    stack.push((child, 0));
                }
                None => {
                    self.post[block.index()] = counter;
                    counter += 1;
                }
            }
        }
    }

    fn compute_frontiers(&mut self, func: &Function) {
        for block in func.blocks() {
            if block.preds.len() < 2 || !self.is_reachable(block.id) {
                continue;
            }
            let idom = self.idom[block.id.index()];
            for &pred in &block.preds {
                if !self.is_reachable(pred) {
                    continue;
                }
                let mut runner = Some(pred);
                while let Some(current) = runner {
                    if Some(current) == idom {
                        break;
                    }
                    self.frontiers[current.index()].set(block.id.index());
                    runner = self.idom[current.index()];
                }
            }
        }
    }

    pub fn is_reachable(&self, block: BlockId) -> bool {
        self.pre[block.index()] != NONE
    }

    /// `None` for the entry and for unreachable blocks.
    pub fn idom(&self, block: BlockId) -> Option<BlockId> {
        self.idom[block.index()]
    }

    pub fn children(&self, block: BlockId) -> &[BlockId] {
        &self.children[block.index()]
    }

    pub fn frontier(&self, block: BlockId) -> impl Iterator<Item = BlockId> + '_ {
        self.frontiers[block.index()].iter().map(BlockId::new)
    }

    /// Reachable blocks in dominator-tree preorder.
    pub fn preorder(&self) -> &[BlockId] {
        &self.preorder
    }

    /// `(pre, post)` interval of a reachable block.
    pub fn interval(&self, block: BlockId) -> Option<(usize, usize)> {
        self.is_reachable(block)
            .then(|| (self.pre[block.index()], self.post[block.index()]))
    }

    pub fn dominates(&self, a: BlockId, b: BlockId) -> bool {
        match (self.interval(a), self.interval(b)) {
            (Some((a_pre, a_post)), Some((b_pre, b_post))) => a_pre <= b_pre && b_post <= a_post,
            _ => false,
        }
    }

    /// Deepest block dominating every block of `blocks`.
    pub fn nearest_common_dominator(
        &self,
        blocks: impl IntoIterator<Item = BlockId>,
    ) -> Option<BlockId> {
        let mut lo = NONE;
        let mut hi = 0;
        let mut first = None;
        for block in blocks {
            let (pre, post) = self.interval(block)?;
            if pre < lo {
                lo = pre;
                first = Some(block);
            }
            hi = hi.max(post);
        }

        let start = self.preorder_pos[first?.index()];
        self.preorder[..=start].iter().rev().copied().find(|&block| {
            let (pre, post) = (self.pre[block.index()], self.post[block.index()]);
            pre <= lo && hi <= post
        })
    }

    /// Nearest common dominator of the blocks holding `instrs`.
    pub fn nearest_common_dominator_of(
        &self,
        func: &Function,
        instrs: impl IntoIterator<Item = InstrId>,
    ) -> Option<BlockId> {
        self.nearest_common_dominator(instrs.into_iter().map(|id| func.instr(id).block))
    }
}

/// Working state of one Lengauer-Tarjan run, indexed by DFS number.
struct LengauerTarjan {
    vertex: Vec<BlockId>,
    parent: Vec<usize>,
    semi: Vec<usize>,
    idom: Vec<usize>,
    ancestor: Vec<usize>,
    label: Vec<usize>,
}

impl LengauerTarjan {
    fn run(func: &Function, entry: BlockId) -> Self {
        let mut dfnum = vec![NONE; func.num_blocks()];
        let mut lt = Self {
            vertex: Vec::new(),
            parent: Vec::new(),
            semi: Vec::new(),
            idom: Vec::new(),
            ancestor: Vec::new(),
            label: Vec::new(),
        };
        lt.dfs(func, entry, &mut dfnum);

        let n = lt.vertex.len();
        let mut bucket = vec![Vec::new(); n];
        for w in (1..n).rev() {
            let block = lt.vertex[w];
            for pred in &func.block(block).preds {
                let v = dfnum[pred.index()];
                if v == NONE {
                    continue;
                }
                let u = lt.eval(v);
                if lt.semi[u] < lt.semi[w] {
                    lt.semi[w] = lt.semi[u];
                }
            }
            bucket[lt.semi[w]].push(w);

            let p = lt.parent[w];
            lt.ancestor[w] = p;
            for v in std::mem::take(&mut bucket[p]) {
                let u = lt.eval(v);
                lt.idom[v] = if lt.semi[u] < lt.semi[v] { u } else { p };
            }
        }

        for w in 1..n {
            if lt.idom[w] != lt.semi[w] {
                lt.idom[w] = lt.idom[lt.idom[w]];
            }
        }
        lt
    }

    fn dfs(&mut self, func: &Function, entry: BlockId, dfnum: &mut [usize]) {
        let mut stack = vec![(entry, NONE)];
        while let Some((block, parent)) = stack.pop() {
            if dfnum[block.index()] != NONE {
                continue;
            }
            let num = self.vertex.len();
            dfnum[block.index()] = num;
            self.vertex.push(block);
            self.parent.push(parent);
            self.semi.push(num);
            self.idom.push(NONE);
            self.ancestor.push(NONE);
            self.label.push(num);
            for &succ in func.block(block).succs.iter().rev() {
                if dfnum[succ.index()] == NONE {
                    stack.push((succ, num));
                }
            }
        }
    }

    fn eval(&mut self, v: usize) -> usize {
        if self.ancestor[v] == NONE {
            return v;
        }
        self.compress(v);
        self.label[v]
    }

    fn compress(&mut self, v: usize) {
        let mut path = Vec::new();
        let mut x = v;
        while self.ancestor[self.ancestor[x]] != NONE {
            path.push(x);
            x = self.ancestor[x];
        }
        while let Some(x) = path.pop() {
            let a = self.ancestor[x];
            if self.semi[self.label[a]] < self.semi[self.label[x]] {
                self.label[x] = self.label[a];
            }
            self.ancestor[x] = self.ancestor[a];
        }
    }
}
