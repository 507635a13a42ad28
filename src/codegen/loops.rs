use crate::{asm::Function, common::BitVector};

use super::dominator::DominatorTree;

/// Execution-frequency multiplier per level of loop nesting.
const LOOP_WEIGHT: f64 = 10.0;

/// Loop nesting depth of every block (0 outside loops).
///
/// Each back edge `tail -> header` (header dominates tail) contributes the
/// natural loop of blocks reaching `tail` without passing through `header`.
/// Back edges sharing a header form one loop.
pub fn loop_depths(func: &Function, dom: &DominatorTree) -> Vec<usize> {
    let num_blocks = func.num_blocks();
    let mut loops: Vec<Option<BitVector>> = vec![None; num_blocks];

    for block in func.blocks() {
        for &header in &block.succs {
            if !dom.dominates(header, block.id) {
                continue;
            }
            let body = loops[header.index()].get_or_insert_with(|| BitVector::new(num_blocks));
            body.set(header.index());
            let mut worklist = Vec::new();
            if body.set(block.id.index()) {
                worklist.push(block.id);
            }
            while let Some(current) = worklist.pop() {
                for &pred in &func.block(current).preds {
                    if dom.is_reachable(pred) && body.set(pred.index()) {
                        worklist.push(pred);
                    }
                }
            }
        }
    }

    let mut depths = vec![0; num_blocks];
    for body in loops.iter().flatten() {
        for idx in body {
            depths[idx] += 1;
        }
    }
    depths
}

/// `10^depth` for every block, indexed by block.
pub fn estimate_weights(func: &Function) -> Vec<f64> {
    let dom = DominatorTree::compute(func);
    loop_depths(func, &dom)
        .into_iter()
        .map(|depth| LOOP_WEIGHT.powi(depth as i32))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nested_loops() {
        // 0 -> 1 -> 2 -> 3 -> 2, 3 -> 4 -> 1, 4 -> 5
        let mut func = Function::new("f");
        let b: Vec<_> = (0..6).map(|_| func.new_block()).collect();
        for (from, to) in [(0, 1), (1, 2), (2, 3), (3, 2), (3, 4), (4, 1), (4, 5)] {
            func.add_edge(b[from], b[to]);
        }

        let weights = estimate_weights(&func);
        assert_eq!(weights, vec![1.0, 10.0, 100.0, 100.0, 10.0, 1.0]);
        let dom = DominatorTree::compute(&func);
        assert_eq!(loop_depths(&func, &dom)[b[3].index()], 2);
    }

    #[test]
    fn test_self_loop() {
        let mut func = Function::new("f");
        let b: Vec<_> = (0..3).map(|_| func.new_block()).collect();
        func.add_edge(b[0], b[1]);
        func.add_edge(b[1], b[1]);
        func.add_edge(b[1], b[2]);
        assert_eq!(estimate_weights(&func), vec![1.0, 10.0, 1.0]);
    }
}
