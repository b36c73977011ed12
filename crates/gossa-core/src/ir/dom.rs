//! Dominator tree of a function's CFG, computed with the iterative
//! Cooper-Harvey-Kennedy algorithm over reverse postorder.

use std::collections::BTreeSet;

use crate::ir::{Function, FunctionBody};

#[derive(Debug, Clone)]
pub struct DomTree {
    /// Immediate dominator per block; the entry maps to itself and blocks
    /// unreachable from the entry map to `None`.
    idom: Vec<Option<usize>>,
    children: Vec<Vec<usize>>,
    /// Pre- and post-order numbers of a dominator-tree walk, for O(1)
    /// dominance queries.
    pre: Vec<usize>,
    post: Vec<usize>,
    preorder: Vec<usize>,
}

impl DomTree {
    pub fn compute(body: &FunctionBody) -> Self {
        let n = body.blocks.len();
        let mut idom = vec![None; n];
        if n == 0 {
            return Self {
                idom,
                children: Vec::new(),
                pre: Vec::new(),
                post: Vec::new(),
                preorder: Vec::new(),
            };
        }

        let rpo = reverse_postorder(body);
        let mut rpo_index = vec![usize::MAX; n];
        for (i, &b) in rpo.iter().enumerate() {
            rpo_index[b] = i;
        }

        idom[0] = Some(0);
        let mut changed = true;
        while changed {
            changed = false;
            for &b in rpo.iter().skip(1) {
                let mut new_idom = None;
                for &p in &body.blocks[b].preds {
                    if idom[p].is_none() {
                        continue;
                    }
                    new_idom = Some(match new_idom {
                        None => p,
                        Some(current) => intersect(&idom, &rpo_index, current, p),
                    });
                }
                if new_idom.is_some() && idom[b] != new_idom {
                    idom[b] = new_idom;
                    changed = true;
                }
            }
        }

        let mut children = vec![Vec::new(); n];
        for b in 1..n {
            if let Some(parent) = idom[b] {
                if parent != b {
                    children[parent].push(b);
                }
            }
        }

        let mut pre = vec![usize::MAX; n];
        let mut post = vec![usize::MAX; n];
        let mut preorder = Vec::with_capacity(n);
        let (mut pre_n, mut post_n) = (0, 0);
        let mut stack = vec![(0usize, false)];
        while let Some((b, done)) = stack.pop() {
            if done {
                post[b] = post_n;
                post_n += 1;
                continue;
            }
            pre[b] = pre_n;
            pre_n += 1;
            preorder.push(b);
            stack.push((b, true));
            for &c in children[b].iter().rev() {
                stack.push((c, false));
            }
        }

        Self {
            idom,
            children,
            pre,
            post,
            preorder,
        }
    }

    pub fn idom(&self, block: usize) -> Option<usize> {
        match self.idom.get(block).copied().flatten() {
            Some(d) if d == block => None,
            other => other,
        }
    }

    pub fn children(&self, block: usize) -> &[usize] {
        self.children.get(block).map_or(&[], Vec::as_slice)
    }

    pub fn is_reachable(&self, block: usize) -> bool {
        self.idom.get(block).is_some_and(Option::is_some)
    }

    /// Whether `a` dominates `b`. Every block dominates itself; unreachable
    /// blocks dominate and are dominated by nothing else.
    pub fn dominates(&self, a: usize, b: usize) -> bool {
        if a == b {
            return true;
        }
        if !self.is_reachable(a) || !self.is_reachable(b) {
            return false;
        }
        self.pre[a] <= self.pre[b] && self.post[b] <= self.post[a]
    }

    /// Reachable blocks in dominator-tree pre-order, children in block order.
    pub fn preorder(&self) -> &[usize] {
        &self.preorder
    }

    /// The dominance frontier of every block.
    pub fn frontiers(&self, body: &FunctionBody) -> Vec<BTreeSet<usize>> {
        let mut df = vec![BTreeSet::new(); body.blocks.len()];
        for (b, block) in body.blocks.iter().enumerate() {
            if !self.is_reachable(b) || block.preds.len() < 2 {
                continue;
            }
            let Some(stop) = self.idom(b) else {
                continue;
            };
            for &p in &block.preds {
                let mut runner = p;
                while self.is_reachable(runner) && runner != stop {
                    df[runner].insert(b);
                    match self.idom(runner) {
                        Some(up) => runner = up,
                        None => break,
                    }
                }
            }
        }
        df
    }
}

fn intersect(idom: &[Option<usize>], rpo_index: &[usize], mut a: usize, mut b: usize) -> usize {
    while a != b {
        while rpo_index[a] > rpo_index[b] {
            a = idom[a].unwrap_or(0);
        }
        while rpo_index[b] > rpo_index[a] {
            b = idom[b].unwrap_or(0);
        }
    }
    a
}

fn reverse_postorder(body: &FunctionBody) -> Vec<usize> {
    let n = body.blocks.len();
    let mut seen = vec![false; n];
    let mut order = Vec::with_capacity(n);
    let mut stack = vec![(0usize, 0usize)];
    seen[0] = true;
    while let Some((b, i)) = stack.pop() {
        match body.blocks[b].succs.get(i) {
            Some(&s) => {
                stack.push((b, i + 1));
                if !seen[s] {
                    seen[s] = true;
                    stack.push((s, 0));
                }
            }
            None => order.push(b),
        }
    }
    order.reverse();
    order
}

/// The iterated dominance frontier of `defs`.
pub fn iterated_frontier(frontiers: &[BTreeSet<usize>], defs: impl IntoIterator<Item = usize>) -> BTreeSet<usize> {
    let mut result = BTreeSet::new();
    let mut work: Vec<usize> = defs.into_iter().collect();
    let mut visited = BTreeSet::new();
    while let Some(b) = work.pop() {
        if !visited.insert(b) {
            continue;
        }
        for &f in &frontiers[b] {
            if result.insert(f) {
                work.push(f);
            }
        }
    }
    result
}

impl Function {
    /// Reachable blocks of the body in dominator-tree pre-order.
    pub fn dom_preorder(&self) -> Vec<usize> {
        match self.body() {
            Some(body) => DomTree::compute(body).preorder().to_vec(),
            None => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// entry -> {a, b} -> join, plus an unreachable block.
    fn diamond() -> FunctionBody {
        let mut body = FunctionBody::new();
        let entry = body.new_block("entry");
        let a = body.new_block("a");
        let b = body.new_block("b");
        let join = body.new_block("join");
        let dead = body.new_block("dead");
        body.add_edge(entry, a);
        body.add_edge(entry, b);
        body.add_edge(a, join);
        body.add_edge(b, join);
        body.add_edge(dead, join);
        body
    }

    #[test]
    fn diamond_dominators() {
        let body = diamond();
        let dom = DomTree::compute(&body);
        assert_eq!(dom.idom(3), Some(0));
        assert!(dom.dominates(0, 3));
        assert!(!dom.dominates(1, 3));
        assert!(!dom.is_reachable(4));
        assert_eq!(dom.preorder(), &[0, 1, 2, 3]);
    }

    #[test]
    fn frontiers_of_diamond_arms() {
        let body = diamond();
        let dom = DomTree::compute(&body);
        let df = dom.frontiers(&body);
        assert!(df[1].contains(&3));
        assert!(df[2].contains(&3));
        assert!(df[0].is_empty());
        let idf = iterated_frontier(&df, [1]);
        assert_eq!(idf.into_iter().collect::<Vec<_>>(), vec![3]);
    }

    #[test]
    fn loop_header_is_in_its_own_frontier() {
        let mut body = FunctionBody::new();
        let entry = body.new_block("entry");
        let head = body.new_block("head");
        let latch = body.new_block("latch");
        let exit = body.new_block("exit");
        body.add_edge(entry, head);
        body.add_edge(head, latch);
        body.add_edge(head, exit);
        body.add_edge(latch, head);
        let dom = DomTree::compute(&body);
        let df = dom.frontiers(&body);
        assert!(df[latch].contains(&head));
        assert!(df[head].contains(&head));
    }
}
