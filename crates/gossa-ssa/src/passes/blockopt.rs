//! Control-flow clean-up: unreachable blocks are deleted, jump-only blocks
//! are threaded through and straight-line block chains are fused.

use gossa_core::error::Result;
use gossa_core::ir::{FunctionBody, Instr, NodeKind};

use super::{BodyPass, BodyPassName};

pub struct BlockOpt;

impl BodyPass for BlockOpt {
    fn name(&self) -> BodyPassName {
        BodyPassName::BlockOpt
    }

    fn run(&self, body: &mut FunctionBody) -> Result<usize> {
        Ok(optimize_blocks(body))
    }
}

/// Simplifies the CFG of `body` and renumbers its blocks. Returns the
/// number of blocks removed.
pub fn optimize_blocks(body: &mut FunctionBody) -> usize {
    if body.blocks.is_empty() {
        return 0;
    }
    let mut dead = delete_unreachable(body);
    let mut changed = true;
    while changed {
        changed = false;
        for b in 0..body.blocks.len() {
            if dead[b] {
                continue;
            }
            if let Some(threaded) = thread_jump(body, b) {
                dead[threaded] = true;
                changed = true;
                continue;
            }
            if let Some(fused) = fuse(body, b) {
                dead[fused] = true;
                changed = true;
            }
        }
    }
    let removed = dead.iter().filter(|d| **d).count();
    body.retain_blocks(|b| !dead[b]);
    removed
}

/// Marks blocks unreachable from both the entry and the recover block and
/// detaches them from their successors.
fn delete_unreachable(body: &mut FunctionBody) -> Vec<bool> {
    let n = body.blocks.len();
    let mut seen = vec![false; n];
    let mut work = vec![0];
    work.extend(body.recover);
    while let Some(b) = work.pop() {
        if std::mem::replace(&mut seen[b], true) {
            continue;
        }
        work.extend(body.blocks[b].succs.iter().copied().filter(|s| !seen[*s]));
    }

    for b in (0..n).filter(|b| !seen[*b]) {
        let succs = std::mem::take(&mut body.blocks[b].succs);
        for s in succs {
            if seen[s] {
                remove_pred(body, s, b);
            }
        }
        body.blocks[b].preds.clear();
    }
    seen.into_iter().map(|reachable| !reachable).collect()
}

/// Redirects the predecessors of `b` to its successor when `b` holds
/// nothing but a jump. Returns `b` if it was bypassed.
fn thread_jump(body: &mut FunctionBody, b: usize) -> Option<usize> {
    if b == 0 || Some(b) == body.recover {
        return None;
    }
    let [only] = body.blocks[b].instrs[..] else {
        return None;
    };
    if !matches!(body.instr(only), Some(Instr::Jump)) {
        return None;
    }
    let c = body.blocks[b].succs[0];
    if c == b || has_phi(body, c) {
        return None;
    }

    let preds = std::mem::take(&mut body.blocks[b].preds);
    for (j, &a) in preds.iter().enumerate() {
        replace_succ(body, a, b, c);
        if body.blocks[a].succs[..] == [c, c] {
            // Both arms of `a`'s branch now lead to `c`.
            if let Some(&last) = body.blocks[a].instrs.last() {
                body.node_mut(last).kind = NodeKind::Instr(Instr::Jump);
            }
            body.blocks[a].succs.truncate(1);
            remove_pred(body, c, b);
        } else if j == 0 {
            replace_pred(body, c, b, a);
        } else {
            body.blocks[c].preds.push(a);
        }
    }
    body.blocks[b].succs.clear();
    Some(b)
}

/// Appends the sole successor of `a` to `a` when `a` is its only
/// predecessor. Returns the absorbed block.
fn fuse(body: &mut FunctionBody, a: usize) -> Option<usize> {
    let [b] = body.blocks[a].succs[..] else {
        return None;
    };
    if b == a || b == 0 || Some(b) == body.recover || body.blocks[b].preds.len() != 1 {
        return None;
    }
    // Degenerate && and || leave straight-line φ-nodes behind.
    if has_phi(body, b) {
        return None;
    }

    if let Some(jump) = body.blocks[a].instrs.pop() {
        body.node_mut(jump).block = None;
    }
    let instrs = std::mem::take(&mut body.blocks[b].instrs);
    for &id in &instrs {
        body.node_mut(id).block = Some(a);
    }
    body.blocks[a].instrs.extend(instrs);

    let succs = std::mem::take(&mut body.blocks[b].succs);
    for &c in &succs {
        replace_pred(body, c, b, a);
    }
    body.blocks[a].succs = succs;
    body.blocks[b].preds.clear();
    Some(b)
}

fn has_phi(body: &FunctionBody, b: usize) -> bool {
    body.blocks[b]
        .instrs
        .first()
        .is_some_and(|id| body.instr(*id).is_some_and(Instr::is_phi))
}

fn replace_succ(body: &mut FunctionBody, a: usize, old: usize, new: usize) {
    for s in &mut body.blocks[a].succs {
        if *s == old {
            *s = new;
        }
    }
}

fn replace_pred(body: &mut FunctionBody, c: usize, old: usize, new: usize) {
    for p in &mut body.blocks[c].preds {
        if *p == old {
            *p = new;
        }
    }
}

/// Removes every edge from `p` into `c`, along with the matching φ-edges.
fn remove_pred(body: &mut FunctionBody, c: usize, p: usize) {
    let keep: Vec<bool> = body.blocks[c].preds.iter().map(|q| *q != p).collect();
    if keep.iter().all(|k| *k) {
        return;
    }
    let instrs = body.blocks[c].instrs.clone();
    for id in instrs {
        if let Some(Instr::Phi { edges, .. }) = body.instr_mut(id) {
            let mut i = 0;
            edges.retain(|_| {
                let k = keep.get(i).copied().unwrap_or(true);
                i += 1;
                k
            });
        }
    }
    body.blocks[c].preds.retain(|q| *q != p);
}

#[cfg(test)]
mod tests {
    use gossa_core::ir::{Const, Value};
    use gossa_core::span::Span;
    use gossa_core::types::{BasicKind, Type};

    use super::*;

    fn jump(body: &mut FunctionBody, from: usize, to: usize) {
        body.append(from, Instr::Jump, None, Span::NONE);
        body.add_edge(from, to);
    }

    fn ret(body: &mut FunctionBody, block: usize) {
        body.append(block, Instr::Return { results: Vec::new() }, None, Span::NONE);
    }

    #[test]
    fn fuses_straight_line_and_drops_unreachable() {
        let mut body = FunctionBody::new();
        let entry = body.new_block("entry");
        let next = body.new_block("next");
        let dead = body.new_block("unreachable");
        jump(&mut body, entry, next);
        ret(&mut body, next);
        ret(&mut body, dead);

        assert_eq!(optimize_blocks(&mut body), 2);
        assert_eq!(body.blocks.len(), 1);
        let instrs = &body.blocks[0].instrs;
        assert_eq!(instrs.len(), 1);
        assert!(matches!(body.instr(instrs[0]), Some(Instr::Return { .. })));
    }

    #[test]
    fn threads_empty_arm_and_collapses_degenerate_branch() {
        let mut body = FunctionBody::new();
        let entry = body.new_block("entry");
        let then = body.new_block("if.then");
        let done = body.new_block("if.done");
        let cond = Value::Const(Const::bool(true));
        body.append(entry, Instr::If { cond }, None, Span::NONE);
        body.add_edge(entry, then);
        body.add_edge(entry, done);
        jump(&mut body, then, done);
        ret(&mut body, done);

        optimize_blocks(&mut body);
        assert_eq!(body.blocks.len(), 1);
        assert!(body.blocks[0].preds.is_empty());
        assert!(body.blocks[0].succs.is_empty());
    }

    #[test]
    fn keeps_recover_block() {
        let mut body = FunctionBody::new();
        let entry = body.new_block("entry");
        let exit = body.new_block("exit");
        let recover = body.new_block("recover");
        body.recover = Some(recover);
        let int = Type::basic(BasicKind::Int);
        body.append(entry, Instr::Alloc { heap: false, comment: "x".into() }, Some(Type::pointer(int)), Span::NONE);
        jump(&mut body, entry, exit);
        jump(&mut body, recover, exit);
        ret(&mut body, exit);

        optimize_blocks(&mut body);
        assert_eq!(body.blocks.len(), 3);
        assert_eq!(body.recover, Some(2));
        assert_eq!(body.blocks[1].preds, vec![0, 2]);
    }
}
