//! Register lifting: frame cells that are only ever loaded from and stored
//! to are replaced by SSA values, with φ-nodes placed at the iterated
//! dominance frontier of their definitions.

use std::collections::{HashMap, HashSet};

use gossa_core::error::Result;
use gossa_core::ir::dom::iterated_frontier;
use gossa_core::ir::{Const, DomTree, FunctionBody, Instr, Node, NodeKind, Value, ValueId};
use gossa_core::token::UnaryOp;
use gossa_core::types::Type;

use super::{BodyPass, BodyPassName};

pub struct Lift;

impl BodyPass for Lift {
    fn name(&self) -> BodyPassName {
        BodyPassName::Lift
    }

    fn run(&self, body: &mut FunctionBody) -> Result<usize> {
        Ok(lift(body))
    }
}

/// Lifts every liftable frame cell of `body`. Returns the number of cells
/// lifted; a second run over the result lifts nothing.
pub fn lift(body: &mut FunctionBody) -> usize {
    body.rebuild_referrers();
    let dom = DomTree::compute(body);
    let cells: Vec<ValueId> = body
        .locals
        .iter()
        .copied()
        .filter(|id| is_liftable(body, &dom, *id))
        .collect();
    if cells.is_empty() {
        return 0;
    }

    let slot: HashMap<ValueId, usize> = cells.iter().enumerate().map(|(k, id)| (*id, k)).collect();
    let zeros: Vec<Value> = cells
        .iter()
        .map(|id| {
            let ty = body.node(*id).ty.as_ref().map_or_else(Type::invalid, |t| t.deref().clone());
            Value::Const(Const::zero(ty))
        })
        .collect();

    let phi_cell = insert_phis(body, &dom, &cells, &zeros);
    let (replaced, removed) = rename(body, &dom, &slot, &phi_cell, &zeros);

    for block in &mut body.blocks {
        block.instrs.retain(|id| !removed.contains(id));
    }
    for id in &removed {
        body.node_mut(*id).block = None;
    }
    body.replace_operands(&replaced);
    remove_dead_phis(body, &phi_cell);

    body.locals.retain(|id| !slot.contains_key(id));
    body.rebuild_referrers();
    cells.len()
}

/// A cell can live in registers when it stays in the frame, is not a
/// result slot read by deferred code, and is used only as the address of
/// loads and stores in reachable code.
fn is_liftable(body: &FunctionBody, dom: &DomTree, id: ValueId) -> bool {
    let node = body.node(id);
    if !matches!(node.instr(), Some(Instr::Alloc { heap: false, .. })) {
        return false;
    }
    if !node.block.is_some_and(|b| dom.is_reachable(b)) || body.result_slots.contains(&id) {
        return false;
    }
    let cell = Value::Local(id);
    body.referrers(id).iter().all(|user| {
        let user = body.node(*user);
        if !user.block.is_some_and(|b| dom.is_reachable(b)) {
            return false;
        }
        match user.instr() {
            Some(Instr::UnOp {
                op: UnaryOp::Deref,
                x,
                comma_ok: false,
            }) => *x == cell,
            Some(Instr::Store { addr, val }) => *addr == cell && *val != cell,
            _ => false,
        }
    })
}

/// Places a φ for each cell at the iterated frontier of the blocks that
/// define it, the cell's own block included. Edges start out as the zero
/// value, which is what predecessors unreachable from the entry keep.
fn insert_phis(body: &mut FunctionBody, dom: &DomTree, cells: &[ValueId], zeros: &[Value]) -> HashMap<ValueId, usize> {
    let frontiers = dom.frontiers(body);
    let mut phi_cell = HashMap::new();
    let mut placed: Vec<Vec<ValueId>> = vec![Vec::new(); body.blocks.len()];

    for (k, &cell) in cells.iter().enumerate() {
        let node = body.node(cell);
        let comment = match node.instr() {
            Some(Instr::Alloc { comment, .. }) => comment.clone(),
            _ => String::new(),
        };
        let span = node.span;
        let defs: Vec<usize> = node
            .block
            .into_iter()
            .chain(body.referrers(cell).iter().filter_map(|user| {
                let user = body.node(*user);
                matches!(user.instr(), Some(Instr::Store { .. }))
                    .then_some(user.block)
                    .flatten()
            }))
            .collect();

        for b in iterated_frontier(&frontiers, defs) {
            if !dom.is_reachable(b) {
                continue;
            }
            let Value::Const(zero) = &zeros[k] else {
                continue;
            };
            let edges = vec![zeros[k].clone(); body.blocks[b].preds.len()];
            let id = body.add_node(Node {
                kind: NodeKind::Instr(Instr::Phi {
                    edges,
                    comment: comment.clone(),
                }),
                ty: Some(zero.ty.clone()),
                name: String::new(),
                block: Some(b),
                span,
            });
            placed[b].push(id);
            phi_cell.insert(id, k);
        }
    }

    for (b, phis) in placed.into_iter().enumerate() {
        if !phis.is_empty() {
            body.blocks[b].instrs.splice(0..0, phis);
        }
    }
    phi_cell
}

/// Walks the dominator tree carrying the current value of every cell.
/// Returns the replacement of each removed load and the set of
/// instructions to delete.
fn rename(
    body: &mut FunctionBody,
    dom: &DomTree,
    slot: &HashMap<ValueId, usize>,
    phi_cell: &HashMap<ValueId, usize>,
    zeros: &[Value],
) -> (HashMap<ValueId, Value>, HashSet<ValueId>) {
    let mut replaced = HashMap::new();
    let mut removed = HashSet::new();
    let cell_of = |v: &Value| v.as_local().and_then(|id| slot.get(&id).copied());

    let mut stack = vec![(0usize, vec![None::<Value>; zeros.len()])];
    while let Some((b, mut current)) = stack.pop() {
        for &id in &body.blocks[b].instrs {
            match body.node(id).instr() {
                Some(Instr::Phi { .. }) => {
                    if let Some(&k) = phi_cell.get(&id) {
                        current[k] = Some(Value::Local(id));
                    }
                }
                Some(Instr::Alloc { .. }) => {
                    if let Some(&k) = slot.get(&id) {
                        current[k] = Some(zeros[k].clone());
                        removed.insert(id);
                    }
                }
                Some(Instr::Store { addr, val }) => {
                    if let Some(k) = cell_of(addr) {
                        current[k] = Some(val.clone());
                        removed.insert(id);
                    }
                }
                Some(Instr::UnOp {
                    op: UnaryOp::Deref,
                    x,
                    ..
                }) => {
                    if let Some(k) = cell_of(x) {
                        let value = current[k].clone().unwrap_or_else(|| zeros[k].clone());
                        replaced.insert(id, value);
                        removed.insert(id);
                    }
                }
                _ => {}
            }
        }

        let succs = body.blocks[b].succs.clone();
        for s in succs {
            let positions: Vec<usize> = body.blocks[s]
                .preds
                .iter()
                .enumerate()
                .filter_map(|(j, p)| (*p == b).then_some(j))
                .collect();
            let instrs = body.blocks[s].instrs.clone();
            for id in instrs {
                let Some(&k) = phi_cell.get(&id) else {
                    continue;
                };
                let value = current[k].clone().unwrap_or_else(|| zeros[k].clone());
                if let Some(Instr::Phi { edges, .. }) = body.instr_mut(id) {
                    for &j in &positions {
                        edges[j] = value.clone();
                    }
                }
            }
        }

        for &child in dom.children(b).iter().rev() {
            stack.push((child, current.clone()));
        }
    }
    (replaced, removed)
}

/// Deletes inserted φ-nodes whose value never reaches a non-φ use.
fn remove_dead_phis(body: &mut FunctionBody, phi_cell: &HashMap<ValueId, usize>) {
    body.rebuild_referrers();
    let mut live: HashSet<ValueId> = HashSet::new();
    let mut work: Vec<ValueId> = phi_cell
        .keys()
        .copied()
        .filter(|phi| {
            body.referrers(*phi)
                .iter()
                .any(|user| !body.instr(*user).is_some_and(Instr::is_phi))
        })
        .collect();
    while let Some(phi) = work.pop() {
        if !live.insert(phi) {
            continue;
        }
        if let Some(Instr::Phi { edges, .. }) = body.instr(phi) {
            work.extend(
                edges
                    .iter()
                    .filter_map(Value::as_local)
                    .filter(|id| phi_cell.contains_key(id) && !live.contains(id)),
            );
        }
    }

    let dead: HashSet<ValueId> = phi_cell.keys().copied().filter(|phi| !live.contains(phi)).collect();
    if dead.is_empty() {
        return;
    }
    for block in &mut body.blocks {
        block.instrs.retain(|id| !dead.contains(id));
    }
    for id in dead {
        body.node_mut(id).block = None;
    }
}

#[cfg(test)]
mod tests {
    use gossa_core::span::Span;
    use gossa_core::types::BasicKind;
    use pretty_assertions::assert_eq;

    use super::*;

    fn int(v: i64) -> Value {
        Value::Const(Const::int(Type::basic(BasicKind::Int), v))
    }

    /// x := 1; if c { x = 2 }; return x
    fn diamond() -> (FunctionBody, ValueId) {
        let int_ty = Type::basic(BasicKind::Int);
        let mut body = FunctionBody::new();
        let c = body.add_param("c", Type::basic(BasicKind::Bool), None, Span::NONE);
        let entry = body.new_block("entry");
        let then = body.new_block("if.then");
        let done = body.new_block("if.done");

        let x = body.append(
            entry,
            Instr::Alloc {
                heap: false,
                comment: "x".into(),
            },
            Some(Type::pointer(int_ty.clone())),
            Span::NONE,
        );
        body.locals.push(x);
        body.append(entry, Instr::Store { addr: Value::Local(x), val: int(1) }, None, Span::NONE);
        body.append(entry, Instr::If { cond: Value::Local(c) }, None, Span::NONE);
        body.add_edge(entry, then);
        body.add_edge(entry, done);

        body.append(then, Instr::Store { addr: Value::Local(x), val: int(2) }, None, Span::NONE);
        body.append(then, Instr::Jump, None, Span::NONE);
        body.add_edge(then, done);

        let load = body.append(
            done,
            Instr::UnOp {
                op: UnaryOp::Deref,
                x: Value::Local(x),
                comma_ok: false,
            },
            Some(int_ty),
            Span::NONE,
        );
        let ret = body.append(done, Instr::Return { results: vec![Value::Local(load)] }, None, Span::NONE);
        (body, ret)
    }

    #[test]
    fn places_phi_at_join() {
        let (mut body, ret) = diamond();
        assert_eq!(lift(&mut body), 1);
        assert!(body.locals.is_empty());

        let done = &body.blocks[2];
        assert_eq!(done.instrs.len(), 2);
        let phi = done.instrs[0];
        let Some(Instr::Phi { edges, .. }) = body.instr(phi) else {
            panic!("expected a phi at the start of if.done");
        };
        // preds of if.done are [entry, if.then]
        assert_eq!(edges, &vec![int(1), int(2)]);
        let Some(Instr::Return { results }) = body.instr(ret) else {
            panic!("expected return");
        };
        assert_eq!(results, &vec![Value::Local(phi)]);
        assert!(body.blocks[0].instrs.len() == 1);
    }

    #[test]
    fn second_run_changes_nothing() {
        let (mut body, _) = diamond();
        lift(&mut body);
        let before: Vec<Vec<ValueId>> = body.blocks.iter().map(|b| b.instrs.clone()).collect();
        assert_eq!(lift(&mut body), 0);
        let after: Vec<Vec<ValueId>> = body.blocks.iter().map(|b| b.instrs.clone()).collect();
        assert_eq!(before, after);
    }

    #[test]
    fn result_slots_stay_in_memory() {
        let (mut body, _) = diamond();
        body.result_slots = body.locals.clone();
        assert_eq!(lift(&mut body), 0);
        assert_eq!(body.locals.len(), 1);
    }
}
