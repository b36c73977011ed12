//! Structural checks over a finished function body. Every violation is
//! reported; the first one found does not stop the walk.

use std::collections::HashMap;

use gossa_core::error::Result;
use gossa_core::ir::{DomTree, Function, FunctionBody, Instr, NodeKind, Value, ValueId};
use gossa_core::types::assignable_to;
use itertools::Itertools;

use crate::error::invariant_error;

/// Checks the published body of `func`. Functions without a body pass.
pub fn sanity_check(func: &Function) -> Result<()> {
    match func.body() {
        Some(body) => sanity_check_body(func, body),
        None => Ok(()),
    }
}

/// Checks `body` as the body of `func`.
pub fn sanity_check_body(func: &Function, body: &FunctionBody) -> Result<()> {
    let mut checker = Sanity {
        func,
        body,
        dom: DomTree::compute(body),
        position: HashMap::new(),
        diagnostics: Vec::new(),
    };
    checker.check();
    if checker.diagnostics.is_empty() {
        return Ok(());
    }
    Err(invariant_error(
        func.relative_name(None),
        format!("sanity check failed: {}", checker.diagnostics.iter().join("; ")),
    ))
}

struct Sanity<'a> {
    func: &'a Function,
    body: &'a FunctionBody,
    dom: DomTree,
    /// Index of each live instruction within its block.
    position: HashMap<ValueId, usize>,
    diagnostics: Vec<String>,
}

impl Sanity<'_> {
    fn report(&mut self, message: String) {
        self.diagnostics.push(message);
    }

    fn check(&mut self) {
        let body = self.body;
        if body.blocks.is_empty() {
            self.report("function has a body but no blocks".into());
            return;
        }
        for block in &body.blocks {
            for (i, id) in block.instrs.iter().enumerate() {
                self.position.insert(*id, i);
            }
        }
        if let Some(r) = body.recover {
            if r >= body.blocks.len() {
                self.report(format!("recover block {r} does not exist"));
            } else if !body.blocks[r].preds.is_empty() {
                self.report(format!("recover block {r} has predecessors"));
            }
        }

        self.check_signature();
        for b in 0..body.blocks.len() {
            self.check_block(b);
        }
        for id in body.live_instrs() {
            self.check_operands(id);
        }
        for &local in &body.locals {
            let node = body.node(local);
            if node.block.is_none() || !matches!(node.instr(), Some(Instr::Alloc { heap: false, .. })) {
                self.report(format!("local {} is not a frame allocation", node.name));
            }
        }
        let func = self.func;
        for anon in &body.anon_funcs {
            let nested = anon.parent().is_some_and(|p| std::ptr::eq(std::sync::Arc::as_ptr(&p), func));
            if !nested {
                self.report(format!("anonymous function {} has the wrong parent", anon.name));
            }
        }
    }

    fn check_signature(&mut self) {
        let body = self.body;
        let sig = &self.func.sig;
        let expected = sig.params.len() + usize::from(sig.recv.is_some());
        if body.params.len() != expected {
            self.report(format!("{} parameters, signature has {}", body.params.len(), expected));
        }
        for (i, &param) in body.params.iter().enumerate() {
            if !matches!(body.node(param).kind, NodeKind::Parameter(_)) {
                self.report(format!("parameter {i} is not a parameter node"));
            }
        }
        for (i, &fv) in body.free_vars.iter().enumerate() {
            if !matches!(body.node(fv).kind, NodeKind::FreeVar) {
                self.report(format!("free variable {i} is not a free variable node"));
            }
        }
    }

    fn check_block(&mut self, b: usize) {
        let body = self.body;
        let block = &body.blocks[b];
        if block.index != b {
            self.report(format!("block {b} is numbered {}", block.index));
        }
        if b != 0 && Some(b) != body.recover && block.preds.is_empty() {
            self.report(format!("block {b} ({}) is unreachable", block.comment));
        }
        let Some(&last) = block.instrs.last() else {
            self.report(format!("block {b} ({}) is empty", block.comment));
            return;
        };

        for (i, s) in block.succs.iter().enumerate() {
            if block.succs[..i].contains(s) {
                self.report(format!("block {b} has two edges to block {s}"));
            }
            let back = body.blocks.get(*s).is_some_and(|sb| sb.preds.contains(&b));
            if !back {
                self.report(format!("block {b} has successor {s} that does not list it as predecessor"));
            }
        }
        for p in &block.preds {
            let fwd = body.blocks.get(*p).is_some_and(|pb| pb.succs.contains(&b));
            if !fwd {
                self.report(format!("block {b} has predecessor {p} that does not list it as successor"));
            }
        }

        let mut phis_done = false;
        for &id in &block.instrs {
            let node = body.node(id);
            if node.block != Some(b) {
                self.report(format!("{} is in block {b} but records {:?}", node.name, node.block));
            }
            let Some(instr) = node.instr() else {
                self.report(format!("block {b} lists {} which is not an instruction", node.name));
                continue;
            };
            if instr.is_terminator() && id != last {
                self.report(format!("{} in block {b} is followed by more instructions", instr.mnemonic()));
            }
            if produces_value(instr) != node.ty.is_some() {
                self.report(format!("{} {} has the wrong kind of result", instr.mnemonic(), node.name));
            }
            match instr {
                Instr::Phi { edges, .. } => {
                    if phis_done {
                        self.report(format!("phi {} in block {b} follows other instructions", node.name));
                    }
                    if edges.len() != block.preds.len() {
                        self.report(format!(
                            "phi {} has {} edges but block {b} has {} predecessors",
                            node.name,
                            edges.len(),
                            block.preds.len()
                        ));
                    }
                    if let Some(ty) = &node.ty {
                        for edge in edges {
                            let et = body.type_of(edge);
                            if !assignable_to(&et, ty) {
                                self.report(format!("phi {} of type {ty} has an edge of type {et}", node.name));
                            }
                        }
                    }
                }
                Instr::Return { results } if results.len() != self.func.sig.results.len() => {
                    self.report(format!(
                        "return of {} values from a function with {} results",
                        results.len(),
                        self.func.sig.results.len()
                    ));
                    phis_done = true;
                }
                _ => phis_done = true,
            }
            if let Some(call) = instr.call_common() {
                if !matches!(call.value, Value::Builtin(_)) {
                    let callee_ty = body.type_of(&call.value);
                    match call.signature(&callee_ty) {
                        Some(sig) => {
                            let sig = if call.invoke.is_none() { sig.with_recv_as_param() } else { sig };
                            if sig.params.len() != call.args.len() {
                                self.report(format!(
                                    "call of {} with {} arguments, {} expected",
                                    body.operand_name(&call.value, None),
                                    call.args.len(),
                                    sig.params.len()
                                ));
                            }
                        }
                        None => self.report(format!("call of non-function {}", body.operand_name(&call.value, None))),
                    }
                }
            }
        }

        let Some(terminator) = body.instr(last) else {
            return;
        };
        match terminator.successor_count() {
            None => self.report(format!("block {b} ({}) does not end in a terminator", block.comment)),
            Some(n) if n != block.succs.len() => self.report(format!(
                "{} ending block {b} needs {n} successors, block has {}",
                terminator.mnemonic(),
                block.succs.len()
            )),
            Some(_) => {}
        }
    }

    fn check_operands(&mut self, user: ValueId) {
        let body = self.body;
        let node = body.node(user);
        let (Some(instr), Some(b)) = (node.instr(), node.block) else {
            return;
        };
        let is_phi = instr.is_phi();
        for (i, operand) in instr.operands().into_iter().enumerate() {
            let Value::Local(used) = operand else {
                continue;
            };
            let Some(def) = body.nodes.get(used.index()) else {
                self.report(format!("{} uses nonexistent value %{}", node.name, used.0));
                continue;
            };
            if !body.referrers(*used).contains(&user) {
                self.report(format!("{} is missing from the referrers of {}", node.name, def.name));
            }
            let def_block = match def.kind {
                NodeKind::Parameter(_) | NodeKind::FreeVar => continue,
                NodeKind::Instr(_) => def.block,
            };
            let Some(def_block) = def_block else {
                self.report(format!("{} uses removed instruction {}", node.name, def.name));
                continue;
            };
            // A φ uses its edge at the end of the matching predecessor.
            let use_block = if is_phi {
                match body.blocks[b].preds.get(i) {
                    Some(p) => *p,
                    None => continue,
                }
            } else {
                b
            };
            if !self.dom.is_reachable(use_block) {
                continue;
            }
            let dominated = if def_block == use_block && !is_phi {
                self.position.get(used) < self.position.get(&user)
            } else {
                self.dom.dominates(def_block, use_block)
            };
            if !dominated {
                self.report(format!("{} does not dominate its use in {}", def.name, node.name));
            }
        }
    }
}

fn produces_value(instr: &Instr) -> bool {
    !matches!(
        instr,
        Instr::Jump
            | Instr::If { .. }
            | Instr::Return { .. }
            | Instr::Panic { .. }
            | Instr::Store { .. }
            | Instr::MapUpdate { .. }
            | Instr::Send { .. }
            | Instr::Go(_)
            | Instr::Defer(_)
            | Instr::RunDefers
    )
}

#[cfg(test)]
mod tests {
    use gossa_core::span::Span;
    use gossa_core::types::Signature;

    use super::*;

    fn empty_func() -> Function {
        Function::new("f", Signature::new(Vec::new(), Vec::new(), false))
    }

    #[test]
    fn accepts_minimal_body() {
        let mut body = FunctionBody::new();
        let entry = body.new_block("entry");
        body.append(entry, Instr::Return { results: Vec::new() }, None, Span::NONE);
        body.rebuild_referrers();
        assert!(sanity_check_body(&empty_func(), &body).is_ok());
    }

    #[test]
    fn rejects_missing_terminator_and_dangling_edge() {
        let mut body = FunctionBody::new();
        let entry = body.new_block("entry");
        let next = body.new_block("next");
        body.append(entry, Instr::RunDefers, None, Span::NONE);
        body.blocks[entry].succs.push(next);
        body.append(next, Instr::Return { results: Vec::new() }, None, Span::NONE);
        body.rebuild_referrers();

        let err = sanity_check_body(&empty_func(), &body).unwrap_err();
        assert!(err.is_invariant());
        let message = err.to_string();
        assert!(message.contains("does not end in a terminator"), "{message}");
        assert!(message.contains("does not list it as predecessor"), "{message}");
    }
}
