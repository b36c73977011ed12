#![allow(dead_code)]
use gossa_core::ir::{Function, FunctionBody, Instr, ValueId};
use gossa_core::types::Object;
use gossa_ssa::sanity_check;

pub fn body(func: &Function) -> &FunctionBody {
    func.body()
        .unwrap_or_else(|| panic!("{} has no body", func.relative_name(None)))
}

/// Live instructions of `body` matching `pred`, in block order.
pub fn instrs_where(body: &FunctionBody, pred: impl Fn(&Instr) -> bool) -> Vec<ValueId> {
    body.live_instrs()
        .filter(|id| body.instr(*id).is_some_and(&pred))
        .collect()
}

pub fn count_where(body: &FunctionBody, pred: impl Fn(&Instr) -> bool) -> usize {
    instrs_where(body, pred).len()
}

pub fn single_where(body: &FunctionBody, pred: impl Fn(&Instr) -> bool) -> ValueId {
    let found = instrs_where(body, pred);
    assert_eq!(found.len(), 1, "expected exactly one match, found {found:?}");
    found[0]
}

/// A static call of the function declared by `callee`.
pub fn is_call_of(instr: &Instr, callee: &Object) -> bool {
    matches!(instr, Instr::Call(call)
        if call.static_callee().is_some_and(|f| f.object.as_ref() == Some(callee)))
}

/// The call instruction `id` of `body`.
pub fn call_at(body: &FunctionBody, id: ValueId) -> &gossa_core::ir::CallCommon {
    match body.instr(id) {
        Some(Instr::Call(call)) => call,
        other => panic!("{id:?} is not a call: {other:?}"),
    }
}

pub fn block_of(body: &FunctionBody, id: ValueId) -> usize {
    body.node(id).block.expect("instruction is placed")
}

pub fn assert_sane(func: &Function) {
    if let Err(err) = sanity_check(func) {
        panic!("{err}\n{}", func.disassembly());
    }
}
