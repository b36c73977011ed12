use gossa_core::config::BuilderMode;
use gossa_core::error::Result;
use gossa_core::ir::{Const, Instr, Value};
use gossa_core::token::{BinaryOp, UnaryOp};
use gossa_core::ast::{Block, StmtKind};
use gossa_core::span::Span;
use gossa_core::types::{ChanDir, Object, Signature, Type};
use gossa_ssa::Program;
use pretty_assertions::assert_eq;

mod support;

use support::assertions::{assert_sane, block_of, body, count_where, instrs_where, is_call_of, single_where};
use support::syntax::{bool_ty, int, unit, Source};

#[test]
fn promoted_method_is_reached_through_embedded_fields() -> Result<()> {
    let src = Source::new("promo");
    let c = src.named_type("C", Type::structure(Vec::new()));
    let ptr_c = Type::pointer(c.clone());
    let b = src.named_type(
        "B",
        Type::structure(vec![Object::field(Some(src.pkg.clone()), "C", ptr_c.clone(), true)]),
    );
    let a = src.named_type(
        "A",
        Type::structure(vec![Object::field(Some(src.pkg.clone()), "B", b, true)]),
    );
    let f = src.method_object(&ptr_c, "c", "f", Signature::new(Vec::new(), Vec::new(), false));

    let prog = Program::new(BuilderMode::SANITY_CHECK_FUNCTIONS);
    let mset = prog.method_set(&a)?;
    let entry = mset.lookup(&f.id()).expect("f is promoted to A");
    assert_eq!(entry.selection.index, vec![0, 0, 0]);
    assert!(entry.selection.indirect);

    let wrapper = entry.func.clone().expect("promoted methods have an implementation");
    assert!(wrapper.synthetic.is_some());
    let body = body(&wrapper);

    let fields: Vec<usize> = instrs_where(body, |i| matches!(i, Instr::FieldAddr { .. }))
        .into_iter()
        .filter_map(|id| match body.instr(id) {
            Some(Instr::FieldAddr { field, .. }) => Some(*field),
            _ => None,
        })
        .collect();
    assert_eq!(fields, vec![0, 0]);

    let call = single_where(body, |i| is_call_of(i, &f));
    let Some(Instr::Call(common)) = body.instr(call) else {
        unreachable!()
    };
    let [recv] = common.args.as_slice() else {
        panic!("expected only the receiver, found {:?}", common.args);
    };
    let load = recv.as_local().expect("receiver is loaded from the embedded field");
    assert!(matches!(
        body.instr(load),
        Some(Instr::UnOp {
            op: UnaryOp::Deref,
            ..
        })
    ));
    assert_sane(&wrapper);
    Ok(())
}

#[test]
fn counting_loop_lifts_into_phis() -> Result<()> {
    let mut src = Source::new("counter");
    let inc = src.func_object(
        "inc",
        Signature::new(Vec::new(), vec![Object::var(None, "", int())], false),
    );
    let x = src.local("x", int());
    let i = src.local("i", int());

    let zero = src.int_lit(0);
    let def_x = src.define(&x, zero);
    let zero = src.int_lit(0);
    let def_i = src.define(&i, zero);
    let iv = src.var(&i);
    let three = src.int_lit(3);
    let cond = src.binary(BinaryOp::Lss, iv, three, bool_ty());
    let post = src.inc(&i);
    let bump = src.inc(&x);
    let for_loop = src.stmt(StmtKind::For {
        init: Some(Box::new(def_i)),
        cond: Some(cond),
        post: Some(Box::new(post)),
        body: Block {
            span: Span::NONE,
            stmts: vec![bump],
        },
    });
    let xv = src.var(&x);
    let ret = src.ret(vec![xv]);
    let result = src.result(&int());
    let decl = src.func_decl(&inc, None, Vec::new(), vec![result], Some(vec![def_x, for_loop, ret]));

    let prog = Program::new(BuilderMode::SANITY_CHECK_FUNCTIONS);
    let pkg = src.create(&prog, vec![decl]);
    pkg.build()?;

    let func = pkg.func("inc").expect("inc is a member");
    let body = body(&func);
    assert_eq!(count_where(body, |i| matches!(i, Instr::Alloc { .. })), 0);

    let phis = instrs_where(body, Instr::is_phi);
    assert_eq!(phis.len(), 2, "{}", func.disassembly());
    let header = block_of(body, phis[0]);
    assert_eq!(block_of(body, phis[1]), header);
    for &phi in &phis {
        assert_eq!(body.node(phi).ty, Some(int()));
    }

    let phi_x = phis
        .iter()
        .copied()
        .find(|id| matches!(body.instr(*id), Some(Instr::Phi { comment, .. }) if comment == "x"))
        .expect("x has a phi in the loop header");
    let ret = single_where(body, |i| matches!(i, Instr::Return { .. }));
    let Some(Instr::Return { results }) = body.instr(ret) else {
        unreachable!()
    };
    assert_eq!(results, &vec![Value::Local(phi_x)]);

    let Some(Instr::Phi { edges, .. }) = body.instr(phi_x) else {
        unreachable!()
    };
    assert!(edges.contains(&Value::Const(Const::int(int(), 0))));
    assert!(edges.iter().any(|e| {
        e.as_local()
            .is_some_and(|id| matches!(body.instr(id), Some(Instr::BinOp { op: BinaryOp::Add, .. })))
    }));
    assert_sane(&func);
    Ok(())
}

#[test]
fn method_value_captures_its_receiver() -> Result<()> {
    let mut src = Source::new("bound");
    let t = src.named_type("T", int());
    let m = src.method_object(
        &t,
        "t",
        "m",
        Signature::new(Vec::new(), vec![Object::var(None, "", int())], false),
    );
    let recv = src.param(m.recv().expect("m is a method"));
    let one = src.int_lit(1);
    let ret_one = src.ret(vec![one]);
    let result = src.result(&int());
    let m_decl = src.func_decl(&m, Some(recv), Vec::new(), vec![result], Some(vec![ret_one]));

    let g = src.func_object(
        "g",
        Signature::new(Vec::new(), vec![Object::var(None, "", int())], false),
    );
    let tv = src.local("t", t.clone());
    let fv = src.local("f", Type::signature(Signature::new(Vec::new(), vec![Object::var(None, "", int())], false)));
    let seven = src.const_lit(t.clone(), 7);
    let decl_t = src.local_var(&tv, seven);
    let recv_use = src.var(&tv);
    let method = src.method_value(recv_use, &m);
    let def_f = src.define(&fv, method);
    let callee = src.var(&fv);
    let call = src.call(callee, Vec::new(), int());
    let ret = src.ret(vec![call]);
    let result = src.result(&int());
    let g_decl = src.func_decl(&g, None, Vec::new(), vec![result], Some(vec![decl_t, def_f, ret]));

    let prog = Program::new(BuilderMode::SANITY_CHECK_FUNCTIONS);
    let pkg = src.create(&prog, vec![m_decl, g_decl]);
    pkg.build()?;

    let g_func = pkg.func("g").expect("g is a member");
    let g_body = body(&g_func);
    let closure = single_where(g_body, |i| matches!(i, Instr::MakeClosure { .. }));
    let Some(Instr::MakeClosure {
        func: Value::Function(bound),
        bindings,
    }) = g_body.instr(closure)
    else {
        panic!("expected a closure over a function: {}", g_func.disassembly());
    };
    assert_eq!(bindings.len(), 1);
    assert_eq!(g_body.type_of(&bindings[0]), t);
    assert!(bound.synthetic.is_some());

    let call = single_where(g_body, |i| matches!(i, Instr::Call(_)));
    let Some(Instr::Call(common)) = g_body.instr(call) else {
        unreachable!()
    };
    assert_eq!(common.value, Value::Local(closure));

    let bound_body = body(bound);
    assert_eq!(bound_body.free_vars.len(), 1);
    let inner = single_where(bound_body, |i| is_call_of(i, &m));
    let Some(Instr::Call(inner)) = bound_body.instr(inner) else {
        unreachable!()
    };
    assert_eq!(inner.args, vec![Value::Local(bound_body.free_vars[0])]);
    assert_sane(&g_func);
    assert_sane(bound);
    Ok(())
}

#[test]
fn select_with_default_is_non_blocking() -> Result<()> {
    let mut src = Source::new("sel");
    let chan = Type::chan(ChanDir::Both, int());
    let ch1 = src.local("ch1", chan.clone());
    let ch2 = src.local("ch2", chan);
    let sel = src.func_object(
        "sel",
        Signature::new(vec![ch1.clone(), ch2.clone()], Vec::new(), false),
    );
    let use_fn = src.func_object(
        "use",
        Signature::new(vec![Object::var(None, "v", int())], Vec::new(), false),
    );
    let use_decl = {
        let p = src.local("v", int());
        let p = src.param(&p);
        src.func_decl(&use_fn, None, vec![p], Vec::new(), None)
    };
    let (ok_fn, ok_decl) = src.external_func("ok");
    let (done_fn, done_decl) = src.external_func("done");

    let v = src.local("v", int());
    let from = src.var(&ch1);
    let recv = src.recv(from);
    let recv_case = src.define(&v, recv);
    let callee = src.func_ref(&use_fn);
    let arg = src.var(&v);
    let call_use = src.call(callee, vec![arg], unit());
    let use_stmt = src.expr_stmt(call_use);
    let first = src.comm_clause(Some(recv_case), vec![use_stmt]);

    let to = src.var(&ch2);
    let one = src.int_lit(1);
    let send_case = src.stmt(StmtKind::Send(to, one));
    let callee = src.func_ref(&ok_fn);
    let call_ok = src.call(callee, Vec::new(), unit());
    let ok_stmt = src.expr_stmt(call_ok);
    let second = src.comm_clause(Some(send_case), vec![ok_stmt]);

    let callee = src.func_ref(&done_fn);
    let call_done = src.call(callee, Vec::new(), unit());
    let done_stmt = src.expr_stmt(call_done);
    let default = src.comm_clause(None, vec![done_stmt]);

    let select = src.stmt(StmtKind::Select(vec![first, second, default]));
    let params = vec![src.param(&ch1), src.param(&ch2)];
    let sel_decl = src.func_decl(&sel, None, params, Vec::new(), Some(vec![select]));

    let prog = Program::new(BuilderMode::SANITY_CHECK_FUNCTIONS);
    let pkg = src.create(&prog, vec![use_decl, ok_decl, done_decl, sel_decl]);
    pkg.build()?;

    let func = pkg.func("sel").expect("sel is a member");
    let body = body(&func);
    let select = single_where(body, |i| matches!(i, Instr::Select { .. }));
    let Some(Instr::Select { states, blocking }) = body.instr(select) else {
        unreachable!()
    };
    assert!(!blocking);
    assert_eq!(states.len(), 2);
    assert_eq!(states[0].dir, ChanDir::Recv);
    assert_eq!(states[0].chan, Value::Local(body.params[0]));
    assert_eq!(states[1].dir, ChanDir::Send);
    assert_eq!(states[1].send, Some(Value::Const(Const::int(int(), 1))));

    let extract = |index: usize| {
        single_where(body, |i| {
            matches!(i, Instr::Extract { tuple, index: k } if *tuple == Value::Local(select) && *k == index)
        })
    };
    extract(0);
    let received = extract(2);

    let use_call = single_where(body, |i| is_call_of(i, &use_fn));
    let Some(Instr::Call(common)) = body.instr(use_call) else {
        unreachable!()
    };
    assert_eq!(common.args, vec![Value::Local(received)]);
    assert_eq!(count_where(body, |i| is_call_of(i, &ok_fn)), 1);
    assert_eq!(count_where(body, |i| is_call_of(i, &done_fn)), 1);
    assert!(count_where(body, |i| matches!(i, Instr::If { .. })) >= 2);
    assert_sane(&func);
    Ok(())
}

#[test]
fn interface_assertion_needs_no_boxing() -> Result<()> {
    let mut src = Source::new("assert");
    let interface = |src: &Source, name: &str, method: &str| {
        let t = Type::named(Some(src.pkg.clone()), name);
        let recv = Object::var(Some(src.pkg.clone()), "", t.clone());
        let m = Object::func(
            Some(src.pkg.clone()),
            method,
            Type::signature(Signature::new(Vec::new(), Vec::new(), false).with_recv(recv)),
        );
        t.set_underlying(Type::interface(vec![m], Vec::new()));
        src.pkg
            .insert(Object::type_name(Some(src.pkg.clone()), name, t.clone()));
        t
    };
    let reader = interface(&src, "Reader", "Read");
    let closer = interface(&src, "Closer", "Close");

    let r = src.local("r", reader);
    let f = src.func_object(
        "f",
        Signature::new(vec![r.clone()], vec![Object::var(None, "", closer.clone())], false),
    );
    let rv = src.var(&r);
    let asserted = src.type_assert(rv, &closer);
    let ret = src.ret(vec![asserted]);
    let params = vec![src.param(&r)];
    let result = src.result(&closer);
    let decl = src.func_decl(&f, None, params, vec![result], Some(vec![ret]));

    let prog = Program::new(BuilderMode::SANITY_CHECK_FUNCTIONS);
    let pkg = src.create(&prog, vec![decl]);
    pkg.build()?;

    let func = pkg.func("f").expect("f is a member");
    let body = body(&func);
    let assert = single_where(body, |i| matches!(i, Instr::TypeAssert { .. }));
    let Some(Instr::TypeAssert { x, asserted, comma_ok }) = body.instr(assert) else {
        unreachable!()
    };
    assert_eq!(x, &Value::Local(body.params[0]));
    assert_eq!(asserted, &closer);
    assert!(!comma_ok);

    let ret = single_where(body, |i| matches!(i, Instr::Return { .. }));
    let Some(Instr::Return { results }) = body.instr(ret) else {
        unreachable!()
    };
    assert_eq!(results, &vec![Value::Local(assert)]);
    assert_eq!(count_where(body, |i| matches!(i, Instr::MakeInterface { .. })), 0);
    assert_sane(&func);
    Ok(())
}

#[test]
fn deferred_call_runs_before_the_single_return() -> Result<()> {
    let mut src = Source::new("defer");
    let (g, g_decl) = src.external_func("g");
    let (h, h_decl) = src.external_func("h");
    let f = src.func_object("f", Signature::new(Vec::new(), Vec::new(), false));
    let callee = src.func_ref(&g);
    let call = src.call(callee, Vec::new(), unit());
    let defer = src.stmt(StmtKind::Defer(call));
    let callee = src.func_ref(&h);
    let call = src.call(callee, Vec::new(), unit());
    let call_h = src.expr_stmt(call);
    let decl = src.func_decl(&f, None, Vec::new(), Vec::new(), Some(vec![defer, call_h]));

    let prog = Program::new(BuilderMode::SANITY_CHECK_FUNCTIONS);
    let pkg = src.create(&prog, vec![g_decl, h_decl, decl]);
    pkg.build()?;

    let func = pkg.func("f").expect("f is a member");
    let body = body(&func);
    let recover = body.recover.expect("functions that defer have a recover block");

    let defer = single_where(body, |i| {
        matches!(i, Instr::Defer(call) if call.static_callee().is_some_and(|c| c.object.as_ref() == Some(&g)))
    });
    assert_eq!(block_of(body, defer), 0);
    let call_h = single_where(body, |i| is_call_of(i, &h));
    assert_eq!(block_of(body, call_h), 0);
    let entry = &body.blocks[0].instrs;
    let position = |id| entry.iter().position(|i| *i == id);
    assert!(position(defer) < position(call_h));

    let ret = single_where(body, |i| matches!(i, Instr::Return { .. }));
    let exit = block_of(body, ret);
    let run_defers = single_where(body, |i| matches!(i, Instr::RunDefers));
    assert_eq!(block_of(body, run_defers), exit);
    let exit_instrs = &body.blocks[exit].instrs;
    assert_eq!(exit_instrs[exit_instrs.len() - 2], run_defers);

    assert!(body.blocks[recover].preds.is_empty());
    assert_eq!(body.blocks[recover].succs, vec![exit]);
    let dom = gossa_core::ir::DomTree::compute(body);
    assert!(dom.dominates(0, exit));
    assert_sane(&func);
    Ok(())
}
