use std::sync::Arc;

use gossa_core::ast::{Block, Decl, StmtKind};
use gossa_core::config::BuilderMode;
use gossa_core::error::Result;
use gossa_core::ir::Instr;
use gossa_core::span::Span;
use gossa_core::token::BinaryOp;
use gossa_core::types::{Id, Object, Signature, Type, TypePackage};
use gossa_core::info::TypeInfo;
use gossa_ssa::passes::{BodyPass, Lift};
use gossa_ssa::{Package, Program};
use pretty_assertions::assert_eq;

mod support;

use support::assertions::{assert_sane, body, count_where};
use support::syntax::{any, bool_ty, int, Source};

/// func inc() int { x := 0; for i := 0; i < 3; i++ { x++ }; return x }
fn counter(prog: &Arc<Program>) -> Arc<Package> {
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
    src.create(prog, vec![decl])
}

/// type T int with methods c, a (value receivers) and b (pointer receiver),
/// declared in that order.
fn methods_pkg(prog: &Arc<Program>) -> (Arc<Package>, Type) {
    let mut src = Source::new("methods");
    let t = src.named_type("T", int());
    let ptr_t = Type::pointer(t.clone());
    let mut decls: Vec<Decl> = Vec::new();
    for (name, recv) in [("c", &t), ("a", &t), ("b", &ptr_t)] {
        let m = src.method_object(recv, "t", name, Signature::new(Vec::new(), Vec::new(), false));
        let recv = src.param(m.recv().expect("declared as a method"));
        decls.push(src.func_decl(&m, Some(recv), Vec::new(), Vec::new(), Some(Vec::new())));
    }
    (src.create(prog, decls), t)
}

fn names(ids: &[Id]) -> Vec<String> {
    ids.iter().map(|id| id.name.clone()).collect()
}

#[test]
fn every_function_passes_the_sanity_check() -> Result<()> {
    let prog = Program::new(BuilderMode::SANITY_CHECK_FUNCTIONS | BuilderMode::BUILD_SERIALLY);
    counter(&prog);
    let (_, t) = methods_pkg(&prog);
    prog.method_set(&Type::pointer(t))?;
    prog.build()?;

    let funcs = prog.all_functions();
    assert!(funcs.iter().any(|f| f.synthetic.is_some()));
    for func in &funcs {
        assert_sane(func);
    }
    assert!(prog.failures().is_empty());
    Ok(())
}

#[test]
fn naive_form_keeps_locals_in_memory() -> Result<()> {
    let prog = Program::new(BuilderMode::NAIVE_FORM);
    let pkg = counter(&prog);
    pkg.build()?;

    let func = pkg.func("inc").expect("inc is a member");
    let body = body(&func);
    assert_eq!(count_where(body, |i| matches!(i, Instr::Alloc { .. })), 2);
    assert_eq!(count_where(body, Instr::is_phi), 0);
    assert_eq!(body.locals.len(), 2);
    assert_sane(&func);
    Ok(())
}

#[test]
fn lifting_a_built_body_again_changes_nothing() -> Result<()> {
    let prog = Program::new(BuilderMode::empty());
    let pkg = counter(&prog);
    pkg.build()?;

    let func = pkg.func("inc").expect("inc is a member");
    let mut copy = body(&func).clone();
    assert_eq!(Lift.run(&mut copy)?, 0);
    assert_eq!(copy.blocks.len(), body(&func).blocks.len());
    Ok(())
}

#[test]
fn building_twice_is_a_no_op() -> Result<()> {
    let prog = Program::new(BuilderMode::empty());
    let pkg = counter(&prog);
    pkg.build()?;
    let before = pkg.func("inc").expect("inc is a member");
    let first = before.disassembly();
    pkg.build()?;
    prog.build()?;
    let after = pkg.func("inc").expect("inc is a member");
    assert!(Arc::ptr_eq(&before, &after));
    assert_eq!(after.disassembly(), first);
    Ok(())
}

#[test]
fn method_sets_are_sorted_and_stable() -> Result<()> {
    let prog = Program::new(BuilderMode::SANITY_CHECK_FUNCTIONS);
    let (_, t) = methods_pkg(&prog);
    let ptr_t = Type::pointer(t.clone());

    let values = prog.method_set(&t)?;
    assert_eq!(names(&values.ids()), vec!["a", "c"]);
    assert!(values.iter().all(|e| e.func.as_ref().is_some_and(|f| f.synthetic.is_none())));

    let pointers = prog.method_set(&ptr_t)?;
    assert_eq!(names(&pointers.ids()), vec!["a", "b", "c"]);
    let a = pointers
        .iter()
        .find(|e| e.id.name == "a")
        .and_then(|e| e.func.clone())
        .expect("value methods are in the pointer method set");
    assert!(a.synthetic.is_some());
    assert_sane(&a);

    let again = prog.method_set(&ptr_t)?;
    assert!(Arc::ptr_eq(&pointers, &again));
    assert_eq!(again.ids(), pointers.ids());
    Ok(())
}

#[test]
fn creating_a_package_twice_fails() {
    let prog = Program::new(BuilderMode::empty());
    counter(&prog);
    let pkg = TypePackage::new("counter", "counter");
    let err = prog
        .create_package(pkg, Vec::new(), TypeInfo::new())
        .expect_err("the path is taken");
    assert!(err.to_string().contains("counter"));
}

#[test]
fn boxing_a_value_records_its_runtime_type() -> Result<()> {
    let mut src = Source::new("boxing");
    let any = Type::interface(Vec::new(), Vec::new());
    let f = src.func_object(
        "f",
        Signature::new(Vec::new(), vec![Object::var(None, "", any.clone())], false),
    );
    let one = src.int_lit(1);
    let ret = src.ret(vec![one]);
    let result = src.result(&any);
    let decl = src.func_decl(&f, None, Vec::new(), vec![result], Some(vec![ret]));

    let prog = Program::new(BuilderMode::SANITY_CHECK_FUNCTIONS);
    let pkg = src.create(&prog, vec![decl]);
    pkg.build()?;

    let func = pkg.func("f").expect("f is a member");
    assert_eq!(count_where(body(&func), |i| matches!(i, Instr::MakeInterface { .. })), 1);
    assert!(prog.runtime_types().contains(&int()));
    Ok(())
}

#[test]
fn boxing_a_value_creates_its_promotion_wrappers() -> Result<()> {
    // type C struct{}; func (*C) f() {}
    // type B struct{ *C }; type A struct{ B }
    // func g(x A) any { return x }
    let mut src = Source::new("boxing");
    let c = src.named_type("C", Type::structure(Vec::new()));
    let ptr_c = Type::pointer(c);
    let b = src.named_type(
        "B",
        Type::structure(vec![Object::field(Some(src.pkg.clone()), "C", ptr_c.clone(), true)]),
    );
    let a = src.named_type(
        "A",
        Type::structure(vec![Object::field(Some(src.pkg.clone()), "B", b, true)]),
    );
    let f = src.method_object(&ptr_c, "c", "f", Signature::new(Vec::new(), Vec::new(), false));
    let recv = src.param(f.recv().expect("f is a method"));
    let f_decl = src.func_decl(&f, Some(recv), Vec::new(), Vec::new(), Some(Vec::new()));
    let x = src.local("x", a.clone());
    let xv = src.var(&x);
    let ret = src.ret(vec![xv]);
    let (_, g_decl) = src.func_with_body("g", &[x], &[any()], vec![ret]);

    let prog = Program::new(BuilderMode::SANITY_CHECK_FUNCTIONS);
    let pkg = src.create(&prog, vec![f_decl, g_decl]);
    pkg.build()?;

    // Nothing asked for A's method set; boxing x must have created it.
    let wrapper = prog
        .all_functions()
        .into_iter()
        .find(|func| func.synthetic.is_some() && func.name == "f" && func.qualifier.as_ref() == Some(&a))
        .expect("the wrapper promoting f to A exists");
    assert!(wrapper.is_built());
    assert_sane(&wrapper);
    assert!(prog.runtime_types().contains(&a));
    assert!(prog.failures().is_empty());
    Ok(())
}

#[test]
fn logging_modes_build_the_same_code() -> Result<()> {
    support::init_logging();
    let quiet = Program::new(BuilderMode::empty());
    let loud = Program::new(BuilderMode::PRINT_PACKAGES | BuilderMode::PRINT_FUNCTIONS | BuilderMode::LOG_FUNCTIONS);
    let a = counter(&quiet);
    let b = counter(&loud);
    a.build()?;
    b.build()?;
    let listing = |pkg: &Package| pkg.func("inc").expect("inc is a member").disassembly();
    assert_eq!(listing(&a), listing(&b));
    Ok(())
}
