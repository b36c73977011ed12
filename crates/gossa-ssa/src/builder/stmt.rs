use std::sync::LazyLock;

use gossa_core::ast::{
    CaseClause, CommClause, Expr, ExprKind, GenDecl, Ident, Spec, Stmt, StmtKind, ValueSpec,
};
use gossa_core::constant::ConstValue;
use gossa_core::error::Result;
use gossa_core::ir::{CallCommon, Const, Instr, SelectState, Value};
use gossa_core::span::Span;
use gossa_core::token::{AssignOp, BinaryOp, BranchKind, UnaryOp};
use gossa_core::types::{BasicKind, BuiltinKind, ChanDir, Object, Signature, Type, TypeKind};

use crate::builder::expr::int_const;
use crate::builder::{Builder, Lvalue, StoreBuf};
use crate::emit::{LabelBlocks, Targets};
use crate::{build_bail, invariant_bail};

/// The type of the iterator produced by `Range`.
static RANGE_ITER: LazyLock<Type> = LazyLock::new(|| {
    let iter = Type::named(None, "iter");
    iter.set_underlying(Type::invalid());
    iter
});

impl Builder<'_> {
    pub fn stmt_list(&mut self, stmts: &[Stmt]) -> Result<()> {
        for s in stmts {
            self.stmt(s, None)?;
        }
        Ok(())
    }

    /// Lowers one statement. `label` names the statement when it is the
    /// target of a labelled `break` or `continue`.
    fn stmt(&mut self, s: &Stmt, label: Option<&str>) -> Result<()> {
        match &s.kind {
            StmtKind::Empty => Ok(()),
            StmtKind::Decl(decl) => self.decl_stmt(decl),
            StmtKind::Labeled(name, inner) => {
                let target = self.labelled_block(&name.name).goto_block;
                self.fs.emit_jump(target);
                self.fs.current = Some(target);
                self.stmt(inner, Some(&name.name))
            }
            StmtKind::Expr(e) => {
                self.expr(e)?;
                Ok(())
            }
            StmtKind::Send(ch, x) => {
                let ct = self.type_of(ch)?;
                let Some(elem) = ct.elem() else {
                    build_bail!(self.name(), s.span, "send to non-channel {ct}");
                };
                let chan = self.expr(ch)?;
                let x = self.expr(x)?;
                let x = self.fs.emit_conv(self.prog, x, &elem, s.span)?;
                self.fs.emit(Instr::Send { chan, x }, None, s.span);
                Ok(())
            }
            StmtKind::IncDec { x, inc } => {
                let op = if *inc { BinaryOp::Add } else { BinaryOp::Sub };
                let loc = self.addr(x, false)?;
                let one = Value::Const(Const::int(loc.ty(self), 1));
                self.assign_op(&loc, one, op, s.span)
            }
            StmtKind::Assign { lhs, op, rhs } => match op {
                AssignOp::Assign | AssignOp::Define => self.assign_stmt(lhs, rhs, *op == AssignOp::Define),
                AssignOp::Op(op) => {
                    let ([x], [y]) = (lhs.as_slice(), rhs.as_slice()) else {
                        build_bail!(self.name(), s.span, "{}= takes one operand on each side", op.as_str());
                    };
                    let loc = self.addr(x, false)?;
                    let y = self.expr(y)?;
                    self.assign_op(&loc, y, *op, s.span)
                }
            },
            StmtKind::Go(e) => {
                let call = self.deferred_call(e)?;
                self.fs.emit(Instr::Go(call), None, s.span);
                Ok(())
            }
            StmtKind::Defer(e) => {
                let call = self.deferred_call(e)?;
                self.fs.emit(Instr::Defer(call), None, s.span);
                Ok(())
            }
            StmtKind::Return(results) => self.return_stmt(results, s.span),
            StmtKind::Branch(kind, name) => self.branch_stmt(*kind, name.as_ref(), s.span),
            StmtKind::Block(block) => self.stmt_list(&block.stmts),
            StmtKind::If { init, cond, then, els } => {
                if let Some(init) = init {
                    self.stmt(init, None)?;
                }
                let then_block = self.fs.new_block("if.then");
                let done = self.fs.new_block("if.done");
                let else_block = match els {
                    Some(_) => self.fs.new_block("if.else"),
                    None => done,
                };
                self.cond(cond, then_block, else_block)?;
                self.fs.current = Some(then_block);
                self.stmt_list(&then.stmts)?;
                self.fs.emit_jump(done);
                if let Some(els) = els {
                    self.fs.current = Some(else_block);
                    self.stmt(els, None)?;
                    self.fs.emit_jump(done);
                }
                self.fs.current = Some(done);
                Ok(())
            }
            StmtKind::Switch { init, tag, body } => self.switch_stmt(init.as_deref(), tag.as_ref(), body, label),
            StmtKind::TypeSwitch { init, assign, body } => self.type_switch_stmt(init.as_deref(), assign, body, label),
            StmtKind::Select(clauses) => self.select_stmt(clauses, s.span, label),
            StmtKind::For { init, cond, post, body } => {
                if let Some(init) = init {
                    self.stmt(init, None)?;
                }
                let body_block = self.fs.new_block("for.body");
                let done = self.fs.new_block("for.done");
                let loop_block = match cond {
                    Some(_) => self.fs.new_block("for.loop"),
                    None => body_block,
                };
                let cont = match post {
                    Some(_) => self.fs.new_block("for.post"),
                    None => loop_block,
                };
                self.set_label_targets(label, done, Some(cont));
                self.fs.emit_jump(loop_block);
                self.fs.current = Some(loop_block);
                if let Some(cond) = cond {
                    self.cond(cond, body_block, done)?;
                    self.fs.current = Some(body_block);
                }
                self.with_targets(
                    Targets {
                        break_block: Some(done),
                        continue_block: Some(cont),
                        fallthrough_block: None,
                    },
                    |b| b.stmt_list(&body.stmts),
                )?;
                self.fs.emit_jump(cont);
                if let Some(post) = post {
                    self.fs.current = Some(cont);
                    self.stmt(post, None)?;
                    self.fs.emit_jump(loop_block);
                }
                self.fs.current = Some(done);
                Ok(())
            }
            StmtKind::Range {
                key,
                value,
                define,
                x,
                body,
            } => self.range_stmt(key.as_ref(), value.as_ref(), *define, x, &body.stmts, s.span, label),
        }
    }

    /// `x op= y` and `x++`.
    fn assign_op(&mut self, loc: &Lvalue, y: Value, op: BinaryOp, span: Span) -> Result<()> {
        let ty = loc.ty(self);
        let old = loc.load(self)?;
        let new = self.fs.emit_arith(self.prog, op, old, y, &ty, span)?;
        loc.store(self, new)
    }

    /// `a, b = x, y`, `a, b := f()` and friends. With several operands on
    /// each side every right-hand side is evaluated before any store.
    fn assign_stmt(&mut self, lhs: &[Expr], rhs: &[Expr], define: bool) -> Result<()> {
        let mut lvalues = Vec::with_capacity(lhs.len());
        for e in lhs {
            if e.is_blank() {
                lvalues.push(Lvalue::Blank);
                continue;
            }
            if define {
                self.define_local(e)?;
            }
            lvalues.push(self.addr(e, false)?);
        }

        if lhs.len() == rhs.len() {
            if let ([lvalue], [e]) = (lvalues.as_slice(), rhs) {
                return self.assign(lvalue.clone(), e, None);
            }
            let mut sb = StoreBuf::default();
            for (lvalue, e) in lvalues.into_iter().zip(rhs) {
                self.assign(lvalue, e, Some(&mut sb))?;
            }
            return sb.emit(self);
        }

        let [e] = rhs else {
            build_bail!(self.name(), Span::NONE, "assignment mismatch: {} = {}", lhs.len(), rhs.len());
        };
        let tuple = self.expr_n(e)?;
        for (i, lvalue) in lvalues.iter().enumerate() {
            let v = self.fs.emit_extract(tuple.clone(), i)?;
            lvalue.store(self, v)?;
        }
        Ok(())
    }

    /// Declares a fresh local when the identifier `e` defines one; a
    /// redeclared variable of `:=` keeps its cell.
    fn define_local(&mut self, e: &Expr) -> Result<()> {
        if let Some(Some(obj)) = self.info.defs.get(&e.id) {
            self.add_named_local(obj, e.span);
        }
        Ok(())
    }

    fn add_named_local(&mut self, obj: &Object, span: Span) -> Value {
        let cell = self.fs.add_local(obj.ty().clone(), obj.name(), span);
        self.fs.objects.insert(obj.clone(), cell.clone());
        cell
    }

    fn decl_stmt(&mut self, decl: &GenDecl) -> Result<()> {
        for spec in &decl.specs {
            match spec {
                Spec::Value(spec) if !spec.is_const => self.local_value_spec(spec)?,
                // Constants and types produce no code.
                _ => {}
            }
        }
        Ok(())
    }

    /// `var a, b T = x, y` inside a function.
    fn local_value_spec(&mut self, spec: &ValueSpec) -> Result<()> {
        let lvalue = |b: &mut Self, id: &Ident| -> Result<Lvalue> {
            if id.is_blank() {
                return Ok(Lvalue::Blank);
            }
            let cell = b.local_for_ident(id)?;
            Ok(Lvalue::address(cell, id.span))
        };
        if spec.values.len() == spec.names.len() {
            for (id, value) in spec.names.iter().zip(&spec.values) {
                let lv = lvalue(self, id)?;
                self.assign(lv, value, None)?;
            }
        } else if spec.values.is_empty() {
            // Cells start out zeroed.
            for id in &spec.names {
                lvalue(self, id)?;
            }
        } else {
            let [value] = spec.values.as_slice() else {
                build_bail!(self.name(), spec.span, "assignment mismatch in var declaration");
            };
            let tuple = self.expr_n(value)?;
            for (i, id) in spec.names.iter().enumerate() {
                let lv = lvalue(self, id)?;
                if !matches!(lv, Lvalue::Blank) {
                    let v = self.fs.emit_extract(tuple.clone(), i)?;
                    lv.store(self, v)?;
                }
            }
        }
        Ok(())
    }

    /// The call of a `go` or `defer` statement.
    fn deferred_call(&mut self, e: &Expr) -> Result<CallCommon> {
        let call = e.unparen();
        let ExprKind::Call { fun, args, ellipsis } = &call.kind else {
            build_bail!(self.name(), e.span, "expression in go or defer must be a call");
        };
        self.call_common(call, fun, args, *ellipsis)
    }

    fn return_stmt(&mut self, exprs: &[Expr], span: Span) -> Result<()> {
        let sig = self.fs.func.sig.clone();
        let mut results = Vec::with_capacity(sig.results.len());
        if let ([e], true) = (exprs, sig.results.len() > 1) {
            // return f() where f has several results.
            let tuple = self.expr_n(e)?;
            for (i, var) in sig.results.iter().enumerate() {
                let v = self.fs.emit_extract(tuple.clone(), i)?;
                results.push(self.fs.emit_conv(self.prog, v, var.ty(), span)?);
            }
        } else {
            for (e, var) in exprs.iter().zip(&sig.results) {
                let v = self.expr(e)?;
                results.push(self.fs.emit_conv(self.prog, v, var.ty(), span)?);
            }
        }
        self.emit_return(results, span)?;
        self.fs.current = Some(self.fs.new_block("unreachable"));
        Ok(())
    }

    fn branch_stmt(&mut self, kind: BranchKind, name: Option<&Ident>, span: Span) -> Result<()> {
        let innermost = |b: &Self, pick: fn(&Targets) -> Option<usize>| b.fs.targets.iter().rev().find_map(pick);
        let target = match (kind, name) {
            (BranchKind::Goto, Some(name)) => Some(self.labelled_block(&name.name).goto_block),
            (BranchKind::Break, Some(name)) => self.labelled_block(&name.name).break_block,
            (BranchKind::Continue, Some(name)) => self.labelled_block(&name.name).continue_block,
            (BranchKind::Break, None) => innermost(self, |t| t.break_block),
            (BranchKind::Continue, None) => innermost(self, |t| t.continue_block),
            (BranchKind::Fallthrough, _) => innermost(self, |t| t.fallthrough_block),
            (BranchKind::Goto, None) => None,
        };
        let Some(target) = target else {
            build_bail!(self.name(), span, "branch statement has no target");
        };
        self.fs.emit_jump(target);
        self.fs.current = Some(self.fs.new_block("unreachable"));
        Ok(())
    }

    /// The blocks of label `name`, created on first mention so that a
    /// `goto` may precede its label.
    fn labelled_block(&mut self, name: &str) -> LabelBlocks {
        if let Some(blocks) = self.fs.labels.get(name) {
            return *blocks;
        }
        let blocks = LabelBlocks {
            goto_block: self.fs.new_block(name),
            break_block: None,
            continue_block: None,
        };
        self.fs.labels.insert(name.to_string(), blocks);
        blocks
    }

    fn set_label_targets(&mut self, label: Option<&str>, break_block: usize, continue_block: Option<usize>) {
        let Some(label) = label else {
            return;
        };
        if let Some(blocks) = self.fs.labels.get_mut(label) {
            blocks.break_block = Some(break_block);
            blocks.continue_block = continue_block;
        }
    }

    fn with_targets(&mut self, targets: Targets, f: impl FnOnce(&mut Self) -> Result<()>) -> Result<()> {
        self.fs.targets.push(targets);
        let result = f(self);
        self.fs.targets.pop();
        result
    }

    /// An expression switch: a chain of comparisons against the tag, with
    /// `default` tried last wherever it appears.
    fn switch_stmt(
        &mut self,
        init: Option<&Stmt>,
        tag: Option<&Expr>,
        clauses: &[CaseClause],
        label: Option<&str>,
    ) -> Result<()> {
        if let Some(init) = init {
            self.stmt(init, None)?;
        }
        let tag = match tag {
            Some(tag) => self.expr(tag)?,
            None => Value::Const(Const::bool(true)),
        };
        let done = self.fs.new_block("switch.done");
        self.set_label_targets(label, done, None);

        let mut default = None;
        let mut fallthrough = None;
        for (i, clause) in clauses.iter().enumerate() {
            let body = match fallthrough {
                Some(block) => block,
                None => self.fs.new_block("switch.body"),
            };
            let next_body = if i + 1 < clauses.len() {
                self.fs.new_block("switch.body")
            } else {
                done
            };
            fallthrough = Some(next_body);
            if clause.is_default() {
                default = Some((clause, body, next_body));
                continue;
            }

            let mut next_cond = None;
            for case in &clause.list {
                let next = self.fs.new_block("switch.next");
                let v = self.expr(case)?;
                let eq = self.fs.emit_compare(self.prog, BinaryOp::Eql, tag.clone(), v, case.span)?;
                self.fs.emit_if(eq, body, next);
                self.fs.current = Some(next);
                next_cond = Some(next);
            }
            self.fs.current = Some(body);
            self.with_targets(
                Targets {
                    break_block: Some(done),
                    continue_block: None,
                    fallthrough_block: Some(next_body),
                },
                |b| b.stmt_list(&clause.body),
            )?;
            self.fs.emit_jump(done);
            self.fs.current = next_cond;
        }

        if let Some((clause, body, next_body)) = default {
            self.fs.emit_jump(body);
            self.fs.current = Some(body);
            self.with_targets(
                Targets {
                    break_block: Some(done),
                    continue_block: None,
                    fallthrough_block: Some(next_body),
                },
                |b| b.stmt_list(&clause.body),
            )?;
        }
        self.fs.emit_jump(done);
        self.fs.current = Some(done);
        Ok(())
    }

    /// `switch y := x.(type)`: one comma-ok assertion per case type. Each
    /// clause binds its own `y`, typed as the case type when the clause
    /// names exactly one type and as `x` otherwise.
    fn type_switch_stmt(
        &mut self,
        init: Option<&Stmt>,
        assign: &Stmt,
        clauses: &[CaseClause],
        label: Option<&str>,
    ) -> Result<()> {
        if let Some(init) = init {
            self.stmt(init, None)?;
        }
        let guard = match &assign.kind {
            StmtKind::Expr(e) => e,
            StmtKind::Assign { rhs, .. } if rhs.len() == 1 => &rhs[0],
            _ => build_bail!(self.name(), assign.span, "malformed type switch guard"),
        };
        let ExprKind::TypeAssert(x, None) = &guard.unparen().kind else {
            build_bail!(self.name(), guard.span, "type switch guard is not x.(type)");
        };
        let x = self.expr(x)?;
        let done = self.fs.new_block("typeswitch.done");
        self.set_label_targets(label, done, None);

        let mut default = None;
        for clause in clauses {
            if clause.is_default() {
                default = Some(clause);
                continue;
            }
            let body = self.fs.new_block("typeswitch.body");
            let mut next = None;
            let mut bound = x.clone();
            for case in &clause.list {
                let next_block = self.fs.new_block("typeswitch.next");
                let case_ty = self.type_of(case)?;
                let cond = if case_ty.is_untyped_nil() {
                    let xt = self.fs.type_of(&x);
                    bound = x.clone();
                    let nil = Value::Const(Const::zero(xt));
                    self.fs.emit_compare(self.prog, BinaryOp::Eql, x.clone(), nil, case.span)?
                } else {
                    let yok = self.fs.emit_type_test(x.clone(), &case_ty, case.span);
                    bound = self.fs.emit_extract(yok.clone(), 0)?;
                    self.fs.emit_extract(yok, 1)?
                };
                self.fs.emit_if(cond, body, next_block);
                self.fs.current = Some(next_block);
                next = Some(next_block);
            }
            if clause.list.len() != 1 {
                bound = x.clone();
            }
            self.fs.current = Some(body);
            self.type_case_body(clause, bound, done)?;
            self.fs.current = next;
        }
        match default {
            Some(clause) => self.type_case_body(clause, x, done)?,
            None => self.fs.emit_jump(done),
        }
        self.fs.current = Some(done);
        Ok(())
    }

    fn type_case_body(&mut self, clause: &CaseClause, x: Value, done: usize) -> Result<()> {
        if let Some(obj) = self.info.implicits.get(&clause.id) {
            let cell = self.add_named_local(obj, clause.span);
            self.fs.emit_store(self.prog, cell, x, clause.span)?;
        }
        self.with_targets(
            Targets {
                break_block: Some(done),
                continue_block: None,
                fallthrough_block: None,
            },
            |b| b.stmt_list(&clause.body),
        )?;
        self.fs.emit_jump(done);
        Ok(())
    }

    /// A select with a single communication clause is that communication
    /// followed by the clause body. Otherwise one `Select` yields the index
    /// of the chosen case, dispatched by a chain of comparisons.
    fn select_stmt(&mut self, clauses: &[CommClause], span: Span, label: Option<&str>) -> Result<()> {
        if let [CommClause { comm: Some(comm), body, .. }] = clauses {
            self.stmt(comm, None)?;
            let done = self.fs.new_block("select.done");
            self.set_label_targets(label, done, None);
            self.with_targets(
                Targets {
                    break_block: Some(done),
                    continue_block: None,
                    fallthrough_block: None,
                },
                |b| b.stmt_list(body),
            )?;
            self.fs.emit_jump(done);
            self.fs.current = Some(done);
            return Ok(());
        }

        let mut states = Vec::new();
        let mut blocking = true;
        let mut components = vec![Type::basic(BasicKind::Int), Type::basic(BasicKind::Bool)];
        for clause in clauses {
            let Some(comm) = &clause.comm else {
                blocking = false;
                continue;
            };
            let state = match &comm.kind {
                StmtKind::Send(ch, x) => {
                    let ct = self.type_of(ch)?;
                    let Some(elem) = ct.elem() else {
                        build_bail!(self.name(), comm.span, "send to non-channel {ct}");
                    };
                    let chan = self.expr(ch)?;
                    let x = self.expr(x)?;
                    let send = self.fs.emit_conv(self.prog, x, &elem, comm.span)?;
                    SelectState {
                        dir: ChanDir::Send,
                        chan,
                        send: Some(send),
                        span: comm.span,
                    }
                }
                StmtKind::Expr(recv) => self.recv_state(recv, &mut components)?,
                StmtKind::Assign { rhs, .. } if rhs.len() == 1 => self.recv_state(&rhs[0], &mut components)?,
                _ => build_bail!(self.name(), comm.span, "select case is not a send or receive"),
            };
            states.push(state);
        }

        let sel = self.fs.emit(
            Instr::Select { states, blocking },
            Some(Type::tuple_of(components)),
            span,
        );
        let index = self.fs.emit_extract(sel.clone(), 0)?;
        let done = self.fs.new_block("select.done");
        self.set_label_targets(label, done, None);
        let targets = Targets {
            break_block: Some(done),
            continue_block: None,
            fallthrough_block: None,
        };

        let mut default = None;
        let mut state = 0;
        // Received values follow the index and the ok flag.
        let mut r = 2;
        for clause in clauses {
            let Some(comm) = &clause.comm else {
                default = Some(clause);
                continue;
            };
            let body = self.fs.new_block("select.body");
            let next = self.fs.new_block("select.next");
            let eq = self
                .fs
                .emit_compare(self.prog, BinaryOp::Eql, index.clone(), int_const(state), comm.span)?;
            self.fs.emit_if(eq, body, next);
            self.fs.current = Some(body);
            match &comm.kind {
                StmtKind::Expr(_) => r += 1,
                StmtKind::Assign { lhs, op, .. } => {
                    let define = *op == AssignOp::Define;
                    if let Some(x) = lhs.first() {
                        let v = self.fs.emit_extract(sel.clone(), r)?;
                        self.recv_store(x, v, define)?;
                    }
                    if let Some(ok) = lhs.get(1) {
                        let v = self.fs.emit_extract(sel.clone(), 1)?;
                        self.recv_store(ok, v, define)?;
                    }
                    r += 1;
                }
                _ => {}
            }
            self.with_targets(targets, |b| b.stmt_list(&clause.body))?;
            self.fs.emit_jump(done);
            self.fs.current = Some(next);
            state += 1;
        }

        match default {
            Some(clause) => self.with_targets(targets, |b| b.stmt_list(&clause.body))?,
            None => {
                let msg = Value::Const(Const::new(
                    Type::basic(BasicKind::String),
                    ConstValue::Str("blocking select matched no case".to_string()),
                ));
                let any = Type::interface(Vec::new(), Vec::new());
                let x = self.fs.emit_conv(self.prog, msg, &any, span)?;
                self.fs.emit(Instr::Panic { x }, None, span);
                self.fs.current = Some(self.fs.new_block("unreachable"));
            }
        }
        self.fs.emit_jump(done);
        self.fs.current = Some(done);
        Ok(())
    }

    /// The state of a receive case `<-ch`; its element type is appended to
    /// the components of the `Select` tuple.
    fn recv_state(&mut self, recv: &Expr, components: &mut Vec<Type>) -> Result<SelectState> {
        let ExprKind::Unary(UnaryOp::Arrow, ch) = &recv.unparen().kind else {
            build_bail!(self.name(), recv.span, "select case is not a send or receive");
        };
        let ct = self.type_of(ch)?;
        let Some(elem) = ct.elem() else {
            build_bail!(self.name(), recv.span, "receive from non-channel {ct}");
        };
        components.push(elem);
        Ok(SelectState {
            dir: ChanDir::Recv,
            chan: self.expr(ch)?,
            send: None,
            span: recv.span,
        })
    }

    fn recv_store(&mut self, lhs: &Expr, v: Value, define: bool) -> Result<()> {
        if lhs.is_blank() {
            return Ok(());
        }
        if define {
            self.define_local(lhs)?;
        }
        self.addr(lhs, false)?.store(self, v)
    }

    #[allow(clippy::too_many_arguments)]
    fn range_stmt(
        &mut self,
        key: Option<&Expr>,
        value: Option<&Expr>,
        define: bool,
        x: &Expr,
        body: &[Stmt],
        span: Span,
        label: Option<&str>,
    ) -> Result<()> {
        let key = key.filter(|k| !k.is_blank());
        let value = value.filter(|v| !v.is_blank());
        // Iteration variables are declared once, outside the loop.
        if define {
            for e in key.iter().chain(value.iter()) {
                self.define_local(e)?;
            }
        }

        let xt = self.type_of(x)?;
        let (k, v, loop_block, done) = match xt.under() {
            TypeKind::Slice(_) | TypeKind::Array(..) | TypeKind::Pointer(_) => {
                self.range_indexed(x, &xt, value.is_some(), span)?
            }
            TypeKind::Chan(_, elem) => {
                let elem = elem.clone();
                let (k, loop_block, done) = self.range_chan(x, elem, span)?;
                (Some(k), None, loop_block, done)
            }
            TypeKind::Map(..) => self.range_iter(x, &xt, false, span)?,
            TypeKind::Basic(kind) if kind.is_string() => self.range_iter(x, &xt, true, span)?,
            TypeKind::Basic(kind) if kind.is_integer() => {
                let (k, loop_block, done) = self.range_int(x, span)?;
                (Some(k), None, loop_block, done)
            }
            _ => build_bail!(self.name(), x.span, "cannot range over {xt}"),
        };

        // Both locations are evaluated before either is stored.
        let kl = key.map(|e| self.addr(e, false)).transpose()?;
        let vl = value.map(|e| self.addr(e, false)).transpose()?;
        if let (Some(kl), Some(k)) = (kl, k) {
            kl.store(self, k)?;
        }
        if let (Some(vl), Some(v)) = (vl, v) {
            vl.store(self, v)?;
        }

        self.set_label_targets(label, done, Some(loop_block));
        self.with_targets(
            Targets {
                break_block: Some(done),
                continue_block: Some(loop_block),
                fallthrough_block: None,
            },
            |b| b.stmt_list(body),
        )?;
        self.fs.emit_jump(loop_block);
        self.fs.current = Some(done);
        Ok(())
    }

    /// Ranges over a slice, an array or a pointer to an array with an index
    /// counting up from -1.
    fn range_indexed(
        &mut self,
        x: &Expr,
        xt: &Type,
        want_value: bool,
        span: Span,
    ) -> Result<(Option<Value>, Option<Value>, usize, usize)> {
        let int = Type::basic(BasicKind::Int);
        let xv = self.expr(x)?;
        let length = match xt.deref().under() {
            TypeKind::Array(_, n) => int_const(*n as i64),
            _ => {
                let sig = Signature::new(
                    vec![Object::var(None, "", xt.clone())],
                    vec![Object::var(None, "", int.clone())],
                    false,
                );
                let len = self.prog.builtin(BuiltinKind::Len, Type::signature(sig));
                self.fs.emit(
                    Instr::Call(CallCommon::call(Value::Builtin(len), vec![xv.clone()])),
                    Some(int.clone()),
                    span,
                )
            }
        };

        let index = self.fs.add_local(int.clone(), "rangeindex", span);
        self.fs.emit_store(self.prog, index.clone(), int_const(-1), span)?;
        let loop_block = self.fs.new_block("rangeindex.loop");
        self.fs.emit_jump(loop_block);
        self.fs.current = Some(loop_block);
        let old = self.fs.emit_load(index.clone(), span);
        let incr = self.fs.emit_arith(self.prog, BinaryOp::Add, old, int_const(1), &int, span)?;
        self.fs.emit_store(self.prog, index.clone(), incr.clone(), span)?;
        let body = self.fs.new_block("rangeindex.body");
        let done = self.fs.new_block("rangeindex.done");
        let more = self.fs.emit_compare(self.prog, BinaryOp::Lss, incr, length, span)?;
        self.fs.emit_if(more, body, done);
        self.fs.current = Some(body);

        let k = self.fs.emit_load(index, span);
        let v = if want_value {
            Some(match xt.under() {
                TypeKind::Array(elem, _) => {
                    let elem = elem.clone();
                    self.fs.emit(Instr::Index { x: xv, index: k.clone() }, Some(elem), x.span)
                }
                _ => {
                    let Some(elem) = xt.deref().elem() else {
                        invariant_bail!(self.name(), "range over {xt} without element type");
                    };
                    let addr = self.fs.emit(
                        Instr::IndexAddr { x: xv, index: k.clone() },
                        Some(Type::pointer(elem)),
                        x.span,
                    );
                    self.fs.emit_load(addr, x.span)
                }
            })
        } else {
            None
        };
        Ok((Some(k), v, loop_block, done))
    }

    /// Ranges over a map or string with a `Range` iterator advanced by
    /// `Next`, which yields `(ok, key, value)`.
    fn range_iter(
        &mut self,
        x: &Expr,
        xt: &Type,
        is_string: bool,
        span: Span,
    ) -> Result<(Option<Value>, Option<Value>, usize, usize)> {
        let (kt, vt) = match xt.under() {
            TypeKind::Map(k, v) => (k.clone(), v.clone()),
            _ => (Type::basic(BasicKind::Int), Type::basic(BasicKind::Int32)),
        };
        let xv = self.expr(x)?;
        let iter = self.fs.emit(Instr::Range { x: xv }, Some(RANGE_ITER.clone()), span);
        let loop_block = self.fs.new_block("rangeiter.loop");
        self.fs.emit_jump(loop_block);
        self.fs.current = Some(loop_block);
        let okv = self.fs.emit(
            Instr::Next { iter, is_string },
            Some(Type::tuple_of([Type::basic(BasicKind::Bool), kt, vt])),
            span,
        );
        let body = self.fs.new_block("rangeiter.body");
        let done = self.fs.new_block("rangeiter.done");
        let ok = self.fs.emit_extract(okv.clone(), 0)?;
        self.fs.emit_if(ok, body, done);
        self.fs.current = Some(body);
        let k = self.fs.emit_extract(okv.clone(), 1)?;
        let v = self.fs.emit_extract(okv, 2)?;
        Ok((Some(k), Some(v), loop_block, done))
    }

    /// Ranges over a channel until it is closed.
    fn range_chan(&mut self, x: &Expr, elem: Type, span: Span) -> Result<(Value, usize, usize)> {
        let ch = self.expr(x)?;
        let loop_block = self.fs.new_block("rangechan.loop");
        self.fs.emit_jump(loop_block);
        self.fs.current = Some(loop_block);
        let ko = self.fs.emit(
            Instr::UnOp {
                op: UnaryOp::Arrow,
                x: ch,
                comma_ok: true,
            },
            Some(Type::tuple_of([elem, Type::basic(BasicKind::Bool)])),
            span,
        );
        let body = self.fs.new_block("rangechan.body");
        let done = self.fs.new_block("rangechan.done");
        let ok = self.fs.emit_extract(ko.clone(), 1)?;
        self.fs.emit_if(ok, body, done);
        self.fs.current = Some(body);
        let k = self.fs.emit_extract(ko, 0)?;
        Ok((k, loop_block, done))
    }

    /// `for i := range n`. The counter starts at zero and is compared
    /// before the first iteration, so unsigned bounds never see -1.
    fn range_int(&mut self, x: &Expr, span: Span) -> Result<(Value, usize, usize)> {
        let n = self.expr(x)?;
        let mut ty = self.fs.type_of(&n);
        if ty.is_untyped() {
            ty = Type::basic(BasicKind::Int);
        }
        let n = self.fs.emit_conv(self.prog, n, &ty, span)?;
        let iter = self.fs.add_local(ty.clone(), "rangeint.iter", span);
        let body = self.fs.new_block("rangeint.body");
        let done = self.fs.new_block("rangeint.done");
        let loop_block = self.fs.new_block("rangeint.loop");
        let zero = Value::Const(Const::zero(ty.clone()));
        let any = self.fs.emit_compare(self.prog, BinaryOp::Lss, zero, n.clone(), span)?;
        self.fs.emit_if(any, body, done);

        self.fs.current = Some(loop_block);
        let old = self.fs.emit_load(iter.clone(), span);
        let one = Value::Const(Const::int(ty.clone(), 1));
        let incr = self.fs.emit_arith(self.prog, BinaryOp::Add, old, one, &ty, span)?;
        self.fs.emit_store(self.prog, iter.clone(), incr.clone(), span)?;
        let more = self.fs.emit_compare(self.prog, BinaryOp::Lss, incr, n, span)?;
        self.fs.emit_if(more, body, done);

        self.fs.current = Some(body);
        let k = self.fs.emit_load(iter, span);
        Ok((k, loop_block, done))
    }
}
