//! Lowering of typed syntax to SSA form.
//!
//! Each function is built in a single pass over its syntax. Local
//! variables start life as `Alloc` cells; the lifting pass turns most of
//! them into registers afterwards. A function literal is built while its
//! parent is still under construction, so variable lookup walks outward
//! through the enclosing frames and threads captured cells in as free
//! variables.

mod call;
mod expr;
mod lvalue;
mod stmt;

use std::sync::Arc;

use gossa_core::ast::{Block, Decl, Expr, Field, FuncDecl, FuncType, Ident, NodeId, Spec, Stmt, StmtKind};
use gossa_core::config::BuilderMode;
use gossa_core::error::Result;
use gossa_core::info::{Initializer, TypeAndValue, TypeInfo};
use gossa_core::ir::{CallCommon, Const, Function, FunctionBody, Instr, Value};
use gossa_core::span::Span;
use gossa_core::types::{Object, ObjectKind, Signature, Type};
use gossa_core::{debug, warn};

use crate::emit::FnState;
use crate::package::{Package, Source};
use crate::program::Program;
use crate::{build_bail, invariant_bail};

pub(crate) use lvalue::{Lvalue, StoreBuf};

pub(crate) struct Builder<'a> {
    pub prog: &'a Program,
    pub pkg: &'a Package,
    pub info: &'a TypeInfo,
    /// The function being built.
    pub fs: FnState,
    /// Enclosing functions, outermost first.
    outer: Vec<FnState>,
}

/// Builds the body of a declared function or method.
pub(crate) fn build_function(
    prog: &Program,
    pkg: &Package,
    info: &TypeInfo,
    decl: &FuncDecl,
    func: &Arc<Function>,
) -> Result<FunctionBody> {
    let Some(body) = &decl.body else {
        invariant_bail!(func.relative_name(None), "function has no body to build");
    };
    let mut b = Builder::new(prog, pkg, info, func.clone());
    b.log_enter(decl.span);
    b.function_body(decl.recv.as_ref(), &decl.ty, body)?;
    b.log_leave();
    b.finish()
}

/// Builds the package initializer: guard against re-entry, initialize
/// imported packages, evaluate package-level variable initializers in
/// dependency order, then call the declared `init` functions.
pub(crate) fn build_init(prog: &Program, pkg: &Package, source: &Source) -> Result<FunctionBody> {
    let mut b = Builder::new(prog, pkg, &source.info, pkg.init().clone());
    b.log_enter(Span::NONE);

    let guard = Value::Global(pkg.init_guard().clone());
    let start = b.fs.new_block("init.start");
    let done = b.fs.new_block("init.done");
    let initialized = b.fs.emit_load(guard.clone(), Span::NONE);
    b.fs.emit_if(initialized, done, start);
    b.fs.current = Some(start);
    b.fs.emit_store(prog, guard, Value::Const(Const::bool(true)), Span::NONE)?;

    for imported in pkg.pkg.imports() {
        let Some(prereq) = prog.package(&imported.path) else {
            warn!("{}: imported package {} was never created", pkg.path(), imported.path);
            continue;
        };
        b.emit_void_call(Value::Function(prereq.init().clone()));
    }

    let order = if source.info.init_order.is_empty() {
        declaration_order(&source.info, &source.files)
    } else {
        source.info.init_order.clone()
    };
    for init in &order {
        b.var_initializer(init)?;
    }

    for init in pkg.declared_inits() {
        b.emit_void_call(Value::Function(init.clone()));
    }

    b.fs.emit_jump(done);
    b.fs.current = Some(done);
    b.fs.emit(Instr::Return { results: Vec::new() }, None, Span::NONE);
    b.fs.current = None;
    b.log_leave();
    b.finish()
}

/// Package-level initializers in the order they are written, for type info
/// that carries no initialization order.
fn declaration_order(info: &TypeInfo, files: &[gossa_core::ast::File]) -> Vec<Initializer> {
    let mut order = Vec::new();
    for file in files {
        for decl in &file.decls {
            let Decl::Gen(gen) = decl else {
                continue;
            };
            for spec in &gen.specs {
                let Spec::Value(spec) = spec else {
                    continue;
                };
                if spec.is_const || spec.values.is_empty() {
                    continue;
                }
                let objects = |names: &[Ident]| -> Vec<Object> {
                    names
                        .iter()
                        .filter_map(|n| info.object_of(n.id).cloned())
                        .collect()
                };
                if spec.values.len() == spec.names.len() {
                    for (name, value) in spec.names.iter().zip(&spec.values) {
                        order.push(Initializer {
                            lhs: objects(std::slice::from_ref(name)),
                            rhs: value.clone(),
                        });
                    }
                } else if let [value] = spec.values.as_slice() {
                    order.push(Initializer {
                        lhs: objects(&spec.names),
                        rhs: value.clone(),
                    });
                }
            }
        }
    }
    order
}

impl<'a> Builder<'a> {
    fn new(prog: &'a Program, pkg: &'a Package, info: &'a TypeInfo, func: Arc<Function>) -> Self {
        Self {
            prog,
            pkg,
            info,
            fs: FnState::new(func),
            outer: Vec::new(),
        }
    }

    fn finish(self) -> Result<FunctionBody> {
        self.fs.finish(self.prog)
    }

    fn log_enter(&self, span: Span) {
        if self.prog.mode().contains(BuilderMode::LOG_SOURCE) {
            debug!(
                "{:indent$}.build {} @ {span}",
                "",
                self.fs.name(),
                indent = self.outer.len() * 2
            );
        }
    }

    fn log_leave(&self) {
        if self.prog.mode().contains(BuilderMode::LOG_SOURCE) {
            debug!("{:indent$}.done {}", "", self.fs.name(), indent = self.outer.len() * 2);
        }
    }

    pub fn name(&self) -> String {
        self.fs.name()
    }

    pub fn tv(&self, e: &Expr) -> Option<&'a TypeAndValue> {
        self.info.types.get(&e.id)
    }

    /// The type the checker recorded for `e`.
    pub fn type_of(&self, e: &Expr) -> Result<Type> {
        match self.info.type_of(e.id) {
            Some(ty) => Ok(ty.clone()),
            None => build_bail!(self.name(), e.span, "no type recorded for expression"),
        }
    }

    pub fn object_of(&self, id: NodeId, span: Span) -> Result<&'a Object> {
        match self.info.object_of(id) {
            Some(obj) => Ok(obj),
            None => build_bail!(self.name(), span, "unresolved identifier"),
        }
    }

    /// A call of a function taking and returning nothing.
    fn emit_void_call(&mut self, callee: Value) {
        self.fs.emit(
            Instr::Call(CallCommon::call(callee, Vec::new())),
            Some(Type::tuple(Vec::new())),
            Span::NONE,
        );
    }

    fn var_initializer(&mut self, init: &Initializer) -> Result<()> {
        if self.prog.mode().contains(BuilderMode::LOG_SOURCE) {
            let names: Vec<&str> = init.lhs.iter().map(Object::name).collect();
            debug!("  init {} @ {}", names.join(", "), init.rhs.span);
        }
        if let [var] = init.lhs.as_slice() {
            let lvalue = self.global_lvalue(var, init.rhs.span);
            return self.assign(lvalue, &init.rhs, None);
        }
        let tuple = self.expr_n(&init.rhs)?;
        for (i, var) in init.lhs.iter().enumerate() {
            if var.name() == "_" {
                continue;
            }
            let value = self.fs.emit_extract(tuple.clone(), i)?;
            self.global_lvalue(var, init.rhs.span).store(self, value)?;
        }
        Ok(())
    }

    fn global_lvalue(&self, var: &Object, span: Span) -> Lvalue {
        if var.name() == "_" {
            return Lvalue::Blank;
        }
        match self.prog.declared_global(var) {
            Some(g) => Lvalue::address(Value::Global(g), span),
            None => Lvalue::Blank,
        }
    }

    /// Parameters, named results and statements of a function, followed by
    /// its shared exit block when it defers calls.
    fn function_body(&mut self, recv: Option<&Field>, ty: &FuncType, body: &Block) -> Result<()> {
        let sig = self.fs.func.sig.clone();
        self.create_params(recv, ty, &sig)?;
        if contains_defer(&body.stmts) {
            self.create_exit(&sig);
        }
        self.stmt_list(&body.stmts)?;
        if self.fs.current.is_some() {
            self.emit_return(Vec::new(), body.span)?;
        }
        self.finish_exit(body.span)
    }

    /// Named parameters are spilled to cells so they can be assigned and
    /// captured; unnamed and blank ones stay plain parameters.
    fn create_params(&mut self, recv: Option<&Field>, ty: &FuncType, sig: &Signature) -> Result<()> {
        let mut count = 0;
        if let Some(recv) = recv {
            if recv.names.is_empty() {
                if let Some(var) = &sig.recv {
                    self.fs.add_param(var.name(), var.ty().clone(), Some(var.clone()), var.span());
                }
            }
            for name in &recv.names {
                self.spilled_param(name)?;
            }
        }
        for field in &ty.params {
            if field.names.is_empty() {
                if let Some(var) = sig.params.get(count) {
                    self.fs.add_param(var.name(), var.ty().clone(), Some(var.clone()), var.span());
                }
                count += 1;
            }
            for name in &field.names {
                self.spilled_param(name)?;
                count += 1;
            }
        }
        // Parameters the syntax does not spell out.
        for var in sig.params.iter().skip(count) {
            self.fs.add_param(var.name(), var.ty().clone(), Some(var.clone()), var.span());
        }

        for field in &ty.results {
            for name in &field.names {
                let cell = self.local_for_ident(name)?;
                self.fs.result_cells.push(cell);
            }
        }
        Ok(())
    }

    fn spilled_param(&mut self, name: &Ident) -> Result<()> {
        let obj = self.object_of(name.id, name.span)?;
        let param = self.fs.add_param(obj.name(), obj.ty().clone(), Some(obj.clone()), name.span);
        if name.is_blank() {
            return Ok(());
        }
        let cell = self.fs.add_local(obj.ty().clone(), obj.name(), name.span);
        self.fs.emit_store(self.prog, cell.clone(), param, name.span)?;
        self.fs.objects.insert(obj.clone(), cell);
        Ok(())
    }

    /// Declares the local variable defined by `ident` and returns its cell.
    pub fn local_for_ident(&mut self, ident: &Ident) -> Result<Value> {
        let obj = self.object_of(ident.id, ident.span)?;
        let cell = self.fs.add_local(obj.ty().clone(), obj.name(), ident.span);
        self.fs.objects.insert(obj.clone(), cell.clone());
        Ok(cell)
    }

    /// Result slots, the `return` block and the `recover` block of a
    /// function that defers calls.
    fn create_exit(&mut self, sig: &Signature) {
        if self.fs.result_cells.is_empty() {
            for var in &sig.results {
                let cell = self.fs.add_local(var.ty().clone(), "result", Span::NONE);
                self.fs.result_cells.push(cell);
            }
        }
        self.fs.body.result_slots = self.fs.result_cells.iter().filter_map(Value::as_local).collect();
        self.fs.exit = Some(self.fs.new_block("return"));
        self.fs.body.recover = Some(self.fs.new_block("recover"));
    }

    fn finish_exit(&mut self, span: Span) -> Result<()> {
        let Some(exit) = self.fs.exit else {
            return Ok(());
        };
        if let Some(recover) = self.fs.body.recover {
            self.fs.current = Some(recover);
            self.fs.emit_jump(exit);
        }
        self.fs.current = Some(exit);
        self.fs.emit(Instr::RunDefers, None, span);
        let results = self.load_result_cells(span);
        self.fs.emit(Instr::Return { results }, None, span);
        self.fs.current = None;
        Ok(())
    }

    fn load_result_cells(&mut self, span: Span) -> Vec<Value> {
        let cells = self.fs.result_cells.clone();
        cells.into_iter().map(|cell| self.fs.emit_load(cell, span)).collect()
    }

    /// Returns `values` from the function. With result cells the values are
    /// stored first and reloaded; with an exit block control jumps there.
    /// Leaves no current block.
    pub fn emit_return(&mut self, values: Vec<Value>, span: Span) -> Result<()> {
        let cells = self.fs.result_cells.clone();
        if !cells.is_empty() && !values.is_empty() {
            for (cell, value) in cells.iter().zip(&values) {
                self.fs.emit_store(self.prog, cell.clone(), value.clone(), span)?;
            }
        }
        if let Some(exit) = self.fs.exit {
            self.fs.emit_jump(exit);
            return Ok(());
        }
        let results = if !cells.is_empty() {
            self.load_result_cells(span)
        } else if values.is_empty() {
            let sig = &self.fs.func.sig;
            sig.results
                .iter()
                .map(|var| Value::Const(Const::zero(var.ty().clone())))
                .collect()
        } else {
            values
        };
        self.fs.emit(Instr::Return { results }, None, span);
        self.fs.current = None;
        Ok(())
    }

    /// The cell or value bound to a local variable, searching enclosing
    /// functions and capturing it as a free variable when found there.
    pub fn lookup(&mut self, obj: &Object, escaping: bool, span: Span) -> Result<Value> {
        match self.lookup_at(self.outer.len(), obj, escaping) {
            Some(v) => Ok(v),
            None => build_bail!(self.name(), span, "no local variable {}", obj.name()),
        }
    }

    fn frame_mut(&mut self, level: usize) -> Option<&mut FnState> {
        if level == self.outer.len() {
            Some(&mut self.fs)
        } else {
            self.outer.get_mut(level)
        }
    }

    fn lookup_at(&mut self, level: usize, obj: &Object, escaping: bool) -> Option<Value> {
        let frame = self.frame_mut(level)?;
        if let Some(v) = frame.objects.get(obj).cloned() {
            if escaping {
                frame.mark_escaping(&v);
            }
            return Some(v);
        }
        if level == 0 {
            return None;
        }
        let captured = self.lookup_at(level - 1, obj, true)?;
        let ty = self.frame_mut(level - 1)?.type_of(&captured);
        let frame = self.frame_mut(level)?;
        let fv = Value::Local(frame.body.add_free_var(obj.name(), ty, obj.span()));
        frame.captures.push(captured);
        frame.objects.insert(obj.clone(), fv.clone());
        Some(fv)
    }

    /// Whether `obj` is a variable declared at package level.
    pub fn is_package_var(obj: &Object) -> bool {
        matches!(obj.kind(), ObjectKind::Var { is_field: false, .. })
            && obj
                .pkg()
                .and_then(|pkg| pkg.lookup(obj.name()))
                .is_some_and(|found| &found == obj)
    }

    /// Builds a function literal as an anonymous function of the current
    /// one, yielding the function itself or a closure over its captures.
    pub fn func_lit(&mut self, e: &Expr, ty: &FuncType, body: &Block) -> Result<Value> {
        let lit_ty = self.type_of(e)?;
        let Some(sig) = lit_ty.as_signature().cloned() else {
            build_bail!(self.name(), e.span, "function literal of non-function type {lit_ty}");
        };
        let index = self.fs.body.anon_funcs.len();
        let func = Arc::new(Function::new("", sig).nested_in(&self.fs.func, index).with_span(e.span));

        let parent = std::mem::replace(&mut self.fs, FnState::new(func.clone()));
        self.outer.push(parent);
        self.log_enter(e.span);
        let built = self.function_body(None, ty, body);
        self.log_leave();
        let Some(parent) = self.outer.pop() else {
            invariant_bail!(func.relative_name(None), "lost the enclosing function");
        };
        let child = std::mem::replace(&mut self.fs, parent);
        built?;

        let captures = child.captures.clone();
        let finished = child.finish(self.prog)?;
        func.publish(Some(finished));
        crate::passes::log_function(self.prog, &func);
        self.fs.body.anon_funcs.push(func.clone());

        if captures.is_empty() {
            return Ok(Value::Function(func));
        }
        Ok(self.fs.emit(
            Instr::MakeClosure {
                func: Value::Function(func),
                bindings: captures,
            },
            Some(lit_ty),
            e.span,
        ))
    }
}

/// Whether a function body defers calls, not counting nested function
/// literals.
fn contains_defer(stmts: &[Stmt]) -> bool {
    stmts.iter().any(stmt_contains_defer)
}

fn stmt_contains_defer(s: &Stmt) -> bool {
    let opt = |s: &Option<Box<Stmt>>| s.as_deref().is_some_and(stmt_contains_defer);
    match &s.kind {
        StmtKind::Defer(_) => true,
        StmtKind::Labeled(_, inner) => stmt_contains_defer(inner),
        StmtKind::Block(block) => contains_defer(&block.stmts),
        StmtKind::If { init, then, els, .. } => opt(init) || contains_defer(&then.stmts) || opt(els),
        StmtKind::Switch { init, body, .. } | StmtKind::TypeSwitch { init, body, .. } => {
            opt(init) || body.iter().any(|cc| contains_defer(&cc.body))
        }
        StmtKind::Select(clauses) => clauses.iter().any(|cc| contains_defer(&cc.body)),
        StmtKind::For { init, post, body, .. } => opt(init) || opt(post) || contains_defer(&body.stmts),
        StmtKind::Range { body, .. } => contains_defer(&body.stmts),
        _ => false,
    }
}
