#![allow(dead_code)]
//! Hand-typed syntax: every node is recorded in the `TypeInfo` the way a
//! type checker would record it.

use std::sync::Arc;

use gossa_core::ast::{
    Block, CaseClause, CommClause, Decl, Expr, ExprKind, Field, File, FuncDecl, FuncLit, FuncType, GenDecl, Ident,
    NodeId, Spec, Stmt, StmtKind, ValueSpec,
};
use gossa_core::constant::ConstValue;
use gossa_core::info::{OperandMode, Selection, SelectionKind, TypeAndValue, TypeInfo};
use gossa_core::span::Span;
use gossa_core::token::{AssignOp, BinaryOp, BranchKind, UnaryOp};
use gossa_core::types::{BasicKind, BuiltinKind, Object, Signature, Type, TypePackage};
use gossa_ssa::{Package, Program};

pub fn int() -> Type {
    Type::basic(BasicKind::Int)
}

pub fn bool_ty() -> Type {
    Type::basic(BasicKind::Bool)
}

pub fn unit() -> Type {
    Type::tuple(Vec::new())
}

pub fn string_ty() -> Type {
    Type::basic(BasicKind::String)
}

pub fn any() -> Type {
    Type::interface(Vec::new(), Vec::new())
}

/// A signature of unnamed parameters and results.
pub fn sig(params: &[Type], results: &[Type]) -> Signature {
    let vars = |tys: &[Type]| -> Vec<Object> { tys.iter().map(|t| Object::var(None, "", t.clone())).collect() };
    Signature::new(vars(params), vars(results), false)
}

pub fn block(stmts: Vec<Stmt>) -> Block {
    Block { span: Span::NONE, stmts }
}

pub struct Source {
    pub pkg: Arc<TypePackage>,
    pub info: TypeInfo,
    next: u32,
}

impl Source {
    pub fn new(path: &str) -> Self {
        let name = path.rsplit('/').next().unwrap_or(path);
        Self {
            pkg: TypePackage::new(path, name),
            info: TypeInfo::new(),
            next: 1,
        }
    }

    fn id(&mut self) -> NodeId {
        let id = NodeId(self.next);
        self.next += 1;
        id
    }

    fn ident(&mut self, name: &str) -> Ident {
        Ident {
            id: self.id(),
            span: Span::NONE,
            name: name.to_string(),
        }
    }

    fn node(&mut self, kind: ExprKind, tv: Option<TypeAndValue>) -> Expr {
        let id = self.id();
        if let Some(tv) = tv {
            self.info.types.insert(id, tv);
        }
        Expr {
            id,
            span: Span::NONE,
            kind,
        }
    }

    // objects

    pub fn named_type(&self, name: &str, underlying: Type) -> Type {
        let t = Type::named(Some(self.pkg.clone()), name);
        t.set_underlying(underlying);
        self.pkg
            .insert(Object::type_name(Some(self.pkg.clone()), name, t.clone()));
        t
    }

    pub fn func_object(&self, name: &str, sig: Signature) -> Object {
        let obj = Object::func(Some(self.pkg.clone()), name, Type::signature(sig));
        self.pkg.insert(obj.clone());
        obj
    }

    /// A method of `recv`, which is a named type or a pointer to one.
    pub fn method_object(&self, recv: &Type, recv_name: &str, name: &str, sig: Signature) -> Object {
        let recv_var = Object::var(Some(self.pkg.clone()), recv_name, recv.clone());
        let obj = Object::func(Some(self.pkg.clone()), name, Type::signature(sig.with_recv(recv_var)));
        if let Some(named) = recv.deref().as_named() {
            named.add_method(obj.clone());
        }
        obj
    }

    pub fn local(&self, name: &str, ty: Type) -> Object {
        Object::var(Some(self.pkg.clone()), name, ty)
    }

    pub fn global(&self, name: &str, ty: Type) -> Object {
        let obj = self.local(name, ty);
        self.pkg.insert(obj.clone());
        obj
    }

    // expressions

    pub fn int_lit(&mut self, v: i64) -> Expr {
        self.const_lit(int(), v)
    }

    pub fn const_lit(&mut self, ty: Type, v: i64) -> Expr {
        let value = ConstValue::int(v);
        self.node(ExprKind::BasicLit(value.clone()), Some(TypeAndValue::constant(ty, value)))
    }

    /// A use of a variable.
    pub fn var(&mut self, obj: &Object) -> Expr {
        let e = self.node(
            ExprKind::Ident(obj.name().to_string()),
            Some(TypeAndValue::new(OperandMode::Variable, obj.ty().clone())),
        );
        self.info.uses.insert(e.id, obj.clone());
        e
    }

    /// A use of a builtin function, typed as `ty` at this call.
    pub fn builtin(&mut self, kind: BuiltinKind, ty: Type) -> Expr {
        let obj = Object::builtin(kind);
        let e = self.node(
            ExprKind::Ident(obj.name().to_string()),
            Some(TypeAndValue::new(OperandMode::Builtin, ty)),
        );
        self.info.uses.insert(e.id, obj);
        e
    }

    /// A use of a function.
    pub fn func_ref(&mut self, obj: &Object) -> Expr {
        let e = self.node(
            ExprKind::Ident(obj.name().to_string()),
            Some(TypeAndValue::new(OperandMode::Value, obj.ty().clone())),
        );
        self.info.uses.insert(e.id, obj.clone());
        e
    }

    pub fn string_lit(&mut self, v: &str) -> Expr {
        let value = ConstValue::string(v);
        self.node(ExprKind::BasicLit(value.clone()), Some(TypeAndValue::constant(string_ty(), value)))
    }

    /// `nil`, typed as `ty` (untyped nil in a type switch case).
    pub fn nil(&mut self, ty: Type) -> Expr {
        let e = self.node(ExprKind::Ident("nil".to_string()), Some(TypeAndValue::new(OperandMode::Value, ty)));
        self.info.uses.insert(e.id, Object::nil());
        e
    }

    /// `_`.
    pub fn blank(&mut self) -> Expr {
        self.node(ExprKind::Ident("_".to_string()), None)
    }

    /// An identifier declaring `obj`, as on the left of `:=`.
    pub fn def_ident(&mut self, obj: &Object) -> Expr {
        let e = self.node(
            ExprKind::Ident(obj.name().to_string()),
            Some(TypeAndValue::new(OperandMode::Variable, obj.ty().clone())),
        );
        self.info.defs.insert(e.id, Some(obj.clone()));
        e
    }

    pub fn unary(&mut self, op: UnaryOp, x: Expr, ty: Type) -> Expr {
        self.node(
            ExprKind::Unary(op, Box::new(x)),
            Some(TypeAndValue::new(OperandMode::Value, ty)),
        )
    }

    /// `T{elts}`.
    pub fn composite_lit(&mut self, ty: &Type, elts: Vec<Expr>) -> Expr {
        self.node(
            ExprKind::CompositeLit(elts),
            Some(TypeAndValue::new(OperandMode::Value, ty.clone())),
        )
    }

    pub fn key_value(&mut self, key: Expr, value: Expr) -> Expr {
        self.node(ExprKind::KeyValue(Box::new(key), Box::new(value)), None)
    }

    /// The field name in a keyed struct literal element.
    pub fn field_key(&mut self, name: &str) -> Expr {
        self.node(ExprKind::Ident(name.to_string()), None)
    }

    /// `func(params) results { body }` of signature `sig`.
    pub fn func_lit(&mut self, sig: Signature, params: Vec<Field>, results: Vec<Field>, body: Vec<Stmt>) -> Expr {
        let lit = FuncLit {
            ty: FuncType { params, results },
            body: block(body),
        };
        self.node(
            ExprKind::FuncLit(Box::new(lit)),
            Some(TypeAndValue::new(OperandMode::Value, Type::signature(sig))),
        )
    }

    /// `T.m` for a method `m` declared directly on `recv`.
    pub fn method_expr(&mut self, recv: &Type, method: &Object) -> Expr {
        let x = self.type_expr(recv);
        let sel = Selection {
            kind: SelectionKind::MethodExpr,
            recv: recv.clone(),
            index: vec![0],
            indirect: recv.is_pointer(),
            obj: method.clone(),
        };
        let ty = sel.ty();
        let name = self.ident(method.name());
        let e = self.node(
            ExprKind::Selector(Box::new(x), name),
            Some(TypeAndValue::new(OperandMode::Value, ty)),
        );
        self.info.selections.insert(e.id, sel);
        e
    }

    pub fn type_expr(&mut self, ty: &Type) -> Expr {
        self.node(ExprKind::Type, Some(TypeAndValue::new(OperandMode::TypeExpr, ty.clone())))
    }

    pub fn binary(&mut self, op: BinaryOp, x: Expr, y: Expr, ty: Type) -> Expr {
        self.node(
            ExprKind::Binary(op, Box::new(x), Box::new(y)),
            Some(TypeAndValue::new(OperandMode::Value, ty)),
        )
    }

    pub fn call(&mut self, fun: Expr, args: Vec<Expr>, result: Type) -> Expr {
        let mode = if result == unit() {
            OperandMode::NoValue
        } else {
            OperandMode::Value
        };
        self.node(
            ExprKind::Call {
                fun: Box::new(fun),
                args,
                ellipsis: false,
            },
            Some(TypeAndValue::new(mode, result)),
        )
    }

    /// `f(args...)`: the last argument is passed as the variadic slice.
    pub fn call_spread(&mut self, fun: Expr, args: Vec<Expr>, result: Type) -> Expr {
        let mut call = self.call(fun, args, result);
        if let ExprKind::Call { ellipsis, .. } = &mut call.kind {
            *ellipsis = true;
        }
        call
    }

    /// `T(x)`.
    pub fn conversion(&mut self, ty: &Type, x: Expr) -> Expr {
        let fun = self.type_expr(ty);
        self.node(
            ExprKind::Call {
                fun: Box::new(fun),
                args: vec![x],
                ellipsis: false,
            },
            Some(TypeAndValue::new(OperandMode::Value, ty.clone())),
        )
    }

    /// `x.m` for a method `m` declared directly on `x`'s type.
    pub fn method_value(&mut self, x: Expr, method: &Object) -> Expr {
        let recv = self.info.type_of(x.id).cloned().unwrap_or_else(Type::invalid);
        let sel = Selection {
            kind: SelectionKind::MethodVal,
            recv: recv.clone(),
            index: vec![0],
            indirect: recv.is_pointer(),
            obj: method.clone(),
        };
        let ty = sel.ty();
        let name = self.ident(method.name());
        let e = self.node(
            ExprKind::Selector(Box::new(x), name),
            Some(TypeAndValue::new(OperandMode::Value, ty)),
        );
        self.info.selections.insert(e.id, sel);
        e
    }

    pub fn type_assert(&mut self, x: Expr, ty: &Type) -> Expr {
        let target = self.type_expr(ty);
        self.node(
            ExprKind::TypeAssert(Box::new(x), Some(Box::new(target))),
            Some(TypeAndValue::new(OperandMode::CommaOk, ty.clone())),
        )
    }

    /// `<-ch`.
    pub fn recv(&mut self, ch: Expr) -> Expr {
        let elem = self
            .info
            .type_of(ch.id)
            .and_then(Type::elem)
            .unwrap_or_else(Type::invalid);
        self.node(
            ExprKind::Unary(UnaryOp::Arrow, Box::new(ch)),
            Some(TypeAndValue::new(OperandMode::CommaOk, elem)),
        )
    }

    // statements

    pub fn stmt(&mut self, kind: StmtKind) -> Stmt {
        Stmt {
            id: self.id(),
            span: Span::NONE,
            kind,
        }
    }

    /// `name := value`, declaring `obj`.
    pub fn define(&mut self, obj: &Object, value: Expr) -> Stmt {
        let lhs = self.node(
            ExprKind::Ident(obj.name().to_string()),
            Some(TypeAndValue::new(OperandMode::Variable, obj.ty().clone())),
        );
        self.info.defs.insert(lhs.id, Some(obj.clone()));
        self.stmt(StmtKind::Assign {
            lhs: vec![lhs],
            op: AssignOp::Define,
            rhs: vec![value],
        })
    }

    pub fn assign(&mut self, lhs: Expr, rhs: Expr) -> Stmt {
        self.stmt(StmtKind::Assign {
            lhs: vec![lhs],
            op: AssignOp::Assign,
            rhs: vec![rhs],
        })
    }

    pub fn inc(&mut self, obj: &Object) -> Stmt {
        let x = self.var(obj);
        self.stmt(StmtKind::IncDec { x, inc: true })
    }

    pub fn expr_stmt(&mut self, e: Expr) -> Stmt {
        self.stmt(StmtKind::Expr(e))
    }

    pub fn ret(&mut self, results: Vec<Expr>) -> Stmt {
        self.stmt(StmtKind::Return(results))
    }

    pub fn go_stmt(&mut self, call: Expr) -> Stmt {
        self.stmt(StmtKind::Go(call))
    }

    pub fn if_stmt(&mut self, cond: Expr, then: Vec<Stmt>) -> Stmt {
        self.stmt(StmtKind::If {
            init: None,
            cond,
            then: block(then),
            els: None,
        })
    }

    pub fn branch(&mut self, kind: BranchKind, label: Option<&str>) -> Stmt {
        let label = label.map(|name| self.ident(name));
        self.stmt(StmtKind::Branch(kind, label))
    }

    pub fn labeled(&mut self, label: &str, s: Stmt) -> Stmt {
        let label = self.ident(label);
        self.stmt(StmtKind::Labeled(label, Box::new(s)))
    }

    /// `for init; cond; post { body }`.
    pub fn for_stmt(&mut self, init: Option<Stmt>, cond: Option<Expr>, post: Option<Stmt>, body: Vec<Stmt>) -> Stmt {
        self.stmt(StmtKind::For {
            init: init.map(Box::new),
            cond,
            post: post.map(Box::new),
            body: block(body),
        })
    }

    /// `for key, value := range x { body }`, or `=` unless `define`.
    pub fn range(&mut self, key: Option<Expr>, value: Option<Expr>, define: bool, x: Expr, body: Vec<Stmt>) -> Stmt {
        self.stmt(StmtKind::Range {
            key,
            value,
            define,
            x,
            body: block(body),
        })
    }

    /// A switch case; an empty `list` is `default`.
    pub fn case_clause(&mut self, list: Vec<Expr>, body: Vec<Stmt>) -> CaseClause {
        CaseClause {
            id: self.id(),
            span: Span::NONE,
            list,
            body,
        }
    }

    /// A type switch case binding `bound` for the duration of its body.
    pub fn type_clause(&mut self, list: Vec<Expr>, body: Vec<Stmt>, bound: Option<&Object>) -> CaseClause {
        let clause = self.case_clause(list, body);
        if let Some(obj) = bound {
            self.info.implicits.insert(clause.id, obj.clone());
        }
        clause
    }

    pub fn switch(&mut self, tag: Option<Expr>, body: Vec<CaseClause>) -> Stmt {
        self.stmt(StmtKind::Switch { init: None, tag, body })
    }

    /// `switch y := x.(type)`; the guard declares nothing itself, each
    /// clause binds its own `y`.
    pub fn type_switch(&mut self, bind: &str, x: Expr, body: Vec<CaseClause>) -> Stmt {
        let guard = self.node(ExprKind::TypeAssert(Box::new(x), None), None);
        let lhs = self.node(ExprKind::Ident(bind.to_string()), None);
        self.info.defs.insert(lhs.id, None);
        let assign = self.stmt(StmtKind::Assign {
            lhs: vec![lhs],
            op: AssignOp::Define,
            rhs: vec![guard],
        });
        self.stmt(StmtKind::TypeSwitch {
            init: None,
            assign: Box::new(assign),
            body,
        })
    }

    /// A select case; `None` is `default`.
    pub fn comm_clause(&mut self, comm: Option<Stmt>, body: Vec<Stmt>) -> CommClause {
        CommClause {
            id: self.id(),
            span: Span::NONE,
            comm: comm.map(Box::new),
            body,
        }
    }

    /// `var name T = value` inside a function.
    pub fn local_var(&mut self, obj: &Object, value: Expr) -> Stmt {
        let decl = self.value_decl(obj, value);
        self.stmt(StmtKind::Decl(decl))
    }

    fn value_decl(&mut self, obj: &Object, value: Expr) -> GenDecl {
        let name = self.ident(obj.name());
        self.info.defs.insert(name.id, Some(obj.clone()));
        let ty = self.type_expr(obj.ty());
        let spec = ValueSpec {
            id: self.id(),
            span: Span::NONE,
            is_const: false,
            names: vec![name],
            ty: Some(ty),
            values: vec![value],
        };
        GenDecl {
            id: self.id(),
            span: Span::NONE,
            specs: vec![Spec::Value(spec)],
        }
    }

    // declarations

    /// A parameter or receiver field declaring `obj`.
    pub fn param(&mut self, obj: &Object) -> Field {
        let name = self.ident(obj.name());
        self.info.defs.insert(name.id, Some(obj.clone()));
        let ty = self.type_expr(obj.ty());
        Field { names: vec![name], ty }
    }

    /// An unnamed result of type `ty`.
    pub fn result(&mut self, ty: &Type) -> Field {
        let ty = self.type_expr(ty);
        Field { names: Vec::new(), ty }
    }

    /// A function or method declaration; a `None` body declares an
    /// external function.
    pub fn func_decl(
        &mut self,
        obj: &Object,
        recv: Option<Field>,
        params: Vec<Field>,
        results: Vec<Field>,
        body: Option<Vec<Stmt>>,
    ) -> Decl {
        let name = self.ident(obj.name());
        self.info.defs.insert(name.id, Some(obj.clone()));
        Decl::Func(FuncDecl {
            id: self.id(),
            span: Span::NONE,
            recv,
            name,
            ty: FuncType { params, results },
            body: body.map(|stmts| Block {
                span: Span::NONE,
                stmts,
            }),
        })
    }

    /// `func name()` with no body.
    pub fn external_func(&mut self, name: &str) -> (Object, Decl) {
        let obj = self.func_object(name, Signature::new(Vec::new(), Vec::new(), false));
        let decl = self.func_decl(&obj, None, Vec::new(), Vec::new(), None);
        (obj, decl)
    }

    /// A package-level `var` declaration.
    pub fn global_var(&mut self, obj: &Object, value: Expr) -> Decl {
        Decl::Gen(self.value_decl(obj, value))
    }

    /// `func name(params) results` with no body.
    pub fn external_func_of(&mut self, name: &str, params: &[Type], results: &[Type]) -> (Object, Decl) {
        let obj = self.func_object(name, sig(params, results));
        let decl = self.func_decl(&obj, None, Vec::new(), Vec::new(), None);
        (obj, decl)
    }

    /// A declared function; parameters are declared from `params`.
    pub fn func_with_body(&mut self, name: &str, params: &[Object], results: &[Type], body: Vec<Stmt>) -> (Object, Decl) {
        let result_vars = results.iter().map(|t| Object::var(None, "", t.clone())).collect();
        let obj = self.func_object(name, Signature::new(params.to_vec(), result_vars, false));
        let fields = params.iter().map(|p| self.param(p)).collect();
        let result_fields = results.iter().map(|t| self.result(t)).collect();
        let decl = self.func_decl(&obj, None, fields, result_fields, Some(body));
        (obj, decl)
    }

    /// Registers the package with `prog`.
    pub fn create(self, prog: &Arc<Program>, decls: Vec<Decl>) -> Arc<Package> {
        let file = File {
            name: format!("{}.go", self.pkg.name),
            decls,
        };
        prog.create_package(self.pkg, vec![file], self.info)
            .expect("package is created once")
    }
}
