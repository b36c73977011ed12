use gossa_core::ast::{Expr, ExprKind, Ident};
use gossa_core::constant::ConstValue;
use gossa_core::error::Result;
use gossa_core::info::{Selection, SelectionKind, TypeAndValue};
use gossa_core::ir::{Const, Instr, Value};
use gossa_core::span::Span;
use gossa_core::token::{BinaryOp, UnaryOp};
use gossa_core::types::{default_type, BasicKind, Object, ObjectKind, Type, TypeKind};

use crate::build_bail;
use crate::builder::{Builder, Lvalue, StoreBuf};
use crate::methods::MethodSelection;

pub(crate) fn int_const(v: i64) -> Value {
    Value::Const(Const::int(Type::basic(BasicKind::Int), v))
}

impl Builder<'_> {
    /// Lowers `e` to a single value. Constants never produce code.
    pub fn expr(&mut self, e: &Expr) -> Result<Value> {
        let e = e.unparen();
        let tv = self.tv(e);
        if let Some(TypeAndValue {
            ty, value: Some(value), ..
        }) = tv
        {
            return Ok(Value::Const(Const::new(default_type(ty), value.clone())));
        }
        if tv.is_some_and(TypeAndValue::addressable) {
            return self.addr(e, false)?.load(self);
        }
        self.expr0(e)
    }

    fn expr0(&mut self, e: &Expr) -> Result<Value> {
        match &e.kind {
            ExprKind::BasicLit(value) => {
                let ty = default_type(&self.type_of(e)?);
                Ok(Value::Const(Const::new(ty, value.clone())))
            }
            ExprKind::FuncLit(lit) => self.func_lit(e, &lit.ty, &lit.body),
            ExprKind::Paren(inner) => self.expr(inner),
            ExprKind::TypeAssert(x, Some(_)) => {
                let x = self.expr(x)?;
                let ty = self.type_of(e)?;
                Ok(self.fs.emit_type_assert(x, &ty, e.span))
            }
            ExprKind::TypeAssert(_, None) => build_bail!(self.name(), e.span, "use of .(type) outside a type switch"),
            ExprKind::Call { fun, args, ellipsis } => self.call_expr(e, fun, args, *ellipsis),
            ExprKind::Unary(op, x) => self.unary(e, *op, x),
            ExprKind::Binary(op, x, y) => self.binary(e, *op, x, y),
            ExprKind::Slice { x, low, high, max } => {
                let xt = self.type_of(x)?;
                let x = match xt.under() {
                    TypeKind::Array(..) => self.addr(x, true)?.addr(self)?,
                    _ => self.expr(x)?,
                };
                let bound = |b: &mut Self, e: &Option<Box<Expr>>| e.as_deref().map(|e| b.expr(e)).transpose();
                let low = bound(self, low)?;
                let high = bound(self, high)?;
                let max = bound(self, max)?;
                let ty = self.type_of(e)?;
                Ok(self.fs.emit(Instr::Slice { x, low, high, max }, Some(ty), e.span))
            }
            ExprKind::Ident(_) => self.ident(e),
            ExprKind::Selector(x, name) => self.selector(e, x, name),
            ExprKind::Index(x, index) => self.index(e, x, index),
            ExprKind::CompositeLit(_) | ExprKind::Star(_) => self.addr(e, false)?.load(self),
            ExprKind::KeyValue(..) | ExprKind::Type => {
                build_bail!(self.name(), e.span, "expression has no value")
            }
        }
    }

    fn unary(&mut self, e: &Expr, op: UnaryOp, x: &Expr) -> Result<Value> {
        match op {
            UnaryOp::Addr => self.addr(x, true)?.addr(self),
            UnaryOp::Pos => self.expr(x),
            UnaryOp::Deref => {
                let ptr = self.expr(x)?;
                Ok(self.fs.emit_load(ptr, e.span))
            }
            UnaryOp::Neg | UnaryOp::Not | UnaryOp::Xor | UnaryOp::Arrow => {
                let x = self.expr(x)?;
                let ty = default_type(&self.type_of(e)?);
                Ok(self.fs.emit(
                    Instr::UnOp {
                        op,
                        x,
                        comma_ok: false,
                    },
                    Some(ty),
                    e.span,
                ))
            }
        }
    }

    fn binary(&mut self, e: &Expr, op: BinaryOp, x: &Expr, y: &Expr) -> Result<Value> {
        if op.is_logical() {
            return self.logical_binop(e, op, x, y);
        }
        let ty = default_type(&self.type_of(e)?);
        let xv = self.expr(x)?;
        let yv = self.expr(y)?;
        if op.is_comparison() {
            let cmp = self.fs.emit_compare(self.prog, op, xv, yv, e.span)?;
            return self.fs.emit_conv(self.prog, cmp, &ty, e.span);
        }
        self.fs.emit_arith(self.prog, op, xv, yv, &ty, e.span)
    }

    /// `x && y` and `x || y`. The result goes through a cell written on
    /// both paths; lifting turns it into a φ-node.
    fn logical_binop(&mut self, e: &Expr, op: BinaryOp, x: &Expr, y: &Expr) -> Result<Value> {
        let ty = default_type(&self.type_of(e)?);
        let cell = self.fs.add_local(ty.clone(), op.as_str(), e.span);
        let short = Value::Const(Const::new(ty, ConstValue::Bool(op == BinaryOp::LOr)));
        self.fs.emit_store(self.prog, cell.clone(), short, e.span)?;

        let rhs = self.fs.new_block("binop.rhs");
        let done = self.fs.new_block("binop.done");
        if op == BinaryOp::LAnd {
            self.cond(x, rhs, done)?;
        } else {
            self.cond(x, done, rhs)?;
        }
        self.fs.current = Some(rhs);
        let y = self.expr(y)?;
        self.fs.emit_store(self.prog, cell.clone(), y, e.span)?;
        self.fs.emit_jump(done);
        self.fs.current = Some(done);
        Ok(self.fs.emit_load(cell, e.span))
    }

    /// Branches to `t` if `e` holds, else to `f`, short-circuiting `&&`,
    /// `||` and `!` into control flow.
    pub fn cond(&mut self, e: &Expr, t: usize, f: usize) -> Result<()> {
        match &e.kind {
            ExprKind::Paren(inner) => return self.cond(inner, t, f),
            ExprKind::Binary(BinaryOp::LAnd, x, y) => {
                let ltrue = self.fs.new_block("cond.true");
                self.cond(x, ltrue, f)?;
                self.fs.current = Some(ltrue);
                return self.cond(y, t, f);
            }
            ExprKind::Binary(BinaryOp::LOr, x, y) => {
                let lfalse = self.fs.new_block("cond.false");
                self.cond(x, t, lfalse)?;
                self.fs.current = Some(lfalse);
                return self.cond(y, t, f);
            }
            ExprKind::Unary(UnaryOp::Not, x) => return self.cond(x, f, t),
            _ => {}
        }
        let v = self.expr(e)?;
        self.fs.emit_if(v, t, f);
        Ok(())
    }

    fn ident(&mut self, e: &Expr) -> Result<Value> {
        let obj = self.object_of(e.id, e.span)?;
        match obj.kind() {
            ObjectKind::Nil => Ok(Value::Const(Const::zero(self.type_of(e)?))),
            ObjectKind::Builtin(kind) => {
                let sig = self.type_of(e)?;
                Ok(Value::Builtin(self.prog.builtin(*kind, sig)))
            }
            ObjectKind::Func => Ok(Value::Function(self.prog.declared_func(obj))),
            ObjectKind::Const(value) => Ok(Value::Const(Const::new(default_type(obj.ty()), value.clone()))),
            ObjectKind::Var { .. } => {
                let addr = self.var_addr(obj, false, e.span)?;
                Ok(self.fs.emit_load(addr, e.span))
            }
            _ => build_bail!(self.name(), e.span, "{} is not a value", obj.name()),
        }
    }

    /// The cell of a variable: a package global or a local, possibly
    /// captured from an enclosing function.
    fn var_addr(&mut self, obj: &Object, escaping: bool, span: Span) -> Result<Value> {
        if Self::is_package_var(obj) {
            return match self.prog.declared_global(obj) {
                Some(g) => Ok(Value::Global(g)),
                None => build_bail!(self.name(), span, "no global for {}", obj.name()),
            };
        }
        self.lookup(obj, escaping, span)
    }

    /// `pkg.Name`.
    fn qualified_ident(&mut self, name: &Ident) -> Result<Value> {
        let obj = self.object_of(name.id, name.span)?;
        match obj.kind() {
            ObjectKind::Func => Ok(Value::Function(self.prog.declared_func(obj))),
            ObjectKind::Const(value) => Ok(Value::Const(Const::new(obj.ty().clone(), value.clone()))),
            ObjectKind::Var { .. } => {
                let addr = self.var_addr(obj, false, name.span)?;
                Ok(self.fs.emit_load(addr, name.span))
            }
            _ => build_bail!(self.name(), name.span, "{} is not a value", obj.full_name()),
        }
    }

    fn selector(&mut self, e: &Expr, x: &Expr, name: &Ident) -> Result<Value> {
        let Some(sel) = self.info.selections.get(&e.id) else {
            return self.qualified_ident(name);
        };
        match sel.kind {
            SelectionKind::MethodExpr => {
                let thunk = self.prog.thunk(&sel.recv, &method_selection(sel));
                let ty = self.type_of(e)?;
                self.fs.emit_conv(self.prog, Value::Function(thunk), &ty, e.span)
            }
            SelectionKind::MethodVal => {
                let want_addr = sel.obj.recv().is_some_and(|r| r.ty().is_pointer());
                let recv = self.receiver(x, want_addr, true, sel)?;
                let bound = self.prog.bound(&sel.obj);
                let ty = self.type_of(e)?;
                Ok(self.fs.emit(
                    Instr::MakeClosure {
                        func: Value::Function(bound),
                        bindings: vec![recv],
                    },
                    Some(ty),
                    name.span,
                ))
            }
            SelectionKind::FieldVal => {
                let Some((&last, path)) = sel.index.split_last() else {
                    build_bail!(self.name(), e.span, "empty field selection");
                };
                let v = self.expr(x)?;
                let v = self.fs.emit_implicit_selections(v, path, e.span)?;
                self.fs.emit_field_selection(v, last, false, name.span)
            }
        }
    }

    /// Evaluates the receiver of a method or field selection and walks the
    /// embedded fields before the selected member. The result is an
    /// address when `want_addr`, else a value.
    pub fn receiver(&mut self, x: &Expr, want_addr: bool, escaping: bool, sel: &Selection) -> Result<Value> {
        let xt = self.type_of(x)?;
        let mut v = if want_addr && !sel.indirect && !xt.is_pointer() {
            self.addr(x, escaping)?.addr(self)?
        } else {
            self.expr(x)?
        };
        let path = &sel.index[..sel.index.len().saturating_sub(1)];
        v = self.fs.emit_implicit_selections(v, path, x.span)?;
        let vt = self.fs.type_of(&v);
        if !vt.is_interface() && !want_addr && vt.is_pointer() {
            v = self.fs.emit_load(v, x.span);
        }
        Ok(v)
    }

    fn index(&mut self, e: &Expr, x: &Expr, index: &Expr) -> Result<Value> {
        let xt = self.type_of(x)?;
        match xt.under() {
            TypeKind::Array(elem, _) => {
                let elem = elem.clone();
                let xv = self.expr(x)?;
                let i = self.expr(index)?;
                let i = self.fs.emit_conv(self.prog, i, &Type::basic(BasicKind::Int), e.span)?;
                Ok(self.fs.emit(Instr::Index { x: xv, index: i }, Some(elem), e.span))
            }
            TypeKind::Map(key, elem) => {
                let (key, elem) = (key.clone(), elem.clone());
                let m = self.expr(x)?;
                let k = self.expr(index)?;
                let k = self.fs.emit_conv(self.prog, k, &key, e.span)?;
                Ok(self.fs.emit(
                    Instr::Lookup {
                        x: m,
                        index: k,
                        comma_ok: false,
                    },
                    Some(elem),
                    e.span,
                ))
            }
            TypeKind::Basic(kind) if kind.is_string() => {
                let s = self.expr(x)?;
                let i = self.expr(index)?;
                Ok(self.fs.emit(
                    Instr::Lookup {
                        x: s,
                        index: i,
                        comma_ok: false,
                    },
                    Some(Type::basic(BasicKind::Uint8)),
                    e.span,
                ))
            }
            TypeKind::Slice(_) | TypeKind::Pointer(_) => self.addr(e, false)?.load(self),
            _ => build_bail!(self.name(), e.span, "cannot index {xt}"),
        }
    }

    /// Lowers an addressable expression to the location it denotes.
    /// `escaping` marks cells that must live on the heap because the
    /// address outlives the expression.
    pub fn addr(&mut self, e: &Expr, escaping: bool) -> Result<Lvalue> {
        match &e.kind {
            ExprKind::Ident(name) => {
                if name == "_" {
                    return Ok(Lvalue::Blank);
                }
                let obj = self.object_of(e.id, e.span)?;
                let addr = self.var_addr(obj, escaping, e.span)?;
                Ok(Lvalue::address(addr, e.span))
            }
            ExprKind::Paren(inner) => self.addr(inner, escaping),
            ExprKind::CompositeLit(elts) => {
                let ty = self.type_of(e)?.deref().clone();
                let cell = if escaping {
                    self.fs.emit_new(ty, "complit", e.span)
                } else {
                    self.fs.add_local(ty, "complit", e.span)
                };
                let mut sb = StoreBuf::default();
                self.comp_lit(cell.clone(), e, elts, &mut sb)?;
                sb.emit(self)?;
                Ok(Lvalue::address(cell, e.span))
            }
            ExprKind::Selector(x, name) => {
                let Some(sel) = self.info.selections.get(&e.id) else {
                    let obj = self.object_of(name.id, name.span)?;
                    let addr = self.var_addr(obj, escaping, name.span)?;
                    return Ok(Lvalue::address(addr, name.span));
                };
                let Some(&last) = sel.index.last() else {
                    build_bail!(self.name(), e.span, "empty field selection");
                };
                let v = self.receiver(x, true, escaping, sel)?;
                let addr = self.fs.emit_field_selection(v, last, true, name.span)?;
                Ok(Lvalue::address(addr, name.span))
            }
            ExprKind::Index(x, index) => {
                let xt = self.type_of(x)?;
                let (xv, elem) = match xt.under() {
                    TypeKind::Array(elem, _) => (self.addr(x, escaping)?.addr(self)?, elem.clone()),
                    TypeKind::Pointer(arr) => {
                        let Some(elem) = arr.elem() else {
                            build_bail!(self.name(), e.span, "cannot index {xt}");
                        };
                        (self.expr(x)?, elem)
                    }
                    TypeKind::Slice(elem) => {
                        let elem = elem.clone();
                        (self.expr(x)?, elem)
                    }
                    TypeKind::Map(key, elem) => {
                        let (key, elem) = (key.clone(), elem.clone());
                        let map = self.expr(x)?;
                        let k = self.expr(index)?;
                        let key = self.fs.emit_conv(self.prog, k, &key, e.span)?;
                        return Ok(Lvalue::Element {
                            map,
                            key,
                            elem,
                            span: e.span,
                        });
                    }
                    _ => build_bail!(self.name(), e.span, "cannot index {xt}"),
                };
                let i = self.expr(index)?;
                let i = self.fs.emit_conv(self.prog, i, &Type::basic(BasicKind::Int), e.span)?;
                let addr = self.fs.emit(
                    Instr::IndexAddr { x: xv, index: i },
                    Some(Type::pointer(elem)),
                    e.span,
                );
                Ok(Lvalue::address(addr, e.span))
            }
            ExprKind::Star(x) | ExprKind::Unary(UnaryOp::Deref, x) => {
                let ptr = self.expr(x)?;
                Ok(Lvalue::address(ptr, e.span))
            }
            _ => build_bail!(self.name(), e.span, "expression is not addressable"),
        }
    }

    /// Evaluates `e` and stores it to `lvalue`, or queues the store in `sb`.
    /// A composite literal stored to a pointer location is allocated on the
    /// heap and its address stored.
    pub fn assign(&mut self, lvalue: Lvalue, e: &Expr, sb: Option<&mut StoreBuf>) -> Result<()> {
        let value = if matches!(e.unparen().kind, ExprKind::CompositeLit(_))
            && !matches!(lvalue, Lvalue::Blank)
            && lvalue.ty(self).is_pointer()
        {
            self.addr(e, true)?.addr(self)?
        } else {
            self.expr(e)?
        };
        match sb {
            Some(sb) => {
                sb.store(lvalue, value);
                Ok(())
            }
            None => lvalue.store(self, value),
        }
    }

    /// Fills the fresh cell `addr` with the elements of a composite
    /// literal.
    fn comp_lit(&mut self, addr: Value, e: &Expr, elts: &[Expr], sb: &mut StoreBuf) -> Result<()> {
        let ty = self.fs.type_of(&addr).deref().clone();
        match ty.under() {
            TypeKind::Struct(st) => {
                let fields = st.fields.clone();
                for (i, elt) in elts.iter().enumerate() {
                    let (index, value) = match &elt.kind {
                        ExprKind::KeyValue(key, value) => {
                            let ExprKind::Ident(field_name) = &key.kind else {
                                build_bail!(self.name(), key.span, "struct literal key is not a field name");
                            };
                            let Some(index) = fields.iter().position(|f| f.name() == field_name) else {
                                build_bail!(self.name(), key.span, "{ty} has no field {field_name}");
                            };
                            (index, value.as_ref())
                        }
                        _ => (i, elt),
                    };
                    let Some(field) = fields.get(index) else {
                        build_bail!(self.name(), elt.span, "too many values in {ty} literal");
                    };
                    let faddr = self.fs.emit(
                        Instr::FieldAddr {
                            x: addr.clone(),
                            field: index,
                        },
                        Some(Type::pointer(field.ty().clone())),
                        elt.span,
                    );
                    self.assign(Lvalue::address(faddr, elt.span), value, Some(sb))?;
                }
            }
            TypeKind::Array(elem, _) | TypeKind::Slice(elem) => {
                let elem = elem.clone();
                let is_slice = matches!(ty.under(), TypeKind::Slice(_));
                let array = if is_slice {
                    let len = self.array_len(elts)?;
                    self.fs.emit_new(Type::array(elem.clone(), len), "slicelit", e.span)
                } else {
                    addr.clone()
                };
                let mut next = 0;
                for elt in elts {
                    let (i, value) = match &elt.kind {
                        ExprKind::KeyValue(key, value) => (self.const_index(key)?, value.as_ref()),
                        _ => (next, elt),
                    };
                    next = i + 1;
                    let iaddr = self.fs.emit(
                        Instr::IndexAddr {
                            x: array.clone(),
                            index: int_const(i),
                        },
                        Some(Type::pointer(elem.clone())),
                        elt.span,
                    );
                    let lvalue = Lvalue::address(iaddr, elt.span);
                    if is_slice {
                        // The backing array is not yet visible to anyone.
                        self.assign(lvalue, value, None)?;
                    } else {
                        self.assign(lvalue, value, Some(sb))?;
                    }
                }
                if is_slice {
                    let slice = self.fs.emit(
                        Instr::Slice {
                            x: array,
                            low: None,
                            high: None,
                            max: None,
                        },
                        Some(ty.clone()),
                        e.span,
                    );
                    self.fs.emit_store(self.prog, addr, slice, e.span)?;
                }
            }
            TypeKind::Map(key_ty, elem) => {
                let (key_ty, elem) = (key_ty.clone(), elem.clone());
                let map = self.fs.emit(
                    Instr::MakeMap {
                        reserve: Some(int_const(elts.len() as i64)),
                    },
                    Some(ty.clone()),
                    e.span,
                );
                for elt in elts {
                    let ExprKind::KeyValue(key, value) = &elt.kind else {
                        build_bail!(self.name(), elt.span, "map literal element without a key");
                    };
                    let k = if matches!(key.unparen().kind, ExprKind::CompositeLit(_)) && key_ty.is_pointer() {
                        self.addr(key, true)?.addr(self)?
                    } else {
                        self.expr(key)?
                    };
                    let k = self.fs.emit_conv(self.prog, k, &key_ty, elt.span)?;
                    let lvalue = Lvalue::Element {
                        map: map.clone(),
                        key: k,
                        elem: elem.clone(),
                        span: elt.span,
                    };
                    self.assign(lvalue, value, None)?;
                }
                sb.store(Lvalue::address(addr, e.span), map);
            }
            _ => build_bail!(self.name(), e.span, "composite literal of type {ty}"),
        }
        Ok(())
    }

    fn const_index(&mut self, key: &Expr) -> Result<i64> {
        let k = self.expr(key)?;
        match k.as_const().and_then(Const::int64) {
            Some(i) if i >= 0 => Ok(i),
            _ => build_bail!(self.name(), key.span, "index must be a non-negative constant"),
        }
    }

    /// The length of the array holding the elements of a slice literal.
    fn array_len(&mut self, elts: &[Expr]) -> Result<u64> {
        let mut max = 0;
        let mut next = 0;
        for elt in elts {
            let i = match &elt.kind {
                ExprKind::KeyValue(key, _) => self.const_index(key)?,
                _ => next,
            };
            next = i + 1;
            max = max.max(next);
        }
        Ok(max as u64)
    }

    /// Lowers an expression yielding a tuple: a multi-value call, or the
    /// two-value forms of map lookup, type assertion and receive.
    pub fn expr_n(&mut self, e: &Expr) -> Result<Value> {
        let e = e.unparen();
        let ok_tuple = |ty: Type| Type::tuple_of([ty, Type::basic(BasicKind::Bool)]);
        match &e.kind {
            ExprKind::Call { fun, args, ellipsis } => self.call_expr(e, fun, args, *ellipsis),
            ExprKind::Index(x, index) => {
                let xt = self.type_of(x)?;
                let TypeKind::Map(key, elem) = xt.under() else {
                    build_bail!(self.name(), e.span, "comma-ok index of non-map {xt}");
                };
                let (key, elem) = (key.clone(), elem.clone());
                let m = self.expr(x)?;
                let k = self.expr(index)?;
                let k = self.fs.emit_conv(self.prog, k, &key, e.span)?;
                Ok(self.fs.emit(
                    Instr::Lookup {
                        x: m,
                        index: k,
                        comma_ok: true,
                    },
                    Some(ok_tuple(elem)),
                    e.span,
                ))
            }
            ExprKind::TypeAssert(x, Some(_)) => {
                let ty = self.type_of(e)?;
                let asserted = ty
                    .tuple_vars()
                    .and_then(|vars| vars.first())
                    .map(|var| var.ty().clone())
                    .unwrap_or_else(|| ty.clone());
                let x = self.expr(x)?;
                Ok(self.fs.emit_type_test(x, &asserted, e.span))
            }
            ExprKind::Unary(UnaryOp::Arrow, ch) => {
                let ct = self.type_of(ch)?;
                let Some(elem) = ct.elem() else {
                    build_bail!(self.name(), e.span, "receive from non-channel {ct}");
                };
                let ch = self.expr(ch)?;
                Ok(self.fs.emit(
                    Instr::UnOp {
                        op: UnaryOp::Arrow,
                        x: ch,
                        comma_ok: true,
                    },
                    Some(ok_tuple(elem)),
                    e.span,
                ))
            }
            _ => build_bail!(self.name(), e.span, "expression does not yield multiple values"),
        }
    }
}

pub(crate) fn method_selection(sel: &Selection) -> MethodSelection {
    MethodSelection {
        obj: sel.obj.clone(),
        index: sel.index.clone(),
        indirect: sel.indirect,
    }
}
