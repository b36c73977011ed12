use gossa_core::ast::{Expr, ExprKind};
use gossa_core::error::Result;
use gossa_core::info::{Selection, SelectionKind, TypeAndValue};
use gossa_core::ir::{CallCommon, Const, Instr, Value};
use gossa_core::span::Span;
use gossa_core::types::{BasicKind, BuiltinKind, Object, Signature, Type, TypeKind};

use crate::builder::expr::int_const;
use crate::builder::Builder;
use crate::{build_bail, invariant_bail};

impl Builder<'_> {
    /// A call expression: a conversion, an intrinsic builtin, or a `Call`.
    pub fn call_expr(&mut self, e: &Expr, fun: &Expr, args: &[Expr], ellipsis: bool) -> Result<Value> {
        if self.tv(fun).is_some_and(TypeAndValue::is_type) {
            let [arg] = args else {
                build_bail!(self.name(), e.span, "conversion takes exactly one argument");
            };
            let v = self.expr(arg)?;
            let ty = self.type_of(e)?;
            return self.fs.emit_conv(self.prog, v, &ty, e.span);
        }

        let callee = fun.unparen();
        if matches!(callee.kind, ExprKind::Ident(_)) {
            if let Some(kind) = self.info.object_of(callee.id).and_then(Object::as_builtin) {
                if let Some(v) = self.builtin(kind, e, args)? {
                    return Ok(v);
                }
            }
        }

        let call = self.call_common(e, fun, args, ellipsis)?;
        let value_ty = self.fs.type_of(&call.value);
        let ty = match call.signature(&value_ty) {
            Some(sig) => sig.result_type(),
            None => self.type_of(e)?,
        };
        Ok(self.fs.emit(Instr::Call(call), Some(ty), e.span))
    }

    /// The callee and arguments of a call, go or defer.
    pub fn call_common(&mut self, e: &Expr, fun: &Expr, args: &[Expr], ellipsis: bool) -> Result<CallCommon> {
        let (mut call, sig) = self.callee(fun.unparen())?;
        let recv = std::mem::take(&mut call.args);
        call.args = self.call_args(&sig, args, ellipsis, recv, e.span)?;
        call.has_ellipsis = ellipsis;
        call.span = e.span;
        Ok(call)
    }

    /// The callee of a call together with the signature its explicit
    /// arguments are matched against. A method receiver, when passed
    /// explicitly, is already in the call's arguments.
    fn callee(&mut self, fun: &Expr) -> Result<(CallCommon, Signature)> {
        if let ExprKind::Selector(x, _) = &fun.kind {
            let sel = self
                .info
                .selections
                .get(&fun.id)
                .filter(|sel| sel.kind == SelectionKind::MethodVal);
            if let Some(sel) = sel {
                return self.method_callee(x, sel);
            }
        }
        let value = self.expr(fun)?;
        let ty = self.fs.type_of(&value);
        let Some(sig) = ty.as_signature().cloned() else {
            build_bail!(self.name(), fun.span, "call of non-function of type {ty}");
        };
        Ok((CallCommon::call(value, Vec::new()), sig))
    }

    /// `x.m(...)`: dynamic dispatch for interface methods, a direct call for
    /// methods declared on `x`'s type, a call of the promotion wrapper for
    /// methods of embedded fields.
    fn method_callee(&mut self, x: &Expr, sel: &Selection) -> Result<(CallCommon, Signature)> {
        let method = &sel.obj;
        let (Some(method_sig), Some(recv_ty)) = (method.signature(), method.recv().map(|r| r.ty().clone())) else {
            invariant_bail!(self.name(), "{} is not a method", method.full_name());
        };
        let sig = method_sig.without_recv();

        if recv_ty.is_interface() {
            let iface = self.receiver(x, false, true, sel)?;
            let it = self.fs.type_of(&iface);
            let Some(index) = it.as_interface().and_then(|i| i.method_index(&method.id())) else {
                build_bail!(self.name(), x.span, "{it} has no method {}", method.name());
            };
            return Ok((CallCommon::invoke(iface, method.clone(), index, Vec::new()), sig));
        }

        if sel.index.len() > 1 {
            return self.promoted_callee(x, sel, sig);
        }

        let recv = self.receiver(x, recv_ty.is_pointer(), true, sel)?;
        let callee = Value::Function(self.prog.declared_func(method));
        Ok((CallCommon::call(callee, vec![recv]), sig))
    }

    /// Calls a promoted method through the wrapper in the method set of
    /// `x`'s type, or of its pointer type when the method needs `&x`.
    fn promoted_callee(&mut self, x: &Expr, sel: &Selection, sig: Signature) -> Result<(CallCommon, Signature)> {
        let xt = self.type_of(x)?;
        let id = sel.obj.id();
        let (recv, entry) = match self.prog.method_set_unbuilt(&xt).lookup(&id).cloned() {
            Some(entry) => (self.expr(x)?, entry),
            None => {
                let Some(entry) = self
                    .prog
                    .method_set_unbuilt(&Type::pointer(xt.clone()))
                    .lookup(&id)
                    .cloned()
                else {
                    build_bail!(self.name(), x.span, "{xt} has no method {}", sel.obj.name());
                };
                (self.addr(x, true)?.addr(self)?, entry)
            }
        };
        let Some(func) = entry.func else {
            invariant_bail!(self.name(), "no function for promoted method {}", sel.obj.full_name());
        };
        Ok((CallCommon::call(Value::Function(func), vec![recv]), sig))
    }

    /// Evaluates the arguments, expanding a multi-value argument, converting
    /// each to its parameter type and packing variadic arguments into a
    /// slice.
    fn call_args(
        &mut self,
        sig: &Signature,
        args: &[Expr],
        ellipsis: bool,
        mut out: Vec<Value>,
        span: Span,
    ) -> Result<Vec<Value>> {
        let params = &sig.params;
        if ellipsis {
            // f(x, y, zs...): the slice is passed through.
            for (i, arg) in args.iter().enumerate() {
                let v = self.expr(arg)?;
                let v = match params.get(i) {
                    Some(param) => self.fs.emit_conv(self.prog, v, param.ty(), arg.span)?,
                    None => v,
                };
                out.push(v);
            }
            return Ok(out);
        }

        let offset = out.len();
        for arg in args {
            let v = self.expr(arg)?;
            let vt = self.fs.type_of(&v);
            if vt.is_tuple() {
                for i in 0..vt.tuple_len() {
                    out.push(self.fs.emit_extract(v.clone(), i)?);
                }
            } else {
                out.push(v);
            }
        }

        let fixed = if sig.variadic {
            params.len().saturating_sub(1)
        } else {
            params.len()
        };
        if out.len() < offset + fixed {
            build_bail!(self.name(), span, "not enough arguments in call");
        }
        for (i, param) in params.iter().take(fixed).enumerate() {
            let arg = out[offset + i].clone();
            out[offset + i] = self.fs.emit_conv(self.prog, arg, param.ty(), span)?;
        }

        if sig.variadic {
            let Some(last) = params.last() else {
                invariant_bail!(self.name(), "variadic signature without parameters");
            };
            let slice_ty = last.ty().clone();
            let Some(elem) = slice_ty.elem() else {
                invariant_bail!(self.name(), "variadic parameter of non-slice type {slice_ty}");
            };
            let varargs = out.split_off(offset + fixed);
            if varargs.is_empty() {
                out.push(Value::Const(Const::zero(slice_ty)));
            } else {
                let array_ty = Type::array(elem.clone(), varargs.len() as u64);
                let array = self.fs.emit_new(array_ty, "varargs", span);
                for (i, arg) in varargs.into_iter().enumerate() {
                    let addr = self.fs.emit(
                        Instr::IndexAddr {
                            x: array.clone(),
                            index: int_const(i as i64),
                        },
                        Some(Type::pointer(elem.clone())),
                        span,
                    );
                    self.fs.emit_store(self.prog, addr, arg, span)?;
                }
                out.push(self.fs.emit(
                    Instr::Slice {
                        x: array,
                        low: None,
                        high: None,
                        max: None,
                    },
                    Some(slice_ty),
                    span,
                ));
            }
        }
        Ok(out)
    }

    /// Builtins with a dedicated lowering. `None` means the builtin is an
    /// ordinary call of a `Builtin` value.
    fn builtin(&mut self, kind: BuiltinKind, e: &Expr, args: &[Expr]) -> Result<Option<Value>> {
        let int = Type::basic(BasicKind::Int);
        match kind {
            BuiltinKind::Make => {
                let ty = self.type_of(e)?;
                let v = match ty.under() {
                    TypeKind::Slice(elem) => {
                        let elem = elem.clone();
                        let [_, len, rest @ ..] = args else {
                            build_bail!(self.name(), e.span, "make of a slice needs a length");
                        };
                        let len = self.expr(len)?;
                        let cap = match rest.first() {
                            Some(cap) => self.expr(cap)?,
                            None => len.clone(),
                        };
                        let known_cap = cap.as_const().and_then(Const::int64).and_then(|c| u64::try_from(c).ok());
                        match known_cap {
                            // make([]T, n, c) with constant c is new([c]T)[:n].
                            Some(c) => {
                                let array = self.fs.emit_new(Type::array(elem, c), "makeslice", e.span);
                                self.fs.emit(
                                    Instr::Slice {
                                        x: array,
                                        low: None,
                                        high: Some(len),
                                        max: None,
                                    },
                                    Some(ty.clone()),
                                    e.span,
                                )
                            }
                            None => {
                                let len = self.fs.emit_conv(self.prog, len, &int, e.span)?;
                                let cap = self.fs.emit_conv(self.prog, cap, &int, e.span)?;
                                self.fs.emit(Instr::MakeSlice { len, cap }, Some(ty.clone()), e.span)
                            }
                        }
                    }
                    TypeKind::Map(..) => {
                        let reserve = args.get(1).map(|a| self.expr(a)).transpose()?;
                        self.fs.emit(Instr::MakeMap { reserve }, Some(ty.clone()), e.span)
                    }
                    TypeKind::Chan(..) => {
                        let size = match args.get(1) {
                            Some(size) => self.expr(size)?,
                            None => int_const(0),
                        };
                        self.fs.emit(Instr::MakeChan { size }, Some(ty.clone()), e.span)
                    }
                    _ => build_bail!(self.name(), e.span, "cannot make {ty}"),
                };
                Ok(Some(v))
            }
            BuiltinKind::New => {
                let ty = self.type_of(e)?;
                Ok(Some(self.fs.emit_new(ty.deref().clone(), "new", e.span)))
            }
            BuiltinKind::Len | BuiltinKind::Cap => {
                let [arg] = args else {
                    return Ok(None);
                };
                let at = self.type_of(arg)?;
                if let TypeKind::Array(_, n) = at.deref().under() {
                    let n = *n as i64;
                    // Evaluated for its effects only.
                    self.expr(arg)?;
                    return Ok(Some(int_const(n)));
                }
                Ok(None)
            }
            BuiltinKind::Panic => {
                let [arg] = args else {
                    build_bail!(self.name(), e.span, "panic takes exactly one argument");
                };
                let v = self.expr(arg)?;
                let any = Type::interface(Vec::new(), Vec::new());
                let x = self.fs.emit_conv(self.prog, v, &any, e.span)?;
                self.fs.emit(Instr::Panic { x }, None, e.span);
                self.fs.current = Some(self.fs.new_block("unreachable"));
                // Never observed: control does not continue past a panic.
                let ty = self.type_of(e)?;
                Ok(Some(Value::Const(Const::zero(ty))))
            }
            _ => Ok(None),
        }
    }
}
