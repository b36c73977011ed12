//! Emission primitives shared by the function builder and the synthesised
//! wrappers. Every helper appends to the current block and inserts the
//! implicit conversions the type system requires.

use std::collections::HashMap;
use std::sync::Arc;

use gossa_core::error::Result;
use gossa_core::ir::{CallCommon, Const, Function, FunctionBody, Instr, Node, NodeKind, Value};
use gossa_core::span::Span;
use gossa_core::token::{BinaryOp, UnaryOp};
use gossa_core::types::{default_type, implements, BasicKind, Object, Type, TypeKind};

use crate::build_bail;
use crate::program::Program;

/// Jump destinations of the innermost enclosing breakable statement.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct Targets {
    pub break_block: Option<usize>,
    pub continue_block: Option<usize>,
    pub fallthrough_block: Option<usize>,
}

/// The blocks a label resolves to. `goto` jumps to `goto_block`; the others
/// are set when the labelled statement is a loop, switch or select.
#[derive(Debug, Clone, Copy)]
pub(crate) struct LabelBlocks {
    pub goto_block: usize,
    pub break_block: Option<usize>,
    pub continue_block: Option<usize>,
}

/// A function under construction.
pub(crate) struct FnState {
    pub func: Arc<Function>,
    pub body: FunctionBody,
    /// Where emitted instructions go; `None` after a terminator.
    pub current: Option<usize>,
    /// Local variable objects to their cell addresses.
    pub objects: HashMap<Object, Value>,
    /// For each free variable, the value it captures in the parent.
    pub captures: Vec<Value>,
    pub targets: Vec<Targets>,
    pub labels: HashMap<String, LabelBlocks>,
    /// Cells of named results, or of every result when the function defers.
    pub result_cells: Vec<Value>,
    /// The shared return block of functions with deferred calls.
    pub exit: Option<usize>,
}

impl FnState {
    pub fn new(func: Arc<Function>) -> Self {
        let mut body = FunctionBody::new();
        let entry = body.new_block("entry");
        Self {
            func,
            body,
            current: Some(entry),
            objects: HashMap::new(),
            captures: Vec::new(),
            targets: Vec::new(),
            labels: HashMap::new(),
            result_cells: Vec::new(),
            exit: None,
        }
    }

    pub fn name(&self) -> String {
        self.func.relative_name(None)
    }

    pub fn new_block(&mut self, comment: &str) -> usize {
        self.body.new_block(comment)
    }

    pub fn type_of(&self, v: &Value) -> Type {
        self.body.type_of(v)
    }

    /// Appends an instruction to the current block. After a terminator the
    /// instruction is recorded but placed nowhere, so it never executes.
    pub fn emit(&mut self, instr: Instr, ty: Option<Type>, span: Span) -> Value {
        let id = match self.current {
            Some(block) => self.body.append(block, instr, ty, span),
            None => self.body.add_node(Node {
                kind: NodeKind::Instr(instr),
                ty,
                name: String::new(),
                block: None,
                span,
            }),
        };
        Value::Local(id)
    }

    pub fn emit_jump(&mut self, target: usize) {
        if let Some(block) = self.current.take() {
            self.body.append(block, Instr::Jump, None, Span::NONE);
            self.body.add_edge(block, target);
        }
    }

    pub fn emit_if(&mut self, cond: Value, then_block: usize, else_block: usize) {
        if let Some(block) = self.current.take() {
            self.body.append(block, Instr::If { cond }, None, Span::NONE);
            self.body.add_edge(block, then_block);
            self.body.add_edge(block, else_block);
        }
    }

    pub fn add_param(&mut self, name: &str, ty: Type, obj: Option<Object>, span: Span) -> Value {
        Value::Local(self.body.add_param(name, ty, obj, span))
    }

    /// A frame cell holding a zero `ty`.
    pub fn add_local(&mut self, ty: Type, comment: &str, span: Span) -> Value {
        let alloc = self.emit(
            Instr::Alloc {
                heap: false,
                comment: comment.to_string(),
            },
            Some(Type::pointer(ty)),
            span,
        );
        if let Value::Local(id) = &alloc {
            self.body.locals.push(*id);
        }
        alloc
    }

    /// A heap cell holding a zero `ty`.
    pub fn emit_new(&mut self, ty: Type, comment: &str, span: Span) -> Value {
        self.emit(
            Instr::Alloc {
                heap: true,
                comment: comment.to_string(),
            },
            Some(Type::pointer(ty)),
            span,
        )
    }

    /// Moves a frame cell to the heap because a closure captures it.
    pub fn mark_escaping(&mut self, addr: &Value) {
        let Value::Local(id) = addr else {
            return;
        };
        if let Some(Instr::Alloc { heap, .. }) = self.body.instr_mut(*id) {
            *heap = true;
            self.body.locals.retain(|l| l != id);
        }
    }

    pub fn emit_load(&mut self, addr: Value, span: Span) -> Value {
        let ty = self.type_of(&addr).deref().clone();
        self.emit(
            Instr::UnOp {
                op: UnaryOp::Deref,
                x: addr,
                comma_ok: false,
            },
            Some(ty),
            span,
        )
    }

    pub fn emit_store(&mut self, prog: &Program, addr: Value, val: Value, span: Span) -> Result<()> {
        let elem = self.type_of(&addr).deref().clone();
        let val = self.emit_conv(prog, val, &elem, span)?;
        self.emit(Instr::Store { addr, val }, None, span);
        Ok(())
    }

    /// Converts `val` to `ty`, choosing between a no-op, a new constant,
    /// `MakeInterface`, `ChangeInterface`/`TypeAssert`, `ChangeType` and
    /// `Convert`.
    pub fn emit_conv(&mut self, prog: &Program, val: Value, ty: &Type, span: Span) -> Result<Value> {
        let src = self.type_of(&val);
        if &src == ty {
            return Ok(val);
        }

        if ty.is_interface() {
            if is_value_preserving(&src, ty) {
                return Ok(self.emit(Instr::ChangeType { x: val }, Some(ty.clone()), span));
            }
            if src.is_interface() {
                return Ok(self.emit_type_assert(val, ty, span));
            }
            if src.is_untyped_nil() {
                return Ok(Value::Const(Const::zero(ty.clone())));
            }
            let mut val = val;
            if src.is_untyped() {
                val = self.emit_conv(prog, val, &default_type(&src), span)?;
            }
            let concrete = self.type_of(&val);
            prog.need_runtime_type(&concrete);
            return Ok(self.emit(Instr::MakeInterface { x: val }, Some(ty.clone()), span));
        }

        if let Value::Const(c) = &val {
            if matches!(ty.under(), TypeKind::Basic(_)) || c.value.is_none() {
                return Ok(Value::Const(Const {
                    ty: ty.clone(),
                    value: c.value.clone(),
                }));
            }
        }

        if is_value_preserving(&src, ty) {
            return Ok(self.emit(Instr::ChangeType { x: val }, Some(ty.clone()), span));
        }
        if is_representation_change(&src, ty) {
            return Ok(self.emit(Instr::Convert { x: val }, Some(ty.clone()), span));
        }
        build_bail!(self.name(), span, "cannot convert {val:?} ({src}) to {ty}")
    }

    /// Arithmetic or bitwise `op` with result type `ty`. Both operands are
    /// converted to `ty`, except the count of a shift, which becomes
    /// unsigned.
    pub fn emit_arith(
        &mut self,
        prog: &Program,
        op: BinaryOp,
        x: Value,
        y: Value,
        ty: &Type,
        span: Span,
    ) -> Result<Value> {
        let (x, y) = if op.is_shift() {
            let x = self.emit_conv(prog, x, ty, span)?;
            let yt = self.type_of(&y);
            let y = if yt.is_unsigned() {
                y
            } else {
                self.emit_conv(prog, y, &Type::basic(BasicKind::Uint), span)?
            };
            (x, y)
        } else if op.is_arith() {
            (
                self.emit_conv(prog, x, ty, span)?,
                self.emit_conv(prog, y, ty, span)?,
            )
        } else {
            return Err(crate::error::invariant_error(
                self.name(),
                format!("illegal op in emit_arith: {op}"),
            ));
        };
        Ok(self.emit(Instr::BinOp { op, x, y }, Some(ty.clone()), span))
    }

    /// A `bool`-typed comparison. Operands of differing types are unified
    /// by converting toward an interface operand, else the constant operand.
    pub fn emit_compare(
        &mut self,
        prog: &Program,
        op: BinaryOp,
        x: Value,
        y: Value,
        span: Span,
    ) -> Result<Value> {
        let (xt, yt) = (self.type_of(&x), self.type_of(&y));
        if op == BinaryOp::Eql && is_true(&x) && yt.is_boolean() {
            return Ok(y);
        }
        let (x, y) = if xt.underlying() == yt.underlying() {
            (x, y)
        } else if xt.is_interface() {
            let y = self.emit_conv(prog, y, &xt, span)?;
            (x, y)
        } else if yt.is_interface() {
            let x = self.emit_conv(prog, x, &yt, span)?;
            (x, y)
        } else if matches!(x, Value::Const(_)) {
            let x = self.emit_conv(prog, x, &yt, span)?;
            (x, y)
        } else if matches!(y, Value::Const(_)) {
            let y = self.emit_conv(prog, y, &xt, span)?;
            (x, y)
        } else {
            (x, y)
        };
        Ok(self.emit(
            Instr::BinOp { op, x, y },
            Some(Type::basic(BasicKind::Bool)),
            span,
        ))
    }

    pub fn emit_extract(&mut self, tuple: Value, index: usize) -> Result<Value> {
        let tt = self.type_of(&tuple);
        let Some(ty) = tt
            .tuple_vars()
            .and_then(|vars| vars.get(index))
            .map(|var| var.ty().clone())
        else {
            return Err(crate::error::invariant_error(
                self.name(),
                format!("extract #{index} from non-tuple {tt}"),
            ));
        };
        Ok(self.emit(Instr::Extract { tuple, index }, Some(ty), Span::NONE))
    }

    /// `x.(ty)` without comma-ok. Assertions to a superinterface of `x`'s
    /// type cannot fail and become `ChangeInterface`.
    pub fn emit_type_assert(&mut self, x: Value, ty: &Type, span: Span) -> Value {
        let xt = self.type_of(&x);
        if ty.is_interface() && implements(&xt, ty) {
            return self.emit(Instr::ChangeInterface { x }, Some(ty.clone()), span);
        }
        self.emit(
            Instr::TypeAssert {
                x,
                asserted: ty.clone(),
                comma_ok: false,
            },
            Some(ty.clone()),
            span,
        )
    }

    /// `x.(ty)` in comma-ok form, yielding `(ty, bool)`.
    pub fn emit_type_test(&mut self, x: Value, ty: &Type, span: Span) -> Value {
        self.emit(
            Instr::TypeAssert {
                x,
                asserted: ty.clone(),
                comma_ok: true,
            },
            Some(Type::tuple_of([ty.clone(), Type::basic(BasicKind::Bool)])),
            span,
        )
    }

    /// Calls `call` and returns its results from the current function,
    /// whose results must match the callee's.
    pub fn emit_tail_call(&mut self, call: CallCommon) -> Result<()> {
        let span = call.span;
        let results_ty = self.func.sig.result_type();
        let arity = self.func.sig.results.len();
        let value = self.emit(Instr::Call(call), Some(results_ty), span);
        let results = match arity {
            0 => Vec::new(),
            1 => vec![value],
            n => (0..n)
                .map(|i| self.emit_extract(value.clone(), i))
                .collect::<Result<Vec<_>>>()?,
        };
        self.emit(Instr::Return { results }, None, span);
        self.current = None;
        Ok(())
    }

    /// Selects field `index` of `v`: its address when `v` points to a
    /// struct (loaded unless `want_addr`), otherwise its value.
    pub fn emit_field_selection(
        &mut self,
        v: Value,
        index: usize,
        want_addr: bool,
        span: Span,
    ) -> Result<Value> {
        let vt = self.type_of(&v);
        if let Some(st) = vt.pointer_elem() {
            let Some(field) = st.field(index) else {
                build_bail!(self.name(), span, "{st} has no field #{index}");
            };
            let ty = Type::pointer(field.ty().clone());
            let addr = self.emit(Instr::FieldAddr { x: v, field: index }, Some(ty), span);
            return Ok(if want_addr {
                addr
            } else {
                self.emit_load(addr, span)
            });
        }
        let Some(field) = vt.field(index) else {
            build_bail!(self.name(), span, "{vt} has no field #{index}");
        };
        let ty = field.ty().clone();
        Ok(self.emit(Instr::Field { x: v, field: index }, Some(ty), span))
    }

    /// Walks the embedded fields `indices`. A pointer `v` stays a pointer:
    /// each step takes a field address and loads it when the embedded field
    /// is itself a pointer.
    pub fn emit_implicit_selections(&mut self, mut v: Value, indices: &[usize], span: Span) -> Result<Value> {
        for &index in indices {
            let vt = self.type_of(&v);
            if let Some(st) = vt.pointer_elem() {
                let Some(field) = st.field(index) else {
                    build_bail!(self.name(), span, "{st} has no field #{index}");
                };
                let field_ty = field.ty().clone();
                v = self.emit(
                    Instr::FieldAddr { x: v, field: index },
                    Some(Type::pointer(field_ty.clone())),
                    span,
                );
                if field_ty.is_pointer() {
                    v = self.emit_load(v, span);
                }
            } else {
                v = self.emit_field_selection(v, index, false, span)?;
            }
        }
        Ok(v)
    }

    /// Runs the post-build passes and hands back the finished body.
    pub fn finish(self, prog: &Program) -> Result<FunctionBody> {
        crate::passes::finish_body(prog, &self.func, self.body)
    }
}

fn is_true(v: &Value) -> bool {
    matches!(v, Value::Const(c) if c.value.as_ref().and_then(|v| v.as_bool()) == Some(true))
}

/// Conversions that change only the type, never the representation.
fn is_value_preserving(src: &Type, dst: &Type) -> bool {
    let (us, ud) = (src.underlying(), dst.underlying());
    if us == ud {
        return true;
    }
    match (us.kind(), ud.kind()) {
        // Only the direction may differ.
        (TypeKind::Chan(_, a), TypeKind::Chan(_, b)) => a == b,
        (TypeKind::Pointer(a), TypeKind::Pointer(b)) => a.underlying() == b.underlying(),
        _ => false,
    }
}

fn is_representation_change(src: &Type, dst: &Type) -> bool {
    let basic_or_bytes = |t: &Type| match t.under() {
        TypeKind::Basic(_) => true,
        TypeKind::Slice(elem) => elem.is_integer(),
        _ => false,
    };
    let unsafe_peer = |a: &Type, b: &Type| {
        a.is_unsafe_pointer() && (b.is_pointer() || b.basic_kind() == Some(BasicKind::Uintptr))
    };
    (basic_or_bytes(src) && basic_or_bytes(dst)) || unsafe_peer(src, dst) || unsafe_peer(dst, src)
}

#[cfg(test)]
mod tests {
    use super::*;
    use gossa_core::config::BuilderMode;
    use gossa_core::constant::ConstValue;
    use gossa_core::types::{ChanDir, Signature};

    fn state() -> (Arc<Program>, FnState) {
        let prog = Program::new(BuilderMode::empty());
        let func = Arc::new(Function::new("f", Signature::new(Vec::new(), Vec::new(), false)));
        (prog, FnState::new(func))
    }

    #[test]
    fn constants_convert_without_instructions() {
        let (prog, mut st) = state();
        let untyped = Value::Const(Const::new(Type::basic(BasicKind::UntypedInt), ConstValue::int(7)));
        let int64 = Type::basic(BasicKind::Int64);
        let v = st.emit_conv(&prog, untyped, &int64, Span::NONE).unwrap();
        assert_eq!(v, Value::Const(Const::int(int64, 7)));
        assert!(st.body.blocks[0].instrs.is_empty());
    }

    #[test]
    fn boxing_records_the_runtime_type() {
        let (prog, mut st) = state();
        let int = Type::basic(BasicKind::Int);
        let cell = st.add_local(int.clone(), "x", Span::NONE);
        let x = st.emit_load(cell, Span::NONE);
        let any = Type::interface(Vec::new(), Vec::new());
        let boxed = st.emit_conv(&prog, x, &any, Span::NONE).unwrap();
        let id = boxed.as_local().unwrap();
        assert!(matches!(st.body.instr(id), Some(Instr::MakeInterface { .. })));
        assert!(prog.runtime_types().contains(&int));
    }

    #[test]
    fn comparison_against_true_is_folded() {
        let (prog, mut st) = state();
        let b = st.add_param("b", Type::basic(BasicKind::Bool), None, Span::NONE);
        let v = st
            .emit_compare(&prog, BinaryOp::Eql, Value::Const(Const::bool(true)), b.clone(), Span::NONE)
            .unwrap();
        assert_eq!(v, b);
    }

    #[test]
    fn shift_counts_become_unsigned() {
        let (prog, mut st) = state();
        let int = Type::basic(BasicKind::Int);
        let x = st.add_param("x", int.clone(), None, Span::NONE);
        let n = st.add_param("n", int.clone(), None, Span::NONE);
        let v = st.emit_arith(&prog, BinaryOp::Shl, x, n, &int, Span::NONE).unwrap();
        let Some(Instr::BinOp { y, .. }) = st.body.instr(v.as_local().unwrap()) else {
            panic!("expected binop");
        };
        assert!(st.type_of(y).is_unsigned());
    }

    #[test]
    fn pointer_and_channel_conversions_keep_their_targets() {
        let pkg = gossa_core::types::TypePackage::new("p", "p");
        let int = Type::basic(BasicKind::Int);
        let celsius = Type::named(Some(pkg.clone()), "Celsius");
        celsius.set_underlying(Type::basic(BasicKind::Float64));
        let point = Type::named(Some(pkg), "Point");
        point.set_underlying(Type::structure(Vec::new()));

        assert!(is_value_preserving(
            &Type::pointer(point.clone()),
            &Type::pointer(Type::structure(Vec::new()))
        ));
        assert!(!is_value_preserving(&Type::pointer(int.clone()), &Type::pointer(celsius)));
        assert!(is_value_preserving(
            &Type::chan(ChanDir::Both, int.clone()),
            &Type::chan(ChanDir::Recv, int.clone())
        ));
        assert!(!is_value_preserving(
            &Type::chan(ChanDir::Both, int),
            &Type::chan(ChanDir::Both, Type::basic(BasicKind::Int64))
        ));
    }

    #[test]
    fn code_after_a_jump_is_not_placed() {
        let (_prog, mut st) = state();
        let next = st.new_block("next");
        st.emit_jump(next);
        let dead = st.emit(Instr::RunDefers, None, Span::NONE);
        assert_eq!(st.body.node(dead.as_local().unwrap()).block, None);
        assert_eq!(st.body.blocks[0].succs, vec![next]);
    }
}
