use crate::ir::Value;
use crate::span::Span;
use crate::token::{BinaryOp, UnaryOp};
use crate::types::{ChanDir, Object, Signature, Type};

/// Dynamic dispatch of a call through an interface value.
#[derive(Debug, Clone)]
pub struct Invoke {
    /// The abstract method being called.
    pub method: Object,
    /// Position of `method` in the interface's sorted method list.
    pub index: usize,
}

/// The callee and arguments shared by `Call`, `Go` and `Defer`.
///
/// In call mode `value` is the function being called and, for method
/// calls, the receiver is `args[0]`. In invoke mode `value` is the
/// interface-typed receiver and `args` excludes it.
#[derive(Debug, Clone)]
pub struct CallCommon {
    pub value: Value,
    pub invoke: Option<Invoke>,
    pub args: Vec<Value>,
    /// The last argument was written `xs...`; informational only.
    pub has_ellipsis: bool,
    pub span: Span,
}

impl CallCommon {
    pub fn call(value: Value, args: Vec<Value>) -> Self {
        Self {
            value,
            invoke: None,
            args,
            has_ellipsis: false,
            span: Span::NONE,
        }
    }

    pub fn invoke(recv: Value, method: Object, index: usize, args: Vec<Value>) -> Self {
        Self {
            value: recv,
            invoke: Some(Invoke { method, index }),
            args,
            has_ellipsis: false,
            span: Span::NONE,
        }
    }

    pub fn is_invoke(&self) -> bool {
        self.invoke.is_some()
    }

    /// The signature of the callee, given the callee value's type. For
    /// invoke mode the receiver-less signature of the abstract method.
    pub fn signature(&self, value_ty: &Type) -> Option<Signature> {
        match &self.invoke {
            Some(invoke) => invoke.method.signature().map(Signature::without_recv),
            None => value_ty.as_signature().cloned(),
        }
    }

    /// The statically known callee, if this is a direct call of a function.
    pub fn static_callee(&self) -> Option<&std::sync::Arc<crate::ir::Function>> {
        match (&self.invoke, &self.value) {
            (None, Value::Function(f)) => Some(f),
            _ => None,
        }
    }

    fn operands(&self) -> impl Iterator<Item = &Value> {
        std::iter::once(&self.value).chain(&self.args)
    }

    fn operands_mut(&mut self) -> impl Iterator<Item = &mut Value> {
        std::iter::once(&mut self.value).chain(&mut self.args)
    }
}

/// One case of a `Select`.
#[derive(Debug, Clone)]
pub struct SelectState {
    /// `Send` or `Recv`.
    pub dir: ChanDir,
    pub chan: Value,
    /// The value sent, for send cases.
    pub send: Option<Value>,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub enum Instr {
    /// Reserves a zeroed cell and yields its address. Frame-local unless
    /// `heap`.
    Alloc {
        heap: bool,
        comment: String,
    },
    /// `edges[i]` flows in from `preds[i]` of the owning block.
    Phi {
        edges: Vec<Value>,
        comment: String,
    },
    BinOp {
        op: BinaryOp,
        x: Value,
        y: Value,
    },
    /// Loads (`*`), receives (`<-`), negation (`-`), logical not (`!`) and
    /// complement (`^`). A receive with `comma_ok` yields `(value, ok)`.
    UnOp {
        op: UnaryOp,
        x: Value,
        comma_ok: bool,
    },
    /// Representation change between numeric, string and slice types, or
    /// between pointer types and `unsafe.Pointer`.
    Convert {
        x: Value,
    },
    /// A value-preserving type change.
    ChangeType {
        x: Value,
    },
    /// Conversion between interface types that cannot fail.
    ChangeInterface {
        x: Value,
    },
    /// Boxes a concrete value in an interface.
    MakeInterface {
        x: Value,
    },
    /// `x.(asserted)`; with `comma_ok` yields `(value, ok)` instead of
    /// panicking.
    TypeAssert {
        x: Value,
        asserted: Type,
        comma_ok: bool,
    },
    Call(CallCommon),
    /// `func` is a `Value::Function`; one binding per free variable.
    MakeClosure {
        func: Value,
        bindings: Vec<Value>,
    },
    MakeMap {
        reserve: Option<Value>,
    },
    MakeChan {
        size: Value,
    },
    MakeSlice {
        len: Value,
        cap: Value,
    },
    /// Address of field `field` of the struct pointed to by `x`.
    FieldAddr {
        x: Value,
        field: usize,
    },
    /// Field `field` of struct value `x`.
    Field {
        x: Value,
        field: usize,
    },
    /// Address of element `index` of the array, slice or pointer-to-array
    /// `x`.
    IndexAddr {
        x: Value,
        index: Value,
    },
    /// Element `index` of array value `x`.
    Index {
        x: Value,
        index: Value,
    },
    /// Map lookup or string indexing.
    Lookup {
        x: Value,
        index: Value,
        comma_ok: bool,
    },
    Slice {
        x: Value,
        low: Option<Value>,
        high: Option<Value>,
        max: Option<Value>,
    },
    /// An iterator over a string or map.
    Range {
        x: Value,
    },
    /// Advances a `Range` iterator, yielding `(ok, key, value)`.
    Next {
        iter: Value,
        is_string: bool,
    },
    /// Yields `(index, recvOk, r_0, ... r_n-1)`; `index == -1` selects the
    /// default case of a non-blocking select.
    Select {
        states: Vec<SelectState>,
        blocking: bool,
    },
    Extract {
        tuple: Value,
        index: usize,
    },
    Jump,
    /// Branches to `succs[0]` when `cond` is true, else `succs[1]`.
    If {
        cond: Value,
    },
    Return {
        results: Vec<Value>,
    },
    Panic {
        x: Value,
    },
    Store {
        addr: Value,
        val: Value,
    },
    MapUpdate {
        map: Value,
        key: Value,
        value: Value,
    },
    Send {
        chan: Value,
        x: Value,
    },
    Go(CallCommon),
    Defer(CallCommon),
    RunDefers,
}

impl Instr {
    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            Instr::Jump | Instr::If { .. } | Instr::Return { .. } | Instr::Panic { .. }
        )
    }

    pub fn is_phi(&self) -> bool {
        matches!(self, Instr::Phi { .. })
    }

    /// The number of CFG successors a terminator requires.
    pub fn successor_count(&self) -> Option<usize> {
        match self {
            Instr::Jump => Some(1),
            Instr::If { .. } => Some(2),
            Instr::Return { .. } | Instr::Panic { .. } => Some(0),
            _ => None,
        }
    }

    pub fn call_common(&self) -> Option<&CallCommon> {
        match self {
            Instr::Call(call) | Instr::Go(call) | Instr::Defer(call) => Some(call),
            _ => None,
        }
    }

    /// Every operand of the instruction in a fixed order.
    pub fn operands(&self) -> Vec<&Value> {
        match self {
            Instr::Alloc { .. } | Instr::Jump | Instr::RunDefers => Vec::new(),
            Instr::Phi { edges, .. } => edges.iter().collect(),
            Instr::BinOp { x, y, .. } => vec![x, y],
            Instr::UnOp { x, .. }
            | Instr::Convert { x }
            | Instr::ChangeType { x }
            | Instr::ChangeInterface { x }
            | Instr::MakeInterface { x }
            | Instr::TypeAssert { x, .. }
            | Instr::Field { x, .. }
            | Instr::FieldAddr { x, .. }
            | Instr::Range { x }
            | Instr::Panic { x } => vec![x],
            Instr::Call(call) | Instr::Go(call) | Instr::Defer(call) => call.operands().collect(),
            Instr::MakeClosure { func, bindings } => {
                std::iter::once(func).chain(bindings).collect()
            }
            Instr::MakeMap { reserve } => reserve.iter().collect(),
            Instr::MakeChan { size } => vec![size],
            Instr::MakeSlice { len, cap } => vec![len, cap],
            Instr::IndexAddr { x, index }
            | Instr::Index { x, index }
            | Instr::Lookup { x, index, .. } => vec![x, index],
            Instr::Slice { x, low, high, max } => std::iter::once(x)
                .chain(low.iter())
                .chain(high.iter())
                .chain(max.iter())
                .collect(),
            Instr::Next { iter, .. } => vec![iter],
            Instr::Select { states, .. } => states
                .iter()
                .flat_map(|s| std::iter::once(&s.chan).chain(s.send.iter()))
                .collect(),
            Instr::Extract { tuple, .. } => vec![tuple],
            Instr::If { cond } => vec![cond],
            Instr::Return { results } => results.iter().collect(),
            Instr::Store { addr, val } => vec![addr, val],
            Instr::MapUpdate { map, key, value } => vec![map, key, value],
            Instr::Send { chan, x } => vec![chan, x],
        }
    }

    /// Mutable access to the operands, in the same order as `operands`.
    pub fn operands_mut(&mut self) -> Vec<&mut Value> {
        match self {
            Instr::Alloc { .. } | Instr::Jump | Instr::RunDefers => Vec::new(),
            Instr::Phi { edges, .. } => edges.iter_mut().collect(),
            Instr::BinOp { x, y, .. } => vec![x, y],
            Instr::UnOp { x, .. }
            | Instr::Convert { x }
            | Instr::ChangeType { x }
            | Instr::ChangeInterface { x }
            | Instr::MakeInterface { x }
            | Instr::TypeAssert { x, .. }
            | Instr::Field { x, .. }
            | Instr::FieldAddr { x, .. }
            | Instr::Range { x }
            | Instr::Panic { x } => vec![x],
            Instr::Call(call) | Instr::Go(call) | Instr::Defer(call) => {
                call.operands_mut().collect()
            }
            Instr::MakeClosure { func, bindings } => {
                std::iter::once(func).chain(bindings.iter_mut()).collect()
            }
            Instr::MakeMap { reserve } => reserve.iter_mut().collect(),
            Instr::MakeChan { size } => vec![size],
            Instr::MakeSlice { len, cap } => vec![len, cap],
            Instr::IndexAddr { x, index }
            | Instr::Index { x, index }
            | Instr::Lookup { x, index, .. } => vec![x, index],
            Instr::Slice { x, low, high, max } => std::iter::once(x)
                .chain(low.iter_mut())
                .chain(high.iter_mut())
                .chain(max.iter_mut())
                .collect(),
            Instr::Next { iter, .. } => vec![iter],
            Instr::Select { states, .. } => states
                .iter_mut()
                .flat_map(|s| std::iter::once(&mut s.chan).chain(s.send.iter_mut()))
                .collect(),
            Instr::Extract { tuple, .. } => vec![tuple],
            Instr::If { cond } => vec![cond],
            Instr::Return { results } => results.iter_mut().collect(),
            Instr::Store { addr, val } => vec![addr, val],
            Instr::MapUpdate { map, key, value } => vec![map, key, value],
            Instr::Send { chan, x } => vec![chan, x],
        }
    }

    /// The opcode's short name, as used in log messages.
    pub fn mnemonic(&self) -> &'static str {
        match self {
            Instr::Alloc { heap: true, .. } => "new",
            Instr::Alloc { heap: false, .. } => "local",
            Instr::Phi { .. } => "phi",
            Instr::BinOp { .. } => "binop",
            Instr::UnOp { .. } => "unop",
            Instr::Convert { .. } => "convert",
            Instr::ChangeType { .. } => "changetype",
            Instr::ChangeInterface { .. } => "change interface",
            Instr::MakeInterface { .. } => "make interface",
            Instr::TypeAssert { .. } => "typeassert",
            Instr::Call(_) => "call",
            Instr::MakeClosure { .. } => "make closure",
            Instr::MakeMap { .. } => "make map",
            Instr::MakeChan { .. } => "make chan",
            Instr::MakeSlice { .. } => "make slice",
            Instr::FieldAddr { .. } => "fieldaddr",
            Instr::Field { .. } => "field",
            Instr::IndexAddr { .. } => "indexaddr",
            Instr::Index { .. } => "index",
            Instr::Lookup { .. } => "lookup",
            Instr::Slice { .. } => "slice",
            Instr::Range { .. } => "range",
            Instr::Next { .. } => "next",
            Instr::Select { .. } => "select",
            Instr::Extract { .. } => "extract",
            Instr::Jump => "jump",
            Instr::If { .. } => "if",
            Instr::Return { .. } => "return",
            Instr::Panic { .. } => "panic",
            Instr::Store { .. } => "store",
            Instr::MapUpdate { .. } => "mapupdate",
            Instr::Send { .. } => "send",
            Instr::Go(_) => "go",
            Instr::Defer(_) => "defer",
            Instr::RunDefers => "rundefers",
        }
    }
}
