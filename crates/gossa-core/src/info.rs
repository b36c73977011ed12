//! Facts recorded by the type checker about a package's syntax.

use std::collections::HashMap;

use crate::ast::{Expr, NodeId};
use crate::constant::ConstValue;
use crate::types::{Object, Type};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandMode {
    /// A value with no storage location.
    Value,
    /// An addressable variable.
    Variable,
    /// A map index expression (`m[k]`), assignable but not addressable.
    MapIndex,
    /// A compile-time constant; the value is in `TypeAndValue::value`.
    Constant,
    /// A type expression.
    TypeExpr,
    /// A builtin function name.
    Builtin,
    /// A call with no result.
    NoValue,
    /// An expression that may be used in a two-value assignment
    /// (`v, ok := m[k]`, `<-ch`, `x.(T)`).
    CommaOk,
}

#[derive(Debug, Clone)]
pub struct TypeAndValue {
    pub mode: OperandMode,
    pub ty: Type,
    pub value: Option<ConstValue>,
}

impl TypeAndValue {
    pub fn new(mode: OperandMode, ty: Type) -> Self {
        Self {
            mode,
            ty,
            value: None,
        }
    }

    pub fn constant(ty: Type, value: ConstValue) -> Self {
        Self {
            mode: OperandMode::Constant,
            ty,
            value: Some(value),
        }
    }

    pub fn is_type(&self) -> bool {
        self.mode == OperandMode::TypeExpr
    }

    pub fn is_builtin(&self) -> bool {
        self.mode == OperandMode::Builtin
    }

    pub fn addressable(&self) -> bool {
        self.mode == OperandMode::Variable
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionKind {
    /// `x.f`, a field selector.
    FieldVal,
    /// `x.m`, a method value.
    MethodVal,
    /// `T.m`, a method expression.
    MethodExpr,
}

#[derive(Debug, Clone)]
pub struct Selection {
    pub kind: SelectionKind,
    /// The type of `x` in `x.f`.
    pub recv: Type,
    /// Field indices of the embedding path; the last entry is the field or
    /// method index.
    pub index: Vec<usize>,
    /// Whether the path dereferenced a pointer.
    pub indirect: bool,
    pub obj: Object,
}

impl Selection {
    /// The type of the selector expression.
    pub fn ty(&self) -> Type {
        match self.kind {
            SelectionKind::FieldVal => self.obj.ty().clone(),
            SelectionKind::MethodVal => match self.obj.signature() {
                Some(sig) => crate::types::Type::signature(sig.without_recv()),
                None => self.obj.ty().clone(),
            },
            SelectionKind::MethodExpr => match self.obj.signature() {
                Some(sig) => {
                    let mut with_recv = sig.without_recv();
                    with_recv
                        .params
                        .insert(0, Object::var(None, "", self.recv.clone()));
                    crate::types::Type::signature(with_recv)
                }
                None => self.obj.ty().clone(),
            },
        }
    }
}

#[derive(Debug, Default)]
pub struct TypeInfo {
    pub types: HashMap<NodeId, TypeAndValue>,
    pub defs: HashMap<NodeId, Option<Object>>,
    pub uses: HashMap<NodeId, Object>,
    pub selections: HashMap<NodeId, Selection>,
    /// Objects declared implicitly by a node, e.g. the per-clause variable of
    /// a type switch, keyed by the clause.
    pub implicits: HashMap<NodeId, Object>,
    /// Package-level variables in initialisation order, each with the
    /// expression that initialises it.
    pub init_order: Vec<Initializer>,
}

#[derive(Debug, Clone)]
pub struct Initializer {
    /// Left-hand variables; more than one for `var a, b = f()`.
    pub lhs: Vec<Object>,
    pub rhs: Expr,
}

impl TypeInfo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn type_of(&self, id: NodeId) -> Option<&Type> {
        self.types.get(&id).map(|tv| &tv.ty)
    }

    /// The object defined or used by an identifier.
    pub fn object_of(&self, id: NodeId) -> Option<&Object> {
        match self.defs.get(&id) {
            Some(Some(obj)) => Some(obj),
            _ => self.uses.get(&id),
        }
    }
}
