use std::fmt;
use std::sync::Arc;

use crate::constant::ConstValue;
use crate::ir::Function;
use crate::span::Span;
use crate::types::{BasicKind, BuiltinKind, Object, Type, TypeKind, TypePackage};

/// Index of a node in its function's value arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ValueId(pub u32);

impl ValueId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// An operand.
#[derive(Clone)]
pub enum Value {
    /// A parameter, free variable or instruction of the enclosing function.
    Local(ValueId),
    Const(Const),
    Global(Arc<Global>),
    Function(Arc<Function>),
    Builtin(Arc<Builtin>),
}

impl Value {
    pub fn as_local(&self) -> Option<ValueId> {
        match self {
            Value::Local(id) => Some(*id),
            _ => None,
        }
    }

    pub fn as_const(&self) -> Option<&Const> {
        match self {
            Value::Const(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_function(&self) -> Option<&Arc<Function>> {
        match self {
            Value::Function(f) => Some(f),
            _ => None,
        }
    }

    /// The type of a non-local value. Locals need their function body to
    /// answer; see `FunctionBody::type_of`.
    pub fn static_type(&self) -> Option<Type> {
        match self {
            Value::Local(_) => None,
            Value::Const(c) => Some(c.ty.clone()),
            Value::Global(g) => Some(g.ty.clone()),
            Value::Function(f) => Some(f.ty()),
            Value::Builtin(b) => Some(b.sig.clone()),
        }
    }

    /// The operand's printed name when it is not a local of `from`.
    pub(crate) fn static_name(&self, from: Option<&TypePackage>) -> Option<String> {
        match self {
            Value::Local(_) => None,
            Value::Const(c) => Some(c.relative_string(from)),
            Value::Global(g) => Some(g.relative_name(from)),
            Value::Function(f) => Some(f.relative_name(from)),
            Value::Builtin(b) => Some(b.kind.name().to_string()),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Local(a), Value::Local(b)) => a == b,
            (Value::Const(a), Value::Const(b)) => a == b,
            (Value::Global(a), Value::Global(b)) => Arc::ptr_eq(a, b),
            (Value::Function(a), Value::Function(b)) => Arc::ptr_eq(a, b),
            (Value::Builtin(a), Value::Builtin(b)) => a.kind == b.kind && a.sig == b.sig,
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Local(id) => write!(f, "%{}", id.0),
            Value::Const(c) => write!(f, "{c}"),
            Value::Global(g) => write!(f, "{}", g.relative_name(None)),
            Value::Function(func) => write!(f, "{}", func.relative_name(None)),
            Value::Builtin(b) => write!(f, "{}", b.kind.name()),
        }
    }
}

impl From<ValueId> for Value {
    fn from(id: ValueId) -> Self {
        Value::Local(id)
    }
}

/// A typed constant. `value == None` is the zero value of `ty`.
#[derive(Debug, Clone, PartialEq)]
pub struct Const {
    pub ty: Type,
    pub value: Option<ConstValue>,
}

impl Const {
    pub fn new(ty: Type, value: ConstValue) -> Self {
        Self {
            ty,
            value: Some(value),
        }
    }

    pub fn zero(ty: Type) -> Self {
        Self { ty, value: None }
    }

    pub fn int(ty: Type, v: i64) -> Self {
        Self::new(ty, ConstValue::int(v))
    }

    pub fn bool(v: bool) -> Self {
        Self::new(Type::basic(BasicKind::Bool), ConstValue::Bool(v))
    }

    pub fn is_nil(&self) -> bool {
        self.value.is_none() && self.ty.is_nillable()
    }

    pub fn int64(&self) -> Option<i64> {
        self.value.as_ref().and_then(ConstValue::to_i64)
    }

    pub fn relative_string(&self, from: Option<&TypePackage>) -> String {
        let value = match &self.value {
            Some(v) => v.to_string(),
            None => zero_string(&self.ty, from),
        };
        format!("{value}:{}", self.ty.relative_string(from))
    }
}

impl fmt::Display for Const {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.relative_string(None))
    }
}

fn zero_string(ty: &Type, from: Option<&TypePackage>) -> String {
    match ty.under() {
        TypeKind::Basic(kind) if kind.is_boolean() => "false".into(),
        TypeKind::Basic(kind) if kind.is_numeric() => "0".into(),
        TypeKind::Basic(kind) if kind.is_string() => "\"\"".into(),
        TypeKind::Basic(BasicKind::UnsafePointer | BasicKind::UntypedNil)
        | TypeKind::Pointer(_)
        | TypeKind::Slice(_)
        | TypeKind::Map(..)
        | TypeKind::Chan(..)
        | TypeKind::Signature(_)
        | TypeKind::Interface(_) => "nil".into(),
        _ => format!("{}{{}}", ty.relative_string(from)),
    }
}

/// A package-level variable. As an operand it denotes the variable's
/// address, so `ty` is a pointer type.
#[derive(Debug)]
pub struct Global {
    pub name: String,
    pub object: Option<Object>,
    pub ty: Type,
    pub pkg: Arc<TypePackage>,
    pub span: Span,
}

impl Global {
    pub fn new(pkg: Arc<TypePackage>, name: impl Into<String>, elem: Type) -> Self {
        Self {
            name: name.into(),
            object: None,
            ty: Type::pointer(elem),
            pkg,
            span: Span::NONE,
        }
    }

    pub fn from_object(pkg: Arc<TypePackage>, obj: &Object) -> Self {
        Self {
            name: obj.name().to_string(),
            object: Some(obj.clone()),
            ty: Type::pointer(obj.ty().clone()),
            pkg,
            span: obj.span(),
        }
    }

    pub fn relative_name(&self, from: Option<&TypePackage>) -> String {
        match from {
            Some(from) if from.path == self.pkg.path => self.name.clone(),
            _ => format!("{}.{}", self.pkg.path, self.name),
        }
    }
}

/// A reference to a builtin function at a particular call signature.
#[derive(Debug, PartialEq)]
pub struct Builtin {
    pub kind: BuiltinKind,
    pub sig: Type,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constants_print_with_their_type() {
        let int = Type::basic(BasicKind::Int);
        assert_eq!(Const::int(int.clone(), 3).to_string(), "3:int");
        assert_eq!(Const::zero(Type::pointer(int.clone())).to_string(), "nil:*int");
        assert_eq!(
            Const::new(Type::basic(BasicKind::String), ConstValue::string("a")).to_string(),
            "\"a\":string"
        );
        assert_eq!(Const::zero(Type::structure(Vec::new())).to_string(), "struct{}{}:struct{}");
        assert!(Const::zero(Type::error()).is_nil());
    }
}
