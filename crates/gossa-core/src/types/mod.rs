//! The type system consumed by the SSA builder.
//!
//! `Type` is a cheap handle. Equality and hashing implement type identity:
//! named types are identical only to themselves, everything else compares
//! structurally. Recursive types can only be written through named types,
//! so structural comparison always terminates.
//!
//! Named types, their methods and their packages refer to each other, so the
//! handles form reference cycles. Types live for the lifetime of the program
//! that consumes them.

mod display;
pub mod lookup;
pub mod object;
mod predicates;

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, LazyLock, OnceLock, RwLock};

pub use lookup::{lookup_field_or_method, LookupResult};
pub use object::{BuiltinKind, Id, Object, ObjectKind, TypePackage};
pub use predicates::{assignable_to, default_type, implements, missing_method};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum BasicKind {
    Invalid,
    Bool,
    Int,
    Int8,
    Int16,
    Int32,
    Int64,
    Uint,
    Uint8,
    Uint16,
    Uint32,
    Uint64,
    Uintptr,
    Float32,
    Float64,
    Complex64,
    Complex128,
    String,
    UnsafePointer,
    UntypedBool,
    UntypedInt,
    UntypedRune,
    UntypedFloat,
    UntypedComplex,
    UntypedString,
    UntypedNil,
}

impl BasicKind {
    pub fn name(self) -> &'static str {
        match self {
            BasicKind::Invalid => "invalid type",
            BasicKind::Bool => "bool",
            BasicKind::Int => "int",
            BasicKind::Int8 => "int8",
            BasicKind::Int16 => "int16",
            BasicKind::Int32 => "int32",
            BasicKind::Int64 => "int64",
            BasicKind::Uint => "uint",
            BasicKind::Uint8 => "uint8",
            BasicKind::Uint16 => "uint16",
            BasicKind::Uint32 => "uint32",
            BasicKind::Uint64 => "uint64",
            BasicKind::Uintptr => "uintptr",
            BasicKind::Float32 => "float32",
            BasicKind::Float64 => "float64",
            BasicKind::Complex64 => "complex64",
            BasicKind::Complex128 => "complex128",
            BasicKind::String => "string",
            BasicKind::UnsafePointer => "unsafe.Pointer",
            BasicKind::UntypedBool => "untyped bool",
            BasicKind::UntypedInt => "untyped int",
            BasicKind::UntypedRune => "untyped rune",
            BasicKind::UntypedFloat => "untyped float",
            BasicKind::UntypedComplex => "untyped complex",
            BasicKind::UntypedString => "untyped string",
            BasicKind::UntypedNil => "untyped nil",
        }
    }

    pub fn is_boolean(self) -> bool {
        matches!(self, BasicKind::Bool | BasicKind::UntypedBool)
    }

    pub fn is_integer(self) -> bool {
        matches!(
            self,
            BasicKind::Int
                | BasicKind::Int8
                | BasicKind::Int16
                | BasicKind::Int32
                | BasicKind::Int64
                | BasicKind::Uint
                | BasicKind::Uint8
                | BasicKind::Uint16
                | BasicKind::Uint32
                | BasicKind::Uint64
                | BasicKind::Uintptr
                | BasicKind::UntypedInt
                | BasicKind::UntypedRune
        )
    }

    pub fn is_unsigned(self) -> bool {
        matches!(
            self,
            BasicKind::Uint
                | BasicKind::Uint8
                | BasicKind::Uint16
                | BasicKind::Uint32
                | BasicKind::Uint64
                | BasicKind::Uintptr
        )
    }

    pub fn is_float(self) -> bool {
        matches!(
            self,
            BasicKind::Float32 | BasicKind::Float64 | BasicKind::UntypedFloat
        )
    }

    pub fn is_complex(self) -> bool {
        matches!(
            self,
            BasicKind::Complex64 | BasicKind::Complex128 | BasicKind::UntypedComplex
        )
    }

    pub fn is_numeric(self) -> bool {
        self.is_integer() || self.is_float() || self.is_complex()
    }

    pub fn is_string(self) -> bool {
        matches!(self, BasicKind::String | BasicKind::UntypedString)
    }

    pub fn is_untyped(self) -> bool {
        matches!(
            self,
            BasicKind::UntypedBool
                | BasicKind::UntypedInt
                | BasicKind::UntypedRune
                | BasicKind::UntypedFloat
                | BasicKind::UntypedComplex
                | BasicKind::UntypedString
                | BasicKind::UntypedNil
        )
    }

    /// Width in bits of sized numeric kinds; 0 for everything else.
    pub fn bits(self) -> u32 {
        match self {
            BasicKind::Int8 | BasicKind::Uint8 => 8,
            BasicKind::Int16 | BasicKind::Uint16 => 16,
            BasicKind::Int32 | BasicKind::Uint32 | BasicKind::Float32 => 32,
            BasicKind::Int
            | BasicKind::Int64
            | BasicKind::Uint
            | BasicKind::Uint64
            | BasicKind::Uintptr
            | BasicKind::Float64
            | BasicKind::Complex64 => 64,
            BasicKind::Complex128 => 128,
            _ => 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ChanDir {
    Both,
    Send,
    Recv,
}

#[derive(Debug, Clone)]
pub struct StructType {
    /// Field `Var` objects in declaration order.
    pub fields: Vec<Object>,
}

#[derive(Debug, Clone)]
pub struct Signature {
    pub recv: Option<Object>,
    pub params: Vec<Object>,
    pub results: Vec<Object>,
    pub variadic: bool,
}

impl Signature {
    pub fn new(params: Vec<Object>, results: Vec<Object>, variadic: bool) -> Self {
        Self {
            recv: None,
            params,
            results,
            variadic,
        }
    }

    pub fn with_recv(mut self, recv: Object) -> Self {
        self.recv = Some(recv);
        self
    }

    pub fn params_tuple(&self) -> Type {
        Type::tuple(self.params.clone())
    }

    pub fn results_tuple(&self) -> Type {
        Type::tuple(self.results.clone())
    }

    /// The signature with the receiver moved to the front of the parameters.
    pub fn with_recv_as_param(&self) -> Signature {
        let mut params = Vec::with_capacity(self.params.len() + 1);
        params.extend(self.recv.iter().cloned());
        params.extend(self.params.iter().cloned());
        Signature::new(params, self.results.clone(), self.variadic)
    }

    /// The signature with the receiver dropped.
    pub fn without_recv(&self) -> Signature {
        Signature::new(self.params.clone(), self.results.clone(), self.variadic)
    }

    /// The type of a call to a function of this signature: nothing, the
    /// single result, or a tuple.
    pub fn result_type(&self) -> Type {
        match self.results.as_slice() {
            [] => Type::tuple(Vec::new()),
            [single] => single.ty().clone(),
            _ => self.results_tuple(),
        }
    }
}

#[derive(Debug)]
pub struct InterfaceType {
    /// Explicitly declared methods.
    pub methods: Vec<Object>,
    /// Embedded interface types.
    pub embedded: Vec<Type>,
    all: OnceLock<Vec<Object>>,
}

impl InterfaceType {
    /// The complete method list (explicit plus embedded), sorted by `Id`.
    /// A method's position in this list is its dispatch index.
    pub fn all_methods(&self) -> &[Object] {
        self.all.get_or_init(|| {
            let mut all: Vec<Object> = self.methods.clone();
            for embedded in &self.embedded {
                if let TypeKind::Interface(iface) = embedded.under() {
                    for method in iface.all_methods() {
                        if !all.iter().any(|m| m.id() == method.id()) {
                            all.push(method.clone());
                        }
                    }
                }
            }
            all.sort_by_key(|m| m.id());
            all
        })
    }

    pub fn method_index(&self, id: &Id) -> Option<usize> {
        self.all_methods().iter().position(|m| &m.id() == id)
    }

    pub fn is_empty(&self) -> bool {
        self.all_methods().is_empty()
    }
}

impl Clone for InterfaceType {
    fn clone(&self) -> Self {
        Self {
            methods: self.methods.clone(),
            embedded: self.embedded.clone(),
            all: OnceLock::new(),
        }
    }
}

pub struct NamedType {
    pub name: String,
    pub pkg: Option<Arc<TypePackage>>,
    underlying: OnceLock<Type>,
    methods: RwLock<Vec<Object>>,
}

impl NamedType {
    /// Declared methods, in declaration order.
    pub fn methods(&self) -> Vec<Object> {
        match self.methods.read() {
            Ok(methods) => methods.clone(),
            Err(poison) => poison.into_inner().clone(),
        }
    }

    pub fn add_method(&self, method: Object) {
        match self.methods.write() {
            Ok(mut methods) => methods.push(method),
            Err(poison) => poison.into_inner().push(method),
        }
    }

    pub fn num_methods(&self) -> usize {
        match self.methods.read() {
            Ok(methods) => methods.len(),
            Err(poison) => poison.into_inner().len(),
        }
    }
}

impl fmt::Debug for NamedType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.pkg {
            Some(pkg) => write!(f, "Named({}.{})", pkg.path, self.name),
            None => write!(f, "Named({})", self.name),
        }
    }
}

#[derive(Debug)]
pub enum TypeKind {
    Basic(BasicKind),
    Pointer(Type),
    Slice(Type),
    Array(Type, u64),
    Map(Type, Type),
    Chan(ChanDir, Type),
    Struct(StructType),
    /// Components are `Var` objects.
    Tuple(Vec<Object>),
    Signature(Signature),
    Interface(InterfaceType),
    Named(Arc<NamedType>),
}

#[derive(Clone)]
pub struct Type(Arc<TypeKind>);

static INVALID: LazyLock<Type> = LazyLock::new(|| Type::new(TypeKind::Basic(BasicKind::Invalid)));

static ERROR: LazyLock<Type> = LazyLock::new(|| {
    let named = Type::named(None, "error");
    let result = Object::var(None, "", Type::basic(BasicKind::String));
    let sig = Type::signature(Signature::new(Vec::new(), vec![result], false));
    let method = Object::func(None, "Error", sig);
    named.set_underlying(Type::interface(vec![method], Vec::new()));
    named
});

impl Type {
    pub fn new(kind: TypeKind) -> Self {
        Type(Arc::new(kind))
    }

    pub fn basic(kind: BasicKind) -> Self {
        if kind == BasicKind::Invalid {
            return INVALID.clone();
        }
        Type::new(TypeKind::Basic(kind))
    }

    pub fn invalid() -> Self {
        INVALID.clone()
    }

    /// The predeclared `error` interface.
    pub fn error() -> Self {
        ERROR.clone()
    }

    pub fn pointer(elem: Type) -> Self {
        Type::new(TypeKind::Pointer(elem))
    }

    pub fn slice(elem: Type) -> Self {
        Type::new(TypeKind::Slice(elem))
    }

    pub fn array(elem: Type, len: u64) -> Self {
        Type::new(TypeKind::Array(elem, len))
    }

    pub fn map(key: Type, elem: Type) -> Self {
        Type::new(TypeKind::Map(key, elem))
    }

    pub fn chan(dir: ChanDir, elem: Type) -> Self {
        Type::new(TypeKind::Chan(dir, elem))
    }

    pub fn structure(fields: Vec<Object>) -> Self {
        Type::new(TypeKind::Struct(StructType { fields }))
    }

    pub fn tuple(vars: Vec<Object>) -> Self {
        Type::new(TypeKind::Tuple(vars))
    }

    /// A tuple of anonymous components with the given types.
    pub fn tuple_of(types: impl IntoIterator<Item = Type>) -> Self {
        Type::tuple(types.into_iter().map(|t| Object::var(None, "", t)).collect())
    }

    pub fn signature(sig: Signature) -> Self {
        Type::new(TypeKind::Signature(sig))
    }

    pub fn interface(methods: Vec<Object>, embedded: Vec<Type>) -> Self {
        Type::new(TypeKind::Interface(InterfaceType {
            methods,
            embedded,
            all: OnceLock::new(),
        }))
    }

    /// Creates a named type whose underlying type is set later with
    /// [`Type::set_underlying`].
    pub fn named(pkg: Option<Arc<TypePackage>>, name: impl Into<String>) -> Self {
        Type::new(TypeKind::Named(Arc::new(NamedType {
            name: name.into(),
            pkg,
            underlying: OnceLock::new(),
            methods: RwLock::new(Vec::new()),
        })))
    }

    /// Sets the underlying type of a named type. Only the first call has an
    /// effect; named types never change once complete.
    pub fn set_underlying(&self, underlying: Type) {
        if let TypeKind::Named(named) = self.kind() {
            let underlying = underlying.underlying().clone();
            let _ = named.underlying.set(underlying);
        }
    }

    pub fn kind(&self) -> &TypeKind {
        &self.0
    }

    /// The underlying type; never a named type.
    pub fn underlying(&self) -> &Type {
        match self.kind() {
            TypeKind::Named(named) => match named.underlying.get() {
                Some(underlying) => underlying.underlying(),
                None => &INVALID,
            },
            _ => self,
        }
    }

    /// Shorthand for `self.underlying().kind()`.
    pub fn under(&self) -> &TypeKind {
        self.underlying().kind()
    }

    pub fn as_named(&self) -> Option<&Arc<NamedType>> {
        match self.kind() {
            TypeKind::Named(named) => Some(named),
            _ => None,
        }
    }

    pub fn is_named(&self) -> bool {
        self.as_named().is_some()
    }

    pub fn basic_kind(&self) -> Option<BasicKind> {
        match self.under() {
            TypeKind::Basic(kind) => Some(*kind),
            _ => None,
        }
    }

    fn basic_is(&self, pred: impl Fn(BasicKind) -> bool) -> bool {
        self.basic_kind().is_some_and(pred)
    }

    pub fn is_boolean(&self) -> bool {
        self.basic_is(BasicKind::is_boolean)
    }

    pub fn is_integer(&self) -> bool {
        self.basic_is(BasicKind::is_integer)
    }

    pub fn is_unsigned(&self) -> bool {
        self.basic_is(BasicKind::is_unsigned)
    }

    pub fn is_float(&self) -> bool {
        self.basic_is(BasicKind::is_float)
    }

    pub fn is_complex(&self) -> bool {
        self.basic_is(BasicKind::is_complex)
    }

    pub fn is_numeric(&self) -> bool {
        self.basic_is(BasicKind::is_numeric)
    }

    pub fn is_string(&self) -> bool {
        self.basic_is(BasicKind::is_string)
    }

    pub fn is_untyped(&self) -> bool {
        self.basic_is(BasicKind::is_untyped)
    }

    pub fn is_untyped_nil(&self) -> bool {
        self.basic_kind() == Some(BasicKind::UntypedNil)
    }

    pub fn is_unsafe_pointer(&self) -> bool {
        self.basic_kind() == Some(BasicKind::UnsafePointer)
    }

    pub fn is_interface(&self) -> bool {
        matches!(self.under(), TypeKind::Interface(_))
    }

    pub fn is_pointer(&self) -> bool {
        matches!(self.under(), TypeKind::Pointer(_))
    }

    pub fn is_signature(&self) -> bool {
        matches!(self.under(), TypeKind::Signature(_))
    }

    pub fn is_tuple(&self) -> bool {
        matches!(self.kind(), TypeKind::Tuple(_))
    }

    pub fn pointer_elem(&self) -> Option<&Type> {
        match self.under() {
            TypeKind::Pointer(elem) => Some(elem),
            _ => None,
        }
    }

    /// The pointee of a pointer type, or the type itself.
    pub fn deref(&self) -> &Type {
        self.pointer_elem().unwrap_or(self)
    }

    pub fn as_signature(&self) -> Option<&Signature> {
        match self.under() {
            TypeKind::Signature(sig) => Some(sig),
            _ => None,
        }
    }

    pub fn as_interface(&self) -> Option<&InterfaceType> {
        match self.under() {
            TypeKind::Interface(iface) => Some(iface),
            _ => None,
        }
    }

    pub fn as_struct(&self) -> Option<&StructType> {
        match self.under() {
            TypeKind::Struct(st) => Some(st),
            _ => None,
        }
    }

    pub fn tuple_vars(&self) -> Option<&[Object]> {
        match self.kind() {
            TypeKind::Tuple(vars) => Some(vars),
            _ => None,
        }
    }

    /// Number of components of a tuple; 1 for any other type.
    pub fn tuple_len(&self) -> usize {
        self.tuple_vars().map_or(1, <[Object]>::len)
    }

    /// The type of the `i`th struct field.
    pub fn field(&self, i: usize) -> Option<&Object> {
        self.as_struct().and_then(|st| st.fields.get(i))
    }

    /// The element type of an array, slice, pointer-to-array, map, chan or
    /// string (`byte`).
    pub fn elem(&self) -> Option<Type> {
        match self.under() {
            TypeKind::Array(elem, _)
            | TypeKind::Slice(elem)
            | TypeKind::Map(_, elem)
            | TypeKind::Chan(_, elem) => Some(elem.clone()),
            TypeKind::Pointer(inner) => match inner.under() {
                TypeKind::Array(elem, _) => Some(elem.clone()),
                _ => None,
            },
            TypeKind::Basic(kind) if kind.is_string() => Some(Type::basic(BasicKind::Uint8)),
            _ => None,
        }
    }

    /// Whether values of this type may be compared against `nil`.
    pub fn is_nillable(&self) -> bool {
        matches!(
            self.under(),
            TypeKind::Pointer(_)
                | TypeKind::Slice(_)
                | TypeKind::Map(..)
                | TypeKind::Chan(..)
                | TypeKind::Signature(_)
                | TypeKind::Interface(_)
        ) || self.is_unsafe_pointer()
    }

    fn ptr(&self) -> *const TypeKind {
        Arc::as_ptr(&self.0)
    }
}

impl fmt::Debug for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self}")
    }
}

fn same_objects_by_type(a: &[Object], b: &[Object]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.ty() == y.ty())
}

impl PartialEq for Type {
    fn eq(&self, other: &Self) -> bool {
        if self.ptr() == other.ptr() {
            return true;
        }
        match (self.kind(), other.kind()) {
            (TypeKind::Basic(a), TypeKind::Basic(b)) => a == b,
            (TypeKind::Pointer(a), TypeKind::Pointer(b)) => a == b,
            (TypeKind::Slice(a), TypeKind::Slice(b)) => a == b,
            (TypeKind::Array(a, n), TypeKind::Array(b, m)) => n == m && a == b,
            (TypeKind::Map(k1, v1), TypeKind::Map(k2, v2)) => k1 == k2 && v1 == v2,
            (TypeKind::Chan(d1, e1), TypeKind::Chan(d2, e2)) => d1 == d2 && e1 == e2,
            (TypeKind::Struct(a), TypeKind::Struct(b)) => {
                a.fields.len() == b.fields.len()
                    && a.fields.iter().zip(&b.fields).all(|(x, y)| {
                        x.id() == y.id() && x.is_embedded() == y.is_embedded() && x.ty() == y.ty()
                    })
            }
            (TypeKind::Tuple(a), TypeKind::Tuple(b)) => same_objects_by_type(a, b),
            (TypeKind::Signature(a), TypeKind::Signature(b)) => {
                a.variadic == b.variadic
                    && same_objects_by_type(&a.params, &b.params)
                    && same_objects_by_type(&a.results, &b.results)
            }
            (TypeKind::Interface(a), TypeKind::Interface(b)) => {
                let (ma, mb) = (a.all_methods(), b.all_methods());
                ma.len() == mb.len()
                    && ma
                        .iter()
                        .zip(mb)
                        .all(|(x, y)| x.id() == y.id() && x.ty() == y.ty())
            }
            (TypeKind::Named(a), TypeKind::Named(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl Eq for Type {}

impl Hash for Type {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self.kind()).hash(state);
        match self.kind() {
            TypeKind::Basic(kind) => kind.hash(state),
            TypeKind::Pointer(elem) | TypeKind::Slice(elem) => elem.hash(state),
            TypeKind::Array(elem, len) => {
                elem.hash(state);
                len.hash(state);
            }
            TypeKind::Map(key, elem) => {
                key.hash(state);
                elem.hash(state);
            }
            TypeKind::Chan(dir, elem) => {
                dir.hash(state);
                elem.hash(state);
            }
            TypeKind::Struct(st) => {
                for field in &st.fields {
                    field.name().hash(state);
                    field.ty().hash(state);
                }
            }
            TypeKind::Tuple(vars) => {
                for var in vars {
                    var.ty().hash(state);
                }
            }
            TypeKind::Signature(sig) => {
                sig.variadic.hash(state);
                for var in sig.params.iter().chain(&sig.results) {
                    var.ty().hash(state);
                }
                sig.params.len().hash(state);
            }
            TypeKind::Interface(iface) => {
                for method in iface.all_methods() {
                    method.id().hash(state);
                }
            }
            TypeKind::Named(named) => Arc::as_ptr(named).hash(state),
        }
    }
}
