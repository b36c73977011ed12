use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, RwLock};

use crate::constant::ConstValue;
use crate::span::Span;
use crate::types::{Signature, Type, TypeKind};

/// A name qualified by its package when unexported. Exported names compare
/// equal across packages.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Id {
    pub pkg: Option<String>,
    pub name: String,
}

impl Id {
    pub fn new(pkg: Option<&TypePackage>, name: &str) -> Self {
        let pkg = if is_exported(name) {
            None
        } else {
            pkg.map(|p| p.path.clone())
        };
        Self {
            pkg,
            name: name.to_string(),
        }
    }
}

impl Ord for Id {
    fn cmp(&self, other: &Self) -> Ordering {
        self.name
            .cmp(&other.name)
            .then_with(|| self.pkg.cmp(&other.pkg))
    }
}

impl PartialOrd for Id {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.pkg {
            Some(pkg) => write!(f, "{pkg}.{}", self.name),
            None => f.write_str(&self.name),
        }
    }
}

pub fn is_exported(name: &str) -> bool {
    name.chars().next().is_some_and(char::is_uppercase)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuiltinKind {
    Append,
    Cap,
    Clear,
    Close,
    Complex,
    Copy,
    Delete,
    Imag,
    Len,
    Make,
    Max,
    Min,
    New,
    Panic,
    Print,
    Println,
    Real,
    Recover,
}

impl BuiltinKind {
    pub const ALL: [BuiltinKind; 18] = [
        BuiltinKind::Append,
        BuiltinKind::Cap,
        BuiltinKind::Clear,
        BuiltinKind::Close,
        BuiltinKind::Complex,
        BuiltinKind::Copy,
        BuiltinKind::Delete,
        BuiltinKind::Imag,
        BuiltinKind::Len,
        BuiltinKind::Make,
        BuiltinKind::Max,
        BuiltinKind::Min,
        BuiltinKind::New,
        BuiltinKind::Panic,
        BuiltinKind::Print,
        BuiltinKind::Println,
        BuiltinKind::Real,
        BuiltinKind::Recover,
    ];

    pub fn name(self) -> &'static str {
        match self {
            BuiltinKind::Append => "append",
            BuiltinKind::Cap => "cap",
            BuiltinKind::Clear => "clear",
            BuiltinKind::Close => "close",
            BuiltinKind::Complex => "complex",
            BuiltinKind::Copy => "copy",
            BuiltinKind::Delete => "delete",
            BuiltinKind::Imag => "imag",
            BuiltinKind::Len => "len",
            BuiltinKind::Make => "make",
            BuiltinKind::Max => "max",
            BuiltinKind::Min => "min",
            BuiltinKind::New => "new",
            BuiltinKind::Panic => "panic",
            BuiltinKind::Print => "print",
            BuiltinKind::Println => "println",
            BuiltinKind::Real => "real",
            BuiltinKind::Recover => "recover",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|b| b.name() == name)
    }
}

#[derive(Debug)]
pub enum ObjectKind {
    Var { is_field: bool, embedded: bool },
    Const(ConstValue),
    Func,
    TypeName,
    PkgName(Arc<TypePackage>),
    Builtin(BuiltinKind),
    Label,
    Nil,
}

#[derive(Debug)]
pub struct ObjectData {
    pub name: String,
    pub kind: ObjectKind,
    pub ty: Type,
    pub pkg: Option<Arc<TypePackage>>,
    pub span: Span,
}

/// A named language entity resolved by the type checker. Compared by
/// identity.
#[derive(Clone)]
pub struct Object(Arc<ObjectData>);

impl Object {
    pub fn new(data: ObjectData) -> Self {
        Object(Arc::new(data))
    }

    fn make(pkg: Option<Arc<TypePackage>>, name: &str, kind: ObjectKind, ty: Type) -> Self {
        Object::new(ObjectData {
            name: name.to_string(),
            kind,
            ty,
            pkg,
            span: Span::NONE,
        })
    }

    pub fn var(pkg: Option<Arc<TypePackage>>, name: &str, ty: Type) -> Self {
        Self::make(
            pkg,
            name,
            ObjectKind::Var {
                is_field: false,
                embedded: false,
            },
            ty,
        )
    }

    pub fn field(pkg: Option<Arc<TypePackage>>, name: &str, ty: Type, embedded: bool) -> Self {
        Self::make(
            pkg,
            name,
            ObjectKind::Var {
                is_field: true,
                embedded,
            },
            ty,
        )
    }

    pub fn constant(pkg: Option<Arc<TypePackage>>, name: &str, ty: Type, value: ConstValue) -> Self {
        Self::make(pkg, name, ObjectKind::Const(value), ty)
    }

    /// A function or method; `sig` must be a signature type.
    pub fn func(pkg: Option<Arc<TypePackage>>, name: &str, sig: Type) -> Self {
        Self::make(pkg, name, ObjectKind::Func, sig)
    }

    pub fn type_name(pkg: Option<Arc<TypePackage>>, name: &str, ty: Type) -> Self {
        Self::make(pkg, name, ObjectKind::TypeName, ty)
    }

    pub fn pkg_name(name: &str, imported: Arc<TypePackage>) -> Self {
        Self::make(None, name, ObjectKind::PkgName(imported), Type::invalid())
    }

    pub fn builtin(kind: BuiltinKind) -> Self {
        Self::make(None, kind.name(), ObjectKind::Builtin(kind), Type::invalid())
    }

    pub fn label(name: &str) -> Self {
        Self::make(None, name, ObjectKind::Label, Type::invalid())
    }

    pub fn nil() -> Self {
        Self::make(
            None,
            "nil",
            ObjectKind::Nil,
            Type::basic(crate::types::BasicKind::UntypedNil),
        )
    }

    pub fn with_span(self, span: Span) -> Self {
        match Arc::try_unwrap(self.0) {
            Ok(mut data) => {
                data.span = span;
                Object::new(data)
            }
            Err(shared) => Object(shared),
        }
    }

    pub fn data(&self) -> &ObjectData {
        &self.0
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn kind(&self) -> &ObjectKind {
        &self.0.kind
    }

    pub fn ty(&self) -> &Type {
        &self.0.ty
    }

    pub fn pkg(&self) -> Option<&Arc<TypePackage>> {
        self.0.pkg.as_ref()
    }

    pub fn span(&self) -> Span {
        self.0.span
    }

    pub fn exported(&self) -> bool {
        is_exported(self.name())
    }

    pub fn id(&self) -> Id {
        Id::new(self.pkg().map(|p| p.as_ref()), self.name())
    }

    pub fn is_var(&self) -> bool {
        matches!(self.kind(), ObjectKind::Var { is_field: false, .. })
    }

    pub fn is_field(&self) -> bool {
        matches!(self.kind(), ObjectKind::Var { is_field: true, .. })
    }

    pub fn is_embedded(&self) -> bool {
        matches!(self.kind(), ObjectKind::Var { embedded: true, .. })
    }

    pub fn is_func(&self) -> bool {
        matches!(self.kind(), ObjectKind::Func)
    }

    pub fn is_type_name(&self) -> bool {
        matches!(self.kind(), ObjectKind::TypeName)
    }

    pub fn as_const(&self) -> Option<&ConstValue> {
        match self.kind() {
            ObjectKind::Const(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_builtin(&self) -> Option<BuiltinKind> {
        match self.kind() {
            ObjectKind::Builtin(kind) => Some(*kind),
            _ => None,
        }
    }

    pub fn signature(&self) -> Option<&Signature> {
        match self.kind() {
            ObjectKind::Func => self.ty().as_signature(),
            _ => None,
        }
    }

    /// The receiver of a method; `None` for plain functions and
    /// non-function objects.
    pub fn recv(&self) -> Option<&Object> {
        self.signature().and_then(|sig| sig.recv.as_ref())
    }

    pub fn is_method(&self) -> bool {
        self.recv().is_some()
    }

    /// Whether the method is declared on an interface type.
    pub fn is_abstract_method(&self) -> bool {
        self.recv().is_some_and(|recv| recv.ty().is_interface())
    }

    /// The qualified name of a package-level entity: `path.Name`, or
    /// `(path.T).M` / `(*path.T).M` for methods.
    pub fn full_name(&self) -> String {
        if let Some(recv) = self.recv() {
            return format!("({}).{}", recv.ty(), self.name());
        }
        match self.pkg() {
            Some(pkg) => format!("{}.{}", pkg.path, self.name()),
            None => self.name().to_string(),
        }
    }
}

impl PartialEq for Object {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for Object {}

impl Hash for Object {
    fn hash<H: Hasher>(&self, state: &mut H) {
        Arc::as_ptr(&self.0).hash(state);
    }
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind() {
            ObjectKind::Var { is_field: true, .. } => "field",
            ObjectKind::Var { .. } => "var",
            ObjectKind::Const(_) => "const",
            ObjectKind::Func => "func",
            ObjectKind::TypeName => "type",
            ObjectKind::PkgName(_) => "package",
            ObjectKind::Builtin(_) => "builtin",
            ObjectKind::Label => "label",
            ObjectKind::Nil => "nil",
        };
        write!(f, "{kind} {}", self.name())
    }
}

/// The type checker's view of a package.
pub struct TypePackage {
    pub path: String,
    pub name: String,
    scope: RwLock<BTreeMap<String, Object>>,
    imports: RwLock<Vec<Arc<TypePackage>>>,
}

impl TypePackage {
    pub fn new(path: impl Into<String>, name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            path: path.into(),
            name: name.into(),
            scope: RwLock::new(BTreeMap::new()),
            imports: RwLock::new(Vec::new()),
        })
    }

    /// Declares a package-level object.
    pub fn insert(&self, obj: Object) {
        let mut scope = self.scope.write().unwrap_or_else(|p| p.into_inner());
        scope.insert(obj.name().to_string(), obj);
    }

    pub fn lookup(&self, name: &str) -> Option<Object> {
        let scope = self.scope.read().unwrap_or_else(|p| p.into_inner());
        scope.get(name).cloned()
    }

    /// Package-level objects sorted by name.
    pub fn scope_objects(&self) -> Vec<Object> {
        let scope = self.scope.read().unwrap_or_else(|p| p.into_inner());
        scope.values().cloned().collect()
    }

    pub fn add_import(&self, pkg: Arc<TypePackage>) {
        let mut imports = self.imports.write().unwrap_or_else(|p| p.into_inner());
        if !imports.iter().any(|p| p.path == pkg.path) {
            imports.push(pkg);
        }
    }

    pub fn imports(&self) -> Vec<Arc<TypePackage>> {
        self.imports
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }
}

impl fmt::Debug for TypePackage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "package {} ({:?})", self.name, self.path)
    }
}

impl PartialEq for TypePackage {
    fn eq(&self, other: &Self) -> bool {
        self.path == other.path
    }
}

impl Eq for TypePackage {}

/// The named type a method's receiver is declared on, looking through a
/// pointer receiver.
pub fn recv_named(method: &Object) -> Option<Type> {
    let recv = method.recv()?;
    let base = recv.ty().deref();
    match base.kind() {
        TypeKind::Named(_) => Some(base.clone()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BasicKind;

    #[test]
    fn unexported_ids_carry_their_package() {
        let p = TypePackage::new("example.com/p", "p");
        let q = TypePackage::new("example.com/q", "q");
        let int = Type::basic(BasicKind::Int);
        let a = Object::var(Some(p.clone()), "x", int.clone());
        let b = Object::var(Some(q), "x", int.clone());
        assert_ne!(a.id(), b.id());
        let c = Object::var(Some(p), "X", int);
        assert_eq!(c.id(), Id::new(None, "X"));
        assert_eq!(c.id().to_string(), "X");
    }

    #[test]
    fn objects_compare_by_identity() {
        let int = Type::basic(BasicKind::Int);
        let a = Object::var(None, "x", int.clone());
        let b = Object::var(None, "x", int);
        assert_eq!(a, a.clone());
        assert_ne!(a, b);
    }
}
