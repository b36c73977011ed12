//! A package of the program: its members and the build that fills in their
//! bodies.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::{Arc, Mutex, OnceLock, Weak};

use gossa_core::ast::{Decl, File, FuncDecl, Spec};
use gossa_core::error::{Error, Result};
use gossa_core::info::TypeInfo;
use gossa_core::ir::{Const, Function, FunctionBody, Global};
use gossa_core::types::{BasicKind, Object, ObjectKind, Signature, Type, TypePackage};
use gossa_core::{debug, info, warn};

use crate::builder;
use crate::passes;
use crate::program::{lock, Program};

#[derive(Debug, Clone)]
pub struct NamedConst {
    pub object: Object,
    pub value: Const,
}

/// A package-level entity.
#[derive(Debug, Clone)]
pub enum Member {
    Global(Arc<Global>),
    Function(Arc<Function>),
    Const(NamedConst),
    Type(Object),
}

impl Member {
    pub fn kind(&self) -> &'static str {
        match self {
            Member::Global(_) => "var",
            Member::Function(_) => "func",
            Member::Const(_) => "const",
            Member::Type(_) => "type",
        }
    }

    pub fn ty(&self) -> Type {
        match self {
            Member::Global(g) => g.ty.clone(),
            Member::Function(f) => f.ty(),
            Member::Const(c) => c.value.ty.clone(),
            Member::Type(obj) => obj.ty().clone(),
        }
    }
}

/// Syntax and type information, held only until the package is built.
pub(crate) struct Source {
    pub files: Vec<File>,
    pub info: TypeInfo,
}

pub struct Package {
    prog: Weak<Program>,
    pub pkg: Arc<TypePackage>,
    members: BTreeMap<String, Member>,
    init: Arc<Function>,
    init_guard: Arc<Global>,
    /// User-written `init` functions, in source order.
    inits: Vec<Arc<Function>>,
    source: Mutex<Option<Source>>,
    built: OnceLock<Result<()>>,
    failures: Mutex<Vec<(String, Error)>>,
}

impl Package {
    pub(crate) fn create(prog: &Arc<Program>, pkg: Arc<TypePackage>, files: Vec<File>, info: TypeInfo) -> Self {
        let mut members = BTreeMap::new();
        let mut inits = Vec::new();

        let init = Arc::new(
            Function::new("init", Signature::new(Vec::new(), Vec::new(), false))
                .with_pkg(Some(pkg.clone()))
                .synthetic("package initializer"),
        );
        let init_guard = Arc::new(Global::new(pkg.clone(), "init$guard", Type::basic(BasicKind::Bool)));
        members.insert("init".to_string(), Member::Function(init.clone()));
        members.insert("init$guard".to_string(), Member::Global(init_guard.clone()));

        if files.is_empty() {
            for obj in pkg.scope_objects() {
                if let Some(member) = member_from_object(prog, &pkg, &obj, false) {
                    members.insert(obj.name().to_string(), member);
                }
            }
            init.publish(None);
        } else {
            for file in &files {
                for decl in &file.decls {
                    match decl {
                        Decl::Gen(gen) => {
                            for spec in &gen.specs {
                                for ident in spec_names(spec) {
                                    let Some(obj) = info.object_of(ident) else {
                                        continue;
                                    };
                                    if let Some(member) = member_from_object(prog, &pkg, obj, true) {
                                        members.insert(obj.name().to_string(), member);
                                    }
                                }
                            }
                        }
                        Decl::Func(decl) => {
                            let Some(obj) = info.object_of(decl.name.id) else {
                                continue;
                            };
                            if obj.is_method() {
                                let func = Function::from_object(obj, Some(pkg.clone()));
                                prog.register_func(obj, Arc::new(func));
                            } else if decl.name.name == "init" {
                                let name = format!("init#{}", inits.len() + 1);
                                let mut func = Function::from_object(obj, Some(pkg.clone()));
                                func.name = name;
                                inits.push(Arc::new(func));
                            } else if let Some(member) = member_from_object(prog, &pkg, obj, true) {
                                members.insert(obj.name().to_string(), member);
                            }
                        }
                    }
                }
            }
        }

        let source = (!files.is_empty()).then_some(Source { files, info });
        Self {
            prog: Arc::downgrade(prog),
            pkg,
            members,
            init,
            init_guard,
            inits,
            source: Mutex::new(source),
            built: OnceLock::new(),
            failures: Mutex::new(Vec::new()),
        }
    }

    pub fn path(&self) -> &str {
        &self.pkg.path
    }

    /// Members sorted by name.
    pub fn members(&self) -> &BTreeMap<String, Member> {
        &self.members
    }

    pub fn member(&self, name: &str) -> Option<&Member> {
        self.members.get(name)
    }

    pub fn func(&self, name: &str) -> Option<Arc<Function>> {
        match self.members.get(name) {
            Some(Member::Function(f)) => Some(f.clone()),
            _ => None,
        }
    }

    pub fn var(&self, name: &str) -> Option<Arc<Global>> {
        match self.members.get(name) {
            Some(Member::Global(g)) => Some(g.clone()),
            _ => None,
        }
    }

    pub fn constant(&self, name: &str) -> Option<&NamedConst> {
        match self.members.get(name) {
            Some(Member::Const(c)) => Some(c),
            _ => None,
        }
    }

    pub fn named_type(&self, name: &str) -> Option<Type> {
        match self.members.get(name) {
            Some(Member::Type(obj)) => Some(obj.ty().clone()),
            _ => None,
        }
    }

    /// The synthetic package initializer.
    pub fn init(&self) -> &Arc<Function> {
        &self.init
    }

    pub(crate) fn init_guard(&self) -> &Arc<Global> {
        &self.init_guard
    }

    /// The user-written `init` functions, named `init#1`, `init#2`, ...
    pub fn declared_inits(&self) -> &[Arc<Function>] {
        &self.inits
    }

    /// Functions of this package that failed to build, with their errors.
    pub fn failures(&self) -> Vec<(String, Error)> {
        lock(&self.failures).clone()
    }

    /// Builds the body of every function of the package. Later and
    /// concurrent calls return the outcome of the first.
    pub fn build(&self) -> Result<()> {
        self.built.get_or_init(|| self.build_once()).clone()
    }

    fn build_once(&self) -> Result<()> {
        let Some(prog) = self.prog.upgrade() else {
            return Err(Error::invariant(self.path(), "program dropped before build"));
        };
        let Some(source) = lock(&self.source).take() else {
            return Ok(());
        };
        debug!("building package {}", self.path());

        self.build_function(&prog, &self.init, || builder::build_init(&prog, self, &source))?;

        let mut next_init = self.inits.iter();
        for file in &source.files {
            for decl in &file.decls {
                let Decl::Func(decl) = decl else {
                    continue;
                };
                let func = if decl.recv.is_none() && decl.name.name == "init" {
                    next_init.next().cloned()
                } else {
                    source
                        .info
                        .object_of(decl.name.id)
                        .and_then(|obj| prog.func_value(obj))
                };
                let Some(func) = func else {
                    warn!("{}: no function for declaration of {}", self.path(), decl.name.name);
                    continue;
                };
                self.build_decl(&prog, &source, decl, &func)?;
            }
        }

        prog.drain_pending()?;
        debug!("finished package {}", self.path());
        Ok(())
    }

    fn build_decl(&self, prog: &Program, source: &Source, decl: &FuncDecl, func: &Arc<Function>) -> Result<()> {
        if decl.body.is_none() {
            func.publish(None);
            return Ok(());
        }
        self.build_function(prog, func, || builder::build_function(prog, self, &source.info, decl, func))
    }

    /// Runs `build` for `func`. Input errors are recorded against the
    /// function; invariant violations end the package build.
    fn build_function(
        &self,
        prog: &Program,
        func: &Arc<Function>,
        build: impl FnOnce() -> Result<FunctionBody>,
    ) -> Result<()> {
        match func.get_or_build(build) {
            Ok(_) => {
                passes::log_function(prog, func);
                Ok(())
            }
            Err(err) if err.is_invariant() => Err(err),
            Err(err) => {
                warn!("{err}");
                lock(&self.failures).push((func.relative_name(None), err));
                Ok(())
            }
        }
    }

    /// Appends a summary of the package's members to `out`.
    pub fn write_to(&self, out: &mut String) {
        let from = Some(self.pkg.as_ref());
        let _ = writeln!(out, "package {}:", self.pkg.path);
        for (name, member) in &self.members {
            let ty = match member {
                Member::Type(obj) => obj.ty().underlying().relative_string(from),
                Member::Global(g) => g.ty.deref().relative_string(from),
                other => other.ty().relative_string(from),
            };
            let _ = writeln!(out, "  {:<5} {name:<10} {ty}", member.kind());
            if let Member::Type(obj) = member {
                for recv in [obj.ty().clone(), Type::pointer(obj.ty().clone())] {
                    let Some(prog) = self.prog.upgrade() else {
                        continue;
                    };
                    let mset = prog.method_set_unbuilt(&recv);
                    for entry in mset.iter().filter(|e| e.synthetic.is_none()) {
                        let sig = entry
                            .selection
                            .obj
                            .signature()
                            .map(|s| Type::signature(s.without_recv()).relative_string(from))
                            .unwrap_or_default();
                        let sig = sig.strip_prefix("func").unwrap_or(&sig);
                        let _ = writeln!(
                            out,
                            "    method ({}) {}{sig}",
                            recv.relative_string(from),
                            entry.id.name
                        );
                    }
                }
            }
        }
    }
}

impl std::fmt::Debug for Package {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Package({})", self.pkg.path)
    }
}

fn spec_names(spec: &Spec) -> Vec<gossa_core::ast::NodeId> {
    match spec {
        Spec::Import(_) => Vec::new(),
        Spec::Value(value) => value.names.iter().filter(|n| !n.is_blank()).map(|n| n.id).collect(),
        Spec::Type(ty) => vec![ty.name.id],
    }
}

/// The member for a package-level object. Functions of packages without
/// source have no body.
fn member_from_object(prog: &Program, pkg: &Arc<TypePackage>, obj: &Object, has_source: bool) -> Option<Member> {
    match obj.kind() {
        ObjectKind::Var { is_field: false, .. } => prog.declared_global(obj).map(Member::Global),
        ObjectKind::Const(value) => Some(Member::Const(NamedConst {
            object: obj.clone(),
            value: Const::new(obj.ty().clone(), value.clone()),
        })),
        ObjectKind::TypeName => {
            if !has_source {
                if let Some(named) = obj.ty().as_named() {
                    for method in named.methods() {
                        prog.declared_func(&method);
                    }
                }
            }
            Some(Member::Type(obj.clone()))
        }
        ObjectKind::Func => {
            let func = Function::from_object(obj, Some(pkg.clone()));
            if !has_source {
                func.publish(None);
            }
            Some(Member::Function(prog.register_func(obj, Arc::new(func))))
        }
        _ => {
            info!("{}: skipping member {:?}", pkg.path, obj);
            None
        }
    }
}
