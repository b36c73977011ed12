//! The program: every package handed to the builder, and the caches shared
//! by all of them.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use gossa_core::ast::File;
use gossa_core::collections::ConcurrentMap;
use gossa_core::config::BuilderMode;
use gossa_core::error::{Error, Result};
use gossa_core::info::TypeInfo;
use gossa_core::ir::{Builtin, Const, Function, Global};
use gossa_core::types::{BuiltinKind, Id, Object, Type, TypeKind, TypePackage};
use gossa_core::{debug, warn};
use itertools::Itertools;

use crate::methods::{build_synthetic, method_selections, needs_wrapper, MethodEntry, MethodSet, Synthetic};
use crate::package::Package;

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poison| poison.into_inner())
}

pub struct Program {
    mode: BuilderMode,
    packages: RwLock<BTreeMap<String, Arc<Package>>>,
    funcs: ConcurrentMap<Object, Arc<Function>>,
    globals: ConcurrentMap<Object, Arc<Global>>,
    builtins: ConcurrentMap<(BuiltinKind, Type), Arc<Builtin>>,
    /// Published method sets. Computing and inserting an entry happens
    /// under `method_set_lock`; reading a published one does not.
    method_sets: ConcurrentMap<Type, Arc<MethodSet>>,
    method_set_lock: Mutex<()>,
    thunks: Mutex<HashMap<(Type, Id), Arc<Synthetic>>>,
    bounds: Mutex<HashMap<Object, Arc<Synthetic>>>,
    /// Types needing a runtime descriptor. `true` marks types visited only
    /// as part of another type, which are not reported.
    runtime_types: Mutex<HashMap<Type, bool>>,
    /// Synthetic functions awaiting a body.
    pending: Mutex<Vec<Arc<Synthetic>>>,
    synthetics: Mutex<Vec<Arc<Function>>>,
    failures: Mutex<Vec<(String, Error)>>,
}

impl Program {
    pub fn new(mode: BuilderMode) -> Arc<Self> {
        Arc::new(Self {
            mode,
            packages: RwLock::new(BTreeMap::new()),
            funcs: ConcurrentMap::new(),
            globals: ConcurrentMap::new(),
            builtins: ConcurrentMap::new(),
            method_sets: ConcurrentMap::new(),
            method_set_lock: Mutex::new(()),
            thunks: Mutex::new(HashMap::new()),
            bounds: Mutex::new(HashMap::new()),
            runtime_types: Mutex::new(HashMap::new()),
            pending: Mutex::new(Vec::new()),
            synthetics: Mutex::new(Vec::new()),
            failures: Mutex::new(Vec::new()),
        })
    }

    pub fn mode(&self) -> BuilderMode {
        self.mode
    }

    /// Registers a type-checked package. Its functions are created now and
    /// built by [`Package::build`]. A package without files is treated as
    /// compiled elsewhere: its members exist but have no bodies.
    pub fn create_package(
        self: &Arc<Self>,
        pkg: Arc<TypePackage>,
        files: Vec<File>,
        info: TypeInfo,
    ) -> Result<Arc<Package>> {
        let mut packages = self.packages.write().unwrap_or_else(|p| p.into_inner());
        if packages.contains_key(&pkg.path) {
            return Err(Error::Generic(format!("package {:?} already created", pkg.path)));
        }
        let package = Arc::new(Package::create(self, pkg, files, info));
        packages.insert(package.pkg.path.clone(), package.clone());
        drop(packages);

        if self.mode.contains(BuilderMode::PRINT_PACKAGES) {
            let mut summary = String::new();
            package.write_to(&mut summary);
            gossa_core::info!("{summary}");
        }
        Ok(package)
    }

    pub fn package(&self, path: &str) -> Option<Arc<Package>> {
        let packages = self.packages.read().unwrap_or_else(|p| p.into_inner());
        packages.get(path).cloned()
    }

    /// Every package, sorted by path.
    pub fn all_packages(&self) -> Vec<Arc<Package>> {
        let packages = self.packages.read().unwrap_or_else(|p| p.into_inner());
        packages.values().cloned().collect()
    }

    /// Builds every package: concurrently, unless the mode asks for a
    /// serial build. Stops at the first invariant violation.
    pub fn build(&self) -> Result<()> {
        let packages = self.all_packages();
        if self.mode.contains(BuilderMode::BUILD_SERIALLY) {
            for package in &packages {
                package.build()?;
            }
            return Ok(());
        }

        std::thread::scope(|s| -> Result<()> {
            let handles: Vec<_> = packages
                .iter()
                .map(|package| s.spawn(move || package.build()))
                .collect();

            let mut outcome = Ok(());
            for handle in handles {
                match handle.join() {
                    Ok(Err(err)) if outcome.is_ok() => outcome = Err(err),
                    Ok(_) => {}
                    Err(_) => {
                        outcome = Err(Error::Generic("package build thread panicked".into()));
                    }
                }
            }
            outcome
        })
    }

    /// The function for a declared function or method.
    pub fn func_value(&self, obj: &Object) -> Option<Arc<Function>> {
        self.funcs.get_cloned(obj)
    }

    /// The function for a declared function or method, created without a
    /// body if its package was never registered.
    pub(crate) fn declared_func(&self, obj: &Object) -> Arc<Function> {
        self.funcs.get_or_insert_with(obj.clone(), || {
            debug!("no declaration for {}; treating it as external", obj.full_name());
            let func = Function::from_object(obj, obj.pkg().cloned());
            func.publish(None);
            Arc::new(func)
        })
    }

    pub(crate) fn register_func(&self, obj: &Object, func: Arc<Function>) -> Arc<Function> {
        self.funcs.get_or_insert_with(obj.clone(), || func)
    }

    /// The global for a package-level variable.
    pub fn global(&self, obj: &Object) -> Option<Arc<Global>> {
        self.globals.get_cloned(obj)
    }

    pub(crate) fn declared_global(&self, obj: &Object) -> Option<Arc<Global>> {
        let pkg = obj.pkg()?.clone();
        Some(
            self.globals
                .get_or_insert_with(obj.clone(), || Arc::new(Global::from_object(pkg, obj))),
        )
    }

    /// The typed constant for a named constant object.
    pub fn const_value(&self, obj: &Object) -> Option<Const> {
        obj.as_const()
            .map(|value| Const::new(obj.ty().clone(), value.clone()))
    }

    /// The builtin `kind` at the signature of one call site.
    pub(crate) fn builtin(&self, kind: BuiltinKind, sig: Type) -> Arc<Builtin> {
        self.builtins
            .get_or_insert_with((kind, sig.clone()), || Arc::new(Builtin { kind, sig }))
    }

    /// The method set of `t` with every wrapper built.
    pub fn method_set(&self, t: &Type) -> Result<Arc<MethodSet>> {
        let mset = self.method_set_unbuilt(t);
        for entry in mset.iter() {
            if let Some(synth) = &entry.synthetic {
                self.build_one(synth)?;
            }
        }
        Ok(mset)
    }

    /// The method set of `t`. New wrappers join the build queue instead of
    /// being built.
    pub(crate) fn method_set_unbuilt(&self, t: &Type) -> Arc<MethodSet> {
        if let Some(mset) = self.method_sets.get_cloned(t) {
            return mset;
        }
        let _guard = lock(&self.method_set_lock);
        if let Some(mset) = self.method_sets.get_cloned(t) {
            return mset;
        }

        let entries = method_selections(t)
            .into_iter()
            .map(|(id, selection)| {
                if selection.obj.is_abstract_method() && t.is_interface() {
                    return MethodEntry {
                        id,
                        selection,
                        func: None,
                        synthetic: None,
                    };
                }
                if needs_wrapper(t, &selection) {
                    let synth = Arc::new(Synthetic::promoted(t, selection.clone()));
                    debug!("created {}", synth.func.relative_name(None));
                    self.enqueue(synth.clone());
                    MethodEntry {
                        id,
                        selection,
                        func: Some(synth.func.clone()),
                        synthetic: Some(synth),
                    }
                } else {
                    let func = self.declared_func(&selection.obj);
                    MethodEntry {
                        id,
                        selection,
                        func: Some(func),
                        synthetic: None,
                    }
                }
            })
            .collect();
        let mset = Arc::new(MethodSet::new(t.clone(), entries));
        self.method_sets.insert(t.clone(), mset.clone());
        mset
    }

    /// The function implementing method `name` of `t`, or `None` when `t`
    /// has no such method or the method is abstract.
    pub fn lookup_method(&self, t: &Type, pkg: Option<&TypePackage>, name: &str) -> Result<Option<Arc<Function>>> {
        let mset = self.method_set(t)?;
        Ok(mset
            .lookup(&Id::new(pkg, name))
            .and_then(|entry| entry.func.clone()))
    }

    /// The thunk for the method expression `recv.m`.
    pub(crate) fn thunk(&self, recv: &Type, selection: &crate::methods::MethodSelection) -> Arc<Function> {
        let key = (recv.clone(), selection.obj.id());
        let mut thunks = lock(&self.thunks);
        if let Some(synth) = thunks.get(&key) {
            return synth.func.clone();
        }
        let synth = Arc::new(Synthetic::thunk(recv, selection.clone()));
        debug!("created {}", synth.func.relative_name(None));
        thunks.insert(key, synth.clone());
        drop(thunks);
        self.enqueue(synth.clone());
        synth.func.clone()
    }

    /// The closure body shared by every method value `x.m` of `method`.
    pub(crate) fn bound(&self, method: &Object) -> Arc<Function> {
        let mut bounds = lock(&self.bounds);
        if let Some(synth) = bounds.get(method) {
            return synth.func.clone();
        }
        let synth = Arc::new(Synthetic::bound(method));
        debug!("created {}", synth.func.relative_name(None));
        bounds.insert(method.clone(), synth.clone());
        drop(bounds);
        self.enqueue(synth.clone());
        synth.func.clone()
    }

    fn enqueue(&self, synth: Arc<Synthetic>) {
        lock(&self.synthetics).push(synth.func.clone());
        lock(&self.pending).push(synth);
    }

    /// Builds queued synthetic functions until the queue stays empty.
    pub(crate) fn drain_pending(&self) -> Result<()> {
        loop {
            let batch = std::mem::take(&mut *lock(&self.pending));
            if batch.is_empty() {
                return Ok(());
            }
            for synth in batch {
                self.build_one(&synth)?;
            }
        }
    }

    fn build_one(&self, synth: &Synthetic) -> Result<()> {
        match build_synthetic(self, synth) {
            Ok(()) => Ok(()),
            Err(err) if err.is_invariant() => Err(err),
            Err(err) => {
                warn!("{err}");
                lock(&self.failures).push((synth.func.relative_name(None), err));
                Ok(())
            }
        }
    }

    /// Records that values of type `t` are converted to an interface, along
    /// with every type reachable from it by reflection. The method sets of
    /// those types are created too, queueing any wrapper they need.
    pub(crate) fn need_runtime_type(&self, t: &Type) {
        let mut with_methods = Vec::new();
        let mut seen = lock(&self.runtime_types);
        let mut work = vec![(t.clone(), false)];
        while let Some((t, skip)) = work.pop() {
            if let Some(&prev) = seen.get(&t) {
                if skip || !prev {
                    continue;
                }
            }
            seen.insert(t.clone(), skip);
            if !skip && has_method_set(&t) {
                with_methods.push(t.clone());
            }

            let methods = match t.kind() {
                TypeKind::Named(named) => {
                    let mut methods = named.methods();
                    if let Some(iface) = t.as_interface() {
                        methods.extend(iface.all_methods().iter().cloned());
                    }
                    methods
                }
                TypeKind::Pointer(elem) => elem.as_named().map(|n| n.methods()).unwrap_or_default(),
                TypeKind::Interface(iface) => iface.all_methods().to_vec(),
                _ => Vec::new(),
            };
            for method in methods {
                if let Some(sig) = method.signature() {
                    work.push((sig.params_tuple(), true));
                    work.push((sig.results_tuple(), true));
                }
            }

            match t.kind() {
                TypeKind::Basic(_) | TypeKind::Interface(_) => {}
                TypeKind::Named(_) => {
                    work.push((Type::pointer(t.clone()), false));
                    work.push((t.underlying().clone(), true));
                }
                TypeKind::Pointer(elem) | TypeKind::Slice(elem) | TypeKind::Array(elem, _) | TypeKind::Chan(_, elem) => {
                    work.push((elem.clone(), false));
                }
                TypeKind::Map(key, elem) => {
                    work.push((key.clone(), false));
                    work.push((elem.clone(), false));
                }
                TypeKind::Signature(sig) => {
                    work.push((sig.params_tuple(), true));
                    work.push((sig.results_tuple(), true));
                }
                TypeKind::Tuple(vars) => {
                    work.extend(vars.iter().map(|v| (v.ty().clone(), false)));
                }
                TypeKind::Struct(st) => {
                    work.extend(st.fields.iter().map(|f| (f.ty().clone(), false)));
                }
            }
        }
        drop(seen);

        // method_set_unbuilt takes method_set_lock.
        for t in with_methods {
            self.method_set_unbuilt(&t);
        }
    }

    /// Types needing a runtime descriptor, sorted by their printed form.
    pub fn runtime_types(&self) -> Vec<Type> {
        let seen = lock(&self.runtime_types);
        seen.iter()
            .filter(|(_, skip)| !**skip)
            .map(|(t, _)| t.clone())
            .sorted_by_cached_key(|t| t.to_string())
            .collect()
    }

    /// Every function of the program: package members, methods, anonymous
    /// functions and synthetic wrappers. Sorted by name.
    pub fn all_functions(&self) -> Vec<Arc<Function>> {
        let mut roots: Vec<Arc<Function>> = self.funcs.values_cloned();
        for package in self.all_packages() {
            roots.push(package.init().clone());
            roots.extend(package.declared_inits().iter().cloned());
        }
        roots.extend(lock(&self.synthetics).iter().cloned());

        let mut out = Vec::new();
        let mut seen = std::collections::HashSet::new();
        while let Some(func) = roots.pop() {
            if !seen.insert(Arc::as_ptr(&func)) {
                continue;
            }
            roots.extend(func.anon_funcs().iter().cloned());
            out.push(func);
        }
        out.sort_by_cached_key(|f| f.relative_name(None));
        out
    }

    /// Synthetic functions that failed to build, with their errors.
    pub fn failures(&self) -> Vec<(String, Error)> {
        let mut failures = lock(&self.failures).clone();
        for package in self.all_packages() {
            failures.extend(package.failures());
        }
        failures
    }
}

/// Concrete types whose method set a runtime descriptor carries.
fn has_method_set(t: &Type) -> bool {
    match t.kind() {
        TypeKind::Named(_) => !t.is_interface(),
        TypeKind::Pointer(elem) => elem.as_named().is_some() && !elem.is_interface(),
        TypeKind::Struct(st) => st.fields.iter().any(|f| f.is_embedded()),
        _ => false,
    }
}

impl std::fmt::Debug for Program {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let packages = self.packages.read().unwrap_or_else(|p| p.into_inner());
        f.debug_struct("Program")
            .field("mode", &self.mode)
            .field("packages", &packages.keys().collect::<Vec<_>>())
            .finish()
    }
}
