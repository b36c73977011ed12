//! Method sets: which methods are callable on values of a type, and the
//! functions that implement them.
//!
//! The set is found by a breadth-first walk of the embedded-field graph.
//! A name found at some depth hides the same name deeper down; two
//! candidates for one name at the same depth block each other.

mod wrappers;

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use gossa_core::ir::Function;
use gossa_core::types::{Id, Object, Type, TypeKind};

pub(crate) use wrappers::{build_synthetic, Synthetic};

/// How a method is reached from the receiver type.
#[derive(Debug, Clone)]
pub struct MethodSelection {
    /// The declared (or abstract) method.
    pub obj: Object,
    /// Embedded-field indices leading to the method's holder, followed by
    /// the method's index in its holder.
    pub index: Vec<usize>,
    /// Whether the path dereferenced a pointer, including the receiver type
    /// itself being one.
    pub indirect: bool,
}

impl MethodSelection {
    /// The embedded fields walked before reaching the method's holder.
    pub fn path(&self) -> &[usize] {
        &self.index[..self.index.len().saturating_sub(1)]
    }
}

#[derive(Debug, Clone)]
pub struct MethodEntry {
    pub id: Id,
    pub selection: MethodSelection,
    /// The implementing function: the declared method or a wrapper. `None`
    /// for the abstract methods of an interface.
    pub func: Option<Arc<Function>>,
    pub(crate) synthetic: Option<Arc<Synthetic>>,
}

/// The method set of a type, sorted by method id.
#[derive(Debug, Clone)]
pub struct MethodSet {
    recv: Type,
    entries: Vec<MethodEntry>,
}

impl MethodSet {
    pub(crate) fn new(recv: Type, entries: Vec<MethodEntry>) -> Self {
        Self { recv, entries }
    }

    pub fn recv(&self) -> &Type {
        &self.recv
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &MethodEntry> {
        self.entries.iter()
    }

    pub fn lookup(&self, id: &Id) -> Option<&MethodEntry> {
        self.entries
            .binary_search_by(|e| e.id.cmp(id))
            .ok()
            .map(|i| &self.entries[i])
    }

    pub fn ids(&self) -> Vec<Id> {
        self.entries.iter().map(|e| e.id.clone()).collect()
    }
}

#[derive(Clone)]
struct Embedded {
    ty: Type,
    index: Vec<usize>,
    indirect: bool,
    /// The type occurs more than once at this depth.
    multiples: bool,
}

fn concat(prefix: &[usize], i: usize) -> Vec<usize> {
    let mut index = Vec::with_capacity(prefix.len() + 1);
    index.extend_from_slice(prefix);
    index.push(i);
    index
}

fn has_ptr_recv(method: &Object) -> bool {
    method.recv().is_some_and(|recv| recv.ty().is_pointer())
}

/// Candidates of one depth; `None` marks a blocked name.
type Candidates = BTreeMap<Id, Option<MethodSelection>>;

fn add_methods(set: &mut Candidates, methods: &[Object], index: &[usize], indirect: bool, multiples: bool) {
    for (i, method) in methods.iter().enumerate() {
        let id = method.id();
        if !multiples && !set.contains_key(&id) && (indirect || !has_ptr_recv(method)) {
            set.insert(
                id,
                Some(MethodSelection {
                    obj: method.clone(),
                    index: concat(index, i),
                    indirect,
                }),
            );
        } else {
            set.insert(id, None);
        }
    }
}

/// Merges repeated embedded types, marking them as occurring more than once.
fn consolidate_multiples(list: Vec<Embedded>) -> Vec<Embedded> {
    let mut out: Vec<Embedded> = Vec::with_capacity(list.len());
    for e in list {
        match out.iter_mut().find(|seen| seen.ty == e.ty) {
            Some(seen) => seen.multiples = true,
            None => out.push(e),
        }
    }
    out
}

/// Computes the method selections of `t`, sorted by id. Interfaces yield
/// their abstract methods; pointers to interfaces have no methods.
pub fn method_selections(t: &Type) -> Vec<(Id, MethodSelection)> {
    if let Some(iface) = t.as_interface() {
        return iface
            .all_methods()
            .iter()
            .enumerate()
            .map(|(i, m)| {
                let selection = MethodSelection {
                    obj: m.clone(),
                    index: vec![i],
                    indirect: false,
                };
                (m.id(), selection)
            })
            .collect();
    }

    let (start, is_ptr) = match t.kind() {
        TypeKind::Pointer(elem) => (elem.clone(), true),
        _ => (t.clone(), false),
    };
    if is_ptr && start.is_interface() {
        return Vec::new();
    }

    let mut base: Candidates = BTreeMap::new();
    let mut seen: HashSet<Type> = HashSet::new();
    let mut current = vec![Embedded {
        ty: start,
        index: Vec::new(),
        indirect: is_ptr,
        multiples: false,
    }];

    while !current.is_empty() {
        let mut next = Vec::new();
        let mut fields: HashSet<Id> = HashSet::new();
        let mut methods: Candidates = BTreeMap::new();

        for e in &current {
            if let Some(named) = e.ty.as_named() {
                if !seen.insert(e.ty.clone()) {
                    continue;
                }
                add_methods(&mut methods, &named.methods(), &e.index, e.indirect, e.multiples);
            }
            match e.ty.under() {
                TypeKind::Struct(st) => {
                    for (i, field) in st.fields.iter().enumerate() {
                        fields.insert(field.id());
                        if field.is_embedded() {
                            let (ty, ptr) = match field.ty().kind() {
                                TypeKind::Pointer(elem) => (elem.clone(), true),
                                _ => (field.ty().clone(), false),
                            };
                            next.push(Embedded {
                                ty,
                                index: concat(&e.index, i),
                                indirect: e.indirect || ptr,
                                multiples: e.multiples,
                            });
                        }
                    }
                }
                TypeKind::Interface(iface) => {
                    add_methods(&mut methods, iface.all_methods(), &e.index, true, e.multiples);
                }
                _ => {}
            }
        }

        for (id, candidate) in methods {
            if !base.contains_key(&id) {
                let candidate = if fields.contains(&id) { None } else { candidate };
                base.insert(id, candidate);
            }
        }
        for id in fields {
            base.entry(id).or_insert(None);
        }

        current = consolidate_multiples(next);
    }

    base.into_iter()
        .filter_map(|(id, candidate)| candidate.map(|sel| (id, sel)))
        .collect()
}

/// Whether calling `sel` on a `recv` value needs a synthetic wrapper: the
/// method is promoted, or a value method is called through a pointer.
pub(crate) fn needs_wrapper(recv: &Type, sel: &MethodSelection) -> bool {
    let promoted = sel.index.len() > 1;
    let indirection = !has_ptr_recv(&sel.obj) && recv.is_pointer();
    promoted || indirection
}

#[cfg(test)]
mod tests {
    use super::*;
    use gossa_core::types::{BasicKind, Signature, TypePackage};

    fn method(pkg: &Arc<TypePackage>, recv: Type, name: &str) -> Object {
        let sig = Signature::new(Vec::new(), Vec::new(), false).with_recv(Object::var(Some(pkg.clone()), "", recv));
        Object::func(Some(pkg.clone()), name, Type::signature(sig))
    }

    fn named_struct(pkg: &Arc<TypePackage>, name: &str, fields: Vec<Object>) -> Type {
        let t = Type::named(Some(pkg.clone()), name);
        t.set_underlying(Type::structure(fields));
        t
    }

    #[test]
    fn pointer_methods_need_an_indirect_path() {
        let pkg = TypePackage::new("p", "p");
        let t = named_struct(&pkg, "T", Vec::new());
        let m = method(&pkg, Type::pointer(t.clone()), "M");
        t.as_named().unwrap().add_method(m);

        assert!(method_selections(&t).is_empty());
        let ptr = method_selections(&Type::pointer(t.clone()));
        assert_eq!(ptr.len(), 1);
        assert_eq!(ptr[0].1.index, vec![0]);
    }

    #[test]
    fn promotion_through_embedded_pointer() {
        let pkg = TypePackage::new("p", "p");
        let c = named_struct(&pkg, "C", Vec::new());
        c.as_named().unwrap().add_method(method(&pkg, Type::pointer(c.clone()), "f"));
        let b = named_struct(
            &pkg,
            "B",
            vec![Object::field(Some(pkg.clone()), "C", Type::pointer(c.clone()), true)],
        );
        let a = named_struct(&pkg, "A", vec![Object::field(Some(pkg.clone()), "B", b.clone(), true)]);

        let set = method_selections(&a);
        assert_eq!(set.len(), 1);
        let (id, sel) = &set[0];
        assert_eq!(id.name, "f");
        assert_eq!(sel.index, vec![0, 0, 0]);
        assert!(sel.indirect);
        assert_eq!(sel.path(), &[0, 0]);
    }

    #[test]
    fn same_depth_collisions_block_the_name() {
        let pkg = TypePackage::new("p", "p");
        let x = named_struct(&pkg, "X", Vec::new());
        x.as_named().unwrap().add_method(method(&pkg, x.clone(), "M"));
        let y = named_struct(&pkg, "Y", Vec::new());
        y.as_named().unwrap().add_method(method(&pkg, y.clone(), "M"));
        let s = named_struct(
            &pkg,
            "S",
            vec![
                Object::field(Some(pkg.clone()), "X", x, true),
                Object::field(Some(pkg.clone()), "Y", y, true),
            ],
        );
        assert!(method_selections(&s).is_empty());
    }

    #[test]
    fn fields_hide_deeper_methods() {
        let pkg = TypePackage::new("p", "p");
        let inner = named_struct(&pkg, "Inner", Vec::new());
        inner.as_named().unwrap().add_method(method(&pkg, inner.clone(), "Name"));
        let outer = named_struct(
            &pkg,
            "Outer",
            vec![
                Object::field(Some(pkg.clone()), "Inner", inner, true),
                Object::field(Some(pkg.clone()), "Name", Type::basic(BasicKind::String), false),
            ],
        );
        assert!(method_selections(&outer).is_empty());
    }

    #[test]
    fn recursive_embedding_terminates() {
        let pkg = TypePackage::new("p", "p");
        let node = Type::named(Some(pkg.clone()), "Node");
        node.set_underlying(Type::structure(vec![Object::field(
            Some(pkg.clone()),
            "Node",
            Type::pointer(node.clone()),
            true,
        )]));
        node.as_named().unwrap().add_method(method(&pkg, node.clone(), "Walk"));
        let set = method_selections(&node);
        assert_eq!(set.len(), 1);
        assert_eq!(set[0].1.index, vec![0]);
    }
}
