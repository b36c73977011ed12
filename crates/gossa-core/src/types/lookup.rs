//! Selector resolution: finds the field or method `name` of a type,
//! following embedded fields breadth-first.

use std::collections::HashSet;

use crate::types::{Id, Object, Type, TypeKind, TypePackage};

#[derive(Debug, Clone)]
pub struct LookupResult {
    pub obj: Object,
    /// Field indices along the embedding path; for methods the last entry is
    /// the method's position in its declaring type.
    pub index: Vec<usize>,
    /// Whether a pointer was dereferenced along the path (including `ty`
    /// itself being a pointer).
    pub indirect: bool,
}

#[derive(Clone)]
struct Embedded {
    ty: Type,
    index: Vec<usize>,
    indirect: bool,
    multiples: bool,
}

fn concat(prefix: &[usize], i: usize) -> Vec<usize> {
    let mut index = Vec::with_capacity(prefix.len() + 1);
    index.extend_from_slice(prefix);
    index.push(i);
    index
}

/// Looks up the field or method `name` (qualified by `pkg` when unexported)
/// in `ty`. Returns `None` when there is no such selector, when it is
/// ambiguous at the shallowest depth, or when it names a pointer-receiver
/// method that is not in the method set of a non-addressable `ty`.
pub fn lookup_field_or_method(
    ty: &Type,
    addressable: bool,
    pkg: Option<&TypePackage>,
    name: &str,
) -> Option<LookupResult> {
    if name == "_" {
        return None;
    }
    let id = Id::new(pkg, name);
    let (start, is_ptr) = match ty.kind() {
        TypeKind::Pointer(elem) => (elem.clone(), true),
        _ => (ty.clone(), false),
    };

    let mut current = vec![Embedded {
        ty: start,
        index: Vec::new(),
        indirect: is_ptr,
        multiples: false,
    }];
    let mut seen: HashSet<Type> = HashSet::new();

    while !current.is_empty() {
        let mut next = Vec::new();
        let mut found: Option<LookupResult> = None;
        let mut count = 0;

        for e in &current {
            if let Some(named) = e.ty.as_named() {
                if !seen.insert(e.ty.clone()) {
                    continue;
                }
                for (i, method) in named.methods().iter().enumerate() {
                    if method.id() == id {
                        count += if e.multiples { 2 } else { 1 };
                        found = Some(LookupResult {
                            obj: method.clone(),
                            index: concat(&e.index, i),
                            indirect: e.indirect,
                        });
                    }
                }
            }
            match e.ty.under() {
                TypeKind::Struct(st) => {
                    for (i, field) in st.fields.iter().enumerate() {
                        if field.id() == id {
                            count += if e.multiples { 2 } else { 1 };
                            found = Some(LookupResult {
                                obj: field.clone(),
                                index: concat(&e.index, i),
                                indirect: e.indirect,
                            });
                            continue;
                        }
                        if found.is_none() && field.is_embedded() {
                            let (ty, is_ptr) = match field.ty().kind() {
                                TypeKind::Pointer(elem) => (elem.clone(), true),
                                _ => (field.ty().clone(), false),
                            };
                            if matches!(ty.under(), TypeKind::Struct(_) | TypeKind::Interface(_)) {
                                next.push(Embedded {
                                    ty,
                                    index: concat(&e.index, i),
                                    indirect: e.indirect || is_ptr,
                                    multiples: e.multiples,
                                });
                            }
                        }
                    }
                }
                TypeKind::Interface(iface) => {
                    if let Some(i) = iface.method_index(&id) {
                        count += if e.multiples { 2 } else { 1 };
                        found = Some(LookupResult {
                            obj: iface.all_methods()[i].clone(),
                            index: concat(&e.index, i),
                            indirect: e.indirect,
                        });
                    }
                }
                _ => {}
            }
        }

        if count > 1 {
            return None;
        }
        if let Some(found) = found {
            let ptr_recv = found
                .obj
                .recv()
                .is_some_and(|recv| matches!(recv.ty().kind(), TypeKind::Pointer(_)));
            if ptr_recv && !found.indirect && !addressable {
                return None;
            }
            return Some(found);
        }
        current = consolidate(next);
    }
    None
}

/// Merges entries for the same type, marking them as reachable more than
/// once.
fn consolidate(list: Vec<Embedded>) -> Vec<Embedded> {
    let mut out: Vec<Embedded> = Vec::with_capacity(list.len());
    for e in list {
        match out.iter_mut().find(|o| o.ty == e.ty) {
            Some(existing) => existing.multiples = true,
            None => out.push(e),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BasicKind, Signature};

    fn method(recv: Type, name: &str) -> Object {
        let sig = Signature::new(Vec::new(), Vec::new(), false)
            .with_recv(Object::var(None, "", recv));
        Object::func(None, name, Type::signature(sig))
    }

    #[test]
    fn finds_promoted_field_and_method() {
        let inner = Type::named(None, "Inner");
        inner.set_underlying(Type::structure(vec![Object::field(
            None,
            "X",
            Type::basic(BasicKind::Int),
            false,
        )]));
        let m = method(Type::pointer(inner.clone()), "M");
        inner.as_named().unwrap().add_method(m.clone());

        let outer = Type::named(None, "Outer");
        outer.set_underlying(Type::structure(vec![Object::field(
            None,
            "Inner",
            Type::pointer(inner),
            true,
        )]));

        let x = lookup_field_or_method(&outer, false, None, "X").unwrap();
        assert_eq!(x.index, vec![0, 0]);
        assert!(x.indirect);

        let found = lookup_field_or_method(&outer, false, None, "M").unwrap();
        assert_eq!(found.obj, m);
        assert_eq!(found.index, vec![0, 0]);
    }

    #[test]
    fn pointer_methods_need_addressable_operands() {
        let t = Type::named(None, "T");
        t.set_underlying(Type::structure(Vec::new()));
        t.as_named()
            .unwrap()
            .add_method(method(Type::pointer(t.clone()), "M"));
        assert!(lookup_field_or_method(&t, false, None, "M").is_none());
        assert!(lookup_field_or_method(&t, true, None, "M").is_some());
        assert!(lookup_field_or_method(&Type::pointer(t), false, None, "M").is_some());
    }

    #[test]
    fn ambiguous_selectors_are_not_found() {
        let field = |name: &str| Object::field(None, name, Type::basic(BasicKind::Int), false);
        let a = Type::named(None, "A");
        a.set_underlying(Type::structure(vec![field("X")]));
        let b = Type::named(None, "B");
        b.set_underlying(Type::structure(vec![field("X")]));
        let c = Type::structure(vec![
            Object::field(None, "A", a, true),
            Object::field(None, "B", b, true),
        ]);
        assert!(lookup_field_or_method(&c, false, None, "X").is_none());
    }
}
