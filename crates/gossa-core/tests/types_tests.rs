use std::sync::Arc;

use gossa_core::types::{
    assignable_to, implements, lookup_field_or_method, BasicKind, Object, Signature, Type, TypePackage,
};
use pretty_assertions::assert_eq;

fn pkg() -> Arc<TypePackage> {
    TypePackage::new("shapes", "shapes")
}

fn unit_sig() -> Signature {
    Signature::new(Vec::new(), Vec::new(), false)
}

fn method(pkg: &Arc<TypePackage>, recv: &Type, name: &str) -> Object {
    let recv_var = Object::var(Some(pkg.clone()), "r", recv.clone());
    let m = Object::func(Some(pkg.clone()), name, Type::signature(unit_sig().with_recv(recv_var)));
    if let Some(named) = recv.deref().as_named() {
        named.add_method(m.clone());
    }
    m
}

/// type Inner struct{ X int }; func (*Inner) Area()
/// type Outer struct{ *Inner }
fn embedding(pkg: &Arc<TypePackage>) -> (Type, Type) {
    let inner = Type::named(Some(pkg.clone()), "Inner");
    inner.set_underlying(Type::structure(vec![Object::field(
        Some(pkg.clone()),
        "X",
        Type::basic(BasicKind::Int),
        false,
    )]));
    method(pkg, &Type::pointer(inner.clone()), "Area");

    let outer = Type::named(Some(pkg.clone()), "Outer");
    outer.set_underlying(Type::structure(vec![Object::field(
        Some(pkg.clone()),
        "Inner",
        Type::pointer(inner.clone()),
        true,
    )]));
    (inner, outer)
}

#[test]
fn lookup_follows_embedded_pointers() {
    let pkg = pkg();
    let (_, outer) = embedding(&pkg);

    let field = lookup_field_or_method(&outer, false, Some(&pkg), "X").expect("X is promoted");
    assert_eq!(field.index, vec![0, 0]);
    assert!(field.indirect);
    assert!(field.obj.is_field());

    let area = lookup_field_or_method(&outer, false, Some(&pkg), "Area").expect("Area is promoted");
    assert_eq!(area.index, vec![0, 0]);
    assert!(area.indirect);
    assert!(area.obj.is_method());

    assert!(lookup_field_or_method(&outer, false, Some(&pkg), "Missing").is_none());
}

#[test]
fn lookup_rejects_ambiguous_selectors() {
    let pkg = pkg();
    let int = Type::basic(BasicKind::Int);
    let named = |name: &str| {
        let t = Type::named(Some(pkg.clone()), name);
        t.set_underlying(Type::structure(vec![Object::field(Some(pkg.clone()), "N", int.clone(), false)]));
        t
    };
    let (left, right) = (named("Left"), named("Right"));
    let both = Type::structure(vec![
        Object::field(Some(pkg.clone()), "Left", left, true),
        Object::field(Some(pkg.clone()), "Right", right, true),
    ]);
    assert!(lookup_field_or_method(&both, true, Some(&pkg), "N").is_none());
}

#[test]
fn pointer_methods_implement_only_through_pointers() {
    let pkg = pkg();
    let (inner, outer) = embedding(&pkg);
    let iface_method = Object::func(Some(pkg.clone()), "Area", Type::signature(unit_sig()));
    let shape = Type::interface(vec![iface_method], Vec::new());

    assert!(implements(&Type::pointer(inner.clone()), &shape));
    assert!(!implements(&inner, &shape));
    // Outer embeds *Inner, so even the value type has Area.
    assert!(implements(&outer, &shape));
    assert!(assignable_to(&outer, &shape));
}

#[test]
fn untyped_nil_assigns_to_nillable_types_only() {
    let nil = Type::basic(BasicKind::UntypedNil);
    let int = Type::basic(BasicKind::Int);
    assert!(assignable_to(&nil, &Type::pointer(int.clone())));
    assert!(assignable_to(&nil, &Type::interface(Vec::new(), Vec::new())));
    assert!(!assignable_to(&nil, &int));
}
