use crate::types::{lookup_field_or_method, BasicKind, ChanDir, Object, Type, TypeKind};

/// The type an untyped constant takes when no other type is implied.
pub fn default_type(t: &Type) -> Type {
    let kind = match t.kind() {
        TypeKind::Basic(kind) => *kind,
        _ => return t.clone(),
    };
    let typed = match kind {
        BasicKind::UntypedBool => BasicKind::Bool,
        BasicKind::UntypedInt => BasicKind::Int,
        BasicKind::UntypedRune => BasicKind::Int32,
        BasicKind::UntypedFloat => BasicKind::Float64,
        BasicKind::UntypedComplex => BasicKind::Complex128,
        BasicKind::UntypedString => BasicKind::String,
        _ => return t.clone(),
    };
    Type::basic(typed)
}

/// The first method of interface `iface` that `v` lacks (or has with a
/// different signature), if any.
pub fn missing_method(v: &Type, iface: &Type) -> Option<Object> {
    let target = iface.as_interface()?;
    for m in target.all_methods() {
        let found = match v.as_interface() {
            Some(have) => have
                .method_index(&m.id())
                .map(|i| have.all_methods()[i].clone()),
            None => lookup_field_or_method(v, false, m.pkg().map(|p| p.as_ref()), m.name())
                .map(|r| r.obj)
                .filter(Object::is_func),
        };
        match found {
            Some(have) if have.ty() == m.ty() => {}
            _ => return Some(m.clone()),
        }
    }
    None
}

/// Whether `v` implements interface `iface`.
pub fn implements(v: &Type, iface: &Type) -> bool {
    iface.is_interface() && missing_method(v, iface).is_none()
}

/// Whether a value of type `v` may be assigned to a location of type `t`.
pub fn assignable_to(v: &Type, t: &Type) -> bool {
    if v == t {
        return true;
    }
    if let Some(kind) = v.basic_kind().filter(|k| k.is_untyped()) {
        if t.is_interface() {
            return kind == BasicKind::UntypedNil || implements(&default_type(v), t);
        }
        return match kind {
            BasicKind::UntypedNil => t.is_nillable(),
            BasicKind::UntypedBool => t.is_boolean(),
            BasicKind::UntypedString => t.is_string(),
            _ => t.is_numeric(),
        };
    }
    let (vu, tu) = (v.underlying(), t.underlying());
    if vu == tu && (!v.is_named() || !t.is_named()) {
        return true;
    }
    if t.is_interface() && implements(v, t) {
        return true;
    }
    if let (TypeKind::Chan(ChanDir::Both, ve), TypeKind::Chan(_, te)) = (vu.kind(), tu.kind()) {
        return ve == te && (!v.is_named() || !t.is_named());
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Signature;

    #[test]
    fn untyped_constants_default() {
        assert_eq!(
            default_type(&Type::basic(BasicKind::UntypedRune)),
            Type::basic(BasicKind::Int32)
        );
        let int = Type::basic(BasicKind::Int);
        assert_eq!(default_type(&int), int);
    }

    #[test]
    fn named_type_implements_error() {
        let t = Type::named(None, "E");
        t.set_underlying(Type::structure(Vec::new()));
        assert!(!implements(&t, &Type::error()));
        let sig = Signature::new(
            Vec::new(),
            vec![Object::var(None, "", Type::basic(BasicKind::String))],
            false,
        )
        .with_recv(Object::var(None, "e", t.clone()));
        t.as_named()
            .unwrap()
            .add_method(Object::func(None, "Error", Type::signature(sig)));
        assert!(implements(&t, &Type::error()));
        assert!(assignable_to(&t, &Type::error()));
        assert!(assignable_to(&Type::basic(BasicKind::UntypedNil), &Type::error()));
    }

    #[test]
    fn bidirectional_channels_assign_to_directional() {
        let int = Type::basic(BasicKind::Int);
        let both = Type::chan(ChanDir::Both, int.clone());
        let recv = Type::chan(ChanDir::Recv, int);
        assert!(assignable_to(&both, &recv));
        assert!(!assignable_to(&recv, &both));
    }
}
