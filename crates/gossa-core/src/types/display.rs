use std::fmt::{self, Write};

use crate::types::{ChanDir, Object, Signature, Type, TypeKind, TypePackage};

impl Type {
    /// Renders the type with named types qualified by package path, except
    /// those declared in `from`.
    pub fn relative_string(&self, from: Option<&TypePackage>) -> String {
        let mut out = String::new();
        let _ = write_type(&mut out, self, from);
        out
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_type(f, self, None)
    }
}

pub(crate) fn write_type(out: &mut impl Write, ty: &Type, from: Option<&TypePackage>) -> fmt::Result {
    match ty.kind() {
        TypeKind::Basic(kind) => out.write_str(kind.name()),
        TypeKind::Pointer(elem) => {
            out.write_char('*')?;
            write_type(out, elem, from)
        }
        TypeKind::Slice(elem) => {
            out.write_str("[]")?;
            write_type(out, elem, from)
        }
        TypeKind::Array(elem, len) => {
            write!(out, "[{len}]")?;
            write_type(out, elem, from)
        }
        TypeKind::Map(key, elem) => {
            out.write_str("map[")?;
            write_type(out, key, from)?;
            out.write_char(']')?;
            write_type(out, elem, from)
        }
        TypeKind::Chan(dir, elem) => {
            let prefix = match dir {
                ChanDir::Both => "chan ",
                ChanDir::Send => "chan<- ",
                ChanDir::Recv => "<-chan ",
            };
            out.write_str(prefix)?;
            // `chan (<-chan T)` needs parens to stay unambiguous.
            let parens = *dir == ChanDir::Both
                && matches!(elem.kind(), TypeKind::Chan(ChanDir::Recv, _));
            if parens {
                out.write_char('(')?;
            }
            write_type(out, elem, from)?;
            if parens {
                out.write_char(')')?;
            }
            Ok(())
        }
        TypeKind::Struct(st) => {
            out.write_str("struct{")?;
            for (i, field) in st.fields.iter().enumerate() {
                if i > 0 {
                    out.write_str("; ")?;
                }
                if !field.is_embedded() {
                    write!(out, "{} ", field.name())?;
                }
                write_type(out, field.ty(), from)?;
            }
            out.write_char('}')
        }
        TypeKind::Tuple(vars) => write_tuple(out, vars, false, from),
        TypeKind::Signature(sig) => {
            out.write_str("func")?;
            write_signature(out, sig, from)
        }
        TypeKind::Interface(iface) => {
            out.write_str("interface{")?;
            for (i, method) in iface.all_methods().iter().enumerate() {
                if i > 0 {
                    out.write_str("; ")?;
                }
                out.write_str(method.name())?;
                if let Some(sig) = method.signature() {
                    write_signature(out, sig, from)?;
                }
            }
            out.write_char('}')
        }
        TypeKind::Named(named) => {
            if let Some(pkg) = &named.pkg {
                if from.map(|f| f.path.as_str()) != Some(pkg.path.as_str()) {
                    write!(out, "{}.", pkg.path)?;
                }
            }
            out.write_str(&named.name)
        }
    }
}

fn write_tuple(
    out: &mut impl Write,
    vars: &[Object],
    variadic: bool,
    from: Option<&TypePackage>,
) -> fmt::Result {
    out.write_char('(')?;
    for (i, var) in vars.iter().enumerate() {
        if i > 0 {
            out.write_str(", ")?;
        }
        if !var.name().is_empty() {
            write!(out, "{} ", var.name())?;
        }
        if variadic && i + 1 == vars.len() {
            out.write_str("...")?;
            match var.ty().kind() {
                TypeKind::Slice(elem) => write_type(out, elem, from)?,
                _ => write_type(out, var.ty(), from)?,
            }
        } else {
            write_type(out, var.ty(), from)?;
        }
    }
    out.write_char(')')
}

/// Writes `(params) results` without the leading `func`.
pub(crate) fn write_signature(
    out: &mut impl Write,
    sig: &Signature,
    from: Option<&TypePackage>,
) -> fmt::Result {
    write_tuple(out, &sig.params, sig.variadic, from)?;
    match sig.results.as_slice() {
        [] => Ok(()),
        [single] if single.name().is_empty() => {
            out.write_char(' ')?;
            write_type(out, single.ty(), from)
        }
        results => {
            out.write_char(' ')?;
            write_tuple(out, results, false, from)
        }
    }
}

impl Signature {
    pub fn relative_string(&self, from: Option<&TypePackage>) -> String {
        let mut out = String::from("func");
        let _ = write_signature(&mut out, self, from);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BasicKind;

    #[test]
    fn renders_composite_types() {
        let int = Type::basic(BasicKind::Int);
        let s = Type::basic(BasicKind::String);
        assert_eq!(Type::map(s.clone(), Type::slice(int.clone())).to_string(), "map[string][]int");
        assert_eq!(
            Type::chan(ChanDir::Both, Type::chan(ChanDir::Recv, int.clone())).to_string(),
            "chan (<-chan int)"
        );
        let sig = Signature::new(
            vec![
                Object::var(None, "x", int.clone()),
                Object::var(None, "rest", Type::slice(s.clone())),
            ],
            vec![Object::var(None, "", int), Object::var(None, "", Type::error())],
            true,
        );
        assert_eq!(
            Type::signature(sig).to_string(),
            "func(x int, rest ...string) (int, error)"
        );
    }

    #[test]
    fn named_types_are_qualified_outside_their_package() {
        let p = TypePackage::new("example.com/p", "p");
        let t = Type::named(Some(p.clone()), "T");
        t.set_underlying(Type::basic(BasicKind::Int));
        let ptr = Type::pointer(t);
        assert_eq!(ptr.to_string(), "*example.com/p.T");
        assert_eq!(ptr.relative_string(Some(&p)), "*T");
    }
}
