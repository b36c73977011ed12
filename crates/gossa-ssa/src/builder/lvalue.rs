use gossa_core::error::Result;
use gossa_core::ir::{Instr, Value};
use gossa_core::span::Span;
use gossa_core::types::Type;

use crate::build_bail;
use crate::builder::Builder;

/// An assignable location.
#[derive(Debug, Clone)]
pub(crate) enum Lvalue {
    /// A memory cell.
    Address { addr: Value, span: Span },
    /// A map entry `map[key]`; `elem` is the map's element type.
    Element {
        map: Value,
        key: Value,
        elem: Type,
        span: Span,
    },
    /// `_`: stores are discarded.
    Blank,
}

impl Lvalue {
    pub fn address(addr: Value, span: Span) -> Self {
        Lvalue::Address { addr, span }
    }

    pub fn load(&self, b: &mut Builder<'_>) -> Result<Value> {
        match self {
            Lvalue::Address { addr, span } => Ok(b.fs.emit_load(addr.clone(), *span)),
            Lvalue::Element { map, key, elem, span } => Ok(b.fs.emit(
                Instr::Lookup {
                    x: map.clone(),
                    index: key.clone(),
                    comma_ok: false,
                },
                Some(elem.clone()),
                *span,
            )),
            Lvalue::Blank => build_bail!(b.fs.name(), Span::NONE, "cannot load from _"),
        }
    }

    pub fn store(&self, b: &mut Builder<'_>, val: Value) -> Result<()> {
        match self {
            Lvalue::Address { addr, span } => b.fs.emit_store(b.prog, addr.clone(), val, *span),
            Lvalue::Element { map, key, elem, span } => {
                let value = b.fs.emit_conv(b.prog, val, elem, *span)?;
                b.fs.emit(
                    Instr::MapUpdate {
                        map: map.clone(),
                        key: key.clone(),
                        value,
                    },
                    None,
                    *span,
                );
                Ok(())
            }
            Lvalue::Blank => Ok(()),
        }
    }

    /// The address of the location; map entries and `_` have none.
    pub fn addr(&self, b: &Builder<'_>) -> Result<Value> {
        match self {
            Lvalue::Address { addr, .. } => Ok(addr.clone()),
            Lvalue::Element { span, .. } => build_bail!(b.fs.name(), *span, "cannot take the address of a map entry"),
            Lvalue::Blank => build_bail!(b.fs.name(), Span::NONE, "cannot take the address of _"),
        }
    }

    /// The type of the value held by the location.
    pub fn ty(&self, b: &Builder<'_>) -> Type {
        match self {
            Lvalue::Address { addr, .. } => b.fs.type_of(addr).deref().clone(),
            Lvalue::Element { elem, .. } => elem.clone(),
            Lvalue::Blank => Type::invalid(),
        }
    }
}

/// Stores of a parallel assignment, held back until every right-hand side
/// has been evaluated.
#[derive(Debug, Default)]
pub(crate) struct StoreBuf {
    stores: Vec<(Lvalue, Value)>,
}

impl StoreBuf {
    pub fn store(&mut self, lvalue: Lvalue, value: Value) {
        self.stores.push((lvalue, value));
    }

    pub fn emit(self, b: &mut Builder<'_>) -> Result<()> {
        for (lvalue, value) in self.stores {
            lvalue.store(b, value)?;
        }
        Ok(())
    }
}
