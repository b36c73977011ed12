//! Textual disassembly of functions.

use std::fmt::{self, Formatter, Write as _};

use itertools::Itertools;

use crate::ir::{CallCommon, Function, FunctionBody, Instr, NodeKind, Value, ValueId};
use crate::pretty::{pretty, PrettyCtx, PrettyOptions, PrettyPrintable};
use crate::types::{ChanDir, TypePackage};

struct Printer<'a> {
    body: &'a FunctionBody,
    from: Option<&'a TypePackage>,
}

impl Printer<'_> {
    fn name(&self, v: &Value) -> String {
        self.body.operand_name(v, self.from)
    }

    fn names<'v>(&self, vs: impl IntoIterator<Item = &'v Value>) -> String {
        vs.into_iter().map(|v| self.name(v)).join(", ")
    }

    fn type_of(&self, v: &Value) -> String {
        self.body.type_of(v).relative_string(self.from)
    }

    fn call(&self, call: &CallCommon) -> String {
        let mut out = match &call.invoke {
            Some(invoke) => format!(
                "invoke {}.{}({})",
                self.name(&call.value),
                invoke.method.name(),
                self.names(&call.args)
            ),
            None => format!("{}({})", self.name(&call.value), self.names(&call.args)),
        };
        if call.has_ellipsis {
            out.insert_str(out.len() - 1, "...");
        }
        out
    }

    fn field_name(&self, x: &Value, field: usize, through_pointer: bool) -> String {
        let ty = self.body.type_of(x);
        let st = if through_pointer { ty.deref().clone() } else { ty };
        st.field(field)
            .map(|f| f.name().to_string())
            .unwrap_or_else(|| format!("#{field}"))
    }

    fn instr(&self, id: ValueId, instr: &Instr) -> String {
        let node = self.body.node(id);
        let ty = node
            .ty
            .as_ref()
            .map(|t| t.relative_string(self.from))
            .unwrap_or_default();
        let block = node.block.map(|b| &self.body.blocks[b]);
        let succ = |i: usize| {
            block
                .and_then(|b| b.succs.get(i))
                .map_or_else(|| "?".to_string(), |s| s.to_string())
        };
        let ok = |comma_ok: bool| if comma_ok { ",ok" } else { "" };
        match instr {
            Instr::Alloc { heap, comment } => {
                let elem = node
                    .ty
                    .as_ref()
                    .map(|t| t.deref().relative_string(self.from))
                    .unwrap_or_default();
                let op = if *heap { "new" } else { "local" };
                format!("{op} {elem} ({comment})")
            }
            Instr::Phi { edges, comment } => {
                let preds = block.map(|b| b.preds.as_slice()).unwrap_or(&[]);
                let list = edges
                    .iter()
                    .enumerate()
                    .map(|(i, e)| match preds.get(i) {
                        Some(p) => format!("{p}: {}", self.name(e)),
                        None => format!("?: {}", self.name(e)),
                    })
                    .join(", ");
                if comment.is_empty() {
                    format!("phi [{list}]")
                } else {
                    format!("phi [{list}] #{comment}")
                }
            }
            Instr::BinOp { op, x, y } => format!("{} {op} {}", self.name(x), self.name(y)),
            Instr::UnOp { op, x, comma_ok } => format!("{op}{}{}", self.name(x), ok(*comma_ok)),
            Instr::Convert { x } => format!("convert {ty} <- {} ({})", self.type_of(x), self.name(x)),
            Instr::ChangeType { x } => {
                format!("changetype {ty} <- {} ({})", self.type_of(x), self.name(x))
            }
            Instr::ChangeInterface { x } => {
                format!("change interface {ty} <- {} ({})", self.type_of(x), self.name(x))
            }
            Instr::MakeInterface { x } => {
                format!("make {ty} <- {} ({})", self.type_of(x), self.name(x))
            }
            Instr::TypeAssert {
                x,
                asserted,
                comma_ok,
            } => format!(
                "typeassert{} {}.({})",
                ok(*comma_ok),
                self.name(x),
                asserted.relative_string(self.from)
            ),
            Instr::Call(call) => self.call(call),
            Instr::MakeClosure { func, bindings } => {
                if bindings.is_empty() {
                    format!("make closure {}", self.name(func))
                } else {
                    format!("make closure {} [{}]", self.name(func), self.names(bindings))
                }
            }
            Instr::MakeMap { reserve } => match reserve {
                Some(r) => format!("make {ty} {}", self.name(r)),
                None => format!("make {ty}"),
            },
            Instr::MakeChan { size } => format!("make {ty} {}", self.name(size)),
            Instr::MakeSlice { len, cap } => {
                format!("make {ty} {} {}", self.name(len), self.name(cap))
            }
            Instr::FieldAddr { x, field } => format!(
                "&{}.{} [#{field}]",
                self.name(x),
                self.field_name(x, *field, true)
            ),
            Instr::Field { x, field } => format!(
                "{}.{} [#{field}]",
                self.name(x),
                self.field_name(x, *field, false)
            ),
            Instr::IndexAddr { x, index } => format!("&{}[{}]", self.name(x), self.name(index)),
            Instr::Index { x, index } => format!("{}[{}]", self.name(x), self.name(index)),
            Instr::Lookup { x, index, comma_ok } => {
                format!("{}[{}]{}", self.name(x), self.name(index), ok(*comma_ok))
            }
            Instr::Slice { x, low, high, max } => {
                let opt = |v: &Option<Value>| v.as_ref().map(|v| self.name(v)).unwrap_or_default();
                let mut out = format!("slice {}[{}:{}", self.name(x), opt(low), opt(high));
                if max.is_some() {
                    out.push(':');
                    out.push_str(&opt(max));
                }
                out.push(']');
                out
            }
            Instr::Range { x } => format!("range {}", self.name(x)),
            Instr::Next { iter, .. } => format!("next {}", self.name(iter)),
            Instr::Select { states, blocking } => {
                let list = states
                    .iter()
                    .map(|s| match (s.dir, &s.send) {
                        (ChanDir::Send, Some(v)) => {
                            format!("{}<-{}", self.name(&s.chan), self.name(v))
                        }
                        _ => format!("<-{}", self.name(&s.chan)),
                    })
                    .join(", ");
                let mode = if *blocking { "blocking" } else { "nonblocking" };
                format!("select {mode} [{list}]")
            }
            Instr::Extract { tuple, index } => format!("extract {} #{index}", self.name(tuple)),
            Instr::Jump => format!("jump {}", succ(0)),
            Instr::If { cond } => format!("if {} goto {} else {}", self.name(cond), succ(0), succ(1)),
            Instr::Return { results } if results.is_empty() => "return".to_string(),
            Instr::Return { results } => format!("return {}", self.names(results)),
            Instr::Panic { x } => format!("panic {}", self.name(x)),
            Instr::Store { addr, val } => format!("*{} = {}", self.name(addr), self.name(val)),
            Instr::MapUpdate { map, key, value } => format!(
                "{}[{}] = {}",
                self.name(map),
                self.name(key),
                self.name(value)
            ),
            Instr::Send { chan, x } => format!("send {} <- {}", self.name(chan), self.name(x)),
            Instr::Go(call) => format!("go {}", self.call(call)),
            Instr::Defer(call) => format!("defer {}", self.call(call)),
            Instr::RunDefers => "rundefers".to_string(),
        }
    }
}

impl Function {
    fn write_signature_line(&self, f: &mut Formatter<'_>, body: Option<&FunctionBody>) -> fmt::Result {
        let from = self.rel_pkg();
        f.write_str("func ")?;
        if let Some(recv) = &self.sig.recv {
            let name = match body.and_then(|b| b.params.first().map(|p| b.node(*p))) {
                Some(node) => node.name.clone(),
                None => recv.name().to_string(),
            };
            let ty = recv.ty().relative_string(from);
            if name.is_empty() {
                write!(f, "({ty}) ")?;
            } else {
                write!(f, "({name} {ty}) ")?;
            }
        }
        f.write_str(&self.name)?;
        let sig = self.sig.without_recv().relative_string(from);
        f.write_str(sig.strip_prefix("func").unwrap_or(&sig))
    }

    /// Appends the disassembly of the function to `out`.
    pub fn write_to(&self, out: &mut String) {
        let _ = write!(out, "{}", pretty(self, PrettyOptions::default()));
    }

    pub fn disassembly(&self) -> String {
        let mut out = String::new();
        self.write_to(&mut out);
        out
    }
}

impl PrettyPrintable for Function {
    fn fmt_pretty(&self, f: &mut Formatter<'_>, ctx: &mut PrettyCtx<'_>) -> fmt::Result {
        let from = self.rel_pkg();
        writeln!(f, "# Name: {}", self.relative_name(None))?;
        if let Some(pkg) = &self.pkg {
            writeln!(f, "# Package: {}", pkg.path)?;
        }
        match &self.synthetic {
            Some(description) => writeln!(f, "# Synthetic: {description}")?,
            None => writeln!(f, "# Location: {}", self.span)?,
        }
        if let Some(parent) = self.parent() {
            writeln!(f, "# Parent: {}", parent.relative_name(None))?;
        }

        let Some(body) = self.body() else {
            self.write_signature_line(f, None)?;
            return writeln!(f, ":\n\t(external)");
        };

        if let Some(recover) = body.recover {
            writeln!(f, "# Recover: {recover}")?;
        }
        if !body.free_vars.is_empty() {
            writeln!(f, "# Free variables:")?;
            for (i, id) in body.free_vars.iter().enumerate() {
                let node = body.node(*id);
                let ty = node.ty.as_ref().map(|t| t.relative_string(from));
                writeln!(f, "# {i:>3}:\t{} {}", node.name, ty.unwrap_or_default())?;
            }
        }
        if !body.locals.is_empty() {
            writeln!(f, "# Locals:")?;
            for (i, id) in body.locals.iter().enumerate() {
                let node = body.node(*id);
                let ty = node.ty.as_ref().map(|t| t.deref().relative_string(from));
                writeln!(f, "# {i:>3}:\t{} {}", node.name, ty.unwrap_or_default())?;
            }
        }
        self.write_signature_line(f, Some(body))?;
        writeln!(f, ":")?;

        let printer = Printer { body, from };
        for block in &body.blocks {
            let head = format!(".{}.{}:", block.index, block.comment);
            let edges = format!("P:{} S:{}", block.preds.len(), block.succs.len());
            ctx.write_aligned(f, &head, &edges)?;
            writeln!(f)?;
            for &id in &block.instrs {
                let node = body.node(id);
                let NodeKind::Instr(instr) = &node.kind else {
                    continue;
                };
                let mut line = String::from("\t");
                if node.is_value() && !node.name.is_empty() {
                    let _ = write!(line, "{} = ", node.name);
                }
                line.push_str(&printer.instr(id, instr));
                if ctx.options.show_spans && !node.span.is_none() {
                    let _ = write!(line, " @{}", node.span);
                }
                match &node.ty {
                    Some(ty) => {
                        ctx.write_aligned(f, &line, &ty.relative_string(from))?;
                        writeln!(f)?;
                    }
                    None => writeln!(f, "{line}")?,
                }
            }
        }
        Ok(())
    }
}
