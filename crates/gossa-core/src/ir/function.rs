use std::collections::HashMap;
use std::sync::{Arc, OnceLock, Weak};

use crate::error::Result;
use crate::ir::{Instr, Value, ValueId};
use crate::span::Span;
use crate::types::{Object, Signature, Type, TypePackage};

#[derive(Debug, Clone)]
pub enum NodeKind {
    Parameter(Option<Object>),
    /// A captured variable: the address of a heap cell, or the receiver of a
    /// bound method closure.
    FreeVar,
    Instr(Instr),
}

/// An entry of a function's value arena.
#[derive(Debug, Clone)]
pub struct Node {
    pub kind: NodeKind,
    /// `None` for instructions that produce no value.
    pub ty: Option<Type>,
    /// Display name: the source name of parameters and free variables, the
    /// register name (`t3`) of instructions.
    pub name: String,
    /// The block holding the instruction; `None` for parameters, free
    /// variables and instructions that have been removed.
    pub block: Option<usize>,
    pub span: Span,
}

impl Node {
    pub fn instr(&self) -> Option<&Instr> {
        match &self.kind {
            NodeKind::Instr(instr) => Some(instr),
            _ => None,
        }
    }

    pub fn instr_mut(&mut self) -> Option<&mut Instr> {
        match &mut self.kind {
            NodeKind::Instr(instr) => Some(instr),
            _ => None,
        }
    }

    pub fn is_value(&self) -> bool {
        self.ty.is_some()
    }
}

#[derive(Debug, Clone, Default)]
pub struct BasicBlock {
    pub index: usize,
    pub comment: String,
    pub instrs: Vec<ValueId>,
    pub preds: Vec<usize>,
    pub succs: Vec<usize>,
}

impl BasicBlock {
    pub fn new(index: usize, comment: impl Into<String>) -> Self {
        Self {
            index,
            comment: comment.into(),
            ..Default::default()
        }
    }
}

/// The instructions of a built function.
#[derive(Debug, Clone, Default)]
pub struct FunctionBody {
    pub params: Vec<ValueId>,
    pub free_vars: Vec<ValueId>,
    /// Frame-allocated `Alloc`s.
    pub locals: Vec<ValueId>,
    pub blocks: Vec<BasicBlock>,
    pub nodes: Vec<Node>,
    pub anon_funcs: Vec<Arc<Function>>,
    /// The block control resumes at after a recovered panic.
    pub recover: Option<usize>,
    /// Result cells of functions with deferred calls.
    pub result_slots: Vec<ValueId>,
    referrers: Vec<Vec<ValueId>>,
}

impl FunctionBody {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, node: Node) -> ValueId {
        let id = ValueId(self.nodes.len() as u32);
        self.nodes.push(node);
        id
    }

    pub fn add_param(&mut self, name: &str, ty: Type, obj: Option<Object>, span: Span) -> ValueId {
        let id = self.add_node(Node {
            kind: NodeKind::Parameter(obj),
            ty: Some(ty),
            name: name.to_string(),
            block: None,
            span,
        });
        self.params.push(id);
        id
    }

    pub fn add_free_var(&mut self, name: &str, ty: Type, span: Span) -> ValueId {
        let id = self.add_node(Node {
            kind: NodeKind::FreeVar,
            ty: Some(ty),
            name: name.to_string(),
            block: None,
            span,
        });
        self.free_vars.push(id);
        id
    }

    pub fn new_block(&mut self, comment: impl Into<String>) -> usize {
        let index = self.blocks.len();
        self.blocks.push(BasicBlock::new(index, comment));
        index
    }

    /// Appends `instr` to `block`, returning its id.
    pub fn append(&mut self, block: usize, instr: Instr, ty: Option<Type>, span: Span) -> ValueId {
        let id = self.add_node(Node {
            kind: NodeKind::Instr(instr),
            ty,
            name: String::new(),
            block: Some(block),
            span,
        });
        self.blocks[block].instrs.push(id);
        id
    }

    pub fn add_edge(&mut self, from: usize, to: usize) {
        self.blocks[from].succs.push(to);
        self.blocks[to].preds.push(from);
    }

    pub fn node(&self, id: ValueId) -> &Node {
        &self.nodes[id.index()]
    }

    pub fn node_mut(&mut self, id: ValueId) -> &mut Node {
        &mut self.nodes[id.index()]
    }

    pub fn instr(&self, id: ValueId) -> Option<&Instr> {
        self.nodes.get(id.index()).and_then(Node::instr)
    }

    pub fn instr_mut(&mut self, id: ValueId) -> Option<&mut Instr> {
        self.nodes.get_mut(id.index()).and_then(Node::instr_mut)
    }

    pub fn type_of(&self, value: &Value) -> Type {
        match value {
            Value::Local(id) => self
                .nodes
                .get(id.index())
                .and_then(|n| n.ty.clone())
                .unwrap_or_else(Type::invalid),
            other => other.static_type().unwrap_or_else(Type::invalid),
        }
    }

    /// The last instruction of `block`, if it is a terminator.
    pub fn terminator(&self, block: usize) -> Option<&Instr> {
        self.blocks[block]
            .instrs
            .last()
            .and_then(|id| self.instr(*id))
            .filter(|instr| instr.is_terminator())
    }

    /// Ids of every instruction still placed in a block, in block order.
    pub fn live_instrs(&self) -> impl Iterator<Item = ValueId> + '_ {
        self.blocks.iter().flat_map(|b| b.instrs.iter().copied())
    }

    /// Instructions using `id` as an operand, as of the last
    /// `rebuild_referrers`.
    pub fn referrers(&self, id: ValueId) -> &[ValueId] {
        self.referrers
            .get(id.index())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Recomputes every referrer list from the operands of the live
    /// instructions. An instruction using a value twice is listed twice.
    pub fn rebuild_referrers(&mut self) {
        let mut referrers = vec![Vec::new(); self.nodes.len()];
        for block in &self.blocks {
            for &user in &block.instrs {
                let Some(instr) = self.nodes[user.index()].instr() else {
                    continue;
                };
                for operand in instr.operands() {
                    if let Value::Local(used) = operand {
                        if let Some(list) = referrers.get_mut(used.index()) {
                            list.push(user);
                        }
                    }
                }
            }
        }
        self.referrers = referrers;
    }

    /// Rewrites every operand of every live instruction through
    /// `replacements`, following chains.
    pub fn replace_operands(&mut self, replacements: &HashMap<ValueId, Value>) {
        if replacements.is_empty() {
            return;
        }
        let resolve = |mut v: Value| {
            while let Value::Local(id) = &v {
                match replacements.get(id) {
                    Some(next) => v = next.clone(),
                    None => break,
                }
            }
            v
        };
        let live: Vec<ValueId> = self.live_instrs().collect();
        for id in live {
            if let Some(instr) = self.instr_mut(id) {
                for operand in instr.operands_mut() {
                    if matches!(operand, Value::Local(_)) {
                        *operand = resolve(operand.clone());
                    }
                }
            }
        }
    }

    /// Keeps only the blocks for which `keep` holds, renumbering the rest and
    /// dropping CFG edges to removed blocks. φ-edges of removed predecessors
    /// are dropped as well.
    pub fn retain_blocks(&mut self, keep: impl Fn(usize) -> bool) {
        let mut remap = vec![None; self.blocks.len()];
        let mut next = 0;
        for (i, slot) in remap.iter_mut().enumerate() {
            if keep(i) {
                *slot = Some(next);
                next += 1;
            }
        }
        if next == self.blocks.len() {
            return;
        }

        let old_blocks = std::mem::take(&mut self.blocks);
        for (old_index, mut block) in old_blocks.into_iter().enumerate() {
            let Some(new_index) = remap[old_index] else {
                for id in &block.instrs {
                    self.nodes[id.index()].block = None;
                }
                continue;
            };
            let kept_preds: Vec<bool> = block.preds.iter().map(|p| remap[*p].is_some()).collect();
            if kept_preds.iter().any(|k| !k) {
                for id in &block.instrs {
                    if let Some(Instr::Phi { edges, .. }) = self.nodes[id.index()].instr_mut() {
                        let mut i = 0;
                        edges.retain(|_| {
                            let k = kept_preds.get(i).copied().unwrap_or(true);
                            i += 1;
                            k
                        });
                    }
                }
            }
            block.index = new_index;
            block.preds = block.preds.iter().filter_map(|p| remap[*p]).collect();
            block.succs = block.succs.iter().filter_map(|s| remap[*s]).collect();
            for id in &block.instrs {
                self.nodes[id.index()].block = Some(new_index);
            }
            self.blocks.push(block);
        }
        self.recover = self.recover.and_then(|r| remap[r]);
    }

    /// Assigns register names `t0`, `t1`, ... to value-producing
    /// instructions in block order.
    pub fn assign_names(&mut self) {
        let mut n = 0;
        let order: Vec<ValueId> = self.live_instrs().collect();
        for id in order {
            let node = &mut self.nodes[id.index()];
            if node.is_value() {
                node.name = format!("t{n}");
                n += 1;
            } else {
                node.name.clear();
            }
        }
    }

    /// The name an operand is printed with inside a function of package
    /// `from`.
    pub fn operand_name(&self, value: &Value, from: Option<&TypePackage>) -> String {
        match value {
            Value::Local(id) => match self.nodes.get(id.index()) {
                Some(node) if !node.name.is_empty() => node.name.clone(),
                _ => format!("%{}", id.0),
            },
            other => other.static_name(from).unwrap_or_default(),
        }
    }
}

/// A function: source-declared, anonymous, or synthesised.
///
/// Metadata is fixed at creation; the body is published once when built.
pub struct Function {
    pub name: String,
    pub object: Option<Object>,
    pub sig: Signature,
    pub pkg: Option<Arc<TypePackage>>,
    /// The type printed before the name of methods, thunks and bound
    /// closures: `(T).m`.
    pub qualifier: Option<Type>,
    /// Set for synthesised functions: a short description of what the
    /// function was made for.
    pub synthetic: Option<String>,
    pub span: Span,
    parent: Option<Weak<Function>>,
    anon_index: usize,
    body: OnceLock<Option<FunctionBody>>,
}

impl Function {
    pub fn new(name: impl Into<String>, sig: Signature) -> Self {
        Self {
            name: name.into(),
            object: None,
            sig,
            pkg: None,
            qualifier: None,
            synthetic: None,
            span: Span::NONE,
            parent: None,
            anon_index: 0,
            body: OnceLock::new(),
        }
    }

    /// A function for a declared function or method object.
    pub fn from_object(obj: &Object, pkg: Option<Arc<TypePackage>>) -> Self {
        let sig = obj
            .signature()
            .cloned()
            .unwrap_or_else(|| Signature::new(Vec::new(), Vec::new(), false));
        let qualifier = sig.recv.as_ref().map(|recv| recv.ty().clone());
        Self {
            object: Some(obj.clone()),
            pkg,
            qualifier,
            span: obj.span(),
            ..Self::new(obj.name(), sig)
        }
    }

    pub fn with_pkg(mut self, pkg: Option<Arc<TypePackage>>) -> Self {
        self.pkg = pkg;
        self
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn with_qualifier(mut self, qualifier: Type) -> Self {
        self.qualifier = Some(qualifier);
        self
    }

    pub fn synthetic(mut self, description: impl Into<String>) -> Self {
        self.synthetic = Some(description.into());
        self
    }

    /// Makes this the `index`th anonymous function of `parent`.
    pub fn nested_in(mut self, parent: &Arc<Function>, index: usize) -> Self {
        self.name = format!("{}${}", parent.name, index + 1);
        self.pkg = parent.pkg.clone();
        self.parent = Some(Arc::downgrade(parent));
        self.anon_index = index;
        self
    }

    pub fn parent(&self) -> Option<Arc<Function>> {
        self.parent.as_ref().and_then(Weak::upgrade)
    }

    /// The function's type; methods keep their receiver.
    pub fn ty(&self) -> Type {
        Type::signature(self.sig.clone())
    }

    /// The body, once built. `None` while under construction and for
    /// functions whose build failed.
    pub fn body(&self) -> Option<&FunctionBody> {
        self.body.get().and_then(Option::as_ref)
    }

    pub fn is_built(&self) -> bool {
        self.body.get().is_some()
    }

    /// Publishes the body. Later calls have no effect.
    pub fn publish(&self, body: Option<FunctionBody>) {
        let _ = self.body.set(body);
    }

    /// Builds and publishes the body unless already published. Concurrent
    /// callers wait for the first build to finish. A failed build publishes
    /// no body and returns its error to the caller that ran it.
    pub fn get_or_build(
        &self,
        build: impl FnOnce() -> Result<FunctionBody>,
    ) -> Result<Option<&FunctionBody>> {
        let mut failure = None;
        let body = self.body.get_or_init(|| match build() {
            Ok(body) => Some(body),
            Err(err) => {
                failure = Some(err);
                None
            }
        });
        match failure {
            Some(err) => Err(err),
            None => Ok(body.as_ref()),
        }
    }

    pub fn anon_funcs(&self) -> &[Arc<Function>] {
        self.body().map_or(&[], |b| b.anon_funcs.as_slice())
    }

    /// The package paths are printed relative to: the function's own package
    /// or, for synthetics, none.
    pub fn rel_pkg(&self) -> Option<&TypePackage> {
        self.pkg.as_deref()
    }

    /// The function's name as seen from package `from`.
    pub fn relative_name(&self, from: Option<&TypePackage>) -> String {
        if let Some(parent) = self.parent() {
            return format!("{}${}", parent.relative_name(from), self.anon_index + 1);
        }
        if let Some(qualifier) = &self.qualifier {
            return format!("({}).{}", qualifier.relative_string(from), self.name);
        }
        match &self.pkg {
            Some(pkg) if from.map(|f| f.path.as_str()) != Some(pkg.path.as_str()) => {
                format!("{}.{}", pkg.path, self.name)
            }
            _ => self.name.clone(),
        }
    }
}

impl std::fmt::Debug for Function {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Function({})", self.relative_name(None))
    }
}

impl std::fmt::Display for Function {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.relative_name(None))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BasicKind;

    fn empty_sig() -> Signature {
        Signature::new(Vec::new(), Vec::new(), false)
    }

    #[test]
    fn retain_blocks_renumbers_and_trims_phi_edges() {
        let int = Type::basic(BasicKind::Int);
        let mut body = FunctionBody::new();
        let entry = body.new_block("entry");
        let dead = body.new_block("dead");
        let join = body.new_block("join");
        body.add_edge(entry, join);
        body.add_edge(dead, join);
        let phi = body.append(
            join,
            Instr::Phi {
                edges: vec![
                    Value::Const(crate::ir::Const::int(int.clone(), 1)),
                    Value::Const(crate::ir::Const::int(int.clone(), 2)),
                ],
                comment: String::new(),
            },
            Some(int),
            Span::NONE,
        );

        body.retain_blocks(|b| b != dead);

        assert_eq!(body.blocks.len(), 2);
        assert_eq!(body.blocks[1].index, 1);
        assert_eq!(body.blocks[1].preds, vec![0]);
        assert_eq!(body.node(phi).block, Some(1));
        match body.instr(phi) {
            Some(Instr::Phi { edges, .. }) => assert_eq!(edges.len(), 1),
            other => panic!("expected phi, found {other:?}"),
        }
    }

    #[test]
    fn anonymous_functions_are_named_after_their_parent() {
        let pkg = TypePackage::new("example.com/p", "p");
        let parent = Arc::new(Function::new("f", empty_sig()).with_pkg(Some(pkg.clone())));
        let child = Function::new("", empty_sig()).nested_in(&parent, 1);
        assert_eq!(child.name, "f$2");
        assert_eq!(child.relative_name(Some(&pkg)), "f$2");
        assert_eq!(child.relative_name(None), "example.com/p.f$2");
    }

    #[test]
    fn get_or_build_publishes_once() {
        let f = Function::new("f", empty_sig());
        let first = f.get_or_build(|| Ok(FunctionBody::new())).unwrap();
        assert!(first.is_some());
        let second = f
            .get_or_build(|| Err(crate::error::Error::Generic("rebuilt".into())))
            .unwrap();
        assert!(second.is_some());
    }
}
