//! The typed syntax tree handed to the SSA builder.
//!
//! Nodes carry no type information of their own; every fact about types
//! and resolved names lives in [`crate::info::TypeInfo`], keyed by the node's
//! [`NodeId`].

use crate::constant::ConstValue;
use crate::span::Span;
use crate::token::{AssignOp, BinaryOp, BranchKind, UnaryOp};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u32);

#[derive(Debug, Clone)]
pub struct Ident {
    pub id: NodeId,
    pub span: Span,
    pub name: String,
}

impl Ident {
    pub fn is_blank(&self) -> bool {
        self.name == "_"
    }
}

#[derive(Debug, Clone)]
pub struct File {
    pub name: String,
    pub decls: Vec<Decl>,
}

#[derive(Debug, Clone)]
pub enum Decl {
    Func(FuncDecl),
    Gen(GenDecl),
}

#[derive(Debug, Clone)]
pub struct FuncDecl {
    pub id: NodeId,
    pub span: Span,
    pub recv: Option<Field>,
    pub name: Ident,
    pub ty: FuncType,
    /// `None` for functions implemented externally.
    pub body: Option<Block>,
}

#[derive(Debug, Clone, Default)]
pub struct FuncType {
    pub params: Vec<Field>,
    pub results: Vec<Field>,
}

#[derive(Debug, Clone)]
pub struct Field {
    pub names: Vec<Ident>,
    pub ty: Expr,
}

#[derive(Debug, Clone)]
pub struct GenDecl {
    pub id: NodeId,
    pub span: Span,
    pub specs: Vec<Spec>,
}

#[derive(Debug, Clone)]
pub enum Spec {
    Import(ImportSpec),
    Value(ValueSpec),
    Type(TypeSpec),
}

#[derive(Debug, Clone)]
pub struct ImportSpec {
    pub name: Option<Ident>,
    pub path: String,
}

/// A `var` or `const` spec.
#[derive(Debug, Clone)]
pub struct ValueSpec {
    pub id: NodeId,
    pub span: Span,
    pub is_const: bool,
    pub names: Vec<Ident>,
    pub ty: Option<Expr>,
    pub values: Vec<Expr>,
}

#[derive(Debug, Clone)]
pub struct TypeSpec {
    pub name: Ident,
    pub ty: Expr,
}

#[derive(Debug, Clone)]
pub struct Expr {
    pub id: NodeId,
    pub span: Span,
    pub kind: ExprKind,
}

#[derive(Debug, Clone)]
pub enum ExprKind {
    /// An identifier; defs/uses are keyed by the expression's id.
    Ident(String),
    BasicLit(ConstValue),
    /// `T{elts}`; the literal's type comes from type info. Keyed elements
    /// are `KeyValue` expressions.
    CompositeLit(Vec<Expr>),
    FuncLit(Box<FuncLit>),
    Paren(Box<Expr>),
    Selector(Box<Expr>, Ident),
    Index(Box<Expr>, Box<Expr>),
    Slice {
        x: Box<Expr>,
        low: Option<Box<Expr>>,
        high: Option<Box<Expr>>,
        max: Option<Box<Expr>>,
    },
    /// `x.(T)`; `None` for the `x.(type)` guard of a type switch.
    TypeAssert(Box<Expr>, Option<Box<Expr>>),
    Call {
        fun: Box<Expr>,
        args: Vec<Expr>,
        ellipsis: bool,
    },
    /// `*x`: a load, or a pointer type in type position.
    Star(Box<Expr>),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    KeyValue(Box<Expr>, Box<Expr>),
    /// A type written in expression position. Opaque to the builder.
    Type,
}

impl Expr {
    /// Strips any enclosing parentheses.
    pub fn unparen(&self) -> &Expr {
        match &self.kind {
            ExprKind::Paren(inner) => inner.unparen(),
            _ => self,
        }
    }

    pub fn is_blank(&self) -> bool {
        matches!(&self.unparen().kind, ExprKind::Ident(name) if name == "_")
    }
}

#[derive(Debug, Clone)]
pub struct FuncLit {
    pub ty: FuncType,
    pub body: Block,
}

#[derive(Debug, Clone, Default)]
pub struct Block {
    pub span: Span,
    pub stmts: Vec<Stmt>,
}

#[derive(Debug, Clone)]
pub struct Stmt {
    pub id: NodeId,
    pub span: Span,
    pub kind: StmtKind,
}

#[derive(Debug, Clone)]
pub enum StmtKind {
    Decl(GenDecl),
    Labeled(Ident, Box<Stmt>),
    Expr(Expr),
    Send(Expr, Expr),
    IncDec {
        x: Expr,
        inc: bool,
    },
    Assign {
        lhs: Vec<Expr>,
        op: AssignOp,
        rhs: Vec<Expr>,
    },
    Go(Expr),
    Defer(Expr),
    Return(Vec<Expr>),
    Branch(BranchKind, Option<Ident>),
    Block(Block),
    If {
        init: Option<Box<Stmt>>,
        cond: Expr,
        then: Block,
        els: Option<Box<Stmt>>,
    },
    Switch {
        init: Option<Box<Stmt>>,
        tag: Option<Expr>,
        body: Vec<CaseClause>,
    },
    /// `switch [init;] [x :=] y.(type) { ... }`; `assign` is either an
    /// expression statement or a `:=` assignment whose right side is the
    /// type guard.
    TypeSwitch {
        init: Option<Box<Stmt>>,
        assign: Box<Stmt>,
        body: Vec<CaseClause>,
    },
    Select(Vec<CommClause>),
    For {
        init: Option<Box<Stmt>>,
        cond: Option<Expr>,
        post: Option<Box<Stmt>>,
        body: Block,
    },
    Range {
        key: Option<Expr>,
        value: Option<Expr>,
        define: bool,
        x: Expr,
        body: Block,
    },
    Empty,
}

/// A `case` of a switch or type switch; an empty `list` is `default`.
#[derive(Debug, Clone)]
pub struct CaseClause {
    pub id: NodeId,
    pub span: Span,
    pub list: Vec<Expr>,
    pub body: Vec<Stmt>,
}

impl CaseClause {
    pub fn is_default(&self) -> bool {
        self.list.is_empty()
    }
}

/// A `case` of a select; `comm` is a send, a receive expression statement,
/// or a receive assignment. `None` is `default`.
#[derive(Debug, Clone)]
pub struct CommClause {
    pub id: NodeId,
    pub span: Span,
    pub comm: Option<Box<Stmt>>,
    pub body: Vec<Stmt>,
}
