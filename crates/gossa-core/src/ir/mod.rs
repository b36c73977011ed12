//! The SSA form: functions made of basic blocks of instructions over an
//! arena of values.
//!
//! Operands refer to values of the same function by [`ValueId`]; use-def
//! cycles through φ-nodes are ordinary index cycles. Referrer lists are
//! derived data, rebuilt after each pass with
//! [`FunctionBody::rebuild_referrers`].

pub mod dom;
mod function;
mod instr;
mod pretty;
mod value;

pub use dom::DomTree;
pub use function::*;
pub use instr::*;
pub use value::*;
