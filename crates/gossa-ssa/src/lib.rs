// gossa-ssa: SSA construction for type-checked Go-like packages
//
// Architecture:
// - program/package: the program being built, its packages and members
// - builder: lowering of typed syntax to SSA function bodies
// - methods: method sets and the synthetic wrappers they need
// - passes: block optimisation, register lifting and sanity checks

pub mod error;

mod builder;
mod emit;
pub mod methods;
pub mod package;
pub mod passes;
pub mod program;

pub use methods::{method_selections, MethodEntry, MethodSelection, MethodSet};
pub use package::{Member, NamedConst, Package};
pub use passes::{sanity_check, sanity_check_body};
pub use program::Program;
