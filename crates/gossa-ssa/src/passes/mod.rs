//! Passes run over every function body once the builder is done with it.
//!
//! The order is fixed: block optimisation, then register lifting (unless
//! the program builds in naive form), then register naming and, when
//! requested, the sanity checker.

mod blockopt;
mod lift;
mod sanity;

use std::fmt;

use gossa_core::config::BuilderMode;
use gossa_core::error::Result;
use gossa_core::ir::{Function, FunctionBody, Instr};
use gossa_core::{debug, info};

use crate::program::Program;

pub use blockopt::BlockOpt;
pub use lift::Lift;
pub use sanity::{sanity_check, sanity_check_body};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BodyPassName {
    BlockOpt,
    Lift,
}

impl BodyPassName {
    pub fn as_str(&self) -> &'static str {
        match self {
            BodyPassName::BlockOpt => "blockopt",
            BodyPassName::Lift => "lift",
        }
    }
}

impl fmt::Display for BodyPassName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A transformation of one function body. `run` returns the number of
/// changes it made; zero means the body was left as it was.
pub trait BodyPass {
    fn name(&self) -> BodyPassName;
    fn run(&self, body: &mut FunctionBody) -> Result<usize>;
}

/// The passes every body goes through, in order.
fn pipeline(mode: BuilderMode) -> Vec<Box<dyn BodyPass>> {
    let mut passes: Vec<Box<dyn BodyPass>> = vec![Box::new(BlockOpt)];
    if !mode.contains(BuilderMode::NAIVE_FORM) {
        passes.push(Box::new(Lift));
    }
    passes
}

/// Turns the body the builder produced into the published form.
pub(crate) fn finish_body(prog: &Program, func: &Function, mut body: FunctionBody) -> Result<FunctionBody> {
    let mode = prog.mode();
    body.rebuild_referrers();
    for pass in pipeline(mode) {
        let changes = pass.run(&mut body)?;
        if changes > 0 {
            debug!("{}: {} made {} changes", func.relative_name(None), pass.name(), changes);
        }
    }

    // Cells the lifter left behind stay frame locals; everything else has
    // been removed or moved to the heap.
    let nodes = &body.nodes;
    body.locals.retain(|id| {
        let node = &nodes[id.index()];
        node.block.is_some() && matches!(node.instr(), Some(Instr::Alloc { heap: false, .. }))
    });
    body.assign_names();
    body.rebuild_referrers();

    if mode.contains(BuilderMode::SANITY_CHECK_FUNCTIONS) {
        sanity_check_body(func, &body)?;
    }
    Ok(body)
}

/// Logs a published function as the program's mode asks.
pub(crate) fn log_function(prog: &Program, func: &Function) {
    let mode = prog.mode();
    let Some(body) = func.body() else {
        return;
    };
    if mode.contains(BuilderMode::LOG_FUNCTIONS) {
        info!(
            "built {}: {} blocks, {} instructions",
            func.relative_name(None),
            body.blocks.len(),
            body.live_instrs().count()
        );
    }
    if mode.contains(BuilderMode::PRINT_FUNCTIONS) {
        info!("\n{}", func.disassembly());
    }
}
