//! Drives the peephole pass and the offset/shrink fixpoint over a
//! compilation unit's node graph.

use crate::ir::anode::{Arena, AnodeId};

/// Runs the peephole optimizer to exhaustion (unless `optimize` is
/// false, i.e. disabled), then assigns offsets and repeatedly shrinks
/// long-form branches and intra-module calls to short form until no
/// node shrinks in a pass.
///
/// Sizes only ever decrease during the shrink loop, so it terminates.
pub fn layout(arena: &mut Arena, root: AnodeId, optimize: bool) {
    if optimize {
        arena.optimize(root);
    }
    arena.set_offset(root, 0);
    while arena.try_shrink(root) {
        arena.set_offset(root, 0);
    }
}
