//! The expression compiler: lowers a parsed procedure or method body
//! into opcode `ANode`s appended to the hunk arena.
//!
//! Split in two: [`compiler`] owns the `CodegenContext` (the explicit
//! per-unit state every later stage reads from, mirroring the
//! configuration design note — no global mutable flags) and the
//! entry points that compile a whole procedure or method;
//! [`expr`] walks the expression tree itself.

pub mod compiler;
pub mod expr;

pub use compiler::{CodegenContext, LoopCtx};
