//! The intermediate representation: assembly nodes, the opcode table,
//! and the arena that owns both the heap and hunk node graphs.

pub mod anode;
pub mod opcode;

pub use anode::{
    Anode, AnodeId, Arena, CompositeKind, CompositeNode, LabelNode, OpNode, Operand, RelWordNode, Target,
};
pub use opcode::mnemonic;
