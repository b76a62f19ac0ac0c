//! Single forward-pass-to-fixpoint peephole optimizer over a code
//! block's opcode list.
//!
//! Rewrites are driven by an abstract state tracking what the
//! accumulator and stack top currently hold (an immediate, a property
//! slot, `self`, or unknown). Branch/call/send/label opcodes
//! invalidate both slots conservatively.

use crate::ir::anode::{Anode, AnodeId, Arena, CompositeKind, OpNode, Operand, Target};
use crate::ir::opcode::*;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Src {
    Unknown,
    Imm(i64),
    Prop(u16),
    Var(VarClass, u16),
    SelfId,
}

#[derive(Clone, Copy)]
struct State {
    acc: Src,
    stack_top: Src,
}

impl State {
    fn fresh() -> Self {
        State {
            acc: Src::Unknown,
            stack_top: Src::Unknown,
        }
    }

    fn invalidate(&mut self) {
        self.acc = Src::Unknown;
        self.stack_top = Src::Unknown;
    }
}

/// Whether an opcode reads the accumulator's current value.
fn op_reads_accum(opcode: u8) -> bool {
    let op = opcode & !OP_BYTE;
    match op {
        OP_BNOT | OP_ADD | OP_SUB | OP_MUL | OP_DIV | OP_MOD | OP_SHR | OP_SHL | OP_XOR | OP_AND | OP_OR | OP_NEG
        | OP_NOT => true,
        OP_EQ | OP_NE | OP_GT | OP_GE | OP_LT | OP_LE | OP_UGT | OP_UGE | OP_ULT | OP_ULE => true,
        // Conservatively assume every branch reads the accumulator.
        OP_BT | OP_BNT | OP_JMP => true,
        OP_LOADI => false,
        OP_PUSH => true,
        OP_PUSHI | OP_TOSS | OP_DUP | OP_LINK => false,
        OP_CALL => true,
        OP_CALLK | OP_CALLB | OP_CALLE => false,
        OP_RET | OP_SEND => true,
        OP_CLASS => false,
        // self/super pull the object from the environment, not the acc.
        OP_SELF | OP_SUPER => false,
        OP_REST => false,
        OP_LEA => is_indexed(opcode),
        OP_SELFID | OP_PPREV => false,
        OP_PTOA => false,
        OP_ATOP => true,
        OP_PTOS | OP_STOP | OP_IPTOA | OP_DPTOA | OP_IPTOS | OP_DPTOS => false,
        OP_LOFSA | OP_LOFSS | OP_PUSH0 | OP_PUSH1 | OP_PUSH2 | OP_PUSHSELF => true,
        _ if is_load_store(op) => (access_kind(op) == AccessKind::Store && dest_of(op) == Dest::Accumulator) || is_indexed(op),
        _ => false,
    }
}

/// Whether an opcode can overwrite the accumulator's current value.
fn op_modifies_accum(opcode: u8) -> bool {
    let op = opcode & !OP_BYTE;
    match op {
        OP_BNOT | OP_ADD | OP_SUB | OP_MUL | OP_DIV | OP_MOD | OP_SHR | OP_SHL | OP_XOR | OP_AND | OP_OR | OP_NEG
        | OP_NOT => true,
        OP_EQ | OP_NE | OP_GT | OP_GE | OP_LT | OP_LE | OP_UGT | OP_UGE | OP_ULT | OP_ULE => true,
        OP_BT | OP_BNT | OP_JMP => false,
        OP_LOADI => true,
        OP_PUSH => false,
        OP_PUSHI | OP_TOSS | OP_DUP | OP_LINK => false,
        OP_CALL | OP_CALLK | OP_CALLB | OP_CALLE => true,
        OP_RET => false,
        OP_SEND | OP_CLASS | OP_SELF | OP_SUPER => true,
        OP_REST => false,
        OP_LEA | OP_SELFID => true,
        OP_PPREV => false,
        OP_PTOA => true,
        OP_ATOP | OP_PTOS | OP_STOP => false,
        OP_IPTOA | OP_DPTOA => true,
        OP_IPTOS | OP_DPTOS => false,
        OP_LOFSA => true,
        OP_LOFSS | OP_PUSH0 | OP_PUSH1 | OP_PUSH2 | OP_PUSHSELF => false,
        _ if is_load_store(op) => access_kind(op) != AccessKind::Store && dest_of(op) == Dest::Accumulator,
        _ => false,
    }
}

/// A single-pass forward scan answering whether the accumulator's
/// current value is dead: true the moment it finds an op that
/// overwrites the accumulator without reading it first, false the
/// moment it finds an op that reads it. Skips label pseudo-ops.
fn accum_dead_after(arena: &Arena, children: &[AnodeId], from: usize) -> bool {
    for &id in children.iter().skip(from) {
        let opcode = match arena.get(id) {
            Anode::Op(op) => op.opcode,
            Anode::Label(_) => continue,
            _ => return false,
        };
        if op_reads_accum(opcode) {
            return false;
        }
        if op_modifies_accum(opcode) {
            return true;
        }
    }
    false
}

/// Runs the peephole pass to fixpoint over the opcode list owned by the
/// code-block composite `id`. Returns true iff any pass rewrote
/// anything.
pub fn optimize_code_block(arena: &mut Arena, id: AnodeId) -> bool {
    debug_assert!(matches!(
        arena.get(id),
        Anode::Composite(c) if c.kind == CompositeKind::CodeBlock
    ));
    let mut any = false;
    loop {
        if !single_pass(arena, id) {
            break;
        }
        any = true;
    }
    any
}

fn single_pass(arena: &mut Arena, id: AnodeId) -> bool {
    let children = arena.composite_children(id).to_vec();
    let mut out: Vec<AnodeId> = Vec::with_capacity(children.len());
    let mut state = State::fresh();
    let mut changed = false;
    let mut i = 0;

    chase_branch_targets(arena, &children, &mut changed);

    while i < children.len() {
        let cur = children[i];
        match arena.get(cur) {
            Anode::Label(_) => {
                state.invalidate();
                out.push(cur);
                i += 1;
            }
            Anode::Op(op) => {
                let opcode = op.opcode;

                // ret; ret -> ret
                if opcode == OP_RET {
                    if let Some(&next) = children.get(i + 1) {
                        if matches!(arena.get(next), Anode::Op(n) if n.opcode == OP_RET) {
                            out.push(cur);
                            i += 2;
                            changed = true;
                            state.invalidate();
                            continue;
                        }
                    }
                    out.push(cur);
                    state.invalidate();
                    i += 1;
                    continue;
                }

                if opcode == OP_PUSHI {
                    if let Operand::SignedImm(v) = &op.operand {
                        let v = *v as i64;
                        if v == 0 || v == 1 || v == 2 {
                            let fast = match v {
                                0 => OP_PUSH0,
                                1 => OP_PUSH1,
                                _ => OP_PUSH2,
                            };
                            out.push(arena.alloc(Anode::Op(OpNode::plain(fast))));
                            changed = true;
                            state.stack_top = Src::Imm(v);
                            i += 1;
                            continue;
                        }
                        if state.acc == Src::Imm(v) {
                            out.push(arena.alloc(Anode::Op(OpNode::plain(OP_PUSH))));
                            changed = true;
                            state.stack_top = Src::Imm(v);
                            i += 1;
                            continue;
                        }
                        if state.stack_top == Src::Imm(v) {
                            out.push(arena.alloc(Anode::Op(OpNode::plain(OP_DUP))));
                            changed = true;
                            i += 1;
                            continue;
                        }
                        // load-imm v; push -> push-imm v (reverse direction
                        // handled below when we see load-imm); here track.
                        state.stack_top = Src::Imm(v);
                        out.push(cur);
                        i += 1;
                        continue;
                    }
                }

                if opcode == OP_LOADI {
                    if let Operand::SignedImm(v) = &op.operand {
                        let v = *v as i64;
                        if let Some(&next) = children.get(i + 1) {
                            if matches!(arena.get(next), Anode::Op(n) if n.opcode == OP_PUSH) {
                                let new = arena.alloc(Anode::Op(OpNode::with_operand(
                                    OP_PUSHI,
                                    Operand::SignedImm(v as i16),
                                )));
                                out.push(new);
                                changed = true;
                                state.acc = Src::Imm(v);
                                state.stack_top = Src::Imm(v);
                                i += 2;
                                continue;
                            }
                        }
                        if state.acc == Src::Imm(v) {
                            changed = true;
                            i += 1;
                            continue;
                        }
                        state.acc = Src::Imm(v);
                        out.push(cur);
                        i += 1;
                        continue;
                    }
                }

                if is_load_store(opcode) && access_kind(opcode) == AccessKind::Load && !is_indexed(opcode) {
                    if let Operand::VarAddr { slot } = &op.operand {
                        let slot = *slot;
                        let class = var_class(opcode);
                        let source = Src::Var(class, slot);
                        match dest_of(opcode) {
                            Dest::Accumulator => {
                                // load-var x -> delete, when the acc
                                // already holds var x.
                                if state.acc == source {
                                    changed = true;
                                    i += 1;
                                    continue;
                                }
                                // load-var x; push -> load-var-to-stack
                                // x, when nothing between the push and
                                // the accumulator's next write reads it.
                                if let Some(&next) = children.get(i + 1) {
                                    if matches!(arena.get(next), Anode::Op(n) if n.opcode == OP_PUSH)
                                        && accum_dead_after(arena, &children, i + 2)
                                    {
                                        let new = arena.alloc(Anode::Op(OpNode::var_access(
                                            AccessKind::Load,
                                            Dest::Stack,
                                            class,
                                            slot,
                                            false,
                                        )));
                                        out.push(new);
                                        changed = true;
                                        state.acc = Src::Unknown;
                                        state.stack_top = source;
                                        i += 2;
                                        continue;
                                    }
                                }
                                state.acc = source;
                                out.push(cur);
                                i += 1;
                                continue;
                            }
                            Dest::Stack => {
                                // load-var-to-stack x -> push, when the
                                // acc already holds var x.
                                if state.acc == source {
                                    out.push(arena.alloc(Anode::Op(OpNode::plain(OP_PUSH))));
                                    changed = true;
                                    state.stack_top = source;
                                    i += 1;
                                    continue;
                                }
                                // load-var-to-stack x -> dup, when the
                                // stack top already holds var x.
                                if state.stack_top == source {
                                    out.push(arena.alloc(Anode::Op(OpNode::plain(OP_DUP))));
                                    changed = true;
                                    i += 1;
                                    continue;
                                }
                                state.stack_top = source;
                                out.push(cur);
                                i += 1;
                                continue;
                            }
                        }
                    }
                }

                if opcode == OP_PTOS {
                    if let Operand::VarAddr { slot } = &op.operand {
                        let source = Src::Prop(*slot);
                        if state.acc == source {
                            out.push(arena.alloc(Anode::Op(OpNode::plain(OP_PUSH))));
                            changed = true;
                            state.stack_top = source;
                            i += 1;
                            continue;
                        }
                        if state.stack_top == source {
                            out.push(arena.alloc(Anode::Op(OpNode::plain(OP_DUP))));
                            changed = true;
                            i += 1;
                            continue;
                        }
                        state.stack_top = source;
                        out.push(cur);
                        i += 1;
                        continue;
                    }
                }

                if opcode == OP_SELFID {
                    if let Some(&next) = children.get(i + 1) {
                        if matches!(arena.get(next), Anode::Op(n) if n.opcode == OP_PUSH) {
                            out.push(arena.alloc(Anode::Op(OpNode::plain(OP_PUSHSELF))));
                            changed = true;
                            state.stack_top = Src::SelfId;
                            i += 2;
                            continue;
                        }
                        if matches!(arena.get(next), Anode::Op(n) if n.opcode == OP_SEND) {
                            out.push(arena.alloc(Anode::Op(OpNode::plain(OP_SELF))));
                            out.push(next);
                            changed = true;
                            state.invalidate();
                            i += 2;
                            continue;
                        }
                    }
                    state.acc = Src::SelfId;
                    out.push(cur);
                    i += 1;
                    continue;
                }

                if matches!(opcode, OP_SEND | OP_CALL | OP_CALLK | OP_CALLB | OP_CALLE | OP_LEA) {
                    out.push(cur);
                    state.invalidate();
                    i += 1;
                    continue;
                }

                out.push(cur);
                state.invalidate();
                i += 1;
            }
            _ => {
                out.push(cur);
                i += 1;
            }
        }
    }

    arena.set_composite_children(id, out);
    changed
}

/// Retargets a branch/jmp whose target label is immediately followed
/// (in the same code block, past any further labels bound at that same
/// position) by another `jmp` or a branch of the exact same sense (a
/// `bt` chasing through another `bt`, but not through a `bnt`), to that
/// branch's own target. Iterated to convergence by the caller's
/// fixpoint loop.
fn chase_branch_targets(arena: &Arena, children: &[AnodeId], changed: &mut bool) {
    for &id in children {
        let (this_op_type, target_ref) = match arena.get(id) {
            Anode::Op(op) => match &op.operand {
                Operand::Branch(t) => (op.opcode & !OP_BYTE, Some(t.clone())),
                _ => (0, None),
            },
            _ => (0, None),
        };
        let Some(target_ref) = target_ref else { continue };
        let Some(Target(target_id)) = target_ref.borrow().get().copied() else {
            continue;
        };
        let Some(pos) = children.iter().position(|&c| c == target_id) else {
            continue;
        };
        let mut after_pos = pos + 1;
        while let Some(&c) = children.get(after_pos) {
            if matches!(arena.get(c), Anode::Label(_)) {
                after_pos += 1;
                continue;
            }
            break;
        }
        let Some(&after) = children.get(after_pos) else { continue };
        if let Anode::Op(after_op) = arena.get(after) {
            let after_op_type = after_op.opcode & !OP_BYTE;
            if after_op_type == OP_JMP || after_op_type == this_op_type {
                if let Operand::Branch(final_target) = &after_op.operand {
                    if let Some(t) = final_target.borrow().get().copied() {
                        if *target_ref.borrow().get().unwrap() != t {
                            let _ = target_ref.borrow_mut().resolve(t);
                            *changed = true;
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forward_ref;

    fn code_block(arena: &mut Arena) -> AnodeId {
        arena.alloc(Anode::Composite(crate::ir::anode::CompositeNode {
            name: "test".into(),
            kind: CompositeKind::CodeBlock,
            children: Vec::new(),
        }))
    }

    #[test]
    fn push_imm_small_values_become_fast_pushes() {
        let mut arena = Arena::new();
        let block = code_block(&mut arena);
        let pushi0 = arena.alloc(Anode::Op(OpNode::with_operand(OP_PUSHI, Operand::SignedImm(0))));
        arena.append(block, pushi0);
        optimize_code_block(&mut arena, block);
        let children = arena.composite_children(block).to_vec();
        assert_eq!(children.len(), 1);
        match arena.get(children[0]) {
            Anode::Op(op) => assert_eq!(op.opcode, OP_PUSH0),
            _ => panic!("expected opcode"),
        }
    }

    #[test]
    fn double_ret_collapses_to_one() {
        let mut arena = Arena::new();
        let block = code_block(&mut arena);
        let r1 = arena.alloc(Anode::Op(OpNode::plain(OP_RET)));
        let r2 = arena.alloc(Anode::Op(OpNode::plain(OP_RET)));
        arena.append(block, r1);
        arena.append(block, r2);
        optimize_code_block(&mut arena, block);
        assert_eq!(arena.composite_children(block).len(), 1);
    }

    #[test]
    fn load_imm_then_push_folds_to_push_imm() {
        let mut arena = Arena::new();
        let block = code_block(&mut arena);
        let load = arena.alloc(Anode::Op(OpNode::with_operand(OP_LOADI, Operand::SignedImm(5))));
        let push = arena.alloc(Anode::Op(OpNode::plain(OP_PUSH)));
        arena.append(block, load);
        arena.append(block, push);
        optimize_code_block(&mut arena, block);
        let children = arena.composite_children(block).to_vec();
        assert_eq!(children.len(), 1);
        match arena.get(children[0]) {
            Anode::Op(op) => {
                assert_eq!(op.opcode, OP_PUSHI);
                assert!(matches!(&op.operand, Operand::SignedImm(5)));
            }
            _ => panic!("expected opcode"),
        }
    }

    #[test]
    fn running_twice_is_idempotent() {
        let mut arena = Arena::new();
        let block = code_block(&mut arena);
        let load = arena.alloc(Anode::Op(OpNode::with_operand(OP_LOADI, Operand::SignedImm(1))));
        let push = arena.alloc(Anode::Op(OpNode::plain(OP_PUSH)));
        arena.append(block, load);
        arena.append(block, push);
        optimize_code_block(&mut arena, block);
        let first_pass = arena.composite_children(block).to_vec();
        let changed_again = optimize_code_block(&mut arena, block);
        assert!(!changed_again);
        assert_eq!(arena.composite_children(block).to_vec().len(), first_pass.len());
    }

    #[test]
    fn branch_to_label_immediately_followed_by_jmp_is_retargeted() {
        let mut arena = Arena::new();
        let block = code_block(&mut arena);

        let final_target_ref: forward_ref::SharedRef<Target> = forward_ref::shared_unresolved();
        let bt = arena.alloc(Anode::Op(OpNode::branch(OP_BT, forward_ref::shared_unresolved())));
        let label = arena.alloc(Anode::Label(crate::ir::anode::LabelNode {
            id: 0,
            offset: std::cell::Cell::new(None),
        }));
        let jmp = arena.alloc(Anode::Op(OpNode::branch(OP_JMP, final_target_ref.clone())));
        let tail = arena.alloc(Anode::Op(OpNode::plain(OP_RET)));

        if let Anode::Op(op) = arena.get(bt) {
            if let Operand::Branch(r) = &op.operand {
                r.borrow_mut().resolve(Target(label)).unwrap();
            }
        }
        final_target_ref.borrow_mut().resolve(Target(tail)).unwrap();

        arena.append(block, bt);
        arena.append(block, label);
        arena.append(block, jmp);
        arena.append(block, tail);

        optimize_code_block(&mut arena, block);

        if let Anode::Op(op) = arena.get(bt) {
            if let Operand::Branch(r) = &op.operand {
                assert_eq!(*r.borrow().get().unwrap(), Target(tail));
            } else {
                panic!("expected branch operand");
            }
        } else {
            panic!("expected opcode");
        }
    }
}
