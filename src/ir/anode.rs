//! The assembly-node graph: the IR for everything that becomes a byte in
//! the heap or hunk image.
//!
//! The source toolchain this is modeled on uses a polymorphic `ANode`
//! class hierarchy. Here that collapses to a single tagged enum plus an
//! arena, per the design notes: composites hold children by index
//! rather than by owned pointer, and cross-references are
//! [`ForwardRef`]s over arena indices instead of raw pointers.

use std::cell::Cell;

use crate::forward_ref::SharedRef;
use crate::ir::opcode::{self, AccessKind, Dest, VarClass};

/// A stable index into an [`Arena`]. Never reused within one arena's
/// lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AnodeId(usize);

/// A resolved branch/call/reference target: the arena index of the
/// label or node a referencing opcode ultimately points at. Wrapped in
/// its own type so it is plain `Clone + PartialEq` data, as
/// `ForwardRef<T>` requires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Target(pub AnodeId);

/// One of the two per-compilation-unit node arenas (heap, hunk).
#[derive(Default)]
pub struct Arena {
    nodes: Vec<Anode>,
}

impl Arena {
    pub fn new() -> Self {
        Arena { nodes: Vec::new() }
    }

    pub fn alloc(&mut self, node: Anode) -> AnodeId {
        self.nodes.push(node);
        AnodeId(self.nodes.len() - 1)
    }

    pub fn get(&self, id: AnodeId) -> &Anode {
        &self.nodes[id.0]
    }

    pub fn get_mut(&mut self, id: AnodeId) -> &mut Anode {
        &mut self.nodes[id.0]
    }

    /// Size, in bytes, of the node's current emitted form.
    pub fn size(&self, id: AnodeId) -> usize {
        match self.get(id) {
            Anode::Op(op) => op.size(),
            Anode::Word(_) => 2,
            Anode::ComputedWord(_) => 2,
            Anode::RelWord(_) => 2,
            Anode::Text(t) => t.len() + 1,
            Anode::Label(_) => 0,
            Anode::Composite(c) => c.children.iter().map(|&child| self.size(child)).sum(),
        }
    }

    /// Assigns `ofs` to this node (and recursively to composite
    /// children), returning `ofs + size()`.
    pub fn set_offset(&mut self, id: AnodeId, ofs: usize) -> usize {
        match self.get_mut(id) {
            Anode::Op(op) => {
                op.offset.set(Some(ofs));
                ofs + op.size()
            }
            Anode::Word(_) | Anode::ComputedWord(_) => ofs + 2,
            Anode::RelWord(r) => {
                r.offset.set(Some(ofs));
                ofs + 2
            }
            Anode::Text(t) => ofs + t.len() + 1,
            Anode::Label(l) => {
                l.offset.set(Some(ofs));
                ofs
            }
            Anode::Composite(_) => {
                let children = self.children_of(id);
                let mut cur = ofs;
                for child in children {
                    cur = self.set_offset(child, cur);
                }
                cur
            }
        }
    }

    fn children_of(&self, id: AnodeId) -> Vec<AnodeId> {
        match self.get(id) {
            Anode::Composite(c) => c.children.clone(),
            _ => Vec::new(),
        }
    }

    /// Re-examines size-variable nodes (branches, intra-module calls)
    /// and shrinks them when their target is now within range. Returns
    /// true iff anything in the subtree shrank.
    pub fn try_shrink(&mut self, id: AnodeId) -> bool {
        match self.get(id) {
            Anode::Composite(_) => {
                let children = self.children_of(id);
                let mut changed = false;
                for child in children {
                    changed |= self.try_shrink(child);
                }
                changed
            }
            Anode::Op(_) => self.try_shrink_op(id),
            _ => false,
        }
    }

    fn try_shrink_op(&mut self, id: AnodeId) -> bool {
        let (self_offset, old_size, target, is_call) = match self.get(id) {
            Anode::Op(op) => match &op.operand {
                Operand::Branch(target) => (op.offset.get(), op.size(), Some(target.clone()), false),
                Operand::Call { target, .. } => (op.offset.get(), op.size(), Some(target.clone()), true),
                _ => return false,
            },
            _ => return false,
        };
        let (Some(self_offset), Some(target)) = (self_offset, target) else {
            return false;
        };
        let target_offset = target.borrow().get().and_then(|t| self.target_offset(*t));
        let Anode::Op(op) = self.get_mut(id) else {
            unreachable!()
        };
        let new_byte_form = match target_offset {
            Some(target_ofs) => {
                let base = if is_call { self_offset + 5 } else { self_offset + 4 };
                let distance = (target_ofs as i64) - (base as i64);
                distance.unsigned_abs() < 128
            }
            None => false,
        };
        op.byte_form = new_byte_form;
        op.size() < old_size
    }

    fn target_offset(&self, target: Target) -> Option<usize> {
        match self.get(target.0) {
            Anode::Op(op) => op.offset.get(),
            Anode::Label(l) => l.offset.get(),
            Anode::Composite(c) => c.children.first().and_then(|&f| self.target_offset(Target(f))),
            _ => None,
        }
    }

    pub fn contains(&self, haystack: AnodeId, needle: AnodeId) -> bool {
        if haystack == needle {
            return true;
        }
        if let Anode::Composite(c) = self.get(haystack) {
            c.children.iter().any(|&child| self.contains(child, needle))
        } else {
            false
        }
    }

    /// Emits this node's (and recursively, its children's) bytes into
    /// `out`, respecting the configured endianness.
    pub fn emit(&self, id: AnodeId, out: &mut Vec<u8>, big_endian_words: bool) {
        match self.get(id) {
            Anode::Op(op) => op.emit(self, out, big_endian_words),
            Anode::Word(w) => write_word(out, *w, big_endian_words),
            Anode::ComputedWord(r) => {
                let v = r.borrow().get().copied().unwrap_or(0);
                write_word(out, v, big_endian_words);
            }
            Anode::RelWord(r) => {
                let v = r
                    .target
                    .borrow()
                    .get()
                    .and_then(|t| self.target_offset(*t))
                    .unwrap_or(0) as u16;
                write_word(out, v, big_endian_words);
            }
            Anode::Text(t) => {
                out.extend_from_slice(t.as_bytes());
                out.push(0);
            }
            Anode::Label(_) => {}
            Anode::Composite(c) => {
                for &child in &c.children {
                    self.emit(child, out, big_endian_words);
                }
            }
        }
    }

    /// Reports every absolute-address slot this node (recursively)
    /// emits, as an offset relative to the start of the stream.
    pub fn collect_fixups(&self, id: AnodeId, out: &mut Vec<usize>) {
        match self.get(id) {
            Anode::Op(op) => {
                if let (Some(ofs), true) = (op.offset.get(), op.has_fixup()) {
                    out.push(ofs + op.fixup_delta());
                }
            }
            Anode::RelWord(r) => {
                if let Some(ofs) = r.offset.get() {
                    out.push(ofs);
                }
            }
            Anode::Composite(c) => {
                for &child in &c.children {
                    self.collect_fixups(child, out);
                }
            }
            _ => {}
        }
    }

    pub fn append(&mut self, composite: AnodeId, child: AnodeId) {
        if let Anode::Composite(c) = self.get_mut(composite) {
            c.children.push(child);
        }
    }

    pub fn insert_before(&mut self, composite: AnodeId, before: AnodeId, child: AnodeId) {
        if let Anode::Composite(c) = self.get_mut(composite) {
            let pos = c
                .children
                .iter()
                .position(|&x| x == before)
                .unwrap_or(c.children.len());
            c.children.insert(pos, child);
        }
    }

    /// Runs the peephole optimizer over every code-block composite
    /// reachable from `id`, to exhaustion. No-op for non-code nodes.
    pub fn optimize(&mut self, id: AnodeId) -> bool {
        match self.get(id) {
            Anode::Composite(c) if c.kind == CompositeKind::CodeBlock => {
                crate::peephole::optimize_code_block(self, id)
            }
            Anode::Composite(_) => {
                let children = self.children_of(id);
                let mut changed = false;
                for child in children {
                    changed |= self.optimize(child);
                }
                changed
            }
            _ => false,
        }
    }

    pub fn composite_children(&self, id: AnodeId) -> &[AnodeId] {
        match self.get(id) {
            Anode::Composite(c) => &c.children,
            _ => &[],
        }
    }

    pub fn set_composite_children(&mut self, id: AnodeId, children: Vec<AnodeId>) {
        if let Anode::Composite(c) = self.get_mut(id) {
            c.children = children;
        }
    }
}

pub(crate) fn write_word(out: &mut Vec<u8>, w: u16, big_endian: bool) {
    if big_endian {
        out.extend_from_slice(&w.to_be_bytes());
    } else {
        out.extend_from_slice(&w.to_le_bytes());
    }
}

/// One IR node.
pub enum Anode {
    Op(OpNode),
    /// A raw data word, fixed at construction.
    Word(u16),
    /// A word whose value is only known once layout has run (e.g. an
    /// offset-property pointing at a not-yet-placed dictionary).
    ComputedWord(SharedRef<u16>),
    /// Like `ComputedWord`, but also a fixup slot: the loader must
    /// rewrite it from a file-relative offset to a runtime address
    /// (offset-properties, dispatch-table entries, method-code-offset
    /// entries in a method dictionary, text-typed variable slots).
    RelWord(RelWordNode),
    Text(String),
    Label(LabelNode),
    Composite(CompositeNode),
}

pub struct LabelNode {
    pub id: u32,
    pub offset: Cell<Option<usize>>,
}

pub struct RelWordNode {
    pub target: SharedRef<Target>,
    pub offset: Cell<Option<usize>>,
}

impl RelWordNode {
    pub fn new(target: SharedRef<Target>) -> Self {
        RelWordNode {
            target,
            offset: Cell::new(None),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompositeKind {
    Table,
    ObjectPropertyTable,
    /// Hunk-side object dictionary: property-dictionary table plus the
    /// method dictionary, for one class or instance.
    ObjectDict,
    CodeBlock,
    DispatchTable,
    Property,
    Method,
    Generic,
}

pub struct CompositeNode {
    pub name: String,
    pub kind: CompositeKind,
    pub children: Vec<AnodeId>,
}

/// The immediate payload an opcode carries, if any.
pub enum Operand {
    None,
    SignedImm(i16),
    UnsignedImm(u16),
    /// A pushed immediate whose value isn't known until the rest of a
    /// send or call's argument list has been compiled (the "byte count
    /// of arguments" word a message send backfills once every argument
    /// has been pushed). `arg_size` is 1 byte under the legacy dialect,
    /// 2 under the modern one; fixed at construction and never
    /// shrunk, since the eventual value isn't known at construction
    /// time.
    BackfillPush { value: Cell<u16>, arg_size: u8 },
    /// Variable access: the slot address. Byte-sized addresses (<=255)
    /// encode in 2 bytes total, word-sized in 3; this size-flip happens
    /// once at construction and is not touched by the shrink fixpoint.
    VarAddr { slot: u16 },
    Branch(SharedRef<Target>),
    /// Intra-module procedure call: relative target plus a backfillable
    /// arg-count immediate (`2 * argument_count`, written once argument
    /// compilation completes). `arg_size` is 1 for the legacy dialect's
    /// 1-byte argument counts, 2 for the modern dialect.
    Call {
        target: SharedRef<Target>,
        arg_count: Cell<u16>,
        arg_size: u8,
    },
    ExternCall { script: u16, entry: u16 },
    /// Object-id load / text-offset load / offset-property: a reference
    /// to a not-yet-placed heap or hunk node.
    ObjectRef(SharedRef<Target>),
    TextRef(SharedRef<Target>),
    /// A message send's own payload: the summed arg-byte count over
    /// every message compiled ahead of it (selector(2) +
    /// argcount_immediate(2) + 2 × args, per message). By the time the
    /// expression compiler constructs this node every message has
    /// already been compiled, so the total is known outright rather
    /// than backfilled. `arg_size` is dialect-sized (1 byte legacy, 2
    /// modern) like `BackfillPush`'s.
    Send { total_bytes: u16, arg_size: u8 },
    /// A super-send's payload: the superclass number dispatch starts
    /// searching from (a fixed 2-byte word), plus the same summed
    /// arg-byte total a plain `Send` carries.
    SuperSend {
        superclass: u16,
        total_bytes: u16,
        arg_size: u8,
    },
    LineNum(u16),
    FileName(u16),
}

pub struct OpNode {
    pub opcode: u8,
    pub operand: Operand,
    pub byte_form: bool,
    pub offset: Cell<Option<usize>>,
}

impl OpNode {
    pub fn plain(opcode: u8) -> Self {
        OpNode {
            opcode,
            operand: Operand::None,
            byte_form: false,
            offset: Cell::new(None),
        }
    }

    pub fn with_operand(opcode: u8, operand: Operand) -> Self {
        let byte_form = matches!(&operand, Operand::SignedImm(v) if (-128..=127).contains(v))
            || matches!(&operand, Operand::UnsignedImm(v) if *v <= 255);
        OpNode {
            opcode,
            operand,
            byte_form,
            offset: Cell::new(None),
        }
    }

    pub fn var_access(kind: AccessKind, dest: Dest, class: VarClass, slot: u16, indexed: bool) -> Self {
        let opcode = opcode::encode_access(kind, dest, class, indexed);
        OpNode {
            opcode,
            operand: Operand::VarAddr { slot },
            byte_form: slot <= 255,
            offset: Cell::new(None),
        }
    }

    /// An effective-address computation (`lea`): a fixed, flat
    /// opcode (unlike variable access, it does not bit-map the
    /// storage class into the opcode byte) carrying the slot address
    /// with the same byte/word size-flip as [`OpNode::var_access`].
    pub fn lea(slot: u16) -> Self {
        OpNode {
            opcode: opcode::OP_LEA,
            operand: Operand::VarAddr { slot },
            byte_form: slot <= 255,
            offset: Cell::new(None),
        }
    }

    /// A `push`-family immediate whose value will be backfilled once
    /// known (see [`Operand::BackfillPush`]).
    pub fn backfill_push(opcode: u8, arg_size: u8) -> Self {
        OpNode {
            opcode,
            operand: Operand::BackfillPush {
                value: Cell::new(0),
                arg_size,
            },
            byte_form: false,
            offset: Cell::new(None),
        }
    }

    /// Backfills a [`Operand::BackfillPush`] node's value. No-op on any
    /// other operand kind.
    pub fn set_backfill_value(&self, v: u16) {
        if let Operand::BackfillPush { value, .. } = &self.operand {
            value.set(v);
        }
    }

    pub fn branch(opcode: u8, target: SharedRef<Target>) -> Self {
        OpNode {
            opcode,
            operand: Operand::Branch(target),
            byte_form: false,
            offset: Cell::new(None),
        }
    }

    pub fn call(target: SharedRef<Target>, arg_size: u8) -> Self {
        OpNode {
            opcode: opcode::OP_CALL,
            operand: Operand::Call {
                target,
                arg_count: Cell::new(0),
                arg_size,
            },
            byte_form: false,
            offset: Cell::new(None),
        }
    }

    /// A plain message send: the total arg-byte count is already fully
    /// known by construction time (every message has been compiled),
    /// so it's carried as a concrete value rather than a backfill.
    pub fn send(arg_size: u8, total_bytes: u16) -> Self {
        OpNode {
            opcode: opcode::OP_SEND,
            operand: Operand::Send { total_bytes, arg_size },
            byte_form: false,
            offset: Cell::new(None),
        }
    }

    pub fn super_send(superclass: u16, arg_size: u8, total_bytes: u16) -> Self {
        OpNode {
            opcode: opcode::OP_SUPER,
            operand: Operand::SuperSend {
                superclass,
                total_bytes,
                arg_size,
            },
            byte_form: false,
            offset: Cell::new(None),
        }
    }

    pub fn size(&self) -> usize {
        match &self.operand {
            Operand::None => 1,
            Operand::SignedImm(_) | Operand::UnsignedImm(_) | Operand::VarAddr { .. } | Operand::Branch(_) => {
                if self.byte_form {
                    2
                } else {
                    3
                }
            }
            Operand::Call { arg_size, .. } => (if self.byte_form { 3 } else { 4 }) + *arg_size as usize,
            Operand::BackfillPush { arg_size, .. } => 1 + *arg_size as usize,
            Operand::ExternCall { .. } => 5,
            Operand::ObjectRef(_) | Operand::TextRef(_) => 3,
            Operand::Send { arg_size, .. } => 1 + *arg_size as usize,
            Operand::SuperSend { arg_size, .. } => 3 + *arg_size as usize,
            Operand::LineNum(_) | Operand::FileName(_) => 3,
        }
    }

    /// Backfills the arg-count immediate once argument compilation has
    /// finished (no-op on a node with no arg count, e.g. a plain
    /// branch).
    pub fn set_call_arg_count(&self, n: u16) {
        if let Operand::Call { arg_count, .. } = &self.operand {
            arg_count.set(n);
        }
    }

    fn has_fixup(&self) -> bool {
        matches!(self.operand, Operand::ObjectRef(_) | Operand::TextRef(_))
    }

    /// lofsa/object-id loads fix up one byte past the opcode itself.
    fn fixup_delta(&self) -> usize {
        1
    }

    fn resolved_offset(&self, arena: &Arena, target: &SharedRef<Target>) -> Option<usize> {
        let t = *target.borrow().get()?;
        arena.target_offset(t)
    }

    fn emit(&self, arena: &Arena, out: &mut Vec<u8>, big_endian: bool) {
        let op = opcode::set_byte_form(self.opcode, self.byte_form);
        out.push(op);
        match &self.operand {
            Operand::None => {}
            Operand::SignedImm(v) => {
                if self.byte_form {
                    out.push(*v as u8);
                } else {
                    write_word(out, *v as u16, big_endian);
                }
            }
            Operand::UnsignedImm(v) => {
                if self.byte_form {
                    out.push(*v as u8);
                } else {
                    write_word(out, *v, big_endian);
                }
            }
            Operand::VarAddr { slot } => {
                if self.byte_form {
                    out.push(*slot as u8);
                } else {
                    write_word(out, *slot, big_endian);
                }
            }
            Operand::Branch(target) => {
                let here = self.offset.get().unwrap_or(0);
                let base = here + self.size();
                let dest = self.resolved_offset(arena, target).unwrap_or(base) as i64;
                let disp = dest - base as i64;
                if self.byte_form {
                    out.push(disp as i8 as u8);
                } else {
                    write_word(out, disp as i16 as u16, big_endian);
                }
            }
            Operand::Call {
                target, arg_count, ..
            } => {
                let here = self.offset.get().unwrap_or(0);
                let base = here + self.size();
                let dest = self.resolved_offset(arena, target).unwrap_or(base) as i64;
                let disp = dest - base as i64;
                if self.byte_form {
                    out.push(disp as i8 as u8);
                } else {
                    write_word(out, disp as i16 as u16, big_endian);
                }
                write_word(out, arg_count.get(), big_endian);
            }
            Operand::ExternCall { script, entry } => {
                write_word(out, *script, big_endian);
                write_word(out, *entry, big_endian);
            }
            Operand::BackfillPush { value, arg_size } => {
                if *arg_size == 1 {
                    out.push(value.get() as u8);
                } else {
                    write_word(out, value.get(), big_endian);
                }
            }
            Operand::ObjectRef(r) | Operand::TextRef(r) => {
                let v = self.resolved_offset(arena, r).unwrap_or(0) as u16;
                write_word(out, v, big_endian);
            }
            Operand::Send { total_bytes, arg_size } => {
                if *arg_size == 1 {
                    out.push(*total_bytes as u8);
                } else {
                    write_word(out, *total_bytes, big_endian);
                }
            }
            Operand::SuperSend {
                superclass,
                total_bytes,
                arg_size,
            } => {
                write_word(out, *superclass, big_endian);
                if *arg_size == 1 {
                    out.push(*total_bytes as u8);
                } else {
                    write_word(out, *total_bytes, big_endian);
                }
            }
            Operand::LineNum(v) | Operand::FileName(v) => {
                write_word(out, *v, big_endian);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forward_ref::shared_unresolved;

    #[test]
    fn super_send_embeds_class_number_and_arg_total() {
        let op = OpNode::super_send(7, 2, 6);
        assert_eq!(op.size(), 5);
        let mut out = Vec::new();
        op.emit_for_test(&Arena::new(), &mut out);
        assert_eq!(out, vec![opcode::OP_SUPER, 7, 0, 6, 0]);
    }

    #[test]
    fn send_embeds_its_own_arg_total_with_no_separate_push() {
        let modern = OpNode::send(2, 8);
        assert_eq!(modern.size(), 3);
        let mut out = Vec::new();
        modern.emit_for_test(&Arena::new(), &mut out);
        assert_eq!(out, vec![opcode::OP_SEND, 8, 0]);

        let legacy = OpNode::send(1, 8);
        assert_eq!(legacy.size(), 2);
        let mut out = Vec::new();
        legacy.emit_for_test(&Arena::new(), &mut out);
        assert_eq!(out, vec![opcode::OP_SEND, 8]);
    }

    #[test]
    fn backfill_push_emits_the_value_set_after_construction() {
        let legacy = OpNode::backfill_push(opcode::OP_PUSHI, 1);
        assert_eq!(legacy.size(), 2);
        legacy.set_backfill_value(5);
        let mut out = Vec::new();
        legacy.emit_for_test(&Arena::new(), &mut out);
        assert_eq!(out, vec![opcode::OP_PUSHI, 5]);

        let modern = OpNode::backfill_push(opcode::OP_PUSHI, 2);
        assert_eq!(modern.size(), 3);
        modern.set_backfill_value(0x0102);
        let mut out = Vec::new();
        modern.emit_for_test(&Arena::new(), &mut out);
        assert_eq!(out, vec![opcode::OP_PUSHI, 0x02, 0x01]);
    }

    #[test]
    fn set_backfill_value_is_a_no_op_on_other_operand_kinds() {
        let plain = OpNode::plain(opcode::OP_ADD);
        plain.set_backfill_value(99);
        assert_eq!(plain.size(), 1);
    }

    #[test]
    fn arena_assigns_increasing_ids_and_reports_node_size() {
        let mut arena = Arena::new();
        let a = arena.alloc(Anode::Op(OpNode::plain(opcode::OP_RET)));
        let b = arena.alloc(Anode::Word(42));
        assert_ne!(a, b);
        assert_eq!(arena.size(a), 1);
        assert_eq!(arena.size(b), 2);
    }

    #[test]
    fn composite_size_sums_its_children() {
        let mut arena = Arena::new();
        let child1 = arena.alloc(Anode::Op(OpNode::plain(opcode::OP_RET)));
        let child2 = arena.alloc(Anode::Word(0));
        let composite = arena.alloc(Anode::Composite(CompositeNode {
            name: "block".into(),
            kind: CompositeKind::CodeBlock,
            children: vec![child1, child2],
        }));
        assert_eq!(arena.size(composite), 3);
    }

    #[test]
    fn unresolved_branch_target_is_pruned_until_linked() {
        let target: SharedRef<Target> = shared_unresolved();
        let op = OpNode::branch(opcode::OP_JMP, target.clone());
        assert!(!op.byte_form);
        assert_eq!(op.size(), 3);
    }

    impl OpNode {
        /// Test-only helper to emit a single node without building an
        /// arena-backed branch/call/ref target around it.
        fn emit_for_test(&self, arena: &Arena, out: &mut Vec<u8>) {
            self.emit(arena, out, false);
        }
    }
}
