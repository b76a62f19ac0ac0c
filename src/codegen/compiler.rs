//! `CodegenContext`: the state threaded through compilation of one
//! source unit, plus the entry points that compile a whole procedure
//! or method body.

use std::cell::Cell;

use crate::ast::{Method, Procedure};
use crate::config::{Config, Dialect};
use crate::diagnostics::Diagnostics;
use crate::errors::{CoreError, SourceLoc};
use crate::forward_ref::{shared_resolved, shared_unresolved, SharedRef};
use crate::ir::opcode::{self, AccessKind, Dest, VarClass};
use crate::ir::{Anode, AnodeId, Arena, CompositeKind, CompositeNode, LabelNode, OpNode, Operand, Target};
use crate::listing::ListingSink;
use crate::symtab::{Symbol, SymbolKind, SymbolTable};
use crate::vocab::VocabStore;

/// The start/continue/end labels an enclosing loop registers so
/// `break`/`continue` (at any nesting depth) can branch to them.
pub struct LoopCtx {
    pub start: SharedRef<Target>,
    pub cont: SharedRef<Target>,
    pub end: SharedRef<Target>,
}

/// Per-compilation-unit state: the two output arenas, the active
/// scope stack, the shared vocabulary and diagnostics sinks, and the
/// bits of mutable bookkeeping (label ids, loop stack, last debug
/// line) the expression compiler needs as it walks one body.
pub struct CodegenContext<'cx> {
    pub config: &'cx Config,
    pub heap: Arena,
    pub hunk: Arena,
    pub symtab: SymbolTable,
    pub vocab: &'cx mut VocabStore,
    pub diagnostics: &'cx mut Diagnostics,
    pub listing: &'cx mut dyn ListingSink,
    arg_size: u8,
    next_label: u32,
    loop_stack: Vec<LoopCtx>,
    last_debug_line: u32,
    file_index: u16,
    text_pool: Vec<(String, AnodeId)>,
}

impl<'cx> CodegenContext<'cx> {
    pub fn new(
        config: &'cx Config,
        vocab: &'cx mut VocabStore,
        diagnostics: &'cx mut Diagnostics,
        listing: &'cx mut dyn ListingSink,
    ) -> Self {
        let arg_size = match config.dialect {
            Dialect::Legacy => 1,
            Dialect::Modern => 2,
        };
        CodegenContext {
            config,
            heap: Arena::new(),
            hunk: Arena::new(),
            symtab: SymbolTable::new(),
            vocab,
            diagnostics,
            listing,
            arg_size,
            next_label: 0,
            loop_stack: Vec::new(),
            last_debug_line: 0,
            file_index: 0,
            text_pool: Vec::new(),
        }
    }

    /// Bytes a backfillable argument count occupies: 1 under the
    /// legacy dialect, 2 under the modern one.
    pub fn arg_size(&self) -> u8 {
        self.arg_size
    }

    /// Sets the file-name-table index debug-mode file-name opcodes
    /// reference, ahead of compiling the procedures/methods of a
    /// given source file.
    pub fn set_current_file(&mut self, idx: u16) {
        self.file_index = idx;
    }

    fn debug_enabled(&self) -> bool {
        self.config.dialect == Dialect::Modern && self.config.include_debug_info
    }

    /// Emits a line-number opcode iff debug mode is on and `line`
    /// advances past the last line annotated in this body.
    pub(super) fn maybe_emit_line(&mut self, ops: &mut Vec<AnodeId>, line: u32) {
        if self.debug_enabled() && line > self.last_debug_line {
            self.push_node(
                ops,
                OpNode::with_operand(opcode::OP_LINENUM, Operand::LineNum(line as u16)),
            );
            self.last_debug_line = line;
        }
    }

    /// Allocates `node` in the hunk arena and appends it to `ops`.
    pub(super) fn push_node(&mut self, ops: &mut Vec<AnodeId>, node: OpNode) -> AnodeId {
        let id = self.hunk.alloc(Anode::Op(node));
        ops.push(id);
        id
    }

    pub(super) fn push_var_access(
        &mut self,
        ops: &mut Vec<AnodeId>,
        kind: AccessKind,
        dest: Dest,
        class: VarClass,
        slot: u16,
        indexed: bool,
    ) -> AnodeId {
        self.push_node(ops, OpNode::var_access(kind, dest, class, slot, indexed))
    }

    /// Backfills a previously-pushed [`crate::ir::Operand::BackfillPush`]
    /// or [`crate::ir::Operand::Call`] node's count.
    pub(super) fn set_backfill(&mut self, id: AnodeId, v: u16) {
        if let Anode::Op(op) = self.hunk.get(id) {
            op.set_backfill_value(v);
        }
    }

    pub(super) fn set_call_arg_count(&mut self, id: AnodeId, v: u16) {
        if let Anode::Op(op) = self.hunk.get(id) {
            op.set_call_arg_count(v);
        }
    }

    /// A not-yet-placed branch/label target, resolved once the
    /// corresponding label is bound.
    pub(super) fn fresh_target(&mut self) -> SharedRef<Target> {
        shared_unresolved()
    }

    /// Allocates a label node at the current position and resolves
    /// `target` to it.
    pub(super) fn bind_label(&mut self, ops: &mut Vec<AnodeId>, target: &SharedRef<Target>) {
        let id = self.hunk.alloc(Anode::Label(LabelNode {
            id: self.next_label,
            offset: Cell::new(None),
        }));
        self.next_label += 1;
        ops.push(id);
        if target.borrow_mut().resolve(Target(id)).is_err() {
            let _ = self.diagnostics.report(CoreError::ForwardRefConflict {
                loc: SourceLoc::unknown(),
            });
        }
    }

    pub(super) fn enter_loop(&mut self, start: SharedRef<Target>, cont: SharedRef<Target>, end: SharedRef<Target>) {
        self.loop_stack.push(LoopCtx { start, cont, end });
    }

    pub(super) fn exit_loop(&mut self) {
        self.loop_stack.pop();
    }

    /// The loop context `n` frames up (1 = innermost), or `None` if
    /// `n` exceeds the current nesting depth.
    pub(super) fn loop_ctx(&self, n: u32) -> Option<&LoopCtx> {
        let n = n.max(1) as usize;
        let len = self.loop_stack.len();
        if n == 0 || n > len {
            None
        } else {
            Some(&self.loop_stack[len - n])
        }
    }

    /// Deduplicates repeated string literals against a single
    /// hunk-resident text node.
    pub(super) fn intern_text(&mut self, text: &str) -> SharedRef<Target> {
        if let Some(&(_, id)) = self.text_pool.iter().find(|(s, _)| s == text) {
            return shared_resolved(Target(id));
        }
        let id = self.hunk.alloc(Anode::Text(text.to_string()));
        self.text_pool.push((text.to_string(), id));
        shared_resolved(Target(id))
    }

    /// Looks up (or lazily creates, with a pending forward reference)
    /// the named procedure/class/object symbol's resolution target.
    pub(super) fn named_target(&mut self, name: &str, kind: SymbolKind) -> SharedRef<Target> {
        if let Some(sym) = self.symtab.lookup(name) {
            if let Some(fr) = &sym.forward_ref {
                return fr.clone();
            }
        }
        let fr = shared_unresolved();
        // Global, not `define`: this symbol must survive the pop of
        // whatever procedure/method scope is active at the call site,
        // since the call being compiled may forward-reference a
        // procedure that hasn't been compiled yet.
        self.symtab.define_global(Symbol {
            name: name.to_string(),
            kind,
            value: 0,
            forward_ref: Some(fr.clone()),
        });
        fr
    }

    pub(super) fn procedure_target(&mut self, name: &str) -> SharedRef<Target> {
        self.named_target(name, SymbolKind::Procedure)
    }

    fn resolve_procedure(&mut self, name: &str, id: AnodeId) {
        let target = Target(id);
        if let Some(sym) = self.symtab.lookup(name) {
            if let Some(fr) = sym.forward_ref.clone() {
                if fr.borrow_mut().resolve(target).is_err() {
                    let _ = self.diagnostics.report(CoreError::ForwardRefConflict {
                        loc: SourceLoc::unknown(),
                    });
                }
                return;
            }
        }
        self.symtab.define_global(Symbol {
            name: name.to_string(),
            kind: SymbolKind::Procedure,
            value: 0,
            forward_ref: Some(shared_resolved(target)),
        });
    }

    fn compile_callable_body(&mut self, params: &[String], has_rest: bool, body: &[crate::ast::Stmt]) -> Vec<AnodeId> {
        self.last_debug_line = 0;
        self.symtab.push();
        for (i, name) in params.iter().enumerate() {
            self.symtab.define(Symbol::new(name, SymbolKind::Param, i as i32));
        }
        let mut ops = Vec::new();
        if self.debug_enabled() {
            self.push_node(
                &mut ops,
                OpNode::with_operand(opcode::OP_FILENAME, Operand::FileName(self.file_index)),
            );
        }
        if has_rest {
            self.push_node(
                &mut ops,
                OpNode::with_operand(opcode::OP_REST, Operand::UnsignedImm(params.len() as u16)),
            );
        }
        self.compile_body(&mut ops, body);
        self.push_node(&mut ops, OpNode::plain(opcode::OP_RET));
        self.symtab.pop();
        ops
    }

    /// Compiles a script-global procedure, resolving any calls that
    /// referenced it before this point.
    pub fn compile_procedure(&mut self, proc: &Procedure) -> AnodeId {
        let ops = self.compile_callable_body(&proc.params, proc.has_rest, &proc.body);
        let id = self.hunk.alloc(Anode::Composite(CompositeNode {
            name: proc.name.clone(),
            kind: CompositeKind::CodeBlock,
            children: ops,
        }));
        self.resolve_procedure(&proc.name, id);
        id
    }

    /// Every interned string literal's text node, in first-use order.
    /// The unit driver appends these into the hunk's text region once
    /// every procedure, method, and object in the unit has compiled.
    pub fn text_node_ids(&self) -> Vec<AnodeId> {
        self.text_pool.iter().map(|&(_, id)| id).collect()
    }

    /// Compiles a method body. The caller attaches the returned code
    /// block to the owning class/instance's method dictionary.
    pub fn compile_method(&mut self, method: &Method) -> AnodeId {
        let ops = self.compile_callable_body(&method.params, method.has_rest, &method.body);
        // Tagged `CodeBlock`, the same as a procedure: `Arena::optimize`
        // only runs the peephole pass over that composite kind, and a
        // method body is ordinary compiled code like any other.
        self.hunk.alloc(Anode::Composite(CompositeNode {
            name: method.selector.clone(),
            kind: CompositeKind::CodeBlock,
            children: ops,
        }))
    }
}
