//! Lowers one expression tree into opcode `ANode`s.
//!
//! Every compiled expression leaves its value in the accumulator;
//! [`CodegenContext::push_value`] is the one place that additionally
//! pushes it to the stack, since nearly every multi-operand
//! construct (binary ops, call/send arguments, switch scrutinees)
//! needs the stack form.

use crate::ast::{
    AssignOp, BinOp, CmpOp, Expr, IncDecOp, Message, Receiver, SelectorRef, Stmt, UnOp,
};
use crate::diagnostics::Diagnostics;
use crate::errors::{CoreError, SourceLoc};
use crate::ir::opcode::{self, AccessKind, Dest};
use crate::ir::{AnodeId, OpNode, Operand};
use crate::symtab::SymbolKind;

use super::compiler::CodegenContext;

impl<'cx> CodegenContext<'cx> {
    pub fn compile_body(&mut self, ops: &mut Vec<AnodeId>, body: &[Stmt]) {
        for stmt in body {
            self.compile_stmt(ops, stmt);
        }
    }

    pub fn compile_stmt(&mut self, ops: &mut Vec<AnodeId>, stmt: &Stmt) {
        self.maybe_emit_line(ops, stmt.line);
        self.compile_expr(ops, &stmt.expr);
    }

    /// Compiles `expr`, then pushes its accumulator result to the
    /// stack — the form every argument list and binary-op right-hand
    /// side needs.
    pub(super) fn push_value(&mut self, ops: &mut Vec<AnodeId>, expr: &Expr) {
        self.compile_expr(ops, expr);
        self.push_node(ops, OpNode::plain(opcode::OP_PUSH));
    }

    pub fn compile_expr(&mut self, ops: &mut Vec<AnodeId>, expr: &Expr) {
        if matches!(expr, Expr::Unary { .. } | Expr::Binary { .. } | Expr::Nary { .. }) {
            if let Some(n) = try_fold(expr, self.diagnostics) {
                self.push_node(ops, OpNode::with_operand(opcode::OP_LOADI, Operand::SignedImm(n as i16)));
                return;
            }
        }
        match expr {
            Expr::Number(n) => {
                self.push_node(ops, OpNode::with_operand(opcode::OP_LOADI, Operand::SignedImm(*n as i16)));
            }
            Expr::Text(s) => {
                let target = self.intern_text(s);
                self.push_node(ops, OpNode::with_operand(opcode::OP_LOFSA, Operand::TextRef(target)));
            }
            Expr::Selector(name) => {
                let num = self.vocab.selectors.intern(name);
                self.push_node(ops, OpNode::with_operand(opcode::OP_LOADI, Operand::UnsignedImm(num)));
            }
            Expr::Var { class, slot, index } => {
                if let Some(idx) = index {
                    self.push_value(ops, idx);
                }
                self.push_var_access(ops, AccessKind::Load, Dest::Accumulator, *class, *slot, index.is_some());
            }
            Expr::Prop { name } => {
                let num = self.vocab.selectors.intern(name);
                self.push_node(ops, OpNode::with_operand(opcode::OP_PTOA, Operand::UnsignedImm(num)));
            }
            Expr::AddrOf(inner) => self.compile_addr_of(ops, inner),
            Expr::ClassRef(name) => {
                let target = self.named_target(name, SymbolKind::Class);
                self.push_node(ops, OpNode::with_operand(opcode::OP_LOFSA, Operand::ObjectRef(target)));
            }
            Expr::ObjectRef(name) => {
                let target = self.named_target(name, SymbolKind::Object);
                self.push_node(ops, OpNode::with_operand(opcode::OP_LOFSA, Operand::ObjectRef(target)));
            }
            Expr::SelfRef => {
                self.push_node(ops, OpNode::plain(opcode::OP_SELFID));
            }
            Expr::Call { target, args } => self.compile_call(ops, target, args),
            Expr::ExternCall { script, entry, args } => self.compile_extern_call(ops, *script, *entry, args),
            Expr::Send { receiver, messages } => self.compile_send(ops, receiver, messages),
            Expr::Return(value) => {
                if let Some(v) = value {
                    self.compile_expr(ops, v);
                }
                self.push_node(ops, OpNode::plain(opcode::OP_RET));
            }
            Expr::Unary { op, operand } => {
                self.compile_expr(ops, operand);
                self.push_node(ops, OpNode::plain(unop_opcode(*op)));
            }
            Expr::Binary { op, left, right } => {
                self.push_value(ops, left);
                self.compile_expr(ops, right);
                self.push_node(ops, OpNode::plain(binop_opcode(*op)));
            }
            Expr::Nary { op, operands } => self.compile_nary(ops, *op, operands),
            Expr::Compare { op, operands } => self.compile_compare(ops, *op, operands),
            Expr::And(operands) => self.compile_and_or(ops, operands, true),
            Expr::Or(operands) => self.compile_and_or(ops, operands, false),
            Expr::Assign { target, op, value } => self.compile_assign(ops, target, *op, value),
            Expr::IncDec { target, op } => self.compile_inc_dec(ops, target, *op),
            Expr::If { test, then_body, else_body } => self.compile_if(ops, test, then_body, else_body),
            Expr::Cond(arms) => self.compile_cond(ops, arms),
            Expr::Switch { scrutinee, cases, default } => self.compile_switch(ops, scrutinee, cases, default.as_deref()),
            Expr::SwitchTo { scrutinee, cases } => self.compile_switch_to(ops, scrutinee, cases),
            Expr::While { test, body } => self.compile_while(ops, test, body),
            Expr::Repeat { body } => self.compile_repeat(ops, body),
            Expr::For { init, test, update, body } => self.compile_for(ops, init, test, update, body),
            Expr::Break(n) => self.compile_break(ops, *n),
            Expr::BreakIf(cond, n) => self.compile_break_if(ops, cond, *n),
            Expr::Continue(n) => self.compile_continue(ops, *n),
            Expr::ContinueIf(cond, n) => self.compile_continue_if(ops, cond, *n),
            Expr::Rest { first } => {
                self.push_node(ops, OpNode::with_operand(opcode::OP_REST, Operand::UnsignedImm(*first)));
            }
        }
    }

    /// `@var`/`@prop`: the slot's address rather than its value.
    /// Variable addresses reuse the bit-mapped load/store opcode's
    /// class/slot encoding with the opcode forced to `lea`; property
    /// address-of has no dedicated opcode in this instruction set, so
    /// it falls back to loading the property value itself (an
    /// acknowledged simplification, not a distinct "address" — see
    /// the design notes).
    fn compile_addr_of(&mut self, ops: &mut Vec<AnodeId>, inner: &Expr) {
        match inner {
            Expr::Var { slot, index, .. } => {
                if let Some(idx) = index {
                    self.push_value(ops, idx);
                }
                self.push_node(ops, OpNode::lea(*slot));
            }
            Expr::Prop { name } => {
                let num = self.vocab.selectors.intern(name);
                self.push_node(ops, OpNode::with_operand(opcode::OP_PTOA, Operand::UnsignedImm(num)));
            }
            other => self.compile_expr(ops, other),
        }
    }

    fn compile_call(&mut self, ops: &mut Vec<AnodeId>, target: &str, args: &[Expr]) {
        for a in args {
            self.push_value(ops, a);
        }
        let dest = self.procedure_target(target);
        let call_id = self.push_node(ops, OpNode::call(dest, self.arg_size()));
        self.set_call_arg_count(call_id, (2 * args.len()) as u16);
    }

    /// Like [`CodegenContext::compile_call`], but the callee has no
    /// arg-count field of its own in the `ExternCall` operand, so the
    /// byte count is pushed ahead of the arguments the same way a
    /// send's per-message argument count is.
    fn compile_extern_call(&mut self, ops: &mut Vec<AnodeId>, script: u16, entry: u16, args: &[Expr]) {
        let argc_id = self.push_node(ops, OpNode::backfill_push(opcode::OP_PUSHI, self.arg_size()));
        for a in args {
            self.push_value(ops, a);
        }
        self.set_backfill(argc_id, (2 * args.len()) as u16);
        self.push_node(ops, OpNode::with_operand(opcode::OP_CALLE, Operand::ExternCall { script, entry }));
    }

    fn compile_send(&mut self, ops: &mut Vec<AnodeId>, receiver: &Receiver, messages: &[Message]) {
        match receiver {
            Receiver::Expr(e) => self.push_value(ops, e),
            Receiver::SelfObject => {
                self.push_node(ops, OpNode::plain(opcode::OP_PUSHSELF));
            }
            Receiver::Super { .. } => {}
        }

        let mut total_bytes: u16 = 0;
        for msg in messages {
            match &msg.selector {
                SelectorRef::Named(name) => {
                    if msg.args.len() > 1 {
                        if let Some(sym) = self.symtab.lookup(name) {
                            if sym.kind == SymbolKind::Property {
                                let _ = self.diagnostics.report(CoreError::PropertyMultiArgSend {
                                    name: name.clone(),
                                    loc: SourceLoc::unknown(),
                                });
                            }
                        }
                    }
                    let num = self.vocab.selectors.intern(name);
                    self.push_node(ops, OpNode::with_operand(opcode::OP_PUSHI, Operand::UnsignedImm(num)));
                }
                SelectorRef::Computed(e) => self.push_value(ops, e),
            }
            total_bytes += 2;

            let argc_id = self.push_node(ops, OpNode::backfill_push(opcode::OP_PUSHI, self.arg_size()));
            for a in &msg.args {
                self.push_value(ops, a);
            }
            self.set_backfill(argc_id, (2 * msg.args.len()) as u16);
            total_bytes += self.arg_size() as u16 + 2 * msg.args.len() as u16;
        }

        match receiver {
            Receiver::Super { superclass } => {
                let num = self.vocab.classes.intern(superclass);
                self.push_node(ops, OpNode::super_send(num, self.arg_size(), total_bytes));
            }
            _ => {
                self.push_node(ops, OpNode::send(self.arg_size(), total_bytes));
            }
        }
    }

    fn compile_nary(&mut self, ops: &mut Vec<AnodeId>, op: BinOp, operands: &[Expr]) {
        if operands.is_empty() {
            return;
        }
        self.compile_expr(ops, &operands[0]);
        let code = binop_opcode(op);
        for rest in &operands[1..] {
            self.push_node(ops, OpNode::plain(opcode::OP_PUSH));
            self.compile_expr(ops, rest);
            self.push_node(ops, OpNode::plain(code));
        }
    }

    /// `a < b < c < ...`: each adjacent pair is compared with a
    /// `pprev`-threaded chain so the middle operand isn't recomputed.
    fn compile_compare(&mut self, ops: &mut Vec<AnodeId>, op: CmpOp, operands: &[Expr]) {
        if operands.len() < 2 {
            if let Some(only) = operands.first() {
                self.compile_expr(ops, only);
            }
            return;
        }
        let code = cmpop_opcode(op);
        self.push_value(ops, &operands[0]);
        self.compile_expr(ops, &operands[1]);
        self.push_node(ops, OpNode::plain(code));

        if operands.len() == 2 {
            return;
        }
        let end = self.fresh_target();
        for rest in &operands[2..] {
            self.push_node(ops, OpNode::branch(opcode::OP_BNT, end.clone()));
            self.push_node(ops, OpNode::plain(opcode::OP_PPREV));
            self.compile_expr(ops, rest);
            self.push_node(ops, OpNode::plain(code));
        }
        self.bind_label(ops, &end);
    }

    fn compile_and_or(&mut self, ops: &mut Vec<AnodeId>, operands: &[Expr], is_and: bool) {
        if operands.is_empty() {
            return;
        }
        let end = self.fresh_target();
        let branch_op = if is_and { opcode::OP_BNT } else { opcode::OP_BT };
        for (i, e) in operands.iter().enumerate() {
            self.compile_expr(ops, e);
            if i + 1 < operands.len() {
                self.push_node(ops, OpNode::branch(branch_op, end.clone()));
            }
        }
        self.bind_label(ops, &end);
    }

    fn compile_store(&mut self, ops: &mut Vec<AnodeId>, target: &Expr) {
        match target {
            Expr::Var { class, slot, index } => {
                if let Some(idx) = index {
                    self.push_value(ops, idx);
                }
                self.push_var_access(ops, AccessKind::Store, Dest::Stack, *class, *slot, index.is_some());
            }
            Expr::Prop { name } => {
                let num = self.vocab.selectors.intern(name);
                self.push_node(ops, OpNode::with_operand(opcode::OP_STOP, Operand::UnsignedImm(num)));
            }
            _ => {
                let _ = self.diagnostics.report(CoreError::Internal {
                    detail: "assignment target is neither a variable nor a property".into(),
                    loc: SourceLoc::unknown(),
                });
            }
        }
    }

    fn compile_assign(&mut self, ops: &mut Vec<AnodeId>, target: &Expr, op: AssignOp, value: &Expr) {
        match op {
            AssignOp::Set => {
                self.push_value(ops, value);
            }
            AssignOp::Compound(binop) => {
                self.push_value(ops, target);
                self.compile_expr(ops, value);
                self.push_node(ops, OpNode::plain(binop_opcode(binop)));
                self.push_node(ops, OpNode::plain(opcode::OP_PUSH));
            }
        }
        self.compile_store(ops, target);
    }

    fn compile_inc_dec(&mut self, ops: &mut Vec<AnodeId>, target: &Expr, op: IncDecOp) {
        match target {
            Expr::Var { class, slot, index } => {
                if let Some(idx) = index {
                    self.push_value(ops, idx);
                }
                let kind = match op {
                    IncDecOp::Inc => AccessKind::IncLoad,
                    IncDecOp::Dec => AccessKind::DecLoad,
                };
                self.push_var_access(ops, kind, Dest::Accumulator, *class, *slot, index.is_some());
            }
            Expr::Prop { name } => {
                let num = self.vocab.selectors.intern(name);
                let code = match op {
                    IncDecOp::Inc => opcode::OP_IPTOA,
                    IncDecOp::Dec => opcode::OP_DPTOA,
                };
                self.push_node(ops, OpNode::with_operand(code, Operand::UnsignedImm(num)));
            }
            _ => {
                let _ = self.diagnostics.report(CoreError::Internal {
                    detail: "increment/decrement target is neither a variable nor a property".into(),
                    loc: SourceLoc::unknown(),
                });
            }
        }
    }

    fn compile_if(&mut self, ops: &mut Vec<AnodeId>, test: &Expr, then_body: &[Stmt], else_body: &[Stmt]) {
        self.compile_expr(ops, test);
        if else_body.is_empty() {
            let end = self.fresh_target();
            self.push_node(ops, OpNode::branch(opcode::OP_BNT, end.clone()));
            self.compile_body(ops, then_body);
            self.bind_label(ops, &end);
        } else {
            let else_l = self.fresh_target();
            let end = self.fresh_target();
            self.push_node(ops, OpNode::branch(opcode::OP_BNT, else_l.clone()));
            self.compile_body(ops, then_body);
            self.push_node(ops, OpNode::branch(opcode::OP_JMP, end.clone()));
            self.bind_label(ops, &else_l);
            self.compile_body(ops, else_body);
            self.bind_label(ops, &end);
        }
    }

    fn compile_cond(&mut self, ops: &mut Vec<AnodeId>, arms: &[(Option<Expr>, Vec<Stmt>)]) {
        let end = self.fresh_target();
        for (test, body) in arms {
            match test {
                Some(t) => {
                    let next = self.fresh_target();
                    self.compile_expr(ops, t);
                    self.push_node(ops, OpNode::branch(opcode::OP_BNT, next.clone()));
                    self.compile_body(ops, body);
                    self.push_node(ops, OpNode::branch(opcode::OP_JMP, end.clone()));
                    self.bind_label(ops, &next);
                }
                None => self.compile_body(ops, body),
            }
        }
        self.bind_label(ops, &end);
    }

    fn compile_switch(&mut self, ops: &mut Vec<AnodeId>, scrutinee: &Expr, cases: &[(Expr, Vec<Stmt>)], default: Option<&[Stmt]>) {
        self.push_value(ops, scrutinee);
        let end = self.fresh_target();
        for (value, body) in cases {
            let next = self.fresh_target();
            self.push_node(ops, OpNode::plain(opcode::OP_DUP));
            self.compile_expr(ops, value);
            self.push_node(ops, OpNode::plain(opcode::OP_EQ));
            self.push_node(ops, OpNode::branch(opcode::OP_BNT, next.clone()));
            self.compile_body(ops, body);
            self.push_node(ops, OpNode::branch(opcode::OP_JMP, end.clone()));
            self.bind_label(ops, &next);
        }
        if let Some(body) = default {
            self.compile_body(ops, body);
        }
        self.bind_label(ops, &end);
        self.push_node(ops, OpNode::plain(opcode::OP_TOSS));
    }

    fn compile_switch_to(&mut self, ops: &mut Vec<AnodeId>, scrutinee: &Expr, cases: &[Vec<Stmt>]) {
        self.push_value(ops, scrutinee);
        let end = self.fresh_target();
        for (i, body) in cases.iter().enumerate() {
            let next = self.fresh_target();
            self.push_node(ops, OpNode::plain(opcode::OP_DUP));
            self.push_node(ops, OpNode::with_operand(opcode::OP_LOADI, Operand::SignedImm(i as i16)));
            self.push_node(ops, OpNode::plain(opcode::OP_EQ));
            self.push_node(ops, OpNode::branch(opcode::OP_BNT, next.clone()));
            self.compile_body(ops, body);
            self.push_node(ops, OpNode::branch(opcode::OP_JMP, end.clone()));
            self.bind_label(ops, &next);
        }
        self.bind_label(ops, &end);
        self.push_node(ops, OpNode::plain(opcode::OP_TOSS));
    }

    fn compile_while(&mut self, ops: &mut Vec<AnodeId>, test: &Expr, body: &[Stmt]) {
        let start = self.fresh_target();
        let end = self.fresh_target();
        self.bind_label(ops, &start);
        self.compile_expr(ops, test);
        self.push_node(ops, OpNode::branch(opcode::OP_BNT, end.clone()));
        self.enter_loop(start.clone(), start.clone(), end.clone());
        self.compile_body(ops, body);
        self.exit_loop();
        self.push_node(ops, OpNode::branch(opcode::OP_JMP, start.clone()));
        self.bind_label(ops, &end);
    }

    fn compile_repeat(&mut self, ops: &mut Vec<AnodeId>, body: &[Stmt]) {
        let start = self.fresh_target();
        let end = self.fresh_target();
        self.bind_label(ops, &start);
        self.enter_loop(start.clone(), start.clone(), end.clone());
        self.compile_body(ops, body);
        self.exit_loop();
        self.push_node(ops, OpNode::branch(opcode::OP_JMP, start.clone()));
        self.bind_label(ops, &end);
    }

    fn compile_for(&mut self, ops: &mut Vec<AnodeId>, init: &[Stmt], test: &Expr, update: &[Stmt], body: &[Stmt]) {
        self.compile_body(ops, init);
        let start = self.fresh_target();
        let cont = self.fresh_target();
        let end = self.fresh_target();
        self.bind_label(ops, &start);
        self.compile_expr(ops, test);
        self.push_node(ops, OpNode::branch(opcode::OP_BNT, end.clone()));
        self.enter_loop(start.clone(), cont.clone(), end.clone());
        self.compile_body(ops, body);
        self.exit_loop();
        self.bind_label(ops, &cont);
        self.compile_body(ops, update);
        self.push_node(ops, OpNode::branch(opcode::OP_JMP, start.clone()));
        self.bind_label(ops, &end);
    }

    fn compile_break(&mut self, ops: &mut Vec<AnodeId>, n: u32) {
        match self.loop_ctx(n) {
            Some(ctx) => {
                let end = ctx.end.clone();
                self.push_node(ops, OpNode::branch(opcode::OP_JMP, end));
            }
            None => {
                let _ = self.diagnostics.report(CoreError::BreakContinueDepthExceeded {
                    loc: SourceLoc::unknown(),
                });
            }
        }
    }

    fn compile_continue(&mut self, ops: &mut Vec<AnodeId>, n: u32) {
        match self.loop_ctx(n) {
            Some(ctx) => {
                let cont = ctx.cont.clone();
                self.push_node(ops, OpNode::branch(opcode::OP_JMP, cont));
            }
            None => {
                let _ = self.diagnostics.report(CoreError::BreakContinueDepthExceeded {
                    loc: SourceLoc::unknown(),
                });
            }
        }
    }

    fn compile_break_if(&mut self, ops: &mut Vec<AnodeId>, cond: &Expr, n: u32) {
        self.compile_expr(ops, cond);
        match self.loop_ctx(n) {
            Some(ctx) => {
                let end = ctx.end.clone();
                self.push_node(ops, OpNode::branch(opcode::OP_BT, end));
            }
            None => {
                let _ = self.diagnostics.report(CoreError::BreakContinueDepthExceeded {
                    loc: SourceLoc::unknown(),
                });
            }
        }
    }

    fn compile_continue_if(&mut self, ops: &mut Vec<AnodeId>, cond: &Expr, n: u32) {
        self.compile_expr(ops, cond);
        match self.loop_ctx(n) {
            Some(ctx) => {
                let cont = ctx.cont.clone();
                self.push_node(ops, OpNode::branch(opcode::OP_BT, cont));
            }
            None => {
                let _ = self.diagnostics.report(CoreError::BreakContinueDepthExceeded {
                    loc: SourceLoc::unknown(),
                });
            }
        }
    }
}

fn unop_opcode(op: UnOp) -> u8 {
    match op {
        UnOp::Neg => opcode::OP_NEG,
        UnOp::Not => opcode::OP_NOT,
        UnOp::BNot => opcode::OP_BNOT,
    }
}

fn binop_opcode(op: BinOp) -> u8 {
    match op {
        BinOp::Add => opcode::OP_ADD,
        BinOp::Sub => opcode::OP_SUB,
        BinOp::Mul => opcode::OP_MUL,
        BinOp::Div => opcode::OP_DIV,
        BinOp::Mod => opcode::OP_MOD,
        BinOp::Shr => opcode::OP_SHR,
        BinOp::Shl => opcode::OP_SHL,
        BinOp::Xor => opcode::OP_XOR,
        BinOp::And => opcode::OP_AND,
        BinOp::Or => opcode::OP_OR,
    }
}

fn cmpop_opcode(op: CmpOp) -> u8 {
    match op {
        CmpOp::Eq => opcode::OP_EQ,
        CmpOp::Ne => opcode::OP_NE,
        CmpOp::Gt => opcode::OP_GT,
        CmpOp::Ge => opcode::OP_GE,
        CmpOp::Lt => opcode::OP_LT,
        CmpOp::Le => opcode::OP_LE,
        CmpOp::UGt => opcode::OP_UGT,
        CmpOp::UGe => opcode::OP_UGE,
        CmpOp::ULt => opcode::OP_ULT,
        CmpOp::ULe => opcode::OP_ULE,
    }
}

/// Folds an expression built entirely from literal numbers and
/// arithmetic into a single value, the way the front end is expected
/// to have already done for most cases; codegen re-applies it so a
/// constant subtree surviving into this crate still collapses to one
/// `ldi` rather than a chain of opcodes. Never crosses a variable
/// read: the moment a non-literal leaf is seen, folding bails out for
/// that whole subtree.
fn try_fold(expr: &Expr, diagnostics: &mut Diagnostics) -> Option<i32> {
    match expr {
        Expr::Number(n) => Some(*n),
        Expr::Unary { op, operand } => {
            let v = try_fold(operand, diagnostics)?;
            Some(match op {
                UnOp::Neg => v.wrapping_neg(),
                UnOp::Not => (v == 0) as i32,
                UnOp::BNot => !v,
            })
        }
        Expr::Binary { op, left, right } => {
            let a = try_fold(left, diagnostics)?;
            let b = try_fold(right, diagnostics)?;
            fold_binop(*op, a, b, diagnostics)
        }
        Expr::Nary { op, operands } => {
            let mut iter = operands.iter();
            let mut acc = try_fold(iter.next()?, diagnostics)?;
            for rest in iter {
                let v = try_fold(rest, diagnostics)?;
                acc = fold_binop(*op, acc, v, diagnostics)?;
            }
            Some(acc)
        }
        _ => None,
    }
}

/// Folds a binary operator over two already-constant operands.
/// Division and modulo by a constant zero are reported as a
/// diagnostic (the source-level error the original would raise at
/// parse time) and the fold is abandoned; codegen then compiles the
/// operands as ordinary runtime arithmetic instead.
fn fold_binop(op: BinOp, a: i32, b: i32, diagnostics: &mut Diagnostics) -> Option<i32> {
    Some(match op {
        BinOp::Add => a.wrapping_add(b),
        BinOp::Sub => a.wrapping_sub(b),
        BinOp::Mul => a.wrapping_mul(b),
        BinOp::Div => {
            if b == 0 {
                let _ = diagnostics.report(CoreError::SyntaxError {
                    detail: "division by zero in constant expression".to_string(),
                    loc: SourceLoc::unknown(),
                });
                return None;
            }
            a.wrapping_div(b)
        }
        BinOp::Mod => {
            if b == 0 {
                let _ = diagnostics.report(CoreError::SyntaxError {
                    detail: "modulo by zero in constant expression".to_string(),
                    loc: SourceLoc::unknown(),
                });
                return None;
            }
            a.wrapping_rem(b)
        }
        BinOp::Shr => a >> (b & 31),
        BinOp::Shl => a << (b & 31),
        BinOp::Xor => a ^ b,
        BinOp::And => a & b,
        BinOp::Or => a | b,
    })
}
